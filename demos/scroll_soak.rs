//! Random-scroll soak for the virtualization and render pipeline.
//!
//! Usage: cargo run --example scroll_soak -- --pages 200 --steps 500
//!
//! Drives a synthetic document through random viewport jumps, pumping
//! completions between jumps, then settles and checks that every visible
//! page shows its own pixels. Prints pass statistics and writes a debug
//! log to scroll_soak.log.

use std::fs::File;
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use log::info;
use quire::controller::{ControllerOptions, PageController, PageControllerDelegate};
use quire::doc::{Doc, DocOptions};
use quire::geom::{Point, Rect, Size};
use quire::renderer::{PassReport, ViewRenderer};
use quire::test_utils::{expected_pixel, settle_renders, SyntheticSource};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use simplelog::{Config, LevelFilter, WriteLogger};

#[derive(Parser, Debug)]
#[command(about = "Random-scroll soak for the render pipeline")]
struct Args {
    /// Synthetic document length in pages
    #[arg(long, default_value_t = 200)]
    pages: usize,

    /// Number of random viewport jumps
    #[arg(long, default_value_t = 500)]
    steps: usize,

    /// Per-render latency in milliseconds
    #[arg(long, default_value_t = 2)]
    render_ms: u64,

    /// RNG seed
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

/// Sizes every cell to the synthetic page aspect
struct FixedAspect {
    page: Size,
}

impl PageControllerDelegate for FixedAspect {
    fn adjust_size(&mut self, nominal: Size, _page: usize) -> Size {
        Size::new(
            nominal.width,
            nominal.width * self.page.height / self.page.width,
        )
    }
}

fn main() -> Result<()> {
    WriteLogger::init(
        LevelFilter::Debug,
        Config::default(),
        File::create("scroll_soak.log")?,
    )?;
    let args = Args::parse();
    info!("soak start: {args:?}");

    let page_size = Size::new(100.0, 140.0);
    let source = SyntheticSource::new(args.pages, page_size)
        .render_delay(std::time::Duration::from_millis(args.render_ms));
    let doc = Doc::open(&source, DocOptions::default())?;

    let viewport = Size::new(400.0, 600.0);
    let mut controller = PageController::new(
        FixedAspect { page: page_size },
        ControllerOptions::default(),
    );
    controller.set_viewport_size(viewport);
    controller.set_page_count(doc.page_count());
    controller.layout_pass();
    let mut renderer = ViewRenderer::new(doc.clone());

    let mut rng = StdRng::seed_from_u64(args.seed);
    let content_height = controller.layout().content_size().height;
    let mut totals = PassReport::default();
    let mut flips = 0usize;
    let mut max_cells = 0usize;
    let started = Instant::now();

    for step in 0..args.steps {
        let y = rng.gen_range(0.0..content_height);
        controller.set_scroll_offset(Point::new(0.0, y));
        controller.layout_pass();

        let report = renderer.render_pass(&mut controller);
        totals.displays += report.displays;
        totals.updates += report.updates;
        totals.carried += report.carried;
        flips += usize::from(report.flipped);
        max_cells = max_cells.max(controller.pool().len());

        let events = doc.pump_events();
        renderer.apply_completions(&events, &mut controller);

        if (step + 1) % 100 == 0 {
            println!(
                "step {:>5}: cells={} in_flight={} displays so far={}",
                step + 1,
                controller.pool().len(),
                renderer.in_flight_count(),
                totals.displays
            );
        }
    }

    // Settle whatever the last jump left behind
    loop {
        controller.layout_pass();
        let report = renderer.render_pass(&mut controller);
        settle_renders(&doc, &mut renderer, &mut controller);
        if report == PassReport::default() {
            break;
        }
    }

    let scroll = controller.scroll_offset();
    let view = Rect::new(scroll.x, scroll.y, viewport.width, viewport.height);
    let mut mismatches = 0usize;
    for page in controller.layout().visible_pages(view) {
        let frame = controller.layout().frame(page).unwrap_or_default();
        let screen = frame.translated(-scroll.x, -scroll.y);
        let visible = screen.intersect(&Rect::new(0.0, 0.0, viewport.width, viewport.height));
        let cx = (visible.x + visible.width / 2.0) as u32;
        let cy = (visible.y + visible.height / 2.0) as u32;
        let sample = renderer.front_buffer().with_samples(|s| s.pixel(cx, cy)[0]);
        if sample != expected_pixel(page) {
            println!("MISMATCH: page {page} shows {sample}, wanted {}", expected_pixel(page));
            mismatches += 1;
        }
    }

    println!(
        "\n{} steps in {:.2?}: {} displays, {} updates, {} carries, {} flips",
        args.steps,
        started.elapsed(),
        totals.displays,
        totals.updates,
        totals.carried,
        flips
    );
    println!("peak cells: {max_cells}, mismatches after settle: {mismatches}");
    info!("soak done: displays={} mismatches={mismatches}", totals.displays);

    if mismatches > 0 {
        anyhow::bail!("{mismatches} pages settled with wrong pixels");
    }
    Ok(())
}
