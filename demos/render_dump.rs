//! Render synthetic pages into a PNG contact sheet.
//!
//! Usage: cargo run --example render_dump -- --pages 6 --out sheet.png
//!
//! Uses the synchronous render path, so it doubles as a smoke test for
//! export-style blocking renders and for dark-mode tone conversion
//! (pass --dark to invert).

use anyhow::Result;
use clap::Parser;
use quire::doc::{Doc, DocOptions};
use quire::geom::{Point, Size};
use quire::test_utils::SyntheticSource;

#[derive(Parser, Debug)]
#[command(about = "Dump rendered pages to a PNG contact sheet")]
struct Args {
    /// Pages to render
    #[arg(long, default_value_t = 6)]
    pages: usize,

    /// Pixels per page unit
    #[arg(long, default_value_t = 1.0)]
    zoom: f32,

    /// Invert tones as in dark mode
    #[arg(long, default_value_t = false)]
    dark: bool,

    /// Output file
    #[arg(long, default_value = "sheet.png")]
    out: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let page_size = Size::new(100.0, 140.0);
    let source = SyntheticSource::new(args.pages, page_size);
    let doc = Doc::open(&source, DocOptions::default())?;

    let gap = 4u32;
    let tile_w = (page_size.width * args.zoom).ceil() as u32;
    let tile_h = (page_size.height * args.zoom).ceil() as u32;
    let sheet_w = args.pages as u32 * (tile_w + gap) + gap;
    let sheet_h = tile_h + 2 * gap;
    let mut sheet = image::RgbaImage::from_pixel(sheet_w, sheet_h, image::Rgba([30, 30, 30, 255]));

    for number in 0..args.pages {
        let page = doc
            .page(number)
            .ok_or_else(|| anyhow::anyhow!("page {number} missing"))?;
        let mut target = doc.make_bitmap(Size::new(tile_w as f32, tile_h as f32));
        target.set_dark_mode(args.dark);
        page.render_sync(args.zoom, Point::zero(), &target)?;

        let x0 = gap + number as u32 * (tile_w + gap);
        target.with_samples(|s| {
            for y in 0..s.height() {
                for x in 0..s.width() {
                    let px = s.pixel(x, y);
                    sheet.put_pixel(x0 + x, gap + y, image::Rgba([px[0], px[1], px[2], px[3]]));
                }
            }
        });
        println!("rendered page {number} at zoom {}", args.zoom);
    }

    sheet.save(&args.out)?;
    println!("wrote {}", args.out);
    Ok(())
}
