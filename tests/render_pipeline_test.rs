use std::collections::HashMap;
use std::time::{Duration, Instant};

use quire::controller::{ControllerOptions, PageController};
use quire::doc::{Doc, DocEvent, DocOptions};
use quire::geom::{Point, Rect, Size};
use quire::renderer::{PassReport, ViewRenderer};
use quire::test_utils::{expected_pixel, settle_renders, RecordingDelegate, SyntheticSource};
use quire::RequestId;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

type Stack = (Doc, PageController<RecordingDelegate>, ViewRenderer);

fn stack_with(source: SyntheticSource, pages: usize) -> Stack {
    let doc = Doc::open(&source, DocOptions::default()).unwrap();
    let mut c = PageController::new(
        RecordingDelegate::new(Size::new(100.0, 140.0)),
        ControllerOptions::default(),
    );
    c.set_viewport_size(Size::new(400.0, 600.0));
    c.set_page_count(pages);
    c.layout_pass();
    let renderer = ViewRenderer::new(doc.clone());
    (doc, c, renderer)
}

fn stack(pages: usize) -> Stack {
    stack_with(SyntheticSource::new(pages, Size::new(100.0, 140.0)), pages)
}

/// Sample the front buffer at the center of `page`'s visible region
fn sample_center(
    renderer: &ViewRenderer,
    c: &PageController<RecordingDelegate>,
    page: usize,
) -> u8 {
    let frame = c.layout().frame(page).unwrap();
    let scroll = c.scroll_offset();
    let screen = frame.translated(-scroll.x, -scroll.y);
    let view = screen.intersect(&Rect::new(0.0, 0.0, 400.0, 600.0));
    assert!(!view.is_empty(), "page {page} is not on screen");
    let cx = (view.x + view.width / 2.0) as u32;
    let cy = (view.y + view.height / 2.0) as u32;
    renderer.front_buffer().with_samples(|s| s.pixel(cx, cy)[0])
}

/// Render passes until one reports nothing to do
fn quiesce(doc: &Doc, c: &mut PageController<RecordingDelegate>, renderer: &mut ViewRenderer) {
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        assert!(Instant::now() < deadline, "pipeline never quiesced");
        c.layout_pass();
        let report = renderer.render_pass(c);
        settle_renders(doc, renderer, c);
        if report == PassReport::default() {
            return;
        }
    }
}

#[test]
fn visible_pages_render_their_signatures() {
    let (doc, mut c, mut renderer) = stack(10);

    let report = renderer.render_pass(&mut c);
    assert!(report.displays >= 2);
    settle_renders(&doc, &mut renderer, &mut c);

    assert_eq!(sample_center(&renderer, &c, 0), expected_pixel(0));
    assert_eq!(sample_center(&renderer, &c, 1), expected_pixel(1));
}

#[test]
fn random_scroll_soak_settles_into_correct_pixels() {
    let source =
        SyntheticSource::new(40, Size::new(100.0, 140.0)).render_delay(Duration::from_millis(3));
    let (doc, mut c, mut renderer) = stack_with(source, 40);
    let mut rng = StdRng::seed_from_u64(11);
    let mut completions: HashMap<RequestId, usize> = HashMap::new();

    let content_height = c.layout().content_size().height;
    for _ in 0..60 {
        let y = rng.gen_range(0.0..content_height);
        c.set_scroll_offset(Point::new(0.0, y));
        c.layout_pass();
        renderer.render_pass(&mut c);

        let events = doc.pump_events();
        for event in &events {
            if let DocEvent::RenderDone { id, .. } = event {
                *completions.entry(*id).or_insert(0) += 1;
            }
        }
        renderer.apply_completions(&events, &mut c);
    }

    quiesce(&doc, &mut c, &mut renderer);

    // Whatever interleaving the soak produced, each request completed at
    // most once and the settled screen shows the right pages.
    assert!(completions.values().all(|&n| n == 1));
    let scroll = c.scroll_offset();
    let view = Rect::new(scroll.x, scroll.y, 400.0, 600.0);
    for page in c.layout().visible_pages(view) {
        assert_eq!(
            sample_center(&renderer, &c, page),
            expected_pixel(page),
            "wrong pixels for page {page}"
        );
    }
}

#[test]
fn late_completions_for_recycled_cells_are_dropped() {
    let source =
        SyntheticSource::new(40, Size::new(100.0, 140.0)).render_delay(Duration::from_millis(30));
    let (doc, mut c, mut renderer) = stack_with(source, 40);

    // Issue renders for the top pages, then jump away before they land
    renderer.render_pass(&mut c);
    c.show_page(20, false);
    c.layout_pass();
    renderer.render_pass(&mut c);

    quiesce(&doc, &mut c, &mut renderer);

    let scroll = c.scroll_offset();
    let view = Rect::new(scroll.x, scroll.y, 400.0, 600.0);
    let visible: Vec<usize> = c.layout().visible_pages(view).collect();
    assert!(visible.contains(&20));
    for page in visible {
        assert_eq!(sample_center(&renderer, &c, page), expected_pixel(page));
    }
    // Nothing still holds the abandoned pages
    assert!(c.pool().slot_for_page(0).is_none());
    assert_eq!(renderer.in_flight_count(), 0);
}

#[test]
fn failed_page_keeps_the_rest_of_the_pass_alive() {
    let source = SyntheticSource::new(10, Size::new(100.0, 140.0)).fail_page(1);
    let (doc, mut c, mut renderer) = stack_with(source, 10);

    renderer.render_pass(&mut c);
    settle_renders(&doc, &mut renderer, &mut c);

    assert_eq!(sample_center(&renderer, &c, 0), expected_pixel(0));
    let slot = c.pool().slot_for_page(1).unwrap();
    assert!(!c.pool().get(slot).unwrap().surface().is_displaying());

    // The failed page is asked for again on the next pass
    let report = renderer.render_pass(&mut c);
    assert!(report.displays >= 1);
}

#[test]
fn dark_mode_toggles_invert_and_restore() {
    let (doc, mut c, mut renderer) = stack(6);
    renderer.render_pass(&mut c);
    settle_renders(&doc, &mut renderer, &mut c);

    renderer.set_dark_mode(true);
    renderer.render_pass(&mut c);
    settle_renders(&doc, &mut renderer, &mut c);
    assert_eq!(sample_center(&renderer, &c, 0), 255 - expected_pixel(0));

    renderer.set_dark_mode(false);
    renderer.render_pass(&mut c);
    settle_renders(&doc, &mut renderer, &mut c);
    assert_eq!(sample_center(&renderer, &c, 0), expected_pixel(0));
}

#[test]
fn progressive_discovery_extends_the_document() {
    let source = SyntheticSource::new(12, Size::new(100.0, 140.0))
        .discover_from(3)
        .load_steps(4);
    let (doc, mut c, mut renderer) = stack_with(source, 3);
    assert_eq!(doc.page_count(), 3);
    let height_before = c.layout().content_size().height;

    doc.load();
    let deadline = Instant::now() + Duration::from_secs(2);
    let mut complete = false;
    while !complete {
        assert!(Instant::now() < deadline, "load never completed");
        for event in doc.pump_events() {
            if let DocEvent::PagesLoaded { complete: done, .. } = event {
                c.set_page_count(doc.page_count());
                complete = done;
            }
        }
        std::thread::sleep(Duration::from_millis(1));
    }

    assert_eq!(doc.page_count(), 12);
    c.layout_pass();
    assert_eq!(c.layout().page_count(), 12);
    assert!(c.layout().content_size().height > height_before);

    // Late pages are real pages: show one and render it
    c.show_page(11, false);
    c.layout_pass();
    renderer.render_pass(&mut c);
    settle_renders(&doc, &mut renderer, &mut c);
    assert_eq!(sample_center(&renderer, &c, 11), expected_pixel(11));
}
