//! Test fixtures: a synthetic render engine and a recording delegate

use std::collections::HashSet;
use std::time::Duration;

use crate::bitmap::{Bitmap, BitmapKind};
use crate::controller::PageControllerDelegate;
use crate::doc::Doc;
use crate::engine::{EngineSource, RasterRequest, RenderEngine, RenderLayer};
use crate::geom::{PagePoint, Point, Size};
use crate::render::{CancelFlag, RenderFault};
use crate::renderer::{CellProvider, ViewRenderer};

/// Byte every pixel of `page` is filled with, so tests can tell pages
/// apart by sampling.
#[must_use]
pub fn expected_pixel(page: usize) -> u8 {
    (page * 37 + 11) as u8
}

/// Engine factory with scriptable page sizes, failures, and latency
#[derive(Clone, Debug, Default)]
pub struct SyntheticSource {
    pages: Vec<Size>,
    fail_pages: HashSet<usize>,
    render_delay: Option<Duration>,
    load_steps: usize,
    known_at_open: Option<usize>,
}

impl SyntheticSource {
    #[must_use]
    pub fn new(count: usize, size: Size) -> Self {
        Self {
            pages: vec![size; count],
            fail_pages: HashSet::new(),
            render_delay: None,
            load_steps: 1,
            known_at_open: None,
        }
    }

    #[must_use]
    pub fn with_page_sizes(pages: Vec<Size>) -> Self {
        Self {
            pages,
            fail_pages: HashSet::new(),
            render_delay: None,
            load_steps: 1,
            known_at_open: None,
        }
    }

    /// Every render of `page` fails with an engine fault
    #[must_use]
    pub fn fail_page(mut self, page: usize) -> Self {
        self.fail_pages.insert(page);
        self
    }

    /// Make renders take roughly `delay`, polling cancellation throughout
    #[must_use]
    pub fn render_delay(mut self, delay: Duration) -> Self {
        self.render_delay = Some(delay);
        self
    }

    /// Report page discovery in `steps` increments instead of at once
    #[must_use]
    pub fn load_steps(mut self, steps: usize) -> Self {
        self.load_steps = steps.max(1);
        self
    }

    /// Expose only `count` pages at open; the rest appear during `load`
    #[must_use]
    pub fn discover_from(mut self, count: usize) -> Self {
        self.known_at_open = Some(count);
        self
    }
}

impl EngineSource for SyntheticSource {
    fn open(&self) -> Result<Box<dyn RenderEngine>, RenderFault> {
        Ok(Box::new(SyntheticEngine {
            pages: self.pages.clone(),
            fail_pages: self.fail_pages.clone(),
            render_delay: self.render_delay,
            load_steps: self.load_steps,
            known_at_open: self.known_at_open,
        }))
    }
}

struct SyntheticEngine {
    pages: Vec<Size>,
    fail_pages: HashSet<usize>,
    render_delay: Option<Duration>,
    load_steps: usize,
    known_at_open: Option<usize>,
}

fn fill_signature(target: &Bitmap, value: u8) {
    match target.kind() {
        BitmapKind::A8 => target.fill(&[value]),
        BitmapKind::Rgb555 | BitmapKind::Rgb565 => {
            target.fill(&u16::from(value).to_le_bytes());
        }
        BitmapKind::Rgba8888 => target.fill(&[value, value, value, 255]),
    }
}

impl RenderEngine for SyntheticEngine {
    fn page_count(&self) -> usize {
        self.known_at_open.unwrap_or(self.pages.len())
    }

    fn page_size(&self, page: usize) -> Option<Size> {
        self.pages.get(page).copied()
    }

    fn load(
        &mut self,
        progress: &mut dyn FnMut(usize, bool),
        cancel: &CancelFlag,
    ) -> Result<(), RenderFault> {
        let total = self.pages.len();
        for step in 1..=self.load_steps {
            if cancel.is_cancelled() {
                return Ok(());
            }
            progress(total * step / self.load_steps, step == self.load_steps);
            std::thread::sleep(Duration::from_millis(1));
        }
        Ok(())
    }

    fn render(&mut self, req: &RasterRequest<'_>) -> Result<(), RenderFault> {
        if self.fail_pages.contains(&req.page) {
            return Err(RenderFault::engine(format!(
                "scripted failure for page {}",
                req.page
            )));
        }
        if let Some(delay) = self.render_delay {
            let slices = (delay.as_millis() as u64).max(1);
            for _ in 0..slices {
                if req.cancel.is_cancelled() {
                    return Ok(());
                }
                std::thread::sleep(Duration::from_millis(1));
            }
        }

        let mut value = expected_pixel(req.page);
        if req.layer == RenderLayer::Annotations {
            value = value.wrapping_add(1);
        }
        fill_signature(req.target, value);
        Ok(())
    }
}

/// Pump events and fold completions until nothing is in flight. Panics
/// when renders do not settle within two seconds.
pub fn settle_renders(
    doc: &Doc,
    renderer: &mut ViewRenderer,
    provider: &mut dyn CellProvider,
) -> usize {
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    let mut applied = 0;
    while renderer.in_flight_count() > 0 {
        assert!(
            std::time::Instant::now() < deadline,
            "renders did not settle"
        );
        let events = doc.pump_events();
        applied += renderer.apply_completions(&events, provider);
        std::thread::sleep(Duration::from_millis(1));
    }
    applied
}

/// What a delegate call looked like, for assertions
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DelegateCall {
    SetupCell { slot: usize, page: usize },
    ViewAltered(bool),
    Tap(PagePoint),
    DoubleTap(PagePoint),
    LongPressBegin(PagePoint),
    LongPressMove(PagePoint),
    LongPressEnd(PagePoint),
    Drag(Point),
    AdjustToReducedScreenArea,
    ReflowZoom(f32),
}

/// Delegate that sizes cells for a fixed page aspect and records every
/// call it receives
#[derive(Debug)]
pub struct RecordingDelegate {
    page_size: Size,
    calls: Vec<DelegateCall>,
}

impl RecordingDelegate {
    #[must_use]
    pub fn new(page_size: Size) -> Self {
        Self {
            page_size,
            calls: vec![],
        }
    }

    #[must_use]
    pub fn calls(&self) -> &[DelegateCall] {
        &self.calls
    }

    pub fn clear(&mut self) {
        self.calls.clear();
    }
}

impl PageControllerDelegate for RecordingDelegate {
    fn adjust_size(&mut self, nominal: Size, _page: usize) -> Size {
        Size::new(
            nominal.width,
            nominal.width * self.page_size.height / self.page_size.width,
        )
    }

    fn setup_cell(&mut self, slot: usize, page: usize) {
        self.calls.push(DelegateCall::SetupCell { slot, page });
    }

    fn view_altered(&mut self, force: bool) {
        self.calls.push(DelegateCall::ViewAltered(force));
    }

    fn on_tap(&mut self, location: PagePoint) {
        self.calls.push(DelegateCall::Tap(location));
    }

    fn on_double_tap(&mut self, location: PagePoint) {
        self.calls.push(DelegateCall::DoubleTap(location));
    }

    fn on_long_press_begin(&mut self, location: PagePoint) {
        self.calls.push(DelegateCall::LongPressBegin(location));
    }

    fn on_long_press_move(&mut self, location: PagePoint) {
        self.calls.push(DelegateCall::LongPressMove(location));
    }

    fn on_long_press_end(&mut self, location: PagePoint) {
        self.calls.push(DelegateCall::LongPressEnd(location));
    }

    fn on_drag(&mut self, delta: Point) {
        self.calls.push(DelegateCall::Drag(delta));
    }

    fn adjust_to_reduced_screen_area(&mut self) {
        self.calls.push(DelegateCall::AdjustToReducedScreenArea);
    }

    fn on_reflow_zoom(&mut self, zoom: f32) {
        self.calls.push(DelegateCall::ReflowZoom(zoom));
    }
}
