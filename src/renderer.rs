//! View renderer: double-buffered render passes over the visible cells
//!
//! Each pass walks the visible cells and decides, per cell, between a full
//! display render, a flicker-free update render, and carrying pixels it
//! already holds into place, then issues the renders asynchronously.
//! Completions come back through `Doc::pump_events` and are folded in by
//! `apply_completions`. Staleness is decided by identity, never by timing:
//! a completion applies only while its request id is still in flight and
//! its cell still holds the same (generation, page) binding.
//!
//! Passes that issue a display render flip the front buffer; update-only
//! passes draw into the current front buffer in place so annotation-style
//! refreshes never flicker.

use std::collections::HashMap;

use crate::bitmap::Bitmap;
use crate::cell::PageSurface;
use crate::doc::{Doc, DocEvent, Page};
use crate::geom::{PixelRect, Point, Rect, Size};
use crate::render::RenderHandle;

/// Tolerance when comparing render scales
const SCALE_EPS: f32 = 1e-3;

/// Supplies the visible cells for a pass. Implemented by the viewport
/// controller; the renderer never sees the pool itself.
pub trait CellProvider {
    fn viewport_size(&self) -> Size;
    fn for_each_visible_cell(&mut self, f: &mut dyn FnMut(VisibleCell<'_>));
}

/// One visible cell, lent to the renderer for the duration of a call
pub struct VisibleCell<'a> {
    pub slot: usize,
    pub generation: u64,
    pub page: usize,
    /// Cell frame in viewport coordinates; may extend past the edges
    pub screen_rect: Rect,
    pub surface: &'a mut PageSurface,
}

/// What one render pass did
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PassReport {
    pub flipped: bool,
    pub displays: usize,
    pub updates: usize,
    pub carried: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RenderKind {
    Display,
    Update,
}

struct InFlight {
    handle: RenderHandle,
    slot: usize,
    generation: u64,
    page: usize,
    kind: RenderKind,
    area: PixelRect,
    scale: f32,
    surface_width: f32,
    target: Bitmap,
}

enum Action {
    Display,
    Update,
    Carry,
}

struct Plan {
    slot: usize,
    generation: u64,
    page_number: usize,
    page: Page,
    required: PixelRect,
    placement: PixelRect,
    scale: f32,
    surface_width: f32,
    action: Action,
    can_carry: bool,
    /// The required area equals the displayed area exactly
    exact: bool,
}

/// Map a cell's on-screen rect to the pixel geometry of one pass:
/// `required` is the needed region in surface coordinates, `placement`
/// where it lands in the view buffer. None when nothing is on screen.
fn visible_geometry(
    screen_rect: Rect,
    viewport: Size,
    buffer_w: u32,
    buffer_h: u32,
) -> Option<(PixelRect, PixelRect)> {
    let vp = Rect::new(0.0, 0.0, viewport.width, viewport.height);
    let visible = screen_rect.intersect(&vp);
    if visible.is_empty() {
        return None;
    }

    let local = visible.translated(-screen_rect.x, -screen_rect.y);
    let mut required = local.round_out();
    let mut placement = visible.round_out();

    // Rounding can disagree by a pixel; shrink both to the common size and
    // keep the placement inside the buffer.
    let clip = placement.intersect(&PixelRect::new(0, 0, buffer_w, buffer_h));
    let width = required.width.min(placement.width).min(clip.width);
    let height = required.height.min(placement.height).min(clip.height);
    if width == 0 || height == 0 {
        return None;
    }
    required.width = width;
    required.height = height;
    placement = PixelRect::new(clip.x, clip.y, width, height);
    Some((required, placement))
}

pub struct ViewRenderer {
    doc: Doc,
    buffers: [Bitmap; 2],
    parity: usize,
    dark_mode: bool,
    in_flight: Vec<InFlight>,
    last_placements: HashMap<(usize, u64), PixelRect>,
    first_render_seen: bool,
    after_first: Vec<Box<dyn FnOnce()>>,
    force_next: bool,
}

impl std::fmt::Debug for ViewRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewRenderer")
            .field("parity", &self.parity)
            .field("dark_mode", &self.dark_mode)
            .field("in_flight", &self.in_flight.len())
            .field("first_render_seen", &self.first_render_seen)
            .finish_non_exhaustive()
    }
}

impl ViewRenderer {
    #[must_use]
    pub fn new(doc: Doc) -> Self {
        let buffers = [
            doc.make_bitmap(Size::new(1.0, 1.0)),
            doc.make_bitmap(Size::new(1.0, 1.0)),
        ];
        Self {
            doc,
            buffers,
            parity: 0,
            dark_mode: false,
            in_flight: vec![],
            last_placements: HashMap::new(),
            first_render_seen: false,
            after_first: vec![],
            force_next: false,
        }
    }

    #[must_use]
    pub fn doc(&self) -> &Doc {
        &self.doc
    }

    /// The buffer currently holding the composed view
    #[must_use]
    pub fn front_buffer(&self) -> &Bitmap {
        &self.buffers[self.parity]
    }

    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    #[must_use]
    pub const fn dark_mode(&self) -> bool {
        self.dark_mode
    }

    pub fn set_dark_mode(&mut self, on: bool) {
        if self.dark_mode != on {
            self.dark_mode = on;
            self.force_next = true;
        }
    }

    /// Re-render every visible cell on the next pass
    pub fn force_render(&mut self) {
        self.force_next = true;
    }

    /// Run `f` once something has been rendered; immediately if it already
    /// has. Used to defer view-state restoration until content exists.
    pub fn after_first_render(&mut self, f: impl FnOnce() + 'static) {
        if self.first_render_seen {
            f();
        } else {
            self.after_first.push(Box::new(f));
        }
    }

    /// Cancel everything in flight and start the next pass from scratch
    pub fn reset(&mut self) {
        for record in &self.in_flight {
            record.handle.cancel();
        }
        self.in_flight.clear();
        self.last_placements.clear();
        self.force_next = true;
    }

    /// Walk the visible cells, decide what each needs, and issue renders.
    pub fn render_pass(&mut self, provider: &mut dyn CellProvider) -> PassReport {
        let viewport = provider.viewport_size();
        let buffer_w = (viewport.width.ceil() as u32).max(1);
        let buffer_h = (viewport.height.ceil() as u32).max(1);
        let force = std::mem::take(&mut self.force_next);
        let dark = self.dark_mode;

        // Plan phase: copy out what each cell needs, holding no borrows.
        let mut plans: Vec<Plan> = vec![];
        let mut placements: HashMap<(usize, u64), PixelRect> = HashMap::new();
        {
            let doc = &self.doc;
            let in_flight = &self.in_flight;
            provider.for_each_visible_cell(&mut |cell| {
                let Some((required, placement)) =
                    visible_geometry(cell.screen_rect, viewport, buffer_w, buffer_h)
                else {
                    return;
                };
                let Some(page) = doc.page(cell.page) else {
                    return;
                };
                let natural = page.size();
                if natural.width <= 0.0 {
                    return;
                }
                let scale = cell.screen_rect.width / natural.width;
                if !scale.is_finite() || scale <= 0.0 {
                    return;
                }

                let surface = &*cell.surface;
                let scale_ok = surface
                    .displayed_scale()
                    .is_some_and(|s| (s - scale).abs() < SCALE_EPS);
                let dark_ok = surface.displayed_dark() == Some(dark);
                let covered = surface
                    .displayed_area()
                    .is_some_and(|a| a.contains(&required));
                let reset = surface.matrix().reset_pending();
                let busy = in_flight
                    .iter()
                    .any(|r| r.slot == cell.slot && r.generation == cell.generation);
                let pending_same = in_flight.iter().any(|r| {
                    r.slot == cell.slot
                        && r.generation == cell.generation
                        && r.kind == RenderKind::Display
                        && r.area == required
                        && (r.scale - scale).abs() < SCALE_EPS
                });

                let wants_display = force || !scale_ok || !dark_ok || !covered || reset;
                let action = if wants_display {
                    if pending_same {
                        Action::Carry
                    } else {
                        Action::Display
                    }
                } else if surface.content_changed() && !busy {
                    Action::Update
                } else {
                    Action::Carry
                };

                placements.insert((cell.slot, cell.generation), placement);
                plans.push(Plan {
                    slot: cell.slot,
                    generation: cell.generation,
                    page_number: cell.page,
                    page,
                    required,
                    placement,
                    scale,
                    surface_width: cell.screen_rect.width,
                    action,
                    can_carry: surface.is_displaying() && scale_ok && dark_ok && !reset,
                    exact: surface.displayed_area() == Some(required),
                });
            });
        }

        // Renders for cells that left the window can never apply; cancel
        // them now so their buffer regions are free.
        self.in_flight.retain(|r| {
            if placements.contains_key(&(r.slot, r.generation)) {
                true
            } else {
                r.handle.cancel();
                false
            }
        });

        // A pass flips when it issues a display render or when cells moved
        // on screen; update-only passes keep the current buffer.
        let any_display = plans.iter().any(|p| matches!(p.action, Action::Display));
        let moved = placements != self.last_placements;
        let flip = any_display || (moved && !placements.is_empty());
        self.last_placements = placements;

        let mut report = PassReport {
            flipped: flip,
            ..PassReport::default()
        };

        if flip {
            let next = 1 - self.parity;
            // No in-flight render may keep writing into the buffer being
            // reused for this pass.
            let next_buf = self.buffers[next].clone();
            self.in_flight.retain(|r| {
                if r.target.shares_storage_with(&next_buf) {
                    r.handle.cancel();
                    false
                } else {
                    true
                }
            });
            self.buffers[next].adjust_to_size(buffer_w, buffer_h);
            self.buffers[next].set_dark_mode(dark);
            let zero = vec![0u8; self.buffers[next].kind().bytes_per_pixel()];
            self.buffers[next].fill(&zero);
            self.parity = next;
        }
        let front = self.buffers[self.parity].clone();

        // Execute phase: carry pixels into place and issue renders.
        let mut plan_map: HashMap<(usize, u64), Plan> = plans
            .into_iter()
            .map(|p| ((p.slot, p.generation), p))
            .collect();
        let in_flight = &mut self.in_flight;
        provider.for_each_visible_cell(&mut |cell| {
            let Some(plan) = plan_map.remove(&(cell.slot, cell.generation)) else {
                return;
            };

            if flip && plan.can_carry {
                let view = front.subarea(plan.placement);
                cell.surface.matrix().compose_into(&view, plan.required);
                if plan.exact {
                    cell.surface.matrix_mut().change_bitmap(&view);
                }
                report.carried += 1;
            }

            let origin = Point::new(
                plan.required.x as f32 / plan.scale,
                plan.required.y as f32 / plan.scale,
            );
            match plan.action {
                Action::Display => {
                    in_flight.retain(|r| {
                        if r.slot == cell.slot && r.generation == cell.generation {
                            r.handle.cancel();
                            false
                        } else {
                            true
                        }
                    });
                    let target = front.subarea(plan.placement);
                    let handle = plan.page.render(plan.scale, origin, &target);
                    in_flight.push(InFlight {
                        handle,
                        slot: plan.slot,
                        generation: plan.generation,
                        page: plan.page_number,
                        kind: RenderKind::Display,
                        area: plan.required,
                        scale: plan.scale,
                        surface_width: plan.surface_width,
                        target,
                    });
                    report.displays += 1;
                }
                Action::Update => {
                    cell.surface.clear_content_changed();
                    if !plan.exact {
                        // Parts of the displayed area stay stale; make the
                        // next exposure re-render them.
                        cell.surface.matrix_mut().request_reset();
                    }
                    let target = front.subarea(plan.placement);
                    let handle = plan.page.update(plan.scale, origin, &target);
                    in_flight.push(InFlight {
                        handle,
                        slot: plan.slot,
                        generation: plan.generation,
                        page: plan.page_number,
                        kind: RenderKind::Update,
                        area: plan.required,
                        scale: plan.scale,
                        surface_width: plan.surface_width,
                        target,
                    });
                    report.updates += 1;
                }
                Action::Carry => {}
            }
        });

        report
    }

    /// Fold pumped completions into cell surfaces. Returns how many
    /// applied; the rest were failures or stale and were dropped.
    pub fn apply_completions(
        &mut self,
        events: &[DocEvent],
        provider: &mut dyn CellProvider,
    ) -> usize {
        let mut ready: Vec<InFlight> = vec![];
        for event in events {
            let DocEvent::RenderDone { id, page, result } = event else {
                continue;
            };
            let Some(idx) = self.in_flight.iter().position(|r| r.handle.id() == *id) else {
                continue;
            };
            let record = self.in_flight.swap_remove(idx);
            match result {
                Ok(()) => ready.push(record),
                Err(e) => log::warn!("render failed for page {page}: {e}"),
            }
        }
        if ready.is_empty() {
            return 0;
        }

        let viewport = provider.viewport_size();
        let front = self.buffers[self.parity].clone();
        let (buffer_w, buffer_h) = (front.width(), front.height());
        let mut applied = 0;
        let mut displayed_any = false;

        provider.for_each_visible_cell(&mut |cell| {
            let mut i = 0;
            while i < ready.len() {
                let matches = ready[i].slot == cell.slot
                    && ready[i].generation == cell.generation
                    && ready[i].page == cell.page;
                if !matches {
                    i += 1;
                    continue;
                }
                let record = ready.swap_remove(i);

                match record.kind {
                    RenderKind::Display => {
                        cell.surface.present(
                            record.area,
                            record.scale,
                            record.surface_width,
                            &record.target,
                        );
                        displayed_any = true;
                    }
                    RenderKind::Update => cell.surface.present_update(record.area, &record.target),
                }

                // Recompose the cell's current visible region from tiles;
                // the render may have landed in a buffer that has since
                // flipped away, or at a scrolled-away placement.
                let geometry_unchanged =
                    (cell.screen_rect.width - record.surface_width).abs() < 0.5;
                if geometry_unchanged {
                    if let Some((required, placement)) =
                        visible_geometry(cell.screen_rect, viewport, buffer_w, buffer_h)
                    {
                        let view = front.subarea(placement);
                        cell.surface.matrix().compose_into(&view, required);
                        if cell.surface.displayed_area() == Some(required) {
                            cell.surface.matrix_mut().change_bitmap(&view);
                        }
                    }
                }
                applied += 1;
            }
        });

        for record in ready {
            log::debug!(
                "dropping stale completion {:?} for page {}",
                record.handle.id(),
                record.page
            );
        }

        if displayed_any && !self.first_render_seen {
            self.first_render_seen = true;
            for f in self.after_first.drain(..) {
                f();
            }
        }
        applied
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use super::*;
    use crate::cell::CellPool;
    use crate::doc::DocOptions;
    use crate::test_utils::{expected_pixel, SyntheticSource};

    /// Single-column strip of pages backed by a cell pool
    struct Strip {
        pool: CellPool,
        viewport: Size,
        scroll: f32,
        frames: Vec<Rect>,
    }

    impl Strip {
        fn new(frames: Vec<Rect>, viewport: Size) -> Self {
            Self {
                pool: CellPool::new(64),
                viewport,
                scroll: 0.0,
                frames,
            }
        }

        fn layout_pass(&mut self) {
            let window = Rect::new(0.0, self.scroll, self.viewport.width, self.viewport.height);
            for slot in 0..self.pool.len() {
                if let Some(page) = self.pool.get(slot).unwrap().page() {
                    if !self.frames[page].intersects(&window) {
                        self.pool.vacate(slot);
                    }
                }
            }
            for (page, frame) in self.frames.iter().enumerate() {
                if frame.intersects(&window) {
                    let slot = self.pool.assign(page);
                    self.pool.get_mut(slot).unwrap().set_frame(*frame);
                }
            }
        }
    }

    impl CellProvider for Strip {
        fn viewport_size(&self) -> Size {
            self.viewport
        }

        fn for_each_visible_cell(&mut self, f: &mut dyn FnMut(VisibleCell<'_>)) {
            let scroll = self.scroll;
            for slot in 0..self.pool.len() {
                let cell = self.pool.get_mut(slot).unwrap();
                let Some(page) = cell.page() else { continue };
                let screen_rect = cell.frame().translated(0.0, -scroll);
                let generation = cell.generation();
                f(VisibleCell {
                    slot,
                    generation,
                    page,
                    screen_rect,
                    surface: cell.surface_mut(),
                });
            }
        }
    }

    fn three_page_strip(viewport: Size) -> Strip {
        let frames = vec![
            Rect::new(0.0, 0.0, 100.0, 140.0),
            Rect::new(0.0, 150.0, 100.0, 140.0),
            Rect::new(0.0, 300.0, 100.0, 140.0),
        ];
        Strip::new(frames, viewport)
    }

    fn open_doc(pages: usize) -> Doc {
        let source = SyntheticSource::new(pages, Size::new(100.0, 140.0));
        Doc::open(&source, DocOptions::default()).unwrap()
    }

    fn settle(doc: &Doc, renderer: &mut ViewRenderer, strip: &mut Strip) -> usize {
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut applied = 0;
        while renderer.in_flight_count() > 0 {
            assert!(Instant::now() < deadline, "renders never settled");
            let events = doc.pump_events();
            applied += renderer.apply_completions(&events, strip);
            std::thread::sleep(Duration::from_millis(1));
        }
        applied
    }

    #[test]
    fn geometry_maps_screen_to_surface_and_buffer() {
        // Cell hanging off the top of a 100x200 viewport
        let (required, placement) = visible_geometry(
            Rect::new(0.0, -40.0, 100.0, 140.0),
            Size::new(100.0, 200.0),
            100,
            200,
        )
        .unwrap();
        assert_eq!(required, PixelRect::new(0, 40, 100, 100));
        assert_eq!(placement, PixelRect::new(0, 0, 100, 100));

        assert!(visible_geometry(
            Rect::new(0.0, 300.0, 100.0, 140.0),
            Size::new(100.0, 200.0),
            100,
            200
        )
        .is_none());
    }

    #[test]
    fn first_pass_displays_each_visible_cell() {
        let doc = open_doc(3);
        let mut strip = three_page_strip(Size::new(100.0, 200.0));
        let mut renderer = ViewRenderer::new(doc.clone());

        strip.layout_pass();
        let report = renderer.render_pass(&mut strip);
        assert!(report.flipped);
        assert_eq!(report.displays, 2); // pages 0 and 1 intersect the viewport
        assert_eq!(report.updates, 0);

        assert_eq!(settle(&doc, &mut renderer, &mut strip), 2);
        let slot = strip.pool.slot_for_page(0).unwrap();
        assert!(strip.pool.get(slot).unwrap().surface().is_displaying());

        renderer.front_buffer().with_samples(|s| {
            assert_eq!(s.pixel(50, 50)[0], expected_pixel(0));
            assert_eq!(s.pixel(50, 160)[0], expected_pixel(1));
        });
    }

    #[test]
    fn settled_view_needs_no_work() {
        let doc = open_doc(3);
        let mut strip = three_page_strip(Size::new(100.0, 200.0));
        let mut renderer = ViewRenderer::new(doc.clone());

        strip.layout_pass();
        renderer.render_pass(&mut strip);
        settle(&doc, &mut renderer, &mut strip);

        let report = renderer.render_pass(&mut strip);
        assert_eq!(report, PassReport::default());
    }

    #[test]
    fn scroll_within_rendered_area_carries_pixels() {
        let doc = open_doc(3);
        let mut strip = three_page_strip(Size::new(100.0, 200.0));
        let mut renderer = ViewRenderer::new(doc.clone());

        strip.layout_pass();
        renderer.render_pass(&mut strip);
        settle(&doc, &mut renderer, &mut strip);

        // Page 0 stays inside its displayed area; page 1 exposes new rows
        strip.scroll = 20.0;
        strip.layout_pass();
        let report = renderer.render_pass(&mut strip);
        assert!(report.flipped);
        assert_eq!(report.displays, 1);
        assert!(report.carried >= 1);

        // Carried pixels are already in place before the render lands
        renderer.front_buffer().with_samples(|s| {
            assert_eq!(s.pixel(50, 10)[0], expected_pixel(0));
        });
        settle(&doc, &mut renderer, &mut strip);
        renderer.front_buffer().with_samples(|s| {
            assert_eq!(s.pixel(50, 150)[0], expected_pixel(1));
        });
    }

    #[test]
    fn update_pass_keeps_the_front_buffer() {
        let doc = open_doc(3);
        let mut strip = three_page_strip(Size::new(100.0, 200.0));
        let mut renderer = ViewRenderer::new(doc.clone());

        strip.layout_pass();
        renderer.render_pass(&mut strip);
        settle(&doc, &mut renderer, &mut strip);
        let front_before = renderer.front_buffer().clone();

        let slot = strip.pool.slot_for_page(0).unwrap();
        strip.pool.get_mut(slot).unwrap().surface_mut().on_content_change();

        let report = renderer.render_pass(&mut strip);
        assert!(!report.flipped);
        assert_eq!(report.updates, 1);
        assert_eq!(report.displays, 0);
        assert!(renderer.front_buffer().shares_storage_with(&front_before));

        assert_eq!(settle(&doc, &mut renderer, &mut strip), 1);
        let cell = strip.pool.get(slot).unwrap();
        assert!(!cell.surface().content_changed());
    }

    #[test]
    fn completion_for_a_reassigned_cell_is_rejected() {
        let doc = open_doc(3);
        let mut strip = three_page_strip(Size::new(100.0, 200.0));
        let mut renderer = ViewRenderer::new(doc.clone());

        strip.layout_pass();
        renderer.render_pass(&mut strip);

        // Rebind every slot before the completions are applied
        strip.scroll = 320.0;
        strip.layout_pass();

        let deadline = Instant::now() + Duration::from_millis(300);
        let mut applied = 0;
        while Instant::now() < deadline && renderer.in_flight_count() > 0 {
            let events = doc.pump_events();
            applied += renderer.apply_completions(&events, &mut strip);
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(applied, 0);

        let slot = strip.pool.slot_for_page(2).unwrap();
        assert!(!strip.pool.get(slot).unwrap().surface().is_displaying());
    }

    #[test]
    fn dark_mode_change_re_renders_inverted() {
        let doc = open_doc(3);
        let mut strip = three_page_strip(Size::new(100.0, 200.0));
        let mut renderer = ViewRenderer::new(doc.clone());

        strip.layout_pass();
        renderer.render_pass(&mut strip);
        settle(&doc, &mut renderer, &mut strip);

        renderer.set_dark_mode(true);
        let report = renderer.render_pass(&mut strip);
        assert!(report.flipped);
        assert_eq!(report.displays, 2);

        settle(&doc, &mut renderer, &mut strip);
        renderer.front_buffer().with_samples(|s| {
            assert_eq!(s.pixel(50, 50)[0], 255 - expected_pixel(0));
            assert_eq!(s.pixel(50, 50)[3], 255);
        });
    }

    #[test]
    fn failed_display_render_is_retried_next_pass() {
        let source = SyntheticSource::new(1, Size::new(100.0, 140.0)).fail_page(0);
        let doc = Doc::open(&source, DocOptions::default()).unwrap();
        let mut strip = Strip::new(
            vec![Rect::new(0.0, 0.0, 100.0, 140.0)],
            Size::new(100.0, 200.0),
        );
        let mut renderer = ViewRenderer::new(doc.clone());

        strip.layout_pass();
        let report = renderer.render_pass(&mut strip);
        assert_eq!(report.displays, 1);
        assert_eq!(settle(&doc, &mut renderer, &mut strip), 0);

        let slot = strip.pool.slot_for_page(0).unwrap();
        assert!(!strip.pool.get(slot).unwrap().surface().is_displaying());
        let report = renderer.render_pass(&mut strip);
        assert_eq!(report.displays, 1);
    }

    #[test]
    fn after_first_render_runs_exactly_once() {
        let doc = open_doc(3);
        let mut strip = three_page_strip(Size::new(100.0, 200.0));
        let mut renderer = ViewRenderer::new(doc.clone());

        let fired = Arc::new(AtomicUsize::new(0));
        let observer = Arc::clone(&fired);
        renderer.after_first_render(move || {
            observer.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        strip.layout_pass();
        renderer.render_pass(&mut strip);
        settle(&doc, &mut renderer, &mut strip);
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Registered late: runs immediately, and the early one never refires
        let observer = Arc::clone(&fired);
        renderer.after_first_render(move || {
            observer.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 2);

        renderer.force_render();
        renderer.render_pass(&mut strip);
        settle(&doc, &mut renderer, &mut strip);
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }
}
