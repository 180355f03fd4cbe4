//! Viewport controller: scroll, zoom, and the virtualized cell window
//!
//! Owns the cell pool and decides which pages deserve cells this instant:
//! the pages intersecting the viewport plus a prefetch margin on both
//! sides. Everything here runs on the controlling thread; the controller
//! feeds the renderer through `CellProvider` and never blocks on a render.

use crate::cell::CellPool;
use crate::geom::{PageArea, PagePoint, Point, Rect, Size, Transform};
use crate::layout::PageLayout;
use crate::renderer::{CellProvider, VisibleCell};
use crate::tiles::DEFAULT_TILE_EDGE;

const SCROLL_ANIM_SECS: f32 = 0.3;
const ZOOM_ANIM_SECS: f32 = 0.2;

/// Host-side hooks. Only cell sizing is mandatory; the rest default to
/// doing nothing.
pub trait PageControllerDelegate {
    /// Size the cell for `page` given the nominal slot size at unit zoom
    fn adjust_size(&mut self, nominal: Size, page: usize) -> Size;

    /// A page was bound to a pool slot it did not have before
    fn setup_cell(&mut self, slot: usize, page: usize) {
        let _ = (slot, page);
    }

    /// Geometry changed; the host should schedule a render pass. `force`
    /// means shown pixels are invalid, not merely repositioned.
    fn view_altered(&mut self, force: bool) {
        let _ = force;
    }

    fn on_tap(&mut self, location: PagePoint) {
        let _ = location;
    }

    fn on_double_tap(&mut self, location: PagePoint) {
        let _ = location;
    }

    fn on_long_press_begin(&mut self, location: PagePoint) {
        let _ = location;
    }

    fn on_long_press_move(&mut self, location: PagePoint) {
        let _ = location;
    }

    fn on_long_press_end(&mut self, location: PagePoint) {
        let _ = location;
    }

    /// Drawing-mode drag, in viewport pixels
    fn on_drag(&mut self, delta: Point) {
        let _ = delta;
    }

    /// The keyboard covered part of the viewport while an area was shown
    fn adjust_to_reduced_screen_area(&mut self) {}

    /// Zoom request while reflowing; the host re-lays text out instead of
    /// scaling pixels
    fn on_reflow_zoom(&mut self, zoom: f32) {
        let _ = zoom;
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ControllerOptions {
    pub columns: usize,
    /// Gap between pages at unit zoom
    pub gap: f32,
    /// Pages kept alive beyond the visible range, per side
    pub prefetch_margin: usize,
    pub min_zoom: f32,
    pub max_zoom: f32,
    pub tile_edge: u32,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            columns: 1,
            gap: 8.0,
            prefetch_margin: 1,
            min_zoom: 1.0,
            max_zoom: 8.0,
            tile_edge: DEFAULT_TILE_EDGE,
        }
    }
}

#[derive(Clone, Copy)]
enum AnimationKind {
    Scroll { from: Point, to: Point },
    Zoom { from: f32, to: f32 },
}

struct Animation {
    kind: AnimationKind,
    elapsed: f32,
    duration: f32,
    on_done: Option<Box<dyn FnOnce()>>,
}

struct ShowRequest {
    page: usize,
    /// Area in unit-zoom cell coordinates; empty means the whole page
    area: Rect,
    animated: bool,
    remember: bool,
    on_done: Option<Box<dyn FnOnce()>>,
}

pub struct PageController<D: PageControllerDelegate> {
    delegate: D,
    options: ControllerOptions,
    viewport: Size,
    scroll: Point,
    zoom: f32,
    page_count: usize,
    reflow_mode: bool,
    drawing_mode: bool,
    keyboard_shown: bool,
    reshow_on_keyboard_hidden: bool,
    layout: PageLayout,
    layout_dirty: bool,
    pool: CellPool,
    shown: Option<PageArea>,
    pending_shows: Vec<ShowRequest>,
    animation: Option<Animation>,
}

impl<D: PageControllerDelegate> std::fmt::Debug for PageController<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageController")
            .field("viewport", &self.viewport)
            .field("scroll", &self.scroll)
            .field("zoom", &self.zoom)
            .field("page_count", &self.page_count)
            .field("cells", &self.pool.len())
            .finish_non_exhaustive()
    }
}

fn sanitize_zoom(zoom: f32, min: f32, max: f32) -> f32 {
    if !zoom.is_finite() {
        return 1.0;
    }
    zoom.clamp(min, max)
}

impl<D: PageControllerDelegate> PageController<D> {
    pub fn new(delegate: D, options: ControllerOptions) -> Self {
        Self {
            delegate,
            pool: CellPool::new(options.tile_edge),
            options,
            viewport: Size::default(),
            scroll: Point::zero(),
            zoom: 1.0,
            page_count: 0,
            reflow_mode: false,
            drawing_mode: false,
            keyboard_shown: false,
            reshow_on_keyboard_hidden: true,
            layout: PageLayout::empty(),
            layout_dirty: false,
            shown: None,
            pending_shows: vec![],
            animation: None,
        }
    }

    pub fn delegate(&self) -> &D {
        &self.delegate
    }

    pub fn delegate_mut(&mut self) -> &mut D {
        &mut self.delegate
    }

    #[must_use]
    pub fn pool(&self) -> &CellPool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut CellPool {
        &mut self.pool
    }

    #[must_use]
    pub fn layout(&self) -> &PageLayout {
        &self.layout
    }

    // --- geometry inputs ---------------------------------------------------

    pub fn set_viewport_size(&mut self, size: Size) {
        if self.viewport == size {
            return;
        }
        self.viewport = size;
        self.layout_dirty = true;
        if let Some(area) = self.shown {
            self.request_show(ShowRequest {
                page: area.page,
                area: area.area,
                animated: false,
                remember: true,
                on_done: None,
            });
        }
        self.delegate.view_altered(true);
    }

    #[must_use]
    pub fn viewport_size(&self) -> Size {
        self.viewport
    }

    pub fn set_scroll_offset(&mut self, offset: Point) {
        self.scroll = if self.layout_dirty {
            offset
        } else {
            self.layout.clamp_offset(offset, self.viewport)
        };
        self.delegate.view_altered(false);
    }

    #[must_use]
    pub fn scroll_offset(&self) -> Point {
        self.scroll
    }

    pub fn set_page_count(&mut self, count: usize) {
        if self.page_count == count {
            return;
        }
        self.page_count = count;
        self.layout_dirty = true;
        if self.shown.is_some_and(|s| s.page >= count) {
            self.shown = None;
        }
        self.delegate.view_altered(true);
    }

    #[must_use]
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    // --- zoom --------------------------------------------------------------

    /// Set the zoom scale. Non-finite values fall back to 1.0; everything
    /// is clamped to the configured range. In reflow mode the request is
    /// forwarded to the delegate and geometry stays at unit zoom.
    pub fn set_zoom_scale(&mut self, zoom: f32, animated: bool) {
        let zoom = sanitize_zoom(zoom, self.options.min_zoom, self.options.max_zoom);
        if self.reflow_mode {
            self.zoom = zoom;
            self.delegate.on_reflow_zoom(zoom);
            return;
        }
        if animated {
            self.animation = Some(Animation {
                kind: AnimationKind::Zoom {
                    from: self.zoom,
                    to: zoom,
                },
                elapsed: 0.0,
                duration: ZOOM_ANIM_SECS,
                on_done: None,
            });
        } else {
            self.apply_zoom_now(zoom);
            self.delegate.view_altered(true);
        }
    }

    #[must_use]
    pub fn zoom_scale(&self) -> f32 {
        self.zoom
    }

    /// Zoom applied to geometry; unit while reflowing
    #[must_use]
    pub fn effective_zoom(&self) -> f32 {
        if self.reflow_mode { 1.0 } else { self.zoom }
    }

    fn apply_zoom_now(&mut self, zoom: f32) {
        let old = self.effective_zoom();
        if old > 0.0 {
            // Keep the viewport center on the same content point
            let ratio = zoom / old;
            self.scroll = Point::new(
                (self.scroll.x + self.viewport.width / 2.0) * ratio - self.viewport.width / 2.0,
                (self.scroll.y + self.viewport.height / 2.0) * ratio - self.viewport.height / 2.0,
            );
        }
        self.zoom = zoom;
        self.layout_dirty = true;
    }

    // --- modes -------------------------------------------------------------

    pub fn set_reflow_mode(&mut self, on: bool) {
        if self.reflow_mode == on {
            return;
        }
        self.reflow_mode = on;
        self.layout_dirty = true;
        if on {
            self.delegate.on_reflow_zoom(self.zoom);
        }
        self.delegate.view_altered(true);
    }

    #[must_use]
    pub fn reflow_mode(&self) -> bool {
        self.reflow_mode
    }

    /// While drawing, taps and long presses are suppressed and drags
    /// become strokes instead of scrolls.
    pub fn set_drawing_mode(&mut self, on: bool) {
        self.drawing_mode = on;
    }

    #[must_use]
    pub fn drawing_mode(&self) -> bool {
        self.drawing_mode
    }

    pub fn set_keyboard_shown(&mut self, shown: bool) {
        if self.keyboard_shown == shown {
            return;
        }
        self.keyboard_shown = shown;
        if shown {
            if self.shown.is_some() {
                self.delegate.adjust_to_reduced_screen_area();
            }
        } else if self.reshow_on_keyboard_hidden {
            self.reshow_area();
        }
    }

    pub fn set_reshow_on_keyboard_hidden(&mut self, on: bool) {
        self.reshow_on_keyboard_hidden = on;
    }

    // --- shows -------------------------------------------------------------

    /// Scroll the least amount that brings `page` fully into view, and
    /// remember it for later re-shows.
    pub fn show_page(&mut self, page: usize, animated: bool) {
        self.request_show(ShowRequest {
            page,
            area: Rect::default(),
            animated,
            remember: true,
            on_done: None,
        });
    }

    /// Scroll the least amount that shows `area` of its page. The area is
    /// in unit-zoom cell coordinates; an empty rect means the whole page.
    pub fn show_area(&mut self, area: PageArea, animated: bool) {
        self.request_show(ShowRequest {
            page: area.page,
            area: area.area,
            animated,
            remember: true,
            on_done: None,
        });
    }

    /// `show_area` with a completion that runs once the scroll settles
    pub fn show_area_then(&mut self, area: PageArea, animated: bool, on_done: impl FnOnce() + 'static) {
        self.request_show(ShowRequest {
            page: area.page,
            area: area.area,
            animated,
            remember: true,
            on_done: Some(Box::new(on_done)),
        });
    }

    /// Stop tracking the shown area; keyboard and viewport changes no
    /// longer re-scroll to it
    pub fn forget_show_area(&mut self) {
        self.shown = None;
    }

    /// Scroll back to the remembered area, if any
    pub fn reshow_area(&mut self) {
        if let Some(area) = self.shown {
            self.request_show(ShowRequest {
                page: area.page,
                area: area.area,
                animated: false,
                remember: true,
                on_done: None,
            });
        }
    }

    #[must_use]
    pub fn shown_area(&self) -> Option<PageArea> {
        self.shown
    }

    fn request_show(&mut self, req: ShowRequest) {
        self.pending_shows.push(req);
    }

    fn apply_show(&mut self, req: ShowRequest) {
        let Some(frame) = self.layout.frame(req.page) else {
            if let Some(f) = req.on_done {
                f();
            }
            return;
        };
        let ez = self.effective_zoom();
        let target = if req.area.is_empty() {
            frame
        } else {
            Rect::new(
                frame.x + req.area.x * ez,
                frame.y + req.area.y * ez,
                req.area.width * ez,
                req.area.height * ez,
            )
        };
        if req.remember {
            self.shown = Some(PageArea {
                page: req.page,
                area: req.area,
            });
        }

        let to = self.bring_into_view(target);
        if req.animated && to != self.scroll {
            self.animation = Some(Animation {
                kind: AnimationKind::Scroll {
                    from: self.scroll,
                    to,
                },
                elapsed: 0.0,
                duration: SCROLL_ANIM_SECS,
                on_done: req.on_done,
            });
        } else {
            self.scroll = to;
            if let Some(f) = req.on_done {
                f();
            }
        }
        self.delegate.view_altered(false);
    }

    /// Minimal scroll that puts `target` (layout space) on screen
    fn bring_into_view(&self, target: Rect) -> Point {
        let mut offset = self.scroll;
        if target.height >= self.viewport.height || target.y < offset.y {
            offset.y = target.y;
        } else if target.max_y() > offset.y + self.viewport.height {
            offset.y = target.max_y() - self.viewport.height;
        }
        if target.width >= self.viewport.width || target.x < offset.x {
            offset.x = target.x;
        } else if target.max_x() > offset.x + self.viewport.width {
            offset.x = target.max_x() - self.viewport.width;
        }
        self.layout.clamp_offset(offset, self.viewport)
    }

    // --- animation ---------------------------------------------------------

    /// Advance the running animation by `dt` seconds. Returns true while
    /// one is active so the host keeps ticking.
    pub fn tick(&mut self, dt: f32) -> bool {
        let Some(anim) = self.animation.as_mut() else {
            return false;
        };
        anim.elapsed += dt.max(0.0);
        let p = (anim.elapsed / anim.duration).clamp(0.0, 1.0);
        let s = p * p * (3.0 - 2.0 * p);
        let kind = anim.kind;
        let finished = p >= 1.0;

        match kind {
            AnimationKind::Scroll { from, to } => {
                self.scroll = Point::new(
                    from.x + (to.x - from.x) * s,
                    from.y + (to.y - from.y) * s,
                );
            }
            AnimationKind::Zoom { from, to } => {
                self.apply_zoom_now(from + (to - from) * s);
            }
        }

        if finished {
            if let Some(anim) = self.animation.take() {
                if let Some(f) = anim.on_done {
                    f();
                }
            }
        }
        self.delegate.view_altered(false);
        !finished
    }

    // --- layout and the cell window ----------------------------------------

    /// Recompute layout if needed, settle deferred shows, and reconcile
    /// the cell pool with the pages near the viewport. Call once per frame
    /// before rendering.
    pub fn layout_pass(&mut self) {
        if self.viewport.is_empty() {
            return;
        }

        if self.layout_dirty {
            let delegate = &mut self.delegate;
            self.layout = PageLayout::compute(
                self.page_count,
                self.options.columns,
                self.viewport,
                self.options.gap,
                if self.reflow_mode { 1.0 } else { self.zoom },
                |nominal, page| delegate.adjust_size(nominal, page),
            );
            self.layout_dirty = false;
        }
        self.scroll = self.layout.clamp_offset(self.scroll, self.viewport);

        for req in std::mem::take(&mut self.pending_shows) {
            self.apply_show(req);
        }

        let window = self.cell_window();

        for slot in 0..self.pool.len() {
            let Some(cell) = self.pool.get(slot) else { continue };
            if let Some(page) = cell.page() {
                if !window.contains(&page) {
                    self.pool.vacate(slot);
                }
            }
        }

        for page in window {
            let fresh = self.pool.slot_for_page(page).is_none();
            let slot = self.pool.assign(page);
            if fresh {
                self.delegate.setup_cell(slot, page);
            }
            if let (Some(cell), Some(frame)) = (self.pool.get_mut(slot), self.layout.frame(page)) {
                cell.set_frame(frame);
            }
        }

        self.pool.trim();
    }

    /// Pages that should hold cells right now: visible plus the prefetch
    /// margin on both sides
    fn cell_window(&self) -> std::ops::Range<usize> {
        let view = Rect::new(
            self.scroll.x,
            self.scroll.y,
            self.viewport.width,
            self.viewport.height,
        );
        let visible = self.layout.visible_pages(view);
        let visible = if visible.is_empty() {
            match self.layout.nearest_page(Point::new(
                self.scroll.x + self.viewport.width / 2.0,
                self.scroll.y + self.viewport.height / 2.0,
            )) {
                Some(page) => page..page + 1,
                None => return 0..0,
            }
        } else {
            visible
        };

        let margin = self.options.prefetch_margin;
        visible.start.saturating_sub(margin)..(visible.end + margin).min(self.page_count)
    }

    // --- coordinate mapping and gestures -----------------------------------

    /// Map a viewport point to cell coordinates, when it hits a page
    #[must_use]
    pub fn cell_at_point(&self, point: Point) -> Option<PagePoint> {
        let layout_pt = Point::new(point.x + self.scroll.x, point.y + self.scroll.y);
        let page = self.layout.page_at_point(layout_pt)?;
        Some(self.to_cell_coords(page, layout_pt))
    }

    /// Like `cell_at_point`, but snaps to the closest page so drags that
    /// wander off a page keep reporting
    #[must_use]
    pub fn cell_nearest_point(&self, point: Point) -> Option<PagePoint> {
        let layout_pt = Point::new(point.x + self.scroll.x, point.y + self.scroll.y);
        let page = self.layout.nearest_page(layout_pt)?;
        Some(self.to_cell_coords(page, layout_pt))
    }

    fn to_cell_coords(&self, page: usize, layout_pt: Point) -> PagePoint {
        let frame = self.layout.frame(page).unwrap_or_default();
        let ez = self.effective_zoom();
        let x = ((layout_pt.x - frame.x) / ez).clamp(0.0, frame.width / ez);
        let y = ((layout_pt.y - frame.y) / ez).clamp(0.0, frame.height / ez);
        PagePoint {
            page,
            point: Point::new(x, y),
        }
    }

    /// Transform from unit-zoom cell coordinates of `page` to viewport
    /// coordinates
    #[must_use]
    pub fn cell_to_screen(&self, page: usize) -> Option<Transform> {
        let frame = self.layout.frame(page)?;
        let ez = self.effective_zoom();
        Some(Transform::new(
            ez,
            ez,
            frame.x - self.scroll.x,
            frame.y - self.scroll.y,
        ))
    }

    pub fn handle_tap(&mut self, point: Point) {
        if self.drawing_mode {
            return;
        }
        if let Some(hit) = self.cell_at_point(point) {
            self.delegate.on_tap(hit);
        }
    }

    pub fn handle_double_tap(&mut self, point: Point) {
        if self.drawing_mode {
            return;
        }
        if let Some(hit) = self.cell_at_point(point) {
            self.delegate.on_double_tap(hit);
        }
    }

    pub fn handle_long_press_begin(&mut self, point: Point) {
        if self.drawing_mode {
            return;
        }
        if let Some(hit) = self.cell_at_point(point) {
            self.delegate.on_long_press_begin(hit);
        }
    }

    pub fn handle_long_press_move(&mut self, point: Point) {
        if self.drawing_mode {
            return;
        }
        if let Some(hit) = self.cell_nearest_point(point) {
            self.delegate.on_long_press_move(hit);
        }
    }

    pub fn handle_long_press_end(&mut self, point: Point) {
        if self.drawing_mode {
            return;
        }
        if let Some(hit) = self.cell_nearest_point(point) {
            self.delegate.on_long_press_end(hit);
        }
    }

    /// Pan by `delta` viewport pixels; in drawing mode the drag is handed
    /// to the delegate as a stroke instead
    pub fn handle_drag(&mut self, delta: Point) {
        if self.drawing_mode {
            self.delegate.on_drag(delta);
            return;
        }
        let offset = Point::new(self.scroll.x + delta.x, self.scroll.y + delta.y);
        self.set_scroll_offset(offset);
    }
}

impl<D: PageControllerDelegate> CellProvider for PageController<D> {
    fn viewport_size(&self) -> Size {
        self.viewport
    }

    fn for_each_visible_cell(&mut self, f: &mut dyn FnMut(VisibleCell<'_>)) {
        let scroll = self.scroll;
        for slot in 0..self.pool.len() {
            let Some(cell) = self.pool.get_mut(slot) else {
                continue;
            };
            let Some(page) = cell.page() else { continue };
            let screen_rect = cell.frame().translated(-scroll.x, -scroll.y);
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
