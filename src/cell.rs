//! Reusable page cells and the bounded pool behind viewport virtualization
//!
//! Cells are created as pages scroll into reach and reassigned as they
//! leave, so memory tracks the visible window instead of the document.
//! Every assignment bumps the cell's generation; async completions carry
//! the generation they were issued under and are rejected on mismatch.

use crate::bitmap::Bitmap;
use crate::geom::{PixelRect, Rect};
use crate::tiles::TileMatrix;

#[derive(Clone, Copy, Debug)]
struct DisplayRecord {
    area: PixelRect,
    scale: f32,
    dark: bool,
}

/// Pixel state for one cell: the tile grid plus what is currently shown
#[derive(Debug)]
pub struct PageSurface {
    page: Option<usize>,
    matrix: TileMatrix,
    displayed: Option<DisplayRecord>,
    content_changed: bool,
}

impl PageSurface {
    #[must_use]
    pub fn new(tile_edge: u32) -> Self {
        Self {
            page: None,
            matrix: TileMatrix::new(tile_edge),
            displayed: None,
            content_changed: false,
        }
    }

    /// Bind the surface to a page. Tiles survive when the page is the one
    /// already held, so scrolling back re-shows them without a render.
    pub fn use_for_page(&mut self, page: usize) {
        if self.page != Some(page) {
            self.matrix.clear();
            self.displayed = None;
            self.content_changed = false;
            self.page = Some(page);
        }
    }

    /// Drop everything, including tiles for the current page
    pub fn prepare_for_reuse(&mut self) {
        self.matrix.clear();
        self.displayed = None;
        self.content_changed = false;
        self.page = None;
    }

    /// The page edited its content; shown pixels are stale
    pub fn on_content_change(&mut self) {
        self.content_changed = true;
    }

    #[must_use]
    pub const fn content_changed(&self) -> bool {
        self.content_changed
    }

    pub fn clear_content_changed(&mut self) {
        self.content_changed = false;
    }

    #[must_use]
    pub const fn is_displaying(&self) -> bool {
        self.displayed.is_some()
    }

    #[must_use]
    pub fn displayed_area(&self) -> Option<PixelRect> {
        self.displayed.map(|d| d.area)
    }

    #[must_use]
    pub fn displayed_scale(&self) -> Option<f32> {
        self.displayed.map(|d| d.scale)
    }

    /// Dark-mode state of the shown pixels, once something is shown
    #[must_use]
    pub fn displayed_dark(&self) -> Option<bool> {
        self.displayed.map(|d| d.dark)
    }

    #[must_use]
    pub const fn matrix(&self) -> &TileMatrix {
        &self.matrix
    }

    pub fn matrix_mut(&mut self) -> &mut TileMatrix {
        &mut self.matrix
    }

    /// Fold a completed display render into the surface. `surface_width`
    /// is the full page width in pixels at `scale`.
    pub fn present(&mut self, area: PixelRect, scale: f32, surface_width: f32, bitmap: &Bitmap) {
        self.matrix.set_width(surface_width);
        self.matrix.set_scale(scale);
        self.matrix.display_area(area, bitmap);
        self.displayed = Some(DisplayRecord {
            area,
            scale,
            dark: bitmap.dark_mode(),
        });
    }

    /// Fold a completed update render in. The target changed in place, so
    /// the shown area is unchanged and only tiles need refreshing.
    pub fn present_update(&mut self, area: PixelRect, bitmap: &Bitmap) {
        self.matrix.update_from(area, bitmap);
    }
}

/// One slot in the pool
#[derive(Debug)]
pub struct Cell {
    generation: u64,
    page: Option<usize>,
    frame: Rect,
    surface: PageSurface,
}

impl Cell {
    fn new(tile_edge: u32) -> Self {
        Self {
            generation: 0,
            page: None,
            frame: Rect::default(),
            surface: PageSurface::new(tile_edge),
        }
    }

    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub const fn page(&self) -> Option<usize> {
        self.page
    }

    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.page.is_none()
    }

    #[must_use]
    pub const fn frame(&self) -> Rect {
        self.frame
    }

    pub fn set_frame(&mut self, frame: Rect) {
        self.frame = frame;
    }

    #[must_use]
    pub const fn surface(&self) -> &PageSurface {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut PageSurface {
        &mut self.surface
    }

    /// A completion taken under (`generation`, `page`) applies only if both
    /// still hold.
    #[must_use]
    pub fn accepts(&self, generation: u64, page: usize) -> bool {
        self.generation == generation && self.page == Some(page)
    }
}

/// Bounded pool of cells with stable slot indices
#[derive(Debug)]
pub struct CellPool {
    cells: Vec<Cell>,
    tile_edge: u32,
}

impl CellPool {
    #[must_use]
    pub fn new(tile_edge: u32) -> Self {
        Self {
            cells: vec![],
            tile_edge,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    #[must_use]
    pub fn get(&self, slot: usize) -> Option<&Cell> {
        self.cells.get(slot)
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut Cell> {
        self.cells.get_mut(slot)
    }

    #[must_use]
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn cells_mut(&mut self) -> &mut [Cell] {
        &mut self.cells
    }

    #[must_use]
    pub fn slot_for_page(&self, page: usize) -> Option<usize> {
        self.cells.iter().position(|c| c.page == Some(page))
    }

    /// Give `page` a cell: the one it already has, else a reused idle slot,
    /// else a new one. Returns the slot index; the generation is bumped
    /// whenever the binding changes.
    pub fn assign(&mut self, page: usize) -> usize {
        if let Some(slot) = self.slot_for_page(page) {
            return slot;
        }

        let slot = match self.cells.iter().position(Cell::is_idle) {
            Some(slot) => slot,
            None => {
                self.cells.push(Cell::new(self.tile_edge));
                self.cells.len() - 1
            }
        };

        let cell = &mut self.cells[slot];
        cell.generation += 1;
        cell.page = Some(page);
        cell.surface.use_for_page(page);
        cell.frame = Rect::default();
        slot
    }

    /// Release a slot. Tiles are kept so an immediate reassignment to the
    /// same page shows them again.
    pub fn vacate(&mut self, slot: usize) {
        if let Some(cell) = self.cells.get_mut(slot) {
            cell.page = None;
        }
    }

    /// Drop trailing idle cells. Interior slots never move, so recorded
    /// slot indices stay valid.
    pub fn trim(&mut self) {
        while self.cells.last().is_some_and(Cell::is_idle) {
            self.cells.pop();
        }
    }

    pub fn clear(&mut self) {
        self.cells.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::{Bitmap, BitmapKind};

    #[test]
    fn assign_reuses_idle_slots() {
        let mut pool = CellPool::new(8);
        assert_eq!(pool.assign(0), 0);
        assert_eq!(pool.assign(1), 1);
        assert_eq!(pool.len(), 2);

        pool.vacate(0);
        assert_eq!(pool.assign(2), 0);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.get(0).unwrap().page(), Some(2));
    }

    #[test]
    fn assigning_the_held_page_is_stable() {
        let mut pool = CellPool::new(8);
        let slot = pool.assign(3);
        let generation = pool.get(slot).unwrap().generation();
        assert_eq!(pool.assign(3), slot);
        assert_eq!(pool.get(slot).unwrap().generation(), generation);
    }

    #[test]
    fn reassignment_bumps_generation() {
        let mut pool = CellPool::new(8);
        let slot = pool.assign(0);
        let generation = pool.get(slot).unwrap().generation();

        pool.vacate(slot);
        pool.assign(9);
        let cell = pool.get(slot).unwrap();
        assert!(cell.generation() > generation);
        assert!(!cell.accepts(generation, 0));
        assert!(cell.accepts(cell.generation(), 9));
    }

    #[test]
    fn trim_drops_only_trailing_idle_cells() {
        let mut pool = CellPool::new(8);
        pool.assign(0);
        pool.assign(1);
        pool.assign(2);
        pool.vacate(0);
        pool.vacate(2);

        pool.trim();
        assert_eq!(pool.len(), 2);
        assert!(pool.get(0).unwrap().is_idle());
        assert_eq!(pool.get(1).unwrap().page(), Some(1));
    }

    #[test]
    fn surface_keeps_tiles_for_the_same_page() {
        let mut surface = PageSurface::new(8);
        surface.use_for_page(1);
        let bitmap = Bitmap::new(8, 8, BitmapKind::A8);
        surface.present(crate::geom::PixelRect::new(0, 0, 8, 8), 1.0, 8.0, &bitmap);
        assert_eq!(surface.matrix().tile_count(), 1);

        surface.use_for_page(1);
        assert_eq!(surface.matrix().tile_count(), 1);
        assert!(surface.is_displaying());

        surface.use_for_page(2);
        assert_eq!(surface.matrix().tile_count(), 0);
        assert!(!surface.is_displaying());
    }

    #[test]
    fn content_change_flag() {
        let mut surface = PageSurface::new(8);
        surface.use_for_page(0);
        assert!(!surface.content_changed());
        surface.on_content_change();
        assert!(surface.content_changed());
        surface.clear_content_changed();
        assert!(!surface.content_changed());
    }
}
