//! Tile matrix: persistent page pixels reconciled against a moving window
//!
//! Rendered pixels outlive the pass that produced them. Each page surface
//! keeps a sparse grid of fixed-size tiles in surface coordinates (zoomed
//! page pixels); every displayed area folds its pixels into the grid, so
//! panning back over old ground redraws from tiles instead of waiting for
//! a render. A width or scale change invalidates the whole grid.

use std::collections::HashMap;

use crate::bitmap::Bitmap;
use crate::geom::PixelRect;

/// Default tile edge in pixels
pub const DEFAULT_TILE_EDGE: u32 = 256;

/// One grid tile. The allocation is always a full square; pixels outside
/// every displayed area so far are zero.
#[derive(Debug)]
pub struct Tile {
    image: Bitmap,
    rect: PixelRect,
}

impl Tile {
    #[must_use]
    pub const fn rect(&self) -> PixelRect {
        self.rect
    }

    #[must_use]
    pub const fn image(&self) -> &Bitmap {
        &self.image
    }
}

/// Lifetime counters, cumulative since construction
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TileStats {
    pub created: usize,
    pub removed: usize,
    pub updated: usize,
}

pub struct TileMatrix {
    tile_edge: u32,
    width: f32,
    scale: f32,
    /// Bitmap whose (0,0) holds the pixel at `area`'s origin
    source: Option<Bitmap>,
    area: Option<PixelRect>,
    tiles: HashMap<(u32, u32), Tile>,
    reset_requested: bool,
    stats: TileStats,
}

impl TileMatrix {
    #[must_use]
    pub fn new(tile_edge: u32) -> Self {
        Self {
            tile_edge: tile_edge.max(1),
            width: 0.0,
            scale: 0.0,
            source: None,
            area: None,
            tiles: HashMap::new(),
            reset_requested: false,
            stats: TileStats::default(),
        }
    }

    /// Surface width in pixels. A change invalidates every tile at the
    /// next display.
    pub fn set_width(&mut self, width: f32) {
        if (self.width - width).abs() > f32::EPSILON {
            self.width = width;
            self.reset_requested = true;
        }
    }

    pub fn set_scale(&mut self, scale: f32) {
        if (self.scale - scale).abs() > f32::EPSILON {
            self.scale = scale;
            self.reset_requested = true;
        }
    }

    #[must_use]
    pub const fn scale(&self) -> f32 {
        self.scale
    }

    /// Invalidate every tile at the next display
    pub fn request_reset(&mut self) {
        self.reset_requested = true;
    }

    /// True when a reset is pending; shown pixels may be stale until the
    /// next display
    #[must_use]
    pub const fn reset_pending(&self) -> bool {
        self.reset_requested
    }

    /// Drop all tiles and forget the displayed area
    pub fn clear(&mut self) {
        self.stats.removed += self.tiles.len();
        self.tiles.clear();
        self.area = None;
        self.source = None;
        self.reset_requested = false;
    }

    #[must_use]
    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    #[must_use]
    pub const fn stats(&self) -> TileStats {
        self.stats
    }

    #[must_use]
    pub const fn displayed_area(&self) -> Option<PixelRect> {
        self.area
    }

    #[must_use]
    pub fn source(&self) -> Option<&Bitmap> {
        self.source.as_ref()
    }

    pub fn tiles(&self) -> impl Iterator<Item = &Tile> {
        self.tiles.values()
    }

    /// Reconcile the grid against a freshly rendered `area`.
    ///
    /// `bitmap`'s top-left pixel is the pixel at `area`'s origin. Tiles no
    /// longer intersecting the area are dropped, tiles inside it take the
    /// new pixels in place, and uncovered grid squares get new tiles. The
    /// same area displayed twice creates and removes nothing.
    pub fn display_area(&mut self, area: PixelRect, bitmap: &Bitmap) {
        debug_assert!(
            bitmap.width() == area.width && bitmap.height() == area.height,
            "display bitmap does not match area: {area:?} vs {}x{}",
            bitmap.width(),
            bitmap.height()
        );
        if area.is_empty() {
            return;
        }

        if self.reset_requested {
            self.stats.removed += self.tiles.len();
            self.tiles.clear();
            self.reset_requested = false;
        }

        let before = self.tiles.len();
        self.tiles.retain(|_, tile| tile.rect.intersects(&area));
        self.stats.removed += before - self.tiles.len();

        let edge = self.tile_edge;
        for ty in area.y / edge..=(area.bottom() - 1) / edge {
            for tx in area.x / edge..=(area.right() - 1) / edge {
                let tile_rect = PixelRect::new(tx * edge, ty * edge, edge, edge);
                let visible = tile_rect.intersect(&area);
                if visible.is_empty() {
                    continue;
                }

                let tile = match self.tiles.entry((tx, ty)) {
                    std::collections::hash_map::Entry::Occupied(e) => {
                        self.stats.updated += 1;
                        e.into_mut()
                    }
                    std::collections::hash_map::Entry::Vacant(e) => {
                        self.stats.created += 1;
                        e.insert(Tile {
                            image: Bitmap::new(edge, edge, bitmap.kind()),
                            rect: tile_rect,
                        })
                    }
                };

                let dst = tile.image.subarea(visible.relative_to(tile_rect.x, tile_rect.y));
                let src = bitmap.subarea(visible.relative_to(area.x, area.y));
                dst.copy_from(&src);
            }
        }

        self.area = Some(area);
        self.source = Some(bitmap.clone());
    }

    /// Re-snapshot `area` (surface coordinates) from the current source
    /// bitmap after its pixels changed in place.
    pub fn update_area(&mut self, area: PixelRect) {
        let (Some(displayed), Some(source)) = (self.area, self.source.as_ref()) else {
            return;
        };
        let area = area.intersect(&displayed);
        if area.is_empty() {
            return;
        }

        for tile in self.tiles.values_mut() {
            let visible = tile.rect.intersect(&area);
            if visible.is_empty() {
                continue;
            }
            let dst = tile.image.subarea(visible.relative_to(tile.rect.x, tile.rect.y));
            let src = source.subarea(visible.relative_to(displayed.x, displayed.y));
            dst.copy_from(&src);
            self.stats.updated += 1;
        }
    }

    /// Fold externally rendered pixels for `area` (surface coordinates)
    /// into the tiles that already intersect it. Unlike `display_area` this
    /// neither creates nor removes tiles and leaves the displayed area
    /// untouched.
    pub fn update_from(&mut self, area: PixelRect, bitmap: &Bitmap) {
        debug_assert!(
            bitmap.width() == area.width && bitmap.height() == area.height,
            "update bitmap does not match area"
        );
        if area.is_empty() {
            return;
        }
        for tile in self.tiles.values_mut() {
            let visible = tile.rect.intersect(&area);
            if visible.is_empty() {
                continue;
            }
            let dst = tile.image.subarea(visible.relative_to(tile.rect.x, tile.rect.y));
            let src = bitmap.subarea(visible.relative_to(area.x, area.y));
            dst.copy_from(&src);
            self.stats.updated += 1;
        }
    }

    /// Paint `area` (surface coordinates) from tiles into `dst`, whose
    /// top-left pixel maps to the area origin. Regions no tile covers are
    /// left as they are.
    pub fn compose_into(&self, dst: &Bitmap, area: PixelRect) {
        debug_assert!(
            dst.width() == area.width && dst.height() == area.height,
            "compose target does not match area"
        );
        for tile in self.tiles.values() {
            let visible = tile.rect.intersect(&area);
            if visible.is_empty() {
                continue;
            }
            let src = tile.image.subarea(visible.relative_to(tile.rect.x, tile.rect.y));
            let sink = dst.subarea(visible.relative_to(area.x, area.y));
            sink.copy_from(&src);
        }
    }

    /// Swap the source bitmap without touching tiles. Used when display
    /// buffers flip and the new buffer already carries the same pixels.
    pub fn change_bitmap(&mut self, bitmap: &Bitmap) {
        debug_assert!(
            self.area
                .is_none_or(|a| a.width == bitmap.width() && a.height == bitmap.height()),
            "replacement bitmap does not cover the displayed area"
        );
        self.source = Some(bitmap.clone());
    }
}

impl std::fmt::Debug for TileMatrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileMatrix")
            .field("tile_edge", &self.tile_edge)
            .field("width", &self.width)
            .field("scale", &self.scale)
            .field("area", &self.area)
            .field("tiles", &self.tiles.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
