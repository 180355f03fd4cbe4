//! Geometry primitives shared across the pipeline

use serde::{Deserialize, Serialize};

/// A point in f32 coordinates
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    #[must_use]
    pub const fn zero() -> Self {
        Self { x: 0.0, y: 0.0 }
    }

    #[must_use]
    pub fn offset(self, dx: f32, dy: f32) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }
}

/// Width and height in f32 coordinates
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    #[must_use]
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    #[must_use]
    pub fn is_empty(self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    #[must_use]
    pub fn scaled(self, factor: f32) -> Self {
        Self::new(self.width * factor, self.height * factor)
    }
}

/// An axis-aligned rectangle in f32 coordinates
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    #[must_use]
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    #[must_use]
    pub fn from_origin_size(origin: Point, size: Size) -> Self {
        Self::new(origin.x, origin.y, size.width, size.height)
    }

    #[must_use]
    pub fn origin(&self) -> Point {
        Point::new(self.x, self.y)
    }

    #[must_use]
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    #[must_use]
    pub fn max_x(&self) -> f32 {
        self.x + self.width
    }

    #[must_use]
    pub fn max_y(&self) -> f32 {
        self.y + self.height
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    #[must_use]
    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.x && p.x < self.max_x() && p.y >= self.y && p.y < self.max_y()
    }

    #[must_use]
    pub fn intersects(&self, other: &Rect) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.x < other.max_x()
            && other.x < self.max_x()
            && self.y < other.max_y()
            && other.y < self.max_y()
    }

    /// Intersection of two rects; empty (zero-size) when they do not overlap
    #[must_use]
    pub fn intersect(&self, other: &Rect) -> Rect {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.max_x().min(other.max_x());
        let y1 = self.max_y().min(other.max_y());
        if x1 <= x0 || y1 <= y0 {
            return Rect::default();
        }
        Rect::new(x0, y0, x1 - x0, y1 - y0)
    }

    #[must_use]
    pub fn translated(&self, dx: f32, dy: f32) -> Rect {
        Rect::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    #[must_use]
    pub fn scaled(&self, factor: f32) -> Rect {
        Rect::new(
            self.x * factor,
            self.y * factor,
            self.width * factor,
            self.height * factor,
        )
    }

    /// Smallest integer rect covering this rect. Negative extents are
    /// clipped at zero.
    #[must_use]
    pub fn round_out(&self) -> PixelRect {
        if self.is_empty() {
            return PixelRect::default();
        }
        let x0 = self.x.floor().max(0.0);
        let y0 = self.y.floor().max(0.0);
        let x1 = self.max_x().ceil().max(x0);
        let y1 = self.max_y().ceil().max(y0);
        PixelRect {
            x: x0 as u32,
            y: y0 as u32,
            width: (x1 - x0) as u32,
            height: (y1 - y0) as u32,
        }
    }

    /// Distance from a point to the nearest point inside the rect (zero when
    /// the point is inside).
    #[must_use]
    pub fn distance_to(&self, p: Point) -> f32 {
        let dx = (self.x - p.x).max(p.x - self.max_x()).max(0.0);
        let dy = (self.y - p.y).max(p.y - self.max_y()).max(0.0);
        (dx * dx + dy * dy).sqrt()
    }
}

/// An axis-aligned rectangle on an integer pixel grid
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    #[must_use]
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    #[must_use]
    pub const fn right(&self) -> u32 {
        self.x + self.width
    }

    #[must_use]
    pub const fn bottom(&self) -> u32 {
        self.y + self.height
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    #[must_use]
    pub fn intersects(&self, other: &PixelRect) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    /// True when `other` lies entirely inside this rect
    #[must_use]
    pub fn contains(&self, other: &PixelRect) -> bool {
        !other.is_empty()
            && other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    #[must_use]
    pub fn intersect(&self, other: &PixelRect) -> PixelRect {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());
        if x1 <= x0 || y1 <= y0 {
            return PixelRect::default();
        }
        PixelRect::new(x0, y0, x1 - x0, y1 - y0)
    }

    /// Shift into a coordinate system rooted at `origin`. The rect must lie
    /// at or beyond the origin on both axes.
    #[must_use]
    pub fn relative_to(&self, origin_x: u32, origin_y: u32) -> PixelRect {
        PixelRect::new(
            self.x.saturating_sub(origin_x),
            self.y.saturating_sub(origin_y),
            self.width,
            self.height,
        )
    }
}

/// Scale-and-translate transform between page and screen coordinates
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub scale_x: f32,
    pub scale_y: f32,
    pub translate_x: f32,
    pub translate_y: f32,
}

impl Transform {
    #[must_use]
    pub const fn new(scale_x: f32, scale_y: f32, translate_x: f32, translate_y: f32) -> Self {
        Self {
            scale_x,
            scale_y,
            translate_x,
            translate_y,
        }
    }

    #[must_use]
    pub const fn identity() -> Self {
        Self::new(1.0, 1.0, 0.0, 0.0)
    }

    #[must_use]
    pub fn apply(&self, p: Point) -> Point {
        Point::new(
            p.x * self.scale_x + self.translate_x,
            p.y * self.scale_y + self.translate_y,
        )
    }

    /// Inverse transform; None when the scale is degenerate
    #[must_use]
    pub fn invert(&self) -> Option<Transform> {
        if self.scale_x == 0.0 || self.scale_y == 0.0 {
            return None;
        }
        Some(Transform::new(
            1.0 / self.scale_x,
            1.0 / self.scale_y,
            -self.translate_x / self.scale_x,
            -self.translate_y / self.scale_y,
        ))
    }
}

/// A point on a specific page, in cell coordinates at unit zoom
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PagePoint {
    pub page: usize,
    pub point: Point,
}

impl PagePoint {
    #[must_use]
    pub const fn new(page: usize, point: Point) -> Self {
        Self { page, point }
    }
}

/// An area on a specific page, in cell coordinates at unit zoom
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PageArea {
    pub page: usize,
    pub area: Rect,
}

impl PageArea {
    #[must_use]
    pub const fn new(page: usize, area: Rect) -> Self {
        Self { page, area }
    }
}
