//! Page layout: frame placement in scroll space
//!
//! Frames are computed at unit zoom from per-page cell sizes, then scaled,
//! so a zoom change moves every frame without re-measuring pages.

use crate::geom::{Point, Rect, Size};

/// Placement of every page frame in layout (scrolled content) space
#[derive(Clone, Debug, Default)]
pub struct PageLayout {
    frames: Vec<Rect>,
    content: Size,
}

impl PageLayout {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Lay pages out top to bottom in `columns` columns.
    ///
    /// `adjust` maps the nominal cell size (one column slot at unit zoom)
    /// to the size each page actually wants. Rows take the height of their
    /// tallest page; shorter pages are centered within the row.
    pub fn compute(
        page_count: usize,
        columns: usize,
        viewport: Size,
        gap: f32,
        zoom: f32,
        mut adjust: impl FnMut(Size, usize) -> Size,
    ) -> Self {
        let columns = columns.max(1);
        let slot_width = ((viewport.width - gap * (columns - 1) as f32) / columns as f32).max(1.0);
        let nominal = Size::new(slot_width, viewport.height.max(1.0));

        let mut frames = Vec::with_capacity(page_count);
        let mut content_width = viewport.width.max(1.0);
        let mut cursor_y = 0.0f32;

        for row_start in (0..page_count).step_by(columns) {
            let row_end = (row_start + columns).min(page_count);
            let sizes: Vec<Size> = (row_start..row_end).map(|p| adjust(nominal, p)).collect();
            let row_height = sizes
                .iter()
                .map(|s| s.height)
                .fold(0.0f32, f32::max)
                .max(1.0);

            for (i, size) in sizes.iter().enumerate() {
                let slot_x = i as f32 * (slot_width + gap);
                let x = slot_x + (slot_width - size.width).max(0.0) / 2.0;
                let y = cursor_y + (row_height - size.height).max(0.0) / 2.0;
                frames.push(Rect::new(x, y, size.width, size.height));
                content_width = content_width.max(x + size.width);
            }

            cursor_y += row_height + gap;
        }

        // Drop the trailing gap
        let content_height = if page_count > 0 { cursor_y - gap } else { 0.0 };

        if zoom != 1.0 {
            for frame in &mut frames {
                *frame = frame.scaled(zoom);
            }
            content_width *= zoom;
        }

        Self {
            frames,
            content: Size::new(content_width, content_height * zoom),
        }
    }

    #[must_use]
    pub fn page_count(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn frame(&self, page: usize) -> Option<Rect> {
        self.frames.get(page).copied()
    }

    #[must_use]
    pub fn content_size(&self) -> Size {
        self.content
    }

    /// Pages whose frames intersect `area`, as a contiguous range. Empty
    /// when nothing intersects.
    #[must_use]
    pub fn visible_pages(&self, area: Rect) -> std::ops::Range<usize> {
        let mut first = None;
        let mut last = 0;
        for (page, frame) in self.frames.iter().enumerate() {
            if frame.intersects(&area) {
                first.get_or_insert(page);
                last = page;
            }
        }
        match first {
            Some(first) => first..last + 1,
            None => 0..0,
        }
    }

    /// Page whose frame contains `point`, if any
    #[must_use]
    pub fn page_at_point(&self, point: Point) -> Option<usize> {
        self.frames.iter().position(|f| f.contains(point))
    }

    /// Closest page to `point` by frame distance
    #[must_use]
    pub fn nearest_page(&self, point: Point) -> Option<usize> {
        self.frames
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                a.distance_to(point)
                    .total_cmp(&b.distance_to(point))
            })
            .map(|(page, _)| page)
    }

    /// Clamp a scroll offset so the viewport stays on content
    #[must_use]
    pub fn clamp_offset(&self, offset: Point, viewport: Size) -> Point {
        let max_x = (self.content.width - viewport.width).max(0.0);
        let max_y = (self.content.height - viewport.height).max(0.0);
        Point::new(offset.x.clamp(0.0, max_x), offset.y.clamp(0.0, max_y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aspect_fit(nominal: Size, page_size: Size) -> Size {
        let scale = (nominal.width / page_size.width).min(nominal.height / page_size.height);
        page_size.scaled(scale)
    }

    fn single_column(page_count: usize) -> PageLayout {
        PageLayout::compute(
            page_count,
            1,
            Size::new(400.0, 600.0),
            10.0,
            1.0,
            |nominal, _| aspect_fit(nominal, Size::new(100.0, 140.0)),
        )
    }

    #[test]
    fn frames_stack_with_gaps() {
        let layout = single_column(3);
        assert_eq!(layout.page_count(), 3);

        let a = layout.frame(0).unwrap();
        let b = layout.frame(1).unwrap();
        assert!(a.max_y() <= b.y);
        assert!((b.y - a.max_y() - 10.0).abs() < 0.01);

        // Pages centered horizontally
        assert!((a.x - (400.0 - a.width) / 2.0).abs() < 0.01);
        assert!((layout.content_size().height - (3.0 * a.height + 2.0 * 10.0)).abs() < 0.1);
    }

    #[test]
    fn zoom_scales_every_frame() {
        let base = single_column(3);
        let zoomed = PageLayout::compute(
            3,
            1,
            Size::new(400.0, 600.0),
            10.0,
            2.0,
            |nominal, _| aspect_fit(nominal, Size::new(100.0, 140.0)),
        );
        let a = base.frame(1).unwrap();
        let b = zoomed.frame(1).unwrap();
        assert!((b.x - a.x * 2.0).abs() < 0.01);
        assert!((b.width - a.width * 2.0).abs() < 0.01);
        assert!((zoomed.content_size().height - base.content_size().height * 2.0).abs() < 0.1);
    }

    #[test]
    fn two_columns_share_rows() {
        let layout = PageLayout::compute(
            4,
            2,
            Size::new(400.0, 600.0),
            10.0,
            1.0,
            |nominal, _| aspect_fit(nominal, Size::new(100.0, 140.0)),
        );
        let a = layout.frame(0).unwrap();
        let b = layout.frame(1).unwrap();
        let c = layout.frame(2).unwrap();
        assert!((a.y - b.y).abs() < 0.01);
        assert!(b.x > a.max_x());
        assert!(c.y >= a.max_y());
    }

    #[test]
    fn visible_pages_tracks_scroll() {
        let layout = single_column(10);
        let frame = layout.frame(0).unwrap();

        let top = layout.visible_pages(Rect::new(0.0, 0.0, 400.0, 600.0));
        assert_eq!(top.start, 0);
        assert!(top.end >= 1);

        let below = Rect::new(0.0, frame.max_y() + 20.0, 400.0, 600.0);
        let further = layout.visible_pages(below);
        assert!(further.start >= 1);

        let nowhere = layout.visible_pages(Rect::new(0.0, 1e6, 400.0, 600.0));
        assert!(nowhere.is_empty());
    }

    #[test]
    fn point_queries() {
        let layout = single_column(3);
        let frame = layout.frame(1).unwrap();
        let inside = Point::new(frame.x + 1.0, frame.y + 1.0);
        assert_eq!(layout.page_at_point(inside), Some(1));
        assert_eq!(layout.page_at_point(Point::new(-50.0, -50.0)), None);
        assert_eq!(layout.nearest_page(Point::new(-50.0, -50.0)), Some(0));
        assert_eq!(layout.nearest_page(inside), Some(1));
    }

    #[test]
    fn clamp_keeps_viewport_on_content() {
        let layout = single_column(10);
        let viewport = Size::new(400.0, 600.0);
        let clamped = layout.clamp_offset(Point::new(-5.0, 1e6), viewport);
        assert_eq!(clamped.x, 0.0);
        assert!((clamped.y - (layout.content_size().height - 600.0)).abs() < 0.01);

        let empty = PageLayout::empty();
        assert_eq!(empty.clamp_offset(Point::new(9.0, 9.0), viewport), Point::zero());
    }
}
