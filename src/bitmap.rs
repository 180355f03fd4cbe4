//! Shared pixel buffers with sub-area views
//!
//! A `Bitmap` is either a root allocation or a view into another bitmap's
//! storage. Views share bytes with the root, so a render worker writing
//! through a view is immediately visible to the controlling thread reading
//! through the root.

use std::sync::{Arc, Mutex, MutexGuard};

use rayon::prelude::*;

use crate::geom::{PixelRect, Size};

/// Row count below which tone conversion stays single threaded
const PARALLEL_PIXEL_THRESHOLD: usize = 200_000;

/// Pixel formats for render targets
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BitmapKind {
    /// 8-bit alpha/gray, 1 byte per pixel
    A8,
    /// Packed 5/5/5 RGB, 2 bytes per pixel
    Rgb555,
    /// Packed 5/6/5 RGB, 2 bytes per pixel
    Rgb565,
    /// 8-bit RGBA, 4 bytes per pixel
    Rgba8888,
}

impl BitmapKind {
    #[must_use]
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::A8 => 1,
            Self::Rgb555 | Self::Rgb565 => 2,
            Self::Rgba8888 => 4,
        }
    }
}

/// Color profile tag carried alongside the pixels
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ColorProfile {
    #[default]
    Srgb,
    DisplayP3,
    AdobeRgb,
}

#[derive(Debug)]
struct Storage {
    bytes: Mutex<Vec<u8>>,
}

impl Storage {
    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.bytes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// A packed pixel rectangle, or a sub-area view of one.
///
/// Cloning a `Bitmap` produces another handle onto the same pixels, not a
/// copy. Storage is reference counted, so a view keeps the bytes alive even
/// if the root handle is dropped first.
#[derive(Clone)]
pub struct Bitmap {
    storage: Arc<Storage>,
    kind: BitmapKind,
    profile: ColorProfile,
    dark_mode: bool,
    origin_x: u32,
    origin_y: u32,
    width: u32,
    height: u32,
    /// Row pitch of the underlying allocation in bytes
    stride: usize,
    is_view: bool,
}

impl Bitmap {
    /// Allocate a tightly packed root bitmap.
    #[must_use]
    pub fn new(width: u32, height: u32, kind: BitmapKind) -> Self {
        let stride = width as usize * kind.bytes_per_pixel();
        let bytes = vec![0u8; stride * height as usize];
        Self {
            storage: Arc::new(Storage {
                bytes: Mutex::new(bytes),
            }),
            kind,
            profile: ColorProfile::default(),
            dark_mode: false,
            origin_x: 0,
            origin_y: 0,
            width,
            height,
            stride,
            is_view: false,
        }
    }

    /// Allocate a root bitmap covering `size`, rounding up to whole pixels.
    #[must_use]
    pub fn with_size(size: Size, kind: BitmapKind) -> Self {
        let width = size.width.ceil().max(0.0) as u32;
        let height = size.height.ceil().max(0.0) as u32;
        Self::new(width, height, kind)
    }

    /// Adopt an external buffer. Ownership of the bytes moves into the
    /// bitmap; the adopted stride is preserved until the next resize.
    #[must_use]
    pub fn from_raw(mut bytes: Vec<u8>, width: u32, height: u32, stride: usize, kind: BitmapKind) -> Self {
        let row_bytes = width as usize * kind.bytes_per_pixel();
        let needed = Self::needed_len(stride, height, row_bytes);
        debug_assert!(
            stride >= row_bytes,
            "adopted stride {stride} shorter than row ({row_bytes} bytes)"
        );
        debug_assert!(
            bytes.len() >= needed,
            "adopted buffer too small: {} < {needed}",
            bytes.len()
        );
        if bytes.len() < needed {
            bytes.resize(needed, 0);
        }
        let stride = stride.max(row_bytes);
        Self {
            storage: Arc::new(Storage {
                bytes: Mutex::new(bytes),
            }),
            kind,
            profile: ColorProfile::default(),
            dark_mode: false,
            origin_x: 0,
            origin_y: 0,
            width,
            height,
            stride,
            is_view: false,
        }
    }

    const fn needed_len(stride: usize, height: u32, row_bytes: usize) -> usize {
        if height == 0 {
            0
        } else {
            stride * (height as usize - 1) + row_bytes
        }
    }

    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn size(&self) -> Size {
        Size::new(self.width as f32, self.height as f32)
    }

    /// Row pitch of the underlying allocation in bytes
    #[must_use]
    pub const fn stride(&self) -> usize {
        self.stride
    }

    #[must_use]
    pub const fn kind(&self) -> BitmapKind {
        self.kind
    }

    #[must_use]
    pub const fn profile(&self) -> ColorProfile {
        self.profile
    }

    pub fn set_profile(&mut self, profile: ColorProfile) {
        self.profile = profile;
    }

    #[must_use]
    pub const fn dark_mode(&self) -> bool {
        self.dark_mode
    }

    pub fn set_dark_mode(&mut self, on: bool) {
        self.dark_mode = on;
    }

    #[must_use]
    pub const fn is_view(&self) -> bool {
        self.is_view
    }

    /// Bytes currently held by the allocation. Never shrinks; resize churn
    /// reuses this capacity.
    #[must_use]
    pub fn capacity_bytes(&self) -> usize {
        self.storage.lock().len()
    }

    /// True when both handles address the same underlying allocation.
    #[must_use]
    pub fn shares_storage_with(&self, other: &Bitmap) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }

    /// A view of `rect` sharing this bitmap's storage. The view's (0, 0)
    /// maps to `rect` origin here; writes through either handle are visible
    /// through the other.
    ///
    /// An out-of-bounds rect is a contract violation: fatal in debug builds,
    /// clamped to this bitmap's bounds in release.
    #[must_use]
    pub fn subarea(&self, rect: PixelRect) -> Bitmap {
        debug_assert!(
            rect.right() <= self.width && rect.bottom() <= self.height,
            "subarea {rect:?} outside {}x{}",
            self.width,
            self.height
        );
        let clipped = rect.intersect(&PixelRect::new(0, 0, self.width, self.height));
        Bitmap {
            storage: Arc::clone(&self.storage),
            kind: self.kind,
            profile: self.profile,
            dark_mode: self.dark_mode,
            origin_x: self.origin_x + clipped.x,
            origin_y: self.origin_y + clipped.y,
            width: clipped.width,
            height: clipped.height,
            stride: self.stride,
            is_view: true,
        }
    }

    /// Resize in place, reusing the allocation when it is already large
    /// enough. Capacity only ever grows. Root bitmaps only; resizing a view
    /// is a contract violation (fatal in debug, ignored in release).
    pub fn adjust_to_size(&mut self, width: u32, height: u32) {
        debug_assert!(!self.is_view, "cannot resize a sub-area view");
        if self.is_view {
            return;
        }
        let stride = width as usize * self.kind.bytes_per_pixel();
        let needed = stride * height as usize;
        let mut bytes = self.storage.lock();
        if bytes.len() < needed {
            bytes.resize(needed, 0);
        }
        drop(bytes);
        self.width = width;
        self.height = height;
        self.stride = stride;
    }

    /// Set the width and pick the largest height the current allocation can
    /// hold at that width. A buffer that has ever been (w, h) can serve
    /// (w, h) again after any resize churn. Root bitmaps only.
    pub fn adjust_to_width(&mut self, width: u32) {
        debug_assert!(!self.is_view, "cannot resize a sub-area view");
        if self.is_view {
            return;
        }
        let stride = width as usize * self.kind.bytes_per_pixel();
        let capacity = self.storage.lock().len();
        self.width = width;
        self.height = if stride == 0 { 0 } else { (capacity / stride) as u32 };
        self.stride = stride;
    }

    /// Copy pixels from `src`, which must have identical dimensions and
    /// format. A mismatch is a contract violation: fatal in debug builds;
    /// in release the overlapping top-left region is copied.
    pub fn copy_from(&self, src: &Bitmap) {
        debug_assert!(
            self.kind == src.kind,
            "copy between {:?} and {:?} bitmaps",
            src.kind,
            self.kind
        );
        debug_assert!(
            self.width == src.width && self.height == src.height,
            "copy dimension mismatch: {}x{} from {}x{}",
            self.width,
            self.height,
            src.width,
            src.height
        );
        if self.kind != src.kind {
            return;
        }
        let width = self.width.min(src.width);
        let height = self.height.min(src.height);
        if width == 0 || height == 0 {
            return;
        }
        let row_bytes = width as usize * self.kind.bytes_per_pixel();

        if Arc::ptr_eq(&self.storage, &src.storage) {
            // Same allocation: stage each row so overlapping regions stay
            // consistent, under a single lock.
            let mut bytes = self.storage.lock();
            let mut staged = vec![0u8; row_bytes];
            for y in 0..height as usize {
                let from = src.row_start(y);
                staged.copy_from_slice(&bytes[from..from + row_bytes]);
                let to = self.row_start(y);
                bytes[to..to + row_bytes].copy_from_slice(&staged);
            }
            return;
        }

        // Distinct allocations: source lock first, then destination. All
        // two-lock copies in the pipeline follow this order.
        let src_bytes = src.storage.lock();
        let mut dst_bytes = self.storage.lock();
        for y in 0..height as usize {
            let from = src.row_start(y);
            let to = self.row_start(y);
            dst_bytes[to..to + row_bytes].copy_from_slice(&src_bytes[from..from + row_bytes]);
        }
    }

    /// Fill every pixel with `pixel`, which must be one pixel's worth of
    /// bytes for this format.
    pub fn fill(&self, pixel: &[u8]) {
        let bpp = self.kind.bytes_per_pixel();
        debug_assert!(pixel.len() == bpp, "fill pixel is {} bytes, format needs {bpp}", pixel.len());
        if pixel.len() != bpp || self.width == 0 || self.height == 0 {
            return;
        }
        let row_bytes = self.width as usize * bpp;
        let mut template = vec![0u8; row_bytes];
        for chunk in template.chunks_exact_mut(bpp) {
            chunk.copy_from_slice(pixel);
        }
        let mut bytes = self.storage.lock();
        for y in 0..self.height as usize {
            let start = self.row_start(y);
            bytes[start..start + row_bytes].copy_from_slice(&template);
        }
    }

    /// In-place tone inversion. Honors the dark-mode flag: a no-op unless
    /// the flag is set. Alpha is preserved for RGBA.
    pub fn apply_dark_mode(&self) {
        if !self.dark_mode || self.width == 0 || self.height == 0 {
            return;
        }
        let bpp = self.kind.bytes_per_pixel();
        let row_bytes = self.width as usize * bpp;
        let height = self.height as usize;
        let stride = self.stride;
        let kind = self.kind;

        let mut bytes = self.storage.lock();
        let base = self.row_start(0);
        let end = base + Self::needed_len(stride, self.height, row_bytes);
        let region = &mut bytes[base..end];

        let total_pixels = self.width as usize * height;
        if total_pixels >= PARALLEL_PIXEL_THRESHOLD && height >= 4 {
            region.par_chunks_mut(stride).for_each(|chunk| {
                let len = chunk.len();
                let row = &mut chunk[..row_bytes.min(len)];
                tone::invert_row(row, kind);
            });
        } else {
            for chunk in region.chunks_mut(stride) {
                let len = chunk.len();
                let row = &mut chunk[..row_bytes.min(len)];
                tone::invert_row(row, kind);
            }
        }
    }

    /// Run `f` with read access to the pixel rows. Do not nest closures over
    /// bitmaps sharing one allocation; the storage lock is held throughout.
    pub fn with_samples<R>(&self, f: impl FnOnce(&Samples<'_>) -> R) -> R {
        let samples = Samples {
            guard: self.storage.lock(),
            base: self.row_start(0),
            stride: self.stride,
            row_bytes: self.width as usize * self.kind.bytes_per_pixel(),
            width: self.width,
            height: self.height,
            bpp: self.kind.bytes_per_pixel(),
        };
        f(&samples)
    }

    /// Run `f` with write access to the pixel rows.
    pub fn with_samples_mut<R>(&self, f: impl FnOnce(&mut Samples<'_>) -> R) -> R {
        let mut samples = Samples {
            guard: self.storage.lock(),
            base: self.row_start(0),
            stride: self.stride,
            row_bytes: self.width as usize * self.kind.bytes_per_pixel(),
            width: self.width,
            height: self.height,
            bpp: self.kind.bytes_per_pixel(),
        };
        f(&mut samples)
    }

    fn row_start(&self, y: usize) -> usize {
        (self.origin_y as usize + y) * self.stride
            + self.origin_x as usize * self.kind.bytes_per_pixel()
    }
}

impl std::fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bitmap")
            .field("kind", &self.kind)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .field("is_view", &self.is_view)
            .field("dark_mode", &self.dark_mode)
            .finish_non_exhaustive()
    }
}

/// Locked pixel access for one bitmap region
pub struct Samples<'a> {
    guard: MutexGuard<'a, Vec<u8>>,
    base: usize,
    stride: usize,
    row_bytes: usize,
    width: u32,
    height: u32,
    bpp: usize,
}

impl Samples<'_> {
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub const fn bytes_per_pixel(&self) -> usize {
        self.bpp
    }

    #[must_use]
    pub fn row(&self, y: u32) -> &[u8] {
        let start = self.base + y as usize * self.stride;
        &self.guard[start..start + self.row_bytes]
    }

    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let start = self.base + y as usize * self.stride;
        &mut self.guard[start..start + self.row_bytes]
    }

    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let offset = x as usize * self.bpp;
        &self.row(y)[offset..offset + self.bpp]
    }

    pub fn pixel_mut(&mut self, x: u32, y: u32) -> &mut [u8] {
        let offset = x as usize * self.bpp;
        let bpp = self.bpp;
        &mut self.row_mut(y)[offset..offset + bpp]
    }
}

mod tone {
    use wide::u16x8;

    use super::BitmapKind;

    #[inline]
    pub fn invert_row(row: &mut [u8], kind: BitmapKind) {
        match kind {
            BitmapKind::A8 => invert_gray(row),
            BitmapKind::Rgb555 => invert_packed16(row, 0x1F, 5, 0x1F, 5, 0x1F),
            BitmapKind::Rgb565 => invert_packed16(row, 0x1F, 6, 0x3F, 5, 0x1F),
            BitmapKind::Rgba8888 => invert_rgba(row),
        }
    }

    #[inline]
    fn invert_gray(row: &mut [u8]) {
        for v in row {
            *v = 255 - *v;
        }
    }

    /// Invert each channel of a packed 16-bit row, little endian, fields
    /// ordered r (high) to b (low).
    #[inline]
    fn invert_packed16(row: &mut [u8], r_max: u16, g_bits: u16, g_max: u16, b_bits: u16, b_max: u16) {
        for px in row.chunks_exact_mut(2) {
            let v = u16::from_le_bytes([px[0], px[1]]);
            let keep = v & !((r_max << (g_bits + b_bits)) | (g_max << b_bits) | b_max);
            let r = (v >> (g_bits + b_bits)) & r_max;
            let g = (v >> b_bits) & g_max;
            let b = v & b_max;
            let out = keep | ((r_max - r) << (g_bits + b_bits)) | ((g_max - g) << b_bits) | (b_max - b);
            px.copy_from_slice(&out.to_le_bytes());
        }
    }

    /// Invert r, g, b lanes of RGBA pixels, preserving alpha. Gathers four
    /// pixels per chunk into u16x8 lanes.
    #[inline]
    fn invert_rgba(row: &mut [u8]) {
        let chunks = row.len() / 16;
        let simd_end = chunks * 16;
        let (simd_part, remainder) = row.split_at_mut(simd_end);

        for chunk in simd_part.chunks_exact_mut(16) {
            let r = u16x8::new([
                u16::from(chunk[0]),
                u16::from(chunk[4]),
                u16::from(chunk[8]),
                u16::from(chunk[12]),
                0,
                0,
                0,
                0,
            ]);
            let g = u16x8::new([
                u16::from(chunk[1]),
                u16::from(chunk[5]),
                u16::from(chunk[9]),
                u16::from(chunk[13]),
                0,
                0,
                0,
                0,
            ]);
            let b = u16x8::new([
                u16::from(chunk[2]),
                u16::from(chunk[6]),
                u16::from(chunk[10]),
                u16::from(chunk[14]),
                0,
                0,
                0,
                0,
            ]);

            let inv_r = (u16x8::splat(255) - r).to_array();
            let inv_g = (u16x8::splat(255) - g).to_array();
            let inv_b = (u16x8::splat(255) - b).to_array();

            for i in 0..4 {
                chunk[i * 4] = inv_r[i] as u8;
                chunk[i * 4 + 1] = inv_g[i] as u8;
                chunk[i * 4 + 2] = inv_b[i] as u8;
            }
        }

        for px in remainder.chunks_exact_mut(4) {
            px[0] = 255 - px[0];
            px[1] = 255 - px[1];
            px[2] = 255 - px[2];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subarea_writes_are_visible_through_parent() {
        let parent = Bitmap::new(16, 16, BitmapKind::Rgba8888);
        let view = parent.subarea(PixelRect::new(4, 6, 8, 8));

        view.with_samples_mut(|s| {
            s.pixel_mut(0, 0).copy_from_slice(&[1, 2, 3, 4]);
            s.pixel_mut(7, 7).copy_from_slice(&[9, 9, 9, 9]);
        });

        parent.with_samples(|s| {
            assert_eq!(s.pixel(4, 6), &[1, 2, 3, 4]);
            assert_eq!(s.pixel(11, 13), &[9, 9, 9, 9]);
        });
    }

    #[test]
    fn parent_writes_are_visible_through_view() {
        let parent = Bitmap::new(10, 10, BitmapKind::A8);
        let view = parent.subarea(PixelRect::new(2, 2, 4, 4));

        parent.with_samples_mut(|s| {
            s.pixel_mut(3, 5)[0] = 0xAB;
        });

        view.with_samples(|s| {
            assert_eq!(s.pixel(1, 3)[0], 0xAB);
        });
    }

    #[test]
    fn view_outlives_root_handle() {
        let view = {
            let root = Bitmap::new(8, 8, BitmapKind::A8);
            root.fill(&[7]);
            root.subarea(PixelRect::new(0, 0, 4, 4))
        };
        view.with_samples(|s| assert_eq!(s.pixel(3, 3)[0], 7));
    }

    #[test]
    fn adjust_to_size_reuses_capacity() {
        let mut bm = Bitmap::new(100, 50, BitmapKind::Rgba8888);
        let initial = bm.capacity_bytes();

        bm.adjust_to_size(100, 30);
        assert_eq!(bm.capacity_bytes(), initial);
        assert_eq!(bm.height(), 30);

        bm.adjust_to_size(100, 80);
        assert!(bm.capacity_bytes() > initial);
    }

    #[test]
    fn adjust_to_width_restores_largest_height() {
        let mut bm = Bitmap::new(100, 40, BitmapKind::Rgba8888);
        bm.adjust_to_size(100, 90);
        bm.adjust_to_size(100, 20);

        bm.adjust_to_width(100);
        assert_eq!(bm.width(), 100);
        assert_eq!(bm.height(), 90);
    }

    #[test]
    fn adjust_to_width_accounts_for_format_width() {
        let mut bm = Bitmap::new(64, 64, BitmapKind::Rgba8888);
        bm.adjust_to_width(128);
        assert_eq!(bm.height(), 32);
    }

    #[test]
    fn copy_from_between_views_of_one_allocation() {
        let root = Bitmap::new(20, 10, BitmapKind::A8);
        let left = root.subarea(PixelRect::new(0, 0, 10, 10));
        let right = root.subarea(PixelRect::new(10, 0, 10, 10));
        left.fill(&[5]);

        right.copy_from(&left);

        root.with_samples(|s| {
            assert_eq!(s.pixel(0, 0)[0], 5);
            assert_eq!(s.pixel(19, 9)[0], 5);
        });
    }

    #[test]
    fn copy_from_distinct_allocations() {
        let a = Bitmap::new(6, 6, BitmapKind::Rgba8888);
        let b = Bitmap::new(6, 6, BitmapKind::Rgba8888);
        a.fill(&[1, 2, 3, 255]);

        b.copy_from(&a);

        b.with_samples(|s| assert_eq!(s.pixel(5, 5), &[1, 2, 3, 255]));
    }

    #[test]
    fn from_raw_adopts_bytes_and_stride() {
        let mut data = vec![0u8; 8 * 4];
        data[0] = 42;
        // 4 pixels wide at 1 byte per pixel, stride padded to 8
        let bm = Bitmap::from_raw(data, 4, 4, 8, BitmapKind::A8);
        assert_eq!(bm.stride(), 8);
        bm.with_samples(|s| {
            assert_eq!(s.pixel(0, 0)[0], 42);
        });
    }

    #[test]
    fn dark_mode_flag_gates_inversion() {
        let mut bm = Bitmap::new(4, 4, BitmapKind::Rgba8888);
        bm.fill(&[10, 20, 30, 200]);

        bm.apply_dark_mode();
        bm.with_samples(|s| assert_eq!(s.pixel(0, 0), &[10, 20, 30, 200]));

        bm.set_dark_mode(true);
        bm.apply_dark_mode();
        bm.with_samples(|s| assert_eq!(s.pixel(3, 3), &[245, 235, 225, 200]));
    }

    #[test]
    fn dark_mode_inverts_gray() {
        let mut bm = Bitmap::new(3, 3, BitmapKind::A8);
        bm.fill(&[0]);
        bm.set_dark_mode(true);
        bm.apply_dark_mode();
        bm.with_samples(|s| assert_eq!(s.pixel(1, 1)[0], 255));
    }

    #[test]
    fn dark_mode_inverts_packed_565() {
        let mut bm = Bitmap::new(2, 1, BitmapKind::Rgb565);
        // Pure red: r=31, g=0, b=0
        let red = (31u16 << 11).to_le_bytes();
        bm.fill(&red);
        bm.set_dark_mode(true);
        bm.apply_dark_mode();
        // Inverted: r=0, g=63, b=31 (cyan)
        let expect = ((63u16 << 5) | 31).to_le_bytes();
        bm.with_samples(|s| assert_eq!(s.pixel(1, 0), &expect));
    }

    #[test]
    fn dark_mode_on_view_only_touches_view_region() {
        let root = Bitmap::new(8, 8, BitmapKind::A8);
        root.fill(&[100]);
        let mut view = root.subarea(PixelRect::new(0, 0, 4, 8));
        view.set_dark_mode(true);
        view.apply_dark_mode();

        root.with_samples(|s| {
            assert_eq!(s.pixel(3, 0)[0], 155);
            assert_eq!(s.pixel(4, 0)[0], 100);
        });
    }

    #[test]
    fn subarea_of_subarea_compounds_offsets() {
        let root = Bitmap::new(20, 20, BitmapKind::A8);
        let outer = root.subarea(PixelRect::new(5, 5, 10, 10));
        let inner = outer.subarea(PixelRect::new(2, 3, 4, 4));

        inner.with_samples_mut(|s| s.pixel_mut(0, 0)[0] = 77);
        root.with_samples(|s| assert_eq!(s.pixel(7, 8)[0], 77));
    }

    #[test]
    fn fill_respects_view_bounds() {
        let root = Bitmap::new(6, 6, BitmapKind::A8);
        let view = root.subarea(PixelRect::new(1, 1, 2, 2));
        view.fill(&[9]);

        root.with_samples(|s| {
            assert_eq!(s.pixel(1, 1)[0], 9);
            assert_eq!(s.pixel(2, 2)[0], 9);
            assert_eq!(s.pixel(0, 0)[0], 0);
            assert_eq!(s.pixel(3, 3)[0], 0);
        });
    }
}
