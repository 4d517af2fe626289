use rayon::prelude::*;

/// Pixel label. 0 is background, 1..=8 are the palette classes.
pub type ClassId = u8;

pub const BACKGROUND: ClassId = 0;
/// Highest valid class id.
pub const MAX_CLASS: ClassId = 8;
/// Number of distinct labels including background.
pub const CLASS_COUNT: usize = MAX_CLASS as usize + 1;

// ============================================================================
// BBOX
// ============================================================================

/// Axis-aligned integer rectangle. `x`/`y` may be negative before clamping;
/// everything handed to a [`RasterStore`] is clamped first.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Bbox {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl Bbox {
    pub const EMPTY: Bbox = Bbox { x: 0, y: 0, w: 0, h: 0 };

    pub fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self {
            x,
            y,
            w: w.max(0),
            h: h.max(0),
        }
    }

    pub fn from_min_max(min_x: i32, min_y: i32, max_x: i32, max_y: i32) -> Self {
        Self::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }

    /// The whole extent of a `width` × `height` buffer.
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width as i32, height as i32)
    }

    /// Exclusive right edge.
    pub fn right(&self) -> i32 {
        self.x + self.w
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> i32 {
        self.y + self.h
    }

    pub fn is_empty(&self) -> bool {
        self.w <= 0 || self.h <= 0
    }

    pub fn area(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            self.w as usize * self.h as usize
        }
    }

    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    pub fn contains(&self, other: &Bbox) -> bool {
        other.is_empty()
            || (other.x >= self.x
                && other.y >= self.y
                && other.right() <= self.right()
                && other.bottom() <= self.bottom())
    }

    pub fn intersect(&self, other: &Bbox) -> Bbox {
        let min_x = self.x.max(other.x);
        let min_y = self.y.max(other.y);
        let max_x = self.right().min(other.right());
        let max_y = self.bottom().min(other.bottom());
        if max_x <= min_x || max_y <= min_y {
            Bbox::EMPTY
        } else {
            Bbox::from_min_max(min_x, min_y, max_x, max_y)
        }
    }

    /// Smallest rectangle covering both. Empty operands are ignored.
    pub fn union(&self, other: &Bbox) -> Bbox {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Bbox::from_min_max(
            self.x.min(other.x),
            self.y.min(other.y),
            self.right().max(other.right()),
            self.bottom().max(other.bottom()),
        )
    }

    /// Grow by `n` pixels on each side.
    pub fn expand(&self, n: i32) -> Bbox {
        Bbox::new(self.x - n, self.y - n, self.w + 2 * n, self.h + 2 * n)
    }

    /// Intersect with `[0, width) × [0, height)`.
    pub fn clamped(&self, width: u32, height: u32) -> Bbox {
        self.intersect(&Bbox::full(width, height))
    }

    /// The parts of `self` not covered by `inner`, as at most four disjoint
    /// rectangles (top and bottom bands full width, left and right bands
    /// between them). `inner` must lie inside `self`.
    pub fn subtract(&self, inner: &Bbox) -> Vec<Bbox> {
        let inner = inner.intersect(self);
        if inner.is_empty() {
            return if self.is_empty() { Vec::new() } else { vec![*self] };
        }
        let mut parts = Vec::with_capacity(4);
        let top = Bbox::from_min_max(self.x, self.y, self.right(), inner.y);
        let bottom = Bbox::from_min_max(self.x, inner.bottom(), self.right(), self.bottom());
        let left = Bbox::from_min_max(self.x, inner.y, inner.x, inner.bottom());
        let right = Bbox::from_min_max(inner.right(), inner.y, self.right(), inner.bottom());
        for part in [top, bottom, left, right] {
            if !part.is_empty() {
                parts.push(part);
            }
        }
        parts
    }
}

// ============================================================================
// RASTER STORE CONTRACT
// ============================================================================

/// Region access over a 2-D buffer of class ids.
///
/// Every `bbox` passed in must already be clamped to the store's extent, and
/// `bytes.len()` must equal `bbox.area()` for writes. Only one owner mutates a
/// store at a time; `&mut self` on the writers makes that the caller's problem.
pub trait RasterStore {
    fn width(&self) -> u32;
    fn height(&self) -> u32;

    fn read_region(&self, bbox: Bbox) -> Vec<u8>;
    fn write_region(&mut self, bbox: Bbox, bytes: &[u8]);
    fn read_full(&self) -> Vec<u8>;
    fn clear(&mut self);

    fn bounds(&self) -> Bbox {
        Bbox::full(self.width(), self.height())
    }

    fn class_at(&self, x: u32, y: u32) -> Option<ClassId> {
        if x >= self.width() || y >= self.height() {
            return None;
        }
        self.read_region(Bbox::new(x as i32, y as i32, 1, 1))
            .first()
            .copied()
    }

    /// Fill the disc of `radius` around (`cx`, `cy`) with `class`.
    /// Returns the clamped bounds of the disc.
    ///
    /// The default goes through `read_region`/`write_region`; stores with
    /// direct pixel access should override it.
    fn stamp_disc(&mut self, cx: f32, cy: f32, radius: f32, class: ClassId) -> Bbox {
        let bounds = disc_bounds(cx, cy, radius).clamped(self.width(), self.height());
        if bounds.is_empty() {
            return bounds;
        }
        let mut bytes = self.read_region(bounds);
        let (ix, iy) = disc_center(cx, cy);
        let r2 = radius * radius;
        for row in 0..bounds.h {
            let dy = (bounds.y + row - iy) as f32;
            for col in 0..bounds.w {
                let dx = (bounds.x + col - ix) as f32;
                if dx * dx + dy * dy <= r2 {
                    bytes[(row * bounds.w + col) as usize] = class;
                }
            }
        }
        self.write_region(bounds, &bytes);
        bounds
    }
}

/// Integer pixel a stamp at (`cx`, `cy`) is centred on.
pub fn disc_center(cx: f32, cy: f32) -> (i32, i32) {
    (cx.round() as i32, cy.round() as i32)
}

/// Unclamped bounds of a stamp disc.
pub fn disc_bounds(cx: f32, cy: f32, radius: f32) -> Bbox {
    let (ix, iy) = disc_center(cx, cy);
    let r = radius.max(0.0).ceil() as i32;
    Bbox::new(ix - r, iy - r, 2 * r + 1, 2 * r + 1)
}

// ============================================================================
// CLASS BUFFER - in-memory raster store
// ============================================================================

/// Row-major `width × height` grid of class ids.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassBuffer {
    width: u32,
    height: u32,
    data: Vec<ClassId>,
}

impl ClassBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![BACKGROUND; width as usize * height as usize],
        }
    }

    /// Wrap raw class bytes. Returns `None` if the length does not match or
    /// any value is outside `0..=MAX_CLASS`.
    pub fn from_raw(width: u32, height: u32, data: Vec<ClassId>) -> Option<Self> {
        if data.len() != width as usize * height as usize {
            return None;
        }
        if data.iter().any(|&c| c > MAX_CLASS) {
            return None;
        }
        Some(Self {
            width,
            height,
            data,
        })
    }

    pub fn as_raw(&self) -> &[ClassId] {
        &self.data
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> ClassId {
        self.data[y as usize * self.width as usize + x as usize]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, class: ClassId) {
        debug_assert!(class <= MAX_CLASS);
        let idx = y as usize * self.width as usize + x as usize;
        self.data[idx] = class;
    }

    pub fn fill(&mut self, class: ClassId) {
        self.data.fill(class);
    }

    /// Pixel count per class id.
    pub fn class_counts(&self) -> [usize; CLASS_COUNT] {
        self.data
            .par_chunks(self.width.max(1) as usize * 64)
            .map(|chunk| {
                let mut counts = [0usize; CLASS_COUNT];
                for &c in chunk {
                    counts[(c as usize).min(MAX_CLASS as usize)] += 1;
                }
                counts
            })
            .reduce(
                || [0usize; CLASS_COUNT],
                |mut a, b| {
                    for (x, y) in a.iter_mut().zip(b) {
                        *x += y;
                    }
                    a
                },
            )
    }

    pub fn is_blank(&self) -> bool {
        self.data.iter().all(|&c| c == BACKGROUND)
    }

    /// Nearest-neighbour resample. Class ids are never interpolated.
    pub fn resampled(&self, width: u32, height: u32) -> ClassBuffer {
        if width == self.width && height == self.height {
            return self.clone();
        }
        let mut out = ClassBuffer::new(width, height);
        if self.width == 0 || self.height == 0 {
            return out;
        }
        let src_w = self.width as u64;
        let src_h = self.height as u64;
        // sample at destination pixel centres
        out.data
            .par_chunks_mut(width.max(1) as usize)
            .enumerate()
            .for_each(|(y, row)| {
                let sy = (((2 * y as u64 + 1) * src_h) / (2 * height as u64)) as usize;
                let src_row = &self.data[sy * self.width as usize..(sy + 1) * self.width as usize];
                for (x, px) in row.iter_mut().enumerate() {
                    let sx = (((2 * x as u64 + 1) * src_w) / (2 * width as u64)) as usize;
                    *px = src_row[sx];
                }
            });
        out
    }
}

impl RasterStore for ClassBuffer {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn read_region(&self, bbox: Bbox) -> Vec<u8> {
        debug_assert!(self.bounds().contains(&bbox), "read outside buffer: {:?}", bbox);
        let bbox = bbox.clamped(self.width, self.height);
        let mut out = Vec::with_capacity(bbox.area());
        let stride = self.width as usize;
        for y in bbox.y..bbox.bottom() {
            let start = y as usize * stride + bbox.x as usize;
            out.extend_from_slice(&self.data[start..start + bbox.w as usize]);
        }
        out
    }

    fn write_region(&mut self, bbox: Bbox, bytes: &[u8]) {
        debug_assert!(self.bounds().contains(&bbox), "write outside buffer: {:?}", bbox);
        if bytes.len() != bbox.area() {
            tracing::error!(
                "write_region: {} bytes for {}x{} region, ignoring",
                bytes.len(),
                bbox.w,
                bbox.h
            );
            return;
        }
        let stride = self.width as usize;
        let w = bbox.w as usize;
        for (row, src) in bytes.chunks_exact(w.max(1)).enumerate() {
            let y = bbox.y as usize + row;
            if y >= self.height as usize {
                break;
            }
            let start = y * stride + bbox.x as usize;
            self.data[start..start + w].copy_from_slice(src);
        }
    }

    fn read_full(&self) -> Vec<u8> {
        self.data.clone()
    }

    fn clear(&mut self) {
        self.data.fill(BACKGROUND);
    }

    fn class_at(&self, x: u32, y: u32) -> Option<ClassId> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(self.get(x, y))
    }

    fn stamp_disc(&mut self, cx: f32, cy: f32, radius: f32, class: ClassId) -> Bbox {
        let bounds = disc_bounds(cx, cy, radius).clamped(self.width, self.height);
        if bounds.is_empty() {
            return bounds;
        }
        let (ix, iy) = disc_center(cx, cy);
        let r2 = radius * radius;
        let stride = self.width as usize;
        for y in bounds.y..bounds.bottom() {
            let dy = (y - iy) as f32;
            let row = y as usize * stride;
            for x in bounds.x..bounds.right() {
                let dx = (x - ix) as f32;
                if dx * dx + dy * dy <= r2 {
                    self.data[row + x as usize] = class;
                }
            }
        }
        bounds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bbox_clamp_and_union() {
        let b = Bbox::new(-5, -5, 20, 10).clamped(10, 10);
        assert_eq!(b, Bbox::new(0, 0, 10, 5));
        let u = Bbox::new(0, 0, 2, 2).union(&Bbox::new(5, 5, 1, 1));
        assert_eq!(u, Bbox::new(0, 0, 6, 6));
        assert_eq!(Bbox::EMPTY.union(&u), u);
        assert!(Bbox::new(3, 3, 0, 4).is_empty());
    }

    #[test]
    fn subtract_tiles_the_difference() {
        let outer = Bbox::new(0, 0, 10, 8);
        let inner = Bbox::new(2, 3, 4, 2);
        let parts = outer.subtract(&inner);
        let covered: usize = parts.iter().map(|p| p.area()).sum();
        assert_eq!(covered + inner.area(), outer.area());
        for (i, a) in parts.iter().enumerate() {
            assert!(a.intersect(&inner).is_empty());
            for b in &parts[i + 1..] {
                assert!(a.intersect(b).is_empty());
            }
        }
        assert!(outer.subtract(&outer).is_empty());
    }

    #[test]
    fn region_read_write_roundtrip() {
        let mut buf = ClassBuffer::new(6, 4);
        let region = Bbox::new(1, 1, 3, 2);
        buf.write_region(region, &[1, 2, 3, 4, 5, 6]);
        assert_eq!(buf.read_region(region), vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(buf.get(0, 0), 0);
        assert_eq!(buf.get(3, 2), 6);
    }

    #[test]
    fn mismatched_write_is_ignored() {
        let mut buf = ClassBuffer::new(4, 4);
        buf.write_region(Bbox::new(0, 0, 2, 2), &[1, 1, 1]);
        assert!(buf.is_blank());
    }

    #[test]
    fn stamp_disc_is_clamped() {
        let mut buf = ClassBuffer::new(10, 10);
        let bounds = buf.stamp_disc(0.0, 0.0, 2.0, 4);
        assert_eq!(bounds, Bbox::new(0, 0, 3, 3));
        assert_eq!(buf.get(0, 0), 4);
        assert_eq!(buf.get(2, 0), 4);
        // corner of the bounding square lies outside the disc
        assert_eq!(buf.get(2, 2), 0);
    }

    #[test]
    fn default_stamp_matches_override() {
        struct Plain(ClassBuffer);
        impl RasterStore for Plain {
            fn width(&self) -> u32 {
                self.0.width()
            }
            fn height(&self) -> u32 {
                self.0.height()
            }
            fn read_region(&self, bbox: Bbox) -> Vec<u8> {
                self.0.read_region(bbox)
            }
            fn write_region(&mut self, bbox: Bbox, bytes: &[u8]) {
                self.0.write_region(bbox, bytes)
            }
            fn read_full(&self) -> Vec<u8> {
                self.0.read_full()
            }
            fn clear(&mut self) {
                self.0.clear()
            }
        }

        let mut fast = ClassBuffer::new(16, 16);
        let mut plain = Plain(ClassBuffer::new(16, 16));
        fast.stamp_disc(7.4, 8.6, 3.5, 2);
        plain.stamp_disc(7.4, 8.6, 3.5, 2);
        assert_eq!(fast, plain.0);
    }

    #[test]
    fn resample_is_nearest_neighbour() {
        let buf = ClassBuffer::from_raw(2, 2, vec![1, 2, 3, 4]).unwrap();
        let up = buf.resampled(4, 4);
        assert_eq!(up.get(0, 0), 1);
        assert_eq!(up.get(1, 1), 1);
        assert_eq!(up.get(3, 0), 2);
        assert_eq!(up.get(0, 3), 3);
        assert_eq!(up.get(3, 3), 4);
        let counts = up.class_counts();
        assert_eq!(counts[1..5], [4, 4, 4, 4]);
    }

    #[test]
    fn from_raw_rejects_bad_input() {
        assert!(ClassBuffer::from_raw(2, 2, vec![0; 3]).is_none());
        assert!(ClassBuffer::from_raw(1, 1, vec![9]).is_none());
    }
}
