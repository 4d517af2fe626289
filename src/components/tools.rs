use std::time::{Duration, Instant};

use crate::canvas::{BACKGROUND, Bbox, ClassId, RasterStore, disc_bounds};
use crate::components::history::{HistoryManager, Patch, UndoAction};
use crate::error::{EngineError, Result};

/// Largest side of the region captured when a stroke starts.
const INITIAL_BBOX_SIDE: i32 = 2000;
/// Interpolated points between two bbox coverage checks.
const BBOX_CHECK_INTERVAL: u64 = 20;
/// Stamp spacing as a fraction of the brush radius.
const STEP_FACTOR: f32 = 0.3;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BrushMode {
    #[default]
    Paint,
    Erase,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BrushSettings {
    pub radius: f32,
    /// How long the pointer has to rest before the stroke is straightened.
    pub quickline_delay: Duration,
    /// Movement (in pixels) still counted as resting.
    pub quickline_tolerance: f32,
}

impl Default for BrushSettings {
    fn default() -> Self {
        Self {
            radius: 12.0,
            quickline_delay: Duration::from_secs(1),
            quickline_tolerance: 4.0,
        }
    }
}

/// Distance between consecutive stamps for a brush of `radius`.
pub fn step_interval(radius: f32) -> f32 {
    (radius * STEP_FACTOR).max(1.0)
}

/// Stamp centres strictly after `from` up to and including `to`, spaced at
/// most [`step_interval`] apart. Coincident points yield a single stamp at `to`.
pub fn interpolate(from: (f32, f32), to: (f32, f32), radius: f32) -> Vec<(f32, f32)> {
    let dx = to.0 - from.0;
    let dy = to.1 - from.1;
    let distance = (dx * dx + dy * dy).sqrt();
    let steps = (distance / step_interval(radius)).ceil().max(1.0) as usize;
    (1..=steps)
        .map(|i| {
            let t = i as f32 / steps as f32;
            (from.0 + dx * t, from.1 + dy * t)
        })
        .collect()
}

/// Reject pointer positions a stamp could not reach the buffer from. Keeps
/// interpolation bounded for stray far-away samples.
fn check_reach(point: (f32, f32), radius: f32, width: u32, height: u32) -> Result<()> {
    if !point.0.is_finite() || !point.1.is_finite() {
        return Err(EngineError::InvalidCoordinate {
            x: point.0,
            y: point.1,
        });
    }
    let r = radius.ceil();
    if point.0 < -r || point.1 < -r || point.0 > width as f32 + r || point.1 > height as f32 + r {
        return Err(EngineError::OutOfBounds {
            x: point.0.floor() as i64,
            y: point.1.floor() as i64,
            width,
            height,
        });
    }
    Ok(())
}

/// Square of up to 2000 px centred on a point, clamped to the buffer.
fn initial_bbox(point: (f32, f32), width: u32, height: u32) -> Bbox {
    let side = INITIAL_BBOX_SIDE.min(width.min(height) as i32);
    let x = point.0.round() as i32 - side / 2;
    let y = point.1.round() as i32 - side / 2;
    Bbox::new(x, y, side, side).clamped(width, height)
}

// ============================================================================
// STROKE SESSION
// ============================================================================

/// State of one stroke between begin and end/cancel.
struct StrokeSession {
    class: ClassId,
    radius: f32,
    first_point: (f32, f32),
    last_point: (f32, f32),
    /// Region currently covered by `baseline` + `grown`.
    bbox: Bbox,
    /// Pre-stroke bytes of the region captured at stroke start.
    baseline: Patch,
    /// Pre-stroke bytes of every band added to `bbox` since. Always captured
    /// before anything is stamped into them.
    grown: Vec<Patch>,
    interpolated: u64,
    stationary_since: Instant,
    stationary_anchor: (f32, f32),
    straightened: bool,
}

impl StrokeSession {
    /// Make sure a stamp at `point` lies inside the tracked region. Newly
    /// covered bands are snapshotted; the full re-read is left for commit.
    fn cover<S: RasterStore + ?Sized>(&mut self, store: &S, point: (f32, f32)) {
        let needed = disc_bounds(point.0, point.1, self.radius).clamped(store.width(), store.height());
        if self.bbox.contains(&needed) {
            return;
        }
        let expanded = self.bbox.union(&needed);
        for band in expanded.subtract(&self.bbox) {
            self.grown.push(Patch::capture(store, band));
        }
        tracing::trace!("stroke bbox {:?} -> {:?}", self.bbox, expanded);
        self.bbox = expanded;
    }

    /// Check coverage for a batch of collinear stamps before any of them is
    /// applied. Every 20th point is checked, plus the batch end, which covers
    /// the whole segment because its start is already inside.
    fn cover_batch<S: RasterStore + ?Sized>(&mut self, store: &S, points: &[(f32, f32)]) {
        for (i, &p) in points.iter().enumerate() {
            self.interpolated += 1;
            if self.interpolated % BBOX_CHECK_INTERVAL == 0 || i + 1 == points.len() {
                self.cover(store, p);
            }
        }
    }

    fn stamp_all<S: RasterStore + ?Sized>(&self, store: &mut S, points: &[(f32, f32)]) {
        for &(x, y) in points {
            store.stamp_disc(x, y, self.radius, self.class);
        }
    }

    /// Put every pixel touched so far back to its pre-stroke value.
    fn restore<S: RasterStore + ?Sized>(&self, store: &mut S) {
        self.baseline.apply(store);
        for band in &self.grown {
            band.apply(store);
        }
    }

    /// Pre-stroke bytes of the whole tracked region. Reads the region once
    /// and splices the snapshots back over what has been painted.
    fn merged_baseline<S: RasterStore + ?Sized>(&mut self, store: &S) -> Patch {
        if self.grown.is_empty() {
            return self.baseline.clone();
        }
        let mut merged = Patch::capture(store, self.bbox);
        merged.splice(&self.baseline);
        for band in &self.grown {
            merged.splice(band);
        }
        self.baseline = merged.clone();
        self.grown.clear();
        merged
    }
}

// ============================================================================
// STROKE TOOL
// ============================================================================

/// Turns pointer positions into brush stamps on a [`RasterStore`].
/// idle -> stroking -> idle.
#[derive(Default)]
pub struct StrokeTool {
    pub settings: BrushSettings,
    session: Option<StrokeSession>,
}

impl StrokeTool {
    pub fn new(settings: BrushSettings) -> Self {
        Self {
            settings,
            session: None,
        }
    }

    pub fn is_stroke_active(&self) -> bool {
        self.session.is_some()
    }

    /// Region the active stroke currently tracks.
    pub fn active_bbox(&self) -> Option<Bbox> {
        self.session.as_ref().map(|s| s.bbox)
    }

    /// Start a stroke. A stroke already in progress is committed first.
    pub fn begin<S: RasterStore + ?Sized>(
        &mut self,
        store: &mut S,
        history: &mut HistoryManager,
        point: (f32, f32),
        class: ClassId,
        mode: BrushMode,
        now: Instant,
    ) -> Result<Bbox> {
        let radius = self.settings.radius.max(0.5);
        check_reach(point, radius, store.width(), store.height())?;
        if self.session.is_some() {
            tracing::warn!("stroke begin while stroking, committing previous stroke");
            self.end(store, history);
        }

        let class = match mode {
            BrushMode::Paint => class,
            BrushMode::Erase => BACKGROUND,
        };
        let bbox = initial_bbox(point, store.width(), store.height());
        let mut session = StrokeSession {
            class,
            radius,
            first_point: point,
            last_point: point,
            bbox,
            baseline: Patch::capture(store, bbox),
            grown: Vec::new(),
            interpolated: 0,
            stationary_since: now,
            stationary_anchor: point,
            straightened: false,
        };
        session.cover(store, point);
        let stamped = store.stamp_disc(point.0, point.1, session.radius, class);
        self.session = Some(session);
        Ok(stamped)
    }

    /// Extend the stroke to `point`. Returns the number of stamps applied.
    pub fn extend<S: RasterStore + ?Sized>(
        &mut self,
        store: &mut S,
        point: (f32, f32),
        now: Instant,
    ) -> Result<usize> {
        let tolerance = self.settings.quickline_tolerance;
        let (width, height) = (store.width(), store.height());
        let Some(session) = self.session.as_mut() else {
            return Ok(0);
        };
        check_reach(point, session.radius, width, height)?;

        let dx = point.0 - session.stationary_anchor.0;
        let dy = point.1 - session.stationary_anchor.1;
        if (dx * dx + dy * dy).sqrt() > tolerance {
            session.stationary_anchor = point;
            session.stationary_since = now;
        }

        if session.straightened {
            // Once straightened, the line end follows the pointer
            session.last_point = point;
            return Ok(Self::straighten(session, store));
        }

        let points = interpolate(session.last_point, point, session.radius);
        session.cover_batch(store, &points);
        session.stamp_all(store, &points);
        session.last_point = point;
        Ok(points.len())
    }

    /// Straighten the stroke if the pointer has been resting long enough.
    /// Call periodically while a stroke is active; returns `true` when the
    /// freehand path was replaced by a straight line.
    pub fn tick<S: RasterStore + ?Sized>(&mut self, store: &mut S, now: Instant) -> bool {
        let delay = self.settings.quickline_delay;
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        if session.straightened || now.duration_since(session.stationary_since) < delay {
            return false;
        }
        session.straightened = true;
        let stamps = Self::straighten(session, store);
        tracing::debug!(
            "quickline {:?} -> {:?} ({} stamps)",
            session.first_point,
            session.last_point,
            stamps
        );
        true
    }

    fn straighten<S: RasterStore + ?Sized>(session: &mut StrokeSession, store: &mut S) -> usize {
        session.restore(store);
        let mut points = vec![session.first_point];
        points.extend(interpolate(session.first_point, session.last_point, session.radius));
        session.cover_batch(store, &points);
        session.stamp_all(store, &points);
        points.len()
    }

    /// Commit the stroke as one undo action. Returns the committed region.
    pub fn end<S: RasterStore + ?Sized>(
        &mut self,
        store: &mut S,
        history: &mut HistoryManager,
    ) -> Option<Bbox> {
        let mut session = self.session.take()?;
        let baseline = session.merged_baseline(store);
        let bbox = baseline.bbox();
        if bbox.is_empty() {
            // stroke never touched the buffer
            return None;
        }
        tracing::debug!("stroke committed: class {} over {:?}", session.class, bbox);
        history.push(UndoAction::new(session.class, baseline));
        Some(bbox)
    }

    /// Throw the stroke away. No undo action is recorded.
    pub fn cancel<S: RasterStore + ?Sized>(&mut self, store: &mut S) -> Option<Bbox> {
        let session = self.session.take()?;
        session.restore(store);
        Some(session.bbox)
    }
}
