use image::RgbaImage;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::canvas::{Bbox, ClassBuffer, ClassId, MAX_CLASS, RasterStore};
use crate::components::history::HistoryManager;
use crate::components::tools::{BrushMode, StrokeTool};
use crate::error::{EngineError, Result};
use crate::ops::{flood_fill, prediction, smoothing};
use crate::settings::EngineSettings;

/// Input to an [`AnnotationProject`]. Every gesture and command goes
/// through [`AnnotationProject::handle`].
#[derive(Clone, Debug)]
pub enum ToolEvent {
    StrokeBegin { x: f32, y: f32 },
    StrokeContinue { x: f32, y: f32 },
    StrokeEnd,
    StrokeCancel,
    FillTap { x: f32, y: f32 },
    /// Smooth around `bbox`, or around the last committed stroke when `None`.
    Smooth {
        bbox: Option<Bbox>,
        kernel: Option<usize>,
    },
    ImportPrediction(Arc<RgbaImage>),
    Undo,
    Redo,
    /// Periodic clock for the quickline timer.
    Tick,
    ClearAll,
    SetClass(ClassId),
    SetBrushMode(BrushMode),
    SetRadius(f32),
}

/// One open image and its annotation: the live buffer plus everything that
/// edits it.
pub struct AnnotationProject {
    pub id: Uuid,
    /// Image id in the library.
    pub key: String,
    pub image: Option<Arc<RgbaImage>>,
    canvas: ClassBuffer,
    pub history: HistoryManager,
    pub stroke: StrokeTool,
    pub active_class: ClassId,
    pub brush_mode: BrushMode,
    pub smoothing_kernel: usize,
    pub smoothing_passes: usize,
    pub is_dirty: bool,
    /// Region of the most recent committed stroke, the default smoothing target.
    pub last_stroke_bbox: Option<Bbox>,
}

impl AnnotationProject {
    pub fn new(key: impl Into<String>, canvas: ClassBuffer, settings: &EngineSettings) -> Self {
        Self {
            id: Uuid::new_v4(),
            key: key.into(),
            image: None,
            canvas,
            history: HistoryManager::new(settings.history_limits()),
            stroke: StrokeTool::new(settings.brush_settings()),
            active_class: 1,
            brush_mode: BrushMode::Paint,
            smoothing_kernel: settings.smoothing_kernel,
            smoothing_passes: settings.smoothing_passes,
            is_dirty: false,
            last_stroke_bbox: None,
        }
    }

    /// Project for a decoded image. The mask is resampled to the image size
    /// if needed; without one the annotation starts blank.
    pub fn from_image(
        key: impl Into<String>,
        image: Arc<RgbaImage>,
        mask: Option<&ClassBuffer>,
        settings: &EngineSettings,
    ) -> Self {
        let (w, h) = image.dimensions();
        let canvas = match mask {
            Some(m) if (m.width(), m.height()) == (w, h) => m.clone(),
            Some(m) => m.resampled(w, h),
            None => ClassBuffer::new(w, h),
        };
        let mut project = Self::new(key, canvas, settings);
        project.image = Some(image);
        project
    }

    pub fn canvas(&self) -> &ClassBuffer {
        &self.canvas
    }

    pub fn mark_dirty(&mut self) {
        self.is_dirty = true;
    }

    pub fn mark_clean(&mut self) {
        self.is_dirty = false;
    }

    /// Apply one event. Returns the region that changed (for redraw), if any.
    ///
    /// Invalid or out-of-range coordinates come back as errors and leave the
    /// project untouched; an active stroke survives them.
    pub fn handle(&mut self, event: ToolEvent, now: Instant) -> Result<Option<Bbox>> {
        let changed = match event {
            ToolEvent::StrokeBegin { x, y } => {
                let bbox = self.stroke.begin(
                    &mut self.canvas,
                    &mut self.history,
                    (x, y),
                    self.active_class,
                    self.brush_mode,
                    now,
                )?;
                Some(bbox)
            }
            ToolEvent::StrokeContinue { x, y } => {
                let stamps = self.stroke.extend(&mut self.canvas, (x, y), now)?;
                if stamps > 0 { self.stroke.active_bbox() } else { None }
            }
            ToolEvent::StrokeEnd => self.commit_stroke(),
            ToolEvent::StrokeCancel => self.stroke.cancel(&mut self.canvas),
            ToolEvent::Tick => {
                if self.stroke.tick(&mut self.canvas, now) {
                    self.stroke.active_bbox()
                } else {
                    None
                }
            }
            ToolEvent::FillTap { x, y } => {
                self.commit_stroke();
                flood_fill::flood_fill(&mut self.canvas, &mut self.history, x, y, self.active_class)?
            }
            ToolEvent::Smooth { bbox, kernel } => {
                self.commit_stroke();
                let target = bbox
                    .or(self.last_stroke_bbox)
                    .unwrap_or_else(|| self.canvas.bounds());
                smoothing::smooth_with_passes(
                    &mut self.canvas,
                    &mut self.history,
                    target,
                    kernel.unwrap_or(self.smoothing_kernel),
                    self.smoothing_passes,
                )
            }
            ToolEvent::ImportPrediction(mask) => {
                self.commit_stroke();
                prediction::apply_prediction(
                    &mut self.canvas,
                    &mut self.history,
                    &mask,
                    self.active_class,
                )
            }
            ToolEvent::Undo => {
                self.commit_stroke();
                self.history.undo(&mut self.canvas)
            }
            ToolEvent::Redo => {
                self.commit_stroke();
                self.history.redo(&mut self.canvas)
            }
            ToolEvent::ClearAll => {
                self.stroke.cancel(&mut self.canvas);
                self.canvas.clear();
                self.history.clear();
                self.last_stroke_bbox = None;
                tracing::info!("cleared annotation for '{}'", self.key);
                Some(self.canvas.bounds())
            }
            ToolEvent::SetClass(class) => {
                if !(1..=MAX_CLASS).contains(&class) {
                    return Err(EngineError::InvalidClass(class));
                }
                self.active_class = class;
                None
            }
            ToolEvent::SetBrushMode(mode) => {
                self.brush_mode = mode;
                None
            }
            ToolEvent::SetRadius(radius) => {
                if radius.is_finite() && radius > 0.0 {
                    self.stroke.settings.radius = radius;
                }
                None
            }
        };

        if changed.is_some() {
            self.mark_dirty();
        }
        Ok(changed)
    }

    /// Commit an active stroke, if any, as one undo action.
    pub fn commit_stroke(&mut self) -> Option<Bbox> {
        let bbox = self.stroke.end(&mut self.canvas, &mut self.history)?;
        self.last_stroke_bbox = Some(bbox);
        Some(bbox)
    }
}
