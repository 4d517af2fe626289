//! LabelFE annotation engine: per-pixel class masks painted with brush
//! strokes, flood fill and majority-vote smoothing, with exact undo, a
//! palette codec for persistence and export, and a background-loading
//! controller for moving through an image library.

pub mod app;
pub mod cache;
pub mod canvas;
pub mod cli;
pub mod components;
pub mod error;
pub mod io;
pub mod library;
pub mod logger;
pub mod ops;
pub mod project;
pub mod settings;

pub use app::{Annotator, AnnotatorEvent};
pub use cache::{AnnotationCache, CacheEntry};
pub use canvas::{BACKGROUND, Bbox, ClassBuffer, ClassId, MAX_CLASS, RasterStore};
pub use error::{EngineError, Result};
pub use library::{AssetResolver, DirectoryLibrary};
pub use project::{AnnotationProject, ToolEvent};
pub use settings::EngineSettings;
