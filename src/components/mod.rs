// ============================================================================
// COMPONENTS: stateful editing pieces owned by an annotation project
// ============================================================================
//
//   history.rs - region patches, undo/redo stacks with optional limits
//   tools.rs   - brush strokes: interpolation, bbox tracking, quickline
// ============================================================================

pub mod history;
pub mod tools;

pub use history::{HistoryLimits, HistoryManager, Patch, UndoAction};
pub use tools::{BrushMode, BrushSettings, StrokeTool};
