// ============================================================================
// OPS: whole-buffer edits, each recorded as one compound undo action
// ============================================================================
//
//   flood_fill.rs: 4-connected region recolour from a tap
//   smoothing.rs : majority-vote edge cleanup around a region
//   prediction.rs: merge a server mask into the annotation
// ============================================================================

pub mod flood_fill;
pub mod prediction;
pub mod smoothing;

pub use flood_fill::flood_fill;
pub use prediction::apply_prediction;
pub use smoothing::smooth;
