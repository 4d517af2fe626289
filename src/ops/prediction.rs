use image::RgbaImage;

use crate::canvas::{BACKGROUND, Bbox, ClassId, MAX_CLASS, RasterStore};
use crate::components::history::{HistoryManager, Patch, UndoAction};
use crate::io;

/// Merge a server prediction mask into the annotation.
///
/// The prediction is red on transparent at any size; it is resampled to the
/// buffer and every foreground pixel becomes `class`. Background pixels of the
/// prediction leave the annotation alone. Recorded as one compound undo
/// action. Returns the bounds of the changed pixels, or `None` when the
/// prediction changes nothing.
pub fn apply_prediction<S: RasterStore + ?Sized>(
    store: &mut S,
    history: &mut HistoryManager,
    prediction: &RgbaImage,
    class: ClassId,
) -> Option<Bbox> {
    let (w, h) = (store.width(), store.height());
    let class = class.clamp(1, MAX_CLASS);
    let mask = io::decode_export(prediction, w, h, class);

    let before = Patch::capture_full(store);
    let mut pixels = before.bytes().to_vec();
    let stride = w.max(1) as usize;
    let mut changed: Option<Bbox> = None;
    for (i, (dst, &src)) in pixels.iter_mut().zip(mask.as_raw()).enumerate() {
        if src == BACKGROUND || *dst == src {
            continue;
        }
        *dst = src;
        let px = Bbox::new((i % stride) as i32, (i / stride) as i32, 1, 1);
        changed = Some(changed.map_or(px, |b| b.union(&px)));
    }

    let Some(bounds) = changed else {
        tracing::debug!("prediction adds nothing to the current annotation");
        return None;
    };
    store.write_region(Bbox::full(w, h), &pixels);
    history.push(UndoAction::compound(before));
    tracing::info!("imported prediction as class {} over {:?}", class, bounds);
    Some(bounds)
}
