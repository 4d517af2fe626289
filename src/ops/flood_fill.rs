use std::collections::VecDeque;

use crate::canvas::{Bbox, ClassId, MAX_CLASS, RasterStore};
use crate::components::history::{HistoryManager, Patch, UndoAction};
use crate::error::{Result, pixel_coord};

/// Recolour the 4-connected region of the class under (`x`, `y`) to `class`.
///
/// The whole buffer is snapshotted for undo before anything changes.
/// Returns the bounds of the filled pixels, or `None` when the start pixel
/// already has `class` (no write, no undo entry).
pub fn flood_fill<S: RasterStore + ?Sized>(
    store: &mut S,
    history: &mut HistoryManager,
    x: f32,
    y: f32,
    class: ClassId,
) -> Result<Option<Bbox>> {
    let (w, h) = (store.width(), store.height());
    let (sx, sy) = pixel_coord(x, y, w, h)?;
    let class = class.min(MAX_CLASS);
    if store.class_at(sx, sy) == Some(class) {
        return Ok(None);
    }

    let before = Patch::capture_full(store);
    let mut pixels = before.bytes().to_vec();
    let Some(bounds) = fill_region(&mut pixels, w, h, sx, sy, class) else {
        return Ok(None);
    };

    store.write_region(Bbox::full(w, h), &pixels);
    history.push(UndoAction::compound(before));
    tracing::debug!("flood fill ({}, {}) -> class {} over {:?}", sx, sy, class, bounds);
    Ok(Some(bounds))
}

/// BFS over a flat row-major class buffer. Returns the bounds of the
/// recoloured pixels, or `None` if the seed already has `class`.
pub fn fill_region(
    pixels: &mut [ClassId],
    width: u32,
    height: u32,
    start_x: u32,
    start_y: u32,
    class: ClassId,
) -> Option<Bbox> {
    if start_x >= width || start_y >= height {
        return None;
    }
    let wu = width as usize;
    let seed = start_y as usize * wu + start_x as usize;
    let target = pixels[seed];
    if target == class {
        return None;
    }

    let (mut min_x, mut min_y, mut max_x, mut max_y) = (start_x, start_y, start_x, start_y);
    // Recolouring on push doubles as the visited set: a filled pixel no
    // longer matches `target`.
    let mut queue = VecDeque::with_capacity(1024);
    pixels[seed] = class;
    queue.push_back((start_x, start_y));

    while let Some((px, py)) = queue.pop_front() {
        min_x = min_x.min(px);
        max_x = max_x.max(px);
        min_y = min_y.min(py);
        max_y = max_y.max(py);

        let neighbors = [
            (px.wrapping_sub(1), py),
            (px + 1, py),
            (px, py.wrapping_sub(1)),
            (px, py + 1),
        ];
        for (nx, ny) in neighbors {
            if nx >= width || ny >= height {
                continue;
            }
            let ni = ny as usize * wu + nx as usize;
            if pixels[ni] == target {
                pixels[ni] = class;
                queue.push_back((nx, ny));
            }
        }
    }

    Some(Bbox::from_min_max(
        min_x as i32,
        min_y as i32,
        max_x as i32 + 1,
        max_y as i32 + 1,
    ))
}
