use rayon::prelude::*;

use crate::canvas::{BACKGROUND, Bbox, CLASS_COUNT, ClassId, RasterStore};
use crate::components::history::{HistoryManager, Patch, UndoAction};

/// Passes run by [`smooth`].
pub const DEFAULT_PASSES: usize = 2;

/// Force a kernel size to be odd and at least 1.
pub fn odd_kernel(kernel_size: usize) -> usize {
    let k = kernel_size.max(1);
    if k % 2 == 0 { k + 1 } else { k }
}

/// Majority-vote smoothing of annotation edges around `bbox`.
///
/// Returns the processed region, or `None` when nothing changed (no write,
/// no undo entry). The undo action covers the whole buffer.
pub fn smooth<S: RasterStore + ?Sized>(
    store: &mut S,
    history: &mut HistoryManager,
    bbox: Bbox,
    kernel_size: usize,
) -> Option<Bbox> {
    smooth_with_passes(store, history, bbox, kernel_size, DEFAULT_PASSES)
}

pub fn smooth_with_passes<S: RasterStore + ?Sized>(
    store: &mut S,
    history: &mut HistoryManager,
    bbox: Bbox,
    kernel_size: usize,
    passes: usize,
) -> Option<Bbox> {
    let (w, h) = (store.width(), store.height());
    // no window wider than the buffer fits anyway
    let kernel = odd_kernel(kernel_size.min(w.min(h) as usize + 1));
    let region = processing_region(bbox, kernel, w, h);
    if region.is_empty() {
        return None;
    }

    let before = Patch::capture_full(store);
    let original = before.bytes();
    if !has_annotation(original, w, region) {
        tracing::debug!("smooth: no classes around {:?}, skipping", bbox);
        return None;
    }

    let mut current = original.to_vec();
    for _ in 0..passes.max(1) {
        current = smooth_pass(&current, original, w, h, region, kernel);
    }

    if current.as_slice() == original {
        return None;
    }
    store.write_region(Bbox::full(w, h), &current);
    history.push(UndoAction::compound(before));
    tracing::debug!("smoothed {:?} with kernel {} ({} passes)", region, kernel, passes);
    Some(region)
}

/// `bbox` grown by the kernel size, clamped to the buffer and to the
/// coordinates where a full kernel window fits.
pub fn processing_region(bbox: Bbox, kernel: usize, width: u32, height: u32) -> Bbox {
    let kernel = kernel.min(width.min(height) as usize + 1);
    let half = (kernel / 2) as i32;
    let fits = Bbox::from_min_max(half, half, width as i32 - half, height as i32 - half);
    bbox.expand(kernel as i32).clamped(width, height).intersect(&fits)
}

fn has_annotation(pixels: &[ClassId], width: u32, region: Bbox) -> bool {
    let stride = width as usize;
    (region.y..region.bottom()).any(|y| {
        let row = y as usize * stride;
        pixels[row + region.x as usize..row + region.right() as usize]
            .iter()
            .any(|&c| c != BACKGROUND)
    })
}

/// One majority-vote pass. Reads `input` only; `original` is the buffer as
/// it was before the first pass.
fn smooth_pass(
    input: &[ClassId],
    original: &[ClassId],
    width: u32,
    height: u32,
    region: Bbox,
    kernel: usize,
) -> Vec<ClassId> {
    let stride = width as usize;
    let half = (kernel / 2) as i32;
    let mut output = input.to_vec();

    output
        .par_chunks_mut(stride)
        .enumerate()
        .skip(region.y as usize)
        .take(region.h as usize)
        .for_each(|(y, row)| {
            let y = y as i32;
            for x in region.x..region.right() {
                let idx = y as usize * stride + x as usize;
                let here = input[idx];

                let neighbors = neighbor_indices(x, y, width, height);
                let mut is_boundary = false;
                let mut touches_annotation = false;
                for ni in neighbors.into_iter().flatten() {
                    is_boundary |= input[ni] != here;
                    touches_annotation |= original[ni] != BACKGROUND;
                }
                if !is_boundary {
                    continue;
                }
                // keep untouched background far from any annotation as is
                if original[idx] == BACKGROUND && !touches_annotation {
                    continue;
                }

                let mut counts = [0u32; CLASS_COUNT];
                for wy in (y - half)..=(y + half) {
                    let base = wy as usize * stride;
                    for wx in (x - half)..=(x + half) {
                        counts[input[base + wx as usize] as usize] += 1;
                    }
                }
                row[x as usize] = majority(&counts);
            }
        });

    output
}

fn neighbor_indices(x: i32, y: i32, width: u32, height: u32) -> [Option<usize>; 4] {
    let stride = width as i32;
    let at = |nx: i32, ny: i32| {
        (nx >= 0 && ny >= 0 && nx < width as i32 && ny < height as i32)
            .then(|| (ny * stride + nx) as usize)
    };
    [at(x - 1, y), at(x + 1, y), at(x, y - 1), at(x, y + 1)]
}

/// Most frequent class. Ties go to the lowest class id.
fn majority(counts: &[u32; CLASS_COUNT]) -> ClassId {
    let mut best = 0usize;
    for (class, &count) in counts.iter().enumerate().skip(1) {
        if count > counts[best] {
            best = class;
        }
    }
    best as ClassId
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::ClassBuffer;

    #[test]
    fn kernel_is_forced_odd() {
        assert_eq!(odd_kernel(0), 1);
        assert_eq!(odd_kernel(4), 5);
        assert_eq!(odd_kernel(7), 7);
    }

    #[test]
    fn ties_pick_lowest_class() {
        let mut counts = [0u32; CLASS_COUNT];
        counts[3] = 4;
        counts[5] = 4;
        assert_eq!(majority(&counts), 3);
        counts[0] = 4;
        assert_eq!(majority(&counts), 0);
    }

    #[test]
    fn isolated_pixel_is_removed() {
        let mut buf = ClassBuffer::new(11, 11);
        buf.set(5, 5, 2);
        let mut history = HistoryManager::default();
        let region = smooth_with_passes(&mut buf, &mut history, Bbox::new(5, 5, 1, 1), 3, 1);
        assert!(region.is_some());
        assert_eq!(buf.get(5, 5), BACKGROUND);
        assert_eq!(history.undo_count(), 1);
        history.undo(&mut buf);
        assert_eq!(buf.get(5, 5), 2);
    }

    #[test]
    fn blank_region_is_a_no_op() {
        let mut buf = ClassBuffer::new(40, 40);
        buf.set(38, 38, 1);
        let mut history = HistoryManager::default();
        assert!(smooth(&mut buf, &mut history, Bbox::new(2, 2, 4, 4), 3).is_none());
        assert!(!history.can_undo());
        assert_eq!(buf.get(38, 38), 1);
    }

    #[test]
    fn solid_blocks_are_untouched_inside() {
        let mut buf = ClassBuffer::new(30, 30);
        for y in 5..25 {
            for x in 5..25 {
                buf.set(x, y, 4);
            }
        }
        let mut history = HistoryManager::default();
        smooth(&mut buf, &mut history, Bbox::new(5, 5, 20, 20), 5);
        // interior far from the edge keeps its class
        assert_eq!(buf.get(15, 15), 4);
        // far background is never touched
        assert_eq!(buf.get(0, 29), BACKGROUND);
    }

    #[test]
    fn result_classes_come_from_the_window() {
        // stripes of two classes next to background
        let mut buf = ClassBuffer::new(20, 20);
        for y in 4..16 {
            for x in 4..16 {
                buf.set(x, y, if (x / 2) % 2 == 0 { 1 } else { 6 });
            }
        }
        let input = buf.as_raw().to_vec();
        let region = processing_region(Bbox::new(4, 4, 12, 12), 3, 20, 20);
        let out = smooth_pass(&input, &input, 20, 20, region, 3);
        for y in 1..19i32 {
            for x in 1..19i32 {
                let got = out[(y * 20 + x) as usize];
                let mut present = false;
                for wy in y - 1..=y + 1 {
                    for wx in x - 1..=x + 1 {
                        present |= input[(wy * 20 + wx) as usize] == got;
                    }
                }
                assert!(present, "({}, {}) got class {} not in its window", x, y, got);
            }
        }
    }

    #[test]
    fn oversized_kernel_is_a_no_op() {
        let mut buf = ClassBuffer::new(12, 12);
        buf.write_region(Bbox::new(2, 2, 4, 4), &[3; 16]);
        let before = buf.clone();
        let mut history = HistoryManager::default();
        assert_eq!(smooth(&mut buf, &mut history, Bbox::full(12, 12), usize::MAX), None);
        assert_eq!(smooth(&mut buf, &mut history, Bbox::full(12, 12), 13), None);
        assert_eq!(buf, before);
        assert!(!history.can_undo());
        assert!(processing_region(Bbox::full(12, 12), usize::MAX, 12, 12).is_empty());
    }

    #[test]
    fn region_respects_kernel_margin() {
        let r = processing_region(Bbox::new(0, 0, 3, 3), 5, 50, 50);
        assert_eq!(r, Bbox::new(2, 2, 6, 6));
    }
}
