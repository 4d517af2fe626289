use std::collections::VecDeque;

use crate::canvas::{BACKGROUND, Bbox, ClassId, RasterStore};

// ============================================================================
// PATCH - rectangular snapshot of class ids
// ============================================================================

/// Class-id bytes of one buffer region at one point in time.
/// `bytes.len()` always equals `bbox.area()`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Patch {
    bbox: Bbox,
    bytes: Vec<u8>,
}

impl Patch {
    /// Read `bbox` (clamped to the store) out of `store`.
    pub fn capture<S: RasterStore + ?Sized>(store: &S, bbox: Bbox) -> Self {
        let bbox = bbox.clamped(store.width(), store.height());
        if bbox.is_empty() {
            return Self {
                bbox: Bbox::EMPTY,
                bytes: Vec::new(),
            };
        }
        Self {
            bytes: store.read_region(bbox),
            bbox,
        }
    }

    /// Snapshot of the whole store.
    pub fn capture_full<S: RasterStore + ?Sized>(store: &S) -> Self {
        Self {
            bbox: store.bounds(),
            bytes: store.read_full(),
        }
    }

    pub fn from_parts(bbox: Bbox, bytes: Vec<u8>) -> Option<Self> {
        (bytes.len() == bbox.area()).then_some(Self { bbox, bytes })
    }

    pub fn bbox(&self) -> Bbox {
        self.bbox
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Write the snapshot back over its region.
    pub fn apply<S: RasterStore + ?Sized>(&self, store: &mut S) {
        if self.bbox.is_empty() {
            return;
        }
        if !store.bounds().contains(&self.bbox) {
            tracing::error!("Patch::apply: {:?} outside {}x{} buffer", self.bbox, store.width(), store.height());
            return;
        }
        store.write_region(self.bbox, &self.bytes);
    }

    /// Copy `other`'s bytes into this patch at the matching offset. Only the
    /// overlap of the two regions is touched.
    pub fn splice(&mut self, other: &Patch) {
        let overlap = self.bbox.intersect(&other.bbox);
        if overlap.is_empty() {
            return;
        }
        let dst_w = self.bbox.w as usize;
        let src_w = other.bbox.w as usize;
        let run = overlap.w as usize;
        for y in overlap.y..overlap.bottom() {
            let dst = (y - self.bbox.y) as usize * dst_w + (overlap.x - self.bbox.x) as usize;
            let src = (y - other.bbox.y) as usize * src_w + (overlap.x - other.bbox.x) as usize;
            self.bytes[dst..dst + run].copy_from_slice(&other.bytes[src..src + run]);
        }
    }

    pub fn memory_size(&self) -> usize {
        self.bytes.len()
    }
}

// ============================================================================
// UNDO ACTION
// ============================================================================

/// One undoable mutation. `previous` is captured before the mutation;
/// `next` is filled the first time the action is undone so it can be redone.
#[derive(Clone, Debug)]
pub struct UndoAction {
    /// Class that was painted; `BACKGROUND` marks compound/clear actions.
    pub class_id: ClassId,
    pub bbox: Bbox,
    pub previous: Patch,
    pub next: Option<Patch>,
}

impl UndoAction {
    pub fn new(class_id: ClassId, previous: Patch) -> Self {
        Self {
            class_id,
            bbox: previous.bbox(),
            previous,
            next: None,
        }
    }

    /// Action for fill/smooth/import style operations.
    pub fn compound(previous: Patch) -> Self {
        Self::new(BACKGROUND, previous)
    }

    pub fn memory_size(&self) -> usize {
        self.previous.memory_size() + self.next.as_ref().map_or(0, |p| p.memory_size())
    }
}

// ============================================================================
// HISTORY MANAGER - linear undo/redo stacks
// ============================================================================

/// Optional caps. Both `None` means unbounded history.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HistoryLimits {
    pub max_steps: Option<usize>,
    pub max_bytes: Option<usize>,
}

/// Undo/redo history of patch-based actions.
pub struct HistoryManager {
    undo_stack: VecDeque<UndoAction>,
    redo_stack: VecDeque<UndoAction>,
    limits: HistoryLimits,
    /// Running memory total across both stacks.
    total_memory: usize,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(HistoryLimits::default())
    }
}

impl HistoryManager {
    pub fn new(limits: HistoryLimits) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            limits,
            total_memory: 0,
        }
    }

    pub fn push(&mut self, action: UndoAction) {
        // A new action invalidates everything that could be redone
        for old in self.redo_stack.drain(..) {
            self.total_memory = self.total_memory.saturating_sub(old.memory_size());
        }

        self.total_memory += action.memory_size();
        self.undo_stack.push_back(action);

        self.prune();
    }

    /// Restore the most recent action's prior bytes. The current bytes over
    /// its bbox are captured first so the action can be redone.
    pub fn undo<S: RasterStore + ?Sized>(&mut self, store: &mut S) -> Option<Bbox> {
        let mut action = self.undo_stack.pop_back()?;
        let before = action.memory_size();

        action.next = Some(Patch::capture(store, action.bbox));
        action.previous.apply(store);

        self.total_memory = self.total_memory - before + action.memory_size();
        let bbox = action.bbox;
        tracing::debug!("undo class {} over {:?}", action.class_id, bbox);
        self.redo_stack.push_back(action);
        Some(bbox)
    }

    pub fn redo<S: RasterStore + ?Sized>(&mut self, store: &mut S) -> Option<Bbox> {
        let action = self.redo_stack.pop_back()?;
        let Some(next) = action.next.as_ref() else {
            // Only undone actions land here, and undo always fills `next`
            tracing::error!("redo: action over {:?} has no post-state, dropping it", action.bbox);
            self.total_memory = self.total_memory.saturating_sub(action.memory_size());
            return None;
        };
        next.apply(store);
        let bbox = action.bbox;
        tracing::debug!("redo class {} over {:?}", action.class_id, bbox);
        self.undo_stack.push_back(action);
        Some(bbox)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.total_memory = 0;
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }

    /// Bytes held by both stacks (O(1) via cached total).
    pub fn memory_usage(&self) -> usize {
        self.total_memory
    }

    /// Most recent undoable action, if any.
    pub fn last(&self) -> Option<&UndoAction> {
        self.undo_stack.back()
    }

    /// Drop the oldest actions to stay within limits. The newest action is
    /// always kept.
    fn prune(&mut self) {
        if let Some(max_steps) = self.limits.max_steps {
            while self.undo_stack.len() > max_steps.max(1) {
                if let Some(removed) = self.undo_stack.pop_front() {
                    self.total_memory = self.total_memory.saturating_sub(removed.memory_size());
                }
            }
        }

        if let Some(max_bytes) = self.limits.max_bytes {
            while self.total_memory > max_bytes && self.undo_stack.len() > 1 {
                if let Some(removed) = self.undo_stack.pop_front() {
                    self.total_memory = self.total_memory.saturating_sub(removed.memory_size());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::ClassBuffer;

    fn paint(store: &mut ClassBuffer, history: &mut HistoryManager, bbox: Bbox, class: ClassId) {
        let before = Patch::capture(store, bbox);
        store.write_region(bbox, &vec![class; bbox.area()]);
        history.push(UndoAction::new(class, before));
    }

    #[test]
    fn undo_then_redo_is_exact() {
        let mut buf = ClassBuffer::new(8, 8);
        let mut history = HistoryManager::default();
        paint(&mut buf, &mut history, Bbox::new(1, 1, 4, 4), 2);
        let after = buf.clone();

        assert_eq!(history.undo(&mut buf), Some(Bbox::new(1, 1, 4, 4)));
        assert!(buf.is_blank());
        assert!(history.can_redo());

        history.redo(&mut buf);
        assert_eq!(buf, after);
        assert!(!history.can_redo());
    }

    #[test]
    fn push_clears_redo() {
        let mut buf = ClassBuffer::new(4, 4);
        let mut history = HistoryManager::default();
        paint(&mut buf, &mut history, Bbox::new(0, 0, 2, 2), 1);
        history.undo(&mut buf);
        assert_eq!(history.redo_count(), 1);
        paint(&mut buf, &mut history, Bbox::new(2, 2, 2, 2), 3);
        assert_eq!(history.redo_count(), 0);
        assert!(history.redo(&mut buf).is_none());
    }

    #[test]
    fn overlapping_actions_unwind_in_order() {
        let mut buf = ClassBuffer::new(6, 6);
        let mut history = HistoryManager::default();
        paint(&mut buf, &mut history, Bbox::new(0, 0, 4, 4), 1);
        let first = buf.clone();
        paint(&mut buf, &mut history, Bbox::new(2, 2, 4, 4), 5);
        history.undo(&mut buf);
        assert_eq!(buf, first);
        history.undo(&mut buf);
        assert!(buf.is_blank());
        assert!(!history.can_undo());
        history.redo(&mut buf);
        history.redo(&mut buf);
        assert_eq!(buf.get(3, 3), 5);
        assert_eq!(buf.get(0, 0), 1);
    }

    #[test]
    fn step_limit_drops_oldest() {
        let mut buf = ClassBuffer::new(4, 4);
        let mut history = HistoryManager::new(HistoryLimits {
            max_steps: Some(2),
            max_bytes: None,
        });
        for class in 1..=3 {
            paint(&mut buf, &mut history, Bbox::new(0, 0, 1, 1), class);
        }
        assert_eq!(history.undo_count(), 2);
        history.undo(&mut buf);
        history.undo(&mut buf);
        // the first action fell off, so class 1 stays
        assert_eq!(buf.get(0, 0), 1);
    }

    #[test]
    fn memory_accounting_tracks_redo_patches() {
        let mut buf = ClassBuffer::new(4, 4);
        let mut history = HistoryManager::default();
        paint(&mut buf, &mut history, Bbox::new(0, 0, 2, 2), 1);
        assert_eq!(history.memory_usage(), 4);
        history.undo(&mut buf);
        assert_eq!(history.memory_usage(), 8);
        history.clear();
        assert_eq!(history.memory_usage(), 0);
        assert!(!history.can_undo() && !history.can_redo());
    }

    #[test]
    fn splice_overwrites_only_overlap() {
        let mut outer = Patch::from_parts(Bbox::new(0, 0, 4, 3), vec![9; 12]).unwrap();
        let inner = Patch::from_parts(Bbox::new(1, 1, 2, 1), vec![1, 2]).unwrap();
        outer.splice(&inner);
        assert_eq!(outer.bytes(), &[9, 9, 9, 9, 9, 1, 2, 9, 9, 9, 9, 9]);
    }
}
