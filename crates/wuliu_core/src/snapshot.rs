use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::models::{STATION_COUNT, StationIndex, StationState};

type Slots = [Option<StationState>; STATION_COUNT as usize];

/// Last known state of every station seen so far.
///
/// One slot per valid index, so the store can never hold more than
/// `STATION_COUNT` entries or an entry for an index outside the domain.
/// Each read-compare-write runs under the write lock, so two updates of
/// the same index cannot interleave.
#[derive(Debug)]
pub struct SnapshotStore {
    slots: RwLock<Slots>,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotStore {
    pub fn new() -> Self {
        SnapshotStore {
            slots: RwLock::new(std::array::from_fn(|_| None)),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Slots> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Slots> {
        self.slots.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_empty(&self) -> bool {
        self.read().iter().all(Option::is_none)
    }

    pub fn len(&self) -> usize {
        self.read().iter().flatten().count()
    }

    pub fn get(&self, index: StationIndex) -> Option<StationState> {
        self.read()[index.as_usize()].clone()
    }

    /// Replaces the entry for the candidate's index if it differs.
    ///
    /// Returns `true` when the candidate was accepted as a change. A missing
    /// entry always counts as a change.
    pub fn apply(&self, candidate: &StationState) -> bool {
        let mut slots = self.write();
        let slot = &mut slots[candidate.index.as_usize()];
        match slot {
            Some(current) if current.same_state(candidate) => false,
            _ => {
                *slot = Some(candidate.clone());
                true
            }
        }
    }

    /// Runs change detection over one batch and returns its changed set, in
    /// batch order.
    pub fn detect_changes<I>(&self, candidates: I) -> Vec<StationState>
    where
        I: IntoIterator<Item = StationState>,
    {
        candidates
            .into_iter()
            .filter(|candidate| {
                let changed = self.apply(candidate);
                if !changed {
                    tracing::debug!(index = %candidate.index, "station unchanged, skipping");
                }
                changed
            })
            .collect()
    }

    /// Fills empty slots from previously persisted states.
    ///
    /// Slots that already hold live state are left alone. Returns how many
    /// slots were filled.
    pub fn populate<I>(&self, states: I) -> usize
    where
        I: IntoIterator<Item = StationState>,
    {
        let mut slots = self.write();
        let mut filled = 0;
        for state in states {
            let slot = &mut slots[state.index.as_usize()];
            if slot.is_none() {
                *slot = Some(state);
                filled += 1;
            }
        }
        filled
    }

    /// Every known station, ordered by index.
    pub fn snapshot(&self) -> Vec<StationState> {
        self.read().iter().flatten().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn state(index: i64, occupied: bool) -> StationState {
        StationState::new(
            StationIndex::new(index).unwrap(),
            occupied,
            false,
            1,
            index,
            Utc::now(),
        )
    }

    #[test]
    fn test_first_report_is_a_change() {
        let store = SnapshotStore::new();
        assert!(store.is_empty());
        assert!(store.apply(&state(5, true)));
        assert_eq!(store.len(), 1);
        assert!(store.get(StationIndex::new(5).unwrap()).unwrap().occupied);
    }

    #[test]
    fn test_identical_report_is_not_a_change() {
        let store = SnapshotStore::new();
        assert!(store.apply(&state(5, true)));
        // Same fields, later timestamp.
        assert!(!store.apply(&state(5, true)));
        assert!(store.apply(&state(5, false)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_unchanged_report_keeps_original_timestamp() {
        let store = SnapshotStore::new();
        let first = state(8, true);
        store.apply(&first);
        store.apply(&state(8, true));
        let held = store.get(StationIndex::new(8).unwrap()).unwrap();
        assert_eq!(held.updated_at, first.updated_at);
    }

    #[test]
    fn test_detect_changes_returns_only_changed() {
        let store = SnapshotStore::new();
        store.apply(&state(1, true));

        let changed = store.detect_changes(vec![state(1, true), state(2, true), state(3, false)]);
        let indices: Vec<u8> = changed.iter().map(|s| s.index.get()).collect();
        assert_eq!(indices, vec![2, 3]);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_snapshot_is_ordered_by_index() {
        let store = SnapshotStore::new();
        store.detect_changes(vec![state(30, true), state(0, true), state(12, false)]);
        let indices: Vec<u8> = store.snapshot().iter().map(|s| s.index.get()).collect();
        assert_eq!(indices, vec![0, 12, 30]);
    }

    #[test]
    fn test_populate_never_overwrites_live_state() {
        let store = SnapshotStore::new();
        store.apply(&state(4, true));

        let filled = store.populate(vec![state(4, false), state(6, false)]);
        assert_eq!(filled, 1);
        assert!(store.get(StationIndex::new(4).unwrap()).unwrap().occupied);
        assert!(store.get(StationIndex::new(6).unwrap()).is_some());
    }

    #[test]
    fn test_store_is_bounded() {
        let store = SnapshotStore::new();
        let all: Vec<StationState> = StationIndex::all()
            .map(|index| state(i64::from(index.get()), true))
            .collect();
        store.detect_changes(all.clone());
        store.detect_changes(all);
        assert_eq!(store.len(), STATION_COUNT as usize);
    }
}
