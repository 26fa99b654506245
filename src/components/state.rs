use std::collections::VecDeque;

use log::{debug, info};

use crate::canvas::Color;
use crate::error::{EngineError, Result};
use crate::io::{self, LoadOutcome, RegionMap, SaveOutcome, StateStore, StoredState};

/// Undo/redo snapshots kept per drawing.
pub const HISTORY_CAPACITY: usize = 20;
/// Stored state older than this is discarded on load.
pub const STATE_TTL_MS: i64 = 7 * 24 * 60 * 60 * 1000;
/// Largest serialized record accepted for load or save.
pub const MAX_STATE_BYTES: usize = 5 * 1024 * 1024;

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Drawing ids become storage keys and file names, so keep them plain.
pub fn validate_drawing_id(drawing_id: &str) -> Result<()> {
    let ok = !drawing_id.is_empty()
        && drawing_id.len() <= 128
        && !drawing_id.starts_with('.')
        && drawing_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(EngineError::InvalidDrawingId(drawing_id.to_string()))
    }
}

// ============================================================================
// COLORING STATE - region map with snapshot undo/redo
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct ColoringState {
    regions: RegionMap,
    undo_stack: VecDeque<RegionMap>,
    redo_stack: VecDeque<RegionMap>,
    capacity: usize,
}

impl Default for ColoringState {
    fn default() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }
}

impl ColoringState {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            regions: RegionMap::new(),
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn push_bounded(stack: &mut VecDeque<RegionMap>, snapshot: RegionMap, capacity: usize) {
        stack.push_back(snapshot);
        while stack.len() > capacity {
            stack.pop_front();
        }
    }

    pub fn set_region_color(&mut self, region_id: &str, color: Color) {
        Self::push_bounded(&mut self.undo_stack, self.regions.clone(), self.capacity);
        self.redo_stack.clear();
        self.regions.insert(region_id.to_string(), color.to_hex());
    }

    pub fn undo(&mut self) -> bool {
        let Some(previous) = self.undo_stack.pop_back() else {
            return false;
        };
        let current = std::mem::replace(&mut self.regions, previous);
        Self::push_bounded(&mut self.redo_stack, current, self.capacity);
        true
    }

    pub fn redo(&mut self) -> bool {
        let Some(next) = self.redo_stack.pop_back() else {
            return false;
        };
        let current = std::mem::replace(&mut self.regions, next);
        Self::push_bounded(&mut self.undo_stack, current, self.capacity);
        true
    }

    pub fn clear(&mut self) {
        self.regions.clear();
        self.undo_stack.clear();
        self.redo_stack.clear();
    }

    pub fn color_of(&self, region_id: &str) -> Option<&str> {
        self.regions.get(region_id).map(String::as_str)
    }

    pub fn regions(&self) -> &RegionMap {
        &self.regions
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn to_record(&self, timestamp: i64) -> StoredState {
        StoredState::new(
            self.regions.clone(),
            self.undo_stack.iter().cloned().collect(),
            self.redo_stack.iter().cloned().collect(),
            timestamp,
        )
    }

    /// Rebuild from a stored record, keeping the newest `capacity` snapshots.
    pub fn from_record(record: StoredState, capacity: usize) -> Self {
        let mut state = Self::with_capacity(capacity);
        state.regions = record.regions;
        for snap in record.undo_stack {
            Self::push_bounded(&mut state.undo_stack, snap, state.capacity);
        }
        for snap in record.redo_stack {
            Self::push_bounded(&mut state.redo_stack, snap, state.capacity);
        }
        state
    }
}

// ============================================================================
// STATE MANAGER - persistence around ColoringState
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoragePolicy {
    pub ttl_ms: i64,
    pub max_bytes: usize,
    pub history_capacity: usize,
}

impl Default for StoragePolicy {
    fn default() -> Self {
        Self {
            ttl_ms: STATE_TTL_MS,
            max_bytes: MAX_STATE_BYTES,
            history_capacity: HISTORY_CAPACITY,
        }
    }
}

/// Owns the coloring state of one drawing and writes it through to `S` after
/// every mutation. Storage trouble is logged, never returned.
pub struct StateManager<S: StateStore> {
    drawing_id: String,
    key: String,
    state: ColoringState,
    store: S,
    policy: StoragePolicy,
    clock: fn() -> i64,
    load_outcome: LoadOutcome,
    last_save: Option<SaveOutcome>,
}

impl<S: StateStore> StateManager<S> {
    pub fn open(drawing_id: &str, store: S, policy: StoragePolicy) -> Result<Self> {
        Self::open_with_clock(drawing_id, store, policy, now_ms)
    }

    /// Like [`StateManager::open`] with an explicit time source in ms.
    pub fn open_with_clock(
        drawing_id: &str,
        mut store: S,
        policy: StoragePolicy,
        clock: fn() -> i64,
    ) -> Result<Self> {
        validate_drawing_id(drawing_id)?;
        let key = io::storage_key(drawing_id);
        let load_outcome = io::load_record(&mut store, &key, clock(), policy.ttl_ms, policy.max_bytes);
        let state = match &load_outcome {
            LoadOutcome::Loaded(record) => {
                info!("state: restored {} ({} regions)", drawing_id, record.regions.len());
                ColoringState::from_record(record.clone(), policy.history_capacity)
            }
            _ => ColoringState::with_capacity(policy.history_capacity),
        };
        Ok(Self {
            drawing_id: drawing_id.to_string(),
            key,
            state,
            store,
            policy,
            clock,
            load_outcome,
            last_save: None,
        })
    }

    pub fn drawing_id(&self) -> &str {
        &self.drawing_id
    }

    pub fn state(&self) -> &ColoringState {
        &self.state
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn load_outcome(&self) -> &LoadOutcome {
        &self.load_outcome
    }

    pub fn last_save(&self) -> Option<SaveOutcome> {
        self.last_save
    }

    fn persist(&mut self) {
        let record = self.state.to_record((self.clock)());
        let outcome = io::save_record(&mut self.store, &self.key, &record, self.policy.max_bytes);
        debug!("state: saved {} ({:?})", self.key, outcome);
        self.last_save = Some(outcome);
    }

    pub fn set_region_color(&mut self, region_id: &str, color: Color) {
        self.state.set_region_color(region_id, color);
        self.persist();
    }

    pub fn undo(&mut self) -> bool {
        let changed = self.state.undo();
        if changed {
            self.persist();
        }
        changed
    }

    pub fn redo(&mut self) -> bool {
        let changed = self.state.redo();
        if changed {
            self.persist();
        }
        changed
    }

    pub fn clear(&mut self) {
        self.state.clear();
        self.persist();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryStore;
    use pretty_assertions::assert_eq;

    const RED: Color = Color::rgb(255, 0, 0);
    const GREEN: Color = Color::rgb(0, 255, 0);

    fn fixed_clock() -> i64 {
        1_700_000_000_000
    }

    #[test]
    fn undo_restores_prior_map() {
        let mut state = ColoringState::default();
        state.set_region_color("r1", RED);
        let before = state.regions().clone();
        state.set_region_color("r1", GREEN);
        assert!(state.undo());
        assert_eq!(state.regions(), &before);
        assert_eq!(state.color_of("r1"), Some("#FF0000"));
        assert!(state.redo());
        assert_eq!(state.color_of("r1"), Some("#00FF00"));
    }

    #[test]
    fn undo_on_empty_is_false() {
        let mut state = ColoringState::default();
        assert!(!state.undo());
        assert!(!state.redo());
    }

    #[test]
    fn new_color_invalidates_redo() {
        let mut state = ColoringState::default();
        state.set_region_color("a", RED);
        state.undo();
        assert!(state.can_redo());
        state.set_region_color("b", GREEN);
        assert!(!state.redo());
    }

    #[test]
    fn stacks_are_bounded() {
        let mut state = ColoringState::default();
        for i in 0..50u8 {
            state.set_region_color("r", Color::rgb(i, 0, 0));
            assert!(state.undo_len() <= HISTORY_CAPACITY);
        }
        assert_eq!(state.undo_len(), HISTORY_CAPACITY);
        while state.undo() {}
        assert_eq!(state.redo_len(), HISTORY_CAPACITY);
        // Oldest snapshot kept is the map after the 29th set
        assert_eq!(state.color_of("r"), Some("#1D0000"));
    }

    #[test]
    fn clear_empties_everything() {
        let mut state = ColoringState::default();
        state.set_region_color("a", RED);
        state.clear();
        assert!(state.regions().is_empty());
        assert!(!state.can_undo() && !state.can_redo());
    }

    #[test]
    fn drawing_ids_are_checked() {
        assert!(validate_drawing_id("cat_01.v2").is_ok());
        for bad in ["", " ", "../etc", ".hidden", "a/b", "a b"] {
            assert!(validate_drawing_id(bad).is_err(), "{bad:?}");
        }
    }

    #[test]
    fn manager_persists_each_mutation() {
        let mut mgr =
            StateManager::open_with_clock("d1", MemoryStore::new(), StoragePolicy::default(), fixed_clock).unwrap();
        assert_eq!(mgr.load_outcome(), &LoadOutcome::Missing);
        mgr.set_region_color("r1", RED);
        assert_eq!(mgr.last_save(), Some(SaveOutcome::Saved));
        mgr.set_region_color("r1", GREEN);
        assert!(mgr.undo());

        let store = mgr.into_store();
        let reopened =
            StateManager::open_with_clock("d1", store, StoragePolicy::default(), fixed_clock).unwrap();
        assert_eq!(reopened.state().color_of("r1"), Some("#FF0000"));
        assert!(reopened.state().can_undo());
        assert!(reopened.state().can_redo());
    }

    #[test]
    fn failed_undo_does_not_write() {
        let mut mgr =
            StateManager::open_with_clock("d2", MemoryStore::new(), StoragePolicy::default(), fixed_clock).unwrap();
        assert!(!mgr.undo());
        assert_eq!(mgr.last_save(), None);
        assert!(mgr.store().is_empty());
    }

    #[test]
    fn storage_failure_is_swallowed() {
        let mut mgr = StateManager::open_with_clock(
            "d3",
            MemoryStore::with_quota(8),
            StoragePolicy::default(),
            fixed_clock,
        )
        .unwrap();
        mgr.set_region_color("r1", RED);
        assert_eq!(mgr.last_save(), Some(SaveOutcome::Failed));
        assert_eq!(mgr.state().color_of("r1"), Some("#FF0000"));
    }

    #[test]
    fn invalid_id_is_an_input_error() {
        let err = StateManager::open("", MemoryStore::new(), StoragePolicy::default())
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::InvalidDrawingId(_)));
    }
}
