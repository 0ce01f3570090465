//! The immutable paged view published to consumers.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::state::{ItemState, LoadState};

/// Callback fired when a consumer reads or retries a position.
pub type AccessHook = Arc<dyn Fn(i64) + Send + Sync>;

/// Sentinel returned by [`PagingSnapshot::first_key`] / [`last_key`]
/// when no position is materialized.
///
/// [`last_key`]: PagingSnapshot::last_key
pub const NO_KEY: i64 = -1;

/// An immutable view of the paged dataset at one instant.
///
/// Snapshots are values: every state change publishes a fresh snapshot and
/// never mutates an already-published one. Reading a position through
/// [`get`](Self::get) reports the access back to the owning component, which
/// is what drives background loading.
#[derive(Clone)]
pub struct PagingSnapshot<T> {
    total_size: i64,
    values: Arc<BTreeMap<i64, T>>,
    load_state: LoadState,
    on_access: AccessHook,
    on_retry: AccessHook,
}

impl<T> PagingSnapshot<T> {
    /// Build a snapshot with the given state and hooks.
    pub fn new(
        total_size: i64,
        values: Arc<BTreeMap<i64, T>>,
        load_state: LoadState,
        on_access: AccessHook,
        on_retry: AccessHook,
    ) -> Self {
        Self {
            total_size,
            values,
            load_state,
            on_access,
            on_retry,
        }
    }

    /// An empty successful snapshot with no-op hooks.
    ///
    /// Used as the channel seed before a component publishes its first real
    /// snapshot, and handy as a fixture in tests.
    pub fn detached() -> Self {
        Self {
            total_size: 0,
            values: Arc::new(BTreeMap::new()),
            load_state: LoadState::Success,
            on_access: Arc::new(|_| {}),
            on_retry: Arc::new(|_| {}),
        }
    }

    /// The current known total item count; 0 when unknown.
    pub fn total_size(&self) -> i64 {
        self.total_size
    }

    /// The aggregate background-load state.
    pub fn load_state(&self) -> &LoadState {
        &self.load_state
    }

    /// The materialized positions, sparse and ordered.
    pub fn values(&self) -> &BTreeMap<i64, T> {
        &self.values
    }

    /// Number of materialized positions.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the dataset itself is empty or of unknown size.
    pub fn is_empty(&self) -> bool {
        self.total_size == 0
    }

    /// Smallest materialized position, or [`NO_KEY`].
    pub fn first_key(&self) -> i64 {
        self.values.keys().next().copied().unwrap_or(NO_KEY)
    }

    /// Largest materialized position, or [`NO_KEY`].
    pub fn last_key(&self) -> i64 {
        self.values.keys().next_back().copied().unwrap_or(NO_KEY)
    }

    /// Ask the owning component to re-plan loading around `position`.
    pub fn retry(&self, position: i64) {
        (self.on_retry)(position);
    }
}

impl<T: Clone> PagingSnapshot<T> {
    /// Read the item at `position`, reporting the access to the component.
    ///
    /// Returns [`ItemState::Loading`] for any non-materialized position,
    /// including positions past the known total; the total is the sole
    /// source of truth for existence.
    pub fn get(&self, position: i64) -> ItemState<T> {
        (self.on_access)(position);
        match self.values.get(&position) {
            Some(value) => ItemState::Loaded(value.clone()),
            None => ItemState::Loading,
        }
    }

    /// Transform materialized values into a new snapshot.
    ///
    /// Total size, load state, and both hooks are preserved.
    pub fn map<U>(&self, f: impl Fn(&T) -> U) -> PagingSnapshot<U> {
        PagingSnapshot {
            total_size: self.total_size,
            values: Arc::new(self.values.iter().map(|(k, v)| (*k, f(v))).collect()),
            load_state: self.load_state.clone(),
            on_access: self.on_access.clone(),
            on_retry: self.on_retry.clone(),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for PagingSnapshot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagingSnapshot")
            .field("total_size", &self.total_size)
            .field("values", &self.values)
            .field("load_state", &self.load_state)
            .finish_non_exhaustive()
    }
}

impl<T: PartialEq> PartialEq for PagingSnapshot<T> {
    fn eq(&self, other: &Self) -> bool {
        self.total_size == other.total_size
            && self.load_state == other.load_state
            && self.values == other.values
    }
}
