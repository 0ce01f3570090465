//! Per-item and aggregate load states observed by consumers.

use std::sync::Arc;

use crate::error::SourceError;

/// The state of a single position in a paging snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemState<T> {
    /// The position is materialized.
    Loaded(T),
    /// The position is not materialized; accessing it drives loading.
    Loading,
}

impl<T> ItemState<T> {
    /// Whether the item is materialized.
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }

    /// The materialized value, if any.
    pub fn loaded(self) -> Option<T> {
        match self {
            Self::Loaded(value) => Some(value),
            Self::Loading => None,
        }
    }
}

/// Aggregate background-load state of a paging component.
///
/// Error equality compares the triggering key plus `Arc` identity of the
/// cause, so equality-based deduplication at consumer boundaries behaves
/// without requiring causes themselves to be comparable.
#[derive(Debug, Clone)]
pub enum LoadState {
    /// No loader is running, or the last run completed without error.
    Success,
    /// At least one loader is in flight.
    Loading,
    /// The most recent terminal failure.
    Error {
        /// The position whose load failed; the natural retry target.
        key: i64,
        /// The source failure that terminated the load.
        error: Arc<SourceError>,
    },
}

impl LoadState {
    /// Whether this is the success state.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Whether a loader is in flight.
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    /// Whether the last load terminated with an error.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// The position that triggered the failed load, if any.
    pub fn error_key(&self) -> Option<i64> {
        match self {
            Self::Error { key, .. } => Some(*key),
            _ => None,
        }
    }
}

impl PartialEq for LoadState {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Success, Self::Success) | (Self::Loading, Self::Loading) => true,
            (
                Self::Error { key: a, error: ea },
                Self::Error { key: b, error: eb },
            ) => a == b && Arc::ptr_eq(ea, eb),
            _ => false,
        }
    }
}

impl Eq for LoadState {}

/// Load state of a single chunk-aligned subscription range.
#[derive(Debug, Clone)]
pub enum RangeLoadState {
    /// The subscription is open but has not delivered values yet.
    Loading,
    /// The subscription delivered at least one portion.
    Success,
    /// The subscription's stream failed.
    Error {
        /// First position of the failed range.
        key: i64,
        /// The source failure.
        error: Arc<SourceError>,
    },
}

impl RangeLoadState {
    /// Whether the subscription is still waiting for its first portion.
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    /// Whether the subscription's stream failed.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}
