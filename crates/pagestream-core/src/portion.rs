//! The unit of data exchange between sources and the paging engine.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One fetch result from a data source.
///
/// `values` maps absolute positions to items; absent positions are simply
/// omitted, so a portion may be sparse. `total_size` is the source's current
/// item count for the whole dataset, with `0` meaning "unknown". The keys
/// stay ordered (`BTreeMap`) because window and run computations walk them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPortion<T> {
    /// The source's current total item count; 0 when unknown.
    pub total_size: i64,
    /// Sparse mapping from absolute position to item.
    pub values: BTreeMap<i64, T>,
}

impl<T> DataPortion<T> {
    /// Create a portion from a total and a position map.
    pub fn new(total_size: i64, values: BTreeMap<i64, T>) -> Self {
        Self { total_size, values }
    }

    /// Create a portion carrying a total but no values.
    pub fn empty(total_size: i64) -> Self {
        Self {
            total_size,
            values: BTreeMap::new(),
        }
    }

    /// Whether the portion carries no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of materialized positions in the portion.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Fold `other` into this portion, overwriting on position conflicts
    /// and adopting `other`'s total.
    pub fn merge_from(&mut self, other: DataPortion<T>) {
        self.total_size = other.total_size;
        self.values.extend(other.values);
    }
}

impl<T> Default for DataPortion<T> {
    fn default() -> Self {
        Self::empty(0)
    }
}

impl<T> FromIterator<(i64, T)> for DataPortion<T> {
    fn from_iter<I: IntoIterator<Item = (i64, T)>>(iter: I) -> Self {
        Self {
            total_size: 0,
            values: iter.into_iter().collect(),
        }
    }
}
