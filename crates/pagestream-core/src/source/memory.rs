//! In-memory reference sources.
//!
//! These back the engine and mediator test suites and double as fixtures
//! for downstream consumers. They are deliberately simple: a slice-backed
//! dataset for the pull and remote contracts, and a map-backed store for
//! the cache contract.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream;
use parking_lot::Mutex;

use crate::error::SourceError;
use crate::portion::DataPortion;
use crate::source::{LocalSource, PagedSource, PortionStream, RemoteSource};

/// A pull source backed by a fixed in-memory slice.
///
/// `read_data` yields a single portion covering the requested range clamped
/// to the dataset, with `total_size` equal to the slice length.
pub struct SliceSource<T> {
    items: Arc<Vec<T>>,
}

impl<T> SliceSource<T> {
    /// Create a source over the given items.
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items: Arc::new(items),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> PagedSource<T> for SliceSource<T> {
    fn read_data(&self, position: i64, size: i64) -> PortionStream<T> {
        let items = self.items.clone();
        Box::pin(stream::once(async move {
            Ok::<_, SourceError>(slice_portion(&items, position, size))
        }))
    }
}

/// A remote source backed by a fixed in-memory slice.
pub struct SliceRemoteSource<T, Q> {
    items: Arc<Vec<T>>,
    _query: PhantomData<fn(Q)>,
}

impl<T, Q> SliceRemoteSource<T, Q> {
    /// Create a source over the given items.
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items: Arc::new(items),
            _query: PhantomData,
        }
    }
}

#[async_trait]
impl<T, Q> RemoteSource<T, Q> for SliceRemoteSource<T, Q>
where
    T: Clone + Send + Sync,
    Q: Send + Sync,
{
    async fn fetch(&self, start: i64, size: i64, _query: &Q) -> Result<DataPortion<T>, SourceError> {
        Ok(slice_portion(&self.items, start, size))
    }
}

/// A cache source backed by an in-memory map.
///
/// The store is query-agnostic: it serves whatever was saved regardless of
/// the query value, which is what a fixture wants.
pub struct MemoryLocalSource<T, Q> {
    store: Mutex<DataPortion<T>>,
    _query: PhantomData<fn(Q)>,
}

impl<T, Q> MemoryLocalSource<T, Q> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            store: Mutex::new(DataPortion::default()),
            _query: PhantomData,
        }
    }

    /// Create a store seeded with a portion.
    pub fn with_portion(portion: DataPortion<T>) -> Self {
        Self {
            store: Mutex::new(portion),
            _query: PhantomData,
        }
    }
}

impl<T, Q> Default for MemoryLocalSource<T, Q> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T, Q> LocalSource<T, Q> for MemoryLocalSource<T, Q>
where
    T: Clone + Send + Sync,
    Q: Send + Sync,
{
    async fn read(&self, start: i64, size: i64, _query: &Q) -> Result<DataPortion<T>, SourceError> {
        let store = self.store.lock();
        let values: BTreeMap<i64, T> = store
            .values
            .range(start..start + size.max(0))
            .map(|(k, v)| (*k, v.clone()))
            .collect();
        Ok(DataPortion::new(store.total_size, values))
    }

    async fn save(&self, portion: &DataPortion<T>) -> Result<(), SourceError> {
        let mut store = self.store.lock();
        store.merge_from(portion.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), SourceError> {
        *self.store.lock() = DataPortion::default();
        Ok(())
    }
}

fn slice_portion<T: Clone>(items: &[T], position: i64, size: i64) -> DataPortion<T> {
    let total = items.len() as i64;
    let first = position.clamp(0, total);
    let last = (position + size.max(0)).clamp(0, total);
    let values: BTreeMap<i64, T> = (first..last)
        .map(|k| (k, items[k as usize].clone()))
        .collect();
    DataPortion::new(total, values)
}
