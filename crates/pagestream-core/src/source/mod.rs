//! Data-source contracts consumed by the paging components.
//!
//! Implementations live outside the engine: HTTP clients, database readers,
//! and live feeds all plug in through these traits. The [`memory`] module
//! ships in-memory reference implementations used throughout the test
//! suites and usable as fixtures by downstream consumers.

pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::SourceError;
use crate::portion::DataPortion;

/// A cold stream of data portions produced by one fetch.
pub type PortionStream<T> = BoxStream<'static, Result<DataPortion<T>, SourceError>>;

/// A hot stream of position→value maps for one subscribed range.
pub type ValuesStream<T> = BoxStream<'static, Result<BTreeMap<i64, T>, SourceError>>;

/// A hot stream of total-size updates.
pub type TotalStream = BoxStream<'static, Result<i64, SourceError>>;

/// Pull data source, consumed by the pull-based pager.
pub trait PagedSource<T>: Send + Sync {
    /// Read up to `size` items starting at `position`.
    ///
    /// The returned stream is cold: work starts when it is polled. It may
    /// yield one or more partial portions as the range materializes, then
    /// completes. Keys are absolute positions; each portion's `total_size`
    /// is authoritative and may change across portions. An error terminates
    /// the stream.
    fn read_data(&self, position: i64, size: i64) -> PortionStream<T>;
}

/// Positional cache source, consumed by the paging mediator.
#[async_trait]
pub trait LocalSource<T, Q>: Send + Sync {
    /// Read up to `size` items starting at `start` for `query`.
    ///
    /// The result may be sparse; absent positions are omitted from the
    /// portion's values. A `total_size` of 0 means the total is unknown.
    async fn read(&self, start: i64, size: i64, query: &Q) -> Result<DataPortion<T>, SourceError>;

    /// Merge a portion into storage, overwriting on conflicts and updating
    /// the stored total.
    async fn save(&self, portion: &DataPortion<T>) -> Result<(), SourceError>;

    /// Remove all cached data and the stored total.
    async fn clear(&self) -> Result<(), SourceError>;
}

/// One-shot remote source, consumed by the paging mediator.
#[async_trait]
pub trait RemoteSource<T, Q>: Send + Sync {
    /// Fetch up to `size` items starting at `start` for `query`.
    async fn fetch(&self, start: i64, size: i64, query: &Q) -> Result<DataPortion<T>, SourceError>;
}

/// Push data source, consumed by the streaming pager.
///
/// Both streams are expected to be hot: they emit the current state on
/// subscription and live updates afterwards. The portion stream carries
/// values only (no total) and may re-emit previously delivered positions,
/// which are treated as replacements.
pub trait StreamingSource<T>: Send + Sync {
    /// Subscribe to the dataset's total item count.
    fn read_total(&self) -> TotalStream;

    /// Subscribe to values for `size` positions starting at `start`.
    fn read_portion(&self, start: i64, size: i64) -> ValuesStream<T>;
}
