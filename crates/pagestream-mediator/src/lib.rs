//! pagestream-mediator - Local+remote coordination
//!
//! [`PagingMediator`] layers a positional local cache in front of a
//! one-shot remote source:
//!
//! - Cached data is served first, stale records filtered by a pluggable
//!   predicate.
//! - Missing sub-ranges are computed per request and fetched remotely with
//!   bounded parallelism.
//! - When the remote's total disagrees with the cache, the cache is
//!   cleared and the range refetched once; a second disagreement is
//!   tolerated and simply emitted.
//! - The merged result is persisted back into the cache as the final
//!   emission of each load.
//!
//! Each query value owns an embedded `Pager` from `pagestream-engine`, so
//! consumers observe the same snapshot stream as with any other pager.
//!
//! ## Example
//!
//! ```ignore
//! use pagestream_core::source::memory::{MemoryLocalSource, SliceRemoteSource};
//! use pagestream_core::MediatorConfig;
//! use pagestream_mediator::PagingMediator;
//! use std::sync::Arc;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let local = Arc::new(MemoryLocalSource::new());
//! let remote = Arc::new(SliceRemoteSource::new((0..1000).collect::<Vec<i64>>()));
//! let mediator = PagingMediator::new(MediatorConfig::default(), local, remote)?;
//!
//! let subscription = mediator.flow("all-items".to_string())?;
//! let snapshot = subscription.latest();
//! snapshot.get(0); // drives the first local+remote load
//! # Ok(())
//! # }
//! ```

pub mod mediator;
pub mod missing;

pub use mediator::PagingMediator;
pub use missing::compute_missing;
