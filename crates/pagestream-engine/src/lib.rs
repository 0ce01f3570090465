//! pagestream-engine - Reactive windowed loaders
//!
//! This crate provides the two paging components that sit between a
//! position-addressed consumer and a slower data source:
//!
//! - [`Pager`]: pull-based. Consumer accesses feed a debounced planner that
//!   fetches contiguous chunks around the access position, supersedes the
//!   in-flight load when the position jumps away, and evicts values outside
//!   a bounded cache window.
//! - [`StreamingPager`]: push-based. Maintains chunk-aligned live
//!   subscriptions around the access position plus a total-size side
//!   channel, opening and closing subscriptions as the window shifts.
//!
//! Both expose a single output: a latest-value stream of immutable
//! [`PagingSnapshot`](pagestream_core::PagingSnapshot)s. Reading a position
//! through a snapshot is what drives loading.
//!
//! ## Example
//!
//! ```ignore
//! use pagestream_core::{ItemState, PagerConfig};
//! use pagestream_core::source::memory::SliceSource;
//! use pagestream_engine::Pager;
//! use std::sync::Arc;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let source = Arc::new(SliceSource::new((0..1000).collect::<Vec<i64>>()));
//! let pager = Pager::new(PagerConfig::default(), source)?;
//! let subscription = pager.subscribe();
//!
//! let mut snapshots = subscription.snapshots();
//! // Reading position 500 schedules loading around it.
//! assert_eq!(snapshots.borrow().get(500), ItemState::Loading);
//! snapshots.changed().await?;
//! # Ok(())
//! # }
//! ```

pub mod pager;
pub mod signal;
pub mod streaming;

pub use pager::{Pager, PagerSubscription, ACCESS_DEBOUNCE};
pub use signal::AccessSignal;
pub use streaming::{StreamingPager, StreamingSubscription};
