//! pagestream-core - Data model for the pagestream paging engine
//!
//! This crate provides the building blocks shared by every pagestream
//! component:
//! - Closed-range algebra for window planning and chunk alignment
//! - The paging snapshot consumers observe, with per-item and aggregate
//!   load states
//! - The data-source contracts implementations plug into (pull, cache,
//!   remote, push)
//! - Component configuration with fail-fast validation
//!
//! The reactive components themselves live in `pagestream-engine`
//! (pull/push pagers) and `pagestream-mediator` (local+remote
//! coordination).
//!
//! ## Example
//!
//! ```
//! use pagestream_core::{DataPortion, PageRange};
//! use std::collections::BTreeMap;
//!
//! // Range algebra drives window planning.
//! let window = PageRange::new(0, 99);
//! let loaded = PageRange::new(20, 39);
//! let gaps = window.subtract(Some(loaded));
//! assert_eq!(gaps, vec![PageRange::new(0, 19), PageRange::new(40, 99)]);
//!
//! // Sources exchange sparse positional portions.
//! let portion = DataPortion::new(1000, BTreeMap::from([(20, "row")]));
//! assert_eq!(portion.values[&20], "row");
//! ```

pub mod config;
pub mod error;
pub mod portion;
pub mod range;
pub mod snapshot;
pub mod source;
pub mod state;

pub use config::{
    never_stale, MediatorConfig, PagerConfig, StalePredicate, StreamingPagerConfig,
};
pub use error::{ConfigError, SourceError};
pub use portion::DataPortion;
pub use range::{aligned_chunk_containing, aligned_chunk_start, distance_beyond, PageRange};
pub use snapshot::{AccessHook, PagingSnapshot, NO_KEY};
pub use source::{
    LocalSource, PagedSource, PortionStream, RemoteSource, StreamingSource, TotalStream,
    ValuesStream,
};
pub use state::{ItemState, LoadState, RangeLoadState};
