//! Local-cache-over-remote coordination.
//!
//! [`PagingMediator`] serves each requested range from the local cache
//! first, computes which sub-ranges are still missing, fetches them from
//! the remote source with bounded parallelism, reconciles total-size
//! disagreement by clearing and refetching once, and persists the merged
//! result back into the cache. Each query value gets its own embedded
//! [`Pager`] driving these loads.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::try_join_all;
use futures::{stream, StreamExt};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, trace};

use pagestream_core::{
    never_stale, ConfigError, DataPortion, LocalSource, MediatorConfig, PagedSource, PageRange,
    PortionStream, RemoteSource, SourceError, StalePredicate,
};
use pagestream_engine::{Pager, PagerSubscription};

use crate::missing::compute_missing;

/// Coordinator layering a local cache source in front of a remote source.
pub struct PagingMediator<T, Q> {
    context: LoadContext<T, Q>,
}

impl<T, Q> PagingMediator<T, Q>
where
    T: Clone + Send + Sync + 'static,
    Q: Clone + Send + Sync + 'static,
{
    /// Create a mediator. Fails fast on invalid configuration.
    ///
    /// The staleness predicate defaults to "never stale"; install one with
    /// [`with_stale_predicate`](Self::with_stale_predicate).
    pub fn new(
        config: MediatorConfig,
        local: Arc<dyn LocalSource<T, Q>>,
        remote: Arc<dyn RemoteSource<T, Q>>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            context: LoadContext {
                config,
                is_record_stale: never_stale(),
                local,
                remote,
            },
        })
    }

    /// Replace the staleness predicate.
    ///
    /// Stale cache hits are omitted from local emissions and treated as
    /// missing, which routes them to the remote source.
    pub fn with_stale_predicate(mut self, predicate: StalePredicate<T>) -> Self {
        self.context.is_record_stale = predicate;
        self
    }

    /// Start a paging subscription for `query`.
    ///
    /// Every query value owns a freshly constructed pager; nothing is
    /// shared across queries. Dropping the subscription cancels all of its
    /// background work, including in-flight remote fetches.
    pub fn flow(&self, query: Q) -> Result<PagerSubscription<T>, ConfigError> {
        let source = MediatorSource {
            context: self.context.clone(),
            query,
        };
        let pager = Pager::new(self.context.config.pager_config(), Arc::new(source))?;
        Ok(pager.subscribe())
    }

    /// One cold load of `size` positions starting at `position` for `query`.
    ///
    /// This is the stream the embedded pager consumes; it is exposed for
    /// callers that want the local-then-remote pipeline without windowed
    /// paging on top.
    pub fn load_portion(&self, query: Q, position: i64, size: i64) -> PortionStream<T> {
        let context = self.context.clone();
        spawned_portions(move |tx| produce(context, query, position, size, tx))
    }
}

/// The pull source backing one query's embedded pager.
struct MediatorSource<T, Q> {
    context: LoadContext<T, Q>,
    query: Q,
}

impl<T, Q> PagedSource<T> for MediatorSource<T, Q>
where
    T: Clone + Send + Sync + 'static,
    Q: Clone + Send + Sync + 'static,
{
    fn read_data(&self, position: i64, size: i64) -> PortionStream<T> {
        let context = self.context.clone();
        let query = self.query.clone();
        spawned_portions(move |tx| produce(context, query, position, size, tx))
    }
}

struct LoadContext<T, Q> {
    config: MediatorConfig,
    is_record_stale: StalePredicate<T>,
    local: Arc<dyn LocalSource<T, Q>>,
    remote: Arc<dyn RemoteSource<T, Q>>,
}

impl<T, Q> Clone for LoadContext<T, Q> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            is_record_stale: self.is_record_stale.clone(),
            local: self.local.clone(),
            remote: self.remote.clone(),
        }
    }
}

type PortionSender<T> = mpsc::Sender<Result<DataPortion<T>, SourceError>>;

/// Why a load pipeline stopped early.
enum LoadAbort {
    /// A source failed; surfaced to the consumer as a stream error.
    Source(SourceError),
    /// The consumer dropped the stream; stop silently.
    ConsumerGone,
}

impl From<SourceError> for LoadAbort {
    fn from(error: SourceError) -> Self {
        Self::Source(error)
    }
}

/// A cold stream backed by a producer task spawned on first poll.
///
/// Dropping the stream closes the channel; the producer observes the next
/// failed send and stops, which is what cancels in-flight sibling fetches.
fn spawned_portions<T, F, Fut>(producer: F) -> PortionStream<T>
where
    T: Send + 'static,
    F: FnOnce(PortionSender<T>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Box::pin(
        stream::once(async move {
            let (tx, rx) = mpsc::channel(8);
            tokio::spawn(producer(tx));
            stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            })
        })
        .flatten(),
    )
}

async fn produce<T, Q>(
    context: LoadContext<T, Q>,
    query: Q,
    position: i64,
    size: i64,
    tx: PortionSender<T>,
) where
    T: Clone + Send + Sync + 'static,
    Q: Clone + Send + Sync + 'static,
{
    match drive(&context, &query, position, size, &tx).await {
        Ok(()) | Err(LoadAbort::ConsumerGone) => {}
        Err(LoadAbort::Source(error)) => {
            let _ = tx.send(Err(error)).await;
        }
    }
}

async fn emit<T>(tx: &PortionSender<T>, portion: DataPortion<T>) -> Result<(), LoadAbort> {
    tx.send(Ok(portion))
        .await
        .map_err(|_| LoadAbort::ConsumerGone)
}

/// The local-then-remote pipeline for one requested range.
async fn drive<T, Q>(
    context: &LoadContext<T, Q>,
    query: &Q,
    position: i64,
    size: i64,
    tx: &PortionSender<T>,
) -> Result<(), LoadAbort>
where
    T: Clone + Send + Sync + 'static,
    Q: Clone + Send + Sync + 'static,
{
    let requested = PageRange::new(position, position + size - 1);

    let local_portion = context
        .local
        .read(position, size, query)
        .await
        .map_err(|e| SourceError::with_context("local read", e))?;
    let local_total = local_portion.total_size;

    let fresh: BTreeMap<i64, T> = local_portion
        .values
        .iter()
        .filter(|(_, v)| !(context.is_record_stale)(v))
        .map(|(k, v)| (*k, v.clone()))
        .collect();
    let filtered = DataPortion::new(local_total, fresh);
    trace!(
        range = %requested,
        hits = local_portion.len(),
        fresh = filtered.len(),
        "local read"
    );

    if context.config.emit_outdated_records {
        emit(tx, local_portion).await?;
    } else {
        emit(tx, filtered.clone()).await?;
    }

    // Stale entries were dropped from `filtered`, so they count as missing.
    let gaps = compute_missing(requested, &filtered.values);
    if gaps.is_empty() {
        return Ok(());
    }
    let mut ranges = if context.config.fetch_full_range_on_miss {
        vec![requested]
    } else {
        gaps
    };

    let mut refetched = false;
    loop {
        let portions = fetch_ranges(context, query, &ranges, tx).await?;

        let mut totals: Vec<i64> = portions.iter().map(|p| p.total_size).collect();
        totals.sort_unstable();
        totals.dedup();
        // The original local total participates in the check on both
        // attempts; after a clear the store reports 0 and would mask a
        // second disagreement.
        let inconsistent =
            totals.len() > 1 || (local_total != 0 && totals.first() != Some(&local_total));

        if inconsistent && !refetched {
            debug!(local_total, remote_totals = ?totals, "total size mismatch, refetching");
            if local_total != 0 {
                context
                    .local
                    .clear()
                    .await
                    .map_err(|e| SourceError::with_context("local clear", e))?;
            }
            refetched = true;
            ranges = vec![requested];
            continue;
        }

        // Merge the fresh local hits with everything fetched, persist, and
        // close the stream with the final portion.
        let mut merged = filtered;
        for portion in portions {
            merged.merge_from(portion);
        }
        context
            .local
            .save(&merged)
            .await
            .map_err(|e| SourceError::with_context("local save", e))?;
        emit(tx, merged).await?;
        return Ok(());
    }
}

/// Fetch the missing ranges, serially or with bounded parallelism.
///
/// Intermediate emissions happen only in serial mode; parallel fetches
/// collect everything first. A parallel failure cancels the in-flight
/// siblings.
async fn fetch_ranges<T, Q>(
    context: &LoadContext<T, Q>,
    query: &Q,
    ranges: &[PageRange],
    tx: &PortionSender<T>,
) -> Result<Vec<DataPortion<T>>, LoadAbort>
where
    T: Clone + Send + Sync + 'static,
    Q: Clone + Send + Sync + 'static,
{
    let serial = context.config.concurrency == 1 || ranges.len() == 1;
    if serial {
        let mut portions = Vec::with_capacity(ranges.len());
        for range in ranges {
            let portion = context
                .remote
                .fetch(range.first, range.width(), query)
                .await
                .map_err(|e| SourceError::with_context("remote fetch", e))?;
            if context.config.emit_intermediate_results {
                emit(tx, portion.clone()).await?;
            }
            portions.push(portion);
        }
        return Ok(portions);
    }

    let semaphore = Arc::new(Semaphore::new(context.config.concurrency));
    let fetches = ranges.iter().map(|range| {
        let semaphore = semaphore.clone();
        let remote = context.remote.clone();
        let query = query.clone();
        let range = *range;
        async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| SourceError::msg("fetch semaphore closed"))?;
            remote
                .fetch(range.first, range.width(), &query)
                .await
                .map_err(|e| SourceError::with_context("remote fetch", e))
        }
    });
    let portions = try_join_all(fetches).await?;
    Ok(portions)
}
