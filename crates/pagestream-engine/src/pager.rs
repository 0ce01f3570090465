//! The pull-based windowed loader.
//!
//! A [`Pager`] watches the access signal, plans which contiguous chunks to
//! fetch around the last accessed position, runs a single background loader
//! at a time (superseding it when the position jumps away), and maintains a
//! bounded positional cache. Consumers observe the result as a stream of
//! immutable [`PagingSnapshot`]s.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use pagestream_core::{
    AccessHook, ConfigError, DataPortion, LoadState, PagedSource, PageRange, PagerConfig,
    PagingSnapshot,
};

use crate::signal::AccessSignal;

/// Debounce applied to access events before a plan runs.
pub const ACCESS_DEBOUNCE: Duration = Duration::from_millis(300);

/// Travel direction of the access position, relative to the previous read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Increasing,
    Decreasing,
}

/// On-demand windowed loader over a pull data source.
///
/// A `Pager` itself is inert configuration; [`subscribe`](Self::subscribe)
/// starts a fully independent subscription with its own state and
/// background tasks.
pub struct Pager<T> {
    config: PagerConfig,
    source: Arc<dyn PagedSource<T>>,
}

impl<T> Pager<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a pager over `source`. Fails fast on invalid configuration.
    pub fn new(config: PagerConfig, source: Arc<dyn PagedSource<T>>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config, source })
    }

    /// Start a subscription: spawn the scheduler and return the handle
    /// through which snapshots are observed.
    ///
    /// Dropping the returned subscription cancels the scheduler and any
    /// in-flight loader.
    pub fn subscribe(&self) -> PagerSubscription<T> {
        let (snapshot_tx, snapshot_rx) = watch::channel(PagingSnapshot::detached());
        let access = AccessSignal::new();

        let hook_signal = access.clone();
        let on_access: AccessHook = Arc::new(move |key| hook_signal.offer(key));
        // Retrying routes through the same signal as a plain access.
        let on_retry = on_access.clone();

        let shared = Arc::new(PagerShared {
            config: self.config.clone(),
            source: self.source.clone(),
            access,
            snapshot_tx,
            on_access,
            on_retry,
            state: Mutex::new(PagerState {
                values: BTreeMap::new(),
                total_size: 0,
                load_state: LoadState::Success,
                last_read_key: -1,
                generation: 0,
                current: None,
            }),
        });

        // Publish the initial empty snapshot with live hooks so the very
        // first observation can already drive loading.
        shared.publish(&shared.state.lock());

        let scheduler = tokio::spawn(run_scheduler(shared.clone()));

        PagerSubscription {
            snapshots: snapshot_rx,
            scheduler,
            shared,
        }
    }
}

/// A live pager subscription.
///
/// All background work for the subscription is cancelled on drop.
pub struct PagerSubscription<T> {
    snapshots: watch::Receiver<PagingSnapshot<T>>,
    scheduler: JoinHandle<()>,
    shared: Arc<PagerShared<T>>,
}

impl<T> PagerSubscription<T> {
    /// A receiver over the snapshot stream. Receivers observe snapshots in
    /// publication order and may skip intermediates (latest-value channel).
    pub fn snapshots(&self) -> watch::Receiver<PagingSnapshot<T>> {
        self.snapshots.clone()
    }
}

impl<T: Clone> PagerSubscription<T> {
    /// The most recently published snapshot.
    pub fn latest(&self) -> PagingSnapshot<T> {
        self.snapshots.borrow().clone()
    }
}

impl<T> Drop for PagerSubscription<T> {
    fn drop(&mut self) {
        self.scheduler.abort();
        let mut state = self.shared.state.lock();
        // Invalidate any loader caught between await points.
        state.generation += 1;
        if let Some(current) = state.current.take() {
            current.handle.abort();
        }
    }
}

struct PagerShared<T> {
    config: PagerConfig,
    source: Arc<dyn PagedSource<T>>,
    access: AccessSignal,
    snapshot_tx: watch::Sender<PagingSnapshot<T>>,
    on_access: AccessHook,
    on_retry: AccessHook,
    state: Mutex<PagerState<T>>,
}

struct PagerState<T> {
    values: BTreeMap<i64, T>,
    total_size: i64,
    load_state: LoadState,
    /// Direction baseline: the previous stable access key, -1 before any.
    last_read_key: i64,
    /// Bumped whenever a loader is superseded or the subscription ends; a
    /// loader that observes a newer generation must not write back.
    generation: u64,
    current: Option<InFlightLoad>,
}

struct InFlightLoad {
    handle: JoinHandle<()>,
    planned: PageRange,
}

impl<T: Clone> PagerShared<T> {
    fn publish(&self, state: &PagerState<T>) {
        let snapshot = PagingSnapshot::new(
            state.total_size,
            Arc::new(state.values.clone()),
            state.load_state.clone(),
            self.on_access.clone(),
            self.on_retry.clone(),
        );
        let _ = self.snapshot_tx.send(snapshot);
    }
}

/// Drain the access signal with debounce and a distinct-until-changed
/// filter, dispatching a plan for every stable key.
async fn run_scheduler<T>(shared: Arc<PagerShared<T>>)
where
    T: Clone + Send + Sync + 'static,
{
    let mut access_rx = shared.access.subscribe();
    let mut last_planned: Option<i64> = None;
    loop {
        if access_rx.changed().await.is_err() {
            return;
        }
        // Debounce: restart the window whenever a newer key arrives.
        loop {
            tokio::select! {
                _ = tokio::time::sleep(ACCESS_DEBOUNCE) => break,
                changed = access_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
        let key = match *access_rx.borrow_and_update() {
            Some(key) if key >= 0 => key,
            _ => continue,
        };
        if last_planned == Some(key) {
            continue;
        }
        last_planned = Some(key);
        dispatch(&shared, key);
    }
}

/// Decide whether the stable key keeps, supersedes, or starts a loader.
fn dispatch<T>(shared: &Arc<PagerShared<T>>, key: i64)
where
    T: Clone + Send + Sync + 'static,
{
    let mut state = shared.state.lock();

    let direction = if state.last_read_key >= 0 && key < state.last_read_key {
        Direction::Decreasing
    } else {
        Direction::Increasing
    };
    state.last_read_key = key;

    if let Some(current) = &state.current {
        if !current.handle.is_finished() && current.planned.contains(key) {
            trace!(key, planned = %current.planned, "access inside planned range, keeping load");
            return;
        }
    }
    if let Some(current) = state.current.take() {
        if !current.handle.is_finished() {
            debug!(key, "superseding in-flight load");
            current.handle.abort();
        }
    }

    state.generation += 1;
    let generation = state.generation;
    let coerced = coerce_key(key, state.total_size);
    let planned = planned_range(&shared.config, state.total_size, coerced);

    let handle = tokio::spawn(run_loader(shared.clone(), key, direction, generation));
    state.current = Some(InFlightLoad { handle, planned });
}

/// One background load: plan, evict, then fetch chunk by chunk.
async fn run_loader<T>(
    shared: Arc<PagerShared<T>>,
    key: i64,
    direction: Direction,
    generation: u64,
) where
    T: Clone + Send + Sync + 'static,
{
    let queue = {
        let mut state = shared.state.lock();
        if state.generation != generation {
            return;
        }
        let coerced = coerce_key(key, state.total_size);
        let planned = planned_range(&shared.config, state.total_size, coerced);
        let data_range = loaded_run(&state.values);
        let queue = build_queue(&shared.config, planned, coerced, key, data_range, direction);

        evict_outside_window(&mut state.values, coerced, shared.config.cache_size);
        if !queue.is_empty() {
            state.load_state = LoadState::Loading;
        }
        shared.publish(&state);
        queue
    };
    trace!(key, ?direction, chunks = queue.len(), "fetch queue planned");

    for chunk in queue {
        let mut portions = shared.source.read_data(chunk.first, chunk.width());
        while let Some(next) = portions.next().await {
            match next {
                Ok(portion) => {
                    let mut state = shared.state.lock();
                    if state.generation != generation {
                        return;
                    }
                    apply_portion(&mut state, portion, shared.config.cache_size);
                    shared.publish(&state);
                }
                Err(error) => {
                    let mut state = shared.state.lock();
                    if state.generation != generation {
                        return;
                    }
                    warn!(key, chunk = %chunk, %error, "chunk load failed");
                    state.load_state = LoadState::Error {
                        key,
                        error: Arc::new(error),
                    };
                    state.current = None;
                    shared.publish(&state);
                    return;
                }
            }
        }
    }

    let mut state = shared.state.lock();
    if state.generation != generation {
        return;
    }
    state.load_state = LoadState::Success;
    state.current = None;
    shared.publish(&state);
}

/// Merge one portion into the cache, honoring the source's total.
fn apply_portion<T: Clone>(state: &mut PagerState<T>, portion: DataPortion<T>, cache_size: i64) {
    if portion.total_size != state.total_size {
        // The source's total is authoritative; the old map may index a
        // dataset that no longer exists in that shape.
        state.total_size = portion.total_size;
        state.values = portion.values;
    } else {
        state.values.extend(portion.values);
    }
    let center = coerce_key(state.last_read_key.max(0), state.total_size);
    evict_outside_window(&mut state.values, center, cache_size);
}

fn coerce_key(key: i64, total_size: i64) -> i64 {
    key.clamp(0, total_size.max(1) - 1)
}

/// The full range the loader intends to cover for an access at `coerced`.
fn planned_range(config: &PagerConfig, total_size: i64, coerced: i64) -> PageRange {
    if total_size > 0 {
        PageRange::new(coerced - config.preload_size, coerced + config.preload_size - 1)
            .coerce_in(PageRange::new(0, total_size - 1))
    } else {
        PageRange::new(0, config.load_size - 1)
    }
}

/// The longest contiguous run of loaded keys around the arithmetic mean of
/// all loaded keys.
///
/// Conservative: when the floor of the mean is not itself loaded, no run is
/// reported and the planner subtracts nothing. A sparse map may therefore
/// re-request loaded positions; merges are idempotent so this only costs a
/// redundant fetch.
fn loaded_run<T>(values: &BTreeMap<i64, T>) -> Option<PageRange> {
    if values.is_empty() {
        return None;
    }
    let sum: i64 = values.keys().sum();
    let mean = sum.div_euclid(values.len() as i64);
    if !values.contains_key(&mean) {
        return None;
    }
    let mut first = mean;
    let mut last = mean;
    while values.contains_key(&(first - 1)) {
        first -= 1;
    }
    while values.contains_key(&(last + 1)) {
        last += 1;
    }
    Some(PageRange::new(first, last))
}

fn evict_outside_window<T>(values: &mut BTreeMap<i64, T>, center: i64, cache_size: i64) {
    values.retain(|&k, _| (k - center).abs() <= cache_size);
}

/// Stretch a leftover edge piece to a full load so small fragments at the
/// window boundary amortize into one fetch.
fn extend_edge_piece(piece: PageRange, planned: PageRange, load_size: i64) -> PageRange {
    let mut piece = piece;
    if piece.first == planned.first && piece.width() < load_size {
        piece.first = (piece.last - load_size + 1).max(0);
    }
    if piece.last == planned.last && piece.width() < load_size {
        piece.last = piece.first + load_size - 1;
    }
    piece
}

/// Build the ordered fetch queue for one plan.
fn build_queue(
    config: &PagerConfig,
    planned: PageRange,
    coerced: i64,
    key: i64,
    data_range: Option<PageRange>,
    direction: Direction,
) -> Vec<PageRange> {
    if planned.is_empty() {
        return Vec::new();
    }
    let half = config.load_size / 2;
    let primary = PageRange::new(coerced - half, coerced - half + config.load_size - 1)
        .coerce_in(planned)
        .expand_to(config.load_size, planned.last);

    let mut prioritized: Vec<PageRange> = Vec::new();
    for piece in primary.subtract(data_range) {
        prioritized.extend(piece.chunked(config.load_size));
    }

    let chunks_of = |region: PageRange| -> Vec<PageRange> {
        let mut out = Vec::new();
        for piece in region.subtract(data_range) {
            let piece = extend_edge_piece(piece, planned, config.load_size);
            out.extend(piece.chunked(config.load_size));
        }
        out
    };
    let before_chunks = chunks_of(PageRange::new(planned.first, primary.first - 1));
    let after_chunks = chunks_of(PageRange::new(primary.last + 1, planned.last));

    let mut tail: Vec<PageRange> = match direction {
        Direction::Increasing => after_chunks.into_iter().chain(before_chunks).collect(),
        Direction::Decreasing => before_chunks.into_iter().chain(after_chunks).collect(),
    };
    // Nearest-first within the tail; the stable sort keeps the direction
    // preference on distance ties.
    tail.sort_by_key(|chunk| (chunk.first - key).abs());

    prioritized.extend(tail);
    prioritized
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PagerConfig {
        PagerConfig::default()
    }

    #[test]
    fn test_planned_range_known_total() {
        let planned = planned_range(&config(), 1000, 50);
        assert_eq!(planned, PageRange::new(0, 109));

        let planned = planned_range(&config(), 1000, 500);
        assert_eq!(planned, PageRange::new(440, 559));

        let planned = planned_range(&config(), 1000, 990);
        assert_eq!(planned, PageRange::new(930, 999));
    }

    #[test]
    fn test_planned_range_unknown_total() {
        assert_eq!(planned_range(&config(), 0, 0), PageRange::new(0, 19));
    }

    #[test]
    fn test_build_queue_cold_start_increasing() {
        let planned = planned_range(&config(), 1000, 50);
        let queue = build_queue(&config(), planned, 50, 50, None, Direction::Increasing);

        // Primary chunk first, then chunks nearest the key, with the travel
        // direction winning distance ties.
        assert_eq!(
            queue,
            vec![
                PageRange::new(40, 59),
                PageRange::new(60, 79),
                PageRange::new(80, 99),
                PageRange::new(20, 39),
                PageRange::new(100, 109),
                PageRange::new(0, 19),
            ]
        );
    }

    #[test]
    fn test_build_queue_decreasing_orders_nearest_first() {
        let planned = planned_range(&config(), 1000, 500);
        let queue = build_queue(&config(), planned, 500, 500, None, Direction::Decreasing);

        // Primary chunk first; the tail is nearest-first by chunk start
        // regardless of direction (direction only breaks exact ties).
        assert_eq!(
            queue,
            vec![
                PageRange::new(490, 509),
                PageRange::new(510, 529),
                PageRange::new(480, 489),
                PageRange::new(530, 549),
                PageRange::new(460, 479),
                PageRange::new(550, 559),
                PageRange::new(440, 459),
            ]
        );
    }

    #[test]
    fn test_build_queue_skips_loaded_run() {
        let planned = planned_range(&config(), 1000, 50);
        let loaded = PageRange::new(40, 79);
        let queue = build_queue(&config(), planned, 50, 50, Some(loaded), Direction::Increasing);

        // Nothing from [40, 79] is requested again.
        for chunk in &queue {
            assert!(!chunk.intersects(loaded), "chunk {chunk} overlaps loaded run");
        }
        assert!(queue.contains(&PageRange::new(80, 99)));
    }

    #[test]
    fn test_build_queue_extends_edge_fragments() {
        // A key near the end of the dataset leaves a short fragment at the
        // planned range's left edge; it is stretched to a full load.
        let cfg = PagerConfig {
            load_size: 20,
            preload_size: 30,
            cache_size: 100,
        };
        let planned = planned_range(&cfg, 1000, 50); // [20, 79]
        let loaded = PageRange::new(35, 79);
        let queue = build_queue(&cfg, planned, 50, 50, Some(loaded), Direction::Increasing);

        // Before-region fragment [20, 34] touches planned.first and is
        // shorter than a load; its left edge moves back to width 20.
        assert!(queue.contains(&PageRange::new(15, 34)), "queue: {queue:?}");
    }

    #[test]
    fn test_loaded_run_contiguous() {
        let values: BTreeMap<i64, i64> = (10..30).map(|k| (k, k)).collect();
        assert_eq!(loaded_run(&values), Some(PageRange::new(10, 29)));
    }

    #[test]
    fn test_loaded_run_sparse_is_none() {
        let values: BTreeMap<i64, i64> = [(0, 0), (100, 100)].into_iter().collect();
        assert_eq!(loaded_run(&values), None);
    }

    #[test]
    fn test_loaded_run_empty() {
        let values: BTreeMap<i64, i64> = BTreeMap::new();
        assert_eq!(loaded_run(&values), None);
    }

    #[test]
    fn test_evict_outside_window() {
        let mut values: BTreeMap<i64, i64> = (0..300).map(|k| (k, k)).collect();
        evict_outside_window(&mut values, 150, 100);
        assert_eq!(values.keys().next().copied(), Some(50));
        assert_eq!(values.keys().next_back().copied(), Some(250));
        assert_eq!(values.len(), 201);
    }

    #[test]
    fn test_apply_portion_total_change_replaces_values() {
        let mut state = PagerState::<i64> {
            values: (0..50).map(|k| (k, k)).collect(),
            total_size: 100,
            load_state: LoadState::Loading,
            last_read_key: 10,
            generation: 0,
            current: None,
        };
        let portion = DataPortion::new(80, BTreeMap::from([(5, 5)]));
        apply_portion(&mut state, portion, 100);

        assert_eq!(state.total_size, 80);
        assert_eq!(state.values.len(), 1);
        assert_eq!(state.values[&5], 5);
    }

    #[test]
    fn test_apply_portion_same_total_merges() {
        let mut state = PagerState::<i64> {
            values: BTreeMap::from([(0, 0)]),
            total_size: 100,
            load_state: LoadState::Loading,
            last_read_key: 0,
            generation: 0,
            current: None,
        };
        let portion = DataPortion::new(100, BTreeMap::from([(1, 1), (2, 2)]));
        apply_portion(&mut state, portion, 100);

        assert_eq!(state.values.len(), 3);
        assert_eq!(state.total_size, 100);
    }

    #[test]
    fn test_coerce_key() {
        assert_eq!(coerce_key(-5, 100), 0);
        assert_eq!(coerce_key(150, 100), 99);
        assert_eq!(coerce_key(50, 100), 50);
        // Unknown total behaves as a single-slot dataset.
        assert_eq!(coerce_key(7, 0), 0);
    }
}
