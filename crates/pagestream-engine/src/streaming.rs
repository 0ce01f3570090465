//! The push-based windowed loader.
//!
//! A [`StreamingPager`] keeps a set of chunk-aligned live subscriptions
//! open around the last accessed position, plus one side-channel
//! subscription for the dataset's total size. As the access position moves,
//! subscriptions outside the window are closed and new ones opened in the
//! travel direction first.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use pagestream_core::{
    aligned_chunk_containing, aligned_chunk_start, distance_beyond, AccessHook, ConfigError,
    LoadState, PageRange, PagingSnapshot, RangeLoadState, SourceError, StreamingPagerConfig,
    StreamingSource,
};

use crate::signal::AccessSignal;

/// Windowed loader over a push data source.
///
/// Like [`Pager`](crate::Pager), the value itself is inert;
/// [`subscribe`](Self::subscribe) starts an independent subscription with
/// its own state and background tasks.
pub struct StreamingPager<T> {
    config: StreamingPagerConfig,
    source: Arc<dyn StreamingSource<T>>,
}

impl<T> StreamingPager<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a streaming pager over `source`. Fails fast on invalid
    /// configuration.
    pub fn new(
        config: StreamingPagerConfig,
        source: Arc<dyn StreamingSource<T>>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config, source })
    }

    /// Start a subscription: open the total-size side channel, spawn the
    /// key scheduler, and return the observation handle.
    pub fn subscribe(&self) -> StreamingSubscription<T> {
        let (snapshot_tx, snapshot_rx) = watch::channel(PagingSnapshot::detached());
        let access = AccessSignal::new();

        let shared = Arc::new(StreamingShared {
            config: self.config.clone(),
            source: self.source.clone(),
            access,
            snapshot_tx,
            state: Mutex::new(StreamingState {
                values: BTreeMap::new(),
                total_size: 0,
                last_read_key: -1,
                next_stream_id: 0,
                active_streams: Vec::new(),
                range_states: Vec::new(),
                total_error: None,
                total_task: None,
            }),
        });

        {
            let mut state = shared.state.lock();
            state.total_task = Some(tokio::spawn(run_total_collector(shared.clone())));
            // First emission carries live hooks and Success so consumers
            // never observe a dangling Loading.
            shared.publish(&state);
        }

        let scheduler = tokio::spawn(run_scheduler(shared.clone()));

        StreamingSubscription {
            snapshots: snapshot_rx,
            scheduler,
            shared,
        }
    }
}

/// A live streaming-pager subscription.
///
/// All background work, including every open range subscription and the
/// total-size collector, is cancelled on drop.
pub struct StreamingSubscription<T> {
    snapshots: watch::Receiver<PagingSnapshot<T>>,
    scheduler: JoinHandle<()>,
    shared: Arc<StreamingShared<T>>,
}

impl<T> StreamingSubscription<T> {
    /// A receiver over the snapshot stream.
    pub fn snapshots(&self) -> watch::Receiver<PagingSnapshot<T>> {
        self.snapshots.clone()
    }
}

impl<T: Clone> StreamingSubscription<T> {
    /// The most recently published snapshot.
    pub fn latest(&self) -> PagingSnapshot<T> {
        self.snapshots.borrow().clone()
    }
}

impl<T> Drop for StreamingSubscription<T> {
    fn drop(&mut self) {
        self.scheduler.abort();
        let mut state = self.shared.state.lock();
        if let Some(task) = state.total_task.take() {
            task.abort();
        }
        for stream in state.active_streams.drain(..) {
            stream.handle.abort();
        }
        state.range_states.clear();
    }
}

struct StreamingShared<T> {
    config: StreamingPagerConfig,
    source: Arc<dyn StreamingSource<T>>,
    access: AccessSignal,
    snapshot_tx: watch::Sender<PagingSnapshot<T>>,
    state: Mutex<StreamingState<T>>,
}

struct StreamingState<T> {
    values: BTreeMap<i64, T>,
    total_size: i64,
    last_read_key: i64,
    next_stream_id: u64,
    /// Insertion-ordered registry of open range subscriptions. Order is
    /// load-bearing: base-start ties and error precedence resolve by it.
    active_streams: Vec<ActiveStream>,
    range_states: Vec<(PageRange, RangeLoadState)>,
    /// Sticky failure of the total stream; cleared by a retry.
    total_error: Option<Arc<SourceError>>,
    total_task: Option<JoinHandle<()>>,
}

struct ActiveStream {
    range: PageRange,
    id: u64,
    handle: JoinHandle<()>,
}

impl<T> StreamingState<T> {
    fn is_stream_active(&self, id: u64) -> bool {
        self.active_streams.iter().any(|s| s.id == id)
    }

    fn remove_stream(&mut self, id: u64) {
        self.active_streams.retain(|s| s.id != id);
    }

    fn set_range_state(&mut self, range: PageRange, value: RangeLoadState) {
        if let Some(entry) = self.range_states.iter_mut().find(|(r, _)| *r == range) {
            entry.1 = value;
        } else {
            self.range_states.push((range, value));
        }
    }

    /// Aggregate load state across the total channel and every range.
    fn aggregate_state(&self) -> LoadState {
        if self
            .range_states
            .iter()
            .any(|(_, s)| matches!(s, RangeLoadState::Loading))
        {
            return LoadState::Loading;
        }
        if let Some(error) = &self.total_error {
            return LoadState::Error {
                key: self.last_read_key.max(0),
                error: error.clone(),
            };
        }
        for (_, state) in &self.range_states {
            if let RangeLoadState::Error { key, error } = state {
                return LoadState::Error {
                    key: *key,
                    error: error.clone(),
                };
            }
        }
        LoadState::Success
    }
}

impl<T: Clone + Send + Sync + 'static> StreamingShared<T> {
    fn publish(self: &Arc<Self>, state: &StreamingState<T>) {
        let hook_signal = self.access.clone();
        let on_access: AccessHook = Arc::new(move |key| hook_signal.offer(key));
        let weak = Arc::downgrade(self);
        let on_retry: AccessHook = Arc::new(move |key| {
            if let Some(shared) = weak.upgrade() {
                shared.retry(key);
            }
        });
        let snapshot = PagingSnapshot::new(
            state.total_size,
            Arc::new(state.values.clone()),
            state.aggregate_state(),
            on_access,
            on_retry,
        );
        let _ = self.snapshot_tx.send(snapshot);
    }

    /// Retry entry point: restart a failed total subscription, then route
    /// the key through the normal access path.
    fn retry(self: &Arc<Self>, key: i64) {
        {
            let mut state = self.state.lock();
            if state.total_error.take().is_some() {
                debug!("restarting total-size collection after error");
                state.total_task = Some(tokio::spawn(run_total_collector(self.clone())));
                self.publish(&state);
            }
        }
        self.access.offer(key);
    }

    /// Apply a changed total: trim values, cancel overrun subscriptions,
    /// and re-aim the window if the access position fell off the end.
    fn apply_total(self: &Arc<Self>, new_total: i64) {
        let mut state = self.state.lock();
        if new_total == state.total_size {
            return;
        }
        debug!(
            old = state.total_size,
            new = new_total,
            "total size changed"
        );
        state.total_size = new_total;
        state.values.retain(|&k, _| (0..new_total).contains(&k));

        let mut i = 0;
        while i < state.active_streams.len() {
            if state.active_streams[i].range.last >= new_total {
                let stream = state.active_streams.remove(i);
                trace!(range = %stream.range, "cancelling subscription past new total");
                stream.handle.abort();
                state.range_states.retain(|(r, _)| *r != stream.range);
            } else {
                i += 1;
            }
        }
        self.publish(&state);

        if state.last_read_key > new_total {
            self.access.offer(new_total);
        }
    }

    /// Re-align the open subscriptions around a stable access key.
    fn adjust_window(self: &Arc<Self>, key: i64) {
        let mut state = self.state.lock();
        let state = &mut *state;
        state.active_streams.retain(|s| !s.handle.is_finished());

        let direction_forward = key > state.last_read_key;
        let config = &self.config;
        let total = state.total_size;

        let target_chunks: Vec<PageRange> = if total == 0 {
            vec![PageRange::new(0, config.load_size - 1)]
        } else {
            let bounds = PageRange::new(0, total.max(1) - 1);
            let window_unaligned =
                PageRange::new(key - config.preload_size, key + config.preload_size)
                    .coerce_in(bounds);

            // Anchor the chunk grid to the closest already-open range so the
            // existing subscriptions stay aligned; insertion order breaks
            // distance ties.
            let base_start = state
                .active_streams
                .iter()
                .filter(|s| s.range.intersects(window_unaligned))
                .min_by_key(|s| (s.range.first - key).abs())
                .map(|s| s.range.first)
                .unwrap_or_else(|| aligned_chunk_start(key, 0, config.load_size));

            let center = aligned_chunk_containing(key, base_start, config.load_size, total);
            let window = PageRange::new(
                center.first - config.preload_size,
                center.last + config.preload_size,
            )
            .coerce_in(PageRange::new(0, total - 1));

            let close_threshold = config.close_threshold();
            let mut i = 0;
            while i < state.active_streams.len() {
                let distance = distance_beyond(window, state.active_streams[i].range);
                if distance > close_threshold {
                    let stream = state.active_streams.remove(i);
                    debug!(range = %stream.range, distance, "closing subscription outside window");
                    stream.handle.abort();
                } else {
                    i += 1;
                }
            }

            let mut forward = Vec::new();
            let mut start = center.last + 1;
            while start <= window.last {
                forward.push(PageRange::new(start, (start + config.load_size - 1).min(total - 1)));
                start += config.load_size;
            }

            let mut backward = Vec::new();
            let mut start = center.first - config.load_size;
            while start + config.load_size - 1 >= window.first {
                backward.push(PageRange::new(start.max(0), start + config.load_size - 1));
                if start <= 0 {
                    break;
                }
                start -= config.load_size;
            }
            backward.reverse();

            backward
                .into_iter()
                .chain(std::iter::once(center))
                .chain(forward)
                .collect()
        };

        let mut to_open: Vec<PageRange> = target_chunks
            .iter()
            .copied()
            .filter(|r| !r.is_empty())
            .filter(|r| !state.active_streams.iter().any(|s| s.range == *r))
            .collect();
        for range in &to_open {
            state.set_range_state(*range, RangeLoadState::Loading);
        }

        // Drop state entries for ranges neither wanted nor open anymore, so
        // a window that moved away stops contributing stale errors.
        let active_ranges: Vec<PageRange> = state.active_streams.iter().map(|s| s.range).collect();
        state
            .range_states
            .retain(|(r, _)| target_chunks.contains(r) || active_ranges.contains(r));

        // Open in the travel direction first, backfill opposite last.
        let anchor_first = target_chunks
            .iter()
            .copied()
            .find(|r| r.contains(key))
            .or_else(|| target_chunks.first().copied())
            .map(|r| r.first)
            .unwrap_or(key);
        to_open.sort_by_key(|r| open_priority(direction_forward, r.first - anchor_first));

        trace!(
            key,
            direction_forward,
            open = to_open.len(),
            active = state.active_streams.len(),
            "window adjusted"
        );

        for range in to_open {
            let id = state.next_stream_id;
            state.next_stream_id += 1;
            let handle = tokio::spawn(run_portion_stream(self.clone(), range, id));
            state.active_streams.push(ActiveStream { range, id, handle });
        }

        state.last_read_key = key;
        self.publish(state);
    }
}

/// Sort key for opening new subscriptions: travel-direction chunks by
/// distance first, opposite-direction chunks afterwards.
fn open_priority(direction_forward: bool, delta: i64) -> i64 {
    const OPPOSITE: i64 = i64::MAX / 2;
    if direction_forward {
        if delta >= 0 {
            delta
        } else {
            OPPOSITE + delta.abs()
        }
    } else if delta <= 0 {
        delta.abs()
    } else {
        OPPOSITE + delta
    }
}

/// Drain the access signal with debounce, adjusting the window for every
/// stable key.
async fn run_scheduler<T>(shared: Arc<StreamingShared<T>>)
where
    T: Clone + Send + Sync + 'static,
{
    let debounce = shared.config.key_debounce();
    let mut access_rx = shared.access.subscribe();
    let mut last_planned: Option<i64> = None;
    loop {
        if access_rx.changed().await.is_err() {
            return;
        }
        loop {
            tokio::select! {
                _ = tokio::time::sleep(debounce) => break,
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
        shared.adjust_window(key);
    }
}

/// Collect the total-size side channel, deduplicating adjacent values.
async fn run_total_collector<T>(shared: Arc<StreamingShared<T>>)
where
    T: Clone + Send + Sync + 'static,
{
    let mut totals = shared.source.read_total();
    let mut last: Option<i64> = None;
    while let Some(next) = totals.next().await {
        match next {
            Ok(total) => {
                if last == Some(total) {
                    continue;
                }
                last = Some(total);
                shared.apply_total(total);
            }
            Err(error) => {
                warn!(%error, "total stream failed");
                let mut state = shared.state.lock();
                state.total_error = Some(Arc::new(error));
                state.total_task = None;
                shared.publish(&state);
                return;
            }
        }
    }
    trace!("total stream completed");
}

/// Consume one range subscription, merging every emission into the cache.
async fn run_portion_stream<T>(shared: Arc<StreamingShared<T>>, range: PageRange, id: u64)
where
    T: Clone + Send + Sync + 'static,
{
    let mut portions = shared.source.read_portion(range.first, range.width());
    while let Some(next) = portions.next().await {
        let mut state = shared.state.lock();
        if !state.is_stream_active(id) {
            // Cancelled between emissions; the closer already cleaned up.
            return;
        }
        match next {
            Ok(values) => {
                state.values.extend(values);
                let center = state.last_read_key.max(0);
                let cache_size = shared.config.cache_size;
                state
                    .values
                    .retain(|&k, _| (k - center).abs() <= cache_size);
                state.set_range_state(range, RangeLoadState::Success);
                shared.publish(&state);
            }
            Err(error) => {
                warn!(range = %range, %error, "range subscription failed");
                state.set_range_state(
                    range,
                    RangeLoadState::Error {
                        key: range.first,
                        error: Arc::new(error),
                    },
                );
                state.remove_stream(id);
                shared.publish(&state);
                return;
            }
        }
    }
    // Source stream completed; keep the range state, drop the registration.
    let mut state = shared.state.lock();
    state.remove_stream(id);
    trace!(range = %range, "range subscription completed");
}

#[cfg(test)]
mod tests {
    use pagestream_core::SourceError;

    use super::*;

    #[test]
    fn test_open_priority_forward() {
        // Ahead of the anchor: plain distance.
        assert!(open_priority(true, 0) < open_priority(true, 5));
        // Anything behind loses to everything ahead.
        assert!(open_priority(true, 100) < open_priority(true, -1));
        // Behind, nearer wins.
        assert!(open_priority(true, -1) < open_priority(true, -10));
    }

    #[test]
    fn test_open_priority_backward() {
        assert!(open_priority(false, 0) < open_priority(false, -5));
        assert!(open_priority(false, -100) < open_priority(false, 1));
        assert!(open_priority(false, 1) < open_priority(false, 10));
    }

    fn empty_state() -> StreamingState<i64> {
        StreamingState {
            values: BTreeMap::new(),
            total_size: 0,
            last_read_key: -1,
            next_stream_id: 0,
            active_streams: Vec::new(),
            range_states: Vec::new(),
            total_error: None,
            total_task: None,
        }
    }

    #[test]
    fn test_aggregate_state_loading_wins() {
        let mut state = empty_state();
        state.set_range_state(PageRange::new(0, 4), RangeLoadState::Loading);
        state.set_range_state(
            PageRange::new(5, 9),
            RangeLoadState::Error {
                key: 5,
                error: Arc::new(SourceError::msg("boom")),
            },
        );
        assert!(state.aggregate_state().is_loading());
    }

    #[test]
    fn test_aggregate_state_first_error_in_insertion_order() {
        let mut state = empty_state();
        state.set_range_state(
            PageRange::new(10, 14),
            RangeLoadState::Error {
                key: 10,
                error: Arc::new(SourceError::msg("first")),
            },
        );
        state.set_range_state(
            PageRange::new(0, 4),
            RangeLoadState::Error {
                key: 0,
                error: Arc::new(SourceError::msg("second")),
            },
        );
        assert_eq!(state.aggregate_state().error_key(), Some(10));
    }

    #[test]
    fn test_aggregate_state_total_error_beats_range_error() {
        let mut state = empty_state();
        state.last_read_key = 3;
        state.total_error = Some(Arc::new(SourceError::msg("total gone")));
        state.set_range_state(
            PageRange::new(0, 4),
            RangeLoadState::Error {
                key: 0,
                error: Arc::new(SourceError::msg("range gone")),
            },
        );
        match state.aggregate_state() {
            LoadState::Error { key, error } => {
                assert_eq!(key, 3);
                assert!(error.to_string().contains("total gone"));
            }
            other => panic!("expected error state, got {other:?}"),
        }
    }

    #[test]
    fn test_aggregate_state_success_when_quiet() {
        let mut state = empty_state();
        assert!(state.aggregate_state().is_success());
        state.set_range_state(PageRange::new(0, 4), RangeLoadState::Success);
        assert!(state.aggregate_state().is_success());
    }
}
