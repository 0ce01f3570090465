//! Streaming-pager scenario tests.
//!
//! The scripted source exposes the total as a settable channel and portions
//! as a broadcast the test feeds by hand, so every push-side behavior
//! (chunk subscriptions opening, totals shrinking, the total stream
//! failing) is driven explicitly.
//!
//! ```bash
//! cargo test --package pagestream-engine --test streaming_scenarios
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::stream;
use tokio::sync::{broadcast, watch};

use pagestream_core::{
    PageRange, PagingSnapshot, SourceError, StreamingPagerConfig, StreamingSource, TotalStream,
    ValuesStream,
};
use pagestream_engine::StreamingPager;

// ============================================================================
// Scripted source
// ============================================================================

struct ScriptedSource {
    total_rx: watch::Receiver<i64>,
    portion_tx: broadcast::Sender<BTreeMap<i64, i64>>,
    opened: Arc<Mutex<Vec<PageRange>>>,
    /// Number of `read_total` subscriptions that fail before one succeeds.
    fail_total: AtomicUsize,
}

impl StreamingSource<i64> for ScriptedSource {
    fn read_total(&self) -> TotalStream {
        if self.fail_total.load(Ordering::SeqCst) > 0 {
            self.fail_total.fetch_sub(1, Ordering::SeqCst);
            return Box::pin(stream::once(async {
                Err::<i64, _>(SourceError::msg("total stream unavailable"))
            }));
        }
        let rx = self.total_rx.clone();
        Box::pin(stream::unfold((rx, true), |(mut rx, first)| async move {
            if first {
                let value = *rx.borrow_and_update();
                return Some((Ok::<i64, SourceError>(value), (rx, false)));
            }
            match rx.changed().await {
                Ok(()) => {
                    let value = *rx.borrow_and_update();
                    Some((Ok(value), (rx, false)))
                }
                Err(_) => None,
            }
        }))
    }

    fn read_portion(&self, start: i64, size: i64) -> ValuesStream<i64> {
        self.opened
            .lock()
            .unwrap()
            .push(PageRange::new(start, start + size - 1));
        let rx = self.portion_tx.subscribe();
        Box::pin(stream::unfold(rx, move |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(map) => {
                        let filtered: BTreeMap<i64, i64> = map
                            .into_iter()
                            .filter(|(k, _)| *k >= start && *k < start + size)
                            .collect();
                        if filtered.is_empty() {
                            continue;
                        }
                        return Some((Ok::<_, SourceError>(filtered), rx));
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        }))
    }
}

struct Harness {
    total_tx: watch::Sender<i64>,
    portion_tx: broadcast::Sender<BTreeMap<i64, i64>>,
    opened: Arc<Mutex<Vec<PageRange>>>,
    source: Arc<ScriptedSource>,
}

impl Harness {
    fn new(initial_total: i64, fail_total: usize) -> Self {
        let (total_tx, total_rx) = watch::channel(initial_total);
        let (portion_tx, _) = broadcast::channel(64);
        let opened = Arc::new(Mutex::new(Vec::new()));
        let source = Arc::new(ScriptedSource {
            total_rx,
            portion_tx: portion_tx.clone(),
            opened: opened.clone(),
            fail_total: AtomicUsize::new(fail_total),
        });
        Self {
            total_tx,
            portion_tx,
            opened,
            source,
        }
    }

    fn set_total(&self, total: i64) {
        self.total_tx.send(total).expect("source holds a receiver");
    }

    /// Broadcast values for the given positions; each value equals its key.
    fn emit_values(&self, positions: impl IntoIterator<Item = i64>) {
        let map: BTreeMap<i64, i64> = positions.into_iter().map(|k| (k, k)).collect();
        let _ = self.portion_tx.send(map);
    }

    fn opened_ranges(&self) -> Vec<PageRange> {
        self.opened.lock().unwrap().clone()
    }

    /// Live portion subscriptions, observed through the broadcast channel.
    fn open_subscription_count(&self) -> usize {
        self.portion_tx.receiver_count()
    }
}

fn test_config() -> StreamingPagerConfig {
    StreamingPagerConfig {
        load_size: 5,
        preload_size: 5,
        cache_size: 100,
        close_threshold: Some(5),
        key_debounce_ms: 300,
    }
}

async fn wait_for<F>(
    snapshots: &mut watch::Receiver<PagingSnapshot<i64>>,
    description: &str,
    predicate: F,
) -> PagingSnapshot<i64>
where
    F: Fn(&PagingSnapshot<i64>) -> bool,
{
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            {
                let snapshot = snapshots.borrow_and_update();
                if predicate(&snapshot) {
                    return snapshot.clone();
                }
            }
            snapshots
                .changed()
                .await
                .expect("snapshot channel closed");
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {description}"))
}

async fn wait_until<F: Fn() -> bool>(description: &str, condition: F) {
    tokio::time::timeout(Duration::from_secs(30), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {description}"));
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_total_updates_propagate() {
    let harness = Harness::new(0, 0);
    let pager = StreamingPager::new(test_config(), harness.source.clone()).unwrap();
    let subscription = pager.subscribe();
    let mut snapshots = subscription.snapshots();

    // First emission: empty, Success, total unknown.
    let initial = snapshots.borrow_and_update().clone();
    assert!(initial.load_state().is_success());
    assert_eq!(initial.total_size(), 0);

    harness.set_total(50);
    let updated = wait_for(&mut snapshots, "total 50", |s| s.total_size() == 50).await;
    assert!(updated.load_state().is_success());
    assert_eq!(updated.len(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_access_opens_aligned_chunk_and_values_materialize() {
    let harness = Harness::new(50, 0);
    let pager = StreamingPager::new(test_config(), harness.source.clone()).unwrap();
    let subscription = pager.subscribe();
    let mut snapshots = subscription.snapshots();

    let warm = wait_for(&mut snapshots, "total 50", |s| s.total_size() == 50).await;
    warm.get(0);

    // After the debounce, the chunk containing position 0 is subscribed.
    wait_until("chunk [0, 4] opened", || {
        harness.opened_ranges().contains(&PageRange::new(0, 4))
    })
    .await;

    harness.emit_values(0..5);
    let loaded = wait_for(&mut snapshots, "position 0 materialized", |s| {
        s.values().contains_key(&0)
    })
    .await;
    assert_eq!(loaded.values()[&0], 0);

    // The preload window also covers the next chunk.
    assert!(harness.opened_ranges().contains(&PageRange::new(5, 9)));
}

#[tokio::test(start_paused = true)]
async fn test_total_shrink_trims_values_and_cancels_overrun_subscriptions() {
    let harness = Harness::new(20, 0);
    let pager = StreamingPager::new(test_config(), harness.source.clone()).unwrap();
    let subscription = pager.subscribe();
    let mut snapshots = subscription.snapshots();

    let warm = wait_for(&mut snapshots, "total 20", |s| s.total_size() == 20).await;
    warm.get(0);
    wait_until("chunks [0,4] and [5,9] opened", || {
        harness.open_subscription_count() == 2
    })
    .await;

    harness.emit_values(0..10);
    wait_for(&mut snapshots, "positions 0..9 loaded", |s| s.len() == 10).await;

    harness.set_total(7);
    let shrunk = wait_for(&mut snapshots, "total 7", |s| s.total_size() == 7).await;
    assert!(shrunk.last_key() <= 6, "last_key = {}", shrunk.last_key());

    // The [5, 9] subscription overlaps the cut and is cancelled.
    wait_until("overrun subscription closed", || {
        harness.open_subscription_count() == 1
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_total_stream_error_then_retry_recovers() {
    let harness = Harness::new(42, 1);
    let pager = StreamingPager::new(test_config(), harness.source.clone()).unwrap();
    let subscription = pager.subscribe();
    let mut snapshots = subscription.snapshots();

    let failed = wait_for(&mut snapshots, "total error", |s| s.load_state().is_error()).await;

    // Retry restarts the total collection; the next value lands.
    failed.retry(0);
    let recovered = wait_for(&mut snapshots, "total recovered", |s| s.total_size() == 42).await;
    assert!(!recovered.load_state().is_error());
}

#[tokio::test(start_paused = true)]
async fn test_window_shift_closes_far_subscriptions() {
    let harness = Harness::new(200, 0);
    let pager = StreamingPager::new(test_config(), harness.source.clone()).unwrap();
    let subscription = pager.subscribe();
    let mut snapshots = subscription.snapshots();

    let warm = wait_for(&mut snapshots, "total 200", |s| s.total_size() == 200).await;
    warm.get(0);
    wait_until("initial window opened", || {
        harness.open_subscription_count() == 2
    })
    .await;

    // Jump far away: [0,4] and [5,9] are beyond the close threshold of the
    // new window around 100 and must be closed; three chunks open around
    // the new center.
    warm.get(100);
    wait_until("window recentered", || {
        let ranges = harness.opened_ranges();
        ranges.contains(&PageRange::new(100, 104))
            && ranges.contains(&PageRange::new(95, 99))
            && ranges.contains(&PageRange::new(105, 109))
    })
    .await;
    wait_until("old window closed", || {
        harness.open_subscription_count() == 3
    })
    .await;

    harness.emit_values(95..110);
    let loaded = wait_for(&mut snapshots, "new window materialized", |s| {
        s.values().contains_key(&100)
    })
    .await;
    assert!(loaded.first_key() >= 95);
}

#[tokio::test(start_paused = true)]
async fn test_drop_cancels_all_subscriptions() {
    let harness = Harness::new(50, 0);
    let pager = StreamingPager::new(test_config(), harness.source.clone()).unwrap();
    let subscription = pager.subscribe();
    let mut snapshots = subscription.snapshots();

    let warm = wait_for(&mut snapshots, "total 50", |s| s.total_size() == 50).await;
    warm.get(0);
    wait_until("window opened", || harness.open_subscription_count() == 2).await;

    drop(subscription);
    wait_until("all subscriptions closed", || {
        harness.open_subscription_count() == 0
    })
    .await;

    // Hooks on an outlived snapshot are inert.
    warm.get(1);
    warm.retry(1);
}
