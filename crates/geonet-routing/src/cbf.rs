//! Contention-based forwarding timer queue
//!
//! Packets scheduled for deferred broadcast sit in a min-deadline heap. A
//! single background loop sends each one when its timer fires; hearing the
//! same packet relayed by someone else first cancels it.

use crate::link::LinkDestination;
use crate::queue::QueueElement;
use geonet_protocol::{GnAddress, SequenceNumber};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;
use tokio::sync::{watch, Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, info};

/// Sleep used while nothing is scheduled
const IDLE_INTERVAL: Duration = Duration::from_secs(1);

/// A packet is identified by its source address and sequence number
pub type CbfKey = (GnAddress, SequenceNumber);

#[derive(Debug)]
struct Scheduled {
    deadline: Instant,
    /// Insertion order, breaks deadline ties
    order: u64,
    key: CbfKey,
    element: QueueElement,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.order == other.order
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    // Reversed so the max-heap pops the earliest deadline
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.order.cmp(&self.order))
    }
}

#[derive(Debug, Default)]
pub struct CbfQueue {
    heap: Mutex<BinaryHeap<Scheduled>>,
    wakeup: Notify,
    counter: AtomicU64,
}

impl CbfQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a broadcast of `element` after `timeout`
    ///
    /// Returns false if a packet with the same key is already pending.
    pub async fn schedule(&self, key: CbfKey, mut element: QueueElement, timeout: Duration) -> bool {
        let mut heap = self.heap.lock().await;
        if heap.iter().any(|scheduled| scheduled.key == key) {
            return false;
        }

        element.cbf_timeout = timeout;
        heap.push(Scheduled {
            deadline: Instant::now() + timeout,
            order: self.counter.fetch_add(1, AtomicOrdering::Relaxed),
            key,
            element,
        });
        drop(heap);

        debug!("CBF scheduled {}#{} in {:?}", key.0, key.1, timeout);
        self.wakeup.notify_one();
        true
    }

    /// Cancel a pending packet; returns true if one was removed
    pub async fn cancel(&self, key: &CbfKey) -> bool {
        let mut heap = self.heap.lock().await;
        let before = heap.len();
        heap.retain(|scheduled| scheduled.key != *key);
        let cancelled = heap.len() < before;

        if cancelled {
            debug!("CBF cancelled {}#{}", key.0, key.1);
        }
        cancelled
    }

    pub async fn contains(&self, key: &CbfKey) -> bool {
        self.heap.lock().await.iter().any(|s| s.key == *key)
    }

    pub async fn len(&self) -> usize {
        self.heap.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.heap.lock().await.is_empty()
    }

    /// Drop everything still scheduled
    pub async fn clear(&self) -> usize {
        let mut heap = self.heap.lock().await;
        let count = heap.len();
        heap.clear();
        count
    }

    /// Remove every element whose deadline has passed
    async fn pop_due(&self, now: Instant) -> Vec<QueueElement> {
        let mut heap = self.heap.lock().await;
        let mut due = Vec::new();
        while heap.peek().is_some_and(|next| next.deadline <= now) {
            if let Some(scheduled) = heap.pop() {
                due.push(scheduled.element);
            }
        }
        due
    }

    async fn next_deadline(&self) -> Option<Instant> {
        self.heap.lock().await.peek().map(|next| next.deadline)
    }

    /// Timer loop; returns when `shutdown` turns true or its sender is dropped
    ///
    /// `on_sent` is awaited with the size of every batch broadcast. Returns
    /// the total number of packets sent.
    pub async fn run<F, Fut>(&self, mut shutdown: watch::Receiver<bool>, mut on_sent: F) -> u64
    where
        F: FnMut(u64) -> Fut,
        Fut: Future<Output = ()>,
    {
        info!("CBF timer task started");
        let mut sent = 0u64;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let now = Instant::now();
            let mut batch = 0u64;
            for element in self.pop_due(now).await {
                if element.is_expired(now) {
                    continue;
                }
                element.transmit(LinkDestination::Broadcast);
                batch += 1;
            }
            if batch > 0 {
                sent += batch;
                on_sent(batch).await;
            }

            let idle_until = now + IDLE_INTERVAL;
            let wake_at = self
                .next_deadline()
                .await
                .map_or(idle_until, |deadline| deadline.min(idle_until));

            tokio::select! {
                _ = tokio::time::sleep_until(wake_at) => {}
                _ = self.wakeup.notified() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("CBF timer task stopped ({} packets sent)", sent);
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::TransmitCallback;
    use geonet_protocol::{MacAddress, StationType};
    use std::sync::{Arc, Mutex as StdMutex};

    fn create_test_key(last: u8, sn: u16) -> CbfKey {
        let address = GnAddress::new(
            false,
            StationType::PassengerCar,
            MacAddress::from_bytes([0x02, 0, 0, 0, 0, last]),
        );
        (address, SequenceNumber(sn))
    }

    fn create_test_sink() -> (TransmitCallback, Arc<StdMutex<Vec<Vec<u8>>>>) {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&sent);
        let callback: TransmitCallback = Arc::new(move |dest, bytes| {
            assert_eq!(dest, LinkDestination::Broadcast);
            sink.lock().unwrap().push(bytes.to_vec());
        });
        (callback, sent)
    }

    #[tokio::test(start_paused = true)]
    async fn test_sends_in_deadline_order() {
        let queue = Arc::new(CbfQueue::new());
        let (callback, sent) = create_test_sink();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let element = |tag: u8| QueueElement::new(vec![tag], Arc::clone(&callback), Duration::from_secs(60));
        queue
            .schedule(create_test_key(1, 1), element(1), Duration::from_millis(80))
            .await;
        queue
            .schedule(create_test_key(2, 1), element(2), Duration::from_millis(20))
            .await;

        let runner = Arc::clone(&queue);
        let handle = tokio::spawn(async move { runner.run(shutdown_rx, |_| async {}).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*sent.lock().unwrap(), vec![vec![2]]);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*sent.lock().unwrap(), vec![vec![2], vec![1]]);

        shutdown_tx.send(true).unwrap();
        assert_eq!(handle.await.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reports_each_batch() {
        let queue = Arc::new(CbfQueue::new());
        let (callback, _sent) = create_test_sink();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        for sn in 0..3 {
            let element = QueueElement::new(vec![sn as u8], Arc::clone(&callback), Duration::from_secs(60));
            queue
                .schedule(create_test_key(1, sn), element, Duration::from_millis(10))
                .await;
        }

        let reported = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&reported);
        let runner = Arc::clone(&queue);
        let handle = tokio::spawn(async move {
            runner
                .run(shutdown_rx, move |batch| {
                    counter.fetch_add(batch, AtomicOrdering::Relaxed);
                    async {}
                })
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(reported.load(AtomicOrdering::Relaxed), 3);

        shutdown_tx.send(true).unwrap();
        assert_eq!(handle.await.unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_send() {
        let queue = Arc::new(CbfQueue::new());
        let (callback, sent) = create_test_sink();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let key = create_test_key(1, 9);
        let element = QueueElement::new(vec![9], callback, Duration::from_secs(60));
        assert!(queue.schedule(key, element.clone(), Duration::from_millis(50)).await);
        // Same packet again is ignored
        assert!(!queue.schedule(key, element, Duration::from_millis(10)).await);

        let runner = Arc::clone(&queue);
        let handle = tokio::spawn(async move { runner.run(shutdown_rx, |_| async {}).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(queue.cancel(&key).await);
        assert!(!queue.cancel(&key).await);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(sent.lock().unwrap().is_empty());

        shutdown_tx.send(true).unwrap();
        assert_eq!(handle.await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_schedule_wakes_idle_loop() {
        let queue = Arc::new(CbfQueue::new());
        let (callback, sent) = create_test_sink();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let runner = Arc::clone(&queue);
        let handle = tokio::spawn(async move { runner.run(shutdown_rx, |_| async {}).await });

        // Let the loop settle into its idle sleep
        tokio::time::sleep(Duration::from_millis(100)).await;

        let element = QueueElement::new(vec![5], callback, Duration::from_secs(60));
        queue
            .schedule(create_test_key(3, 1), element, Duration::from_millis(5))
            .await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sent.lock().unwrap().len(), 1);

        drop(shutdown_tx);
        assert_eq!(handle.await.unwrap(), 1);
    }
}
