//! Location service bookkeeping
//!
//! Tracks one lookup per unresolved address. The retry loop that sends
//! requests lives in the router; this module owns the per-address state,
//! the wakeup used to cut a retransmit wait short, and the originators
//! waiting for the outcome.

use crate::error::{Result, RoutingError};
use dashmap::DashMap;
use geonet_protocol::GnAddress;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex, Notify};
use tracing::debug;

/// One in-flight address resolution
#[derive(Debug)]
pub struct Lookup {
    target: GnAddress,
    complete: AtomicBool,
    requests_sent: AtomicU32,
    wakeup: Notify,
    waiters: Mutex<Vec<oneshot::Sender<Result<()>>>>,
}

impl Lookup {
    fn new(target: GnAddress) -> Self {
        Lookup {
            target,
            complete: AtomicBool::new(false),
            requests_sent: AtomicU32::new(0),
            wakeup: Notify::new(),
            waiters: Mutex::new(Vec::new()),
        }
    }

    pub fn target(&self) -> GnAddress {
        self.target
    }

    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    pub fn requests_sent(&self) -> u32 {
        self.requests_sent.load(Ordering::Relaxed)
    }

    pub fn record_request(&self) -> u32 {
        self.requests_sent.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Wait until the lookup completes (or a spurious wakeup)
    pub async fn notified(&self) {
        self.wakeup.notified().await
    }

    async fn finish(&self, result: Result<()>) {
        self.complete.store(true, Ordering::Release);
        self.wakeup.notify_one();
        for waiter in self.waiters.lock().await.drain(..) {
            let _ = waiter.send(result.clone());
        }
    }
}

/// Resolves once a location service lookup completes
#[derive(Debug)]
pub struct PendingTransmission {
    target: GnAddress,
    rx: oneshot::Receiver<Result<()>>,
}

impl PendingTransmission {
    pub fn target(&self) -> GnAddress {
        self.target
    }

    /// `Ok` once the destination is resolved and the packet released,
    /// `Err(LocationServiceTimeout)` if the lookup expired
    pub async fn wait(self) -> Result<()> {
        self.rx.await.unwrap_or(Err(RoutingError::ShuttingDown))
    }
}

#[derive(Debug, Default)]
pub struct LocationService {
    lookups: DashMap<GnAddress, Arc<Lookup>>,
}

impl LocationService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a lookup for `target`; `None` if one is already running
    pub fn begin(&self, target: GnAddress) -> Option<Arc<Lookup>> {
        match self.lookups.entry(target) {
            dashmap::mapref::entry::Entry::Occupied(_) => None,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let lookup = Arc::new(Lookup::new(target));
                slot.insert(Arc::clone(&lookup));
                debug!("Location service lookup started for {}", target);
                Some(lookup)
            }
        }
    }

    pub fn is_pending(&self, target: &GnAddress) -> bool {
        self.lookups.contains_key(target)
    }

    pub fn get(&self, target: &GnAddress) -> Option<Arc<Lookup>> {
        self.lookups.get(target).map(|lookup| Arc::clone(lookup.value()))
    }

    /// Register an originator waiting on the lookup for `target`
    pub async fn subscribe(&self, target: &GnAddress) -> Option<PendingTransmission> {
        let lookup = self.get(target)?;
        let (tx, rx) = oneshot::channel();
        lookup.waiters.lock().await.push(tx);
        Some(PendingTransmission {
            target: *target,
            rx,
        })
    }

    /// Complete the lookup for `target` successfully
    ///
    /// Returns false if no lookup was pending.
    pub async fn resolve(&self, target: &GnAddress) -> bool {
        match self.lookups.remove(target) {
            Some((_, lookup)) => {
                debug!(
                    "Location service resolved {} after {} request(s)",
                    target,
                    lookup.requests_sent()
                );
                lookup.finish(Ok(())).await;
                true
            }
            None => false,
        }
    }

    /// Give up on `target`
    pub async fn expire(&self, target: &GnAddress) -> bool {
        self.fail(target, RoutingError::LocationServiceTimeout(*target))
            .await
    }

    /// Fail the lookup for `target` because the router is stopping
    pub async fn abort(&self, target: &GnAddress) -> bool {
        self.fail(target, RoutingError::ShuttingDown).await
    }

    /// Fail every pending lookup; returns how many were aborted
    pub async fn abort_all(&self) -> usize {
        let targets: Vec<GnAddress> = self.lookups.iter().map(|entry| *entry.key()).collect();
        let mut aborted = 0;
        for target in targets {
            if self.abort(&target).await {
                aborted += 1;
            }
        }
        aborted
    }

    async fn fail(&self, target: &GnAddress, error: RoutingError) -> bool {
        match self.lookups.remove(target) {
            Some((_, lookup)) => {
                lookup.finish(Err(error)).await;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.lookups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lookups.is_empty()
    }
}
