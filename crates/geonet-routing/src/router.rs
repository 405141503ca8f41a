//! GeoNetworking Router
//!
//! Owns the location table, packet queues, CBF timer queue and location
//! service state, and runs the background tasks that drive them:
//! - CBF timer loop
//! - location table sweep
//! - periodic beacon
//! - one retry loop per in-flight location service lookup
//!
//! `receive` and `transmit` may be called concurrently from any task.

use crate::cbf::CbfQueue;
use crate::config::RouterConfig;
use crate::error::{Result, RoutingError};
use crate::forwarding::ForwardingEngine;
use crate::link::TransmitCallback;
use crate::location_service::LocationService;
use crate::logging;
use crate::position::{PositionSource, RouterClock};
use crate::queue::{PacketQueues, QueueKind};
use crate::receive::ReceiveOutcome;
use crate::tasks::TaskSet;
use crate::transmit::{TransmitOutcome, TransmitRequest};
use geonet_location::{GeoPoint, LocationTable, LocationTableEntry};
use geonet_protocol::{GnAddress, LongPositionVector, SequenceNumber};
use rand::Rng;
use std::sync::atomic::{AtomicU16, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, info, Level};

const STATE_CREATED: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_STOPPED: u8 = 2;

/// Router statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RouterStats {
    pub packets_received: u64,
    pub packets_delivered: u64,
    pub packets_forwarded: u64,
    pub packets_sent: u64,
    pub packets_dropped: u64,
    pub packets_queued: u64,
    pub duplicates: u64,
    /// Fresh packets arriving behind a newer sequence number from the same source
    pub reordered: u64,
    pub malformed: u64,
    pub queue_overflows: u64,
    pub beacons_sent: u64,
    pub ls_requests_sent: u64,
    pub ls_resolved: u64,
    pub ls_expired: u64,
    pub cbf_cancelled: u64,
}

/// State shared between the router handle and its background tasks
pub(crate) struct Shared {
    pub(crate) config: RouterConfig,
    pub(crate) engine: ForwardingEngine,
    pub(crate) clock: RouterClock,
    position: Arc<dyn PositionSource>,
    pub(crate) link: TransmitCallback,

    // Lock order: table before queues
    pub(crate) table: RwLock<LocationTable>,
    pub(crate) queues: Mutex<PacketQueues>,

    pub(crate) cbf: CbfQueue,
    pub(crate) location_service: LocationService,
    pub(crate) tasks: TaskSet,
    pub(crate) stats: RwLock<RouterStats>,

    sequence_number: AtomicU16,
    state: AtomicU8,
    pub(crate) shutdown: watch::Sender<bool>,
}

impl Shared {
    pub(crate) fn local_address(&self) -> GnAddress {
        self.config.local_address
    }

    pub(crate) fn local_position_vector(&self) -> LongPositionVector {
        self.position
            .current_position()
            .to_position_vector(self.config.local_address)
    }

    pub(crate) fn local_point(&self) -> GeoPoint {
        self.position.current_position().point()
    }

    pub(crate) fn next_sequence_number(&self) -> SequenceNumber {
        SequenceNumber(self.sequence_number.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn check_running(&self) -> Result<()> {
        match self.state.load(Ordering::Acquire) {
            STATE_RUNNING => Ok(()),
            STATE_CREATED => Err(RoutingError::NotRunning),
            _ => Err(RoutingError::ShuttingDown),
        }
    }

    pub(crate) async fn count<F>(&self, update: F)
    where
        F: FnOnce(&mut RouterStats),
    {
        let mut stats = self.stats.write().await;
        update(&mut stats);
    }
}

/// GeoNetworking router handle
///
/// Call [`Router::start`] before use and [`Router::stop`] before dropping;
/// `stop` returns once every background task has exited.
pub struct Router {
    shared: Arc<Shared>,
}

impl Router {
    /// Create a new router
    ///
    /// # Arguments
    /// * `config` - Router configuration, validated here
    /// * `position_source` - Polled for the local position
    /// * `link` - Default transmit hook for outgoing packets
    pub fn new(
        config: RouterConfig,
        position_source: Arc<dyn PositionSource>,
        link: TransmitCallback,
    ) -> Result<Self> {
        config.validate()?;

        let table = LocationTable::new(config.local_address, config.location_table_lifetime());
        let queues = PacketQueues::new(
            config.broadcast_queue_capacity,
            config.unicast_queue_capacity,
            config.location_service_queue_capacity,
        );
        let (shutdown, _) = watch::channel(false);

        let shared = Shared {
            engine: ForwardingEngine::new(&config),
            clock: RouterClock::new(),
            position: position_source,
            link,
            table: RwLock::new(table),
            queues: Mutex::new(queues),
            cbf: CbfQueue::new(),
            location_service: LocationService::new(),
            tasks: TaskSet::new(),
            stats: RwLock::new(RouterStats::default()),
            sequence_number: AtomicU16::new(0),
            state: AtomicU8::new(STATE_CREATED),
            shutdown,
            config,
        };

        Ok(Router {
            shared: Arc::new(shared),
        })
    }

    /// Launch the background tasks
    ///
    /// Starting twice is a no-op; a stopped router cannot be restarted.
    pub async fn start(&self) -> Result<()> {
        match self.shared.state.compare_exchange(
            STATE_CREATED,
            STATE_RUNNING,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {}
            Err(STATE_RUNNING) => return Ok(()),
            Err(_) => return Err(RoutingError::ShuttingDown),
        }

        let shared = Arc::clone(&self.shared);
        let shutdown = self.shared.shutdown.subscribe();
        self.shared
            .tasks
            .spawn("cbf", async move {
                let stats = Arc::clone(&shared);
                shared
                    .cbf
                    .run(shutdown, move |sent| {
                        let stats = Arc::clone(&stats);
                        async move { stats.count(|s| s.packets_sent += sent).await }
                    })
                    .await;
            })
            .await;

        let shared = Arc::clone(&self.shared);
        let shutdown = self.shared.shutdown.subscribe();
        self.shared
            .tasks
            .spawn("table sweep", run_table_sweep(shared, shutdown))
            .await;

        if self.shared.config.beacon_enabled {
            let shared = Arc::clone(&self.shared);
            let shutdown = self.shared.shutdown.subscribe();
            self.shared
                .tasks
                .spawn("beacon", run_beacon(shared, shutdown))
                .await;
        }

        info!(
            "GeoNetworking router {} started (non-area: {:?}, area: {:?})",
            self.shared.local_address(),
            self.shared.engine.non_area_algorithm(),
            self.shared.engine.area_algorithm()
        );
        Ok(())
    }

    /// Stop the router and wait for every background task to exit
    ///
    /// Pending lookups fail with `ShuttingDown` and queued packets are dropped.
    pub async fn stop(&self) {
        let previous = self.shared.state.swap(STATE_STOPPED, Ordering::AcqRel);
        if previous == STATE_STOPPED {
            return;
        }

        self.shared.shutdown.send_replace(true);
        self.shared.tasks.join_all().await;

        let aborted = self.shared.location_service.abort_all().await;
        let dropped = self.shared.queues.lock().await.clear() + self.shared.cbf.clear().await;

        info!(
            "GeoNetworking router {} stopped ({} lookups aborted, {} queued packets dropped)",
            self.shared.local_address(),
            aborted,
            dropped
        );
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.load(Ordering::Acquire) == STATE_RUNNING
    }

    /// Process a packet received from the radio
    pub async fn receive(&self, bytes: &[u8]) -> ReceiveOutcome {
        self.shared.receive(bytes).await
    }

    /// Send a packet originated by the local station
    pub async fn transmit(&self, request: TransmitRequest) -> Result<TransmitOutcome> {
        self.shared.transmit(request).await
    }

    /// Broadcast a beacon carrying our position vector now
    pub async fn send_beacon(&self) -> Result<()> {
        self.shared.send_beacon().await
    }

    /// Change the log level; requires logging set up through [`logging::init`]
    pub fn set_log_level(&self, level: Level) -> Result<()> {
        logging::set_level(level)
    }

    pub fn config(&self) -> &RouterConfig {
        &self.shared.config
    }

    pub fn local_address(&self) -> GnAddress {
        self.shared.local_address()
    }

    pub fn local_position_vector(&self) -> LongPositionVector {
        self.shared.local_position_vector()
    }

    /// Neighbor closest to `target` and its distance in meters
    pub async fn nearest_neighbor(&self, target: GeoPoint) -> Option<(LocationTableEntry, f64)> {
        let table = self.shared.table.read().await;
        table
            .find_nearest_neighbor(target, self.shared.clock.now())
            .map(|(entry, distance)| (entry.clone(), distance))
    }

    pub async fn location_entry(&self, address: &GnAddress) -> Option<LocationTableEntry> {
        let table = self.shared.table.read().await;
        table.find(address, self.shared.clock.now()).cloned()
    }

    pub async fn queue_len(&self, kind: QueueKind, address: Option<&GnAddress>) -> usize {
        self.shared.queues.lock().await.len(kind, address)
    }

    /// Packets waiting on a contention timer
    pub async fn cbf_pending(&self) -> usize {
        self.shared.cbf.len().await
    }

    /// Addresses with a location service lookup in flight
    pub fn pending_lookups(&self) -> usize {
        self.shared.location_service.len()
    }

    pub async fn stats(&self) -> RouterStats {
        self.shared.stats.read().await.clone()
    }

    pub async fn clear_stats(&self) {
        *self.shared.stats.write().await = RouterStats::default();
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        // Without a prior stop, at least let the background tasks wind down
        if self.shared.state.load(Ordering::Acquire) == STATE_RUNNING {
            self.shared.shutdown.send_replace(true);
        }
    }
}

/// Evict expired location table entries on a fixed interval
async fn run_table_sweep(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(shared.config.table_sweep_interval());
    ticker.tick().await;

    while !*shutdown.borrow() {
        tokio::select! {
            _ = ticker.tick() => {
                let now = shared.clock.now();
                let removed = shared.table.write().await.purge_stale(now);
                if removed > 0 {
                    debug!("Location table sweep removed {} stale entries", removed);
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
}

/// Broadcast a beacon every interval plus random jitter
async fn run_beacon(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let interval = shared.config.beacon_interval();
    let max_jitter = shared.config.beacon_jitter_ms;

    while !*shutdown.borrow() {
        let jitter = if max_jitter > 0 {
            rand::thread_rng().gen_range(0..=max_jitter)
        } else {
            0
        };

        tokio::select! {
            _ = tokio::time::sleep(interval + Duration::from_millis(jitter)) => {
                if let Err(e) = shared.send_beacon().await {
                    debug!("Beacon not sent: {}", e);
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::LinkDestination;
    use crate::position::{PositionFix, StaticPosition};
    use crate::queue::QueueElement;
    use crate::transmit::Destination;
    use geonet_protocol::{GnPacket, MacAddress, PacketType, StationType};
    use std::sync::Mutex as StdMutex;

    type Sent = Arc<StdMutex<Vec<(LinkDestination, Vec<u8>)>>>;

    fn create_test_address(last: u8) -> GnAddress {
        GnAddress::new(
            false,
            StationType::PassengerCar,
            MacAddress::from_bytes([0x02, 0, 0, 0, 0, last]),
        )
    }

    fn create_test_router(config: RouterConfig) -> (Router, Sent) {
        let sent: Sent = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&sent);
        let link: TransmitCallback = Arc::new(move |dest, bytes| {
            sink.lock().unwrap().push((dest, bytes.to_vec()));
        });
        let position = Arc::new(StaticPosition::new(PositionFix::new(0, 0)));
        let router = Router::new(config, position, link).unwrap();
        (router, sent)
    }

    fn create_test_config() -> RouterConfig {
        RouterConfig {
            beacon_enabled: false,
            ..RouterConfig::new(create_test_address(0))
        }
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = RouterConfig {
            broadcast_queue_capacity: 0,
            ..create_test_config()
        };
        let position = Arc::new(StaticPosition::default());
        let link: TransmitCallback = Arc::new(|_, _| {});
        assert!(matches!(
            Router::new(config, position, link),
            Err(RoutingError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let (router, _) = create_test_router(create_test_config());

        assert!(!router.is_running());
        assert_eq!(router.send_beacon().await, Err(RoutingError::NotRunning));

        router.start().await.unwrap();
        router.start().await.unwrap();
        assert!(router.is_running());

        router.stop().await;
        assert!(!router.is_running());
        assert_eq!(router.shared.tasks.active().await, 0);
        assert_eq!(router.send_beacon().await, Err(RoutingError::ShuttingDown));
        assert_eq!(router.start().await, Err(RoutingError::ShuttingDown));
    }

    #[tokio::test]
    async fn test_lookup_registered_after_stop_fails() {
        let (router, sent) = create_test_router(create_test_config());
        router.start().await.unwrap();
        router.stop().await;

        // A transmit that passed its running check just before stop
        let target = create_test_address(7);
        let link: TransmitCallback = Arc::new(|_, _| {});
        let element = QueueElement::new(vec![1, 2, 3], link, Duration::from_secs(10));
        router
            .shared
            .enqueue(QueueKind::LocationService, target, element)
            .await;

        assert_eq!(
            router.shared.start_lookup(target).await,
            Err(RoutingError::ShuttingDown)
        );
        assert_eq!(router.pending_lookups(), 0);
        assert_eq!(router.queue_len(QueueKind::LocationService, Some(&target)).await, 0);
        assert_eq!(router.shared.tasks.active().await, 0);
        assert!(router.shared.location_service.subscribe(&target).await.is_none());
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sequence_numbers_unique() {
        let (router, sent) = create_test_router(create_test_config());
        router.start().await.unwrap();

        for _ in 0..3 {
            let request = TransmitRequest::new(Destination::TopologicallyScopedBroadcast, vec![1]);
            router.transmit(request).await.unwrap();
        }

        let numbers: Vec<u16> = sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, bytes)| GnPacket::decode(bytes).unwrap().sequence_number().unwrap().0)
            .collect();
        assert_eq!(numbers, vec![0, 1, 2]);

        router.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_beacon_task_sends_periodically() {
        let config = RouterConfig {
            beacon_enabled: true,
            beacon_interval_ms: 1_000,
            beacon_jitter_ms: 0,
            ..create_test_config()
        };
        let (router, sent) = create_test_router(config);
        router.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        router.stop().await;

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 3);
        for (dest, bytes) in sent.iter() {
            assert_eq!(*dest, LinkDestination::Broadcast);
            let packet = GnPacket::decode(bytes).unwrap();
            assert_eq!(packet.common.packet_type, PacketType::Beacon);
            assert_eq!(packet.source().unwrap().address, create_test_address(0));
        }
        drop(sent);

        assert_eq!(router.stats().await.beacons_sent, 3);
        router.clear_stats().await;
        assert_eq!(router.stats().await, RouterStats::default());
    }
}
