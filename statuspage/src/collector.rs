//! Periodic collection loop.
//!
//! One tick = sample every adapter concurrently, assemble a snapshot, publish
//! it, persist the batch. Ticks never overlap: a slow tick delays
//! the next one and missed ticks are not replayed.

use crate::models::HostReachability;
use crate::snapshot::{assemble, NetBaseline, Samples, StoreProbe};
use crate::sources::{ContainerCapability, Sources};
use crate::state::SnapshotCell;
use crate::store::SharedStore;
use futures::future::join_all;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

pub struct Collector {
    sources: Sources,
    store: SharedStore,
    cell: SnapshotCell,
    interval: Duration,
    baseline: Option<NetBaseline>,
}

impl Collector {
    pub fn new(sources: Sources, store: SharedStore, cell: SnapshotCell, interval: Duration) -> Self {
        Self {
            sources,
            store,
            cell,
            interval,
            baseline: None,
        }
    }

    /// Collects once right away, then on every tick until `shutdown` flips.
    /// An in-flight tick always finishes before the loop exits.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        if let ContainerCapability::Disabled(reason) = &self.sources.containers {
            info!("[collector] container monitoring disabled: {}", reason);
        }
        info!("[collector] started, interval {:?}", self.interval);

        self.collect().await;

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // consomme le tick immédiat, la première collecte vient d'avoir lieu
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.collect().await,
                _ = shutdown.changed() => break,
            }
        }
        info!("[collector] stopped");
    }

    pub async fn collect(&mut self) {
        let started = Instant::now();
        let samples = self.sample_all().await;

        let assembly = assemble(&samples, self.baseline, OffsetDateTime::now_utc());
        self.baseline = assembly.baseline;

        self.cell.publish(assembly.snapshot);

        let batch = assembly.batch;
        if !batch.is_empty() {
            let store = self.store.clone();
            let rows = batch.len();
            match tokio::task::spawn_blocking(move || store.batch_write(&batch)).await {
                Ok(Ok(())) => debug!("[collector] stored {} rows", rows),
                Ok(Err(e)) => error!("[collector] failed to store metrics: {}", e),
                Err(e) => error!("[collector] store task failed: {}", e),
            }
        }
        debug!("[collector] tick done in {:?}", started.elapsed());
    }

    async fn sample_all(&mut self) -> Samples {
        let Sources {
            system,
            balancer,
            containers,
            probes,
        } = &mut self.sources;

        let system_fut = async {
            match system.sample().await {
                Ok(s) => Some(s),
                Err(e) => {
                    warn!("[collector] system metrics unavailable: {}", e);
                    None
                }
            }
        };

        let balancer_fut = async {
            match balancer.sample().await {
                Ok(b) => Some(b),
                Err(e) => {
                    warn!("[collector] haproxy unavailable: {}", e);
                    None
                }
            }
        };

        let containers_fut = async {
            match containers {
                ContainerCapability::Available(source) => match source.sample().await {
                    Ok(c) => Some(c),
                    Err(e) => {
                        warn!("[collector] docker unavailable: {}", e);
                        None
                    }
                },
                ContainerCapability::Disabled(_) => None,
            }
        };

        let hosts_fut = join_all(probes.iter().map(|probe| async move {
            let reachable = match probe.probe().await {
                Ok(()) => true,
                Err(e) => {
                    debug!("[collector] host {} unreachable: {}", probe.name(), e);
                    false
                }
            };
            HostReachability {
                name: probe.name().to_string(),
                reachable,
            }
        }));

        let store = self.store.clone();
        let store_fut = async move {
            let probe = tokio::task::spawn_blocking(move || StoreProbe {
                size_bytes: store.size_bytes().ok(),
                ping_ok: store.ping().is_ok(),
            })
            .await;
            match probe {
                Ok(p) => p,
                Err(e) => {
                    warn!("[collector] store probe failed: {}", e);
                    StoreProbe::default()
                }
            }
        };

        let (system, balancer, containers, hosts, store) =
            tokio::join!(system_fut, balancer_fut, containers_fut, hosts_fut, store_fut);

        Samples {
            system,
            balancer,
            containers,
            store,
            hosts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StoreBatch;
    use crate::sources::{
        Backend, BalancerSource, ContainerInfo, ContainerSource, HostProbe, NetCounters, NetReading,
        SourceError, SystemSample, SystemSource, Usage,
    };
    use crate::store::{MetricRecord, MetricsStore, StatusRecord, StoreError};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Arc;

    /// Replays a scripted list of results, one per tick. Network counters are
    /// stamped when handed out, like a real read.
    struct ScriptedSystem(VecDeque<Result<SystemSample, SourceError>>);

    #[async_trait]
    impl SystemSource for ScriptedSystem {
        async fn sample(&mut self) -> Result<SystemSample, SourceError> {
            let mut next = self
                .0
                .pop_front()
                .unwrap_or_else(|| Err(SourceError::Unavailable("script exhausted".into())));
            if let Ok(SystemSample { network: Some(n), .. }) = next.as_mut() {
                n.at = Instant::now();
            }
            next
        }
    }

    struct ScriptedBalancer {
        script: Mutex<VecDeque<Result<Vec<Backend>, SourceError>>>,
        first_delay: Option<Duration>,
        calls: Mutex<usize>,
    }

    impl ScriptedBalancer {
        fn new(script: Vec<Result<Vec<Backend>, SourceError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                first_delay: None,
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl BalancerSource for ScriptedBalancer {
        async fn sample(&self) -> Result<Vec<Backend>, SourceError> {
            let first = {
                let mut calls = self.calls.lock();
                *calls += 1;
                *calls == 1
            };
            if let (true, Some(delay)) = (first, self.first_delay) {
                tokio::time::sleep(delay).await;
            }
            self.script
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(SourceError::Unavailable("script exhausted".into())))
        }
    }

    struct FixedContainers(Vec<ContainerInfo>);

    #[async_trait]
    impl ContainerSource for FixedContainers {
        async fn sample(&self) -> Result<Vec<ContainerInfo>, SourceError> {
            Ok(self.0.clone())
        }
    }

    struct FakeProbe {
        name: String,
        up: bool,
    }

    #[async_trait]
    impl HostProbe for FakeProbe {
        fn name(&self) -> &str {
            &self.name
        }
        async fn probe(&self) -> Result<(), SourceError> {
            if self.up {
                Ok(())
            } else {
                Err(SourceError::Timeout(Duration::from_secs(2)))
            }
        }
    }

    #[derive(Default)]
    struct RecordingStore {
        batches: Mutex<Vec<StoreBatch>>,
        fail_writes: bool,
    }

    impl MetricsStore for RecordingStore {
        fn batch_write(&self, batch: &StoreBatch) -> Result<(), StoreError> {
            if self.fail_writes {
                return Err(StoreError::Corrupt("disk full".into()));
            }
            self.batches.lock().push(batch.clone());
            Ok(())
        }
        fn latest_status_per_entity(&self) -> Result<HashMap<String, StatusRecord>, StoreError> {
            Ok(HashMap::new())
        }
        fn history_since(&self, _: &str, _: Duration) -> Result<Vec<MetricRecord>, StoreError> {
            Ok(Vec::new())
        }
        fn status_history(&self, _: &str, _: Duration) -> Result<Vec<StatusRecord>, StoreError> {
            Ok(Vec::new())
        }
        fn ping(&self) -> Result<(), StoreError> {
            Ok(())
        }
        fn size_bytes(&self) -> Result<u64, StoreError> {
            Ok(2048)
        }
        fn delete_before(&self, _: time::OffsetDateTime) -> Result<usize, StoreError> {
            Ok(0)
        }
    }

    fn system_sample(cpu: f64, rx: u64) -> SystemSample {
        SystemSample {
            cpu_percent: Some(cpu),
            memory: Some(Usage { used: 1, total: 4 }),
            disk: Some(Usage { used: 1, total: 2 }),
            network: Some(NetReading {
                counters: NetCounters { rx_bytes: rx, tx_bytes: rx },
                at: Instant::now(),
            }),
            uptime_secs: Some(600),
        }
    }

    fn web_backend() -> Backend {
        Backend {
            name: "web".into(),
            status: "UP".into(),
            active: true,
            last_change: Some(120),
            ..Default::default()
        }
    }

    fn collector(
        system: Vec<Result<SystemSample, SourceError>>,
        balancer: Vec<Result<Vec<Backend>, SourceError>>,
        store: Arc<RecordingStore>,
    ) -> (Collector, SnapshotCell) {
        let cell = SnapshotCell::new();
        let sources = Sources {
            system: Box::new(ScriptedSystem(system.into())),
            balancer: Box::new(ScriptedBalancer::new(balancer)),
            containers: ContainerCapability::Available(Box::new(FixedContainers(vec![ContainerInfo {
                name: "mosquitto".into(),
                state: "running".into(),
                health: None,
                started_at: None,
            }]))),
            probes: vec![
                Box::new(FakeProbe { name: "pi5".into(), up: true }),
                Box::new(FakeProbe { name: "nas".into(), up: false }),
            ],
        };
        let c = Collector::new(sources, store, cell.clone(), Duration::from_secs(5));
        (c, cell)
    }

    #[tokio::test]
    async fn test_collect_publishes_and_persists() {
        let store = Arc::new(RecordingStore::default());
        let (mut c, cell) = collector(
            vec![Ok(system_sample(20.0, 1000))],
            vec![Ok(vec![web_backend()])],
            store.clone(),
        );
        c.collect().await;

        let snap = cell.current();
        assert!(snap.collected_at.is_some());
        assert_eq!(snap.system.cpu_percent, 20.0);
        assert_eq!(snap.system.network_in, 0.0);
        assert!(snap.connectivity.balancer);
        assert!(snap.connectivity.containers);
        assert_eq!(snap.store.size_bytes, 2048);
        assert_eq!(snap.services.len(), 2);

        let hosts: Vec<(&str, bool)> = snap
            .connectivity
            .hosts
            .iter()
            .map(|h| (h.name.as_str(), h.reachable))
            .collect();
        assert_eq!(hosts, [("pi5", true), ("nas", false)]);

        let batches = store.batches.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].statuses.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_source_does_not_leak_previous_tick() {
        let store = Arc::new(RecordingStore::default());
        let (mut c, cell) = collector(
            vec![
                Ok(system_sample(20.0, 1000)),
                Err(SourceError::Unavailable("gone".into())),
            ],
            vec![Ok(vec![web_backend()]), Err(SourceError::Parse("garbage".into()))],
            store,
        );

        c.collect().await;
        assert_eq!(cell.current().system.cpu_percent, 20.0);

        c.collect().await;
        let snap = cell.current();
        assert_eq!(snap.system.cpu_percent, 0.0);
        assert_eq!(snap.system.memory_total, 0);
        assert!(!snap.connectivity.balancer);
        // seul le conteneur reste
        assert_eq!(snap.services.len(), 1);
        assert!(snap.connectivity.containers);
    }

    #[tokio::test]
    async fn test_store_failure_still_publishes() {
        let store = Arc::new(RecordingStore {
            fail_writes: true,
            ..Default::default()
        });
        let (mut c, cell) = collector(
            vec![Ok(system_sample(33.0, 0))],
            vec![Ok(vec![web_backend()])],
            store.clone(),
        );
        c.collect().await;
        assert_eq!(cell.current().system.cpu_percent, 33.0);
        assert!(store.batches.lock().is_empty());
    }

    #[tokio::test]
    async fn test_rate_uses_previous_tick_as_baseline() {
        let store = Arc::new(RecordingStore::default());
        let (mut c, cell) = collector(
            vec![Ok(system_sample(1.0, 1_000)), Ok(system_sample(1.0, 1_000_000))],
            vec![Ok(vec![]), Ok(vec![])],
            store,
        );
        c.collect().await;
        assert_eq!(cell.current().system.network_in, 0.0);

        tokio::time::sleep(Duration::from_millis(20)).await;
        c.collect().await;
        assert!(cell.current().system.network_in > 0.0);
    }

    #[tokio::test]
    async fn test_slow_adapter_does_not_skew_network_rate() {
        let store = Arc::new(RecordingStore::default());
        let (mut c, cell) = collector(
            vec![Ok(system_sample(1.0, 0)), Ok(system_sample(1.0, 1_000))],
            vec![],
            store,
        );
        // la première collecte attend 500 ms sur haproxy, après le relevé réseau
        c.sources.balancer = Box::new(ScriptedBalancer {
            first_delay: Some(Duration::from_millis(500)),
            ..ScriptedBalancer::new(vec![Ok(vec![]), Ok(vec![])])
        });

        c.collect().await;
        c.collect().await;

        // 1000 octets en ~500 ms entre les deux relevés, soit ~2000 o/s ;
        // un Δt pris en fin de collecte donnerait un débit bien plus haut
        let rate = cell.current().system.network_in;
        assert!((1_500.0..=2_100.0).contains(&rate), "rate {rate}");
    }

    #[tokio::test]
    async fn test_disabled_runtime_reports_disconnected() {
        let store = Arc::new(RecordingStore::default());
        let (mut c, cell) = collector(vec![Ok(system_sample(1.0, 0))], vec![Ok(vec![])], store);
        c.sources.containers = ContainerCapability::Disabled("no socket".into());
        c.collect().await;
        let snap = cell.current();
        assert!(!snap.connectivity.containers);
        assert!(snap.services.is_empty());
    }

    #[tokio::test]
    async fn test_run_collects_immediately_and_stops() {
        let store = Arc::new(RecordingStore::default());
        let (mut c, cell) = collector(
            vec![Ok(system_sample(9.0, 0)), Ok(system_sample(9.0, 0))],
            vec![Ok(vec![]), Ok(vec![])],
            store.clone(),
        );
        c.interval = Duration::from_millis(100);
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(c.run(rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cell.current().system.cpu_percent, 9.0);
        assert_eq!(store.batches.lock().len(), 1);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(store.batches.lock().len() >= 2);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("collector did not stop")
            .unwrap();
    }
}
