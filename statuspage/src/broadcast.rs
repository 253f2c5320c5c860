//! Live-update fan-out to connected dashboard clients.
//!
//! Every client owns a small bounded queue. Broadcasting never waits on a
//! client: when a queue is full the update is dropped for that client only,
//! and the next tick brings it up to date again (latest value wins).
//!
//! The registry lock is held only to add, remove or copy the set of queues,
//! never while sending.

use crate::payload::{signals, Signals};
use crate::state::SnapshotCell;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub type Update = Arc<Signals>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
    pub closed: usize,
}

struct Inner {
    clients: Mutex<HashMap<Uuid, mpsc::Sender<Update>>>,
    cell: SnapshotCell,
    capacity: usize,
}

#[derive(Clone)]
pub struct Broadcaster {
    inner: Arc<Inner>,
}

impl Broadcaster {
    pub fn new(cell: SnapshotCell, capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                clients: Mutex::new(HashMap::new()),
                cell,
                capacity: capacity.max(1),
            }),
        }
    }

    /// Registers a new client. Its queue already holds one catch-up update
    /// built from the current snapshot, so it never waits for the next tick
    /// and the catch-up always precedes any periodic update.
    pub fn connect(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        let id = Uuid::new_v4();

        let catch_up: Update = Arc::new(signals(&self.inner.cell.current()));
        if let Err(e) = tx.try_send(catch_up) {
            warn!("[sse] failed to queue initial update for {}: {}", id, e);
        }

        let total = {
            let mut clients = self.inner.clients.lock();
            clients.insert(id, tx);
            clients.len()
        };
        info!("[sse] client {} connected, total clients: {}", id, total);

        Subscription {
            id,
            rx,
            broadcaster: self.clone(),
        }
    }

    /// Removes a client from the registry. Dropping the stored sender closes
    /// the queue once the client has drained it.
    pub fn disconnect(&self, id: Uuid) -> bool {
        let (removed, total) = {
            let mut clients = self.inner.clients.lock();
            let removed = clients.remove(&id).is_some();
            (removed, clients.len())
        };
        if removed {
            info!("[sse] client {} disconnected, total clients: {}", id, total);
        }
        removed
    }

    pub fn client_count(&self) -> usize {
        self.inner.clients.lock().len()
    }

    /// Pushes the current snapshot to every registered client without blocking.
    pub fn broadcast_once(&self) -> BroadcastReport {
        let update: Update = Arc::new(signals(&self.inner.cell.current()));

        let targets: Vec<(Uuid, mpsc::Sender<Update>)> = {
            let clients = self.inner.clients.lock();
            clients.iter().map(|(id, tx)| (*id, tx.clone())).collect()
        };

        let mut report = BroadcastReport::default();
        let mut gone = Vec::new();
        for (id, tx) in targets {
            match tx.try_send(update.clone()) {
                Ok(()) => report.delivered += 1,
                // file pleine : on saute ce client pour ce tick
                Err(TrySendError::Full(_)) => report.dropped += 1,
                Err(TrySendError::Closed(_)) => {
                    report.closed += 1;
                    gone.push(id);
                }
            }
        }

        if !gone.is_empty() {
            let mut clients = self.inner.clients.lock();
            for id in &gone {
                clients.remove(id);
            }
        }

        if report.delivered + report.dropped + report.closed > 0 {
            debug!(
                "[sse] broadcast: {} delivered, {} dropped, {} closed",
                report.delivered, report.dropped, report.closed
            );
        }
        report
    }

    /// Drops every client queue; open streams end after draining.
    pub fn close_all(&self) {
        let n = {
            let mut clients = self.inner.clients.lock();
            let n = clients.len();
            clients.clear();
            n
        };
        if n > 0 {
            info!("[sse] closed {} client streams", n);
        }
    }

    /// Periodic broadcast loop, independent from the collector's ticker.
    pub async fn run(self, every: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.broadcast_once();
                }
                _ = shutdown.changed() => break,
            }
        }
        self.close_all();
        info!("[sse] broadcaster stopped");
    }
}

/// A connected client's end of its queue. Dropping it deregisters the client,
/// which is how a closed transport or a cancelled request cleans up.
pub struct Subscription {
    id: Uuid,
    rx: mpsc::Receiver<Update>,
    broadcaster: Broadcaster,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Waits for the next update; `None` once the queue has been closed.
    pub async fn recv(&mut self) -> Option<Update> {
        self.rx.recv().await
    }

    #[cfg(test)]
    pub fn try_recv(&mut self) -> Option<Update> {
        self.rx.try_recv().ok()
    }

    /// Deregisters and closes the queue: in-flight sends fail from now on,
    /// already-queued updates can still be drained.
    pub fn close(&mut self) {
        self.broadcaster.disconnect(self.id);
        self.rx.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Snapshot;

    fn cell_with_cpu(cpu: f64) -> SnapshotCell {
        let cell = SnapshotCell::new();
        publish_cpu(&cell, cpu);
        cell
    }

    fn publish_cpu(cell: &SnapshotCell, cpu: f64) {
        let mut snap = Snapshot::default();
        snap.system.cpu_percent = cpu;
        cell.publish(snap);
    }

    #[tokio::test]
    async fn test_catch_up_precedes_periodic_updates() {
        let cell = cell_with_cpu(42.0);
        let hub = Broadcaster::new(cell.clone(), 4);

        let mut sub = hub.connect();
        publish_cpu(&cell, 50.0);
        hub.broadcast_once();

        let first = sub.recv().await.unwrap();
        assert_eq!(first.text("cpuPercent"), Some("42.0"));
        let second = sub.recv().await.unwrap();
        assert_eq!(second.text("cpuPercent"), Some("50.0"));
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_exactly_one_catch_up_on_connect() {
        let hub = Broadcaster::new(cell_with_cpu(1.0), 4);
        let mut sub = hub.connect();
        assert!(sub.try_recv().is_some());
        assert!(sub.try_recv().is_none());
        assert_eq!(hub.client_count(), 1);
    }

    #[tokio::test]
    async fn test_full_queue_drops_only_that_client() {
        let hub = Broadcaster::new(cell_with_cpu(1.0), 2);
        let mut slow = hub.connect();
        let mut fast = hub.connect();

        // slow : catch-up + 1 = plein
        let r = hub.broadcast_once();
        assert_eq!(r, BroadcastReport { delivered: 2, dropped: 0, closed: 0 });
        while fast.try_recv().is_some() {}

        let r = hub.broadcast_once();
        assert_eq!(r, BroadcastReport { delivered: 1, dropped: 1, closed: 0 });
        assert!(fast.try_recv().is_some());

        let mut slow_count = 0;
        while slow.try_recv().is_some() {
            slow_count += 1;
        }
        assert_eq!(slow_count, 2);

        // une fois vidé, le client lent reçoit de nouveau
        let r = hub.broadcast_once();
        assert_eq!(r.delivered, 2);
        assert!(slow.try_recv().is_some());
    }

    #[tokio::test]
    async fn test_dropped_subscription_deregisters() {
        let hub = Broadcaster::new(SnapshotCell::new(), 4);
        let sub = hub.connect();
        assert_eq!(hub.client_count(), 1);
        drop(sub);
        assert_eq!(hub.client_count(), 0);
        assert_eq!(hub.broadcast_once(), BroadcastReport::default());
    }

    #[tokio::test]
    async fn test_closed_client_gets_nothing_more() {
        let hub = Broadcaster::new(SnapshotCell::new(), 4);
        let mut sub = hub.connect();
        sub.close();

        let r = hub.broadcast_once();
        assert_eq!(r.delivered, 0);
        // seul le catch-up déjà en file reste lisible
        assert!(sub.recv().await.is_some());
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_close_all_ends_streams() {
        let hub = Broadcaster::new(SnapshotCell::new(), 4);
        let mut sub = hub.connect();
        hub.close_all();
        assert_eq!(hub.client_count(), 0);
        assert!(sub.recv().await.is_some());
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_connects_and_broadcasts() {
        let hub = Broadcaster::new(cell_with_cpu(5.0), 2);
        let mut tasks = Vec::new();

        for i in 0..100 {
            let h = hub.clone();
            tasks.push(tokio::spawn(async move {
                let mut sub = h.connect();
                tokio::task::yield_now().await;
                let _ = sub.try_recv();
                if i % 2 == 0 {
                    sub.close();
                }
            }));
            let h = hub.clone();
            tasks.push(tokio::spawn(async move {
                h.broadcast_once();
            }));
        }

        let all = futures::future::join_all(tasks);
        let results = tokio::time::timeout(Duration::from_secs(10), all)
            .await
            .expect("fan-out deadlocked");
        for r in results {
            r.unwrap();
        }
        assert_eq!(hub.client_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let hub = Broadcaster::new(cell_with_cpu(3.0), 4);
        let mut sub = hub.connect();
        let (tx, rx) = watch::channel(false);

        let task = tokio::spawn(hub.clone().run(Duration::from_secs(5), rx));
        assert!(sub.recv().await.is_some());
        // le ticker ne part qu'après une période
        assert!(sub.recv().await.is_some());

        tx.send(true).unwrap();
        task.await.unwrap();
        assert_eq!(hub.client_count(), 0);
        while sub.recv().await.is_some() {}
    }
}
