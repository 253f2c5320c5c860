//! Pure aggregation of one tick's raw adapter outputs into a [`Snapshot`] and
//! the matching [`StoreBatch`]. No I/O happens here.
//!
//! Every field is computed from the samples passed in. A source that failed
//! this tick leaves its fields at zero / false / empty; nothing carries over
//! from the previous snapshot except the network baseline used for rates.

use crate::format::format_secs;
use crate::models::{
    Connectivity, HostReachability, MetricRow, ServiceSource, ServiceStatus, Snapshot, StatusRow,
    StoreBatch, StoreHealth, SystemMetrics,
};
use crate::sources::{Backend, ContainerInfo, NetCounters, NetReading, SystemSample};
use time::OffsetDateTime;

/// Raw outputs of one tick. `None` means the adapter failed (already logged).
#[derive(Debug, Clone, Default)]
pub struct Samples {
    pub system: Option<SystemSample>,
    pub balancer: Option<Vec<Backend>>,
    /// `None` when the runtime is disabled or the listing failed.
    pub containers: Option<Vec<ContainerInfo>>,
    pub store: StoreProbe,
    pub hosts: Vec<HostReachability>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StoreProbe {
    pub size_bytes: Option<u64>,
    pub ping_ok: bool,
}

/// Previous cumulative network counters and when they were read.
pub type NetBaseline = NetReading;

#[derive(Debug, Clone)]
pub struct Assembly {
    pub snapshot: Snapshot,
    pub batch: StoreBatch,
    pub baseline: Option<NetBaseline>,
}

pub fn assemble(
    samples: &Samples,
    baseline: Option<NetBaseline>,
    wall: OffsetDateTime,
) -> Assembly {
    let mut metrics = Vec::new();
    let mut system = SystemMetrics::default();
    let mut next_baseline = baseline;

    if let Some(sample) = &samples.system {
        if let Some(cpu) = sample.cpu_percent {
            system.cpu_percent = cpu;
            metrics.push(MetricRow::new("cpu", cpu));
        }
        if let Some(mem) = sample.memory {
            system.memory_percent = mem.percent();
            system.memory_used = mem.used;
            system.memory_total = mem.total;
            metrics.push(MetricRow::new("memory", system.memory_percent));
            metrics.push(MetricRow::new("memory_used", mem.used as f64));
            metrics.push(MetricRow::new("memory_total", mem.total as f64));
        }
        if let Some(disk) = sample.disk {
            system.disk_percent = disk.percent();
            system.disk_used = disk.used;
            system.disk_total = disk.total;
            metrics.push(MetricRow::new("disk", system.disk_percent));
            metrics.push(MetricRow::new("disk_used", disk.used as f64));
            metrics.push(MetricRow::new("disk_total", disk.total as f64));
        }
        if let Some(reading) = sample.network {
            let (rx, tx) = network_rate(baseline, reading);
            system.network_in = rx;
            system.network_out = tx;
            next_baseline = Some(reading);
            metrics.push(MetricRow::new("network_in_rate", rx));
            metrics.push(MetricRow::new("network_out_rate", tx));
        }
        system.uptime_secs = sample.uptime_secs.unwrap_or(0);
    }

    let store = store_health(samples.store);
    if let Some(size) = samples.store.size_bytes {
        metrics.push(MetricRow::new("database_size", size as f64));
    }

    let mut services = Vec::new();
    if let Some(backends) = &samples.balancer {
        services.extend(backends.iter().map(backend_status));
    }
    if let Some(containers) = &samples.containers {
        services.extend(containers.iter().map(|c| container_status(c, wall)));
    }

    let statuses = services
        .iter()
        .map(|s| StatusRow {
            service: s.key(),
            status: if s.healthy { "UP" } else { "DOWN" }.to_string(),
            details: s.details.clone().unwrap_or_default(),
        })
        .collect();

    let snapshot = Snapshot {
        collected_at: Some(wall),
        system,
        store,
        connectivity: Connectivity {
            balancer: samples.balancer.is_some(),
            containers: samples.containers.is_some(),
            hosts: samples.hosts.clone(),
        },
        services,
    };

    Assembly {
        snapshot,
        batch: StoreBatch {
            at: wall,
            metrics,
            statuses,
        },
        baseline: next_baseline,
    }
}

/// Bytes per second between two readings, clamped at zero (counter reset /
/// reboot). Without a baseline there is nothing to diff against and the rate
/// is 0.
pub fn network_rate(prev: Option<NetBaseline>, current: NetReading) -> (f64, f64) {
    let Some(prev) = prev else {
        return (0.0, 0.0);
    };
    let elapsed = current.at.saturating_duration_since(prev.at).as_secs_f64();
    if elapsed <= 0.0 {
        return (0.0, 0.0);
    }
    let rate = |cur: u64, old: u64| ((cur as f64 - old as f64) / elapsed).max(0.0);
    let NetCounters { rx_bytes, tx_bytes } = current.counters;
    (
        rate(rx_bytes, prev.counters.rx_bytes),
        rate(tx_bytes, prev.counters.tx_bytes),
    )
}

fn store_health(probe: StoreProbe) -> StoreHealth {
    match probe.size_bytes {
        Some(size) => StoreHealth {
            connected: true,
            size_bytes: size,
        },
        // la taille a échoué mais le store répond encore
        None => StoreHealth {
            connected: probe.ping_ok,
            size_bytes: 0,
        },
    }
}

/// HAProxy only knows the time since the last UP/DOWN transition, so a healthy
/// backend's uptime is that value, even if it was up before monitoring began.
fn backend_status(backend: &Backend) -> ServiceStatus {
    let last_change = backend.last_change.filter(|&s| s > 0).map(format_secs);
    let (uptime, details) = if backend.active {
        (last_change.clone(), None)
    } else {
        let details = match &last_change {
            Some(lc) => format!("Down for {lc}"),
            None => "Down".to_string(),
        };
        (None, Some(details))
    };

    ServiceStatus {
        source: ServiceSource::Balancer,
        name: backend.name.clone(),
        status: backend.status.clone(),
        healthy: backend.active,
        last_change,
        details,
        uptime,
        stats: Some(backend.stats.clone()),
    }
}

fn container_status(container: &ContainerInfo, wall: OffsetDateTime) -> ServiceStatus {
    let running = container.state == "running";
    let (healthy, details) = match container.health.as_deref() {
        Some("healthy") => (true, None),
        Some(other) => (false, Some(other.to_string())),
        None => (running, None),
    };
    let uptime = container
        .started_at
        .filter(|_| running)
        .map(|started| format_secs((wall - started).whole_seconds().max(0) as u64));

    ServiceStatus {
        source: ServiceSource::Container,
        name: container.name.clone(),
        status: container.state.clone(),
        healthy,
        last_change: None,
        details,
        uptime,
        stats: None,
    }
}
