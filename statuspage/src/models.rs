use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Origin of a monitored service. Used to namespace service keys so that a
/// backend and a container sharing a name never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceSource {
    Balancer,
    Container,
}

impl ServiceSource {
    pub fn prefix(self) -> &'static str {
        match self {
            ServiceSource::Balancer => "haproxy",
            ServiceSource::Container => "docker",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub source: ServiceSource,
    pub name: String,
    pub status: String,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_change: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime: Option<String>,
    /// Load-balancer counters, only for backends.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<BackendStats>,
}

/// Check and traffic counters of a load-balancer backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendStats {
    pub check_status: String,
    pub check_code: u32,
    pub check_duration_ms: u64,
    pub downtime_secs: u64,
    pub conn_rate: u64,
    pub conn_rate_max: u64,
    pub sessions_current: u64,
    pub sessions_max: u64,
    pub sessions_total: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

impl ServiceStatus {
    /// Store key, e.g. `haproxy_web` or `docker_mosquitto`.
    pub fn key(&self) -> String {
        format!("{}_{}", self.source.prefix(), self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_used: u64,
    pub memory_total: u64,
    pub disk_percent: f64,
    pub disk_used: u64,
    pub disk_total: u64,
    /// Bytes per second received since the previous tick.
    pub network_in: f64,
    /// Bytes per second sent since the previous tick.
    pub network_out: f64,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreHealth {
    pub connected: bool,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostReachability {
    pub name: String,
    pub reachable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Connectivity {
    pub balancer: bool,
    pub containers: bool,
    pub hosts: Vec<HostReachability>,
}

/// Everything observed during one collection tick.
///
/// A snapshot is built in one go by [`crate::snapshot::assemble`] and never
/// mutated after it has been published.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    #[serde(with = "time::serde::rfc3339::option")]
    pub collected_at: Option<OffsetDateTime>,
    pub system: SystemMetrics,
    pub store: StoreHealth,
    pub connectivity: Connectivity,
    pub services: Vec<ServiceStatus>,
}

// Lignes destinées au store, une batch par tick

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRow {
    pub kind: String,
    pub value: f64,
}

impl MetricRow {
    pub fn new(kind: &str, value: f64) -> Self {
        Self { kind: kind.to_string(), value }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRow {
    pub service: String,
    pub status: String,
    pub details: String,
}

/// One tick of rows; also the on-disk line format of the JSON-lines store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreBatch {
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    pub metrics: Vec<MetricRow>,
    pub statuses: Vec<StatusRow>,
}

impl StoreBatch {
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty() && self.statuses.is_empty()
    }

    pub fn len(&self) -> usize {
        self.metrics.len() + self.statuses.len()
    }
}
