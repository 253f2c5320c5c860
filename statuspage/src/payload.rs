//! Flat "signals" payload pushed to dashboard clients.
//!
//! The dashboard binds to flat keys (`cpuPercent`, `service3_status`, ...), so
//! the typed [`Snapshot`] is flattened here and only here. Numbers are sent as
//! pre-formatted strings, flags as booleans.

use crate::format::{format_bytes, format_percent, format_secs};
use crate::models::Snapshot;
use serde::Serialize;
use std::collections::BTreeMap;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

pub const SIGNALS_EVENT: &str = "datastar-patch-signals";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SignalValue {
    Text(String),
    Flag(bool),
}

impl From<String> for SignalValue {
    fn from(s: String) -> Self {
        SignalValue::Text(s)
    }
}

impl From<&str> for SignalValue {
    fn from(s: &str) -> Self {
        SignalValue::Text(s.to_string())
    }
}

impl From<bool> for SignalValue {
    fn from(b: bool) -> Self {
        SignalValue::Flag(b)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Signals(BTreeMap<String, SignalValue>);

impl Signals {
    fn set(&mut self, key: impl Into<String>, value: impl Into<SignalValue>) {
        self.0.insert(key.into(), value.into());
    }

    /// Body of an SSE `data:` line, e.g. `signals {"cpuPercent":"12.0",...}`.
    pub fn to_sse_data(&self) -> Result<String, serde_json::Error> {
        Ok(format!("signals {}", serde_json::to_string(self)?))
    }
}

// lecture typée, pour les tests
#[cfg(test)]
impl Signals {
    pub fn get(&self, key: &str) -> Option<&SignalValue> {
        self.0.get(key)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(SignalValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    pub fn flag(&self, key: &str) -> Option<bool> {
        match self.0.get(key) {
            Some(SignalValue::Flag(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Flattens a snapshot into the dashboard's key/value signals.
pub fn signals(snapshot: &Snapshot) -> Signals {
    let sys = &snapshot.system;
    let mut out = Signals::default();

    out.set("cpuPercent", format_percent(sys.cpu_percent));
    out.set("memoryPercent", format_percent(sys.memory_percent));
    out.set("memoryUsed", format_bytes(sys.memory_used as f64));
    out.set("memoryTotal", format_bytes(sys.memory_total as f64));
    out.set("diskPercent", format_percent(sys.disk_percent));
    out.set("diskUsed", format_bytes(sys.disk_used as f64));
    out.set("diskTotal", format_bytes(sys.disk_total as f64));
    out.set("networkIn", format_bytes(sys.network_in));
    out.set("networkOut", format_bytes(sys.network_out));
    out.set("uptime", format_secs(sys.uptime_secs));
    out.set("databaseSize", format_bytes(snapshot.store.size_bytes as f64));
    out.set("databaseConnected", snapshot.store.connected);
    out.set("haproxyConnected", snapshot.connectivity.balancer);
    out.set("dockerConnected", snapshot.connectivity.containers);
    out.set("lastUpdated", last_updated(snapshot.collected_at));

    for (i, host) in snapshot.connectivity.hosts.iter().enumerate() {
        out.set(format!("host{i}_name"), host.name.as_str());
        out.set(format!("host{i}_reachable"), host.reachable);
    }

    for (i, svc) in snapshot.services.iter().enumerate() {
        out.set(format!("service{i}_name"), svc.name.as_str());
        out.set(format!("service{i}_status"), svc.status.as_str());
        out.set(format!("service{i}_healthy"), svc.healthy);
        out.set(format!("service{i}_details"), svc.details.clone().unwrap_or_default());
        out.set(format!("service{i}_uptime"), svc.uptime.clone().unwrap_or_default());
    }

    out
}

/// `YYYY-MM-DD HH:MM:SS` in the host's local offset (UTC when it cannot be
/// determined).
pub fn last_updated(at: Option<OffsetDateTime>) -> String {
    let Some(at) = at else {
        return "never".to_string();
    };
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    at.to_offset(offset)
        .format(format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"))
        .unwrap_or_default()
}
