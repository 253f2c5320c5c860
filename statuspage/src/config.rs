use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};
use tokio::fs;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid period: {0:?}")]
    InvalidPeriod(String),
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct StatusConfig {
    pub listen: String,
    pub port: u16,
    pub collect_interval_secs: u64,
    pub broadcast_interval_secs: u64,
    pub haproxy: HaproxyConf,
    pub docker: DockerConf,
    pub probes: Vec<ProbeConf>,
    pub probe_timeout_secs: u64,
    pub store: StoreConf,
    pub client_queue_capacity: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct HaproxyConf {
    pub socket: String, // ex: "/var/run/haproxy/admin.sock"
    pub timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DockerConf {
    pub enabled: bool,
    pub timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ProbeConf {
    pub name: String,
    pub address: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct StoreConf {
    pub path: String,
    pub retention_days: u64,
    pub sweep_interval_hours: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0".into(),
            port: 8080,
            collect_interval_secs: 5,
            broadcast_interval_secs: 5,
            haproxy: HaproxyConf::default(),
            docker: DockerConf::default(),
            probes: Vec::new(),
            probe_timeout_secs: 2,
            store: StoreConf::default(),
            client_queue_capacity: 4,
        }
    }
}

impl Default for HaproxyConf {
    fn default() -> Self {
        Self {
            socket: "/var/run/haproxy/admin.sock".into(),
            timeout_secs: 5,
        }
    }
}

impl Default for DockerConf {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: 5,
        }
    }
}

impl Default for StoreConf {
    fn default() -> Self {
        Self {
            path: "./data/metrics.jsonl".into(),
            retention_days: 7,
            sweep_interval_hours: 24,
        }
    }
}

impl StatusConfig {
    pub fn collect_interval(&self) -> Duration {
        Duration::from_secs(self.collect_interval_secs.max(1))
    }

    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_secs(self.broadcast_interval_secs.max(1))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs.max(1))
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.store.retention_days.saturating_mul(86_400))
    }

    /// Between one hour and one year.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.store.sweep_interval_hours.clamp(1, 24 * 365) * 3_600)
    }

    /// Applies `HAPROXY_SOCKET`, `PORT` and `STATUSPAGE_STORE` on top of the file.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(socket) = lookup("HAPROXY_SOCKET").filter(|s| !s.is_empty()) {
            self.haproxy.socket = socket;
        }
        if let Some(port) = lookup("PORT").filter(|s| !s.is_empty()) {
            self.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                key: "PORT".into(),
                value: port.clone(),
            })?;
        }
        if let Some(path) = lookup("STATUSPAGE_STORE").filter(|s| !s.is_empty()) {
            self.store.path = path;
        }
        Ok(())
    }
}

pub fn parse_config(txt: &str) -> Result<StatusConfig, ConfigError> {
    if txt.trim().is_empty() {
        return Ok(StatusConfig::default());
    }
    Ok(serde_yaml::from_str(txt)?)
}

pub async fn load_config() -> StatusConfig {
    let path = std::env::var("STATUSPAGE_CONFIG").unwrap_or_else(|_| "statuspage.yaml".into());
    let mut cfg = if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        parse_config(&txt).unwrap_or_else(|e| {
            warn!("[config] {} invalide: {}, usage config par défaut", path, e);
            StatusConfig::default()
        })
    } else {
        info!("[config] pas de {}, usage config par défaut", path);
        StatusConfig::default()
    };

    if let Err(e) = cfg.apply_overrides(|k| std::env::var(k).ok()) {
        warn!("[config] override ignoré: {}", e);
    }
    cfg
}

/// Longest history window accepted, roughly a century.
pub const MAX_PERIOD_SECS: u64 = 100 * 365 * 86_400;

/// Parses a history window such as `24h`, `90m` or `1h30m`.
/// Units: `s`, `m`, `h`, `d`. Windows over [`MAX_PERIOD_SECS`] are rejected.
pub fn parse_period(raw: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidPeriod(raw.to_string());
    let s = raw.trim();
    if s.is_empty() {
        return Err(invalid());
    }

    let mut total: u64 = 0;
    let mut digits = String::new();
    for c in s.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let unit = match c {
            's' => 1,
            'm' => 60,
            'h' => 3_600,
            'd' => 86_400,
            _ => return Err(invalid()),
        };
        let n: u64 = digits.parse().map_err(|_| invalid())?;
        total = n
            .checked_mul(unit)
            .and_then(|v| total.checked_add(v))
            .ok_or_else(invalid)?;
        digits.clear();
    }
    // nombre sans unité en fin de chaîne
    if !digits.is_empty() || total > MAX_PERIOD_SECS {
        return Err(invalid());
    }
    Ok(Duration::from_secs(total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let cfg = StatusConfig::default();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.collect_interval(), Duration::from_secs(5));
        assert_eq!(cfg.haproxy.socket, "/var/run/haproxy/admin.sock");
        assert_eq!(cfg.retention(), Duration::from_secs(7 * 86_400));
        assert_eq!(cfg.client_queue_capacity, 4);
        assert!(cfg.docker.enabled);
    }

    #[test]
    fn test_partial_yaml_keeps_other_defaults() {
        let cfg = parse_config(
            r#"
port: 9090
docker:
  enabled: false
probes:
  - name: pi5
    address: 192.168.1.20
store:
  retention_days: 30
"#,
        )
        .unwrap();
        assert_eq!(cfg.port, 9090);
        assert!(!cfg.docker.enabled);
        assert_eq!(cfg.docker.timeout_secs, 5);
        assert_eq!(cfg.probes.len(), 1);
        assert_eq!(cfg.probes[0].address, "192.168.1.20");
        assert_eq!(cfg.store.retention_days, 30);
        assert_eq!(cfg.store.path, "./data/metrics.jsonl");
        assert_eq!(cfg.broadcast_interval_secs, 5);
    }

    #[test]
    fn test_empty_and_invalid_yaml() {
        assert_eq!(parse_config("  \n").unwrap(), StatusConfig::default());
        assert!(matches!(parse_config("port: [nope"), Err(ConfigError::Yaml(_))));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("HAPROXY_SOCKET", "/tmp/haproxy.sock"),
            ("PORT", "3000"),
            ("STATUSPAGE_STORE", "/var/lib/statuspage/m.jsonl"),
        ]
        .into_iter()
        .collect();

        let mut cfg = StatusConfig::default();
        cfg.apply_overrides(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(cfg.haproxy.socket, "/tmp/haproxy.sock");
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.store.path, "/var/lib/statuspage/m.jsonl");

        let mut cfg = StatusConfig::default();
        let err = cfg.apply_overrides(|k| (k == "PORT").then(|| "http".to_string()));
        assert!(matches!(err, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_parse_period() {
        assert_eq!(parse_period("24h").unwrap(), Duration::from_secs(86_400));
        assert_eq!(parse_period("90m").unwrap(), Duration::from_secs(5_400));
        assert_eq!(parse_period("1h30m").unwrap(), Duration::from_secs(5_400));
        assert_eq!(parse_period("7d").unwrap(), Duration::from_secs(604_800));
        assert_eq!(parse_period("45s").unwrap(), Duration::from_secs(45));

        assert_eq!(parse_period("36500d").unwrap(), Duration::from_secs(MAX_PERIOD_SECS));

        for bad in ["", "h", "24", "24x", "-1h", "1.5h", "99999999999999999999d", "99999999d", "36501d"] {
            assert!(parse_period(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_huge_retention_and_sweep_values_saturate() {
        let mut cfg = StatusConfig::default();
        cfg.store.retention_days = u64::MAX;
        cfg.store.sweep_interval_hours = u64::MAX;
        assert_eq!(cfg.retention(), Duration::from_secs(u64::MAX));
        assert_eq!(cfg.sweep_interval(), Duration::from_secs(24 * 365 * 3_600));

        cfg.store.sweep_interval_hours = 0;
        assert_eq!(cfg.sweep_interval(), Duration::from_secs(3_600));
    }
}
