//! HAProxy stats over the admin Unix socket.
//!
//! Sends `show stat` and keeps the `BACKEND` aggregate row of every proxy.

use super::{with_timeout, Backend, BalancerSource, SourceError};
use crate::models::BackendStats;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

pub struct HaproxyClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl HaproxyClient {
    pub fn new<P: Into<PathBuf>>(socket_path: P, timeout: Duration) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout,
        }
    }

    async fn fetch_raw(&self) -> Result<String, SourceError> {
        let mut stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            SourceError::Unavailable(format!(
                "failed to connect to HAProxy socket {}: {}",
                self.socket_path.display(),
                e
            ))
        })?;
        stream.write_all(b"show stat\n").await?;

        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await?;
        String::from_utf8(buf).map_err(|e| SourceError::Parse(format!("stats not UTF-8: {e}")))
    }
}

#[async_trait]
impl BalancerSource for HaproxyClient {
    async fn sample(&self) -> Result<Vec<Backend>, SourceError> {
        let raw = with_timeout(self.timeout, self.fetch_raw()).await?;
        parse_stats(&raw)
    }
}

/// Parses the CSV returned by `show stat`.
///
/// The header is the first line, prefixed with `# `. Empty numeric cells are
/// read as zero.
pub fn parse_stats(raw: &str) -> Result<Vec<Backend>, SourceError> {
    let mut lines = raw.lines().filter(|l| !l.trim().is_empty());
    let header = lines
        .next()
        .ok_or_else(|| SourceError::Parse("empty stats response".into()))?;
    let header = header.trim_start_matches('#').trim();

    let columns: HashMap<&str, usize> = header
        .split(',')
        .enumerate()
        .map(|(i, c)| (c.trim(), i))
        .collect();
    for required in ["pxname", "svname", "status"] {
        if !columns.contains_key(required) {
            return Err(SourceError::Parse(format!("missing column '{required}'")));
        }
    }

    let mut backends = Vec::new();
    for line in lines {
        if line.starts_with('#') {
            continue;
        }
        let record: Vec<&str> = line.split(',').collect();
        let field = |name: &str| cell(&columns, &record, name);
        let number = |name: &str| -> u64 { cell(&columns, &record, name).parse().unwrap_or(0) };

        if field("svname") != "BACKEND" {
            continue;
        }

        let status = field("status").to_string();
        backends.push(Backend {
            name: field("pxname").to_string(),
            active: status == "UP",
            status,
            last_change: field("lastchg").parse().ok(),
            stats: BackendStats {
                check_status: field("check_status").to_string(),
                check_code: field("check_code").parse().unwrap_or(0),
                check_duration_ms: number("check_duration"),
                downtime_secs: number("downtime"),
                conn_rate: number("rate"),
                conn_rate_max: number("rate_max"),
                sessions_current: number("scur"),
                sessions_max: number("smax"),
                sessions_total: number("stot"),
                bytes_in: number("bin"),
                bytes_out: number("bout"),
            },
        });
    }

    Ok(backends)
}

fn cell<'a>(columns: &HashMap<&str, usize>, record: &[&'a str], name: &str) -> &'a str {
    columns
        .get(name)
        .and_then(|&i| record.get(i))
        .map(|v| v.trim())
        .unwrap_or("")
}
