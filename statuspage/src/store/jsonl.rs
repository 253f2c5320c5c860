//! Append-only JSON-lines store with an in-memory cache.
//!
//! One line per tick, so a tick is on disk whole or not at all. A line torn
//! by a crash is skipped on load and never glued to the next append.

use super::{cutoff_for, MetricRecord, MetricsStore, StatusRecord, StoreError};
use crate::models::StoreBatch;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{info, warn};

pub struct JsonLinesStore {
    path: PathBuf,
    ticks: parking_lot::Mutex<Vec<StoreBatch>>,
}

impl JsonLinesStore {
    /// Opens (or creates) the store file and loads existing ticks.
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        if !path.exists() {
            fs::write(&path, "")?;
        }

        let ticks = load_ticks(&path)?;
        info!("[store] opened {:?} ({} ticks)", path, ticks.len());
        Ok(Self {
            path,
            ticks: parking_lot::Mutex::new(ticks),
        })
    }

    fn rewrite(&self, ticks: &[StoreBatch]) -> Result<(), StoreError> {
        let mut buf = Vec::new();
        for tick in ticks {
            serde_json::to_writer(&mut buf, tick)?;
            buf.push(b'\n');
        }
        let tmp = self.path.with_extension("tmp");
        let mut file = File::create(&tmp)?;
        file.write_all(&buf)?;
        // le contenu doit être sur disque avant que le rename le publie
        file.sync_data()?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn load_ticks(path: &Path) -> Result<Vec<StoreBatch>, StoreError> {
    let content = fs::read(path)?;
    let lines: Vec<&[u8]> = content
        .split(|b| *b == b'\n')
        .filter(|l| !l.iter().all(u8::is_ascii_whitespace))
        .collect();

    let mut ticks = Vec::with_capacity(lines.len());
    let mut skipped = 0;
    for (i, line) in lines.iter().enumerate() {
        match serde_json::from_slice::<StoreBatch>(line) {
            Ok(tick) => ticks.push(tick),
            // ligne tronquée par un crash pendant un append
            Err(e) => {
                warn!("[store] skipping unreadable line {} in {:?}: {}", i + 1, path, e);
                skipped += 1;
            }
        }
    }

    // plus d'une ligne et aucune lisible : ce n'est pas un store
    if ticks.is_empty() && skipped > 1 {
        return Err(StoreError::Corrupt(format!("{:?}: no readable tick in {} lines", path, skipped)));
    }
    Ok(ticks)
}

/// Appends `buf` as whole lines. A missing trailing newline (torn previous
/// append) is repaired first; on failure the file is cut back to its length.
fn append_lines(path: &Path, mut buf: Vec<u8>) -> Result<(), StoreError> {
    let mut file = OpenOptions::new().read(true).append(true).open(path)?;
    let len = file.metadata()?.len();
    if len > 0 {
        let mut last = [0u8; 1];
        file.seek(SeekFrom::End(-1))?;
        file.read_exact(&mut last)?;
        if last[0] != b'\n' {
            buf.insert(0, b'\n');
        }
    }

    let written = file.write_all(&buf).and_then(|()| file.sync_data());
    if let Err(e) = written {
        if let Err(trunc) = file.set_len(len) {
            warn!("[store] failed to roll back partial append: {}", trunc);
        }
        return Err(e.into());
    }
    Ok(())
}

fn metric_records(tick: &StoreBatch) -> impl Iterator<Item = MetricRecord> + '_ {
    tick.metrics.iter().map(move |m| MetricRecord {
        kind: m.kind.clone(),
        value: m.value,
        timestamp: tick.at,
    })
}

fn status_records(tick: &StoreBatch) -> impl Iterator<Item = StatusRecord> + '_ {
    tick.statuses.iter().map(move |s| StatusRecord {
        service: s.service.clone(),
        status: s.status.clone(),
        details: s.details.clone(),
        timestamp: tick.at,
    })
}

impl MetricsStore for JsonLinesStore {
    fn batch_write(&self, batch: &StoreBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut buf = serde_json::to_vec(batch)?;
        buf.push(b'\n');

        // Lock tenu pendant l'append pour sérialiser avec la purge
        let mut ticks = self.ticks.lock();
        append_lines(&self.path, buf)?;
        ticks.push(batch.clone());
        Ok(())
    }

    fn latest_status_per_entity(&self) -> Result<HashMap<String, StatusRecord>, StoreError> {
        let ticks = self.ticks.lock();
        let mut latest: HashMap<String, StatusRecord> = HashMap::new();
        for s in ticks.iter().flat_map(status_records) {
            let newer = latest
                .get(&s.service)
                .map_or(true, |cur| s.timestamp >= cur.timestamp);
            if newer {
                latest.insert(s.service.clone(), s);
            }
        }
        Ok(latest)
    }

    fn history_since(&self, kind: &str, window: Duration) -> Result<Vec<MetricRecord>, StoreError> {
        let since = cutoff_for(window);
        let ticks = self.ticks.lock();
        let mut out: Vec<MetricRecord> = ticks
            .iter()
            .filter(|t| t.at >= since)
            .flat_map(metric_records)
            .filter(|m| m.kind == kind)
            .collect();
        out.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(out)
    }

    fn status_history(&self, service: &str, window: Duration) -> Result<Vec<StatusRecord>, StoreError> {
        let since = cutoff_for(window);
        let ticks = self.ticks.lock();
        let mut out: Vec<StatusRecord> = ticks
            .iter()
            .filter(|t| t.at >= since)
            .flat_map(status_records)
            .filter(|s| s.service == service)
            .collect();
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(out)
    }

    fn ping(&self) -> Result<(), StoreError> {
        OpenOptions::new().append(true).open(&self.path)?;
        Ok(())
    }

    fn size_bytes(&self) -> Result<u64, StoreError> {
        Ok(fs::metadata(&self.path)?.len())
    }

    /// Counts removed rows, not ticks.
    fn delete_before(&self, cutoff: OffsetDateTime) -> Result<usize, StoreError> {
        let mut ticks = self.ticks.lock();
        let (kept, dropped): (Vec<StoreBatch>, Vec<StoreBatch>) =
            ticks.iter().cloned().partition(|t| t.at >= cutoff);
        if dropped.is_empty() {
            return Ok(0);
        }
        self.rewrite(&kept)?;
        *ticks = kept;
        Ok(dropped.iter().map(StoreBatch::len).sum())
    }
}
