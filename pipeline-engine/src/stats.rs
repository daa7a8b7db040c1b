//! Statistics surface (§4.5, §6): periodically snapshots every edge's
//! cumulative byte counter to a user-visible JSON file, written atomically
//! (write to a `NamedTempFile` in the same directory, then `rename`).

use crate::graph::Graph;
use serde::Serialize;
use std::{
    io::Write,
    path::PathBuf,
    time::{Duration, Instant},
};

#[derive(Serialize)]
struct EdgeStat {
    id: String,
    bytes: u64,
}

#[derive(Serialize)]
struct Snapshot {
    edges: Vec<EdgeStat>,
}

/// Owns the statistics file path and the periodic-wakeup deadline.
///
/// There is no separate timer fd: the `select` loop's own timeout argument
/// doubles as the engine's only periodic wakeup (§4.5).
pub(crate) struct StatsWriter {
    path: PathBuf,
    interval: Duration,
    next_due: Instant,
}

impl StatsWriter {
    pub(crate) fn new(path: PathBuf, interval: Duration) -> StatsWriter {
        StatsWriter {
            path,
            interval,
            next_due: Instant::now() + interval,
        }
    }

    /// Milliseconds until the next snapshot is due, used as the `select`
    /// timeout. Never negative.
    pub(crate) fn millis_until_due(&self) -> u64 {
        self.next_due
            .saturating_duration_since(Instant::now())
            .as_millis()
            .min(u64::MAX as u128) as u64
    }

    pub(crate) fn maybe_write(&mut self, graph: &Graph) {
        if Instant::now() < self.next_due {
            return;
        }
        self.next_due = Instant::now() + self.interval;
        if let Err(err) = self.write(graph) {
            tracing::warn!(error = %err, "failed to write statistics file");
        }
    }

    fn write(&self, graph: &Graph) -> std::io::Result<()> {
        let snapshot = Snapshot {
            edges: graph
                .edges
                .iter()
                .map(|e| EdgeStat {
                    id: e.id.clone(),
                    bytes: e.bytes_transported,
                })
                .collect(),
        };
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| std::path::Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        let body = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        tmp.write_all(&body)?;
        tmp.flush()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}
