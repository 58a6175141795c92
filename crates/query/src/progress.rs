//! Progress reporter: workers gather their per-worker file
//! counts to the coordinator once, then emit a zero-length "one more file
//! done" ping per finished file on the dedicated [`Tag::Progress`] channel,
//! independent of the data channel.

use std::sync::Arc;

use fdistdump_error::FdistdumpError;
use fdistdump_transport::{Tag, Transport};
use serde::Serialize;

/// A worker-side handle used by the file loop to emit one tick per finished
/// file. Cheap to clone: every per-file task gets its own handle onto the
/// same transport.
#[derive(Clone)]
pub struct ProgressTicker {
    transport: Arc<dyn Transport>,
}

impl ProgressTicker {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        ProgressTicker { transport }
    }

    /// `progressInit(fileCount)`: gather every worker's shard size to the
    /// coordinator. Every rank, including the coordinator (which reports 0),
    /// must call this so the underlying collective completes.
    pub async fn report_file_count(&self, count: u64) -> Result<Option<Vec<u64>>, FdistdumpError> {
        self.transport.gather_u64(count).await
    }

    /// Fire-and-forget per-file completion ping: a zero-length message on
    /// the progress tag.
    pub async fn tick(&self) -> Result<(), FdistdumpError> {
        self.transport.send_sentinel(0, Tag::Progress).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStyle {
    None,
    Total,
    PerWorker,
    Json,
}

#[derive(Debug, Serialize)]
struct JsonTick {
    worker: u32,
    done: u64,
    total: u64,
}

/// Coordinator-side progress state: one (done, total) pair per worker rank
/// (index 0 is rank 1, etc., since the coordinator itself never contributes
/// files).
pub struct ProgressBoard {
    style: ProgressStyle,
    totals: Vec<u64>,
    done: Vec<u64>,
}

impl ProgressBoard {
    /// `per_worker_counts` is the result of the coordinator's own
    /// `gather_u64` call, rank-ordered including rank 0's (always 0, the
    /// coordinator holds no file shard).
    pub fn new(style: ProgressStyle, per_worker_counts: &[u64]) -> Self {
        let totals = per_worker_counts.iter().skip(1).copied().collect::<Vec<_>>();
        let done = vec![0u64; totals.len()];
        ProgressBoard { style, totals, done }
    }

    /// Record one completion tick from `worker_rank` (1-based, matching
    /// transport ranks) and render the updated line per the configured
    /// style, or `None` when `style` is [`ProgressStyle::None`].
    pub fn record_tick(&mut self, worker_rank: u32) -> Option<String> {
        let idx = (worker_rank.saturating_sub(1)) as usize;
        if let Some(d) = self.done.get_mut(idx) {
            *d += 1;
        }
        self.render(Some(worker_rank))
    }

    fn render(&self, just_ticked: Option<u32>) -> Option<String> {
        match self.style {
            ProgressStyle::None => None,
            ProgressStyle::Total => {
                let done: u64 = self.done.iter().sum();
                let total: u64 = self.totals.iter().sum();
                Some(format!("progress: {done}/{total} files"))
            }
            ProgressStyle::PerWorker => {
                let parts: Vec<String> = self
                    .done
                    .iter()
                    .zip(self.totals.iter())
                    .enumerate()
                    .map(|(i, (d, t))| format!("worker {}: {d}/{t}", i + 1))
                    .collect();
                Some(parts.join(", "))
            }
            ProgressStyle::Json => {
                let worker = just_ticked?;
                let idx = (worker.saturating_sub(1)) as usize;
                let tick = JsonTick {
                    worker,
                    done: *self.done.get(idx)?,
                    total: *self.totals.get(idx)?,
                };
                serde_json::to_string(&tick).ok()
            }
        }
    }

    pub fn total_files(&self) -> u64 {
        self.totals.iter().sum()
    }

    pub fn total_done(&self) -> u64 {
        self.done.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_style_sums_across_workers() {
        let mut board = ProgressBoard::new(ProgressStyle::Total, &[0, 3, 5]);
        assert_eq!(board.total_files(), 8);
        let line = board.record_tick(1).unwrap();
        assert_eq!(line, "progress: 1/8 files");
        board.record_tick(2);
        assert_eq!(board.total_done(), 2);
    }

    #[test]
    fn json_style_emits_one_object_per_tick() {
        let mut board = ProgressBoard::new(ProgressStyle::Json, &[0, 2]);
        let line = board.record_tick(1).unwrap();
        assert!(line.contains("\"worker\":1"));
        assert!(line.contains("\"done\":1"));
    }

    #[test]
    fn none_style_renders_nothing() {
        let mut board = ProgressBoard::new(ProgressStyle::None, &[0, 2]);
        assert_eq!(board.record_tick(1), None);
    }
}
