//! TPUT: the three-phase exact distributed top-N algorithm.
//!
//! Phase 1 establishes a lower bound on the Nth global value from every
//! worker's local top-N; phase 2 prunes every worker's local rows to the
//! candidates that could still reach it; phase 3 re-sums the exact value
//! of every surviving candidate across all shards. Only `SUM`-combined
//! sort keys are legal here (open question (a), decided in DESIGN.md):
//! that legality is enforced once, at query validation time, well before
//! either side of this module runs.

use std::sync::Arc;

use bytes::Bytes;
use fdistdump_error::FdistdumpError;
use fdistdump_flowlib::fields::SortDir;
use fdistdump_recordmem::{AggrMemory, AggrRow};
use fdistdump_transport::{Tag, Transport};

use crate::coordinator::recv_with_grace;
use crate::task::TaskDescriptor;
use crate::worker::{worker_task, worker_transport, WorkerContext};

pub(crate) fn sort_rows(rows: &mut [AggrRow], direction: SortDir) {
    match direction {
        SortDir::Desc => rows.sort_by(|a, b| b.sort_value.unwrap_or(0).cmp(&a.sort_value.unwrap_or(0))),
        SortDir::Asc => rows.sort_by(|a, b| a.sort_value.unwrap_or(0).cmp(&b.sort_value.unwrap_or(0))),
    }
}

/// Worker side of all three TPUT rounds, run against the worker's full
/// local aggregation memory.
pub(crate) async fn run_tput_worker(ctx: &WorkerContext, mem: &AggrMemory) -> Result<(), FdistdumpError> {
    let transport = worker_transport(ctx);
    let task = worker_task(ctx);
    let sort_key = task
        .fields
        .sort_key
        .ok_or_else(|| FdistdumpError::Fields("fast top-N requires a sort key".to_string()))?;
    let direction = sort_key.direction;
    // limit == 0 means unlimited (spec §8): every local row is a phase-1
    // candidate, matching the behavior of the non-fast-topn coordinator path.
    let limit = if task.limit == 0 { usize::MAX } else { task.limit as usize };

    let mut local_sorted = mem.rows();
    sort_rows(&mut local_sorted, direction);

    // Phase 1: ship this worker's local top-N.
    for row in local_sorted.iter().take(limit) {
        transport.send_tagged(0, Tag::Tput1, crate::wire::encode_aggr_row(row).into()).await?;
    }
    transport.send_sentinel(0, Tag::Tput1).await?;

    let threshold_bytes = transport.broadcast(None).await?;
    if threshold_bytes.len() != 8 {
        return Err(FdistdumpError::internal("malformed TPUT threshold broadcast"));
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&threshold_bytes);
    let threshold = u64::from_le_bytes(buf);

    // Phase 2: ship the prefix that could still reach the threshold.
    for row in &local_sorted {
        let value = row.sort_value.unwrap_or(0);
        let eligible = match direction {
            SortDir::Desc => value >= threshold,
            SortDir::Asc => value <= threshold,
        };
        if eligible {
            transport.send_tagged(0, Tag::Tput2, crate::wire::encode_aggr_row(row).into()).await?;
        }
    }
    transport.send_sentinel(0, Tag::Tput2).await?;

    let keys_bytes = transport.broadcast(None).await?;
    let keys = crate::wire::decode_key_batch(&keys_bytes)?;

    // Phase 3: ship the exact row for every surviving candidate key this
    // worker holds in its full local aggregation memory.
    for key in &keys {
        if let Some(row) = mem.lookup_raw_by_key(key) {
            transport.send_tagged(0, Tag::Tput3, crate::wire::encode_aggr_row(&row).into()).await?;
        }
    }
    transport.send_sentinel(0, Tag::Tput3).await?;

    Ok(())
}

/// Coordinator side of all three TPUT rounds. Returns the exact global
/// top-N rows.
pub async fn run_tput_coordinator(
    transport: &Arc<dyn Transport>,
    task: &TaskDescriptor,
) -> Result<Vec<AggrRow>, FdistdumpError> {
    let world_size = transport.world_size();
    let worker_count = world_size.saturating_sub(1);
    let sort_key = task
        .fields
        .sort_key
        .ok_or_else(|| FdistdumpError::Fields("fast top-N requires a sort key".to_string()))?;
    let direction = sort_key.direction;
    // limit == 0 means unlimited: no row can ever fail the threshold, so skip
    // the tau1 derivation and broadcast a threshold that admits everyone.
    let limit = if task.limit == 0 { usize::MAX } else { task.limit as usize };

    // Phase 1.
    let mut phase1 = AggrMemory::new(task.fields.clone());
    collect_into(transport, Tag::Tput1, worker_count, &mut phase1).await?;
    let mut rows = phase1.rows();
    sort_rows(&mut rows, direction);

    let s = (worker_count.max(1)) as u64;
    let threshold = if task.limit == 0 {
        match direction {
            SortDir::Desc => 0,
            SortDir::Asc => u64::MAX,
        }
    } else {
        let tau1 = rows.get(limit - 1).and_then(|r| r.sort_value).unwrap_or(0);
        match direction {
            SortDir::Desc => tau1 / s,
            SortDir::Asc => (tau1 + s - 1) / s,
        }
    };
    transport.broadcast(Some(Bytes::copy_from_slice(&threshold.to_le_bytes()))).await?;

    // Phase 2.
    let mut phase2 = AggrMemory::new(task.fields.clone());
    collect_into(transport, Tag::Tput2, worker_count, &mut phase2).await?;
    let mut candidates = phase2.rows();
    sort_rows(&mut candidates, direction);
    if limit < candidates.len() {
        candidates.truncate(limit);
    }
    let keys: Vec<Vec<u8>> = candidates.iter().map(|r| r.key.clone()).collect();

    // Phase 3.
    transport.broadcast(Some(crate::wire::encode_key_batch(&keys).into())).await?;
    let mut phase3 = AggrMemory::new(task.fields.clone());
    collect_into(transport, Tag::Tput3, worker_count, &mut phase3).await?;
    let mut finals = phase3.rows();
    sort_rows(&mut finals, direction);
    if limit < finals.len() {
        finals.truncate(limit);
    }
    Ok(finals)
}

/// Drain `tag` until every one of `worker_count` senders has sent its
/// sentinel, combining like-keyed rows into `mem` as they arrive with the
/// output fields' aggregation functions.
async fn collect_into(
    transport: &Arc<dyn Transport>,
    tag: Tag,
    worker_count: u32,
    mem: &mut AggrMemory,
) -> Result<(), FdistdumpError> {
    let mut sentinels = 0u32;
    while sentinels < worker_count {
        let msg = recv_with_grace(transport, tag).await?;
        if msg.is_sentinel() {
            sentinels += 1;
        } else {
            let row = crate::wire::decode_aggr_row(&msg.payload)?;
            mem.insert_row(row);
        }
    }
    Ok(())
}
