//! Coordinator engine: collects every worker's contribution for
//! one query, merges it the way the worker engine already merges per-file
//! outcomes, and reduces the final summary.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use fdistdump_error::{ErrorKind, FdistdumpError};
use fdistdump_flowlib::record::{FlowRecord, Record};
use fdistdump_recordmem::access::field_num;
use fdistdump_recordmem::{AggrMemory, AggrRow, SortMemory, SortRow};
use fdistdump_transport::{Tag, TaggedMessage, Transport};

use crate::progress::{ProgressBoard, ProgressStyle, ProgressTicker};
use crate::summary::Summary;
use crate::task::{Mode, TaskDescriptor};
use crate::tput;

/// How long the coordinator waits for the next message (including a
/// sentinel) on a data tag before treating the communicator as broken
/// the coordinator treats any missing sentinel for more than an
/// implementation-defined grace period as a transport error.
pub const SENTINEL_GRACE: Duration = Duration::from_secs(30);

/// Receive the next message on `tag`, failing with `ErrorKind::Transport`
/// if none arrives within [`SENTINEL_GRACE`].
pub(crate) async fn recv_with_grace(
    transport: &Arc<dyn Transport>,
    tag: Tag,
) -> Result<TaggedMessage, FdistdumpError> {
    match tokio::time::timeout(SENTINEL_GRACE, transport.recv_tagged_any(tag)).await {
        Ok(result) => result,
        Err(_) => Err(FdistdumpError::Transport(format!(
            "no message (including sentinel) on tag {tag:?} within {SENTINEL_GRACE:?}"
        ))),
    }
}

/// Everything the coordinator produced for one query, ready for the CLI's
/// renderer.
pub struct CoordinatorReport {
    pub records: Vec<Record>,
    pub aggr_rows: Vec<AggrRow>,
    pub summary: Summary,
    pub error: ErrorKind,
}

/// Runs the complete coordinator pipeline for one query.
/// `task.worker_count` must equal `transport.world_size() - 1`.
pub async fn run_coordinator(
    transport: Arc<dyn Transport>,
    task: TaskDescriptor,
    progress_style: ProgressStyle,
) -> Result<CoordinatorReport, FdistdumpError> {
    transport.broadcast(Some(task.encode().into())).await?;

    let progress = ProgressTicker::new(transport.clone());
    let per_worker_counts = progress
        .report_file_count(0)
        .await?
        .ok_or_else(|| FdistdumpError::internal("coordinator's own gather_u64 returned no totals"))?;
    let worker_count = transport.world_size().saturating_sub(1);

    let board = Arc::new(Mutex::new(ProgressBoard::new(progress_style, &per_worker_counts)));
    let progress_task = spawn_progress_listener(transport.clone(), board.clone());

    let mut records = Vec::new();
    let mut aggr_rows = Vec::new();

    match task.mode {
        Mode::List => {
            records = collect_blobs(&transport, Tag::List, worker_count).await?;
            if task.limit > 0 {
                records.truncate(task.limit as usize);
            }
        }
        Mode::Sort => {
            let rows = collect_sort(&transport, worker_count, &task).await?;
            records = rows.into_iter().map(|r: SortRow| r.record).collect();
        }
        Mode::Aggr => {
            if task.use_fast_topn {
                aggr_rows = tput::run_tput_coordinator(&transport, &task).await?;
            } else {
                aggr_rows = collect_aggr(&transport, worker_count, &task).await?;
            }
        }
        Mode::Meta => {}
    }

    // The progress listener only terminates on its own once every worker's
    // declared file count has ticked; a worker that bailed out early after a
    // fatal error still sent its data sentinels but may short a
    // few ticks, so don't let a slow progress drain hold up the summary.
    progress_task.abort();

    let local = Summary::default();
    let totals = transport
        .reduce_sum(local.to_reduce_vec())
        .await?
        .ok_or_else(|| FdistdumpError::internal("coordinator's own reduce_sum returned no totals"))?;
    let summary = Summary::from_reduce_vec(&totals);
    if !summary.metadata.check_invariant() {
        tracing::warn!("metadata invariant total != tcp+udp+icmp+other after reduce");
    }

    Ok(CoordinatorReport { records, aggr_rows, summary, error: ErrorKind::Ok })
}

fn spawn_progress_listener(
    transport: Arc<dyn Transport>,
    board: Arc<Mutex<ProgressBoard>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let total = board.lock().expect("progress board poisoned").total_files();
        let mut done = 0u64;
        while done < total {
            match transport.recv_tagged_any(Tag::Progress).await {
                Ok(msg) => {
                    done += 1;
                    let mut b = board.lock().expect("progress board poisoned");
                    if let Some(line) = b.record_tick(msg.from) {
                        tracing::info!("{line}");
                    }
                }
                Err(_) => break,
            }
        }
    })
}

/// LIST-shaped collection: decode every length-prefixed record out of every
/// non-sentinel blob on `tag`, across all `worker_count` senders.
async fn collect_blobs(
    transport: &Arc<dyn Transport>,
    tag: Tag,
    worker_count: u32,
) -> Result<Vec<Record>, FdistdumpError> {
    let mut records = Vec::new();
    let mut sentinels = 0u32;
    while sentinels < worker_count {
        let msg = recv_with_grace(transport, tag).await?;
        if msg.is_sentinel() {
            sentinels += 1;
            continue;
        }
        records.extend(Record::split_blob(&msg.payload));
    }
    Ok(records)
}

async fn collect_sort(
    transport: &Arc<dyn Transport>,
    worker_count: u32,
    task: &TaskDescriptor,
) -> Result<Vec<SortRow>, FdistdumpError> {
    let sort_key = task
        .fields
        .sort_key
        .ok_or_else(|| FdistdumpError::Fields("SORT mode requires a sort key".to_string()))?;
    let entry = fdistdump_flowlib::field::by_id(sort_key.field)
        .ok_or_else(|| FdistdumpError::internal("unknown sort key field"))?;

    let mut mem = SortMemory::new(sort_key.direction);
    let mut sentinels = 0u32;
    while sentinels < worker_count {
        let msg = recv_with_grace(transport, Tag::Sort).await?;
        if msg.is_sentinel() {
            sentinels += 1;
            continue;
        }
        for blob in Record::split_blob(&msg.payload) {
            let flow = FlowRecord::decode(&blob.0)
                .ok_or_else(|| FdistdumpError::internal("undecodable record on the sort channel"))?;
            let value = field_num(entry.name, &flow)
                .ok_or_else(|| FdistdumpError::internal("sort key is not a numeric field"))?;
            mem.write(blob, value)?;
        }
    }
    Ok(mem.sorted(task.limit as usize))
}

async fn collect_aggr(
    transport: &Arc<dyn Transport>,
    worker_count: u32,
    task: &TaskDescriptor,
) -> Result<Vec<AggrRow>, FdistdumpError> {
    let mut mem = AggrMemory::new(task.fields.clone());
    let mut sentinels = 0u32;
    while sentinels < worker_count {
        let msg = recv_with_grace(transport, Tag::Aggr).await?;
        if msg.is_sentinel() {
            sentinels += 1;
            continue;
        }
        let row = crate::wire::decode_aggr_row(&msg.payload)?;
        mem.insert_row(row);
    }
    let mut rows = mem.rows();
    if let Some(sk) = task.fields.sort_key {
        tput::sort_rows(&mut rows, sk.direction);
    }
    if task.limit > 0 {
        rows.truncate(task.limit as usize);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fdistdump_flowlib::field::FieldId;
    use fdistdump_flowlib::fields::{AggrFunc, AggrKey, FieldsDescriptor, OutputField, SortDir, SortKey};
    use fdistdump_flowlib::record::canonicalize_addr;
    use fdistdump_transport::local::LocalCluster;
    use std::net::{IpAddr, Ipv4Addr};
    use tokio::time::{timeout, Duration};

    fn flow(bytes: u64) -> FlowRecord {
        FlowRecord {
            srcaddr: canonicalize_addr(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))),
            dstaddr: canonicalize_addr(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))),
            srcport: 53,
            dstport: 1234,
            proto: 17,
            tcpflags: 0,
            packets: 1,
            bytes,
            first: 0,
            last: 1,
        }
    }

    fn meta_only_task() -> TaskDescriptor {
        TaskDescriptor {
            mode: Mode::Meta,
            filter: String::new(),
            paths: vec![],
            time_begin: 0,
            time_end: 0,
            limit: 0,
            fields: FieldsDescriptor { aggr_keys: vec![], output_fields: vec![], sort_key: None },
            use_fast_topn: false,
            use_bloom_index: false,
            worker_count: 1,
        }
    }

    #[tokio::test]
    async fn meta_query_with_no_workers_doing_work_completes() {
        let ranks = LocalCluster::new(2);
        let coordinator: Arc<dyn Transport> = Arc::new(ranks[0].clone());
        let worker: Arc<dyn Transport> = Arc::new(ranks[1].clone());
        let task = meta_only_task();

        let worker_task = task.clone();
        let worker_handle = tokio::spawn(async move {
            let bytes = worker.broadcast(None).await.unwrap();
            let decoded = TaskDescriptor::decode(&bytes).unwrap();
            assert_eq!(decoded.mode, worker_task.mode);
            worker.gather_u64(0).await.unwrap();
            worker.reduce_sum(Summary::default().to_reduce_vec()).await.unwrap();
        });

        let report = timeout(Duration::from_secs(2), run_coordinator(coordinator, task, ProgressStyle::None))
            .await
            .unwrap()
            .unwrap();
        worker_handle.await.unwrap();
        assert_eq!(report.summary, Summary::default());
        assert!(report.records.is_empty());
        assert!(report.aggr_rows.is_empty());
    }

    #[test]
    fn aggr_collection_sorts_and_truncates_by_configured_direction() {
        let fields = FieldsDescriptor {
            aggr_keys: vec![AggrKey { field: FieldId(0), ipv4_mask: 32, ipv6_mask: 128, align: 0 }],
            output_fields: vec![OutputField { field: FieldId(7), func: AggrFunc::Sum }],
            sort_key: Some(SortKey { field: FieldId(7), direction: SortDir::Desc, func: Some(AggrFunc::Sum) }),
        };
        let mut mem = AggrMemory::new(fields.clone());
        mem.write(&flow(10)).unwrap();
        mem.write(&flow(500)).unwrap();
        let mut rows = mem.rows();
        tput::sort_rows(&mut rows, SortDir::Desc);
        assert!(rows[0].sort_value.unwrap() >= rows.last().unwrap().sort_value.unwrap());
    }
}
