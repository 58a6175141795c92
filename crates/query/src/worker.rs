//! Worker engine: per-worker shared context plus the parallel
//! loop over the worker's assigned files, built on `fdistdump-system`'s
//! pull-based dispatcher exactly as the worker engine's parallel-for over
//! file paths with no dedicated thread pool per rank.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use fdistdump_bfindex::BfNode;
use fdistdump_error::{ErrorKind, FdistdumpError};
use fdistdump_flowlib::fileformat::{self, FlowFile};
use fdistdump_flowlib::filter::{self, FilterExpr};
use fdistdump_flowlib::path::{bfindex_path_for, expand_paths};
use fdistdump_flowlib::record::Record;
use fdistdump_recordmem::access::field_num;
use fdistdump_recordmem::{AggrMemory, SortMemory};
use fdistdump_system::{spawn_dispatcher, wrap, DispatcherConfig, Operator, OperatorType, TaskError};
use fdistdump_transport::{Tag, Transport};

use crate::progress::ProgressTicker;
use crate::summary::{MetadataSummary, ProcessedSummary, Summary};
use crate::task::{Mode, TaskDescriptor};

/// Fixed per-sender buffer size: two of these are kept in flight
/// per file task so one can be sent while the next is filled.
pub const SEND_BUFFER_LEN: usize = 1 << 20;

pub struct WorkerContext {
    rank: u32,
    transport: Arc<dyn Transport>,
    task: TaskDescriptor,
    filter: Option<FilterExpr>,
    bf_tree: Option<BfNode>,
    record_counter: AtomicU64,
    limit_reached: AtomicBool,
    progress: ProgressTicker,
}

impl std::fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerContext")
            .field("rank", &self.rank)
            .field("mode", &self.task.mode)
            .finish()
    }
}

#[derive(Debug, Default)]
struct FileOutcome {
    processed: ProcessedSummary,
    metadata: MetadataSummary,
    sort_mem: Option<SortMemory>,
    aggr_mem: Option<AggrMemory>,
}

impl FileOutcome {
    fn pruned(metadata: MetadataSummary) -> Self {
        FileOutcome { metadata, ..Default::default() }
    }
}

#[derive(Debug)]
struct FileTaskOperator {
    ctx: Arc<WorkerContext>,
}

#[async_trait]
impl Operator<PathBuf, FileOutcome> for FileTaskOperator {
    type Error = FdistdumpError;

    fn get_type(&self) -> OperatorType {
        OperatorType::Io
    }

    async fn run(&self, path: &PathBuf) -> Result<FileOutcome, FdistdumpError> {
        process_file(self.ctx.clone(), path).await
    }
}

/// The outcome of running the full worker pipeline for one query, folded
/// back for the caller to reduce (the binary reduces an [`ErrorKind`]
/// across ranks separately; this is what stays local to one worker).
pub struct WorkerReport {
    pub summary: Summary,
    pub error: ErrorKind,
}

/// Runs the complete worker pipeline for one query, end to end.
pub async fn run_worker(transport: Arc<dyn Transport>) -> Result<WorkerReport, FdistdumpError> {
    let rank = transport.rank();
    let world_size = transport.world_size();

    // Step 1: receive the task descriptor, compile the filter, build bfindex.
    let task_bytes = transport.broadcast(None).await?;
    let task = TaskDescriptor::decode(&task_bytes)?;

    let compiled_filter = filter::compile(&task.filter).map_err(|e| FdistdumpError::Filter(e.to_string()))?;
    let bf_tree = if task.use_bloom_index {
        fdistdump_bfindex::build(compiled_filter.as_ref())
    } else {
        None
    };

    // Step 3: expand paths, compute this worker's shard, report its size.
    let all_paths = expand_paths(&task.paths).map_err(|source| FdistdumpError::IoPath {
        path: task.paths.join(","),
        source,
    })?;
    let worker_count = (world_size - 1).max(1);
    let my_shard: Vec<PathBuf> = all_paths
        .into_iter()
        .enumerate()
        .filter(|(i, _)| (*i as u32 % worker_count) + 1 == rank)
        .map(|(_, p)| p)
        .collect();

    let progress = ProgressTicker::new(transport.clone());
    progress.report_file_count(my_shard.len() as u64).await?;

    let ctx = Arc::new(WorkerContext {
        rank,
        transport: transport.clone(),
        task: task.clone(),
        filter: compiled_filter,
        bf_tree,
        record_counter: AtomicU64::new(0),
        limit_reached: AtomicBool::new(false),
        progress,
    });

    // Step 4: parallel loop over files, dynamically scheduled, concurrency
    // clamped to the number of files in this worker's shard. FileTaskOperator
    // is OperatorType::Io, so it's active_io_tasks (not num_worker_threads)
    // that actually bounds concurrently-open files; set both from the shard
    // size so neither knob is left at the dispatcher's unrelated defaults.
    let pool_size = num_cpus::get().min(my_shard.len().max(1));
    let dispatcher = spawn_dispatcher(DispatcherConfig {
        num_worker_threads: pool_size,
        active_io_tasks: pool_size,
        ..Default::default()
    });
    let (result_tx, mut result_rx) = mpsc::channel(my_shard.len().max(1));
    for path in my_shard {
        let op: Box<dyn Operator<PathBuf, FileOutcome, Error = FdistdumpError>> =
            Box::new(FileTaskOperator { ctx: ctx.clone() });
        dispatcher.submit(wrap(op, path, result_tx.clone())).await;
    }
    drop(result_tx);

    // Step 5: fold thread-private outcomes into the shared state.
    let mut processed = ProcessedSummary::default();
    let mut metadata = MetadataSummary::default();
    let sort_direction = task.fields.sort_key.map(|sk| sk.direction).unwrap_or(fdistdump_flowlib::fields::SortDir::Desc);
    let mut sort_mem = SortMemory::new(sort_direction);
    let mut aggr_mem = matches!(task.mode, Mode::Aggr).then(|| AggrMemory::new(task.fields.clone()));
    let mut worker_error = ErrorKind::Ok;

    while let Some(task_result) = result_rx.recv().await {
        match task_result.into_inner() {
            Ok(outcome) => {
                processed.merge(&outcome.processed);
                metadata.merge(&outcome.metadata);
                if let Some(local) = outcome.sort_mem {
                    sort_mem.merge(local);
                }
                if let (Some(mem), Some(local)) = (aggr_mem.as_mut(), outcome.aggr_mem) {
                    mem.merge(local);
                }
            }
            Err(TaskError::TaskFailed(err)) => {
                tracing::warn!(rank = %rank, "{}", err.rank_prefixed(rank));
                worker_error = worker_error.max(err.kind());
            }
            Err(TaskError::Panic(panic)) => {
                tracing::error!(rank = %rank, error = %panic, "file task panicked");
                worker_error = worker_error.max(ErrorKind::Internal);
            }
            Err(TaskError::Aborted) => {
                worker_error = worker_error.max(ErrorKind::Internal);
            }
        }
    }
    if !metadata.check_invariant() {
        tracing::warn!(rank = %rank, "metadata invariant total != tcp+udp+icmp+other");
    }

    // Step 6: post-processing. A worker that hit a fatal error during the
    // file loop still sends its sentinels so the coordinator's collectives
    // terminate rather than hang.
    if worker_error == ErrorKind::Ok {
        post_process(&ctx, sort_mem, aggr_mem).await?;
    } else {
        send_sentinels_only(&ctx).await?;
    }

    // Step 7: reduce summary counters to the coordinator.
    let summary = Summary { processed, metadata };
    transport.reduce_sum(summary.to_reduce_vec()).await?;

    Ok(WorkerReport { summary, error: worker_error })
}

async fn process_file(ctx: Arc<WorkerContext>, path: &Path) -> Result<FileOutcome, FdistdumpError> {
    let header = fileformat::read_header(path)?;
    let metadata = MetadataSummary::from_header(&header.counts);

    if let Some(tree) = &ctx.bf_tree {
        let bfi_path = bfindex_path_for(path);
        if !fdistdump_bfindex::evaluate_path(tree, &bfi_path) {
            ctx.progress.tick().await?;
            return Ok(FileOutcome::pruned(metadata));
        }
    }

    let mut processed = ProcessedSummary::default();
    let mut sort_mem = None;
    let mut aggr_mem = None;

    if !matches!(ctx.task.mode, Mode::Meta) {
        let flow_file = FlowFile::read(path)?;

        match ctx.task.mode {
            Mode::List => {
                let mut records = Vec::new();
                for record in &flow_file.records {
                    if ctx.filter.as_ref().map(|f| f.evaluate(record)).unwrap_or(true) {
                        processed.add_record(record.packets, record.bytes);
                        records.push(Record::from_flow(record));
                    }
                }
                stream_records(ctx.clone(), Tag::List, records).await?;
            }
            Mode::Sort if ctx.task.limit == 0 => {
                let mut records = Vec::new();
                for record in &flow_file.records {
                    if ctx.filter.as_ref().map(|f| f.evaluate(record)).unwrap_or(true) {
                        processed.add_record(record.packets, record.bytes);
                        records.push(Record::from_flow(record));
                    }
                }
                stream_records(ctx.clone(), Tag::Sort, records).await?;
            }
            Mode::Sort => {
                let sort_key = ctx
                    .task
                    .fields
                    .sort_key
                    .ok_or_else(|| FdistdumpError::Fields("SORT mode requires a sort key".to_string()))?;
                let entry = fdistdump_flowlib::field::by_id(sort_key.field)
                    .ok_or_else(|| FdistdumpError::internal("unknown sort key field"))?;
                let mut mem = SortMemory::new(sort_key.direction);
                for record in &flow_file.records {
                    if ctx.filter.as_ref().map(|f| f.evaluate(record)).unwrap_or(true) {
                        processed.add_record(record.packets, record.bytes);
                        let value = field_num(entry.name, record)
                            .ok_or_else(|| FdistdumpError::internal("sort key is not a numeric field"))?;
                        mem.write(Record::from_flow(record), value)?;
                    }
                }
                sort_mem = Some(mem);
            }
            Mode::Aggr => {
                let mut mem = AggrMemory::new(ctx.task.fields.clone());
                for record in &flow_file.records {
                    if ctx.filter.as_ref().map(|f| f.evaluate(record)).unwrap_or(true) {
                        processed.add_record(record.packets, record.bytes);
                        mem.write(record)?;
                    }
                }
                aggr_mem = Some(mem);
            }
            Mode::Meta => unreachable!("guarded above"),
        }
    }

    ctx.progress.tick().await?;
    Ok(FileOutcome { processed, metadata, sort_mem, aggr_mem })
}

/// Double-buffered streaming send with back-pressure:
/// fill one buffer while the previous one's send is still in flight, and
/// stop issuing new sends once the shared record limit has been reached.
async fn stream_records(ctx: Arc<WorkerContext>, tag: Tag, records: Vec<Record>) -> Result<(), FdistdumpError> {
    let mut current = Vec::with_capacity(SEND_BUFFER_LEN);
    let mut current_count = 0u64;
    let mut inflight: Option<tokio::task::JoinHandle<Result<(), FdistdumpError>>> = None;

    for record in records {
        if ctx.limit_reached.load(Ordering::Acquire) {
            break;
        }
        let mut encoded = Vec::new();
        record
            .write_length_prefixed(&mut encoded)
            .map_err(FdistdumpError::internal)?;

        if !current.is_empty() && current.len() + encoded.len() > SEND_BUFFER_LEN {
            if let Some(prev) = inflight.take() {
                prev.await.map_err(|e| FdistdumpError::internal(e.to_string()))??;
            }
            let to_send = std::mem::replace(&mut current, Vec::with_capacity(SEND_BUFFER_LEN));
            inflight = Some(spawn_flush(ctx.clone(), tag, to_send, current_count));
            current_count = 0;
        }
        current.extend_from_slice(&encoded);
        current_count += 1;
    }

    if let Some(prev) = inflight.take() {
        prev.await.map_err(|e| FdistdumpError::internal(e.to_string()))??;
    }
    if !current.is_empty() {
        flush(&ctx, tag, current, current_count).await?;
    }
    Ok(())
}

fn spawn_flush(
    ctx: Arc<WorkerContext>,
    tag: Tag,
    buf: Vec<u8>,
    count: u64,
) -> tokio::task::JoinHandle<Result<(), FdistdumpError>> {
    tokio::spawn(async move { flush(&ctx, tag, buf, count).await })
}

async fn flush(ctx: &WorkerContext, tag: Tag, buf: Vec<u8>, count: u64) -> Result<(), FdistdumpError> {
    ctx.transport.send_tagged(0, tag, buf.into()).await?;
    if ctx.task.limit > 0 {
        let total = ctx.record_counter.fetch_add(count, Ordering::AcqRel) + count;
        if total >= ctx.task.limit {
            ctx.limit_reached.store(true, Ordering::Release);
        }
    }
    Ok(())
}

/// Step 6 post-processing: send final results per mode, each stream
/// terminated by one sentinel.
async fn post_process(
    ctx: &WorkerContext,
    sort_mem: SortMemory,
    aggr_mem: Option<AggrMemory>,
) -> Result<(), FdistdumpError> {
    match ctx.task.mode {
        Mode::List => {
            ctx.transport.send_sentinel(0, Tag::List).await?;
        }
        Mode::Sort if ctx.task.limit == 0 => {
            ctx.transport.send_sentinel(0, Tag::Sort).await?;
        }
        Mode::Sort => {
            for row in sort_mem.sorted(ctx.task.limit as usize) {
                let mut encoded = Vec::new();
                row.record
                    .write_length_prefixed(&mut encoded)
                    .map_err(FdistdumpError::internal)?;
                ctx.transport.send_tagged(0, Tag::Sort, encoded.into()).await?;
            }
            ctx.transport.send_sentinel(0, Tag::Sort).await?;
        }
        Mode::Aggr => {
            let mem = aggr_mem.expect("AGGR mode always allocates its aggregation memory");
            if ctx.task.use_fast_topn {
                crate::tput::run_tput_worker(ctx, &mem).await?;
            } else {
                for row in mem.rows() {
                    ctx.transport
                        .send_tagged(0, Tag::Aggr, crate::wire::encode_aggr_row(&row).into())
                        .await?;
                }
                ctx.transport.send_sentinel(0, Tag::Aggr).await?;
            }
        }
        Mode::Meta => {}
    }
    Ok(())
}

async fn send_sentinels_only(ctx: &WorkerContext) -> Result<(), FdistdumpError> {
    let tag = match ctx.task.mode {
        Mode::List => Some(Tag::List),
        Mode::Sort => Some(Tag::Sort),
        Mode::Aggr => Some(Tag::Aggr),
        Mode::Meta => None,
    };
    if let Some(tag) = tag {
        ctx.transport.send_sentinel(0, tag).await?;
    }
    Ok(())
}

pub(crate) fn worker_transport(ctx: &WorkerContext) -> &Arc<dyn Transport> {
    &ctx.transport
}

pub(crate) fn worker_task(ctx: &WorkerContext) -> &TaskDescriptor {
    &ctx.task
}
