//! `fdistdump` binary: parses the CLI surface, builds an
//! in-process [`LocalCluster`] standing in for the real multi-process
//! launcher, runs the coordinator inline on rank 0 and the remaining ranks
//! as spawned worker tasks, then renders the result.

mod fields_spec;
mod render;

use std::process::ExitCode;
use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone};
use clap::Parser;
use fdistdump_error::{ErrorKind, FdistdumpError};
use fdistdump_flowlib::filter;
use fdistdump_query::task::{Mode, TaskDescriptor};
use fdistdump_query::{run_coordinator, run_worker};
use fdistdump_query::progress::ProgressStyle;
use fdistdump_transport::local::LocalCluster;
use fdistdump_transport::Transport;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use render::OutputFormat;

/// A distributed NetFlow query over a fixed set of flow files.
#[derive(Debug, Parser)]
#[command(name = "fdistdump", version, about)]
struct Cli {
    /// Flow file or directory paths to query.
    paths: Vec<String>,

    /// Filter expression, e.g. `proto == 6 && bytes > 1000`.
    #[arg(long, default_value = "")]
    filter: String,

    /// Inclusive lower bound on flow end time: `YYYY-MM-DD[ HH:MM:SS]` in
    /// local time, an RFC 3339 timestamp for UTC/offset times, or a raw
    /// unix-seconds integer. Empty means unbounded.
    #[arg(long, default_value = "", value_parser = parse_time)]
    time_begin: i64,

    /// Inclusive upper bound on flow end time, same formats as
    /// `--time-begin`. Empty (or 0) means unbounded.
    #[arg(long, default_value = "", value_parser = parse_time)]
    time_end: i64,

    /// Maximum number of output rows (0 = unlimited).
    #[arg(long, default_value_t = 0)]
    limit: u64,

    #[arg(long, value_enum, default_value_t = CliMode::List)]
    mode: CliMode,

    /// Aggregation keys and output fields, e.g. `srcaddr/24,bytes#sum`.
    #[arg(long, default_value = "")]
    fields: String,

    /// Sort key, e.g. `bytes,desc`.
    #[arg(long)]
    order: Option<String>,

    #[arg(long, value_enum, default_value_t = OnOff::Off)]
    use_fast_topn: OnOff,

    #[arg(long, value_enum, default_value_t = OnOff::Off)]
    use_bfindex: OnOff,

    #[arg(long, value_enum, default_value_t = CliOutputFormat::Pretty)]
    output_format: CliOutputFormat,

    #[arg(long, value_enum, default_value_t = CliProgress::None)]
    progress: CliProgress,

    /// Number of simulated worker ranks (the real deployment's launcher
    /// names this via `FDISTDUMP_WORLD_SIZE`; this flag is the single-host
    /// equivalent for a reimplementation with no separate launcher).
    #[arg(long, default_value_t = num_cpus::get().max(1) as u32)]
    workers: u32,

    /// Increase log verbosity; repeatable (`-v`, `-vv`, `-vvv`).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Optional YAML config file overriding ambient defaults loaded
    /// through the ambient configuration layer.
    #[arg(long)]
    config: Option<String>,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliMode {
    List,
    Sort,
    Aggr,
    Meta,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum OnOff {
    On,
    Off,
}

impl OnOff {
    fn is_on(self) -> bool {
        matches!(self, OnOff::On)
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliOutputFormat {
    Pretty,
    Csv,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliProgress {
    None,
    Total,
    Perworker,
    Json,
}

/// Ambient defaults loadable from `--config`; every
/// field overridable on the command line takes precedence over this.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    workers: Option<u32>,
    progress: Option<String>,
}

/// Parse `--time-begin`/`--time-end`. Accepts, in order of
/// preference: a raw unix-seconds integer, an RFC 3339 timestamp (carries
/// its own UTC/offset), or a bare `YYYY-MM-DD[ HH:MM:SS]` local time.
fn parse_time(raw: &str) -> Result<i64, String> {
    if raw.is_empty() {
        return Ok(0);
    }
    if let Ok(secs) = raw.parse::<i64>() {
        return Ok(secs);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.timestamp());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return local_timestamp(naive, raw);
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return local_timestamp(date.and_hms_opt(0, 0, 0).expect("midnight is valid"), raw);
    }
    Err(format!(
        "invalid time '{raw}': expected unix seconds, RFC 3339, or 'YYYY-MM-DD[ HH:MM:SS]'"
    ))
}

fn local_timestamp(naive: NaiveDateTime, raw: &str) -> Result<i64, String> {
    Local
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.timestamp())
        .ok_or_else(|| format!("ambiguous or nonexistent local time '{raw}'"))
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn build_task(cli: &Cli, world_size: u32) -> Result<TaskDescriptor, FdistdumpError> {
    let mode = match cli.mode {
        CliMode::List => Mode::List,
        CliMode::Sort => Mode::Sort,
        CliMode::Aggr => Mode::Aggr,
        CliMode::Meta => Mode::Meta,
    };

    filter::compile(&cli.filter).map_err(|e| FdistdumpError::Filter(e.to_string()))?;

    let fields = fields_spec::parse_fields(&cli.fields, cli.order.as_deref())
        .map_err(|e| FdistdumpError::Fields(e.to_string()))?;
    fields
        .validate(cli.use_fast_topn.is_on())
        .map_err(|e| FdistdumpError::Fields(e.to_string()))?;

    Ok(TaskDescriptor {
        mode,
        filter: cli.filter.clone(),
        paths: cli.paths.clone(),
        time_begin: cli.time_begin,
        time_end: cli.time_end,
        limit: cli.limit,
        fields,
        use_fast_topn: cli.use_fast_topn.is_on(),
        use_bloom_index: cli.use_bfindex.is_on(),
        worker_count: world_size.saturating_sub(1),
    })
}

fn render(cli: &Cli, report: &fdistdump_query::CoordinatorReport, task: &TaskDescriptor) -> String {
    let format = match cli.output_format {
        CliOutputFormat::Pretty => OutputFormat::Pretty,
        CliOutputFormat::Csv => OutputFormat::Csv,
    };
    match task.mode {
        Mode::List | Mode::Sort => render::render_records(&report.records, format),
        Mode::Aggr => render::render_aggr_rows(&report.aggr_rows, &task.fields, format),
        Mode::Meta => format!(
            "processed: {} flows, {} bytes, {} packets\nfile totals: {} flows, {} bytes, {} packets (tcp {}, udp {}, icmp {}, other {})\n",
            report.summary.processed.flows,
            report.summary.processed.bytes,
            report.summary.processed.packets,
            report.summary.metadata.total.flows,
            report.summary.metadata.total.bytes,
            report.summary.metadata.total.packets,
            report.summary.metadata.tcp.flows,
            report.summary.metadata.udp.flows,
            report.summary.metadata.icmp.flows,
            report.summary.metadata.other.flows,
        ),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let file_config: FileConfig = match fdistdump_config::load_config(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("{e}");
            return ExitCode::from(e.exit_code() as u8);
        }
    };
    let world_size = std::env::var("FDISTDUMP_WORLD_SIZE")
        .ok()
        .and_then(|s| s.parse().ok())
        .or(file_config.workers)
        .unwrap_or(cli.workers)
        .max(1)
        + 1;

    let progress_style = match cli.progress {
        CliProgress::None => ProgressStyle::None,
        CliProgress::Total => ProgressStyle::Total,
        CliProgress::Perworker => ProgressStyle::PerWorker,
        CliProgress::Json => ProgressStyle::Json,
    };

    let task = match build_task(&cli, world_size) {
        Ok(t) => t,
        Err(e) => {
            tracing::error!("{e}");
            return ExitCode::from(e.exit_code() as u8);
        }
    };

    let ranks = LocalCluster::new(world_size);
    let mut ranks = ranks.into_iter();
    let coordinator_transport: Arc<dyn Transport> = Arc::new(ranks.next().expect("world_size >= 1"));

    let mut worker_handles = Vec::new();
    for worker_transport in ranks {
        let transport: Arc<dyn Transport> = Arc::new(worker_transport);
        worker_handles.push(tokio::spawn(async move { run_worker(transport).await }));
    }

    let coordinator_result = run_coordinator(coordinator_transport, task.clone(), progress_style).await;

    let mut worker_error = ErrorKind::Ok;
    for handle in worker_handles {
        match handle.await {
            Ok(Ok(report)) => worker_error = worker_error.max(report.error),
            Ok(Err(e)) => {
                tracing::error!("{e}");
                worker_error = worker_error.max(e.kind());
            }
            Err(join_err) => {
                tracing::error!("worker task panicked: {join_err}");
                worker_error = worker_error.max(ErrorKind::Internal);
            }
        }
    }

    let report = match coordinator_result {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("{e}");
            return ExitCode::from(e.kind().max(worker_error).exit_code() as u8);
        }
    };

    let final_error = report.error.max(worker_error);
    if final_error == ErrorKind::Ok {
        print!("{}", render(&cli, &report, &task));
    }
    ExitCode::from(final_error.exit_code() as u8)
}
