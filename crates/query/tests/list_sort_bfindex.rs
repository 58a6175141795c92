//! End-to-end coverage for the LIST and SORT modes and the Bloom-index
//! file-skip path, over the full
//! coordinator/worker pipeline with real on-disk flow files and a real
//! on-disk Bloom-index sidecar file.

use std::net::Ipv4Addr;
use std::sync::Arc;

use tempfile::tempdir;

use fdistdump_bfindex::FileIndexHandle;
use fdistdump_flowlib::field::FieldId;
use fdistdump_flowlib::fields::{FieldsDescriptor, SortDir, SortKey};
use fdistdump_flowlib::fileformat::{FlowFile, FlowFileHeader};
use fdistdump_flowlib::path::bfindex_path_for;
use fdistdump_flowlib::record::{canonicalize_addr, FlowRecord};
use fdistdump_query::progress::ProgressStyle;
use fdistdump_query::task::{Mode, TaskDescriptor};
use fdistdump_query::{run_coordinator, run_worker, CoordinatorReport};
use fdistdump_transport::local::LocalCluster;
use fdistdump_transport::Transport;

fn flow(src_last_octet: u8, bytes: u64) -> FlowRecord {
    FlowRecord {
        srcaddr: canonicalize_addr(Ipv4Addr::new(10, 0, 0, src_last_octet).into()),
        dstaddr: canonicalize_addr(Ipv4Addr::new(192, 168, 0, 1).into()),
        srcport: 53,
        dstport: 9000,
        proto: 17,
        tcpflags: 0,
        packets: 1,
        bytes,
        first: 0,
        last: 1,
    }
}

fn write_shard_files(dir: &std::path::Path, shards: &[Vec<FlowRecord>]) {
    for (i, records) in shards.iter().enumerate() {
        let path = dir.join(format!("lnf.{i:03}"));
        FlowFile::write(&path, FlowFileHeader { counts: [0u64; 15] }, records).unwrap();
    }
}

fn empty_fields() -> FieldsDescriptor {
    FieldsDescriptor { aggr_keys: vec![], output_fields: vec![], sort_key: None }
}

async fn run_query(dir: &std::path::Path, task: TaskDescriptor) -> CoordinatorReport {
    let world_size = task.worker_count + 1;
    let ranks = LocalCluster::new(world_size);
    let mut ranks = ranks.into_iter();
    let coordinator: Arc<dyn Transport> = Arc::new(ranks.next().unwrap());

    let mut worker_handles = Vec::new();
    for worker in ranks {
        let transport: Arc<dyn Transport> = Arc::new(worker);
        worker_handles.push(tokio::spawn(async move { run_worker(transport).await.unwrap() }));
    }

    let report = run_coordinator(coordinator, task, ProgressStyle::None).await.unwrap();
    for handle in worker_handles {
        handle.await.unwrap();
    }
    let _ = dir;
    report
}

#[tokio::test]
async fn list_mode_with_limit_truncates_across_two_workers() {
    let dir = tempdir().unwrap();
    let shards = vec![
        vec![flow(1, 10), flow(2, 20), flow(3, 30)],
        vec![flow(4, 40), flow(5, 50), flow(6, 60)],
    ];
    write_shard_files(dir.path(), &shards);

    let task = TaskDescriptor {
        mode: Mode::List,
        filter: String::new(),
        paths: vec![dir.path().to_string_lossy().into_owned()],
        time_begin: 0,
        time_end: 0,
        limit: 4,
        fields: empty_fields(),
        use_fast_topn: false,
        use_bloom_index: false,
        worker_count: 2,
    };

    let report = run_query(dir.path(), task).await;
    // The coordinator truncates LIST output to the configured limit; a
    // worker may overshoot locally by at most one buffer-worth before the
    // coordinator's final truncation, but the returned set must never
    // exceed the limit.
    assert_eq!(report.records.len(), 4);
    for record in &report.records {
        assert!(FlowRecord::decode(&record.0).is_some());
    }
}

#[tokio::test]
async fn sort_mode_descending_returns_exact_top_n_across_three_workers() {
    let dir = tempdir().unwrap();
    let shards = vec![
        vec![flow(1, 10), flow(2, 900)],
        vec![flow(3, 500), flow(4, 5)],
        vec![flow(5, 1000), flow(6, 250)],
    ];
    write_shard_files(dir.path(), &shards);

    let task = TaskDescriptor {
        mode: Mode::Sort,
        filter: String::new(),
        paths: vec![dir.path().to_string_lossy().into_owned()],
        time_begin: 0,
        time_end: 0,
        limit: 3,
        fields: FieldsDescriptor {
            aggr_keys: vec![],
            output_fields: vec![],
            sort_key: Some(SortKey { field: FieldId(7), direction: SortDir::Desc, func: None }),
        },
        use_fast_topn: false,
        use_bloom_index: false,
        worker_count: 3,
    };

    let report = run_query(dir.path(), task).await;
    assert_eq!(report.records.len(), 3);
    let got_bytes: Vec<u64> = report
        .records
        .iter()
        .map(|r| FlowRecord::decode(&r.0).unwrap().bytes)
        .collect();
    assert_eq!(got_bytes, vec![1000, 900, 500]);
}

#[tokio::test]
async fn bloom_index_skips_files_that_cannot_match_and_keeps_those_that_might() {
    let dir = tempdir().unwrap();
    // Two files: one whose sidecar index does not contain the filtered
    // address (must be skipped without decoding its records), one whose
    // sidecar index does contain it (must be processed normally).
    let skip_records = vec![flow(9, 777)];
    let keep_records = vec![flow(1, 55), flow(1, 65)];
    let shards = vec![skip_records.clone(), keep_records.clone()];
    write_shard_files(dir.path(), &shards);

    let skip_path = dir.path().join("lnf.000");
    let keep_path = dir.path().join("lnf.001");

    let skip_index = FileIndexHandle::from_addrs([canonicalize_addr(Ipv4Addr::new(10, 0, 0, 99).into())]);
    std::fs::write(bfindex_path_for(&skip_path), skip_index.to_bytes()).unwrap();
    let keep_index = FileIndexHandle::from_addrs([canonicalize_addr(Ipv4Addr::new(10, 0, 0, 1).into())]);
    std::fs::write(bfindex_path_for(&keep_path), keep_index.to_bytes()).unwrap();

    let task = TaskDescriptor {
        mode: Mode::List,
        filter: "src ip == 10.0.0.1".to_string(),
        paths: vec![dir.path().to_string_lossy().into_owned()],
        time_begin: 0,
        time_end: 0,
        limit: 0,
        fields: empty_fields(),
        use_fast_topn: false,
        use_bloom_index: true,
        worker_count: 2,
    };

    let report = run_query(dir.path(), task).await;
    // Only the two records in the kept file should survive: the skipped
    // file's records never even reach the filter, since the Bloom index
    // proved its only address (10.0.0.99) cannot equal the filter literal.
    assert_eq!(report.records.len(), 2);
    for record in &report.records {
        let flow = FlowRecord::decode(&record.0).unwrap();
        assert_eq!(flow.srcaddr, canonicalize_addr(Ipv4Addr::new(10, 0, 0, 1).into()));
    }
}
