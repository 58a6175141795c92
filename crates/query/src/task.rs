use serde::{Deserialize, Serialize};

use fdistdump_flowlib::fields::FieldsDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    List,
    Sort,
    Aggr,
    Meta,
}

/// The static task descriptor, broadcast once from the coordinator and
/// immutable for the rest of the query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub mode: Mode,
    pub filter: String,
    pub paths: Vec<String>,
    pub time_begin: i64,
    pub time_end: i64,
    /// 0 means unlimited.
    pub limit: u64,
    pub fields: FieldsDescriptor,
    pub use_fast_topn: bool,
    pub use_bloom_index: bool,
    pub worker_count: u32,
}

impl TaskDescriptor {
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("TaskDescriptor is always serializable")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, fdistdump_error::FdistdumpError> {
        serde_json::from_slice(bytes)
            .map_err(|e| fdistdump_error::FdistdumpError::internal(format!("bad task descriptor: {e}")))
    }
}
