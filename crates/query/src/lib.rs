//! The distributed query engine: the task descriptor every rank
//! agrees on, the coordinator and worker halves of the pipeline that run
//! against it, the TPUT fast top-N algorithm, and the wire encodings and
//! progress reporting they share.

pub mod coordinator;
pub mod progress;
pub mod summary;
pub mod task;
pub mod tput;
pub mod wire;
pub mod worker;

pub use coordinator::{run_coordinator, CoordinatorReport};
pub use task::{Mode, TaskDescriptor};
pub use tput::run_tput_coordinator;
pub use worker::{run_worker, WorkerReport};
