//! A minimal task/operator abstraction for the parallel file-processing loop.
//!
//! Grounded on chroma-core's `execution::operator` module: an [`Operator`] is a
//! description of a unit of work, a [`Task`] binds an operator to its input and
//! a reply channel, and [`TaskMessage`] erases the input/output types so the
//! dispatcher can hold a homogeneous queue of heterogeneous tasks.

use crate::utils::PanicError;
use async_trait::async_trait;
use futures::FutureExt;
use std::any::type_name;
use std::fmt::Debug;
use std::panic::AssertUnwindSafe;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Whether a task performs blocking I/O (and should not starve the CPU-bound
/// worker pool) or ordinary CPU-bound work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorType {
    Io,
    Cpu,
}

/// An operator is a description of a function: take a reference to the input,
/// produce an output or an error.
#[async_trait]
pub trait Operator<I, O>: Send + Sync + Debug
where
    I: Send + Sync,
    O: Send + Sync,
{
    type Error: Send;

    async fn run(&self, input: &I) -> Result<O, Self::Error>;

    fn get_name(&self) -> &'static str {
        type_name::<Self>()
    }

    fn get_type(&self) -> OperatorType {
        OperatorType::Cpu
    }
}

#[derive(Debug, Error)]
pub enum TaskError<E> {
    #[error("task panicked: {0:?}")]
    Panic(PanicError),
    #[error("task failed: {0:?}")]
    TaskFailed(E),
    #[error("task aborted")]
    Aborted,
}

impl<E> TaskError<E> {
    /// Maps to [`fdistdump_error::ErrorKind::Internal`] for panics/aborts; a
    /// task-specific error kind is the caller's responsibility to extract
    /// from [`TaskError::TaskFailed`].
    pub fn is_aborted(&self) -> bool {
        matches!(self, TaskError::Aborted)
    }
}

/// The outcome of running one task, tagged with the task id for bookkeeping.
#[derive(Debug)]
pub struct TaskResult<O, E> {
    result: Result<O, TaskError<E>>,
    task_id: Uuid,
}

impl<O, E> TaskResult<O, E> {
    pub fn into_inner(self) -> Result<O, TaskError<E>> {
        self.result
    }

    pub fn id(&self) -> Uuid {
        self.task_id
    }
}

struct Task<I, O, E>
where
    I: Send + Sync + Debug,
    O: Send + Sync + Debug,
{
    operator: Box<dyn Operator<I, O, Error = E>>,
    input: I,
    reply: mpsc::Sender<TaskResult<O, E>>,
    task_id: Uuid,
}

/// A task message is a type-erased task; the dispatcher only needs to be able
/// to run it and classify it as IO or CPU-bound.
pub type TaskMessage = Box<dyn TaskWrapper>;

#[async_trait]
pub trait TaskWrapper: Send + Debug {
    fn get_name(&self) -> &'static str;
    fn get_type(&self) -> OperatorType;
    async fn run(&mut self);
    async fn abort(&mut self);
}

impl<I, O, E> Debug for Task<I, O, E>
where
    I: Send + Sync + Debug,
    O: Send + Sync + Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.operator.get_name())
            .field("task_id", &self.task_id)
            .finish()
    }
}

#[async_trait]
impl<I, O, E> TaskWrapper for Task<I, O, E>
where
    I: Send + Sync + Debug + 'static,
    O: Send + Sync + Debug + 'static,
    E: Send + Debug + 'static,
{
    fn get_name(&self) -> &'static str {
        self.operator.get_name()
    }

    fn get_type(&self) -> OperatorType {
        self.operator.get_type()
    }

    async fn run(&mut self) {
        let result = AssertUnwindSafe(self.operator.run(&self.input))
            .catch_unwind()
            .await;
        let result = match result {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(TaskError::TaskFailed(e)),
            Err(panic_value) => {
                tracing::error!("task {} panicked: {:?}", self.task_id, panic_value);
                Err(TaskError::Panic(PanicError::new(panic_value)))
            }
        };
        if self
            .reply
            .send(TaskResult {
                result,
                task_id: self.task_id,
            })
            .await
            .is_err()
        {
            tracing::debug!("task {} reply channel dropped", self.task_id);
        }
    }

    async fn abort(&mut self) {
        let _ = self
            .reply
            .send(TaskResult {
                result: Err(TaskError::Aborted),
                task_id: self.task_id,
            })
            .await;
    }
}

/// Wrap an operator and its input into a type-erased task, ready for the
/// dispatcher queue.
pub fn wrap<I, O, E>(
    operator: Box<dyn Operator<I, O, Error = E>>,
    input: I,
    reply: mpsc::Sender<TaskResult<O, E>>,
) -> TaskMessage
where
    I: Send + Sync + Debug + 'static,
    O: Send + Sync + Debug + 'static,
    E: Send + Debug + 'static,
{
    Box::new(Task {
        operator,
        input,
        reply,
        task_id: Uuid::new_v4(),
    })
}
