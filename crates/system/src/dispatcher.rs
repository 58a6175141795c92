//! A pull-based task dispatcher, grounded on chroma-core's
//! `execution::dispatcher`/`execution::worker_thread` pair: worker tasks ask
//! the dispatcher for work, the dispatcher hands out queued tasks FIFO, and
//! parks idle workers as waiters until more work arrives.
//!
//! This is the engine behind the worker's "parallel loop over files (dynamic
//! scheduling; thread count <= file count)" pipeline.

use crate::operator::{OperatorType, TaskMessage};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Number of worker tasks to spawn; callers should clamp this to the
    /// number of files in the query's shard so a file-starved worker pool
    /// never idles on empty tasks.
    pub num_worker_threads: usize,
    pub task_queue_limit: usize,
    pub dispatcher_queue_size: usize,
    pub active_io_tasks: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        DispatcherConfig {
            num_worker_threads: num_cpus::get(),
            task_queue_limit: 4096,
            dispatcher_queue_size: 4096,
            active_io_tasks: 2 * num_cpus::get(),
        }
    }
}

enum DispatcherMsg {
    Submit(TaskMessage),
    Request(oneshot::Sender<TaskMessage>),
}

/// A handle used to submit tasks into a running dispatcher.
#[derive(Clone)]
pub struct DispatcherHandle {
    tx: mpsc::Sender<DispatcherMsg>,
}

impl DispatcherHandle {
    pub async fn submit(&self, task: TaskMessage) {
        if self.tx.send(DispatcherMsg::Submit(task)).await.is_err() {
            tracing::error!("dispatcher is no longer accepting tasks");
        }
    }
}

struct DecrementOnDrop(Arc<AtomicU64>);

impl Drop for DecrementOnDrop {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

/// Spawn a dispatcher and its worker pool. Returns a handle used to submit
/// tasks; the pool keeps running until every clone of the handle (and the
/// dispatcher's internal queue) is dropped, at which point workers observe a
/// closed channel and exit.
pub fn spawn_dispatcher(config: DispatcherConfig) -> DispatcherHandle {
    let (tx, mut rx) = mpsc::channel::<DispatcherMsg>(config.dispatcher_queue_size);
    let active_io_tasks = Arc::new(AtomicU64::new(config.active_io_tasks as u64));

    tokio::spawn(async move {
        let mut task_queue: VecDeque<TaskMessage> = VecDeque::new();
        let mut waiters: Vec<oneshot::Sender<TaskMessage>> = Vec::new();

        while let Some(msg) = rx.recv().await {
            match msg {
                DispatcherMsg::Submit(mut task) => match task.get_type() {
                    OperatorType::Io => {
                        // Semaphore-like admission: bail rather than block if
                        // there is no IO concurrency budget left.
                        let mut witness = active_io_tasks.load(Ordering::Relaxed);
                        let acquired = loop {
                            if witness == 0 {
                                break false;
                            }
                            match active_io_tasks.compare_exchange(
                                witness,
                                witness - 1,
                                Ordering::Relaxed,
                                Ordering::Relaxed,
                            ) {
                                Ok(_) => break true,
                                Err(new_witness) => witness = new_witness,
                            }
                        };
                        if !acquired {
                            task.abort().await;
                            continue;
                        }
                        let guard = DecrementOnDrop(Arc::clone(&active_io_tasks));
                        tokio::spawn(async move {
                            task.run().await;
                            drop(guard);
                        });
                    }
                    OperatorType::Cpu => match waiters.pop() {
                        Some(reply) => {
                            let _ = reply.send(task);
                        }
                        None => {
                            if task_queue.len() >= config.task_queue_limit {
                                task.abort().await;
                            } else {
                                task_queue.push_back(task);
                            }
                        }
                    },
                },
                DispatcherMsg::Request(reply) => match task_queue.pop_front() {
                    Some(task) => {
                        let _ = reply.send(task);
                    }
                    None => waiters.push(reply),
                },
            }
        }
    });

    for _ in 0..config.num_worker_threads.max(1) {
        let tx = tx.clone();
        tokio::spawn(async move {
            loop {
                let (reply_tx, reply_rx) = oneshot::channel();
                if tx.send(DispatcherMsg::Request(reply_tx)).await.is_err() {
                    return;
                }
                match reply_rx.await {
                    Ok(mut task) => task.run().await,
                    Err(_) => return,
                }
            }
        });
    }

    DispatcherHandle { tx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::{wrap, Operator};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug)]
    struct CountingOperator;

    #[async_trait]
    impl Operator<usize, usize> for CountingOperator {
        type Error = ();

        async fn run(&self, input: &usize) -> Result<usize, ()> {
            Ok(*input * 2)
        }
    }

    #[tokio::test]
    async fn dispatches_tasks_to_worker_pool() {
        let dispatcher = spawn_dispatcher(DispatcherConfig {
            num_worker_threads: 4,
            ..Default::default()
        });
        let (tx, mut rx) = mpsc::channel(32);
        for i in 0..16 {
            let task = wrap(Box::new(CountingOperator), i, tx.clone());
            dispatcher.submit(task).await;
        }
        drop(tx);
        let mut total = 0usize;
        let mut seen = 0usize;
        while let Some(result) = rx.recv().await {
            total += result.into_inner().unwrap();
            seen += 1;
        }
        assert_eq!(seen, 16);
        assert_eq!(total, (0..16).map(|i| i * 2).sum::<usize>());
    }

    #[tokio::test]
    async fn rejects_tasks_past_queue_limit() {
        let dispatcher = spawn_dispatcher(DispatcherConfig {
            num_worker_threads: 0,
            task_queue_limit: 0,
            dispatcher_queue_size: 8,
            active_io_tasks: 8,
        });
        let (tx, mut rx) = mpsc::channel(8);
        let task = wrap(Box::new(CountingOperator), 1usize, tx);
        dispatcher.submit(task).await;
        let result = rx.recv().await.unwrap();
        assert!(matches!(
            result.into_inner(),
            Err(crate::operator::TaskError::Aborted)
        ));
    }

    #[derive(Debug)]
    struct AtomicSumOperator(Arc<AtomicUsize>);

    #[async_trait]
    impl Operator<usize, ()> for AtomicSumOperator {
        type Error = ();

        async fn run(&self, input: &usize) -> Result<(), ()> {
            self.0.fetch_add(*input, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn worker_pool_size_can_be_clamped_to_file_count() {
        let sum = Arc::new(AtomicUsize::new(0));
        let dispatcher = spawn_dispatcher(DispatcherConfig {
            num_worker_threads: 2, // fewer workers than tasks is fine
            ..Default::default()
        });
        let (tx, mut rx) = mpsc::channel(32);
        for i in 1..=5 {
            let op = AtomicSumOperator(sum.clone());
            dispatcher.submit(wrap(Box::new(op), i, tx.clone())).await;
        }
        drop(tx);
        let mut seen = 0;
        while rx.recv().await.is_some() {
            seen += 1;
        }
        assert_eq!(seen, 5);
        assert_eq!(sum.load(Ordering::SeqCst), 15);
    }
}
