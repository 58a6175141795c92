//! In-process communicator simulating `world_size` ranks with tokio
//! channels. Rank 0 is always the coordinator.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use fdistdump_error::FdistdumpError;
use tokio::sync::{broadcast, mpsc, Mutex, Notify};

use crate::{Tag, TaggedMessage, Transport};

const BROADCAST_CAPACITY: usize = 256;

struct Shared {
    world_size: u32,
    aborted: AtomicBool,
    abort_reason: Mutex<Option<String>>,
    abort_notify: Notify,
    bcast_tx: broadcast::Sender<Bytes>,
    reduce_tx: mpsc::UnboundedSender<(u32, Vec<u64>)>,
    reduce_rx: Mutex<mpsc::UnboundedReceiver<(u32, Vec<u64>)>>,
    gather_tx: mpsc::UnboundedSender<(u32, u64)>,
    gather_rx: Mutex<mpsc::UnboundedReceiver<(u32, u64)>>,
    /// `inboxes[(dest, tag)]` is the channel that any rank can send on to
    /// reach `dest` on `tag`; only `dest`'s handle ever drains the paired
    /// receiver, which lives in `tagged_rx`.
    inboxes: HashMap<(u32, Tag), mpsc::UnboundedSender<TaggedMessage>>,
    tagged_rx: Vec<Mutex<HashMap<Tag, mpsc::UnboundedReceiver<TaggedMessage>>>>,
}

/// A fixed-size, in-process simulation of a communicator. `new` returns one
/// [`LocalTransport`] handle per rank; hand rank 0's handle to the
/// coordinator task and the rest to worker tasks.
pub struct LocalCluster;

impl LocalCluster {
    pub fn new(world_size: u32) -> Vec<LocalTransport> {
        assert!(world_size >= 1, "a communicator needs at least one rank");

        let (bcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (reduce_tx, reduce_rx) = mpsc::unbounded_channel();
        let (gather_tx, gather_rx) = mpsc::unbounded_channel();

        let mut inboxes = HashMap::new();
        let mut per_rank_rx: Vec<HashMap<Tag, mpsc::UnboundedReceiver<TaggedMessage>>> =
            (0..world_size).map(|_| HashMap::new()).collect();
        for dest in 0..world_size {
            for tag in Tag::ALL {
                let (tx, rx) = mpsc::unbounded_channel();
                inboxes.insert((dest, tag), tx);
                per_rank_rx[dest as usize].insert(tag, rx);
            }
        }

        let shared = Arc::new(Shared {
            world_size,
            aborted: AtomicBool::new(false),
            abort_reason: Mutex::new(None),
            abort_notify: Notify::new(),
            bcast_tx,
            reduce_tx,
            reduce_rx: Mutex::new(reduce_rx),
            gather_tx,
            gather_rx: Mutex::new(gather_rx),
            inboxes,
            tagged_rx: per_rank_rx.into_iter().map(Mutex::new).collect(),
        });

        (0..world_size)
            .map(|rank| LocalTransport {
                rank,
                shared: shared.clone(),
                bcast_rx: Arc::new(Mutex::new(shared.bcast_tx.subscribe())),
            })
            .collect()
    }
}

/// One rank's view of a [`LocalCluster`].
pub struct LocalTransport {
    rank: u32,
    shared: Arc<Shared>,
    bcast_rx: Arc<Mutex<broadcast::Receiver<Bytes>>>,
}

impl Clone for LocalTransport {
    fn clone(&self) -> Self {
        LocalTransport {
            rank: self.rank,
            shared: self.shared.clone(),
            bcast_rx: self.bcast_rx.clone(),
        }
    }
}

impl LocalTransport {
    fn check_aborted(&self) -> Result<(), FdistdumpError> {
        if self.shared.aborted.load(Ordering::SeqCst) {
            let reason = self
                .shared
                .abort_reason
                .try_lock()
                .ok()
                .and_then(|r| r.clone())
                .unwrap_or_else(|| "communicator aborted".to_string());
            return Err(FdistdumpError::Transport(format!("rank={}: {reason}", self.rank)));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for LocalTransport {
    fn rank(&self) -> u32 {
        self.rank
    }

    fn world_size(&self) -> u32 {
        self.shared.world_size
    }

    async fn broadcast(&self, payload: Option<Bytes>) -> Result<Bytes, FdistdumpError> {
        self.check_aborted()?;
        if self.rank == 0 {
            let payload = payload.ok_or_else(|| {
                FdistdumpError::internal("rank 0 must supply a broadcast payload")
            })?;
            // Subscribe before sending so our own receiver observes it too.
            let _ = self.shared.bcast_tx.send(payload.clone());
            Ok(payload)
        } else {
            let mut rx = self.bcast_rx.lock().await;
            loop {
                tokio::select! {
                    biased;
                    _ = self.shared.abort_notify.notified() => {
                        return Err(self.check_aborted().unwrap_err());
                    }
                    received = rx.recv() => {
                        return match received {
                            Ok(bytes) => Ok(bytes),
                            Err(broadcast::error::RecvError::Lagged(_)) => continue,
                            Err(broadcast::error::RecvError::Closed) => {
                                Err(FdistdumpError::Transport("broadcast channel closed".to_string()))
                            }
                        };
                    }
                }
            }
        }
    }

    async fn reduce_sum(&self, local: Vec<u64>) -> Result<Option<Vec<u64>>, FdistdumpError> {
        self.check_aborted()?;
        if self.rank != 0 {
            self.shared
                .reduce_tx
                .send((self.rank, local))
                .map_err(|_| FdistdumpError::Transport("reduce channel closed".to_string()))?;
            return Ok(None);
        }

        let mut totals = local;
        let mut remaining = self.shared.world_size - 1;
        let mut rx = self.shared.reduce_rx.lock().await;
        while remaining > 0 {
            let (_, values) = rx.recv().await.ok_or_else(|| {
                FdistdumpError::Transport(
                    "reduce channel closed before all ranks reported".to_string(),
                )
            })?;
            if values.len() != totals.len() {
                return Err(FdistdumpError::internal(
                    "reduce_sum vector length mismatch across ranks",
                ));
            }
            for (acc, v) in totals.iter_mut().zip(values.iter()) {
                *acc = acc.saturating_add(*v);
            }
            remaining -= 1;
        }
        Ok(Some(totals))
    }

    async fn gather_u64(&self, local: u64) -> Result<Option<Vec<u64>>, FdistdumpError> {
        self.check_aborted()?;
        if self.rank != 0 {
            self.shared
                .gather_tx
                .send((self.rank, local))
                .map_err(|_| FdistdumpError::Transport("gather channel closed".to_string()))?;
            return Ok(None);
        }

        let mut values = vec![0u64; self.shared.world_size as usize];
        values[0] = local;
        let mut remaining = self.shared.world_size - 1;
        let mut rx = self.shared.gather_rx.lock().await;
        while remaining > 0 {
            let (from, value) = rx.recv().await.ok_or_else(|| {
                FdistdumpError::Transport(
                    "gather channel closed before all ranks reported".to_string(),
                )
            })?;
            values[from as usize] = value;
            remaining -= 1;
        }
        Ok(Some(values))
    }

    async fn send_tagged(
        &self,
        dest: u32,
        tag: Tag,
        payload: Bytes,
    ) -> Result<(), FdistdumpError> {
        self.check_aborted()?;
        let tx = self
            .shared
            .inboxes
            .get(&(dest, tag))
            .ok_or_else(|| FdistdumpError::internal(format!("no inbox for rank {dest} tag {tag:?}")))?;
        tx.send(TaggedMessage {
            from: self.rank,
            payload,
        })
        .map_err(|_| FdistdumpError::Transport(format!("destination rank {dest} is gone")))
    }

    async fn recv_tagged_any(&self, tag: Tag) -> Result<TaggedMessage, FdistdumpError> {
        self.check_aborted()?;
        let mut rx_by_tag = self.shared.tagged_rx[self.rank as usize].lock().await;
        let rx = rx_by_tag
            .get_mut(&tag)
            .ok_or_else(|| FdistdumpError::internal(format!("no inbox registered for tag {tag:?}")))?;
        tokio::select! {
            biased;
            _ = self.shared.abort_notify.notified() => Err(self.check_aborted().unwrap_err()),
            received = rx.recv() => received.ok_or_else(|| {
                FdistdumpError::Transport(format!("all senders on tag {tag:?} are gone"))
            }),
        }
    }

    fn dup(&self) -> Box<dyn Transport> {
        Box::new(self.clone())
    }

    async fn abort(&self, reason: String) {
        tracing::error!(rank = self.rank, %reason, "aborting communicator");
        *self.shared.abort_reason.lock().await = Some(reason);
        self.shared.aborted.store(true, Ordering::SeqCst);
        self.shared.abort_notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_delivers_same_bytes_to_every_rank() {
        let mut ranks = LocalCluster::new(4);
        let root = ranks.remove(0);
        let workers = ranks;

        let worker_futs = workers
            .into_iter()
            .map(|w| tokio::spawn(async move { w.broadcast(None).await }));

        let root_fut =
            tokio::spawn(async move { root.broadcast(Some(Bytes::from_static(b"task"))).await });

        let root_result = root_fut.await.unwrap().unwrap();
        assert_eq!(&root_result[..], b"task");
        for fut in worker_futs {
            assert_eq!(&fut.await.unwrap().unwrap()[..], b"task");
        }
    }

    #[tokio::test]
    async fn reduce_sum_adds_all_ranks_elementwise() {
        let mut ranks = LocalCluster::new(3);
        let root = ranks.remove(0);
        let workers = ranks;

        let worker_futs: Vec<_> = workers
            .into_iter()
            .enumerate()
            .map(|(i, w)| {
                tokio::spawn(async move { w.reduce_sum(vec![(i as u64) + 1, 10]).await })
            })
            .collect();

        let total = root.reduce_sum(vec![0, 0]).await.unwrap().unwrap();
        for fut in worker_futs {
            fut.await.unwrap().unwrap();
        }
        assert_eq!(total, vec![1 + 2, 20]);
    }

    #[tokio::test]
    async fn gather_u64_orders_results_by_rank() {
        let mut ranks = LocalCluster::new(3);
        let root = ranks.remove(0);
        let workers = ranks;

        let worker_futs: Vec<_> = workers
            .into_iter()
            .map(|w| {
                let rank = w.rank();
                tokio::spawn(async move { w.gather_u64((rank as u64) * 100).await })
            })
            .collect();

        let values = root.gather_u64(0).await.unwrap().unwrap();
        for fut in worker_futs {
            fut.await.unwrap().unwrap();
        }
        assert_eq!(values, vec![0, 100, 200]);
    }

    #[tokio::test]
    async fn tagged_send_recv_round_trips_and_sees_sentinel() {
        let ranks = LocalCluster::new(2);
        let coordinator = ranks[0].clone();
        let worker = ranks[1].clone();

        worker
            .send_tagged(0, Tag::List, Bytes::from_static(b"row1"))
            .await
            .unwrap();
        worker.send_sentinel(0, Tag::List).await.unwrap();

        let first = coordinator.recv_tagged_any(Tag::List).await.unwrap();
        assert_eq!(first.from, 1);
        assert_eq!(&first.payload[..], b"row1");
        assert!(!first.is_sentinel());

        let second = coordinator.recv_tagged_any(Tag::List).await.unwrap();
        assert!(second.is_sentinel());
    }

    #[tokio::test]
    async fn abort_unblocks_pending_receive() {
        let ranks = LocalCluster::new(2);
        let coordinator = ranks[0].clone();
        let aborter = ranks[1].clone();

        let recv_fut = tokio::spawn(async move { coordinator.recv_tagged_any(Tag::List).await });
        aborter.abort("fatal worker error".to_string()).await;

        let result = recv_fut.await.unwrap();
        assert!(result.is_err());
    }
}
