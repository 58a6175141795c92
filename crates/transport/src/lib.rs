//! Rank-addressed collective and point-to-point messaging between the
//! coordinator rank (always rank 0) and the worker ranks.
//!
//! There is no MPI runtime anywhere in this codebase; [`local::LocalCluster`]
//! simulates a fixed-size communicator in-process using channels, which is
//! sufficient for a single-host multi-threaded deployment and for tests.
//! A networked implementation can be added later behind the same
//! [`Transport`] trait without touching any caller.

pub mod local;
pub mod tag;

pub use tag::Tag;

use async_trait::async_trait;
use bytes::Bytes;
use fdistdump_error::FdistdumpError;

/// One message received on a tagged channel, together with the rank that
/// sent it. A zero-length `payload` is the end-of-stream sentinel for
/// that sender on that tag (see module docs on [`Tag`]).
#[derive(Debug, Clone)]
pub struct TaggedMessage {
    pub from: u32,
    pub payload: Bytes,
}

impl TaggedMessage {
    pub fn is_sentinel(&self) -> bool {
        self.payload.is_empty()
    }
}

/// A rank's view of the communicator for one query.
///
/// Collective operations (`broadcast`, `reduce_sum`, `gather_u64`) are
/// rooted at rank 0 and must be called by every rank the same number of
/// times, in the same relative order — exactly as MPI collectives require.
/// Point-to-point operations are addressed by destination rank and tag and
/// may be called in any order.
#[async_trait]
pub trait Transport: Send + Sync {
    fn rank(&self) -> u32;

    fn world_size(&self) -> u32;

    fn is_coordinator(&self) -> bool {
        self.rank() == 0
    }

    /// Collective broadcast rooted at rank 0. The root passes `Some(payload)`;
    /// every other rank passes `None`. All ranks, including the root,
    /// receive the same bytes back.
    async fn broadcast(&self, payload: Option<Bytes>) -> Result<Bytes, FdistdumpError>;

    /// Collective element-wise sum reduction rooted at rank 0. Returns
    /// `Some(totals)` on rank 0 and `None` everywhere else. All callers
    /// must supply vectors of identical length.
    async fn reduce_sum(&self, local: Vec<u64>) -> Result<Option<Vec<u64>>, FdistdumpError>;

    /// Collective gather rooted at rank 0. Returns `Some(values)` on rank 0,
    /// ordered by rank (including rank 0's own value), and `None` elsewhere.
    async fn gather_u64(&self, local: u64) -> Result<Option<Vec<u64>>, FdistdumpError>;

    /// Point-to-point send of one blob to `dest` on `tag`. Ordering between
    /// two sends from this rank to the same `(dest, tag)` is preserved;
    /// ordering across distinct senders is not.
    async fn send_tagged(&self, dest: u32, tag: Tag, payload: Bytes)
        -> Result<(), FdistdumpError>;

    /// Send the zero-length end-of-stream sentinel for this rank on `tag`.
    async fn send_sentinel(&self, dest: u32, tag: Tag) -> Result<(), FdistdumpError> {
        self.send_tagged(dest, tag, Bytes::new()).await
    }

    /// Receive the next message addressed to this rank on `tag`, from
    /// whichever sender produced it next. Blocks until a message (including
    /// a sentinel) is available or the communicator is aborted.
    async fn recv_tagged_any(&self, tag: Tag) -> Result<TaggedMessage, FdistdumpError>;

    /// Returns a handle to an independent logical channel with the same
    /// rank and tag namespace as `self`. The concrete transport already
    /// isolates every tag into its own queue, so the returned handle is a
    /// cheap clone rather than a freshly duplicated communicator; it exists
    /// so callers can hand the progress-reporting path a handle that is
    /// conceptually distinct from the data path.
    fn dup(&self) -> Box<dyn Transport>;

    /// Abort the whole communicator: every pending and future call on every
    /// rank's handle returns `Err`. Used when a fatal error on one
    /// participant must tear down the rest of the query; severity
    /// propagation happens at a higher layer, this is the mechanical
    /// teardown primitive it relies on.
    async fn abort(&self, reason: String);
}
