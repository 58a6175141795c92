//! Unified error taxonomy. Every fallible operation in the engine
//! returns a [`FdistdumpError`], which carries one of seven kinds, each with
//! an implied severity and process exit code. Worker threads reduce their
//! local error with [`ErrorKind::max`] into a per-process code exactly as the
//! source engine did with its shared error flag, just expressed as an
//! explicit value instead of a mutable global.

use std::fmt;
use thiserror::Error;

/// The seven error kinds the engine distinguishes, ordered so that a
/// `max`-reduce across ranks/threads always keeps the most consequential one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ErrorKind {
    /// No error occurred.
    Ok = 0,
    /// Flow file open/read failure. Per-file warning; the file is skipped.
    IoPath = 1,
    /// Bloom index file missing or corrupt. Per-file warning; treated as a
    /// conservative "possibly contains".
    Index = 2,
    /// Filter expression failed to compile. Fatal before any I/O.
    Filter = 3,
    /// Invalid field spec, duplicate field, or conflicting aggr/sort use.
    /// Fatal before any I/O.
    Fields = 4,
    /// Collective or point-to-point transport failure. Fatal query-wide.
    Transport = 5,
    /// Allocation failure. Fatal to the query.
    Mem = 6,
    /// An internal invariant was violated (e.g. an unreachable enum arm).
    Internal = 7,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl ErrorKind {
    /// Process exit code for this error kind. `Ok` is exit code 0.
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorKind::Ok => 0,
            ErrorKind::IoPath => 4,
            ErrorKind::Index => 4,
            ErrorKind::Filter => 3,
            ErrorKind::Fields => 3,
            ErrorKind::Transport => 5,
            ErrorKind::Mem => 6,
            ErrorKind::Internal => 6,
        }
    }

    /// Default severity for this kind. [`IoPath`](Self::IoPath) and
    /// [`Index`](Self::Index) are warnings unless the caller decides
    /// otherwise (e.g. a warning that leaves zero readable files).
    pub fn default_severity(self) -> Severity {
        match self {
            ErrorKind::Ok => Severity::Info,
            ErrorKind::IoPath | ErrorKind::Index => Severity::Warning,
            _ => Severity::Error,
        }
    }

    /// `max`-reduce two observed error kinds into one, used to fold a
    /// per-thread code into the shared per-process code, and a per-process
    /// code into the cluster-wide final code at rank 0.
    pub fn max(self, other: ErrorKind) -> ErrorKind {
        std::cmp::max(self, other)
    }
}

/// The unified error type returned by fallible engine operations.
#[derive(Debug, Error)]
pub enum FdistdumpError {
    #[error("allocation failed: {0}")]
    Mem(String),

    #[error("I/O error on {path}: {source}")]
    IoPath {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("bloom index error on {path}: {reason}")]
    Index { path: String, reason: String },

    #[error("filter expression error: {0}")]
    Filter(String),

    #[error("field spec error: {0}")]
    Fields(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl FdistdumpError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FdistdumpError::Mem(_) => ErrorKind::Mem,
            FdistdumpError::IoPath { .. } => ErrorKind::IoPath,
            FdistdumpError::Index { .. } => ErrorKind::Index,
            FdistdumpError::Filter(_) => ErrorKind::Filter,
            FdistdumpError::Fields(_) => ErrorKind::Fields,
            FdistdumpError::Transport(_) => ErrorKind::Transport,
            FdistdumpError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn severity(&self) -> Severity {
        self.kind().default_severity()
    }

    pub fn exit_code(&self) -> i32 {
        self.kind().exit_code()
    }

    /// Format a warning the way the worker's standard-error stream does:
    /// `rank=<n>: <message>`.
    pub fn rank_prefixed(&self, rank: u32) -> String {
        format!("rank={rank}: {self}")
    }

    pub fn internal(msg: impl fmt::Display) -> Self {
        FdistdumpError::Internal(msg.to_string())
    }
}

pub trait ResultExt<T> {
    /// Attach the path that an I/O operation failed on.
    fn with_path(self, path: impl Into<String>) -> Result<T, FdistdumpError>;
}

impl<T> ResultExt<T> for Result<T, std::io::Error> {
    fn with_path(self, path: impl Into<String>) -> Result<T, FdistdumpError> {
        self.map_err(|source| FdistdumpError::IoPath {
            path: path.into(),
            source,
        })
    }
}
