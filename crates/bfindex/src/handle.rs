//! Stand-in for the external Bloom-filter index file codec:
//! opaque to the core, but given a concrete minimal format here so the
//! engine and its tests have something real to open and query.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use fdistdump_error::FdistdumpError;

/// Answers "does this file possibly contain address X?" with one-sided
/// false positives (true negatives are exact, positives may be spurious).
pub trait IndexHandle: Send + Sync {
    fn contains_addr(&self, addr: [u8; 16]) -> Result<bool, FdistdumpError>;
}

/// An index file holding a flat list of 16-byte canonical addresses. This
/// is a perfect (zero false-positive) membership set rather than a real
/// Bloom filter, which is a valid instance of the contract in §4.2
/// ("the converse is not required", i.e. false positives are allowed but
/// not mandatory).
pub struct FileIndexHandle {
    addrs: HashSet<[u8; 16]>,
}

const MAGIC: &[u8; 4] = b"BFI1";

impl FileIndexHandle {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FdistdumpError> {
        if bytes.len() < 4 || &bytes[0..4] != MAGIC {
            return Err(FdistdumpError::Index {
                path: String::new(),
                reason: "bad magic".to_string(),
            });
        }
        let body = &bytes[4..];
        if body.len() % 16 != 0 {
            return Err(FdistdumpError::Index {
                path: String::new(),
                reason: "truncated address table".to_string(),
            });
        }
        let addrs = body
            .chunks_exact(16)
            .map(|c| {
                let mut a = [0u8; 16];
                a.copy_from_slice(c);
                a
            })
            .collect();
        Ok(FileIndexHandle { addrs })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = MAGIC.to_vec();
        for a in &self.addrs {
            out.extend_from_slice(a);
        }
        out
    }

    pub fn from_addrs(addrs: impl IntoIterator<Item = [u8; 16]>) -> Self {
        FileIndexHandle { addrs: addrs.into_iter().collect() }
    }
}

impl IndexHandle for FileIndexHandle {
    fn contains_addr(&self, addr: [u8; 16]) -> Result<bool, FdistdumpError> {
        Ok(self.addrs.contains(&addr))
    }
}

pub fn open_index(path: &Path) -> Result<Box<dyn IndexHandle>, FdistdumpError> {
    let bytes = fs::read(path).map_err(|source| FdistdumpError::IoPath {
        path: path.display().to_string(),
        source,
    })?;
    let handle = FileIndexHandle::from_bytes(&bytes).map_err(|err| match err {
        FdistdumpError::Index { reason, .. } => FdistdumpError::Index {
            path: path.display().to_string(),
            reason,
        },
        other => other,
    })?;
    Ok(Box::new(handle))
}

/// Test-only handle backed by a set of dotted-quad IPv4 strings.
pub struct InMemoryIndexHandle {
    addrs: HashSet<[u8; 16]>,
}

impl InMemoryIndexHandle {
    pub fn containing(ips: &[&str]) -> Self {
        let addrs = ips
            .iter()
            .map(|s| {
                let ip: std::net::IpAddr = s.parse().expect("valid ip literal in test");
                fdistdump_flowlib::record::canonicalize_addr(ip)
            })
            .collect();
        InMemoryIndexHandle { addrs }
    }
}

impl IndexHandle for InMemoryIndexHandle {
    fn contains_addr(&self, addr: [u8; 16]) -> Result<bool, FdistdumpError> {
        Ok(self.addrs.contains(&addr))
    }
}
