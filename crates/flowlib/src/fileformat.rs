//! A concrete flow-file format: a fixed-size metadata header
//! ("(flows, pkts, bytes) × (total, tcp, udp, icmp, other)") followed by
//! zero or more length-prefixed [`FlowRecord`]s. The real engine treats
//! flow files as opaque blobs read by an external library; this
//! is that library's concrete stand-in.

use std::fs;
use std::io::Read;
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use fdistdump_error::FdistdumpError;

use crate::record::{FlowRecord, Record};

pub const HEADER_LEN: usize = 15 * 8;

/// `counts` is laid out as five `(flows, packets, bytes)` triples in the
/// order total, tcp, udp, icmp, other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowFileHeader {
    pub counts: [u64; 15],
}

impl FlowFileHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        for (i, v) in self.counts.iter().enumerate() {
            LittleEndian::write_u64(&mut out[i * 8..i * 8 + 8], *v);
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_LEN {
            return None;
        }
        let mut counts = [0u64; 15];
        for (i, slot) in counts.iter_mut().enumerate() {
            *slot = LittleEndian::read_u64(&bytes[i * 8..i * 8 + 8]);
        }
        Some(FlowFileHeader { counts })
    }
}

#[derive(Debug, Clone)]
pub struct FlowFile {
    pub header: FlowFileHeader,
    pub records: Vec<FlowRecord>,
}

/// Read only the fixed-size header, without decoding any records. Lets the
/// worker's bfindex prune step skip opening the rest of
/// a file bfindex says it can't possibly match, while still recording that
/// file's metadata totals.
pub fn read_header(path: &Path) -> Result<FlowFileHeader, FdistdumpError> {
    let mut file = fs::File::open(path).map_err(|source| FdistdumpError::IoPath {
        path: path.display().to_string(),
        source,
    })?;
    let mut buf = [0u8; HEADER_LEN];
    file.read_exact(&mut buf).map_err(|source| FdistdumpError::IoPath {
        path: path.display().to_string(),
        source,
    })?;
    FlowFileHeader::decode(&buf).ok_or_else(|| FdistdumpError::IoPath {
        path: path.display().to_string(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, "truncated flow file header"),
    })
}

impl FlowFile {
    pub fn read(path: &Path) -> Result<Self, FdistdumpError> {
        let bytes = fs::read(path).map_err(|source| FdistdumpError::IoPath {
            path: path.display().to_string(),
            source,
        })?;
        let header = FlowFileHeader::decode(&bytes).ok_or_else(|| FdistdumpError::IoPath {
            path: path.display().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, "truncated flow file header"),
        })?;
        let records = Record::split_blob(&bytes[HEADER_LEN..])
            .into_iter()
            .filter_map(|r| FlowRecord::decode(&r.0))
            .collect();
        Ok(FlowFile { header, records })
    }

    pub fn write(path: &Path, header: FlowFileHeader, records: &[FlowRecord]) -> Result<(), FdistdumpError> {
        let mut out = header.encode().to_vec();
        for r in records {
            Record::from_flow(r)
                .write_length_prefixed(&mut out)
                .map_err(|e| FdistdumpError::internal(e.to_string()))?;
        }
        fs::write(path, out).map_err(|source| FdistdumpError::IoPath {
            path: path.display().to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::canonicalize_addr;
    use std::net::{IpAddr, Ipv4Addr};
    use tempfile::NamedTempFile;

    #[test]
    fn writes_and_reads_back_header_and_records() {
        let file = NamedTempFile::new().unwrap();
        let rec = FlowRecord {
            srcaddr: canonicalize_addr(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))),
            dstaddr: canonicalize_addr(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))),
            srcport: 53,
            dstport: 1234,
            proto: 17,
            tcpflags: 0,
            packets: 3,
            bytes: 900,
            first: 10,
            last: 20,
        };
        let mut counts = [0u64; 15];
        counts[0] = 1; // total.flows
        counts[6] = 1; // udp.flows
        let header = FlowFileHeader { counts };
        FlowFile::write(file.path(), header, std::slice::from_ref(&rec)).unwrap();

        let read_back = FlowFile::read(file.path()).unwrap();
        assert_eq!(read_back.header, header);
        assert_eq!(read_back.records, vec![rec]);
    }
}
