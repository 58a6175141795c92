use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use byteorder::{ByteOrder, LittleEndian};

/// Maximum raw record length.
pub const MAX_RECORD_LEN: usize = 1 << 20;

/// An address canonicalized to 16 bytes: IPv4 values are stored as
/// IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`) so that a single
/// comparison/masking code path handles both families.
pub fn canonicalize_addr(addr: IpAddr) -> [u8; 16] {
    match addr {
        IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
        IpAddr::V6(v6) => v6.octets(),
    }
}

pub fn is_v4_mapped(bytes: &[u8; 16]) -> bool {
    bytes[..10] == [0u8; 10] && bytes[10] == 0xff && bytes[11] == 0xff
}

pub fn canonical_to_ipaddr(bytes: [u8; 16]) -> IpAddr {
    if is_v4_mapped(&bytes) {
        IpAddr::V4(Ipv4Addr::new(bytes[12], bytes[13], bytes[14], bytes[15]))
    } else {
        IpAddr::V6(Ipv6Addr::from(bytes))
    }
}

/// A decoded flow record over the fixed field catalogue. The real engine
/// treats records as opaque blobs produced by the external record library;
/// this struct is what that library would hand back after decoding one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowRecord {
    pub srcaddr: [u8; 16],
    pub dstaddr: [u8; 16],
    pub srcport: u16,
    pub dstport: u16,
    pub proto: u8,
    pub tcpflags: u8,
    pub packets: u64,
    pub bytes: u64,
    pub first: u64,
    pub last: u64,
}

impl FlowRecord {
    /// Fixed-width wire encoding (not the 32-bit length prefix itself, see
    /// [`Record`] below for that).
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + 16 + 2 + 2 + 1 + 1 + 8 + 8 + 8 + 8);
        out.extend_from_slice(&self.srcaddr);
        out.extend_from_slice(&self.dstaddr);
        let mut buf16 = [0u8; 2];
        LittleEndian::write_u16(&mut buf16, self.srcport);
        out.extend_from_slice(&buf16);
        LittleEndian::write_u16(&mut buf16, self.dstport);
        out.extend_from_slice(&buf16);
        out.push(self.proto);
        out.push(self.tcpflags);
        let mut buf64 = [0u8; 8];
        for v in [self.packets, self.bytes, self.first, self.last] {
            LittleEndian::write_u64(&mut buf64, v);
            out.extend_from_slice(&buf64);
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 70 {
            return None;
        }
        let mut srcaddr = [0u8; 16];
        srcaddr.copy_from_slice(&bytes[0..16]);
        let mut dstaddr = [0u8; 16];
        dstaddr.copy_from_slice(&bytes[16..32]);
        let srcport = LittleEndian::read_u16(&bytes[32..34]);
        let dstport = LittleEndian::read_u16(&bytes[34..36]);
        let proto = bytes[36];
        let tcpflags = bytes[37];
        let packets = LittleEndian::read_u64(&bytes[38..46]);
        let total_bytes = LittleEndian::read_u64(&bytes[46..54]);
        let first = LittleEndian::read_u64(&bytes[54..62]);
        let last = LittleEndian::read_u64(&bytes[62..70]);
        Some(FlowRecord {
            srcaddr,
            dstaddr,
            srcport,
            dstport,
            proto,
            tcpflags,
            packets,
            bytes: total_bytes,
            first,
            last,
        })
    }
}

/// An opaque, length-prefixed record as it travels on the wire:
/// `uint32 little-endian length | length bytes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record(pub Vec<u8>);

impl Record {
    pub fn from_flow(flow: &FlowRecord) -> Self {
        Record(flow.encode())
    }

    pub fn write_length_prefixed(&self, out: &mut Vec<u8>) -> Result<(), &'static str> {
        if self.0.len() > MAX_RECORD_LEN {
            return Err("record exceeds maximum raw record length");
        }
        let mut len_buf = [0u8; 4];
        LittleEndian::write_u32(&mut len_buf, self.0.len() as u32);
        out.extend_from_slice(&len_buf);
        out.extend_from_slice(&self.0);
        Ok(())
    }

    /// Decode all length-prefixed records packed into `blob`, in order.
    pub fn split_blob(blob: &[u8]) -> Vec<Record> {
        let mut out = Vec::new();
        let mut cursor = 0usize;
        while cursor + 4 <= blob.len() {
            let len = LittleEndian::read_u32(&blob[cursor..cursor + 4]) as usize;
            cursor += 4;
            if cursor + len > blob.len() {
                break;
            }
            out.push(Record(blob[cursor..cursor + len].to_vec()));
            cursor += len;
        }
        out
    }
}
