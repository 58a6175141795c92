//! Shared field-value extraction used by both the aggregation table and the
//! sort-only list. Lives next to the record memory rather than in
//! `fdistdump-flowlib` because only the memory adapter needs raw
//! masked/aligned bytes; everyone else reads a decoded [`FlowRecord`]
//! directly.

use fdistdump_error::FdistdumpError;
use fdistdump_flowlib::field;
use fdistdump_flowlib::fields::AggrKey;
use fdistdump_flowlib::record::FlowRecord;

pub fn field_num(name: &str, record: &FlowRecord) -> Option<u64> {
    match name {
        "srcport" => Some(record.srcport as u64),
        "dstport" => Some(record.dstport as u64),
        "proto" => Some(record.proto as u64),
        "tcpflags" => Some(record.tcpflags as u64),
        "packets" => Some(record.packets),
        "bytes" => Some(record.bytes),
        "first" => Some(record.first),
        "last" => Some(record.last),
        _ => None,
    }
}

pub fn field_addr(name: &str, record: &FlowRecord) -> Option<[u8; 16]> {
    match name {
        "srcaddr" => Some(record.srcaddr),
        "dstaddr" => Some(record.dstaddr),
        _ => None,
    }
}

fn apply_mask(mut bytes: [u8; 16], mask: u8) -> [u8; 16] {
    let full_bytes = (mask / 8) as usize;
    let rem_bits = mask % 8;
    for b in bytes.iter_mut().skip(full_bytes.min(16)) {
        *b = 0;
    }
    if full_bytes < 16 && rem_bits > 0 {
        bytes[full_bytes] &= 0xFFu8 << (8 - rem_bits);
    }
    bytes
}

/// Concatenate one aggregation key's raw bytes for `record`, applying the
/// IPv4/IPv6 netmask or 64-bit alignment the key carries.
pub fn key_bytes(key: &AggrKey, record: &FlowRecord) -> Result<Vec<u8>, FdistdumpError> {
    let entry = field::by_id(key.field)
        .ok_or_else(|| FdistdumpError::internal(format!("unknown aggrKey field {:?}", key.field)))?;
    if entry.data_type.is_address() {
        let raw = field_addr(entry.name, record)
            .ok_or_else(|| FdistdumpError::internal(format!("field {} is not an address", entry.name)))?;
        let mask = if fdistdump_flowlib::record::is_v4_mapped(&raw) {
            // IPv4-mapped: widen the requested v4 mask by the 96 fixed prefix bits.
            (key.ipv4_mask as u32 + 96).min(128) as u8
        } else {
            key.ipv6_mask
        };
        Ok(apply_mask(raw, mask).to_vec())
    } else {
        let raw = field_num(entry.name, record)
            .ok_or_else(|| FdistdumpError::internal(format!("field {} is not numeric", entry.name)))?;
        let bucket = if key.align > 0 { (raw / key.align) * key.align } else { raw };
        Ok(bucket.to_le_bytes().to_vec())
    }
}
