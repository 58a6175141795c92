//! Wire encodings for the data that travels between coordinator and
//! workers beyond plain flow records: an aggregated row
//! (key + combined output values + optional sort value) and a TPUT
//! phase-3 candidate key blob.

use byteorder::{ByteOrder, LittleEndian};
use fdistdump_error::FdistdumpError;
use fdistdump_recordmem::AggrRow;

/// `u32 key_len | key | u8 n_values | (u64 value)* | u8 has_sort | u64 sort_value?`
pub fn encode_aggr_row(row: &AggrRow) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + row.key.len() + 1 + row.values.len() * 8 + 9);
    let mut u32buf = [0u8; 4];
    LittleEndian::write_u32(&mut u32buf, row.key.len() as u32);
    out.extend_from_slice(&u32buf);
    out.extend_from_slice(&row.key);
    out.push(row.values.len() as u8);
    let mut u64buf = [0u8; 8];
    for v in &row.values {
        LittleEndian::write_u64(&mut u64buf, *v);
        out.extend_from_slice(&u64buf);
    }
    match row.sort_value {
        Some(v) => {
            out.push(1);
            LittleEndian::write_u64(&mut u64buf, v);
            out.extend_from_slice(&u64buf);
        }
        None => out.push(0),
    }
    out
}

pub fn decode_aggr_row(bytes: &[u8]) -> Result<AggrRow, FdistdumpError> {
    let bad = || FdistdumpError::internal("truncated aggregation row on the wire");
    if bytes.len() < 5 {
        return Err(bad());
    }
    let key_len = LittleEndian::read_u32(&bytes[0..4]) as usize;
    let mut cursor = 4usize;
    if bytes.len() < cursor + key_len + 1 {
        return Err(bad());
    }
    let key = bytes[cursor..cursor + key_len].to_vec();
    cursor += key_len;
    let n_values = bytes[cursor] as usize;
    cursor += 1;
    if bytes.len() < cursor + n_values * 8 + 1 {
        return Err(bad());
    }
    let mut values = Vec::with_capacity(n_values);
    for _ in 0..n_values {
        values.push(LittleEndian::read_u64(&bytes[cursor..cursor + 8]));
        cursor += 8;
    }
    let has_sort = bytes[cursor] != 0;
    cursor += 1;
    let sort_value = if has_sort {
        if bytes.len() < cursor + 8 {
            return Err(bad());
        }
        Some(LittleEndian::read_u64(&bytes[cursor..cursor + 8]))
    } else {
        None
    };
    Ok(AggrRow { key, values, sort_value })
}

/// Pack a batch of TPUT phase-3 candidate keys the way the wire protocol describes a
/// single key: `int32 length | raw key bytes`, repeated once per key.
pub fn encode_key_batch(keys: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut i32buf = [0u8; 4];
    for key in keys {
        LittleEndian::write_i32(&mut i32buf, key.len() as i32);
        out.extend_from_slice(&i32buf);
        out.extend_from_slice(key);
    }
    out
}

pub fn decode_key_batch(bytes: &[u8]) -> Result<Vec<Vec<u8>>, FdistdumpError> {
    let mut out = Vec::new();
    let mut cursor = 0usize;
    while cursor < bytes.len() {
        if bytes.len() < cursor + 4 {
            return Err(FdistdumpError::internal("truncated key batch length prefix"));
        }
        let len = LittleEndian::read_i32(&bytes[cursor..cursor + 4]).max(0) as usize;
        cursor += 4;
        if bytes.len() < cursor + len {
            return Err(FdistdumpError::internal("truncated key batch body"));
        }
        out.push(bytes[cursor..cursor + len].to_vec());
        cursor += len;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggr_row_round_trips() {
        let row = AggrRow { key: vec![10, 0, 0, 0], values: vec![1, 2, 3], sort_value: Some(42) };
        let encoded = encode_aggr_row(&row);
        let decoded = decode_aggr_row(&encoded).unwrap();
        assert_eq!(decoded.key, row.key);
        assert_eq!(decoded.values, row.values);
        assert_eq!(decoded.sort_value, row.sort_value);
    }

    #[test]
    fn aggr_row_without_sort_value_round_trips() {
        let row = AggrRow { key: vec![1], values: vec![], sort_value: None };
        let decoded = decode_aggr_row(&encode_aggr_row(&row)).unwrap();
        assert_eq!(decoded.sort_value, None);
    }

    #[test]
    fn key_batch_round_trips() {
        let keys = vec![vec![1, 2, 3], vec![], vec![9, 9, 9, 9, 9]];
        let decoded = decode_key_batch(&encode_key_batch(&keys)).unwrap();
        assert_eq!(decoded, keys);
    }
}
