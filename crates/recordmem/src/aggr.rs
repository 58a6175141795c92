use std::collections::HashMap;

use fdistdump_error::FdistdumpError;
use fdistdump_flowlib::fields::{AggrFunc, FieldsDescriptor};
use fdistdump_flowlib::record::FlowRecord;

use crate::access::{field_num, key_bytes};

/// One aggregated group: the raw concatenated key bytes, one combined
/// value per output field (in `FieldsDescriptor::output_fields` order),
/// and — when a sort key is configured — its combined sort value.
#[derive(Debug, Clone)]
pub struct AggrRow {
    pub key: Vec<u8>,
    pub values: Vec<u64>,
    pub sort_value: Option<u64>,
}

#[derive(Debug)]
struct Entry {
    values: Vec<Option<u64>>,
    sort_value: Option<u64>,
}

/// Hash-table aggregation memory, keyed by concatenated raw `aggrKeys`
/// bytes. One instance lives per worker thread during the file
/// loop and is merged into the worker-shared instance at the thread join
/// point; the coordinator also owns one to merge every worker's rows.
#[derive(Debug)]
pub struct AggrMemory {
    fields: FieldsDescriptor,
    table: HashMap<Vec<u8>, Entry>,
}

impl AggrMemory {
    pub fn new(fields: FieldsDescriptor) -> Self {
        AggrMemory { fields, table: HashMap::new() }
    }

    pub fn fields(&self) -> &FieldsDescriptor {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Insert one flow record's contribution into its group.
    pub fn write(&mut self, record: &FlowRecord) -> Result<(), FdistdumpError> {
        let mut key = Vec::new();
        for k in &self.fields.aggr_keys {
            key.extend(key_bytes(k, record)?);
        }

        let sort_contribution = match &self.fields.sort_key {
            Some(sk) => {
                let entry = fdistdump_flowlib::field::by_id(sk.field)
                    .ok_or_else(|| FdistdumpError::internal("unknown sort key field"))?;
                field_num(entry.name, record)
            }
            None => None,
        };

        let output_contributions: Vec<Option<u64>> = self
            .fields
            .output_fields
            .iter()
            .map(|o| {
                fdistdump_flowlib::field::by_id(o.field).and_then(|entry| field_num(entry.name, record))
            })
            .collect();

        let entry = self.table.entry(key).or_insert_with(|| Entry {
            values: vec![None; self.fields.output_fields.len()],
            sort_value: None,
        });

        for ((slot, contribution), out_field) in entry
            .values
            .iter_mut()
            .zip(output_contributions)
            .zip(&self.fields.output_fields)
        {
            *slot = combine_opt(*slot, contribution, out_field.func);
        }

        if let Some(sk) = &self.fields.sort_key {
            match sk.func {
                Some(func) => entry.sort_value = combine_opt(entry.sort_value, sort_contribution, func),
                None => {
                    if entry.sort_value.is_none() {
                        entry.sort_value = sort_contribution;
                    }
                }
            }
        }

        Ok(())
    }

    /// Merge `other`'s groups into `self`, combining like keys with each
    /// output field's aggregation function.
    pub fn merge(&mut self, other: AggrMemory) {
        for (key, other_entry) in other.table {
            let entry = self.table.entry(key).or_insert_with(|| Entry {
                values: vec![None; self.fields.output_fields.len()],
                sort_value: None,
            });
            for ((slot, other_v), out_field) in entry
                .values
                .iter_mut()
                .zip(other_entry.values)
                .zip(&self.fields.output_fields)
            {
                *slot = combine_opt(*slot, other_v, out_field.func);
            }
            if let Some(sk) = &self.fields.sort_key {
                entry.sort_value = match sk.func {
                    Some(func) => combine_opt(entry.sort_value, other_entry.sort_value, func),
                    None => entry.sort_value.or(other_entry.sort_value),
                };
            }
        }
    }

    /// Snapshot every group as a raw row, e.g. for sending over the wire
    /// or sorting by the configured sort key.
    pub fn rows(&self) -> Vec<AggrRow> {
        self.table
            .iter()
            .map(|(key, e)| AggrRow {
                key: key.clone(),
                values: e.values.iter().map(|v| v.unwrap_or(0)).collect(),
                sort_value: e.sort_value,
            })
            .collect()
    }

    /// Look up one key's full row in this memory (TPUT phase 3's
    /// `lookupRawByKey`).
    pub fn lookup_raw_by_key(&self, key: &[u8]) -> Option<AggrRow> {
        self.table.get(key).map(|e| AggrRow {
            key: key.to_vec(),
            values: e.values.iter().map(|v| v.unwrap_or(0)).collect(),
            sort_value: e.sort_value,
        })
    }

    /// Insert an already-combined row as-is, used when reconstructing an
    /// `AggrMemory` from rows received over the wire.
    pub fn insert_row(&mut self, row: AggrRow) {
        let entry = self.table.entry(row.key).or_insert_with(|| Entry {
            values: vec![None; self.fields.output_fields.len()],
            sort_value: None,
        });
        for ((slot, v), out_field) in entry
            .values
            .iter_mut()
            .zip(row.values)
            .zip(&self.fields.output_fields)
        {
            *slot = combine_opt(*slot, Some(v), out_field.func);
        }
        if let Some(sk) = &self.fields.sort_key {
            entry.sort_value = match sk.func {
                Some(func) => combine_opt(entry.sort_value, row.sort_value, func),
                None => entry.sort_value.or(row.sort_value),
            };
        }
    }
}

fn combine_opt(existing: Option<u64>, incoming: Option<u64>, func: AggrFunc) -> Option<u64> {
    match (existing, incoming) {
        (None, v) => v,
        (v, None) => v,
        (Some(a), Some(b)) => Some(func.combine_u64(a, b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fdistdump_flowlib::field::FieldId;
    use fdistdump_flowlib::fields::{AggrKey, OutputField};
    use fdistdump_flowlib::record::canonicalize_addr;
    use std::net::{IpAddr, Ipv4Addr};

    fn rec(src: &str, bytes: u64) -> FlowRecord {
        FlowRecord {
            srcaddr: canonicalize_addr(IpAddr::V4(src.parse::<Ipv4Addr>().unwrap())),
            dstaddr: canonicalize_addr(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0))),
            srcport: 0,
            dstport: 0,
            proto: 0,
            tcpflags: 0,
            packets: 1,
            bytes,
            first: 0,
            last: 0,
        }
    }

    fn fields() -> FieldsDescriptor {
        FieldsDescriptor {
            aggr_keys: vec![AggrKey { field: FieldId(0), ipv4_mask: 24, ipv6_mask: 128, align: 0 }],
            output_fields: vec![OutputField { field: FieldId(7), func: AggrFunc::Sum }],
            sort_key: None,
        }
    }

    #[test]
    fn same_subnet_combines_into_one_group() {
        let mut mem = AggrMemory::new(fields());
        mem.write(&rec("10.0.0.1", 100)).unwrap();
        mem.write(&rec("10.0.0.2", 200)).unwrap();
        mem.write(&rec("10.0.1.1", 50)).unwrap();
        let rows = mem.rows();
        assert_eq!(rows.len(), 2);
        let total: u64 = rows.iter().map(|r| r.values[0]).sum();
        assert_eq!(total, 350);
    }

    #[test]
    fn merge_combines_like_keys_across_workers() {
        let mut a = AggrMemory::new(fields());
        a.write(&rec("10.0.0.1", 100)).unwrap();
        let mut b = AggrMemory::new(fields());
        b.write(&rec("10.0.0.5", 50)).unwrap();
        a.merge(b);
        let rows = a.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].values[0], 150);
    }
}
