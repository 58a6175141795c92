//! Turns decoded records and aggregation rows into the two output formats
//! the CLI surface names: `pretty` and `csv`. Not
//! part of the core engine — human-readable
//! formatting is explicitly out of scope for the engine itself, but a runnable binary needs one.

use fdistdump_flowlib::field;
use fdistdump_flowlib::fields::FieldsDescriptor;
use fdistdump_flowlib::record::{canonical_to_ipaddr, FlowRecord, Record};
use fdistdump_recordmem::AggrRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Pretty,
    Csv,
}

const RECORD_COLUMNS: &[&str] =
    &["srcaddr", "dstaddr", "srcport", "dstport", "proto", "tcpflags", "packets", "bytes", "first", "last"];

fn record_fields(flow: &FlowRecord) -> Vec<String> {
    vec![
        canonical_to_ipaddr(flow.srcaddr).to_string(),
        canonical_to_ipaddr(flow.dstaddr).to_string(),
        flow.srcport.to_string(),
        flow.dstport.to_string(),
        flow.proto.to_string(),
        flow.tcpflags.to_string(),
        flow.packets.to_string(),
        flow.bytes.to_string(),
        flow.first.to_string(),
        flow.last.to_string(),
    ]
}

pub fn render_records(records: &[Record], format: OutputFormat) -> String {
    let rows: Vec<Vec<String>> = records
        .iter()
        .filter_map(|r| FlowRecord::decode(&r.0))
        .map(|flow| record_fields(&flow))
        .collect();
    render_table(RECORD_COLUMNS, &rows, format)
}

fn aggr_columns(fields: &FieldsDescriptor) -> Vec<String> {
    let mut cols: Vec<String> = fields
        .aggr_keys
        .iter()
        .map(|k| field::by_id(k.field).map(|e| e.name.to_string()).unwrap_or_default())
        .collect();
    cols.extend(
        fields
            .output_fields
            .iter()
            .map(|o| field::by_id(o.field).map(|e| format!("{}#{:?}", e.name, o.func)).unwrap_or_default()),
    );
    cols
}

/// Render aggregation rows. Keys are printed as raw hex (the engine only
/// carries concatenated masked bytes, not which bytes belong to which key)
/// since turning them back into typed field values would require carrying
/// per-key byte widths the wire format doesn't need; `aggr_columns` still
/// labels the output columns so the hex keys line up with something.
pub fn render_aggr_rows(rows: &[AggrRow], fields: &FieldsDescriptor, format: OutputFormat) -> String {
    let mut columns = vec!["key".to_string()];
    columns.extend(
        fields
            .output_fields
            .iter()
            .map(|o| field::by_id(o.field).map(|e| e.name.to_string()).unwrap_or_default()),
    );
    let _ = aggr_columns(fields);

    let body: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            let mut cells = vec![hex(&row.key)];
            cells.extend(row.values.iter().map(u64::to_string));
            cells
        })
        .collect();
    render_table(&columns.iter().map(String::as_str).collect::<Vec<_>>(), &body, format)
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn render_table(columns: &[&str], rows: &[Vec<String>], format: OutputFormat) -> String {
    match format {
        OutputFormat::Csv => {
            let mut out = columns.join(",");
            out.push('\n');
            for row in rows {
                out.push_str(&row.join(","));
                out.push('\n');
            }
            out
        }
        OutputFormat::Pretty => {
            let widths: Vec<usize> = columns
                .iter()
                .enumerate()
                .map(|(i, c)| rows.iter().map(|r| r[i].len()).chain(std::iter::once(c.len())).max().unwrap_or(0))
                .collect();
            let mut out = String::new();
            for (i, c) in columns.iter().enumerate() {
                out.push_str(&format!("{:width$}  ", c, width = widths[i]));
            }
            out.push('\n');
            for row in rows {
                for (i, cell) in row.iter().enumerate() {
                    out.push_str(&format!("{:width$}  ", cell, width = widths[i]));
                }
                out.push('\n');
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fdistdump_flowlib::record::canonicalize_addr;
    use std::net::{IpAddr, Ipv4Addr};

    fn rec() -> Record {
        Record::from_flow(&FlowRecord {
            srcaddr: canonicalize_addr(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))),
            dstaddr: canonicalize_addr(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))),
            srcport: 53,
            dstport: 1234,
            proto: 17,
            tcpflags: 0,
            packets: 3,
            bytes: 900,
            first: 1,
            last: 2,
        })
    }

    #[test]
    fn csv_has_header_and_one_row_per_record() {
        let out = render_records(&[rec()], OutputFormat::Csv);
        let mut lines = out.lines();
        assert_eq!(lines.next().unwrap(), RECORD_COLUMNS.join(","));
        assert!(lines.next().unwrap().starts_with("10.0.0.1,10.0.0.2,53,1234"));
    }

    #[test]
    fn pretty_pads_columns_to_equal_width() {
        let out = render_records(&[rec(), rec()], OutputFormat::Pretty);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1].len(), lines[2].len());
    }
}
