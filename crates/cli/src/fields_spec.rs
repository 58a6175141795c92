//! Parses the CLI's `--fields` and `--order` surface into a
//! [`FieldsDescriptor`]: `name[/netmask4[/netmask6]]` entries become
//! aggregation keys, `name#func` entries become output fields, and
//! `--order` supplies the sort key.

use fdistdump_flowlib::field;
use fdistdump_flowlib::fields::{AggrFunc, AggrKey, FieldsDescriptor, OutputField, SortDir, SortKey};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FieldsSpecError {
    #[error("unknown field {0:?}")]
    UnknownField(String),
    #[error("unknown aggregation function {0:?} (expected min, max, sum, or or)")]
    UnknownFunc(String),
    #[error("bad netmask in field entry {0:?}")]
    BadNetmask(String),
    #[error("unknown sort direction {0:?} (expected asc or desc)")]
    UnknownDirection(String),
}

fn parse_func(token: &str) -> Result<AggrFunc, FieldsSpecError> {
    match token.to_ascii_lowercase().as_str() {
        "min" => Ok(AggrFunc::Min),
        "max" => Ok(AggrFunc::Max),
        "sum" => Ok(AggrFunc::Sum),
        "or" => Ok(AggrFunc::Or),
        _ => Err(FieldsSpecError::UnknownFunc(token.to_string())),
    }
}

/// Parse one comma-separated `--fields` entry. `name#func` is an output
/// field; `name[/v4mask[/v6mask]]` is an aggregation key.
fn parse_entry(entry: &str) -> Result<(AggrKey, Option<AggrFunc>, bool), FieldsSpecError> {
    let (name_part, func) = match entry.split_once('#') {
        Some((name, func)) => (name, Some(parse_func(func)?)),
        None => (entry, None),
    };

    let mut parts = name_part.split('/');
    let name = parts.next().unwrap_or_default();
    let entry_meta = field::by_name(name).ok_or_else(|| FieldsSpecError::UnknownField(name.to_string()))?;

    let ipv4_mask = match parts.next() {
        Some(m) => m.parse().map_err(|_| FieldsSpecError::BadNetmask(entry.to_string()))?,
        None => 32,
    };
    let ipv6_mask = match parts.next() {
        Some(m) => m.parse().map_err(|_| FieldsSpecError::BadNetmask(entry.to_string()))?,
        None => 128,
    };

    let key = AggrKey { field: entry_meta.id, ipv4_mask, ipv6_mask, align: 0 };
    Ok((key, func, func.is_some()))
}

/// Parse the full `--fields <spec>` string into aggregation keys and output
/// fields, and `--order <field>[,{asc,desc}]` into a sort key. `fields_spec`
/// may be empty (LIST/SORT-of-raw-records queries need neither).
pub fn parse_fields(fields_spec: &str, order: Option<&str>) -> Result<FieldsDescriptor, FieldsSpecError> {
    let mut aggr_keys = Vec::new();
    let mut output_fields = Vec::new();

    for entry in fields_spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (key, func, is_output) = parse_entry(entry)?;
        if is_output {
            output_fields.push(OutputField { field: key.field, func: func.expect("checked above") });
        } else {
            aggr_keys.push(key);
        }
    }

    let sort_key = match order {
        None => None,
        Some(spec) => {
            let mut parts = spec.split(',');
            let name = parts.next().unwrap_or_default().trim();
            let entry = field::by_name(name).ok_or_else(|| FieldsSpecError::UnknownField(name.to_string()))?;
            let direction = match parts.next().map(str::trim).map(str::to_ascii_lowercase).as_deref() {
                None | Some("desc") => SortDir::Desc,
                Some("asc") => SortDir::Asc,
                Some(other) => return Err(FieldsSpecError::UnknownDirection(other.to_string())),
            };
            let func = output_fields.iter().find(|o| o.field == entry.id).map(|o| o.func);
            Some(SortKey { field: entry.id, direction, func })
        }
    };

    Ok(FieldsDescriptor { aggr_keys, output_fields, sort_key })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggr_key_with_v4_mask_and_output_field_with_func() {
        let fields = parse_fields("srcaddr/24,bytes#sum", None).unwrap();
        assert_eq!(fields.aggr_keys.len(), 1);
        assert_eq!(fields.aggr_keys[0].ipv4_mask, 24);
        assert_eq!(fields.output_fields.len(), 1);
        assert_eq!(fields.output_fields[0].func, AggrFunc::Sum);
    }

    #[test]
    fn order_picks_up_matching_output_field_func() {
        let fields = parse_fields("bytes#sum", Some("bytes,desc")).unwrap();
        let sort_key = fields.sort_key.unwrap();
        assert_eq!(sort_key.direction, SortDir::Desc);
        assert_eq!(sort_key.func, Some(AggrFunc::Sum));
    }

    #[test]
    fn order_without_direction_defaults_to_desc() {
        let fields = parse_fields("", Some("first")).unwrap();
        assert_eq!(fields.sort_key.unwrap().direction, SortDir::Desc);
    }

    #[test]
    fn unknown_field_is_rejected() {
        assert_eq!(parse_fields("nope/24", None), Err(FieldsSpecError::UnknownField("nope".to_string())));
    }
}
