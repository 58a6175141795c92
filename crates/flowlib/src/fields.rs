use serde::{Deserialize, Serialize};

use crate::field::{self, FieldId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggrFunc {
    Min,
    Max,
    Sum,
    Or,
}

impl AggrFunc {
    /// Open question (a): `threshold = tau1 / s` is only sound for SUM with
    /// nonnegative values. OR/MIN/MAX as the TPUT sort key are rejected at
    /// validation time rather than silently mis-pruned.
    pub fn legal_as_fast_topn_sort(self) -> bool {
        matches!(self, AggrFunc::Sum)
    }

    pub fn combine_u64(self, a: u64, b: u64) -> u64 {
        match self {
            AggrFunc::Min => a.min(b),
            AggrFunc::Max => a.max(b),
            AggrFunc::Sum => a.saturating_add(b),
            AggrFunc::Or => a | b,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDir {
    Asc,
    Desc,
}

/// One aggregation key field. `ipv4_mask`/`ipv6_mask` are netmask widths
/// applied before hashing when the field is an address; `align` buckets
/// 64-bit values (e.g. rounding `first`/`last` down to a time bucket).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggrKey {
    pub field: FieldId,
    pub ipv4_mask: u8,
    pub ipv6_mask: u8,
    pub align: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputField {
    pub field: FieldId,
    pub func: AggrFunc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: FieldId,
    pub direction: SortDir,
    /// Present when sorting an aggregated value; absent for LIST/SORT of
    /// raw records.
    pub func: Option<AggrFunc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldsDescriptor {
    pub aggr_keys: Vec<AggrKey>,
    pub output_fields: Vec<OutputField>,
    pub sort_key: Option<SortKey>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FieldsError {
    #[error("aggrKeys may contain at most 10 fields, got {0}")]
    TooManyAggrKeys(usize),
    #[error("outputFields may contain at most 30 fields, got {0}")]
    TooManyOutputFields(usize),
    #[error("field id {0:?} is unknown")]
    UnknownField(FieldId),
    #[error("field id {0:?} appears in both aggrKeys and outputFields")]
    AggrOutputOverlap(FieldId),
    #[error("fast top-N requires a sort key whose aggregation function is SUM, got {0:?}")]
    IllegalFastTopNSortFunc(AggrFunc),
    #[error("AGGR sort key must carry an aggregation function")]
    MissingSortFunc,
}

impl FieldsDescriptor {
    /// Validate the disjointness invariants between key groups, plus the
    /// fast-top-N legality rule from open question (a).
    pub fn validate(&self, use_fast_topn: bool) -> Result<(), FieldsError> {
        if self.aggr_keys.len() > 10 {
            return Err(FieldsError::TooManyAggrKeys(self.aggr_keys.len()));
        }
        if self.output_fields.len() > 30 {
            return Err(FieldsError::TooManyOutputFields(self.output_fields.len()));
        }

        for k in &self.aggr_keys {
            if field::by_id(k.field).is_none() {
                return Err(FieldsError::UnknownField(k.field));
            }
        }
        for o in &self.output_fields {
            if field::by_id(o.field).is_none() {
                return Err(FieldsError::UnknownField(o.field));
            }
            if self.aggr_keys.iter().any(|k| k.field == o.field) {
                return Err(FieldsError::AggrOutputOverlap(o.field));
            }
        }

        if let Some(sk) = &self.sort_key {
            if field::by_id(sk.field).is_none() {
                return Err(FieldsError::UnknownField(sk.field));
            }
            // The sort key is free to name the same field as an output
            // column (e.g. sorting by the `bytes#sum` column itself):
            // AggrMemory tracks the sort value independently of the output
            // values vector, so there's no aliasing hazard here.
            if use_fast_topn {
                let func = sk.func.ok_or(FieldsError::MissingSortFunc)?;
                if !func.legal_as_fast_topn_sort() {
                    return Err(FieldsError::IllegalFastTopNSortFunc(func));
                }
            }
        }
        Ok(())
    }
}
