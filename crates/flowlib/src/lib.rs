//! Stand-in for the flow-record file reader/writer and its filter-expression
//! compiler — an external collaborator, not
//! part of the core query engine. This crate gives that collaborator a
//! concrete, testable shape: a small fixed field catalogue, a flow record
//! type, a filter AST with a minimal compiler/evaluator, and the path
//! expansion / Bloom-index path derivation helpers.

pub mod field;
pub mod fields;
pub mod fileformat;
pub mod filter;
pub mod path;
pub mod record;

pub use field::{DataType, FieldId, FIELD_CATALOG};
pub use fields::{AggrFunc, AggrKey, FieldsDescriptor, OutputField, SortDir, SortKey};
pub use filter::FilterExpr;
pub use record::{Record, MAX_RECORD_LEN};
