//! Thin wrapper over the external record library's in-memory store:
//! a hash table for aggregation, a deferred-sort list for SORT.
//! The engine only ever talks to this crate through `write`,
//! `lookup_raw_by_key`, `merge`, and a raw-row iterator — it never reaches
//! into the table itself.

pub mod access;
pub mod aggr;
pub mod sortmem;

pub use aggr::{AggrMemory, AggrRow};
pub use sortmem::{SortMemory, SortRow};
