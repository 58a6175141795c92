//! Bloom-filter index predicate tree: compiles a filter's AST
//! into a reduced boolean tree over address-membership tests, and
//! evaluates that tree against a loaded index file. False negatives must
//! be impossible, so any failure to read or parse an index file resolves
//! to "possibly contains" rather than "does not contain".

use std::path::Path;

use fdistdump_error::FdistdumpError;
use fdistdump_flowlib::filter::{CmpOp, FilterExpr, Value};
use fdistdump_flowlib::record::is_v4_mapped;

pub mod handle;

pub use handle::{open_index, FileIndexHandle, IndexHandle};

const MAX_ADDRESS_LEAVES: usize = 20;

/// A node in the pruned predicate tree. `V4`/`V6` leaves both store the
/// canonical 16-byte address; the tag is kept only to distinguish the two
/// address families that feed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BfNode {
    And(Box<BfNode>, Box<BfNode>),
    Or(Box<BfNode>, Box<BfNode>),
    V4([u8; 16]),
    V6([u8; 16]),
}

impl BfNode {
    fn leaf_addr(&self) -> Option<[u8; 16]> {
        match self {
            BfNode::V4(a) | BfNode::V6(a) => Some(*a),
            _ => None,
        }
    }

    pub fn count_leaves(&self) -> usize {
        match self {
            BfNode::And(a, b) | BfNode::Or(a, b) => a.count_leaves() + b.count_leaves(),
            BfNode::V4(_) | BfNode::V6(_) => 1,
        }
    }
}

enum BuildOutcome {
    Node(BfNode),
    /// A non-address comparison (or any node the tree has no use for):
    /// silently dropped rather than invalidating the whole tree.
    Dropped,
    /// A non-equality operator on an address, or a masked address literal:
    /// invalidates the entire tree.
    Invalid,
}

fn leaf_for(bytes: [u8; 16]) -> BfNode {
    if is_v4_mapped(&bytes) {
        BfNode::V4(bytes)
    } else {
        BfNode::V6(bytes)
    }
}

fn build_rec(expr: &FilterExpr) -> BuildOutcome {
    match expr {
        FilterExpr::Cmp { value, op, .. } => match value {
            Value::Num(_) => BuildOutcome::Dropped,
            Value::Addr { bytes, mask } => {
                if *op != CmpOp::Eq || mask.is_some() {
                    BuildOutcome::Invalid
                } else {
                    BuildOutcome::Node(leaf_for(*bytes))
                }
            }
        },
        FilterExpr::And(a, b) => combine(BfNode::And as fn(_, _) -> _, a, b),
        FilterExpr::Or(a, b) => combine(BfNode::Or as fn(_, _) -> _, a, b),
    }
}

fn combine(
    ctor: fn(Box<BfNode>, Box<BfNode>) -> BfNode,
    a: &FilterExpr,
    b: &FilterExpr,
) -> BuildOutcome {
    let ra = build_rec(a);
    if matches!(ra, BuildOutcome::Invalid) {
        return BuildOutcome::Invalid;
    }
    let rb = build_rec(b);
    if matches!(rb, BuildOutcome::Invalid) {
        return BuildOutcome::Invalid;
    }
    match (ra, rb) {
        (BuildOutcome::Dropped, BuildOutcome::Dropped) => BuildOutcome::Dropped,
        (BuildOutcome::Dropped, BuildOutcome::Node(n)) => BuildOutcome::Node(n),
        (BuildOutcome::Node(n), BuildOutcome::Dropped) => BuildOutcome::Node(n),
        (BuildOutcome::Node(na), BuildOutcome::Node(nb)) => {
            // Two identical address leaves collapse to one.
            if na.leaf_addr().is_some() && na == nb {
                BuildOutcome::Node(na)
            } else {
                BuildOutcome::Node(ctor(Box::new(na), Box::new(nb)))
            }
        }
        (BuildOutcome::Invalid, _) | (_, BuildOutcome::Invalid) => unreachable!("checked above"),
    }
}

/// Build the predicate tree from a compiled filter. Returns `None` when
/// indexing should be off for this query: the filter was empty, every
/// node was dropped, an address comparison was disqualifying, or the
/// resulting tree exceeds the 20-leaf cap.
pub fn build(filter: Option<&FilterExpr>) -> Option<BfNode> {
    let filter = filter?;
    let node = match build_rec(filter) {
        BuildOutcome::Node(n) => n,
        BuildOutcome::Dropped | BuildOutcome::Invalid => return None,
    };
    if node.count_leaves() > MAX_ADDRESS_LEAVES {
        return None;
    }
    Some(node)
}

/// Short-circuit recursive AND/OR over leaf membership tests.
pub fn evaluate(tree: &BfNode, index: &dyn IndexHandle) -> bool {
    match tree {
        BfNode::And(a, b) => evaluate(a, index) && evaluate(b, index),
        BfNode::Or(a, b) => evaluate(a, index) || evaluate(b, index),
        BfNode::V4(addr) | BfNode::V6(addr) => match index.contains_addr(*addr) {
            Ok(present) => present,
            Err(err) => {
                tracing::warn!(error = %err, "bloom index query failed, processing file conservatively");
                true
            }
        },
    }
}

/// Open the index file at `index_path` and evaluate `tree` against it.
/// Any failure to open or parse the index resolves to `true` (process the
/// file) per the no-false-negatives requirement.
pub fn evaluate_path(tree: &BfNode, index_path: &Path) -> bool {
    match open_index(index_path) {
        Ok(handle) => evaluate(tree, handle.as_ref()),
        Err(err) => {
            tracing::warn!(path = %index_path.display(), error = %err, "bloom index unreadable, processing file conservatively");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fdistdump_flowlib::filter::compile;
    use handle::InMemoryIndexHandle;

    #[test]
    fn masked_address_discards_entire_tree() {
        let filter = compile("dst ip == 10.0.0.1/24").unwrap();
        assert!(build(filter.as_ref()).is_none());
    }

    #[test]
    fn non_equality_address_op_discards_entire_tree() {
        let filter = compile("dst ip != 10.0.0.1").unwrap();
        assert!(build(filter.as_ref()).is_none());
    }

    #[test]
    fn numeric_comparison_is_silently_dropped() {
        let filter = compile("dst ip == 10.0.0.1 and bytes > 100").unwrap();
        let tree = build(filter.as_ref()).unwrap();
        assert_eq!(tree.count_leaves(), 1);
    }

    #[test]
    fn identical_leaves_collapse_to_one() {
        let filter = compile("dst ip == 10.0.0.1 or dst ip == 10.0.0.1").unwrap();
        let tree = build(filter.as_ref()).unwrap();
        assert_eq!(tree.count_leaves(), 1);
    }

    #[test]
    fn evaluate_short_circuits_and_checks_membership() {
        let filter = compile("dst ip == 10.0.0.1").unwrap();
        let tree = build(filter.as_ref()).unwrap();
        let present = InMemoryIndexHandle::containing(&["10.0.0.1"]);
        let absent = InMemoryIndexHandle::containing(&["10.0.0.2"]);
        assert!(evaluate(&tree, &present));
        assert!(!evaluate(&tree, &absent));
    }
}
