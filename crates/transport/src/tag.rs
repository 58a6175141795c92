/// Logical channel identifiers for point-to-point traffic between the
/// coordinator and worker ranks.
///
/// Every tag owns its own queue in the concrete transport, so progress
/// updates can never queue behind (or interleave with) record data, and
/// the three TPUT rounds can never be confused with one another even
/// though they share the same pair of ranks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    /// LIST mode record stream, worker -> coordinator.
    List,
    /// SORT mode record stream, worker -> coordinator.
    Sort,
    /// AGGR mode (non fast-top-N) partial aggregation stream, worker -> coordinator.
    Aggr,
    /// TPUT phase 1: local top-N candidates, worker -> coordinator.
    Tput1,
    /// TPUT phase 2: pruned local rows for surviving keys, worker -> coordinator.
    Tput2,
    /// TPUT phase 3: exact values for broadcast candidate keys, worker -> coordinator.
    Tput3,
    /// Per-rank summary counters, worker -> coordinator (in addition to the Reduce).
    Stats,
    /// Progress/heartbeat channel, worker -> coordinator.
    Progress,
}

impl Tag {
    pub const ALL: [Tag; 8] = [
        Tag::List,
        Tag::Sort,
        Tag::Aggr,
        Tag::Tput1,
        Tag::Tput2,
        Tag::Tput3,
        Tag::Stats,
        Tag::Progress,
    ];
}
