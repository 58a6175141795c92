//! Summary counters: `processed` tracks records that
//! passed the filter, `metadata` tracks file-header totals broken down by
//! protocol. Both reduce with SUM to the coordinator at query end.

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessedSummary {
    pub flows: u64,
    pub packets: u64,
    pub bytes: u64,
}

impl ProcessedSummary {
    pub fn add_record(&mut self, packets: u64, bytes: u64) {
        self.flows += 1;
        self.packets += packets;
        self.bytes += bytes;
    }

    pub fn merge(&mut self, other: &ProcessedSummary) {
        self.flows += other.flows;
        self.packets += other.packets;
        self.bytes += other.bytes;
    }

    fn to_vec(self) -> Vec<u64> {
        vec![self.flows, self.packets, self.bytes]
    }

    fn from_slice(v: &[u64]) -> Self {
        ProcessedSummary { flows: v[0], packets: v[1], bytes: v[2] }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProtoCounters {
    pub flows: u64,
    pub packets: u64,
    pub bytes: u64,
}

impl ProtoCounters {
    fn to_vec(self) -> Vec<u64> {
        vec![self.flows, self.packets, self.bytes]
    }

    fn from_slice(v: &[u64]) -> Self {
        ProtoCounters { flows: v[0], packets: v[1], bytes: v[2] }
    }

    fn merge(&mut self, other: &ProtoCounters) {
        self.flows += other.flows;
        self.packets += other.packets;
        self.bytes += other.bytes;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetadataSummary {
    pub total: ProtoCounters,
    pub tcp: ProtoCounters,
    pub udp: ProtoCounters,
    pub icmp: ProtoCounters,
    pub other: ProtoCounters,
}

impl MetadataSummary {
    pub fn from_header(counts: &[u64; 15]) -> Self {
        Self::from_slice(counts)
    }

    pub fn merge(&mut self, other: &MetadataSummary) {
        self.total.merge(&other.total);
        self.tcp.merge(&other.tcp);
        self.udp.merge(&other.udp);
        self.icmp.merge(&other.icmp);
        self.other.merge(&other.other);
    }

    /// `total = tcp + udp + icmp + other`; a violation is logged but is
    /// non-fatal.
    pub fn check_invariant(&self) -> bool {
        let sum = ProtoCounters {
            flows: self.tcp.flows + self.udp.flows + self.icmp.flows + self.other.flows,
            packets: self.tcp.packets + self.udp.packets + self.icmp.packets + self.other.packets,
            bytes: self.tcp.bytes + self.udp.bytes + self.icmp.bytes + self.other.bytes,
        };
        sum == self.total
    }

    fn to_vec(self) -> Vec<u64> {
        [self.total, self.tcp, self.udp, self.icmp, self.other]
            .into_iter()
            .flat_map(ProtoCounters::to_vec)
            .collect()
    }

    fn from_slice(v: &[u64]) -> Self {
        MetadataSummary {
            total: ProtoCounters::from_slice(&v[0..3]),
            tcp: ProtoCounters::from_slice(&v[3..6]),
            udp: ProtoCounters::from_slice(&v[6..9]),
            icmp: ProtoCounters::from_slice(&v[9..12]),
            other: ProtoCounters::from_slice(&v[12..15]),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub processed: ProcessedSummary,
    pub metadata: MetadataSummary,
}

impl Summary {
    pub fn merge(&mut self, other: &Summary) {
        self.processed.merge(&other.processed);
        self.metadata.merge(&other.metadata);
    }

    /// Flatten into the fixed-struct `uint64[3]` + `uint64[15]` SUM reduce
    /// payload.
    pub fn to_reduce_vec(self) -> Vec<u64> {
        let mut out = self.processed.to_vec();
        out.extend(self.metadata.to_vec());
        out
    }

    pub fn from_reduce_vec(v: &[u64]) -> Self {
        Summary {
            processed: ProcessedSummary::from_slice(&v[0..3]),
            metadata: MetadataSummary::from_slice(&v[3..18]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_reduce_vec() {
        let mut s = Summary::default();
        s.processed.add_record(2, 200);
        s.metadata.tcp = ProtoCounters { flows: 1, packets: 2, bytes: 200 };
        s.metadata.total = s.metadata.tcp;
        assert!(s.metadata.check_invariant());
        let v = s.to_reduce_vec();
        assert_eq!(v.len(), 18);
        assert_eq!(Summary::from_reduce_vec(&v), s);
    }
}
