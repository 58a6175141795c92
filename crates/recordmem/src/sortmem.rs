use fdistdump_error::FdistdumpError;
use fdistdump_flowlib::fields::SortDir;
use fdistdump_flowlib::record::Record;

/// One record plus the raw numeric sort-key value extracted from it, kept
/// together so sorting never has to re-decode the record.
#[derive(Debug, Clone)]
pub struct SortRow {
    pub record: Record,
    pub sort_value: u64,
}

/// Sort-only record memory: accumulates rows, then sorts and truncates to
/// `limit` on demand (SORT mode). Deferred local sort:
/// nothing is ordered until [`SortMemory::sorted`] is called.
#[derive(Debug)]
pub struct SortMemory {
    direction: SortDir,
    rows: Vec<SortRow>,
}

impl SortMemory {
    pub fn new(direction: SortDir) -> Self {
        SortMemory { direction, rows: Vec::new() }
    }

    pub fn write(&mut self, record: Record, sort_value: u64) -> Result<(), FdistdumpError> {
        self.rows.push(SortRow { record, sort_value });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn merge(&mut self, other: SortMemory) {
        self.rows.extend(other.rows);
    }

    /// Sort by the configured direction and keep at most `limit` rows
    /// (`limit == 0` means unlimited).
    pub fn sorted(mut self, limit: usize) -> Vec<SortRow> {
        match self.direction {
            SortDir::Desc => self.rows.sort_by(|a, b| b.sort_value.cmp(&a.sort_value)),
            SortDir::Asc => self.rows.sort_by(|a, b| a.sort_value.cmp(&b.sort_value)),
        }
        if limit > 0 && self.rows.len() > limit {
            self.rows.truncate(limit);
        }
        self.rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fdistdump_flowlib::record::Record;

    #[test]
    fn sorts_descending_and_truncates() {
        let mut mem = SortMemory::new(SortDir::Desc);
        for (i, v) in [250u64, 1000, 500].into_iter().enumerate() {
            mem.write(Record(vec![i as u8]), v).unwrap();
        }
        let out = mem.sorted(3);
        let values: Vec<u64> = out.iter().map(|r| r.sort_value).collect();
        assert_eq!(values, vec![1000, 500, 250]);
    }

    #[test]
    fn limit_zero_means_unlimited() {
        let mut mem = SortMemory::new(SortDir::Asc);
        for v in [3u64, 1, 2] {
            mem.write(Record(vec![]), v).unwrap();
        }
        let out = mem.sorted(0);
        assert_eq!(out.len(), 3);
    }
}
