//! Merge planning: which parts to combine, and the worker that combines them

mod select;
mod worker;

pub use select::select_parts_to_merge;
pub use worker::{ActiveMerges, MergeExecutor, MergeOutcome};

use crate::part::{PartEnvelope, PartInfo, Partition};
use std::sync::Arc;

/// Options steering one selection pass
#[derive(Copy, Clone, Debug, Default)]
pub struct SelectOptions {
    /// Sweep up imbalanced runs in partitions of months past
    pub merge_old_partitions: bool,

    /// Ignore size caps and balance requirements; any run of two or more
    /// mergeable parts qualifies
    pub aggressive: bool,

    /// Only consider small parts (set while another worker runs a large merge)
    pub only_small: bool,
}

/// Decides whether two adjacent parts may participate in the same merge
pub trait MergePredicate {
    /// `true` if `left` and `right` may merge together
    fn can_merge(&self, left: &PartInfo, right: &PartInfo) -> bool;
}

impl<F: Fn(&PartInfo, &PartInfo) -> bool> MergePredicate for F {
    fn can_merge(&self, left: &PartInfo, right: &PartInfo) -> bool {
        self(left, right)
    }
}

/// A contiguous run of parts chosen to merge together
#[derive(Clone, Debug)]
pub struct MergeCandidate {
    /// Participating parts, ascending by block id, all in one partition
    pub parts: Vec<Arc<PartInfo>>,
}

impl MergeCandidate {
    /// Summed size of the parts in bytes
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.parts.iter().map(|p| p.size_in_bytes).sum()
    }

    /// Summed size of the parts in rows (marks × granularity)
    #[must_use]
    pub fn rows(&self, index_granularity: u64) -> u64 {
        self.parts.iter().map(|p| p.rows(index_granularity)).sum()
    }

    /// Names of the participating parts
    #[must_use]
    pub fn names(&self) -> Vec<Arc<str>> {
        self.parts.iter().map(|p| p.name.clone()).collect()
    }

    /// Partition the candidate lives in
    #[must_use]
    pub fn partition(&self) -> Partition {
        self.parts
            .first()
            .expect("candidate should not be empty")
            .partition()
    }

    /// Envelope of the part this merge will produce: the united date and
    /// block range, one level above the deepest input
    #[must_use]
    pub fn envelope(&self) -> PartEnvelope {
        let first = self.parts.first().expect("candidate should not be empty");
        let last = self.parts.last().expect("candidate should not be empty");

        let mut min_date = first.envelope.min_date;
        let mut max_date = first.envelope.max_date;
        let mut level = 0;

        for part in &self.parts {
            min_date = min_date.min(part.envelope.min_date);
            max_date = max_date.max(part.envelope.max_date);
            level = level.max(part.level());
        }

        PartEnvelope {
            min_date,
            max_date,
            min_block_id: first.min_block_id(),
            max_block_id: last.max_block_id(),
            level: level + 1,
        }
    }

    /// Re-checks the run invariants: at least two parts, one partition,
    /// ascending and non-overlapping block ranges.
    pub(crate) fn validate(&self) -> crate::Result<()> {
        if self.parts.len() < 2 {
            return Err(crate::Error::InvalidCandidate("fewer than two parts"));
        }

        let partition = self.partition();

        for (prev, next) in self.parts.iter().zip(self.parts.iter().skip(1)) {
            if next.partition() != partition || next.spans_partitions() || prev.spans_partitions() {
                return Err(crate::Error::InvalidCandidate(
                    "parts are not in a single partition",
                ));
            }

            if next.min_block_id() < prev.max_block_id() {
                return Err(crate::Error::InvalidCandidate("parts overlap"));
            }
        }

        Ok(())
    }
}
