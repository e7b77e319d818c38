use std::fmt;

use serde::{Deserialize, Serialize};

/// Index of a milestone issued by the coordinator.
///
/// Milestones confirm the part of the Tangle they reference; metadata records
/// store the index of the milestone that confirmed their message.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct MilestoneIndex(pub u32);

impl MilestoneIndex {
    /// Milestone index zero, meaning "not confirmed yet".
    pub const fn zero() -> Self {
        Self(0)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// The next milestone index.
    pub fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for MilestoneIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for MilestoneIndex {
    fn from(index: u32) -> Self {
        Self(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_default() {
        assert_eq!(MilestoneIndex::default(), MilestoneIndex::zero());
        assert!(MilestoneIndex::zero().is_zero());
    }

    #[test]
    fn next_saturates() {
        assert_eq!(MilestoneIndex(4).next(), MilestoneIndex(5));
        assert_eq!(MilestoneIndex(u32::MAX).next(), MilestoneIndex(u32::MAX));
    }
}
