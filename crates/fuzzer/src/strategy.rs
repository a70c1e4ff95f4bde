//! Fill strategies: how a lane's data region is seeded before a run.

use serde::{Deserialize, Serialize};

/// Built-in lane seeding strategies. A strategy sees one lane's data region
/// at a time, so varied inputs per lane fall out of the lane index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FillStrategy {
    /// Every byte 0x00.
    Min,
    /// Every byte 0xFF.
    Max,
    /// Every byte set to the lane index, making lanes distinguishable to
    /// the guest and provoking divergence.
    LaneIndex,
}

impl FillStrategy {
    /// Seed one lane's data region.
    pub fn apply(self, lane: usize, region: &mut [u8]) {
        match self {
            FillStrategy::Min => region.fill(u8::MIN),
            FillStrategy::Max => region.fill(u8::MAX),
            FillStrategy::LaneIndex => region.fill(lane as u8),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_max() {
        let mut region = [0xAAu8; 16];
        FillStrategy::Min.apply(0, &mut region);
        assert_eq!(region, [0x00; 16]);
        FillStrategy::Max.apply(0, &mut region);
        assert_eq!(region, [0xFF; 16]);
    }

    #[test]
    fn test_lane_index_distinguishes_lanes() {
        let mut a = [0u8; 4];
        let mut b = [0u8; 4];
        FillStrategy::LaneIndex.apply(1, &mut a);
        FillStrategy::LaneIndex.apply(2, &mut b);
        assert_ne!(a, b);
    }
}
