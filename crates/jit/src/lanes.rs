//! Per-lane guest memory and the spilled vector state.
//!
//! Each lane owns a full image (data region plus a copy of the program), so
//! gathers and scatters with lane base offsets stay inside the lane and no
//! write in lane `i` can become visible in lane `j`.

use crate::error::JitError;

/// Lanes per vector: 512-bit vectors of 32-bit words.
pub const LANE_COUNT: usize = 512 / 32;

const _: () = assert!(LANE_COUNT == 16);

/// Flat `LANE_COUNT * lane_size` byte region backing the lanes.
#[derive(Debug)]
pub struct LaneMemory {
    bytes: Vec<u8>,
    lane_size: usize,
    data_size: usize,
}

impl LaneMemory {
    /// Allocate the lanes; every lane starts as a zeroed data region with
    /// the program image copied behind it.
    pub fn new(data_size: usize, program: &[u8]) -> Self {
        let lane_size = data_size + program.len();
        let mut bytes = vec![0u8; LANE_COUNT * lane_size];
        for lane in 0..LANE_COUNT {
            let base = lane * lane_size + data_size;
            bytes[base..base + program.len()].copy_from_slice(program);
        }
        Self {
            bytes,
            lane_size,
            data_size,
        }
    }

    pub fn lane_count(&self) -> usize {
        LANE_COUNT
    }

    /// Bytes per lane (data region plus program image).
    pub fn lane_size(&self) -> usize {
        self.lane_size
    }

    /// Size of each lane's data region.
    pub fn data_size(&self) -> usize {
        self.data_size
    }

    /// One lane's full image.
    pub fn lane(&self, lane: usize) -> &[u8] {
        let base = lane * self.lane_size;
        &self.bytes[base..base + self.lane_size]
    }

    /// Mutable view of one lane's data region, for fill strategies.
    pub fn lane_data_mut(&mut self, lane: usize) -> &mut [u8] {
        let base = lane * self.lane_size;
        &mut self.bytes[base..base + self.data_size]
    }

    /// Byte distance from lane 0's base to each lane's base. These populate
    /// the index vector for gathers and scatters.
    pub fn base_offsets(&self) -> Result<[u32; LANE_COUNT], JitError> {
        let mut offsets = [0u32; LANE_COUNT];
        for (lane, slot) in offsets.iter_mut().enumerate() {
            let distance = lane * self.lane_size;
            *slot = u32::try_from(distance).map_err(|_| JitError::LaneOffsetOverflow {
                lane_size: self.lane_size,
            })?;
        }
        Ok(offsets)
    }

    /// Host address of lane 0's base, embedded into emitted gathers.
    pub fn base_ptr(&self) -> u64 {
        self.bytes.as_ptr() as u64
    }
}

/// The JIT-owned spilled state: the per-lane PC vector, the divergence
/// counters, and scratch spill slots for the sub-word store sequence. Guest
/// registers live in host vector registers and never spill here.
#[derive(Debug)]
pub struct VectorState {
    /// Per-lane program counter.
    pub pc_lanes: [u32; LANE_COUNT],
    /// Branch instructions lowered (bumped at emission time).
    pub jumps_seen: u64,
    /// Branches taken, updated by the emitted code via mask popcount.
    pub jumps_taken: u64,
    /// Spill slots for vector registers borrowed during sub-word stores.
    pub spill: [[u8; 64]; 2],
}

impl VectorState {
    pub fn new() -> Self {
        Self {
            pc_lanes: [0; LANE_COUNT],
            jumps_seen: 0,
            jumps_taken: 0,
            spill: [[0; 64]; 2],
        }
    }

    pub fn pc_addr(&self) -> u64 {
        self.pc_lanes.as_ptr() as u64
    }

    pub fn jumps_taken_addr(&self) -> u64 {
        &self.jumps_taken as *const u64 as u64
    }

    pub fn spill_addr(&self, slot: usize) -> u64 {
        self.spill[slot].as_ptr() as u64
    }
}

impl Default for VectorState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lane_images_are_independent() {
        let mut lanes = LaneMemory::new(64, &[0xAA; 8]);
        lanes.lane_data_mut(3)[0] = 0x55;
        assert_eq!(lanes.lane(3)[0], 0x55);
        for lane in 0..LANE_COUNT {
            if lane != 3 {
                assert_eq!(lanes.lane(lane)[0], 0, "lane {lane} must be untouched");
            }
        }
    }

    #[test]
    fn test_program_copied_into_every_lane() {
        let lanes = LaneMemory::new(32, &[1, 2, 3, 4]);
        for lane in 0..LANE_COUNT {
            assert_eq!(&lanes.lane(lane)[32..36], &[1, 2, 3, 4]);
        }
    }

    #[test]
    fn test_base_offsets_stride_by_lane_size() {
        let lanes = LaneMemory::new(100, &[0; 28]);
        let offsets = lanes.base_offsets().unwrap();
        assert_eq!(offsets[0], 0);
        assert_eq!(offsets[1], 128);
        assert_eq!(offsets[15], 15 * 128);
    }
}
