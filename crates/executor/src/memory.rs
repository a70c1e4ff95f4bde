//! Byte-addressable guest memory for one lane.
//!
//! The image is laid out as a data region of `data_size` bytes followed by
//! the program image, so effective addresses below `data_size` hit data and
//! addresses in `[data_size, data_size + program_size)` read the program.
//!
//! All multi-byte accesses go through explicit little-endian conversions
//! over the byte slice. Unaligned loads and stores are permitted and never
//! fault; only out-of-image accesses are reported.

use crate::error::ExecutorError;
use serde::{Deserialize, Serialize};

/// Default data region size per lane, in bytes.
pub const DEFAULT_MEMORY_SIZE: usize = 256;

/// Memory image for one execution lane.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Memory {
    /// Flat byte image: data region followed by the program.
    bytes: Vec<u8>,
    /// Size of the data region; the program starts here.
    data_size: usize,
}

impl Memory {
    /// Build an image with a zeroed data region and the program behind it.
    pub fn with_image(data_size: usize, program: &[u8]) -> Self {
        let mut bytes = vec![0u8; data_size + program.len()];
        bytes[data_size..].copy_from_slice(program);
        Self { bytes, data_size }
    }

    /// Total image size (data region plus program).
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Size of the data region.
    pub fn data_size(&self) -> usize {
        self.data_size
    }

    /// Size of the program image.
    pub fn program_size(&self) -> usize {
        self.bytes.len() - self.data_size
    }

    /// The data region.
    pub fn data(&self) -> &[u8] {
        &self.bytes[..self.data_size]
    }

    /// Mutable view of the data region, for fill strategies and tests.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.bytes[..self.data_size]
    }

    /// Fetch the instruction word at `pc` (an offset into the program image).
    pub fn fetch(&self, pc: u32) -> Result<u32, ExecutorError> {
        let idx = self
            .data_size
            .checked_add(pc as usize)
            .ok_or(ExecutorError::ProgramEscape { pc })?;
        if idx + 4 > self.bytes.len() {
            return Err(ExecutorError::ProgramEscape { pc });
        }
        Ok(u32::from_le_bytes([
            self.bytes[idx],
            self.bytes[idx + 1],
            self.bytes[idx + 2],
            self.bytes[idx + 3],
        ]))
    }

    /// Read a byte from memory.
    #[inline]
    pub fn read_u8(&self, addr: u32) -> Result<u8, ExecutorError> {
        let idx = addr as usize;
        if idx >= self.bytes.len() {
            return Err(ExecutorError::OutOfBounds { addr });
        }
        Ok(self.bytes[idx])
    }

    /// Read a halfword (little-endian). Unaligned addresses are fine.
    #[inline]
    pub fn read_u16(&self, addr: u32) -> Result<u16, ExecutorError> {
        let idx = addr as usize;
        if idx + 2 > self.bytes.len() {
            return Err(ExecutorError::OutOfBounds { addr });
        }
        Ok(u16::from_le_bytes([self.bytes[idx], self.bytes[idx + 1]]))
    }

    /// Read a word (little-endian). Unaligned addresses are fine.
    #[inline]
    pub fn read_u32(&self, addr: u32) -> Result<u32, ExecutorError> {
        let idx = addr as usize;
        if idx + 4 > self.bytes.len() {
            return Err(ExecutorError::OutOfBounds { addr });
        }
        Ok(u32::from_le_bytes([
            self.bytes[idx],
            self.bytes[idx + 1],
            self.bytes[idx + 2],
            self.bytes[idx + 3],
        ]))
    }

    /// Write a byte to memory.
    #[inline]
    pub fn write_u8(&mut self, addr: u32, val: u8) -> Result<(), ExecutorError> {
        let idx = addr as usize;
        if idx >= self.bytes.len() {
            return Err(ExecutorError::OutOfBounds { addr });
        }
        self.bytes[idx] = val;
        Ok(())
    }

    /// Write a halfword (little-endian). Unaligned addresses are fine.
    #[inline]
    pub fn write_u16(&mut self, addr: u32, val: u16) -> Result<(), ExecutorError> {
        let idx = addr as usize;
        if idx + 2 > self.bytes.len() {
            return Err(ExecutorError::OutOfBounds { addr });
        }
        self.bytes[idx..idx + 2].copy_from_slice(&val.to_le_bytes());
        Ok(())
    }

    /// Write a word (little-endian). Unaligned addresses are fine.
    #[inline]
    pub fn write_u32(&mut self, addr: u32, val: u32) -> Result<(), ExecutorError> {
        let idx = addr as usize;
        if idx + 4 > self.bytes.len() {
            return Err(ExecutorError::OutOfBounds { addr });
        }
        self.bytes[idx..idx + 4].copy_from_slice(&val.to_le_bytes());
        Ok(())
    }
}
