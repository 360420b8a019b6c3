//! Reassembly of chunked property transfers.
//!
//! Large property dictionaries are streamed by the coprocessor as a start (total length),
//! any number of chunks (offset, length, data) and an end (key).  Only one transfer can be
//! in progress at once.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use alloc::vec;
use alloc::vec::Vec;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{Error, Result};

/// Largest transfer accepted.  Mode lists for large external displays run to a few
/// hundred KiB.
pub const MAX_TRANSFER_SIZE: usize = 0x10_0000;

/// What a completed transfer describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKey {
    /// Supported display modes
    TimingElements,
    /// Physical panel dimensions
    DisplayAttributes,
}

impl PropertyKey {
    pub fn from_name(name: &[u8]) -> Option<Self> {
        match name {
            b"TimingElements" => Some(PropertyKey::TimingElements),
            b"DisplayAttributes" => Some(PropertyKey::DisplayAttributes),
            _ => None,
        }
    }
}

/// One outstanding transfer at most
#[derive(Debug, Default)]
pub struct ChunkAssembler {
    data: Option<Vec<u8>>,
}

impl ChunkAssembler {
    pub const fn new() -> Self {
        Self { data: None }
    }

    pub fn is_active(&self) -> bool {
        self.data.is_some()
    }

    /// Begin a transfer of `length` bytes.  Rejected while another is in progress.
    pub fn start(&mut self, length: u32) -> Result<()> {
        if self.data.is_some() {
            warn!("Ignoring spurious transfer start");
            return Err(Error::ChunkRejected);
        }
        if length as usize > MAX_TRANSFER_SIZE {
            warn!("Refusing {length} byte transfer");
            return Err(Error::NoMemory);
        }
        trace!("Transfer of {length} bytes started");
        self.data = Some(vec![0u8; length as usize]);
        Ok(())
    }

    /// Store `bytes` at `offset`.  Out-of-bounds and unexpected chunks are rejected
    /// and leave the accumulator unchanged.
    pub fn chunk(&mut self, offset: u32, bytes: &[u8]) -> Result<()> {
        let Some(data) = self.data.as_mut() else {
            warn!("Ignoring spurious chunk");
            return Err(Error::ChunkRejected);
        };
        let start = offset as usize;
        match start.checked_add(bytes.len()) {
            Some(end) if end <= data.len() => {
                data[start..end].copy_from_slice(bytes);
                Ok(())
            }
            _ => {
                warn!(
                    "Ignoring overflowing chunk {offset}+{} of {}",
                    bytes.len(),
                    data.len()
                );
                Err(Error::ChunkRejected)
            }
        }
    }

    /// Finish the transfer and hand back the assembled blob.  The accumulator is always
    /// idle afterwards, whether or not the blob turns out to be usable.
    pub fn end(&mut self) -> Result<Vec<u8>> {
        self.data.take().ok_or_else(|| {
            warn!("Ignoring spurious end");
            Error::ChunkRejected
        })
    }

    /// Drop any transfer in progress
    pub fn reset(&mut self) {
        self.data = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_in_order() {
        let mut asm = ChunkAssembler::new();
        asm.start(100).unwrap();
        asm.chunk(0, &[0xA; 50]).unwrap();
        asm.chunk(50, &[0xB; 50]).unwrap();

        // Overflowing chunk is rejected and changes nothing
        assert_eq!(asm.chunk(90, &[0xC; 20]), Err(Error::ChunkRejected));

        let blob = asm.end().unwrap();
        assert_eq!(blob.len(), 100);
        assert!(blob[..50].iter().all(|&b| b == 0xA));
        assert!(blob[50..].iter().all(|&b| b == 0xB));
        assert!(!asm.is_active());
    }

    #[test]
    fn start_while_active_is_rejected() {
        let mut asm = ChunkAssembler::new();
        asm.start(10).unwrap();
        asm.chunk(0, &[1; 10]).unwrap();
        assert_eq!(asm.start(20), Err(Error::ChunkRejected));
        assert_eq!(asm.end().unwrap(), vec![1; 10]);
    }

    #[test]
    fn chunk_and_end_need_a_start() {
        let mut asm = ChunkAssembler::new();
        assert_eq!(asm.chunk(0, &[1]), Err(Error::ChunkRejected));
        assert_eq!(asm.end(), Err(Error::ChunkRejected));
    }

    #[test]
    fn offset_overflow_is_rejected() {
        let mut asm = ChunkAssembler::new();
        asm.start(8).unwrap();
        assert_eq!(asm.chunk(u32::MAX, &[1, 2]), Err(Error::ChunkRejected));
        assert_eq!(asm.start(MAX_TRANSFER_SIZE as u32 + 1), Err(Error::ChunkRejected));
        asm.reset();
        assert_eq!(asm.start(MAX_TRANSFER_SIZE as u32 + 1), Err(Error::NoMemory));
    }

    #[test]
    fn keys() {
        assert_eq!(
            PropertyKey::from_name(b"TimingElements"),
            Some(PropertyKey::TimingElements)
        );
        assert_eq!(PropertyKey::from_name(b"Timing"), None);
    }
}
