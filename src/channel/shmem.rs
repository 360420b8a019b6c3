//! Shared-memory access.
//!
//! The shared-memory region is owned by the transport and only touched through
//! [`ShmemIo`].  Writers hold the lock of the channel whose window they write to.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use alloc::vec;
use alloc::vec::Vec;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use spin::Mutex;

use crate::channel::SHMEM_SIZE;
use crate::{Error, Result};

/// Trait for accessing the shared-memory region.
///
/// Offsets are relative to the start of the region.  Implementations must reject
/// accesses that fall outside it.
pub trait ShmemIo: Send + Sync {
    /// Size of the region in bytes
    fn size(&self) -> usize;

    /// Bulk read access, no need for atomicity
    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<()>;

    /// Bulk write access, no need for atomicity
    fn write(&self, offset: usize, data: &[u8]) -> Result<()>;

    /// Set `len` bytes at `offset` to `value`
    fn fill(&self, offset: usize, len: usize, value: u8) -> Result<()> {
        const CHUNK: usize = 64;
        let block = [value; CHUNK];
        let mut done = 0;
        while done < len {
            let n = CHUNK.min(len - done);
            self.write(offset + done, &block[..n])?;
            done += n;
        }
        Ok(())
    }

    /// Read `len` bytes into a new buffer
    fn read_vec(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read(offset, &mut buf)?;
        Ok(buf)
    }
}

fn check_bounds(offset: usize, len: usize, size: usize) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(Error::PayloadTooLarge),
    }
}

/// Shared memory backed by a DMA-coherent mapping.  Typically used on real hardware.
pub struct RamShmem {
    base: *mut u8,
    size: usize,
}

// SAFETY: the region is plain memory shared with the coprocessor; all accesses are
// volatile and the transport serializes writers per window.
unsafe impl Send for RamShmem {}
unsafe impl Sync for RamShmem {}

impl RamShmem {
    /// Wrap an existing mapping.
    ///
    /// # Safety
    ///
    /// `base` must point to at least `size` bytes that stay mapped, and are not accessed
    /// by the host through any other path, for the lifetime of this object.
    pub unsafe fn new(base: *mut u8, size: usize) -> Result<Self> {
        if base.is_null() {
            return Err(Error::Io);
        }
        if size < SHMEM_SIZE {
            return Err(Error::PayloadTooLarge);
        }
        debug!("Shared memory at {base:p} size {size:#x} bytes");
        Ok(Self { base, size })
    }
}

impl ShmemIo for RamShmem {
    fn size(&self) -> usize {
        self.size
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        check_bounds(offset, buf.len(), self.size)?;
        for (i, byte) in buf.iter_mut().enumerate() {
            // SAFETY: bounds checked above, mapping guaranteed by `new`.
            *byte = unsafe { core::ptr::read_volatile(self.base.add(offset + i)) };
        }
        Ok(())
    }

    fn write(&self, offset: usize, data: &[u8]) -> Result<()> {
        check_bounds(offset, data.len(), self.size)?;
        for (i, byte) in data.iter().enumerate() {
            // SAFETY: bounds checked above, mapping guaranteed by `new`.
            unsafe { core::ptr::write_volatile(self.base.add(offset + i), *byte) };
        }
        Ok(())
    }
}

/// Shared memory backed by a heap buffer.  Used for hosted builds and simulation.
pub struct BufferShmem {
    buf: Mutex<Vec<u8>>,
}

impl Default for BufferShmem {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferShmem {
    /// Create a zeroed region of [`SHMEM_SIZE`] bytes
    pub fn new() -> Self {
        Self {
            buf: Mutex::new(vec![0u8; SHMEM_SIZE]),
        }
    }
}

impl ShmemIo for BufferShmem {
    fn size(&self) -> usize {
        SHMEM_SIZE
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        check_bounds(offset, buf.len(), SHMEM_SIZE)?;
        let mem = self.buf.lock();
        buf.copy_from_slice(&mem[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&self, offset: usize, data: &[u8]) -> Result<()> {
        check_bounds(offset, data.len(), SHMEM_SIZE)?;
        let mut mem = self.buf.lock();
        mem[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn fill(&self, offset: usize, len: usize, value: u8) -> Result<()> {
        check_bounds(offset, len, SHMEM_SIZE)?;
        let mut mem = self.buf.lock();
        mem[offset..offset + len].fill(value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_read_write() {
        let shmem = BufferShmem::new();
        shmem.write(0x100, &[1, 2, 3, 4]).unwrap();
        assert_eq!(shmem.read_vec(0x100, 4).unwrap(), vec![1, 2, 3, 4]);

        shmem.fill(0x101, 2, 0).unwrap();
        assert_eq!(shmem.read_vec(0x100, 4).unwrap(), vec![1, 0, 0, 4]);
    }

    #[test]
    fn buffer_rejects_out_of_range() {
        let shmem = BufferShmem::new();
        assert_eq!(shmem.write(SHMEM_SIZE - 1, &[0, 0]), Err(Error::PayloadTooLarge));
        let mut buf = [0u8; 1];
        assert_eq!(shmem.read(usize::MAX, &mut buf), Err(Error::PayloadTooLarge));
    }

    #[test]
    fn ram_shmem_over_local_buffer() {
        let mut backing = vec![0u8; SHMEM_SIZE];
        let shmem = unsafe { RamShmem::new(backing.as_mut_ptr(), backing.len()) }.unwrap();
        shmem.write(8, &[0xAA; 8]).unwrap();
        ShmemIo::fill(&shmem, 10, 100, 0x55).unwrap();
        let mut out = [0u8; 4];
        shmem.read(8, &mut out).unwrap();
        assert_eq!(out, [0xAA, 0xAA, 0x55, 0x55]);
        drop(shmem);
        assert_eq!(backing[109], 0x55);
        assert_eq!(backing[110], 0);
    }
}
