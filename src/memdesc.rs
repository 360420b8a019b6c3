//! Memory descriptor table.
//!
//! The coprocessor refers to host memory by small integer ids.  Each id names either a
//! DMA-coherent allocation the host owns, or a mapping of a whitelisted display register
//! window.  Allocations may additionally be remapped for the PIO-DMA master.
//!
//! The coprocessor is not trusted: every id it sends back is range and occupancy checked,
//! and physical mappings are confined to the configured [`RegisterWindow`]s.  Id 0 is
//! never issued.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use alloc::vec::Vec;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::io::{DmaBuffer, DmaMapper};
use crate::{Error, Result};

/// Number of descriptor ids, including the reserved id 0
pub const MAX_DESCRIPTORS: usize = 128;

/// Maximum number of display register windows
pub const MAX_REGISTER_WINDOWS: usize = 7;

const PAGE_SIZE: u64 = 4096;

/// A display register window the coprocessor may map.  Both bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterWindow {
    pub start: u64,
    pub end: u64,
}

impl RegisterWindow {
    /// A window of `size` bytes at `start`.  `None` for an empty window, or one running
    /// past the top of the address space.
    pub const fn new(start: u64, size: u64) -> Option<Self> {
        if size == 0 {
            return None;
        }
        match start.checked_add(size - 1) {
            Some(end) => Some(Self { start, end }),
            None => None,
        }
    }

    pub const fn size(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Whether `[start, end]` lies entirely inside this window
    pub const fn contains(&self, start: u64, end: u64) -> bool {
        start >= self.start && end <= self.end
    }
}

fn page_align(size: u64) -> Option<u64> {
    size.checked_add(PAGE_SIZE - 1).map(|s| s & !(PAGE_SIZE - 1))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backing {
    /// Host-owned coherent memory
    Dma(DmaBuffer),
    /// Register window, not owned
    Register { paddr: u64, dva: u64, size: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Descriptor {
    backing: Backing,
    /// Address in the PIO-DMA domain, if remapped
    piodma: Option<u64>,
}

/// Result of [`MemDescTable::allocate()`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub id: u32,
    pub buffer: DmaBuffer,
}

/// Result of [`MemDescTable::map_physical()`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    pub id: u32,
    pub dva: u64,
    pub size: u64,
}

/// Slot table indexed by descriptor id
#[derive(Debug)]
pub struct MemDescTable {
    slots: Vec<Option<Descriptor>>,
    /// Unused ids, lowest last so it is issued first
    free: Vec<u32>,
}

impl Default for MemDescTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MemDescTable {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(MAX_DESCRIPTORS);
        slots.resize(MAX_DESCRIPTORS, None);
        Self {
            slots,
            free: (1..MAX_DESCRIPTORS as u32).rev().collect(),
        }
    }

    /// Number of ids in use
    pub fn in_use(&self) -> usize {
        MAX_DESCRIPTORS - 1 - self.free.len()
    }

    pub fn is_used(&self, id: u32) -> bool {
        self.slot(id).is_some()
    }

    fn slot(&self, id: u32) -> Option<&Descriptor> {
        self.slots.get(id as usize).and_then(|s| s.as_ref())
    }

    fn take_id(&mut self) -> Result<u32> {
        self.free.pop().ok_or_else(|| {
            warn!("Memory descriptor table full");
            Error::TableFull
        })
    }

    fn put_id(&mut self, id: u32) {
        self.slots[id as usize] = None;
        // Keep ids issued lowest first
        let pos = self.free.partition_point(|&f| f > id);
        self.free.insert(pos, id);
    }

    /// Allocate coherent memory of at least `size` bytes, rounded up to whole pages.
    pub fn allocate<D: DmaMapper + ?Sized>(&mut self, dma: &D, size: u64) -> Result<Allocation> {
        let size = page_align(size).ok_or(Error::NoMemory)?;
        let id = self.take_id()?;
        let buffer = match dma.alloc_coherent(size) {
            Ok(buffer) => buffer,
            Err(e) => {
                warn!("Failed to allocate {size:#x} bytes for descriptor {id}: {e:?}");
                self.put_id(id);
                return Err(e);
            }
        };
        self.slots[id as usize] = Some(Descriptor {
            backing: Backing::Dma(buffer),
            piodma: None,
        });
        debug!("Descriptor {id}: {size:#x} bytes at dva {:#x}", buffer.dva);
        Ok(Allocation { id, buffer })
    }

    /// Map a physical range, provided it lies entirely within one of `windows`.
    pub fn map_physical<D: DmaMapper + ?Sized>(
        &mut self,
        dma: &D,
        windows: &[RegisterWindow],
        paddr: u64,
        size: u64,
    ) -> Result<Mapping> {
        let aligned = page_align(size).filter(|&s| s != 0);
        let end = aligned.and_then(|s| paddr.checked_add(s - 1));
        let allowed = match end {
            Some(end) => windows.iter().any(|w| w.contains(paddr, end)),
            None => false,
        };
        let size = match (allowed, aligned) {
            (true, Some(size)) => size,
            _ => {
                error!("Refusing to map physical address {paddr:#x} size {size:#x}");
                return Err(Error::MappingRejected);
            }
        };

        let id = self.take_id()?;
        let dva = match dma.map_resource(paddr, size) {
            Ok(dva) => dva,
            Err(e) => {
                self.put_id(id);
                return Err(e);
            }
        };
        self.slots[id as usize] = Some(Descriptor {
            backing: Backing::Register { paddr, dva, size },
            piodma: None,
        });
        debug!("Descriptor {id}: register {paddr:#x} size {size:#x} at dva {dva:#x}");
        Ok(Mapping { id, dva, size })
    }

    /// Map an existing allocation for the PIO-DMA master.
    pub fn remap_for_piodma<D: DmaMapper + ?Sized>(&mut self, dma: &D, id: u64) -> Result<u64> {
        let slot = usize::try_from(id)
            .ok()
            .and_then(|i| self.slots.get_mut(i))
            .and_then(|s| s.as_mut());
        let Some(desc) = slot else {
            error!("Denying PIO-DMA map of invalid buffer {id:#x}");
            return Err(Error::InvalidDescriptor);
        };
        let Backing::Dma(buffer) = desc.backing else {
            error!("Denying PIO-DMA map of register descriptor {id}");
            return Err(Error::InvalidDescriptor);
        };
        let dva = dma.map_piodma(&buffer)?;
        desc.piodma = Some(dva);
        Ok(dva)
    }

    /// Undo [`MemDescTable::remap_for_piodma()`].  Mismatches are logged and ignored.
    pub fn unmap_piodma<D: DmaMapper + ?Sized>(&mut self, dma: &D, id: u64, dva: u64) {
        if id >= MAX_DESCRIPTORS as u64 {
            warn!("Unmap request for out of range buffer {id}");
            return;
        }
        let Some(desc) = self.slots[id as usize].as_mut() else {
            warn!("Unmap for unused buffer {id} iova {dva:#x}");
            return;
        };
        match (desc.backing, desc.piodma) {
            (Backing::Dma(buffer), Some(mapped)) if mapped == dva => {
                dma.unmap_piodma(&buffer, dva);
                desc.piodma = None;
            }
            (_, Some(mapped)) => {
                warn!("Unmap buffer {id} address mismatch mapped {mapped:#x} requested {dva:#x}")
            }
            (_, None) => warn!("Unmap for non-mapped buffer {id} iova {dva:#x}"),
        }
    }

    /// Release an id.  Out-of-range and unused ids are rejected without side effects.
    pub fn release<D: DmaMapper + ?Sized>(&mut self, dma: &D, id: u32) -> Result<()> {
        if id as usize >= MAX_DESCRIPTORS {
            warn!("Release request for out of range descriptor {id}");
            return Err(Error::InvalidDescriptor);
        }
        let Some(desc) = self.slots[id as usize] else {
            warn!("Release request for unused descriptor {id}");
            return Err(Error::InvalidDescriptor);
        };
        Self::free_backing(dma, &desc);
        self.put_id(id);
        trace!("Descriptor {id} released");
        Ok(())
    }

    fn free_backing<D: DmaMapper + ?Sized>(dma: &D, desc: &Descriptor) {
        match desc.backing {
            Backing::Dma(buffer) => {
                if let Some(dva) = desc.piodma {
                    dma.unmap_piodma(&buffer, dva);
                }
                dma.free_coherent(&buffer);
            }
            Backing::Register { dva, size, .. } => dma.unmap_resource(dva, size),
        }
    }

    /// Release every descriptor.  Used at shutdown and after a crash.
    pub fn clear<D: DmaMapper + ?Sized>(&mut self, dma: &D) {
        let mut released = 0;
        for desc in self.slots.iter().flatten() {
            Self::free_backing(dma, desc);
            released += 1;
        }
        if released != 0 {
            debug!("Released {released} memory descriptors");
        }
        *self = Self::new();
    }

    /// Physical address of a register descriptor, for diagnostics
    pub fn register_address(&self, id: u32) -> Option<u64> {
        match self.slot(id)?.backing {
            Backing::Register { paddr, .. } => Some(paddr),
            Backing::Dma(_) => None,
        }
    }
}
