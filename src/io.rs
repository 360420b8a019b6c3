//! Traits the host platform implements for the transport.
//!
//! The transport itself never touches hardware.  Everything outside shared memory is
//! reached through these traits:
//!
//! - [`Mailbox`] - deliver a doorbell word to the coprocessor
//! - [`DmaMapper`] - coherent allocations and IOMMU mappings, for the coprocessor's DMA
//!   master and for the separate PIO-DMA master
//! - [`DisplayEvents`] - frame-complete and hotplug notifications to the display subsystem
//! - [`PropertyDecoder`] - the external decoder for coprocessor-supplied property blobs
//! - [`Clock`] - time and clock rate queries the coprocessor makes
//!
//! [`Platform`] is implemented automatically for any type implementing all of them.
//!
//! # Possible implementations
//!
//! - On the target: wrap the mailbox driver, the DMA API and the display pipeline.
//! - For hosted applications and tests: record doorbells in a queue and hand out
//!   synthetic addresses.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use alloc::vec::Vec;

use crate::Result;

/// Mailbox used to ring the coprocessor's doorbell.
pub trait Mailbox {
    /// Send one 64-bit doorbell word.
    ///
    /// Must not call back into the transport synchronously.  Replies arrive later through
    /// [`crate::dcp::Dcp::handle_message()`].
    fn send(&self, word: u64) -> Result<()>;
}

/// A DMA-coherent allocation, owned by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaBuffer {
    /// Physical address of the first page
    pub paddr: u64,
    /// Address of the buffer as seen by the coprocessor
    pub dva: u64,
    /// Size in bytes, page aligned
    pub size: u64,
}

/// DMA and IOMMU operations.
pub trait DmaMapper {
    /// Allocate `size` bytes of zeroed coherent memory mapped for the coprocessor.
    fn alloc_coherent(&self, size: u64) -> Result<DmaBuffer>;

    /// Free a buffer returned by [`DmaMapper::alloc_coherent()`].
    fn free_coherent(&self, buffer: &DmaBuffer);

    /// Map a physical register range into the coprocessor's address space, returning
    /// its device address.
    fn map_resource(&self, paddr: u64, size: u64) -> Result<u64>;

    /// Undo [`DmaMapper::map_resource()`].
    fn unmap_resource(&self, dva: u64, size: u64);

    /// Map an existing allocation into the PIO-DMA master's IOMMU domain, returning the
    /// address in that domain.
    fn map_piodma(&self, buffer: &DmaBuffer) -> Result<u64>;

    /// Undo [`DmaMapper::map_piodma()`].
    fn unmap_piodma(&self, buffer: &DmaBuffer, dva: u64);
}

/// Notifications to the display subsystem.
pub trait DisplayEvents {
    /// A frame completed, or a frame-complete is being synthesized so upstream never
    /// waits forever on a dropped reply.
    fn vblank(&self);

    /// Connector state changed
    fn hotplug(&self, connected: bool);
}

/// One display timing the coprocessor advertises
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DisplayMode {
    pub width: u32,
    pub height: u32,
    /// Refresh rate in Hz, 16.16 fixed point
    pub refresh: u32,
    pub timing_mode_id: u32,
    pub color_mode_id: u32,
}

/// Physical panel size
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width_mm: u32,
    pub height_mm: u32,
}

/// Decoder for the tag-length-value dictionaries the coprocessor streams with chunked
/// property transfers.
pub trait PropertyDecoder {
    /// Decode a "TimingElements" blob into the list of supported modes
    fn modes(&self, blob: &[u8], notch_height: u32) -> Result<Vec<DisplayMode>>;

    /// Decode a "DisplayAttributes" blob
    fn display_attributes(&self, blob: &[u8]) -> Result<Dimensions>;
}

/// Time sources the coprocessor queries.
pub trait Clock {
    /// Wall-clock time in milliseconds since the UNIX epoch
    fn time(&self) -> u64;

    /// Rate of the coprocessor's reference clock in Hz
    fn frequency(&self) -> u64;
}

/// Everything the transport needs from the host
pub trait Platform: Mailbox + DmaMapper + DisplayEvents + PropertyDecoder + Clock {}

impl<T: Mailbox + DmaMapper + DisplayEvents + PropertyDecoder + Clock> Platform for T {}
