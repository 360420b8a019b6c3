//! Remote Procedure Call transport for driving a display coprocessor (DCP) over a fixed
//! shared-memory region and a mailbox doorbell.
//!
//! The host and the coprocessor call each other.  The host issues commands; while a command
//! is outstanding the coprocessor may call back into the host, and the host may in turn issue
//! nested calls from within those callbacks.  Every in-flight packet lives in a per-context
//! window of shared memory, stacked back to back in strict LIFO order.
//!
//! `no_std`.  Requires `alloc`.
//!
//! ## Architecture
//!
//! A single 1 MiB shared-memory region is divided into fixed windows, one per context:
//! - **CMD / OOBCMD**: host-initiated commands (in-band and out-of-band)
//! - **CB / OOBCB**: coprocessor callbacks, and host calls nested inside them
//! - **ASYNC**: unsolicited coprocessor notifications (e.g. swap complete)
//!
//! The offsets are wire constants compiled into the coprocessor firmware.  They are not
//! self-describing and are not configurable.
//!
//! Each message is announced with a 64-bit doorbell word carrying the message type,
//! context, byte offset within the window, byte length and an ack bit.  The packet itself
//! starts with a 12-byte header (reversed four character tag, input length, output length)
//! followed by the input payload and space reserved for the output.
//!
//! ## Modules
//!
//! - [`channel`] - Contexts, shared-memory access and per-context call stacks
//! - [`codec`] - Doorbell word and packet header encoding
//! - [`wire`] - Little-endian packed (de)serialization of protocol structures
//! - [`proto`] - Method tags and typed request/response structures
//! - [`callback`] - Dispatch of coprocessor callbacks to typed handlers
//! - [`memdesc`] - Memory descriptor table the coprocessor references by id
//! - [`chunks`] - Reassembly of chunked property transfers
//! - [`dcp`] - The transport itself: send, ack and receive paths
//! - [`boot`] - Start-up, boot and power sequencing
//! - [`swap`] - Modeset and frame presentation
//! - [`client`] - Configuration, completions and bounded waits
//! - [`io`] - Traits the host platform implements (mailbox, DMA, display events)
//!
//! ## Getting Started
//!
//! 1. Implement the [`io`] traits for your platform, and allocate a [`channel::ShmemIo`]
//!    over the DMA-coherent shared-memory region.
//! 2. Create a [`dcp::Dcp`] with a [`client::DcpConfig`].
//! 3. Call [`dcp::Dcp::start()`] to advertise the shared memory to the coprocessor.
//! 4. Feed every received doorbell word into [`dcp::Dcp::handle_message()`] from the
//!    mailbox interrupt path.
//! 5. Wait for [`dcp::Dcp::wait_ready()`], then present frames with
//!    [`dcp::Dcp::flush()`].
//!
//! ## Features
//!
//! Default features:
//! - `async` - Enable bounded asynchronous waits, and the power and presentation entry
//!   points that depend on them.
//!
//! Compile with `--no-default-features` for just the synchronous transport.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#![no_std]

extern crate alloc;

pub mod boot;
pub mod callback;
pub mod channel;
pub mod chunks;
pub mod client;
pub mod codec;
pub mod dcp;
pub mod io;
pub mod memdesc;
pub mod proto;
pub mod swap;
pub mod wire;

/// RPC errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Call stack is full
    StackOverflow,
    /// Pop from an empty call stack
    StackUnderflow,
    /// Context has no channel, or no window in this direction
    InvalidContext,
    /// Channel has an outstanding call
    ChannelBusy,
    /// Memory descriptor id is out of range or unused
    InvalidDescriptor,
    /// Physical mapping outside the display register whitelist
    MappingRejected,
    /// No free memory descriptor ids
    TableFull,
    /// Chunked transfer out of sequence or out of bounds
    ChunkRejected,
    /// Buffer shorter than the structure being decoded
    Truncated,
    /// Packet does not fit in its shared-memory window
    PayloadTooLarge,
    /// Mailbox refused the doorbell
    Mailbox,
    /// Timeout waiting for the coprocessor
    Timeout,
    /// Allocation failed
    NoMemory,
    /// Shared-memory access failed
    Io,
    /// The coprocessor has crashed
    Crashed,
    /// The coprocessor has not finished starting
    NotReady,
    /// Property decoder rejected a blob
    Decode,
}

/// Type to represent the result of an RPC operation
pub type Result<T> = core::result::Result<T, Error>;
