//! Contexts, shared-memory layout and per-context call stacks.
//!
//! Each context owns a [`Channel`]: a fixed-capacity stack of frames, one per packet
//! that is in flight on that context.  Frames are packed back to back in the context's
//! window and freed strictly LIFO, so in-flight packets within one channel never overlap
//! as long as calls nest.
//!
//! The CMD/OOBCMD channels track host-initiated calls and their continuations.  The
//! CB/OOBCB channels track coprocessor callbacks, together with any host calls issued
//! from inside those callbacks.  ASYNC only ever carries callbacks.
//!
//! See [`crate`] for an overview.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

pub mod shmem;

pub use shmem::{BufferShmem, RamShmem, ShmemIo};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use spin::Mutex;

use crate::{Error, Result};

/// Fixed size of the shared-memory region
pub const SHMEM_SIZE: usize = 0x10_0000;

/// Limit on call stack depth.  Some nesting is required.
pub const MAX_CALL_DEPTH: usize = 8;

const WINDOW_SIZE: usize = 0x8000;
const ASYNC_WINDOW_SIZE: usize = 0x2_0000;

/// Message contexts multiplexed over the shared memory and doorbell
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Context {
    /// Callback
    Cb = 0,
    /// Command
    Cmd = 2,
    /// Asynchronous
    Async = 3,
    /// Out-of-band callback
    OobCb = 4,
    /// Out-of-band command
    OobCmd = 6,
}

impl TryFrom<u8> for Context {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Context::Cb),
            2 => Ok(Context::Cmd),
            3 => Ok(Context::Async),
            4 => Ok(Context::OobCb),
            6 => Ok(Context::OobCmd),
            _ => Err(Error::InvalidContext),
        }
    }
}

/// Context offsets
impl Context {
    /// Offset of the window the host writes outgoing packets to.  ASYNC is receive only.
    pub const fn tx_offset(self) -> Result<usize> {
        match self {
            Context::Cb | Context::Cmd => Ok(0x0_0000),
            Context::OobCb | Context::OobCmd => Ok(0x0_8000),
            Context::Async => Err(Error::InvalidContext),
        }
    }

    /// Offset of the window incoming packets (callbacks and acks) are read from
    pub const fn rx_offset(self) -> usize {
        match self {
            Context::Async => 0x4_0000,
            Context::Cb => 0x6_0000,
            Context::OobCb => 0x6_8000,
            Context::Cmd => 0x0_0000,
            Context::OobCmd => 0x0_8000,
        }
    }

    /// Size of each of this context's windows
    pub const fn window_size(self) -> usize {
        match self {
            Context::Async => ASYNC_WINDOW_SIZE,
            _ => WINDOW_SIZE,
        }
    }

    pub const fn is_oob(self) -> bool {
        matches!(self, Context::OobCb | Context::OobCmd)
    }

    /// Context to use for a host call.  Callback contexts are used when the host is
    /// replying from within an open call (non-zero command depth), command contexts
    /// otherwise.  This frees callers from tracking the context themselves.
    pub const fn for_call(oob: bool, cmd_depth: u8) -> Self {
        match (oob, cmd_depth) {
            (false, 0) => Context::Cmd,
            (false, _) => Context::Cb,
            (true, 0) => Context::OobCmd,
            (true, _) => Context::OobCb,
        }
    }
}

/// One in-flight packet
#[derive(Debug)]
pub struct Frame<C> {
    /// Run when the packet is acked.  Only host-initiated calls carry one.
    pub continuation: Option<C>,
    /// Absolute shared-memory offset of the packet's output area
    pub output: usize,
    /// Size of the output area
    pub output_len: usize,
    /// Offset within the window just past this packet, aligned
    pub end: u32,
}

impl<C> Default for Frame<C> {
    fn default() -> Self {
        Self {
            continuation: None,
            output: 0,
            output_len: 0,
            end: 0,
        }
    }
}

/// Fixed-capacity LIFO call stack for one context
#[derive(Debug)]
pub struct Channel<C> {
    frames: [Frame<C>; MAX_CALL_DEPTH],
    depth: u8,
}

impl<C> Default for Channel<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Channel<C> {
    pub fn new() -> Self {
        Self {
            frames: core::array::from_fn(|_| Frame::default()),
            depth: 0,
        }
    }

    /// Number of outstanding frames
    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// A channel is busy if a message has been sent that has yet to be acked.  A
    /// top-level call must not be sent on a busy channel.
    pub fn is_busy(&self) -> bool {
        self.depth != 0
    }

    /// Returns the current depth, then increments it.
    pub fn push_depth(&mut self) -> Result<u8> {
        if self.depth as usize >= MAX_CALL_DEPTH {
            error!("Call stack overflow at depth {}", self.depth);
            return Err(Error::StackOverflow);
        }
        let depth = self.depth;
        self.depth += 1;
        Ok(depth)
    }

    /// Decrements the depth, then returns it.
    pub fn pop_depth(&mut self) -> Result<u8> {
        if self.depth == 0 {
            error!("Call stack underflow");
            return Err(Error::StackUnderflow);
        }
        self.depth -= 1;
        Ok(self.depth)
    }

    /// Start of a packet at `depth`: just after the end of the previous packet.
    pub fn frame_start(&self, depth: u8) -> u32 {
        match depth {
            0 => 0,
            d => self.frames[(d - 1) as usize].end,
        }
    }

    pub fn frame(&self, depth: u8) -> &Frame<C> {
        &self.frames[depth as usize]
    }

    pub fn frame_mut(&mut self, depth: u8) -> &mut Frame<C> {
        &mut self.frames[depth as usize]
    }

    /// Most recently pushed frame that is still open
    pub fn top(&self) -> Option<&Frame<C>> {
        self.depth
            .checked_sub(1)
            .map(|d| &self.frames[d as usize])
    }

    /// Push a frame, returning its depth and start offset.
    pub fn push_frame(
        &mut self,
        continuation: Option<C>,
        output: usize,
        output_len: usize,
        end: u32,
    ) -> Result<u8> {
        let depth = self.push_depth()?;
        let frame = &mut self.frames[depth as usize];
        frame.continuation = continuation;
        frame.output = output;
        frame.output_len = output_len;
        frame.end = end;
        Ok(depth)
    }

    /// Pop the top frame, taking its continuation.  The frame's memory is logically
    /// freed; the next packet pushed at this depth overwrites it.
    pub fn pop_frame(&mut self) -> Result<(u8, Option<C>)> {
        let depth = self.pop_depth()?;
        let continuation = self.frames[depth as usize].continuation.take();
        Ok((depth, continuation))
    }

    /// Drop every outstanding frame.  Only used when the transport is torn down.
    pub fn reset(&mut self) {
        for frame in self.frames.iter_mut() {
            *frame = Frame::default();
        }
        self.depth = 0;
    }
}

/// The five channels, each behind its own lock
pub struct Channels<C> {
    cmd: Mutex<Channel<C>>,
    oobcmd: Mutex<Channel<C>>,
    cb: Mutex<Channel<C>>,
    oobcb: Mutex<Channel<C>>,
    async_cb: Mutex<Channel<C>>,
}

impl<C> Default for Channels<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Channels<C> {
    pub fn new() -> Self {
        Self {
            cmd: Mutex::new(Channel::new()),
            oobcmd: Mutex::new(Channel::new()),
            cb: Mutex::new(Channel::new()),
            oobcb: Mutex::new(Channel::new()),
            async_cb: Mutex::new(Channel::new()),
        }
    }

    /// Get the channel for a context
    pub fn get(&self, context: Context) -> &Mutex<Channel<C>> {
        match context {
            Context::Cmd => &self.cmd,
            Context::OobCmd => &self.oobcmd,
            Context::Cb => &self.cb,
            Context::OobCb => &self.oobcb,
            Context::Async => &self.async_cb,
        }
    }

    /// Context a new host call is sent on
    pub fn call_context(&self, oob: bool) -> Context {
        let depth = if oob {
            self.oobcmd.lock().depth()
        } else {
            self.cmd.lock().depth()
        };
        Context::for_call(oob, depth)
    }

    pub fn reset(&self) {
        for context in [
            Context::Cmd,
            Context::OobCmd,
            Context::Cb,
            Context::OobCb,
            Context::Async,
        ] {
            self.get(context).lock().reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_ids_round_trip() {
        for ctx in [
            Context::Cb,
            Context::Cmd,
            Context::Async,
            Context::OobCb,
            Context::OobCmd,
        ] {
            assert_eq!(Context::try_from(ctx as u8), Ok(ctx));
        }
        assert_eq!(Context::try_from(1), Err(Error::InvalidContext));
        assert_eq!(Context::try_from(5), Err(Error::InvalidContext));
        assert_eq!(Context::try_from(15), Err(Error::InvalidContext));
    }

    #[test]
    fn windows_match_firmware_layout() {
        assert_eq!(Context::Cmd.tx_offset(), Ok(0));
        assert_eq!(Context::Cb.tx_offset(), Ok(0));
        assert_eq!(Context::OobCmd.tx_offset(), Ok(0x8000));
        assert_eq!(Context::Async.tx_offset(), Err(Error::InvalidContext));
        assert_eq!(Context::Cb.rx_offset(), 0x60000);
        assert_eq!(Context::OobCb.rx_offset(), 0x68000);
        assert_eq!(Context::Async.rx_offset(), 0x40000);
        assert_eq!(Context::Cmd.rx_offset(), 0);
    }

    #[test]
    fn call_context_follows_depth() {
        assert_eq!(Context::for_call(false, 0), Context::Cmd);
        assert_eq!(Context::for_call(false, 3), Context::Cb);
        assert_eq!(Context::for_call(true, 0), Context::OobCmd);
        assert_eq!(Context::for_call(true, 1), Context::OobCb);
    }

    #[test]
    fn push_pop_is_lifo() {
        let mut ch: Channel<u32> = Channel::new();
        assert_eq!(ch.frame_start(0), 0);

        let d0 = ch.push_frame(Some(10), 0x100, 4, 0x40).unwrap();
        assert_eq!(d0, 0);
        assert_eq!(ch.frame_start(1), 0x40);

        let d1 = ch.push_frame(Some(11), 0x200, 4, 0xC0).unwrap();
        assert_eq!(d1, 1);
        assert_eq!(ch.frame_start(2), 0xC0);
        assert!(ch.is_busy());

        assert_eq!(ch.pop_frame().unwrap(), (1, Some(11)));
        assert_eq!(ch.pop_frame().unwrap(), (0, Some(10)));
        assert!(!ch.is_busy());
    }

    #[test]
    fn overflow_and_underflow_are_errors() {
        let mut ch: Channel<()> = Channel::new();
        assert_eq!(ch.pop_depth(), Err(Error::StackUnderflow));

        for expected in 0..MAX_CALL_DEPTH as u8 {
            assert_eq!(ch.push_depth(), Ok(expected));
        }
        assert_eq!(ch.push_depth(), Err(Error::StackOverflow));
        assert_eq!(ch.depth(), MAX_CALL_DEPTH as u8);
    }

    #[test]
    fn reset_clears_frames() {
        let mut ch: Channel<u8> = Channel::new();
        ch.push_frame(Some(1), 0, 0, 0x40).unwrap();
        ch.reset();
        assert_eq!(ch.depth(), 0);
        assert!(ch.top().is_none());
        assert!(ch.frame(0).continuation.is_none());
    }

    #[test]
    fn channels_pick_callback_context_when_nested() {
        let chs: Channels<()> = Channels::new();
        assert_eq!(chs.call_context(false), Context::Cmd);
        chs.get(Context::Cmd).lock().push_depth().unwrap();
        assert_eq!(chs.call_context(false), Context::Cb);
        assert_eq!(chs.call_context(true), Context::OobCmd);
    }
}
