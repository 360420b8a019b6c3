//! The transport: send, ack and receive paths.
//!
//! [`Dcp`] owns the shared memory, the five channels and all per-coprocessor state.
//! Host calls go out through [`Dcp::send_call()`]; every doorbell the mailbox receives
//! comes back in through [`Dcp::handle_message()`], which either resumes the
//! [`Continuation`] stored with the acked call, or dispatches a callback.
//!
//! Locks are never held across a continuation, a callback handler or a platform
//! notification, so any of those may issue further calls.
//!
//! Start-up, boot and power sequencing live in [`crate::boot`]; frame presentation in
//! [`crate::swap`].

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use spin::Mutex;

use crate::boot::{BootStep, PowerStep, StartStep};
use crate::callback::{Callback, Disposition, parse_tag};
use crate::channel::{Channels, Context, SHMEM_SIZE, ShmemIo};
use crate::chunks::ChunkAssembler;
use crate::client::{Completion, DcpConfig};
use crate::codec::{Message, PacketHeader, align_packet};
use crate::io::{Dimensions, DisplayMode, Platform};
use crate::memdesc::{Allocation, MemDescTable};
use crate::proto::Method;
use crate::swap::{SwapState, SwapStep};
use crate::wire::Wire;
use crate::{Error, Result};

/// Brightness scale until the coprocessor reports its own
pub const DEFAULT_BRIGHTNESS_SCALE: u32 = 65536;

/// What to do when a host call is acked.
///
/// Chains of dependent calls are built by having each step's continuation issue the next
/// call.
#[derive(Debug)]
pub enum Continuation {
    /// Start-up handshake after INITIALIZED
    Start(StartStep),
    /// Boot chain begun by a boot callback on `context`
    Boot { step: BootStep, context: Context },
    /// Finish a deferred callback on `context`, optionally writing a boolean reply into
    /// its output first
    AckCallback {
        context: Context,
        reply: Option<bool>,
    },
    /// Power-on chain
    PowerOn { step: PowerStep, done: Completion },
    /// Present a frame
    Swap(SwapStep),
    /// Complete with the first 32-bit word of the response, or 0 if there is none
    Signal(Completion),
}

/// Panel brightness as reported by the coprocessor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Brightness {
    pub scale: u32,
    pub nits: u32,
    /// Backlight level sent with the next swap
    pub dac: u32,
    /// Brightness must be re-sent with the next swap
    pub update: bool,
}

impl Default for Brightness {
    fn default() -> Self {
        Self {
            scale: DEFAULT_BRIGHTNESS_SCALE,
            nits: 0,
            dac: 0,
            update: false,
        }
    }
}

/// Display state learned from the coprocessor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayState {
    pub main_display: bool,
    pub connected: bool,
    /// Current mode was set successfully and is still valid
    pub valid_mode: bool,
    pub modes: Vec<DisplayMode>,
    pub dimensions: Dimensions,
    pub brightness: Brightness,
}

/// Transport for one coprocessor
pub struct Dcp<S: ShmemIo, P: Platform> {
    shmem: S,
    platform: P,
    config: DcpConfig,
    channels: Channels<Continuation>,
    pub(crate) memdesc: Mutex<MemDescTable>,
    pub(crate) chunks: Mutex<ChunkAssembler>,
    pub(crate) display: Mutex<DisplayState>,
    pub(crate) swap: Mutex<SwapState>,
    active: AtomicBool,
    crashed: AtomicBool,
    pub(crate) start_done: Completion,
    waits: Mutex<Vec<Completion>>,
}

impl<S: ShmemIo, P: Platform> Dcp<S, P> {
    /// Create a transport over `shmem`, which must cover [`SHMEM_SIZE`] bytes.
    pub fn new(shmem: S, platform: P, config: DcpConfig) -> Result<Self> {
        config.validate()?;
        if shmem.size() < SHMEM_SIZE {
            error!(
                "Shared memory is {:#x} bytes, {SHMEM_SIZE:#x} required",
                shmem.size()
            );
            return Err(Error::PayloadTooLarge);
        }
        let display = DisplayState {
            main_display: config.main_display,
            ..Default::default()
        };
        Ok(Self {
            shmem,
            platform,
            config,
            channels: Channels::new(),
            memdesc: Mutex::new(MemDescTable::new()),
            chunks: Mutex::new(ChunkAssembler::new()),
            display: Mutex::new(display),
            swap: Mutex::new(SwapState::default()),
            active: AtomicBool::new(false),
            crashed: AtomicBool::new(false),
            start_done: Completion::new(),
            waits: Mutex::new(Vec::new()),
        })
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn shmem(&self) -> &S {
        &self.shmem
    }

    pub fn config(&self) -> &DcpConfig {
        &self.config
    }

    /// Start-up handshake has finished and the coprocessor accepts frames
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    pub fn is_crashed(&self) -> bool {
        self.crashed.load(Ordering::Acquire)
    }

    pub(crate) fn set_crashed(&self) {
        self.crashed.store(true, Ordering::Release);
    }

    /// Snapshot of the display state
    pub fn display_state(&self) -> DisplayState {
        self.display.lock().clone()
    }

    /// Set the backlight level, applied with the next swap
    pub fn set_brightness(&self, dac: u32) {
        let mut display = self.display.lock();
        display.brightness.dac = dac;
        display.brightness.update = true;
    }

    /// Depth of the channel for `context`
    pub fn depth(&self, context: Context) -> u8 {
        self.channels.get(context).lock().depth()
    }

    /// A call or callback on `context` is still waiting for its ack
    pub fn is_busy(&self, context: Context) -> bool {
        self.channels.get(context).lock().is_busy()
    }

    /// Advertise the shared memory to the coprocessor.  It answers with INITIALIZED once
    /// it is ready, which starts the handshake.
    pub fn start(&self) -> Result<()> {
        self.start_done.reset();
        let dva = self.config.shmem_address();
        info!("Advertising shared memory at {dva:#x}");
        self.ring(Message::SetShmem { dva })
    }

    /// The coprocessor crashed.  Marks the transport dead, disconnects the display and
    /// fails every pending wait.  Channels stay as they are until [`Dcp::reset()`].
    pub fn crashed(&self) {
        self.set_crashed();
        self.set_active(false);
        error!("Display coprocessor has crashed");

        self.display.lock().connected = false;
        self.platform.hotplug(false);

        self.start_done.fail(Error::Crashed);
        let waits = core::mem::take(&mut *self.waits.lock());
        for done in waits {
            done.fail(Error::Crashed);
        }

        self.chunks.lock().reset();
        self.memdesc.lock().clear(&self.platform);
    }

    /// Return to the just-created state so the transport can be started again, for
    /// example after the coprocessor has been rebooted.
    pub fn reset(&self) {
        self.channels.reset();
        self.chunks.lock().reset();
        self.memdesc.lock().clear(&self.platform);
        {
            let mut display = self.display.lock();
            *display = DisplayState {
                main_display: self.config.main_display,
                ..Default::default()
            };
        }
        *self.swap.lock() = SwapState::default();
        self.waits.lock().clear();
        self.set_active(false);
        self.crashed.store(false, Ordering::Release);
        self.start_done.reset();
    }

    /// Allocate coherent memory on behalf of the display subsystem
    pub fn allocate_descriptor(&self, size: u64) -> Result<Allocation> {
        self.memdesc.lock().allocate(&self.platform, size)
    }

    /// Release a descriptor id
    pub fn release_descriptor(&self, id: u32) -> Result<()> {
        self.memdesc.lock().release(&self.platform, id)
    }

    pub(crate) fn ring(&self, message: Message) -> Result<()> {
        let word = message.encode();
        trace!("Doorbell out {word:#018x} {message:?}");
        self.platform.send(word).map_err(|e| {
            error!("Mailbox send failed: {e:?}");
            Error::Mailbox
        })
    }

    /// Issue a host call.
    ///
    /// The packet is placed just past the most recent in-flight packet of the channel it
    /// is sent on.  That is the CMD (or OOBCMD) channel for a top-level call, and the CB
    /// (or OOBCB) channel when a command is already outstanding, which is the case for
    /// calls made while handling a callback.
    ///
    /// `continuation` runs when the call is acked.
    pub fn send_call(
        &self,
        oob: bool,
        method: Method,
        input: &[u8],
        output_len: usize,
        continuation: Option<Continuation>,
    ) -> Result<()> {
        if self.is_crashed() {
            return Err(Error::Crashed);
        }
        let context = self.channels.call_context(oob);
        let base = context.tx_offset()?;
        let header = PacketHeader::new(
            method.tag(),
            u32::try_from(input.len()).map_err(|_| Error::PayloadTooLarge)?,
            u32::try_from(output_len).map_err(|_| Error::PayloadTooLarge)?,
        );

        let (depth, offset, length) = {
            let mut channel = self.channels.get(context).lock();
            let offset = channel.frame_start(channel.depth()) as usize;
            let length = header.packet_len();
            let end = offset + align_packet(length);
            if end > context.window_size() || offset > u16::MAX as usize {
                error!(
                    "{} does not fit in {context:?} window at {offset:#x}",
                    method.name()
                );
                return Err(Error::PayloadTooLarge);
            }

            let output = base + offset + PacketHeader::SIZE + input.len();
            let depth = channel.push_frame(continuation, output, output_len, end as u32)?;

            let written = self
                .shmem
                .write(base + offset, &header.encode())
                .and_then(|_| self.shmem.write(base + offset + PacketHeader::SIZE, input));
            if let Err(e) = written {
                let _ = channel.pop_frame();
                return Err(e);
            }
            (depth, offset as u16, length as u32)
        };

        trace!(
            "Call {} ({}) {context:?} depth {depth} offset {offset:#x} len {length:#x}",
            method.name(),
            tag_str(&method.tag())
        );

        if let Err(e) = self.ring(Message::msg(context, offset, length)) {
            let _ = self.channels.get(context).lock().pop_frame();
            return Err(e);
        }
        Ok(())
    }

    /// Typed [`Dcp::send_call()`] on the in-band channels, reserving room for an `O`.
    pub(crate) fn call<I: Wire, O: Wire>(
        &self,
        method: Method,
        input: &I,
        continuation: Option<Continuation>,
    ) -> Result<()> {
        self.send_call(false, method, &input.to_bytes(), O::SIZE, continuation)
    }

    /// Acknowledge the most recent callback received on `context`, freeing its frame.
    pub fn ack(&self, context: Context) -> Result<()> {
        let depth = self.channels.get(context).lock().pop_depth()?;
        trace!("Ack {context:?} depth {depth}");
        self.ring(Message::ack(context))
    }

    /// Process one doorbell word from the coprocessor.
    ///
    /// Errors are specific to this message; the transport stays usable.
    pub fn handle_message(&self, word: u64) -> Result<()> {
        let message = Message::decode(word);
        trace!("Doorbell in {word:#018x} {message:?}");
        match message {
            Message::Initialized => self.on_initialized(),
            Message::Msg {
                context,
                offset,
                length,
                ack,
            } => {
                let context = Context::try_from(context).inspect_err(|_| {
                    warn!("Ignoring message on invalid context {context}");
                })?;
                if ack {
                    self.handle_ack(context, offset)
                } else {
                    self.handle_callback(context, offset, length)
                }
            }
            Message::SetShmem { .. } => {
                warn!("Unexpected SET_SHMEM from coprocessor {word:#x}");
                Ok(())
            }
            Message::Unknown(word) => {
                warn!("Unknown message {word:#x}");
                Ok(())
            }
        }
    }

    /// Read a packet header from the receive window of `context`, checking the packet
    /// fits the window.
    fn read_packet(&self, context: Context, offset: u16) -> Result<(usize, PacketHeader)> {
        let start = offset as usize;
        let mut raw = [0u8; PacketHeader::SIZE];
        if start + PacketHeader::SIZE > context.window_size() {
            return Err(Error::PayloadTooLarge);
        }
        let base = context.rx_offset() + start;
        self.shmem.read(base, &mut raw)?;
        let header = PacketHeader::decode(&raw)?;
        if start + header.packet_len() > context.window_size() {
            warn!(
                "Packet {} at {offset:#x} overruns {context:?} window",
                tag_str(&header.tag())
            );
            return Err(Error::PayloadTooLarge);
        }
        Ok((base, header))
    }

    fn handle_ack(&self, context: Context, offset: u16) -> Result<()> {
        let (depth, continuation) = self.channels.get(context).lock().pop_frame()?;
        trace!("Ack in {context:?} depth {depth}");

        let Some(continuation) = continuation else {
            return Ok(());
        };

        // The reply follows the echoed header and input
        let reply = self.read_packet(context, offset).and_then(|(base, header)| {
            self.shmem.read_vec(
                base + PacketHeader::SIZE + header.in_len as usize,
                header.out_len as usize,
            )
        });
        let response = match reply {
            Ok(response) => response,
            Err(e) => {
                warn!("Unreadable reply on {context:?}: {e:?}");
                Vec::new()
            }
        };
        self.resume(continuation, &response);
        Ok(())
    }

    fn handle_callback(&self, context: Context, offset: u16, length: u32) -> Result<()> {
        let (base, header) = self.read_packet(context, offset)?;
        let tag = header.tag();
        let Some(callback) = parse_tag(&tag).and_then(Callback::from_number) else {
            warn!("Ignoring unknown callback {} on {context:?}", tag_str(&tag));
            return Ok(());
        };

        let input = self
            .shmem
            .read_vec(base + PacketHeader::SIZE, header.in_len as usize)?;
        let output = base + PacketHeader::SIZE + header.in_len as usize;
        let output_len = header.out_len as usize;
        self.shmem.fill(output, output_len, 0)?;

        let end = offset as u32 + align_packet(length as usize) as u32;
        let depth = self
            .channels
            .get(context)
            .lock()
            .push_frame(None, output, output_len, end)?;
        trace!("Callback {callback:?} on {context:?} depth {depth}");

        let reply = self.dispatch(context, callback, &input);
        match reply.disposition {
            Disposition::AckNow => {
                let len = reply.output.len().min(output_len);
                if reply.output.len() > output_len {
                    warn!(
                        "{callback:?} reply of {} bytes truncated to {output_len}",
                        reply.output.len()
                    );
                }
                self.shmem.write(output, &reply.output[..len])?;
                self.ack(context)
            }
            Disposition::Reject => {
                warn!("Rejected {callback:?} on {context:?}");
                self.ack(context)
            }
            Disposition::AckDeferred(method) => {
                debug!("{callback:?} waits on {}", method.name());
                Ok(())
            }
        }
    }

    /// Write a boolean reply into the output of the open callback on `context`
    pub(crate) fn reply_bool(&self, context: Context, value: bool) -> Result<()> {
        let output = {
            let channel = self.channels.get(context).lock();
            match channel.top() {
                Some(frame) if frame.output_len != 0 => frame.output,
                Some(_) => return Ok(()),
                None => return Err(Error::StackUnderflow),
            }
        };
        self.shmem.write(output, &[value as u8])
    }

    fn resume(&self, continuation: Continuation, response: &[u8]) {
        match continuation {
            Continuation::Start(step) => self.start_step(step, response),
            Continuation::Boot { step, context } => self.boot_step(step, context),
            Continuation::AckCallback { context, reply } => {
                let result = match reply {
                    Some(value) => self
                        .reply_bool(context, value)
                        .and_then(|_| self.ack(context)),
                    None => self.ack(context),
                };
                if let Err(e) = result {
                    error!("Failed to finish deferred callback on {context:?}: {e:?}");
                }
            }
            Continuation::PowerOn { step, done } => self.poweron_step(step, done),
            Continuation::Swap(step) => self.swap_step(step, response),
            Continuation::Signal(done) => {
                let value = u32::from_bytes(response).unwrap_or(0);
                done.complete(value);
            }
        }
    }

    /// Wait for `done`, failing at once if the coprocessor crashes meanwhile.
    #[cfg(feature = "async")]
    pub(crate) async fn wait_for<W: crate::client::Waiter>(
        &self,
        waiter: &W,
        done: &Completion,
        timeout_ms: u32,
    ) -> Result<u32> {
        if self.is_crashed() {
            return Err(Error::Crashed);
        }
        self.waits.lock().push(done.clone());
        let outcome = waiter.wait(done, timeout_ms).await;
        self.waits.lock().retain(|w| !w.same(done));
        outcome
    }
}

/// Printable form of a tag for logs
pub(crate) fn tag_str(tag: &[u8; 4]) -> &str {
    core::str::from_utf8(tag).unwrap_or("????")
}
