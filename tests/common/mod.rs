//! Mock platform and scripted coprocessor shared by the integration tests.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use dcp_rpc::channel::{BufferShmem, Context, ShmemIo};
use dcp_rpc::client::DcpConfig;
use dcp_rpc::codec::{Message, PacketHeader};
use dcp_rpc::dcp::Dcp;
use dcp_rpc::io::{
    Clock, Dimensions, DisplayEvents, DisplayMode, DmaBuffer, DmaMapper, Mailbox,
    PropertyDecoder,
};
use dcp_rpc::memdesc::RegisterWindow;
use dcp_rpc::{Error, Result};

pub const SHMEM_DVA: u64 = 0x8_0000_0000;
pub const DISP_REGS: u64 = 0x2_3800_0000;
pub const NOW_MS: u64 = 1_700_000_000_000;
pub const REF_CLOCK_HZ: u64 = 24_000_000;

pub type TestDcp = Dcp<BufferShmem, MockPlatform>;

/// Records everything the transport asks of the host
#[derive(Default)]
pub struct MockPlatform {
    doorbells: Mutex<VecDeque<u64>>,
    vblanks: AtomicUsize,
    hotplugs: Mutex<Vec<bool>>,
    next_alloc: AtomicU64,
    freed: AtomicUsize,
    pub refuse_doorbells: AtomicBool,
}

impl MockPlatform {
    pub fn pop_doorbell(&self) -> Option<u64> {
        self.doorbells.lock().unwrap().pop_front()
    }

    pub fn pending_doorbells(&self) -> usize {
        self.doorbells.lock().unwrap().len()
    }

    pub fn vblanks(&self) -> usize {
        self.vblanks.load(Ordering::SeqCst)
    }

    pub fn hotplugs(&self) -> Vec<bool> {
        self.hotplugs.lock().unwrap().clone()
    }

    pub fn freed(&self) -> usize {
        self.freed.load(Ordering::SeqCst)
    }
}

impl Mailbox for MockPlatform {
    fn send(&self, word: u64) -> Result<()> {
        if self.refuse_doorbells.load(Ordering::SeqCst) {
            return Err(Error::Mailbox);
        }
        self.doorbells.lock().unwrap().push_back(word);
        Ok(())
    }
}

impl DmaMapper for MockPlatform {
    fn alloc_coherent(&self, size: u64) -> Result<DmaBuffer> {
        let base = self.next_alloc.fetch_add(size, Ordering::SeqCst);
        Ok(DmaBuffer {
            paddr: 0x10_0000_0000 + base,
            dva: 0x1_0000_0000 + base,
            size,
        })
    }

    fn free_coherent(&self, _buffer: &DmaBuffer) {
        self.freed.fetch_add(1, Ordering::SeqCst);
    }

    fn map_resource(&self, paddr: u64, _size: u64) -> Result<u64> {
        Ok(0x2_0000_0000 | (paddr & 0xFFFF_FFFF))
    }

    fn unmap_resource(&self, _dva: u64, _size: u64) {}

    fn map_piodma(&self, buffer: &DmaBuffer) -> Result<u64> {
        Ok(0x40_0000_0000 | buffer.dva)
    }

    fn unmap_piodma(&self, _buffer: &DmaBuffer, _dva: u64) {}
}

impl DisplayEvents for MockPlatform {
    fn vblank(&self) {
        self.vblanks.fetch_add(1, Ordering::SeqCst);
    }

    fn hotplug(&self, connected: bool) {
        self.hotplugs.lock().unwrap().push(connected);
    }
}

/// Test blobs are packed little-endian words: width, height, timing id, colour id per
/// mode; width and height in mm for attributes.
impl PropertyDecoder for MockPlatform {
    fn modes(&self, blob: &[u8], notch_height: u32) -> Result<Vec<DisplayMode>> {
        if blob.is_empty() || blob.len() % 16 != 0 {
            return Err(Error::Decode);
        }
        Ok(blob
            .chunks_exact(16)
            .map(|m| {
                let word = |i: usize| u32::from_le_bytes(m[i * 4..i * 4 + 4].try_into().unwrap());
                DisplayMode {
                    width: word(0),
                    height: word(1) - notch_height,
                    refresh: 60 << 16,
                    timing_mode_id: word(2),
                    color_mode_id: word(3),
                }
            })
            .collect())
    }

    fn display_attributes(&self, blob: &[u8]) -> Result<Dimensions> {
        if blob.len() < 8 {
            return Err(Error::Decode);
        }
        Ok(Dimensions {
            width_mm: u32::from_le_bytes(blob[0..4].try_into().unwrap()),
            height_mm: u32::from_le_bytes(blob[4..8].try_into().unwrap()),
        })
    }
}

impl Clock for MockPlatform {
    fn time(&self) -> u64 {
        NOW_MS
    }

    fn frequency(&self) -> u64 {
        REF_CLOCK_HZ
    }
}

pub fn config() -> DcpConfig {
    let mut config = DcpConfig::new(SHMEM_DVA);
    config.registers = vec![
        RegisterWindow::new(DISP_REGS, 0x40_0000).unwrap(),
        RegisterWindow::new(DISP_REGS + 0x100_0000, 0x4000).unwrap(),
    ];
    config
}

pub fn new_dcp(config: DcpConfig) -> TestDcp {
    Dcp::new(BufferShmem::new(), MockPlatform::default(), config).unwrap()
}

/// A host call as seen by the coprocessor
#[derive(Debug, Clone)]
pub struct Call {
    pub context: Context,
    pub offset: u16,
    pub tag: [u8; 4],
    pub input: Vec<u8>,
    pub out_len: usize,
}

pub fn next_doorbell(dcp: &TestDcp) -> Option<Message> {
    dcp.platform().pop_doorbell().map(Message::decode)
}

/// Read a host call announced by a doorbell
pub fn read_call(dcp: &TestDcp, message: Message) -> Call {
    let Message::Msg {
        context,
        offset,
        length,
        ack: false,
    } = message
    else {
        panic!("expected a host call, got {message:?}");
    };
    let context = Context::try_from(context).unwrap();
    let base = context.tx_offset().unwrap() + offset as usize;
    let raw = dcp.shmem().read_vec(base, PacketHeader::SIZE).unwrap();
    let header = PacketHeader::decode(&raw).unwrap();
    assert_eq!(header.packet_len(), length as usize);
    let input = dcp
        .shmem()
        .read_vec(base + PacketHeader::SIZE, header.in_len as usize)
        .unwrap();
    Call {
        context,
        offset,
        tag: header.tag(),
        input,
        out_len: header.out_len as usize,
    }
}

/// Next doorbell, which must be a host call
pub fn next_call(dcp: &TestDcp) -> Call {
    let message = next_doorbell(dcp).expect("no doorbell rung");
    read_call(dcp, message)
}

/// Answer `call`, echoing its packet into the receive window with `output` filled in.
pub fn reply(dcp: &TestDcp, call: &Call, output: &[u8]) -> Result<()> {
    let header = PacketHeader::new(call.tag, call.input.len() as u32, call.out_len as u32);
    let base = call.context.rx_offset() + call.offset as usize;
    let mut out = output.to_vec();
    out.resize(call.out_len, 0);
    dcp.shmem().write(base, &header.encode())?;
    dcp.shmem().write(base + PacketHeader::SIZE, &call.input)?;
    dcp.shmem()
        .write(base + PacketHeader::SIZE + call.input.len(), &out)?;
    dcp.handle_message(
        Message::Msg {
            context: call.context as u8,
            offset: call.offset,
            length: header.packet_len() as u32,
            ack: true,
        }
        .encode(),
    )
}

/// Deliver a callback at `offset` within `context`'s receive window.
pub fn callback(
    dcp: &TestDcp,
    context: Context,
    offset: u16,
    tag: &[u8; 4],
    input: &[u8],
    out_len: usize,
) -> Result<()> {
    let header = PacketHeader::new(*tag, input.len() as u32, out_len as u32);
    let base = context.rx_offset() + offset as usize;
    // Stale bytes the host must clear before the handler runs
    dcp.shmem()
        .fill(base + PacketHeader::SIZE + input.len(), out_len, 0xEE)?;
    dcp.shmem().write(base, &header.encode())?;
    dcp.shmem().write(base + PacketHeader::SIZE, input)?;
    dcp.handle_message(
        Message::Msg {
            context: context as u8,
            offset,
            length: header.packet_len() as u32,
            ack: false,
        }
        .encode(),
    )
}

/// Output area of a callback delivered with [`callback()`]
pub fn callback_output(
    dcp: &TestDcp,
    context: Context,
    offset: u16,
    in_len: usize,
    out_len: usize,
) -> Vec<u8> {
    let base = context.rx_offset() + offset as usize + PacketHeader::SIZE + in_len;
    dcp.shmem().read_vec(base, out_len).unwrap()
}

pub fn expect_ack(dcp: &TestDcp, context: Context) {
    assert_eq!(next_doorbell(dcp), Some(Message::ack(context)));
}

/// Run the start-up handshake to completion, reporting `is_main` from
/// `is_main_display`.
pub fn start(dcp: &TestDcp, is_main: u32) {
    dcp.start().unwrap();
    assert!(matches!(
        next_doorbell(dcp),
        Some(Message::SetShmem { dva: SHMEM_DVA })
    ));
    dcp.handle_message(Message::Initialized.encode()).unwrap();
    for tag in [b"A401", b"A426", b"A447", b"A454"] {
        let call = next_call(dcp);
        assert_eq!(&call.tag, tag);
        reply(dcp, &call, &[]).unwrap();
    }
    let call = next_call(dcp);
    assert_eq!(&call.tag, b"A411");
    reply(dcp, &call, &is_main.to_le_bytes()).unwrap();
    assert!(dcp.is_active());
}

/// Delay for [`dcp_rpc::client::PollingWaiter`] that blocks the thread.  Fine under
/// `pollster`, where the future is the only thing running.
#[cfg(feature = "async")]
pub struct SleepDelay;

#[cfg(feature = "async")]
impl dcp_rpc::client::AsyncDelay for SleepDelay {
    const INTERVAL_MS: u32 = 1;

    async fn delay() {
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[cfg(feature = "async")]
pub type Waiter = dcp_rpc::client::PollingWaiter<SleepDelay>;

/// A coprocessor running on its own thread, answering each host call with whatever
/// `respond` returns for its tag.  Callbacks the host acks are consumed silently.
pub struct Responder {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl Responder {
    pub fn spawn<F>(dcp: Arc<TestDcp>, respond: F) -> Self
    where
        F: Fn(&Call) -> Vec<u8> + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let calls = Arc::new(Mutex::new(Vec::new()));
        let handle = {
            let stop = stop.clone();
            let calls = calls.clone();
            std::thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    match next_doorbell(&dcp) {
                        Some(message @ Message::Msg { ack: false, .. }) => {
                            let call = read_call(&dcp, message);
                            let output = respond(&call);
                            reply(&dcp, &call, &output).unwrap();
                            // Only counted once the ack has been fully handled
                            calls.lock().unwrap().push(call);
                        }
                        Some(_) => (),
                        None => std::thread::sleep(Duration::from_micros(200)),
                    }
                }
            })
        };
        Self {
            stop,
            handle: Some(handle),
            calls,
        }
    }

    /// Tags answered so far
    pub fn tags(&self) -> Vec<[u8; 4]> {
        self.calls.lock().unwrap().iter().map(|c| c.tag).collect()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Wait until `n` calls have been answered
    pub fn wait_for_calls(&self, n: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.calls.lock().unwrap().len() < n {
            assert!(Instant::now() < deadline, "only saw {:?}", self.tags());
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    pub fn stop(mut self) -> Vec<Call> {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap();
        }
        self.calls()
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
