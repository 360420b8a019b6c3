//! Dispatch of coprocessor callbacks to typed handlers.
//!
//! Callback tags are three decimal digits followed by `D` on the wire, written here in
//! reading order (`D116`).  Each known number maps to a [`Callback`].  The handler for it
//! decodes the typed input, acts, and encodes the typed output, reporting through a
//! [`Disposition`] whether the callback can be acked straight away.
//!
//! Unknown tags are dropped without an ack.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use alloc::vec::Vec;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::channel::{Context, ShmemIo};
use crate::chunks::PropertyKey;
use crate::dcp::{Continuation, Dcp};
use crate::io::Platform;
use crate::proto;
use crate::proto::{
    AllocateBufferReq, AllocateBufferResp, GetUintPropReq, GetUintPropResp, MapBufReq,
    MapBufResp, MapPhysicalReq, MapPhysicalResp, MapRegReq, MapRegResp, Method, PROPERTY_NITS,
    PropChunkReq, PropEndReq, Property, ReadEdtDataReq, ReadEdtDataResp, RtBandwidth,
    SetFxPropReq, SrSetPropertyIntReq, UnmapBufReq, obj_is,
};
use crate::wire::{Wire, str_field};

/// Callback numbers are below this
pub const MAX_CALLBACK: u16 = 1000;

/// Status returned when the coprocessor asks to PIO-DMA map an invalid buffer
const EINVAL: u32 = 22;

// Offsets of the real-time bandwidth registers within their windows
const REG_SCRATCH: u64 = 0x14;
const REG_SCRATCH_T600X: u64 = 0x988;
const REG_DOORBELL: u64 = 0x0;
const REG_DOORBELL_BIT: u32 = 2;

/// Value reported for the mini-LED panel temperature query
const MINI_LED_TEMPERATURE: u64 = 3029;

/// Parse a callback tag, in reading order, into its number.
pub fn parse_tag(tag: &[u8; 4]) -> Option<u16> {
    if tag[0] != b'D' {
        return None;
    }
    let mut value: u16 = 0;
    for &digit in &tag[1..] {
        if !digit.is_ascii_digit() {
            return None;
        }
        value = value * 10 + (digit - b'0') as u16;
    }
    (value < MAX_CALLBACK).then_some(value)
}

/// Callbacks the host answers, numbered by tag
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Callback {
    DidBootSignal = 0,
    DidPowerOnSignal = 1,
    WillPowerOffSignal = 2,
    RtBandwidthSetup = 3,
    MatchPmuService = 100,
    GetDisplayDefaultStride = 101,
    SetNumberProperty = 102,
    SetBooleanProperty = 103,
    RemoveProperty = 106,
    CreateProviderService = 107,
    CreateProductService = 108,
    CreatePmuService = 109,
    CreateIomfbService = 110,
    CreateBacklightService = 111,
    StartBoot = 116,
    IsDarkBoot = 117,
    IsWakingFromHibernate = 118,
    ReadEdtData = 120,
    PropStart = 122,
    PropChunk = 123,
    PropEnd = 124,
    MapPiodma = 201,
    UnmapPiodma = 202,
    MatchPmuService2 = 206,
    MatchBacklightService = 207,
    GetTime = 208,
    UpdateBacklightFactor = 211,
    PrPublish = 300,
    GetUintProp = 401,
    SrSetUintProp = 404,
    SetFxProp = 406,
    GetFrequency = 408,
    MapReg = 411,
    SrSetPropertyDict = 413,
    SrSetPropertyInt = 414,
    SrSetPropertyBool = 415,
    AllocateBuffer = 451,
    MapPhysical = 452,
    ReleaseMemDesc = 456,
    SetPropertyDict0 = 552,
    SetPropertyDict = 561,
    SetPropertyInt = 563,
    SetPropertyBool = 565,
    SetPropertyStr = 567,
    PowerUpDart = 574,
    Hotplug = 576,
    PowerstateNotify = 577,
    CreateDefaultFbSurface = 582,
    SwapComplete = 589,
    SwapCompleteIntentGated = 591,
    EnableBacklightMessage = 593,
    FindSwapFunction = 598,
}

impl Callback {
    pub fn from_number(number: u16) -> Option<Self> {
        use Callback::*;
        let callback = match number {
            0 => DidBootSignal,
            1 => DidPowerOnSignal,
            2 => WillPowerOffSignal,
            3 => RtBandwidthSetup,
            100 => MatchPmuService,
            101 => GetDisplayDefaultStride,
            102 => SetNumberProperty,
            103 => SetBooleanProperty,
            106 => RemoveProperty,
            107 => CreateProviderService,
            108 => CreateProductService,
            109 => CreatePmuService,
            110 => CreateIomfbService,
            111 => CreateBacklightService,
            116 => StartBoot,
            117 => IsDarkBoot,
            118 => IsWakingFromHibernate,
            120 => ReadEdtData,
            122 => PropStart,
            123 => PropChunk,
            124 => PropEnd,
            201 => MapPiodma,
            202 => UnmapPiodma,
            206 => MatchPmuService2,
            207 => MatchBacklightService,
            208 => GetTime,
            211 => UpdateBacklightFactor,
            300 => PrPublish,
            401 => GetUintProp,
            404 => SrSetUintProp,
            406 => SetFxProp,
            408 => GetFrequency,
            411 => MapReg,
            413 => SrSetPropertyDict,
            414 => SrSetPropertyInt,
            415 => SrSetPropertyBool,
            451 => AllocateBuffer,
            452 => MapPhysical,
            456 => ReleaseMemDesc,
            552 => SetPropertyDict0,
            561 => SetPropertyDict,
            563 => SetPropertyInt,
            565 => SetPropertyBool,
            567 => SetPropertyStr,
            574 => PowerUpDart,
            576 => Hotplug,
            577 => PowerstateNotify,
            582 => CreateDefaultFbSurface,
            589 => SwapComplete,
            591 => SwapCompleteIntentGated,
            593 => EnableBacklightMessage,
            598 => FindSwapFunction,
            _ => return None,
        };
        Some(callback)
    }

    pub const fn number(self) -> u16 {
        self as u16
    }

    /// Tag in reading order
    pub fn tag(self) -> [u8; 4] {
        let n = self.number();
        [
            b'D',
            b'0' + (n / 100) as u8,
            b'0' + (n / 10 % 10) as u8,
            b'0' + (n % 10) as u8,
        ]
    }
}

/// When to ack a callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Write the output and ack now
    AckNow,
    /// A nested call has been issued; its continuation acks
    AckDeferred(Method),
    /// Input was unusable.  Acked with a zeroed output.
    Reject,
}

/// Outcome of a handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub disposition: Disposition,
    pub output: Vec<u8>,
}

impl Reply {
    fn ack<O: Wire>(output: &O) -> Self {
        Self {
            disposition: Disposition::AckNow,
            output: output.to_bytes(),
        }
    }

    fn empty() -> Self {
        Self::ack(&())
    }

    fn deferred(method: Method) -> Self {
        Self {
            disposition: Disposition::AckDeferred(method),
            output: Vec::new(),
        }
    }

    fn reject() -> Self {
        Self {
            disposition: Disposition::Reject,
            output: Vec::new(),
        }
    }
}

/// Decode the input, run the handler, encode its output
fn inout<I: Wire, O: Wire>(callback: Callback, input: &[u8], f: impl FnOnce(I) -> O) -> Reply {
    match I::from_bytes(input) {
        Ok(req) => Reply::ack(&f(req)),
        Err(e) => {
            warn!(
                "{callback:?}: {} byte input unusable: {e:?}",
                input.len()
            );
            Reply::reject()
        }
    }
}

/// Decode the input and run the handler, which has no output
fn input_only<I: Wire>(callback: Callback, input: &[u8], f: impl FnOnce(I)) -> Reply {
    inout(callback, input, |req: I| f(req))
}

impl<S: ShmemIo, P: Platform> Dcp<S, P> {
    pub(crate) fn dispatch(&self, context: Context, callback: Callback, input: &[u8]) -> Reply {
        use Callback::*;
        trace!("Callback {} {callback:?}", callback.number());
        match callback {
            DidBootSignal
            | DidPowerOnSignal
            | CreateProviderService
            | CreateProductService
            | CreatePmuService
            | CreateIomfbService
            | CreateBacklightService
            | SrSetPropertyDict
            | SrSetPropertyBool
            | SetPropertyDict0
            | SetPropertyDict
            | SetPropertyInt
            | SetPropertyBool
            | SetPropertyStr
            | CreateDefaultFbSurface => Reply::ack(&true),
            IsDarkBoot | IsWakingFromHibernate => Reply::ack(&false),
            GetDisplayDefaultStride | PowerUpDart => Reply::ack(&0u32),
            WillPowerOffSignal
            | SetNumberProperty
            | SetBooleanProperty
            | RemoveProperty
            | UpdateBacklightFactor
            | SrSetUintProp
            | PowerstateNotify
            | FindSwapFunction => Reply::empty(),

            RtBandwidthSetup => Reply::ack(&self.rt_bandwidth()),
            GetTime => Reply::ack(&self.platform().time()),
            GetFrequency => Reply::ack(&self.platform().frequency()),

            MatchPmuService => self.deferred_call(context, Method::ViSetTemperatureHint, None),
            MatchPmuService2 => {
                self.deferred_call(context, Method::PmuServiceMatched, Some(true))
            }
            MatchBacklightService => {
                self.deferred_call(context, Method::BacklightServiceMatched, Some(true))
            }
            StartBoot => match self.boot_begin(context) {
                Ok(method) => Reply::deferred(method),
                Err(e) => {
                    error!("Boot chain failed to start: {e:?}");
                    Reply::reject()
                }
            },

            ReadEdtData => inout(callback, input, |req: ReadEdtDataReq| ReadEdtDataResp {
                value: [req.value[0], 0, 0, 0, 0, 0, 0, 0],
                ret: 0,
            }),
            PropStart => inout(callback, input, |length: u32| {
                self.chunks.lock().start(length).is_ok()
            }),
            PropChunk => inout(callback, input, |req: PropChunkReq| {
                req.payload()
                    .and_then(|payload| self.chunks.lock().chunk(req.offset, payload))
                    .is_ok()
            }),
            PropEnd => inout(callback, input, |req: PropEndReq| self.prop_end(&req)),

            MapPiodma => inout(callback, input, |req: MapBufReq| self.map_piodma(&req)),
            UnmapPiodma => input_only(callback, input, |req: UnmapBufReq| {
                self.memdesc
                    .lock()
                    .unmap_piodma(self.platform(), req.buffer, req.dva)
            }),
            AllocateBuffer => {
                inout(callback, input, |req: AllocateBufferReq| self.allocate_buffer(&req))
            }
            MapPhysical => inout(callback, input, |req: MapPhysicalReq| self.map_physical(&req)),
            ReleaseMemDesc => inout(callback, input, |id: u32| {
                self.memdesc.lock().release(self.platform(), id).is_ok()
            }),
            MapReg => inout(callback, input, |req: MapRegReq| self.map_reg(&req)),

            PrPublish => input_only(callback, input, |prop: Property| self.pr_publish(prop)),
            GetUintProp => inout(callback, input, |req: GetUintPropReq| self.get_uint_prop(&req)),
            SetFxProp => input_only(callback, input, |req: SetFxPropReq| {
                trace!(
                    "set_fx_prop {:?} {:?} = {}",
                    req.obj,
                    str_field(&req.key),
                    req.value
                );
            }),
            SrSetPropertyInt => {
                inout(callback, input, |req: SrSetPropertyIntReq| self.set_property_int(&req))
            }

            Hotplug => input_only(callback, input, |connected: u64| {
                self.hotplug(connected != 0)
            }),
            SwapComplete => input_only(callback, input, |resp: proto::SwapComplete| {
                self.swap_complete(resp.swap_id)
            }),
            SwapCompleteIntentGated => {
                input_only(callback, input, |info: proto::SwapCompleteIntentGated| {
                    trace!(
                        "Swap {} complete intent {}x{}",
                        info.swap_id, info.width, info.height
                    );
                })
            }
            EnableBacklightMessage => input_only(callback, input, |_enabled: u8| {
                // The coprocessor loses track of the backlight level across power
                // changes.  Re-send it with the next swap.
                self.display.lock().brightness.update = true;
            }),
        }
    }

    /// Issue `method` from inside a callback, acking the callback when it completes.
    fn deferred_call(&self, context: Context, method: Method, reply: Option<bool>) -> Reply {
        let continuation = Continuation::AckCallback { context, reply };
        match self.call::<(), u32>(method, &(), Some(continuation)) {
            Ok(()) => Reply::deferred(method),
            Err(e) => {
                error!("Failed to issue {}: {e:?}", method.name());
                Reply::reject()
            }
        }
    }

    fn rt_bandwidth(&self) -> RtBandwidth {
        let regs = &self.config().registers;
        match (regs.get(4), regs.get(5), regs.get(6)) {
            (_, Some(scratch), Some(doorbell)) => {
                let mut padding = [0u32; 7];
                padding[3] = 4;
                RtBandwidth {
                    reg_scratch: scratch.start + REG_SCRATCH,
                    reg_doorbell: doorbell.start + REG_DOORBELL,
                    doorbell_bit: REG_DOORBELL_BIT,
                    padding,
                    ..Default::default()
                }
            }
            (Some(scratch), _, _) => RtBandwidth {
                reg_scratch: scratch.start + REG_SCRATCH_T600X,
                ..Default::default()
            },
            _ => RtBandwidth::default(),
        }
    }

    fn prop_end(&self, req: &PropEndReq) -> bool {
        // The accumulator is idle from here on, whatever happens to the blob
        let blob = match self.chunks.lock().end() {
            Ok(blob) => blob,
            Err(_) => return false,
        };
        let name = str_field(&req.key);
        match PropertyKey::from_name(name) {
            Some(PropertyKey::TimingElements) => {
                match self.platform().modes(&blob, self.config().notch_height) {
                    Ok(modes) => {
                        info!("{} display modes available", modes.len());
                        self.display.lock().modes = modes;
                        true
                    }
                    Err(e) => {
                        warn!("Failed to parse modes: {e:?}");
                        self.display.lock().modes.clear();
                        false
                    }
                }
            }
            Some(PropertyKey::DisplayAttributes) => {
                if !self.display.lock().main_display {
                    return true;
                }
                match self.platform().display_attributes(&blob) {
                    Ok(dimensions) => {
                        debug!("Panel {dimensions:?}");
                        self.display.lock().dimensions = dimensions;
                        true
                    }
                    Err(e) => {
                        warn!("Failed to parse display attributes: {e:?}");
                        false
                    }
                }
            }
            None => {
                debug!("Ignoring {} byte property {:?}", blob.len(), name);
                true
            }
        }
    }

    fn map_piodma(&self, req: &MapBufReq) -> MapBufResp {
        match self
            .memdesc
            .lock()
            .remap_for_piodma(self.platform(), req.buffer)
        {
            Ok(dva) => MapBufResp {
                dva,
                ..Default::default()
            },
            Err(_) => MapBufResp {
                ret: EINVAL,
                ..Default::default()
            },
        }
    }

    fn allocate_buffer(&self, req: &AllocateBufferReq) -> AllocateBufferResp {
        match self.memdesc.lock().allocate(self.platform(), req.size) {
            Ok(a) => AllocateBufferResp {
                paddr: a.buffer.paddr,
                dva: a.buffer.dva,
                dva_size: a.buffer.size,
                mem_desc_id: a.id,
            },
            Err(e) => {
                warn!("Failed to allocate {:#x} bytes: {e:?}", req.size);
                AllocateBufferResp::default()
            }
        }
    }

    fn map_physical(&self, req: &MapPhysicalReq) -> MapPhysicalResp {
        let mapped = self.memdesc.lock().map_physical(
            self.platform(),
            &self.config().registers,
            req.paddr,
            req.size,
        );
        match mapped {
            Ok(m) => MapPhysicalResp {
                dva: m.dva,
                dva_size: m.size,
                mem_desc_id: m.id,
            },
            Err(_) => MapPhysicalResp::default(),
        }
    }

    fn map_reg(&self, req: &MapRegReq) -> MapRegResp {
        match self.config().registers.get(req.index as usize) {
            Some(window) => MapRegResp {
                addr: window.start,
                length: window.size(),
                ret: 0,
            },
            None => {
                warn!("Attempted to read invalid register index {}", req.index);
                MapRegResp {
                    ret: 1,
                    ..Default::default()
                }
            }
        }
    }

    fn pr_publish(&self, prop: Property) {
        if prop.id == PROPERTY_NITS {
            let mut display = self.display.lock();
            let scale = display.brightness.scale;
            display.brightness.nits = prop.value.checked_div(scale).unwrap_or(0);
            debug!("Brightness {} nits", display.brightness.nits);
        } else {
            debug!("pr_publish: id {} = {}", prop.id, prop.value);
        }
    }

    fn get_uint_prop(&self, req: &GetUintPropReq) -> GetUintPropResp {
        if self.config().has_mini_led
            && obj_is(&req.obj, b"PMUS")
            && str_field(&req.key) == b"Temperature"
        {
            return GetUintPropResp {
                value: MINI_LED_TEMPERATURE,
                ret: 1,
            };
        }
        GetUintPropResp::default()
    }

    fn set_property_int(&self, req: &SrSetPropertyIntReq) -> u8 {
        if obj_is(&req.obj, b"IOMF")
            && str_field(&req.key) == b"Brightness_Scale"
            && req.value_null == 0
        {
            debug!("Brightness scale {}", req.value);
            self.display.lock().brightness.scale = req.value as u32;
        }
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_parse_in_reading_order() {
        assert_eq!(parse_tag(b"D116"), Some(116));
        assert_eq!(parse_tag(b"D000"), Some(0));
        assert_eq!(parse_tag(b"D999"), Some(999));
        assert_eq!(parse_tag(b"A116"), None);
        assert_eq!(parse_tag(b"D1x6"), None);
    }

    #[test]
    fn callback_numbers_match_tags() {
        for n in 0..MAX_CALLBACK {
            if let Some(cb) = Callback::from_number(n) {
                assert_eq!(cb.number(), n);
                assert_eq!(parse_tag(&cb.tag()), Some(n));
            }
        }
        assert_eq!(Callback::from_number(116), Some(Callback::StartBoot));
        assert_eq!(Callback::StartBoot.tag(), *b"D116");
        assert_eq!(Callback::from_number(999), None);
        assert_eq!(Callback::from_number(4), None);
    }
}
