//! Method tags and typed request/response structures.
//!
//! Layouts are the coprocessor firmware's packed structures, field for field.  Fields the
//! host never inspects are encoded as zero and skipped on decode.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use alloc::vec;
use alloc::vec::Vec;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::wire::{Wire, WireReader, WireWriter};
use crate::{Error, Result};

/// Surfaces per swap
pub const SWAP_SURFACES: usize = 4;

/// Planes per surface
pub const MAX_PLANES: usize = 3;

/// Bytes carried by one chunk of a chunked property transfer
pub const CHUNK_DATA_SIZE: usize = 0x1000;

const KEY_SIZE: usize = 0x40;

/// Host-to-coprocessor methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    LateInitSignal,
    SetupVideoLimits,
    PmuServiceMatched,
    BacklightServiceMatched,
    SetCreateDfb,
    ViSetTemperatureHint,
    StartSignal,
    SwapStart,
    SwapSubmit,
    SetDisplayDevice,
    IsMainDisplay,
    SetDigitalOutMode,
    GetColorRemapMode,
    SetParameterDcp,
    CreateDefaultFb,
    EnableDisableVideoPowerSavings,
    FirstClientOpen,
    SetDisplayRefreshProperties,
    FlushSupportsPower,
    SetPowerState,
}

impl Method {
    /// Four character tag in reading order
    pub const fn tag(self) -> [u8; 4] {
        match self {
            Method::LateInitSignal => *b"A000",
            Method::SetupVideoLimits => *b"A029",
            Method::PmuServiceMatched => *b"A131",
            Method::BacklightServiceMatched => *b"A132",
            Method::SetCreateDfb => *b"A357",
            Method::ViSetTemperatureHint => *b"A358",
            Method::StartSignal => *b"A401",
            Method::SwapStart => *b"A407",
            Method::SwapSubmit => *b"A408",
            Method::SetDisplayDevice => *b"A410",
            Method::IsMainDisplay => *b"A411",
            Method::SetDigitalOutMode => *b"A412",
            Method::GetColorRemapMode => *b"A426",
            Method::SetParameterDcp => *b"A439",
            Method::CreateDefaultFb => *b"A443",
            Method::EnableDisableVideoPowerSavings => *b"A447",
            Method::FirstClientOpen => *b"A454",
            Method::SetDisplayRefreshProperties => *b"A460",
            Method::FlushSupportsPower => *b"A463",
            Method::SetPowerState => *b"A468",
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Method::LateInitSignal => "late_init_signal",
            Method::SetupVideoLimits => "setup_video_limits",
            Method::PmuServiceMatched => "pmu_service_matched",
            Method::BacklightServiceMatched => "backlight_service_matched",
            Method::SetCreateDfb => "set_create_dfb",
            Method::ViSetTemperatureHint => "vi_set_temperature_hint",
            Method::StartSignal => "start_signal",
            Method::SwapStart => "swap_start",
            Method::SwapSubmit => "swap_submit",
            Method::SetDisplayDevice => "set_display_device",
            Method::IsMainDisplay => "is_main_display",
            Method::SetDigitalOutMode => "set_digital_out_mode",
            Method::GetColorRemapMode => "get_color_remap_mode",
            Method::SetParameterDcp => "set_parameter_dcp",
            Method::CreateDefaultFb => "create_default_fb",
            Method::EnableDisableVideoPowerSavings => "enable_disable_video_power_savings",
            Method::FirstClientOpen => "first_client_open",
            Method::SetDisplayRefreshProperties => "set_display_refresh_properties",
            Method::FlushSupportsPower => "flush_supports_power",
            Method::SetPowerState => "set_power_state",
        }
    }
}

/// Compare a fourcc object name as sent on the wire (byte reversed) with its reading
/// order spelling, e.g. `obj_is(&req.obj, b"PMUS")`.
pub fn obj_is(obj: &[u8; 4], name: &[u8; 4]) -> bool {
    obj[0] == name[3] && obj[1] == name[2] && obj[2] == name[1] && obj[3] == name[0]
}

fn key_field(r: &mut WireReader<'_>) -> Result<[u8; KEY_SIZE]> {
    r.array::<KEY_SIZE>()
}

/// Rectangle as start coordinate plus size
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Wire for Rect {
    const SIZE: usize = 16;

    fn write_to(&self, w: &mut WireWriter) {
        w.u32(self.x);
        w.u32(self.y);
        w.u32(self.w);
        w.u32(self.h);
    }

    fn read_from(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            x: r.u32()?,
            y: r.u32()?,
            w: r.u32()?,
            h: r.u32()?,
        })
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IoUserClient {
    pub handle: u64,
    pub unk: u32,
    pub flag1: u8,
    pub flag2: u8,
}

impl Wire for IoUserClient {
    const SIZE: usize = 16;

    fn write_to(&self, w: &mut WireWriter) {
        w.u64(self.handle);
        w.u32(self.unk);
        w.u8(self.flag1);
        w.u8(self.flag2);
        w.zeros(2);
    }

    fn read_from(r: &mut WireReader<'_>) -> Result<Self> {
        let client = Self {
            handle: r.u64()?,
            unk: r.u32()?,
            flag1: r.u8()?,
            flag2: r.u8()?,
        };
        r.skip(2)?;
        Ok(client)
    }
}

bitflags::bitflags! {
    /// Layers touched by a swap (`swap_enabled` / `swap_completed`)
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct LayerMask: u32 {
        const SURFACE_0 = 1 << 0;
        const SURFACE_1 = 1 << 1;
        const SURFACE_2 = 1 << 2;
        const SURFACE_3 = 1 << 3;
        const ALL_SURFACES = 0xF;
        /// Apply the background colour.  Without it missing layers are assumed
        /// unchanged and keep their content.
        const SET_BACKGROUND = 1 << 31;
    }
}

impl LayerMask {
    pub fn surface(index: usize) -> Self {
        Self::from_bits_truncate(1 << index) & Self::ALL_SURFACES
    }
}

/// Opaque black
pub const BACKGROUND_BLACK: u32 = 0xFF00_0000;

/// Swap header
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Swap {
    pub swap_id: u32,
    pub surf_ids: [u32; SWAP_SURFACES],
    pub src_rect: [Rect; SWAP_SURFACES],
    pub surf_flags: [u32; SWAP_SURFACES],
    pub dst_rect: [Rect; SWAP_SURFACES],
    pub swap_enabled: LayerMask,
    pub swap_completed: LayerMask,
    pub bg_color: u32,
    pub bl_unk: u64,
    pub bl_value: u32,
    pub bl_power: u8,
}

impl Wire for Swap {
    const SIZE: usize = 0x320;

    fn write_to(&self, w: &mut WireWriter) {
        // ts1, ts2, unk_10[6], flags1, flags2
        w.zeros(80);
        w.u32(self.swap_id);
        self.surf_ids.iter().for_each(|v| w.u32(*v));
        self.src_rect.iter().for_each(|v| w.put(v));
        self.surf_flags.iter().for_each(|v| w.u32(*v));
        w.zeros(4 * SWAP_SURFACES);
        self.dst_rect.iter().for_each(|v| w.put(v));
        w.u32(self.swap_enabled.bits());
        w.u32(self.swap_completed.bits());
        w.u32(self.bg_color);
        // unk_110, unk_2c8, unk_2cc, unk_2e0, unk_2e4
        w.zeros(0x1b8 + 4 + 0x14 + 4 + 2);
        w.u64(self.bl_unk);
        w.u32(self.bl_value);
        w.u8(self.bl_power);
        w.zeros(0x2d);
    }

    fn read_from(r: &mut WireReader<'_>) -> Result<Self> {
        r.skip(80)?;
        let swap_id = r.u32()?;
        let mut swap = Swap {
            swap_id,
            ..Default::default()
        };
        for v in swap.surf_ids.iter_mut() {
            *v = r.u32()?;
        }
        for v in swap.src_rect.iter_mut() {
            *v = r.get()?;
        }
        for v in swap.surf_flags.iter_mut() {
            *v = r.u32()?;
        }
        r.skip(4 * SWAP_SURFACES)?;
        for v in swap.dst_rect.iter_mut() {
            *v = r.get()?;
        }
        swap.swap_enabled = LayerMask::from_bits_retain(r.u32()?);
        swap.swap_completed = LayerMask::from_bits_retain(r.u32()?);
        swap.bg_color = r.u32()?;
        r.skip(0x1b8 + 4 + 0x14 + 4 + 2)?;
        swap.bl_unk = r.u64()?;
        swap.bl_value = r.u32()?;
        swap.bl_power = r.u8()?;
        r.skip(0x2d)?;
        Ok(swap)
    }
}

/// Surface description, as prepared by the display subsystem.  Format codes are the
/// coprocessor's own fourccs; no conversion is done here.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Surface {
    pub is_tiled: bool,
    pub is_premultiplied: bool,
    pub opaque: bool,
    pub plane_cnt: u32,
    pub plane_cnt2: u32,
    pub format: u32,
    pub xfer_func: u8,
    pub colorspace: u8,
    pub stride: u32,
    pub pix_size: u16,
    pub pel_w: u8,
    pub pel_h: u8,
    pub offset: u32,
    pub width: u32,
    pub height: u32,
    pub buf_size: u32,
    pub surface_id: u32,
    pub has_comp: u64,
    pub has_planes: u64,
}

impl Wire for Surface {
    const SIZE: usize = 0x204;

    fn write_to(&self, w: &mut WireWriter) {
        w.bool(self.is_tiled);
        w.bool(self.is_premultiplied);
        w.bool(self.opaque);
        w.u32(self.plane_cnt);
        w.u32(self.plane_cnt2);
        w.u32(self.format);
        w.zeros(4);
        w.u8(self.xfer_func);
        w.u8(self.colorspace);
        w.u32(self.stride);
        w.u16(self.pix_size);
        w.u8(self.pel_w);
        w.u8(self.pel_h);
        w.u32(self.offset);
        w.u32(self.width);
        w.u32(self.height);
        w.u32(self.buf_size);
        w.zeros(8);
        w.u32(self.surface_id);
        // comp_types
        w.zeros(8 * MAX_PLANES);
        w.u64(self.has_comp);
        // planes
        w.zeros(80 * MAX_PLANES);
        w.u64(self.has_planes);
        // compression_info, has_compr_info, unk_1f5, padding
        w.zeros(13 * 4 * MAX_PLANES + 8 + 8 + 7);
    }

    fn read_from(r: &mut WireReader<'_>) -> Result<Self> {
        let is_tiled = r.bool()?;
        let is_premultiplied = r.bool()?;
        let opaque = r.bool()?;
        let plane_cnt = r.u32()?;
        let plane_cnt2 = r.u32()?;
        let format = r.u32()?;
        r.skip(4)?;
        let xfer_func = r.u8()?;
        let colorspace = r.u8()?;
        let stride = r.u32()?;
        let pix_size = r.u16()?;
        let pel_w = r.u8()?;
        let pel_h = r.u8()?;
        let offset = r.u32()?;
        let width = r.u32()?;
        let height = r.u32()?;
        let buf_size = r.u32()?;
        r.skip(8)?;
        let surface_id = r.u32()?;
        r.skip(8 * MAX_PLANES)?;
        let has_comp = r.u64()?;
        r.skip(80 * MAX_PLANES)?;
        let has_planes = r.u64()?;
        r.skip(13 * 4 * MAX_PLANES + 8 + 8 + 7)?;
        Ok(Self {
            is_tiled,
            is_premultiplied,
            opaque,
            plane_cnt,
            plane_cnt2,
            format,
            xfer_func,
            colorspace,
            stride,
            pix_size,
            pel_w,
            pel_h,
            offset,
            width,
            height,
            buf_size,
            surface_id,
            has_comp,
            has_planes,
        })
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SwapSubmitReq {
    pub swap: Swap,
    pub surf: [Surface; SWAP_SURFACES],
    pub surf_iova: [u64; SWAP_SURFACES],
    pub clear: u32,
    pub swap_null: bool,
    pub surf_null: [bool; SWAP_SURFACES],
}

impl SwapSubmitReq {
    /// An empty swap: no surfaces attached
    pub fn empty() -> Self {
        Self {
            surf_null: [true; SWAP_SURFACES],
            ..Default::default()
        }
    }
}

impl Wire for SwapSubmitReq {
    const SIZE: usize = 0xB64;

    fn write_to(&self, w: &mut WireWriter) {
        w.put(&self.swap);
        self.surf.iter().for_each(|s| w.put(s));
        self.surf_iova.iter().for_each(|v| w.u64(*v));
        // unkbool, unkdouble
        w.zeros(1 + 8);
        w.u32(self.clear);
        w.bool(self.swap_null);
        self.surf_null.iter().for_each(|v| w.bool(*v));
        // unkoutbool_null, padding
        w.zeros(2);
    }

    fn read_from(r: &mut WireReader<'_>) -> Result<Self> {
        let mut req = Self {
            swap: r.get()?,
            ..Default::default()
        };
        for s in req.surf.iter_mut() {
            *s = r.get()?;
        }
        for v in req.surf_iova.iter_mut() {
            *v = r.u64()?;
        }
        r.skip(9)?;
        req.clear = r.u32()?;
        req.swap_null = r.bool()?;
        for v in req.surf_null.iter_mut() {
            *v = r.bool()?;
        }
        r.skip(2)?;
        Ok(req)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SwapSubmitResp {
    pub unkoutbool: u8,
    pub ret: u32,
}

impl Wire for SwapSubmitResp {
    const SIZE: usize = 8;

    fn write_to(&self, w: &mut WireWriter) {
        w.u8(self.unkoutbool);
        w.u32(self.ret);
        w.zeros(3);
    }

    fn read_from(r: &mut WireReader<'_>) -> Result<Self> {
        let resp = Self {
            unkoutbool: r.u8()?,
            ret: r.u32()?,
        };
        r.skip(3)?;
        Ok(resp)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SwapStartReq {
    pub swap_id: u32,
    pub client: IoUserClient,
    pub swap_id_null: bool,
    pub client_null: bool,
}

impl Wire for SwapStartReq {
    const SIZE: usize = 24;

    fn write_to(&self, w: &mut WireWriter) {
        w.u32(self.swap_id);
        w.put(&self.client);
        w.bool(self.swap_id_null);
        w.bool(self.client_null);
        w.zeros(2);
    }

    fn read_from(r: &mut WireReader<'_>) -> Result<Self> {
        let req = Self {
            swap_id: r.u32()?,
            client: r.get()?,
            swap_id_null: r.bool()?,
            client_null: r.bool()?,
        };
        r.skip(2)?;
        Ok(req)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SwapStartResp {
    pub swap_id: u32,
    pub client: IoUserClient,
    pub ret: u32,
}

impl Wire for SwapStartResp {
    const SIZE: usize = 24;

    fn write_to(&self, w: &mut WireWriter) {
        w.u32(self.swap_id);
        w.put(&self.client);
        w.u32(self.ret);
    }

    fn read_from(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            swap_id: r.u32()?,
            client: r.get()?,
            ret: r.u32()?,
        })
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SetDigitalOutModeReq {
    pub color_mode_id: u32,
    pub timing_mode_id: u32,
}

impl Wire for SetDigitalOutModeReq {
    const SIZE: usize = 8;

    fn write_to(&self, w: &mut WireWriter) {
        w.u32(self.color_mode_id);
        w.u32(self.timing_mode_id);
    }

    fn read_from(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            color_mode_id: r.u32()?,
            timing_mode_id: r.u32()?,
        })
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SetPowerStateReq {
    pub unklong: u64,
    pub unkbool: u8,
    pub unkint_null: u8,
}

impl Wire for SetPowerStateReq {
    const SIZE: usize = 12;

    fn write_to(&self, w: &mut WireWriter) {
        w.u64(self.unklong);
        w.u8(self.unkbool);
        w.u8(self.unkint_null);
        w.zeros(2);
    }

    fn read_from(r: &mut WireReader<'_>) -> Result<Self> {
        let req = Self {
            unklong: r.u64()?,
            unkbool: r.u8()?,
            unkint_null: r.u8()?,
        };
        r.skip(2)?;
        Ok(req)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SetPowerStateResp {
    pub unkint: u32,
    pub ret: u32,
}

impl Wire for SetPowerStateResp {
    const SIZE: usize = 8;

    fn write_to(&self, w: &mut WireWriter) {
        w.u32(self.unkint);
        w.u32(self.ret);
    }

    fn read_from(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            unkint: r.u32()?,
            ret: r.u32()?,
        })
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SetParameterDcp {
    pub param: u32,
    pub value: [u32; 8],
    pub count: u32,
}

impl Wire for SetParameterDcp {
    const SIZE: usize = 40;

    fn write_to(&self, w: &mut WireWriter) {
        w.u32(self.param);
        self.value.iter().for_each(|v| w.u32(*v));
        w.u32(self.count);
    }

    fn read_from(r: &mut WireReader<'_>) -> Result<Self> {
        let param = r.u32()?;
        let mut value = [0u32; 8];
        for v in value.iter_mut() {
            *v = r.u32()?;
        }
        Ok(Self {
            param,
            value,
            count: r.u32()?,
        })
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GetColorRemapModeReq {
    pub mode: u32,
    pub mode_null: bool,
}

impl Wire for GetColorRemapModeReq {
    const SIZE: usize = 8;

    fn write_to(&self, w: &mut WireWriter) {
        w.u32(self.mode);
        w.bool(self.mode_null);
        w.zeros(3);
    }

    fn read_from(r: &mut WireReader<'_>) -> Result<Self> {
        let req = Self {
            mode: r.u32()?,
            mode_null: r.bool()?,
        };
        r.skip(3)?;
        Ok(req)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GetColorRemapModeResp {
    pub mode: u32,
    pub ret: u32,
}

impl Wire for GetColorRemapModeResp {
    const SIZE: usize = 8;

    fn write_to(&self, w: &mut WireWriter) {
        w.u32(self.mode);
        w.u32(self.ret);
    }

    fn read_from(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            mode: r.u32()?,
            ret: r.u32()?,
        })
    }
}

// Callback structures

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MapBufReq {
    pub buffer: u64,
    pub unk: u8,
    pub buf_null: u8,
    pub vaddr_null: u8,
    pub dva_null: u8,
}

impl Wire for MapBufReq {
    const SIZE: usize = 12;

    fn write_to(&self, w: &mut WireWriter) {
        w.u64(self.buffer);
        w.u8(self.unk);
        w.u8(self.buf_null);
        w.u8(self.vaddr_null);
        w.u8(self.dva_null);
    }

    fn read_from(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            buffer: r.u64()?,
            unk: r.u8()?,
            buf_null: r.u8()?,
            vaddr_null: r.u8()?,
            dva_null: r.u8()?,
        })
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MapBufResp {
    pub vaddr: u64,
    pub dva: u64,
    pub ret: u32,
}

impl Wire for MapBufResp {
    const SIZE: usize = 20;

    fn write_to(&self, w: &mut WireWriter) {
        w.u64(self.vaddr);
        w.u64(self.dva);
        w.u32(self.ret);
    }

    fn read_from(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            vaddr: r.u64()?,
            dva: r.u64()?,
            ret: r.u32()?,
        })
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UnmapBufReq {
    pub buffer: u64,
    pub vaddr: u64,
    pub dva: u64,
    pub unk: u8,
    pub buf_null: u8,
}

impl Wire for UnmapBufReq {
    const SIZE: usize = 26;

    fn write_to(&self, w: &mut WireWriter) {
        w.u64(self.buffer);
        w.u64(self.vaddr);
        w.u64(self.dva);
        w.u8(self.unk);
        w.u8(self.buf_null);
    }

    fn read_from(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            buffer: r.u64()?,
            vaddr: r.u64()?,
            dva: r.u64()?,
            unk: r.u8()?,
            buf_null: r.u8()?,
        })
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AllocateBufferReq {
    pub unk0: u32,
    pub size: u64,
    pub unk2: u32,
    pub paddr_null: u8,
    pub dva_null: u8,
    pub dva_size_null: u8,
}

impl Wire for AllocateBufferReq {
    const SIZE: usize = 20;

    fn write_to(&self, w: &mut WireWriter) {
        w.u32(self.unk0);
        w.u64(self.size);
        w.u32(self.unk2);
        w.u8(self.paddr_null);
        w.u8(self.dva_null);
        w.u8(self.dva_size_null);
        w.zeros(1);
    }

    fn read_from(r: &mut WireReader<'_>) -> Result<Self> {
        let req = Self {
            unk0: r.u32()?,
            size: r.u64()?,
            unk2: r.u32()?,
            paddr_null: r.u8()?,
            dva_null: r.u8()?,
            dva_size_null: r.u8()?,
        };
        r.skip(1)?;
        Ok(req)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AllocateBufferResp {
    pub paddr: u64,
    pub dva: u64,
    pub dva_size: u64,
    pub mem_desc_id: u32,
}

impl Wire for AllocateBufferResp {
    const SIZE: usize = 28;

    fn write_to(&self, w: &mut WireWriter) {
        w.u64(self.paddr);
        w.u64(self.dva);
        w.u64(self.dva_size);
        w.u32(self.mem_desc_id);
    }

    fn read_from(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            paddr: r.u64()?,
            dva: r.u64()?,
            dva_size: r.u64()?,
            mem_desc_id: r.u32()?,
        })
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MapPhysicalReq {
    pub paddr: u64,
    pub size: u64,
    pub flags: u32,
    pub dva_null: u8,
    pub dva_size_null: u8,
}

impl Wire for MapPhysicalReq {
    const SIZE: usize = 24;

    fn write_to(&self, w: &mut WireWriter) {
        w.u64(self.paddr);
        w.u64(self.size);
        w.u32(self.flags);
        w.u8(self.dva_null);
        w.u8(self.dva_size_null);
        w.zeros(2);
    }

    fn read_from(r: &mut WireReader<'_>) -> Result<Self> {
        let req = Self {
            paddr: r.u64()?,
            size: r.u64()?,
            flags: r.u32()?,
            dva_null: r.u8()?,
            dva_size_null: r.u8()?,
        };
        r.skip(2)?;
        Ok(req)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MapPhysicalResp {
    pub dva: u64,
    pub dva_size: u64,
    pub mem_desc_id: u32,
}

impl Wire for MapPhysicalResp {
    const SIZE: usize = 20;

    fn write_to(&self, w: &mut WireWriter) {
        w.u64(self.dva);
        w.u64(self.dva_size);
        w.u32(self.mem_desc_id);
    }

    fn read_from(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            dva: r.u64()?,
            dva_size: r.u64()?,
            mem_desc_id: r.u32()?,
        })
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MapRegReq {
    pub obj: [u8; 4],
    pub index: u32,
    pub flags: u32,
    pub addr_null: u8,
    pub length_null: u8,
}

impl Wire for MapRegReq {
    const SIZE: usize = 16;

    fn write_to(&self, w: &mut WireWriter) {
        w.bytes(&self.obj);
        w.u32(self.index);
        w.u32(self.flags);
        w.u8(self.addr_null);
        w.u8(self.length_null);
        w.zeros(2);
    }

    fn read_from(r: &mut WireReader<'_>) -> Result<Self> {
        let req = Self {
            obj: r.array()?,
            index: r.u32()?,
            flags: r.u32()?,
            addr_null: r.u8()?,
            length_null: r.u8()?,
        };
        r.skip(2)?;
        Ok(req)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MapRegResp {
    pub addr: u64,
    pub length: u64,
    pub ret: u32,
}

impl Wire for MapRegResp {
    const SIZE: usize = 20;

    fn write_to(&self, w: &mut WireWriter) {
        w.u64(self.addr);
        w.u64(self.length);
        w.u32(self.ret);
    }

    fn read_from(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            addr: r.u64()?,
            length: r.u64()?,
            ret: r.u32()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetUintPropReq {
    pub obj: [u8; 4],
    pub key: [u8; KEY_SIZE],
    pub value: u64,
    pub value_null: u8,
}

impl Wire for GetUintPropReq {
    const SIZE: usize = 80;

    fn write_to(&self, w: &mut WireWriter) {
        w.bytes(&self.obj);
        w.bytes(&self.key);
        w.u64(self.value);
        w.u8(self.value_null);
        w.zeros(3);
    }

    fn read_from(r: &mut WireReader<'_>) -> Result<Self> {
        let req = Self {
            obj: r.array()?,
            key: key_field(r)?,
            value: r.u64()?,
            value_null: r.u8()?,
        };
        r.skip(3)?;
        Ok(req)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GetUintPropResp {
    pub value: u64,
    pub ret: u8,
}

impl Wire for GetUintPropResp {
    const SIZE: usize = 12;

    fn write_to(&self, w: &mut WireWriter) {
        w.u64(self.value);
        w.u8(self.ret);
        w.zeros(3);
    }

    fn read_from(r: &mut WireReader<'_>) -> Result<Self> {
        let resp = Self {
            value: r.u64()?,
            ret: r.u8()?,
        };
        r.skip(3)?;
        Ok(resp)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetFxPropReq {
    pub obj: [u8; 4],
    pub key: [u8; KEY_SIZE],
    pub value: u32,
}

impl Wire for SetFxPropReq {
    const SIZE: usize = 72;

    fn write_to(&self, w: &mut WireWriter) {
        w.bytes(&self.obj);
        w.bytes(&self.key);
        w.u32(self.value);
    }

    fn read_from(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            obj: r.array()?,
            key: key_field(r)?,
            value: r.u32()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SrSetPropertyIntReq {
    pub obj: [u8; 4],
    pub key: [u8; KEY_SIZE],
    pub value: u64,
    pub value_null: u8,
}

impl Wire for SrSetPropertyIntReq {
    const SIZE: usize = 80;

    fn write_to(&self, w: &mut WireWriter) {
        w.bytes(&self.obj);
        w.bytes(&self.key);
        w.u64(self.value);
        w.u8(self.value_null);
        w.zeros(3);
    }

    fn read_from(r: &mut WireReader<'_>) -> Result<Self> {
        let req = Self {
            obj: r.array()?,
            key: key_field(r)?,
            value: r.u64()?,
            value_null: r.u8()?,
        };
        r.skip(3)?;
        Ok(req)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadEdtDataReq {
    pub key: [u8; KEY_SIZE],
    pub count: u32,
    pub value: [u32; 8],
}

impl Wire for ReadEdtDataReq {
    const SIZE: usize = 100;

    fn write_to(&self, w: &mut WireWriter) {
        w.bytes(&self.key);
        w.u32(self.count);
        self.value.iter().for_each(|v| w.u32(*v));
    }

    fn read_from(r: &mut WireReader<'_>) -> Result<Self> {
        let key = key_field(r)?;
        let count = r.u32()?;
        let mut value = [0u32; 8];
        for v in value.iter_mut() {
            *v = r.u32()?;
        }
        Ok(Self { key, count, value })
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReadEdtDataResp {
    pub value: [u32; 8],
    pub ret: u8,
}

impl Wire for ReadEdtDataResp {
    const SIZE: usize = 33;

    fn write_to(&self, w: &mut WireWriter) {
        self.value.iter().for_each(|v| w.u32(*v));
        w.u8(self.ret);
    }

    fn read_from(r: &mut WireReader<'_>) -> Result<Self> {
        let mut value = [0u32; 8];
        for v in value.iter_mut() {
            *v = r.u32()?;
        }
        Ok(Self {
            value,
            ret: r.u8()?,
        })
    }
}

/// One chunk of a chunked property transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropChunkReq {
    pub data: Vec<u8>,
    pub offset: u32,
    pub length: u32,
}

impl PropChunkReq {
    /// The valid part of `data`.  A length beyond the fixed chunk size is rejected.
    pub fn payload(&self) -> Result<&[u8]> {
        match self.data.get(..self.length as usize) {
            Some(payload) => Ok(payload),
            None => {
                warn!(
                    "Chunk claims {} bytes, at most {} carried",
                    self.length,
                    self.data.len()
                );
                Err(Error::ChunkRejected)
            }
        }
    }
}

impl Wire for PropChunkReq {
    const SIZE: usize = CHUNK_DATA_SIZE + 8;

    fn write_to(&self, w: &mut WireWriter) {
        let len = self.data.len().min(CHUNK_DATA_SIZE);
        w.bytes(&self.data[..len]);
        w.zeros(CHUNK_DATA_SIZE - len);
        w.u32(self.offset);
        w.u32(self.length);
    }

    fn read_from(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            data: r.bytes(CHUNK_DATA_SIZE)?.to_vec(),
            offset: r.u32()?,
            length: r.u32()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropEndReq {
    pub key: [u8; KEY_SIZE],
}

impl PropEndReq {
    pub fn new(key: &str) -> Self {
        let mut field = [0u8; KEY_SIZE];
        let len = key.len().min(KEY_SIZE);
        field[..len].copy_from_slice(&key.as_bytes()[..len]);
        Self { key: field }
    }
}

impl Wire for PropEndReq {
    const SIZE: usize = KEY_SIZE;

    fn write_to(&self, w: &mut WireWriter) {
        w.bytes(&self.key);
    }

    fn read_from(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self { key: key_field(r)? })
    }
}

/// Real-time bandwidth registers reported to the coprocessor
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RtBandwidth {
    pub unk1: u64,
    pub reg_scratch: u64,
    pub reg_doorbell: u64,
    pub unk2: u32,
    pub doorbell_bit: u32,
    pub padding: [u32; 7],
}

impl Wire for RtBandwidth {
    const SIZE: usize = 60;

    fn write_to(&self, w: &mut WireWriter) {
        w.u64(self.unk1);
        w.u64(self.reg_scratch);
        w.u64(self.reg_doorbell);
        w.u32(self.unk2);
        w.u32(self.doorbell_bit);
        self.padding.iter().for_each(|v| w.u32(*v));
    }

    fn read_from(r: &mut WireReader<'_>) -> Result<Self> {
        let mut bw = Self {
            unk1: r.u64()?,
            reg_scratch: r.u64()?,
            reg_doorbell: r.u64()?,
            unk2: r.u32()?,
            doorbell_bit: r.u32()?,
            padding: [0; 7],
        };
        for v in bw.padding.iter_mut() {
            *v = r.u32()?;
        }
        Ok(bw)
    }
}

/// Swap complete notification
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SwapComplete {
    pub swap_id: u32,
    pub unkbool: u8,
    pub swap_data: u64,
}

const SWAP_INFO_SIZE: usize = 0x6c4;

impl Wire for SwapComplete {
    const SIZE: usize = 4 + 1 + 8 + SWAP_INFO_SIZE + 4 + 1;

    fn write_to(&self, w: &mut WireWriter) {
        w.u32(self.swap_id);
        w.u8(self.unkbool);
        w.u64(self.swap_data);
        w.zeros(SWAP_INFO_SIZE + 4 + 1);
    }

    fn read_from(r: &mut WireReader<'_>) -> Result<Self> {
        let resp = Self {
            swap_id: r.u32()?,
            unkbool: r.u8()?,
            swap_data: r.u64()?,
        };
        r.skip(SWAP_INFO_SIZE + 4 + 1)?;
        Ok(resp)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SwapCompleteIntentGated {
    pub swap_id: u32,
    pub unk_bool: u8,
    pub unk_int: u32,
    pub width: u32,
    pub height: u32,
}

impl Wire for SwapCompleteIntentGated {
    const SIZE: usize = 17;

    fn write_to(&self, w: &mut WireWriter) {
        w.u32(self.swap_id);
        w.u8(self.unk_bool);
        w.u32(self.unk_int);
        w.u32(self.width);
        w.u32(self.height);
    }

    fn read_from(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            swap_id: r.u32()?,
            unk_bool: r.u8()?,
            unk_int: r.u32()?,
            width: r.u32()?,
            height: r.u32()?,
        })
    }
}

/// Property published by the coprocessor
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Property {
    pub id: u32,
    pub value: u32,
}

/// Panel brightness in nits, scaled
pub const PROPERTY_NITS: u32 = 15;

impl Wire for Property {
    const SIZE: usize = 8;

    fn write_to(&self, w: &mut WireWriter) {
        w.u32(self.id);
        w.u32(self.value);
    }

    fn read_from(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            id: r.u32()?,
            value: r.u32()?,
        })
    }
}

/// Build a request for a string-keyed property callback, for tests and simulation
pub fn keyed(obj: &[u8; 4], key: &str) -> ([u8; 4], [u8; KEY_SIZE]) {
    let wire_obj = [obj[3], obj[2], obj[1], obj[0]];
    let mut field = vec![0u8; KEY_SIZE];
    let len = key.len().min(KEY_SIZE);
    field[..len].copy_from_slice(&key.as_bytes()[..len]);
    let mut out = [0u8; KEY_SIZE];
    out.copy_from_slice(&field);
    (wire_obj, out)
}
