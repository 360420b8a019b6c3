//! Frame presentation: modesets and swaps.
//!
//! A swap is two calls.  `swap_start` hands back the coprocessor's swap id, and
//! `swap_submit` presents the surfaces under that id.  The coprocessor reports the frame
//! on screen with a swap-complete callback.
//!
//! Whenever a swap cannot be presented, a frame-complete is synthesized through
//! [`DisplayEvents::vblank()`](crate::io::DisplayEvents::vblank) so the display subsystem
//! never waits for one the coprocessor will not send.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use alloc::boxed::Box;
#[cfg(feature = "async")]
use alloc::vec::Vec;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::channel::ShmemIo;
use crate::client::Completion;
use crate::dcp::{Continuation, Dcp};
use crate::io::{DisplayMode, Platform};
use crate::proto::{
    BACKGROUND_BLACK, LayerMask, Method, SetDigitalOutModeReq, SwapStartReq, SwapStartResp,
    SwapSubmitReq, SwapSubmitResp,
};
use crate::wire::Wire;
use crate::{Error, Result};

#[cfg(feature = "async")]
use crate::channel::Context;
#[cfg(feature = "async")]
use crate::client::Waiter;
#[cfg(feature = "async")]
use crate::proto::{Rect, SWAP_SURFACES, Surface};

/// Backlight power level sent with a brightness change
#[cfg(feature = "async")]
const BACKLIGHT_POWER_ON: u8 = 0x40;

/// Presentation bookkeeping
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SwapState {
    /// The boot framebuffer has been cleared away by the first flush
    pub surfaces_cleared: bool,
    /// Id of the most recently started swap
    pub last_swap_id: u32,
    /// Id of the most recent swap reported on screen
    pub last_completed: u32,
}

/// Swap call that has just been acked
#[derive(Debug)]
pub enum SwapStep {
    /// `swap_start`.  `req` is submitted once the swap id is known.
    Started {
        req: Box<SwapSubmitReq>,
        done: Option<Completion>,
    },
    /// `swap_submit`
    Submitted {
        swap_id: u32,
        done: Option<Completion>,
    },
}

/// A request that clears every surface, paints the background black and turns the
/// backlight off.
pub fn clear_all_request() -> SwapSubmitReq {
    let mut req = SwapSubmitReq::empty();
    req.swap.swap_enabled = LayerMask::SET_BACKGROUND | LayerMask::ALL_SURFACES;
    req.swap.swap_completed = req.swap.swap_enabled;
    req.swap.bg_color = BACKGROUND_BLACK;
    req.swap.bl_unk = 1;
    req.swap.bl_value = 0;
    req.swap.bl_power = 0;
    req
}

/// One surface to present
#[cfg(feature = "async")]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layer {
    pub surface: Surface,
    /// Device address of the first byte of the surface
    pub iova: u64,
    pub src: Rect,
    /// Destination, relative to the usable area below any notch
    pub dst: Rect,
}

/// Everything the display subsystem knows about a commit
#[cfg(feature = "async")]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushRequest {
    /// Planes bound to this display, in order.  `None` for a plane without a
    /// framebuffer.
    pub planes: Vec<Option<Layer>>,
    /// Mode to program when a modeset is needed, from the advertised list
    pub mode: Option<DisplayMode>,
    pub mode_changed: bool,
    pub color_mgmt_changed: bool,
    pub enabled: bool,
    pub active: bool,
    pub planes_changed: bool,
}

impl<S: ShmemIo, P: Platform> Dcp<S, P> {
    /// Present `req`: `swap_start`, then `swap_submit` once the swap id is known.
    ///
    /// `done` completes with the swap id when the submit is acked, whatever its status.
    pub fn submit_swap(&self, req: SwapSubmitReq, done: Option<Completion>) -> Result<()> {
        let start = SwapStartReq::default();
        self.call::<_, SwapStartResp>(
            Method::SwapStart,
            &start,
            Some(Continuation::Swap(SwapStep::Started {
                req: Box::new(req),
                done,
            })),
        )
    }

    /// Issue `set_digital_out_mode` for `mode`.  The returned completion finishes when
    /// the coprocessor has switched.
    pub fn start_modeset(&self, mode: &DisplayMode) -> Result<Completion> {
        info!(
            "set_digital_out_mode(color:{} timing:{})",
            mode.color_mode_id, mode.timing_mode_id
        );
        let req = SetDigitalOutModeReq {
            color_mode_id: mode.color_mode_id,
            timing_mode_id: mode.timing_mode_id,
        };
        let done = Completion::new();
        self.call::<_, u32>(
            Method::SetDigitalOutMode,
            &req,
            Some(Continuation::Signal(done.clone())),
        )?;
        Ok(done)
    }

    pub(crate) fn swap_step(&self, step: SwapStep, response: &[u8]) {
        match step {
            SwapStep::Started { mut req, done } => {
                let swap_id = match SwapStartResp::from_bytes(response) {
                    Ok(resp) => resp.swap_id,
                    Err(e) => {
                        error!("Unreadable swap_start reply: {e:?}");
                        self.abandon_swap(done, e);
                        return;
                    }
                };
                trace!("Swap {swap_id} started");
                req.swap.swap_id = swap_id;
                self.swap.lock().last_swap_id = swap_id;

                let submitted = self.call::<SwapSubmitReq, SwapSubmitResp>(
                    Method::SwapSubmit,
                    &*req,
                    Some(Continuation::Swap(SwapStep::Submitted {
                        swap_id,
                        done: done.clone(),
                    })),
                );
                if let Err(e) = submitted {
                    error!("Failed to submit swap {swap_id}: {e:?}");
                    self.abandon_swap(done, e);
                }
            }
            SwapStep::Submitted { swap_id, done } => {
                let resp = match SwapSubmitResp::from_bytes(response) {
                    Ok(resp) => resp,
                    Err(e) => {
                        error!("Unreadable swap_submit reply for swap {swap_id}: {e:?}");
                        self.abandon_swap(done, e);
                        return;
                    }
                };
                if let Some(done) = done {
                    done.complete(swap_id);
                }
                if resp.ret != 0 {
                    error!("Swap {swap_id} failed with status {}", resp.ret);
                    self.platform().vblank();
                } else {
                    trace!("Swap {swap_id} submitted");
                }
            }
        }
    }

    fn abandon_swap(&self, done: Option<Completion>, e: Error) {
        if let Some(done) = done {
            done.fail(e);
        }
        self.platform().vblank();
    }

    /// Connector state reported by the coprocessor
    pub(crate) fn hotplug(&self, connected: bool) {
        let changed = {
            let mut display = self.display.lock();
            // Power changes on built-in panels produce spurious reports
            if display.main_display {
                trace!("Ignoring hotplug on main display");
                return;
            }
            if !connected {
                display.valid_mode = false;
            }
            let changed = display.connected != connected;
            if changed {
                display.connected = connected;
                display.valid_mode = false;
            }
            changed
        };

        info!("Hotplug: {}", if connected { "connected" } else { "disconnected" });
        // No swap completes after an unplug until the next modeset
        if !connected {
            self.platform().vblank();
        }
        if changed {
            self.platform().hotplug(connected);
        }
    }

    pub(crate) fn swap_complete(&self, swap_id: u32) {
        trace!("Swap {swap_id} complete");
        self.swap.lock().last_completed = swap_id;
        self.platform().vblank();
    }

    /// Presentation bookkeeping snapshot
    pub fn swap_state(&self) -> SwapState {
        self.swap.lock().clone()
    }
}

#[cfg(feature = "async")]
impl<S: ShmemIo, P: Platform> Dcp<S, P> {
    /// Build the swap for `request`.  Returns it along with whether any surface is
    /// presented.
    fn prepare_swap(&self, request: &FlushRequest) -> (SwapSubmitReq, bool) {
        let mut req = SwapSubmitReq::empty();

        {
            let mut swap = self.swap.lock();
            if !swap.surfaces_cleared {
                // The boot framebuffer lingers in surface 0 otherwise
                req.swap.swap_enabled = LayerMask::SET_BACKGROUND | LayerMask::ALL_SURFACES;
                req.swap.bg_color = BACKGROUND_BLACK;
                swap.surfaces_cleared = true;
            }
        }

        let notch_height = self.config().notch_height;
        let mut has_surface = false;

        // Surface 0 is not used
        if request.planes.len() > SWAP_SURFACES - 1 {
            warn!(
                "{} planes requested, only {} presented",
                request.planes.len(),
                SWAP_SURFACES - 1
            );
        }
        for (index, plane) in (1..SWAP_SURFACES).zip(request.planes.iter()) {
            req.swap.swap_enabled |= LayerMask::surface(index);
            let Some(layer) = plane else {
                continue;
            };
            has_surface = true;
            req.surf_null[index] = false;
            req.swap.src_rect[index] = layer.src;
            req.swap.dst_rect[index] = Rect {
                y: layer.dst.y + notch_height,
                ..layer.dst
            };
            req.surf_iova[index] = layer.iova;
            req.surf[index] = Surface {
                surface_id: req.swap.surf_ids[index],
                ..layer.surface.clone()
            };
        }

        (req, has_surface)
    }

    /// Present one commit.
    ///
    /// Programs the mode first if it changed or was never set, waiting for the
    /// coprocessor to switch.  Returns `Ok` once the swap is issued, or when there is
    /// nothing to present.  Every `Err` is reported after a frame-complete has been
    /// synthesized: [`Error::ChannelBusy`] when a command is still outstanding,
    /// [`Error::NotReady`] when a modeset is needed but no mode was given, or the
    /// failure of the modeset or swap itself.
    pub async fn flush<W: Waiter>(&self, waiter: &W, request: &FlushRequest) -> Result<()> {
        if self.is_busy(Context::Cmd) {
            error!("Command channel busy at flush");
            self.platform().vblank();
            return Err(Error::ChannelBusy);
        }

        let (mut req, has_surface) = self.prepare_swap(request);

        let modeset = request.mode_changed || !self.display.lock().valid_mode;
        if modeset {
            let Some(mode) = request.mode else {
                warn!("Modeset needed, but no mode given");
                self.platform().vblank();
                return Err(Error::NotReady);
            };
            let waited = match self.start_modeset(&mode) {
                Ok(done) => {
                    self.wait_for(waiter, &done, self.config().timeouts.modeset_ms)
                        .await
                }
                Err(e) => Err(e),
            };
            if let Err(e) = waited {
                debug!("set_digital_out_mode failed: {e:?}");
                self.platform().vblank();
                return Err(e);
            }
            self.display.lock().valid_mode = true;
        }

        if !has_surface && !request.color_mgmt_changed {
            if request.enabled && request.active && !request.planes_changed {
                trace!("Nothing to present");
                self.platform().vblank();
                return Ok(());
            }
            req.swap.swap_enabled |= LayerMask::SET_BACKGROUND;
            req.swap.bg_color = BACKGROUND_BLACK;
            req.clear = 1;
        }

        // Must match
        req.swap.swap_completed = req.swap.swap_enabled;

        {
            let mut display = self.display.lock();
            if !display.connected {
                drop(display);
                // Any brightness change waits for a swap that reaches the panel
                trace!("Not connected, skipping swap");
                self.platform().vblank();
                return Ok(());
            }
            if display.brightness.update {
                req.swap.bl_unk = 1;
                req.swap.bl_value = display.brightness.dac;
                req.swap.bl_power = BACKLIGHT_POWER_ON;
                display.brightness.update = false;
            }
        }

        self.submit_swap(req, None).inspect_err(|e| {
            error!("Failed to start swap: {e:?}");
            self.platform().vblank();
        })
    }
}
