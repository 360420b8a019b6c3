//! Start-up, boot and power sequencing.
//!
//! Each sequence is a fixed chain of host calls.  Every call carries a
//! [`Continuation`] naming the step it belongs to, and the step issues the next call when
//! the previous one is acked.  A call that fails to send stalls its chain; the stall
//! shows up as the caller's bounded wait timing out.
//!
//! - Start-up: runs once the coprocessor reports INITIALIZED and finishes by marking the
//!   transport active.
//! - Boot: started by the coprocessor's boot callback, which stays open until the chain
//!   has finished.
//! - Power on, power off and shutdown: issued by the display subsystem.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::Result;
use crate::channel::{Context, ShmemIo};
use crate::client::Completion;
use crate::dcp::{Continuation, Dcp};
use crate::io::Platform;
use crate::proto::{
    GetColorRemapModeReq, GetColorRemapModeResp, Method, SetParameterDcp, SetPowerStateReq,
    SetPowerStateResp,
};
use crate::wire::Wire;

#[cfg(feature = "async")]
use crate::Error;
#[cfg(feature = "async")]
use crate::client::Waiter;

/// Colour remap mode queried during start-up
const COLOR_REMAP_MODE: u32 = 6;

/// `set_display_device` handle for the built-in panel
#[cfg(feature = "async")]
const DISPLAY_DEVICE_MAIN: u32 = 0;

/// `set_display_device` handle for an external display
#[cfg(feature = "async")]
const DISPLAY_DEVICE_EXTERNAL: u32 = 2;

/// `set_parameter_dcp` parameter sent when powering on an external display
const PARAM_EXTERNAL_POWER: u32 = 14;

/// Start-up call that has just been acked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartStep {
    StartSignal,
    ColorRemapMode,
    VideoPowerSavings,
    FirstClientOpen,
    IsMainDisplay,
}

/// Boot call that has just been acked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootStep {
    SetCreateDfb,
    CreateDefaultFb,
    SetupVideoLimits,
    FlushSupportsPower,
    LateInit,
    RefreshProperties,
}

/// Power-on call that has just been acked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerStep {
    DisplayDevice,
    Parameter,
    PowerState,
}

impl<S: ShmemIo, P: Platform> Dcp<S, P> {
    /// The coprocessor is up.  Begin the start-up handshake.
    pub(crate) fn on_initialized(&self) -> Result<()> {
        info!("Display coprocessor initialized");
        self.call::<(), u32>(
            Method::StartSignal,
            &(),
            Some(Continuation::Start(StartStep::StartSignal)),
        )
    }

    pub(crate) fn start_step(&self, step: StartStep, response: &[u8]) {
        debug!("Start-up step {step:?} done");
        let next = match step {
            StartStep::StartSignal => {
                info!("Display coprocessor booted");
                let req = GetColorRemapModeReq {
                    mode: COLOR_REMAP_MODE,
                    mode_null: false,
                };
                self.call::<_, GetColorRemapModeResp>(
                    Method::GetColorRemapMode,
                    &req,
                    Some(Continuation::Start(StartStep::ColorRemapMode)),
                )
            }
            StartStep::ColorRemapMode => self.call::<u32, i32>(
                Method::EnableDisableVideoPowerSavings,
                &0,
                Some(Continuation::Start(StartStep::VideoPowerSavings)),
            ),
            StartStep::VideoPowerSavings => self.call::<(), ()>(
                Method::FirstClientOpen,
                &(),
                Some(Continuation::Start(StartStep::FirstClientOpen)),
            ),
            StartStep::FirstClientOpen => self.call::<(), u32>(
                Method::IsMainDisplay,
                &(),
                Some(Continuation::Start(StartStep::IsMainDisplay)),
            ),
            StartStep::IsMainDisplay => {
                self.finish_start(u32::from_bytes(response).unwrap_or(0));
                Ok(())
            }
        };
        if let Err(e) = next {
            error!("Start-up stalled after {step:?}: {e:?}");
        }
    }

    fn finish_start(&self, is_main: u32) {
        info!("is_main_display: {is_main}");
        let connected = {
            let mut display = self.display.lock();
            display.main_display = is_main != 0;
            display.connected = !display.modes.is_empty();
            display.connected
        };
        self.platform().hotplug(connected);
        self.set_active(true);
        self.start_done.complete(0);
    }

    /// Begin the boot chain for the boot callback open on `context`.  Returns the first
    /// method issued.
    pub(crate) fn boot_begin(&self, context: Context) -> Result<Method> {
        let method = Method::SetCreateDfb;
        self.call::<(), ()>(
            method,
            &(),
            Some(Continuation::Boot {
                step: BootStep::SetCreateDfb,
                context,
            }),
        )?;
        Ok(method)
    }

    pub(crate) fn boot_step(&self, step: BootStep, context: Context) {
        debug!("Boot step {step:?} done");
        let boot = |step| Some(Continuation::Boot { step, context });
        let next = match step {
            BootStep::SetCreateDfb => {
                self.call::<(), u32>(Method::CreateDefaultFb, &(), boot(BootStep::CreateDefaultFb))
            }
            BootStep::CreateDefaultFb => self.call::<(), ()>(
                Method::SetupVideoLimits,
                &(),
                boot(BootStep::SetupVideoLimits),
            ),
            BootStep::SetupVideoLimits => self.call::<u32, ()>(
                Method::FlushSupportsPower,
                &1,
                boot(BootStep::FlushSupportsPower),
            ),
            BootStep::FlushSupportsPower => {
                self.call::<(), u32>(Method::LateInitSignal, &(), boot(BootStep::LateInit))
            }
            BootStep::LateInit => self.call::<(), u32>(
                Method::SetDisplayRefreshProperties,
                &(),
                boot(BootStep::RefreshProperties),
            ),
            BootStep::RefreshProperties => {
                info!("Boot chain complete");
                self.reply_bool(context, true)
                    .and_then(|_| self.ack(context))
            }
        };
        if let Err(e) = next {
            error!("Boot chain stalled after {step:?}: {e:?}");
        }
    }

    pub(crate) fn poweron_step(&self, step: PowerStep, done: Completion) {
        debug!("Power-on step {step:?} done");
        let main_display = self.display.lock().main_display;
        let next = match step {
            PowerStep::DisplayDevice if main_display => self.power_state(1, done),
            PowerStep::DisplayDevice => {
                let param = SetParameterDcp {
                    param: PARAM_EXTERNAL_POWER,
                    count: 1,
                    ..Default::default()
                };
                self.call::<_, u32>(
                    Method::SetParameterDcp,
                    &param,
                    Some(Continuation::PowerOn {
                        step: PowerStep::Parameter,
                        done,
                    }),
                )
            }
            PowerStep::Parameter => self.power_state(1, done),
            PowerStep::PowerState => {
                done.complete(0);
                Ok(())
            }
        };
        if let Err(e) = next {
            error!("Power-on stalled after {step:?}: {e:?}");
        }
    }

    fn power_state(&self, state: u64, done: Completion) -> Result<()> {
        let req = SetPowerStateReq {
            unklong: state,
            ..Default::default()
        };
        self.call::<_, SetPowerStateResp>(
            Method::SetPowerState,
            &req,
            Some(Continuation::PowerOn {
                step: PowerStep::PowerState,
                done,
            }),
        )
    }

    /// Going down.  Marks the transport inactive and tells the coprocessor, without
    /// waiting for an answer.
    pub fn shutdown(&self) -> Result<()> {
        info!("Shutting down display coprocessor");
        self.set_active(false);
        self.display.lock().valid_mode = false;
        self.call::<_, SetPowerStateResp>(Method::SetPowerState, &SetPowerStateReq::default(), None)
    }
}

#[cfg(feature = "async")]
impl<S: ShmemIo, P: Platform> Dcp<S, P> {
    /// Wait until the start-up handshake has finished.
    ///
    /// `timeout_ms` defaults to the configured `ready_ms`.
    pub async fn wait_ready<W: Waiter>(&self, waiter: &W, timeout_ms: Option<u32>) -> Result<()> {
        if self.is_crashed() {
            return Err(Error::Crashed);
        }
        if self.is_active() {
            return Ok(());
        }
        let timeout_ms = timeout_ms.unwrap_or(self.config().timeouts.ready_ms);
        match self.wait_for(waiter, &self.start_done, timeout_ms).await {
            Ok(_) if self.is_active() => Ok(()),
            Ok(_) => Err(Error::NotReady),
            Err(e) => {
                warn!("Display coprocessor not ready: {e:?}");
                Err(e)
            }
        }
    }

    /// Power the display on.  A slow coprocessor is only warned about, as the display
    /// usually comes up regardless.
    pub async fn poweron<W: Waiter>(&self, waiter: &W) -> Result<()> {
        let handle = if self.display.lock().main_display {
            DISPLAY_DEVICE_MAIN
        } else {
            DISPLAY_DEVICE_EXTERNAL
        };
        debug!("Powering on display device {handle}");

        let done = Completion::new();
        self.call::<u32, u32>(
            Method::SetDisplayDevice,
            &handle,
            Some(Continuation::PowerOn {
                step: PowerStep::DisplayDevice,
                done: done.clone(),
            }),
        )?;

        let timeout_ms = self.config().timeouts.poweron_ms;
        match self.wait_for(waiter, &done, timeout_ms).await {
            Ok(_) => (),
            Err(Error::Timeout) => warn!("Power on timed out after {timeout_ms} ms"),
            Err(e) => return Err(e),
        }

        // The coprocessor forgets the backlight level across power changes
        self.display.lock().brightness.update = true;
        Ok(())
    }

    /// Power the display off.
    ///
    /// All surfaces are cleared and the backlight turned off first, so the next power on
    /// restores the brightness.  If the clear is not acknowledged in time the
    /// coprocessor is treated as crashed.
    pub async fn poweroff<W: Waiter>(&self, waiter: &W) -> Result<()> {
        debug!("Powering off display");
        let timeouts = self.config().timeouts;

        let cleared = Completion::new();
        self.submit_swap(crate::swap::clear_all_request(), Some(cleared.clone()))?;
        match self.wait_for(waiter, &cleared, timeouts.clear_swap_ms).await {
            Ok(swap_id) => debug!("Clear swap {swap_id} submitted"),
            Err(e) => {
                error!("Clear swap not acknowledged: {e:?}");
                self.set_crashed();
                return Err(e);
            }
        }

        let off = Completion::new();
        let req = SetPowerStateReq {
            unklong: 0,
            ..Default::default()
        };
        self.call::<_, SetPowerStateResp>(
            Method::SetPowerState,
            &req,
            Some(Continuation::Signal(off.clone())),
        )?;
        match self.wait_for(waiter, &off, timeouts.poweroff_ms).await {
            Ok(_) => debug!("set_power_state(0) done"),
            Err(Error::Timeout) => {
                warn!("set_power_state(0) timed out after {} ms", timeouts.poweroff_ms)
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }
}
