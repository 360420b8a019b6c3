//! Configuration, completions and bounded waits for users of the transport.
//!
//! - [`DcpConfig`] describes the platform the transport runs on.
//! - [`Completion`] is the one-shot signal continuations use to wake a waiting caller.
//! - With the `async` feature, [`futures`] provides the bounded waiting itself.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[cfg(feature = "async")]
pub mod futures;

#[cfg(feature = "async")]
pub use futures::{AsyncDelay, PollingWaiter, Waiter};

use alloc::sync::Arc;
use alloc::vec::Vec;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use spin::Mutex;

use crate::memdesc::{MAX_REGISTER_WINDOWS, RegisterWindow};
use crate::{Error, Result};

/// Bounded wait durations, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// `set_digital_out_mode` before a swap
    pub modeset_ms: u32,
    /// Power-on chain
    pub poweron_ms: u32,
    /// Clear-all-surfaces swap at power-off.  Missing this marks the coprocessor dead.
    pub clear_swap_ms: u32,
    /// `set_power_state(0)` at power-off
    pub poweroff_ms: u32,
    /// Used by [`crate::dcp::Dcp::wait_ready()`] when no explicit timeout is given
    pub ready_ms: u32,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            modeset_ms: 500,
            poweron_ms: 500,
            clear_swap_ms: 50,
            poweroff_ms: 1000,
            ready_ms: 2000,
        }
    }
}

/// Configuration for creating a [`crate::dcp::Dcp`].
#[derive(Debug, Clone, Default)]
pub struct DcpConfig {
    /// Device address of the shared-memory region
    pub shmem_dva: u64,
    /// OR-ed into the address advertised with SET_SHMEM
    pub dram_mask: u64,
    /// Display register windows the coprocessor may map.  Index order is significant:
    /// the coprocessor asks for windows by index.
    pub registers: Vec<RegisterWindow>,
    /// Whether this coprocessor drives the built-in panel.  Refined during start-up.
    pub main_display: bool,
    /// Panel is mini-LED, which needs a temperature answer during boot
    pub has_mini_led: bool,
    /// Height of the notch, in pixels, excluded from the usable area
    pub notch_height: u32,
    pub timeouts: Timeouts,
}

impl DcpConfig {
    pub fn new(shmem_dva: u64) -> Self {
        Self {
            shmem_dva,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.registers.len() > MAX_REGISTER_WINDOWS {
            error!(
                "{} display register windows configured, at most {MAX_REGISTER_WINDOWS} supported",
                self.registers.len()
            );
            return Err(Error::MappingRejected);
        }
        if let Some(bad) = self.registers.iter().find(|r| r.end < r.start) {
            error!("Empty display register window {bad:?}");
            return Err(Error::MappingRejected);
        }
        Ok(())
    }

    /// Address advertised to the coprocessor
    pub fn shmem_address(&self) -> u64 {
        self.shmem_dva | self.dram_mask
    }
}

/// State of a [`Completion`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum CompletionState {
    #[default]
    Pending,
    /// Completed, with an optional value such as a swap id
    Done(u32),
    Failed(Error),
}

/// One-shot signal shared between a waiting caller and the continuation that finishes
/// its call chain.  Cloning shares the signal.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    state: Arc<Mutex<CompletionState>>,
}

impl Completion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark done.  A completion that has already finished is left alone.
    pub fn complete(&self, value: u32) {
        let mut state = self.state.lock();
        if *state == CompletionState::Pending {
            *state = CompletionState::Done(value);
        }
    }

    /// Mark failed.  A completion that has already finished is left alone.
    pub fn fail(&self, error: Error) {
        let mut state = self.state.lock();
        if *state == CompletionState::Pending {
            *state = CompletionState::Failed(error);
        }
    }

    pub fn state(&self) -> CompletionState {
        *self.state.lock()
    }

    pub fn is_pending(&self) -> bool {
        self.state() == CompletionState::Pending
    }

    /// `None` while pending, otherwise the outcome
    pub fn poll(&self) -> Option<Result<u32>> {
        match self.state() {
            CompletionState::Pending => None,
            CompletionState::Done(value) => Some(Ok(value)),
            CompletionState::Failed(error) => Some(Err(error)),
        }
    }

    /// Re-arm for another use
    pub fn reset(&self) {
        *self.state.lock() = CompletionState::Pending;
    }

    /// Whether two handles share the same signal
    pub fn same(&self, other: &Completion) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn completion_finishes_once() {
        let done = Completion::new();
        let waiter = done.clone();
        assert_eq!(waiter.poll(), None);

        done.complete(42);
        done.fail(Error::Crashed);
        assert_eq!(waiter.poll(), Some(Ok(42)));
        assert!(done.same(&waiter));

        waiter.reset();
        assert!(done.is_pending());
        done.fail(Error::Crashed);
        assert_eq!(waiter.state(), CompletionState::Failed(Error::Crashed));
    }

    #[test]
    fn config_validation() {
        let mut config = DcpConfig::new(0x1_0000);
        config.dram_mask = 0x8_0000_0000;
        assert_eq!(config.shmem_address(), 0x8_0001_0000);
        assert_eq!(config.validate(), Ok(()));

        let window = RegisterWindow::new(0x1000, 0x1000).unwrap();
        config.registers = vec![window; MAX_REGISTER_WINDOWS + 1];
        assert_eq!(config.validate(), Err(Error::MappingRejected));

        config.registers = vec![RegisterWindow { start: 10, end: 5 }];
        assert_eq!(config.validate(), Err(Error::MappingRejected));
    }

    #[test]
    fn default_timeouts() {
        let t = Timeouts::default();
        assert_eq!((t.modeset_ms, t.clear_swap_ms, t.poweroff_ms), (500, 50, 1000));
    }
}
