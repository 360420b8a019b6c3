//! Bounded asynchronous waits - typically used by the display subsystem's commit path.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use alloc::boxed::Box;
use async_trait::async_trait;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::client::Completion;
use crate::{Error, Result};

/// Yield delay for async polling loops.
///
/// Application must provide an implementation of this trait in order for the
/// transport to be able to yield, waiting for the coprocessor to reply.
///
/// This trait keeps `dcp-rpc` free of any specific async runtime.
///
/// Example:
///
/// ```ignore
/// use embassy_time::{Duration, Timer};
/// struct Delay;
/// impl AsyncDelay for Delay {
///     const INTERVAL_MS: u32 = 1;
///     async fn delay() {
///         Timer::after(Duration::from_millis(1)).await;
///     }
/// }
/// ```
pub trait AsyncDelay {
    /// How long one call to [`AsyncDelay::delay()`] waits, in milliseconds
    const INTERVAL_MS: u32 = 1;

    fn delay() -> impl Future<Output = ()>;
}

/// Waits for a [`Completion`] to finish, for at most a bounded time.
#[async_trait(?Send)]
pub trait Waiter {
    /// Returns the completion's value, its failure, or [`Error::Timeout`].
    async fn wait(&self, completion: &Completion, timeout_ms: u32) -> Result<u32>;
}

/// [`Waiter`] that polls the completion between delays.
///
/// See [`AsyncDelay`] for required delay trait.
#[derive(Debug)]
pub struct PollingWaiter<D: AsyncDelay> {
    _delay: core::marker::PhantomData<D>,
}

impl<D: AsyncDelay> Default for PollingWaiter<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: AsyncDelay> PollingWaiter<D> {
    pub const fn new() -> Self {
        Self {
            _delay: core::marker::PhantomData,
        }
    }
}

#[async_trait(?Send)]
impl<D: AsyncDelay> Waiter for PollingWaiter<D> {
    async fn wait(&self, completion: &Completion, timeout_ms: u32) -> Result<u32> {
        let interval = D::INTERVAL_MS.max(1);
        let mut waited: u32 = 0;
        loop {
            if let Some(outcome) = completion.poll() {
                trace!("Wait finished after ~{waited} ms");
                return outcome;
            }
            if waited >= timeout_ms {
                return Err(Error::Timeout);
            }

            // Yield with reasonable delay to avoid spinning too fast
            D::delay().await;
            waited = waited.saturating_add(interval);
        }
    }
}
