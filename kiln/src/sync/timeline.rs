// Copyright (c) 2026 The kiln developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

use crate::{
    device::{Device, DeviceOwned},
    macros::impl_id_counter,
    VulkanError, VulkanObject,
};
use ash::vk;
use std::{
    fmt,
    num::NonZero,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

/// A monotonically increasing counter on the GPU timeline.
///
/// Submissions signal the semaphore to a new value once they complete. The host can poll the
/// current value, block until a value is reached, or signal a value itself.
pub struct TimelineSemaphore {
    handle: vk::Semaphore,
    device: Arc<Device>,
    id: NonZero<u64>,

    // Highest value observed so far. The counter never decreases, so any value at or below this
    // one is known to be reached without asking the device.
    observed_value: AtomicU64,
}

impl TimelineSemaphore {
    /// Creates a new `TimelineSemaphore` whose counter starts at `initial_value`.
    pub fn new(device: Arc<Device>, initial_value: u64) -> Result<Arc<Self>, VulkanError> {
        let handle = device.raw().create_timeline_semaphore(initial_value)?;
        tracing::debug!(?handle, initial_value, "created timeline semaphore");

        Ok(Arc::new(TimelineSemaphore {
            handle,
            device,
            id: Self::next_id(),
            observed_value: AtomicU64::new(initial_value),
        }))
    }

    /// Returns the current value of the counter. Never blocks.
    pub fn value(&self) -> Result<u64, VulkanError> {
        // SAFETY: `self.handle` is a timeline semaphore owned by `self`.
        let value = unsafe { self.device.raw().semaphore_counter_value(self.handle) }?;
        let previous = self.observed_value.fetch_max(value, Ordering::AcqRel);
        debug_assert!(previous <= value, "timeline semaphore counter went backwards");

        Ok(value)
    }

    /// Returns `true` if the counter has reached `value`. Never blocks.
    #[inline]
    pub fn is_reached(&self, value: u64) -> Result<bool, VulkanError> {
        if self.observed_value.load(Ordering::Acquire) >= value {
            return Ok(true);
        }

        Ok(self.value()? >= value)
    }

    /// Blocks the calling thread until the counter reaches `value`.
    ///
    /// With a `timeout` of `None` the wait is unbounded. Returns [`VulkanError::Timeout`] if the
    /// timeout elapses first.
    pub fn wait_for(&self, value: u64, timeout: Option<Duration>) -> Result<(), VulkanError> {
        if self.observed_value.load(Ordering::Acquire) >= value {
            return Ok(());
        }

        // SAFETY: `self.handle` is a timeline semaphore owned by `self`.
        unsafe { self.device.raw().wait_semaphore(self.handle, value, timeout) }?;
        self.observed_value.fetch_max(value, Ordering::AcqRel);

        Ok(())
    }

    /// Signals `value` from the host.
    ///
    /// Does nothing if the counter is already at or past `value`.
    pub fn signal(&self, value: u64) -> Result<(), VulkanError> {
        if self.value()? >= value {
            return Ok(());
        }

        // SAFETY: `self.handle` is a timeline semaphore owned by `self`, and `value` is greater
        // than its current value.
        unsafe { self.device.raw().signal_semaphore(self.handle, value) }?;
        self.observed_value.fetch_max(value, Ordering::AcqRel);

        Ok(())
    }
}

impl Drop for TimelineSemaphore {
    #[inline]
    fn drop(&mut self) {
        // SAFETY: The semaphore is owned by `self` and the `Arc`s handed to sync points and
        // queues keep it alive while it can still be signaled.
        unsafe { self.device.raw().destroy_semaphore(self.handle) };
    }
}

unsafe impl VulkanObject for TimelineSemaphore {
    type Handle = vk::Semaphore;

    #[inline]
    fn handle(&self) -> Self::Handle {
        self.handle
    }
}

unsafe impl DeviceOwned for TimelineSemaphore {
    #[inline]
    fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl fmt::Debug for TimelineSemaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimelineSemaphore")
            .field("handle", &self.handle)
            .field("observed_value", &self.observed_value.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl_id_counter!(TimelineSemaphore);

/// A point on the GPU timeline: a semaphore and the value it holds once some work is complete.
///
/// Sync points are cheap to clone and are passed around instead of raw semaphores.
#[derive(Clone)]
pub struct SyncPoint {
    semaphore: Arc<TimelineSemaphore>,
    value: u64,
}

impl SyncPoint {
    #[inline]
    pub fn new(semaphore: Arc<TimelineSemaphore>, value: u64) -> Self {
        SyncPoint { semaphore, value }
    }

    #[inline]
    pub fn semaphore(&self) -> &Arc<TimelineSemaphore> {
        &self.semaphore
    }

    #[inline]
    pub fn value(&self) -> u64 {
        self.value
    }

    /// Returns `true` if the work behind this sync point has completed. Never blocks.
    #[inline]
    pub fn is_ready(&self) -> Result<bool, VulkanError> {
        self.semaphore.is_reached(self.value)
    }

    /// Blocks the calling thread until the work behind this sync point has completed.
    #[inline]
    pub fn wait_for_ready(&self) -> Result<(), VulkanError> {
        self.semaphore.wait_for(self.value, None)
    }

    /// Same as [`wait_for_ready`](Self::wait_for_ready), but gives up after `timeout`.
    #[inline]
    pub fn wait_for_ready_timeout(&self, timeout: Duration) -> Result<(), VulkanError> {
        self.semaphore.wait_for(self.value, Some(timeout))
    }
}

impl PartialEq for SyncPoint {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.semaphore == other.semaphore && self.value == other.value
    }
}

impl Eq for SyncPoint {}

impl fmt::Debug for SyncPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncPoint")
            .field("semaphore", &self.semaphore.handle)
            .field("value", &self.value)
            .finish()
    }
}
