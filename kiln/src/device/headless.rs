// Copyright (c) 2026 The kiln developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! A device that executes nothing.
//!
//! The headless device keeps everything kiln asks of it in memory: the commands recorded into
//! each command buffer, every submission with its semaphore operations, and the contents of host
//! buffers. Timeline semaphores are real counters; when the signal of a submission lands is
//! decided by the [`Completion`] policy.

use super::{DeviceProperties, HostBuffer, RawDevice, SemaphoreSubmitInfo, SubmitInfo};
use crate::{
    command_buffer::sys::RawCommand, descriptor_set::RawDescriptorWrite, DeviceSize,
    NonExhaustive, VulkanError,
};
use ash::vk::{self, Handle};
use foldhash::HashMap;
use parking_lot::{Condvar, Mutex};
use std::{
    fmt,
    ptr::NonNull,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

/// When the semaphore signals of a submission take effect.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Completion {
    /// Submitted work completes as soon as it is submitted.
    #[default]
    Immediate,

    /// Submitted work completes when [`HeadlessDevice::complete_all`] is called.
    ///
    /// A blocking wait on a value that is never completed only returns on timeout.
    Manual,

    /// Submitted work completes after the counter of its semaphore was polled this many times.
    ///
    /// A blocking wait completes it right away.
    AfterPolls(u32),
}

/// A [`RawDevice`] that records instead of executing.
pub struct HeadlessDevice {
    properties: DeviceProperties,
    next_handle: AtomicU64,
    state: Mutex<HeadlessState>,
    signaled: Condvar,
}

#[derive(Default)]
struct HeadlessState {
    completion: Completion,
    command_pools: HashMap<u64, Vec<vk::CommandBuffer>>,
    command_buffers: HashMap<u64, Vec<RawCommand>>,
    semaphores: HashMap<u64, SemaphoreState>,
    descriptor_pools: HashMap<u64, DescriptorPoolState>,
    descriptor_writes: HashMap<u64, Vec<RawDescriptorWrite>>,
    host_buffers: HashMap<u64, HostAllocation>,
    submissions: Vec<Submission>,
    submit_error: Option<VulkanError>,
}

#[derive(Default)]
struct SemaphoreState {
    value: u64,
    pending: Vec<PendingSignal>,
}

struct PendingSignal {
    value: u64,
    // `None` for signals completed by `complete_all`.
    polls_left: Option<u32>,
}

impl SemaphoreState {
    fn apply(&mut self, value: u64) {
        self.value = self.value.max(value);
    }

    fn poll(&mut self) {
        let mut landed = 0;

        self.pending.retain_mut(|signal| match &mut signal.polls_left {
            Some(0) => {
                landed = landed.max(signal.value);
                false
            }
            Some(polls_left) => {
                *polls_left -= 1;

                if *polls_left == 0 {
                    landed = landed.max(signal.value);
                    false
                } else {
                    true
                }
            }
            None => true,
        });

        self.apply(landed);
    }

    // Completes every signal that the device would eventually complete on its own.
    fn settle(&mut self) {
        let mut landed = 0;

        self.pending.retain(|signal| {
            if signal.polls_left.is_some() {
                landed = landed.max(signal.value);
                false
            } else {
                true
            }
        });

        self.apply(landed);
    }

    fn complete_all(&mut self) {
        let landed = self.pending.drain(..).map(|signal| signal.value).max();
        self.apply(landed.unwrap_or(0));
    }
}

#[derive(Clone, Copy)]
struct DescriptorPoolState {
    max_sets: u32,
    allocated: u32,
}

struct HostAllocation(NonNull<[u8]>);

// SAFETY: The allocation is plain memory, owned by the device until the buffer is destroyed.
unsafe impl Send for HostAllocation {}

impl HostAllocation {
    fn new(size: usize) -> Self {
        let boxed = vec![0u8; size].into_boxed_slice();

        HostAllocation(NonNull::from(Box::leak(boxed)))
    }

    fn as_ptr(&self) -> NonNull<u8> {
        self.0.cast()
    }

    fn to_vec(&self) -> Vec<u8> {
        // SAFETY: The allocation is live and `self.0.len()` bytes long.
        unsafe { self.0.as_ref() }.to_vec()
    }
}

impl Drop for HostAllocation {
    fn drop(&mut self) {
        // SAFETY: The pointer comes from `Box::leak` and is freed exactly once.
        drop(unsafe { Box::from_raw(self.0.as_ptr()) });
    }
}

/// One call to `queue_submit`, with the commands of its command buffers at submission time.
#[derive(Clone, Debug)]
pub struct Submission {
    pub queue: vk::Queue,
    pub wait_semaphores: Vec<SemaphoreSubmitInfo>,
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub signal_semaphores: Vec<SemaphoreSubmitInfo>,
    pub commands: Vec<RawCommand>,
}

impl Submission {
    /// Returns the number of recorded commands for which `predicate` is true.
    pub fn count(&self, predicate: impl Fn(&RawCommand) -> bool) -> usize {
        self.commands
            .iter()
            .filter(|&command| predicate(command))
            .count()
    }
}

impl HeadlessDevice {
    pub fn new(create_info: HeadlessDeviceCreateInfo) -> Self {
        let HeadlessDeviceCreateInfo {
            properties,
            completion,
            _ne: _,
        } = create_info;

        HeadlessDevice {
            properties,
            next_handle: AtomicU64::new(1),
            state: Mutex::new(HeadlessState {
                completion,
                ..Default::default()
            }),
            signaled: Condvar::new(),
        }
    }

    /// Mints a new, never reused handle.
    #[inline]
    pub fn next_handle<H: Handle>(&self) -> H {
        H::from_raw(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    /// Changes the completion policy of future submissions.
    #[inline]
    pub fn set_completion(&self, completion: Completion) {
        self.state.lock().completion = completion;
    }

    /// Makes the next submission fail with `error` without recording it.
    #[inline]
    pub fn fail_next_submission(&self, error: VulkanError) {
        self.state.lock().submit_error = Some(error);
    }

    /// Completes every pending signal.
    pub fn complete_all(&self) {
        let mut state = self.state.lock();

        for semaphore in state.semaphores.values_mut() {
            semaphore.complete_all();
        }

        self.signaled.notify_all();
    }

    /// Returns every submission made so far.
    #[inline]
    pub fn submissions(&self) -> Vec<Submission> {
        self.state.lock().submissions.clone()
    }

    /// Returns the commands recorded into `command_buffer` since it was last begun.
    #[inline]
    pub fn recorded_commands(&self, command_buffer: vk::CommandBuffer) -> Vec<RawCommand> {
        self.state
            .lock()
            .command_buffers
            .get(&command_buffer.as_raw())
            .cloned()
            .unwrap_or_default()
    }

    /// Returns every descriptor write made to `set`.
    #[inline]
    pub fn descriptor_writes(&self, set: vk::DescriptorSet) -> Vec<RawDescriptorWrite> {
        self.state
            .lock()
            .descriptor_writes
            .get(&set.as_raw())
            .cloned()
            .unwrap_or_default()
    }

    /// Returns a copy of the contents of a host buffer.
    #[inline]
    pub fn buffer_contents(&self, buffer: vk::Buffer) -> Option<Vec<u8>> {
        self.state
            .lock()
            .host_buffers
            .get(&buffer.as_raw())
            .map(HostAllocation::to_vec)
    }

    /// Returns the number of command pools that exist.
    #[inline]
    pub fn command_pool_count(&self) -> usize {
        self.state.lock().command_pools.len()
    }
}

unsafe impl RawDevice for HeadlessDevice {
    #[inline]
    fn properties(&self) -> &DeviceProperties {
        &self.properties
    }

    #[inline]
    fn queue(&self, queue_family_index: u32, queue_index: u32) -> vk::Queue {
        let raw = 1u64 << 63 | u64::from(queue_family_index) << 32 | u64::from(queue_index);

        vk::Queue::from_raw(raw)
    }

    fn create_command_pool(
        &self,
        _queue_family_index: u32,
    ) -> Result<vk::CommandPool, VulkanError> {
        let pool = self.next_handle::<vk::CommandPool>();
        self.state
            .lock()
            .command_pools
            .insert(pool.as_raw(), Vec::new());

        Ok(pool)
    }

    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool) {
        let mut state = self.state.lock();

        if let Some(buffers) = state.command_pools.remove(&pool.as_raw()) {
            for buffer in buffers {
                state.command_buffers.remove(&buffer.as_raw());
            }
        }
    }

    unsafe fn reset_command_pool(&self, pool: vk::CommandPool) -> Result<(), VulkanError> {
        let mut state = self.state.lock();
        let HeadlessState {
            command_pools,
            command_buffers,
            ..
        } = &mut *state;

        for buffer in command_pools.get(&pool.as_raw()).into_iter().flatten() {
            if let Some(commands) = command_buffers.get_mut(&buffer.as_raw()) {
                commands.clear();
            }
        }

        Ok(())
    }

    unsafe fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>, VulkanError> {
        let buffers: Vec<vk::CommandBuffer> =
            (0..count).map(|_| self.next_handle()).collect();
        let mut state = self.state.lock();

        for buffer in &buffers {
            state.command_buffers.insert(buffer.as_raw(), Vec::new());
        }

        state
            .command_pools
            .entry(pool.as_raw())
            .or_default()
            .extend_from_slice(&buffers);

        Ok(buffers)
    }

    unsafe fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
    ) -> Result<(), VulkanError> {
        self.state
            .lock()
            .command_buffers
            .entry(command_buffer.as_raw())
            .or_default()
            .clear();

        Ok(())
    }

    unsafe fn end_command_buffer(
        &self,
        _command_buffer: vk::CommandBuffer,
    ) -> Result<(), VulkanError> {
        Ok(())
    }

    unsafe fn record(&self, command_buffer: vk::CommandBuffer, command: &RawCommand) {
        self.state
            .lock()
            .command_buffers
            .entry(command_buffer.as_raw())
            .or_default()
            .push(command.clone());
    }

    fn create_timeline_semaphore(&self, initial_value: u64) -> Result<vk::Semaphore, VulkanError> {
        let semaphore = self.next_handle::<vk::Semaphore>();
        self.state.lock().semaphores.insert(
            semaphore.as_raw(),
            SemaphoreState {
                value: initial_value,
                pending: Vec::new(),
            },
        );

        Ok(semaphore)
    }

    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.state.lock().semaphores.remove(&semaphore.as_raw());
    }

    unsafe fn semaphore_counter_value(
        &self,
        semaphore: vk::Semaphore,
    ) -> Result<u64, VulkanError> {
        let mut state = self.state.lock();
        let semaphore = state
            .semaphores
            .get_mut(&semaphore.as_raw())
            .ok_or(VulkanError::DeviceLost)?;
        semaphore.poll();

        Ok(semaphore.value)
    }

    unsafe fn wait_semaphore(
        &self,
        semaphore: vk::Semaphore,
        value: u64,
        timeout: Option<Duration>,
    ) -> Result<(), VulkanError> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut state = self.state.lock();

        loop {
            let state_semaphore = state
                .semaphores
                .get_mut(&semaphore.as_raw())
                .ok_or(VulkanError::DeviceLost)?;
            state_semaphore.settle();

            if state_semaphore.value >= value {
                return Ok(());
            }

            match deadline {
                Some(deadline) => {
                    if self.signaled.wait_until(&mut state, deadline).timed_out() {
                        let reached = state
                            .semaphores
                            .get(&semaphore.as_raw())
                            .is_some_and(|semaphore| semaphore.value >= value);

                        return if reached {
                            Ok(())
                        } else {
                            Err(VulkanError::Timeout)
                        };
                    }
                }
                None => self.signaled.wait(&mut state),
            }
        }
    }

    unsafe fn signal_semaphore(
        &self,
        semaphore: vk::Semaphore,
        value: u64,
    ) -> Result<(), VulkanError> {
        let mut state = self.state.lock();
        state
            .semaphores
            .get_mut(&semaphore.as_raw())
            .ok_or(VulkanError::DeviceLost)?
            .apply(value);
        self.signaled.notify_all();

        Ok(())
    }

    unsafe fn queue_submit(
        &self,
        queue: vk::Queue,
        submit_info: &SubmitInfo,
    ) -> Result<(), VulkanError> {
        let mut state = self.state.lock();

        if let Some(err) = state.submit_error.take() {
            return Err(err);
        }

        let completion = state.completion;

        let commands = submit_info
            .command_buffers
            .iter()
            .flat_map(|buffer| {
                state
                    .command_buffers
                    .get(&buffer.as_raw())
                    .into_iter()
                    .flatten()
                    .cloned()
            })
            .collect();

        for signal in &submit_info.signal_semaphores {
            let semaphore = state
                .semaphores
                .get_mut(&signal.semaphore.as_raw())
                .ok_or(VulkanError::DeviceLost)?;

            match completion {
                Completion::Immediate => semaphore.apply(signal.value),
                Completion::Manual => semaphore.pending.push(PendingSignal {
                    value: signal.value,
                    polls_left: None,
                }),
                Completion::AfterPolls(polls) => semaphore.pending.push(PendingSignal {
                    value: signal.value,
                    polls_left: Some(polls),
                }),
            }
        }

        tracing::trace!(
            ?queue,
            command_buffers = submit_info.command_buffers.len(),
            ?completion,
            "headless submission",
        );

        state.submissions.push(Submission {
            queue,
            wait_semaphores: submit_info.wait_semaphores.to_vec(),
            command_buffers: submit_info.command_buffers.to_vec(),
            signal_semaphores: submit_info.signal_semaphores.to_vec(),
            commands,
        });
        self.signaled.notify_all();

        Ok(())
    }

    fn create_host_buffer(
        &self,
        size: DeviceSize,
        _usage: vk::BufferUsageFlags,
    ) -> Result<HostBuffer, VulkanError> {
        let len = usize::try_from(size).map_err(|_| VulkanError::OutOfHostMemory)?;
        let allocation = HostAllocation::new(len);
        let buffer = HostBuffer {
            handle: self.next_handle(),
            memory: self.next_handle(),
            size,
            mapped: allocation.as_ptr(),
        };
        self.state
            .lock()
            .host_buffers
            .insert(buffer.handle.as_raw(), allocation);

        Ok(buffer)
    }

    unsafe fn destroy_host_buffer(&self, buffer: &HostBuffer) {
        self.state.lock().host_buffers.remove(&buffer.handle.as_raw());
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        _pool_sizes: &[vk::DescriptorPoolSize],
    ) -> Result<vk::DescriptorPool, VulkanError> {
        let pool = self.next_handle::<vk::DescriptorPool>();
        self.state.lock().descriptor_pools.insert(
            pool.as_raw(),
            DescriptorPoolState {
                max_sets,
                allocated: 0,
            },
        );

        Ok(pool)
    }

    unsafe fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        self.state.lock().descriptor_pools.remove(&pool.as_raw());
    }

    unsafe fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> Result<(), VulkanError> {
        if let Some(pool) = self.state.lock().descriptor_pools.get_mut(&pool.as_raw()) {
            pool.allocated = 0;
        }

        Ok(())
    }

    unsafe fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        _layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet, VulkanError> {
        {
            let mut state = self.state.lock();
            let pool = state
                .descriptor_pools
                .get_mut(&pool.as_raw())
                .ok_or(VulkanError::OutOfPoolMemory)?;

            if pool.allocated == pool.max_sets {
                return Err(VulkanError::OutOfPoolMemory);
            }

            pool.allocated += 1;
        }

        Ok(self.next_handle())
    }

    unsafe fn update_descriptor_set(&self, set: vk::DescriptorSet, writes: &[RawDescriptorWrite]) {
        self.state
            .lock()
            .descriptor_writes
            .entry(set.as_raw())
            .or_default()
            .extend_from_slice(writes);
    }
}

impl fmt::Debug for HeadlessDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();

        f.debug_struct("HeadlessDevice")
            .field("properties", &self.properties)
            .field("completion", &state.completion)
            .field("submissions", &state.submissions.len())
            .finish_non_exhaustive()
    }
}

/// Parameters to create a new `HeadlessDevice`.
#[derive(Clone, Debug)]
pub struct HeadlessDeviceCreateInfo {
    /// The properties the device reports.
    ///
    /// The default value is `DeviceProperties::default()`.
    pub properties: DeviceProperties,

    /// The completion policy of submissions.
    ///
    /// The default value is [`Completion::Immediate`].
    pub completion: Completion,

    pub _ne: NonExhaustive,
}

impl Default for HeadlessDeviceCreateInfo {
    #[inline]
    fn default() -> Self {
        HeadlessDeviceCreateInfo {
            properties: DeviceProperties::default(),
            completion: Completion::Immediate,
            _ne: NonExhaustive(()),
        }
    }
}
