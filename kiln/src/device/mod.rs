// Copyright (c) 2026 The kiln developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Communication channel with a physical device.
//!
//! Every native call kiln makes goes through the [`RawDevice`] trait. The crate ships two
//! implementations:
//!
//! - [`VulkanDevice`](vulkan::VulkanDevice), which forwards to an `ash::Device` created by the
//!   application.
//! - [`HeadlessDevice`](headless::HeadlessDevice), which runs nothing on a GPU. It hands out
//!   fake handles, stores every recorded command and submission, and completes timeline
//!   semaphore signals according to a configurable policy. It is used by the tests and is handy
//!   for inspecting what a frame would submit.
//!
//! A [`Device`] wraps one of them and is shared as an `Arc<Device>` by every object that needs
//! to make native calls.

use crate::{
    command_buffer::sys::RawCommand, descriptor_set::RawDescriptorWrite,
    macros::impl_id_counter, DeviceSize, VulkanError,
};
use ash::vk;
use smallvec::SmallVec;
use std::{fmt, num::NonZero, ptr::NonNull, sync::Arc, time::Duration};

pub mod headless;
pub mod vulkan;

/// The native API seam.
///
/// # Safety
///
/// - Handles returned by the `create_*` and `allocate_*` methods must be valid until they are
///   passed to the matching `destroy_*` method.
/// - [`HostBuffer::mapped`] must point to at least [`HostBuffer::size`] bytes of host-visible,
///   host-coherent memory for as long as the buffer lives.
/// - Callers of the `unsafe` methods guarantee the external synchronization rules of the
///   corresponding Vulkan commands: a command pool and the command buffers allocated from it
///   are used from one thread at a time, and a queue is submitted to from one thread at a time.
pub unsafe trait RawDevice: Send + Sync + fmt::Debug + 'static {
    /// Returns the properties the core needs to know about the device.
    fn properties(&self) -> &DeviceProperties;

    /// Returns the queue with the given family and index.
    fn queue(&self, queue_family_index: u32, queue_index: u32) -> vk::Queue;

    fn create_command_pool(&self, queue_family_index: u32)
        -> Result<vk::CommandPool, VulkanError>;

    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool);

    /// Resets the pool and every command buffer allocated from it.
    unsafe fn reset_command_pool(&self, pool: vk::CommandPool) -> Result<(), VulkanError>;

    unsafe fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>, VulkanError>;

    unsafe fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
    ) -> Result<(), VulkanError>;

    unsafe fn end_command_buffer(&self, command_buffer: vk::CommandBuffer)
        -> Result<(), VulkanError>;

    /// Records one command.
    unsafe fn record(&self, command_buffer: vk::CommandBuffer, command: &RawCommand);

    fn create_timeline_semaphore(&self, initial_value: u64) -> Result<vk::Semaphore, VulkanError>;

    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    /// Returns the current counter value of a timeline semaphore without blocking.
    unsafe fn semaphore_counter_value(&self, semaphore: vk::Semaphore)
        -> Result<u64, VulkanError>;

    /// Blocks until the counter of `semaphore` reaches `value`.
    ///
    /// Returns [`VulkanError::Timeout`] if `timeout` elapses first. `None` waits forever.
    unsafe fn wait_semaphore(
        &self,
        semaphore: vk::Semaphore,
        value: u64,
        timeout: Option<Duration>,
    ) -> Result<(), VulkanError>;

    /// Sets the counter of `semaphore` to `value` from the host.
    unsafe fn signal_semaphore(&self, semaphore: vk::Semaphore, value: u64)
        -> Result<(), VulkanError>;

    unsafe fn queue_submit(
        &self,
        queue: vk::Queue,
        submit_info: &SubmitInfo,
    ) -> Result<(), VulkanError>;

    /// Creates a buffer backed by persistently mapped host-visible memory.
    fn create_host_buffer(
        &self,
        size: DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> Result<HostBuffer, VulkanError>;

    unsafe fn destroy_host_buffer(&self, buffer: &HostBuffer);

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> Result<vk::DescriptorPool, VulkanError>;

    unsafe fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);

    unsafe fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> Result<(), VulkanError>;

    /// Allocates one set. Returns [`VulkanError::OutOfPoolMemory`] or
    /// [`VulkanError::FragmentedPool`] when the pool is full.
    unsafe fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet, VulkanError>;

    unsafe fn update_descriptor_set(&self, set: vk::DescriptorSet, writes: &[RawDescriptorWrite]);
}

/// Device properties the core depends on.
#[derive(Clone, Debug)]
pub struct DeviceProperties {
    /// Required alignment of dynamic and regular uniform buffer offsets.
    pub min_uniform_buffer_offset_alignment: DeviceSize,

    /// Whether debug labels are forwarded to the driver.
    pub debug_labels: bool,
}

impl Default for DeviceProperties {
    #[inline]
    fn default() -> Self {
        DeviceProperties {
            min_uniform_buffer_offset_alignment: 256,
            debug_labels: false,
        }
    }
}

/// A buffer backed by persistently mapped host-visible memory.
#[derive(Debug)]
pub struct HostBuffer {
    pub handle: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: DeviceSize,
    pub mapped: NonNull<u8>,
}

// SAFETY: The mapping stays valid for the whole life of the buffer and every write to it goes
// through an exclusively borrowed owner.
unsafe impl Send for HostBuffer {}
unsafe impl Sync for HostBuffer {}

/// One timeline semaphore operation of a submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SemaphoreSubmitInfo {
    pub semaphore: vk::Semaphore,
    pub value: u64,
    pub stages: vk::PipelineStageFlags2,
}

/// Parameters of a queue submission.
#[derive(Clone, Debug, Default)]
pub struct SubmitInfo {
    pub wait_semaphores: SmallVec<[SemaphoreSubmitInfo; 4]>,
    pub command_buffers: SmallVec<[vk::CommandBuffer; 1]>,
    pub signal_semaphores: SmallVec<[SemaphoreSubmitInfo; 1]>,
}

/// Represents a Vulkan context.
pub struct Device {
    raw: Arc<dyn RawDevice>,
    id: NonZero<u64>,
}

impl Device {
    /// Wraps a native implementation.
    #[inline]
    pub fn new(raw: Arc<dyn RawDevice>) -> Arc<Device> {
        Arc::new(Device {
            raw,
            id: Device::next_id(),
        })
    }

    /// Returns the native implementation.
    #[inline]
    pub fn raw(&self) -> &dyn RawDevice {
        &*self.raw
    }

    /// Returns the properties of the device.
    #[inline]
    pub fn properties(&self) -> &DeviceProperties {
        self.raw.properties()
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("raw", &self.raw)
            .finish()
    }
}

impl_id_counter!(Device);

/// Implemented on objects that belong to a Vulkan device.
///
/// # Safety
///
/// - `device()` must return the correct device.
pub unsafe trait DeviceOwned {
    /// Returns the device that owns `self`.
    fn device(&self) -> &Arc<Device>;
}
