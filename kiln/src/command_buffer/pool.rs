// Copyright (c) 2026 The kiln developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

use super::{CommandBuffer, CommandBufferState};
use crate::{
    descriptor_set::{VolatileDescriptorPool, VolatileDescriptorPoolCreateInfo},
    device::{Device, DeviceOwned},
    macros::{contract_violation, impl_id_counter},
    memory::{UniformMemoryPool, UniformMemoryPoolCreateInfo},
    sync::SyncPoint,
    NonExhaustive, Validated, ValidationError, VulkanError, VulkanObject,
};
use ash::vk;
use smallvec::SmallVec;
use std::{any::Any, collections::VecDeque, fmt, num::NonZero, sync::Arc};

/// Command buffers and scratch allocators for one recording session.
///
/// A pool has a fixed number of command buffers. Once submitted, it must not be reset before
/// the sync point of its work is ready; [`CommandPoolSet`] takes care of that.
pub struct CommandPool {
    handle: vk::CommandPool,
    device: Arc<Device>,
    id: NonZero<u64>,

    buffers: Vec<CommandBuffer>,
    next_buffer: usize,
    uniform_memory: UniformMemoryPool,
    descriptor_pool: VolatileDescriptorPool,
    locked_resources: Vec<Arc<dyn Any + Send + Sync>>,
    sync_point: Option<SyncPoint>,
}

impl CommandPool {
    /// Creates a new `CommandPool`.
    pub fn new(
        device: Arc<Device>,
        create_info: CommandPoolCreateInfo,
    ) -> Result<Self, Validated<VulkanError>> {
        create_info
            .validate()
            .map_err(|err| err.add_context("create_info"))?;

        Ok(Self::new_unchecked(device, create_info)?)
    }

    pub(crate) fn new_unchecked(
        device: Arc<Device>,
        create_info: CommandPoolCreateInfo,
    ) -> Result<Self, VulkanError> {
        let CommandPoolCreateInfo {
            queue_family_index,
            buffer_count,
            uniform_memory,
            descriptor_pool,
            _ne: _,
        } = create_info;

        // Validated along with the rest of the create info.
        let uniform_memory = UniformMemoryPool::new(device.clone(), uniform_memory)
            .map_err(|_| VulkanError::InitializationFailed)?;
        let descriptor_pool = VolatileDescriptorPool::new(device.clone(), descriptor_pool)?;
        let handle = device.raw().create_command_pool(queue_family_index)?;

        // The pool owns `handle` from here on, and destroys it if anything below fails.
        let mut pool = CommandPool {
            handle,
            device: device.clone(),
            id: Self::next_id(),
            buffers: Vec::new(),
            next_buffer: 0,
            uniform_memory,
            descriptor_pool,
            locked_resources: Vec::new(),
            sync_point: None,
        };

        // SAFETY: `handle` was just created and is not used by any other thread.
        let handles = unsafe { device.raw().allocate_command_buffers(handle, buffer_count) }?;
        pool.buffers = handles
            .into_iter()
            .map(|handle| CommandBuffer::new(device.clone(), handle))
            .collect();

        tracing::debug!(
            pool = ?handle,
            queue_family_index,
            buffer_count,
            "created command pool",
        );

        Ok(pool)
    }

    /// Returns the next unused command buffer of the pool.
    ///
    /// # Panics
    ///
    /// - Panics if every command buffer of the pool was already handed out.
    #[track_caller]
    pub fn get_next_buffer(&mut self) -> &mut CommandBuffer {
        let index = self.acquire_buffer();

        &mut self.buffers[index]
    }

    #[track_caller]
    pub(crate) fn acquire_buffer(&mut self) -> usize {
        if self.next_buffer == self.buffers.len() {
            contract_violation!(
                "command pool {:?} has no unused command buffer left (it has {})",
                self.handle,
                self.buffers.len(),
            );
        }

        let index = self.next_buffer;
        self.next_buffer += 1;

        index
    }

    #[inline]
    pub(crate) fn buffer_mut(&mut self, index: usize) -> &mut CommandBuffer {
        &mut self.buffers[index]
    }

    /// Returns every command buffer of the pool.
    #[inline]
    pub fn buffers(&self) -> &[CommandBuffer] {
        &self.buffers
    }

    /// Returns the scratch memory of the session.
    #[inline]
    pub fn uniform_memory(&mut self) -> &mut UniformMemoryPool {
        &mut self.uniform_memory
    }

    /// Returns the descriptor set allocator of the session.
    #[inline]
    pub fn descriptor_pool(&mut self) -> &mut VolatileDescriptorPool {
        &mut self.descriptor_pool
    }

    /// Keeps `resource` alive until the pool is reset.
    #[inline]
    pub fn lock_resource(&mut self, resource: Arc<dyn Any + Send + Sync>) {
        self.locked_resources.push(resource);
    }

    /// Returns the number of resources kept alive by the pool.
    #[inline]
    pub fn locked_resource_count(&self) -> usize {
        self.locked_resources.len()
    }

    /// Returns the sync point of the last submission of the pool's command buffers.
    #[inline]
    pub fn sync_point(&self) -> Option<&SyncPoint> {
        self.sync_point.as_ref()
    }

    /// Returns `true` if the pool has no work in flight. Never blocks.
    pub fn is_ready(&self) -> Result<bool, VulkanError> {
        match &self.sync_point {
            Some(sync_point) => sync_point.is_ready(),
            None => Ok(true),
        }
    }

    pub(crate) fn ended_buffers(&self) -> SmallVec<[vk::CommandBuffer; 1]> {
        self.buffers
            .iter()
            .filter(|buffer| buffer.state() == CommandBufferState::Ended)
            .map(CommandBuffer::handle)
            .collect()
    }

    pub(crate) fn mark_in_flight(&mut self) {
        for buffer in &mut self.buffers {
            if buffer.state() == CommandBufferState::Ended {
                buffer.mark_in_flight();
            }
        }
    }

    /// Resets every command buffer and scratch allocator of the pool, and releases the locked
    /// resources.
    ///
    /// # Panics
    ///
    /// - Panics if the pool was submitted and its sync point is not ready.
    pub fn reset(&mut self) -> Result<(), VulkanError> {
        if !self.is_ready()? {
            contract_violation!(
                "command pool {:?} reset while its work is still in flight",
                self.handle,
            );
        }

        // SAFETY: The work of the pool is complete, so none of its command buffers, descriptor
        // sets or uniform memory is in use by the device.
        unsafe {
            self.device.raw().reset_command_pool(self.handle)?;
            self.descriptor_pool.reset()?;
            self.uniform_memory.reset();
        }

        for buffer in &mut self.buffers {
            buffer.mark_unused();
        }

        self.next_buffer = 0;
        self.locked_resources.clear();
        self.sync_point = None;

        Ok(())
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        if let Some(sync_point) = &self.sync_point {
            if let Err(err) = sync_point.wait_for_ready() {
                tracing::error!(
                    pool = ?self.handle,
                    %err,
                    "failed to wait for the work of a command pool before destroying it",
                );
            }
        }

        // SAFETY: The work of the pool is complete.
        unsafe { self.device.raw().destroy_command_pool(self.handle) };
        tracing::debug!(pool = ?self.handle, "destroyed command pool");
    }
}

unsafe impl VulkanObject for CommandPool {
    type Handle = vk::CommandPool;

    #[inline]
    fn handle(&self) -> Self::Handle {
        self.handle
    }
}

unsafe impl DeviceOwned for CommandPool {
    #[inline]
    fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl fmt::Debug for CommandPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandPool")
            .field("handle", &self.handle)
            .field("buffers", &self.buffers)
            .field("next_buffer", &self.next_buffer)
            .field("locked_resources", &self.locked_resources.len())
            .field("sync_point", &self.sync_point)
            .finish_non_exhaustive()
    }
}

impl_id_counter!(CommandPool);

/// Parameters to create a new `CommandPool`.
#[derive(Clone, Debug)]
pub struct CommandPoolCreateInfo {
    /// The queue family the command buffers are submitted to.
    ///
    /// The default value is `0`.
    pub queue_family_index: u32,

    /// The number of command buffers of the pool.
    ///
    /// The default value is `4`.
    pub buffer_count: u32,

    /// The default value is `UniformMemoryPoolCreateInfo::default()`.
    pub uniform_memory: UniformMemoryPoolCreateInfo,

    /// The default value is `VolatileDescriptorPoolCreateInfo::default()`.
    pub descriptor_pool: VolatileDescriptorPoolCreateInfo,

    pub _ne: NonExhaustive,
}

impl Default for CommandPoolCreateInfo {
    #[inline]
    fn default() -> Self {
        CommandPoolCreateInfo {
            queue_family_index: 0,
            buffer_count: 4,
            uniform_memory: UniformMemoryPoolCreateInfo::default(),
            descriptor_pool: VolatileDescriptorPoolCreateInfo::default(),
            _ne: NonExhaustive(()),
        }
    }
}

impl CommandPoolCreateInfo {
    pub(crate) fn validate(&self) -> Result<(), Box<ValidationError>> {
        if self.buffer_count == 0 {
            return Err(ValidationError::new("buffer_count", "is zero"));
        }

        self.uniform_memory
            .validate()
            .map_err(|err| err.add_context("uniform_memory"))?;
        self.descriptor_pool
            .validate()
            .map_err(|err| err.add_context("descriptor_pool"))?;

        Ok(())
    }
}

/// Recycles command pools once their work is complete.
pub struct CommandPoolSet {
    device: Arc<Device>,
    create_info: CommandPoolCreateInfo,
    // Returned pools, oldest first.
    waiting: VecDeque<Box<CommandPool>>,
}

impl CommandPoolSet {
    pub fn new(
        device: Arc<Device>,
        create_info: CommandPoolCreateInfo,
    ) -> Result<Self, Box<ValidationError>> {
        create_info
            .validate()
            .map_err(|err| err.add_context("create_info"))?;

        Ok(CommandPoolSet {
            device,
            create_info,
            waiting: VecDeque::new(),
        })
    }

    /// Returns a pool ready for a new recording session.
    ///
    /// The first returned pool whose sync point is ready is reset and handed out. If there is
    /// none, a new pool is created. Never blocks.
    pub fn get_pool(&mut self) -> Result<Box<CommandPool>, VulkanError> {
        let mut ready = None;

        for (index, pool) in self.waiting.iter().enumerate() {
            if pool.is_ready()? {
                ready = Some(index);
                break;
            }
        }

        if let Some(mut pool) = ready.and_then(|index| self.waiting.remove(index)) {
            pool.reset()?;
            tracing::trace!(pool = ?pool.handle(), "recycled command pool");

            return Ok(pool);
        }

        let pool =
            CommandPool::new_unchecked(self.device.clone(), self.create_info.clone())?;

        Ok(Box::new(pool))
    }

    /// Puts `pool` aside until `sync_point` is ready.
    pub fn return_pool(&mut self, mut pool: Box<CommandPool>, sync_point: SyncPoint) {
        pool.sync_point = Some(sync_point);
        self.waiting.push_back(pool);
    }

    /// Returns the number of pools waiting for their work to complete or to be reused.
    #[inline]
    pub fn waiting_count(&self) -> usize {
        self.waiting.len()
    }

    /// Blocks until the work of every returned pool is complete.
    pub fn wait_idle(&self) -> Result<(), VulkanError> {
        for pool in &self.waiting {
            if let Some(sync_point) = pool.sync_point() {
                sync_point.wait_for_ready()?;
            }
        }

        Ok(())
    }
}

unsafe impl DeviceOwned for CommandPoolSet {
    #[inline]
    fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl fmt::Debug for CommandPoolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandPoolSet")
            .field("create_info", &self.create_info)
            .field("waiting", &self.waiting)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::{CommandPool, CommandPoolCreateInfo, CommandPoolSet};
    use crate::{
        command_buffer::CommandBufferState,
        device::{headless::Completion, SemaphoreSubmitInfo, SubmitInfo},
        sync::{SyncPoint, TimelineSemaphore},
        VulkanObject,
    };
    use ash::vk;
    use smallvec::smallvec;
    use std::sync::Arc;

    fn submit_signal(device: &crate::device::Device, semaphore: &TimelineSemaphore, value: u64) {
        let submit_info = SubmitInfo {
            signal_semaphores: smallvec![SemaphoreSubmitInfo {
                semaphore: semaphore.handle(),
                value,
                stages: vk::PipelineStageFlags2::ALL_COMMANDS,
            }],
            ..Default::default()
        };

        // SAFETY: Headless handles are never dereferenced.
        unsafe {
            device
                .raw()
                .queue_submit(device.raw().queue(0, 0), &submit_info)
        }
        .unwrap();
    }

    #[test]
    fn fixed_buffer_count() {
        let (_, device) = headless_device!();
        let mut pool = CommandPool::new(
            device,
            CommandPoolCreateInfo {
                buffer_count: 2,
                ..Default::default()
            },
        )
        .unwrap();

        pool.get_next_buffer();
        pool.get_next_buffer();
        assert_should_panic!("no unused command buffer left", {
            pool.get_next_buffer();
        });
    }

    #[test]
    fn zero_buffers_is_a_validation_error() {
        let (_, device) = headless_device!();

        assert!(CommandPool::new(
            device,
            CommandPoolCreateInfo {
                buffer_count: 0,
                ..Default::default()
            },
        )
        .is_err());
    }

    #[test]
    fn reset_releases_everything() {
        let (_, device) = headless_device!();
        let mut pool = CommandPool::new(device, Default::default()).unwrap();

        let buffer = pool.get_next_buffer();
        buffer.begin().unwrap();
        buffer.end().unwrap();
        pool.lock_resource(Arc::new(5u32));
        pool.uniform_memory().write(&1u32).unwrap();

        pool.reset().unwrap();

        assert_eq!(pool.locked_resource_count(), 0);
        assert!(pool
            .buffers()
            .iter()
            .all(|buffer| buffer.state() == CommandBufferState::Unused));
        pool.get_next_buffer().begin().unwrap();
    }

    #[test]
    fn reset_with_outstanding_work_panics() {
        let (headless, device) = headless_device!();
        headless.set_completion(Completion::Manual);
        let semaphore = TimelineSemaphore::new(device.clone(), 0).unwrap();
        let mut set = CommandPoolSet::new(device.clone(), Default::default()).unwrap();
        submit_signal(&device, &semaphore, 1);

        let pool = set.get_pool().unwrap();
        set.return_pool(pool, SyncPoint::new(semaphore.clone(), 1));
        let mut pool = set.waiting.pop_front().unwrap();

        assert_should_panic!("reset while its work is still in flight", {
            pool.reset().unwrap();
        });

        headless.complete_all();
        pool.reset().unwrap();
    }

    #[test]
    fn pool_recycling_safety() {
        for polls in 1..6 {
            let (headless, device) = headless_device!();
            headless.set_completion(Completion::AfterPolls(polls));
            let semaphore = TimelineSemaphore::new(device.clone(), 0).unwrap();
            let mut set = CommandPoolSet::new(device.clone(), Default::default()).unwrap();

            let pool = set.get_pool().unwrap();
            let recycled_id = pool.id();
            submit_signal(&device, &semaphore, 1);
            let sync_point = SyncPoint::new(semaphore.clone(), 1);
            set.return_pool(pool, sync_point.clone());

            let mut handed_out_at = None;

            for attempt in 0..20 {
                let pool = set.get_pool().unwrap();

                if pool.id() == recycled_id {
                    assert!(sync_point.is_ready().unwrap());
                    handed_out_at = Some(attempt);
                    break;
                }
            }

            assert_eq!(handed_out_at, Some(polls - 1));
            assert_eq!(set.waiting_count(), 0);
        }
    }

    #[test]
    fn waiting_pools_are_not_reset_early() {
        let (headless, device) = headless_device!();
        headless.set_completion(Completion::Manual);
        let semaphore = TimelineSemaphore::new(device.clone(), 0).unwrap();
        let mut set = CommandPoolSet::new(device.clone(), Default::default()).unwrap();

        let pool = set.get_pool().unwrap();
        let waiting_id = pool.id();
        submit_signal(&device, &semaphore, 1);
        set.return_pool(pool, SyncPoint::new(semaphore.clone(), 1));

        let fresh = set.get_pool().unwrap();
        assert_ne!(fresh.id(), waiting_id);
        assert_eq!(set.waiting_count(), 1);

        headless.complete_all();
        set.wait_idle().unwrap();
        assert_eq!(set.get_pool().unwrap().id(), waiting_id);
    }
}
