// Copyright (c) 2026 The kiln developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Submission of recorded commands.
//!
//! A [`CommandQueue`] owns a timeline semaphore and a [`CommandPoolSet`]. Every submission
//! signals the next value of the semaphore; the returned [`SyncPoint`] tells when the submitted
//! work is complete, and the command pool it was recorded with is only recycled after that.

use crate::{
    command_buffer::{
        CommandPoolCreateInfo, CommandPoolSet, CommandProducerGraphic, CommandProducerTransfer,
        FinishedCommands,
    },
    device::{Device, DeviceOwned, SemaphoreSubmitInfo, SubmitInfo},
    sync::{SyncPoint, TimelineSemaphore},
    NonExhaustive, Validated, ValidationError, VulkanError, VulkanObject,
};
use ash::vk;
use parking_lot::Mutex;
use smallvec::smallvec;
use std::{fmt, sync::Arc};

/// A device queue that commands are recorded for and submitted to.
pub struct CommandQueue {
    handle: vk::Queue,
    device: Arc<Device>,
    queue_family_index: u32,
    semaphore: Arc<TimelineSemaphore>,
    // Serializes pool acquisition, submission and the advance of the timeline.
    state: Mutex<QueueState>,
}

struct QueueState {
    pool_set: CommandPoolSet,
    // The value signaled by the last submission.
    last_value: u64,
}

impl CommandQueue {
    /// Creates a new `CommandQueue` for the device queue described by `create_info`.
    pub fn new(
        device: Arc<Device>,
        create_info: CommandQueueCreateInfo,
    ) -> Result<Arc<CommandQueue>, Validated<VulkanError>> {
        create_info
            .validate()
            .map_err(|err| err.add_context("create_info"))?;

        let CommandQueueCreateInfo {
            queue_family_index,
            queue_index,
            command_pool,
            _ne: _,
        } = create_info;

        let pool_set = CommandPoolSet::new(
            device.clone(),
            CommandPoolCreateInfo {
                queue_family_index,
                ..command_pool
            },
        )?;
        let semaphore = TimelineSemaphore::new(device.clone(), 0)?;
        let handle = device.raw().queue(queue_family_index, queue_index);

        tracing::debug!(
            queue = ?handle,
            queue_family_index,
            queue_index,
            "created command queue",
        );

        Ok(Arc::new(CommandQueue {
            handle,
            device,
            queue_family_index,
            semaphore,
            state: Mutex::new(QueueState {
                pool_set,
                last_value: 0,
            }),
        }))
    }

    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    /// Returns the timeline semaphore signaled by the submissions.
    #[inline]
    pub fn semaphore(&self) -> &Arc<TimelineSemaphore> {
        &self.semaphore
    }

    /// Starts recording commands with a recycled or new command pool.
    ///
    /// `debug_name` labels the whole command buffer in debugging tools, if the device forwards
    /// debug labels.
    pub fn start_commands(
        &self,
        debug_name: Option<&str>,
    ) -> Result<CommandProducerGraphic, VulkanError> {
        let pool = self.state.lock().pool_set.get_pool()?;

        CommandProducerGraphic::new(pool, debug_name)
    }

    /// Ends recording and submits the commands of `producer`.
    ///
    /// The submission waits for the sync points given to
    /// [`wait_for`](CommandProducerTransfer::wait_for) and signals the next value of the
    /// timeline. The returned sync point becomes ready once the work is complete.
    ///
    /// # Panics
    ///
    /// - Panics if a debug label or a render pass of `producer` is still open.
    #[track_caller]
    pub fn submit_commands(
        &self,
        producer: impl Into<CommandProducerTransfer>,
    ) -> Result<SyncPoint, VulkanError> {
        let FinishedCommands {
            mut pool,
            waits,
            watcher,
        } = producer.into().finish()?;

        let mut state = self.state.lock();
        let value = state.last_value + 1;

        let submit_info = SubmitInfo {
            wait_semaphores: waits
                .iter()
                .filter(|wait| wait.semaphore() != &self.semaphore)
                .map(|wait| SemaphoreSubmitInfo {
                    semaphore: wait.semaphore().handle(),
                    value: wait.value(),
                    stages: vk::PipelineStageFlags2::ALL_COMMANDS,
                })
                .collect(),
            command_buffers: pool.ended_buffers(),
            signal_semaphores: smallvec![SemaphoreSubmitInfo {
                semaphore: self.semaphore.handle(),
                value,
                stages: vk::PipelineStageFlags2::ALL_COMMANDS,
            }],
        };

        // SAFETY: Submissions to the queue are serialized by `state`. The command buffers are
        // ended, and stay alive in their pool until the signaled value is reached.
        unsafe { self.device.raw().queue_submit(self.handle, &submit_info) }?;

        // SAFETY: The commands were submitted, after every earlier submission of this queue.
        unsafe { watcher.write_back() };

        state.last_value = value;
        pool.mark_in_flight();

        let sync_point = SyncPoint::new(self.semaphore.clone(), value);
        state.pool_set.return_pool(pool, sync_point.clone());

        tracing::trace!(
            queue = ?self.handle,
            value,
            waits = submit_info.wait_semaphores.len(),
            "submitted commands",
        );

        Ok(sync_point)
    }

    /// Returns the sync point of the last submission.
    #[inline]
    pub fn current_sync_point(&self) -> SyncPoint {
        SyncPoint::new(self.semaphore.clone(), self.state.lock().last_value)
    }

    /// Blocks until every submitted command is complete.
    #[inline]
    pub fn wait_idle(&self) -> Result<(), VulkanError> {
        self.current_sync_point().wait_for_ready()
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        if let Err(err) = self.wait_idle() {
            tracing::error!(queue = ?self.handle, %err, "failed to wait for a command queue");
        }
    }
}

unsafe impl VulkanObject for CommandQueue {
    type Handle = vk::Queue;

    #[inline]
    fn handle(&self) -> Self::Handle {
        self.handle
    }
}

unsafe impl DeviceOwned for CommandQueue {
    #[inline]
    fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();

        f.debug_struct("CommandQueue")
            .field("handle", &self.handle)
            .field("queue_family_index", &self.queue_family_index)
            .field("last_value", &state.last_value)
            .field("pool_set", &state.pool_set)
            .finish_non_exhaustive()
    }
}

/// Parameters to create a new `CommandQueue`.
#[derive(Clone, Debug)]
pub struct CommandQueueCreateInfo {
    /// The default value is `0`.
    pub queue_family_index: u32,

    /// The index of the queue within its family.
    ///
    /// The default value is `0`.
    pub queue_index: u32,

    /// The parameters of the command pools of the queue. Its `queue_family_index` is ignored.
    ///
    /// The default value is `CommandPoolCreateInfo::default()`.
    pub command_pool: CommandPoolCreateInfo,

    pub _ne: NonExhaustive,
}

impl Default for CommandQueueCreateInfo {
    #[inline]
    fn default() -> Self {
        CommandQueueCreateInfo {
            queue_family_index: 0,
            queue_index: 0,
            command_pool: CommandPoolCreateInfo::default(),
            _ne: NonExhaustive(()),
        }
    }
}

impl CommandQueueCreateInfo {
    pub(crate) fn validate(&self) -> Result<(), Box<ValidationError>> {
        self.command_pool
            .validate()
            .map_err(|err| err.add_context("command_pool"))
    }
}
