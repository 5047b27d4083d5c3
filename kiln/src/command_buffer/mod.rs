// Copyright (c) 2026 The kiln developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Recording commands to execute on the device.
//!
//! # Lifecycle
//!
//! A [`CommandBuffer`] goes through four states:
//!
//! ```text
//! Unused --begin--> Recording --end--> Ended --submit--> InFlight --pool reset--> Unused
//! ```
//!
//! Command buffers belong to a [`CommandPool`], which also owns the scratch allocators of one
//! recording session. A [`CommandPoolSet`] keeps pools whose work is still in flight on the side,
//! tagged with the [`SyncPoint`](crate::sync::SyncPoint) of that work, and only hands them out
//! again once the sync point is ready.
//!
//! # Producers
//!
//! Commands are recorded through producers handed out by
//! [`CommandQueue::start_commands`](crate::queue::CommandQueue::start_commands). Each level adds
//! capabilities to the previous one:
//!
//! - [`CommandProducerTransfer`]: uploads and copies.
//! - [`CommandProducerCompute`]: compute pipelines and dispatches.
//! - [`CommandProducerGraphic`]: render passes and draws.
//!
//! The higher levels dereference to the lower ones, so a `CommandProducerGraphic` can be used
//! wherever a transfer or compute producer is expected.

pub use self::{
    pool::{CommandPool, CommandPoolCreateInfo, CommandPoolSet},
    producer::{
        compute::CommandProducerCompute, graphic::CommandProducerGraphic,
        CommandProducerTransfer,
    },
};
pub(crate) use self::producer::FinishedCommands;
use self::sys::RawCommand;
use crate::{
    device::{Device, DeviceOwned},
    macros::contract_violation,
    VulkanError, VulkanObject,
};
use ash::vk;
use std::{fmt, sync::Arc};

mod pool;
mod producer;
pub mod sys;

/// The state of a [`CommandBuffer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandBufferState {
    /// Ready to be recorded.
    Unused,

    /// Commands are being recorded.
    Recording,

    /// Recording is done, the buffer can be submitted.
    Ended,

    /// Submitted, and possibly still executing.
    InFlight,
}

/// One native command buffer and its lifecycle state.
pub struct CommandBuffer {
    handle: vk::CommandBuffer,
    device: Arc<Device>,
    state: CommandBufferState,
}

impl CommandBuffer {
    pub(crate) fn new(device: Arc<Device>, handle: vk::CommandBuffer) -> Self {
        CommandBuffer {
            handle,
            device,
            state: CommandBufferState::Unused,
        }
    }

    #[inline]
    pub fn state(&self) -> CommandBufferState {
        self.state
    }

    #[track_caller]
    fn expect_state(&self, expected: CommandBufferState, operation: &str) {
        if self.state != expected {
            contract_violation!(
                "cannot {operation} command buffer {:?}: it is {:?}, not {:?}",
                self.handle,
                self.state,
                expected,
            );
        }
    }

    pub(crate) fn begin(&mut self) -> Result<(), VulkanError> {
        self.expect_state(CommandBufferState::Unused, "begin");

        // SAFETY: The buffer is unused, and exclusively borrowed through its pool.
        unsafe { self.device.raw().begin_command_buffer(self.handle) }?;
        self.state = CommandBufferState::Recording;

        Ok(())
    }

    pub(crate) fn record(&mut self, command: &RawCommand) {
        self.expect_state(CommandBufferState::Recording, "record into");

        // SAFETY: The buffer is recording, and exclusively borrowed through its pool.
        unsafe { self.device.raw().record(self.handle, command) };
    }

    pub(crate) fn end(&mut self) -> Result<(), VulkanError> {
        self.expect_state(CommandBufferState::Recording, "end");

        // SAFETY: The buffer is recording, and exclusively borrowed through its pool.
        unsafe { self.device.raw().end_command_buffer(self.handle) }?;
        self.state = CommandBufferState::Ended;

        Ok(())
    }

    pub(crate) fn mark_in_flight(&mut self) {
        self.expect_state(CommandBufferState::Ended, "submit");
        self.state = CommandBufferState::InFlight;
    }

    // Called by the pool once the native pool was reset.
    pub(crate) fn mark_unused(&mut self) {
        self.state = CommandBufferState::Unused;
    }
}

unsafe impl VulkanObject for CommandBuffer {
    type Handle = vk::CommandBuffer;

    #[inline]
    fn handle(&self) -> Self::Handle {
        self.handle
    }
}

unsafe impl DeviceOwned for CommandBuffer {
    #[inline]
    fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("handle", &self.handle)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::{sys::RawCommand, CommandBuffer, CommandBufferState};

    #[test]
    fn state_machine() {
        let (headless, device) = headless_device!();
        let mut buffer = CommandBuffer::new(device, headless.next_handle());

        assert_eq!(buffer.state(), CommandBufferState::Unused);
        buffer.begin().unwrap();
        assert_eq!(buffer.state(), CommandBufferState::Recording);
        buffer.record(&RawCommand::EndRendering);
        buffer.end().unwrap();
        assert_eq!(buffer.state(), CommandBufferState::Ended);
        buffer.mark_in_flight();
        assert_eq!(buffer.state(), CommandBufferState::InFlight);
        buffer.mark_unused();
        assert_eq!(buffer.state(), CommandBufferState::Unused);
    }

    #[test]
    fn double_begin_panics() {
        let (headless, device) = headless_device!();
        let mut buffer = CommandBuffer::new(device, headless.next_handle());
        buffer.begin().unwrap();

        assert_should_panic!("cannot begin command buffer", {
            buffer.begin().unwrap();
        });
    }

    #[test]
    fn recording_after_end_panics() {
        let (headless, device) = headless_device!();
        let mut buffer = CommandBuffer::new(device, headless.next_handle());
        buffer.begin().unwrap();
        buffer.end().unwrap();

        assert_should_panic!("cannot record into command buffer", {
            buffer.record(&RawCommand::EndRendering);
        });
    }
}
