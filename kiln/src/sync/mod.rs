// Copyright (c) 2026 The kiln developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Synchronization on the GPU timeline.
//!
//! Submissions signal a [`TimelineSemaphore`]: a counter that only ever grows. A [`SyncPoint`]
//! pairs such a semaphore with the value it will hold once a given submission has completed,
//! which lets any code ask "is this work done yet" without knowing which queue or semaphore was
//! involved.
//!
//! Polling a sync point with [`SyncPoint::is_ready`] never blocks and is what the per-frame code
//! paths use (command pool recycling, for example). [`SyncPoint::wait_for_ready`] blocks the
//! calling thread and is meant for teardown.
//!
//! The [`pipeline`] module contains the barrier structures recorded into command buffers.

pub use self::{
    pipeline::{
        BufferMemoryBarrier, DependencyInfo, ImageMemoryBarrier, MemoryAccess, MemoryBarrier,
    },
    timeline::{SyncPoint, TimelineSemaphore},
};

pub mod pipeline;
mod timeline;

/// Declares the way a resource is shared between queue families.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Sharing {
    /// The resource is used by one queue family at a time.
    #[default]
    Exclusive,

    /// The resource is used concurrently by several queue families.
    Concurrent,
}
