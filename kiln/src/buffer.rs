// Copyright (c) 2026 The kiln developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Device-local data buffers.
//!
//! Buffers are not tracked by the access watcher. Transfers into a buffer are bracketed by a pair
//! of buffer memory barriers recorded by the producer that performs them.

use crate::{
    device::{Device, DeviceOwned},
    macros::impl_id_counter,
    DeviceSize, VulkanObject,
};
use ash::vk;
use std::{fmt, num::NonZero, sync::Arc};

/// A linear array of data, owned by a resource manager.
pub struct DataBuffer {
    handle: vk::Buffer,
    device: Arc<Device>,
    id: NonZero<u64>,
    size: DeviceSize,
    usage: vk::BufferUsageFlags,
}

impl DataBuffer {
    /// Wraps a buffer created outside of kiln.
    ///
    /// # Safety
    ///
    /// - `handle` must be a valid buffer created from `device`, with memory bound to it.
    /// - `size` and `usage` must match the parameters the buffer was created with.
    #[inline]
    pub unsafe fn from_handle(
        device: Arc<Device>,
        handle: vk::Buffer,
        size: DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> Arc<DataBuffer> {
        Arc::new(DataBuffer {
            handle,
            device,
            id: Self::next_id(),
            size,
            usage,
        })
    }

    #[inline]
    pub fn size(&self) -> DeviceSize {
        self.size
    }

    #[inline]
    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }
}

unsafe impl VulkanObject for DataBuffer {
    type Handle = vk::Buffer;

    #[inline]
    fn handle(&self) -> Self::Handle {
        self.handle
    }
}

unsafe impl DeviceOwned for DataBuffer {
    #[inline]
    fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl fmt::Debug for DataBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataBuffer")
            .field("handle", &self.handle)
            .field("size", &self.size)
            .field("usage", &self.usage)
            .finish_non_exhaustive()
    }
}

impl_id_counter!(DataBuffer);
