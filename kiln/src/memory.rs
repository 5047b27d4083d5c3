// Copyright (c) 2026 The kiln developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Scratch memory for one recording session.
//!
//! The [`UniformMemoryPool`] of a command pool hands out short-lived ranges of host-visible,
//! persistently mapped memory. They hold per-draw uniform data and the staging copies of
//! uploads. Allocation is a pointer bump inside fixed-size chunks; the whole pool is rewound at
//! once when its command pool is recycled, which only happens after the GPU is done with it.

use crate::{
    device::{Device, DeviceOwned, HostBuffer},
    DeviceSize, NonExhaustive, ValidationError, VulkanError,
};
use ash::vk;
use bytemuck::Pod;
use std::{fmt, ptr::NonNull, sync::Arc};

const CHUNK_USAGE: vk::BufferUsageFlags = vk::BufferUsageFlags::from_raw(
    vk::BufferUsageFlags::UNIFORM_BUFFER.as_raw() | vk::BufferUsageFlags::TRANSFER_SRC.as_raw(),
);

// Copy commands need at least 4-byte aligned source offsets, and texel copies need the texel
// size, which never exceeds 16.
const MIN_ALIGNMENT: DeviceSize = 16;

/// A bump allocator over host-visible memory chunks.
pub struct UniformMemoryPool {
    device: Arc<Device>,
    chunk_size: DeviceSize,
    alignment: DeviceSize,
    chunks: Vec<HostBuffer>,
    current: usize,
    offset: DeviceSize,
    // Allocations larger than a chunk, freed on reset.
    dedicated: Vec<HostBuffer>,
}

impl UniformMemoryPool {
    /// Creates a pool. No memory is allocated until the first write.
    pub fn new(
        device: Arc<Device>,
        create_info: UniformMemoryPoolCreateInfo,
    ) -> Result<Self, Box<ValidationError>> {
        create_info
            .validate()
            .map_err(|err| err.add_context("create_info"))?;

        let UniformMemoryPoolCreateInfo {
            chunk_size,
            _ne: _,
        } = create_info;

        let alignment = device
            .properties()
            .min_uniform_buffer_offset_alignment
            .max(MIN_ALIGNMENT);

        Ok(UniformMemoryPool {
            device,
            chunk_size,
            alignment,
            chunks: Vec::new(),
            current: 0,
            offset: 0,
            dedicated: Vec::new(),
        })
    }

    /// Returns the alignment of every allocation.
    #[inline]
    pub fn alignment(&self) -> DeviceSize {
        self.alignment
    }

    /// Returns the number of chunks allocated so far, dedicated ones excluded.
    #[inline]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    fn allocate(
        &mut self,
        size: DeviceSize,
    ) -> Result<(UniformAllocation, NonNull<u8>), VulkanError> {
        if size > self.chunk_size {
            let buffer = self.device.raw().create_host_buffer(size, CHUNK_USAGE)?;
            tracing::debug!(size, "allocated dedicated uniform memory");

            let allocation = UniformAllocation {
                buffer: buffer.handle,
                offset: 0,
                size,
            };
            let ptr = buffer.mapped;
            self.dedicated.push(buffer);

            return Ok((allocation, ptr));
        }

        loop {
            if let Some(chunk) = self.chunks.get(self.current) {
                let offset = self.offset.next_multiple_of(self.alignment);

                if offset + size <= chunk.size {
                    self.offset = offset + size;

                    // SAFETY: `offset + size` is within the mapped range of the chunk.
                    let ptr = unsafe { chunk.mapped.add(offset as usize) };

                    return Ok((
                        UniformAllocation {
                            buffer: chunk.handle,
                            offset,
                            size,
                        },
                        ptr,
                    ));
                }

                self.current += 1;
                self.offset = 0;
            } else {
                let chunk = self
                    .device
                    .raw()
                    .create_host_buffer(self.chunk_size, CHUNK_USAGE)?;
                tracing::debug!(
                    chunk_size = self.chunk_size,
                    chunk_count = self.chunks.len() + 1,
                    "allocated uniform memory chunk",
                );
                self.chunks.push(chunk);
            }
        }
    }

    /// Copies `data` into a new allocation.
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<UniformAllocation, VulkanError> {
        let (allocation, ptr) = self.allocate(data.len() as DeviceSize)?;

        // SAFETY: `ptr` points to at least `data.len()` bytes of mapped memory that nothing else
        // refers to until the pool is reset.
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.as_ptr(), data.len()) };

        Ok(allocation)
    }

    /// Copies `data` into a new allocation.
    #[inline]
    pub fn write<T: Pod>(&mut self, data: &T) -> Result<UniformAllocation, VulkanError> {
        self.write_bytes(bytemuck::bytes_of(data))
    }

    /// Copies `data` into a new allocation.
    #[inline]
    pub fn write_slice<T: Pod>(&mut self, data: &[T]) -> Result<UniformAllocation, VulkanError> {
        self.write_bytes(bytemuck::cast_slice(data))
    }

    /// Rewinds the pool. Chunks are kept for reuse and dedicated allocations are freed.
    ///
    /// # Safety
    ///
    /// - The device must no longer use any allocation made since the last reset.
    pub unsafe fn reset(&mut self) {
        for buffer in self.dedicated.drain(..) {
            // SAFETY: The caller guarantees that the buffer is no longer in use.
            unsafe { self.device.raw().destroy_host_buffer(&buffer) };
        }

        self.current = 0;
        self.offset = 0;
    }
}

impl Drop for UniformMemoryPool {
    fn drop(&mut self) {
        for buffer in self.chunks.drain(..).chain(self.dedicated.drain(..)) {
            // SAFETY: The owning command pool is only dropped once its work is complete.
            unsafe { self.device.raw().destroy_host_buffer(&buffer) };
        }
    }
}

unsafe impl DeviceOwned for UniformMemoryPool {
    #[inline]
    fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl fmt::Debug for UniformMemoryPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UniformMemoryPool")
            .field("chunk_size", &self.chunk_size)
            .field("alignment", &self.alignment)
            .field("chunk_count", &self.chunks.len())
            .field("current", &self.current)
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

/// Parameters to create a new `UniformMemoryPool`.
#[derive(Clone, Debug)]
pub struct UniformMemoryPoolCreateInfo {
    /// The size of one chunk of memory. Larger allocations get memory of their own.
    ///
    /// The default value is `65536`.
    pub chunk_size: DeviceSize,

    pub _ne: NonExhaustive,
}

impl Default for UniformMemoryPoolCreateInfo {
    #[inline]
    fn default() -> Self {
        UniformMemoryPoolCreateInfo {
            chunk_size: 65536,
            _ne: NonExhaustive(()),
        }
    }
}

impl UniformMemoryPoolCreateInfo {
    pub(crate) fn validate(&self) -> Result<(), Box<ValidationError>> {
        if self.chunk_size == 0 {
            return Err(ValidationError::new("chunk_size", "is zero"));
        }

        Ok(())
    }
}

/// A range of a uniform memory chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UniformAllocation {
    pub buffer: vk::Buffer,
    pub offset: DeviceSize,
    pub size: DeviceSize,
}

impl UniformAllocation {
    #[inline]
    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.buffer,
            offset: self.offset,
            range: self.size,
        }
    }
}
