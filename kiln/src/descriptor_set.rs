// Copyright (c) 2026 The kiln developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Descriptor sets and the images they access.
//!
//! A [`DescriptorSet`] carries, next to its handle, the [`AccessSet`] of the images it exposes to
//! shaders. Binding a set hands that access set to the producer, which declares it to the access
//! watcher before the dispatch or render pass that uses it.
//!
//! Sets that live for one recording session are *volatile*: they are allocated from the
//! [`VolatileDescriptorPool`] of the command pool and reclaimed in bulk when it is recycled.

use crate::{
    access::{AccessSet, ResourceAccess},
    buffer::DataBuffer,
    device::{Device, DeviceOwned},
    image::Image,
    macros::{contract_violation, impl_id_counter},
    memory::UniformAllocation,
    sync::MemoryAccess,
    DeviceSize, NonExhaustive, ValidationError, VulkanError, VulkanObject,
};
use ash::vk;
use std::{any::Any, fmt, num::NonZero, sync::Arc};

/// The maximum number of native pools a [`VolatileDescriptorPool`] grows to.
pub const MAX_DESCRIPTOR_POOLS: usize = 16;

/// Describes the bindings of a descriptor set. Created outside of kiln and never destroyed by it.
pub struct DescriptorSetLayout {
    handle: vk::DescriptorSetLayout,
    device: Arc<Device>,
    id: NonZero<u64>,
}

impl DescriptorSetLayout {
    /// # Safety
    ///
    /// - `handle` must be a valid descriptor set layout created from `device`, and must stay
    ///   valid for the life of the returned object.
    #[inline]
    pub unsafe fn from_handle(device: Arc<Device>, handle: vk::DescriptorSetLayout) -> Arc<Self> {
        Arc::new(DescriptorSetLayout {
            handle,
            device,
            id: Self::next_id(),
        })
    }
}

unsafe impl VulkanObject for DescriptorSetLayout {
    type Handle = vk::DescriptorSetLayout;

    #[inline]
    fn handle(&self) -> Self::Handle {
        self.handle
    }
}

unsafe impl DeviceOwned for DescriptorSetLayout {
    #[inline]
    fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl fmt::Debug for DescriptorSetLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescriptorSetLayout")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl_id_counter!(DescriptorSetLayout);

/// The contents of one descriptor as written with `vkUpdateDescriptorSets`.
#[derive(Clone, Copy, Debug)]
pub enum RawDescriptorInfo {
    Buffer(vk::DescriptorBufferInfo),
    Image(vk::DescriptorImageInfo),
}

/// One descriptor update.
#[derive(Clone, Copy, Debug)]
pub struct RawDescriptorWrite {
    pub binding: u32,
    pub array_element: u32,
    pub descriptor_type: vk::DescriptorType,
    pub info: RawDescriptorInfo,
}

/// One resource to write into a descriptor set.
#[derive(Clone, Debug)]
pub enum DescriptorWrite {
    /// A range of a data buffer, read as a uniform buffer.
    UniformBuffer {
        binding: u32,
        buffer: Arc<DataBuffer>,
        offset: DeviceSize,
        range: DeviceSize,
    },

    /// Scratch memory from the uniform memory pool of the recording session.
    UniformMemory {
        binding: u32,
        allocation: UniformAllocation,
    },

    /// A range of a data buffer, read and written as a storage buffer.
    StorageBuffer {
        binding: u32,
        buffer: Arc<DataBuffer>,
        offset: DeviceSize,
        range: DeviceSize,
    },

    /// An image view sampled by shaders running in `stages`, in `SHADER_READ_ONLY_OPTIMAL`.
    SampledImage {
        binding: u32,
        image: Arc<Image>,
        view: vk::ImageView,
        sampler: vk::Sampler,
        stages: vk::PipelineStageFlags2,
    },

    /// An image view read and written by shaders running in `stages`, in `GENERAL`.
    StorageImage {
        binding: u32,
        image: Arc<Image>,
        view: vk::ImageView,
        stages: vk::PipelineStageFlags2,
    },
}

impl DescriptorWrite {
    #[inline]
    pub fn binding(&self) -> u32 {
        match self {
            Self::UniformBuffer { binding, .. }
            | Self::UniformMemory { binding, .. }
            | Self::StorageBuffer { binding, .. }
            | Self::SampledImage { binding, .. }
            | Self::StorageImage { binding, .. } => *binding,
        }
    }

    /// Returns the image access the descriptor implies, if it refers to an image.
    pub fn image_access(&self) -> Option<(&Arc<Image>, ResourceAccess)> {
        match self {
            Self::SampledImage { image, stages, .. } => Some((
                image,
                ResourceAccess::new(
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    MemoryAccess::shader_sampled_read(*stages),
                    image.full_slice(),
                ),
            )),
            Self::StorageImage { image, stages, .. } => Some((
                image,
                ResourceAccess::new(
                    vk::ImageLayout::GENERAL,
                    MemoryAccess::shader_storage_read_write(*stages),
                    image.full_slice(),
                ),
            )),
            _ => None,
        }
    }

    pub(crate) fn to_raw(&self) -> RawDescriptorWrite {
        let (descriptor_type, info) = match self {
            Self::UniformBuffer {
                buffer,
                offset,
                range,
                ..
            } => (
                vk::DescriptorType::UNIFORM_BUFFER,
                RawDescriptorInfo::Buffer(vk::DescriptorBufferInfo {
                    buffer: buffer.handle(),
                    offset: *offset,
                    range: *range,
                }),
            ),
            Self::UniformMemory { allocation, .. } => (
                vk::DescriptorType::UNIFORM_BUFFER,
                RawDescriptorInfo::Buffer(allocation.descriptor_info()),
            ),
            Self::StorageBuffer {
                buffer,
                offset,
                range,
                ..
            } => (
                vk::DescriptorType::STORAGE_BUFFER,
                RawDescriptorInfo::Buffer(vk::DescriptorBufferInfo {
                    buffer: buffer.handle(),
                    offset: *offset,
                    range: *range,
                }),
            ),
            Self::SampledImage { view, sampler, .. } => (
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                RawDescriptorInfo::Image(vk::DescriptorImageInfo {
                    sampler: *sampler,
                    image_view: *view,
                    image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                }),
            ),
            Self::StorageImage { view, .. } => (
                vk::DescriptorType::STORAGE_IMAGE,
                RawDescriptorInfo::Image(vk::DescriptorImageInfo {
                    sampler: vk::Sampler::null(),
                    image_view: *view,
                    image_layout: vk::ImageLayout::GENERAL,
                }),
            ),
        };

        RawDescriptorWrite {
            binding: self.binding(),
            array_element: 0,
            descriptor_type,
            info,
        }
    }

    fn resource(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        match self {
            Self::UniformBuffer { buffer, .. } | Self::StorageBuffer { buffer, .. } => {
                Some(buffer.clone())
            }
            Self::SampledImage { image, .. } | Self::StorageImage { image, .. } => {
                Some(image.clone())
            }
            Self::UniformMemory { .. } => None,
        }
    }
}

/// A descriptor set together with the image accesses it implies.
pub struct DescriptorSet {
    handle: vk::DescriptorSet,
    device: Arc<Device>,
    id: NonZero<u64>,
    accesses: AccessSet,
    // Keeps the buffers and images referenced by the descriptors alive.
    resources: Vec<Arc<dyn Any + Send + Sync>>,
}

impl DescriptorSet {
    /// Wraps a set allocated and written outside of kiln.
    ///
    /// # Safety
    ///
    /// - `handle` must be a valid descriptor set allocated from `device`.
    /// - `accesses` must describe every image the set refers to.
    /// - The images and buffers the set refers to must outlive every use of the set.
    #[inline]
    pub unsafe fn from_handle(
        device: Arc<Device>,
        handle: vk::DescriptorSet,
        accesses: AccessSet,
    ) -> Arc<Self> {
        Arc::new(DescriptorSet {
            handle,
            device,
            id: Self::next_id(),
            accesses,
            resources: Vec::new(),
        })
    }

    /// Allocates a set from `pool` and writes `writes` into it.
    ///
    /// The returned set is only valid until `pool` is reset.
    pub fn new_volatile(
        pool: &mut VolatileDescriptorPool,
        layout: &DescriptorSetLayout,
        writes: &[DescriptorWrite],
    ) -> Result<Arc<Self>, VulkanError> {
        let mut accesses = AccessSet::new();

        for write in writes {
            if let Some((image, access)) = write.image_access() {
                accesses.add(image.clone(), access);
            }
        }

        let handle = pool.allocate(layout)?;
        let raw_writes: Vec<_> = writes.iter().map(DescriptorWrite::to_raw).collect();

        // SAFETY: `handle` was just allocated and is not in use by the device.
        unsafe { pool.device.raw().update_descriptor_set(handle, &raw_writes) };

        Ok(Arc::new(DescriptorSet {
            handle,
            device: pool.device.clone(),
            id: Self::next_id(),
            accesses,
            resources: writes.iter().filter_map(DescriptorWrite::resource).collect(),
        }))
    }

    /// Returns the image accesses of the set.
    #[inline]
    pub fn accesses(&self) -> &AccessSet {
        &self.accesses
    }
}

unsafe impl VulkanObject for DescriptorSet {
    type Handle = vk::DescriptorSet;

    #[inline]
    fn handle(&self) -> Self::Handle {
        self.handle
    }
}

unsafe impl DeviceOwned for DescriptorSet {
    #[inline]
    fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl fmt::Debug for DescriptorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescriptorSet")
            .field("handle", &self.handle)
            .field("accesses", &self.accesses)
            .field("resource_count", &self.resources.len())
            .finish_non_exhaustive()
    }
}

impl_id_counter!(DescriptorSet);

/// Allocates descriptor sets for one recording session.
///
/// When a native pool runs out of room, a new one is created, up to [`MAX_DESCRIPTOR_POOLS`].
/// Going past that limit panics: the number of sets one session needs is a property of the
/// renderer, not something that grows frame by frame.
pub struct VolatileDescriptorPool {
    device: Arc<Device>,
    max_sets: u32,
    pool_sizes: Vec<vk::DescriptorPoolSize>,
    pools: Vec<vk::DescriptorPool>,
    current: usize,
}

impl VolatileDescriptorPool {
    pub fn new(
        device: Arc<Device>,
        create_info: VolatileDescriptorPoolCreateInfo,
    ) -> Result<Self, VulkanError> {
        let VolatileDescriptorPoolCreateInfo {
            max_sets,
            pool_sizes,
            _ne: _,
        } = create_info;

        let first = device.raw().create_descriptor_pool(max_sets, &pool_sizes)?;

        Ok(VolatileDescriptorPool {
            device,
            max_sets,
            pool_sizes,
            pools: vec![first],
            current: 0,
        })
    }

    /// Returns the number of native pools created so far.
    #[inline]
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Allocates one set with the given layout.
    ///
    /// # Panics
    ///
    /// - Panics if every pool is full and [`MAX_DESCRIPTOR_POOLS`] pools exist already.
    pub fn allocate(
        &mut self,
        layout: &DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet, VulkanError> {
        loop {
            // SAFETY: The pool is owned by `self` and only used from the thread recording the
            // session.
            let result = unsafe {
                self.device
                    .raw()
                    .allocate_descriptor_set(self.pools[self.current], layout.handle())
            };

            match result {
                Ok(set) => return Ok(set),
                Err(err) if err.is_pool_exhaustion() => {}
                Err(err) => return Err(err),
            }

            self.current += 1;

            if self.current == self.pools.len() {
                if self.pools.len() == MAX_DESCRIPTOR_POOLS {
                    contract_violation!(
                        "volatile descriptor pool exhausted after {MAX_DESCRIPTOR_POOLS} pools",
                    );
                }

                let pool = self
                    .device
                    .raw()
                    .create_descriptor_pool(self.max_sets, &self.pool_sizes)?;
                tracing::debug!(pool_count = self.pools.len() + 1, "grew volatile descriptor pool");
                self.pools.push(pool);
            }
        }
    }

    /// Frees every set allocated so far.
    ///
    /// # Safety
    ///
    /// - The device must no longer use any set allocated from the pool.
    pub unsafe fn reset(&mut self) -> Result<(), VulkanError> {
        for &pool in &self.pools[..=self.current] {
            // SAFETY: The caller guarantees that no set of the pool is in use.
            unsafe { self.device.raw().reset_descriptor_pool(pool) }?;
        }

        self.current = 0;

        Ok(())
    }
}

impl Drop for VolatileDescriptorPool {
    fn drop(&mut self) {
        for pool in self.pools.drain(..) {
            // SAFETY: The owning command pool is only dropped once its work is complete.
            unsafe { self.device.raw().destroy_descriptor_pool(pool) };
        }
    }
}

unsafe impl DeviceOwned for VolatileDescriptorPool {
    #[inline]
    fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl fmt::Debug for VolatileDescriptorPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VolatileDescriptorPool")
            .field("max_sets", &self.max_sets)
            .field("pool_count", &self.pools.len())
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

/// Parameters to create a new `VolatileDescriptorPool`.
#[derive(Clone, Debug)]
pub struct VolatileDescriptorPoolCreateInfo {
    /// The number of sets each native pool holds.
    ///
    /// The default value is `256`.
    pub max_sets: u32,

    /// The number of descriptors of each type each native pool holds.
    ///
    /// The default value has room for 512 uniform buffers, 512 combined image samplers, 128
    /// storage buffers and 64 storage images.
    pub pool_sizes: Vec<vk::DescriptorPoolSize>,

    pub _ne: NonExhaustive,
}

impl Default for VolatileDescriptorPoolCreateInfo {
    #[inline]
    fn default() -> Self {
        VolatileDescriptorPoolCreateInfo {
            max_sets: 256,
            pool_sizes: vec![
                vk::DescriptorPoolSize {
                    ty: vk::DescriptorType::UNIFORM_BUFFER,
                    descriptor_count: 512,
                },
                vk::DescriptorPoolSize {
                    ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    descriptor_count: 512,
                },
                vk::DescriptorPoolSize {
                    ty: vk::DescriptorType::STORAGE_BUFFER,
                    descriptor_count: 128,
                },
                vk::DescriptorPoolSize {
                    ty: vk::DescriptorType::STORAGE_IMAGE,
                    descriptor_count: 64,
                },
            ],
            _ne: NonExhaustive(()),
        }
    }
}

impl VolatileDescriptorPoolCreateInfo {
    pub(crate) fn validate(&self) -> Result<(), Box<ValidationError>> {
        if self.max_sets == 0 {
            return Err(ValidationError::new("max_sets", "is zero"));
        }

        if self.pool_sizes.is_empty() {
            return Err(ValidationError::new("pool_sizes", "is empty"));
        }

        Ok(())
    }
}
