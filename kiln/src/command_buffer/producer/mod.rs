// Copyright (c) 2026 The kiln developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

use super::{sys::RawCommand, CommandBuffer, CommandPool};
use crate::{
    access::{AccessDeclaration, AccessWatcher, ResourceAccess},
    buffer::DataBuffer,
    device::{Device, DeviceOwned},
    image::{format_block, Image, ImageSlice},
    macros::contract_violation,
    memory::UniformAllocation,
    sync::{BufferMemoryBarrier, DependencyInfo, MemoryAccess, SyncPoint},
    DeviceSize, Validated, ValidationError, VulkanError, VulkanObject,
};
use ash::vk;
use bytemuck::Pod;
use smallvec::{smallvec, SmallVec};
use std::{any::Any, fmt, sync::Arc};

pub mod compute;
pub mod graphic;

/// Records transfer commands into one command buffer.
///
/// Every command that touches an auto-controlled image declares its access to the
/// [`AccessWatcher`] of the producer first. The barriers the watcher asks for are recorded
/// right before the command.
///
/// A producer is created by [`CommandQueue::start_commands`] and consumed by
/// [`CommandQueue::submit_commands`]. Dropping it instead discards everything recorded.
///
/// [`CommandQueue::start_commands`]: crate::queue::CommandQueue::start_commands
/// [`CommandQueue::submit_commands`]: crate::queue::CommandQueue::submit_commands
pub struct CommandProducerTransfer {
    device: Arc<Device>,
    pool: Box<CommandPool>,
    buffer_index: usize,
    watcher: AccessWatcher,
    debug_name: Option<String>,
    waits: SmallVec<[SyncPoint; 2]>,
    label_depth: u32,
}

impl CommandProducerTransfer {
    pub(crate) fn new(
        mut pool: Box<CommandPool>,
        debug_name: Option<&str>,
    ) -> Result<Self, VulkanError> {
        let device = pool.device().clone();
        let buffer_index = pool.acquire_buffer();
        pool.buffer_mut(buffer_index).begin()?;

        let mut producer = CommandProducerTransfer {
            device,
            pool,
            buffer_index,
            watcher: AccessWatcher::new(),
            debug_name: debug_name.map(str::to_owned),
            waits: SmallVec::new(),
            label_depth: 0,
        };

        if let Some(name) = producer.labeled_name() {
            producer.record(&RawCommand::BeginDebugLabel { name });
        }

        Ok(producer)
    }

    // The debug name, if the device forwards debug labels.
    fn labeled_name(&self) -> Option<String> {
        self.debug_name
            .clone()
            .filter(|_| self.device.properties().debug_labels)
    }

    /// Returns the name given to [`CommandQueue::start_commands`].
    ///
    /// [`CommandQueue::start_commands`]: crate::queue::CommandQueue::start_commands
    #[inline]
    pub fn debug_name(&self) -> Option<&str> {
        self.debug_name.as_deref()
    }

    /// Returns the access watcher of the command buffer.
    #[inline]
    pub fn watcher(&self) -> &AccessWatcher {
        &self.watcher
    }

    /// Returns the sync points the submission will wait for.
    #[inline]
    pub fn waits(&self) -> &[SyncPoint] {
        &self.waits
    }

    #[inline]
    fn buffer_mut(&mut self) -> &mut CommandBuffer {
        self.pool.buffer_mut(self.buffer_index)
    }

    // Records the pending barriers, then `command`.
    pub(crate) fn record(&mut self, command: &RawCommand) {
        self.flush_barriers();
        self.buffer_mut().record(command);
    }

    pub(crate) fn flush_barriers(&mut self) {
        for dependency_info in self.watcher.take_barriers() {
            self.buffer_mut()
                .record(&RawCommand::PipelineBarrier(dependency_info));
        }
    }

    #[track_caller]
    pub(crate) fn expect_outside_render_pass(&self, command: &str) {
        if self.watcher.is_in_render_pass() {
            contract_violation!("{command} recorded inside a render pass");
        }
    }

    /// Keeps `resource` alive until the work recorded here is complete.
    #[inline]
    pub fn lock_resource<T>(&mut self, resource: Arc<T>) -> &mut Self
    where
        T: Any + Send + Sync,
    {
        self.pool.lock_resource(resource);

        self
    }

    /// Declares an access to `image` made by a command recorded outside of kiln, and records
    /// the barriers it needs.
    pub fn add_image_usage(
        &mut self,
        image: &Arc<Image>,
        access: &ResourceAccess,
    ) -> AccessDeclaration {
        let declaration = self.watcher.declare(image, access);
        self.flush_barriers();
        self.lock_resource(image.clone());

        declaration
    }

    /// Records a pipeline barrier as is.
    ///
    /// # Safety
    ///
    /// - The barrier must not change the layout of an auto-controlled image.
    pub unsafe fn pipeline_barrier(&mut self, dependency_info: DependencyInfo) -> &mut Self {
        if !dependency_info.is_empty() {
            self.record(&RawCommand::PipelineBarrier(dependency_info));
        }

        self
    }

    /// Copies `data` into `buffer` at `offset`, through the scratch memory of the session.
    ///
    /// The copy is ordered after every earlier command that used the buffer, and before every
    /// later one.
    pub fn upload_to_buffer(
        &mut self,
        buffer: &Arc<DataBuffer>,
        offset: DeviceSize,
        data: &[u8],
    ) -> Result<&mut Self, Validated<VulkanError>> {
        let size = data.len() as DeviceSize;
        validate_buffer_range(buffer, offset, size, vk::BufferUsageFlags::TRANSFER_DST)
            .map_err(|err| err.add_context("buffer"))?;
        self.expect_outside_render_pass("buffer upload");

        let staging = self.pool.uniform_memory().write_bytes(data)?;
        self.record_buffer_copy(None, staging.buffer, staging.offset, buffer, offset, size);

        Ok(self)
    }

    /// Same as [`upload_to_buffer`](Self::upload_to_buffer), for typed data.
    #[inline]
    pub fn upload_data<T: Pod>(
        &mut self,
        buffer: &Arc<DataBuffer>,
        offset: DeviceSize,
        data: &[T],
    ) -> Result<&mut Self, Validated<VulkanError>> {
        self.upload_to_buffer(buffer, offset, bytemuck::cast_slice(data))
    }

    /// Copies `data`, tightly packed texels, into one mip level of `image`.
    ///
    /// The image is transitioned to `TRANSFER_DST_OPTIMAL` if it is auto-controlled. Otherwise,
    /// it must already be in that layout.
    pub fn upload_to_image(
        &mut self,
        image: &Arc<Image>,
        slice: ImageSlice,
        data: &[u8],
    ) -> Result<&mut Self, Validated<VulkanError>> {
        validate_image_upload(image, &slice, data)?;
        self.expect_outside_render_pass("image upload");

        let staging = self.pool.uniform_memory().write_bytes(data)?;
        self.watcher.declare(
            image,
            &ResourceAccess::new(
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                MemoryAccess::TRANSFER_WRITE,
                slice,
            ),
        );

        let [width, height, depth] = image.mip_extent(slice.base_mip_level);
        self.record(&RawCommand::CopyBufferToImage {
            src_buffer: staging.buffer,
            dst_image: image.handle(),
            dst_image_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            regions: smallvec![vk::BufferImageCopy {
                buffer_offset: staging.offset,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: slice.to_vk_layers(),
                image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
                image_extent: vk::Extent3D {
                    width,
                    height,
                    depth,
                },
            }],
        });
        self.lock_resource(image.clone());

        Ok(self)
    }

    /// Copies `size` bytes from `src_buffer` to `dst_buffer`.
    pub fn copy_buffer(
        &mut self,
        src_buffer: &Arc<DataBuffer>,
        src_offset: DeviceSize,
        dst_buffer: &Arc<DataBuffer>,
        dst_offset: DeviceSize,
        size: DeviceSize,
    ) -> Result<&mut Self, Box<ValidationError>> {
        validate_buffer_range(src_buffer, src_offset, size, vk::BufferUsageFlags::TRANSFER_SRC)
            .map_err(|err| err.add_context("src_buffer"))?;
        validate_buffer_range(dst_buffer, dst_offset, size, vk::BufferUsageFlags::TRANSFER_DST)
            .map_err(|err| err.add_context("dst_buffer"))?;

        if src_buffer == dst_buffer
            && src_offset < dst_offset + size
            && dst_offset < src_offset + size
        {
            return Err(ValidationError::new(
                "src_offset",
                "the source and destination ranges overlap",
            ));
        }

        self.expect_outside_render_pass("buffer copy");

        let src_barrier = BufferMemoryBarrier {
            src_stages: vk::PipelineStageFlags2::ALL_COMMANDS,
            src_access: vk::AccessFlags2::MEMORY_WRITE,
            dst_stages: vk::PipelineStageFlags2::ALL_TRANSFER,
            dst_access: vk::AccessFlags2::TRANSFER_READ,
            buffer: src_buffer.handle(),
            offset: src_offset,
            size,
        };
        self.record_buffer_copy(
            Some(src_barrier),
            src_buffer.handle(),
            src_offset,
            dst_buffer,
            dst_offset,
            size,
        );
        self.lock_resource(src_buffer.clone());

        Ok(self)
    }

    // Records the copy between a barrier making the destination range writable by transfers and
    // one making the written data visible to every later command.
    fn record_buffer_copy(
        &mut self,
        src_barrier: Option<BufferMemoryBarrier>,
        src_buffer: vk::Buffer,
        src_offset: DeviceSize,
        dst_buffer: &Arc<DataBuffer>,
        dst_offset: DeviceSize,
        size: DeviceSize,
    ) {
        let any_access = vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE;
        let dst_barrier = BufferMemoryBarrier {
            src_stages: vk::PipelineStageFlags2::ALL_COMMANDS,
            src_access: any_access,
            dst_stages: vk::PipelineStageFlags2::ALL_TRANSFER,
            dst_access: vk::AccessFlags2::TRANSFER_WRITE,
            buffer: dst_buffer.handle(),
            offset: dst_offset,
            size,
        };

        let mut before = DependencyInfo::default();
        before.buffer_memory_barriers.extend(src_barrier);
        before.buffer_memory_barriers.push(dst_barrier);

        let after = DependencyInfo {
            buffer_memory_barriers: smallvec![BufferMemoryBarrier {
                src_stages: vk::PipelineStageFlags2::ALL_TRANSFER,
                src_access: vk::AccessFlags2::TRANSFER_WRITE,
                dst_stages: vk::PipelineStageFlags2::ALL_COMMANDS,
                dst_access: any_access,
                ..dst_barrier
            }],
            ..Default::default()
        };

        tracing::trace!(buffer = ?dst_barrier.buffer, dst_offset, size, "buffer copy barriers");

        self.record(&RawCommand::PipelineBarrier(before));
        self.record(&RawCommand::CopyBuffer {
            src_buffer,
            dst_buffer: dst_buffer.handle(),
            regions: smallvec![vk::BufferCopy {
                src_offset,
                dst_offset,
                size,
            }],
        });
        self.record(&RawCommand::PipelineBarrier(after));
        self.lock_resource(dst_buffer.clone());
    }

    /// Copies `data` into the scratch memory of the session, to be used as uniform data by the
    /// commands recorded here.
    #[inline]
    pub fn write_uniform<T: Pod>(&mut self, data: &T) -> Result<UniformAllocation, VulkanError> {
        self.pool.uniform_memory().write(data)
    }

    /// Opens a named region of the command buffer, shown by debugging tools.
    ///
    /// Does nothing on the device if it does not forward debug labels, but every label must
    /// still be closed before the producer is submitted.
    pub fn begin_debug_label(&mut self, name: &str) -> &mut Self {
        if self.device.properties().debug_labels {
            self.record(&RawCommand::BeginDebugLabel {
                name: name.to_owned(),
            });
        }

        self.label_depth += 1;

        self
    }

    /// Closes the last region opened with [`begin_debug_label`](Self::begin_debug_label).
    ///
    /// # Panics
    ///
    /// - Panics if no label is open.
    #[track_caller]
    pub fn end_debug_label(&mut self) -> &mut Self {
        if self.label_depth == 0 {
            contract_violation!("debug label ended while none is open");
        }

        if self.device.properties().debug_labels {
            self.record(&RawCommand::EndDebugLabel);
        }

        self.label_depth -= 1;

        self
    }

    /// Makes the submission wait for `sync_point`, typically the work of another queue.
    ///
    /// Waits on the same semaphore are combined into one wait on the highest value.
    pub fn wait_for(&mut self, sync_point: SyncPoint) -> &mut Self {
        match self
            .waits
            .iter_mut()
            .find(|wait| wait.semaphore() == sync_point.semaphore())
        {
            Some(wait) => {
                if wait.value() < sync_point.value() {
                    *wait = sync_point;
                }
            }
            None => self.waits.push(sync_point),
        }

        self
    }

    /// Ends recording and hands the command pool over for submission.
    ///
    /// The states the tracked images are left in travel with the pool, to be written back once
    /// the submission succeeds.
    ///
    /// # Panics
    ///
    /// - Panics if a debug label or a render pass is still open.
    #[track_caller]
    pub(crate) fn finish(mut self) -> Result<FinishedCommands, VulkanError> {
        if self.label_depth != 0 {
            contract_violation!(
                "command buffer finished with {} debug labels still open",
                self.label_depth,
            );
        }

        self.flush_barriers();

        if self.labeled_name().is_some() {
            self.buffer_mut().record(&RawCommand::EndDebugLabel);
        }

        self.watcher.finalize();
        self.buffer_mut().end()?;

        tracing::trace!(
            name = self.debug_name.as_deref().unwrap_or(""),
            buffer = ?self.pool.buffers()[self.buffer_index].handle(),
            "finished recording",
        );

        Ok(FinishedCommands {
            pool: self.pool,
            waits: self.waits,
            watcher: self.watcher,
        })
    }
}

unsafe impl DeviceOwned for CommandProducerTransfer {
    #[inline]
    fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl fmt::Debug for CommandProducerTransfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandProducerTransfer")
            .field("debug_name", &self.debug_name)
            .field("pool", &self.pool)
            .field("buffer_index", &self.buffer_index)
            .field("watcher", &self.watcher)
            .field("waits", &self.waits)
            .finish_non_exhaustive()
    }
}

/// A recorded command pool, ready to be submitted.
pub(crate) struct FinishedCommands {
    pub(crate) pool: Box<CommandPool>,
    pub(crate) waits: SmallVec<[SyncPoint; 2]>,
    pub(crate) watcher: AccessWatcher,
}

fn validate_buffer_range(
    buffer: &DataBuffer,
    offset: DeviceSize,
    size: DeviceSize,
    usage: vk::BufferUsageFlags,
) -> Result<(), Box<ValidationError>> {
    if size == 0 {
        return Err(ValidationError::new("size", "is zero"));
    }

    if !buffer.usage().contains(usage) {
        return Err(ValidationError::new(
            "usage",
            format!("does not contain {usage:?}"),
        ));
    }

    if offset
        .checked_add(size)
        .map_or(true, |end| end > buffer.size())
    {
        return Err(ValidationError::new(
            "size",
            format!(
                "the range {offset}..{offset}+{size} is out of bounds of a buffer of {} bytes",
                buffer.size(),
            ),
        ));
    }

    Ok(())
}

fn validate_image_upload(
    image: &Image,
    slice: &ImageSlice,
    data: &[u8],
) -> Result<(), Box<ValidationError>> {
    if data.is_empty() {
        return Err(ValidationError::new("data", "is empty"));
    }

    if slice.mip_level_count != 1 {
        return Err(ValidationError::new(
            "slice.mip_level_count",
            "is not 1; uploads target one mip level at a time",
        ));
    }

    if slice.base_mip_level >= image.mip_levels() {
        return Err(ValidationError::new(
            "slice.base_mip_level",
            "is not less than the number of mip levels of the image",
        ));
    }

    if slice.array_layer_count == 0
        || slice.base_array_layer + slice.array_layer_count > image.array_layers()
    {
        return Err(ValidationError::new(
            "slice.array_layer_count",
            "the array layer range is out of bounds of the image",
        ));
    }

    if !image.aspect().contains(slice.aspect) || slice.aspect.is_empty() {
        return Err(ValidationError::new(
            "slice.aspect",
            "is empty or not an aspect of the image",
        ));
    }

    let Some((block_size, [block_width, block_height])) = format_block(image.format()) else {
        return Err(ValidationError::new(
            "image.format",
            format!("{:?} is not a format that can be uploaded to", image.format()),
        ));
    };
    let [width, height, depth] = image.mip_extent(slice.base_mip_level);
    let required_size = DeviceSize::from(width.div_ceil(block_width))
        * DeviceSize::from(height.div_ceil(block_height))
        * DeviceSize::from(depth)
        * DeviceSize::from(slice.array_layer_count)
        * block_size;

    if (data.len() as DeviceSize) < required_size {
        return Err(ValidationError::new(
            "data",
            format!(
                "holds {} bytes, but the copied region needs {required_size}",
                data.len(),
            ),
        ));
    }

    Ok(())
}
