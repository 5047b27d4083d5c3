// Copyright (c) 2026 The kiln developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The production [`RawDevice`], calling into a Vulkan driver through `ash`.
//!
//! The logical device is created by the application, with Vulkan 1.3 and the
//! `synchronization2`, `timelineSemaphore` and `dynamicRendering` features enabled. kiln only
//! borrows it and never destroys it.

use super::{DeviceProperties, HostBuffer, RawDevice, SemaphoreSubmitInfo, SubmitInfo};
use crate::{
    command_buffer::sys::RawCommand,
    descriptor_set::{RawDescriptorInfo, RawDescriptorWrite},
    render_pass::{RenderingAttachment, RenderingInfo},
    sync::DependencyInfo,
    DeviceSize, NonExhaustive, VulkanError,
};
use ash::vk;
use smallvec::SmallVec;
use std::{ffi::CString, fmt, ptr::NonNull, slice, time::Duration};

/// A [`RawDevice`] backed by a Vulkan logical device.
pub struct VulkanDevice {
    device: ash::Device,
    debug_utils: Option<ash::ext::debug_utils::Device>,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    properties: DeviceProperties,
}

impl VulkanDevice {
    /// Wraps a logical device created by the application.
    ///
    /// # Safety
    ///
    /// - `device` must have been created from `physical_device`, which must belong to
    ///   `instance`.
    /// - `device` must support Vulkan 1.3 with the `synchronization2`, `timelineSemaphore` and
    ///   `dynamicRendering` features enabled.
    /// - If `create_info.debug_labels` is `true`, `instance` must have been created with the
    ///   `VK_EXT_debug_utils` extension enabled.
    /// - `device` must outlive the returned object and every object created from it.
    pub unsafe fn new(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: ash::Device,
        create_info: VulkanDeviceCreateInfo,
    ) -> VulkanDevice {
        let VulkanDeviceCreateInfo {
            debug_labels,
            _ne: _,
        } = create_info;

        // SAFETY: The caller guarantees that `physical_device` belongs to `instance`.
        let physical_properties =
            unsafe { instance.get_physical_device_properties(physical_device) };
        // SAFETY: Same as above.
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };
        let debug_utils =
            debug_labels.then(|| ash::ext::debug_utils::Device::new(instance, &device));

        tracing::info!(
            device = ?device.handle(),
            api_version = physical_properties.api_version,
            debug_labels,
            "wrapped Vulkan device",
        );

        VulkanDevice {
            device,
            debug_utils,
            memory_properties,
            properties: DeviceProperties {
                min_uniform_buffer_offset_alignment: physical_properties
                    .limits
                    .min_uniform_buffer_offset_alignment,
                debug_labels,
            },
        }
    }

    /// Returns the wrapped logical device.
    #[inline]
    pub fn ash_device(&self) -> &ash::Device {
        &self.device
    }

    /// Picks a host-visible, host-coherent memory type among `type_bits`, preferring device-local
    /// memory.
    fn host_memory_type(&self, type_bits: u32) -> Option<u32> {
        let required = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let count = self.memory_properties.memory_type_count as usize;

        self.memory_properties.memory_types[..count]
            .iter()
            .enumerate()
            .filter(|&(index, memory_type)| {
                type_bits & (1 << index) != 0 && memory_type.property_flags.contains(required)
            })
            .min_by_key(|(_, memory_type)| {
                !memory_type
                    .property_flags
                    .contains(vk::MemoryPropertyFlags::DEVICE_LOCAL)
            })
            .map(|(index, _)| index as u32)
    }

    unsafe fn record_barrier(&self, command_buffer: vk::CommandBuffer, info: &DependencyInfo) {
        let memory_barriers: SmallVec<[_; 2]> = info
            .memory_barriers
            .iter()
            .map(|barrier| {
                vk::MemoryBarrier2::default()
                    .src_stage_mask(barrier.src_stages)
                    .src_access_mask(barrier.src_access)
                    .dst_stage_mask(barrier.dst_stages)
                    .dst_access_mask(barrier.dst_access)
            })
            .collect();
        let buffer_memory_barriers: SmallVec<[_; 4]> = info
            .buffer_memory_barriers
            .iter()
            .map(|barrier| {
                vk::BufferMemoryBarrier2::default()
                    .src_stage_mask(barrier.src_stages)
                    .src_access_mask(barrier.src_access)
                    .dst_stage_mask(barrier.dst_stages)
                    .dst_access_mask(barrier.dst_access)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .buffer(barrier.buffer)
                    .offset(barrier.offset)
                    .size(barrier.size)
            })
            .collect();
        let image_memory_barriers: SmallVec<[_; 4]> = info
            .image_memory_barriers
            .iter()
            .map(|barrier| {
                vk::ImageMemoryBarrier2::default()
                    .src_stage_mask(barrier.src_stages)
                    .src_access_mask(barrier.src_access)
                    .dst_stage_mask(barrier.dst_stages)
                    .dst_access_mask(barrier.dst_access)
                    .old_layout(barrier.old_layout)
                    .new_layout(barrier.new_layout)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(barrier.image)
                    .subresource_range(barrier.subresource_range.to_vk())
            })
            .collect();

        let dependency_info = vk::DependencyInfo::default()
            .memory_barriers(&memory_barriers)
            .buffer_memory_barriers(&buffer_memory_barriers)
            .image_memory_barriers(&image_memory_barriers);

        unsafe {
            self.device
                .cmd_pipeline_barrier2(command_buffer, &dependency_info)
        };
    }

    unsafe fn record_begin_rendering(
        &self,
        command_buffer: vk::CommandBuffer,
        info: &RenderingInfo,
    ) {
        let color_attachments: SmallVec<[_; 4]> = info
            .color_attachments
            .iter()
            .map(rendering_attachment_info)
            .collect();
        let depth_attachment = info.depth_attachment.as_ref().map(rendering_attachment_info);

        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(info.render_area)
            .layer_count(info.layer_count)
            .color_attachments(&color_attachments);

        if let Some(depth_attachment) = &depth_attachment {
            rendering_info = rendering_info.depth_attachment(depth_attachment);
        }

        unsafe {
            self.device
                .cmd_begin_rendering(command_buffer, &rendering_info)
        };
    }
}

fn rendering_attachment_info(
    attachment: &RenderingAttachment,
) -> vk::RenderingAttachmentInfo<'static> {
    vk::RenderingAttachmentInfo::default()
        .image_view(attachment.image_view)
        .image_layout(attachment.image_layout)
        .load_op(attachment.load_op)
        .store_op(attachment.store_op)
        .clear_value(
            attachment
                .clear_value
                .map_or(vk::ClearValue::default(), |value| value.to_vk()),
        )
}

fn timeout_nanos(timeout: Option<Duration>) -> u64 {
    timeout.map_or(u64::MAX, |timeout| {
        u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
    })
}

fn semaphore_submit_info(info: &SemaphoreSubmitInfo) -> vk::SemaphoreSubmitInfo<'static> {
    vk::SemaphoreSubmitInfo::default()
        .semaphore(info.semaphore)
        .value(info.value)
        .stage_mask(info.stages)
}

unsafe impl RawDevice for VulkanDevice {
    #[inline]
    fn properties(&self) -> &DeviceProperties {
        &self.properties
    }

    #[inline]
    fn queue(&self, queue_family_index: u32, queue_index: u32) -> vk::Queue {
        // SAFETY: The caller of `VulkanDevice::new` guarantees the device is valid.
        unsafe { self.device.get_device_queue(queue_family_index, queue_index) }
    }

    fn create_command_pool(
        &self,
        queue_family_index: u32,
    ) -> Result<vk::CommandPool, VulkanError> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::TRANSIENT)
            .queue_family_index(queue_family_index);

        // SAFETY: `create_info` is valid.
        Ok(unsafe { self.device.create_command_pool(&create_info, None) }?)
    }

    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) };
    }

    unsafe fn reset_command_pool(&self, pool: vk::CommandPool) -> Result<(), VulkanError> {
        unsafe {
            self.device
                .reset_command_pool(pool, vk::CommandPoolResetFlags::empty())
        }?;

        Ok(())
    }

    unsafe fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>, VulkanError> {
        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        Ok(unsafe { self.device.allocate_command_buffers(&allocate_info) }?)
    }

    unsafe fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
    ) -> Result<(), VulkanError> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe { self.device.begin_command_buffer(command_buffer, &begin_info) }?;

        Ok(())
    }

    unsafe fn end_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
    ) -> Result<(), VulkanError> {
        unsafe { self.device.end_command_buffer(command_buffer) }?;

        Ok(())
    }

    unsafe fn record(&self, command_buffer: vk::CommandBuffer, command: &RawCommand) {
        let device = &self.device;

        match command {
            RawCommand::PipelineBarrier(info) => unsafe {
                self.record_barrier(command_buffer, info)
            },
            RawCommand::CopyBuffer {
                src_buffer,
                dst_buffer,
                regions,
            } => unsafe {
                device.cmd_copy_buffer(command_buffer, *src_buffer, *dst_buffer, regions)
            },
            RawCommand::CopyBufferToImage {
                src_buffer,
                dst_image,
                dst_image_layout,
                regions,
            } => unsafe {
                device.cmd_copy_buffer_to_image(
                    command_buffer,
                    *src_buffer,
                    *dst_image,
                    *dst_image_layout,
                    regions,
                )
            },
            RawCommand::BindPipeline {
                bind_point,
                pipeline,
            } => unsafe { device.cmd_bind_pipeline(command_buffer, *bind_point, *pipeline) },
            RawCommand::BindDescriptorSets {
                bind_point,
                layout,
                first_set,
                sets,
                dynamic_offsets,
            } => unsafe {
                device.cmd_bind_descriptor_sets(
                    command_buffer,
                    *bind_point,
                    *layout,
                    *first_set,
                    sets,
                    dynamic_offsets,
                )
            },
            RawCommand::BindVertexBuffers {
                first_binding,
                buffers,
                offsets,
            } => unsafe {
                device.cmd_bind_vertex_buffers(command_buffer, *first_binding, buffers, offsets)
            },
            RawCommand::BindIndexBuffer {
                buffer,
                offset,
                index_type,
            } => unsafe {
                device.cmd_bind_index_buffer(command_buffer, *buffer, *offset, *index_type)
            },
            RawCommand::PushConstants {
                layout,
                stages,
                offset,
                data,
            } => unsafe {
                device.cmd_push_constants(command_buffer, *layout, *stages, *offset, data)
            },
            RawCommand::Dispatch {
                group_counts: [x, y, z],
            } => unsafe { device.cmd_dispatch(command_buffer, *x, *y, *z) },
            RawCommand::BeginRendering(info) => unsafe {
                self.record_begin_rendering(command_buffer, info)
            },
            RawCommand::EndRendering => unsafe { device.cmd_end_rendering(command_buffer) },
            RawCommand::SetViewport { viewports } => unsafe {
                device.cmd_set_viewport(command_buffer, 0, viewports)
            },
            RawCommand::SetScissor { scissors } => unsafe {
                device.cmd_set_scissor(command_buffer, 0, scissors)
            },
            RawCommand::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            } => unsafe {
                device.cmd_draw(
                    command_buffer,
                    *vertex_count,
                    *instance_count,
                    *first_vertex,
                    *first_instance,
                )
            },
            RawCommand::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            } => unsafe {
                device.cmd_draw_indexed(
                    command_buffer,
                    *index_count,
                    *instance_count,
                    *first_index,
                    *vertex_offset,
                    *first_instance,
                )
            },
            RawCommand::BeginDebugLabel { name } => {
                if let Some(debug_utils) = &self.debug_utils {
                    let name = CString::new(name.replace('\0', "")).unwrap_or_default();
                    let label = vk::DebugUtilsLabelEXT::default().label_name(&name);

                    unsafe { debug_utils.cmd_begin_debug_utils_label(command_buffer, &label) };
                }
            }
            RawCommand::EndDebugLabel => {
                if let Some(debug_utils) = &self.debug_utils {
                    unsafe { debug_utils.cmd_end_debug_utils_label(command_buffer) };
                }
            }
        }
    }

    fn create_timeline_semaphore(&self, initial_value: u64) -> Result<vk::Semaphore, VulkanError> {
        let mut type_create_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(initial_value);
        let create_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_create_info);

        // SAFETY: `create_info` is valid.
        Ok(unsafe { self.device.create_semaphore(&create_info, None) }?)
    }

    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) };
    }

    unsafe fn semaphore_counter_value(
        &self,
        semaphore: vk::Semaphore,
    ) -> Result<u64, VulkanError> {
        Ok(unsafe { self.device.get_semaphore_counter_value(semaphore) }?)
    }

    unsafe fn wait_semaphore(
        &self,
        semaphore: vk::Semaphore,
        value: u64,
        timeout: Option<Duration>,
    ) -> Result<(), VulkanError> {
        let semaphores = [semaphore];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);

        unsafe {
            self.device
                .wait_semaphores(&wait_info, timeout_nanos(timeout))
        }?;

        Ok(())
    }

    unsafe fn signal_semaphore(
        &self,
        semaphore: vk::Semaphore,
        value: u64,
    ) -> Result<(), VulkanError> {
        let signal_info = vk::SemaphoreSignalInfo::default()
            .semaphore(semaphore)
            .value(value);

        unsafe { self.device.signal_semaphore(&signal_info) }?;

        Ok(())
    }

    unsafe fn queue_submit(
        &self,
        queue: vk::Queue,
        submit_info: &SubmitInfo,
    ) -> Result<(), VulkanError> {
        let wait_semaphore_infos: SmallVec<[_; 4]> = submit_info
            .wait_semaphores
            .iter()
            .map(semaphore_submit_info)
            .collect();
        let command_buffer_infos: SmallVec<[_; 1]> = submit_info
            .command_buffers
            .iter()
            .map(|&command_buffer| {
                vk::CommandBufferSubmitInfo::default().command_buffer(command_buffer)
            })
            .collect();
        let signal_semaphore_infos: SmallVec<[_; 1]> = submit_info
            .signal_semaphores
            .iter()
            .map(semaphore_submit_info)
            .collect();

        let submit_info = vk::SubmitInfo2::default()
            .wait_semaphore_infos(&wait_semaphore_infos)
            .command_buffer_infos(&command_buffer_infos)
            .signal_semaphore_infos(&signal_semaphore_infos);

        unsafe {
            self.device
                .queue_submit2(queue, slice::from_ref(&submit_info), vk::Fence::null())
        }?;

        Ok(())
    }

    fn create_host_buffer(
        &self,
        size: DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> Result<HostBuffer, VulkanError> {
        let create_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        // SAFETY: `create_info` is valid.
        let handle = unsafe { self.device.create_buffer(&create_info, None) }?;

        // SAFETY: `handle` was just created from this device.
        let requirements = unsafe { self.device.get_buffer_memory_requirements(handle) };

        let memory = self
            .host_memory_type(requirements.memory_type_bits)
            .ok_or(VulkanError::OutOfDeviceMemory)
            .and_then(|memory_type_index| {
                let allocate_info = vk::MemoryAllocateInfo::default()
                    .allocation_size(requirements.size)
                    .memory_type_index(memory_type_index);

                // SAFETY: `allocate_info` is valid.
                Ok(unsafe { self.device.allocate_memory(&allocate_info, None) }?)
            });
        let memory = match memory {
            Ok(memory) => memory,
            Err(err) => {
                // SAFETY: The buffer is not in use.
                unsafe { self.device.destroy_buffer(handle, None) };

                return Err(err);
            }
        };

        let mapped = (|| -> Result<NonNull<u8>, VulkanError> {
            // SAFETY: `memory` is unbound, fresh and at least `requirements.size` bytes large.
            unsafe { self.device.bind_buffer_memory(handle, memory, 0) }?;

            // SAFETY: `memory` is host-visible and not mapped yet.
            let ptr = unsafe {
                self.device
                    .map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
            }?;

            NonNull::new(ptr.cast::<u8>()).ok_or(VulkanError::MemoryMapFailed)
        })();
        let mapped = match mapped {
            Ok(mapped) => mapped,
            Err(err) => {
                // SAFETY: Neither object is in use.
                unsafe { self.device.destroy_buffer(handle, None) };
                // SAFETY: Same as above.
                unsafe { self.device.free_memory(memory, None) };

                return Err(err);
            }
        };

        tracing::debug!(buffer = ?handle, size, "created host buffer");

        Ok(HostBuffer {
            handle,
            memory,
            size,
            mapped,
        })
    }

    unsafe fn destroy_host_buffer(&self, buffer: &HostBuffer) {
        unsafe { self.device.destroy_buffer(buffer.handle, None) };
        // Freeing the memory also unmaps it.
        unsafe { self.device.free_memory(buffer.memory, None) };
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> Result<vk::DescriptorPool, VulkanError> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);

        // SAFETY: `create_info` is valid.
        Ok(unsafe { self.device.create_descriptor_pool(&create_info, None) }?)
    }

    unsafe fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.device.destroy_descriptor_pool(pool, None) };
    }

    unsafe fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> Result<(), VulkanError> {
        unsafe {
            self.device
                .reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty())
        }?;

        Ok(())
    }

    unsafe fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet, VulkanError> {
        let set_layouts = [layout];
        let allocate_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&set_layouts);

        let sets = unsafe { self.device.allocate_descriptor_sets(&allocate_info) }?;

        sets.into_iter().next().ok_or(VulkanError::OutOfPoolMemory)
    }

    unsafe fn update_descriptor_set(&self, set: vk::DescriptorSet, writes: &[RawDescriptorWrite]) {
        let writes: SmallVec<[_; 8]> = writes
            .iter()
            .map(|write| {
                let vk_write = vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(write.binding)
                    .dst_array_element(write.array_element)
                    .descriptor_type(write.descriptor_type);

                match &write.info {
                    RawDescriptorInfo::Buffer(info) => vk_write.buffer_info(slice::from_ref(info)),
                    RawDescriptorInfo::Image(info) => vk_write.image_info(slice::from_ref(info)),
                }
            })
            .collect();

        unsafe { self.device.update_descriptor_sets(&writes, &[]) };
    }
}

impl fmt::Debug for VulkanDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VulkanDevice")
            .field("handle", &self.device.handle())
            .field("properties", &self.properties)
            .finish_non_exhaustive()
    }
}

/// Parameters to wrap a logical device in a [`VulkanDevice`].
#[derive(Clone, Debug)]
pub struct VulkanDeviceCreateInfo {
    /// Whether debug labels are forwarded to `VK_EXT_debug_utils`.
    ///
    /// The default value is `false`.
    pub debug_labels: bool,

    pub _ne: NonExhaustive,
}

impl Default for VulkanDeviceCreateInfo {
    #[inline]
    fn default() -> Self {
        VulkanDeviceCreateInfo {
            debug_labels: false,
            _ne: NonExhaustive(()),
        }
    }
}
