// Copyright (c) 2026 The kiln developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The native command vocabulary.
//!
//! A [`RawCommand`] maps one-to-one to a `vkCmd*` call. Producers build them after the access
//! watcher has had its say, and hand them to [`RawDevice::record`].
//!
//! [`RawDevice::record`]: crate::device::RawDevice::record

use crate::{render_pass::RenderingInfo, sync::DependencyInfo, DeviceSize};
use ash::vk;
use smallvec::SmallVec;

#[derive(Clone, Debug)]
pub enum RawCommand {
    PipelineBarrier(DependencyInfo),
    CopyBuffer {
        src_buffer: vk::Buffer,
        dst_buffer: vk::Buffer,
        regions: SmallVec<[vk::BufferCopy; 1]>,
    },
    CopyBufferToImage {
        src_buffer: vk::Buffer,
        dst_image: vk::Image,
        dst_image_layout: vk::ImageLayout,
        regions: SmallVec<[vk::BufferImageCopy; 1]>,
    },
    BindPipeline {
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    },
    BindDescriptorSets {
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: SmallVec<[vk::DescriptorSet; 4]>,
        dynamic_offsets: SmallVec<[u32; 4]>,
    },
    BindVertexBuffers {
        first_binding: u32,
        buffers: SmallVec<[vk::Buffer; 4]>,
        offsets: SmallVec<[DeviceSize; 4]>,
    },
    BindIndexBuffer {
        buffer: vk::Buffer,
        offset: DeviceSize,
        index_type: vk::IndexType,
    },
    PushConstants {
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: SmallVec<[u8; 128]>,
    },
    Dispatch {
        group_counts: [u32; 3],
    },
    BeginRendering(RenderingInfo),
    EndRendering,
    SetViewport {
        viewports: SmallVec<[vk::Viewport; 1]>,
    },
    SetScissor {
        scissors: SmallVec<[vk::Rect2D; 1]>,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    BeginDebugLabel {
        name: String,
    },
    EndDebugLabel,
}

impl RawCommand {
    /// Returns the name of the Vulkan command this maps to.
    pub fn name(&self) -> &'static str {
        match self {
            RawCommand::PipelineBarrier(_) => "vkCmdPipelineBarrier2",
            RawCommand::CopyBuffer { .. } => "vkCmdCopyBuffer",
            RawCommand::CopyBufferToImage { .. } => "vkCmdCopyBufferToImage",
            RawCommand::BindPipeline { .. } => "vkCmdBindPipeline",
            RawCommand::BindDescriptorSets { .. } => "vkCmdBindDescriptorSets",
            RawCommand::BindVertexBuffers { .. } => "vkCmdBindVertexBuffers",
            RawCommand::BindIndexBuffer { .. } => "vkCmdBindIndexBuffer",
            RawCommand::PushConstants { .. } => "vkCmdPushConstants",
            RawCommand::Dispatch { .. } => "vkCmdDispatch",
            RawCommand::BeginRendering(_) => "vkCmdBeginRendering",
            RawCommand::EndRendering => "vkCmdEndRendering",
            RawCommand::SetViewport { .. } => "vkCmdSetViewport",
            RawCommand::SetScissor { .. } => "vkCmdSetScissor",
            RawCommand::Draw { .. } => "vkCmdDraw",
            RawCommand::DrawIndexed { .. } => "vkCmdDrawIndexed",
            RawCommand::BeginDebugLabel { .. } => "vkCmdBeginDebugUtilsLabelEXT",
            RawCommand::EndDebugLabel => "vkCmdEndDebugUtilsLabelEXT",
        }
    }
}
