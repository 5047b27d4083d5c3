// Copyright (c) 2026 The kiln developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

use super::{compute::CommandProducerCompute, CommandProducerTransfer};
use crate::{
    access::AccessMultiset,
    buffer::DataBuffer,
    command_buffer::{sys::RawCommand, CommandPool},
    descriptor_set::DescriptorSet,
    macros::contract_violation,
    pipeline::{GraphicsPipeline, PipelineLayout},
    render_pass::{ClearValue, FrameBuffer, Viewport},
    DeviceSize, ValidationError, VulkanError, VulkanObject,
};
use ash::vk;
use smallvec::smallvec;
use std::{
    fmt,
    ops::{Deref, DerefMut},
    sync::Arc,
};

/// Records render passes and draws, on top of everything a [`CommandProducerCompute`] records.
///
/// Beginning a render pass declares the attachments of the frame buffer together with the image
/// accesses of the descriptor sets bound for graphics, so every layout transition happens
/// before the pass starts. Inside the pass, draws declare the bound sets again: memory hazards
/// between draws are absorbed. A set bound inside the pass that would need a layout transition,
/// or a barrier against work recorded before the pass, is a bug in the caller. Such sets must be
/// bound before the pass begins.
pub struct CommandProducerGraphic {
    compute: CommandProducerCompute,
    pipeline: Option<Arc<GraphicsPipeline>>,
    sets: AccessMultiset,
}

impl CommandProducerGraphic {
    pub(crate) fn new(
        pool: Box<CommandPool>,
        debug_name: Option<&str>,
    ) -> Result<Self, VulkanError> {
        Ok(CommandProducerGraphic {
            compute: CommandProducerCompute::new(pool, debug_name)?,
            pipeline: None,
            sets: AccessMultiset::new(),
        })
    }

    /// Returns `true` between [`begin_render_pass`](Self::begin_render_pass) and
    /// [`end_render_pass`](Self::end_render_pass).
    #[inline]
    pub fn is_in_render_pass(&self) -> bool {
        self.watcher().is_in_render_pass()
    }

    /// Begins rendering into `frame_buffer`.
    ///
    /// `clear_values`, if given, holds one value per attachment, color attachments first, and
    /// makes every attachment cleared at the start of the pass. `viewport` defaults to the
    /// render area of the frame buffer. The scissor is set to the render area.
    ///
    /// # Panics
    ///
    /// - Panics if a render pass is already active.
    /// - Panics if an attachment is bound as a descriptor in a different layout.
    #[track_caller]
    pub fn begin_render_pass(
        &mut self,
        frame_buffer: &FrameBuffer,
        clear_values: Option<&[ClearValue]>,
        viewport: Option<Viewport>,
    ) -> Result<&mut Self, Box<ValidationError>> {
        if self.is_in_render_pass() {
            contract_violation!("render pass begun while another one is active");
        }

        if frame_buffer.attachment_count() == 0 {
            return Err(ValidationError::new("frame_buffer", "has no attachments"));
        }

        let rendering_info = frame_buffer.to_rendering_info(clear_values)?;
        let mut accesses = frame_buffer.accesses();
        accesses.merge(self.sets.merged());

        let transfer: &mut CommandProducerTransfer = &mut self.compute;
        transfer.watcher.declare_set(&accesses);
        transfer.flush_barriers();
        transfer.watcher.begin_render_pass(&accesses);
        transfer.record(&RawCommand::BeginRendering(rendering_info));

        for attachment in frame_buffer.attachments() {
            transfer.lock_resource(attachment.image.clone());
        }

        tracing::trace!(
            name = transfer.debug_name().unwrap_or(""),
            attachments = frame_buffer.attachment_count(),
            "began render pass",
        );

        self.set_viewport(viewport.unwrap_or_else(|| frame_buffer.viewport()))
            .set_scissor(frame_buffer.render_area);

        Ok(self)
    }

    /// Ends the active render pass.
    ///
    /// # Panics
    ///
    /// - Panics if no render pass is active.
    #[track_caller]
    pub fn end_render_pass(&mut self) -> &mut Self {
        self.watcher.end_render_pass();
        self.record(&RawCommand::EndRendering);

        self
    }

    /// Binds a graphics pipeline for the following draws.
    pub fn bind_graphics_pipeline(&mut self, pipeline: &Arc<GraphicsPipeline>) -> &mut Self {
        self.record(&RawCommand::BindPipeline {
            bind_point: vk::PipelineBindPoint::GRAPHICS,
            pipeline: pipeline.handle(),
        });
        self.lock_resource(pipeline.clone());
        self.pipeline = Some(pipeline.clone());

        self
    }

    /// Binds `set` to set number `slot` of `layout` for the following draws.
    ///
    /// # Panics
    ///
    /// - Panics if `slot` is not less than [`MAX_ACCESS_CHILDREN`].
    ///
    /// [`MAX_ACCESS_CHILDREN`]: crate::access::MAX_ACCESS_CHILDREN
    #[track_caller]
    pub fn bind_descriptor_set(
        &mut self,
        set: &Arc<DescriptorSet>,
        slot: u32,
        layout: &Arc<PipelineLayout>,
    ) -> &mut Self {
        self.sets.set(slot as usize, set.accesses().clone());
        self.record(&RawCommand::BindDescriptorSets {
            bind_point: vk::PipelineBindPoint::GRAPHICS,
            layout: layout.handle(),
            first_set: slot,
            sets: smallvec![set.handle()],
            dynamic_offsets: smallvec![],
        });
        self.lock_resource(set.clone());

        self
    }

    /// Binds vertex buffers, with the offset of each, starting at `first_binding`.
    pub fn bind_vertex_buffers(
        &mut self,
        first_binding: u32,
        buffers: &[(&Arc<DataBuffer>, DeviceSize)],
    ) -> &mut Self {
        self.record(&RawCommand::BindVertexBuffers {
            first_binding,
            buffers: buffers.iter().map(|(buffer, _)| buffer.handle()).collect(),
            offsets: buffers.iter().map(|&(_, offset)| offset).collect(),
        });

        for &(buffer, _) in buffers {
            self.lock_resource(buffer.clone());
        }

        self
    }

    pub fn bind_index_buffer(
        &mut self,
        buffer: &Arc<DataBuffer>,
        offset: DeviceSize,
        index_type: vk::IndexType,
    ) -> &mut Self {
        self.record(&RawCommand::BindIndexBuffer {
            buffer: buffer.handle(),
            offset,
            index_type,
        });
        self.lock_resource(buffer.clone());

        self
    }

    pub fn set_viewport(&mut self, viewport: Viewport) -> &mut Self {
        self.record(&RawCommand::SetViewport {
            viewports: smallvec![viewport.to_vk()],
        });

        self
    }

    pub fn set_scissor(&mut self, scissor: vk::Rect2D) -> &mut Self {
        self.record(&RawCommand::SetScissor {
            scissors: smallvec![scissor],
        });

        self
    }

    #[track_caller]
    fn prepare_draw(&mut self, command: &str) {
        if !self.is_in_render_pass() {
            contract_violation!("{command} recorded outside of a render pass");
        }

        if self.pipeline.is_none() {
            contract_violation!("{command} recorded without a graphics pipeline bound");
        }

        let transfer: &mut CommandProducerTransfer = &mut self.compute;
        transfer.watcher.declare_set(self.sets.merged());
    }

    /// Draws `vertex_count` vertices, `instance_count` times (once by default).
    ///
    /// # Panics
    ///
    /// - Panics if no render pass is active or no graphics pipeline is bound.
    /// - Panics if a bound descriptor set needs an image in another layout than the one it is
    ///   in, or needs a barrier against work recorded before the pass.
    #[track_caller]
    pub fn draw(&mut self, vertex_count: u32, instance_count: Option<u32>) -> &mut Self {
        self.prepare_draw("draw");
        self.record(&RawCommand::Draw {
            vertex_count,
            instance_count: instance_count.unwrap_or(1),
            first_vertex: 0,
            first_instance: 0,
        });

        self
    }

    /// Draws `index_count` indices of the bound index buffer, starting at `first_index`,
    /// `instance_count` times (once by default).
    ///
    /// # Panics
    ///
    /// - Panics for the same reasons as [`draw`](Self::draw).
    #[track_caller]
    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: Option<u32>,
        first_index: u32,
        vertex_offset: i32,
    ) -> &mut Self {
        self.prepare_draw("indexed draw");
        self.record(&RawCommand::DrawIndexed {
            index_count,
            instance_count: instance_count.unwrap_or(1),
            first_index,
            vertex_offset,
            first_instance: 0,
        });

        self
    }
}

impl Deref for CommandProducerGraphic {
    type Target = CommandProducerCompute;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.compute
    }
}

impl DerefMut for CommandProducerGraphic {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.compute
    }
}

impl From<CommandProducerGraphic> for CommandProducerCompute {
    #[inline]
    fn from(val: CommandProducerGraphic) -> Self {
        val.compute
    }
}

impl From<CommandProducerGraphic> for CommandProducerTransfer {
    #[inline]
    fn from(val: CommandProducerGraphic) -> Self {
        val.compute.into()
    }
}

impl fmt::Debug for CommandProducerGraphic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandProducerGraphic")
            .field("compute", &self.compute)
            .field("pipeline", &self.pipeline)
            .field("sets", &self.sets)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        command_buffer::sys::RawCommand,
        descriptor_set::{DescriptorSet, DescriptorSetLayout, DescriptorWrite},
        device::headless::HeadlessDevice,
        device::Device,
        image::Image,
        pipeline::{ComputePipeline, GraphicsPipeline, PipelineLayout},
        render_pass::{ClearValue, FrameBuffer, FrameBufferAttachment},
        VulkanObject,
    };
    use ash::vk;
    use std::sync::Arc;

    fn graphics_pipeline(
        headless: &HeadlessDevice,
        device: &Arc<Device>,
    ) -> (Arc<PipelineLayout>, Arc<GraphicsPipeline>) {
        // SAFETY: Headless handles are never dereferenced.
        unsafe {
            let layout = PipelineLayout::from_handle(device.clone(), headless.next_handle());
            let pipeline =
                GraphicsPipeline::from_handle(device.clone(), headless.next_handle(), layout.clone());

            (layout, pipeline)
        }
    }

    #[test]
    fn attachments_are_transitioned_before_the_pass() {
        let (headless, device, queue) = headless_queue!();
        let color = test_image!(headless, device);
        let (_, pipeline) = graphics_pipeline(&headless, &device);
        let frame_buffer =
            FrameBuffer::new([64, 64]).with_color(FrameBufferAttachment::new(
                color.clone(),
                headless.next_handle(),
            ));

        let mut producer = queue.start_commands(None).unwrap();
        producer
            .begin_render_pass(&frame_buffer, Some(&[ClearValue::Color([0.0; 4])]), None)
            .unwrap()
            .bind_graphics_pipeline(&pipeline)
            .draw(3, None)
            .end_render_pass();
        queue.submit_commands(producer).unwrap();

        let submission = headless.submissions().pop().unwrap();
        let names: Vec<_> = submission.commands.iter().map(RawCommand::name).collect();
        assert_eq!(
            names,
            [
                "vkCmdPipelineBarrier2",
                "vkCmdBeginRendering",
                "vkCmdSetViewport",
                "vkCmdSetScissor",
                "vkCmdBindPipeline",
                "vkCmdDraw",
                "vkCmdEndRendering",
            ],
        );

        let RawCommand::BeginRendering(info) = &submission.commands[1] else {
            unreachable!()
        };
        assert_eq!(
            info.color_attachments[0].load_op,
            vk::AttachmentLoadOp::CLEAR,
        );
        assert_eq!(
            color.state().layout,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );
    }

    #[test]
    fn draws_share_the_pass_without_barriers() {
        let (headless, device, queue) = headless_queue!();
        let color = test_image!(headless, device, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        let (_, pipeline) = graphics_pipeline(&headless, &device);
        let frame_buffer = FrameBuffer::new([64, 64])
            .with_color(FrameBufferAttachment::new(color, headless.next_handle()));

        let mut producer = queue.start_commands(None).unwrap();
        producer
            .begin_render_pass(&frame_buffer, None, None)
            .unwrap()
            .bind_graphics_pipeline(&pipeline);

        for _ in 0..3 {
            producer.draw(6, Some(2));
        }

        producer.end_render_pass();
        queue.submit_commands(producer).unwrap();

        let submission = headless.submissions().pop().unwrap();
        assert_eq!(
            submission.count(|command| matches!(command, RawCommand::PipelineBarrier(_))),
            0,
        );
        assert_eq!(
            submission.count(|command| matches!(
                command,
                RawCommand::Draw {
                    vertex_count: 6,
                    instance_count: 2,
                    ..
                }
            )),
            3,
        );
    }

    #[test]
    fn draw_outside_render_pass_panics() {
        let (headless, device, queue) = headless_queue!();
        let (_, pipeline) = graphics_pipeline(&headless, &device);
        let mut producer = queue.start_commands(None).unwrap();
        producer.bind_graphics_pipeline(&pipeline);

        assert_should_panic!("outside of a render pass", {
            producer.draw(3, None);
        });
    }

    #[test]
    fn submitting_inside_render_pass_panics() {
        let (headless, device, queue) = headless_queue!();
        let color = test_image!(headless, device);
        let frame_buffer = FrameBuffer::new([64, 64])
            .with_color(FrameBufferAttachment::new(color, headless.next_handle()));

        let mut producer = queue.start_commands(None).unwrap();
        producer.begin_render_pass(&frame_buffer, None, None).unwrap();

        assert_should_panic!("inside a render pass", {
            queue.submit_commands(producer).unwrap();
        });
    }

    #[test]
    fn transition_inside_render_pass_panics() {
        let (headless, device, queue) = headless_queue!();
        let color = test_image!(headless, device);
        let texture = test_image!(headless, device);
        let (layout, pipeline) = graphics_pipeline(&headless, &device);
        let frame_buffer = FrameBuffer::new([64, 64])
            .with_color(FrameBufferAttachment::new(color, headless.next_handle()));

        let mut producer = queue.start_commands(None).unwrap();
        // SAFETY: Headless handles are never dereferenced.
        let set_layout =
            unsafe { DescriptorSetLayout::from_handle(device.clone(), headless.next_handle()) };
        let set: Arc<DescriptorSet> = producer
            .create_volatile_set(
                &set_layout,
                &[DescriptorWrite::SampledImage {
                    binding: 0,
                    image: texture,
                    view: headless.next_handle(),
                    sampler: headless.next_handle(),
                    stages: vk::PipelineStageFlags2::FRAGMENT_SHADER,
                }],
            )
            .unwrap();

        producer
            .begin_render_pass(&frame_buffer, None, None)
            .unwrap()
            .bind_graphics_pipeline(&pipeline)
            .bind_descriptor_set(&set, 0, &layout);

        assert_should_panic!("inside a render pass", {
            producer.draw(3, None);
        });
    }

    fn storage_set(
        producer: &mut super::CommandProducerGraphic,
        headless: &HeadlessDevice,
        device: &Arc<Device>,
        image: &Arc<Image>,
        stages: vk::PipelineStageFlags2,
    ) -> Arc<DescriptorSet> {
        // SAFETY: Headless handles are never dereferenced.
        let set_layout =
            unsafe { DescriptorSetLayout::from_handle(device.clone(), headless.next_handle()) };

        producer
            .create_volatile_set(
                &set_layout,
                &[DescriptorWrite::StorageImage {
                    binding: 0,
                    image: image.clone(),
                    view: headless.next_handle(),
                    stages,
                }],
            )
            .unwrap()
    }

    fn dispatch_writing(
        producer: &mut super::CommandProducerGraphic,
        headless: &HeadlessDevice,
        device: &Arc<Device>,
        image: &Arc<Image>,
    ) {
        let set = storage_set(
            producer,
            headless,
            device,
            image,
            vk::PipelineStageFlags2::COMPUTE_SHADER,
        );
        // SAFETY: Headless handles are never dereferenced.
        let (layout, pipeline) = unsafe {
            let layout = PipelineLayout::from_handle(device.clone(), headless.next_handle());
            let pipeline =
                ComputePipeline::from_handle(device.clone(), headless.next_handle(), layout.clone());

            (layout, pipeline)
        };

        producer
            .bind_compute_pipeline(&pipeline)
            .bind_compute_descriptor_set(&set, 0, &layout)
            .dispatch([8, 8, 1]);
    }

    #[test]
    fn sets_bound_before_the_pass_wait_for_earlier_dispatches() {
        let (headless, device, queue) = headless_queue!();
        let color = test_image!(headless, device, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        let storage = test_image!(headless, device, vk::ImageLayout::GENERAL);
        let (layout, pipeline) = graphics_pipeline(&headless, &device);
        let frame_buffer = FrameBuffer::new([64, 64])
            .with_color(FrameBufferAttachment::new(color, headless.next_handle()));

        let mut producer = queue.start_commands(None).unwrap();
        dispatch_writing(&mut producer, &headless, &device, &storage);
        let set = storage_set(
            &mut producer,
            &headless,
            &device,
            &storage,
            vk::PipelineStageFlags2::FRAGMENT_SHADER,
        );
        producer
            .bind_descriptor_set(&set, 0, &layout)
            .begin_render_pass(&frame_buffer, None, None)
            .unwrap()
            .bind_graphics_pipeline(&pipeline)
            .draw(3, None)
            .draw(3, None)
            .end_render_pass();
        queue.submit_commands(producer).unwrap();

        let submission = headless.submissions().pop().unwrap();
        let position = |name: &str| {
            submission
                .commands
                .iter()
                .position(|command| command.name() == name)
                .unwrap()
        };
        let begin = position("vkCmdBeginRendering");
        assert!(position("vkCmdDispatch") < begin);

        let RawCommand::PipelineBarrier(dependency) = &submission.commands[begin - 1] else {
            panic!("no barrier before the render pass");
        };
        let barrier = dependency
            .image_memory_barriers
            .iter()
            .find(|barrier| barrier.image == storage.handle())
            .unwrap();
        assert!(!barrier.is_layout_transition());
        assert_eq!(barrier.src_stages, vk::PipelineStageFlags2::COMPUTE_SHADER);
        assert_eq!(barrier.dst_stages, vk::PipelineStageFlags2::FRAGMENT_SHADER);
        assert_eq!(
            submission.count(|command| matches!(command, RawCommand::PipelineBarrier(_))),
            1,
        );
    }

    #[test]
    fn sets_bound_inside_the_pass_cannot_wait_for_earlier_dispatches() {
        let (headless, device, queue) = headless_queue!();
        let color = test_image!(headless, device, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        let storage = test_image!(headless, device, vk::ImageLayout::GENERAL);
        let (layout, pipeline) = graphics_pipeline(&headless, &device);
        let frame_buffer = FrameBuffer::new([64, 64])
            .with_color(FrameBufferAttachment::new(color, headless.next_handle()));

        let mut producer = queue.start_commands(None).unwrap();
        dispatch_writing(&mut producer, &headless, &device, &storage);
        let set = storage_set(
            &mut producer,
            &headless,
            &device,
            &storage,
            vk::PipelineStageFlags2::FRAGMENT_SHADER,
        );
        producer
            .begin_render_pass(&frame_buffer, None, None)
            .unwrap()
            .bind_graphics_pipeline(&pipeline)
            .bind_descriptor_set(&set, 0, &layout);

        assert_should_panic!("against work recorded before the pass", {
            producer.draw(3, None);
        });
    }

    #[test]
    fn wrong_clear_value_count_is_rejected() {
        let (headless, device, queue) = headless_queue!();
        let color = test_image!(headless, device);
        let frame_buffer = FrameBuffer::new([64, 64])
            .with_color(FrameBufferAttachment::new(color, headless.next_handle()));

        let mut producer = queue.start_commands(None).unwrap();
        assert!(producer
            .begin_render_pass(&frame_buffer, Some(&[]), None)
            .is_err());
        assert!(producer
            .begin_render_pass(&FrameBuffer::new([64, 64]), None, None)
            .is_err());
        assert!(!producer.is_in_render_pass());
    }
}
