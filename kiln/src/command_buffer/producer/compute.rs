// Copyright (c) 2026 The kiln developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

use super::CommandProducerTransfer;
use crate::{
    access::AccessMultiset,
    command_buffer::{sys::RawCommand, CommandPool},
    descriptor_set::{DescriptorSet, DescriptorSetLayout, DescriptorWrite},
    macros::contract_violation,
    pipeline::{ComputePipeline, PipelineLayout},
    VulkanError, VulkanObject,
};
use ash::vk;
use bytemuck::Pod;
use smallvec::smallvec;
use std::{
    fmt,
    ops::{Deref, DerefMut},
    sync::Arc,
};

/// Records compute commands, on top of everything a [`CommandProducerTransfer`] records.
///
/// The image accesses of the descriptor sets bound for compute are declared right before each
/// dispatch.
pub struct CommandProducerCompute {
    transfer: CommandProducerTransfer,
    pipeline: Option<Arc<ComputePipeline>>,
    sets: AccessMultiset,
}

impl CommandProducerCompute {
    pub(crate) fn new(
        pool: Box<CommandPool>,
        debug_name: Option<&str>,
    ) -> Result<Self, VulkanError> {
        Ok(CommandProducerCompute {
            transfer: CommandProducerTransfer::new(pool, debug_name)?,
            pipeline: None,
            sets: AccessMultiset::new(),
        })
    }

    /// Binds a compute pipeline for the following dispatches.
    pub fn bind_compute_pipeline(&mut self, pipeline: &Arc<ComputePipeline>) -> &mut Self {
        self.transfer.record(&RawCommand::BindPipeline {
            bind_point: vk::PipelineBindPoint::COMPUTE,
            pipeline: pipeline.handle(),
        });
        self.transfer.lock_resource(pipeline.clone());
        self.pipeline = Some(pipeline.clone());

        self
    }

    /// Binds `set` to set number `slot` of `layout` for the following dispatches.
    ///
    /// # Panics
    ///
    /// - Panics if `slot` is not less than [`MAX_ACCESS_CHILDREN`].
    ///
    /// [`MAX_ACCESS_CHILDREN`]: crate::access::MAX_ACCESS_CHILDREN
    #[track_caller]
    pub fn bind_compute_descriptor_set(
        &mut self,
        set: &Arc<DescriptorSet>,
        slot: u32,
        layout: &Arc<PipelineLayout>,
    ) -> &mut Self {
        self.sets.set(slot as usize, set.accesses().clone());
        self.transfer.record(&RawCommand::BindDescriptorSets {
            bind_point: vk::PipelineBindPoint::COMPUTE,
            layout: layout.handle(),
            first_set: slot,
            sets: smallvec![set.handle()],
            dynamic_offsets: smallvec![],
        });
        self.transfer.lock_resource(set.clone());

        self
    }

    /// Updates push constants of `layout`, visible to the shader stages in `stages`.
    pub fn push_constants<T: Pod>(
        &mut self,
        layout: &Arc<PipelineLayout>,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &T,
    ) -> &mut Self {
        self.transfer.record(&RawCommand::PushConstants {
            layout: layout.handle(),
            stages,
            offset,
            data: bytemuck::bytes_of(data).iter().copied().collect(),
        });

        self
    }

    /// Allocates a descriptor set from the volatile pool of the session and writes `writes`
    /// into it.
    ///
    /// The set is valid until the work recorded here is complete.
    pub fn create_volatile_set(
        &mut self,
        layout: &DescriptorSetLayout,
        writes: &[DescriptorWrite],
    ) -> Result<Arc<DescriptorSet>, VulkanError> {
        DescriptorSet::new_volatile(self.transfer.pool.descriptor_pool(), layout, writes)
    }

    /// Dispatches compute work groups.
    ///
    /// # Panics
    ///
    /// - Panics if no compute pipeline is bound.
    /// - Panics if a render pass is active.
    #[track_caller]
    pub fn dispatch(&mut self, group_counts: [u32; 3]) -> &mut Self {
        if self.pipeline.is_none() {
            contract_violation!("dispatch recorded without a compute pipeline bound");
        }

        self.transfer.expect_outside_render_pass("dispatch");
        self.transfer.watcher.declare_set(self.sets.merged());
        self.transfer.record(&RawCommand::Dispatch { group_counts });

        self
    }
}

impl Deref for CommandProducerCompute {
    type Target = CommandProducerTransfer;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.transfer
    }
}

impl DerefMut for CommandProducerCompute {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.transfer
    }
}

impl From<CommandProducerCompute> for CommandProducerTransfer {
    #[inline]
    fn from(val: CommandProducerCompute) -> Self {
        val.transfer
    }
}

impl fmt::Debug for CommandProducerCompute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandProducerCompute")
            .field("transfer", &self.transfer)
            .field("pipeline", &self.pipeline)
            .field("sets", &self.sets)
            .finish()
    }
}
