// Copyright (c) 2026 The kiln developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Pipelines and pipeline layouts.
//!
//! Pipelines are built from compiled shaders by code outside of kiln. The wrappers here only carry
//! the handles, so producers can bind them and keep them alive while the GPU uses them. They do not
//! destroy the handles when dropped.

use crate::{
    device::{Device, DeviceOwned},
    macros::impl_id_counter,
    VulkanObject,
};
use ash::vk;
use std::{fmt, num::NonZero, sync::Arc};

/// Describes the descriptor set layouts and push constant ranges of a pipeline.
pub struct PipelineLayout {
    handle: vk::PipelineLayout,
    device: Arc<Device>,
    id: NonZero<u64>,
}

impl PipelineLayout {
    /// # Safety
    ///
    /// - `handle` must be a valid pipeline layout created from `device`, and must stay valid for
    ///   the life of the returned object.
    #[inline]
    pub unsafe fn from_handle(device: Arc<Device>, handle: vk::PipelineLayout) -> Arc<Self> {
        Arc::new(PipelineLayout {
            handle,
            device,
            id: Self::next_id(),
        })
    }
}

unsafe impl VulkanObject for PipelineLayout {
    type Handle = vk::PipelineLayout;

    #[inline]
    fn handle(&self) -> Self::Handle {
        self.handle
    }
}

unsafe impl DeviceOwned for PipelineLayout {
    #[inline]
    fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl fmt::Debug for PipelineLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineLayout")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl_id_counter!(PipelineLayout);

/// A pipeline that runs compute shaders.
pub struct ComputePipeline {
    handle: vk::Pipeline,
    device: Arc<Device>,
    id: NonZero<u64>,
    layout: Arc<PipelineLayout>,
}

impl ComputePipeline {
    /// # Safety
    ///
    /// - `handle` must be a valid compute pipeline created from `device` with `layout`, and must
    ///   stay valid for the life of the returned object.
    #[inline]
    pub unsafe fn from_handle(
        device: Arc<Device>,
        handle: vk::Pipeline,
        layout: Arc<PipelineLayout>,
    ) -> Arc<Self> {
        Arc::new(ComputePipeline {
            handle,
            device,
            id: Self::next_id(),
            layout,
        })
    }

    #[inline]
    pub fn layout(&self) -> &Arc<PipelineLayout> {
        &self.layout
    }
}

unsafe impl VulkanObject for ComputePipeline {
    type Handle = vk::Pipeline;

    #[inline]
    fn handle(&self) -> Self::Handle {
        self.handle
    }
}

unsafe impl DeviceOwned for ComputePipeline {
    #[inline]
    fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl fmt::Debug for ComputePipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputePipeline")
            .field("handle", &self.handle)
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

impl_id_counter!(ComputePipeline);

/// A pipeline that rasterizes primitives, used with dynamic rendering.
pub struct GraphicsPipeline {
    handle: vk::Pipeline,
    device: Arc<Device>,
    id: NonZero<u64>,
    layout: Arc<PipelineLayout>,
}

impl GraphicsPipeline {
    /// # Safety
    ///
    /// - `handle` must be a valid graphics pipeline created from `device` with `layout`, with
    ///   viewport and scissor as dynamic state, and must stay valid for the life of the returned
    ///   object.
    #[inline]
    pub unsafe fn from_handle(
        device: Arc<Device>,
        handle: vk::Pipeline,
        layout: Arc<PipelineLayout>,
    ) -> Arc<Self> {
        Arc::new(GraphicsPipeline {
            handle,
            device,
            id: Self::next_id(),
            layout,
        })
    }

    #[inline]
    pub fn layout(&self) -> &Arc<PipelineLayout> {
        &self.layout
    }
}

unsafe impl VulkanObject for GraphicsPipeline {
    type Handle = vk::Pipeline;

    #[inline]
    fn handle(&self) -> Self::Handle {
        self.handle
    }
}

unsafe impl DeviceOwned for GraphicsPipeline {
    #[inline]
    fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl fmt::Debug for GraphicsPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphicsPipeline")
            .field("handle", &self.handle)
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

impl_id_counter!(GraphicsPipeline);
