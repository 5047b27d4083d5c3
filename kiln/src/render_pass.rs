// Copyright (c) 2026 The kiln developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Render targets for dynamic rendering.
//!
//! A [`FrameBuffer`] is built by render-stage code and describes the attachments a render pass
//! draws into. Beginning a render pass with it declares every attachment to the access watcher,
//! so the attachments are transitioned to their attachment layouts before rendering starts.

use crate::{
    access::{AccessSet, ResourceAccess},
    image::{Image, ImageSlice},
    sync::MemoryAccess,
    ValidationError,
};
use ash::vk;
use smallvec::SmallVec;
use std::sync::Arc;

/// The value an attachment is cleared to when its load operation is `CLEAR`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u32 },
}

impl ClearValue {
    #[inline]
    pub fn to_vk(self) -> vk::ClearValue {
        match self {
            ClearValue::Color(float32) => vk::ClearValue {
                color: vk::ClearColorValue { float32 },
            },
            ClearValue::DepthStencil { depth, stencil } => vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
            },
        }
    }
}

/// One attachment as recorded into `vkCmdBeginRendering`.
#[derive(Clone, Copy, Debug)]
pub struct RenderingAttachment {
    pub image_view: vk::ImageView,
    pub image_layout: vk::ImageLayout,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub clear_value: Option<ClearValue>,
}

/// The parameters of `vkCmdBeginRendering`.
#[derive(Clone, Debug)]
pub struct RenderingInfo {
    pub render_area: vk::Rect2D,
    pub layer_count: u32,
    pub color_attachments: SmallVec<[RenderingAttachment; 4]>,
    pub depth_attachment: Option<RenderingAttachment>,
}

/// An image view used as a render target.
#[derive(Clone, Debug)]
pub struct FrameBufferAttachment {
    /// The image the view belongs to.
    pub image: Arc<Image>,

    /// The view rendered into. Created by the resource manager that owns the image.
    pub view: vk::ImageView,

    /// The part of the image covered by the view.
    ///
    /// [`FrameBufferAttachment::new`] sets it to the first mip level of every array layer.
    pub slice: ImageSlice,

    /// The default value is `AttachmentLoadOp::LOAD`.
    pub load_op: vk::AttachmentLoadOp,

    /// The default value is `AttachmentStoreOp::STORE`.
    pub store_op: vk::AttachmentStoreOp,

    /// Used when `load_op` is `CLEAR` and no clear value is given when beginning the pass.
    pub clear_value: Option<ClearValue>,
}

impl FrameBufferAttachment {
    #[inline]
    pub fn new(image: Arc<Image>, view: vk::ImageView) -> Self {
        let slice = ImageSlice {
            mip_level_count: 1,
            ..image.full_slice()
        };

        FrameBufferAttachment {
            image,
            view,
            slice,
            load_op: vk::AttachmentLoadOp::LOAD,
            store_op: vk::AttachmentStoreOp::STORE,
            clear_value: None,
        }
    }

    /// Clears the attachment to `value` at the start of the pass.
    #[inline]
    pub fn clear(mut self, value: ClearValue) -> Self {
        self.load_op = vk::AttachmentLoadOp::CLEAR;
        self.clear_value = Some(value);
        self
    }

    fn rendering(&self, layout: vk::ImageLayout, clear: Option<ClearValue>) -> RenderingAttachment {
        let (load_op, clear_value) = match clear {
            Some(value) => (vk::AttachmentLoadOp::CLEAR, Some(value)),
            None => (self.load_op, self.clear_value),
        };

        RenderingAttachment {
            image_view: self.view,
            image_layout: layout,
            load_op,
            store_op: self.store_op,
            clear_value,
        }
    }
}

/// The attachments of a render pass.
#[derive(Clone, Debug)]
pub struct FrameBuffer {
    pub color_attachments: SmallVec<[FrameBufferAttachment; 4]>,
    pub depth_attachment: Option<FrameBufferAttachment>,
    pub render_area: vk::Rect2D,
}

impl FrameBuffer {
    /// Creates a frame buffer without attachments rendering into `[0, 0]..extent`.
    #[inline]
    pub fn new(extent: [u32; 2]) -> Self {
        FrameBuffer {
            color_attachments: SmallVec::new(),
            depth_attachment: None,
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D {
                    width: extent[0],
                    height: extent[1],
                },
            },
        }
    }

    #[inline]
    pub fn with_color(mut self, attachment: FrameBufferAttachment) -> Self {
        self.color_attachments.push(attachment);
        self
    }

    #[inline]
    pub fn with_depth(mut self, attachment: FrameBufferAttachment) -> Self {
        self.depth_attachment = Some(attachment);
        self
    }

    /// Returns the number of attachments, the depth attachment included.
    #[inline]
    pub fn attachment_count(&self) -> usize {
        self.color_attachments.len() + usize::from(self.depth_attachment.is_some())
    }

    /// Returns the number of layers rendered to, the smallest over all attachments.
    pub fn layer_count(&self) -> u32 {
        self.attachments()
            .map(|attachment| attachment.slice.array_layer_count)
            .min()
            .unwrap_or(1)
    }

    /// Iterates over the color attachments, then the depth attachment.
    #[inline]
    pub fn attachments(&self) -> impl Iterator<Item = &FrameBufferAttachment> {
        self.color_attachments
            .iter()
            .chain(self.depth_attachment.as_ref())
    }

    /// Returns the accesses the attachments of the pass need.
    pub fn accesses(&self) -> AccessSet {
        let mut accesses = AccessSet::new();

        for attachment in &self.color_attachments {
            accesses.add(
                attachment.image.clone(),
                ResourceAccess::new(
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                    MemoryAccess::COLOR_ATTACHMENT,
                    attachment.slice,
                ),
            );
        }

        if let Some(attachment) = &self.depth_attachment {
            accesses.add(
                attachment.image.clone(),
                ResourceAccess::new(
                    vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                    MemoryAccess::DEPTH_STENCIL_ATTACHMENT,
                    attachment.slice,
                ),
            );
        }

        accesses
    }

    /// Builds the native rendering parameters.
    ///
    /// `clear_values`, if given, holds one value per attachment in the order of
    /// [`attachments`](Self::attachments) and overrides the load operation of each of them.
    pub fn to_rendering_info(
        &self,
        clear_values: Option<&[ClearValue]>,
    ) -> Result<RenderingInfo, Box<ValidationError>> {
        if let Some(clear_values) = clear_values {
            if clear_values.len() != self.attachment_count() {
                return Err(ValidationError::new(
                    "clear_values",
                    format!(
                        "has {} elements, but the frame buffer has {} attachments",
                        clear_values.len(),
                        self.attachment_count(),
                    ),
                ));
            }
        }

        let clear = |index: usize| clear_values.map(|values| values[index]);

        let color_attachments = self
            .color_attachments
            .iter()
            .enumerate()
            .map(|(index, attachment)| {
                attachment.rendering(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, clear(index))
            })
            .collect();

        let depth_attachment = self.depth_attachment.as_ref().map(|attachment| {
            attachment.rendering(
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                clear(self.color_attachments.len()),
            )
        });

        Ok(RenderingInfo {
            render_area: self.render_area,
            layer_count: self.layer_count(),
            color_attachments,
            depth_attachment,
        })
    }

    /// Returns a viewport covering the render area.
    #[inline]
    pub fn viewport(&self) -> Viewport {
        Viewport {
            offset: [
                self.render_area.offset.x as f32,
                self.render_area.offset.y as f32,
            ],
            extent: [
                self.render_area.extent.width as f32,
                self.render_area.extent.height as f32,
            ],
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// A rectangle of the framebuffer that rendering is mapped to.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub offset: [f32; 2],
    pub extent: [f32; 2],
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    #[inline]
    pub fn to_vk(&self) -> vk::Viewport {
        vk::Viewport {
            x: self.offset[0],
            y: self.offset[1],
            width: self.extent[0],
            height: self.extent[1],
            min_depth: self.min_depth,
            max_depth: self.max_depth,
        }
    }
}
