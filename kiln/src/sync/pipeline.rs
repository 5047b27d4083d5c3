// Copyright (c) 2026 The kiln developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

use crate::{image::ImageSlice, DeviceSize};
use ash::vk;
use smallvec::SmallVec;
use std::ops::{BitOr, BitOrAssign};

/// The pipeline stages and memory accesses of one use of a resource, split by direction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct MemoryAccess {
    pub read_stages: vk::PipelineStageFlags2,
    pub read_access: vk::AccessFlags2,
    pub write_stages: vk::PipelineStageFlags2,
    pub write_access: vk::AccessFlags2,
}

impl MemoryAccess {
    pub const NONE: MemoryAccess = MemoryAccess {
        read_stages: vk::PipelineStageFlags2::NONE,
        read_access: vk::AccessFlags2::NONE,
        write_stages: vk::PipelineStageFlags2::NONE,
        write_access: vk::AccessFlags2::NONE,
    };

    pub const TRANSFER_READ: MemoryAccess = MemoryAccess::read(
        vk::PipelineStageFlags2::ALL_TRANSFER,
        vk::AccessFlags2::TRANSFER_READ,
    );

    pub const TRANSFER_WRITE: MemoryAccess = MemoryAccess::write(
        vk::PipelineStageFlags2::ALL_TRANSFER,
        vk::AccessFlags2::TRANSFER_WRITE,
    );

    pub const COLOR_ATTACHMENT: MemoryAccess = MemoryAccess {
        read_stages: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        read_access: vk::AccessFlags2::COLOR_ATTACHMENT_READ,
        write_stages: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        write_access: vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
    };

    pub const DEPTH_STENCIL_ATTACHMENT: MemoryAccess = MemoryAccess {
        read_stages: vk::PipelineStageFlags2::from_raw(
            vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS.as_raw()
                | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS.as_raw(),
        ),
        read_access: vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ,
        write_stages: vk::PipelineStageFlags2::from_raw(
            vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS.as_raw()
                | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS.as_raw(),
        ),
        write_access: vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
    };

    /// A read-only access.
    #[inline]
    pub const fn read(stages: vk::PipelineStageFlags2, access: vk::AccessFlags2) -> Self {
        MemoryAccess {
            read_stages: stages,
            read_access: access,
            write_stages: vk::PipelineStageFlags2::NONE,
            write_access: vk::AccessFlags2::NONE,
        }
    }

    /// A write-only access.
    #[inline]
    pub const fn write(stages: vk::PipelineStageFlags2, access: vk::AccessFlags2) -> Self {
        MemoryAccess {
            read_stages: vk::PipelineStageFlags2::NONE,
            read_access: vk::AccessFlags2::NONE,
            write_stages: stages,
            write_access: access,
        }
    }

    /// Sampling from shaders running in `stages`.
    #[inline]
    pub const fn shader_sampled_read(stages: vk::PipelineStageFlags2) -> Self {
        MemoryAccess::read(stages, vk::AccessFlags2::SHADER_SAMPLED_READ)
    }

    /// Storage image or buffer access from shaders running in `stages`.
    #[inline]
    pub const fn shader_storage_read_write(stages: vk::PipelineStageFlags2) -> Self {
        MemoryAccess {
            read_stages: stages,
            read_access: vk::AccessFlags2::SHADER_STORAGE_READ,
            write_stages: stages,
            write_access: vk::AccessFlags2::SHADER_STORAGE_WRITE,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.read_stages.is_empty() && self.write_stages.is_empty()
    }

    #[inline]
    pub fn has_write(&self) -> bool {
        !self.write_stages.is_empty() || !self.write_access.is_empty()
    }

    /// Returns `true` if every stage and access of `other` is part of `self`, in the same
    /// direction.
    #[inline]
    pub fn contains(&self, other: &MemoryAccess) -> bool {
        self.read_stages.contains(other.read_stages)
            && self.read_access.contains(other.read_access)
            && self.write_stages.contains(other.write_stages)
            && self.write_access.contains(other.write_access)
    }

    /// All stages, regardless of direction.
    #[inline]
    pub fn stages(&self) -> vk::PipelineStageFlags2 {
        self.read_stages | self.write_stages
    }

    /// All access types, regardless of direction.
    #[inline]
    pub fn access(&self) -> vk::AccessFlags2 {
        self.read_access | self.write_access
    }
}

impl BitOr for MemoryAccess {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        MemoryAccess {
            read_stages: self.read_stages | rhs.read_stages,
            read_access: self.read_access | rhs.read_access,
            write_stages: self.write_stages | rhs.write_stages,
            write_access: self.write_access | rhs.write_access,
        }
    }
}

impl BitOrAssign for MemoryAccess {
    #[inline]
    fn bitor_assign(&mut self, rhs: Self) {
        *self = *self | rhs;
    }
}

/// A global memory dependency.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryBarrier {
    pub src_stages: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_stages: vk::PipelineStageFlags2,
    pub dst_access: vk::AccessFlags2,
}

/// A memory dependency on a range of a buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferMemoryBarrier {
    pub src_stages: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_stages: vk::PipelineStageFlags2,
    pub dst_access: vk::AccessFlags2,
    pub buffer: vk::Buffer,
    pub offset: DeviceSize,
    pub size: DeviceSize,
}

/// A memory dependency on a subresource range of an image, optionally changing its layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageMemoryBarrier {
    pub src_stages: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_stages: vk::PipelineStageFlags2,
    pub dst_access: vk::AccessFlags2,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub image: vk::Image,
    pub subresource_range: ImageSlice,
}

impl ImageMemoryBarrier {
    /// Returns `true` if the barrier changes the layout of the image.
    #[inline]
    pub fn is_layout_transition(&self) -> bool {
        self.old_layout != self.new_layout
    }
}

/// The contents of one pipeline barrier command.
#[derive(Clone, Debug, Default)]
pub struct DependencyInfo {
    pub memory_barriers: SmallVec<[MemoryBarrier; 2]>,
    pub buffer_memory_barriers: SmallVec<[BufferMemoryBarrier; 4]>,
    pub image_memory_barriers: SmallVec<[ImageMemoryBarrier; 4]>,
}

impl DependencyInfo {
    /// Returns `true` if the dependency contains no barrier at all.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.memory_barriers.is_empty()
            && self.buffer_memory_barriers.is_empty()
            && self.image_memory_barriers.is_empty()
    }

    #[inline]
    pub fn clear(&mut self) {
        self.memory_barriers.clear();
        self.buffer_memory_barriers.clear();
        self.image_memory_barriers.clear();
    }
}
