// Copyright (c) 2026 The kiln developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Images and the state kiln tracks for them.
//!
//! Images are created by resource managers outside of kiln and wrapped with
//! [`Image::from_handle`]. An image is *layout auto-controlled* by default: the
//! [`AccessWatcher`](crate::access::AccessWatcher) of every command buffer that uses it inserts
//! the layout transitions and barriers it needs, and writes the layout and access it ended with
//! back into the image once the command buffer is submitted.
//!
//! With auto-control disabled, the image is invisible to the watcher. The caller records every
//! barrier and transition itself, for example with
//! [`CommandProducerTransfer::pipeline_barrier`](crate::command_buffer::CommandProducerTransfer::pipeline_barrier).

use crate::{
    device::{Device, DeviceOwned},
    macros::impl_id_counter,
    sync::{MemoryAccess, Sharing},
    DeviceSize, NonExhaustive, VulkanObject,
};
use ash::vk;
use parking_lot::Mutex;
use std::{cmp::Ordering, fmt, num::NonZero, sync::Arc};

/// A multi-dimensional storage for texels, owned by a resource manager and referenced by the
/// command buffers that use it.
pub struct Image {
    handle: vk::Image,
    device: Arc<Device>,
    id: NonZero<u64>,

    format: vk::Format,
    extent: [u32; 3],
    mip_levels: u32,
    array_layers: u32,
    aspect: vk::ImageAspectFlags,
    sharing: Sharing,
    initial_layout: vk::ImageLayout,
    layout_auto_control: bool,

    state: Mutex<ImageState>,
}

impl Image {
    /// Wraps an image created outside of kiln.
    ///
    /// # Safety
    ///
    /// - `handle` must be a valid image created from `device`.
    /// - `create_info` must match the parameters the image was created with, and
    ///   `create_info.initial_layout` must be the layout the image is currently in.
    pub unsafe fn from_handle(
        device: Arc<Device>,
        handle: vk::Image,
        create_info: ImageCreateInfo,
    ) -> Arc<Image> {
        let ImageCreateInfo {
            format,
            extent,
            mip_levels,
            array_layers,
            aspect,
            sharing,
            initial_layout,
            layout_auto_control,
            _ne: _,
        } = create_info;

        assert!(mip_levels != 0 && array_layers != 0);

        Arc::new(Image {
            handle,
            device,
            id: Self::next_id(),
            format,
            extent,
            mip_levels,
            array_layers,
            aspect,
            sharing,
            initial_layout,
            layout_auto_control,
            state: Mutex::new(ImageState {
                layout: initial_layout,
                last_access: MemoryAccess::NONE,
            }),
        })
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn extent(&self) -> [u32; 3] {
        self.extent
    }

    #[inline]
    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    #[inline]
    pub fn array_layers(&self) -> u32 {
        self.array_layers
    }

    #[inline]
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        self.aspect
    }

    #[inline]
    pub fn sharing(&self) -> Sharing {
        self.sharing
    }

    /// Returns the layout the image was in when it was wrapped.
    #[inline]
    pub fn initial_layout(&self) -> vk::ImageLayout {
        self.initial_layout
    }

    /// Returns `true` if the access watcher manages the layout of this image.
    #[inline]
    pub fn is_layout_auto_control(&self) -> bool {
        self.layout_auto_control
    }

    /// Returns the extent of mip level `level`.
    #[inline]
    pub fn mip_extent(&self, level: u32) -> [u32; 3] {
        self.extent.map(|dimension| (dimension >> level).max(1))
    }

    /// Returns a slice covering every mip level and array layer of the image.
    #[inline]
    pub fn full_slice(&self) -> ImageSlice {
        ImageSlice {
            aspect: self.aspect,
            base_mip_level: 0,
            mip_level_count: self.mip_levels,
            base_array_layer: 0,
            array_layer_count: self.array_layers,
        }
    }

    /// Returns the layout and access the last finished command buffer left the image in.
    #[inline]
    pub fn state(&self) -> ImageState {
        *self.state.lock()
    }

    /// Records the layout and access the image is left in.
    ///
    /// # Safety
    ///
    /// - `state` must be the layout and access of the last command buffer, in submission order,
    ///   that uses the image.
    #[inline]
    pub unsafe fn set_state(&self, state: ImageState) {
        *self.state.lock() = state;
    }
}

unsafe impl VulkanObject for Image {
    type Handle = vk::Image;

    #[inline]
    fn handle(&self) -> Self::Handle {
        self.handle
    }
}

unsafe impl DeviceOwned for Image {
    #[inline]
    fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("handle", &self.handle)
            .field("format", &self.format)
            .field("extent", &self.extent)
            .field("mip_levels", &self.mip_levels)
            .field("array_layers", &self.array_layers)
            .field("layout_auto_control", &self.layout_auto_control)
            .finish_non_exhaustive()
    }
}

impl_id_counter!(Image);

/// Parameters describing an existing image.
#[derive(Clone, Debug)]
pub struct ImageCreateInfo {
    /// The default value is `Format::UNDEFINED`.
    pub format: vk::Format,

    /// The default value is `[1, 1, 1]`.
    pub extent: [u32; 3],

    /// The default value is `1`.
    pub mip_levels: u32,

    /// The default value is `1`.
    pub array_layers: u32,

    /// The aspects of the image format.
    ///
    /// The default value is `ImageAspectFlags::COLOR`.
    pub aspect: vk::ImageAspectFlags,

    /// The default value is [`Sharing::Exclusive`].
    pub sharing: Sharing,

    /// The layout the image is in right now.
    ///
    /// The default value is `ImageLayout::UNDEFINED`.
    pub initial_layout: vk::ImageLayout,

    /// Whether command buffers track the layout of the image and insert barriers for it.
    ///
    /// The default value is `true`.
    pub layout_auto_control: bool,

    pub _ne: NonExhaustive,
}

impl Default for ImageCreateInfo {
    #[inline]
    fn default() -> Self {
        ImageCreateInfo {
            format: vk::Format::UNDEFINED,
            extent: [1, 1, 1],
            mip_levels: 1,
            array_layers: 1,
            aspect: vk::ImageAspectFlags::COLOR,
            sharing: Sharing::Exclusive,
            initial_layout: vk::ImageLayout::UNDEFINED,
            layout_auto_control: true,
            _ne: NonExhaustive(()),
        }
    }
}

/// The layout an image is in and the last access performed on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageState {
    pub layout: vk::ImageLayout,
    pub last_access: MemoryAccess,
}

/// A range of mip levels and array layers of an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImageSlice {
    pub aspect: vk::ImageAspectFlags,
    pub base_mip_level: u32,
    pub mip_level_count: u32,
    pub base_array_layer: u32,
    pub array_layer_count: u32,
}

impl ImageSlice {
    /// Returns `true` if both slices share at least one subresource.
    #[inline]
    pub fn intersects(&self, other: &ImageSlice) -> bool {
        !(self.aspect & other.aspect).is_empty()
            && ranges_overlap(
                self.base_mip_level,
                self.mip_level_count,
                other.base_mip_level,
                other.mip_level_count,
            )
            && ranges_overlap(
                self.base_array_layer,
                self.array_layer_count,
                other.base_array_layer,
                other.array_layer_count,
            )
    }

    #[inline]
    pub fn to_vk(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.aspect,
            base_mip_level: self.base_mip_level,
            level_count: self.mip_level_count,
            base_array_layer: self.base_array_layer,
            layer_count: self.array_layer_count,
        }
    }

    #[inline]
    pub fn to_vk_layers(&self) -> vk::ImageSubresourceLayers {
        vk::ImageSubresourceLayers {
            aspect_mask: self.aspect,
            mip_level: self.base_mip_level,
            base_array_layer: self.base_array_layer,
            layer_count: self.array_layer_count,
        }
    }

    fn sort_key(&self) -> (u32, u32, u32, u32, u32) {
        (
            self.aspect.as_raw(),
            self.base_mip_level,
            self.mip_level_count,
            self.base_array_layer,
            self.array_layer_count,
        )
    }
}

impl PartialOrd for ImageSlice {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ImageSlice {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

/// Returns the size in bytes of one texel block of `format`, and the width and height in texels
/// the block covers.
///
/// Returns `None` for formats that can't be uploaded to, and for formats kiln doesn't know.
pub fn format_block(format: vk::Format) -> Option<(DeviceSize, [u32; 2])> {
    let texel = |size: DeviceSize| Some((size, [1, 1]));
    let block = |size: DeviceSize| Some((size, [4, 4]));

    match format {
        vk::Format::R8_UNORM
        | vk::Format::R8_SNORM
        | vk::Format::R8_UINT
        | vk::Format::R8_SINT
        | vk::Format::R8_SRGB
        | vk::Format::S8_UINT => texel(1),
        vk::Format::R8G8_UNORM
        | vk::Format::R8G8_SNORM
        | vk::Format::R8G8_UINT
        | vk::Format::R8G8_SINT
        | vk::Format::R16_UNORM
        | vk::Format::R16_SNORM
        | vk::Format::R16_UINT
        | vk::Format::R16_SINT
        | vk::Format::R16_SFLOAT
        | vk::Format::D16_UNORM => texel(2),
        vk::Format::R8G8B8A8_UNORM
        | vk::Format::R8G8B8A8_SNORM
        | vk::Format::R8G8B8A8_UINT
        | vk::Format::R8G8B8A8_SINT
        | vk::Format::R8G8B8A8_SRGB
        | vk::Format::B8G8R8A8_UNORM
        | vk::Format::B8G8R8A8_SRGB
        | vk::Format::A2B10G10R10_UNORM_PACK32
        | vk::Format::B10G11R11_UFLOAT_PACK32
        | vk::Format::E5B9G9R9_UFLOAT_PACK32
        | vk::Format::R16G16_UNORM
        | vk::Format::R16G16_SFLOAT
        | vk::Format::R32_UINT
        | vk::Format::R32_SINT
        | vk::Format::R32_SFLOAT
        | vk::Format::D32_SFLOAT => texel(4),
        vk::Format::R16G16B16A16_UNORM
        | vk::Format::R16G16B16A16_SFLOAT
        | vk::Format::R32G32_UINT
        | vk::Format::R32G32_SFLOAT => texel(8),
        vk::Format::R32G32B32A32_UINT
        | vk::Format::R32G32B32A32_SINT
        | vk::Format::R32G32B32A32_SFLOAT => texel(16),
        vk::Format::BC1_RGB_UNORM_BLOCK
        | vk::Format::BC1_RGB_SRGB_BLOCK
        | vk::Format::BC1_RGBA_UNORM_BLOCK
        | vk::Format::BC1_RGBA_SRGB_BLOCK
        | vk::Format::BC4_UNORM_BLOCK
        | vk::Format::BC4_SNORM_BLOCK => block(8),
        vk::Format::BC2_UNORM_BLOCK
        | vk::Format::BC2_SRGB_BLOCK
        | vk::Format::BC3_UNORM_BLOCK
        | vk::Format::BC3_SRGB_BLOCK
        | vk::Format::BC5_UNORM_BLOCK
        | vk::Format::BC5_SNORM_BLOCK
        | vk::Format::BC6H_UFLOAT_BLOCK
        | vk::Format::BC6H_SFLOAT_BLOCK
        | vk::Format::BC7_UNORM_BLOCK
        | vk::Format::BC7_SRGB_BLOCK => block(16),
        _ => None,
    }
}

fn ranges_overlap(a_start: u32, a_count: u32, b_start: u32, b_count: u32) -> bool {
    a_start < b_start.saturating_add(b_count) && b_start < a_start.saturating_add(a_count)
}

#[cfg(test)]
mod tests {
    use super::{format_block, ImageSlice};
    use ash::vk;

    fn slice(mip: u32, mips: u32, layer: u32, layers: u32) -> ImageSlice {
        ImageSlice {
            aspect: vk::ImageAspectFlags::COLOR,
            base_mip_level: mip,
            mip_level_count: mips,
            base_array_layer: layer,
            array_layer_count: layers,
        }
    }

    #[test]
    fn slices_intersect_only_on_shared_subresources() {
        assert!(slice(0, 2, 0, 1).intersects(&slice(1, 1, 0, 1)));
        assert!(!slice(0, 1, 0, 1).intersects(&slice(1, 1, 0, 1)));
        assert!(!slice(0, 4, 0, 2).intersects(&slice(0, 4, 2, 2)));
    }

    #[test]
    fn different_aspects_never_intersect() {
        let depth = ImageSlice {
            aspect: vk::ImageAspectFlags::DEPTH,
            ..slice(0, 1, 0, 1)
        };
        let stencil = ImageSlice {
            aspect: vk::ImageAspectFlags::STENCIL,
            ..slice(0, 1, 0, 1)
        };

        assert!(!depth.intersects(&stencil));
    }

    #[test]
    fn compressed_blocks_cover_several_texels() {
        assert_eq!(format_block(vk::Format::R8G8B8A8_SRGB), Some((4, [1, 1])));
        assert_eq!(format_block(vk::Format::BC7_UNORM_BLOCK), Some((16, [4, 4])));
        assert_eq!(format_block(vk::Format::UNDEFINED), None);
    }

    #[test]
    fn full_slice_covers_the_image() {
        let (headless, device) = headless_device!();
        let image = test_image!(headless, device);
        let full = image.full_slice();

        assert_eq!(full.mip_level_count, 1);
        assert_eq!(full.array_layer_count, 1);
        assert!(image.is_layout_auto_control());
        assert_eq!(image.state().layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(image.mip_extent(0), [64, 64, 1]);
        assert_eq!(image.mip_extent(3), [8, 8, 1]);
        assert_eq!(image.mip_extent(9), [1, 1, 1]);
    }
}
