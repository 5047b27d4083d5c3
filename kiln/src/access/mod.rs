// Copyright (c) 2026 The kiln developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Image access declarations.
//!
//! Everything that reads or writes an image during recording describes what it does with a
//! [`ResourceAccess`]: the layout the image must be in, the pipeline stages and memory accesses
//! involved, and the subresources touched. Accesses of one command (or of one descriptor set) are
//! collected in an [`AccessSet`], ordered by image identity. The accesses of everything bound at
//! the same time (one set per descriptor set slot) are combined by an [`AccessMultiset`].
//!
//! Two accesses to the same image can be merged when they ask for the same layout and their
//! slices are either identical or disjoint. The merged access is the union of both, so two
//! descriptor sets sampling the same texture cost one barrier, not two. Anything else means the
//! caller asked for one image to be in two layouts at once, which is a bug in the caller: the
//! panicking entry points ([`AccessSet::add`], [`AccessSet::merge`]) treat it as such, and the
//! `try_*` variants report it.
//!
//! The [`AccessWatcher`] turns the declarations of a command buffer into pipeline barriers.

pub use self::watcher::{AccessDeclaration, AccessWatcher};
use crate::{image::Image, image::ImageSlice, macros::contract_violation, sync::MemoryAccess};
use ash::vk;
use smallvec::{smallvec, SmallVec};
use std::{error::Error, fmt, sync::Arc};

mod watcher;

/// The maximum number of disjoint slices one merged access can cover.
pub const MAX_ACCESS_SLICES: usize = 4;

/// The maximum number of child sets of an [`AccessMultiset`].
pub const MAX_ACCESS_CHILDREN: usize = 4;

/// What one user needs from an image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceAccess {
    pub layout: vk::ImageLayout,
    pub memory: MemoryAccess,
    slices: SmallVec<[ImageSlice; MAX_ACCESS_SLICES]>,
}

impl ResourceAccess {
    #[inline]
    pub fn new(layout: vk::ImageLayout, memory: MemoryAccess, slice: ImageSlice) -> Self {
        ResourceAccess {
            layout,
            memory,
            slices: smallvec![slice],
        }
    }

    /// Returns the slices covered by the access, sorted.
    #[inline]
    pub fn slices(&self) -> &[ImageSlice] {
        &self.slices
    }

    /// Merges `other` into `self`.
    ///
    /// On error, `self` is left unchanged.
    pub fn try_merge(&mut self, other: &ResourceAccess) -> Result<(), AccessMergeError> {
        if self.layout != other.layout {
            return Err(AccessMergeError::IncompatibleLayouts {
                first: self.layout,
                second: other.layout,
            });
        }

        let mut slices = self.slices.clone();

        for slice in &other.slices {
            if slices.contains(slice) {
                continue;
            }

            if slices.iter().any(|existing| existing.intersects(slice)) {
                return Err(AccessMergeError::OverlappingSlices);
            }

            if slices.len() == MAX_ACCESS_SLICES {
                return Err(AccessMergeError::TooManySlices);
            }

            slices.push(*slice);
        }

        slices.sort_unstable();
        self.slices = slices;
        self.memory |= other.memory;

        Ok(())
    }

    /// Merges `other` into `self`, panicking if the two cannot be merged.
    #[inline]
    #[track_caller]
    pub fn merge(&mut self, other: &ResourceAccess) {
        if let Err(err) = self.try_merge(other) {
            contract_violation!("cannot merge image accesses: {err}");
        }
    }
}

/// Error that can happen when merging two accesses to the same image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessMergeError {
    /// The image is required to be in two different layouts at once.
    IncompatibleLayouts {
        first: vk::ImageLayout,
        second: vk::ImageLayout,
    },

    /// The slices of the two accesses intersect without being identical.
    OverlappingSlices,

    /// The merged access would cover more than [`MAX_ACCESS_SLICES`] disjoint slices.
    TooManySlices,
}

impl Error for AccessMergeError {}

impl fmt::Display for AccessMergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IncompatibleLayouts { first, second } => write!(
                f,
                "the image is required to be in both {first:?} and {second:?}",
            ),
            Self::OverlappingSlices => f.write_str(
                "the accesses cover partially overlapping subresources of the image",
            ),
            Self::TooManySlices => write!(
                f,
                "the merged access would cover more than {MAX_ACCESS_SLICES} disjoint slices",
            ),
        }
    }
}

/// Accesses to several images, at most one per image, sorted by image identity.
#[derive(Clone, Default)]
pub struct AccessSet {
    entries: Vec<(Arc<Image>, ResourceAccess)>,
}

impl AccessSet {
    #[inline]
    pub fn new() -> Self {
        AccessSet::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Iterates over the entries in image identity order.
    #[inline]
    pub fn iter(&self) -> impl ExactSizeIterator<Item = (&Arc<Image>, &ResourceAccess)> {
        self.entries.iter().map(|(image, access)| (image, access))
    }

    /// Returns the access to `image`, if any.
    #[inline]
    pub fn get(&self, image: &Image) -> Option<&ResourceAccess> {
        self.search(image)
            .ok()
            .map(|index| &self.entries[index].1)
    }

    fn search(&self, image: &Image) -> Result<usize, usize> {
        self.entries
            .binary_search_by(|(entry, _)| entry.id().cmp(&image.id()))
    }

    /// Adds an access, merging it with the existing access to the same image.
    ///
    /// On error, `self` is left unchanged.
    pub fn try_add(
        &mut self,
        image: Arc<Image>,
        access: ResourceAccess,
    ) -> Result<(), AccessMergeError> {
        match self.search(&image) {
            Ok(index) => self.entries[index].1.try_merge(&access),
            Err(index) => {
                self.entries.insert(index, (image, access));

                Ok(())
            }
        }
    }

    /// Same as [`try_add`](Self::try_add), but panics if the accesses cannot be merged.
    #[track_caller]
    pub fn add(&mut self, image: Arc<Image>, access: ResourceAccess) {
        if let Err(err) = self.try_add(image, access) {
            contract_violation!("cannot add image access to access set: {err}");
        }
    }

    /// Merges every entry of `other` into `self`.
    ///
    /// On error, `self` is left unchanged.
    pub fn try_merge(&mut self, other: &AccessSet) -> Result<(), AccessMergeError> {
        if other.is_empty() {
            return Ok(());
        }

        let mut merged = self.clone();

        for (image, access) in &other.entries {
            merged.try_add(image.clone(), access.clone())?;
        }

        *self = merged;

        Ok(())
    }

    /// Same as [`try_merge`](Self::try_merge), but panics if two entries cannot be merged.
    #[track_caller]
    pub fn merge(&mut self, other: &AccessSet) {
        if let Err(err) = self.try_merge(other) {
            contract_violation!("cannot merge access sets: {err}");
        }
    }
}

impl fmt::Debug for AccessSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.entries
                    .iter()
                    .map(|(image, access)| (image.id(), access)),
            )
            .finish()
    }
}

/// Up to [`MAX_ACCESS_CHILDREN`] access sets, merged on demand.
///
/// The merged set is cached and only rebuilt after a child changed.
#[derive(Debug, Default)]
pub struct AccessMultiset {
    children: [Option<AccessSet>; MAX_ACCESS_CHILDREN],
    merged: AccessSet,
    dirty: bool,
}

impl AccessMultiset {
    #[inline]
    pub fn new() -> Self {
        AccessMultiset::default()
    }

    /// Replaces the child at `index`.
    ///
    /// # Panics
    ///
    /// - Panics if `index` is not less than [`MAX_ACCESS_CHILDREN`].
    #[track_caller]
    pub fn set(&mut self, index: usize, set: AccessSet) {
        if index >= MAX_ACCESS_CHILDREN {
            contract_violation!(
                "access multiset index {index} is out of range (max {MAX_ACCESS_CHILDREN})",
            );
        }

        self.children[index] = Some(set);
        self.dirty = true;
    }

    /// Removes the child at `index`, if any.
    #[inline]
    pub fn remove(&mut self, index: usize) {
        if let Some(child) = self.children.get_mut(index) {
            if child.take().is_some() {
                self.dirty = true;
            }
        }
    }

    /// Removes every child.
    #[inline]
    pub fn clear(&mut self) {
        self.children = Default::default();
        self.merged.clear();
        self.dirty = false;
    }

    /// Returns `true` if a child changed since the merged set was last built.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Returns the child at `index`, if any.
    #[inline]
    pub fn child(&self, index: usize) -> Option<&AccessSet> {
        self.children.get(index).and_then(Option::as_ref)
    }

    /// Returns the union of every child, rebuilding it if a child changed.
    ///
    /// # Panics
    ///
    /// - Panics if two children require the same image in different layouts.
    pub fn merged(&mut self) -> &AccessSet {
        if self.dirty {
            let mut merged = AccessSet::new();

            for child in self.children.iter().flatten() {
                merged.merge(child);
            }

            self.merged = merged;
            self.dirty = false;
        }

        &self.merged
    }
}

#[cfg(test)]
mod tests {
    use super::{AccessMergeError, AccessMultiset, AccessSet, ResourceAccess};
    use crate::{image::ImageSlice, sync::MemoryAccess};
    use ash::vk;

    fn sampled(slice: ImageSlice) -> ResourceAccess {
        ResourceAccess::new(
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            MemoryAccess::shader_sampled_read(vk::PipelineStageFlags2::FRAGMENT_SHADER),
            slice,
        )
    }

    fn layer(index: u32) -> ImageSlice {
        ImageSlice {
            aspect: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            mip_level_count: 1,
            base_array_layer: index,
            array_layer_count: 1,
        }
    }

    #[test]
    fn merge_widens_reads() {
        let mut a = sampled(layer(0));
        let b = ResourceAccess::new(
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            MemoryAccess::shader_sampled_read(vk::PipelineStageFlags2::COMPUTE_SHADER),
            layer(0),
        );

        a.merge(&b);

        assert_eq!(a.slices(), &[layer(0)]);
        assert_eq!(
            a.memory.read_stages,
            vk::PipelineStageFlags2::FRAGMENT_SHADER | vk::PipelineStageFlags2::COMPUTE_SHADER,
        );
    }

    #[test]
    fn merge_keeps_disjoint_slices_sorted() {
        let mut a = sampled(layer(2));
        a.merge(&sampled(layer(0)));
        a.merge(&sampled(layer(1)));

        assert_eq!(a.slices(), &[layer(0), layer(1), layer(2)]);
    }

    #[test]
    fn merge_failures() {
        let mut a = sampled(layer(0));
        let general = ResourceAccess::new(
            vk::ImageLayout::GENERAL,
            MemoryAccess::shader_storage_read_write(vk::PipelineStageFlags2::COMPUTE_SHADER),
            layer(0),
        );
        assert!(matches!(
            a.try_merge(&general),
            Err(AccessMergeError::IncompatibleLayouts { .. }),
        ));

        let overlapping = sampled(ImageSlice {
            array_layer_count: 2,
            ..layer(0)
        });
        assert_eq!(
            a.try_merge(&overlapping),
            Err(AccessMergeError::OverlappingSlices),
        );

        for index in 1..4 {
            a.merge(&sampled(layer(index)));
        }
        assert_eq!(
            a.try_merge(&sampled(layer(4))),
            Err(AccessMergeError::TooManySlices),
        );
        assert_eq!(a.slices().len(), 4);

        assert_should_panic!("cannot merge image accesses", {
            a.merge(&general);
        });
    }

    #[test]
    fn merge_commutativity() {
        let (headless, device) = headless_device!();
        let image_a = test_image!(headless, device);
        let image_b = test_image!(headless, device);
        let image_c = test_image!(headless, device);

        let mut a = AccessSet::new();
        a.add(image_a.clone(), sampled(layer(0)));
        a.add(image_c.clone(), sampled(layer(0)));

        let mut b = AccessSet::new();
        b.add(image_b.clone(), sampled(layer(0)));
        b.add(
            image_c.clone(),
            ResourceAccess::new(
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                MemoryAccess::shader_sampled_read(vk::PipelineStageFlags2::VERTEX_SHADER),
                layer(1),
            ),
        );

        let mut ab = a.clone();
        ab.merge(&b);
        let mut ba = b.clone();
        ba.merge(&a);

        assert_eq!(ab.len(), 3);
        for image in [&image_a, &image_b, &image_c] {
            assert_eq!(ab.get(image), ba.get(image));
        }

        let ids: Vec<_> = ab.iter().map(|(image, _)| image.id()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn failed_set_merge_leaves_set_unchanged() {
        let (headless, device) = headless_device!();
        let image_a = test_image!(headless, device);
        let image_b = test_image!(headless, device);

        let mut a = AccessSet::new();
        a.add(image_a.clone(), sampled(layer(0)));

        let mut b = AccessSet::new();
        b.add(image_b.clone(), sampled(layer(0)));
        b.add(
            image_a.clone(),
            ResourceAccess::new(
                vk::ImageLayout::GENERAL,
                MemoryAccess::shader_storage_read_write(vk::PipelineStageFlags2::COMPUTE_SHADER),
                layer(0),
            ),
        );

        assert!(a.try_merge(&b).is_err());
        assert_eq!(a.len(), 1);
        assert!(a.get(&image_b).is_none());
    }

    #[test]
    fn multiset_rebuilds_only_when_dirty() {
        let (headless, device) = headless_device!();
        let image_a = test_image!(headless, device);
        let image_b = test_image!(headless, device);

        let mut first = AccessSet::new();
        first.add(image_a.clone(), sampled(layer(0)));
        let mut second = AccessSet::new();
        second.add(image_b.clone(), sampled(layer(0)));

        let mut multiset = AccessMultiset::new();
        assert!(multiset.merged().is_empty());

        multiset.set(0, first);
        multiset.set(2, second);
        assert!(multiset.is_dirty());
        assert_eq!(multiset.merged().len(), 2);
        assert!(!multiset.is_dirty());

        // Reading again, or removing an empty slot, leaves the cached set as it is.
        assert_eq!(multiset.merged().len(), 2);
        multiset.remove(1);
        assert!(!multiset.is_dirty());

        multiset.remove(0);
        assert!(multiset.is_dirty());
        assert_eq!(multiset.merged().len(), 1);
        assert!(multiset.merged().get(&image_b).is_some());
        assert!(!multiset.is_dirty());

        assert_should_panic!({
            multiset.set(4, AccessSet::new());
        });
    }
}
