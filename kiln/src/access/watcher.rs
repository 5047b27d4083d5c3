// Copyright (c) 2026 The kiln developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

use super::{AccessSet, ResourceAccess};
use crate::{
    image::{Image, ImageState},
    macros::contract_violation,
    sync::{DependencyInfo, ImageMemoryBarrier, MemoryAccess},
    VulkanObject,
};
use ash::vk;
use smallvec::SmallVec;
use std::sync::Arc;

/// The outcome of declaring an access.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccessDeclaration {
    /// The access can proceed without synchronization.
    NoConflict,

    /// A barrier was queued that must be recorded before the access.
    BarrierInserted,
}

impl AccessDeclaration {
    #[inline]
    fn or(self, other: AccessDeclaration) -> AccessDeclaration {
        if self == AccessDeclaration::BarrierInserted {
            self
        } else {
            other
        }
    }
}

/// Tracks the layout and pending memory accesses of every auto-controlled image used in one
/// command buffer, and produces the barriers needed between uses.
///
/// Accesses are declared in recording order. The first declaration of an image compares against
/// the state the previous command buffer left it in (see [`Image::state`]). Every later one
/// compares against the state tracked here:
///
/// - The same layout, with reads on both sides: the access is folded into the tracked state and
///   no barrier is needed.
/// - A different layout: a layout transition of the whole image is queued.
/// - A write on either side, after any earlier access: a memory barrier covering the slices of
///   the new access is queued.
///
/// The source scope of a queued barrier is everything that happened to the image since its last
/// barrier over the whole image. A barrier covering only some slices leaves the activity on the
/// others pending, so it stays in the source scope of later barriers. Queued barriers are
/// collected with [`take_barriers`](Self::take_barriers) and must be recorded before the command
/// the declarations were made for.
///
/// Inside a render pass no barrier can be recorded. Accesses that were declared when the pass
/// began may be repeated freely, and hazards between draws of the pass are absorbed. Anything
/// that would need a barrier against work recorded before the pass is a bug in the caller.
///
/// Images with auto-control disabled are ignored. Their users record barriers themselves.
#[derive(Debug, Default)]
pub struct AccessWatcher {
    // Sorted by image identity.
    images: Vec<TrackedImage>,
    pending: SmallVec<[DependencyInfo; 1]>,
    in_render_pass: bool,
    finalized: bool,
}

#[derive(Debug)]
struct TrackedImage {
    image: Arc<Image>,
    layout: vk::ImageLayout,
    // Everything that happened to the image since its last barrier.
    accumulated: MemoryAccess,
    // `accumulated` when the active render pass began, and what the pass declared on entry.
    before_pass: MemoryAccess,
    pass_entry: MemoryAccess,
}

impl AccessWatcher {
    #[inline]
    pub fn new() -> Self {
        AccessWatcher::default()
    }

    /// Declares that the next recorded command accesses `image` as described by `access`.
    ///
    /// # Panics
    ///
    /// - Panics if the watcher has been finalized.
    /// - Panics if the access requires a layout transition while a render pass is active.
    pub fn declare(&mut self, image: &Arc<Image>, access: &ResourceAccess) -> AccessDeclaration {
        if self.finalized {
            contract_violation!(
                "image {:?} accessed after the command buffer was finished",
                image.handle(),
            );
        }

        if !image.is_layout_auto_control() {
            return AccessDeclaration::NoConflict;
        }

        let index = match self
            .images
            .binary_search_by(|tracked| tracked.image.id().cmp(&image.id()))
        {
            Ok(index) => index,
            Err(index) => {
                let ImageState {
                    layout,
                    last_access,
                } = image.state();
                self.images.insert(
                    index,
                    TrackedImage {
                        image: image.clone(),
                        layout,
                        accumulated: last_access,
                        before_pass: last_access,
                        pass_entry: MemoryAccess::NONE,
                    },
                );

                index
            }
        };

        let tracked = &mut self.images[index];
        let needs_transition = tracked.layout != access.layout;
        let hazard = is_hazard(&tracked.accumulated, &access.memory);

        if self.in_render_pass {
            if needs_transition {
                contract_violation!(
                    "image {:?} needs a transition from {:?} to {:?} inside a render pass",
                    image.handle(),
                    tracked.layout,
                    access.layout,
                );
            }

            if !tracked.pass_entry.contains(&access.memory)
                && is_hazard(&tracked.before_pass, &access.memory)
            {
                contract_violation!(
                    "image {:?} is accessed inside a render pass in a way that needs a barrier \
                    against work recorded before the pass",
                    image.handle(),
                );
            }

            tracked.accumulated |= access.memory;

            return AccessDeclaration::NoConflict;
        }

        if !needs_transition && !hazard {
            tracked.accumulated |= access.memory;

            return AccessDeclaration::NoConflict;
        }

        let template = ImageMemoryBarrier {
            src_stages: tracked.accumulated.stages(),
            src_access: tracked.accumulated.access(),
            dst_stages: access.memory.stages(),
            dst_access: access.memory.access(),
            old_layout: tracked.layout,
            new_layout: access.layout,
            image: image.handle(),
            subresource_range: image.full_slice(),
        };

        tracing::trace!(
            image = ?template.image,
            old_layout = ?template.old_layout,
            new_layout = ?template.new_layout,
            src_stages = ?template.src_stages,
            dst_stages = ?template.dst_stages,
            "image barrier",
        );

        let covers_image = needs_transition || access.slices() == [image.full_slice()];
        tracked.layout = access.layout;

        if covers_image {
            tracked.accumulated = access.memory;
        } else {
            tracked.accumulated |= access.memory;
        }

        let batch = self.batch_for(template.image);

        if needs_transition {
            batch.image_memory_barriers.push(template);
        } else {
            batch
                .image_memory_barriers
                .extend(access.slices().iter().map(|&slice| ImageMemoryBarrier {
                    subresource_range: slice,
                    ..template
                }));
        }

        AccessDeclaration::BarrierInserted
    }

    /// Declares every access of `set`.
    pub fn declare_set(&mut self, set: &AccessSet) -> AccessDeclaration {
        set.iter()
            .fold(AccessDeclaration::NoConflict, |result, (image, access)| {
                result.or(self.declare(image, access))
            })
    }

    // Barriers within one pipeline barrier command are unordered, so a second barrier for the
    // same image starts a new batch.
    fn batch_for(&mut self, image: vk::Image) -> &mut DependencyInfo {
        let needs_new_batch = self.pending.last().map_or(true, |batch| {
            batch
                .image_memory_barriers
                .iter()
                .any(|barrier| barrier.image == image)
        });

        if needs_new_batch {
            self.pending.push(DependencyInfo::default());
        }

        let last = self.pending.len() - 1;

        &mut self.pending[last]
    }

    /// Returns `true` if barriers are waiting to be recorded.
    #[inline]
    pub fn has_pending_barriers(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Takes the queued barriers, in the order they must be recorded.
    #[inline]
    pub fn take_barriers(&mut self) -> SmallVec<[DependencyInfo; 1]> {
        std::mem::take(&mut self.pending)
    }

    /// Enters render pass mode.
    ///
    /// `entry` holds the accesses declared for the pass before it began, whose barriers have
    /// already been recorded. Until [`end_render_pass`](Self::end_render_pass), layout
    /// transitions are forbidden, and so are hazards against activity from before the pass that
    /// `entry` doesn't cover.
    pub fn begin_render_pass(&mut self, entry: &AccessSet) {
        if self.in_render_pass {
            contract_violation!("render pass begun while another one is active");
        }

        if self.has_pending_barriers() {
            contract_violation!("render pass begun with barriers that were not recorded");
        }

        for tracked in &mut self.images {
            tracked.before_pass = tracked.accumulated;
            tracked.pass_entry = entry
                .get(&tracked.image)
                .map_or(MemoryAccess::NONE, |access| access.memory);
        }

        self.in_render_pass = true;
    }

    pub fn end_render_pass(&mut self) {
        if !self.in_render_pass {
            contract_violation!("render pass ended while none is active");
        }

        self.in_render_pass = false;
    }

    #[inline]
    pub fn is_in_render_pass(&self) -> bool {
        self.in_render_pass
    }

    /// Returns the layout `image` is in at this point of the recording, if it was used.
    pub fn layout_of(&self, image: &Image) -> Option<vk::ImageLayout> {
        self.images
            .binary_search_by(|tracked| tracked.image.id().cmp(&image.id()))
            .ok()
            .map(|index| self.images[index].layout)
    }

    /// Freezes the tracked state.
    ///
    /// The states the images are left in can then be read with
    /// [`final_states`](Self::final_states), and are written back into the images with
    /// [`write_back`](Self::write_back) once the command buffer has been submitted.
    ///
    /// # Panics
    ///
    /// - Panics if barriers are still pending or a render pass is still active.
    pub fn finalize(&mut self) {
        if self.finalized {
            return;
        }

        if self.has_pending_barriers() {
            contract_violation!("command buffer finished with barriers that were not recorded");
        }

        if self.in_render_pass {
            contract_violation!("command buffer finished inside a render pass");
        }

        self.finalized = true;
    }

    /// Writes the final state of every tracked image back into the image.
    ///
    /// # Safety
    ///
    /// - The command buffer recorded with this watcher must have been submitted, after every
    ///   other command buffer using these images.
    ///
    /// # Panics
    ///
    /// - Panics if the watcher has not been finalized.
    pub unsafe fn write_back(&self) {
        if !self.finalized {
            contract_violation!(
                "image states written back before the command buffer was finished",
            );
        }

        for (image, state) in self.final_states() {
            // SAFETY: Ensured by the caller.
            unsafe { image.set_state(state) };
        }
    }

    #[inline]
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Returns the state every tracked image is left in, in image identity order.
    #[inline]
    pub fn final_states(&self) -> impl Iterator<Item = (&Arc<Image>, ImageState)> {
        self.images.iter().map(|tracked| {
            (
                &tracked.image,
                ImageState {
                    layout: tracked.layout,
                    last_access: tracked.accumulated,
                },
            )
        })
    }
}

// Whether `next` must wait for `previous` on the same subresources.
fn is_hazard(previous: &MemoryAccess, next: &MemoryAccess) -> bool {
    !previous.is_empty() && (previous.has_write() || next.has_write())
}

#[cfg(test)]
mod tests {
    use super::{AccessDeclaration, AccessWatcher};
    use crate::{
        access::{AccessSet, ResourceAccess},
        image::{Image, ImageCreateInfo, ImageSlice},
        sync::{DependencyInfo, MemoryAccess},
        VulkanObject,
    };
    use ash::vk;
    use std::sync::Arc;

    fn sampled(image: &Image) -> ResourceAccess {
        ResourceAccess::new(
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            MemoryAccess::shader_sampled_read(vk::PipelineStageFlags2::FRAGMENT_SHADER),
            image.full_slice(),
        )
    }

    fn transfer_write(image: &Image) -> ResourceAccess {
        ResourceAccess::new(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            MemoryAccess::TRANSFER_WRITE,
            image.full_slice(),
        )
    }

    fn image_barrier_count(batches: &[DependencyInfo]) -> usize {
        batches
            .iter()
            .map(|batch| batch.image_memory_barriers.len())
            .sum()
    }

    #[test]
    fn barrier_minimality() {
        let (headless, device) = headless_device!();
        let image = test_image!(headless, device, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        let mut watcher = AccessWatcher::new();

        for stages in [
            vk::PipelineStageFlags2::FRAGMENT_SHADER,
            vk::PipelineStageFlags2::VERTEX_SHADER,
            vk::PipelineStageFlags2::COMPUTE_SHADER,
        ]
        .into_iter()
        .cycle()
        .take(30)
        {
            let access = ResourceAccess::new(
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                MemoryAccess::shader_sampled_read(stages),
                image.full_slice(),
            );
            assert_eq!(
                watcher.declare(&image, &access),
                AccessDeclaration::NoConflict,
            );
        }

        assert!(!watcher.has_pending_barriers());
    }

    #[test]
    fn barrier_necessity() {
        let (headless, device) = headless_device!();
        let image = test_image!(headless, device, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        let mut watcher = AccessWatcher::new();

        watcher.declare(&image, &sampled(&image));
        let vertex_read = ResourceAccess::new(
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            MemoryAccess::shader_sampled_read(vk::PipelineStageFlags2::VERTEX_SHADER),
            image.full_slice(),
        );
        watcher.declare(&image, &vertex_read);

        assert_eq!(
            watcher.declare(&image, &transfer_write(&image)),
            AccessDeclaration::BarrierInserted,
        );

        let batches = watcher.take_barriers();
        assert_eq!(image_barrier_count(&batches), 1);

        let barrier = &batches[0].image_memory_barriers[0];
        assert_eq!(barrier.image, image.handle());
        assert_eq!(barrier.old_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(barrier.new_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(
            barrier.src_stages,
            vk::PipelineStageFlags2::FRAGMENT_SHADER | vk::PipelineStageFlags2::VERTEX_SHADER,
        );
        assert_eq!(barrier.src_access, vk::AccessFlags2::SHADER_SAMPLED_READ);
        assert_eq!(barrier.dst_stages, vk::PipelineStageFlags2::ALL_TRANSFER);
        assert_eq!(barrier.dst_access, vk::AccessFlags2::TRANSFER_WRITE);
        assert_eq!(barrier.subresource_range, image.full_slice());
    }

    #[test]
    fn write_after_write_in_same_layout_is_a_memory_barrier() {
        let (headless, device) = headless_device!();
        let image = test_image!(headless, device);
        let mut watcher = AccessWatcher::new();

        assert_eq!(
            watcher.declare(&image, &transfer_write(&image)),
            AccessDeclaration::BarrierInserted,
        );
        watcher.take_barriers();

        assert_eq!(
            watcher.declare(&image, &transfer_write(&image)),
            AccessDeclaration::BarrierInserted,
        );
        let batches = watcher.take_barriers();
        let barrier = &batches[0].image_memory_barriers[0];
        assert!(!barrier.is_layout_transition());
        assert_eq!(barrier.src_access, vk::AccessFlags2::TRANSFER_WRITE);
    }

    #[test]
    fn hazard_barrier_covers_only_the_accessed_slices() {
        let (headless, device) = headless_device!();
        let handle = headless.next_handle::<vk::Image>();
        // SAFETY: Headless handles are never dereferenced.
        let image = unsafe {
            Image::from_handle(
                device.clone(),
                handle,
                ImageCreateInfo {
                    array_layers: 4,
                    initial_layout: vk::ImageLayout::GENERAL,
                    ..Default::default()
                },
            )
        };
        let layer = |index| ImageSlice {
            base_array_layer: index,
            array_layer_count: 1,
            ..image.full_slice()
        };
        let storage = |slice| {
            ResourceAccess::new(
                vk::ImageLayout::GENERAL,
                MemoryAccess::shader_storage_read_write(vk::PipelineStageFlags2::COMPUTE_SHADER),
                slice,
            )
        };
        let mut watcher = AccessWatcher::new();

        assert_eq!(
            watcher.declare(&image, &storage(layer(0))),
            AccessDeclaration::NoConflict,
        );
        assert_eq!(
            watcher.declare(&image, &storage(layer(2))),
            AccessDeclaration::BarrierInserted,
        );

        let batches = watcher.take_barriers();
        assert_eq!(image_barrier_count(&batches), 1);
        assert_eq!(
            batches[0].image_memory_barriers[0].subresource_range,
            layer(2),
        );
    }

    #[test]
    fn same_image_twice_in_one_batch_is_split() {
        let (headless, device) = headless_device!();
        let image = test_image!(headless, device);
        let mut watcher = AccessWatcher::new();

        watcher.declare(&image, &transfer_write(&image));
        watcher.declare(&image, &sampled(&image));

        let batches = watcher.take_barriers();
        assert_eq!(batches.len(), 2);
        assert_eq!(
            batches[1].image_memory_barriers[0].old_layout,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
    }

    #[test]
    fn declared_sets_merge_compatible_reads() {
        let (headless, device) = headless_device!();
        let image = test_image!(headless, device);
        let other = test_image!(headless, device);

        let mut first = AccessSet::new();
        first.add(image.clone(), sampled(&image));
        let mut second = AccessSet::new();
        second.add(
            image.clone(),
            ResourceAccess::new(
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                MemoryAccess::shader_sampled_read(vk::PipelineStageFlags2::VERTEX_SHADER),
                image.full_slice(),
            ),
        );
        second.add(other.clone(), sampled(&other));
        first.merge(&second);

        let mut watcher = AccessWatcher::new();
        assert_eq!(
            watcher.declare_set(&first),
            AccessDeclaration::BarrierInserted,
        );

        let batches = watcher.take_barriers();
        assert_eq!(batches.len(), 1);
        assert_eq!(image_barrier_count(&batches), 2);
    }

    #[test]
    fn auto_control_disabled() {
        let (headless, device) = headless_device!();
        let handle = headless.next_handle::<vk::Image>();
        // SAFETY: Headless handles are never dereferenced.
        let image = unsafe {
            Image::from_handle(
                device.clone(),
                handle,
                ImageCreateInfo {
                    layout_auto_control: false,
                    ..Default::default()
                },
            )
        };
        let mut watcher = AccessWatcher::new();

        assert_eq!(
            watcher.declare(&image, &transfer_write(&image)),
            AccessDeclaration::NoConflict,
        );
        assert_eq!(
            watcher.declare(&image, &sampled(&image)),
            AccessDeclaration::NoConflict,
        );
        assert!(watcher.layout_of(&image).is_none());

        watcher.finalize();
        // SAFETY: Nothing is submitted on a headless device.
        unsafe { watcher.write_back() };
        assert_eq!(image.state().layout, vk::ImageLayout::UNDEFINED);
    }

    #[test]
    fn states_are_written_back_only_on_request() {
        let (headless, device) = headless_device!();
        let image = test_image!(headless, device);
        let mut watcher = AccessWatcher::new();

        watcher.declare(&image, &transfer_write(&image));
        watcher.take_barriers();
        watcher.finalize();
        assert_eq!(image.state().layout, vk::ImageLayout::UNDEFINED);

        // SAFETY: Nothing is submitted on a headless device.
        unsafe { watcher.write_back() };
        let state = image.state();
        assert_eq!(state.layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(state.last_access, MemoryAccess::TRANSFER_WRITE);

        let states: Vec<_> = watcher.final_states().collect();
        assert_eq!(states.len(), 1);
        assert!(Arc::ptr_eq(states[0].0, &image));
    }

    #[test]
    fn previous_write_is_synchronized_on_first_use() {
        let (headless, device) = headless_device!();
        let image = test_image!(headless, device, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);

        let mut first = AccessWatcher::new();
        let storage = ResourceAccess::new(
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            MemoryAccess::write(
                vk::PipelineStageFlags2::FRAGMENT_SHADER,
                vk::AccessFlags2::SHADER_STORAGE_WRITE,
            ),
            image.full_slice(),
        );
        assert_eq!(
            first.declare(&image, &storage),
            AccessDeclaration::NoConflict,
        );
        first.finalize();
        // SAFETY: Nothing is submitted on a headless device.
        unsafe { first.write_back() };

        let mut second = AccessWatcher::new();
        assert_eq!(
            second.declare(&image, &sampled(&image)),
            AccessDeclaration::BarrierInserted,
        );
        let batches = second.take_barriers();
        assert!(!batches[0].image_memory_barriers[0].is_layout_transition());
    }

    #[test]
    fn render_pass_mode() {
        let (headless, device) = headless_device!();
        let image = test_image!(headless, device, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        let attachment = ResourceAccess::new(
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            MemoryAccess::COLOR_ATTACHMENT,
            image.full_slice(),
        );
        let mut entry = AccessSet::new();
        entry.add(image.clone(), attachment.clone());
        let mut watcher = AccessWatcher::new();

        watcher.declare_set(&entry);
        watcher.begin_render_pass(&entry);
        assert_eq!(
            watcher.declare(&image, &attachment),
            AccessDeclaration::NoConflict,
        );
        assert!(!watcher.has_pending_barriers());

        assert_should_panic!("inside a render pass", {
            watcher.declare(&image, &sampled(&image));
        });
    }

    #[test]
    fn writes_before_render_pass_must_be_synchronized_on_entry() {
        let (headless, device) = headless_device!();
        let image = test_image!(headless, device, vk::ImageLayout::GENERAL);
        let storage = |stages| {
            ResourceAccess::new(
                vk::ImageLayout::GENERAL,
                MemoryAccess::shader_storage_read_write(stages),
                image.full_slice(),
            )
        };
        let mut watcher = AccessWatcher::new();

        watcher.declare(&image, &storage(vk::PipelineStageFlags2::COMPUTE_SHADER));
        watcher.take_barriers();
        watcher.begin_render_pass(&AccessSet::new());

        assert_should_panic!("against work recorded before the pass", {
            watcher.declare(&image, &storage(vk::PipelineStageFlags2::FRAGMENT_SHADER));
        });
    }

    #[test]
    fn hazards_between_draws_are_absorbed() {
        let (headless, device) = headless_device!();
        let image = test_image!(headless, device, vk::ImageLayout::GENERAL);
        let storage = ResourceAccess::new(
            vk::ImageLayout::GENERAL,
            MemoryAccess::shader_storage_read_write(vk::PipelineStageFlags2::FRAGMENT_SHADER),
            image.full_slice(),
        );
        let mut watcher = AccessWatcher::new();
        watcher.begin_render_pass(&AccessSet::new());

        for _ in 0..3 {
            assert_eq!(
                watcher.declare(&image, &storage),
                AccessDeclaration::NoConflict,
            );
        }

        watcher.end_render_pass();
        assert_eq!(
            watcher.declare(&image, &storage),
            AccessDeclaration::BarrierInserted,
        );
    }

    #[test]
    fn partial_barriers_keep_other_slices_pending() {
        let (headless, device) = headless_device!();
        let handle = headless.next_handle::<vk::Image>();
        // SAFETY: Headless handles are never dereferenced.
        let image = unsafe {
            Image::from_handle(
                device.clone(),
                handle,
                ImageCreateInfo {
                    array_layers: 4,
                    initial_layout: vk::ImageLayout::GENERAL,
                    ..Default::default()
                },
            )
        };
        let layer = |index| ImageSlice {
            base_array_layer: index,
            array_layer_count: 1,
            ..image.full_slice()
        };
        let mut watcher = AccessWatcher::new();

        watcher.declare(
            &image,
            &ResourceAccess::new(
                vk::ImageLayout::GENERAL,
                MemoryAccess::TRANSFER_WRITE,
                layer(0),
            ),
        );
        watcher.declare(
            &image,
            &ResourceAccess::new(
                vk::ImageLayout::GENERAL,
                MemoryAccess::shader_storage_read_write(vk::PipelineStageFlags2::COMPUTE_SHADER),
                layer(2),
            ),
        );
        assert_eq!(
            watcher.declare(
                &image,
                &ResourceAccess::new(
                    vk::ImageLayout::GENERAL,
                    MemoryAccess::read(
                        vk::PipelineStageFlags2::FRAGMENT_SHADER,
                        vk::AccessFlags2::SHADER_STORAGE_READ,
                    ),
                    layer(0),
                ),
            ),
            AccessDeclaration::BarrierInserted,
        );

        let batches = watcher.take_barriers();
        assert_eq!(image_barrier_count(&batches), 2);

        let barrier = batches[1].image_memory_barriers[0];
        assert_eq!(barrier.subresource_range, layer(0));
        assert!(barrier
            .src_access
            .contains(vk::AccessFlags2::TRANSFER_WRITE | vk::AccessFlags2::SHADER_STORAGE_WRITE));
        assert!(barrier.src_stages.contains(
            vk::PipelineStageFlags2::ALL_TRANSFER | vk::PipelineStageFlags2::COMPUTE_SHADER
        ));
    }

    #[test]
    fn declaring_after_finalize_panics() {
        let (headless, device) = headless_device!();
        let image = test_image!(headless, device);
        let mut watcher = AccessWatcher::new();
        watcher.finalize();

        assert_should_panic!("after the command buffer was finished", {
            watcher.declare(&image, &sampled(&image));
        });
    }
}
