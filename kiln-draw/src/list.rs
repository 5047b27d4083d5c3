use crate::{
    arena::CommandMemoryPool,
    command::{DrawCommand, DrawCommandInfo, DrawCommandsOrder},
    plan::{DrawPlan, FrameContext},
};
use kiln::{command_buffer::CommandProducerGraphic, Validated, VulkanError};
use smallvec::SmallVec;
use std::{any::Any, fmt};

/// The draw commands of one render stage for one frame.
///
/// Commands are stored in a [`CommandMemoryPool`]. [`clear`](Self::clear) drops all of them at
/// once and keeps the memory for the next frame.
pub struct DrawCommandList {
    pool: CommandMemoryPool,
}

impl DrawCommandList {
    #[inline]
    pub fn new() -> Self {
        DrawCommandList {
            pool: CommandMemoryPool::new(),
        }
    }

    /// Adds `command` to the list and returns it, to fill in what isn't known at construction.
    #[inline]
    pub fn create_command<T: DrawCommand>(&mut self, command: T) -> &mut T {
        self.pool.alloc(command)
    }

    /// Asks every drawable of stage `stage_index` in `plan` to add its commands.
    pub fn fill_from_stage_plan(
        &mut self,
        plan: &DrawPlan<'_>,
        frame: &FrameContext<'_>,
        stage_index: usize,
        extra_data: Option<&dyn Any>,
    ) {
        if stage_index >= plan.stage_count() {
            tracing::warn!(
                stage_index,
                stage_count = plan.stage_count(),
                "filling a command list from a stage the draw plan doesn't have",
            );

            return;
        }

        for drawable in plan.stage(stage_index) {
            drawable.add_to_command_list(self, frame, stage_index, extra_data);
        }
    }

    /// Records every command into `producer`, sorted by layer and then by `order`.
    ///
    /// Runs of consecutive commands that share a group index are drawn by the first command of
    /// the run. Returns the number of draw invocations.
    pub fn draw(
        &self,
        producer: &mut CommandProducerGraphic,
        order: DrawCommandsOrder,
    ) -> Result<usize, Validated<VulkanError>> {
        let mut sorted: Vec<(DrawCommandInfo, &dyn DrawCommand)> = self
            .pool
            .iter()
            .map(|command| (command.info(), command))
            .collect();
        sorted.sort_by(|(a, _), (b, _)| order.compare(a, b));

        let mut group: SmallVec<[&dyn DrawCommand; 16]> = SmallVec::new();
        let mut invocations = 0;
        let mut start = 0;

        while let Some(&(info, first)) = sorted.get(start) {
            let run = 1 + sorted[start + 1..]
                .iter()
                .take_while(|(other, _)| other.joins_group(&info))
                .count();

            group.clear();
            group.extend(sorted[start..start + run].iter().map(|&(_, command)| command));
            first.draw(producer, &group)?;

            invocations += 1;
            start += run;
        }

        tracing::trace!(
            commands = sorted.len(),
            invocations,
            ?order,
            "drew command list",
        );

        Ok(invocations)
    }

    /// Returns the commands in creation order.
    #[inline]
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &dyn DrawCommand> + '_ {
        self.pool.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pool.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    /// Drops every command.
    #[inline]
    pub fn clear(&mut self) {
        self.pool.reset();
    }

    /// Returns the number of times the list has been cleared.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.pool.generation()
    }
}

impl Default for DrawCommandList {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DrawCommandList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DrawCommandList")
            .field("pool", &self.pool)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::DrawCommandList;
    use crate::{
        command::{DrawCommand, DrawCommandInfo, DrawCommandsOrder},
        plan::{DrawPlan, Drawable, FrameContext, StageRegistry},
    };
    use ash::vk;
    use kiln::{
        command_buffer::{sys::RawCommand, CommandProducerGraphic},
        device::{headless::HeadlessDevice, Device},
        image::{Image, ImageCreateInfo},
        pipeline::{GraphicsPipeline, PipelineLayout},
        queue::CommandQueue,
        render_pass::{FrameBuffer, FrameBufferAttachment},
        Validated, VulkanError,
    };
    use parking_lot::Mutex;
    use std::{any::Any, sync::Arc};

    type Log = Arc<Mutex<Vec<Vec<u32>>>>;

    /// Logs the ids of the group it is asked to draw.
    struct Tagged {
        id: u32,
        info: DrawCommandInfo,
        log: Log,
    }

    impl DrawCommand for Tagged {
        fn info(&self) -> DrawCommandInfo {
            self.info
        }

        fn draw(
            &self,
            _producer: &mut CommandProducerGraphic,
            group: &[&dyn DrawCommand],
        ) -> Result<(), Validated<VulkanError>> {
            let ids = group
                .iter()
                .map(|command| command.as_any().downcast_ref::<Tagged>().unwrap().id)
                .collect();
            self.log.lock().push(ids);

            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn headless_queue() -> (Arc<HeadlessDevice>, Arc<Device>, Arc<CommandQueue>) {
        let headless = Arc::new(HeadlessDevice::new(Default::default()));
        let device = Device::new(headless.clone());
        let queue = CommandQueue::new(device.clone(), Default::default()).unwrap();

        (headless, device, queue)
    }

    fn draw_list(list: &DrawCommandList, order: DrawCommandsOrder) -> usize {
        let (_, _, queue) = headless_queue();
        let mut producer = queue.start_commands(None).unwrap();
        let invocations = list.draw(&mut producer, order).unwrap();
        queue.submit_commands(producer).unwrap();

        invocations
    }

    fn tagged(list: &mut DrawCommandList, log: &Log, id: u32, info: DrawCommandInfo) {
        list.create_command(Tagged {
            id,
            info,
            log: log.clone(),
        });
    }

    #[test]
    fn groups_are_drawn_as_runs() {
        let log = Log::default();
        let mut list = DrawCommandList::new();

        for (id, group_index) in [5, 5, 3, 3, 3, 7].into_iter().enumerate() {
            tagged(
                &mut list,
                &log,
                id as u32,
                DrawCommandInfo {
                    group_index: Some(group_index),
                    ..Default::default()
                },
            );
        }

        assert_eq!(draw_list(&list, DrawCommandsOrder::ByGroupIndex), 3);
        assert_eq!(*log.lock(), [vec![2, 3, 4], vec![0, 1], vec![5]]);
    }

    #[test]
    fn ungrouped_commands_are_drawn_alone() {
        let log = Log::default();
        let mut list = DrawCommandList::new();

        for (id, group_index) in [Some(1), None, Some(1), None].into_iter().enumerate() {
            tagged(
                &mut list,
                &log,
                id as u32,
                DrawCommandInfo {
                    group_index,
                    ..Default::default()
                },
            );
        }

        assert_eq!(draw_list(&list, DrawCommandsOrder::ByGroupIndex), 3);
        assert_eq!(*log.lock(), [vec![1], vec![3], vec![0, 2]]);
    }

    #[test]
    fn layers_are_drawn_in_order() {
        let log = Log::default();
        let mut list = DrawCommandList::new();
        let layers = [2, 0, 1, 2, 0, 1, 0];

        for (id, &layer) in layers.iter().enumerate() {
            tagged(
                &mut list,
                &log,
                id as u32,
                DrawCommandInfo {
                    layer,
                    group_index: Some(id as u32 % 2),
                    distance: (layers.len() - id) as f32,
                },
            );
        }

        for order in [
            DrawCommandsOrder::NearFirst,
            DrawCommandsOrder::FarFirst,
            DrawCommandsOrder::ByGroupIndex,
        ] {
            log.lock().clear();
            draw_list(&list, order);

            let drawn_layers: Vec<u32> = log
                .lock()
                .iter()
                .flatten()
                .map(|&id| layers[id as usize])
                .collect();
            assert_eq!(drawn_layers.len(), layers.len());
            assert!(drawn_layers.windows(2).all(|pair| pair[0] <= pair[1]));
        }
    }

    #[test]
    fn distance_orders() {
        let log = Log::default();
        let mut list = DrawCommandList::new();

        for (id, distance) in [3.0, 1.0, 2.0].into_iter().enumerate() {
            tagged(
                &mut list,
                &log,
                id as u32,
                DrawCommandInfo {
                    distance,
                    ..Default::default()
                },
            );
        }

        draw_list(&list, DrawCommandsOrder::NearFirst);
        assert_eq!(*log.lock(), [vec![1], vec![2], vec![0]]);

        log.lock().clear();
        draw_list(&list, DrawCommandsOrder::FarFirst);
        assert_eq!(*log.lock(), [vec![0], vec![2], vec![1]]);
    }

    #[test]
    fn clear_drops_the_commands() {
        let log = Log::default();
        let mut list = DrawCommandList::new();
        tagged(&mut list, &log, 0, DrawCommandInfo::default());
        assert_eq!(Arc::strong_count(&log), 2);

        list.clear();
        assert!(list.is_empty());
        assert_eq!(list.generation(), 1);
        assert_eq!(Arc::strong_count(&log), 1);
        assert_eq!(draw_list(&list, DrawCommandsOrder::NearFirst), 0);
    }

    struct Mesh {
        id: u32,
        stage: usize,
        position: [f32; 3],
        log: Log,
    }

    impl Drawable for Mesh {
        fn add_to_draw_plan<'a>(&'a self, plan: &mut DrawPlan<'a>, _frame: &FrameContext<'_>) {
            plan.add(self.stage, self);
        }

        fn add_to_command_list(
            &self,
            list: &mut DrawCommandList,
            frame: &FrameContext<'_>,
            _stage_index: usize,
            extra_data: Option<&dyn Any>,
        ) {
            let layer = extra_data
                .and_then(|data| data.downcast_ref::<u32>())
                .copied()
                .unwrap_or(0);

            list.create_command(Tagged {
                id: self.id,
                info: DrawCommandInfo {
                    layer,
                    group_index: None,
                    distance: frame.distance_to(self.position),
                },
                log: self.log.clone(),
            });
        }
    }

    #[test]
    fn fill_from_stage_plan() {
        let log = Log::default();
        let mut registry = StageRegistry::new();
        let opaque = registry.register("opaque");
        let transparent = registry.register("transparent");
        let frame = FrameContext {
            frame_index: 0,
            view_position: [0.0; 3],
            stages: &registry,
        };

        let meshes: Vec<Mesh> = [(opaque, 4.0), (transparent, 1.0), (opaque, 2.0)]
            .into_iter()
            .enumerate()
            .map(|(id, (stage, x))| Mesh {
                id: id as u32,
                stage,
                position: [x, 0.0, 0.0],
                log: log.clone(),
            })
            .collect();
        let plan = DrawPlan::build(
            registry.len(),
            meshes.iter().map(|mesh| mesh as &dyn Drawable),
            &frame,
        );

        let mut list = DrawCommandList::new();
        list.fill_from_stage_plan(&plan, &frame, opaque, Some(&1u32));
        list.fill_from_stage_plan(&plan, &frame, 9, None);
        assert_eq!(list.len(), 2);
        assert!(list.iter().all(|command| command.info().layer == 1));

        draw_list(&list, DrawCommandsOrder::NearFirst);
        assert_eq!(*log.lock(), [vec![2], vec![0]]);
    }

    /// Draws every sprite of its group with one instanced draw.
    struct Sprite {
        pipeline: Arc<GraphicsPipeline>,
        atlas_page: u32,
    }

    impl DrawCommand for Sprite {
        fn info(&self) -> DrawCommandInfo {
            DrawCommandInfo {
                layer: 0,
                group_index: Some(self.atlas_page),
                distance: 0.0,
            }
        }

        fn draw(
            &self,
            producer: &mut CommandProducerGraphic,
            group: &[&dyn DrawCommand],
        ) -> Result<(), Validated<VulkanError>> {
            producer
                .bind_graphics_pipeline(&self.pipeline)
                .draw(4, Some(group.len() as u32));

            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn groups_become_instanced_draws() {
        let (headless, device, queue) = headless_queue();

        // SAFETY: Headless handles are never dereferenced.
        let (color, pipeline) = unsafe {
            let color = Image::from_handle(
                device.clone(),
                headless.next_handle(),
                ImageCreateInfo {
                    format: vk::Format::R8G8B8A8_UNORM,
                    extent: [64, 64, 1],
                    initial_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                    ..Default::default()
                },
            );
            let layout = PipelineLayout::from_handle(device.clone(), headless.next_handle());
            let pipeline =
                GraphicsPipeline::from_handle(device.clone(), headless.next_handle(), layout);

            (color, pipeline)
        };
        let frame_buffer = FrameBuffer::new([64, 64])
            .with_color(FrameBufferAttachment::new(color, headless.next_handle()));

        let mut list = DrawCommandList::new();
        for atlas_page in [0, 1, 0, 0] {
            list.create_command(Sprite {
                pipeline: pipeline.clone(),
                atlas_page,
            });
        }

        let mut producer = queue.start_commands(Some("sprites")).unwrap();
        producer.begin_render_pass(&frame_buffer, None, None).unwrap();
        assert_eq!(
            list.draw(&mut producer, DrawCommandsOrder::ByGroupIndex)
                .unwrap(),
            2,
        );
        producer.end_render_pass();
        queue.submit_commands(producer).unwrap();

        let submission = headless.submissions().pop().unwrap();
        let instance_counts: Vec<u32> = submission
            .commands
            .iter()
            .filter_map(|command| match command {
                RawCommand::Draw { instance_count, .. } => Some(*instance_count),
                _ => None,
            })
            .collect();
        assert_eq!(instance_counts, [3, 1]);
    }
}
