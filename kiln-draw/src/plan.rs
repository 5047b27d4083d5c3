//! Per-frame planning of what each render stage draws.
//!
//! Every frame, the drawables of the scene add themselves to a [`DrawPlan`], under the stages
//! they take part in. Each stage then fills its [`DrawCommandList`] from its part of the plan
//! with [`DrawCommandList::fill_from_stage_plan`].

use crate::DrawCommandList;
use foldhash::HashMap;
use std::{any::Any, fmt};

/// Something that can be drawn by render stages.
pub trait Drawable: Send + Sync {
    /// Adds `self` to the stages of `plan` it is drawn in.
    fn add_to_draw_plan<'a>(&'a self, plan: &mut DrawPlan<'a>, frame: &FrameContext<'_>);

    /// Creates the commands that draw `self` in stage `stage_index`.
    ///
    /// `extra_data` is whatever the stage passed to
    /// [`fill_from_stage_plan`](DrawCommandList::fill_from_stage_plan).
    fn add_to_command_list(
        &self,
        list: &mut DrawCommandList,
        frame: &FrameContext<'_>,
        stage_index: usize,
        extra_data: Option<&dyn Any>,
    );
}

/// The drawables of each stage for one frame.
pub struct DrawPlan<'a> {
    stages: Vec<Vec<&'a dyn Drawable>>,
}

impl<'a> DrawPlan<'a> {
    /// Creates an empty plan with `stage_count` stages.
    #[inline]
    pub fn new(stage_count: usize) -> Self {
        DrawPlan {
            stages: vec![Vec::new(); stage_count],
        }
    }

    /// Creates an empty plan with one stage per name in `registry`.
    #[inline]
    pub fn for_registry(registry: &StageRegistry) -> Self {
        Self::new(registry.len())
    }

    #[inline]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Adds `drawable` to stage `stage_index`. Out-of-range stages are skipped with a warning.
    pub fn add(&mut self, stage_index: usize, drawable: &'a dyn Drawable) {
        match self.stages.get_mut(stage_index) {
            Some(stage) => stage.push(drawable),
            None => tracing::warn!(
                stage_index,
                stage_count = self.stages.len(),
                "drawable added to a stage the draw plan doesn't have",
            ),
        }
    }

    /// Returns the drawables of stage `stage_index`, or nothing if there is no such stage.
    #[inline]
    pub fn stage(&self, stage_index: usize) -> &[&'a dyn Drawable] {
        match self.stages.get(stage_index) {
            Some(stage) => stage,
            None => &[],
        }
    }

    /// Empties every stage, keeping the stage count.
    #[inline]
    pub fn clear(&mut self) {
        self.stages.iter_mut().for_each(Vec::clear);
    }

    /// Builds the plan of a frame from `drawables`.
    pub fn build(
        stage_count: usize,
        drawables: impl IntoIterator<Item = &'a dyn Drawable>,
        frame: &FrameContext<'_>,
    ) -> Self {
        let mut plan = Self::new(stage_count);

        for drawable in drawables {
            drawable.add_to_draw_plan(&mut plan, frame);
        }

        plan
    }
}

impl fmt::Debug for DrawPlan<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.stages.iter().map(Vec::len))
            .finish()
    }
}

/// What drawables need to know about the frame being drawn.
#[derive(Clone, Copy, Debug)]
pub struct FrameContext<'a> {
    /// Increases by one every frame.
    pub frame_index: u64,

    /// The position of the viewer in world space.
    pub view_position: [f32; 3],

    /// The names of the render stages.
    pub stages: &'a StageRegistry,
}

impl FrameContext<'_> {
    /// Returns the distance between the viewer and `position`, to sort commands by.
    #[inline]
    pub fn distance_to(&self, position: [f32; 3]) -> f32 {
        let [x, y, z] = position;
        let [vx, vy, vz] = self.view_position;

        ((x - vx).powi(2) + (y - vy).powi(2) + (z - vz).powi(2)).sqrt()
    }
}

/// Maps render stage names to indices.
///
/// A registry is owned by whatever runs the render loop and passed to the drawables through the
/// [`FrameContext`].
#[derive(Clone, Debug, Default)]
pub struct StageRegistry {
    names: Vec<String>,
    indices: HashMap<String, usize>,
}

impl StageRegistry {
    #[inline]
    pub fn new() -> Self {
        StageRegistry {
            names: Vec::new(),
            indices: HashMap::default(),
        }
    }

    /// Returns the index of stage `name`, registering it if it is new.
    pub fn register(&mut self, name: &str) -> usize {
        if let Some(&index) = self.indices.get(name) {
            return index;
        }

        let index = self.names.len();
        self.names.push(name.to_owned());
        self.indices.insert(name.to_owned(), index);
        tracing::debug!(name, index, "registered render stage");

        index
    }

    /// Returns the index of stage `name`, if it is registered.
    #[inline]
    pub fn get(&self, name: &str) -> Option<usize> {
        self.indices.get(name).copied()
    }

    /// Returns the index of stage `name`, or `0` with a warning if it isn't registered.
    pub fn index_or_default(&self, name: &str) -> usize {
        self.get(name).unwrap_or_else(|| {
            tracing::warn!(name, "unknown render stage, falling back to stage 0");

            0
        })
    }

    /// Returns the name of stage `index`.
    #[inline]
    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
