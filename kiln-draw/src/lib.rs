//! Sorted, batched draw-command lists for kiln render stages.
//!
//! Render stages collect the [`DrawCommand`]s of a frame into a [`DrawCommandList`], usually by
//! way of a [`DrawPlan`] that the drawables of the scene fill in. The list is then drawn into a
//! [`CommandProducerGraphic`](kiln::command_buffer::CommandProducerGraphic) inside a render
//! pass:
//!
//! - Commands are drawn layer by layer. Within a layer, they are sorted by distance to the
//!   viewer or by group index, depending on the [`DrawCommandsOrder`].
//! - Consecutive commands with the same group index are drawn by one call, which receives all of
//!   them and can draw them instanced.
//!
//! Image accesses of the draws go through the access watcher of the producer like any other
//! command, so the list never records barriers itself.

pub mod arena;
mod command;
mod list;
mod plan;

pub use self::{
    command::{DrawCommand, DrawCommandInfo, DrawCommandsOrder},
    list::DrawCommandList,
    plan::{DrawPlan, Drawable, FrameContext, StageRegistry},
};
