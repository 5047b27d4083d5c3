use kiln::{command_buffer::CommandProducerGraphic, Validated, VulkanError};
use std::{any::Any, cmp::Ordering};

/// An object that records draw calls for one thing on screen.
///
/// Commands are created into a [`DrawCommandList`](crate::DrawCommandList) and drawn in the
/// order chosen when the list is drawn. Consecutive commands sharing a group index are drawn
/// together: only the first of them is called, with the whole run as `group`, so it can draw
/// all of them at once, for example with instancing.
pub trait DrawCommand: Send + Sync + 'static {
    /// Returns the sort keys of the command.
    fn info(&self) -> DrawCommandInfo;

    /// Records the draw calls of `group` into `producer`.
    ///
    /// `group` starts with `self`, and holds more than one command only if `self` has a group
    /// index.
    fn draw(
        &self,
        producer: &mut CommandProducerGraphic,
        group: &[&dyn DrawCommand],
    ) -> Result<(), Validated<VulkanError>>;

    /// Gives access to the concrete type of a command, to read siblings of a group.
    fn as_any(&self) -> &dyn Any;
}

/// The sort keys of a [`DrawCommand`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DrawCommandInfo {
    /// Commands of a lower layer are drawn before those of a higher layer, whatever the order.
    pub layer: u32,

    /// Consecutive commands with the same group index are drawn together. `None` is never
    /// merged with its neighbors.
    pub group_index: Option<u32>,

    /// The distance from the viewer, for [`NearFirst`] and [`FarFirst`].
    ///
    /// [`NearFirst`]: DrawCommandsOrder::NearFirst
    /// [`FarFirst`]: DrawCommandsOrder::FarFirst
    pub distance: f32,
}

impl DrawCommandInfo {
    /// Returns `true` if a command with these keys can be drawn as part of the same group as a
    /// command with `other`.
    #[inline]
    pub fn joins_group(&self, other: &DrawCommandInfo) -> bool {
        self.group_index.is_some()
            && self.group_index == other.group_index
            && self.layer == other.layer
    }
}

/// The order commands of one layer are drawn in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DrawCommandsOrder {
    /// Ascending distance, for opaque geometry.
    #[default]
    NearFirst,

    /// Descending distance, for blended geometry.
    FarFirst,

    /// Ascending group index, so that commands of a group end up next to each other. Commands
    /// without a group come first.
    ByGroupIndex,
}

impl DrawCommandsOrder {
    /// Compares two commands. Ties are left to the stable sort, which keeps creation order.
    pub(crate) fn compare(self, a: &DrawCommandInfo, b: &DrawCommandInfo) -> Ordering {
        a.layer.cmp(&b.layer).then_with(|| match self {
            DrawCommandsOrder::NearFirst => a.distance.total_cmp(&b.distance),
            DrawCommandsOrder::FarFirst => b.distance.total_cmp(&a.distance),
            DrawCommandsOrder::ByGroupIndex => a.group_index.cmp(&b.group_index),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{DrawCommandInfo, DrawCommandsOrder};
    use std::cmp::Ordering;

    fn info(layer: u32, group_index: Option<u32>, distance: f32) -> DrawCommandInfo {
        DrawCommandInfo {
            layer,
            group_index,
            distance,
        }
    }

    #[test]
    fn layer_dominates_every_order() {
        let low = info(0, Some(9), 100.0);
        let high = info(1, Some(0), 0.0);

        for order in [
            DrawCommandsOrder::NearFirst,
            DrawCommandsOrder::FarFirst,
            DrawCommandsOrder::ByGroupIndex,
        ] {
            assert_eq!(order.compare(&low, &high), Ordering::Less);
        }
    }

    #[test]
    fn ungrouped_commands_never_join() {
        assert!(!info(0, None, 0.0).joins_group(&info(0, None, 0.0)));
        assert!(!info(0, Some(1), 0.0).joins_group(&info(1, Some(1), 0.0)));
        assert!(info(0, Some(1), 0.0).joins_group(&info(0, Some(1), 5.0)));
    }
}
