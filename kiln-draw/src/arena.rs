//! Bump allocation for draw commands.
//!
//! Commands are written one after the other into a [`Bump`] arena. Resetting the pool drops the
//! commands and rewinds the arena, keeping its largest chunk, so a list that is refilled every
//! frame stops allocating after the first few frames.

use crate::command::DrawCommand;
use bumpalo::Bump;
use std::{fmt, ptr::NonNull};

/// The number of bytes reserved by a new pool.
pub const INITIAL_CAPACITY: usize = 16 * 1024;

/// Arena storage for [`DrawCommand`]s.
pub struct CommandMemoryPool {
    bump: Bump,
    // In creation order, all pointing into `bump`.
    commands: Vec<NonNull<dyn DrawCommand>>,
    generation: u64,
}

// SAFETY: The pool owns its commands, which are `Send`, and `Bump` is `Send`.
unsafe impl Send for CommandMemoryPool {}
// SAFETY: The commands are `Sync`. The arena is only allocated from through `&mut self`.
unsafe impl Sync for CommandMemoryPool {}

impl CommandMemoryPool {
    #[inline]
    pub fn new() -> Self {
        CommandMemoryPool {
            bump: Bump::with_capacity(INITIAL_CAPACITY),
            commands: Vec::new(),
            generation: 0,
        }
    }

    /// Moves `command` into the arena.
    pub fn alloc<T: DrawCommand>(&mut self, command: T) -> &mut T {
        let ptr = NonNull::from(self.bump.alloc(command));
        self.commands.push(ptr);

        // SAFETY: `ptr` points to the value that was just moved into the arena, which nothing
        // else references. The returned borrow is tied to `self`, and values are only dropped
        // in `reset`, which takes `self` mutably.
        unsafe { &mut *ptr.as_ptr() }
    }

    /// Returns the commands in creation order.
    #[inline]
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &dyn DrawCommand> + '_ {
        self.commands.iter().map(|command| {
            // SAFETY: Every command is alive until `reset`, which takes `self` mutably.
            unsafe { command.as_ref() }
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Returns the number of times the pool has been reset.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns the number of bytes the arena holds, used or not.
    #[inline]
    pub fn allocated_bytes(&self) -> usize {
        self.bump.allocated_bytes()
    }

    /// Drops every command in creation order and rewinds the arena.
    pub fn reset(&mut self) {
        for command in self.commands.drain(..) {
            // SAFETY: The value was moved into the arena in `alloc` and is dropped only once,
            // since its pointer is removed. `Bump` never runs destructors itself.
            unsafe { command.as_ptr().drop_in_place() };
        }

        self.bump.reset();
        self.generation += 1;
    }
}

impl Default for CommandMemoryPool {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CommandMemoryPool {
    fn drop(&mut self) {
        self.reset();
    }
}

impl fmt::Debug for CommandMemoryPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandMemoryPool")
            .field("len", &self.commands.len())
            .field("allocated_bytes", &self.bump.allocated_bytes())
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::{CommandMemoryPool, INITIAL_CAPACITY};
    use crate::command::{DrawCommand, DrawCommandInfo};
    use kiln::{command_buffer::CommandProducerGraphic, Validated, VulkanError};
    use std::{
        any::Any,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };

    struct Counted {
        drops: Arc<AtomicUsize>,
        payload: [u64; 4],
    }

    impl DrawCommand for Counted {
        fn info(&self) -> DrawCommandInfo {
            DrawCommandInfo::default()
        }

        fn draw(
            &self,
            _producer: &mut CommandProducerGraphic,
            _group: &[&dyn DrawCommand],
        ) -> Result<(), Validated<VulkanError>> {
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    impl Drop for Counted {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::Relaxed);
        }
    }

    struct Huge {
        drops: Arc<AtomicUsize>,
        inline: [u8; INITIAL_CAPACITY * 2],
    }

    impl Drop for Huge {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::Relaxed);
        }
    }

    impl DrawCommand for Huge {
        fn info(&self) -> DrawCommandInfo {
            DrawCommandInfo::default()
        }

        fn draw(
            &self,
            _producer: &mut CommandProducerGraphic,
            _group: &[&dyn DrawCommand],
        ) -> Result<(), Validated<VulkanError>> {
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn reset_drops_every_command() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut pool = CommandMemoryPool::new();

        for i in 0..1000 {
            let command = pool.alloc(Counted {
                drops: drops.clone(),
                payload: [i; 4],
            });
            assert_eq!(command.payload[3], i);
        }

        assert_eq!(pool.len(), 1000);
        assert!(pool.allocated_bytes() > INITIAL_CAPACITY);

        pool.reset();
        assert_eq!(drops.load(Ordering::Relaxed), 1000);
        assert!(pool.is_empty());
        assert_eq!(pool.generation(), 1);
    }

    #[test]
    fn memory_is_reused_after_reset() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut pool = CommandMemoryPool::new();

        for _ in 0..3 {
            for _ in 0..500 {
                pool.alloc(Counted {
                    drops: drops.clone(),
                    payload: [0; 4],
                });
            }

            pool.reset();
        }

        let allocated_bytes = pool.allocated_bytes();
        for _ in 0..500 {
            pool.alloc(Counted {
                drops: drops.clone(),
                payload: [0; 4],
            });
        }

        assert_eq!(pool.allocated_bytes(), allocated_bytes);
        drop(pool);
        assert_eq!(drops.load(Ordering::Relaxed), 2000);
    }

    #[test]
    fn commands_larger_than_the_initial_capacity() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut pool = CommandMemoryPool::new();
        let huge = pool.alloc(Huge {
            drops: drops.clone(),
            inline: [2; INITIAL_CAPACITY * 2],
        });

        assert_eq!(huge.inline[INITIAL_CAPACITY], 2);
        assert!(pool.allocated_bytes() >= INITIAL_CAPACITY * 2);

        let first = pool.iter().next().unwrap();
        assert!(first.as_any().downcast_ref::<Huge>().is_some());

        pool.reset();
        assert_eq!(drops.load(Ordering::Relaxed), 1);
    }
}
