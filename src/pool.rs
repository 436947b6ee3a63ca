//! Block recycling for node allocations.
//!
//! A [`Pool`] carves fresh blocks out of a `bumpalo` arena and keeps released
//! blocks on free lists keyed by [`Layout`], so a graph that churns through
//! nodes of a few payload types stops hitting the global allocator. Arena
//! memory is returned only when the pool itself goes away, which happens
//! after the last handle and the last pooled node are dropped.
use core::{
    alloc::Layout,
    cell::{Cell, RefCell},
    fmt,
    ptr::NonNull,
};
use std::rc::Rc;

use ahash::AHashMap;
use bumpalo::Bump;
use log::{debug, trace};

/// Arena settings for a [`Pool`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolConfig {
    /// Bytes to reserve up front.
    pub capacity: usize,
    /// Upper bound on the bytes the arena may request from the system.
    /// `None` means unbounded.
    pub allocation_limit: Option<usize>,
}

/// Allocation counters of a [`Pool`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Blocks carved fresh from the arena.
    pub allocated: usize,
    /// Blocks handed out again from a free list.
    pub reused: usize,
    /// Blocks currently backing a live node.
    pub live: usize,
    /// Blocks sitting on free lists.
    pub cached: usize,
}

struct PoolInner {
    arena: Bump,
    free: RefCell<AHashMap<Layout, Vec<NonNull<u8>>>>,
    stats: Cell<PoolStats>,
}

/// Shared handle to a node pool. Cloning is cheap.
#[derive(Clone)]
pub struct Pool {
    inner: Rc<PoolInner>,
}

impl Pool {
    pub fn new() -> Pool {
        Pool::with_config(PoolConfig::default())
    }

    pub fn with_config(config: PoolConfig) -> Pool {
        debug!("creating node pool with {:?}", config);
        let arena = Bump::with_capacity(config.capacity);
        arena.set_allocation_limit(config.allocation_limit);
        Pool {
            inner: Rc::new(PoolInner {
                arena,
                free: RefCell::new(AHashMap::new()),
                stats: Cell::new(PoolStats::default()),
            }),
        }
    }

    pub fn stats(&self) -> PoolStats {
        self.inner.stats.get()
    }

    /// Returns true if both handles refer to the same pool.
    pub fn ptr_eq(a: &Pool, b: &Pool) -> bool {
        Rc::ptr_eq(&a.inner, &b.inner)
    }

    /// Hands out a block for `layout`, preferring a recycled one.
    pub(crate) fn try_alloc(&self, layout: Layout) -> Option<NonNull<u8>> {
        let mut stats = self.stats();
        let recycled = self
            .inner
            .free
            .borrow_mut()
            .get_mut(&layout)
            .and_then(|blocks| blocks.pop());
        let block = match recycled {
            Some(block) => {
                stats.reused += 1;
                stats.cached -= 1;
                block
            }
            None => {
                let block = self.inner.arena.try_alloc_layout(layout).ok()?;
                stats.allocated += 1;
                block
            }
        };
        stats.live += 1;
        self.inner.stats.set(stats);
        Some(block)
    }

    /// Puts a block back on the free list for `layout`.
    ///
    /// # Safety
    /// `block` must have come from `try_alloc` on this pool with the same
    /// layout, and must not be used afterwards.
    pub(crate) unsafe fn recycle(&self, block: NonNull<u8>, layout: Layout) {
        trace!(
            "recycling {} byte block at {:p}",
            layout.size(),
            block.as_ptr()
        );
        self.inner
            .free
            .borrow_mut()
            .entry(layout)
            .or_default()
            .push(block);
        let mut stats = self.stats();
        stats.live -= 1;
        stats.cached += 1;
        self.inner.stats.set(stats);
    }
}

impl Default for Pool {
    fn default() -> Self {
        Pool::new()
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("stats", &self.stats())
            .field("arena_bytes", &self.inner.arena.allocated_bytes())
            .finish()
    }
}
