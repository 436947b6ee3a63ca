//! The control block placed in front of every node's payload.
//!
//! A handle never recovers its [`Header`] from the payload address. Every
//! handle carries the header pointer next to the element pointer, so a
//! pointer can be projected to a subobject or a trait-object view and still
//! share the node's count. The element pointer may therefore be anything
//! inside the payload; [`resolve`] checks that it is.
use core::{
    any::{Any, TypeId},
    cell::{Cell, RefCell},
    fmt,
    ptr::NonNull,
    sync::atomic::{AtomicU64, Ordering::Relaxed},
};

use crate::{cycle, generation::Generations, pool::Pool};

/// Identity of a [`Root`][crate::Root]. Ids are never reused within a process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RootId(u64);

impl RootId {
    pub(crate) fn next() -> RootId {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        RootId(NEXT.fetch_add(1, Relaxed))
    }
}

impl fmt::Display for RootId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "root #{}", self.0)
    }
}

/// Per-node metadata: the reference count, the payload's identity, and the
/// node's own child generations.
pub struct Header {
    count: Cell<usize>,
    owner: Option<RootId>,
    type_id: TypeId,
    type_name: &'static str,
    // Byte offset of the payload from the start of the header, and its size.
    offset: usize,
    size: usize,
    generations: RefCell<Generations>,
    // Set once the node outlives a teardown of its root.
    detached: Cell<bool>,
    pool: Option<Pool>,
    destroy: unsafe fn(NonNull<Header>),
}

impl Header {
    pub(crate) fn new<T: Any>(
        owner: Option<RootId>,
        offset: usize,
        pool: Option<Pool>,
        destroy: unsafe fn(NonNull<Header>),
    ) -> Header {
        Header {
            count: Cell::new(1),
            owner,
            type_id: TypeId::of::<T>(),
            type_name: core::any::type_name::<T>(),
            offset,
            size: core::mem::size_of::<T>(),
            generations: RefCell::new(Generations::default()),
            detached: Cell::new(false),
            pool,
            destroy,
        }
    }

    /// Number of live handles (including generation links) referencing this
    /// node.
    pub fn use_count(&self) -> usize {
        self.count.get()
    }

    /// The root this node was allocated for, if any.
    pub fn owner(&self) -> Option<RootId> {
        self.owner
    }

    /// Name of the payload type the node was allocated with.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns true if the payload was allocated as a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    /// Returns true if the node survived a teardown of its root because
    /// something outside still referenced it. Such a node is checked for
    /// unreachable cycles whenever it loses a reference.
    pub fn is_detached(&self) -> bool {
        self.detached.get()
    }

    pub(crate) fn mark_detached(&self) {
        self.detached.set(true);
    }

    /// Returns the payload of the node behind `this` if it was allocated as
    /// exactly a `T`.
    ///
    /// # Safety
    /// `this` must point to a live header, and the node must stay alive for
    /// `'a`.
    pub(crate) unsafe fn downcast_ref<'a, T: Any>(this: NonNull<Header>) -> Option<&'a T> {
        if unsafe { this.as_ref() }.is::<T>() {
            // Safety: the type ids match, and the caller keeps the node alive.
            Some(unsafe { Header::value(this).cast::<T>().as_ref() })
        } else {
            None
        }
    }

    /// Returns true if `ptr` points into this node's payload.
    ///
    /// The one-past-the-end address is accepted so that zero-sized
    /// subobjects at the tail still resolve.
    pub fn contains<U: ?Sized>(&self, ptr: *const U) -> bool {
        // Only addresses are compared here; nothing is dereferenced.
        let start = self as *const Header as usize + self.offset;
        let addr = ptr as *const u8 as usize;
        addr >= start && addr <= start + self.size
    }

    /// The start of the payload of the node behind `this`.
    ///
    /// Derived from the node pointer itself, not from a `&Header`, so the
    /// result may be used to reach the payload.
    pub(crate) fn value(this: NonNull<Header>) -> NonNull<u8> {
        // Safety: `this` points to a live header; the payload sits `offset`
        // bytes past it inside the same allocation.
        unsafe {
            let offset = this.as_ref().offset;
            NonNull::new_unchecked(this.as_ptr().cast::<u8>().add(offset))
        }
    }

    pub(crate) fn generations(&self) -> &RefCell<Generations> {
        &self.generations
    }

    pub(crate) fn pool(&self) -> Option<&Pool> {
        self.pool.as_ref()
    }

    pub(crate) fn add_ref(&self) {
        let n = self.count.get();
        if n == usize::MAX {
            // Same policy as std::rc::Rc: an overflowing count means handles
            // were leaked on a massive scale, and wrapping would be unsound.
            std::process::abort();
        }
        self.count.set(n + 1);
    }

    /// Drops one reference, destroying the node when it was the last.
    ///
    /// A detached node that keeps other references may have just become an
    /// unreachable cycle, so it is handed to [`cycle::collect`].
    ///
    /// # Safety
    /// `this` must point to a live header, and the caller must own one of its
    /// references. The node may be freed by the time this returns.
    pub(crate) unsafe fn release(this: NonNull<Header>) {
        let h = unsafe { this.as_ref() };
        let n = h.count.get();
        debug_assert!(n > 0, "released a node that was already destroyed");
        h.count.set(n - 1);
        if n == 1 {
            let destroy = h.destroy;
            unsafe { destroy(this) };
        } else if h.detached.get() {
            unsafe { cycle::collect(this) };
        }
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Header")
            .field("type", &self.type_name)
            .field("use_count", &self.count.get())
            .field("owner", &self.owner)
            .finish()
    }
}

/// Recovers the control block of an element pointer.
///
/// Panics if `ptr` does not lie within the payload of `header`: a handle that
/// gets here with an unrelated pointer has already broken an ownership
/// invariant, and continuing would corrupt the count of some other node.
pub(crate) fn resolve<'h, U: ?Sized>(header: NonNull<Header>, ptr: NonNull<U>) -> &'h Header {
    // Safety: callers pass the header of a node they hold a reference to.
    let h = unsafe { header.as_ref() };
    assert!(
        h.contains(ptr.as_ptr()),
        "element pointer {:p} is not inside the payload of its `{}` node",
        ptr.as_ptr() as *const u8,
        h.type_name
    );
    h
}
