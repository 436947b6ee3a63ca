//! `Root<T>` owns an entry node and everything reachable from it through
//! recorded generations.
//!
//! Nodes are still reference counted, so handles to them can be copied around
//! freely and outlive the root. What the root adds is a teardown that does not
//! depend on counts reaching zero by themselves: when the root is reset or
//! dropped it walks its subgraph, works out which nodes are referenced only
//! through the subgraph's own links, and destroys exactly those, cycles
//! included. Nodes with a handle anywhere else survive, along with everything
//! they reach. Survivors are marked detached: whenever one of them loses a
//! reference the same check runs again from it, so a cycle among survivors
//! is destroyed once the last outside handle is gone.
//!
//! Only links recorded with `attach` are visible to the walk. A handle stored
//! inside a payload counts as an outside reference, so a cycle closed through
//! payload fields is not collected.
use core::{any::Any, fmt, mem, ptr::NonNull};

use ahash::AHashSet;
use log::{debug, trace};

use crate::{
    cycle,
    error::Error,
    generation::Generations,
    header::{Header, RootId},
    node,
    pool::Pool,
    ptr::{Kind, NodePtr, Ptr, VoidPtr},
};

/// The single owner of a graph of nodes.
pub struct Root<T: ?Sized> {
    id: RootId,
    entry: NodePtr<T>,
    generations: Generations,
    pool: Option<Pool>,
}

impl<T: ?Sized> Root<T> {
    /// An empty root: no entry node, no generations.
    pub fn new() -> Self {
        Root {
            id: RootId::next(),
            entry: NodePtr::null(),
            generations: Generations::default(),
            pool: None,
        }
    }

    /// An empty root whose nodes are drawn from `pool`.
    pub fn with_pool(pool: Pool) -> Self {
        let mut root = Root::new();
        root.pool = Some(pool);
        root
    }

    pub fn id(&self) -> RootId {
        self.id
    }

    pub fn pool(&self) -> Option<&Pool> {
        self.pool.as_ref()
    }

    /// Allocates a node belonging to this root.
    ///
    /// The node is not reachable from the root until it is made the entry
    /// node or attached somewhere below it.
    pub fn allocate<U: Any>(&self, value: U) -> NodePtr<U> {
        let (header, ptr) = node::allocate(value, Some(self.id), self.pool.as_ref());
        // Safety: a fresh node starts with the one reference we adopt here.
        unsafe { NodePtr::from_raw_parts(header, ptr) }
    }

    /// Like [`allocate`][Root::allocate], reporting exhaustion as
    /// [`Error::Alloc`].
    pub fn try_allocate<U: Any>(&self, value: U) -> Result<NodePtr<U>, Error> {
        let (header, ptr) = node::try_allocate(value, Some(self.id), self.pool.as_ref())?;
        Ok(unsafe { NodePtr::from_raw_parts(header, ptr) })
    }

    pub fn entry(&self) -> &NodePtr<T> {
        &self.entry
    }

    /// Replaces the entry node, tearing down the previous subgraph (entry and
    /// generations) first. A null `entry` leaves the root empty.
    ///
    /// The new entry survives the teardown even if it was reachable from the
    /// old subgraph.
    pub fn set_entry(&mut self, entry: NodePtr<T>) -> Result<(), Error> {
        if let Some(h) = NodePtr::header(&entry) {
            if h.owner() != Some(self.id) {
                return Err(Error::ForeignRoot {
                    type_name: h.type_name(),
                    expected: Some(self.id),
                    found: h.owner(),
                });
            }
        }
        let old = mem::replace(&mut self.entry, entry);
        let generations = mem::take(&mut self.generations);
        sweep(self.id, NodePtr::erase(old), generations);
        Ok(())
    }

    /// Starts a new, empty generation of children directly under the root.
    pub fn add_generation(&mut self) {
        self.generations.push();
    }

    /// Records `child` in the root's most recent generation.
    pub fn attach<U: ?Sized, K: Kind>(&mut self, child: &Ptr<U, K>) -> Result<(), Error> {
        let link = Ptr::link(child, Some(self.id))?;
        self.generations.attach(link)
    }

    pub fn generations(&self) -> &Generations {
        &self.generations
    }

    /// Finds the first node whose payload is a `U` accepted by `pred`, and
    /// returns a new handle to it (null if there is none).
    ///
    /// Nodes are visited depth first in pre-order: the entry node, then its
    /// own generations, then the root's generations. Generations are walked
    /// oldest first and children in the order they were attached. Each node
    /// is visited once, so cycles terminate. Nodes of other payload types are
    /// walked through but never offered to `pred`.
    pub fn search<U: Any, F: FnMut(&U) -> bool>(&self, mut pred: F) -> NodePtr<U> {
        let mut visited: AHashSet<NonNull<Header>> = AHashSet::new();
        // Links are cloned onto the stack so no generation stays borrowed
        // while `pred` runs.
        let mut stack: Vec<VoidPtr> = self.generations.children().rev().cloned().collect();
        if !NodePtr::is_null(&self.entry) {
            stack.push(NodePtr::erase(self.entry.clone()));
        }

        while let Some(link) = stack.pop() {
            let Some(h) = VoidPtr::header_ptr(&link) else {
                continue;
            };
            if !visited.insert(h) {
                continue;
            }
            // Safety: `link` keeps the node alive.
            let header = unsafe { h.as_ref() };
            // Safety: as above.
            if let Some(value) = unsafe { Header::downcast_ref::<U>(h) } {
                if pred(value) {
                    trace!("{}: search matched a `{}` node", self.id, header.type_name());
                    return NodePtr::from_header(h).unwrap_or_default();
                }
            }
            let children = header.generations().borrow();
            stack.extend(children.children().rev().cloned());
        }
        NodePtr::null()
    }

    /// Number of distinct nodes reachable from the root.
    pub fn len(&self) -> usize {
        let mut seen: AHashSet<NonNull<Header>> = AHashSet::new();
        let mut pending: Vec<NonNull<Header>> = NodePtr::header_ptr(&self.entry)
            .into_iter()
            .chain(self.generations.headers())
            .collect();
        while let Some(h) = pending.pop() {
            if seen.insert(h) {
                // Safety: reachable nodes are kept alive by the root's links.
                let header = unsafe { h.as_ref() };
                pending.extend(header.generations().borrow().headers());
            }
        }
        seen.len()
    }

    pub fn is_empty(&self) -> bool {
        NodePtr::is_null(&self.entry) && self.generations.children().next().is_none()
    }

    /// Tears down the owned subgraph, leaving the root empty.
    pub fn reset(&mut self) {
        let entry = NodePtr::erase(mem::take(&mut self.entry));
        let generations = mem::take(&mut self.generations);
        sweep(self.id, entry, generations);
    }
}

/// Destroys every node reachable from `entry` and `generations` that nothing
/// outside the subgraph refers to.
///
/// A node whose count equals the number of links pointing at it from inside
/// the subgraph (plus the root's own links) is garbage once the root lets go,
/// whatever cycles it sits in. Anything with a larger count is held from
/// outside, and keeps alive everything it reaches. Those survivors are
/// marked detached, so a cycle among them is still collected once the last
/// outside handle goes away.
fn sweep(id: RootId, entry: VoidPtr, generations: Generations) {
    let links = VoidPtr::header_ptr(&entry)
        .into_iter()
        .chain(generations.headers());
    let split = match cycle::Scan::from_links(links) {
        Some(scan) if scan.len() > 0 => {
            let reached = scan.len();
            let split = scan.split();
            debug!(
                "{}: tearing down {} of {} node(s), {} still referenced",
                id,
                split.doomed.len(),
                reached,
                split.survivors
            );
            Some(split)
        }
        Some(_) => None,
        None => {
            debug!("{}: generations busy, releasing links without a scan", id);
            None
        }
    };
    drop(entry);
    cycle::defer(generations);
    if let Some(split) = split {
        split.release();
    }
}

impl<T: ?Sized> Drop for Root<T> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T: ?Sized> Default for Root<T> {
    fn default() -> Self {
        Root::new()
    }
}

impl<T: ?Sized> fmt::Debug for Root<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Root")
            .field("id", &self.id)
            .field("entry", &self.entry)
            .field("generations", &self.generations)
            .finish()
    }
}
