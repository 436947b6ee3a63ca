//! Trial deletion over recorded links, and deferred release of links.
//!
//! A set of nodes is garbage when every reference to each of them is a link
//! recorded in the generations of another node of the set (or a link the
//! caller is about to drop). [`Scan`] walks the links from a starting set,
//! counts how many of them point at each node, and compares that with the
//! node's count. A node with more references than links is held from
//! outside; it survives together with everything it reaches. The outgoing
//! links of the remaining nodes are detached and released, which takes each
//! of their counts to zero whatever cycles they form.
//!
//! Released links go through [`defer`], so destroying a long chain does not
//! recurse once per node.
use core::{cell::RefCell, ptr::NonNull};

use ahash::{AHashMap, AHashSet};
use log::{debug, trace};

use crate::{generation::Generations, header::Header};

/// The nodes reachable from a set of links.
pub(crate) struct Scan {
    // In the order they were first reached.
    order: Vec<NonNull<Header>>,
    // Links pointing at each node, starting links included.
    incoming: AHashMap<NonNull<Header>, usize>,
}

/// Outcome of [`Scan::split`].
pub(crate) struct Split {
    /// Outgoing links taken from the garbage nodes. Releasing them destroys
    /// those nodes.
    pub(crate) doomed: Vec<Generations>,
    /// Nodes held from outside, now marked detached.
    pub(crate) survivors: usize,
}

impl Scan {
    /// Walks every node reachable from `links`, following generations.
    ///
    /// Returns `None` if some node's generations are being modified, in
    /// which case no decision can be made.
    ///
    /// Every header passed in must be kept alive by the caller.
    pub(crate) fn from_links(links: impl IntoIterator<Item = NonNull<Header>>) -> Option<Scan> {
        let mut scan = Scan {
            order: Vec::new(),
            incoming: AHashMap::new(),
        };
        let mut pending: Vec<NonNull<Header>> = links.into_iter().collect();
        while let Some(h) = pending.pop() {
            let n = scan.incoming.entry(h).or_insert(0);
            *n += 1;
            if *n > 1 {
                continue;
            }
            scan.order.push(h);
            // Safety: the link we just followed keeps the node alive.
            let header = unsafe { h.as_ref() };
            pending.extend(header.generations().try_borrow().ok()?.headers());
        }
        Some(scan)
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }

    /// Forgets one incoming link of `h`, for a starting node that was not
    /// reached through a real link.
    fn discount(&mut self, h: NonNull<Header>) {
        if let Some(n) = self.incoming.get_mut(&h) {
            *n = n.saturating_sub(1);
        }
    }

    /// Decides which nodes are garbage. Survivors are marked detached; the
    /// garbage nodes lose their outgoing links, which are returned for the
    /// caller to release.
    pub(crate) fn split(self) -> Split {
        let mut live: AHashSet<NonNull<Header>> = AHashSet::new();
        let mut pending: Vec<NonNull<Header>> = self
            .order
            .iter()
            .copied()
            .filter(|h| unsafe { h.as_ref() }.use_count() > self.incoming[h])
            .collect();
        while let Some(h) = pending.pop() {
            if live.insert(h) {
                let header = unsafe { h.as_ref() };
                header.mark_detached();
                pending.extend(header.generations().borrow().headers());
            }
        }

        let doomed = self
            .order
            .iter()
            .filter(|h| !live.contains(*h))
            .map(|h| unsafe { h.as_ref() }.generations().take())
            .collect();
        Split {
            doomed,
            survivors: live.len(),
        }
    }
}

impl Split {
    /// Releases the detached links.
    pub(crate) fn release(self) {
        for generations in self.doomed {
            defer(generations);
        }
    }
}

/// Looks for an unreachable cycle through `start`, a detached node that just
/// lost a reference, and destroys it.
///
/// # Safety
/// `start` must point to a live header. The node may be freed by the time
/// this returns.
pub(crate) unsafe fn collect(start: NonNull<Header>) {
    let header = unsafe { start.as_ref() };
    // Without outgoing links the node cannot be part of a cycle.
    match header.generations().try_borrow() {
        Ok(g) if g.children().next().is_some() => {}
        _ => return,
    }
    let Some(mut scan) = Scan::from_links([start]) else {
        return;
    };
    scan.discount(start);
    let split = scan.split();
    if !split.doomed.is_empty() {
        debug!(
            "collecting {} detached node(s) around `{}`",
            split.doomed.len(),
            header.type_name()
        );
    }
    split.release();
}

#[derive(Default)]
struct Deferred {
    draining: bool,
    queue: Vec<Generations>,
}

thread_local! {
    static DEFERRED: RefCell<Deferred> = RefCell::new(Deferred::default());
}

/// Resets the draining flag even if a payload's destructor panics, so later
/// releases pick up whatever is still queued.
struct Drain;

impl Drop for Drain {
    fn drop(&mut self) {
        let _ = DEFERRED.try_with(|d| d.borrow_mut().draining = false);
    }
}

/// Releases `generations`.
///
/// Releases that happen while another call is already draining are only
/// queued; the outermost call drops them one at a time. Destroying a chain of
/// any length therefore uses a bounded amount of stack.
pub(crate) fn defer(generations: Generations) {
    let mut generations = Some(generations);
    let drainer = DEFERRED.try_with(|d| {
        let mut d = d.borrow_mut();
        if d.draining {
            d.queue.extend(generations.take());
            false
        } else {
            d.draining = true;
            true
        }
    });
    if !matches!(drainer, Ok(true)) {
        // Either queued, or the thread's storage is already gone and the
        // links are dropped in place.
        drop(generations);
        return;
    }

    let _drain = Drain;
    drop(generations);
    let mut drained = 0usize;
    while let Some(next) = DEFERRED.with(|d| d.borrow_mut().queue.pop()) {
        drop(next);
        drained += 1;
    }
    if drained > 0 {
        trace!("released {} deferred generation list(s)", drained);
    }
}
