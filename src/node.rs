//! A node is a [`Header`] and its payload in one allocation.
use core::{alloc::Layout, any::Any, ptr, ptr::NonNull};
use std::alloc;

use log::trace;

use crate::{
    cycle,
    error::Error,
    header::{Header, RootId},
    pool::Pool,
};

#[repr(C)]
pub(crate) struct Node<T> {
    header: Header,
    value: T,
}

/// Allocates a node holding `value`, with a count of one.
///
/// On failure `value` is dropped and nothing else is left behind.
pub(crate) fn try_allocate<T: Any>(
    value: T,
    owner: Option<RootId>,
    pool: Option<&Pool>,
) -> Result<(NonNull<Header>, NonNull<T>), Error> {
    let layout = Layout::new::<Node<T>>();
    let block = match pool {
        Some(pool) => pool.try_alloc(layout),
        // Safety: Node<T> always contains a Header, so the layout is never
        // zero-sized.
        None => NonNull::new(unsafe { alloc::alloc(layout) }),
    };
    let Some(block) = block else {
        return Err(Error::Alloc {
            type_name: core::any::type_name::<T>(),
            layout,
        });
    };

    let node = block.cast::<Node<T>>().as_ptr();
    // Safety: `node` is a fresh block sized and aligned for Node<T>. Fields
    // are only addressed, not read, before they are written.
    unsafe {
        let value_ptr = ptr::addr_of_mut!((*node).value);
        let offset = value_ptr as usize - node as usize;
        ptr::write(
            ptr::addr_of_mut!((*node).header),
            Header::new::<T>(owner, offset, pool.cloned(), destroy::<T>),
        );
        ptr::write(value_ptr, value);
        trace!(
            "allocated `{}` node at {:p} for {:?}",
            core::any::type_name::<T>(),
            node,
            owner
        );
        Ok((
            NonNull::new_unchecked(ptr::addr_of_mut!((*node).header)),
            NonNull::new_unchecked(value_ptr),
        ))
    }
}

/// Like [`try_allocate`], but exhaustion is fatal.
pub(crate) fn allocate<T: Any>(
    value: T,
    owner: Option<RootId>,
    pool: Option<&Pool>,
) -> (NonNull<Header>, NonNull<T>) {
    match try_allocate(value, owner, pool) {
        Ok(parts) => parts,
        Err(Error::Alloc { layout, .. }) => alloc::handle_alloc_error(layout),
        Err(e) => unreachable!("allocation failed with {e}"),
    }
}

/// Destroys the payload and frees the block. Installed in every header as its
/// type-erased destructor.
///
/// The node's own generations are detached before the payload is dropped and
/// released after the block is freed, so children never observe a half
/// destroyed parent. They are released through [`cycle::defer`], so a chain
/// of nodes is destroyed iteratively.
unsafe fn destroy<T>(header: NonNull<Header>) {
    let node = header.cast::<Node<T>>().as_ptr();
    unsafe {
        trace!(
            "destroying `{}` node at {:p}",
            (*node).header.type_name(),
            node
        );
        let generations = (*node).header.generations().take();
        let pool = (*node).header.pool().cloned();
        ptr::drop_in_place(ptr::addr_of_mut!((*node).header));
        ptr::drop_in_place(ptr::addr_of_mut!((*node).value));

        let layout = Layout::new::<Node<T>>();
        match pool {
            Some(pool) => pool.recycle(NonNull::new_unchecked(node.cast()), layout),
            None => alloc::dealloc(node.cast(), layout),
        }
        cycle::defer(generations);
    }
}
