use core::alloc::Layout;

use thiserror::Error;

use crate::header::RootId;

/// Recoverable failures of the allocation and wiring entry points.
///
/// Contract violations (dereferencing a null handle, indexing past the end of
/// an array node, `use_count` on a null handle) are not represented here; they
/// panic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The allocator could not provide a block for a node.
    #[error(
        "failed to allocate {} bytes (align {}) for a node of type `{type_name}`",
        layout.size(),
        layout.align()
    )]
    Alloc {
        type_name: &'static str,
        layout: Layout,
    },

    /// A null handle was given where a node is required.
    #[error("expected a node, found a null handle")]
    Null,

    /// Parent and child do not belong to the same root.
    #[error(
        "node of type `{type_name}` belongs to {}, expected {}",
        describe(found),
        describe(expected)
    )]
    ForeignRoot {
        type_name: &'static str,
        expected: Option<RootId>,
        found: Option<RootId>,
    },

    /// `attach` was called before any generation was added.
    #[error("no generation to attach to; call add_generation first")]
    NoGeneration,
}

fn describe(owner: &Option<RootId>) -> String {
    match owner {
        Some(id) => id.to_string(),
        None => "no root".into(),
    }
}
