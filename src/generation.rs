//! Ordered groups of child links, kept by roots and by nodes.
use core::{fmt, ptr::NonNull};

use crate::{error::Error, header::Header, ptr::VoidPtr};

/// An ordered list of generations, each an ordered list of child links.
///
/// Links are type-erased [`VoidPtr`]s; every link holds one reference to its
/// child. Links are never null.
#[derive(Default)]
pub struct Generations {
    lists: Vec<Vec<VoidPtr>>,
}

impl Generations {
    /// Number of generations.
    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    /// Starts a new, empty generation.
    pub fn push(&mut self) {
        self.lists.push(Vec::new());
    }

    /// The `i`th generation, oldest first.
    pub fn get(&self, i: usize) -> Option<&[VoidPtr]> {
        self.lists.get(i).map(Vec::as_slice)
    }

    /// The most recent generation.
    pub fn last(&self) -> Option<&[VoidPtr]> {
        self.lists.last().map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &[VoidPtr]> + '_ {
        self.lists.iter().map(Vec::as_slice)
    }

    /// Every link, generation by generation, in insertion order.
    pub fn children(&self) -> impl DoubleEndedIterator<Item = &VoidPtr> + '_ {
        self.lists.iter().flatten()
    }

    pub(crate) fn attach(&mut self, link: VoidPtr) -> Result<(), Error> {
        debug_assert!(!VoidPtr::is_null(&link));
        self.lists.last_mut().ok_or(Error::NoGeneration)?.push(link);
        Ok(())
    }

    pub(crate) fn headers(&self) -> impl Iterator<Item = NonNull<Header>> + '_ {
        self.children().filter_map(VoidPtr::header_ptr)
    }
}

impl fmt::Debug for Generations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.lists.iter().map(Vec::len))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NodePtr;

    #[test]
    fn test_attach_needs_generation() {
        let mut g = Generations::default();
        let link = NodePtr::erase(NodePtr::new(1));
        assert_eq!(g.attach(link.clone()), Err(Error::NoGeneration));
        g.push();
        g.attach(link).unwrap();
        assert_eq!(g.len(), 1);
        assert_eq!(g.last().unwrap().len(), 1);
    }

    #[test]
    fn test_order() {
        let mut g = Generations::default();
        let nodes: Vec<_> = (0..5).map(NodePtr::new).collect();
        g.push();
        g.attach(NodePtr::erase(nodes[0].clone())).unwrap();
        g.attach(NodePtr::erase(nodes[1].clone())).unwrap();
        g.push();
        g.push();
        g.attach(NodePtr::erase(nodes[2].clone())).unwrap();
        g.attach(NodePtr::erase(nodes[3].clone())).unwrap();

        assert_eq!(format!("{:?}", g), "[2, 0, 2]");
        assert_eq!(g.get(1).map(<[_]>::len), Some(0));
        let seen: Vec<i32> = g
            .children()
            .map(|l| *NodePtr::get(&VoidPtr::downcast::<i32>(l.clone()).unwrap()).unwrap())
            .collect();
        assert_eq!(seen, [0, 1, 2, 3]);
        assert_eq!(g.headers().count(), 4);

        // links hold references
        assert_eq!(NodePtr::use_count(&nodes[3]), 2);
        drop(g);
        assert_eq!(NodePtr::use_count(&nodes[3]), 1);
        assert_eq!(NodePtr::use_count(&nodes[4]), 1);
    }
}
