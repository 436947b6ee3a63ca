/*!
This crate provides reference-counted node pointers whose graphs are owned by a
single [`Root`]. Nodes may point at siblings and ancestors, forming cycles that
plain `Rc` would leak, and the root still tears every one of them down when it
is reset or dropped.

```rust
    use rootptr::{NodePtr, Root};

    let mut root = Root::new();
    let a = root.allocate("a");
    let b = root.allocate("b");

    // a -> b -> a
    NodePtr::add_generation(&a);
    NodePtr::attach(&a, &b).unwrap();
    NodePtr::add_generation(&b);
    NodePtr::attach(&b, &a).unwrap();
    root.set_entry(a).unwrap();

    let found = root.search(|s: &&str| *s == "b");
    assert!(NodePtr::ptr_eq(&found, &b));
    drop((found, b));

    // both nodes are destroyed here, cycle or not
    drop(root);
```

# Handles

Every node is one allocation: a [`Header`] (the control block: count, payload
type, child generations) followed by the payload. All handles are [`Ptr<T, K>`],
which carries a pointer to the header next to the element pointer, so the
header never has to be recovered from the element's address. That lets a
handle point at a field of the payload, or at a `&dyn Trait` view of it, and
still share the node's count:

```rust
    use rootptr::NodePtr;
    use std::fmt::Debug;

    let pair = NodePtr::new((1, String::from("two")));
    let second: NodePtr<String> = NodePtr::project(pair.clone(), |p| &p.1);
    let shown = NodePtr::project(pair.clone(), |p| p as &dyn Debug);

    assert_eq!(*second, "two");
    assert_eq!(format!("{:?}", &*shown), r#"(1, "two")"#);
    assert_eq!(NodePtr::use_count(&pair), 3);
```

The kind parameter `K` selects what a handle can do with the payload:

- [`NodePtr<T>`] (`K` = [`Scalar`]) dereferences to `T`.
- [`ArrayPtr<[E; N]>`][ArrayPtr] (`K` = [`Array`]) indexes into the elements.
- [`VoidPtr`] (`K` = [`Opaque`]) only counts. [`VoidPtr::downcast`] recovers a
  typed handle when the payload type matches exactly.

```rust
    use rootptr::{ArrayPtr, NodePtr, VoidPtr};

    let a: ArrayPtr<[u32; 3]> = ArrayPtr::new([1, 2, 3]);
    assert_eq!(a[1], 2);

    let v: VoidPtr = ArrayPtr::erase(a.clone());
    assert_eq!(VoidPtr::use_count(&v), 2);
    let back = VoidPtr::downcast::<[u32; 3]>(v).unwrap();
    assert_eq!(back[2], 3);
```

Most operations are associated functions (`NodePtr::use_count(&p)`, not
`p.use_count()`), as with `std::rc::Rc`, so they cannot shadow methods of the
payload.

# Roots

A [`Root`] owns an entry node plus an ordered list of *generations*, each an
ordered list of child links. Nodes carry generations of their own. A root
reaches every node linked from its entry node or its generations, transitively.

When a root is reset or dropped it compares, for every node it reaches, the
node's count with the number of links pointing at it from inside the
subgraph. Nodes referenced only from inside are destroyed, whatever cycles
they form. Nodes that something outside still holds survive, together with
everything they reach:

```rust
    use rootptr::{NodePtr, Root};

    let mut root = Root::new();
    let old = root.allocate(String::from("old"));
    root.set_entry(old.clone()).unwrap();

    // replacing the entry tears down the old subgraph, but `old` is still
    // held here, so it stays alive
    root.set_entry(root.allocate(String::from("new"))).unwrap();
    assert_eq!(NodePtr::use_count(&old), 1);
    assert_eq!(**root.entry(), "new");
```

Survivors are marked detached and checked again each time they lose a
reference, so a cycle among them is destroyed when the last outside handle
goes away.

Links only count when they are recorded with `attach`. A handle kept in an
ordinary field of a payload is an outside reference as far as the root is
concerned.

# Allocation

Nodes come from the global allocator, or from a [`Pool`] that recycles
blocks per layout. Allocation failure is fatal for `new`/`allocate`; the
`try_` variants report it as [`Error::Alloc`] instead.

```rust
    use rootptr::{NodePtr, Pool, Root};

    let pool = Pool::new();
    let mut root = Root::with_pool(pool.clone());
    root.set_entry(root.allocate(1u64)).unwrap();
    drop(root);

    let again = NodePtr::new_in(2u64, &pool);
    assert_eq!(pool.stats().reused, 1);
    assert_eq!(*again, 2);
```

# Threads

Counts are plain `Cell`s. Handles, roots and pools are neither `Send` nor
`Sync`; a graph lives on the thread that built it.
*/

mod cycle;
pub mod error;
pub mod generation;
pub mod header;
mod node;
pub mod pool;
pub mod ptr;
pub mod root;

pub use self::error::Error;
pub use self::generation::Generations;
pub use self::header::{Header, RootId};
pub use self::pool::{Pool, PoolConfig, PoolStats};
pub use self::ptr::{Array, ArrayPtr, Kind, NodePtr, Opaque, Ptr, Readable, Scalar, VoidPtr};
pub use self::root::Root;
