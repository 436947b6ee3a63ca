//! `Ptr<T, K>` is the counted handle shared by every flavour of node pointer.
//!
//! The kind parameter `K` picks the capabilities of the handle:
//!
//! - [`Scalar`] ([`NodePtr<T>`]) dereferences to the payload.
//! - [`Array`] ([`ArrayPtr<[E; N]>`][ArrayPtr]) indexes into the payload's
//!   elements instead.
//! - [`Opaque`] ([`VoidPtr`]) cannot reach the payload at all, but still
//!   counts, copies and resets like the others. Generations store their links
//!   as `VoidPtr`s.
//!
//! Everything else (counting, reset, projection, wiring children) is shared.
//! Like `std::rc::Rc`, most operations are associated functions, written
//! `Ptr::use_count(&p)` rather than `p.use_count()`, so they never hide
//! methods of the payload reached through `Deref`.
use core::{
    any::Any,
    cell::Ref,
    fmt,
    hash::{Hash, Hasher},
    marker::PhantomData,
    mem,
    ops::{Deref, Index},
    ptr::NonNull,
};

use crate::{
    error::Error,
    generation::Generations,
    header::{self, Header, RootId},
    node,
    pool::Pool,
};

/// Capability marker for [`Ptr`]. Sealed; the only kinds are [`Scalar`],
/// [`Array`] and [`Opaque`].
pub trait Kind: private::Sealed + 'static {}

/// Kinds whose handles may hand out references to the payload.
pub trait Readable: Kind {}

/// Dereferences to the payload.
pub enum Scalar {}
/// Indexes into the elements of an array or slice payload.
pub enum Array {}
/// Counts only; never touches the payload.
pub enum Opaque {}

impl private::Sealed for Scalar {}
impl private::Sealed for Array {}
impl private::Sealed for Opaque {}
impl Kind for Scalar {}
impl Kind for Array {}
impl Kind for Opaque {}
impl Readable for Scalar {}
impl Readable for Array {}

pub type NodePtr<T> = Ptr<T, Scalar>;
pub type ArrayPtr<T> = Ptr<T, Array>;
pub type VoidPtr = Ptr<(), Opaque>;

struct Raw<T: ?Sized> {
    header: NonNull<Header>,
    ptr: NonNull<T>,
}

impl<T: ?Sized> Clone for Raw<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> Copy for Raw<T> {}

impl<T: ?Sized> Raw<T> {
    fn addr(&self) -> usize {
        self.ptr.cast::<u8>().as_ptr() as usize
    }
}

/// A counted handle to (part of) a node's payload, or null.
pub struct Ptr<T: ?Sized, K: Kind = Scalar> {
    raw: Option<Raw<T>>,
    phantom: PhantomData<(Box<T>, K)>,
}

impl<T: Any, K: Kind> Ptr<T, K> {
    /// Allocates a free-standing node holding `value`.
    ///
    /// Exhausting memory is fatal, as with `Box::new`.
    pub fn new(value: T) -> Self {
        let (header, ptr) = node::allocate(value, None, None);
        // Safety: a fresh node starts with the one reference we adopt here.
        unsafe { Ptr::from_raw_parts(header, ptr) }
    }

    /// Allocates a free-standing node, reporting exhaustion as
    /// [`Error::Alloc`].
    pub fn try_new(value: T) -> Result<Self, Error> {
        let (header, ptr) = node::try_allocate(value, None, None)?;
        Ok(unsafe { Ptr::from_raw_parts(header, ptr) })
    }

    /// Allocates a free-standing node from `pool`.
    pub fn new_in(value: T, pool: &Pool) -> Self {
        let (header, ptr) = node::allocate(value, None, Some(pool));
        unsafe { Ptr::from_raw_parts(header, ptr) }
    }

    pub fn try_new_in(value: T, pool: &Pool) -> Result<Self, Error> {
        let (header, ptr) = node::try_allocate(value, None, Some(pool))?;
        Ok(unsafe { Ptr::from_raw_parts(header, ptr) })
    }

    /// Returns a new handle to the node behind `header` if its payload is
    /// exactly a `T`, taking a fresh reference.
    pub(crate) fn from_header(header: NonNull<Header>) -> Option<Self> {
        // Safety: callers pass the header of a node that is kept alive.
        let h = unsafe { header.as_ref() };
        if !h.is::<T>() {
            return None;
        }
        h.add_ref();
        Some(unsafe { Ptr::from_raw_parts(header, Header::value(header).cast::<T>()) })
    }
}

impl<T: ?Sized, K: Kind> Ptr<T, K> {
    /// The null handle.
    pub const fn null() -> Self {
        Ptr {
            raw: None,
            phantom: PhantomData,
        }
    }

    /// Wraps a reference the caller already owns, without incrementing.
    ///
    /// # Safety
    /// `ptr` must point into the payload of the live node behind `header`,
    /// and the caller must transfer one reference on that node.
    pub(crate) unsafe fn from_raw_parts(header: NonNull<Header>, ptr: NonNull<T>) -> Self {
        debug_assert!(unsafe { header.as_ref() }.contains(ptr.as_ptr()));
        Ptr {
            raw: Some(Raw { header, ptr }),
            phantom: PhantomData,
        }
    }

    pub fn is_null(this: &Self) -> bool {
        this.raw.is_none()
    }

    /// The element pointer, or `None` for a null handle. Never touches the
    /// count.
    pub fn as_ptr(this: &Self) -> Option<NonNull<T>> {
        this.raw.map(|r| r.ptr)
    }

    /// The control block of the node this handle references.
    pub fn header(this: &Self) -> Option<&Header> {
        this.raw.map(|r| header::resolve(r.header, r.ptr))
    }

    pub(crate) fn header_ptr(this: &Self) -> Option<NonNull<Header>> {
        this.raw.map(|r| r.header)
    }

    fn addr_of(this: &Self) -> *const u8 {
        match this.raw {
            Some(r) => r.ptr.cast::<u8>().as_ptr(),
            None => core::ptr::null(),
        }
    }

    /// Number of live handles referencing the node, this one included.
    ///
    /// # Panics
    /// If the handle is null.
    pub fn use_count(this: &Self) -> usize {
        match Ptr::header(this) {
            Some(h) => h.use_count(),
            None => panic!("use_count called on a null handle"),
        }
    }

    /// The root the node was allocated for. `None` for null handles and
    /// free-standing nodes.
    pub fn owner(this: &Self) -> Option<RootId> {
        Ptr::header(this).and_then(Header::owner)
    }

    /// Releases the current reference, leaving the handle null.
    pub fn reset(this: &mut Self) {
        drop(mem::take(this));
    }

    /// Releases the current reference and takes over `other`'s, without
    /// incrementing it.
    pub fn adopt(this: &mut Self, other: Self) {
        *this = other;
    }

    /// Returns true if both handles point at the same element. Two null
    /// handles are equal.
    pub fn ptr_eq<U: ?Sized, K2: Kind>(this: &Self, other: &Ptr<U, K2>) -> bool {
        this.raw.map(|r| r.addr()) == other.raw.map(|r| r.addr())
    }

    /// Returns true if both handles share a node, possibly pointing at
    /// different parts of its payload.
    pub fn root_ptr_eq<U: ?Sized, K2: Kind>(this: &Self, other: &Ptr<U, K2>) -> bool {
        Ptr::header_ptr(this) == Ptr::header_ptr(other)
    }

    /// Return a `Ptr<U>` for any `U` contained within `T`, e.g. a field, an
    /// element of an array, or a `&dyn Trait` view of the payload. The result
    /// shares the node and its count.
    ///
    /// Projecting a null handle gives a null handle.
    ///
    /// # Panics
    /// If `f` returns a reference outside the node's payload.
    pub fn project<U: ?Sized, F: FnOnce(&T) -> &U>(this: Self, f: F) -> Ptr<U, K> {
        match this.raw {
            None => Ptr::null(),
            Some(raw) => {
                // Safety: raw.ptr is valid for as long as `this` holds its
                // reference.
                let ptr = NonNull::from(f(unsafe { raw.ptr.as_ref() }));
                Ptr::projected(this, raw.header, ptr)
            }
        }
    }

    /// Fallible version of `project()`. On `None` the reference is released.
    pub fn try_project<U: ?Sized, F: FnOnce(&T) -> Option<&U>>(
        this: Self,
        f: F,
    ) -> Option<Ptr<U, K>> {
        let raw = this.raw?;
        let ptr = NonNull::from(f(unsafe { raw.ptr.as_ref() })?);
        Some(Ptr::projected(this, raw.header, ptr))
    }

    fn projected<U: ?Sized>(this: Self, header: NonNull<Header>, ptr: NonNull<U>) -> Ptr<U, K> {
        header::resolve(header, ptr);
        // Forget `this` so it doesn't adjust the count, since we moved its
        // reference into the new handle.
        mem::forget(this);
        unsafe { Ptr::from_raw_parts(header, ptr) }
    }

    /// Convert `Ptr<T>` to `Ptr<U>`, as long as `&T` converts to `&U`.
    pub fn cast<U: ?Sized>(this: Self) -> Ptr<U, K>
    where
        for<'u> &'u U: From<&'u T>,
    {
        Ptr::project(this, |x| From::from(x))
    }

    /// Reinterpret the handle with a different set of capabilities.
    pub fn into_kind<K2: Kind>(this: Self) -> Ptr<T, K2> {
        let raw = this.raw;
        mem::forget(this);
        Ptr {
            raw,
            phantom: PhantomData,
        }
    }

    /// Forgets the element type, keeping the reference.
    pub fn erase(this: Self) -> VoidPtr {
        let raw = this.raw;
        mem::forget(this);
        Ptr {
            raw: raw.map(|r| Raw {
                header: r.header,
                ptr: r.ptr.cast::<()>(),
            }),
            phantom: PhantomData,
        }
    }

    /// Starts a new, empty generation of children under this node.
    ///
    /// # Panics
    /// If the handle is null, or the node's generations are borrowed.
    pub fn add_generation(this: &Self) {
        match Ptr::header(this) {
            Some(h) => h.generations().borrow_mut().push(),
            None => panic!("add_generation called on a null handle"),
        }
    }

    /// Records `child` in this node's most recent generation. The link holds
    /// its own reference to the child.
    ///
    /// Parent and child must belong to the same root (or both be
    /// free-standing). A child attached under a detached node becomes
    /// detached too.
    pub fn attach<U: ?Sized, K2: Kind>(this: &Self, child: &Ptr<U, K2>) -> Result<(), Error> {
        let parent = Ptr::header(this).ok_or(Error::Null)?;
        if parent.generations().borrow().is_empty() {
            return Err(Error::NoGeneration);
        }
        let link = Ptr::link(child, parent.owner())?;
        if parent.is_detached() {
            if let Some(h) = Ptr::header(&link) {
                h.mark_detached();
            }
        }
        parent.generations().borrow_mut().attach(link)
    }

    /// This node's child generations, or `None` for a null handle.
    pub fn generations(this: &Self) -> Option<Ref<'_, Generations>> {
        Ptr::header(this).map(|h| h.generations().borrow())
    }

    /// A new link to this handle's node, checked against the expected owner.
    pub(crate) fn link(this: &Self, expected: Option<RootId>) -> Result<VoidPtr, Error> {
        let h = Ptr::header(this).ok_or(Error::Null)?;
        if h.owner() != expected {
            return Err(Error::ForeignRoot {
                type_name: h.type_name(),
                expected,
                found: h.owner(),
            });
        }
        Ok(Ptr::erase(this.clone()))
    }
}

impl<T: ?Sized, K: Readable> Ptr<T, K> {
    /// The element this handle points at, or `None` if null.
    pub fn get(this: &Self) -> Option<&T> {
        // Safety: the node is alive while `this` holds its reference.
        this.raw.map(|r| unsafe { &*r.ptr.as_ptr() })
    }

    /// Returns a mutable reference to the element if this is the only handle
    /// to the node (links in generations count as handles).
    pub fn get_mut(this: &mut Self) -> Option<&mut T> {
        let raw = this.raw?;
        if Ptr::use_count(&*this) == 1 {
            // Safety: no other handle can reach the payload.
            Some(unsafe { &mut *raw.ptr.as_ptr() })
        } else {
            None
        }
    }

    fn expect_ref(this: &Self) -> &T {
        match Ptr::get(this) {
            Some(v) => v,
            None => panic!("dereferenced a null handle"),
        }
    }
}

impl VoidPtr {
    /// Recovers a typed handle if the node's payload is exactly a `T` and this
    /// handle points at the whole payload. Otherwise gives the handle back.
    pub fn downcast<T: Any>(this: Self) -> Result<NodePtr<T>, VoidPtr> {
        let Some(raw) = this.raw else {
            return Err(this);
        };
        let h = header::resolve(raw.header, raw.ptr);
        if h.is::<T>() && Header::value(raw.header) == raw.ptr.cast::<u8>() {
            let raw = Raw {
                header: raw.header,
                ptr: raw.ptr.cast::<T>(),
            };
            mem::forget(this);
            Ok(Ptr {
                raw: Some(raw),
                phantom: PhantomData,
            })
        } else {
            Err(this)
        }
    }
}

impl<E, const N: usize, K: Readable> Ptr<[E; N], K> {
    /// Converts an array handle into a slice handle.
    pub fn unsize(this: Self) -> Ptr<[E], K> {
        Ptr::project(this, |a| &a[..])
    }
}

impl<T: ?Sized> ArrayPtr<T> {
    /// The elements of an array or slice payload.
    ///
    /// # Panics
    /// If the handle is null.
    pub fn as_slice<E>(this: &Self) -> &[E]
    where
        T: AsRef<[E]>,
    {
        <T as AsRef<[E]>>::as_ref(Ptr::expect_ref(this))
    }
}

impl<T: ?Sized, K: Kind> Clone for Ptr<T, K> {
    fn clone(&self) -> Self {
        if let Some(h) = Ptr::header(self) {
            h.add_ref();
        }
        Ptr {
            raw: self.raw,
            phantom: PhantomData,
        }
    }

    fn clone_from(&mut self, source: &Self) {
        if !Ptr::ptr_eq(&*self, source) || !Ptr::root_ptr_eq(&*self, source) {
            *self = source.clone();
        }
    }
}

impl<T: ?Sized, K: Kind> Drop for Ptr<T, K> {
    fn drop(&mut self) {
        if let Some(raw) = self.raw.take() {
            // Safety: we owned one reference on this header.
            unsafe { Header::release(raw.header) };
        }
    }
}

impl<T: ?Sized, K: Kind> Default for Ptr<T, K> {
    fn default() -> Self {
        Ptr::null()
    }
}

impl<T: ?Sized> Deref for Ptr<T, Scalar> {
    type Target = T;

    /// # Panics
    /// If the handle is null.
    fn deref(&self) -> &T {
        Ptr::expect_ref(self)
    }
}

impl<E, const N: usize> Index<usize> for Ptr<[E; N], Array> {
    type Output = E;

    fn index(&self, n: usize) -> &E {
        &Ptr::expect_ref(self)[n]
    }
}

impl<E> Index<usize> for Ptr<[E], Array> {
    type Output = E;

    fn index(&self, n: usize) -> &E {
        &Ptr::expect_ref(self)[n]
    }
}

/// Handles compare by identity: equal when they point at the same element.
impl<T: ?Sized, U: ?Sized, K: Kind, K2: Kind> PartialEq<Ptr<U, K2>> for Ptr<T, K> {
    fn eq(&self, other: &Ptr<U, K2>) -> bool {
        Ptr::ptr_eq(self, other)
    }
}

impl<T: ?Sized, K: Kind> Eq for Ptr<T, K> {}

impl<T: ?Sized, K: Kind> Hash for Ptr<T, K> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.map(|r| r.addr()).hash(state)
    }
}

impl<T: ?Sized + fmt::Display> fmt::Display for Ptr<T, Scalar> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match Ptr::get(self) {
            Some(v) => fmt::Display::fmt(v, f),
            None => f.write_str("null"),
        }
    }
}

impl<T: ?Sized, K: Kind> fmt::Debug for Ptr<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match Ptr::header(self) {
            None => f.write_str("Ptr(null)"),
            Some(h) => write!(
                f,
                "Ptr({} @ {:p}, use_count={})",
                h.type_name(),
                Ptr::addr_of(self),
                h.use_count()
            ),
        }
    }
}

impl<T: ?Sized, K: Kind> fmt::Pointer for Ptr<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&Ptr::addr_of(self), f)
    }
}

pub(crate) mod private {
    pub trait Sealed {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::{cell::Cell, rc::Rc};

    struct DropCounter<T>(T, Rc<Cell<usize>>);
    impl<T> Drop for DropCounter<T> {
        fn drop(&mut self) {
            self.1.set(self.1.get() + 1);
        }
    }

    #[test]
    fn test_simple() {
        let x = NodePtr::new(2);
        let y = x.clone();
        assert_eq!(*x, 2);
        assert_eq!(&*x as *const i32, &*y as *const i32);
        drop(x);
        assert_eq!(*y, 2);
    }

    #[test]
    fn test_null() {
        let p: NodePtr<i32> = NodePtr::default();
        assert!(NodePtr::is_null(&p));
        assert_eq!(NodePtr::get(&p), None);
        assert_eq!(NodePtr::owner(&p), None);
        assert!(NodePtr::header(&p).is_none());
        assert_eq!(p, NodePtr::<u8>::null());
        assert_eq!(format!("{:?}", p), "Ptr(null)");
        assert_eq!(format!("{}", p), "null");
        assert!(NodePtr::is_null(&NodePtr::project(p, |x| x)));
    }

    #[test]
    #[should_panic(expected = "dereferenced a null handle")]
    fn test_null_deref() {
        let p: NodePtr<i32> = NodePtr::null();
        let v: i32 = *p;
        assert_eq!(v, 0);
    }

    #[test]
    #[should_panic(expected = "use_count called on a null handle")]
    fn test_null_use_count() {
        let p: VoidPtr = VoidPtr::null();
        VoidPtr::use_count(&p);
    }

    #[test]
    fn test_copies_then_release() {
        let n = Rc::new(Cell::new(0));
        let a = NodePtr::new(DropCounter((), n.clone()));
        let b = a.clone();
        let c = b.clone();
        let d = c.clone();
        assert_eq!(NodePtr::use_count(&a), 4);
        drop(a);
        drop(c);
        assert_eq!(NodePtr::use_count(&d), 2);
        drop(d);
        assert_eq!(n.get(), 0);
        let h = NodePtr::header_ptr(&b).unwrap();
        assert_eq!(unsafe { h.as_ref() }.use_count(), 1);
        drop(b);
        assert_eq!(n.get(), 1);
    }

    #[test]
    fn test_reset_and_adopt() {
        let n = Rc::new(Cell::new(0));
        let mut a = NodePtr::new(DropCounter(1, n.clone()));
        let b = NodePtr::new(DropCounter(2, n.clone()));
        let keep = b.clone();

        // adopt does not increment the adopted reference
        NodePtr::adopt(&mut a, b);
        assert_eq!(n.get(), 1);
        assert_eq!(a.0, 2);
        assert_eq!(NodePtr::use_count(&keep), 2);

        NodePtr::reset(&mut a);
        assert!(NodePtr::is_null(&a));
        assert_eq!(NodePtr::use_count(&keep), 1);
        NodePtr::reset(&mut a);
        drop(keep);
        assert_eq!(n.get(), 2);
    }

    #[test]
    fn test_clone_from_same_node() {
        let a = NodePtr::new(5);
        let mut b = a.clone();
        b.clone_from(&a);
        assert_eq!(NodePtr::use_count(&a), 2);

        let other = NodePtr::new(6);
        b.clone_from(&other);
        assert_eq!(NodePtr::use_count(&a), 1);
        assert_eq!(NodePtr::use_count(&other), 2);
        assert_eq!(*b, 6);
    }

    #[test]
    fn test_count_tracks_live_handles() {
        let node = NodePtr::new(String::from("fixed"));
        let mut handles: Vec<NodePtr<String>> = vec![NodePtr::null(); 8];
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..500 {
            let i = rng.gen_range(0..handles.len());
            match rng.gen_range(0..4) {
                0 => handles[i] = node.clone(),
                1 => NodePtr::reset(&mut handles[i]),
                2 => {
                    let j = rng.gen_range(0..handles.len());
                    let src = handles[j].clone();
                    handles[i].clone_from(&src);
                }
                _ => {
                    let taken = mem::take(&mut handles[i]);
                    let j = rng.gen_range(0..handles.len());
                    NodePtr::adopt(&mut handles[j], taken);
                }
            }
            let live = 1 + handles.iter().filter(|h| !NodePtr::is_null(*h)).count();
            assert_eq!(NodePtr::use_count(&node), live);
        }
    }

    #[test]
    fn test_project() {
        let n = Rc::new(Cell::new(0));
        {
            let x = NodePtr::new(DropCounter((1, 2), n.clone()));
            let y = NodePtr::project(x.clone(), |x| &x.0 .0);
            let z = NodePtr::project(x.clone(), |x| &x.0 .1);
            assert_eq!(*y, 1);
            assert_eq!(*z, 2);
            assert_eq!(NodePtr::use_count(&z), 3);
            assert!(NodePtr::root_ptr_eq(&y, &z));
            assert!(!NodePtr::ptr_eq(&y, &z));
            drop(x);
            drop(y);
            assert_eq!(NodePtr::use_count(&z), 1);
        }
        assert_eq!(n.get(), 1);
    }

    #[test]
    fn test_trait_obj() {
        let x = NodePtr::new(2);
        let d = NodePtr::project(x.clone(), |p| p as &dyn fmt::Debug);
        assert_eq!(format!("{:?}", &*d), "2");
        assert_eq!(NodePtr::header(&d).unwrap().type_name(), "i32");
        assert_eq!(NodePtr::use_count(&x), 2);
    }

    #[test]
    fn test_try_project() {
        let x = NodePtr::new(Some(3));
        let none: NodePtr<Option<i32>> = NodePtr::new(None);
        let y = NodePtr::try_project(x.clone(), |v| v.as_ref()).unwrap();
        assert_eq!(*y, 3);
        assert!(NodePtr::try_project(none.clone(), |v| v.as_ref()).is_none());
        assert_eq!(NodePtr::use_count(&none), 1);
    }

    #[test]
    #[should_panic(expected = "is not inside the payload")]
    fn test_project_outside_payload() {
        static OUTSIDE: i32 = 9;
        let x = NodePtr::new(1);
        let _ = NodePtr::project(x, |_| &OUTSIDE);
    }

    #[test]
    fn test_cast() {
        struct Meters(f64);
        impl<'a> From<&'a Meters> for &'a f64 {
            fn from(m: &'a Meters) -> &'a f64 {
                &m.0
            }
        }
        let m = NodePtr::new(Meters(2.5));
        let f: NodePtr<f64> = NodePtr::cast(m);
        assert_eq!(*f, 2.5);
    }

    #[test]
    fn test_array_index() {
        let a: ArrayPtr<[u32; 5]> = ArrayPtr::new([10, 11, 12, 13, 14]);
        let base = ArrayPtr::as_ptr(&a).unwrap().cast::<u32>().as_ptr() as *const u32;
        for k in 0..5 {
            assert!(core::ptr::eq(&a[k], base.wrapping_add(k)));
            assert_eq!(a[k], 10 + k as u32);
        }
        let s = ArrayPtr::unsize(a.clone());
        assert_eq!(ArrayPtr::as_slice(&s).len(), 5);
        assert!(core::ptr::eq(&s[4], base.wrapping_add(4)));
        assert_eq!(ArrayPtr::use_count(&a), 2);
    }

    #[test]
    #[should_panic(expected = "index out of bounds")]
    fn test_array_out_of_range() {
        let a: ArrayPtr<[u8; 2]> = ArrayPtr::new([1, 2]);
        let k = ArrayPtr::as_slice(&a).len();
        let v: u8 = a[k];
        assert_eq!(v, 0);
    }

    #[test]
    fn test_kinds() {
        let n = Rc::new(Cell::new(0));
        let p = NodePtr::new(DropCounter([1u8, 2, 3], n.clone()));
        let arr: ArrayPtr<[u8; 3]> = ArrayPtr::project(NodePtr::into_kind(p.clone()), |d| &d.0);
        assert_eq!(arr[2], 3);

        let v: VoidPtr = NodePtr::erase(p.clone());
        let v2 = v.clone();
        assert_eq!(VoidPtr::use_count(&v2), 4);
        assert!(VoidPtr::root_ptr_eq(&v, &p));
        drop(v);
        drop(v2);
        drop(arr);
        drop(p);
        assert_eq!(n.get(), 1);
    }

    #[test]
    fn test_downcast() {
        let p = NodePtr::new(41u64);
        let v = NodePtr::erase(p.clone());
        let v = VoidPtr::downcast::<i64>(v).unwrap_err();
        let back = VoidPtr::downcast::<u64>(v).unwrap();
        assert_eq!(*back, 41);
        assert_eq!(back, p);

        // a projection does not cover the whole payload
        let pair = NodePtr::new((1u64, 2u64));
        let second = NodePtr::erase(NodePtr::project(pair, |p| &p.1));
        assert!(VoidPtr::downcast::<(u64, u64)>(second).is_err());
        assert!(VoidPtr::downcast::<u8>(VoidPtr::null()).is_err());
    }

    #[test]
    fn test_get_mut() {
        let mut p = NodePtr::new(vec![1]);
        NodePtr::get_mut(&mut p).unwrap().push(2);
        let q = p.clone();
        assert!(NodePtr::get_mut(&mut p).is_none());
        drop(q);
        assert_eq!(*p, [1, 2]);
    }

    #[test]
    fn test_node_generations() {
        let parent = NodePtr::new("parent");
        let child = NodePtr::new(3);
        assert_eq!(NodePtr::attach(&parent, &child), Err(Error::NoGeneration));
        NodePtr::add_generation(&parent);
        NodePtr::attach(&parent, &child).unwrap();
        assert_eq!(NodePtr::use_count(&child), 2);
        assert_eq!(
            NodePtr::attach(&parent, &NodePtr::<i32>::null()),
            Err(Error::Null)
        );
        assert_eq!(
            NodePtr::attach(&NodePtr::<i32>::null(), &child),
            Err(Error::Null)
        );
        assert_eq!(NodePtr::generations(&parent).unwrap().len(), 1);

        // dropping the parent releases its links
        drop(parent);
        assert_eq!(NodePtr::use_count(&child), 1);
    }

    #[test]
    fn test_identity_eq_and_hash() {
        use std::collections::HashSet;
        let a = NodePtr::new(1);
        let b = NodePtr::new(1);
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
        let set: HashSet<_> = [a.clone(), a.clone(), b.clone()].into_iter().collect();
        assert_eq!(set.len(), 2);
        assert_eq!(format!("{}", a), "1");
        assert!(format!("{:?}", a).starts_with("Ptr(i32 @ 0x"));
    }
}
