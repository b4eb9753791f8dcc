//! Garbage-collected handles and the tracing interface.
//!
//! Every heap object lives inside the arena of a [`GcAllocator`](alloc::GcAllocator). Handles
//! are plain generational keys into that arena, so they are `Copy` and never dangle silently:
//! a handle whose object has been swept simply stops resolving.

pub mod alloc;

use std::fmt::Debug;
use std::hash::Hash;
use std::marker::PhantomData;

use modular_bitfield::prelude::*;

use crate::object::{GcObject, ObjKind};
use crate::value::Value;

slotmap::new_key_type! {
    /// Identity of a heap object.
    pub struct ObjKey;
}

/// The tri-color state of an object during a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BitfieldSpecifier)]
#[bits = 2]
pub enum GcColor {
    /// Not reached (yet). Swept at the end of a collection.
    White,
    /// Reached, but its children are not traced yet.
    Gray,
    /// Reached, and all of its children are at least gray.
    Black,
}

/// Per-object bookkeeping of the collector.
#[bitfield]
#[derive(Debug, Clone, Copy)]
pub struct GcHeader {
    pub color: GcColor,
    #[skip]
    __: B6,
}

/// A typed handle to a heap object.
#[repr(transparent)]
pub struct Gc<T> {
    key: ObjKey,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Gc<T> {
    pub(crate) fn from_key(key: ObjKey) -> Self {
        Gc {
            key,
            _marker: PhantomData,
        }
    }

    pub fn key(self) -> ObjKey {
        self.key
    }
}

impl<T: GcObject> Gc<T> {
    /// Forget the static type of this handle.
    pub fn untyped(self) -> GcRef {
        GcRef {
            key: self.key,
            kind: T::KIND,
        }
    }
}

impl<T> Clone for Gc<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Gc<T> {}

impl<T> PartialEq for Gc<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<T> Eq for Gc<T> {}

impl<T> Hash for Gc<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key.hash(state)
    }
}

impl<T> Debug for Gc<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Gc({:?})", self.key)
    }
}

/// An untyped handle to a heap object. The kind of the object is carried along, so type
/// tests never touch the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GcRef {
    key: ObjKey,
    kind: ObjKind,
}

impl GcRef {
    pub fn key(self) -> ObjKey {
        self.key
    }

    pub fn kind(self) -> ObjKind {
        self.kind
    }

    /// Recover the static type of this handle, if it points to a `T`.
    pub fn downcast<T: GcObject>(self) -> Option<Gc<T>> {
        (self.kind == T::KIND).then(|| Gc::from_key(self.key))
    }
}

impl<T: GcObject> From<Gc<T>> for GcRef {
    fn from(gc: Gc<T>) -> Self {
        gc.untyped()
    }
}

/// Collects the objects reachable from a traced value. Marked objects are reported to the
/// allocator, which decides whether they still need to be traced.
pub struct Tracer<'a> {
    pending: &'a mut Vec<ObjKey>,
}

impl<'a> Tracer<'a> {
    pub(crate) fn new(pending: &'a mut Vec<ObjKey>) -> Self {
        Tracer { pending }
    }

    pub fn mark(&mut self, key: ObjKey) {
        self.pending.push(key);
    }
}

/// Types that may hold references to heap objects.
///
/// Implementors must report every handle they hold. Anything not reported is considered
/// garbage by the next collection.
pub trait Trace {
    fn trace(&self, tracer: &mut Tracer<'_>);
}

impl<T> Trace for Gc<T> {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        tracer.mark(self.key)
    }
}

impl Trace for GcRef {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        tracer.mark(self.key)
    }
}

impl Trace for Value {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        if let Value::Object(obj) = self {
            obj.trace(tracer)
        }
    }
}

impl Trace for () {
    fn trace(&self, _tracer: &mut Tracer<'_>) {}
}

impl<A: Trace + ?Sized> Trace for &A {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        (**self).trace(tracer)
    }
}

impl<A: Trace, B: Trace> Trace for (A, B) {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        self.0.trace(tracer);
        self.1.trace(tracer);
    }
}

impl<T: Trace> Trace for Option<T> {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        if let Some(t) = self {
            t.trace(tracer)
        }
    }
}

impl<T: Trace> Trace for [T] {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        for t in self {
            t.trace(tracer)
        }
    }
}

impl<T: Trace> Trace for Vec<T> {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        self.as_slice().trace(tracer)
    }
}
