use std::fmt;
use std::mem::size_of;
use std::ops::{Index, IndexMut};

use quill_bytecode::ConstantView;
use slotmap::SlotMap;

use super::{Gc, GcColor, GcHeader, GcRef, ObjKey, Trace, Tracer};
use crate::config::VmConfig;
use crate::object::{hash_str, GcObject, Object, Str};
use crate::table::{Symbol, Table};
use crate::value::Value;

/// Initial GC threshold. 1MiB.
pub const INIT_GC_THRESHOLD: usize = 1024 * 1024;

/// Growth factor of the GC threshold after each collection.
pub const GC_HEAP_GROW_FACTOR: usize = 2;

/// A slot of the heap arena.
#[derive(Debug)]
pub struct HeapEntry {
    header: GcHeader,
    /// Bytes accounted for this object at its last measurement.
    size: usize,
    object: Object,
}

impl HeapEntry {
    fn measure(object: &Object) -> usize {
        size_of::<HeapEntry>() + object.heap_size()
    }

    fn color(&self) -> GcColor {
        self.header.color()
    }
}

/// Counters kept across collections.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GcStats {
    pub collections: usize,
    pub objects_freed: usize,
    pub bytes_freed: usize,
}

/// A simple mark-and-sweep garbage collected allocator. All contents must implement the
/// [`Trace`] interface.
///
/// The allocator never knows what is alive by itself. Every call that may allocate is handed
/// the current root set, and a collection runs before the allocation whenever the threshold
/// is crossed.
pub struct GcAllocator {
    objects: SlotMap<ObjKey, HeapEntry>,

    /// The intern pool. Keys are weak: strings only referenced from here are collected.
    strings: Table,

    /// Total memory allocated using this GC-ed allocator.
    ///
    /// Growth of tables living inside objects isn't tracked as it happens. Instead, we just
    /// recalculate this value after each GC.
    bytes_allocated: usize,

    /// The threshold for triggering a GC. Recalculated as `grow_factor * bytes_allocated` after
    /// each GC.
    next_gc: usize,
    grow_factor: usize,

    /// Collect before every allocation.
    stress: bool,

    /// Objects marked but not traced yet.
    gray: Vec<ObjKey>,
    /// Objects reported by a [`Tracer`] but not examined yet.
    pending: Vec<ObjKey>,

    stats: GcStats,
}

impl Default for GcAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl GcAllocator {
    pub fn new() -> GcAllocator {
        GcAllocator {
            objects: SlotMap::with_key(),
            strings: Table::new(),
            bytes_allocated: 0,
            next_gc: INIT_GC_THRESHOLD,
            grow_factor: GC_HEAP_GROW_FACTOR,
            stress: false,
            gray: vec![],
            pending: vec![],
            stats: GcStats::default(),
        }
    }

    pub fn from_config(config: &VmConfig) -> GcAllocator {
        GcAllocator {
            next_gc: config.initial_gc_threshold,
            grow_factor: config.gc_grow_factor,
            stress: config.stress_gc,
            ..Self::new()
        }
    }

    /// Run a collection before every allocation.
    pub fn set_stress(&mut self, stress: bool) {
        self.stress = stress
    }

    /// Move `object` into the heap. `roots` must report everything the caller still needs,
    /// since a collection may run before the object is placed.
    pub fn alloc<T: GcObject>(&mut self, object: T, roots: &dyn Trace) -> Gc<T> {
        let object = object.into_object();
        let size = HeapEntry::measure(&object);

        if self.stress || self.bytes_allocated + size > self.next_gc {
            self.collect_garbage(roots);
        }

        self.bytes_allocated += size;
        let key = self.objects.insert(HeapEntry {
            header: GcHeader::new(),
            size,
            object,
        });
        tracing::trace!(?key, kind = ?T::KIND, size, "allocate");
        Gc::from_key(key)
    }

    /// Get the interned string with the contents of `chars`, copying it into the heap if it
    /// doesn't exist yet.
    pub fn copy_string(&mut self, chars: &str, roots: &dyn Trace) -> Gc<Str> {
        let hash = hash_str(chars);
        if let Some(interned) = self.find_interned(chars, hash) {
            return interned;
        }
        self.intern(chars.into(), hash, roots)
    }

    /// Like [`Self::copy_string`], but takes ownership of the buffer. The buffer is dropped
    /// when the string is already interned.
    pub fn take_string(&mut self, chars: String, roots: &dyn Trace) -> Gc<Str> {
        let hash = hash_str(&chars);
        if let Some(interned) = self.find_interned(&chars, hash) {
            return interned;
        }
        self.intern(chars.into_boxed_str(), hash, roots)
    }

    /// Look up an interned string without allocating.
    pub fn interned(&self, chars: &str) -> Option<Gc<Str>> {
        self.find_interned(chars, hash_str(chars))
    }

    fn find_interned(&self, chars: &str, hash: u32) -> Option<Gc<Str>> {
        let objects = &self.objects;
        self.strings.find_string(hash, |s| {
            objects
                .get(s.key())
                .and_then(|e| Str::from_object(&e.object))
                .map_or(false, |s| s.as_str() == chars)
        })
    }

    fn intern(&mut self, chars: Box<str>, hash: u32, roots: &dyn Trace) -> Gc<Str> {
        let string = self.alloc(Str::with_hash(chars, hash), roots);
        self.strings.set(Symbol { string, hash }, Value::Nil);
        string
    }

    /// The table key of an interned string.
    pub fn symbol(&self, string: Gc<Str>) -> Symbol {
        Symbol {
            string,
            hash: self[string].hash(),
        }
    }

    pub fn get<T: GcObject>(&self, gc: Gc<T>) -> Option<&T> {
        self.objects
            .get(gc.key())
            .and_then(|e| T::from_object(&e.object))
    }

    pub fn get_mut<T: GcObject>(&mut self, gc: Gc<T>) -> Option<&mut T> {
        self.objects
            .get_mut(gc.key())
            .and_then(|e| T::from_object_mut(&mut e.object))
    }

    /// Resolve an untyped handle.
    ///
    /// # Panics
    ///
    /// Panics if the object has been collected.
    pub fn object(&self, obj: GcRef) -> &Object {
        &self
            .objects
            .get(obj.key())
            .expect("dangling reference to a collected object")
            .object
    }

    /// Whether the object behind `obj` is still alive.
    pub fn contains(&self, obj: impl Into<GcRef>) -> bool {
        self.objects.contains_key(obj.into().key())
    }

    /// Run a full collection. Everything not reachable from `roots` is freed.
    pub fn collect_garbage(&mut self, roots: &dyn Trace) {
        let before = self.bytes_allocated;
        tracing::debug!(bytes = before, objects = self.objects.len(), "gc begin");

        // mark roots
        roots.trace(&mut Tracer::new(&mut self.pending));
        self.mark_pending();

        // trace references
        while let Some(key) = self.gray.pop() {
            let entry = match self.objects.get_mut(key) {
                Some(entry) => entry,
                None => continue,
            };
            entry.header.set_color(GcColor::Black);
            entry.object.trace(&mut Tracer::new(&mut self.pending));
            self.mark_pending();
        }

        // the intern pool holds its keys weakly
        let objects = &self.objects;
        self.strings.retain(|sym| {
            objects
                .get(sym.string.key())
                .map_or(false, |e| e.color() != GcColor::White)
        });

        // sweep
        let mut freed = 0;
        let mut bytes_freed = 0;
        let mut bytes_alive = 0;
        self.objects.retain(|_, entry| {
            if entry.color() == GcColor::White {
                freed += 1;
                bytes_freed += entry.size;
                false
            } else {
                entry.header.set_color(GcColor::White);
                entry.size = HeapEntry::measure(&entry.object);
                bytes_alive += entry.size;
                true
            }
        });

        self.bytes_allocated = bytes_alive;
        self.next_gc = self.bytes_allocated * self.grow_factor;
        self.stats.collections += 1;
        self.stats.objects_freed += freed;
        self.stats.bytes_freed += bytes_freed;

        tracing::debug!(
            collected = before.saturating_sub(bytes_alive),
            from = before,
            to = bytes_alive,
            freed,
            next = self.next_gc,
            "gc end"
        );
    }

    /// Gray every white object reported since the last call.
    fn mark_pending(&mut self) {
        for key in self.pending.drain(..) {
            if let Some(entry) = self.objects.get_mut(key) {
                if entry.color() == GcColor::White {
                    entry.header.set_color(GcColor::Gray);
                    self.gray.push(key);
                }
            }
        }
    }

    /// Amount of memory currently allocated by this allocator
    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    /// Threshold of the next collection
    pub fn next_gc(&self) -> usize {
        self.next_gc
    }

    /// Number of live objects, garbage included
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Number of strings in the intern pool
    pub fn interned_count(&self) -> usize {
        self.strings.len()
    }

    pub fn stats(&self) -> GcStats {
        self.stats
    }
}

impl<T: GcObject> Index<Gc<T>> for GcAllocator {
    type Output = T;

    fn index(&self, index: Gc<T>) -> &Self::Output {
        self.get(index)
            .expect("dangling reference to a collected object")
    }
}

impl<T: GcObject> IndexMut<Gc<T>> for GcAllocator {
    fn index_mut(&mut self, index: Gc<T>) -> &mut Self::Output {
        self.get_mut(index)
            .expect("dangling reference to a collected object")
    }
}

impl ConstantView<Value> for GcAllocator {
    fn fmt_constant(&self, constant: &Value, f: &mut dyn fmt::Write) -> fmt::Result {
        write!(f, "{}", constant.display(self))
    }

    fn upvalue_count(&self, constant: &Value) -> usize {
        constant
            .as_function()
            .map_or(0, |function| self[function].upvalue_count)
    }
}
