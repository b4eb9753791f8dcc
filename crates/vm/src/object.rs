//! Heap object model.

use std::mem::size_of;

use quill_bytecode::Chunk;
use smol_str::SmolStr;

use crate::gc::{Gc, Trace, Tracer};
use crate::table::Table;
use crate::value::Value;

/// The type tag of heap objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjKind {
    String,
    Function,
    Closure,
    Upvalue,
    Class,
    Instance,
    Native,
    BoundMethod,
}

/// Types that can be stored in the garbage-collected heap.
pub trait GcObject: Trace + Sized {
    const KIND: ObjKind;

    fn into_object(self) -> Object;
    fn from_object(obj: &Object) -> Option<&Self>;
    fn from_object_mut(obj: &mut Object) -> Option<&mut Self>;
}

macro_rules! objects {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        /// A heap object of any kind.
        #[derive(Debug)]
        pub enum Object {$(
            $variant($ty)
        ),*}

        impl Object {
            pub fn kind(&self) -> ObjKind {
                match self {$(
                    Object::$variant(_) => ObjKind::$variant
                ),*}
            }

            /// Bytes owned by this object outside of its arena slot.
            pub fn heap_size(&self) -> usize {
                match self {$(
                    Object::$variant(o) => o.heap_size()
                ),*}
            }
        }

        impl Trace for Object {
            fn trace(&self, tracer: &mut Tracer<'_>) {
                match self {$(
                    Object::$variant(o) => o.trace(tracer)
                ),*}
            }
        }

        $(
            impl GcObject for $ty {
                const KIND: ObjKind = ObjKind::$variant;

                fn into_object(self) -> Object {
                    Object::$variant(self)
                }

                fn from_object(obj: &Object) -> Option<&Self> {
                    match obj {
                        Object::$variant(o) => Some(o),
                        #[allow(unreachable_patterns)]
                        _ => None,
                    }
                }

                fn from_object_mut(obj: &mut Object) -> Option<&mut Self> {
                    match obj {
                        Object::$variant(o) => Some(o),
                        #[allow(unreachable_patterns)]
                        _ => None,
                    }
                }
            }
        )*
    };
}

objects! {
    String(Str),
    Function(Function),
    Closure(Closure),
    Upvalue(Upvalue),
    Class(Class),
    Instance(Instance),
    Native(NativeFunction),
    BoundMethod(BoundMethod),
}

/// FNV-1a, 32 bits.
pub fn hash_str(s: &str) -> u32 {
    let mut hash = 2166136261u32;
    for b in s.bytes() {
        hash ^= b as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

/// An immutable, interned string.
#[derive(Debug)]
pub struct Str {
    chars: Box<str>,
    hash: u32,
}

impl Str {
    pub(crate) fn with_hash(chars: Box<str>, hash: u32) -> Self {
        Str { chars, hash }
    }

    pub fn as_str(&self) -> &str {
        &self.chars
    }

    pub fn hash(&self) -> u32 {
        self.hash
    }

    fn heap_size(&self) -> usize {
        self.chars.len()
    }
}

impl Trace for Str {
    fn trace(&self, _tracer: &mut Tracer<'_>) {}
}

/// A compiled function.
#[derive(Debug)]
pub struct Function {
    /// `None` for the top-level script
    pub name: Option<Gc<Str>>,
    pub arity: u8,
    pub upvalue_count: usize,
    pub chunk: Chunk<Value>,
}

impl Function {
    fn heap_size(&self) -> usize {
        // code bytes plus one line number per byte
        self.chunk.code().len() * (1 + size_of::<u32>())
            + self.chunk.constants().len() * size_of::<Value>()
    }
}

impl Trace for Function {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        self.name.trace(tracer);
        self.chunk.constants().trace(tracer);
    }
}

/// A function together with the variables it captured.
#[derive(Debug)]
pub struct Closure {
    pub function: Gc<Function>,
    pub upvalues: Vec<Gc<Upvalue>>,
}

impl Closure {
    pub fn new(function: Gc<Function>, upvalue_count: usize) -> Self {
        Closure {
            function,
            upvalues: Vec::with_capacity(upvalue_count),
        }
    }

    fn heap_size(&self) -> usize {
        self.upvalues.capacity() * size_of::<Gc<Upvalue>>()
    }
}

impl Trace for Closure {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        self.function.trace(tracer);
        self.upvalues.trace(tracer);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpvalueState {
    /// The variable still lives in this slot of the value stack.
    Open(usize),
    /// The variable has been hoisted out of the stack.
    Closed(Value),
}

/// A captured variable.
#[derive(Debug)]
pub struct Upvalue {
    pub state: UpvalueState,
    /// The next upvalue in the list of open upvalues, ordered by descending stack slot.
    pub next: Option<Gc<Upvalue>>,
}

impl Upvalue {
    pub fn open_slot(&self) -> Option<usize> {
        match self.state {
            UpvalueState::Open(slot) => Some(slot),
            UpvalueState::Closed(_) => None,
        }
    }

    fn heap_size(&self) -> usize {
        0
    }
}

impl Trace for Upvalue {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        if let UpvalueState::Closed(value) = &self.state {
            value.trace(tracer);
        }
        self.next.trace(tracer);
    }
}

#[derive(Debug)]
pub struct Class {
    pub name: Gc<Str>,
    pub methods: Table,
}

impl Class {
    pub fn new(name: Gc<Str>) -> Self {
        Class {
            name,
            methods: Table::new(),
        }
    }

    fn heap_size(&self) -> usize {
        self.methods.heap_size()
    }
}

impl Trace for Class {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        self.name.trace(tracer);
        self.methods.trace(tracer);
    }
}

#[derive(Debug)]
pub struct Instance {
    pub class: Gc<Class>,
    pub fields: Table,
}

impl Instance {
    pub fn new(class: Gc<Class>) -> Self {
        Instance {
            class,
            fields: Table::new(),
        }
    }

    fn heap_size(&self) -> usize {
        self.fields.heap_size()
    }
}

impl Trace for Instance {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        self.class.trace(tracer);
        self.fields.trace(tracer);
    }
}

/// Signature of functions implemented by the host.
pub type NativeFn = fn(&[Value]) -> Value;

pub struct NativeFunction {
    pub name: SmolStr,
    pub arity: u8,
    pub function: NativeFn,
}

impl NativeFunction {
    fn heap_size(&self) -> usize {
        0
    }
}

impl std::fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

impl Trace for NativeFunction {
    fn trace(&self, _tracer: &mut Tracer<'_>) {}
}

/// A method closure bound to the receiver it was read from.
#[derive(Debug)]
pub struct BoundMethod {
    pub receiver: Value,
    pub method: Gc<Closure>,
}

impl BoundMethod {
    fn heap_size(&self) -> usize {
        0
    }
}

impl Trace for BoundMethod {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        self.receiver.trace(tracer);
        self.method.trace(tracer);
    }
}
