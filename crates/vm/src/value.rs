use std::fmt::{self, Display};

use crate::gc::alloc::GcAllocator;
use crate::gc::{Gc, GcRef};
use crate::object::{
    BoundMethod, Class, Closure, Function, GcObject, Instance, NativeFunction, Object, Str,
};

/// A value of the language.
///
/// Numbers, booleans and nil are stored inline; everything else is a handle into the heap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Number(f64),
    Object(GcRef),
}

static_assertions::const_assert!(std::mem::size_of::<Value>() <= 16);

impl Default for Value {
    fn default() -> Self {
        Value::Nil
    }
}

impl Value {
    /// The only falsy values are `nil` and `false`.
    pub fn is_falsey(&self) -> bool {
        matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn as_number(&self) -> Option<f64> {
        if let Self::Number(v) = self {
            Some(*v)
        } else {
            None
        }
    }

    pub fn as_object(&self) -> Option<GcRef> {
        if let Self::Object(v) = self {
            Some(*v)
        } else {
            None
        }
    }

    pub fn downcast<T: GcObject>(&self) -> Option<Gc<T>> {
        self.as_object().and_then(GcRef::downcast)
    }

    pub fn as_string(&self) -> Option<Gc<Str>> {
        self.downcast()
    }

    pub fn as_function(&self) -> Option<Gc<Function>> {
        self.downcast()
    }

    pub fn as_closure(&self) -> Option<Gc<Closure>> {
        self.downcast()
    }

    pub fn as_class(&self) -> Option<Gc<Class>> {
        self.downcast()
    }

    pub fn as_instance(&self) -> Option<Gc<Instance>> {
        self.downcast()
    }

    pub fn as_native(&self) -> Option<Gc<NativeFunction>> {
        self.downcast()
    }

    pub fn as_bound_method(&self) -> Option<Gc<BoundMethod>> {
        self.downcast()
    }

    /// Display this value, resolving heap objects through `heap`.
    pub fn display<'a>(&self, heap: &'a GcAllocator) -> ValueDisplay<'a> {
        ValueDisplay { value: *self, heap }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<GcRef> for Value {
    fn from(v: GcRef) -> Self {
        Value::Object(v)
    }
}

impl<T: GcObject> From<Gc<T>> for Value {
    fn from(v: Gc<T>) -> Self {
        Value::Object(v.untyped())
    }
}

pub struct ValueDisplay<'a> {
    value: Value,
    heap: &'a GcAllocator,
}

impl ValueDisplay<'_> {
    fn fmt_function(&self, function: Gc<Function>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.heap[function].name {
            Some(name) => write!(f, "<fn {}>", self.heap[name].as_str()),
            None => write!(f, "<script>"),
        }
    }
}

/// Significant digits of a printed number.
const NUMBER_PRECISION: i32 = 6;

/// Write a number the way C's `%g` does: six significant digits, trailing zeros dropped, and
/// scientific notation for very large or small magnitudes.
fn fmt_number(n: f64, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if n.is_nan() {
        return f.write_str("nan");
    }
    if n.is_infinite() {
        return f.write_str(if n < 0.0 { "-inf" } else { "inf" });
    }
    if n == 0.0 {
        return f.write_str(if n.is_sign_negative() { "-0" } else { "0" });
    }

    // the exponent after rounding to the shown precision
    let sci = format!("{:.*e}", (NUMBER_PRECISION - 1) as usize, n);
    let (mantissa, exp) = sci.split_once('e').expect("Scientific format has an exponent");
    let exp: i32 = exp.parse().expect("Scientific exponent is an integer");

    if exp < -4 || exp >= NUMBER_PRECISION {
        let sign = if exp < 0 { '-' } else { '+' };
        write!(f, "{}e{}{:02}", trim_fraction(mantissa), sign, exp.abs())
    } else {
        let fixed = format!("{:.*}", (NUMBER_PRECISION - 1 - exp) as usize, n);
        f.write_str(trim_fraction(&fixed))
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

impl Display for ValueDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let obj = match self.value {
            Value::Nil => return write!(f, "nil"),
            Value::Bool(b) => return write!(f, "{}", b),
            Value::Number(n) => return fmt_number(n, f),
            Value::Object(obj) => obj,
        };

        match self.heap.object(obj) {
            Object::String(s) => write!(f, "{}", s.as_str()),
            Object::Function(_) => self.fmt_function(Gc::from_key(obj.key()), f),
            Object::Closure(c) => self.fmt_function(c.function, f),
            Object::Upvalue(_) => write!(f, "upvalue"),
            Object::Class(c) => write!(f, "{}", self.heap[c.name].as_str()),
            Object::Instance(i) => {
                let class = &self.heap[i.class];
                write!(f, "{} instance", self.heap[class.name].as_str())
            }
            Object::Native(_) => write!(f, "<native fn>"),
            Object::BoundMethod(b) => {
                let closure = &self.heap[b.method];
                self.fmt_function(closure.function, f)
            }
        }
    }
}
