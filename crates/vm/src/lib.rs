//! The Quill virtual machine: values, the garbage-collected heap, and the bytecode
//! interpreter loop.

pub mod config;
pub mod error;
pub mod gc;
pub mod native;
pub mod object;
pub mod table;
pub mod value;
pub mod vm;

pub use config::VmConfig;
pub use error::{RuntimeError, RuntimeErrorKind, TraceFrame};
pub use gc::alloc::GcAllocator;
pub use gc::{Gc, GcRef, Trace, Tracer};
pub use value::Value;
pub use vm::Vm;
