//! Compiler from Quill source code to bytecode functions living on the VM heap.

mod compiler;
pub mod error;
mod func;
mod parser;
mod pratt_util;
mod scope;


use quill_vm::gc::{Gc, Trace};
use quill_vm::object::Function;
use quill_vm::GcAllocator;

pub use error::{CompileError, ErrorLocation};

/// Compile a whole script into its top-level function.
///
/// Strings and functions are allocated in `gc` as compilation goes, so a collection may run in
/// between. `roots` must report everything the caller needs to keep alive. On failure every
/// error found is returned, in source order.
pub fn compile(
    source: &str,
    gc: &mut GcAllocator,
    roots: &dyn Trace,
) -> Result<Gc<Function>, Vec<CompileError>> {
    compiler::Compiler::new(source, gc, roots).compile()
}
