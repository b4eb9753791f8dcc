//! Quill, a bytecode interpreter for the Lox scripting language.
//!
//! The [`Interpreter`] ties the compiler and the virtual machine together. Globals and heap
//! objects persist across calls of [`Interpreter::interpret`], so a REPL can feed it one line
//! at a time.

pub mod report;

#[cfg(test)]
mod test;

use std::io::Write;

use quill_codegen::CompileError;
use quill_vm::{RuntimeError, Vm};

pub use quill_vm::VmConfig;

#[derive(Debug, thiserror::Error)]
pub enum InterpretError {
    #[error("{}", join_errors(.0))]
    Compile(Vec<CompileError>),
    #[error("{}", .0.report())]
    Runtime(#[from] RuntimeError),
}

fn join_errors(errors: &[CompileError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Outcome of one [`Interpreter::interpret`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpretResult {
    Ok,
    CompileError,
    RuntimeError,
}

impl InterpretResult {
    /// Conventional process exit status (see `sysexits.h`).
    pub fn exit_code(self) -> i32 {
        match self {
            InterpretResult::Ok => 0,
            InterpretResult::CompileError => 65,
            InterpretResult::RuntimeError => 70,
        }
    }
}

impl From<&Result<(), InterpretError>> for InterpretResult {
    fn from(result: &Result<(), InterpretError>) -> Self {
        match result {
            Ok(()) => InterpretResult::Ok,
            Err(InterpretError::Compile(_)) => InterpretResult::CompileError,
            Err(InterpretError::Runtime(_)) => InterpretResult::RuntimeError,
        }
    }
}

pub struct Interpreter {
    vm: Vm,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new(VmConfig::default())
    }
}

impl Interpreter {
    pub fn new(config: VmConfig) -> Self {
        Interpreter {
            vm: Vm::new(config),
        }
    }

    pub fn vm(&self) -> &Vm {
        &self.vm
    }

    pub fn vm_mut(&mut self) -> &mut Vm {
        &mut self.vm
    }

    /// Compile `source` without running it. Returns the disassembly of the script and every
    /// function nested in it.
    pub fn compile_only(&mut self, source: &str) -> Result<String, Vec<CompileError>> {
        let script = self
            .vm
            .compile_with(|gc, roots| quill_codegen::compile(source, gc, roots))?;

        let gc = self.vm.gc();
        let mut pending = vec![script];
        let mut listing = String::new();
        while let Some(function) = pending.pop() {
            let f = &gc[function];
            let name = f.name.map_or("<script>", |name| gc[name].as_str());
            // writing into a string never fails
            let _ = f.chunk.disassemble(name, gc, &mut listing);
            pending.extend(f.chunk.constants().iter().rev().filter_map(|c| c.as_function()));
        }
        Ok(listing)
    }

    /// Compile and run `source`, writing the output of `print` into `out`.
    pub fn interpret(&mut self, source: &str, out: &mut dyn Write) -> Result<(), InterpretError> {
        let script = self
            .vm
            .compile_with(|gc, roots| quill_codegen::compile(source, gc, roots))
            .map_err(|errors| {
                for e in &errors {
                    tracing::debug!(id = e.id(), line = e.line(), "compile error");
                }
                InterpretError::Compile(errors)
            })?;
        tracing::debug!(
            objects = self.vm.gc().object_count(),
            bytes = self.vm.gc().bytes_allocated(),
            "compiled"
        );
        self.vm.run_script(script, out)?;
        Ok(())
    }
}
