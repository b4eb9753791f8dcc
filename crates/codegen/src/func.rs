use fnv::FnvHashMap;
use quill_bytecode::inst::InstContainerMut;
use quill_bytecode::{ChunkBuilder, ChunkError};
use quill_vm::gc::{Gc, Trace, Tracer};
use quill_vm::object::{Function, Str};
use quill_vm::Value;
use smol_str::SmolStr;

use crate::scope::{ScopeBuilder, ScopeType};

/// The context used when building a function
#[derive(Debug)]
pub struct FunctionCompileCtx {
    name: Option<Gc<Str>>,
    arity: u8,
    chunk: ChunkBuilder<Value>,
    pub scope: ScopeBuilder,
    /// Constant slots of names already referenced by this function
    identifiers: FnvHashMap<SmolStr, u8>,
}

impl FunctionCompileCtx {
    pub fn new(ty: ScopeType, name: Option<Gc<Str>>) -> Self {
        FunctionCompileCtx {
            name,
            arity: 0,
            chunk: ChunkBuilder::new(),
            scope: ScopeBuilder::new(ty),
            identifiers: FnvHashMap::default(),
        }
    }

    pub fn ty(&self) -> ScopeType {
        self.scope.ty()
    }

    /// Count one more parameter. Returns `false` once the count no longer fits an operand.
    pub fn add_param(&mut self) -> bool {
        match self.arity.checked_add(1) {
            Some(arity) => {
                self.arity = arity;
                true
            }
            None => false,
        }
    }

    pub fn chunk(&mut self) -> &mut ChunkBuilder<Value> {
        &mut self.chunk
    }

    pub fn code_len(&self) -> usize {
        self.chunk.len()
    }

    pub fn add_constant(&mut self, value: Value) -> Result<u8, ChunkError> {
        self.chunk.add_constant(value)
    }

    /// The constant slot already holding identifier `name`, if any.
    pub fn identifier(&self, name: &str) -> Option<u8> {
        self.identifiers.get(name).copied()
    }

    pub fn add_identifier(&mut self, name: &str, string: Gc<Str>) -> Result<u8, ChunkError> {
        let idx = self.chunk.add_constant(string.into())?;
        self.identifiers.insert(name.into(), idx);
        Ok(idx)
    }

    /// The implicit return at the end of the body.
    pub fn emit_return(&mut self, line: u32) {
        use quill_bytecode::inst::Inst;
        if self.ty() == ScopeType::Initializer {
            self.chunk.emit_p(Inst::GetLocal, 0, line);
        } else {
            self.chunk.emit(Inst::Nil, line);
        }
        self.chunk.emit(Inst::Return, line);
    }

    /// Freeze into a function object, not yet placed on the heap.
    pub fn finish(self) -> (Function, ScopeBuilder) {
        let function = Function {
            name: self.name,
            arity: self.arity,
            upvalue_count: self.scope.upvalues().len(),
            chunk: self.chunk.finish(),
        };
        (function, self.scope)
    }
}

impl Trace for FunctionCompileCtx {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        self.name.trace(tracer);
        self.chunk.constants().trace(tracer);
    }
}
