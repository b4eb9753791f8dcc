use bytes::{Buf, Bytes};
use quill_bytecode::inst::InstContainer;

use crate::gc::{Gc, Trace, Tracer};
use crate::object::{Closure, Function};

/// An activation record.
#[derive(Debug)]
pub struct CallFrame {
    /// The closure being executed.
    pub closure: Gc<Closure>,
    /// The function of `closure`, cached.
    pub function: Gc<Function>,
    /// Code of `function`. Shares the buffer of the chunk.
    code: Bytes,
    pub ip: usize,
    /// Index of this frame's slot 0 in the value stack. Slot 0 holds the callee, or the
    /// receiver for methods.
    pub slots: usize,
}

impl CallFrame {
    pub fn new(closure: Gc<Closure>, function: Gc<Function>, code: Bytes, slots: usize) -> Self {
        Self {
            closure,
            function,
            code,
            ip: 0,
            slots,
        }
    }
}

impl Buf for CallFrame {
    fn remaining(&self) -> usize {
        self.code.len() - self.ip
    }

    fn chunk(&self) -> &[u8] {
        &self.code[self.ip..]
    }

    fn advance(&mut self, cnt: usize) {
        self.ip += cnt
    }
}

impl InstContainer for CallFrame {
    fn seek(&mut self, position: usize) {
        self.ip = position
    }

    fn position(&self) -> usize {
        self.ip
    }
}

impl Trace for CallFrame {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        self.closure.trace(tracer)
    }
}
