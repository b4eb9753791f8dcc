//! Bytecode chunks and the instruction set of the Quill virtual machine.
//!
//! A chunk is built append-only with [`ChunkBuilder`] while compiling, and frozen into a
//! read-only [`Chunk`] before it is executed. The chunk is generic over its constant type,
//! since constants are runtime values owned by the VM's heap.

pub mod disasm;
pub mod inst;

#[cfg(test)]
mod test;

use bytes::{BufMut, Bytes, BytesMut};
use inst::{Inst, InstContainerMut};

pub use disasm::ConstantView;

/// Maximum number of constants inside one chunk. Constant operands are a single byte.
pub const MAX_CONSTANTS: usize = u8::MAX as usize + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ChunkError {
    #[error("Too many constants in one chunk.")]
    TooManyConstants,
    #[error("Too much code to jump over.")]
    JumpTooLarge,
    #[error("Loop body too large.")]
    LoopTooLarge,
}

/// A chunk under construction.
#[derive(Debug)]
pub struct ChunkBuilder<C> {
    code: BytesMut,
    /// Source line of each byte in `code`
    lines: Vec<u32>,
    constants: Vec<C>,
}

impl<C> Default for ChunkBuilder<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> ChunkBuilder<C> {
    pub fn new() -> Self {
        ChunkBuilder {
            code: BytesMut::new(),
            lines: vec![],
            constants: vec![],
        }
    }

    /// Append one byte together with the line it was generated from.
    pub fn write(&mut self, byte: u8, line: u32) {
        self.code.put_u8(byte);
        self.lines.push(line);
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Append a value into the constant pool, returning its index.
    pub fn add_constant(&mut self, value: C) -> Result<u8, ChunkError> {
        let idx = self.constants.len();
        if idx >= MAX_CONSTANTS {
            return Err(ChunkError::TooManyConstants);
        }
        self.constants.push(value);
        Ok(idx as u8)
    }

    pub fn constants(&self) -> &[C] {
        &self.constants
    }

    /// Emit a forward jump with a placeholder offset. Returns the position of the operand,
    /// to be fed into [`Self::patch_jump`] later.
    pub fn emit_jump(&mut self, inst: Inst, line: u32) -> usize {
        debug_assert!(matches!(inst, Inst::Jump | Inst::JumpIfFalse));
        self.emit_u16(inst, u16::MAX, line);
        self.len() - 2
    }

    /// Point the jump operand at `operand` to the current end of code.
    pub fn patch_jump(&mut self, operand: usize) -> Result<(), ChunkError> {
        let jump = self.len() - operand - 2;
        let jump: u16 = jump.try_into().map_err(|_| ChunkError::JumpTooLarge)?;
        self.code[operand..operand + 2].copy_from_slice(&jump.to_be_bytes());
        Ok(())
    }

    /// Emit a backward jump to `loop_start`.
    pub fn emit_loop(&mut self, loop_start: usize, line: u32) -> Result<(), ChunkError> {
        // the offset also skips the operand of the loop instruction itself
        let offset = self.len() - loop_start + 3;
        let offset: u16 = offset.try_into().map_err(|_| ChunkError::LoopTooLarge)?;
        self.emit_u16(Inst::Loop, offset, line);
        Ok(())
    }

    /// Freeze this builder into an executable chunk.
    pub fn finish(self) -> Chunk<C> {
        Chunk {
            code: self.code.freeze(),
            lines: self.lines,
            constants: self.constants,
        }
    }
}

impl<C> InstContainerMut for ChunkBuilder<C> {
    fn write_u8(&mut self, v: u8, line: u32) {
        self.write(v, line)
    }
}

/// A read-only, executable chunk of bytecode.
///
/// The code buffer is reference counted, so call frames hold their own cheap copy of it.
#[derive(Debug, Clone)]
pub struct Chunk<C> {
    code: Bytes,
    lines: Vec<u32>,
    constants: Vec<C>,
}

impl<C> Chunk<C> {
    pub fn code(&self) -> &Bytes {
        &self.code
    }

    /// The source line the byte at `offset` was generated from.
    pub fn line(&self, offset: usize) -> u32 {
        self.lines.get(offset).copied().unwrap_or(0)
    }

    pub fn constants(&self) -> &[C] {
        &self.constants
    }

    pub fn constant(&self, idx: u8) -> &C {
        &self.constants[idx as usize]
    }
}
