//! Human-readable listing of chunks.

use std::fmt::{self, Write};

use crate::inst::{Inst, ParamType};
use crate::Chunk;

/// Access to the contents of constants, which live outside the chunk.
pub trait ConstantView<C> {
    /// Write the printed form of a constant.
    fn fmt_constant(&self, constant: &C, f: &mut dyn Write) -> fmt::Result;

    /// Number of upvalues captured by a function constant. Only asked about the operand of
    /// [`Inst::Closure`].
    fn upvalue_count(&self, constant: &C) -> usize;
}

impl<C> Chunk<C> {
    /// Write a listing of the whole chunk under a `== name ==` header.
    pub fn disassemble(
        &self,
        name: &str,
        view: &impl ConstantView<C>,
        f: &mut impl Write,
    ) -> fmt::Result {
        writeln!(f, "== {} ==", name)?;
        let mut offset = 0;
        while offset < self.code.len() {
            offset = self.disassemble_inst(offset, view, f)?;
        }
        Ok(())
    }

    /// Write the instruction at `offset` as one line (more for closures), returning the offset
    /// of the next instruction.
    pub fn disassemble_inst(
        &self,
        offset: usize,
        view: &impl ConstantView<C>,
        f: &mut impl Write,
    ) -> Result<usize, fmt::Error> {
        write!(f, "{:04} ", offset)?;
        if offset > 0 && self.line(offset) == self.line(offset - 1) {
            write!(f, "   | ")?;
        } else {
            write!(f, "{:>4} ", self.line(offset))?;
        }

        let code = &self.code[..];
        let byte = |i: usize| code.get(i).copied().unwrap_or(0);
        let short = |i: usize| u16::from_be_bytes([byte(i), byte(i + 1)]) as usize;

        let inst = match Inst::decode(code[offset]) {
            Some(inst) => inst,
            None => {
                writeln!(f, "Unknown opcode {}", code[offset])?;
                return Ok(offset + 1);
            }
        };

        match inst.param_type() {
            None => {
                writeln!(f, "{}", inst)?;
                Ok(offset + 1)
            }
            Some(ParamType::Byte) => {
                writeln!(f, "{:<16} {:>4}", inst, byte(offset + 1))?;
                Ok(offset + 2)
            }
            Some(ParamType::Const) => {
                let idx = byte(offset + 1);
                write!(f, "{:<16} {:>4} '", inst, idx)?;
                view.fmt_constant(self.constant(idx), f)?;
                writeln!(f, "'")?;
                Ok(offset + 2)
            }
            Some(ParamType::Jump) => {
                let target = offset + 3 + short(offset + 1);
                writeln!(f, "{:<16} {:>4} -> {}", inst, offset, target)?;
                Ok(offset + 3)
            }
            Some(ParamType::Loop) => {
                let target = (offset + 3).saturating_sub(short(offset + 1));
                writeln!(f, "{:<16} {:>4} -> {}", inst, offset, target)?;
                Ok(offset + 3)
            }
            Some(ParamType::Invoke) => {
                let idx = byte(offset + 1);
                let argc = byte(offset + 2);
                write!(f, "{:<16} ({} args) {:>4} '", inst, argc, idx)?;
                view.fmt_constant(self.constant(idx), f)?;
                writeln!(f, "'")?;
                Ok(offset + 3)
            }
            Some(ParamType::Closure) => {
                let idx = byte(offset + 1);
                let func = self.constant(idx);
                write!(f, "{:<16} {:>4} ", inst, idx)?;
                view.fmt_constant(func, f)?;
                writeln!(f)?;

                let mut next = offset + 2;
                for _ in 0..view.upvalue_count(func) {
                    let is_local = byte(next);
                    let index = byte(next + 1);
                    let kind = if is_local != 0 { "local" } else { "upvalue" };
                    writeln!(f, "{:04}      |                     {} {}", next, kind, index)?;
                    next += 2;
                }
                Ok(next)
            }
        }
    }
}
