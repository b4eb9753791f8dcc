use bytes::Buf;

use crate::inst::Inst;

/// A cursor over an instruction stream.
///
/// Reading is done through [`Buf`]; operands are raw bytes or big-endian `u16`s.
pub trait InstContainer: Buf {
    /// Move the cursor to an absolute byte offset.
    fn seek(&mut self, position: usize);

    /// The absolute byte offset of the cursor.
    fn position(&self) -> usize;

    fn read_inst(&mut self) -> Option<Inst> {
        Inst::decode(self.get_u8())
    }

    fn read_byte(&mut self) -> u8 {
        self.get_u8()
    }

    fn read_short(&mut self) -> u16 {
        self.get_u16()
    }
}

/// A sink of instructions. Every byte written is tagged with the source line it came from.
pub trait InstContainerMut {
    fn write_u8(&mut self, v: u8, line: u32);

    fn emit(&mut self, i: Inst, line: u32) -> &mut Self {
        self.write_u8(i.ordinal(), line);
        self
    }

    fn emit_p(&mut self, i: Inst, v: u8, line: u32) -> &mut Self {
        self.write_u8(i.ordinal(), line);
        self.write_u8(v, line);
        self
    }

    fn emit_u16(&mut self, i: Inst, v: u16, line: u32) -> &mut Self {
        let [hi, lo] = v.to_be_bytes();
        self.write_u8(i.ordinal(), line);
        self.write_u8(hi, line);
        self.write_u8(lo, line);
        self
    }
}
