use std::fmt::{self, Write};

use bytes::Buf;
use expect_test::expect;
use pretty_assertions::assert_eq;

use crate::inst::{Inst, InstContainer, InstContainerMut, ParamType};
use crate::{Chunk, ChunkBuilder, ChunkError, ConstantView, MAX_CONSTANTS};

#[derive(Debug, Clone, PartialEq)]
enum TestConst {
    Num(f64),
    Func { name: &'static str, upvalues: usize },
}

struct View;

impl ConstantView<TestConst> for View {
    fn fmt_constant(&self, constant: &TestConst, f: &mut dyn Write) -> fmt::Result {
        match constant {
            TestConst::Num(n) => write!(f, "{}", n),
            TestConst::Func { name, .. } => write!(f, "<fn {}>", name),
        }
    }

    fn upvalue_count(&self, constant: &TestConst) -> usize {
        match constant {
            TestConst::Func { upvalues, .. } => *upvalues,
            _ => 0,
        }
    }
}

/// A bare cursor over a chunk, the same way call frames read code.
struct Cursor<'a> {
    code: &'a [u8],
    ip: usize,
}

impl Buf for Cursor<'_> {
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

impl InstContainer for Cursor<'_> {
    fn seek(&mut self, position: usize) {
        self.ip = position
    }

    fn position(&self) -> usize {
        self.ip
    }
}

fn sample_chunk() -> Chunk<TestConst> {
    let mut builder = ChunkBuilder::new();
    let a = builder.add_constant(TestConst::Num(1.5)).unwrap();
    let b = builder.add_constant(TestConst::Num(2.0)).unwrap();
    builder
        .emit_p(Inst::Constant, a, 1)
        .emit_p(Inst::Constant, b, 1)
        .emit(Inst::Add, 1)
        .emit(Inst::Print, 2);
    let jump = builder.emit_jump(Inst::JumpIfFalse, 3);
    builder.emit(Inst::Pop, 3);
    builder.patch_jump(jump).unwrap();
    builder.emit_loop(0, 4).unwrap();

    let f = builder
        .add_constant(TestConst::Func {
            name: "adder",
            upvalues: 2,
        })
        .unwrap();
    builder.emit_p(Inst::Closure, f, 5);
    builder.write(1, 5);
    builder.write(3, 5);
    builder.write(0, 5);
    builder.write(0, 5);
    builder.emit(Inst::Return, 5);
    builder.finish()
}

#[test]
fn test_disassemble() {
    let chunk = sample_chunk();
    let mut out = String::new();
    chunk.disassemble("test", &View, &mut out).unwrap();

    expect![[r#"
        == test ==
        0000    1 Constant            0 '1.5'
        0002    | Constant            1 '2'
        0004    | Add
        0005    2 Print
        0006    3 JumpIfFalse         6 -> 10
        0009    | Pop
        0010    4 Loop               10 -> 0
        0013    5 Closure             2 <fn adder>
        0015      |                     local 3
        0017      |                     upvalue 0
        0019    | Return
    "#]]
    .assert_eq(&out);
}

#[test]
fn test_lines_follow_bytes() {
    let chunk = sample_chunk();
    assert_eq!(chunk.code().len(), 20);
    assert_eq!(chunk.line(0), 1);
    assert_eq!(chunk.line(5), 2);
    assert_eq!(chunk.line(19), 5);
}

#[test]
fn test_read_back_jumps() {
    let chunk = sample_chunk();
    let mut cursor = Cursor {
        code: chunk.code(),
        ip: 6,
    };
    assert_eq!(cursor.read_inst(), Some(Inst::JumpIfFalse));
    let offset = cursor.read_short() as usize;
    assert_eq!(cursor.position() + offset, 10);

    cursor.seek(10);
    assert_eq!(cursor.read_inst(), Some(Inst::Loop));
    let offset = cursor.read_short() as usize;
    assert_eq!(cursor.position() - offset, 0);
}

#[test]
fn test_constant_pool_limit() {
    let mut builder = ChunkBuilder::new();
    for i in 0..MAX_CONSTANTS {
        assert_eq!(builder.add_constant(i), Ok(i as u8));
    }
    assert_eq!(builder.add_constant(0), Err(ChunkError::TooManyConstants));
    assert_eq!(builder.constants().len(), MAX_CONSTANTS);
}

#[test]
fn test_jump_too_large() {
    let mut builder = ChunkBuilder::<()>::new();
    let jump = builder.emit_jump(Inst::Jump, 1);
    for _ in 0..(u16::MAX as usize + 1) {
        builder.emit(Inst::Nil, 1);
    }
    assert_eq!(builder.patch_jump(jump), Err(ChunkError::JumpTooLarge));
    assert_eq!(builder.emit_loop(0, 1), Err(ChunkError::LoopTooLarge));
}

#[test]
fn test_opcode_roundtrip() {
    for byte in 0..=u8::MAX {
        if let Some(inst) = Inst::decode(byte) {
            assert_eq!(inst.ordinal(), byte);
        }
    }
    assert_eq!(Inst::decode(Inst::Method.ordinal() + 1), None);
    assert_eq!(Inst::Invoke.param_type(), Some(ParamType::Invoke));
    assert_eq!(Inst::Return.param_type(), None);
}
