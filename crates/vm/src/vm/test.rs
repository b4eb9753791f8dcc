use pretty_assertions::assert_eq;
use quill_bytecode::inst::{Inst, InstContainerMut};
use quill_bytecode::ChunkBuilder;
use test_env_log::test;

use crate::config::VmConfig;
use crate::error::{RuntimeError, RuntimeErrorKind, TraceFrame};
use crate::gc::alloc::GcAllocator;
use crate::gc::{Gc, Trace};
use crate::object::Function;
use crate::value::Value;
use crate::vm::Vm;

/// Hand assembly of functions, standing in for the compiler.
struct Assembler<'a> {
    gc: &'a mut GcAllocator,
    roots: &'a dyn Trace,
    chunk: ChunkBuilder<Value>,
    line: u32,
}

impl Assembler<'_> {
    fn line(&mut self, line: u32) -> &mut Self {
        self.line = line;
        self
    }

    fn op(&mut self, inst: Inst) -> &mut Self {
        self.chunk.emit(inst, self.line);
        self
    }

    fn op_byte(&mut self, inst: Inst, byte: u8) -> &mut Self {
        self.chunk.emit_p(inst, byte, self.line);
        self
    }

    fn constant(&mut self, value: Value) -> u8 {
        self.chunk.add_constant(value).unwrap()
    }

    fn number(&mut self, n: f64) -> &mut Self {
        let idx = self.constant(n.into());
        self.op_byte(Inst::Constant, idx)
    }

    fn string(&mut self, s: &str) -> &mut Self {
        self.named(Inst::Constant, s)
    }

    /// An instruction whose operand is a string constant.
    fn named(&mut self, inst: Inst, name: &str) -> &mut Self {
        let name = self
            .gc
            .copy_string(name, &(self.roots, self.chunk.constants()));
        let idx = self.constant(name.into());
        self.op_byte(inst, idx)
    }

    fn closure(&mut self, function: Gc<Function>) -> &mut Self {
        let idx = self.constant(function.into());
        self.op_byte(Inst::Closure, idx)
    }
}

fn assemble(
    vm: &mut Vm,
    name: Option<&str>,
    arity: u8,
    build: impl FnOnce(&mut Assembler),
) -> Gc<Function> {
    vm.compile_with(|gc, roots| {
        let mut asm = Assembler {
            gc,
            roots,
            chunk: ChunkBuilder::new(),
            line: 1,
        };
        build(&mut asm);
        let chunk = asm.chunk.finish();
        let name = name.map(|n| asm.gc.copy_string(n, &(roots, chunk.constants())));
        let pinned = (name, chunk.constants().to_vec());
        let function = Function {
            name,
            arity,
            upvalue_count: 0,
            chunk,
        };
        asm.gc.alloc(function, &(roots, pinned))
    })
}

fn run(vm: &mut Vm, script: Gc<Function>) -> (String, Result<(), RuntimeError>) {
    let mut out = vec![];
    let result = vm.run_script(script, &mut out);
    (String::from_utf8(out).unwrap(), result)
}

#[test]
fn test_arithmetic() {
    let mut vm = Vm::default();
    let script = assemble(&mut vm, None, 0, |a| {
        a.number(1.0)
            .number(2.0)
            .number(3.0)
            .op(Inst::Multiply)
            .op(Inst::Add)
            .op(Inst::Print)
            .number(10.0)
            .number(4.0)
            .op(Inst::Divide)
            .op(Inst::Negate)
            .op(Inst::Print)
            .number(1.0)
            .number(2.0)
            .op(Inst::Less)
            .op(Inst::Not)
            .op(Inst::Print)
            .op(Inst::Nil)
            .op(Inst::Return);
    });
    let (out, result) = run(&mut vm, script);
    result.unwrap();
    assert_eq!(out, "7\n-2.5\nfalse\n");
    assert_eq!(vm.stack_len(), 0);
    assert_eq!(vm.frame_count(), 0);
}

#[test]
fn test_equality() {
    let mut vm = Vm::default();
    let script = assemble(&mut vm, None, 0, |a| {
        // "3" == 3
        a.string("3").number(3.0).op(Inst::Equal).op(Inst::Print);
        // 0 == false
        a.number(0.0).op(Inst::False).op(Inst::Equal).op(Inst::Print);
        // nil == nil
        a.op(Inst::Nil).op(Inst::Nil).op(Inst::Equal).op(Inst::Print);
        // "ab" == "a" + "b"
        a.string("ab")
            .string("a")
            .string("b")
            .op(Inst::Add)
            .op(Inst::Equal)
            .op(Inst::Print);
        a.op(Inst::Nil).op(Inst::Return);
    });
    let (out, result) = run(&mut vm, script);
    result.unwrap();
    assert_eq!(out, "false\nfalse\ntrue\ntrue\n");
}

#[test]
fn test_concatenation_interns_result() {
    let mut vm = Vm::default();
    let script = assemble(&mut vm, None, 0, |a| {
        a.string("foo")
            .string("bar")
            .op(Inst::Add)
            .named(Inst::DefineGlobal, "joined")
            .op(Inst::Nil)
            .op(Inst::Return);
    });
    run(&mut vm, script).1.unwrap();

    let joined = vm.get_global("joined").unwrap();
    assert_eq!(vm.format_value(joined), "foobar");
    assert_eq!(joined.as_string(), vm.gc().interned("foobar"));
}

/// Run `build` as a script on line 3 and expect it to fail there.
fn expect_failure(vm: &mut Vm, build: impl FnOnce(&mut Assembler)) -> RuntimeError {
    let script = assemble(vm, None, 0, |a| {
        a.line(3);
        build(a);
        a.op(Inst::Nil).op(Inst::Return);
    });
    let error = run(vm, script).1.unwrap_err();
    assert_eq!(
        error.trace,
        vec![TraceFrame {
            line: 3,
            function: None
        }]
    );
    assert_eq!(vm.stack_len(), 0, "stack is reset after an error");
    assert_eq!(vm.frame_count(), 0);
    error
}

#[test]
fn test_type_errors() {
    let mut vm = Vm::default();

    let error = expect_failure(&mut vm, |a| {
        a.number(1.0).string("a").op(Inst::Add);
    });
    assert_eq!(
        error.to_string(),
        "Operands must be two numbers or two strings."
    );

    let error = expect_failure(&mut vm, |a| {
        a.string("a").number(1.0).op(Inst::Subtract);
    });
    assert_eq!(error.to_string(), "Left operand must be a number.");

    let error = expect_failure(&mut vm, |a| {
        a.number(1.0).op(Inst::True).op(Inst::Greater);
    });
    assert_eq!(error.to_string(), "Right operand must be a number.");

    let error = expect_failure(&mut vm, |a| {
        a.string("a").op(Inst::Negate);
    });
    assert_eq!(error.to_string(), "Operand must be a number.");

    let error = expect_failure(&mut vm, |a| {
        a.number(1.0).op_byte(Inst::Call, 0);
    });
    assert!(matches!(error.kind, RuntimeErrorKind::NotCallable));
    assert_eq!(error.to_string(), "Can only call functions and classes.");
}

#[test]
fn test_undefined_globals() {
    let mut vm = Vm::default();
    let script = assemble(&mut vm, None, 0, |a| {
        a.named(Inst::GetGlobal, "missing");
    });
    let error = run(&mut vm, script).1.unwrap_err();
    assert_eq!(error.report(), "Undefined variable 'missing'.\n[line 1] in script");

    let script = assemble(&mut vm, None, 0, |a| {
        a.number(1.0).named(Inst::SetGlobal, "missing");
    });
    let error = run(&mut vm, script).1.unwrap_err();
    assert!(matches!(error.kind, RuntimeErrorKind::UndefinedVariable(ref name) if name == "missing"));
    assert_eq!(vm.get_global("missing"), None, "assignment must not define");
}

#[test]
fn test_call_keeps_stack_discipline() {
    let mut vm = Vm::default();
    // fun add(a, b) { return a + b; }
    let add = assemble(&mut vm, Some("add"), 2, |a| {
        a.op_byte(Inst::GetLocal, 1)
            .op_byte(Inst::GetLocal, 2)
            .op(Inst::Add)
            .op(Inst::Return);
    });
    let script = assemble(&mut vm, None, 0, |a| {
        a.number(100.0)
            .closure(add)
            .number(1.0)
            .number(2.0)
            .op_byte(Inst::Call, 2)
            // the stack is [100, 3] now
            .op(Inst::Add)
            .op(Inst::Print)
            .op(Inst::Nil)
            .op(Inst::Return);
    });
    let (out, result) = run(&mut vm, script);
    result.unwrap();
    assert_eq!(out, "103\n");
    assert_eq!(vm.stack_len(), 0);
}

#[test]
fn test_arity_error_leaves_vm_usable() {
    let mut vm = Vm::default();
    let f = assemble(&mut vm, Some("f"), 1, |a| {
        a.op(Inst::Nil).op(Inst::Return);
    });
    let script = assemble(&mut vm, None, 0, |a| {
        a.line(2).closure(f).op_byte(Inst::Call, 0);
    });
    let error = run(&mut vm, script).1.unwrap_err();
    assert!(matches!(
        error.kind,
        RuntimeErrorKind::Arity {
            expected: 1,
            got: 0
        }
    ));
    assert_eq!(error.to_string(), "Expected 1 arguments but got 0.");
    assert_eq!(vm.stack_len(), 0);
    assert_eq!(vm.frame_count(), 0);

    let script = assemble(&mut vm, None, 0, |a| {
        a.closure(f)
            .number(5.0)
            .op_byte(Inst::Call, 1)
            .op(Inst::Print)
            .op(Inst::Nil)
            .op(Inst::Return);
    });
    let (out, result) = run(&mut vm, script);
    result.unwrap();
    assert_eq!(out, "nil\n");
}

#[test]
fn test_stack_overflow() {
    let config = VmConfig::default();
    let frames_max = config.frames_max;
    let mut vm = Vm::new(config);
    // fun f() { f(); }
    let f = assemble(&mut vm, Some("f"), 0, |a| {
        a.line(7)
            .named(Inst::GetGlobal, "f")
            .op_byte(Inst::Call, 0)
            .op(Inst::Pop)
            .op(Inst::Nil)
            .op(Inst::Return);
    });
    let script = assemble(&mut vm, None, 0, |a| {
        a.closure(f)
            .named(Inst::DefineGlobal, "f")
            .named(Inst::GetGlobal, "f")
            .op_byte(Inst::Call, 0)
            .op(Inst::Nil)
            .op(Inst::Return);
    });

    let error = run(&mut vm, script).1.unwrap_err();
    assert!(matches!(error.kind, RuntimeErrorKind::StackOverflow));
    assert_eq!(error.trace.len(), frames_max);
    assert_eq!(error.trace[0].to_string(), "[line 7] in f()");
    assert_eq!(error.trace[frames_max - 1].to_string(), "[line 1] in script");
}

#[test]
fn test_jumps() {
    let mut vm = Vm::default();
    // var i = 0; while (i < 3) { print i; i = i + 1; }
    let script = assemble(&mut vm, None, 0, |a| {
        a.number(0.0);
        let loop_start = a.chunk.len();
        a.op_byte(Inst::GetLocal, 1).number(3.0).op(Inst::Less);
        let exit = a.chunk.emit_jump(Inst::JumpIfFalse, 1);
        a.op(Inst::Pop)
            .op_byte(Inst::GetLocal, 1)
            .op(Inst::Print)
            .op_byte(Inst::GetLocal, 1)
            .number(1.0)
            .op(Inst::Add)
            .op_byte(Inst::SetLocal, 1)
            .op(Inst::Pop);
        a.chunk.emit_loop(loop_start, 1).unwrap();
        a.chunk.patch_jump(exit).unwrap();
        a.op(Inst::Pop).op(Inst::Pop).op(Inst::Nil).op(Inst::Return);
    });
    let (out, result) = run(&mut vm, script);
    result.unwrap();
    assert_eq!(out, "0\n1\n2\n");
}

#[test]
fn test_native_clock() {
    let mut vm = Vm::default();
    let script = assemble(&mut vm, None, 0, |a| {
        a.named(Inst::GetGlobal, "clock")
            .op_byte(Inst::Call, 0)
            .op(Inst::Print)
            .op(Inst::Nil)
            .op(Inst::Return);
    });
    let (out, result) = run(&mut vm, script);
    result.unwrap();
    let seconds: f64 = out.trim().parse().unwrap();
    assert!(seconds > 0.0);
}

#[test]
fn test_globals_survive_collection() {
    let mut vm = Vm::new(VmConfig {
        stress_gc: true,
        ..VmConfig::default()
    });
    let script = assemble(&mut vm, None, 0, |a| {
        a.string("a")
            .string("b")
            .op(Inst::Add)
            .named(Inst::DefineGlobal, "g")
            .op(Inst::Nil)
            .op(Inst::Return);
    });
    run(&mut vm, script).1.unwrap();
    vm.collect_garbage();
    vm.collect_garbage();

    let g = vm.get_global("g").unwrap();
    assert_eq!(vm.format_value(g), "ab");
    assert!(vm.gc().stats().collections > 2);
}

#[test]
fn test_number_display() {
    let vm = Vm::default();
    let cases = [
        (7.0, "7"),
        (-2.5, "-2.5"),
        (100000.0, "100000"),
        (1.0 / 3.0, "0.333333"),
        (123456789.0, "1.23457e+08"),
        (999999.7, "1e+06"),
        (1e23, "1e+23"),
        (0.0001, "0.0001"),
        (0.00001234, "1.234e-05"),
        (-0.0, "-0"),
        (f64::NAN, "nan"),
        (f64::INFINITY, "inf"),
        (f64::NEG_INFINITY, "-inf"),
    ];
    for (n, expected) in cases {
        assert_eq!(vm.format_value(n.into()), expected, "formatting {:?}", n);
    }
}
