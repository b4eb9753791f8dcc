use pretty_assertions::assert_eq;
use test_env_log::test;

use crate::report::render_compile_error;
use crate::{InterpretError, InterpretResult, Interpreter, VmConfig};

fn configs() -> [VmConfig; 2] {
    [
        VmConfig::default(),
        VmConfig {
            stress_gc: true,
            ..VmConfig::default()
        },
    ]
}

fn check_output(stress_gc: bool, actual: &str, expected: &str) {
    if actual != expected {
        let diff = colored_diff::PrettyDifference { expected, actual };
        panic!(
            "output mismatch with stress_gc = {} (< expected / > actual):\n{}",
            stress_gc, diff
        );
    }
}

/// Run `source` both normally and with a collection before every allocation.
fn assert_output(source: &str, expected: &str) {
    for config in configs() {
        let stress_gc = config.stress_gc;
        let mut interpreter = Interpreter::new(config);
        let mut out = vec![];
        if let Err(e) = interpreter.interpret(source, &mut out) {
            panic!("program failed with stress_gc = {}: {}", stress_gc, e);
        }
        check_output(stress_gc, &String::from_utf8(out).unwrap(), expected);
    }
}

/// Run `source` expecting a runtime error, returning its report. Output before the error must
/// match `expected_output`.
fn runtime_error(source: &str, expected_output: &str) -> String {
    let mut reports = vec![];
    for config in configs() {
        let stress_gc = config.stress_gc;
        let mut interpreter = Interpreter::new(config);
        let mut out = vec![];
        let result = interpreter.interpret(source, &mut out);
        check_output(stress_gc, &String::from_utf8(out).unwrap(), expected_output);
        assert_eq!(InterpretResult::from(&result), InterpretResult::RuntimeError);
        match result {
            Err(InterpretError::Runtime(e)) => reports.push(e.report()),
            other => panic!("expected a runtime error, got {:?}", other),
        }
        assert_eq!(interpreter.vm().stack_len(), 0);
        assert_eq!(interpreter.vm().frame_count(), 0);
    }
    assert_eq!(reports[0], reports[1]);
    reports.remove(0)
}

#[test]
fn test_closure_counter() {
    assert_output(
        r#"
fun makeCounter() {
  var count = 0;
  fun counter() {
    count = count + 1;
    print count;
  }
  return counter;
}
var c = makeCounter();
c();
c();
"#,
        "1\n2\n",
    );
}

#[test]
fn test_sibling_closures_share_upvalue() {
    assert_output(
        r#"
var get;
var set;
fun make() {
  var x = "before";
  fun g() { print x; }
  fun s() { x = "after"; }
  get = g;
  set = s;
}
make();
get();
set();
get();
"#,
        "before\nafter\n",
    );
}

#[test]
fn test_closed_upvalue_per_iteration() {
    assert_output(
        r#"
var fs0;
var fs1;
for (var i = 0; i < 2; i = i + 1) {
  var j = i;
  fun f() { print j; }
  if (j == 0) fs0 = f; else fs1 = f;
}
fs0();
fs1();
"#,
        "0\n1\n",
    );
}

#[test]
fn test_arithmetic_and_equality() {
    assert_output(
        r#"
print 1 + 2 == 3;
print "a" + "b" == "ab";
print "3" == 3;
print 0 == false;
print nil == nil;
print 10 / 4;
print -(3 - 5) * 2;
print !nil;
print 2 >= 2;
print 1 != 1;
"#,
        "true\ntrue\nfalse\nfalse\ntrue\n2.5\n4\ntrue\ntrue\nfalse\n",
    );
}

#[test]
fn test_number_printing() {
    assert_output(
        r#"
print 1 / 3;
print 1000000 * 1000000;
print 0 / 0;
print -1 / 0;
"#,
        "0.333333\n1e+12\nnan\n-inf\n",
    );
}

#[test]
fn test_strings() {
    let expected = format!("foobar\ntrue\n{}\n", "x".repeat(50));
    assert_output(
        r#"
var a = "foo";
var b = a + "bar";
print b;
print b == "foobar";
var s = "";
for (var i = 0; i < 50; i = i + 1) s = s + "x";
print s;
"#,
        &expected,
    );
}

#[test]
fn test_control_flow() {
    assert_output(
        r#"
var sum = 0;
for (var i = 1; i <= 10; i = i + 1) sum = sum + i;
print sum;
var n = 0;
while (n < 3) n = n + 1;
print n;
if (n == 3) print "three"; else print "other";
if (nil) print "unreachable";
print nil or "default";
print 1 and 2;
print false and 1;
"#,
        "55\n3\nthree\ndefault\n2\nfalse\n",
    );
}

#[test]
fn test_scoping() {
    assert_output(
        r#"
var a = "global";
{
  var a = "outer";
  {
    var a = "inner";
    print a;
  }
  print a;
}
print a;
"#,
        "inner\nouter\nglobal\n",
    );
}

#[test]
fn test_functions() {
    assert_output(
        r#"
fun fib(n) {
  if (n < 2) return n;
  return fib(n - 1) + fib(n - 2);
}
print fib(15);
fun noReturn() {}
print noReturn();
print fib;
print clock;
"#,
        "610\nnil\n<fn fib>\n<native fn>\n",
    );
}

#[test]
fn test_classes() {
    assert_output(
        r#"
class Point {
  init(x, y) {
    this.x = x;
    this.y = y;
  }
  sum() { return this.x + this.y; }
}
var p = Point(1, 2);
print p.sum();
print p;
print Point;
var m = p.sum;
print m();
p.x = 10;
print m();
print p.init(3, 4).x;
"#,
        "3\nPoint instance\nPoint\n3\n12\n3\n",
    );
}

#[test]
fn test_fields_shadow_methods() {
    assert_output(
        r#"
class C {
  f() { return "method"; }
}
var c = C();
print c.f();
fun g() { return "field"; }
c.f = g;
print c.f();
"#,
        "method\nfield\n",
    );
}

#[test]
fn test_inheritance_and_super() {
    assert_output(
        r#"
class A {
  method() { print "A method"; }
  name() { return "A"; }
}
class B < A {
  method() {
    print "B method";
    super.method();
  }
  test() {
    var f = super.name;
    print f();
  }
}
B().method();
B().test();

class Base {
  init(v) { this.v = v; }
}
class Derived < Base {}
print Derived(7).v;
"#,
        "B method\nA method\nA\n7\n",
    );
}

#[test]
fn test_garbage_heavy_program() {
    assert_output(
        r#"
class Pair {
  init(a, b) { this.a = a; this.b = b; }
  sum() { return this.a + this.b; }
}
var total = 0;
for (var i = 0; i < 200; i = i + 1) {
  var p = Pair(i, 1);
  var f = p.sum;
  total = total + f();
}
print total;
"#,
        "20100\n",
    );
}

#[test]
fn test_runtime_error_trace() {
    let report = runtime_error(
        r#"fun a() { b(); }
fun b() { c(); }
fun c() {
  print "in c";
  return 1 + nil;
}
a();"#,
        "in c\n",
    );
    assert_eq!(
        report,
        "Operands must be two numbers or two strings.\n\
         [line 5] in c()\n\
         [line 2] in b()\n\
         [line 1] in a()\n\
         [line 7] in script"
    );
}

#[test]
fn test_runtime_errors() {
    let cases = [
        ("print -\"a\";", "Operand must be a number."),
        ("print 1 < \"a\";", "Right operand must be a number."),
        ("print missing;", "Undefined variable 'missing'."),
        ("missing = 1;", "Undefined variable 'missing'."),
        ("class A {} print A().x;", "Undefined property 'x'."),
        ("var n = 1; print n.x;", "Only instances have properties."),
        ("var a = 1; a.x = 2;", "Only instances have fields."),
        ("\"str\".len();", "Only instances have methods."),
        ("var x = 1; x();", "Can only call functions and classes."),
        ("var NotClass = 1; class A < NotClass {}", "Superclass must be a class."),
        ("class A {} A(1);", "Expected 0 arguments but got 1."),
        ("clock(1);", "Expected 0 arguments but got 1."),
        ("fun f() { f(); } f();", "Stack overflow."),
    ];
    for (source, message) in cases {
        let report = runtime_error(source, "");
        assert_eq!(report.lines().next(), Some(message), "in {:?}", source);
    }
}

#[test]
fn test_arity_error_leaves_vm_usable() {
    for config in configs() {
        let mut interpreter = Interpreter::new(config);
        let mut out = vec![];

        let result = interpreter.interpret("fun f(a) { return a; }\nf();", &mut out);
        match result {
            Err(InterpretError::Runtime(e)) => {
                assert_eq!(e.to_string(), "Expected 1 arguments but got 0.")
            }
            other => panic!("expected an arity error, got {:?}", other),
        }

        interpreter
            .interpret("print f(\"ok\");", &mut out)
            .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "ok\n");
    }
}

#[test]
fn test_escaped_closure_survives_runtime_error() {
    for config in configs() {
        let mut interpreter = Interpreter::new(config);
        let mut out = vec![];

        let result = interpreter.interpret(
            r#"
var f;
fun outer() {
  var x = "captured";
  fun g() { print x; }
  f = g;
  nope();
}
outer();
"#,
            &mut out,
        );
        match result {
            Err(InterpretError::Runtime(e)) => {
                assert_eq!(e.to_string(), "Undefined variable 'nope'.")
            }
            other => panic!("expected a runtime error, got {:?}", other),
        }
        assert_eq!(interpreter.vm().stack_len(), 0);
        assert_eq!(interpreter.vm().frame_count(), 0);
        assert_eq!(interpreter.vm().open_upvalue_count(), 0);

        interpreter.vm_mut().collect_garbage();
        interpreter.interpret("f();", &mut out).unwrap();
        // the stack is taller than the captured slot here
        interpreter
            .interpret("fun h(a, b, c) { f(); } h(1, 2, 3);", &mut out)
            .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "captured\ncaptured\n");
    }
}

#[test]
fn test_escaped_closure_assigns_after_runtime_error() {
    for config in configs() {
        let mut interpreter = Interpreter::new(config);
        let mut out = vec![];

        let result = interpreter.interpret(
            r#"
var get;
var set;
fun outer() {
  var x = 1;
  fun g() { return x; }
  fun s(v) { x = v; }
  get = g;
  set = s;
  return 1 + nil;
}
outer();
"#,
            &mut out,
        );
        assert_eq!(InterpretResult::from(&result), InterpretResult::RuntimeError);
        assert_eq!(interpreter.vm().open_upvalue_count(), 0);

        interpreter
            .interpret("fun h(a, b) { set(a + b); } h(20, 22); print get();", &mut out)
            .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "42\n");
    }
}

#[test]
fn test_globals_persist_across_calls() {
    for config in configs() {
        let mut interpreter = Interpreter::new(config);
        let mut out = vec![];
        interpreter
            .interpret("var x = 1; var s = \"a\" + \"b\";", &mut out)
            .unwrap();
        interpreter.vm_mut().collect_garbage();
        interpreter
            .interpret("x = x + 1; print x; print s;", &mut out)
            .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "2\nab\n");
    }
}

#[test]
fn test_compile_error_result() {
    let mut interpreter = Interpreter::default();
    let mut out = vec![];
    let result = interpreter.interpret("print 1 +;\nprint 2;", &mut out);
    assert_eq!(InterpretResult::from(&result), InterpretResult::CompileError);
    assert_eq!(InterpretResult::CompileError.exit_code(), 65);
    assert_eq!(InterpretResult::RuntimeError.exit_code(), 70);
    assert_eq!(
        result.unwrap_err().to_string(),
        "[line 1] Error at ';': Expect expression."
    );
    assert!(out.is_empty(), "nothing runs after a compile error");
}

#[test]
fn test_compile_only_lists_nested_functions() {
    let mut interpreter = Interpreter::default();
    let listing = interpreter
        .compile_only("fun f() { return 1; }\nprint f();")
        .unwrap();
    assert!(listing.starts_with("== <script> ==\n"));
    assert!(listing.contains("== f ==\n"));
}

fn render(source: &str) -> String {
    let mut interpreter = Interpreter::default();
    match interpreter.interpret(source, &mut vec![]) {
        Err(InterpretError::Compile(errors)) => render_compile_error(source, &errors[0]),
        other => panic!("expected a compile error, got {:?}", other),
    }
}

#[test]
fn test_render_compile_error() {
    assert_eq!(
        render("print 1 +;"),
        "[line 1] Error at ';': Expect expression.\n  |\n1 | print 1 +;\n  |          ^"
    );
    assert_eq!(
        render("print 1"),
        "[line 1] Error at end: Expect ';' after value.\n  |\n1 | print 1\n  |        ^"
    );
    assert_eq!(
        render("var a = 1;\nprint @;"),
        "[line 2] Error: Unexpected character.\n  |\n2 | print @;\n  |       ^"
    );
    assert_eq!(
        render("var abc = 1;\nabc + 1 = 2;"),
        "[line 2] Error at '=': Invalid assignment target.\n  |\n2 | abc + 1 = 2;\n  |         ^"
    );
}

#[test]
fn test_render_uses_display_width() {
    assert_eq!(
        render("print \"日本語\" + ;"),
        "[line 1] Error at ';': Expect expression.\n  |\n1 | print \"日本語\" + ;\n  |                  ^"
    );
    assert_eq!(
        render("print (1 + missing;"),
        "[line 1] Error at ';': Expect ')' after expression.\n  |\n1 | print (1 + missing;\n  |                   ^"
    );
}
