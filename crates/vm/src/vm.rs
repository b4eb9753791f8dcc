pub mod frame;
#[cfg(test)]
mod test;

use std::io::Write;

use itertools::Itertools;
use quill_bytecode::inst::{Inst, InstContainer};

use crate::config::VmConfig;
use crate::error::{RuntimeError, RuntimeErrorKind, TraceFrame};
use crate::gc::alloc::GcAllocator;
use crate::gc::{Gc, Trace, Tracer};
use crate::native;
use crate::object::{
    BoundMethod, Class, Closure, Function, GcObject, Instance, NativeFn, NativeFunction, Str,
    Upvalue, UpvalueState,
};
use crate::table::{Symbol, Table};
use crate::value::Value;
use frame::CallFrame;

type Result<T> = std::result::Result<T, RuntimeErrorKind>;

/// Everything a running VM keeps alive.
pub struct VmRoots<'a> {
    stack: &'a [Value],
    frames: &'a [CallFrame],
    globals: &'a Table,
    open_upvalues: Option<Gc<Upvalue>>,
    init_string: Gc<Str>,
}

impl Trace for VmRoots<'_> {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        self.stack.trace(tracer);
        self.frames.trace(tracer);
        self.globals.trace(tracer);
        // the rest of the list is reached through `Upvalue::next`
        self.open_upvalues.trace(tracer);
        self.init_string.trace(tracer);
    }
}

/// A stack-based bytecode virtual machine.
///
/// The heap and the globals persist across calls of [`Vm::run_script`]; the stacks are reset
/// after a runtime error.
pub struct Vm {
    gc: GcAllocator,
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: Table,
    /// Head of the open upvalue list, ordered by descending stack slot.
    open_upvalues: Option<Gc<Upvalue>>,
    init_string: Gc<Str>,
    config: VmConfig,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new(VmConfig::default())
    }
}

impl Vm {
    pub fn new(config: VmConfig) -> Vm {
        let mut gc = GcAllocator::from_config(&config);
        let init_string = gc.copy_string("init", &());
        let mut vm = Vm {
            gc,
            stack: Vec::with_capacity(config.stack_max()),
            frames: Vec::with_capacity(config.frames_max),
            globals: Table::new(),
            open_upvalues: None,
            init_string,
            config,
        };
        native::define_builtins(&mut vm);
        vm
    }

    /// Borrow the allocator together with the current root set.
    fn split(&mut self) -> (&mut GcAllocator, VmRoots<'_>) {
        let roots = VmRoots {
            stack: &self.stack,
            frames: &self.frames,
            globals: &self.globals,
            open_upvalues: self.open_upvalues,
            init_string: self.init_string,
        };
        (&mut self.gc, roots)
    }

    fn alloc<T: GcObject>(&mut self, object: T) -> Gc<T> {
        let (gc, roots) = self.split();
        gc.alloc(object, &roots)
    }

    fn take_string(&mut self, chars: String) -> Gc<Str> {
        let (gc, roots) = self.split();
        gc.take_string(chars, &roots)
    }

    /// Bind a host function to a global name.
    pub fn define_native(&mut self, name: &str, arity: u8, function: NativeFn) {
        let (gc, roots) = self.split();
        let name_str = gc.copy_string(name, &roots);
        let native = NativeFunction {
            name: name.into(),
            arity,
            function,
        };
        let native = gc.alloc(native, &(&roots, name_str));
        let symbol = gc.symbol(name_str);
        self.globals.set(symbol, native.into());
    }

    /// Hand the heap to a front end. Objects reachable from this VM stay alive while `compile`
    /// allocates, as long as it passes the given roots along.
    pub fn compile_with<R>(
        &mut self,
        compile: impl FnOnce(&mut GcAllocator, &dyn Trace) -> R,
    ) -> R {
        let (gc, roots) = self.split();
        compile(gc, &roots)
    }

    /// Execute a compiled top-level function, writing the output of `print` into `out`.
    pub fn run_script(
        &mut self,
        function: Gc<Function>,
        out: &mut dyn Write,
    ) -> std::result::Result<(), RuntimeError> {
        self.push(function.into());
        let closure = self.alloc(Closure::new(function, 0));
        self.pop();
        self.push(closure.into());

        let result = match self.call(closure, 0) {
            Ok(()) => self.run(out),
            Err(e) => Err(e),
        };

        result.map_err(|kind| {
            let error = RuntimeError {
                kind,
                trace: self.stack_trace(),
            };
            tracing::debug!(error = %error, frames = error.trace.len(), "runtime error");
            self.reset_stack();
            error
        })
    }

    /// Run a full collection now.
    pub fn collect_garbage(&mut self) {
        let (gc, roots) = self.split();
        gc.collect_garbage(&roots)
    }

    pub fn gc(&self) -> &GcAllocator {
        &self.gc
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Number of upvalues still pointing into the value stack.
    pub fn open_upvalue_count(&self) -> usize {
        let mut count = 0;
        let mut cur = self.open_upvalues;
        while let Some(upvalue) = cur {
            count += 1;
            cur = self.gc[upvalue].next;
        }
        count
    }

    /// Look up a global by name.
    pub fn get_global(&self, name: &str) -> Option<Value> {
        let name = self.gc.interned(name)?;
        self.globals.get(self.gc.symbol(name))
    }

    /// The printed form of a value.
    pub fn format_value(&self, value: Value) -> String {
        value.display(&self.gc).to_string()
    }

    fn stack_trace(&self) -> Vec<TraceFrame> {
        self.frames
            .iter()
            .rev()
            .map(|frame| {
                let function = &self.gc[frame.function];
                TraceFrame {
                    // the instruction that failed, not the one after it
                    line: function.chunk.line(frame.ip.saturating_sub(1)),
                    function: function
                        .name
                        .map(|name| self.gc[name].as_str().to_owned()),
                }
            })
            .collect()
    }

    fn reset_stack(&mut self) {
        // escaped closures keep the last value of their captured slots
        self.close_upvalues(0);
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues = None;
    }

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("Popping empty stack")
    }

    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    fn frame(&mut self) -> &mut CallFrame {
        self.frames.last_mut().expect("No active call frame")
    }

    fn read_constant(&mut self) -> Value {
        let idx = self.frame().read_byte();
        let function = self.frame().function;
        *self.gc[function].chunk.constant(idx)
    }

    fn read_symbol(&mut self) -> Symbol {
        let name = self
            .read_constant()
            .as_string()
            .expect("Name operand is not a string");
        self.gc.symbol(name)
    }

    fn name_of(&self, symbol: Symbol) -> String {
        self.gc[symbol.string].as_str().to_owned()
    }

    /// Pop two numeric operands.
    fn pop_numbers(&mut self) -> Result<(f64, f64)> {
        match (self.peek(1).as_number(), self.peek(0).as_number()) {
            (Some(a), Some(b)) => {
                self.stack.truncate(self.stack.len() - 2);
                Ok((a, b))
            }
            (None, _) => Err(RuntimeErrorKind::LeftOperandNotNumber),
            (_, None) => Err(RuntimeErrorKind::RightOperandNotNumber),
        }
    }

    fn run(&mut self, out: &mut dyn Write) -> Result<()> {
        macro_rules! binary_op {
            ($wrap:path, $op:tt) => {{
                let (a, b) = self.pop_numbers()?;
                self.push($wrap(a $op b));
            }};
        }

        loop {
            if self.config.trace_execution {
                self.trace_instruction();
            }

            let inst = self
                .frame()
                .read_inst()
                .expect("Malformed bytecode: unknown opcode");

            match inst {
                Inst::Constant => {
                    let constant = self.read_constant();
                    self.push(constant);
                }
                Inst::Nil => self.push(Value::Nil),
                Inst::True => self.push(Value::Bool(true)),
                Inst::False => self.push(Value::Bool(false)),
                Inst::Pop => {
                    self.pop();
                }

                Inst::GetLocal => {
                    let slot = self.frame().read_byte() as usize;
                    let base = self.frame().slots;
                    self.push(self.stack[base + slot]);
                }
                Inst::SetLocal => {
                    let slot = self.frame().read_byte() as usize;
                    let base = self.frame().slots;
                    self.stack[base + slot] = self.peek(0);
                }
                Inst::GetGlobal => {
                    let name = self.read_symbol();
                    match self.globals.get(name) {
                        Some(value) => self.push(value),
                        None => return Err(RuntimeErrorKind::UndefinedVariable(self.name_of(name))),
                    }
                }
                Inst::DefineGlobal => {
                    let name = self.read_symbol();
                    let value = self.peek(0);
                    self.globals.set(name, value);
                    self.pop();
                }
                Inst::SetGlobal => {
                    let name = self.read_symbol();
                    let value = self.peek(0);
                    if self.globals.set(name, value) {
                        // assignment never defines a global
                        self.globals.delete(name);
                        return Err(RuntimeErrorKind::UndefinedVariable(self.name_of(name)));
                    }
                }
                Inst::GetUpvalue => {
                    let slot = self.frame().read_byte() as usize;
                    let closure = self.frame().closure;
                    let upvalue = self.gc[closure].upvalues[slot];
                    let value = match self.gc[upvalue].state {
                        UpvalueState::Open(slot) => self.stack[slot],
                        UpvalueState::Closed(value) => value,
                    };
                    self.push(value);
                }
                Inst::SetUpvalue => {
                    let slot = self.frame().read_byte() as usize;
                    let closure = self.frame().closure;
                    let upvalue = self.gc[closure].upvalues[slot];
                    let value = self.peek(0);
                    let state = self.gc[upvalue].state;
                    match state {
                        UpvalueState::Open(slot) => self.stack[slot] = value,
                        UpvalueState::Closed(_) => {
                            self.gc[upvalue].state = UpvalueState::Closed(value)
                        }
                    }
                }

                Inst::GetProperty => {
                    let name = self.read_symbol();
                    let instance = self
                        .peek(0)
                        .as_instance()
                        .ok_or(RuntimeErrorKind::NotAnInstanceProperty)?;
                    if let Some(value) = self.gc[instance].fields.get(name) {
                        self.pop();
                        self.push(value);
                    } else {
                        let class = self.gc[instance].class;
                        self.bind_method(class, name)?;
                    }
                }
                Inst::SetProperty => {
                    let name = self.read_symbol();
                    let instance = self
                        .peek(1)
                        .as_instance()
                        .ok_or(RuntimeErrorKind::NotAnInstanceField)?;
                    let value = self.peek(0);
                    self.gc[instance].fields.set(name, value);
                    self.pop();
                    self.pop();
                    self.push(value);
                }
                Inst::GetSuper => {
                    let name = self.read_symbol();
                    let superclass = self
                        .pop()
                        .as_class()
                        .expect("Superclass operand is not a class");
                    self.bind_method(superclass, name)?;
                }

                Inst::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(a == b));
                }
                Inst::Greater => binary_op!(Value::Bool, >),
                Inst::Less => binary_op!(Value::Bool, <),
                Inst::Add => {
                    let (a, b) = (self.peek(1), self.peek(0));
                    if let (Some(a), Some(b)) = (a.as_string(), b.as_string()) {
                        self.concatenate(a, b);
                    } else if let (Some(a), Some(b)) = (a.as_number(), b.as_number()) {
                        self.stack.truncate(self.stack.len() - 2);
                        self.push(Value::Number(a + b));
                    } else {
                        return Err(RuntimeErrorKind::BadAddOperands);
                    }
                }
                Inst::Subtract => binary_op!(Value::Number, -),
                Inst::Multiply => binary_op!(Value::Number, *),
                Inst::Divide => binary_op!(Value::Number, /),
                Inst::Not => {
                    let value = self.pop();
                    self.push(Value::Bool(value.is_falsey()));
                }
                Inst::Negate => {
                    let value = self
                        .peek(0)
                        .as_number()
                        .ok_or(RuntimeErrorKind::OperandNotNumber)?;
                    self.pop();
                    self.push(Value::Number(-value));
                }

                Inst::Print => {
                    let value = self.pop();
                    writeln!(out, "{}", value.display(&self.gc))?;
                }

                Inst::Jump => {
                    let offset = self.frame().read_short() as usize;
                    self.frame().ip += offset;
                }
                Inst::JumpIfFalse => {
                    let offset = self.frame().read_short() as usize;
                    if self.peek(0).is_falsey() {
                        self.frame().ip += offset;
                    }
                }
                Inst::Loop => {
                    let offset = self.frame().read_short() as usize;
                    self.frame().ip -= offset;
                }

                Inst::Call => {
                    let argc = self.frame().read_byte();
                    let callee = self.peek(argc as usize);
                    self.call_value(callee, argc)?;
                }
                Inst::Invoke => {
                    let name = self.read_symbol();
                    let argc = self.frame().read_byte();
                    self.invoke(name, argc)?;
                }
                Inst::SuperInvoke => {
                    let name = self.read_symbol();
                    let argc = self.frame().read_byte();
                    let superclass = self
                        .pop()
                        .as_class()
                        .expect("Superclass operand is not a class");
                    self.invoke_from_class(superclass, name, argc)?;
                }
                Inst::Closure => {
                    let function = self
                        .read_constant()
                        .as_function()
                        .expect("Closure operand is not a function");
                    let upvalue_count = self.gc[function].upvalue_count;
                    let closure = self.alloc(Closure::new(function, upvalue_count));
                    self.push(closure.into());

                    for _ in 0..upvalue_count {
                        let is_local = self.frame().read_byte() != 0;
                        let index = self.frame().read_byte() as usize;
                        let upvalue = if is_local {
                            let slot = self.frame().slots + index;
                            self.capture_upvalue(slot)
                        } else {
                            let enclosing = self.frame().closure;
                            self.gc[enclosing].upvalues[index]
                        };
                        self.gc[closure].upvalues.push(upvalue);
                    }
                }
                Inst::CloseUpvalue => {
                    self.close_upvalues(self.stack.len() - 1);
                    self.pop();
                }
                Inst::Return => {
                    let result = self.pop();
                    let frame = self.frames.pop().expect("No active call frame");
                    self.close_upvalues(frame.slots);
                    self.stack.truncate(frame.slots);
                    if self.frames.is_empty() {
                        return Ok(());
                    }
                    self.push(result);
                }

                Inst::Class => {
                    let name = self
                        .read_constant()
                        .as_string()
                        .expect("Name operand is not a string");
                    let class = self.alloc(Class::new(name));
                    self.push(class.into());
                }
                Inst::Inherit => {
                    let superclass = self
                        .peek(1)
                        .as_class()
                        .ok_or(RuntimeErrorKind::SuperclassNotClass)?;
                    let subclass = self
                        .peek(0)
                        .as_class()
                        .expect("Inheriting into a non-class");
                    let methods = self.gc[superclass].methods.clone();
                    methods.add_all(&mut self.gc[subclass].methods);
                    self.pop();
                }
                Inst::Method => {
                    let name = self.read_symbol();
                    let method = self.peek(0);
                    let class = self
                        .peek(1)
                        .as_class()
                        .expect("Defining a method on a non-class");
                    self.gc[class].methods.set(name, method);
                    self.pop();
                }
            }
        }
    }

    fn concatenate(&mut self, a: Gc<Str>, b: Gc<Str>) {
        let chars = [self.gc[a].as_str(), self.gc[b].as_str()].concat();
        // both operands stay on the stack until the result exists
        let result = self.take_string(chars);
        self.stack.truncate(self.stack.len() - 2);
        self.push(result.into());
    }

    fn call_value(&mut self, callee: Value, argc: u8) -> Result<()> {
        let base = self.stack.len() - argc as usize - 1;

        if let Some(closure) = callee.as_closure() {
            self.call(closure, argc)
        } else if let Some(bound) = callee.as_bound_method() {
            let receiver = self.gc[bound].receiver;
            let method = self.gc[bound].method;
            self.stack[base] = receiver;
            self.call(method, argc)
        } else if let Some(class) = callee.as_class() {
            let instance = self.alloc(Instance::new(class));
            self.stack[base] = instance.into();
            let init = self.gc.symbol(self.init_string);
            match self.gc[class].methods.get(init) {
                Some(initializer) => {
                    let initializer = initializer
                        .as_closure()
                        .expect("Initializer is not a closure");
                    self.call(initializer, argc)
                }
                None if argc != 0 => Err(RuntimeErrorKind::Arity {
                    expected: 0,
                    got: argc,
                }),
                None => Ok(()),
            }
        } else if let Some(native) = callee.as_native() {
            let native_fn = &self.gc[native];
            if argc != native_fn.arity {
                return Err(RuntimeErrorKind::Arity {
                    expected: native_fn.arity,
                    got: argc,
                });
            }
            let result = (native_fn.function)(&self.stack[base + 1..]);
            self.stack.truncate(base);
            self.push(result);
            Ok(())
        } else {
            Err(RuntimeErrorKind::NotCallable)
        }
    }

    /// Push a new frame for `closure`, whose arguments are on the stack already.
    fn call(&mut self, closure: Gc<Closure>, argc: u8) -> Result<()> {
        let function = self.gc[closure].function;
        let f = &self.gc[function];
        if argc != f.arity {
            return Err(RuntimeErrorKind::Arity {
                expected: f.arity,
                got: argc,
            });
        }
        if self.frames.len() >= self.config.frames_max
            || self.stack.len() >= self.config.stack_max()
        {
            return Err(RuntimeErrorKind::StackOverflow);
        }

        let code = f.chunk.code().clone();
        let slots = self.stack.len() - argc as usize - 1;
        self.frames
            .push(CallFrame::new(closure, function, code, slots));
        Ok(())
    }

    fn invoke(&mut self, name: Symbol, argc: u8) -> Result<()> {
        let receiver = self.peek(argc as usize);
        let instance = receiver
            .as_instance()
            .ok_or(RuntimeErrorKind::NotAnInstanceMethod)?;

        // a field shadows a method of the same name
        if let Some(field) = self.gc[instance].fields.get(name) {
            let base = self.stack.len() - argc as usize - 1;
            self.stack[base] = field;
            return self.call_value(field, argc);
        }

        let class = self.gc[instance].class;
        self.invoke_from_class(class, name, argc)
    }

    fn invoke_from_class(&mut self, class: Gc<Class>, name: Symbol, argc: u8) -> Result<()> {
        let method = self.find_method(class, name)?;
        self.call(method, argc)
    }

    fn find_method(&self, class: Gc<Class>, name: Symbol) -> Result<Gc<Closure>> {
        self.gc[class]
            .methods
            .get(name)
            .and_then(|method| method.as_closure())
            .ok_or_else(|| RuntimeErrorKind::UndefinedProperty(self.name_of(name)))
    }

    /// Replace the receiver at stack top with its method `name`, bound to it.
    fn bind_method(&mut self, class: Gc<Class>, name: Symbol) -> Result<()> {
        let method = self.find_method(class, name)?;
        let receiver = self.peek(0);
        let bound = self.alloc(BoundMethod { receiver, method });
        self.pop();
        self.push(bound.into());
        Ok(())
    }

    /// Find or create the upvalue for stack slot `slot`.
    fn capture_upvalue(&mut self, slot: usize) -> Gc<Upvalue> {
        let mut prev = None;
        let mut cur = self.open_upvalues;
        while let Some(upvalue) = cur {
            match self.gc[upvalue].open_slot() {
                Some(s) if s > slot => {
                    prev = cur;
                    cur = self.gc[upvalue].next;
                }
                _ => break,
            }
        }

        if let Some(upvalue) = cur {
            if self.gc[upvalue].open_slot() == Some(slot) {
                return upvalue;
            }
        }

        let created = self.alloc(Upvalue {
            state: UpvalueState::Open(slot),
            next: cur,
        });
        match prev {
            Some(prev) => self.gc[prev].next = Some(created),
            None => self.open_upvalues = Some(created),
        }
        created
    }

    /// Close every open upvalue pointing at `last` or any slot above it.
    fn close_upvalues(&mut self, last: usize) {
        while let Some(upvalue) = self.open_upvalues {
            let upvalue = &mut self.gc[upvalue];
            let slot = match upvalue.state {
                UpvalueState::Open(slot) if slot >= last => slot,
                _ => break,
            };
            upvalue.state = UpvalueState::Closed(self.stack[slot]);
            self.open_upvalues = upvalue.next.take();
        }
    }

    fn trace_instruction(&self) {
        let stack = self
            .stack
            .iter()
            .map(|value| format!("[ {} ]", value.display(&self.gc)))
            .join("");
        let frame = match self.frames.last() {
            Some(frame) => frame,
            None => return,
        };
        let mut inst = String::new();
        // writing into a string never fails
        let _ = self.gc[frame.function]
            .chunk
            .disassemble_inst(frame.ip, &self.gc, &mut inst);
        tracing::trace!("          {}", stack);
        tracing::trace!("{}", inst.trim_end());
    }
}
