//! Single-pass compilation from tokens to bytecode.
//!
//! Expressions are parsed with a Pratt parser (see [`crate::pratt_util`]) and emitted as soon as
//! they are recognized. Nested function declarations push a new [`FunctionCompileCtx`] onto the
//! function stack, and are popped into heap objects when their body ends.

use quill_bytecode::inst::{Inst, InstContainerMut};
use quill_syn::{Token, TokenKind};
use quill_vm::gc::{Gc, Trace, Tracer};
use quill_vm::object::{Function, Str};
use quill_vm::{GcAllocator, Value};
use vec1::Vec1;

use crate::error::CompileError;
use crate::func::FunctionCompileCtx;
use crate::parser::Parser;
use crate::pratt_util::{infix_precedence, Precedence};
use crate::scope::{ScopeType, UpValueCapture, UpValueKind};

/// What must survive a collection triggered while compiling: whatever the host needs, plus
/// every function under construction.
struct CompilerRoots<'a> {
    host: &'a dyn Trace,
    functions: &'a [FunctionCompileCtx],
}

impl Trace for CompilerRoots<'_> {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        self.host.trace(tracer);
        self.functions.trace(tracer);
    }
}

#[derive(Debug)]
struct ClassCompileCtx {
    has_superclass: bool,
}

pub struct Compiler<'src, 'gc> {
    parser: Parser<'src>,
    gc: &'gc mut GcAllocator,
    /// Objects of the host that must outlive compilation.
    roots: &'gc dyn Trace,
    /// Functions being compiled, innermost last. The script is at the bottom.
    functions: Vec1<FunctionCompileCtx>,
    classes: Vec<ClassCompileCtx>,
}

impl<'src, 'gc> Compiler<'src, 'gc> {
    pub fn new(source: &'src str, gc: &'gc mut GcAllocator, roots: &'gc dyn Trace) -> Self {
        Compiler {
            parser: Parser::new(source),
            gc,
            roots,
            functions: Vec1::new(FunctionCompileCtx::new(ScopeType::Script, None)),
            classes: vec![],
        }
    }

    pub fn compile(mut self) -> Result<Gc<Function>, Vec<CompileError>> {
        self.parser.advance();
        while !self.parser.match_token(TokenKind::Eof) {
            self.declaration();
        }
        self.emit_return();

        if self.parser.had_error() {
            return Err(self.parser.finish());
        }

        let Compiler {
            gc,
            roots,
            functions,
            ..
        } = self;
        let script = functions
            .into_iter()
            .next()
            .expect("function stack is never empty");
        let (function, _) = script.finish();
        Ok(alloc_function(gc, roots, function))
    }

    fn current(&mut self) -> &mut FunctionCompileCtx {
        self.functions.last_mut()
    }

    fn ty(&self) -> ScopeType {
        self.functions.last().ty()
    }

    // === Emitting ===

    fn line(&self) -> u32 {
        self.parser.previous.line
    }

    fn emit(&mut self, inst: Inst) {
        let line = self.line();
        self.current().chunk().emit(inst, line);
    }

    fn emit_p(&mut self, inst: Inst, param: u8) {
        let line = self.line();
        self.current().chunk().emit_p(inst, param, line);
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.line();
        self.current().chunk().write(byte, line);
    }

    fn emit_return(&mut self) {
        let line = self.line();
        self.current().emit_return(line);
    }

    fn emit_jump(&mut self, inst: Inst) -> usize {
        let line = self.line();
        self.current().chunk().emit_jump(inst, line)
    }

    fn patch_jump(&mut self, operand: usize) {
        if let Err(e) = self.current().chunk().patch_jump(operand) {
            self.parser.error(e.to_string());
        }
    }

    fn emit_loop(&mut self, loop_start: usize) {
        let line = self.line();
        if let Err(e) = self.current().chunk().emit_loop(loop_start, line) {
            self.parser.error(e.to_string());
        }
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        match self.current().add_constant(value) {
            Ok(idx) => idx,
            Err(e) => {
                self.parser.error(e.to_string());
                0
            }
        }
    }

    fn emit_constant(&mut self, value: Value) {
        let idx = self.make_constant(value);
        self.emit_p(Inst::Constant, idx);
    }

    /// Intern a string. Every function under construction is kept alive meanwhile.
    fn copy_string(&mut self, chars: &str) -> Gc<Str> {
        let roots = CompilerRoots {
            host: self.roots,
            functions: self.functions.as_slice(),
        };
        self.gc.copy_string(chars, &roots)
    }

    fn identifier_constant(&mut self, name: &str) -> u8 {
        if let Some(idx) = self.functions.last().identifier(name) {
            return idx;
        }
        let string = self.copy_string(name);
        match self.current().add_identifier(name, string) {
            Ok(idx) => idx,
            Err(e) => {
                self.parser.error(e.to_string());
                0
            }
        }
    }

    // === Variables ===

    fn begin_scope(&mut self) {
        self.current().scope.new_scope();
    }

    fn end_scope(&mut self) {
        let popped = self.current().scope.pop_scope();
        for captured in popped {
            if captured {
                self.emit(Inst::CloseUpvalue);
            } else {
                self.emit(Inst::Pop);
            }
        }
    }

    fn add_local(&mut self, name: &str) {
        if let Err(e) = self.current().scope.insert(name) {
            self.parser.error(e.message());
        }
    }

    fn declare_variable(&mut self) {
        if self.current().scope.is_global() {
            return;
        }
        let name = self.parser.previous.lexeme;
        if self.current().scope.declared_in_current_scope(name) {
            self.parser
                .error("Already a variable with this name in this scope.");
        }
        self.add_local(name);
    }

    /// Parse a variable name, returning the constant slot of its name for globals.
    fn parse_variable(&mut self, message: &'static str) -> u8 {
        self.parser.consume(TokenKind::Identifier, message);
        self.declare_variable();
        if !self.current().scope.is_global() {
            return 0;
        }
        let name = self.parser.previous.lexeme;
        self.identifier_constant(name)
    }

    fn define_variable(&mut self, global: u8) {
        if !self.current().scope.is_global() {
            self.current().scope.mark_initialized();
            return;
        }
        self.emit_p(Inst::DefineGlobal, global);
    }

    fn resolve_local(&mut self, level: usize, name: &str) -> Option<u8> {
        let (slot, initialized) = self.functions[level].scope.get_local(name)?;
        if !initialized {
            self.parser
                .error("Can't read local variable in its own initializer.");
        }
        Some(slot)
    }

    fn resolve_upvalue(&mut self, level: usize, name: &str) -> Option<u8> {
        if level == 0 {
            return None;
        }
        let enclosing = level - 1;

        if let Some(slot) = self.resolve_local(enclosing, name) {
            self.functions[enclosing].scope.set_captured(slot);
            return Some(self.add_upvalue(
                level,
                UpValueCapture {
                    kind: UpValueKind::Capture,
                    index: slot,
                },
            ));
        }

        let index = self.resolve_upvalue(enclosing, name)?;
        Some(self.add_upvalue(
            level,
            UpValueCapture {
                kind: UpValueKind::Copy,
                index,
            },
        ))
    }

    fn add_upvalue(&mut self, level: usize, capture: UpValueCapture) -> u8 {
        match self.functions[level].scope.add_upvalue(capture) {
            Ok(idx) => idx,
            Err(e) => {
                self.parser.error(e.message());
                0
            }
        }
    }

    fn named_variable(&mut self, name: Token, can_assign: bool) {
        let level = self.functions.len() - 1;
        let (get, set, arg) = if let Some(slot) = self.resolve_local(level, name.lexeme) {
            (Inst::GetLocal, Inst::SetLocal, slot)
        } else if let Some(idx) = self.resolve_upvalue(level, name.lexeme) {
            (Inst::GetUpvalue, Inst::SetUpvalue, idx)
        } else {
            let idx = self.identifier_constant(name.lexeme);
            (Inst::GetGlobal, Inst::SetGlobal, idx)
        };

        if can_assign && self.parser.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_p(set, arg);
        } else {
            self.emit_p(get, arg);
        }
    }

    // === Declarations ===

    fn declaration(&mut self) {
        if self.parser.match_token(TokenKind::Class) {
            self.class_declaration();
        } else if self.parser.match_token(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.parser.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }

        if self.parser.panic_mode() {
            self.parser.synchronize();
        }
    }

    fn class_declaration(&mut self) {
        self.parser
            .consume(TokenKind::Identifier, "Expect class name.");
        let class_name = self.parser.previous;
        let name_constant = self.identifier_constant(class_name.lexeme);
        self.declare_variable();

        self.emit_p(Inst::Class, name_constant);
        self.define_variable(name_constant);

        self.classes.push(ClassCompileCtx {
            has_superclass: false,
        });

        if self.parser.match_token(TokenKind::Less) {
            self.parser
                .consume(TokenKind::Identifier, "Expect superclass name.");
            self.variable(false);
            if class_name.lexeme == self.parser.previous.lexeme {
                self.parser.error("A class can't inherit from itself.");
            }

            // `super` lives in a scope wrapping the methods, so every method captures it
            self.begin_scope();
            self.add_local("super");
            self.define_variable(0);

            self.named_variable(class_name, false);
            self.emit(Inst::Inherit);
            if let Some(class) = self.classes.last_mut() {
                class.has_superclass = true;
            }
        }

        self.named_variable(class_name, false);
        self.parser
            .consume(TokenKind::LeftBrace, "Expect '{' before class body.");
        while !self.parser.check(TokenKind::RightBrace) && !self.parser.check(TokenKind::Eof) {
            self.method();
        }
        self.parser
            .consume(TokenKind::RightBrace, "Expect '}' after class body.");
        self.emit(Inst::Pop);

        if let Some(class) = self.classes.pop() {
            if class.has_superclass {
                self.end_scope();
            }
        }
    }

    fn method(&mut self) {
        self.parser
            .consume(TokenKind::Identifier, "Expect method name.");
        let name = self.parser.previous.lexeme;
        let constant = self.identifier_constant(name);
        let ty = if name == "init" {
            ScopeType::Initializer
        } else {
            ScopeType::Method
        };
        self.function(ty);
        self.emit_p(Inst::Method, constant);
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        // a function may refer to itself
        self.current().scope.mark_initialized();
        self.function(ScopeType::Function);
        self.define_variable(global);
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");

        if self.parser.match_token(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit(Inst::Nil);
        }
        self.parser.consume(
            TokenKind::Semicolon,
            "Expect ';' after variable declaration.",
        );

        self.define_variable(global);
    }

    /// Compile a function body following its name, leaving the closure on stack top.
    fn function(&mut self, ty: ScopeType) {
        let name = self.copy_string(self.parser.previous.lexeme);
        self.functions
            .push(FunctionCompileCtx::new(ty, Some(name)));
        self.begin_scope();

        self.parser
            .consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.parser.check(TokenKind::RightParen) {
            loop {
                if !self.current().add_param() {
                    self.parser
                        .error_at_current("Can't have more than 255 parameters.");
                }
                let constant = self.parse_variable("Expect parameter name.");
                self.define_variable(constant);
                if !self.parser.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.parser
            .consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.parser
            .consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        // no end_scope: the frame is discarded as a whole on return
        self.emit_return();
        let ctx = self
            .functions
            .pop()
            .expect("Popping the top-level script");
        let (function, scope) = ctx.finish();
        let roots = CompilerRoots {
            host: self.roots,
            functions: self.functions.as_slice(),
        };
        let function = alloc_function(self.gc, &roots, function);

        let constant = self.make_constant(function.into());
        self.emit_p(Inst::Closure, constant);
        for upvalue in scope.upvalues() {
            self.emit_byte((upvalue.kind == UpValueKind::Capture) as u8);
            self.emit_byte(upvalue.index);
        }
    }

    // === Statements ===

    fn statement(&mut self) {
        if self.parser.match_token(TokenKind::Print) {
            self.print_statement();
        } else if self.parser.match_token(TokenKind::For) {
            self.for_statement();
        } else if self.parser.match_token(TokenKind::If) {
            self.if_statement();
        } else if self.parser.match_token(TokenKind::Return) {
            self.return_statement();
        } else if self.parser.match_token(TokenKind::While) {
            self.while_statement();
        } else if self.parser.match_token(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn block(&mut self) {
        while !self.parser.check(TokenKind::RightBrace) && !self.parser.check(TokenKind::Eof) {
            self.declaration();
        }
        self.parser
            .consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn print_statement(&mut self) {
        self.expression();
        self.parser
            .consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit(Inst::Print);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.parser
            .consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit(Inst::Pop);
    }

    fn if_statement(&mut self) {
        self.parser
            .consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.parser
            .consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(Inst::JumpIfFalse);
        self.emit(Inst::Pop);
        self.statement();

        let else_jump = self.emit_jump(Inst::Jump);
        self.patch_jump(then_jump);
        self.emit(Inst::Pop);

        if self.parser.match_token(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.current().code_len();
        self.parser
            .consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.parser
            .consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(Inst::JumpIfFalse);
        self.emit(Inst::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit(Inst::Pop);
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.parser
            .consume(TokenKind::LeftParen, "Expect '(' after 'for'.");
        if self.parser.match_token(TokenKind::Semicolon) {
            // no initializer
        } else if self.parser.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.current().code_len();
        let mut exit_jump = None;
        if !self.parser.match_token(TokenKind::Semicolon) {
            self.expression();
            self.parser
                .consume(TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(Inst::JumpIfFalse));
            self.emit(Inst::Pop);
        }

        if !self.parser.match_token(TokenKind::RightParen) {
            // the increment runs after the body, so jump over it now and loop back to it later
            let body_jump = self.emit_jump(Inst::Jump);
            let increment_start = self.current().code_len();
            self.expression();
            self.emit(Inst::Pop);
            self.parser
                .consume(TokenKind::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit(Inst::Pop);
        }
        self.end_scope();
    }

    fn return_statement(&mut self) {
        if self.ty() == ScopeType::Script {
            self.parser.error("Can't return from top-level code.");
        }

        if self.parser.match_token(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            if self.ty() == ScopeType::Initializer {
                self.parser
                    .error("Can't return a value from an initializer.");
            }
            self.expression();
            self.parser
                .consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit(Inst::Return);
        }
    }

    // === Expressions ===

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.parser.advance();
        let can_assign = precedence <= Precedence::Assignment;
        if !self.prefix(self.parser.previous.kind, can_assign) {
            self.parser.error("Expect expression.");
            return;
        }

        while precedence <= infix_precedence(self.parser.current.kind) {
            self.parser.advance();
            self.infix(self.parser.previous.kind, can_assign);
        }

        if can_assign && self.parser.match_token(TokenKind::Equal) {
            self.parser.error("Invalid assignment target.");
        }
    }

    /// Run the prefix rule of `kind`. Returns `false` if there is none.
    fn prefix(&mut self, kind: TokenKind, can_assign: bool) -> bool {
        use TokenKind::*;
        match kind {
            LeftParen => self.grouping(),
            Minus | Bang => self.unary(),
            Number => self.number(),
            String => self.string(),
            Nil | True | False => self.literal(),
            Identifier => self.variable(can_assign),
            This => self.this(),
            Super => self.super_(),
            _ => return false,
        }
        true
    }

    fn infix(&mut self, kind: TokenKind, can_assign: bool) {
        use TokenKind::*;
        match kind {
            LeftParen => self.call(),
            Dot => self.dot(can_assign),
            And => self.and(),
            Or => self.or(),
            Minus | Plus | Slash | Star | BangEqual | EqualEqual | Greater | GreaterEqual
            | Less | LessEqual => self.binary(),
            _ => {}
        }
    }

    fn grouping(&mut self) {
        self.expression();
        self.parser
            .consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn number(&mut self) {
        match self.parser.previous.lexeme.parse::<f64>() {
            Ok(value) => self.emit_constant(Value::Number(value)),
            Err(_) => self.parser.error("Invalid number literal."),
        }
    }

    fn string(&mut self) {
        let lexeme = self.parser.previous.lexeme;
        let chars = &lexeme[1..lexeme.len() - 1];
        let string = self.copy_string(chars);
        self.emit_constant(string.into());
    }

    fn literal(&mut self) {
        match self.parser.previous.kind {
            TokenKind::False => self.emit(Inst::False),
            TokenKind::Nil => self.emit(Inst::Nil),
            TokenKind::True => self.emit(Inst::True),
            _ => {}
        }
    }

    fn variable(&mut self, can_assign: bool) {
        self.named_variable(self.parser.previous, can_assign);
    }

    fn unary(&mut self) {
        let op = self.parser.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match op {
            TokenKind::Bang => self.emit(Inst::Not),
            TokenKind::Minus => self.emit(Inst::Negate),
            _ => {}
        }
    }

    fn binary(&mut self) {
        let op = self.parser.previous.kind;
        self.parse_precedence(infix_precedence(op).next());

        use TokenKind::*;
        match op {
            BangEqual => {
                self.emit(Inst::Equal);
                self.emit(Inst::Not);
            }
            EqualEqual => self.emit(Inst::Equal),
            Greater => self.emit(Inst::Greater),
            GreaterEqual => {
                self.emit(Inst::Less);
                self.emit(Inst::Not);
            }
            Less => self.emit(Inst::Less),
            LessEqual => {
                self.emit(Inst::Greater);
                self.emit(Inst::Not);
            }
            Plus => self.emit(Inst::Add),
            Minus => self.emit(Inst::Subtract),
            Star => self.emit(Inst::Multiply),
            Slash => self.emit(Inst::Divide),
            _ => {}
        }
    }

    fn and(&mut self) {
        let end_jump = self.emit_jump(Inst::JumpIfFalse);
        self.emit(Inst::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or(&mut self) {
        let else_jump = self.emit_jump(Inst::JumpIfFalse);
        let end_jump = self.emit_jump(Inst::Jump);
        self.patch_jump(else_jump);
        self.emit(Inst::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn argument_list(&mut self) -> u8 {
        let mut argc: u8 = 0;
        if !self.parser.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if argc == u8::MAX {
                    self.parser.error("Can't have more than 255 arguments.");
                } else {
                    argc += 1;
                }
                if !self.parser.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.parser
            .consume(TokenKind::RightParen, "Expect ')' after arguments.");
        argc
    }

    fn call(&mut self) {
        let argc = self.argument_list();
        self.emit_p(Inst::Call, argc);
    }

    fn dot(&mut self, can_assign: bool) {
        self.parser
            .consume(TokenKind::Identifier, "Expect property name after '.'.");
        let name = self.identifier_constant(self.parser.previous.lexeme);

        if can_assign && self.parser.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_p(Inst::SetProperty, name);
        } else if self.parser.match_token(TokenKind::LeftParen) {
            let argc = self.argument_list();
            self.emit_p(Inst::Invoke, name);
            self.emit_byte(argc);
        } else {
            self.emit_p(Inst::GetProperty, name);
        }
    }

    fn this(&mut self) {
        if self.classes.is_empty() {
            self.parser.error("Can't use 'this' outside of a class.");
            return;
        }
        self.variable(false);
    }

    fn super_(&mut self) {
        match self.classes.last() {
            None => self.parser.error("Can't use 'super' outside of a class."),
            Some(class) if !class.has_superclass => self
                .parser
                .error("Can't use 'super' in a class with no superclass."),
            Some(_) => {}
        }

        self.parser
            .consume(TokenKind::Dot, "Expect '.' after 'super'.");
        self.parser
            .consume(TokenKind::Identifier, "Expect superclass method name.");
        let name = self.identifier_constant(self.parser.previous.lexeme);

        self.named_variable(Token::synthetic("this"), false);
        if self.parser.match_token(TokenKind::LeftParen) {
            let argc = self.argument_list();
            self.named_variable(Token::synthetic("super"), false);
            self.emit_p(Inst::SuperInvoke, name);
            self.emit_byte(argc);
        } else {
            self.named_variable(Token::synthetic("super"), false);
            self.emit_p(Inst::GetSuper, name);
        }
    }
}

/// Move a finished function onto the heap.
fn alloc_function(gc: &mut GcAllocator, roots: &dyn Trace, function: Function) -> Gc<Function> {
    if tracing::level_enabled!(tracing::Level::TRACE) {
        let name = function.name.map_or("<script>", |name| gc[name].as_str());
        let mut listing = String::new();
        if function.chunk.disassemble(name, &*gc, &mut listing).is_ok() {
            tracing::trace!("\n{}", listing.trim_end());
        }
    }

    // the function isn't reachable from anywhere until it is placed
    let pinned = (function.name, function.chunk.constants().to_vec());
    gc.alloc(function, &(roots, pinned))
}
