use smol_str::SmolStr;

/// Maximum number of locals alive at once in one function, and of upvalues captured by it.
/// Both are addressed by a single byte operand.
pub const MAX_SLOTS: usize = u8::MAX as usize + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeType {
    /// The top-level script
    Script,
    /// A plain function
    Function,
    /// A method, binding `this` in slot 0
    Method,
    /// An `init` method, which always returns `this`
    Initializer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeError {
    TooManyLocals,
    TooManyUpvalues,
}

impl ScopeError {
    pub fn message(self) -> &'static str {
        match self {
            ScopeError::TooManyLocals => "Too many local variables in function.",
            ScopeError::TooManyUpvalues => "Too many closure variables in function.",
        }
    }
}

/// A local variable living in a stack slot.
#[derive(Debug, Clone)]
pub struct Local {
    name: SmolStr,
    /// Depth of the block declaring it. `None` until its initializer has been compiled.
    depth: Option<u32>,
    /// Whether a closure captures this local, so it must be moved to the heap on exit.
    is_captured: bool,
}

/// The kind of upvalue capture
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum UpValueKind {
    /// Captures a local slot of the enclosing function.
    Capture,
    /// Copies an upvalue of the enclosing function.
    Copy,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct UpValueCapture {
    pub kind: UpValueKind,
    pub index: u8,
}

/// Local variables and upvalues of a single function being compiled.
#[derive(Debug)]
pub struct ScopeBuilder {
    ty: ScopeType,
    locals: Vec<Local>,
    /// Current block nesting depth. 0 is the function's top level, where the script's
    /// variables are globals.
    depth: u32,
    upvalues: Vec<UpValueCapture>,
}

impl ScopeBuilder {
    pub fn new(ty: ScopeType) -> Self {
        // slot 0 holds the callee, which methods see as `this`
        let slot0 = match ty {
            ScopeType::Method | ScopeType::Initializer => "this",
            ScopeType::Script | ScopeType::Function => "",
        };
        ScopeBuilder {
            ty,
            locals: vec![Local {
                name: slot0.into(),
                depth: Some(0),
                is_captured: false,
            }],
            depth: 0,
            upvalues: vec![],
        }
    }

    pub fn ty(&self) -> ScopeType {
        self.ty
    }

    pub fn is_global(&self) -> bool {
        self.depth == 0
    }

    pub fn new_scope(&mut self) {
        self.depth += 1;
    }

    /// Leave the innermost block, returning whether each of its locals was captured, from
    /// the top of the stack down.
    pub fn pop_scope(&mut self) -> Vec<bool> {
        debug_assert!(self.depth > 0, "popping the top-level scope");
        self.depth -= 1;
        let mut popped = vec![];
        while let Some(local) = self.locals.last() {
            match local.depth {
                Some(depth) if depth <= self.depth => break,
                _ => {}
            }
            popped.push(local.is_captured);
            self.locals.pop();
        }
        popped
    }

    /// Whether `name` is already declared in the innermost block.
    pub fn declared_in_current_scope(&self, name: &str) -> bool {
        self.locals
            .iter()
            .rev()
            .take_while(|local| local.depth.map_or(true, |d| d >= self.depth))
            .any(|local| local.name == name)
    }

    /// Declare an uninitialized local in the innermost block.
    pub fn insert(&mut self, name: &str) -> Result<(), ScopeError> {
        if self.locals.len() >= MAX_SLOTS {
            return Err(ScopeError::TooManyLocals);
        }
        self.locals.push(Local {
            name: name.into(),
            depth: None,
            is_captured: false,
        });
        Ok(())
    }

    /// Mark the most recent local as usable.
    pub fn mark_initialized(&mut self) {
        if self.depth == 0 {
            return;
        }
        let depth = self.depth;
        if let Some(local) = self.locals.last_mut() {
            local.depth = Some(depth);
        }
    }

    /// Find the slot of a local. The flag tells whether it has been initialized.
    pub fn get_local(&self, name: &str) -> Option<(u8, bool)> {
        self.locals
            .iter()
            .enumerate()
            .rev()
            .find(|(_, local)| local.name == name)
            .map(|(slot, local)| (slot as u8, local.depth.is_some()))
    }

    pub fn set_captured(&mut self, slot: u8) {
        self.locals[slot as usize].is_captured = true;
    }

    /// Add an upvalue, reusing an identical capture if one exists.
    pub fn add_upvalue(&mut self, capture: UpValueCapture) -> Result<u8, ScopeError> {
        if let Some(idx) = self.upvalues.iter().position(|u| *u == capture) {
            return Ok(idx as u8);
        }
        if self.upvalues.len() >= MAX_SLOTS {
            return Err(ScopeError::TooManyUpvalues);
        }
        self.upvalues.push(capture);
        Ok((self.upvalues.len() - 1) as u8)
    }

    pub fn upvalues(&self) -> &[UpValueCapture] {
        &self.upvalues
    }
}
