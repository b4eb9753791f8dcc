use std::fmt::{self, Display};

/// Errors raised while executing bytecode.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeErrorKind {
    #[error("Operand must be a number.")]
    OperandNotNumber,
    #[error("Left operand must be a number.")]
    LeftOperandNotNumber,
    #[error("Right operand must be a number.")]
    RightOperandNotNumber,
    #[error("Operands must be two numbers or two strings.")]
    BadAddOperands,
    #[error("Undefined variable '{0}'.")]
    UndefinedVariable(String),
    #[error("Undefined property '{0}'.")]
    UndefinedProperty(String),
    #[error("Only instances have properties.")]
    NotAnInstanceProperty,
    #[error("Only instances have fields.")]
    NotAnInstanceField,
    #[error("Only instances have methods.")]
    NotAnInstanceMethod,
    #[error("Expected {expected} arguments but got {got}.")]
    Arity { expected: u8, got: u8 },
    #[error("Stack overflow.")]
    StackOverflow,
    #[error("Can only call functions and classes.")]
    NotCallable,
    #[error("Superclass must be a class.")]
    SuperclassNotClass,
    #[error("Failed to write output: {0}")]
    Io(#[from] std::io::Error),
}

/// One line of a runtime stack trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    pub line: u32,
    /// `None` for the top-level script
    pub function: Option<String>,
}

impl Display for TraceFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.function {
            Some(name) => write!(f, "[line {}] in {}()", self.line, name),
            None => write!(f, "[line {}] in script", self.line),
        }
    }
}

/// A runtime error, with the call stack at the point it was raised. Innermost frame first.
#[derive(Debug, thiserror::Error)]
#[error("{kind}")]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    pub trace: Vec<TraceFrame>,
}

impl RuntimeError {
    /// The message followed by one line per stack frame.
    pub fn report(&self) -> String {
        let mut report = self.kind.to_string();
        for frame in &self.trace {
            report.push('\n');
            report.push_str(&frame.to_string());
        }
        report
    }
}
