use std::borrow::Cow;
use std::fmt::{self, Display};
use std::ops::Range;

/// Where in the token stream an error was found.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ErrorLocation {
    /// At a token of the given lexeme.
    Token(String),
    /// At the end of input.
    End,
    /// At a malformed token. The lexeme isn't repeated in the message.
    Lexical,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    id: &'static str,
    line: u32,
    span: Range<usize>,
    location: ErrorLocation,
    message: Option<Cow<'static, str>>,
}

impl CompileError {
    pub fn new(id: &'static str, line: u32, span: Range<usize>, location: ErrorLocation) -> Self {
        CompileError {
            id,
            line,
            span,
            location,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<Cow<'static, str>>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// A short machine-readable name of this kind of error.
    pub fn id(&self) -> &'static str {
        self.id
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    /// Byte range of the offending token in source.
    pub fn span(&self) -> Range<usize> {
        self.span.clone()
    }

    pub fn location(&self) -> &ErrorLocation {
        &self.location
    }

    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or(self.id)
    }
}

impl Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[line {}] Error", self.line)?;
        match &self.location {
            ErrorLocation::Token(lexeme) => write!(f, " at '{}'", lexeme)?,
            ErrorLocation::End => write!(f, " at end")?,
            ErrorLocation::Lexical => {}
        }
        write!(f, ": {}", self.message())
    }
}

impl std::error::Error for CompileError {}
