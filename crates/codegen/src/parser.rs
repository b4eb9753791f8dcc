use quill_syn::{Lexer, Token, TokenKind};

use crate::error::{CompileError, ErrorLocation};

/// Token cursor with error recovery.
///
/// After the first error the parser enters panic mode and swallows further errors until
/// [`Parser::synchronize`] finds a statement boundary.
pub struct Parser<'src> {
    lexer: Lexer<'src>,
    pub current: Token<'src>,
    pub previous: Token<'src>,
    errors: Vec<CompileError>,
    panic_mode: bool,
}

impl<'src> Parser<'src> {
    pub fn new(source: &'src str) -> Self {
        let start = Token {
            kind: TokenKind::Eof,
            lexeme: "",
            line: 1,
            offset: 0,
        };
        Parser {
            lexer: Lexer::new(source),
            current: start,
            previous: start,
            errors: vec![],
            panic_mode: false,
        }
    }

    pub fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = match self.lexer.next() {
                Some(token) => token,
                // keep sitting on the end of input
                None => self.previous_eof(),
            };
            match self.current.kind.error_message() {
                Some(message) => self.error_at_current(message),
                None => break,
            }
        }
    }

    fn previous_eof(&self) -> Token<'src> {
        let end = self.lexer.source().len();
        Token {
            kind: TokenKind::Eof,
            lexeme: "",
            line: self.current.line,
            offset: end,
        }
    }

    pub fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    /// Consume the current token if it is of `kind`.
    pub fn match_token(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    pub fn consume(&mut self, kind: TokenKind, message: &'static str) {
        if self.check(kind) {
            self.advance();
        } else {
            self.error_at_current(message);
        }
    }

    pub fn error_at_current(&mut self, message: impl Into<String>) {
        let token = self.current;
        self.error_at(token, message.into());
    }

    /// Report an error at the token just consumed.
    pub fn error(&mut self, message: impl Into<String>) {
        let token = self.previous;
        self.error_at(token, message.into());
    }

    fn error_at(&mut self, token: Token<'src>, message: String) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;

        let location = if token.kind == TokenKind::Eof {
            ErrorLocation::End
        } else if token.kind.is_error() {
            ErrorLocation::Lexical
        } else {
            ErrorLocation::Token(token.lexeme.to_owned())
        };
        let error = CompileError::new("syntax-error", token.line, token.span(), location)
            .with_message(message);
        tracing::debug!(%error, "compile error");
        self.errors.push(error);
    }

    pub fn panic_mode(&self) -> bool {
        self.panic_mode
    }

    pub fn had_error(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Skip tokens until something that looks like the start of a statement.
    pub fn synchronize(&mut self) {
        self.panic_mode = false;

        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon || self.current.kind.starts_statement() {
                return;
            }
            self.advance();
        }
    }

    pub fn finish(self) -> Vec<CompileError> {
        self.errors
    }
}
