//! Lexical analysis of Quill source code.

use std::ops::Range;

use logos::Logos;

mod token;

pub use token::TokenKind;

/// A token and where it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'src> {
    pub kind: TokenKind,
    /// The source text of this token. Empty for [`TokenKind::Eof`].
    pub lexeme: &'src str,
    /// Line number (1-based) at the end of this token
    pub line: u32,
    /// Byte offset of this token in source
    pub offset: usize,
}

impl<'src> Token<'src> {
    /// A token that does not appear in the source. Used for the names the compiler makes up,
    /// like `this` and `super`.
    pub fn synthetic(lexeme: &'src str) -> Self {
        Token {
            kind: TokenKind::Identifier,
            lexeme,
            line: 0,
            offset: 0,
        }
    }

    pub fn span(&self) -> Range<usize> {
        self.offset..self.offset + self.lexeme.len()
    }
}

/// The main lexer used in Quill.
///
/// Tokens are produced lazily. Exactly one [`TokenKind::Eof`] is yielded at the end of input.
pub struct Lexer<'src> {
    /// The actual lexer that does the job.
    inner: logos::Lexer<'src, TokenKind>,
    /// Current line number
    line: u32,
    /// Byte offset up to which newlines have been counted
    counted: usize,
    finished: bool,
}

impl<'src> Lexer<'src> {
    /// Create a new lexer from string.
    pub fn new(s: &'src str) -> Lexer<'src> {
        Lexer {
            inner: TokenKind::lexer(s),
            line: 1,
            counted: 0,
            finished: false,
        }
    }

    /// The underlying source code
    pub fn source(&self) -> &'src str {
        self.inner.source()
    }

    fn advance_line(&mut self, to: usize) -> u32 {
        let newlines = self.source()[self.counted..to]
            .bytes()
            .filter(|&b| b == b'\n')
            .count();
        self.line += newlines as u32;
        self.counted = to;
        self.line
    }
}

impl<'src> Iterator for Lexer<'src> {
    type Item = Token<'src>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let token = match self.inner.next() {
            Some(kind) => {
                let span = self.inner.span();
                Token {
                    kind,
                    lexeme: self.inner.slice(),
                    line: self.advance_line(span.end),
                    offset: span.start,
                }
            }
            None => {
                self.finished = true;
                let end = self.source().len();
                Token {
                    kind: TokenKind::Eof,
                    lexeme: "",
                    line: self.advance_line(end),
                    offset: end,
                }
            }
        };
        tracing::trace!(kind = ?token.kind, line = token.line, lexeme = token.lexeme, "token");
        Some(token)
    }
}
