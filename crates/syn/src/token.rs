use logos::Logos;

#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // === Single-character Tokens ===
    #[token("(")]
    LeftParen,
    #[token(")")]
    RightParen,
    #[token("{")]
    LeftBrace,
    #[token("}")]
    RightBrace,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token("-")]
    Minus,
    #[token("+")]
    Plus,
    #[token(";")]
    Semicolon,
    #[token("/")]
    Slash,
    #[token("*")]
    Star,

    // === Operators ===
    #[token("!")]
    Bang,
    #[token("!=")]
    BangEqual,
    #[token("=")]
    Equal,
    #[token("==")]
    EqualEqual,
    #[token(">")]
    Greater,
    #[token(">=")]
    GreaterEqual,
    #[token("<")]
    Less,
    #[token("<=")]
    LessEqual,

    // === Literals ===
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Identifier,
    /// A string literal, quotes included. Strings may span lines and have no escapes.
    #[regex(r#""[^"]*""#)]
    String,
    /// A string literal that runs into the end of input.
    #[regex(r#""[^"]*"#)]
    UnterminatedString,
    #[regex(r"[0-9]+(\.[0-9]+)?")]
    Number,

    // === Keywords ===
    #[token("and")]
    And,
    #[token("class")]
    Class,
    #[token("else")]
    Else,
    #[token("false")]
    False,
    #[token("for")]
    For,
    #[token("fun")]
    Fun,
    #[token("if")]
    If,
    #[token("nil")]
    Nil,
    #[token("or")]
    Or,
    #[token("print")]
    Print,
    #[token("return")]
    Return,
    #[token("super")]
    Super,
    #[token("this")]
    This,
    #[token("true")]
    True,
    #[token("var")]
    Var,
    #[token("while")]
    While,

    /// End of input. Never produced by the inner tokenizer.
    Eof,

    /// Anything that doesn't match
    #[error]
    #[regex(r"[ \t\r\n\f]+", logos::skip)]
    #[regex(r"//[^\n]*", logos::skip)]
    Error,
}

impl TokenKind {
    /// Whether this token is a lexical error.
    pub fn is_error(self) -> bool {
        matches!(self, TokenKind::Error | TokenKind::UnterminatedString)
    }

    /// Diagnostic message of an error token.
    pub fn error_message(self) -> Option<&'static str> {
        match self {
            TokenKind::Error => Some("Unexpected character."),
            TokenKind::UnterminatedString => Some("Unterminated string."),
            _ => None,
        }
    }

    /// Whether a statement can start at this token. Used to recover from syntax errors.
    pub fn starts_statement(self) -> bool {
        use TokenKind::*;
        matches!(
            self,
            Class | Fun | Var | For | If | While | Print | Return
        )
    }
}
