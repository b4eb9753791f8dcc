//! Pratt parsing utilities and definitions.

/*
   Precedence from low to high:

       - Assignment `x = y`
       - Or `x or y`
       - And `x and y`
       - Equality `x == y` `x != y`
       - Comparison `x < y` `x > y` `x <= y` `x >= y`
       - Term `x + y` `x - y`
       - Factor `x * y` `x / y`
       - Unary `!x` `-x`
       - Call / Dot `f(x)` `x.a`
       - Primary

   Every binary operator is left associative, so its right operand is parsed one level
   higher. Assignment is the exception and recurses at its own level.
*/

use quill_syn::TokenKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
    None,
    Assignment,
    Or,
    And,
    Equality,
    Comparison,
    Term,
    Factor,
    Unary,
    Call,
    Primary,
}

impl Precedence {
    /// The next higher level.
    pub fn next(self) -> Precedence {
        use Precedence::*;
        match self {
            None => Assignment,
            Assignment => Or,
            Or => And,
            And => Equality,
            Equality => Comparison,
            Comparison => Term,
            Term => Factor,
            Factor => Unary,
            Unary => Call,
            Call | Primary => Primary,
        }
    }
}

/// Precedence of `op` used as an infix operator. Tokens with no infix rule get
/// [`Precedence::None`].
pub fn infix_precedence(op: TokenKind) -> Precedence {
    use TokenKind::*;
    match op {
        Or => Precedence::Or,
        And => Precedence::And,
        BangEqual | EqualEqual => Precedence::Equality,
        Greater | GreaterEqual | Less | LessEqual => Precedence::Comparison,
        Minus | Plus => Precedence::Term,
        Slash | Star => Precedence::Factor,
        LeftParen | Dot => Precedence::Call,
        _ => Precedence::None,
    }
}
