//! Token definitions for Vortex
//!
//! Tokens represent the atomic units of meaning in source code.

use std::fmt;

/// Location in source code.
///
/// `start..end` is the byte range. Lines and columns are 1-based and the end
/// position points at the last character covered (inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: usize,
    pub end_line: usize,
    pub end_column: usize,
}

impl Span {
    pub fn new(start: usize, end: usize, from: (usize, usize), to: (usize, usize)) -> Self {
        Self {
            start,
            end,
            line: from.0,
            column: from.1,
            end_line: to.0,
            end_column: to.1,
        }
    }

    /// Span covering `self` through `other`.
    pub fn to(self, other: Span) -> Span {
        Span {
            start: self.start,
            end: other.end,
            line: self.line,
            column: self.column,
            end_line: other.end_line,
            end_column: other.end_column,
        }
    }
}

/// Token types in Vortex
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals
    Number(f64),
    String(String),
    True,
    False,
    Null,

    // Identifiers
    Ident(String),

    /// Path directly after `import`: ./lib.vx, ../util/math.vx, @/main.vx
    ImportPath(String),

    // Keywords
    Func,
    Return,
    If,
    Else,
    For,
    Of,
    Break,
    Continue,
    Import,
    From,
    Assert,
    Log,
    Switch,

    // Arithmetic
    Plus,       // +
    PlusPlus,   // ++ (concatenation and increment)
    Minus,      // -
    MinusMinus, // --
    Star,       // *
    StarStar,   // **
    Slash,      // /
    Percent,    // %

    // Bitwise and logical
    Amp,      // &
    AmpAmp,   // &&
    Pipe,     // |
    PipePipe, // ||
    Caret,    // ^
    Bang,     // !
    Shl,      // <<
    Shr,      // >>

    // Comparison
    EqualEqual,   // ==
    BangEqual,    // !=
    Less,         // <
    LessEqual,    // <=
    Greater,      // >
    GreaterEqual, // >=

    // Creation and assignment
    ColonEqual, // :=
    Equal,      // =
    PlusEqual,
    MinusEqual,
    StarEqual,
    StarStarEqual,
    SlashEqual,
    PercentEqual,
    ShlEqual,
    ShrEqual,
    AmpEqual,
    AmpAmpEqual,
    PipeEqual,
    PipePipeEqual,
    CaretEqual,
    PlusPlusEqual,

    FatArrow, // =>

    // Delimiters
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,
    Comma,
    Semicolon,
    Colon,
    Dot,

    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TokenKind::Number(n) => return write!(f, "{}", n),
            TokenKind::String(s) => return write!(f, "'{}'", s),
            TokenKind::Ident(s) => return write!(f, "{}", s),
            TokenKind::ImportPath(p) => return write!(f, "{}", p),
            TokenKind::True => "true",
            TokenKind::False => "false",
            TokenKind::Null => "null",
            TokenKind::Func => "func",
            TokenKind::Return => "return",
            TokenKind::If => "if",
            TokenKind::Else => "else",
            TokenKind::For => "for",
            TokenKind::Of => "of",
            TokenKind::Break => "break",
            TokenKind::Continue => "continue",
            TokenKind::Import => "import",
            TokenKind::From => "from",
            TokenKind::Assert => "assert",
            TokenKind::Log => "log",
            TokenKind::Switch => "switch",
            TokenKind::Plus => "+",
            TokenKind::PlusPlus => "++",
            TokenKind::Minus => "-",
            TokenKind::MinusMinus => "--",
            TokenKind::Star => "*",
            TokenKind::StarStar => "**",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::Amp => "&",
            TokenKind::AmpAmp => "&&",
            TokenKind::Pipe => "|",
            TokenKind::PipePipe => "||",
            TokenKind::Caret => "^",
            TokenKind::Bang => "!",
            TokenKind::Shl => "<<",
            TokenKind::Shr => ">>",
            TokenKind::EqualEqual => "==",
            TokenKind::BangEqual => "!=",
            TokenKind::Less => "<",
            TokenKind::LessEqual => "<=",
            TokenKind::Greater => ">",
            TokenKind::GreaterEqual => ">=",
            TokenKind::ColonEqual => ":=",
            TokenKind::Equal => "=",
            TokenKind::PlusEqual => "+=",
            TokenKind::MinusEqual => "-=",
            TokenKind::StarEqual => "*=",
            TokenKind::StarStarEqual => "**=",
            TokenKind::SlashEqual => "/=",
            TokenKind::PercentEqual => "%=",
            TokenKind::ShlEqual => "<<=",
            TokenKind::ShrEqual => ">>=",
            TokenKind::AmpEqual => "&=",
            TokenKind::AmpAmpEqual => "&&=",
            TokenKind::PipeEqual => "|=",
            TokenKind::PipePipeEqual => "||=",
            TokenKind::CaretEqual => "^=",
            TokenKind::PlusPlusEqual => "++=",
            TokenKind::FatArrow => "=>",
            TokenKind::LeftParen => "(",
            TokenKind::RightParen => ")",
            TokenKind::LeftBrace => "{",
            TokenKind::RightBrace => "}",
            TokenKind::LeftBracket => "[",
            TokenKind::RightBracket => "]",
            TokenKind::Comma => ",",
            TokenKind::Semicolon => ";",
            TokenKind::Colon => ":",
            TokenKind::Dot => ".",
            TokenKind::Eof => "end of file",
        };
        f.write_str(text)
    }
}

/// A token with its kind and location
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    pub lexeme: String,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span, lexeme: String) -> Self {
        Self { kind, span, lexeme }
    }
}

/// Check if a string is a keyword and return the corresponding token kind
pub fn lookup_keyword(ident: &str) -> Option<TokenKind> {
    match ident {
        "func" => Some(TokenKind::Func),
        "return" => Some(TokenKind::Return),
        "if" => Some(TokenKind::If),
        "else" => Some(TokenKind::Else),
        "for" => Some(TokenKind::For),
        "of" => Some(TokenKind::Of),
        "break" => Some(TokenKind::Break),
        "continue" => Some(TokenKind::Continue),
        "import" => Some(TokenKind::Import),
        "from" => Some(TokenKind::From),
        "assert" => Some(TokenKind::Assert),
        "log" => Some(TokenKind::Log),
        "switch" => Some(TokenKind::Switch),
        "true" => Some(TokenKind::True),
        "false" => Some(TokenKind::False),
        "null" => Some(TokenKind::Null),
        _ => None,
    }
}

/// Whether `name` can be written bare (as an identifier or object key).
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_') && lookup_keyword(name).is_none()
}
