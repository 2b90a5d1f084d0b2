//! Token definitions for the tiro lexer.

use strum::IntoStaticStr;

use crate::{span::Span, strings::InternedString};

/// The closed set of token types produced by the lexer.
///
/// Keywords that belong to reserved-but-unimplemented constructs (`switch`,
/// `class`, `struct`, `protocol`, `package`, `yield`, `async`, `await`,
/// `throw`, `try`, `catch`) still lex to their own token types; the parser
/// rejects them with a dedicated diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
#[repr(u8)]
pub enum TokenType {
    /// End of file. Repeats indefinitely once reached.
    Eof,
    /// A `//` or `/* */` comment (only emitted when `ignore_comments` is off).
    Comment,
    /// A code point that does not start any token.
    InvalidToken,

    Identifier,
    /// `#name` or `#123`.
    SymbolLiteral,
    IntegerLiteral,
    FloatLiteral,
    /// An integer literal immediately after `.`, e.g. the `0` in `pair.0`.
    /// Lexed without float parsing so `tuple.0.1` works.
    TupleField,

    /// Opening quote of a string literal.
    StringStart,
    /// A run of literal characters (with escapes applied) inside a string.
    StringContent,
    /// Closing quote of a string literal.
    StringEnd,
    /// `$identifier` interpolation inside a string.
    StringVar,
    /// `${` starting an interpolated expression block.
    StringBlockStart,
    /// The balanced `}` ending an interpolated expression block.
    StringBlockEnd,

    // Keywords.
    KwFunc,
    KwVar,
    KwConst,
    KwIf,
    KwElse,
    KwWhile,
    KwFor,
    KwContinue,
    KwBreak,
    KwReturn,
    KwDefer,
    KwAssert,
    KwTrue,
    KwFalse,
    KwNull,
    KwImport,
    KwExport,
    // Reserved keywords without parser support.
    KwSwitch,
    KwClass,
    KwStruct,
    KwProtocol,
    KwPackage,
    KwYield,
    KwAsync,
    KwAwait,
    KwThrow,
    KwTry,
    KwCatch,

    /// `map{`, lexed as a single token.
    MapStart,
    /// `set{`, lexed as a single token.
    SetStart,

    // Braces.
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    LeftBrace,
    RightBrace,

    // Operators.
    Dot,
    Comma,
    Colon,
    Semicolon,
    Question,
    QuestionDot,
    QuestionParen,
    QuestionBracket,
    QuestionQuestion,
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    Percent,
    PlusPlus,
    MinusMinus,
    PlusEquals,
    MinusEquals,
    StarEquals,
    StarStarEquals,
    SlashEquals,
    PercentEquals,
    BitwiseNot,
    BitwiseXor,
    BitwiseOr,
    BitwiseAnd,
    LeftShift,
    RightShift,
    LogicalNot,
    LogicalOr,
    LogicalAnd,
    Equals,
    EqualsEquals,
    NotEquals,
    Less,
    Greater,
    LessEquals,
    GreaterEquals,
}

impl TokenType {
    /// Human-readable description used in "expected X" diagnostics.
    #[must_use]
    pub fn describe(self) -> &'static str {
        match self {
            Self::Eof => "end of file",
            Self::Comment => "comment",
            Self::InvalidToken => "invalid input",
            Self::Identifier => "identifier",
            Self::SymbolLiteral => "symbol literal",
            Self::IntegerLiteral => "integer literal",
            Self::FloatLiteral => "float literal",
            Self::TupleField => "tuple field index",
            Self::StringStart => "start of string",
            Self::StringContent => "string content",
            Self::StringEnd => "end of string",
            Self::StringVar => "string interpolation",
            Self::StringBlockStart => "\"${\"",
            Self::StringBlockEnd => "\"}\"",
            Self::KwFunc => "\"func\"",
            Self::KwVar => "\"var\"",
            Self::KwConst => "\"const\"",
            Self::KwIf => "\"if\"",
            Self::KwElse => "\"else\"",
            Self::KwWhile => "\"while\"",
            Self::KwFor => "\"for\"",
            Self::KwContinue => "\"continue\"",
            Self::KwBreak => "\"break\"",
            Self::KwReturn => "\"return\"",
            Self::KwDefer => "\"defer\"",
            Self::KwAssert => "\"assert\"",
            Self::KwTrue => "\"true\"",
            Self::KwFalse => "\"false\"",
            Self::KwNull => "\"null\"",
            Self::KwImport => "\"import\"",
            Self::KwExport => "\"export\"",
            Self::KwSwitch => "\"switch\"",
            Self::KwClass => "\"class\"",
            Self::KwStruct => "\"struct\"",
            Self::KwProtocol => "\"protocol\"",
            Self::KwPackage => "\"package\"",
            Self::KwYield => "\"yield\"",
            Self::KwAsync => "\"async\"",
            Self::KwAwait => "\"await\"",
            Self::KwThrow => "\"throw\"",
            Self::KwTry => "\"try\"",
            Self::KwCatch => "\"catch\"",
            Self::MapStart => "\"map{\"",
            Self::SetStart => "\"set{\"",
            Self::LeftParen => "\"(\"",
            Self::RightParen => "\")\"",
            Self::LeftBracket => "\"[\"",
            Self::RightBracket => "\"]\"",
            Self::LeftBrace => "\"{\"",
            Self::RightBrace => "\"}\"",
            Self::Dot => "\".\"",
            Self::Comma => "\",\"",
            Self::Colon => "\":\"",
            Self::Semicolon => "\";\"",
            Self::Question => "\"?\"",
            Self::QuestionDot => "\"?.\"",
            Self::QuestionParen => "\"?(\"",
            Self::QuestionBracket => "\"?[\"",
            Self::QuestionQuestion => "\"??\"",
            Self::Plus => "\"+\"",
            Self::Minus => "\"-\"",
            Self::Star => "\"*\"",
            Self::StarStar => "\"**\"",
            Self::Slash => "\"/\"",
            Self::Percent => "\"%\"",
            Self::PlusPlus => "\"++\"",
            Self::MinusMinus => "\"--\"",
            Self::PlusEquals => "\"+=\"",
            Self::MinusEquals => "\"-=\"",
            Self::StarEquals => "\"*=\"",
            Self::StarStarEquals => "\"**=\"",
            Self::SlashEquals => "\"/=\"",
            Self::PercentEquals => "\"%=\"",
            Self::BitwiseNot => "\"~\"",
            Self::BitwiseXor => "\"^\"",
            Self::BitwiseOr => "\"|\"",
            Self::BitwiseAnd => "\"&\"",
            Self::LeftShift => "\"<<\"",
            Self::RightShift => "\">>\"",
            Self::LogicalNot => "\"!\"",
            Self::LogicalOr => "\"||\"",
            Self::LogicalAnd => "\"&&\"",
            Self::Equals => "\"=\"",
            Self::EqualsEquals => "\"==\"",
            Self::NotEquals => "\"!=\"",
            Self::Less => "\"<\"",
            Self::Greater => "\">\"",
            Self::LessEquals => "\"<=\"",
            Self::GreaterEquals => "\">=\"",
        }
    }
}

/// Parsed payload attached to literal and identifier tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TokenValue {
    None,
    Int(i64),
    Float(f64),
    Str(InternedString),
}

/// A single lexed token.
///
/// `span` always covers the exact lexeme, so `span.text(source)` reproduces
/// the input. Errors during lexing never abort: they set `has_error` and the
/// token is still produced with a best-effort value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Token {
    pub ty: TokenType,
    pub span: Span,
    pub has_error: bool,
    value: TokenValue,
}

impl Token {
    #[must_use]
    pub fn new(ty: TokenType, span: Span) -> Self {
        Self {
            ty,
            span,
            has_error: false,
            value: TokenValue::None,
        }
    }

    #[must_use]
    pub fn with_error(mut self, has_error: bool) -> Self {
        self.has_error = has_error;
        self
    }

    #[must_use]
    pub fn with_int(mut self, value: i64) -> Self {
        self.value = TokenValue::Int(value);
        self
    }

    #[must_use]
    pub fn with_float(mut self, value: f64) -> Self {
        self.value = TokenValue::Float(value);
        self
    }

    #[must_use]
    pub fn with_str(mut self, value: InternedString) -> Self {
        self.value = TokenValue::Str(value);
        self
    }

    /// Integer payload of an `IntegerLiteral` / `TupleField` token.
    #[must_use]
    pub fn int_value(&self) -> i64 {
        match self.value {
            TokenValue::Int(value) => value,
            _ => panic!("token {:?} carries no integer value", self.ty),
        }
    }

    /// Float payload of a `FloatLiteral` token.
    #[must_use]
    pub fn float_value(&self) -> f64 {
        match self.value {
            TokenValue::Float(value) => value,
            _ => panic!("token {:?} carries no float value", self.ty),
        }
    }

    /// Interned string payload of identifiers, strings and symbols.
    #[must_use]
    pub fn str_value(&self) -> InternedString {
        match self.value {
            TokenValue::Str(value) => value,
            _ => panic!("token {:?} carries no string value", self.ty),
        }
    }
}
