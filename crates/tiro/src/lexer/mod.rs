//! Hand-written scanner over a UTF-8 code-point stream.
//!
//! The lexer keeps an explicit mode stack so it always knows whether it is in
//! normal code, inside a `'...'` / `"..."` string literal, or inside a `${...}`
//! interpolation block. Interpolation blocks count their own braces, so nested
//! `{}` inside an embedded expression never terminates the outer string.
//!
//! Errors never abort the scan: the offending token is produced with its
//! `has_error` flag set and a diagnostic is reported, so the parser can keep
//! recovering. After the end of input, `Eof` tokens repeat indefinitely.

mod token;

pub use token::{Token, TokenType, TokenValue};

use ahash::AHashMap;

use crate::{
    diagnostics::Diagnostics,
    span::Span,
    strings::{InternedString, StringTable},
};

const KEYWORDS: &[(&str, TokenType)] = &[
    ("func", TokenType::KwFunc),
    ("var", TokenType::KwVar),
    ("const", TokenType::KwConst),
    ("if", TokenType::KwIf),
    ("else", TokenType::KwElse),
    ("while", TokenType::KwWhile),
    ("for", TokenType::KwFor),
    ("continue", TokenType::KwContinue),
    ("break", TokenType::KwBreak),
    ("return", TokenType::KwReturn),
    ("defer", TokenType::KwDefer),
    ("assert", TokenType::KwAssert),
    ("true", TokenType::KwTrue),
    ("false", TokenType::KwFalse),
    ("null", TokenType::KwNull),
    ("import", TokenType::KwImport),
    ("export", TokenType::KwExport),
    ("switch", TokenType::KwSwitch),
    ("class", TokenType::KwClass),
    ("struct", TokenType::KwStruct),
    ("protocol", TokenType::KwProtocol),
    ("package", TokenType::KwPackage),
    ("yield", TokenType::KwYield),
    ("async", TokenType::KwAsync),
    ("await", TokenType::KwAwait),
    ("throw", TokenType::KwThrow),
    ("try", TokenType::KwTry),
    ("catch", TokenType::KwCatch),
];

/// One frame of the lexer's mode stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Normal code. `interpolation` is true for `${...}` frames; `braces`
    /// counts unmatched `{` within this frame so the closing `}` of the
    /// interpolation can be recognized.
    Code { interpolation: bool, braces: u32 },
    /// Inside a string literal with the given delimiter.
    Str { delim: char },
    /// Marker: the next token is the single identifier following a `$`.
    StrVar { delim: char },
}

/// The scanner. Produces one token per [`Lexer::next_token`] call.
pub struct Lexer<'src, 'ctx> {
    source: &'src str,
    pos: usize,
    strings: &'ctx mut StringTable,
    diag: &'ctx mut Diagnostics,
    keywords: AHashMap<InternedString, TokenType>,
    modes: Vec<Mode>,
    /// Set after a `.` / `?.` token so `pair.0.1` lexes its indices as
    /// `TupleField` instead of a float literal.
    after_dot: bool,
    ignore_comments: bool,
    buffer: String,
}

impl<'src, 'ctx> Lexer<'src, 'ctx> {
    pub fn new(source: &'src str, strings: &'ctx mut StringTable, diag: &'ctx mut Diagnostics) -> Self {
        let mut keywords = AHashMap::with_capacity(KEYWORDS.len());
        for &(name, ty) in KEYWORDS {
            keywords.insert(strings.insert(name), ty);
        }
        Self {
            source,
            pos: 0,
            strings,
            diag,
            keywords,
            modes: vec![Mode::Code {
                interpolation: false,
                braces: 0,
            }],
            after_dot: false,
            ignore_comments: true,
            buffer: String::new(),
        }
    }

    /// When disabled, `Comment` tokens are emitted instead of being skipped.
    pub fn set_ignore_comments(&mut self, ignore: bool) {
        self.ignore_comments = ignore;
    }

    /// Lexes the entire input into a vector ending with a single `Eof` token.
    pub fn tokens(mut self) -> Vec<Token> {
        let mut out = Vec::new();
        loop {
            let token = self.next_token();
            let done = token.ty == TokenType::Eof;
            out.push(token);
            if done {
                return out;
            }
        }
    }

    /// Produces the next token according to the current mode.
    pub fn next_token(&mut self) -> Token {
        let token = match *self.modes.last().expect("mode stack is never empty") {
            Mode::Code { .. } => self.lex_code(),
            Mode::Str { delim } => self.lex_string(delim),
            Mode::StrVar { delim } => {
                self.modes.pop();
                self.modes.push(Mode::Str { delim });
                self.lex_name()
            }
        };
        self.after_dot = matches!(token.ty, TokenType::Dot | TokenType::QuestionDot);
        token
    }

    // --- cursor helpers ---

    fn current(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn peek(&self) -> Option<char> {
        let mut chars = self.source[self.pos..].chars();
        chars.next();
        chars.next()
    }

    fn advance(&mut self) {
        if let Some(c) = self.current() {
            self.pos += c.len_utf8();
        }
    }

    fn accept(&mut self, expected: char) -> bool {
        if self.current() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn offset(&self) -> u32 {
        u32::try_from(self.pos).expect("source exceeds u32 range")
    }

    fn span_from(&self, begin: u32) -> Span {
        Span::new(begin, self.offset())
    }

    // --- normal code ---

    fn lex_code(&mut self) -> Token {
        loop {
            while matches!(self.current(), Some(c) if c.is_whitespace()) {
                self.advance();
            }

            let begin = self.offset();
            let Some(c) = self.current() else {
                return Token::new(TokenType::Eof, Span::at(begin));
            };

            if c == '/' && self.peek() == Some('/') {
                let token = self.lex_line_comment();
                if self.ignore_comments {
                    continue;
                }
                return token;
            }
            if c == '/' && self.peek() == Some('*') {
                let token = self.lex_block_comment();
                if self.ignore_comments {
                    continue;
                }
                return token;
            }

            if c == '"' || c == '\'' {
                self.advance();
                self.modes.push(Mode::Str { delim: c });
                return Token::new(TokenType::StringStart, self.span_from(begin));
            }

            if c.is_ascii_digit() {
                if self.after_dot {
                    return self.lex_tuple_field();
                }
                return self.lex_number();
            }

            if c == '#' {
                return self.lex_symbol();
            }

            if is_identifier_begin(c) {
                return self.lex_name();
            }

            if let Some(token) = self.lex_operator() {
                return token;
            }

            self.advance();
            let span = self.span_from(begin);
            self.diag.error(span, format!("invalid input text: `{c}`"));
            return Token::new(TokenType::InvalidToken, span).with_error(true);
        }
    }

    fn lex_line_comment(&mut self) -> Token {
        let begin = self.offset();
        self.advance();
        self.advance();
        while let Some(c) = self.current() {
            if c == '\n' {
                break;
            }
            self.advance();
        }
        Token::new(TokenType::Comment, self.span_from(begin))
    }

    /// Block comments nest: `/* a /* b */ c */` is one comment.
    fn lex_block_comment(&mut self) -> Token {
        let begin = self.offset();
        let mut depth = 0u32;
        loop {
            match (self.current(), self.peek()) {
                (Some('/'), Some('*')) => {
                    self.advance();
                    self.advance();
                    depth += 1;
                }
                (Some('*'), Some('/')) => {
                    self.advance();
                    self.advance();
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                (Some(_), _) => self.advance(),
                (None, _) => {
                    let span = self.span_from(begin);
                    self.diag.error(span, "unterminated block comment at the end of file");
                    return Token::new(TokenType::Comment, span).with_error(true);
                }
            }
        }
        Token::new(TokenType::Comment, self.span_from(begin))
    }

    fn lex_name(&mut self) -> Token {
        let begin = self.offset();
        while matches!(self.current(), Some(c) if is_identifier_part(c)) {
            self.advance();
        }
        let text = &self.source[begin as usize..self.pos];
        let id = self.strings.insert(text);

        if let Some(&keyword) = self.keywords.get(&id) {
            return Token::new(keyword, self.span_from(begin)).with_str(id);
        }

        // `map{` and `set{` are single tokens when the brace follows directly.
        if (text == "map" || text == "set") && self.current() == Some('{') {
            self.advance();
            self.open_brace();
            let ty = if text == "map" { TokenType::MapStart } else { TokenType::SetStart };
            return Token::new(ty, self.span_from(begin));
        }

        Token::new(TokenType::Identifier, self.span_from(begin)).with_str(id)
    }

    fn lex_symbol(&mut self) -> Token {
        let begin = self.offset();
        self.advance(); // '#'
        let name_begin = self.pos;
        if matches!(self.current(), Some(c) if c.is_ascii_digit()) {
            while matches!(self.current(), Some(c) if c.is_ascii_digit()) {
                self.advance();
            }
        } else if matches!(self.current(), Some(c) if is_identifier_begin(c)) {
            while matches!(self.current(), Some(c) if is_identifier_part(c)) {
                self.advance();
            }
        } else {
            let span = self.span_from(begin);
            self.diag.error(span, "expected a name or index after `#`");
            return Token::new(TokenType::SymbolLiteral, span)
                .with_error(true)
                .with_str(InternedString::default());
        }
        let name = self.strings.insert(&self.source[name_begin..self.pos]);
        Token::new(TokenType::SymbolLiteral, self.span_from(begin)).with_str(name)
    }

    fn lex_tuple_field(&mut self) -> Token {
        let begin = self.offset();
        let mut value: i64 = 0;
        let mut overflow = false;
        while let Some(c) = self.current() {
            let Some(digit) = c.to_digit(10) else { break };
            self.advance();
            value = match value.checked_mul(10).and_then(|v| v.checked_add(i64::from(digit))) {
                Some(v) => v,
                None => {
                    overflow = true;
                    0
                }
            };
        }
        let span = self.span_from(begin);
        if overflow {
            self.diag.error(span, "number is too large (overflow)");
        }
        Token::new(TokenType::TupleField, span).with_int(value).with_error(overflow)
    }

    fn lex_number(&mut self) -> Token {
        let begin = self.offset();

        // Determine the base of the number literal.
        let mut base: u32 = 10;
        // More relaxed base used to consume digits, so `0b12` reports an
        // invalid digit instead of splitting into two tokens.
        let mut parse_base: u32 = 10;
        if self.current() == Some('0') {
            self.advance();
            if let Some(specifier) = self.current() {
                if specifier.is_alphabetic() {
                    match specifier {
                        'b' => base = 2,
                        'o' => base = 8,
                        'x' => {
                            base = 16;
                            parse_base = 16;
                        }
                        _ => {
                            let span = Span::new(self.offset(), self.offset() + 1);
                            self.diag
                                .error(span, "expected a valid number format specifier ('b', 'o' or 'x')");
                            return Token::new(TokenType::IntegerLiteral, self.span_from(begin))
                                .with_error(true)
                                .with_int(0);
                        }
                    }
                    self.advance();
                }
            }
        }

        let mut int_value: i64 = 0;
        while let Some(c) = self.current() {
            if c == '_' {
                self.advance();
                continue;
            }
            if c.to_digit(parse_base).is_none() {
                break;
            }
            if let Some(digit) = c.to_digit(base) {
                let next = int_value
                    .checked_mul(i64::from(base))
                    .and_then(|v| v.checked_add(i64::from(digit)));
                match next {
                    Some(v) => int_value = v,
                    None => {
                        self.advance();
                        let span = self.span_from(begin);
                        self.diag.error(span, "number is too large (overflow)");
                        return Token::new(TokenType::IntegerLiteral, span).with_error(true).with_int(0);
                    }
                }
                self.advance();
            } else {
                let span = Span::new(self.offset(), self.offset() + 1);
                self.diag.error(span, format!("invalid digit for base {base} number"));
                return Token::new(TokenType::IntegerLiteral, self.span_from(begin))
                    .with_error(true)
                    .with_int(int_value);
            }
        }

        if self.current() == Some('.') {
            self.advance();

            // Fractional digits use the same base, accumulated via Horner.
            let base_inv = 1.0 / f64::from(base);
            let mut float_value = 0.0;
            let mut pow = base_inv;
            while let Some(c) = self.current() {
                if c == '_' {
                    self.advance();
                    continue;
                }
                if c.to_digit(parse_base).is_none() {
                    break;
                }
                if let Some(digit) = c.to_digit(base) {
                    float_value += f64::from(digit) * pow;
                    pow *= base_inv;
                    self.advance();
                } else {
                    let span = Span::new(self.offset(), self.offset() + 1);
                    self.diag.error(span, format!("invalid digit for base {base} number"));
                    return Token::new(TokenType::FloatLiteral, self.span_from(begin))
                        .with_error(true)
                        .with_float(int_value as f64 + float_value);
                }
            }

            let mut token =
                Token::new(TokenType::FloatLiteral, self.span_from(begin)).with_float(int_value as f64 + float_value);
            if matches!(self.current(), Some(c) if is_identifier_part(c)) {
                token.has_error = true;
                let span = Span::new(self.offset(), self.offset() + 1);
                self.diag.error(span, "invalid alphabetic character after number");
            }
            return token;
        }

        let mut token = Token::new(TokenType::IntegerLiteral, self.span_from(begin)).with_int(int_value);
        if matches!(self.current(), Some(c) if is_identifier_part(c)) {
            token.has_error = true;
            let span = Span::new(self.offset(), self.offset() + 1);
            self.diag.error(span, "invalid alphabetic character after number");
        }
        token
    }

    fn lex_operator(&mut self) -> Option<Token> {
        use TokenType as T;

        let begin = self.offset();
        let c = self.current()?;
        let ty = match c {
            '(' => {
                self.advance();
                T::LeftParen
            }
            ')' => {
                self.advance();
                T::RightParen
            }
            '[' => {
                self.advance();
                T::LeftBracket
            }
            ']' => {
                self.advance();
                T::RightBracket
            }
            '{' => {
                self.advance();
                self.open_brace();
                T::LeftBrace
            }
            '}' => {
                self.advance();
                return Some(self.close_brace(begin));
            }
            '.' => {
                self.advance();
                T::Dot
            }
            ',' => {
                self.advance();
                T::Comma
            }
            ':' => {
                self.advance();
                T::Colon
            }
            ';' => {
                self.advance();
                T::Semicolon
            }
            '?' => {
                self.advance();
                match self.current() {
                    Some('.') => {
                        self.advance();
                        T::QuestionDot
                    }
                    Some('?') => {
                        self.advance();
                        T::QuestionQuestion
                    }
                    Some('(') => {
                        self.advance();
                        T::QuestionParen
                    }
                    Some('[') => {
                        self.advance();
                        T::QuestionBracket
                    }
                    _ => T::Question,
                }
            }
            '+' => {
                self.advance();
                if self.accept('+') {
                    T::PlusPlus
                } else if self.accept('=') {
                    T::PlusEquals
                } else {
                    T::Plus
                }
            }
            '-' => {
                self.advance();
                if self.accept('-') {
                    T::MinusMinus
                } else if self.accept('=') {
                    T::MinusEquals
                } else {
                    T::Minus
                }
            }
            '*' => {
                self.advance();
                if self.accept('*') {
                    if self.accept('=') {
                        T::StarStarEquals
                    } else {
                        T::StarStar
                    }
                } else if self.accept('=') {
                    T::StarEquals
                } else {
                    T::Star
                }
            }
            '/' => {
                self.advance();
                if self.accept('=') {
                    T::SlashEquals
                } else {
                    T::Slash
                }
            }
            '%' => {
                self.advance();
                if self.accept('=') {
                    T::PercentEquals
                } else {
                    T::Percent
                }
            }
            '~' => {
                self.advance();
                T::BitwiseNot
            }
            '^' => {
                self.advance();
                T::BitwiseXor
            }
            '!' => {
                self.advance();
                if self.accept('=') {
                    T::NotEquals
                } else {
                    T::LogicalNot
                }
            }
            '|' => {
                self.advance();
                if self.accept('|') {
                    T::LogicalOr
                } else {
                    T::BitwiseOr
                }
            }
            '&' => {
                self.advance();
                if self.accept('&') {
                    T::LogicalAnd
                } else {
                    T::BitwiseAnd
                }
            }
            '=' => {
                self.advance();
                if self.accept('=') {
                    T::EqualsEquals
                } else {
                    T::Equals
                }
            }
            '<' => {
                self.advance();
                if self.accept('=') {
                    T::LessEquals
                } else if self.accept('<') {
                    T::LeftShift
                } else {
                    T::Less
                }
            }
            '>' => {
                self.advance();
                if self.accept('=') {
                    T::GreaterEquals
                } else if self.accept('>') {
                    T::RightShift
                } else {
                    T::Greater
                }
            }
            _ => return None,
        };
        Some(Token::new(ty, self.span_from(begin)))
    }

    fn open_brace(&mut self) {
        if let Some(Mode::Code { braces, .. }) = self.modes.last_mut() {
            *braces += 1;
        }
    }

    /// Decides between `RightBrace` and `StringBlockEnd` based on the brace
    /// balance of the current code frame.
    fn close_brace(&mut self, begin: u32) -> Token {
        match self.modes.last_mut() {
            Some(Mode::Code { interpolation, braces }) => {
                if *braces == 0 && *interpolation {
                    self.modes.pop();
                    Token::new(TokenType::StringBlockEnd, self.span_from(begin))
                } else {
                    *braces = braces.saturating_sub(1);
                    Token::new(TokenType::RightBrace, self.span_from(begin))
                }
            }
            _ => Token::new(TokenType::RightBrace, self.span_from(begin)),
        }
    }

    // --- string literals ---

    /// Lexes inside a string literal until content ends or a structural token
    /// (`StringEnd`, `StringVar`, `StringBlockStart`) takes over.
    fn lex_string(&mut self, delim: char) -> Token {
        let begin = self.offset();
        self.buffer.clear();
        let mut has_error = false;

        loop {
            let read_begin = self.offset();
            let Some(c) = self.current() else {
                self.diag
                    .error(self.span_from(begin), "unterminated string literal at the end of file");
                self.modes.pop();
                if self.buffer.is_empty() {
                    return Token::new(TokenType::StringEnd, Span::at(self.offset())).with_error(true);
                }
                return self.string_content(begin, true);
            };

            if c == delim {
                if !self.buffer.is_empty() {
                    return self.string_content(begin, has_error);
                }
                self.advance();
                self.modes.pop();
                return Token::new(TokenType::StringEnd, self.span_from(read_begin)).with_error(has_error);
            }

            if c == '$' {
                match self.peek() {
                    Some('{') => {
                        if !self.buffer.is_empty() {
                            return self.string_content(begin, has_error);
                        }
                        self.advance();
                        self.advance();
                        self.modes.push(Mode::Code {
                            interpolation: true,
                            braces: 0,
                        });
                        return Token::new(TokenType::StringBlockStart, self.span_from(read_begin));
                    }
                    Some(next) if is_identifier_begin(next) => {
                        if !self.buffer.is_empty() {
                            return self.string_content(begin, has_error);
                        }
                        self.advance();
                        self.modes.pop();
                        self.modes.push(Mode::StrVar { delim });
                        return Token::new(TokenType::StringVar, self.span_from(read_begin));
                    }
                    _ => {
                        self.advance();
                        self.buffer.push('$');
                        continue;
                    }
                }
            }

            if c == '\\' {
                self.advance();
                let Some(escape) = self.current() else {
                    self.diag
                        .error(Span::new(read_begin, self.offset()), "incomplete escape sequence");
                    has_error = true;
                    continue;
                };
                self.advance();
                match escape {
                    'n' => self.buffer.push('\n'),
                    'r' => self.buffer.push('\r'),
                    't' => self.buffer.push('\t'),
                    '"' | '\'' | '\\' | '$' => self.buffer.push(escape),
                    _ => {
                        self.diag
                            .error(Span::new(read_begin, self.offset()), "invalid escape sequence");
                        has_error = true;
                    }
                }
                continue;
            }

            self.advance();
            self.buffer.push(c);
        }
    }

    fn string_content(&mut self, begin: u32, has_error: bool) -> Token {
        let value = self.strings.insert(&self.buffer);
        self.buffer.clear();
        Token::new(TokenType::StringContent, self.span_from(begin))
            .with_str(value)
            .with_error(has_error)
    }
}

fn is_identifier_begin(c: char) -> bool {
    c == '_' || unicode_ident::is_xid_start(c)
}

fn is_identifier_part(c: char) -> bool {
    c == '_' || unicode_ident::is_xid_continue(c)
}

#[cfg(test)]
mod tests;
