use pretty_assertions::assert_eq;

use super::*;

fn lex(source: &str) -> (Vec<Token>, StringTable, Diagnostics) {
    let mut strings = StringTable::new();
    let mut diag = Diagnostics::new();
    let tokens = Lexer::new(source, &mut strings, &mut diag).tokens();
    (tokens, strings, diag)
}

fn types(source: &str) -> Vec<TokenType> {
    let (tokens, _, _) = lex(source);
    tokens.iter().map(|t| t.ty).collect()
}

#[test]
fn keywords_and_identifiers() {
    let (tokens, strings, diag) = lex("func count while counters");
    assert!(!diag.has_errors());
    assert_eq!(
        tokens.iter().map(|t| t.ty).collect::<Vec<_>>(),
        vec![
            TokenType::KwFunc,
            TokenType::Identifier,
            TokenType::KwWhile,
            TokenType::Identifier,
            TokenType::Eof,
        ]
    );
    assert_eq!(strings.get(tokens[1].str_value()), "count");
    assert_eq!(strings.get(tokens[3].str_value()), "counters");
}

#[test]
fn token_spans_reproduce_the_source() {
    let source = "var answer = 40 + 2;";
    let (tokens, _, _) = lex(source);
    let lexemes: Vec<&str> = tokens
        .iter()
        .filter(|t| t.ty != TokenType::Eof)
        .map(|t| t.span.text(source))
        .collect();
    assert_eq!(lexemes, vec!["var", "answer", "=", "40", "+", "2", ";"]);
}

#[test]
fn operators() {
    assert_eq!(
        types("+ ++ += - -- -= * ** *= **= / /= % %="),
        vec![
            TokenType::Plus,
            TokenType::PlusPlus,
            TokenType::PlusEquals,
            TokenType::Minus,
            TokenType::MinusMinus,
            TokenType::MinusEquals,
            TokenType::Star,
            TokenType::StarStar,
            TokenType::StarEquals,
            TokenType::StarStarEquals,
            TokenType::Slash,
            TokenType::SlashEquals,
            TokenType::Percent,
            TokenType::PercentEquals,
            TokenType::Eof,
        ]
    );
    assert_eq!(
        types("? ?. ?? ?( ?[ == != <= >= << >> && || ! & | ^ ~"),
        vec![
            TokenType::Question,
            TokenType::QuestionDot,
            TokenType::QuestionQuestion,
            TokenType::QuestionParen,
            TokenType::QuestionBracket,
            TokenType::EqualsEquals,
            TokenType::NotEquals,
            TokenType::LessEquals,
            TokenType::GreaterEquals,
            TokenType::LeftShift,
            TokenType::RightShift,
            TokenType::LogicalAnd,
            TokenType::LogicalOr,
            TokenType::LogicalNot,
            TokenType::BitwiseAnd,
            TokenType::BitwiseOr,
            TokenType::BitwiseXor,
            TokenType::BitwiseNot,
            TokenType::Eof,
        ]
    );
}

#[test]
fn integer_literals_with_bases_and_underscores() {
    let (tokens, _, diag) = lex("123 1_000_000 0b1011 0o777 0xff 0x1_F");
    assert!(!diag.has_errors());
    let values: Vec<i64> = tokens
        .iter()
        .filter(|t| t.ty == TokenType::IntegerLiteral)
        .map(Token::int_value)
        .collect();
    assert_eq!(values, vec![123, 1_000_000, 0b1011, 0o777, 0xff, 0x1F]);
}

#[test]
fn float_literals_use_the_literal_base() {
    let (tokens, _, diag) = lex("1.5 0b10.1 0x10.8");
    assert!(!diag.has_errors());
    let values: Vec<f64> = tokens
        .iter()
        .filter(|t| t.ty == TokenType::FloatLiteral)
        .map(Token::float_value)
        .collect();
    assert_eq!(values, vec![1.5, 2.5, 16.5]);
}

#[test]
fn integer_overflow_is_a_lexical_error() {
    let (tokens, _, diag) = lex("99999999999999999999");
    assert!(diag.has_errors());
    assert_eq!(tokens[0].ty, TokenType::IntegerLiteral);
    assert!(tokens[0].has_error);
    assert_eq!(tokens[0].int_value(), 0);
}

#[test]
fn invalid_digit_for_base() {
    let (tokens, _, diag) = lex("0b12");
    assert!(diag.has_errors());
    assert!(tokens[0].has_error);
}

#[test]
fn alphabetic_suffix_is_an_error_but_keeps_the_value() {
    let (tokens, _, diag) = lex("123abc");
    assert!(diag.has_errors());
    assert_eq!(tokens[0].ty, TokenType::IntegerLiteral);
    assert!(tokens[0].has_error);
    assert_eq!(tokens[0].int_value(), 123);
}

#[test]
fn tuple_field_indices_after_dot() {
    let (tokens, _, diag) = lex("pair.0.1");
    assert!(!diag.has_errors());
    assert_eq!(
        tokens.iter().map(|t| t.ty).collect::<Vec<_>>(),
        vec![
            TokenType::Identifier,
            TokenType::Dot,
            TokenType::TupleField,
            TokenType::Dot,
            TokenType::TupleField,
            TokenType::Eof,
        ]
    );
    assert_eq!(tokens[2].int_value(), 0);
    assert_eq!(tokens[4].int_value(), 1);
}

#[test]
fn simple_string() {
    let (tokens, strings, diag) = lex(r#""hello\nworld""#);
    assert!(!diag.has_errors());
    assert_eq!(
        tokens.iter().map(|t| t.ty).collect::<Vec<_>>(),
        vec![
            TokenType::StringStart,
            TokenType::StringContent,
            TokenType::StringEnd,
            TokenType::Eof,
        ]
    );
    assert_eq!(strings.get(tokens[1].str_value()), "hello\nworld");
}

#[test]
fn single_quoted_string_can_hold_double_quotes() {
    let (tokens, strings, diag) = lex(r#"'say "hi"'"#);
    assert!(!diag.has_errors());
    assert_eq!(strings.get(tokens[1].str_value()), "say \"hi\"");
}

#[test]
fn invalid_escape_is_reported_but_lexing_continues() {
    let (tokens, _, diag) = lex(r#""a\qb""#);
    assert!(diag.has_errors());
    assert_eq!(tokens[1].ty, TokenType::StringContent);
    assert!(tokens[1].has_error);
    assert_eq!(tokens[2].ty, TokenType::StringEnd);
}

#[test]
fn unterminated_string() {
    let (tokens, _, diag) = lex("\"abc");
    assert!(diag.has_errors());
    assert_eq!(tokens[0].ty, TokenType::StringStart);
    assert_eq!(tokens[1].ty, TokenType::StringContent);
    assert!(tokens[1].has_error);
}

#[test]
fn string_var_interpolation() {
    let (tokens, strings, diag) = lex(r#""x is $x!""#);
    assert!(!diag.has_errors());
    assert_eq!(
        tokens.iter().map(|t| t.ty).collect::<Vec<_>>(),
        vec![
            TokenType::StringStart,
            TokenType::StringContent,
            TokenType::StringVar,
            TokenType::Identifier,
            TokenType::StringContent,
            TokenType::StringEnd,
            TokenType::Eof,
        ]
    );
    assert_eq!(strings.get(tokens[1].str_value()), "x is ");
    assert_eq!(strings.get(tokens[3].str_value()), "x");
    assert_eq!(strings.get(tokens[4].str_value()), "!");
}

#[test]
fn string_block_interpolation_with_nested_braces() {
    // The map{} literal and the block expression both contain braces that
    // must not terminate the interpolation frame.
    let (tokens, _, diag) = lex(r#""v: ${ { map{1: 2}[1] } }""#);
    assert!(!diag.has_errors());
    let kinds: Vec<TokenType> = tokens.iter().map(|t| t.ty).collect();
    assert_eq!(
        kinds,
        vec![
            TokenType::StringStart,
            TokenType::StringContent,
            TokenType::StringBlockStart,
            TokenType::LeftBrace,
            TokenType::MapStart,
            TokenType::IntegerLiteral,
            TokenType::Colon,
            TokenType::IntegerLiteral,
            TokenType::RightBrace,
            TokenType::LeftBracket,
            TokenType::IntegerLiteral,
            TokenType::RightBracket,
            TokenType::RightBrace,
            TokenType::StringBlockEnd,
            TokenType::StringEnd,
            TokenType::Eof,
        ]
    );
}

#[test]
fn interpolation_block_may_contain_other_strings() {
    let (tokens, strings, diag) = lex(r#""${'inner'}""#);
    assert!(!diag.has_errors());
    assert_eq!(
        tokens.iter().map(|t| t.ty).collect::<Vec<_>>(),
        vec![
            TokenType::StringStart,
            TokenType::StringBlockStart,
            TokenType::StringStart,
            TokenType::StringContent,
            TokenType::StringEnd,
            TokenType::StringBlockEnd,
            TokenType::StringEnd,
            TokenType::Eof,
        ]
    );
    assert_eq!(strings.get(tokens[3].str_value()), "inner");
}

#[test]
fn dollar_without_identifier_is_literal_text() {
    let (tokens, strings, diag) = lex(r#""5$ only""#);
    assert!(!diag.has_errors());
    assert_eq!(strings.get(tokens[1].str_value()), "5$ only");
}

#[test]
fn escaped_dollar_suppresses_interpolation() {
    let (tokens, strings, diag) = lex(r#""\$x""#);
    assert!(!diag.has_errors());
    assert_eq!(strings.get(tokens[1].str_value()), "$x");
}

#[test]
fn line_comments_are_skipped_by_default() {
    assert_eq!(
        types("1 // trailing\n2"),
        vec![TokenType::IntegerLiteral, TokenType::IntegerLiteral, TokenType::Eof]
    );
}

#[test]
fn nested_block_comments() {
    // Depth 3 nesting must balance.
    let source = "a /* 1 /* 2 /* 3 */ 2 */ 1 */ b";
    let (tokens, _, diag) = lex(source);
    assert!(!diag.has_errors());
    assert_eq!(
        tokens.iter().map(|t| t.ty).collect::<Vec<_>>(),
        vec![TokenType::Identifier, TokenType::Identifier, TokenType::Eof]
    );
}

#[test]
fn comments_are_emitted_when_requested() {
    let mut strings = StringTable::new();
    let mut diag = Diagnostics::new();
    let mut lexer = Lexer::new("1 /* c */ 2", &mut strings, &mut diag);
    lexer.set_ignore_comments(false);
    let tokens = lexer.tokens();
    assert_eq!(
        tokens.iter().map(|t| t.ty).collect::<Vec<_>>(),
        vec![
            TokenType::IntegerLiteral,
            TokenType::Comment,
            TokenType::IntegerLiteral,
            TokenType::Eof,
        ]
    );
}

#[test]
fn map_and_set_starts() {
    assert_eq!(
        types("map{} set{} map {}"),
        vec![
            TokenType::MapStart,
            TokenType::RightBrace,
            TokenType::SetStart,
            TokenType::RightBrace,
            // With a space in between, `map` is a plain identifier.
            TokenType::Identifier,
            TokenType::LeftBrace,
            TokenType::RightBrace,
            TokenType::Eof,
        ]
    );
}

#[test]
fn symbol_literals() {
    let (tokens, strings, diag) = lex("#name #123");
    assert!(!diag.has_errors());
    assert_eq!(tokens[0].ty, TokenType::SymbolLiteral);
    assert_eq!(strings.get(tokens[0].str_value()), "name");
    assert_eq!(strings.get(tokens[1].str_value()), "123");
}

#[test]
fn invalid_input_produces_error_token_and_continues() {
    let (tokens, _, diag) = lex("a ` b");
    assert!(diag.has_errors());
    assert_eq!(
        tokens.iter().map(|t| t.ty).collect::<Vec<_>>(),
        vec![
            TokenType::Identifier,
            TokenType::InvalidToken,
            TokenType::Identifier,
            TokenType::Eof,
        ]
    );
}

#[test]
fn eof_repeats() {
    let mut strings = StringTable::new();
    let mut diag = Diagnostics::new();
    let mut lexer = Lexer::new("", &mut strings, &mut diag);
    for _ in 0..3 {
        assert_eq!(lexer.next_token().ty, TokenType::Eof);
    }
}
