//! Lexer for the prompt template language
//!
//! Source is split into literal text and `{{ ... }}` actions by [`lex`]; the
//! inside of each action is tokenized with logos. Trim markers and comments
//! are resolved here so the grammar only ever sees `Text`, `Open`, the action
//! tokens, and `Close`.

use logos::{Lexer, Logos};

use crate::error::ParseError;

/// Byte range in source text
pub type Span = std::ops::Range<usize>;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\n\r]+")]
pub enum Token {
    // Produced by the scanner, never by logos
    Text(String),
    Open,
    Close,
    Error,

    // Keywords
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("end")]
    End,
    #[token("range")]
    Range,
    #[token("with")]
    With,
    #[token("define")]
    Define,
    #[token("template")]
    Template,
    #[token("nil")]
    Nil,
    #[token("true")]
    True,
    #[token("false")]
    False,

    // Operators and delimiters
    #[token(":=")]
    Declare,
    #[token("=")]
    Assign,
    #[token("|")]
    Pipe,
    #[token(",")]
    Comma,
    #[token("(")]
    ParenOpen,
    #[token(")")]
    ParenClose,
    #[token(".")]
    Dot,

    /// `)` immediately followed by a field chain, as in `(index .x 0).Name`
    #[regex(r"\)(\.[a-zA-Z_][a-zA-Z0-9_]*)+", |lex| field_chain(&lex.slice()[1..]))]
    ParenCloseField(Vec<String>),

    #[regex(r"(\.[a-zA-Z_][a-zA-Z0-9_]*)+", |lex| field_chain(lex.slice()))]
    Field(Vec<String>),

    #[regex(r"\$[a-zA-Z0-9_]*(\.[a-zA-Z_][a-zA-Z0-9_]*)*", variable_chain)]
    Variable(Vec<String>),

    // Literals - identifiers must come after keywords
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string(), priority = 1)]
    Ident(String),

    #[regex(r#""([^"\\\n]|\\.)*""#, unquote)]
    #[regex(r"`[^`]*`", |lex| { let s = lex.slice(); s[1..s.len()-1].to_string() })]
    String(String),

    /// `'a'`, carried as its code point
    #[regex(r"'([^'\\\n]|\\[^\n])+'", unquote_char)]
    Char(i64),

    #[regex(r"-?[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),

    #[regex(r"-?[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),
}

fn field_chain(s: &str) -> Vec<String> {
    s.split('.')
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

fn variable_chain(lex: &mut Lexer<Token>) -> Vec<String> {
    lex.slice().split('.').map(str::to_string).collect()
}

/// Decode a double-quoted string literal
fn unquote(lex: &mut Lexer<Token>) -> Option<String> {
    let s = lex.slice();
    unescape(&s[1..s.len() - 1])
}

/// Decode a single-quoted character literal; more than one character is an error
fn unquote_char(lex: &mut Lexer<Token>) -> Option<i64> {
    let s = lex.slice();
    let decoded = unescape(&s[1..s.len() - 1])?;
    let mut chars = decoded.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Some(i64::from(u32::from(c))),
        _ => None,
    }
}

fn unescape(body: &str) -> Option<String> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'f' => out.push('\x0c'),
            'v' => out.push('\x0b'),
            '0' => out.push('\0'),
            '\\' => out.push('\\'),
            '"' => out.push('"'),
            '\'' => out.push('\''),
            'x' => {
                let hex: String = chars.by_ref().take(2).collect();
                out.push(char::from(u8::from_str_radix(&hex, 16).ok()?));
            }
            'u' => {
                let hex: String = chars.by_ref().take(4).collect();
                out.push(char::from_u32(u32::from_str_radix(&hex, 16).ok()?)?);
            }
            _ => return None,
        }
    }
    Some(out)
}

fn is_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n')
}

/// Lex a template into text, delimiter, and action tokens with spans
pub fn lex(source: &str) -> Result<Vec<(Token, Span)>, ParseError> {
    let mut tokens = Vec::new();
    let mut pos = 0;
    let mut trim_next = false;

    loop {
        let open = match source[pos..].find("{{") {
            Some(offset) => pos + offset,
            None => {
                push_text(&mut tokens, source, pos..source.len(), trim_next, false);
                return Ok(tokens);
            }
        };

        let mut inner_start = open + 2;
        let trim_left = source[inner_start..].starts_with('-')
            && source[inner_start + 1..].starts_with(is_space);
        if trim_left {
            inner_start += 1;
        }
        push_text(&mut tokens, source, pos..open, trim_next, trim_left);

        let close = find_close(source, open, inner_start)?;
        let mut inner_end = close;
        if close > inner_start + 1
            && source[..close].ends_with('-')
            && source[..close - 1].ends_with(is_space)
        {
            inner_end = close - 1;
            trim_next = true;
        } else {
            trim_next = false;
        }

        let inner = &source[inner_start..inner_end];
        if !inner.trim_start().starts_with("/*") {
            tokens.push((Token::Open, open..inner_start));
            for (tok, span) in Token::lexer(inner).spanned() {
                let span = inner_start + span.start..inner_start + span.end;
                tokens.push((tok.unwrap_or(Token::Error), span));
            }
            tokens.push((Token::Close, inner_end..close + 2));
        } else if !inner.trim_end().ends_with("*/") {
            return Err(ParseError::syntax(open..close + 2, "comment ends before closing delimiter"));
        }

        pos = close + 2;
    }
}

fn push_text(tokens: &mut Vec<(Token, Span)>, source: &str, span: Span, trim_start: bool, trim_end: bool) {
    let mut text = &source[span.clone()];
    let mut start = span.start;
    if trim_start {
        let trimmed = text.trim_start_matches(is_space);
        start += text.len() - trimmed.len();
        text = trimmed;
    }
    if trim_end {
        text = text.trim_end_matches(is_space);
    }
    if !text.is_empty() {
        tokens.push((Token::Text(text.to_string()), start..start + text.len()));
    }
}

/// Find the byte offset of the `}}` closing the action opened at `open`
fn find_close(source: &str, open: usize, inner_start: usize) -> Result<usize, ParseError> {
    let unclosed = || ParseError::syntax(open..source.len(), "unclosed action");
    let rest = &source[inner_start..];

    // Comments may contain anything, including quotes and braces
    let body = rest.trim_start_matches(is_space);
    if body.starts_with("/*") {
        let comment_start = inner_start + (rest.len() - body.len());
        let comment_end = source[comment_start + 2..]
            .find("*/")
            .map(|i| comment_start + 2 + i + 2)
            .ok_or_else(unclosed)?;
        return source[comment_end..]
            .find("}}")
            .map(|i| comment_end + i)
            .ok_or_else(unclosed);
    }

    let bytes = source.as_bytes();
    let mut i = inner_start;
    while i < bytes.len() {
        match bytes[i] {
            b'}' if bytes.get(i + 1) == Some(&b'}') => return Ok(i),
            quote @ (b'"' | b'\'') => {
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            b'`' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b'`' {
                    i += 1;
                }
            }
            _ => {}
        }
        i += 1;
    }
    Err(unclosed())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<Token> {
        lex(input).expect("Should lex").into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn test_plain_text() {
        assert_eq!(kinds("hello world"), vec![Token::Text("hello world".to_string())]);
    }

    #[test]
    fn test_field_action() {
        assert_eq!(
            kinds("Q: {{ .Prompt }}"),
            vec![
                Token::Text("Q: ".to_string()),
                Token::Open,
                Token::Field(vec!["Prompt".to_string()]),
                Token::Close,
            ]
        );
    }

    #[test]
    fn test_field_chain_and_dot() {
        assert_eq!(
            kinds("{{ .Function.Name . }}"),
            vec![
                Token::Open,
                Token::Field(vec!["Function".to_string(), "Name".to_string()]),
                Token::Dot,
                Token::Close,
            ]
        );
    }

    #[test]
    fn test_variables() {
        assert_eq!(
            kinds("{{ $index, $_ := $.Messages }}"),
            vec![
                Token::Open,
                Token::Variable(vec!["$index".to_string()]),
                Token::Comma,
                Token::Variable(vec!["$_".to_string()]),
                Token::Declare,
                Token::Variable(vec!["$".to_string(), "Messages".to_string()]),
                Token::Close,
            ]
        );
    }

    #[test]
    fn test_keywords_and_idents() {
        assert_eq!(
            kinds("{{ if eq .Role \"user\" }}"),
            vec![
                Token::Open,
                Token::If,
                Token::Ident("eq".to_string()),
                Token::Field(vec!["Role".to_string()]),
                Token::String("user".to_string()),
                Token::Close,
            ]
        );
    }

    #[test]
    fn test_trim_markers() {
        assert_eq!(
            kinds("a  \n{{- .X -}}\n  b"),
            vec![
                Token::Text("a".to_string()),
                Token::Open,
                Token::Field(vec!["X".to_string()]),
                Token::Close,
                Token::Text("b".to_string()),
            ]
        );
    }

    #[test]
    fn test_negative_number_is_not_trim_marker() {
        assert_eq!(
            kinds("{{-3}}"),
            vec![Token::Open, Token::Int(-3), Token::Close]
        );
    }

    #[test]
    fn test_comment_dropped() {
        assert_eq!(
            kinds("a {{- /* note with }} inside */ -}} b"),
            vec![Token::Text("a".to_string()), Token::Text("b".to_string())]
        );
    }

    #[test]
    fn test_string_escapes_and_raw() {
        assert_eq!(
            kinds(r#"{{ printf "\n\n" `raw}}` }}"#),
            vec![
                Token::Open,
                Token::Ident("printf".to_string()),
                Token::String("\n\n".to_string()),
                Token::String("raw}}".to_string()),
                Token::Close,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            kinds("{{ 42 3.5 }}"),
            vec![Token::Open, Token::Int(42), Token::Float(3.5), Token::Close]
        );
    }

    #[test]
    fn test_char_literals() {
        assert_eq!(
            kinds(r"{{ 'a' '\n' '}' }}"),
            vec![
                Token::Open,
                Token::Char(97),
                Token::Char(10),
                Token::Char(125),
                Token::Close,
            ]
        );
        assert!(kinds("{{ 'ab' }}").contains(&Token::Error));
    }

    #[test]
    fn test_paren_field_chain() {
        assert_eq!(
            kinds("{{ (index .Messages 0).Role }}"),
            vec![
                Token::Open,
                Token::ParenOpen,
                Token::Ident("index".to_string()),
                Token::Field(vec!["Messages".to_string()]),
                Token::Int(0),
                Token::ParenCloseField(vec!["Role".to_string()]),
                Token::Close,
            ]
        );
    }

    #[test]
    fn test_spans_point_into_source() {
        let source = "ab{{ .X }}";
        let tokens = lex(source).expect("Should lex");
        assert_eq!(tokens[0].1, 0..2);
        assert_eq!(tokens[1].1, 2..4);
        assert_eq!(&source[tokens[2].1.clone()], ".X");
        assert_eq!(tokens[3].1, 8..10);
    }

    #[test]
    fn test_unclosed_action() {
        assert!(lex("hello {{ .Prompt").is_err());
        assert!(lex("{{ \"}} ").is_err());
    }

    #[test]
    fn test_unknown_character_becomes_error_token() {
        assert!(kinds("{{ @ }}").contains(&Token::Error));
    }
}
