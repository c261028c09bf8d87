//! Error types for parsing and execution

use ariadne::{Color, Label, Report, ReportKind, Source};
use thiserror::Error;

/// Byte range in source text
pub type Span = std::ops::Range<usize>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("Parse error at {span:?}: {message}")]
    Syntax {
        span: Span,
        message: String,
        expected: Vec<String>,
    },
}

impl ParseError {
    /// Create a syntax error with no expectations
    pub fn syntax(span: Span, message: impl Into<String>) -> Self {
        ParseError::Syntax {
            span,
            message: message.into(),
            expected: Vec::new(),
        }
    }

    /// Source range the error points at
    pub fn span(&self) -> &Span {
        match self {
            ParseError::Syntax { span, .. } => span,
        }
    }

    /// Format the error with source context using ariadne
    pub fn format(&self, source: &str, filename: &str) -> String {
        let mut buf = Vec::new();
        match self {
            ParseError::Syntax {
                span,
                message,
                expected,
            } => {
                let expected_str = if expected.is_empty() {
                    String::new()
                } else {
                    format!("\nExpected: {}", expected.join(", "))
                };

                let written = Report::build(ReportKind::Error, filename, span.start)
                    .with_message(message)
                    .with_label(
                        Label::new((filename, span.clone()))
                            .with_message(format!("{}{}", message, expected_str))
                            .with_color(Color::Red),
                    )
                    .finish()
                    .write((filename, Source::from(source)), &mut buf);
                if written.is_err() {
                    return self.to_string();
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl<'a> From<chumsky::error::Rich<'a, crate::parser::lexer::Token>> for ParseError {
    fn from(err: chumsky::error::Rich<'a, crate::parser::lexer::Token>) -> Self {
        use chumsky::error::RichReason;

        let message = match err.reason() {
            RichReason::ExpectedFound { found, .. } => {
                let found_str = match found {
                    Some(tok) => format_token(tok),
                    None => "end of input".to_string(),
                };
                format!("Unexpected {}", found_str)
            }
            RichReason::Custom(msg) => msg.to_string(),
        };

        // Format expected tokens nicely
        let mut expected: Vec<String> = err
            .expected()
            .filter_map(|e| match e {
                chumsky::error::RichPattern::Token(tok) => Some(format_token(tok)),
                chumsky::error::RichPattern::Label(label) => Some(label.to_string()),
                chumsky::error::RichPattern::EndOfInput => Some("end of input".to_string()),
                chumsky::error::RichPattern::Identifier(s) => Some(format!("identifier '{}'", s)),
                chumsky::error::RichPattern::Any => Some("any token".to_string()),
                chumsky::error::RichPattern::SomethingElse => None,
            })
            .collect();
        expected.sort();
        expected.dedup();

        ParseError::Syntax {
            span: err.span().into_range(),
            message,
            expected,
        }
    }
}

/// Format a token for human-readable error messages
fn format_token(tok: &crate::parser::lexer::Token) -> String {
    use crate::parser::lexer::Token;
    match tok {
        Token::Text(_) => "text".to_string(),
        Token::Open => "'{{'".to_string(),
        Token::Close => "'}}'".to_string(),
        Token::Error => "unrecognized character".to_string(),
        Token::Ident(s) => format!("function '{}'", s),
        Token::Field(f) => format!("field '.{}'", f.join(".")),
        Token::Variable(v) => format!("variable '{}'", v.join(".")),
        Token::String(s) => format!("string {:?}", s),
        Token::Int(n) => format!("number {}", n),
        Token::Char(c) => match char::from_u32(*c as u32) {
            Some(c) => format!("character {:?}", c),
            None => format!("character {}", c),
        },
        Token::Float(n) => format!("number {}", n),
        Token::Declare => "':='".to_string(),
        Token::Assign => "'='".to_string(),
        Token::Pipe => "'|'".to_string(),
        Token::Comma => "','".to_string(),
        Token::ParenOpen => "'('".to_string(),
        Token::ParenClose | Token::ParenCloseField(_) => "')'".to_string(),
        Token::Dot => "'.'".to_string(),
        Token::If => "keyword 'if'".to_string(),
        Token::Else => "keyword 'else'".to_string(),
        Token::End => "keyword 'end'".to_string(),
        Token::Range => "keyword 'range'".to_string(),
        Token::With => "keyword 'with'".to_string(),
        Token::Define => "keyword 'define'".to_string(),
        Token::Template => "keyword 'template'".to_string(),
        Token::Nil => "keyword 'nil'".to_string(),
        Token::True => "keyword 'true'".to_string(),
        Token::False => "keyword 'false'".to_string(),
    }
}

/// Errors raised while executing a compiled template
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("function \"{name}\" not defined")]
    UndefinedFunction { name: String },

    #[error("undefined variable: {name}")]
    UndefinedVariable { name: String },

    #[error("no such template \"{name}\"")]
    UndefinedTemplate { name: String },

    #[error("wrong number of args for {name}: want {want} got {got}")]
    WrongArgCount {
        name: String,
        want: String,
        got: usize,
    },

    #[error("can't evaluate field {field} in type {kind}")]
    Field { field: String, kind: &'static str },

    #[error("can't give argument to non-function {operand}")]
    NotAFunction { operand: String },

    #[error("error calling {name}: {message}")]
    Call { name: String, message: String },

    #[error("exceeded maximum template depth ({0})")]
    Depth(usize),

    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl ExecError {
    /// Create a function call error
    pub fn call(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Call {
            name: name.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syntax_error_display() {
        let err = ParseError::syntax(3..7, "unclosed action");
        assert_eq!(err.to_string(), "Parse error at 3..7: unclosed action");
        assert_eq!(err.span(), &(3..7));
    }

    #[test]
    fn test_format_includes_message() {
        let err = ParseError::syntax(0..2, "unclosed action");
        let formatted = err.format("{{ .Prompt", "prompt.gotmpl");
        assert!(formatted.contains("unclosed action"));
        assert!(formatted.contains("prompt.gotmpl"));
    }

    #[test]
    fn test_rich_error_conversion_mentions_found_token() {
        let errs = crate::parser::parse("{{ end }}").expect_err("Should fail");
        let message = errs[0].to_string();
        assert!(message.contains("Unexpected"), "got {}", message);
    }

    #[test]
    fn test_exec_error_messages() {
        let err = ExecError::UndefinedFunction {
            name: "upper".to_string(),
        };
        assert_eq!(err.to_string(), "function \"upper\" not defined");
        let err = ExecError::call("index", "index out of range: 3");
        assert_eq!(err.to_string(), "error calling index: index out of range: 3");
    }
}
