//! Chat Template - Render chat conversations into model prompts
//!
//! This library compiles prompt templates written in a Go `text/template`
//! style dialect, collates conversations, and renders them with either a
//! whole-conversation template or a legacy single-turn prompt/response
//! template. It also ships a catalog of known template families.
//!
//! # Example
//!
//! ```rust
//! use chat_template::message::Message;
//! use chat_template::{render, Values};
//!
//! let values = Values::new(vec![Message::system("Be brief."), Message::user("Hi")]);
//! let prompt = render(
//!     "{{ range .Messages }}<|{{ .Role }}|>{{ .Content }}{{ end }}<|assistant|>",
//!     &values,
//! )
//! .unwrap();
//! assert_eq!(prompt, "<|user|>Hi<|assistant|>");
//! ```

pub mod config;
pub mod error;
pub mod message;
pub mod parser;
pub mod staging;
pub mod template;

pub use config::Config;
pub use error::{ExecError, ParseError};
pub use parser::{parse, Tree};
pub use template::{Catalog, CatalogEntry, CatalogError, Template, Values};

use thiserror::Error;

/// Errors from compiling or executing a template
#[derive(Debug, Error)]
pub enum Error {
    /// The template source is malformed
    #[error("template: {}", format_parse_errors(.0))]
    Syntax(Vec<ParseError>),

    /// The template failed while rendering
    #[error("template: {0}")]
    Execution(#[from] ExecError),
}

impl From<Vec<ParseError>> for Error {
    fn from(errors: Vec<ParseError>) -> Self {
        Error::Syntax(errors)
    }
}

fn format_parse_errors(errors: &[ParseError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Compile `source` and render `values` with it
///
/// # Example
///
/// ```rust
/// use chat_template::message::Message;
/// use chat_template::{render, Values};
///
/// let values = Values::new(vec![
///     Message::user("Hi"),
///     Message::assistant("Hello"),
///     Message::user("Bye"),
/// ]);
/// let prompt = render("USER: {{ .Prompt }}\nASSISTANT: {{ .Response }}\n", &values).unwrap();
/// assert_eq!(prompt, "USER: Hi\nASSISTANT: Hello\nUSER: Bye\nASSISTANT: ");
/// ```
pub fn render(source: &str, values: &Values) -> Result<String, Error> {
    let tmpl = Template::parse(source)?;
    let mut out = Vec::new();
    tmpl.execute(&mut out, values)?;
    Ok(String::from_utf8_lossy(&out).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    #[test]
    fn test_render_modern() {
        let values = Values::new(vec![Message::user("a"), Message::user("b")]);
        let out = render("{{ range .Messages }}[{{ .Content }}]{{ end }}", &values).unwrap();
        assert_eq!(out, "[a\n\nb]");
    }

    #[test]
    fn test_render_syntax_error() {
        let err = render("{{ if .Prompt }}", &Values::default()).unwrap_err();
        assert!(matches!(err, Error::Syntax(_)));
        assert!(err.to_string().starts_with("template: "));
    }

    #[test]
    fn test_render_execution_error() {
        let err = render("{{ index .Prompt 1 2 }}", &Values::default()).unwrap_err();
        assert!(matches!(err, Error::Execution(_)));
    }
}
