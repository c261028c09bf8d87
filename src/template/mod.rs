//! Compiled prompt templates and conversation rendering
//!
//! A [`Template`] wraps one template source. It knows which variables the
//! source references and uses that to pick between two render paths:
//!
//! - **Modern** templates reference `.Messages` and render the whole
//!   conversation in a single pass.
//! - **Legacy** templates only know a single `.Prompt`/`.Response` pair. The
//!   conversation is rendered turn by turn, and the final turn is rendered
//!   from a copy of the template cut off just before its first reference to
//!   the response, so the output ends where generation should begin.
//!
//! # Example
//!
//! ```rust
//! use chat_template::message::Message;
//! use chat_template::template::{Template, Values};
//!
//! let tmpl = Template::parse("[INST] {{ .Prompt }} [/INST] {{ .Response }}</s>").unwrap();
//! let values = Values::new(vec![
//!     Message::user("Hi"),
//!     Message::assistant("Hello"),
//!     Message::user("Bye"),
//! ]);
//!
//! let mut out = Vec::new();
//! tmpl.execute(&mut out, &values).unwrap();
//! assert_eq!(
//!     String::from_utf8(out).unwrap(),
//!     "[INST] Hi [/INST] Hello</s>[INST] Bye [/INST] "
//! );
//! ```

pub mod catalog;
pub mod collate;
mod exec;
pub mod funcs;
pub mod tree;

pub use catalog::{Catalog, CatalogEntry, CatalogError};
pub use collate::{collate, CollatedMessage};
pub use exec::MAX_DEPTH;

use std::fmt;
use std::io::Write;
use std::str::FromStr;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::message::{Message, Role, Tool};
use crate::parser::ast::{Node, Tree};
use crate::parser::parse;
use crate::Error;

/// Render input: the conversation and the tools offered to the model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Values {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub tools: Vec<Tool>,
}

impl Values {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            tools: Vec::new(),
        }
    }

    pub fn with_tools(mut self, tools: Vec<Tool>) -> Self {
        self.tools = tools;
        self
    }
}

/// A compiled template
///
/// The raw source is kept verbatim; the compiled tree may carry a trailing
/// `{{ .Response }}` that the source never had. Safe to share between threads.
#[derive(Debug, Clone)]
pub struct Template {
    raw: String,
    tree: Tree,
    vars: OnceLock<Vec<String>>,
}

impl Template {
    /// Compile `source`, appending `{{ .Response }}` when the template
    /// references neither messages nor a response.
    pub fn parse(source: &str) -> Result<Self, Error> {
        let tree = tree::ensure_response(parse(source)?);
        Ok(Self {
            raw: source.to_string(),
            tree,
            vars: OnceLock::new(),
        })
    }

    /// The pass-through `{{ .Prompt }}` template
    pub fn default_template() -> &'static Template {
        static DEFAULT: OnceLock<Template> = OnceLock::new();
        DEFAULT.get_or_init(|| Template {
            raw: "{{ .Prompt }}".to_string(),
            tree: Tree::new(vec![
                Node::field_action("Prompt"),
                Node::field_action("Response"),
            ]),
            vars: OnceLock::new(),
        })
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Lowercased, sorted, deduplicated identifiers referenced anywhere in
    /// the template, including its sub-templates
    pub fn vars(&self) -> &[String] {
        self.vars.get_or_init(|| tree::variables(&self.tree))
    }

    /// A single-node tree wrapping the first node matching `predicate`
    pub fn subtree<F>(&self, predicate: F) -> Option<Tree>
    where
        F: Fn(&Node) -> bool,
    {
        tree::find_subtree(&self.tree.root, &predicate).map(|node| Tree {
            root: vec![node.clone()],
            defines: self.tree.defines.clone(),
        })
    }

    /// Render `values` into `w`.
    ///
    /// Modern templates stream into `w`, so output written before an
    /// execution error stays there. Legacy templates are rendered into a
    /// buffer first and write nothing on error.
    pub fn execute<W: Write + ?Sized>(&self, w: &mut W, values: &Values) -> Result<(), Error> {
        let (system, collated) = collate(&values.messages);

        if self.vars().iter().any(|v| v == "messages") {
            debug!(messages = collated.len(), "rendering modern template");
            let data = json!({
                "System": system,
                "Messages": serde_json::to_value(&collated).map_err(exec_error)?,
                "Tools": serde_json::to_value(&values.tools).map_err(exec_error)?,
            });
            exec::execute(&self.tree, w, &data)?;
            return Ok(());
        }

        debug!(messages = collated.len(), "rendering legacy template");
        let mut buf = Vec::new();
        let mut prompt = String::new();
        let mut response = String::new();
        for (i, msg) in collated.iter().enumerate() {
            if msg.role == Role::User {
                prompt.clone_from(&msg.content);
            } else {
                response.clone_from(&msg.content);
            }

            if i + 1 != collated.len() && !prompt.is_empty() && !response.is_empty() {
                let data = json!({"System": "", "Prompt": prompt, "Response": response});
                exec::execute(&self.tree, &mut buf, &data)?;
                prompt.clear();
                response.clear();
            }
        }

        if !response.is_empty() {
            debug!("discarding trailing response without a prompt turn");
        }

        let truncated = tree::truncate_at(&self.tree, "response");
        debug!(
            kept = truncated.root.len(),
            total = self.tree.root.len(),
            "truncated final turn at response"
        );
        exec::execute(&truncated, &mut buf, &json!({"System": system, "Prompt": prompt}))?;

        w.write_all(&buf).map_err(exec_error)?;
        Ok(())
    }
}

fn exec_error<E: Into<crate::ExecError>>(err: E) -> Error {
    Error::Execution(err.into())
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for Template {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Template::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ImageData, ToolCall};
    use crate::parser::ast::Expr;
    use insta::assert_snapshot;
    use pretty_assertions::assert_eq;
    use serde_json::Map;

    fn render(source: &str, messages: Vec<Message>) -> String {
        let tmpl = Template::parse(source).expect("Should parse");
        let mut out = Vec::new();
        tmpl.execute(&mut out, &Values::new(messages)).expect("Should render");
        String::from_utf8(out).unwrap()
    }

    fn hi_hello_bye() -> Vec<Message> {
        vec![
            Message::user("Hi"),
            Message::assistant("Hello"),
            Message::user("Bye"),
        ]
    }

    #[test]
    fn test_raw_source_round_trips() {
        let source = "{{ .System }} {{ .Prompt }}";
        let tmpl = Template::parse(source).unwrap();
        assert_eq!(tmpl.to_string(), source);
        assert_eq!(tmpl.tree().root.last(), Some(&Node::field_action("Response")));
        assert_eq!(tmpl.vars(), ["prompt", "response", "system"]);
    }

    #[test]
    fn test_from_str() {
        let tmpl: Template = "{{ range .Messages }}{{ .Content }}{{ end }}".parse().unwrap();
        assert_eq!(tmpl.vars(), ["content", "messages"]);
        assert!("{{ if }}".parse::<Template>().is_err());
    }

    #[test]
    fn test_syntax_error_is_reported() {
        let err = Template::parse("{{ .Prompt").unwrap_err();
        assert!(matches!(err, Error::Syntax(_)));
    }

    #[test]
    fn test_legacy_conversion() {
        let out = render(
            "[INST]{{ if .System }}{{ .System }} {{ end }}{{ .Prompt }}[/INST]{{ .Response }}</s>",
            hi_hello_bye(),
        );
        assert_snapshot!(out, @"[INST]Hi[/INST]Hello</s>[INST]Bye[/INST]");
    }

    #[test]
    fn test_legacy_without_response_reference() {
        // The appended {{ .Response }} is the truncation point
        let out = render("<|user|>{{ .Prompt }}<|assistant|>", hi_hello_bye());
        assert_eq!(out, "<|user|>Hi<|assistant|>Hello<|user|>Bye<|assistant|>");
    }

    #[test]
    fn test_legacy_system_only_in_final_turn() {
        let mut messages = vec![Message::system("Be brief.")];
        messages.extend(hi_hello_bye());
        let out = render(
            "{{ if .System }}<<{{ .System }}>>{{ end }}Q:{{ .Prompt }} A:{{ .Response }};",
            messages,
        );
        assert_eq!(out, "Q:Hi A:Hello;<<Be brief.>>Q:Bye A:");
    }

    #[test]
    fn test_legacy_empty_conversation() {
        assert_eq!(render("Q:{{ .Prompt }} A:{{ .Response }}", Vec::new()), "Q: A:");
    }

    #[test]
    fn test_legacy_user_only_history_collapses() {
        let out = render(
            "Q:{{ .Prompt }} A:{{ .Response }};",
            vec![Message::user("a"), Message::user("b")],
        );
        assert_eq!(out, "Q:a\n\nb A:");
    }

    #[test]
    fn test_legacy_trailing_response_discarded() {
        let out = render(
            "Q:{{ .Prompt }} A:{{ .Response }};",
            vec![Message::user("Hi"), Message::assistant("Hello")],
        );
        assert_eq!(out, "Q:Hi A:");
    }

    #[test]
    fn test_legacy_does_not_touch_compiled_tree() {
        let tmpl = Template::parse("Q:{{ .Prompt }} A:{{ .Response }};").unwrap();
        let before = tmpl.tree().clone();
        let mut out = Vec::new();
        tmpl.execute(&mut out, &Values::new(hi_hello_bye())).unwrap();
        assert_eq!(tmpl.tree(), &before);
    }

    #[test]
    fn test_modern_path() {
        let source = "{{ len .Messages }}|{{ range .Messages }}<{{ .Role }}>{{ .Content }}{{ end }}<assistant>";
        let out = render(source, hi_hello_bye());
        assert_eq!(out, "3|<user>Hi<assistant>Hello<user>Bye<assistant>");
    }

    #[test]
    fn test_modern_path_binds_system_and_tools() {
        let tool: Tool = serde_json::from_value(serde_json::json!({
            "function": {"name": "get_weather", "description": "Weather"}
        }))
        .unwrap();
        let tmpl = Template::parse(
            "{{ .System }}|{{ range .Tools }}{{ .Function.Name }}{{ end }}|{{ range .Messages }}{{ .Content }}{{ end }}",
        )
        .unwrap();
        let values = Values::new(vec![Message::system("sys"), Message::user("q")]).with_tools(vec![tool]);
        let mut out = Vec::new();
        tmpl.execute(&mut out, &values).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "sys|get_weather|q");
    }

    #[test]
    fn test_modern_path_exposes_tool_calls() {
        let mut args = Map::new();
        args.insert("city".to_string(), "Paris".into());
        let messages = vec![
            Message::user("weather?"),
            Message::assistant("").with_tool_call(ToolCall::new("get_weather", args)),
        ];
        let out = render(
            "{{ range .Messages }}{{ range .ToolCalls }}{{ .Function.Name }}{{ json .Function.Arguments }}{{ end }}{{ end }}",
            messages,
        );
        assert_eq!(out, r#"get_weather{"city":"Paris"}"#);
    }

    #[test]
    fn test_images_tagged_before_render() {
        let messages = vec![Message::user("look").with_image(ImageData(vec![1]))];
        let out = render("{{ .Prompt }}", messages);
        assert_eq!(out, "[img-0] look");
    }

    #[test]
    fn test_modern_template_sees_images() {
        let messages = vec![
            Message::user("look").with_image(ImageData(vec![1])),
            Message::assistant("a cat"),
        ];
        let out = render(
            "{{ range .Messages }}{{ .Role }}{{ if .Images }}+{{ len .Images }}{{ end }};{{ end }}",
            messages,
        );
        assert_eq!(out, "user+1;assistant;");
    }

    #[test]
    fn test_execution_error_keeps_partial_output() {
        let tmpl = Template::parse("{{ range .Messages }}{{ .Content }}{{ upper . }}{{ end }}").unwrap();
        let mut out = Vec::new();
        let err = tmpl
            .execute(&mut out, &Values::new(vec![Message::user("a")]))
            .unwrap_err();
        assert!(matches!(err, Error::Execution(_)));
        assert_eq!(out, b"a");
    }

    #[test]
    fn test_legacy_error_writes_nothing() {
        let tmpl = Template::parse("{{ .Prompt }}{{ upper .Prompt }}").unwrap();
        let mut out = Vec::new();
        let err = tmpl.execute(&mut out, &Values::new(hi_hello_bye())).unwrap_err();
        assert!(matches!(err, Error::Execution(_)));
        assert!(out.is_empty());
    }

    #[test]
    fn test_subtree_wraps_first_match() {
        let tmpl = Template::parse("{{ if .System }}{{ .System }}{{ end }}{{ .Prompt }}").unwrap();
        let sub = tmpl
            .subtree(|n| matches!(n, Node::Action(p) if p.cmds[0].args == [Expr::Field(vec!["System".into()])]))
            .expect("Should find");
        assert_eq!(sub.root, vec![Node::field_action("System")]);
        assert!(tmpl.subtree(|n| tree::references(n, "tools")).is_none());
    }

    #[test]
    fn test_default_template() {
        let tmpl = Template::default_template();
        assert_eq!(tmpl.to_string(), "{{ .Prompt }}");
        assert_eq!(tmpl.vars(), ["prompt", "response"]);
        let mut out = Vec::new();
        tmpl.execute(&mut out, &Values::new(hi_hello_bye())).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "HiHelloBye");
    }

    #[test]
    fn test_template_shared_across_threads() {
        let tmpl = std::sync::Arc::new(Template::parse("Q:{{ .Prompt }} A:{{ .Response }};").unwrap());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let tmpl = tmpl.clone();
                std::thread::spawn(move || {
                    let mut out = Vec::new();
                    tmpl.execute(&mut out, &Values::new(hi_hello_bye())).unwrap();
                    String::from_utf8(out).unwrap()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), "Q:Hi A:Hello;Q:Bye A:");
        }
    }
}
