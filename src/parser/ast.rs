//! Abstract Syntax Tree types for the prompt template language

/// Byte range in source text
pub type Span = std::ops::Range<usize>;

/// A compiled template: the main body plus any `{{ define }}` blocks
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Tree {
    pub root: Vec<Node>,
    pub defines: Vec<Define>,
}

impl Tree {
    /// Create a tree with no sub-templates
    pub fn new(root: Vec<Node>) -> Self {
        Self {
            root,
            defines: Vec::new(),
        }
    }

    /// Look up a sub-template body by name. A later definition shadows an earlier one.
    pub fn define(&self, name: &str) -> Option<&[Node]> {
        self.defines
            .iter()
            .rev()
            .find(|d| d.name == name)
            .map(|d| d.body.as_slice())
    }

    /// Iterate over every top-level node list: the main body first, then each define
    pub fn bodies(&self) -> impl Iterator<Item = &[Node]> {
        std::iter::once(self.root.as_slice()).chain(self.defines.iter().map(|d| d.body.as_slice()))
    }
}

/// `{{ define "name" }} ... {{ end }}`
#[derive(Debug, Clone, PartialEq)]
pub struct Define {
    pub name: String,
    pub body: Vec<Node>,
}

/// A node in a template body
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Literal text emitted verbatim
    Text(String),
    /// `{{ pipeline }}`
    Action(Pipeline),
    /// `{{ if pipeline }} ... {{ else }} ... {{ end }}`
    If(Branch),
    /// `{{ range pipeline }} ... {{ else }} ... {{ end }}`
    Range(Branch),
    /// `{{ with pipeline }} ... {{ else }} ... {{ end }}`
    With(Branch),
    /// `{{ template "name" pipeline }}`
    Template { name: String, pipe: Option<Pipeline> },
}

impl Node {
    /// The `{{ .Name }}` action
    pub fn field_action(name: impl Into<String>) -> Self {
        Node::Action(Pipeline::command(vec![Expr::Field(vec![name.into()])]))
    }
}

/// Shared shape of the if/range/with control structures
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub pipe: Pipeline,
    pub list: Vec<Node>,
    /// `{{ else }}` body; an `else if` chain is a single nested `If` node
    pub else_list: Option<Vec<Node>>,
}

/// Optional variable declaration followed by `|`-separated commands
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Pipeline {
    /// Declared variable names, including the leading `$`
    pub decl: Vec<String>,
    /// `=` rather than `:=`
    pub is_assign: bool,
    pub cmds: Vec<Command>,
}

impl Pipeline {
    /// A pipeline made of a single command
    pub fn command(args: Vec<Expr>) -> Self {
        Self {
            decl: Vec::new(),
            is_assign: false,
            cmds: vec![Command { args }],
        }
    }
}

/// A function call or a single operand
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub args: Vec<Expr>,
}

/// Command arguments
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `.`
    Dot,
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// `.A.B` stored as `["A", "B"]`
    Field(Vec<String>),
    /// `$x.A` stored as `["$x", "A"]`; the root variable is `"$"`
    Variable(Vec<String>),
    /// A function name such as `eq` or `json`
    Function(String),
    /// Parenthesised pipeline
    Pipe(Box<Pipeline>),
    /// Field chain applied to a parenthesised pipeline: `(pipe).A.B`
    Chain(Box<Expr>, Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_action() {
        let node = Node::field_action("Response");
        match node {
            Node::Action(pipe) => {
                assert!(pipe.decl.is_empty());
                assert_eq!(pipe.cmds.len(), 1);
                assert_eq!(pipe.cmds[0].args, vec![Expr::Field(vec!["Response".to_string()])]);
            }
            _ => panic!("Expected action"),
        }
    }

    #[test]
    fn test_define_lookup_prefers_last() {
        let tree = Tree {
            root: vec![],
            defines: vec![
                Define {
                    name: "a".to_string(),
                    body: vec![Node::Text("first".to_string())],
                },
                Define {
                    name: "a".to_string(),
                    body: vec![Node::Text("second".to_string())],
                },
            ],
        };
        assert_eq!(tree.define("a"), Some(&[Node::Text("second".to_string())][..]));
        assert!(tree.define("b").is_none());
        assert_eq!(tree.bodies().count(), 3);
    }
}
