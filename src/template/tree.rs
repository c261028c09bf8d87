//! Structural queries and rewrites over a parsed template tree

use crate::parser::ast::{Branch, Expr, Node, Pipeline, Tree};

/// Collect every field and variable identifier referenced under `node`.
///
/// Traversal order is stable and duplicates are kept. Variables contribute
/// their full path, so `$.Messages` yields `["$", "Messages"]`. Function
/// names are not identifiers.
pub fn identifiers(node: &Node) -> Vec<String> {
    let mut names = Vec::new();
    collect_node(node, &mut names);
    names
}

/// [`identifiers`] over a list of nodes
pub fn list_identifiers(list: &[Node]) -> Vec<String> {
    let mut names = Vec::new();
    collect_list(list, &mut names);
    names
}

fn collect_list(list: &[Node], names: &mut Vec<String>) {
    for node in list {
        collect_node(node, names);
    }
}

fn collect_node(node: &Node, names: &mut Vec<String>) {
    match node {
        Node::Text(_) => {}
        Node::Action(pipe) => collect_pipeline(pipe, names),
        Node::If(branch) | Node::Range(branch) | Node::With(branch) => {
            collect_branch(branch, names)
        }
        Node::Template { pipe, .. } => {
            if let Some(pipe) = pipe {
                collect_pipeline(pipe, names);
            }
        }
    }
}

fn collect_branch(branch: &Branch, names: &mut Vec<String>) {
    collect_pipeline(&branch.pipe, names);
    collect_list(&branch.list, names);
    if let Some(else_list) = &branch.else_list {
        collect_list(else_list, names);
    }
}

fn collect_pipeline(pipe: &Pipeline, names: &mut Vec<String>) {
    for cmd in &pipe.cmds {
        for arg in &cmd.args {
            collect_expr(arg, names);
        }
    }
}

fn collect_expr(expr: &Expr, names: &mut Vec<String>) {
    match expr {
        Expr::Field(idents) | Expr::Variable(idents) => names.extend(idents.iter().cloned()),
        Expr::Pipe(pipe) => collect_pipeline(pipe, names),
        Expr::Chain(inner, fields) => {
            collect_expr(inner, names);
            names.extend(fields.iter().cloned());
        }
        _ => {}
    }
}

/// Lowercased, sorted, deduplicated identifiers of every body in the tree
pub fn variables(tree: &Tree) -> Vec<String> {
    let mut vars: Vec<String> = tree
        .bodies()
        .flat_map(list_identifiers)
        .map(|name| name.to_lowercase())
        .collect();
    vars.sort();
    vars.dedup();
    vars
}

/// Depth-first search for the first node matching `predicate`.
///
/// Descends into the bodies and else-bodies of if/range/with; pipelines are
/// not searched.
pub fn find_subtree<'t, F>(list: &'t [Node], predicate: &F) -> Option<&'t Node>
where
    F: Fn(&Node) -> bool,
{
    for node in list {
        if predicate(node) {
            return Some(node);
        }

        if let Node::If(branch) | Node::Range(branch) | Node::With(branch) = node {
            if let Some(found) = find_subtree(&branch.list, predicate) {
                return Some(found);
            }
            if let Some(found) = branch
                .else_list
                .as_deref()
                .and_then(|list| find_subtree(list, predicate))
            {
                return Some(found);
            }
        }
    }
    None
}

/// True if any identifier under `node` equals `name`, ignoring case
pub fn references(node: &Node, name: &str) -> bool {
    identifiers(node)
        .iter()
        .any(|ident| ident.eq_ignore_ascii_case(name))
}

/// Copy of `tree` whose main body stops before the first top-level node
/// referencing `marker`. Sub-templates are kept as-is.
pub fn truncate_at(tree: &Tree, marker: &str) -> Tree {
    let cut = tree
        .root
        .iter()
        .position(|node| references(node, marker))
        .unwrap_or(tree.root.len());

    Tree {
        root: tree.root[..cut].to_vec(),
        defines: tree.defines.clone(),
    }
}

/// Append `{{ .Response }}` unless the tree already references messages or
/// a response.
pub fn ensure_response(mut tree: Tree) -> Tree {
    let vars = variables(&tree);
    if !vars.iter().any(|v| v == "messages" || v == "response") {
        tree.root.push(Node::field_action("Response"));
    }
    tree
}
