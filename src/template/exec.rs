//! Tree-walking evaluator

use std::io::Write;

use serde_json::Value;

use crate::error::ExecError;
use crate::parser::ast::{Branch, Command, Expr, Node, Pipeline, Tree};

use super::funcs::{self, format_value, is_true, kind, lookup};

/// Maximum nesting of `{{ template }}` calls
pub const MAX_DEPTH: usize = 100;

/// Execute `tree` against `data`, writing output to `out` as it is produced
pub fn execute<W: Write + ?Sized>(tree: &Tree, out: &mut W, data: &Value) -> Result<(), ExecError> {
    let mut state = State {
        tree,
        out,
        vars: vec![("$".to_string(), data.clone())],
        depth: 0,
    };
    state.walk_list(data, &tree.root)
}

struct State<'t, 'w, W: Write + ?Sized> {
    tree: &'t Tree,
    out: &'w mut W,
    /// Variable stack; scopes are restored by truncating to a saved length
    vars: Vec<(String, Value)>,
    depth: usize,
}

impl<'t, 'w, W: Write + ?Sized> State<'t, 'w, W> {
    fn walk_list(&mut self, dot: &Value, list: &'t [Node]) -> Result<(), ExecError> {
        for node in list {
            self.walk(dot, node)?;
        }
        Ok(())
    }

    fn walk(&mut self, dot: &Value, node: &'t Node) -> Result<(), ExecError> {
        match node {
            Node::Text(text) => self.out.write_all(text.as_bytes())?,
            Node::Action(pipe) => {
                let value = self.eval_pipeline(dot, pipe)?;
                if pipe.decl.is_empty() {
                    self.out.write_all(format_value(&value).as_bytes())?;
                }
            }
            Node::If(branch) => self.walk_if_or_with(dot, branch, false)?,
            Node::With(branch) => self.walk_if_or_with(dot, branch, true)?,
            Node::Range(branch) => self.walk_range(dot, branch)?,
            Node::Template { name, pipe } => self.walk_template(dot, name, pipe.as_ref())?,
        }
        Ok(())
    }

    fn walk_if_or_with(&mut self, dot: &Value, branch: &'t Branch, with: bool) -> Result<(), ExecError> {
        let mark = self.vars.len();
        let value = self.eval_pipeline(dot, &branch.pipe)?;
        let result = if is_true(&value) {
            let dot = if with { &value } else { dot };
            self.walk_list(dot, &branch.list)
        } else if let Some(else_list) = &branch.else_list {
            self.walk_list(dot, else_list)
        } else {
            Ok(())
        };
        self.vars.truncate(mark);
        result
    }

    fn walk_range(&mut self, dot: &Value, branch: &'t Branch) -> Result<(), ExecError> {
        let mark = self.vars.len();
        let value = self.eval_commands(dot, &branch.pipe.cmds)?;

        let items: Vec<(Value, Value)> = match value {
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, item)| (Value::from(i), item))
                .collect(),
            Value::Object(map) => map.into_iter().map(|(k, v)| (Value::String(k), v)).collect(),
            Value::Number(n) => match n.as_u64() {
                Some(count) => (0..count).map(|i| (Value::from(i), Value::from(i))).collect(),
                None => {
                    return Err(ExecError::call("range", format!("can't iterate over {}", n)))
                }
            },
            Value::Null => Vec::new(),
            other => {
                return Err(ExecError::call(
                    "range",
                    format!("can't iterate over type {}", kind(&other)),
                ))
            }
        };

        let result = if items.is_empty() {
            match &branch.else_list {
                Some(else_list) => self.walk_list(dot, else_list),
                None => Ok(()),
            }
        } else {
            self.range_items(branch, items)
        };
        self.vars.truncate(mark);
        result
    }

    fn range_items(&mut self, branch: &'t Branch, items: Vec<(Value, Value)>) -> Result<(), ExecError> {
        let decl = &branch.pipe.decl;
        for (key, item) in items {
            let mark = self.vars.len();
            match decl.as_slice() {
                [] => {}
                [elem] => self.vars.push((elem.clone(), item.clone())),
                [index, elem, ..] => {
                    self.vars.push((index.clone(), key));
                    self.vars.push((elem.clone(), item.clone()));
                }
            }
            let result = self.walk_list(&item, &branch.list);
            self.vars.truncate(mark);
            result?;
        }
        Ok(())
    }

    fn walk_template(&mut self, dot: &Value, name: &str, pipe: Option<&'t Pipeline>) -> Result<(), ExecError> {
        let tree = self.tree;
        let body = tree.define(name).ok_or_else(|| ExecError::UndefinedTemplate {
            name: name.to_string(),
        })?;
        let value = match pipe {
            Some(pipe) => self.eval_pipeline(dot, pipe)?,
            None => Value::Null,
        };

        if self.depth >= MAX_DEPTH {
            return Err(ExecError::Depth(MAX_DEPTH));
        }
        self.depth += 1;
        let saved = std::mem::replace(&mut self.vars, vec![("$".to_string(), value.clone())]);
        let result = self.walk_list(&value, body);
        self.vars = saved;
        self.depth -= 1;
        result
    }

    fn eval_pipeline(&mut self, dot: &Value, pipe: &Pipeline) -> Result<Value, ExecError> {
        let value = self.eval_commands(dot, &pipe.cmds)?;
        for name in &pipe.decl {
            if pipe.is_assign {
                self.set_var(name, value.clone())?;
            } else {
                self.vars.push((name.clone(), value.clone()));
            }
        }
        Ok(value)
    }

    fn eval_commands(&mut self, dot: &Value, cmds: &[Command]) -> Result<Value, ExecError> {
        let mut value = None;
        for cmd in cmds {
            value = Some(self.eval_command(dot, cmd, value)?);
        }
        Ok(value.unwrap_or(Value::Null))
    }

    /// `last` is the result of the previous command in the pipeline
    fn eval_command(&mut self, dot: &Value, cmd: &Command, last: Option<Value>) -> Result<Value, ExecError> {
        match cmd.args.as_slice() {
            [Expr::Function(name), args @ ..] => self.eval_function(dot, name, args, last),
            [operand] if last.is_none() => self.eval_arg(dot, operand),
            [operand, ..] => Err(ExecError::NotAFunction {
                operand: describe(operand),
            }),
            [] => Ok(Value::Null),
        }
    }

    fn eval_function(
        &mut self,
        dot: &Value,
        name: &str,
        args: &[Expr],
        last: Option<Value>,
    ) -> Result<Value, ExecError> {
        if name == "and" || name == "or" {
            if args.is_empty() && last.is_none() {
                return Err(ExecError::WrongArgCount {
                    name: name.to_string(),
                    want: "at least 1".to_string(),
                    got: 0,
                });
            }
            // Stop at the first operand that decides the result
            let stop_on = name == "or";
            let mut value = Value::Null;
            for arg in args {
                value = self.eval_arg(dot, arg)?;
                if is_true(&value) == stop_on {
                    return Ok(value);
                }
            }
            return Ok(last.unwrap_or(value));
        }

        let mut values = args
            .iter()
            .map(|arg| self.eval_arg(dot, arg))
            .collect::<Result<Vec<_>, _>>()?;
        values.extend(last);
        funcs::call(name, values)
    }

    fn eval_arg(&mut self, dot: &Value, expr: &Expr) -> Result<Value, ExecError> {
        match expr {
            Expr::Dot => Ok(dot.clone()),
            Expr::Nil => Ok(Value::Null),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Int(n) => Ok(Value::from(*n)),
            Expr::Float(f) => Ok(Value::from(*f)),
            Expr::String(s) => Ok(Value::String(s.clone())),
            Expr::Field(fields) => walk_fields(dot.clone(), fields),
            Expr::Variable(idents) => {
                let (name, fields) = match idents.split_first() {
                    Some(split) => split,
                    None => return Ok(Value::Null),
                };
                walk_fields(self.var(name)?.clone(), fields)
            }
            Expr::Function(name) => self.eval_function(dot, name, &[], None),
            Expr::Pipe(pipe) => self.eval_pipeline(dot, pipe),
            Expr::Chain(inner, fields) => {
                let value = self.eval_arg(dot, inner)?;
                walk_fields(value, fields)
            }
        }
    }

    fn var(&self, name: &str) -> Result<&Value, ExecError> {
        self.vars
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
            .ok_or_else(|| ExecError::UndefinedVariable {
                name: name.to_string(),
            })
    }

    fn set_var(&mut self, name: &str, value: Value) -> Result<(), ExecError> {
        match self.vars.iter_mut().rev().find(|(n, _)| n == name) {
            Some(slot) => {
                slot.1 = value;
                Ok(())
            }
            None => Err(ExecError::UndefinedVariable {
                name: name.to_string(),
            }),
        }
    }
}

/// Resolve `.A.B` against `value`. Missing keys and nil yield nil.
fn walk_fields(mut value: Value, fields: &[String]) -> Result<Value, ExecError> {
    for field in fields {
        value = match &value {
            Value::Object(map) => lookup(map, field).cloned().unwrap_or(Value::Null),
            Value::Null => Value::Null,
            other => {
                return Err(ExecError::Field {
                    field: field.clone(),
                    kind: kind(other),
                })
            }
        };
    }
    Ok(value)
}

fn describe(expr: &Expr) -> String {
    match expr {
        Expr::Field(fields) => format!(".{}", fields.join(".")),
        Expr::Variable(idents) => idents.join("."),
        Expr::Dot => ".".to_string(),
        Expr::String(s) => format!("{:?}", s),
        Expr::Int(n) => n.to_string(),
        Expr::Float(f) => f.to_string(),
        Expr::Bool(b) => b.to_string(),
        Expr::Nil => "nil".to_string(),
        Expr::Function(name) => name.clone(),
        Expr::Pipe(_) | Expr::Chain(..) => "(pipeline)".to_string(),
    }
}
