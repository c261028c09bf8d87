//! Parser implementation using chumsky

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;

use crate::parser::ast::*;
use crate::parser::lexer::Token;

/// Top-level items before they are split into body and defines
enum Item {
    Node(Node),
    Define(Define),
}

/// Parse template source into a tree
pub fn parse(input: &str) -> Result<Tree, Vec<crate::ParseError>> {
    let len = input.len();

    let tokens = crate::parser::lexer::lex(input).map_err(|e| vec![e])?;
    let token_iter = tokens
        .into_iter()
        .map(|(tok, span)| (tok, SimpleSpan::from(span)));

    let token_stream = Stream::from_iter(token_iter)
        // Split (Token, SimpleSpan) into token and span parts
        .map((len..len).into(), |(t, s): (_, _)| (t, s));

    tree_parser()
        .parse(token_stream)
        .into_result()
        .map_err(|errs| errs.into_iter().map(|e| e.into()).collect())
}

fn pipeline_parser<'a, I>() -> impl Parser<'a, I, Pipeline, extra::Err<Rich<'a, Token>>> + Clone
where
    I: ValueInput<'a, Token = Token, Span = SimpleSpan>,
{
    recursive(|pipeline| {
        let operand = select! {
            Token::Dot => Expr::Dot,
            Token::Nil => Expr::Nil,
            Token::True => Expr::Bool(true),
            Token::False => Expr::Bool(false),
            Token::Int(n) | Token::Char(n) => Expr::Int(n),
            Token::Float(f) => Expr::Float(f),
            Token::String(s) => Expr::String(s),
            Token::Field(fields) => Expr::Field(fields),
            Token::Variable(idents) => Expr::Variable(idents),
            Token::Ident(name) => Expr::Function(name),
        };

        let paren_close = select! {
            Token::ParenClose => Vec::new(),
            Token::ParenCloseField(fields) => fields,
        };

        // (pipeline) or (pipeline).Field.Chain
        let group = just(Token::ParenOpen)
            .ignore_then(pipeline)
            .then(paren_close)
            .map(|(pipe, fields): (Pipeline, Vec<String>)| {
                let expr = Expr::Pipe(Box::new(pipe));
                if fields.is_empty() {
                    expr
                } else {
                    Expr::Chain(Box::new(expr), fields)
                }
            });

        let command = choice((operand, group))
            .repeated()
            .at_least(1)
            .collect::<Vec<_>>()
            .map(|args| Command { args });

        let variable = select! {
            Token::Variable(idents) if idents.len() == 1 => idents[0].clone(),
        };

        // $x := ..., $i, $e := ..., $x = ...
        let decl = variable
            .clone()
            .then(just(Token::Comma).ignore_then(variable).or_not())
            .then(choice((
                just(Token::Declare).to(false),
                just(Token::Assign).to(true),
            )))
            .map(|((first, second), is_assign)| {
                let mut names = vec![first];
                names.extend(second);
                (names, is_assign)
            });

        decl.or_not()
            .then(
                command
                    .separated_by(just(Token::Pipe))
                    .at_least(1)
                    .collect::<Vec<_>>(),
            )
            .map(|(decl, cmds)| {
                let (decl, is_assign) = decl.unwrap_or_default();
                Pipeline {
                    decl,
                    is_assign,
                    cmds,
                }
            })
            .boxed()
    })
}

fn tree_parser<'a, I>() -> impl Parser<'a, I, Tree, extra::Err<Rich<'a, Token>>> + Clone
where
    I: ValueInput<'a, Token = Token, Span = SimpleSpan>,
{
    let open = just(Token::Open);
    let close = just(Token::Close);
    let pipeline = pipeline_parser();

    let template_name = select! {
        Token::String(s) => s,
    };

    let end_tag = open
        .clone()
        .then(just(Token::End))
        .then(close.clone())
        .ignored();
    let else_tag = open
        .clone()
        .then(just(Token::Else))
        .then(close.clone())
        .ignored();

    // Recursive node parser
    let node = recursive(|node| {
        let list = node.repeated().collect::<Vec<Node>>();

        let text = select! {
            Token::Text(s) => Node::Text(s),
        };

        let action = open
            .clone()
            .ignore_then(pipeline.clone())
            .then_ignore(close.clone())
            .map(Node::Action);

        // Everything after an if body: `else if ...`, `else ... end`, or `end`
        let if_tail = recursive(|tail| {
            choice((
                open.clone()
                    .then(just(Token::Else))
                    .then(just(Token::If))
                    .ignore_then(pipeline.clone())
                    .then_ignore(close.clone())
                    .then(list.clone())
                    .then(tail)
                    .map(|((pipe, list), else_list): ((Pipeline, Vec<Node>), Option<Vec<Node>>)| {
                        Some(vec![Node::If(Branch {
                            pipe,
                            list,
                            else_list,
                        })])
                    }),
                else_tag
                    .clone()
                    .ignore_then(list.clone())
                    .then_ignore(end_tag.clone())
                    .map(Some),
                end_tag.clone().to(None),
            ))
            .boxed()
        });

        // Same shape for `else with ...`
        let with_tail = recursive(|tail| {
            choice((
                open.clone()
                    .then(just(Token::Else))
                    .then(just(Token::With))
                    .ignore_then(pipeline.clone())
                    .then_ignore(close.clone())
                    .then(list.clone())
                    .then(tail)
                    .map(|((pipe, list), else_list): ((Pipeline, Vec<Node>), Option<Vec<Node>>)| {
                        Some(vec![Node::With(Branch {
                            pipe,
                            list,
                            else_list,
                        })])
                    }),
                else_tag
                    .clone()
                    .ignore_then(list.clone())
                    .then_ignore(end_tag.clone())
                    .map(Some),
                end_tag.clone().to(None),
            ))
            .boxed()
        });

        let if_node = open
            .clone()
            .then(just(Token::If))
            .ignore_then(pipeline.clone())
            .then_ignore(close.clone())
            .then(list.clone())
            .then(if_tail)
            .map(|((pipe, list), else_list)| {
                Node::If(Branch {
                    pipe,
                    list,
                    else_list,
                })
            });

        let with_node = open
            .clone()
            .then(just(Token::With))
            .ignore_then(pipeline.clone())
            .then_ignore(close.clone())
            .then(list.clone())
            .then(with_tail)
            .map(|((pipe, list), else_list)| {
                Node::With(Branch {
                    pipe,
                    list,
                    else_list,
                })
            });

        let range_node = open
            .clone()
            .then(just(Token::Range))
            .ignore_then(pipeline.clone())
            .then_ignore(close.clone())
            .then(list.clone())
            .then(else_tag.clone().ignore_then(list.clone()).or_not())
            .then_ignore(end_tag.clone())
            .map(|((pipe, list), else_list)| {
                Node::Range(Branch {
                    pipe,
                    list,
                    else_list,
                })
            });

        let template_node = open
            .clone()
            .then(just(Token::Template))
            .ignore_then(template_name.clone())
            .then(pipeline.clone().or_not())
            .then_ignore(close.clone())
            .map(|(name, pipe)| Node::Template { name, pipe });

        // Block forms first: `action` would otherwise report a confusing
        // error on the keyword
        choice((
            text,
            if_node,
            range_node,
            with_node,
            template_node,
            action,
        ))
        .boxed()
    });

    // Sub-templates may only be defined at the top level
    let define = open
        .clone()
        .then(just(Token::Define))
        .ignore_then(template_name)
        .then_ignore(close.clone())
        .then(node.clone().repeated().collect::<Vec<_>>())
        .then_ignore(end_tag)
        .map(|(name, body)| Define { name, body });

    choice((define.map(Item::Define), node.map(Item::Node)))
        .repeated()
        .collect::<Vec<_>>()
        .then_ignore(end())
        .map(|items| {
            let mut tree = Tree::default();
            for item in items {
                match item {
                    Item::Node(node) => tree.root.push(node),
                    Item::Define(define) => tree.defines.push(define),
                }
            }
            tree
        })
}
