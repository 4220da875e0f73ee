//! Syntax tree handed from the parser to the lowering pass.
//!
//! The compiler only ever reads it. Names and string literals borrow the
//! source text unless an escape sequence forced a copy.

use std::borrow::Cow;
use noja_bytecode::{Opcode, Source, Span};

#[derive(Debug)]
pub struct Ast<'src> {
    pub source: &'src Source,
    pub root: Node<'src>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node<'src> {
    pub span: Span,
    pub kind: NodeKind<'src>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind<'src> {
    Expr(Expr<'src>),
    IfElse {
        condition: Box<Node<'src>>,
        true_branch: Box<Node<'src>>,
        false_branch: Option<Box<Node<'src>>>,
    },
    While {
        condition: Box<Node<'src>>,
        body: Box<Node<'src>>,
    },
    DoWhile {
        body: Box<Node<'src>>,
        condition: Box<Node<'src>>,
    },
    Compound(Vec<Node<'src>>),
    /// `None` for a bare `return;`
    Return(Option<Box<Node<'src>>>),
    Break,
    Func {
        name: Cow<'src, str>,
        args: Vec<Arg<'src>>,
        body: Box<Node<'src>>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Arg<'src> {
    pub name: Cow<'src, str>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Pos,
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eql,
    Nql,
    Lss,
    Leq,
    Grt,
    Geq,
    And,
    Or,
}

impl From<UnaryOp> for Opcode {
    fn from(op: UnaryOp) -> Self {
        match op {
            UnaryOp::Pos => Opcode::Pos,
            UnaryOp::Neg => Opcode::Neg,
            UnaryOp::Not => Opcode::Not,
        }
    }
}

impl From<BinaryOp> for Opcode {
    fn from(op: BinaryOp) -> Self {
        match op {
            BinaryOp::Add => Opcode::Add,
            BinaryOp::Sub => Opcode::Sub,
            BinaryOp::Mul => Opcode::Mul,
            BinaryOp::Div => Opcode::Div,
            BinaryOp::Eql => Opcode::Eql,
            BinaryOp::Nql => Opcode::Nql,
            BinaryOp::Lss => Opcode::Lss,
            BinaryOp::Leq => Opcode::Leq,
            BinaryOp::Grt => Opcode::Grt,
            BinaryOp::Geq => Opcode::Geq,
            BinaryOp::And => Opcode::And,
            BinaryOp::Or => Opcode::Or,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr<'src> {
    Unary(UnaryOp, Box<Node<'src>>),
    Binary(BinaryOp, Box<Node<'src>>, Box<Node<'src>>),
    /// target, value
    Assign(Box<Node<'src>>, Box<Node<'src>>),
    /// `a, b`: only meaningful as an assignment target or return value
    Pair(Box<Node<'src>>, Box<Node<'src>>),
    Int(i64),
    Float(f64),
    Str(Cow<'src, str>),
    Ident(Cow<'src, str>),
    None,
    True,
    False,
    List(Vec<Node<'src>>),
    /// key, value
    Map(Vec<(Node<'src>, Node<'src>)>),
    Call {
        func: Box<Node<'src>>,
        args: Vec<Node<'src>>,
    },
    Select {
        set: Box<Node<'src>>,
        idx: Box<Node<'src>>,
    },
}

impl<'src> Node<'src> {
    pub fn new(span: Span, kind: NodeKind<'src>) -> Self {
        Node { span, kind }
    }

    pub fn expr(span: Span, expr: Expr<'src>) -> Self {
        Node { span, kind: NodeKind::Expr(expr) }
    }

    /// binary-like nodes span from the first to the last operand
    pub fn binary(op: BinaryOp, lhs: Node<'src>, rhs: Node<'src>) -> Self {
        let span = lhs.span.cover(rhs.span);
        Node::expr(span, Expr::Binary(op, Box::new(lhs), Box::new(rhs)))
    }

    pub fn pair(lhs: Node<'src>, rhs: Node<'src>) -> Self {
        let span = lhs.span.cover(rhs.span);
        Node::expr(span, Expr::Pair(Box::new(lhs), Box::new(rhs)))
    }

    pub fn assign(target: Node<'src>, value: Node<'src>) -> Self {
        let span = target.span.cover(value.span);
        Node::expr(span, Expr::Assign(Box::new(target), Box::new(value)))
    }

    pub fn as_expr(&self) -> Option<&Expr<'src>> {
        match &self.kind {
            NodeKind::Expr(e) => Some(e),
            _ => None,
        }
    }

    /// bare expressions leave a value on the stack that statements must discard
    pub fn is_expr(&self) -> bool {
        matches!(self.kind, NodeKind::Expr(_))
    }
}
