//! Lowering from [Node] trees to stack machine instructions.
//!
//! Every expression leaves exactly one value on the stack. Statements leave
//! nothing, so the value of an expression used as a statement is popped by
//! whatever contains it.

use std::borrow::Cow;
use tracing::{debug, error, instrument, trace};
use noja_bytecode::{ExeBuilder, Executable, ForwardArena, ForwardRef, Opcode, Operand, Span};
use crate::ast::{Arg, Ast, Expr, Node, NodeKind};
use crate::error::CompileError;
use crate::options::Options;
use crate::tuple;

/// Stack left free before a nesting level grows a new segment.
const RED_ZONE: usize = 128 * 1024;
const STACK_GROWTH: usize = 1024 * 1024;

/// Compiles with default [Options] and a scratch forward arena.
pub fn compile<'a>(ast: &Ast<'a>) -> Result<Executable<'a>, CompileError> {
    compile_with(ast, None, &Options::default())
}

/// Like [compile], but lets repeated compilations share one arena.
///
/// The returned executable is terminated by `RETURN 0` and carries a
/// reference to the source of `ast`. Nothing is returned on error.
#[instrument(skip_all, fields(source = ast.source.name()))]
pub fn compile_with<'a>(
    ast: &Ast<'a>,
    arena: Option<&mut ForwardArena>,
    options: &Options,
) -> Result<Executable<'a>, CompileError> {
    let mut scratch = ForwardArena::new();
    let arena = match arena {
        Some(arena) => arena,
        None => &mut scratch,
    };
    arena.clear();

    let mut lowering = Lowering::new(ExeBuilder::new(arena), options);
    let result = lowering.lower(&ast.root, None)
        .and_then(|()| lowering.finish(Span::at(ast.source.len())));

    match result {
        Ok(exe) => {
            debug!(instructions = exe.len(), "compiled");
            Ok(exe.with_source(ast.source))
        }
        Err(err) => {
            if err.is_internal() {
                error!(%err, "lowering produced an invalid executable");
                debug_assert!(false, "{err}");
            }
            Err(err)
        }
    }
}

/// Instruction emitter for a single compilation.
pub(crate) struct Lowering<'a, 'f, 'o> {
    exeb: ExeBuilder<'a, 'f>,
    options: &'o Options,
    depth: usize,
}

impl<'a, 'f, 'o> Lowering<'a, 'f, 'o> {
    pub(crate) fn new(exeb: ExeBuilder<'a, 'f>, options: &'o Options) -> Self {
        Lowering { exeb, options, depth: 0 }
    }

    /// appends the trailing `RETURN 0` and resolves every forward reference
    pub(crate) fn finish(mut self, span: Span) -> Result<Executable<'a>, CompileError> {
        self.emit(Opcode::Return, [Operand::Int(0)], span)?;
        Ok(self.exeb.finalize()?)
    }

    fn emit<I>(&mut self, opcode: Opcode, operands: I, span: Span) -> Result<usize, CompileError>
    where
        I: IntoIterator<Item = Operand<'a>>,
    {
        Ok(self.exeb.append(opcode, operands, span)?)
    }

    fn pop(&mut self, span: Span) -> Result<(), CompileError> {
        self.emit(Opcode::Pop, [Operand::Int(1)], span)?;
        Ok(())
    }

    /// pops the value a statement left behind, if it was an expression
    fn discard(&mut self, stmt: &Node<'a>, span: Span) -> Result<(), CompileError> {
        if stmt.is_expr() {
            self.pop(span)?;
        }
        Ok(())
    }

    fn forward(&mut self) -> Result<ForwardRef, CompileError> {
        Ok(self.exeb.forward()?)
    }

    fn resolve(&mut self, cell: ForwardRef) -> Result<(), CompileError> {
        Ok(self.exeb.resolve(cell)?)
    }

    /// `loop_exit` is where a `break` jumps to, `None` outside of loops.
    pub(crate) fn lower(&mut self, node: &Node<'a>, loop_exit: Option<ForwardRef>) -> Result<(), CompileError> {
        if self.depth >= self.options.max_depth {
            return Err(CompileError::TooDeep { limit: self.options.max_depth, span: node.span });
        }

        self.depth += 1;
        let result = stacker::maybe_grow(RED_ZONE, STACK_GROWTH, || self.lower_node(node, loop_exit));
        self.depth -= 1;
        result
    }

    fn lower_node(&mut self, node: &Node<'a>, loop_exit: Option<ForwardRef>) -> Result<(), CompileError> {
        match &node.kind {
            NodeKind::Expr(expr) => self.lower_expr(node, expr, loop_exit),

            NodeKind::IfElse { condition, true_branch, false_branch } => {
                self.lower(condition, loop_exit)?;

                match false_branch {
                    Some(false_branch) => {
                        let else_ = self.forward()?;
                        let done = self.forward()?;

                        self.emit(Opcode::JumpIfNotAndPop, [Operand::Forward(else_)], node.span)?;
                        self.lower(true_branch, loop_exit)?;
                        self.discard(true_branch, Span::at(true_branch.span.offset))?;
                        self.emit(Opcode::Jump, [Operand::Forward(done)], node.span)?;

                        self.resolve(else_)?;
                        self.lower(false_branch, loop_exit)?;
                        self.discard(false_branch, Span::at(false_branch.span.offset))?;
                        self.resolve(done)
                    }
                    None => {
                        let done = self.forward()?;

                        self.emit(Opcode::JumpIfNotAndPop, [Operand::Forward(done)], node.span)?;
                        self.lower(true_branch, loop_exit)?;
                        self.discard(true_branch, Span::at(true_branch.span.offset))?;
                        self.resolve(done)
                    }
                }
            }

            NodeKind::While { condition, body } => {
                let start = self.forward()?;
                let end = self.forward()?;

                self.resolve(start)?;
                self.lower(condition, loop_exit)?;
                self.emit(Opcode::JumpIfNotAndPop, [Operand::Forward(end)], condition.span)?;
                self.lower(body, Some(end))?;
                self.discard(body, Span::at(body.span.offset))?;
                self.emit(Opcode::Jump, [Operand::Forward(start)], node.span)?;
                self.resolve(end)
            }

            NodeKind::DoWhile { body, condition } => {
                let end = self.forward()?;
                let start = self.exeb.here()?;

                self.lower(body, Some(end))?;
                self.discard(body, Span::at(body.span.offset))?;
                self.lower(condition, loop_exit)?;
                self.emit(Opcode::JumpIfAndPop, [Operand::Index(start)], condition.span)?;
                self.resolve(end)
            }

            NodeKind::Compound(stmts) => {
                for stmt in stmts {
                    self.lower(stmt, loop_exit)?;
                    self.discard(stmt, Span::at(stmt.span.offset))?;
                }
                Ok(())
            }

            NodeKind::Return(value) => {
                let mut count = 0;
                if let Some(value) = value {
                    let values = tuple::flatten(value, self.options.max_tuple)?;
                    for value in values.iter() {
                        self.lower(value, loop_exit)?;
                    }
                    count = values.len();
                }
                self.emit(Opcode::Return, [count_operand(count)], node.span)?;
                Ok(())
            }

            NodeKind::Break => {
                let Some(exit) = loop_exit else {
                    return Err(CompileError::BreakOutsideLoop { span: node.span });
                };
                self.emit(Opcode::Jump, [Operand::Forward(exit)], node.span)?;
                Ok(())
            }

            NodeKind::Func { name, args, body } => self.lower_func(node, name, args, body),
        }
    }

    /// ```text
    ///        PUSHFUN  entry argc
    ///        ASS      name
    ///        POP      1
    ///        JUMP     skip
    /// entry: ASS      arg; POP 1    (for each argument)
    ///        <body>
    ///        RETURN   0
    /// skip:
    /// ```
    fn lower_func(&mut self, node: &Node<'a>, name: &Cow<'a, str>, args: &[Arg<'a>], body: &Node<'a>) -> Result<(), CompileError> {
        let entry = self.forward()?;
        let skip = self.forward()?;

        self.emit(Opcode::PushFun, [Operand::Forward(entry), count_operand(args.len())], node.span)?;
        self.emit(Opcode::Ass, [Operand::Str(name.clone())], node.span)?;
        self.pop(node.span)?;
        self.emit(Opcode::Jump, [Operand::Forward(skip)], node.span)?;

        self.resolve(entry)?;
        trace!(%name, entry = self.exeb.instr_count(), "function body");

        for arg in args {
            self.emit(Opcode::Ass, [Operand::Str(arg.name.clone())], arg.span)?;
            self.pop(arg.span)?;
        }

        // a function body is never inside the loop that defines it
        self.lower(body, None)?;
        self.discard(body, Span::at(body.span.end()))?;
        self.emit(Opcode::Return, [Operand::Int(0)], Span::at(body.span.offset))?;
        self.resolve(skip)
    }

    fn lower_expr(&mut self, node: &Node<'a>, expr: &Expr<'a>, loop_exit: Option<ForwardRef>) -> Result<(), CompileError> {
        let span = node.span;

        match expr {
            Expr::Pair(..) => return Err(CompileError::StrayTuple { span }),

            Expr::Unary(op, operand) => {
                self.lower(operand, loop_exit)?;
                self.emit((*op).into(), [], span)?;
            }

            Expr::Binary(op, lhs, rhs) => {
                self.lower(lhs, loop_exit)?;
                self.lower(rhs, loop_exit)?;
                self.emit((*op).into(), [], span)?;
            }

            Expr::Assign(target, value) => self.lower_assign(node, target, value, loop_exit)?,

            Expr::Int(v) => { self.emit(Opcode::PushInt, [Operand::Int(*v)], span)?; }
            Expr::Float(v) => { self.emit(Opcode::PushFlt, [Operand::Float(*v)], span)?; }
            Expr::Str(v) => { self.emit(Opcode::PushStr, [Operand::Str(v.clone())], span)?; }
            Expr::Ident(v) => { self.emit(Opcode::PushVar, [Operand::Str(v.clone())], span)?; }
            Expr::None => { self.emit(Opcode::PushNne, [], span)?; }
            Expr::True => { self.emit(Opcode::PushTru, [], span)?; }
            Expr::False => { self.emit(Opcode::PushFls, [], span)?; }

            Expr::List(items) => {
                self.emit(Opcode::PushLst, [count_operand(items.len())], span)?;
                for (i, item) in items.iter().enumerate() {
                    self.emit(Opcode::PushInt, [count_operand(i)], item.span)?;
                    self.lower(item, loop_exit)?;
                    self.emit(Opcode::Insert, [], item.span)?;
                }
            }

            Expr::Map(entries) => {
                self.emit(Opcode::PushMap, [count_operand(entries.len())], span)?;
                for (key, value) in entries {
                    self.lower(key, loop_exit)?;
                    self.lower(value, loop_exit)?;
                    self.emit(Opcode::Insert, [], value.span)?;
                }
            }

            Expr::Call { func, args } => self.lower_call(span, func, args, 1, loop_exit)?,

            Expr::Select { set, idx } => {
                self.lower(set, loop_exit)?;
                self.lower(idx, loop_exit)?;
                self.emit(Opcode::Select, [], span)?;
            }
        }
        Ok(())
    }

    fn lower_call(
        &mut self,
        span: Span,
        func: &Node<'a>,
        args: &[Node<'a>],
        returns: usize,
        loop_exit: Option<ForwardRef>,
    ) -> Result<(), CompileError> {
        for arg in args {
            self.lower(arg, loop_exit)?;
        }
        self.lower(func, loop_exit)?;
        self.emit(Opcode::Call, [count_operand(args.len()), count_operand(returns)], span)?;
        Ok(())
    }

    /// The value is evaluated first, then stored into the targets from last
    /// to first. A tuple of targets needs as many values, which only a call
    /// can produce. The value of the whole expression is what the first
    /// target received.
    fn lower_assign(
        &mut self,
        node: &Node<'a>,
        target: &Node<'a>,
        value: &Node<'a>,
        loop_exit: Option<ForwardRef>,
    ) -> Result<(), CompileError> {
        let targets = tuple::flatten(target, self.options.max_tuple)?;
        let count = targets.len();

        if count == 1 {
            self.lower(value, loop_exit)?;
        } else {
            match value.as_expr() {
                Some(Expr::Call { func, args }) => self.lower_call(value.span, func, args, count, loop_exit)?,
                _ => return Err(CompileError::ArityMismatch { count, span: node.span }),
            }
        }

        for (i, target) in targets.iter().rev().enumerate() {
            match target.as_expr() {
                Some(Expr::Ident(name)) => {
                    self.emit(Opcode::Ass, [Operand::Str(name.clone())], target.span)?;
                }
                Some(Expr::Select { set, idx }) => {
                    self.lower(set, loop_exit)?;
                    self.lower(idx, loop_exit)?;
                    self.emit(Opcode::Insert2, [], target.span)?;
                }
                _ => return Err(CompileError::NotAssignable { span: target.span }),
            }

            if i + 1 < count {
                self.pop(Span::at(node.span.offset))?;
            }
        }
        Ok(())
    }
}

fn count_operand<'a>(n: usize) -> Operand<'a> {
    Operand::Int(n as i64)
}
