use std::borrow::Cow;
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use noja_bytecode::{Executable, Opcode, Operand, Source, Span};
use noja_compiler::ast::{Arg, Ast, BinaryOp, Expr, Node, NodeKind, UnaryOp};
use noja_compiler::{compile, CompileError};

fn expr(e: Expr<'static>) -> Node<'static> {
    Node::expr(Span::default(), e)
}

fn stmt(kind: NodeKind<'static>) -> Node<'static> {
    Node::new(Span::default(), kind)
}

fn name() -> impl Strategy<Value = Cow<'static, str>> {
    prop::sample::select(vec!["a", "b", "f", "xs"]).prop_map(Cow::Borrowed)
}

fn expression() -> BoxedStrategy<Node<'static>> {
    let leaf = prop_oneof![
        any::<i64>().prop_map(|v| expr(Expr::Int(v))),
        any::<f64>().prop_map(|v| expr(Expr::Float(v))),
        name().prop_map(|n| expr(Expr::Ident(n))),
        Just(expr(Expr::None)),
        Just(expr(Expr::True)),
    ];

    leaf.prop_recursive(4, 32, 3, |inner| prop_oneof![
        (prop::sample::select(vec![UnaryOp::Pos, UnaryOp::Neg, UnaryOp::Not]), inner.clone())
            .prop_map(|(op, e)| expr(Expr::Unary(op, Box::new(e)))),
        (prop::sample::select(vec![BinaryOp::Add, BinaryOp::Div, BinaryOp::Leq, BinaryOp::And]), inner.clone(), inner.clone())
            .prop_map(|(op, l, r)| Node::binary(op, l, r)),
        (inner.clone(), prop::collection::vec(inner.clone(), 0..3))
            .prop_map(|(f, args)| expr(Expr::Call { func: Box::new(f), args })),
        prop::collection::vec(inner.clone(), 0..3).prop_map(|items| expr(Expr::List(items))),
        prop::collection::vec((inner.clone(), inner.clone()), 0..3).prop_map(|kv| expr(Expr::Map(kv))),
        (inner.clone(), inner.clone())
            .prop_map(|(s, i)| expr(Expr::Select { set: Box::new(s), idx: Box::new(i) })),
        (name(), inner.clone()).prop_map(|(n, v)| Node::assign(expr(Expr::Ident(n)), v)),
        (prop::collection::vec(name(), 2..4), name(), prop::collection::vec(inner, 0..2))
            .prop_map(|(targets, func, args)| {
                let targets = targets.into_iter()
                    .map(|n| expr(Expr::Ident(n)))
                    .rev()
                    .reduce(|rhs, lhs| Node::pair(lhs, rhs));
                let call = expr(Expr::Call { func: Box::new(expr(Expr::Ident(func))), args });
                match targets {
                    Some(targets) => Node::assign(targets, call),
                    None => call,
                }
            }),
    ]).boxed()
}

fn statement() -> BoxedStrategy<Node<'static>> {
    let leaf = prop_oneof![
        expression(),
        Just(stmt(NodeKind::Break)),
        prop::option::of(expression()).prop_map(|v| stmt(NodeKind::Return(v.map(Box::new)))),
    ];

    leaf.prop_recursive(3, 24, 4, |inner| prop_oneof![
        prop::collection::vec(inner.clone(), 0..4).prop_map(|body| stmt(NodeKind::Compound(body))),
        (expression(), inner.clone(), prop::option::of(inner.clone()))
            .prop_map(|(c, t, f)| stmt(NodeKind::IfElse {
                condition: Box::new(c),
                true_branch: Box::new(t),
                false_branch: f.map(Box::new),
            })),
        (expression(), inner.clone())
            .prop_map(|(c, body)| stmt(NodeKind::While { condition: Box::new(c), body: Box::new(body) })),
        (inner.clone(), expression())
            .prop_map(|(body, c)| stmt(NodeKind::DoWhile { body: Box::new(body), condition: Box::new(c) })),
        (name(), prop::collection::vec(name(), 0..3), inner)
            .prop_map(|(name, args, body)| stmt(NodeKind::Func {
                name,
                args: args.into_iter().map(|name| Arg { name, span: Span::default() }).collect(),
                body: Box::new(body),
            })),
    ]).boxed()
}

/// Follows every path through the code, tracking how many values are on the
/// stack. Each instruction must always be reached with the same depth, and
/// a `RETURN n` must find exactly its `n` values.
fn check_stack(exe: &Executable) -> Result<(), TestCaseError> {
    let code = exe.code();
    let mut depth_at: Vec<Option<i64>> = vec![None; code.len()];
    let mut work = vec![(0_usize, 0_i64)];

    while let Some((pc, depth)) = work.pop() {
        prop_assert!(pc < code.len(), "fell off the end at {}", pc);
        if let Some(seen) = depth_at[pc] {
            prop_assert_eq!(seen, depth, "instruction {} reached with different depths", pc);
            continue;
        }
        depth_at[pc] = Some(depth);

        let instr = &code[pc];
        let int = |i: usize| instr.operand(i).and_then(Operand::as_int).unwrap_or(0);
        let target = instr.target().map(|t| t as usize);

        let (needs, effect) = match instr.opcode {
            Opcode::Pos | Opcode::Neg | Opcode::Not => (1, 0),
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div |
            Opcode::Eql | Opcode::Nql | Opcode::Lss | Opcode::Leq |
            Opcode::Grt | Opcode::Geq | Opcode::And | Opcode::Or => (2, -1),
            Opcode::Pop => (int(0), -int(0)),
            Opcode::PushInt | Opcode::PushFlt | Opcode::PushStr |
            Opcode::PushNne | Opcode::PushTru | Opcode::PushFls |
            Opcode::PushVar | Opcode::PushLst | Opcode::PushMap |
            Opcode::PushFun => (0, 1),
            Opcode::Ass => (1, 0),
            Opcode::Insert | Opcode::Insert2 => (3, -2),
            Opcode::Select => (2, -1),
            Opcode::Jump => (0, 0),
            Opcode::JumpIfNotAndPop | Opcode::JumpIfAndPop => (1, -1),
            Opcode::Call => (int(0) + 1, int(1) - int(0) - 1),
            Opcode::Return => {
                prop_assert_eq!(depth, int(0), "RETURN at {}", pc);
                continue;
            }
        };
        prop_assert!(depth >= needs, "{} at {} needs {} values, has {}", instr.opcode, pc, needs, depth);
        let after = depth + effect;

        match (instr.opcode, target) {
            (Opcode::Jump, Some(t)) => work.push((t, after)),
            (Opcode::JumpIfNotAndPop | Opcode::JumpIfAndPop, Some(t)) => {
                work.push((t, after));
                work.push((pc + 1, after));
            }
            // the body starts with its arguments on the stack
            (Opcode::PushFun, Some(t)) => {
                work.push((t, int(1)));
                work.push((pc + 1, after));
            }
            _ => work.push((pc + 1, after)),
        }
    }
    Ok(())
}

proptest! {
    #[test]
    fn lowered_code_keeps_the_stack_balanced(body in prop::collection::vec(statement(), 0..6)) {
        let source = Source::new("prop.noja", "");
        let ast = Ast { source: &source, root: stmt(NodeKind::Compound(body)) };

        match compile(&ast) {
            Ok(exe) => {
                let last = exe.code().last().map(|i| (i.opcode, i.operand(0).and_then(Operand::as_int)));
                prop_assert_eq!(last, Some((Opcode::Return, Some(0))));
                for (idx, instr) in exe.code().iter().enumerate() {
                    if let Some(target) = instr.target() {
                        prop_assert!((target as usize) < exe.len(), "{} at {} jumps past the end", instr.opcode, idx);
                    }
                }
                check_stack(&exe)?;
            }
            Err(CompileError::BreakOutsideLoop { .. }) => {}
            Err(e) => prop_assert!(false, "unexpected error: {}", e),
        }
    }
}
