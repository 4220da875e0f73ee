use std::ops::Range;
use chumsky::error::Cheap;
use chumsky::input::Stream;
use chumsky::span::SimpleSpan;
use chumsky::Parser;
use noja_bytecode::{Source, Span};
use crate::ast::{Arg, Ast, BinaryOp, Expr, Node, NodeKind, UnaryOp};
use crate::error::SyntaxError;
use crate::lex::{Spanned, Tok};

type Extra = chumsky::extra::Err<Cheap>;

/// Parser spans count tokens; this maps them back onto the source text.
#[derive(Clone, Copy)]
struct ByteSpans<'tok> {
    ranges: &'tok [Range<usize>],
    eof: usize,
}

impl<'tok> ByteSpans<'tok> {
    fn get(&self, span: SimpleSpan) -> Span {
        let start = self.ranges.get(span.start).map_or(self.eof, |r| r.start);
        let end = match span.end.checked_sub(1) {
            Some(last) if span.end > span.start => self.ranges.get(last).map_or(self.eof, |r| r.end),
            _ => start,
        };
        Span::new(start, end.saturating_sub(start))
    }
}

enum Postfix<'src> {
    Call(Vec<Node<'src>>, Span),
    Index(Node<'src>, Span),
}

fn parser<'tok, 'src: 'tok, I>(spans: ByteSpans<'tok>) ->
    impl Parser<'tok, Stream<I>, Vec<Node<'src>>, Extra>
where
    I: Iterator<Item = Tok<'src>> + 'tok,
{
    use chumsky::prelude::*;

    let expr = recursive(|expr| {
        let operand = recursive(|operand| {
            let items = operand.clone()
                .separated_by(just(Tok::Comma))
                .allow_trailing()
                .collect::<Vec<Node<'src>>>();

            let literal = select! {
                Tok::Int(v) => Expr::Int(v),
                Tok::Float(v) => Expr::Float(v),
                Tok::Str(s) => Expr::Str(s),
                Tok::Ident(s) => Expr::Ident(s),
                Tok::None => Expr::None,
                Tok::True => Expr::True,
                Tok::False => Expr::False,
            }.map_with(move |lit, ctx| Node::expr(spans.get(ctx.span()), lit));

            let parens = expr.clone()
                .delimited_by(just(Tok::ParenOpen), just(Tok::ParenClose));

            let list = items.clone()
                .delimited_by(just(Tok::SquareOpen), just(Tok::SquareClose))
                .map_with(move |items, ctx| Node::expr(spans.get(ctx.span()), Expr::List(items)));

            let map = operand.clone()
                .then_ignore(just(Tok::Colon))
                .then(operand.clone())
                .separated_by(just(Tok::Comma))
                .allow_trailing()
                .collect::<Vec<(Node<'src>, Node<'src>)>>()
                .delimited_by(just(Tok::CurlyOpen), just(Tok::CurlyClose))
                .map_with(move |entries, ctx| Node::expr(spans.get(ctx.span()), Expr::Map(entries)));

            let atom = choice((literal, parens, list, map));

            let call = items
                .delimited_by(just(Tok::ParenOpen), just(Tok::ParenClose))
                .map_with(move |args, ctx| Postfix::Call(args, spans.get(ctx.span())));

            let index = expr.clone()
                .delimited_by(just(Tok::SquareOpen), just(Tok::SquareClose))
                .map_with(move |idx, ctx| Postfix::Index(idx, spans.get(ctx.span())));

            let postfix = atom.foldl(choice((call, index)).repeated(), |lhs: Node<'src>, post| {
                match post {
                    Postfix::Call(args, span) => Node::expr(lhs.span.cover(span), Expr::Call {
                        func: Box::new(lhs),
                        args,
                    }),
                    Postfix::Index(idx, span) => Node::expr(lhs.span.cover(span), Expr::Select {
                        set: Box::new(lhs),
                        idx: Box::new(idx),
                    }),
                }
            }).boxed();

            let unary = choice((
                just(Tok::Plus).to(UnaryOp::Pos),
                just(Tok::Minus).to(UnaryOp::Neg),
                just(Tok::Not).to(UnaryOp::Not),
            ))
                .map_with(move |op, ctx| (op, spans.get(ctx.span())))
                .repeated()
                .foldr(postfix, |(op, span), rhs: Node<'src>| {
                    Node::expr(span.cover(rhs.span), Expr::Unary(op, Box::new(rhs)))
                })
                .boxed();

            let product = unary.clone()
                .foldl(choice((
                    just(Tok::Star).to(BinaryOp::Mul),
                    just(Tok::Slash).to(BinaryOp::Div),
                )).then(unary).repeated(), |lhs, (op, rhs)| Node::binary(op, lhs, rhs))
                .boxed();

            let sum = product.clone()
                .foldl(choice((
                    just(Tok::Plus).to(BinaryOp::Add),
                    just(Tok::Minus).to(BinaryOp::Sub),
                )).then(product).repeated(), |lhs, (op, rhs)| Node::binary(op, lhs, rhs))
                .boxed();

            let relation = sum.clone()
                .foldl(choice((
                    just(Tok::Lt).to(BinaryOp::Lss),
                    just(Tok::LtEq).to(BinaryOp::Leq),
                    just(Tok::Gt).to(BinaryOp::Grt),
                    just(Tok::GtEq).to(BinaryOp::Geq),
                )).then(sum).repeated(), |lhs, (op, rhs)| Node::binary(op, lhs, rhs))
                .boxed();

            let equality = relation.clone()
                .foldl(choice((
                    just(Tok::EqEq).to(BinaryOp::Eql),
                    just(Tok::NotEq).to(BinaryOp::Nql),
                )).then(relation).repeated(), |lhs, (op, rhs)| Node::binary(op, lhs, rhs))
                .boxed();

            let and = equality.clone()
                .foldl(just(Tok::And).to(BinaryOp::And).then(equality).repeated(),
                    |lhs, (op, rhs)| Node::binary(op, lhs, rhs))
                .boxed();

            and.clone()
                .foldl(just(Tok::Or).to(BinaryOp::Or).then(and).repeated(),
                    |lhs, (op, rhs)| Node::binary(op, lhs, rhs))
                .boxed()
        });

        let tuple = operand.clone()
            .foldl(just(Tok::Comma).ignore_then(operand).repeated(), Node::pair);

        // assignment is right associative: `a = b = c` stores c into b first
        tuple
            .then(just(Tok::Assign).ignore_then(expr).or_not())
            .map(|(target, value): (Node<'src>, Option<Node<'src>>)| match value {
                Some(value) => Node::assign(target, value),
                None => target,
            })
            .boxed()
    });

    let stmt = recursive(|stmt| {
        let name = select! { Tok::Ident(name) => name }
            .map_with(move |name, ctx| Arg { name, span: spans.get(ctx.span()) });

        let block = stmt.clone()
            .repeated()
            .collect::<Vec<Node<'src>>>()
            .delimited_by(just(Tok::CurlyOpen), just(Tok::CurlyClose))
            .map_with(move |body, ctx| Node::new(spans.get(ctx.span()), NodeKind::Compound(body)));

        let if_else = just(Tok::If)
            .ignore_then(expr.clone())
            .then_ignore(just(Tok::Colon))
            .then(stmt.clone())
            .then(just(Tok::Else).ignore_then(stmt.clone()).or_not())
            .map_with(move |((condition, true_branch), false_branch), ctx| Node::new(
                spans.get(ctx.span()),
                NodeKind::IfElse {
                    condition: Box::new(condition),
                    true_branch: Box::new(true_branch),
                    false_branch: false_branch.map(Box::new),
                },
            ));

        let while_ = just(Tok::While)
            .ignore_then(expr.clone())
            .then_ignore(just(Tok::Colon))
            .then(stmt.clone())
            .map_with(move |(condition, body), ctx| Node::new(
                spans.get(ctx.span()),
                NodeKind::While { condition: Box::new(condition), body: Box::new(body) },
            ));

        let do_while = just(Tok::Do)
            .ignore_then(stmt.clone())
            .then_ignore(just(Tok::While))
            .then(expr.clone())
            .then_ignore(just(Tok::Semicolon))
            .map_with(move |(body, condition), ctx| Node::new(
                spans.get(ctx.span()),
                NodeKind::DoWhile { body: Box::new(body), condition: Box::new(condition) },
            ));

        let func = just(Tok::Fun)
            .ignore_then(name.clone())
            .then(name
                .separated_by(just(Tok::Comma))
                .allow_trailing()
                .collect::<Vec<Arg<'src>>>()
                .delimited_by(just(Tok::ParenOpen), just(Tok::ParenClose)))
            .then(stmt.clone())
            .map_with(move |((name, args), body), ctx| Node::new(
                spans.get(ctx.span()),
                NodeKind::Func { name: name.name, args, body: Box::new(body) },
            ));

        let ret = just(Tok::Return)
            .ignore_then(expr.clone().or_not())
            .then_ignore(just(Tok::Semicolon))
            .map_with(move |value, ctx| Node::new(
                spans.get(ctx.span()),
                NodeKind::Return(value.map(Box::new)),
            ));

        let brk = just(Tok::Break)
            .then_ignore(just(Tok::Semicolon))
            .map_with(move |_, ctx| Node::new(spans.get(ctx.span()), NodeKind::Break));

        let bare = expr.clone().then_ignore(just(Tok::Semicolon));

        choice((block, if_else, while_, do_while, func, ret, brk, bare)).boxed()
    });

    stmt.repeated().collect().then_ignore(end())
}

/// Parses a token stream as produced by [crate::lex::lex]. Comments are skipped.
pub fn parse<'src>(source: &'src Source, toks: Vec<Spanned<Tok<'src>>>) -> Result<Ast<'src>, Vec<SyntaxError>> {
    let (toks, ranges): (Vec<Tok<'src>>, Vec<Range<usize>>) = toks.into_iter()
        .filter(|(tok, _)| !matches!(tok, Tok::Comment(_)))
        .unzip();

    let spans = ByteSpans { ranges: &ranges, eof: source.len() };
    let found: Vec<String> = toks.iter().map(Tok::to_string).collect();

    let (stmts, errs) = parser(spans)
        .parse(Stream::from_iter(toks.into_iter()))
        .into_output_errors();

    match stmts {
        Some(stmts) if errs.is_empty() => Ok(Ast {
            source,
            root: Node::new(Span::new(0, source.len()), NodeKind::Compound(stmts)),
        }),
        _ => Err(errs.iter()
            .map(|e| SyntaxError {
                span: spans.get(*e.span()),
                found: found.get(e.span().start).cloned(),
            })
            .collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lex::lex;

    fn parse_str(source: &Source) -> Result<Ast<'_>, Vec<SyntaxError>> {
        parse(source, lex(source.text()).unwrap())
    }

    fn stmts<'a>(ast: &'a Ast<'_>) -> &'a [Node<'a>] {
        match &ast.root.kind {
            NodeKind::Compound(stmts) => stmts,
            _ => panic!("root is always a compound"),
        }
    }

    #[test]
    fn precedence() {
        let source = Source::new("t", "1 + 2 * 3 == 7 or not x;");
        let ast = parse_str(&source).unwrap();
        let Some(Expr::Binary(BinaryOp::Or, lhs, rhs)) = stmts(&ast)[0].as_expr() else {
            panic!("expected `or` at the top")
        };
        assert!(matches!(lhs.as_expr(), Some(Expr::Binary(BinaryOp::Eql, _, _))));
        assert!(matches!(rhs.as_expr(), Some(Expr::Unary(UnaryOp::Not, _))));
    }

    #[test]
    fn tuple_assignment_is_one_target() {
        let source = Source::new("t", "a, b[0] = f(1, 2);");
        let ast = parse_str(&source).unwrap();
        let Some(Expr::Assign(target, value)) = stmts(&ast)[0].as_expr() else {
            panic!("expected an assignment")
        };
        let Some(Expr::Pair(a, b)) = target.as_expr() else { panic!("expected a tuple") };
        assert_eq!(a.as_expr(), Some(&Expr::Ident("a".into())));
        assert!(matches!(b.as_expr(), Some(Expr::Select { .. })));
        let Some(Expr::Call { args, .. }) = value.as_expr() else { panic!("expected a call") };
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn spans_are_byte_offsets() {
        let source = Source::new("t", "# hi\nx = 10;\nbreak;");
        let ast = parse_str(&source).unwrap();
        let stmts = stmts(&ast);
        assert_eq!(stmts[0].span, Span::new(5, 6));
        assert_eq!(stmts[1].span, Span::new(13, 6));
        assert_eq!(ast.root.span, Span::new(0, source.len()));
    }

    #[test]
    fn statements() {
        let source = Source::new("t", r#"
            fun add(a, b) { return a + b; }
            if x: y; else { z; }
            while i < 10: i = i + 1;
            do { i; } while i;
            m = {"k": [1, 2.5, none]};
            return;
        "#);
        let ast = parse_str(&source).unwrap();
        let kinds: Vec<_> = stmts(&ast).iter().map(|n| &n.kind).collect();
        assert!(matches!(kinds[0], NodeKind::Func { args, .. } if args.len() == 2));
        assert!(matches!(kinds[1], NodeKind::IfElse { false_branch: Some(_), .. }));
        assert!(matches!(kinds[2], NodeKind::While { .. }));
        assert!(matches!(kinds[3], NodeKind::DoWhile { .. }));
        assert!(matches!(kinds[4], NodeKind::Expr(Expr::Assign(..))));
        assert!(matches!(kinds[5], NodeKind::Return(None)));
    }

    #[test]
    fn reports_unexpected_token() {
        let source = Source::new("t", "x = ;");
        let errs = parse_str(&source).unwrap_err();
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].span, Span::new(4, 1));
        assert_eq!(errs[0].found.as_deref(), Some(";"));
    }

    #[test]
    fn reports_unexpected_end() {
        let source = Source::new("t", "x = 1");
        let errs = parse_str(&source).unwrap_err();
        assert_eq!(errs[0].span, Span::at(5));
        assert_eq!(errs[0].found, None);
    }
}
