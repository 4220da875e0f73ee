use smallvec::SmallVec;
use crate::ast::{Expr, Node, NodeKind};
use crate::error::CompileError;

pub type Leaves<'n, 'src> = SmallVec<&'n Node<'src>, 8>;

/// Collects the leaves of a right-nested chain of tuple pairs, left to
/// right. Anything that is not a pair is a single leaf.
///
/// Fails as soon as the leaves seen plus the subtrees still pending exceed
/// `cap`; each pending subtree holds at least one leaf, so a chain that fits
/// never trips the check.
pub fn flatten_into<'n, 'src>(
    root: &'n Node<'src>,
    out: &mut Leaves<'n, 'src>,
    cap: usize,
) -> Result<(), CompileError> {
    let base = out.len();
    let mut pending = Leaves::new();
    pending.push(root);

    while let Some(node) = pending.pop() {
        match &node.kind {
            NodeKind::Expr(Expr::Pair(lhs, rhs)) => {
                pending.push(rhs.as_ref());
                pending.push(lhs.as_ref());
            }
            _ => out.push(node),
        }

        if out.len() - base + pending.len() > cap {
            return Err(CompileError::TupleTooLong { limit: cap, span: root.span });
        }
    }
    Ok(())
}

pub fn flatten<'n, 'src>(root: &'n Node<'src>, cap: usize) -> Result<Leaves<'n, 'src>, CompileError> {
    let mut out = Leaves::new();
    flatten_into(root, &mut out, cap)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use noja_bytecode::Span;

    fn ident(name: &str, at: usize) -> Node<'_> {
        Node::expr(Span::new(at, 1), Expr::Ident(name.into()))
    }

    fn names<'a>(leaves: &[&'a Node<'a>]) -> Vec<&'a str> {
        leaves.iter()
            .map(|n| match n.as_expr() {
                Some(Expr::Ident(name)) => name.as_ref(),
                _ => "?",
            })
            .collect()
    }

    #[test]
    fn single_node_is_one_leaf() {
        let x = ident("x", 0);
        assert_eq!(names(&flatten(&x, 1).unwrap()), ["x"]);
    }

    #[test]
    fn keeps_source_order() {
        // a, (b, c) as the parser builds it, and (a, b), c from parenthesised input
        let right = Node::pair(ident("a", 0), Node::pair(ident("b", 3), ident("c", 6)));
        let left = Node::pair(Node::pair(ident("a", 0), ident("b", 3)), ident("c", 6));
        assert_eq!(names(&flatten(&right, 3).unwrap()), ["a", "b", "c"]);
        assert_eq!(names(&flatten(&left, 3).unwrap()), ["a", "b", "c"]);
    }

    #[test]
    fn capacity_is_enforced() {
        let t = Node::pair(ident("a", 0), Node::pair(ident("b", 3), ident("c", 6)));
        assert_eq!(
            flatten(&t, 2).unwrap_err(),
            CompileError::TupleTooLong { limit: 2, span: Span::new(0, 7) },
        );
    }

    #[test]
    fn appends_after_existing_leaves() {
        let x = ident("x", 0);
        let t = Node::pair(ident("a", 2), ident("b", 4));
        let mut out = Leaves::new();
        out.push(&x);
        flatten_into(&t, &mut out, 2).unwrap();
        assert_eq!(names(&out), ["x", "a", "b"]);
    }
}
