//! Bottom-up expression rewriting.
//!
//! The rewriter maps children before parents, rebuilds a node only when a
//! child changed, memoizes per input node so shared subtrees are rewritten
//! once, and re-enters itself on rule output so a replacement is rewritten
//! to a fixed point. Rules must strictly reduce (never return a node they
//! would match again), which holds for both users here: substitution maps
//! variables to non-variable operands and inlining walks an acyclic tensor
//! DAG.

use std::collections::HashMap;

use crate::arena::{Arena, ExprRef, TensorId, VarId};
use crate::expr::ExprKind;

/// Rewrite `root` bottom-up with `rule`, returning the (possibly new) root.
///
/// `rule` sees each node after its children have been rewritten; returning
/// `None` keeps the node.
pub fn rewrite_expr<F>(arena: &mut Arena, root: ExprRef, rule: &mut F) -> ExprRef
where
    F: FnMut(&mut Arena, ExprRef) -> Option<ExprRef>,
{
    let mut memo = HashMap::new();
    go(arena, root, rule, &mut memo)
}

fn go<F>(arena: &mut Arena, e: ExprRef, rule: &mut F, memo: &mut HashMap<ExprRef, ExprRef>) -> ExprRef
where
    F: FnMut(&mut Arena, ExprRef) -> Option<ExprRef>,
{
    if let Some(&cached) = memo.get(&e) {
        return cached;
    }

    let kind = arena.expr(e).kind.clone();
    let dtype = arena.dtype(e);
    let rebuilt = match kind {
        ExprKind::IntImm(_) | ExprKind::FloatImm(_) | ExprKind::Var(_) => e,
        ExprKind::Cast(src) => {
            let s = go(arena, src, rule, memo);
            if s == src { e } else { arena.cast(s, dtype) }
        }
        ExprKind::Binary { op, lhs, rhs } => {
            let l = go(arena, lhs, rule, memo);
            let r = go(arena, rhs, rule, memo);
            if l == lhs && r == rhs { e } else { arena.binary(op, l, r) }
        }
        ExprKind::Compare { op, lhs, rhs } => {
            let l = go(arena, lhs, rule, memo);
            let r = go(arena, rhs, rule, memo);
            if l == lhs && r == rhs { e } else { arena.compare(op, l, r) }
        }
        ExprKind::Select { cond, on_true, on_false } => {
            let c = go(arena, cond, rule, memo);
            let t = go(arena, on_true, rule, memo);
            let f = go(arena, on_false, rule, memo);
            if c == cond && t == on_true && f == on_false { e } else { arena.select(c, t, f) }
        }
        ExprKind::Intrinsic { op, args } => {
            let mapped: Vec<ExprRef> = args.iter().map(|&a| go(arena, a, rule, memo)).collect();
            if mapped.iter().zip(args.iter()).all(|(a, b)| a == b) { e } else { arena.intrinsic(op, mapped) }
        }
        ExprKind::Load { buf, index } => {
            let i = go(arena, index, rule, memo);
            if i == index { e } else { arena.load(buf, i) }
        }
        ExprKind::Call { tensor, args } => {
            let mapped: Vec<ExprRef> = args.iter().map(|&a| go(arena, a, rule, memo)).collect();
            if mapped.iter().zip(args.iter()).all(|(a, b)| a == b) { e } else { arena.call(tensor, mapped) }
        }
    };

    let out = match rule(arena, rebuilt) {
        Some(replacement) => go(arena, replacement, rule, memo),
        None => rebuilt,
    };
    memo.insert(e, out);
    out
}

/// Replace variable references according to `map`.
pub fn substitute(arena: &mut Arena, root: ExprRef, map: &HashMap<VarId, ExprRef>) -> ExprRef {
    rewrite_expr(arena, root, &mut |a, e| match a.expr(e).kind {
        ExprKind::Var(v) => map.get(&v).copied().filter(|&r| r != e),
        _ => None,
    })
}

/// Inline every call to a tensor accepted by `inlinable`, substituting the
/// call arguments for the tensor's axis variables. Calls exposed by an
/// inlined body are inlined transitively.
pub fn inline_calls<P>(arena: &mut Arena, root: ExprRef, inlinable: P) -> ExprRef
where
    P: Fn(TensorId) -> bool,
{
    rewrite_expr(arena, root, &mut |a, e| {
        let ExprKind::Call { tensor, ref args } = a.expr(e).kind else {
            return None;
        };
        if !inlinable(tensor) {
            return None;
        }
        let def = a.tensor(tensor);
        let map: HashMap<VarId, ExprRef> = def.axes.iter().copied().zip(args.iter().copied()).collect();
        let body = def.body;
        Some(substitute(a, body, &map))
    })
}
