//! Local algebraic rewrites, applied bottom-up to every compiled node.

use tracing::debug;

use super::ir::{AxisIR, Builtin, CompareKind, ComparisonOp, Expr, NodeTestIR, NumRange, PosSet, Step};
use crate::engine::context::QueryContext;
use crate::engine::evaluator::{FOLD_RANGE_LIMIT, ebv_items, evaluate};
use crate::engine::runtime::DynamicContext;
use crate::xdm::{AtomicType, ItemType, SeqType, XdmItem, XdmSequence};

/// Integers above this magnitude are not exactly representable as `f64`.
const EXACT_F64: f64 = 9_007_199_254_740_992.0;

pub(super) fn simplify(expr: Expr, fold: bool) -> Expr {
    let expr = match expr {
        Expr::Compare { kind, op, lhs, rhs } => normalize_compare(kind, op, *lhs, *rhs),
        Expr::And(ops) => simplify_and(ops, fold),
        Expr::Or(ops) => simplify_or(ops, fold),
        Expr::If { cond, then, els } if fold => match literal_ebv(&cond) {
            Some(true) => *then,
            Some(false) => *els,
            None => Expr::If { cond, then, els },
        },
        Expr::Sequence(ops) => simplify_sequence(ops, fold),
        Expr::Filter { base, predicates } => simplify_filter(*base, predicates),
        Expr::Path { base, steps } => collapse_descendant_steps(base, steps),
        Expr::Instance { expr, ty } if fold => match static_instance(&expr, ty) {
            Some(b) => {
                debug!(%ty, result = b, "instance test decided statically");
                Expr::boolean(b)
            }
            None => Expr::Instance { expr, ty },
        },
        other => other,
    };
    if fold { fold_constant(expr) } else { expr }
}

/// Effective boolean value of a literal, if it has one.
fn literal_ebv(e: &Expr) -> Option<bool> {
    match e {
        Expr::Value(items) => ebv_items(items).ok(),
        _ => None,
    }
}

/// Outcome of `expr instance of ty` when the static type of `expr` decides
/// it. Only operands that cannot raise are considered.
fn static_instance(expr: &Expr, ty: SeqType) -> Option<bool> {
    if !matches!(expr, Expr::Value(_) | Expr::LocalVar { .. }) {
        return None;
    }
    let have = expr.seq_type();
    if have.empty {
        return Some(ty.empty || ty.occ.min() == 0);
    }
    if ty.empty {
        return (have.occ.min() >= 1).then_some(false);
    }
    let occ_within = have.occ.min() >= ty.occ.min()
        && ty.occ.max().is_none_or(|m| have.occ.max().is_some_and(|h| h <= m));
    if occ_within && item_subtype(have.item, ty.item) {
        return Some(true);
    }
    (have.occ.min() >= 1 && items_disjoint(have.item, ty.item)).then_some(false)
}

fn item_subtype(have: ItemType, want: ItemType) -> bool {
    match (have, want) {
        (_, ItemType::AnyItem) => true,
        (h, ItemType::AnyNode) => h.is_node(),
        (ItemType::Node(a), ItemType::Node(b)) => a == b,
        (ItemType::Atomic(a), ItemType::Atomic(b)) => a.derives_from(b),
        _ => false,
    }
}

/// No item can belong to both types.
fn items_disjoint(a: ItemType, b: ItemType) -> bool {
    match (a, b) {
        (ItemType::Atomic(_), n) | (n, ItemType::Atomic(_)) if n.is_node() => true,
        (ItemType::Node(x), ItemType::Node(y)) => x != y,
        (ItemType::Atomic(x), ItemType::Atomic(y)) => match (atomic_family(x), atomic_family(y)) {
            (Some(f), Some(g)) => f != g,
            _ => false,
        },
        _ => false,
    }
}

/// Primitive family of an atomic type; `None` for `AnyAtomic`, which spans all.
fn atomic_family(t: AtomicType) -> Option<u8> {
    match t {
        AtomicType::AnyAtomic => None,
        AtomicType::Boolean => Some(0),
        AtomicType::String => Some(1),
        AtomicType::UntypedAtomic => Some(2),
        AtomicType::Numeric | AtomicType::Integer | AtomicType::Decimal | AtomicType::Double => Some(3),
    }
}

fn is_foldable(e: &Expr) -> bool {
    let shape = matches!(
        e,
        Expr::Neg(_)
            | Expr::Arith { .. }
            | Expr::Compare { .. }
            | Expr::RangeCmp { .. }
            | Expr::And(_)
            | Expr::Or(_)
            | Expr::If { .. }
            | Expr::Call { .. }
            | Expr::Treat { .. }
            | Expr::Instance { .. }
            | Expr::Range { .. }
    );
    shape && e.children().iter().all(|c| c.is_value()) && !e.uses_focus() && e.is_deterministic()
}

/// Evaluates a node whose operands are all literals. A node whose evaluation
/// fails is kept so the error surfaces at run time.
fn fold_constant(expr: Expr) -> Expr {
    if !is_foldable(&expr) {
        return expr;
    }
    if let Expr::Range { from, to } = &expr {
        let span = match (from.literal_number(), to.literal_number()) {
            (Some(a), Some(b)) => b - a,
            _ => 0.0,
        };
        if span >= FOLD_RANGE_LIMIT as f64 {
            return expr;
        }
    }
    let dynamic = DynamicContext::default();
    let mut ctx = QueryContext::new(None, &dynamic);
    match evaluate(&expr, &mut ctx) {
        Ok(items) => {
            debug!(folded = ?expr, result = items.len(), "constant folded");
            Expr::Value(items)
        }
        Err(e) => {
            debug!(code = %e.code, "folding deferred to run time");
            expr
        }
    }
}

fn simplify_sequence(ops: Vec<Expr>, fold: bool) -> Expr {
    let ops: Vec<Expr> = ops
        .into_iter()
        .flat_map(|e| match e {
            Expr::Sequence(inner) => inner,
            other => vec![other],
        })
        .filter(|e| !matches!(e, Expr::Value(v) if v.is_empty()))
        .collect();
    match ops.len() {
        0 => Expr::empty(),
        1 => ops.into_iter().next().unwrap_or_else(Expr::empty),
        _ if fold && ops.iter().all(Expr::is_value) => {
            let items: XdmSequence = ops
                .into_iter()
                .flat_map(|e| match e {
                    Expr::Value(v) => v,
                    _ => Vec::new(),
                })
                .collect();
            Expr::Value(items)
        }
        _ => Expr::Sequence(ops),
    }
}

fn to_pos(v: f64) -> usize {
    if v <= 0.0 {
        0
    } else if v >= usize::MAX as f64 {
        usize::MAX
    } else {
        v as usize
    }
}

/// Positions `p` satisfying `p op v`.
fn positions_for(op: ComparisonOp, v: f64) -> PosSet {
    if v.is_nan() {
        return if op == ComparisonOp::Ne { PosSet::range(1, usize::MAX) } else { PosSet::default() };
    }
    let integral = v.fract() == 0.0;
    match op {
        ComparisonOp::Eq if integral && v >= 1.0 => PosSet::single(to_pos(v)),
        ComparisonOp::Eq => PosSet::default(),
        ComparisonOp::Ne if integral && v >= 1.0 => {
            let p = to_pos(v);
            PosSet::range(1, p - 1).union(&PosSet::range(p.saturating_add(1), usize::MAX))
        }
        ComparisonOp::Ne => PosSet::range(1, usize::MAX),
        ComparisonOp::Lt => {
            let c = v.ceil();
            if c <= 1.0 { PosSet::default() } else { PosSet::range(1, to_pos(c) - 1) }
        }
        ComparisonOp::Le => {
            let f = v.floor();
            if f < 1.0 { PosSet::default() } else { PosSet::range(1, to_pos(f)) }
        }
        ComparisonOp::Gt => PosSet::range(to_pos(v.floor()).saturating_add(1), usize::MAX),
        ComparisonOp::Ge => PosSet::range(to_pos(v.ceil()).max(1), usize::MAX),
    }
}

fn pos_expr(set: PosSet) -> Expr {
    if set.is_empty() { Expr::boolean(false) } else { Expr::Pos(set) }
}

/// Literal operand goes right; `position() op n` becomes a position set; a
/// general comparison against one number becomes a range test.
fn normalize_compare(kind: CompareKind, op: ComparisonOp, lhs: Expr, rhs: Expr) -> Expr {
    let (op, lhs, rhs) = if lhs.is_value() && !rhs.is_value() {
        debug!(?op, "comparison operands swapped");
        (op.mirror(), rhs, lhs)
    } else {
        (op, lhs, rhs)
    };
    let number = match &rhs {
        Expr::Value(items) if items.len() == 1 => match &items[0] {
            XdmItem::Atomic(a) if a.is_numeric() => a.as_f64(),
            _ => None,
        },
        _ => None,
    };
    if let (Expr::Position, Some(v)) = (&lhs, number) {
        let set = positions_for(op, v);
        debug!(?op, value = v, ranges = set.0.len(), "positional comparison");
        return pos_expr(set);
    }
    if kind == CompareKind::General
        && !lhs.is_value()
        && let Some(v) = number.filter(|v| !v.is_nan() && v.abs() < EXACT_F64)
        && let Some(range) = NumRange::from_comparison(op, v)
    {
        return Expr::RangeCmp { expr: Box::new(lhs), range };
    }
    Expr::Compare { kind, op, lhs: Box::new(lhs), rhs: Box::new(rhs) }
}

fn flatten(ops: Vec<Expr>, conjunction: bool) -> Vec<Expr> {
    let mut out = Vec::with_capacity(ops.len());
    for op in ops {
        match op {
            Expr::And(inner) if conjunction => out.extend(flatten(inner, true)),
            Expr::Or(inner) if !conjunction => out.extend(flatten(inner, false)),
            other => out.push(other),
        }
    }
    out
}

/// Range comparisons on the same operand may be intersected when that
/// operand is at most one number.
fn merges_ranges(e: &Expr) -> bool {
    let t = e.seq_type();
    t.zero_or_one() && !t.empty && t.item.is_numeric() && e.is_deterministic() && !e.uses_focus()
}

/// Wraps a single surviving operand so the node still yields one boolean.
fn boolean_result(mut ops: Vec<Expr>, conjunction: bool) -> Expr {
    match ops.len() {
        0 => Expr::boolean(conjunction),
        1 => {
            let only = ops.remove(0);
            let t = only.seq_type();
            if t.exactly_one() && t.item.is_boolean() {
                only
            } else {
                Expr::Call { func: Builtin::Boolean, args: vec![only] }
            }
        }
        _ if conjunction => Expr::And(ops),
        _ => Expr::Or(ops),
    }
}

fn simplify_and(ops: Vec<Expr>, fold: bool) -> Expr {
    let mut kept: Vec<Expr> = Vec::new();
    let mut pos: Option<(usize, PosSet)> = None;
    let mut ranges: Vec<(usize, Expr, NumRange)> = Vec::new();
    for op in flatten(ops, true) {
        if fold {
            match literal_ebv(&op) {
                Some(true) => continue,
                Some(false) => {
                    debug!("conjunction with a false operand folded");
                    return Expr::boolean(false);
                }
                None => {}
            }
        }
        match op {
            Expr::Pos(set) => match &mut pos {
                Some((_, acc)) => *acc = acc.intersect(&set),
                None => {
                    pos = Some((kept.len(), set));
                    kept.push(Expr::boolean(true));
                }
            },
            Expr::RangeCmp { expr, range } if merges_ranges(&expr) => {
                if let Some(entry) = ranges.iter_mut().find(|(_, e, _)| *e == *expr) {
                    entry.2 = entry.2.intersect(&range);
                } else {
                    ranges.push((kept.len(), *expr, range));
                    kept.push(Expr::boolean(true));
                }
            }
            other => kept.push(other),
        }
    }
    if let Some((at, set)) = pos {
        if set.is_empty() {
            debug!("positional predicates have an empty intersection");
            return Expr::boolean(false);
        }
        kept[at] = Expr::Pos(set);
    }
    for (at, expr, range) in ranges {
        if range.is_empty() {
            debug!(?range, "range comparisons have an empty intersection");
            return Expr::boolean(false);
        }
        kept[at] = Expr::RangeCmp { expr: Box::new(expr), range };
    }
    // statically empty operands decide the conjunction, evaluate them first
    let (mut first, rest): (Vec<Expr>, Vec<Expr>) = kept.into_iter().partition(|e| e.seq_type().empty);
    first.extend(rest);
    boolean_result(first, true)
}

/// `e = (a)` or `e = (b)` over the same operand becomes `e = (a, b)`.
fn merge_equalities(ops: Vec<Expr>) -> Vec<Expr> {
    let mut out: Vec<Expr> = Vec::with_capacity(ops.len());
    for op in ops {
        if let Expr::Compare { kind: CompareKind::General, op: ComparisonOp::Eq, lhs, rhs } = &op
            && let Expr::Value(items) = rhs.as_ref()
            && lhs.is_deterministic()
            && let Some(Expr::Compare { rhs: prev, .. }) = out.iter_mut().find(|o| {
                matches!(o, Expr::Compare { kind: CompareKind::General, op: ComparisonOp::Eq, lhs: l, rhs: r }
                    if l == lhs && r.is_value())
            })
            && let Expr::Value(prev_items) = prev.as_mut()
        {
            debug!(added = items.len(), "equality comparisons merged");
            prev_items.extend(items.iter().cloned());
            continue;
        }
        out.push(op);
    }
    out
}

fn simplify_or(ops: Vec<Expr>, fold: bool) -> Expr {
    let mut kept: Vec<Expr> = Vec::new();
    let mut pos: Option<(usize, PosSet)> = None;
    for op in flatten(ops, false) {
        if fold {
            match literal_ebv(&op) {
                Some(false) => continue,
                Some(true) => {
                    debug!("disjunction with a true operand folded");
                    return Expr::boolean(true);
                }
                None => {}
            }
        }
        match op {
            Expr::Pos(set) => match &mut pos {
                Some((_, acc)) => *acc = acc.union(&set),
                None => {
                    pos = Some((kept.len(), set));
                    kept.push(Expr::boolean(false));
                }
            },
            other => kept.push(other),
        }
    }
    if let Some((at, set)) = pos {
        debug!(ranges = set.0.len(), "positional predicates merged");
        kept[at] = Expr::Pos(set);
    }
    boolean_result(merge_equalities(kept), false)
}

/// A numeric literal predicate selects by position.
pub(super) fn positional_predicate(pred: Expr) -> Expr {
    match &pred {
        Expr::Value(items) if items.len() == 1 => match &items[0] {
            XdmItem::Atomic(a) if a.is_numeric() => {
                let v = a.as_f64().unwrap_or(f64::NAN);
                pos_expr(positions_for(ComparisonOp::Eq, v))
            }
            _ => pred,
        },
        _ => pred,
    }
}

/// Drops predicates that are literally true.
pub(super) fn prune_predicates(preds: Vec<Expr>) -> Vec<Expr> {
    preds.into_iter().filter(|p| literal_ebv(p) != Some(true)).collect()
}

fn simplify_filter(base: Expr, predicates: Vec<Expr>) -> Expr {
    if predicates.is_empty() || matches!(&base, Expr::Value(v) if v.is_empty()) {
        return base;
    }
    Expr::Filter { base: Box::new(base), predicates }
}

/// Predicate whose outcome does not depend on its position in the input.
fn position_free(p: &Expr) -> bool {
    let t = p.seq_type();
    let typed = t.empty || t.item.is_boolean() || t.item.is_node();
    typed && !p.any(&|e| matches!(e, Expr::Position | Expr::Last | Expr::Pos(_)))
}

/// `descendant-or-self::node()/child::T[p]` is `descendant::T[p]` when no
/// predicate looks at positions.
fn collapse_descendant_steps(base: Option<Box<Expr>>, steps: Vec<Step>) -> Expr {
    let mut out: Vec<Step> = Vec::with_capacity(steps.len());
    for step in steps {
        if step.axis == AxisIR::Child
            && step.predicates.iter().all(position_free)
            && let Some(prev) = out.last()
            && prev.axis == AxisIR::DescendantOrSelf
            && prev.test == NodeTestIR::AnyKind
            && prev.predicates.is_empty()
        {
            debug!(test = ?step.test, "descendant steps collapsed");
            out.pop();
            out.push(Step { axis: AxisIR::Descendant, ..step });
            continue;
        }
        out.push(step);
    }
    Expr::Path { base, steps: out }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::ArithOp;

    fn int(i: i64) -> Expr {
        Expr::Value(vec![XdmItem::integer(i)])
    }

    #[test]
    fn positions_for_comparisons() {
        assert_eq!(positions_for(ComparisonOp::Lt, 3.0), PosSet::range(1, 2));
        assert_eq!(positions_for(ComparisonOp::Le, 2.5), PosSet::range(1, 2));
        assert_eq!(positions_for(ComparisonOp::Gt, 2.5), PosSet::range(3, usize::MAX));
        assert_eq!(positions_for(ComparisonOp::Ge, 0.0), PosSet::range(1, usize::MAX));
        assert!(positions_for(ComparisonOp::Eq, 0.0).is_empty());
        let ne = positions_for(ComparisonOp::Ne, 2.0);
        assert!(ne.contains(1) && !ne.contains(2) && ne.contains(3));
    }

    #[test]
    fn literal_left_comparison_is_swapped() {
        let e = normalize_compare(CompareKind::Value, ComparisonOp::Lt, int(3), Expr::ContextItem);
        match e {
            Expr::Compare { op, lhs, .. } => {
                assert_eq!(op, ComparisonOp::Gt);
                assert_eq!(*lhs, Expr::ContextItem);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn position_equalities_merge_under_or() {
        let a = normalize_compare(CompareKind::General, ComparisonOp::Eq, Expr::Position, int(2));
        let b = normalize_compare(CompareKind::General, ComparisonOp::Eq, Expr::Position, int(4));
        let e = simplify_or(vec![a, b], true);
        assert_eq!(e, Expr::Pos(PosSet::single(2).union(&PosSet::single(4))));
    }

    #[test]
    fn arithmetic_folds() {
        let e = simplify(Expr::Arith { op: ArithOp::Mul, lhs: Box::new(int(6)), rhs: Box::new(int(7)) }, true);
        assert_eq!(e, int(42));
        let div0 = simplify(Expr::Arith { op: ArithOp::Div, lhs: Box::new(int(1)), rhs: Box::new(int(0)) }, true);
        assert!(matches!(div0, Expr::Arith { .. }));
    }

    #[test]
    fn single_non_boolean_operand_is_wrapped() {
        let e = simplify_and(vec![Expr::boolean(true), Expr::ContextItem], true);
        assert_eq!(e, Expr::Call { func: Builtin::Boolean, args: vec![Expr::ContextItem] });
    }
}
