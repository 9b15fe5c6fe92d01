//! Tree-walking evaluator over compiled expressions.
//!
//! [`iterate`] opens a fresh cursor for an expression; sequences, ranges,
//! filters and FLWOR expressions stream, everything else is computed when the
//! cursor is opened. Cursors borrow the expression tree and receive the query
//! context on every pull.

use tracing::trace;

use crate::compiler::ir::{CompareKind, Expr};
use crate::engine::context::{Focus, QueryContext};
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::NodeKind;
use crate::xdm::{ItemType, Occurrence, SeqType, XdmAtomicValue, XdmItem, XdmSequence};

mod comparison;
pub mod cursors;
mod flwor;
mod functions;
mod node_ops;
pub(crate) mod numeric;
mod update;

pub use cursors::SequenceCursor;

use cursors::{ConcatCursor, FilterCursor, RangeCursor, SliceCursor, VecCursor};

pub type Cursor<'e> = Box<dyn SequenceCursor + 'e>;

/// Largest `to` range materialised by constant folding.
pub(crate) const FOLD_RANGE_LIMIT: i64 = 10_000;

fn is_lazy(expr: &Expr) -> bool {
    matches!(expr, Expr::Value(_) | Expr::Sequence(_) | Expr::Range { .. } | Expr::Filter { .. } | Expr::Flwor(_))
}

/// Opens a new cursor over the result of `expr`.
pub fn iterate<'e>(expr: &'e Expr, ctx: &mut QueryContext<'_>) -> Result<Cursor<'e>, Error> {
    match expr {
        Expr::Value(items) => Ok(Box::new(SliceCursor::new(items))),
        Expr::Sequence(parts) => Ok(Box::new(ConcatCursor::new(parts))),
        Expr::Range { from, to } => {
            let (Some(lo), Some(hi)) = (range_bound(from, ctx)?, range_bound(to, ctx)?) else {
                return Ok(Box::new(VecCursor::new(Vec::new())));
            };
            Ok(Box::new(RangeCursor::new(lo, hi)))
        }
        Expr::Filter { base, predicates } => {
            let mut cur = iterate(base, ctx)?;
            for p in predicates {
                cur = Box::new(FilterCursor::new(ctx, cur, p)?);
            }
            Ok(cur)
        }
        Expr::Flwor(f) => flwor::iterate_flwor(f, ctx),
        _ => Ok(Box::new(VecCursor::new(eval_eager(expr, ctx)?))),
    }
}

/// Evaluates `expr` to a materialised sequence.
pub fn evaluate(expr: &Expr, ctx: &mut QueryContext<'_>) -> Result<XdmSequence, Error> {
    if is_lazy(expr) {
        if let Expr::Value(items) = expr {
            return Ok(items.clone());
        }
        iterate(expr, ctx)?.finish(ctx)
    } else {
        eval_eager(expr, ctx)
    }
}

/// Effective boolean value, pulling at most two items.
pub fn ebv(expr: &Expr, ctx: &mut QueryContext<'_>) -> Result<bool, Error> {
    if let Some(b) = expr.literal_bool() {
        return Ok(b);
    }
    let mut cur = iterate(expr, ctx)?;
    let Some(first) = cur.next_item(ctx)? else { return Ok(false) };
    if let XdmItem::Node(_) = first {
        return Ok(true);
    }
    if let Some(second) = cur.next_item(ctx)? {
        return Err(Error::from_code(ErrorCode::FORG0006, "effective boolean value of a sequence of atomic values")
            .with_items(&[first, second]));
    }
    ebv_items(&[first])
}

pub(crate) fn ebv_items(items: &[XdmItem]) -> Result<bool, Error> {
    match items {
        [] => Ok(false),
        [XdmItem::Node(_), ..] => Ok(true),
        [XdmItem::Atomic(a)] => match a {
            XdmAtomicValue::Boolean(b) => Ok(*b),
            XdmAtomicValue::String(s) | XdmAtomicValue::UntypedAtomic(s) => Ok(!s.is_empty()),
            XdmAtomicValue::Integer(i) => Ok(*i != 0),
            XdmAtomicValue::Decimal(d) | XdmAtomicValue::Double(d) => Ok(*d != 0.0 && !d.is_nan()),
        },
        _ => Err(Error::from_code(ErrorCode::FORG0006, "effective boolean value of a sequence of atomic values")
            .with_items(items)),
    }
}

/// Whether the item at `pos` passes `pred`. A single numeric result selects
/// by position; anything else is taken by its effective boolean value.
pub(crate) fn predicate_matches(
    pred: &Expr,
    item: XdmItem,
    pos: usize,
    size: Option<usize>,
    ctx: &mut QueryContext<'_>,
) -> Result<bool, Error> {
    if let Expr::Pos(set) = pred {
        return Ok(set.contains(pos));
    }
    ctx.with_focus(Focus { item, position: pos, size }, |ctx| {
        let v = evaluate(pred, ctx)?;
        match v.as_slice() {
            [XdmItem::Atomic(a)] if a.is_numeric() => Ok(a.as_f64() == Some(pos as f64)),
            _ => ebv_items(&v),
        }
    })
}

/// Atomises one item against the document of `ctx`.
pub(crate) fn atomize_item(item: &XdmItem, ctx: &QueryContext<'_>) -> Result<XdmAtomicValue, Error> {
    match item {
        XdmItem::Atomic(a) => Ok(a.clone()),
        XdmItem::Node(n) => Ok(XdmAtomicValue::UntypedAtomic(ctx.doc()?.string_value(n.pre))),
    }
}

pub(crate) fn atomize(items: &[XdmItem], ctx: &QueryContext<'_>) -> Result<Vec<XdmAtomicValue>, Error> {
    items.iter().map(|i| atomize_item(i, ctx)).collect()
}

/// Atomised value of an operand that must have at most one item.
pub(crate) fn atomize_opt(expr: &Expr, ctx: &mut QueryContext<'_>) -> Result<Option<XdmAtomicValue>, Error> {
    let items = evaluate(expr, ctx)?;
    match items.as_slice() {
        [] => Ok(None),
        [one] => atomize_item(one, ctx).map(Some),
        _ => Err(Error::from_code(ErrorCode::XPTY0004, "operand must be a single item").with_items(&items)),
    }
}

pub(crate) fn string_value(item: &XdmItem, ctx: &QueryContext<'_>) -> Result<String, Error> {
    match item {
        XdmItem::Atomic(a) => Ok(a.lexical()),
        XdmItem::Node(n) => Ok(ctx.doc()?.string_value(n.pre)),
    }
}

fn range_bound(expr: &Expr, ctx: &mut QueryContext<'_>) -> Result<Option<i64>, Error> {
    match atomize_opt(expr, ctx)? {
        None => Ok(None),
        Some(XdmAtomicValue::Integer(i)) => Ok(Some(i)),
        Some(XdmAtomicValue::UntypedAtomic(s)) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| Error::from_code(ErrorCode::FORG0001, format!("cannot cast {s:?} to an integer"))),
        Some(other) => Err(Error::from_code(ErrorCode::XPTY0004, "range bounds must be integers")
            .with_items(&[XdmItem::Atomic(other)])),
    }
}

fn cardinality_error(occ: Occurrence, items: &[XdmItem]) -> Error {
    let (code, msg) = match occ {
        Occurrence::ExactlyOne => (ErrorCode::FORG0005, "expected exactly one item"),
        Occurrence::ZeroOrOne => (ErrorCode::FORG0003, "expected at most one item"),
        _ => (ErrorCode::FORG0004, "expected at least one item"),
    };
    Error::from_code(code, format!("{msg}, got {}", items.len())).with_items(items)
}

/// Checks a value against a sequence type.
pub(crate) fn check_type(ty: SeqType, items: &[XdmItem], ctx: &QueryContext<'_>) -> Result<(), Error> {
    if ty.empty {
        return if items.is_empty() { Ok(()) } else { Err(cardinality_error(Occurrence::ZeroOrOne, items)) };
    }
    if !ty.occ.allows(items.len()) {
        return Err(cardinality_error(ty.occ, items));
    }
    match mismatched_item(ty, items, ctx) {
        Some(item) => Err(Error::from_code(ErrorCode::XPDY0050, format!("item does not match {ty}"))
            .with_items(core::slice::from_ref(item))),
        None => Ok(()),
    }
}

/// Boolean form of [`check_type`].
pub(crate) fn instance_of(ty: SeqType, items: &[XdmItem], ctx: &QueryContext<'_>) -> bool {
    if ty.empty {
        return items.is_empty();
    }
    ty.occ.allows(items.len()) && mismatched_item(ty, items, ctx).is_none()
}

fn mismatched_item<'a>(ty: SeqType, items: &'a [XdmItem], ctx: &QueryContext<'_>) -> Option<&'a XdmItem> {
    if ty.item == ItemType::AnyItem {
        return None;
    }
    let doc = ctx.doc().ok();
    items.iter().find(|&item| {
        let ok = match (item, doc) {
            (XdmItem::Node(_), None) => matches!(ty.item, ItemType::AnyNode),
            (_, Some(d)) => ty.item.matches(item, |n| d.kind(n.pre)),
            (XdmItem::Atomic(_), None) => ty.item.matches(item, |_| NodeKind::Element),
        };
        !ok
    })
}

fn eval_eager(expr: &Expr, ctx: &mut QueryContext<'_>) -> Result<XdmSequence, Error> {
    match expr {
        Expr::Var(name) => {
            Err(Error::from_code(ErrorCode::XPST0008, format!("unresolved variable ${name}")))
        }
        Expr::LocalVar { name, id, .. } => ctx
            .vars
            .lookup(*id)
            .cloned()
            .ok_or_else(|| Error::from_code(ErrorCode::BXST0001, format!("variable ${name} is not bound"))),
        Expr::ExternalVar { name, ty } => {
            let value = ctx
                .dynamic
                .variables
                .get(name)
                .cloned()
                .ok_or_else(|| Error::from_code(ErrorCode::XPDY0002, format!("no value for external variable ${name}")))?;
            check_type(*ty, &value, ctx).map_err(|e| Error {
                code: ErrorCode::XPTY0004,
                message: format!("external variable ${name}: {}", e.message),
                preview: e.preview,
            })?;
            Ok(value)
        }
        Expr::ContextItem => Ok(vec![ctx.focus()?.item.clone()]),
        Expr::Root => Ok(vec![XdmItem::Node(ctx.doc()?.root())]),
        Expr::Position => Ok(vec![XdmItem::integer(ctx.focus()?.position as i64)]),
        Expr::Last => {
            let size = ctx
                .focus()?
                .size
                .ok_or_else(|| Error::from_code(ErrorCode::BXST0001, "context size is not available"))?;
            Ok(vec![XdmItem::integer(size as i64)])
        }
        Expr::Pos(set) => {
            let pos = ctx.focus()?.position;
            Ok(vec![XdmItem::boolean(set.contains(pos))])
        }
        Expr::Neg(e) => match atomize_opt(e, ctx)? {
            None => Ok(Vec::new()),
            Some(v) => Ok(vec![XdmItem::Atomic(numeric::negate(&v)?)]),
        },
        Expr::Arith { op, lhs, rhs } => {
            let Some(a) = atomize_opt(lhs, ctx)? else { return Ok(Vec::new()) };
            let Some(b) = atomize_opt(rhs, ctx)? else { return Ok(Vec::new()) };
            Ok(vec![XdmItem::Atomic(numeric::arithmetic(*op, &a, &b)?)])
        }
        Expr::Compare { kind: CompareKind::Value, op, lhs, rhs } => {
            let Some(a) = atomize_opt(lhs, ctx)? else { return Ok(Vec::new()) };
            let Some(b) = atomize_opt(rhs, ctx)? else { return Ok(Vec::new()) };
            Ok(vec![XdmItem::boolean(comparison::value_compare(*op, &a, &b)?)])
        }
        Expr::Compare { kind: CompareKind::General, op, lhs, rhs } => {
            let l = evaluate(lhs, ctx)?;
            let l = atomize(&l, ctx)?;
            let r = evaluate(rhs, ctx)?;
            let r = atomize(&r, ctx)?;
            Ok(vec![XdmItem::boolean(comparison::general_compare(*op, &l, &r)?)])
        }
        Expr::RangeCmp { expr, range } => {
            let items = evaluate(expr, ctx)?;
            let values = atomize(&items, ctx)?;
            Ok(vec![XdmItem::boolean(comparison::in_range(range, &values)?)])
        }
        Expr::And(ops) => {
            for op in ops {
                if !ebv(op, ctx)? {
                    return Ok(vec![XdmItem::boolean(false)]);
                }
            }
            Ok(vec![XdmItem::boolean(true)])
        }
        Expr::Or(ops) => {
            for op in ops {
                if ebv(op, ctx)? {
                    return Ok(vec![XdmItem::boolean(true)]);
                }
            }
            Ok(vec![XdmItem::boolean(false)])
        }
        Expr::If { cond, then, els } => {
            if ebv(cond, ctx)? {
                evaluate(then, ctx)
            } else {
                evaluate(els, ctx)
            }
        }
        Expr::Path { base, steps } => node_ops::eval_path(base.as_deref(), steps, ctx),
        Expr::SetOp { op, lhs, rhs } => node_ops::set_op(*op, lhs, rhs, ctx),
        Expr::IndexAccess { plan, test } => node_ops::index_access(plan, test, ctx),
        Expr::Treat { expr, ty } => {
            let items = evaluate(expr, ctx)?;
            check_type(*ty, &items, ctx)?;
            Ok(items)
        }
        Expr::Instance { expr, ty } => {
            let items = evaluate(expr, ctx)?;
            Ok(vec![XdmItem::boolean(instance_of(*ty, &items, ctx))])
        }
        Expr::Quantified { kind, clauses, satisfies } => {
            Ok(vec![XdmItem::boolean(flwor::eval_quantified(*kind, clauses, satisfies, ctx)?)])
        }
        Expr::Call { func, args } => functions::call_builtin(*func, args, ctx),
        Expr::ExternalCall { name, args } => {
            let externals = ctx
                .dynamic
                .externals
                .clone()
                .ok_or_else(|| Error::from_code(ErrorCode::XPST0017, format!("no external functions for {name}")))?;
            let mut values = Vec::with_capacity(args.len());
            for a in args {
                values.push(evaluate(a, ctx)?);
            }
            trace!(function = %name, args = values.len(), "external call");
            Ok(vec![externals.call(name, &values)?])
        }
        Expr::Insert { position, source, target } => {
            update::eval_insert(*position, source, target, ctx)?;
            Ok(Vec::new())
        }
        Expr::Delete(target) => {
            update::eval_delete(target, ctx)?;
            Ok(Vec::new())
        }
        Expr::Rename { target, name } => {
            update::eval_rename(target, name, ctx)?;
            Ok(Vec::new())
        }
        Expr::ReplaceNode { target, with } => {
            update::eval_replace_node(target, with, ctx)?;
            Ok(Vec::new())
        }
        Expr::ReplaceValue { target, with } => {
            update::eval_replace_value(target, with, ctx)?;
            Ok(Vec::new())
        }
        Expr::Value(_) | Expr::Sequence(_) | Expr::Range { .. } | Expr::Filter { .. } | Expr::Flwor(_) => {
            iterate(expr, ctx)?.finish(ctx)
        }
    }
}
