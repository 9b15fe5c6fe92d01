//! Axis navigation, node set operators and index access.

use std::collections::HashSet;

use itertools::{EitherOrBoth, Itertools};
use tracing::trace;

use super::{evaluate, predicate_matches};
use crate::compiler::ir::{AxisIR, Expr, IndexPlan, NodeTestIR, SetOp, Step};
use crate::engine::context::QueryContext;
use crate::engine::runtime::{Error, ErrorCode};
use crate::index::IndexProvider;
use crate::model::NodeKind;
use crate::store::Document;
use crate::xdm::{NodeRef, XdmItem, XdmSequence};

fn not_a_node(item: &XdmItem) -> Error {
    Error::from_code(ErrorCode::XPTY0004, "path step applied to a non-node").with_items(core::slice::from_ref(item))
}

fn nodes_of(items: &[XdmItem]) -> Result<Vec<NodeRef>, Error> {
    items.iter().map(|i| i.as_node().ok_or_else(|| not_a_node(i))).collect()
}

/// Nodes on `axis` from `pre`, in axis order (reverse axes nearest first).
fn axis_nodes(doc: &Document, pre: usize, axis: AxisIR) -> Vec<usize> {
    match axis {
        AxisIR::Child => doc.children(pre).collect(),
        AxisIR::Attribute => doc.attributes(pre).collect(),
        AxisIR::SelfAxis => vec![pre],
        AxisIR::Parent => doc.parent(pre).into_iter().collect(),
        AxisIR::Descendant => doc.descendants(pre).collect(),
        AxisIR::DescendantOrSelf => core::iter::once(pre).chain(doc.descendants(pre)).collect(),
        AxisIR::Ancestor => core::iter::successors(doc.parent(pre), |p| doc.parent(*p)).collect(),
        AxisIR::FollowingSibling | AxisIR::PrecedingSibling => {
            if doc.kind(pre) == NodeKind::Attribute {
                return Vec::new();
            }
            let Some(parent) = doc.parent(pre) else { return Vec::new() };
            if axis == AxisIR::FollowingSibling {
                doc.children(parent).filter(|c| *c > pre).collect()
            } else {
                let mut v: Vec<usize> = doc.children(parent).take_while(|c| *c < pre).collect();
                v.reverse();
                v
            }
        }
    }
}

pub(crate) fn test_matches(doc: &Document, pre: usize, test: &NodeTestIR, principal: NodeKind) -> bool {
    let kind = doc.kind(pre);
    match test {
        NodeTestIR::AnyKind => true,
        NodeTestIR::Kind(k) => kind == *k,
        NodeTestIR::Wildcard => kind == principal,
        NodeTestIR::Name(n) => {
            kind == principal && doc.name(pre).is_some_and(|q| q.local == n.local && q.ns_uri == n.ns_uri)
        }
    }
}

fn filter_positions(
    pred: &Expr,
    candidates: Vec<usize>,
    doc: &Document,
    ctx: &mut QueryContext<'_>,
) -> Result<Vec<usize>, Error> {
    let size = candidates.len();
    if let Expr::Pos(set) = pred {
        return Ok(set.positions(size).map(|p| candidates[p - 1]).collect());
    }
    let mut out = Vec::new();
    for (i, pre) in candidates.into_iter().enumerate() {
        if predicate_matches(pred, XdmItem::Node(doc.node(pre)), i + 1, Some(size), ctx)? {
            out.push(pre);
        }
    }
    Ok(out)
}

fn eval_step(step: &Step, from: &[NodeRef], doc: &Document, ctx: &mut QueryContext<'_>) -> Result<Vec<usize>, Error> {
    let principal = if step.axis == AxisIR::Attribute { NodeKind::Attribute } else { NodeKind::Element };
    let mut out = Vec::new();
    for n in from {
        let mut candidates: Vec<usize> =
            axis_nodes(doc, n.pre, step.axis).into_iter().filter(|p| test_matches(doc, *p, &step.test, principal)).collect();
        for pred in &step.predicates {
            if candidates.is_empty() {
                break;
            }
            candidates = filter_positions(pred, candidates, doc, ctx)?;
        }
        out.extend(candidates);
    }
    out.sort_unstable();
    out.dedup();
    Ok(out)
}

/// Evaluates a path. Each step is applied to every node of the previous
/// result; step results are in document order without duplicates.
pub(crate) fn eval_path(base: Option<&Expr>, steps: &[Step], ctx: &mut QueryContext<'_>) -> Result<XdmSequence, Error> {
    let mut current = match base {
        Some(b) => {
            let items = evaluate(b, ctx)?;
            if steps.is_empty() {
                return Ok(items);
            }
            nodes_of(&items)?
        }
        None => {
            let item = &ctx.focus()?.item;
            vec![item.as_node().ok_or_else(|| not_a_node(item))?]
        }
    };
    let doc = ctx.doc()?;
    for step in steps {
        ctx.check_cancelled()?;
        let pres = eval_step(step, &current, doc, ctx)?;
        trace!(axis = ?step.axis, inputs = current.len(), outputs = pres.len(), "path step");
        current = pres.into_iter().map(|p| doc.node(p)).collect();
        if current.is_empty() {
            break;
        }
    }
    Ok(current.into_iter().map(XdmItem::Node).collect())
}

fn sorted_pres(items: &[XdmItem]) -> Result<Vec<usize>, Error> {
    let mut pres: Vec<usize> = nodes_of(items)
        .map_err(|e| Error { message: "set operator applied to a non-node".into(), ..e })?
        .into_iter()
        .map(|n| n.pre)
        .collect();
    pres.sort_unstable();
    pres.dedup();
    Ok(pres)
}

pub(crate) fn set_op(op: SetOp, lhs: &Expr, rhs: &Expr, ctx: &mut QueryContext<'_>) -> Result<XdmSequence, Error> {
    let l = sorted_pres(&evaluate(lhs, ctx)?)?;
    let r = sorted_pres(&evaluate(rhs, ctx)?)?;
    let pres: Vec<usize> = match op {
        SetOp::Union => l.into_iter().merge(r).dedup().collect(),
        SetOp::Intersect => intersect_sorted(l, r),
        SetOp::Except => {
            let drop: HashSet<usize> = r.into_iter().collect();
            l.into_iter().filter(|p| !drop.contains(p)).collect()
        }
    };
    if pres.is_empty() {
        return Ok(Vec::new());
    }
    let doc = ctx.doc()?;
    Ok(pres.into_iter().map(|p| XdmItem::Node(doc.node(p))).collect())
}

fn intersect_sorted(a: Vec<usize>, b: Vec<usize>) -> Vec<usize> {
    a.into_iter()
        .merge_join_by(b, |x, y| x.cmp(y))
        .filter_map(|e| match e {
            EitherOrBoth::Both(x, _) => Some(x),
            _ => None,
        })
        .collect()
}

/// Owner positions (parents of the probe candidates) in document order.
fn plan_owners(plan: &IndexPlan, doc: &Document, provider: &dyn IndexProvider) -> Result<Vec<usize>, Error> {
    match plan {
        IndexPlan::Probe { probe, .. } => {
            let found = provider.candidates(doc, probe)?;
            let mut owners: Vec<usize> = found.pres.into_iter().filter_map(|p| doc.parent(p)).collect();
            owners.sort_unstable();
            owners.dedup();
            Ok(owners)
        }
        IndexPlan::Intersect(parts) => {
            let mut acc: Option<Vec<usize>> = None;
            for part in parts {
                let owners = plan_owners(part, doc, provider)?;
                let next = match acc {
                    None => owners,
                    Some(prev) => intersect_sorted(prev, owners),
                };
                if next.is_empty() {
                    return Ok(next);
                }
                acc = Some(next);
            }
            Ok(acc.unwrap_or_default())
        }
        IndexPlan::Union(parts) => {
            let lists = parts.iter().map(|p| plan_owners(p, doc, provider)).collect::<Result<Vec<_>, _>>()?;
            Ok(lists.into_iter().kmerge().dedup().collect())
        }
    }
}

pub(crate) fn index_access(plan: &IndexPlan, test: &NodeTestIR, ctx: &mut QueryContext<'_>) -> Result<XdmSequence, Error> {
    let doc = ctx.doc()?;
    let provider = ctx
        .dynamic
        .indexes
        .clone()
        .ok_or_else(|| Error::from_code(ErrorCode::BXIX0001, "query was compiled against an index but none is bound"))?;
    ctx.check_cancelled()?;
    let owners = plan_owners(plan, doc, provider.as_ref())?;
    trace!(estimate = plan.estimate(), owners = owners.len(), "index access");
    Ok(owners
        .into_iter()
        .filter(|p| test_matches(doc, *p, test, NodeKind::Element))
        .map(|p| XdmItem::Node(doc.node(p)))
        .collect())
}
