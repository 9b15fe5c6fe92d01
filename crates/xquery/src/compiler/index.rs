//! Index accessibility analysis.
//!
//! `//E[p]` with a predicate answerable by an index provider is replaced by
//! an index access that yields the `E` elements owning a matching key node.
//! Under `and`, accessible operands become an intersection ordered by their
//! estimates (cheapest first) and the remaining operands stay as a filter.
//! Under `or`, all operands must be accessible and become a union. A zero
//! estimate makes the whole predicate statically empty.

use tracing::debug;

use super::ir::{AxisIR, CompareKind, ComparisonOp, Expr, IndexPlan, NodeTestIR, Step};
use crate::index::{IndexProbe, IndexProvider, RangeTarget};
use crate::xdm::{ExpandedName, XdmAtomicValue, XdmItem};

/// Key nodes a predicate operand reads: `child::c` or `attribute::a`.
enum Key {
    Child(ExpandedName),
    Attribute(ExpandedName),
}

fn key_of(e: &Expr) -> Option<Key> {
    let Expr::Path { base: None, steps } = e else { return None };
    let [Step { axis, test: NodeTestIR::Name(name), predicates }] = steps.as_slice() else { return None };
    if !predicates.is_empty() {
        return None;
    }
    match axis {
        AxisIR::Child => Some(Key::Child(name.clone())),
        AxisIR::Attribute => Some(Key::Attribute(name.clone())),
        _ => None,
    }
}

fn string_literals(e: &Expr) -> Option<Vec<&str>> {
    let Expr::Value(items) = e else { return None };
    if items.is_empty() {
        return None;
    }
    items
        .iter()
        .map(|i| match i {
            XdmItem::Atomic(XdmAtomicValue::String(s)) => Some(s.as_str()),
            _ => None,
        })
        .collect()
}

struct Analyzer<'a> {
    provider: &'a dyn IndexProvider,
}

impl Analyzer<'_> {
    fn probe(&self, probe: IndexProbe) -> Option<IndexPlan> {
        let estimate = self.provider.estimate(&probe)?;
        Some(IndexPlan::Probe { probe, estimate })
    }

    /// Plan answering `pred` exactly, if there is one.
    fn plan(&self, pred: &Expr) -> Option<IndexPlan> {
        match pred {
            Expr::Compare { kind: CompareKind::General, op: ComparisonOp::Eq, lhs, rhs } => {
                let key = key_of(lhs)?;
                let values = string_literals(rhs)?;
                let mut plans = values
                    .into_iter()
                    .map(|v| {
                        self.probe(match &key {
                            Key::Child(c) => IndexProbe::Text { element: c.clone(), value: v.to_string() },
                            Key::Attribute(a) => IndexProbe::Attribute { name: a.clone(), value: v.to_string() },
                        })
                    })
                    .collect::<Option<Vec<_>>>()?;
                Some(if plans.len() == 1 { plans.remove(0) } else { IndexPlan::Union(plans) })
            }
            Expr::RangeCmp { expr, range } => {
                let target = match key_of(expr)? {
                    Key::Child(c) => RangeTarget::Element(c),
                    Key::Attribute(a) => RangeTarget::Attribute(a),
                };
                self.probe(IndexProbe::Range {
                    target,
                    min: range.min,
                    max: range.max,
                    min_incl: range.min_incl,
                    max_incl: range.max_incl,
                })
            }
            Expr::Or(ops) => {
                let plans = ops.iter().map(|o| self.plan(o)).collect::<Option<Vec<_>>>()?;
                let live: Vec<IndexPlan> = plans.into_iter().filter(|p| p.estimate() > 0).collect();
                Some(match live.len() {
                    0 => IndexPlan::Union(Vec::new()),
                    1 => live.into_iter().next()?,
                    _ => IndexPlan::Union(live),
                })
            }
            Expr::And(ops) => match self.split_and(ops) {
                (plan, rest) if rest.is_empty() => plan,
                _ => None,
            },
            _ => None,
        }
    }

    /// Accessible part of a conjunction as an intersection ordered by
    /// estimate, plus the operands left for filtering.
    fn split_and<'e>(&self, ops: &'e [Expr]) -> (Option<IndexPlan>, Vec<&'e Expr>) {
        let mut plans = Vec::new();
        let mut rest = Vec::new();
        for op in ops {
            match self.plan(op) {
                Some(p) => plans.push(p),
                None => rest.push(op),
            }
        }
        plans.sort_by_key(IndexPlan::estimate);
        let plan = match plans.len() {
            0 => None,
            1 => plans.pop(),
            _ => Some(IndexPlan::Intersect(plans)),
        };
        (plan, rest)
    }
}

fn reads_position(e: &Expr) -> bool {
    e.any(&|x| matches!(x, Expr::Position | Expr::Last | Expr::Pos(_)))
}

/// Rewrites `root()/descendant::E[p0]...` when `p0` is index accessible.
fn rewrite_path(base: Option<Box<Expr>>, mut steps: Vec<Step>, analyzer: &Analyzer<'_>) -> Expr {
    let applicable = matches!(base.as_deref(), Some(Expr::Root))
        && steps.first().is_some_and(|s| {
            s.axis == AxisIR::Descendant && matches!(s.test, NodeTestIR::Name(_)) && !s.predicates.is_empty()
        });
    if !applicable {
        return Expr::Path { base, steps };
    }
    let first = &steps[0].predicates[0];
    let (plan, rest): (Option<IndexPlan>, Vec<Expr>) = match first {
        Expr::And(ops) => {
            let (plan, rest) = analyzer.split_and(ops);
            (plan, rest.into_iter().cloned().collect())
        }
        other => (analyzer.plan(other), Vec::new()),
    };
    let Some(plan) = plan else { return Expr::Path { base, steps } };
    if rest.iter().any(reads_position) {
        return Expr::Path { base, steps };
    }

    let mut step = steps.remove(0);
    debug!(test = ?step.test, estimate = plan.estimate(), remaining = rest.len(), "index rewrite");
    if plan.estimate() == 0 {
        return Expr::empty();
    }
    let mut predicates: Vec<Expr> = match rest.len() {
        0 => Vec::new(),
        1 => rest,
        _ => vec![Expr::And(rest)],
    };
    predicates.extend(step.predicates.drain(1..));
    let access = Expr::IndexAccess { plan, test: step.test };
    let new_base = if predicates.is_empty() {
        access
    } else {
        Expr::Filter { base: Box::new(access), predicates }
    };
    if steps.is_empty() { new_base } else { Expr::Path { base: Some(Box::new(new_base)), steps } }
}

/// Applies the index rewrite to every qualifying path below `expr`.
pub(super) fn rewrite(mut expr: Expr, provider: &dyn IndexProvider) -> Expr {
    let analyzer = Analyzer { provider };
    rewrite_in_place(&mut expr, &analyzer);
    expr
}

fn rewrite_in_place(expr: &mut Expr, analyzer: &Analyzer<'_>) {
    for child in expr.children_mut() {
        rewrite_in_place(child, analyzer);
    }
    if let Expr::Path { .. } = expr {
        let Expr::Path { base, steps } = core::mem::replace(expr, Expr::empty()) else { return };
        *expr = rewrite_path(base, steps, analyzer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::NumRange;
    use crate::index::ValueIndex;
    use crate::model::{attr, elem, text};

    fn desc(name: &str, pred: Expr) -> Expr {
        Expr::Path {
            base: Some(Box::new(Expr::Root)),
            steps: vec![Step {
                axis: AxisIR::Descendant,
                test: NodeTestIR::Name(ExpandedName::local(name)),
                predicates: vec![pred],
            }],
        }
    }

    fn child(name: &str) -> Expr {
        Expr::Path {
            base: None,
            steps: vec![Step { axis: AxisIR::Child, test: NodeTestIR::Name(ExpandedName::local(name)), predicates: vec![] }],
        }
    }

    fn index() -> ValueIndex {
        let doc = elem("lib")
            .child(elem("book").attr(attr("id", "a")).child(elem("year").child(text("1999"))))
            .child(elem("book").attr(attr("id", "b")).child(elem("year").child(text("2004"))))
            .child(elem("book").attr(attr("id", "c")).child(elem("year").child(text("2004"))))
            .build()
            .unwrap();
        ValueIndex::build(&doc)
    }

    #[test]
    fn and_orders_operands_by_estimate() {
        let idx = index();
        let year = Expr::Compare {
            kind: CompareKind::General,
            op: ComparisonOp::Eq,
            lhs: Box::new(child("year")),
            rhs: Box::new(Expr::Value(vec![XdmItem::string("2004")])),
        };
        let id = Expr::RangeCmp {
            expr: Box::new(child("year")),
            range: NumRange::from_comparison(ComparisonOp::Gt, 2000.0).unwrap(),
        };
        let e = rewrite(desc("book", Expr::And(vec![year, id])), &idx);
        let Expr::IndexAccess { plan: IndexPlan::Intersect(parts), .. } = &e else { panic!("not rewritten: {e:?}") };
        let estimates: Vec<usize> = parts.iter().map(IndexPlan::estimate).collect();
        assert_eq!(estimates, vec![2, 2]);
    }

    #[test]
    fn zero_estimate_folds_to_empty() {
        let idx = index();
        let pred = Expr::Compare {
            kind: CompareKind::General,
            op: ComparisonOp::Eq,
            lhs: Box::new(Expr::Path {
                base: None,
                steps: vec![Step {
                    axis: AxisIR::Attribute,
                    test: NodeTestIR::Name(ExpandedName::local("id")),
                    predicates: vec![],
                }],
            }),
            rhs: Box::new(Expr::Value(vec![XdmItem::string("zzz")])),
        };
        assert_eq!(rewrite(desc("book", pred), &idx), Expr::empty());
    }

    #[test]
    fn positional_rest_blocks_the_rewrite() {
        let idx = index();
        let year = Expr::Compare {
            kind: CompareKind::General,
            op: ComparisonOp::Eq,
            lhs: Box::new(child("year")),
            rhs: Box::new(Expr::Value(vec![XdmItem::string("2004")])),
        };
        let e = desc("book", Expr::And(vec![year, Expr::Position]));
        assert_eq!(rewrite(e.clone(), &idx), e);
    }
}
