//! Constructors for expression trees.
//!
//! Front ends and tests assemble [`Expr`] values with these helpers; names are
//! resolved and types derived later by [`compile`](super::compile).
//!
//! ```ignore
//! // for $b in //book where $b/year > 2000 return $b/title
//! let q = flwor(
//!     vec![for_("b", desc_path("book")), where_(cmp(ComparisonOp::Gt, path(var("b"), vec![child("year")]), int(2000)))],
//!     path(var("b"), vec![child("title")]),
//! );
//! ```

use super::ir::{
    ArithOp, AxisIR, Binding, Builtin, Clause, CompareKind, ComparisonOp, Expr, Flwor, InsertPosition, NodeTestIR, OrderSpec,
    QuantifierKind, SetOp, Step,
};
use crate::model::NodeKind;
use crate::xdm::{ExpandedName, SeqType, XdmAtomicValue, XdmItem};

fn atomic(a: XdmAtomicValue) -> Expr {
    Expr::Value(vec![XdmItem::Atomic(a)])
}

pub fn int(i: i64) -> Expr {
    atomic(XdmAtomicValue::Integer(i))
}

pub fn dec(d: f64) -> Expr {
    atomic(XdmAtomicValue::Decimal(d))
}

pub fn dbl(d: f64) -> Expr {
    atomic(XdmAtomicValue::Double(d))
}

pub fn string(s: &str) -> Expr {
    atomic(XdmAtomicValue::String(s.to_string()))
}

pub fn untyped(s: &str) -> Expr {
    atomic(XdmAtomicValue::UntypedAtomic(s.to_string()))
}

pub fn boolean(b: bool) -> Expr {
    Expr::boolean(b)
}

pub fn empty() -> Expr {
    Expr::empty()
}

/// Literal sequence of items.
pub fn items(items: Vec<XdmItem>) -> Expr {
    Expr::Value(items)
}

pub fn seq(ops: Vec<Expr>) -> Expr {
    Expr::Sequence(ops)
}

pub fn var(name: &str) -> Expr {
    Expr::Var(ExpandedName::local(name))
}

pub fn context() -> Expr {
    Expr::ContextItem
}

pub fn root() -> Expr {
    Expr::Root
}

pub fn position() -> Expr {
    Expr::Position
}

pub fn last() -> Expr {
    Expr::Last
}

impl Step {
    pub fn new(axis: AxisIR, test: NodeTestIR) -> Self {
        Self { axis, test, predicates: Vec::new() }
    }

    pub fn with_predicate(mut self, pred: Expr) -> Self {
        self.predicates.push(pred);
        self
    }
}

fn named(axis: AxisIR, name: &str) -> Step {
    let test = if name == "*" { NodeTestIR::Wildcard } else { NodeTestIR::Name(ExpandedName::local(name)) };
    Step::new(axis, test)
}

/// `child::name`; `*` matches any element.
pub fn child(name: &str) -> Step {
    named(AxisIR::Child, name)
}

pub fn descendant(name: &str) -> Step {
    named(AxisIR::Descendant, name)
}

/// `attribute::name`; `*` matches any attribute.
pub fn attribute(name: &str) -> Step {
    named(AxisIR::Attribute, name)
}

pub fn parent() -> Step {
    Step::new(AxisIR::Parent, NodeTestIR::AnyKind)
}

pub fn text_step() -> Step {
    Step::new(AxisIR::Child, NodeTestIR::Kind(NodeKind::Text))
}

/// Steps relative to `base`.
pub fn path(base: Expr, steps: Vec<Step>) -> Expr {
    Expr::Path { base: Some(Box::new(base)), steps }
}

/// Steps relative to the context item.
pub fn rel_path(steps: Vec<Step>) -> Expr {
    Expr::Path { base: None, steps }
}

/// `/step/step...`
pub fn root_path(steps: Vec<Step>) -> Expr {
    path(Expr::Root, steps)
}

/// `//name`
pub fn desc_path(name: &str) -> Expr {
    desc_path_where(name, Vec::new())
}

/// `//name[p1][p2]...`
pub fn desc_path_where(name: &str, predicates: Vec<Expr>) -> Expr {
    let mut step = child(name);
    step.predicates = predicates;
    root_path(vec![Step::new(AxisIR::DescendantOrSelf, NodeTestIR::AnyKind), step])
}

/// General comparison.
pub fn cmp(op: ComparisonOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Compare { kind: CompareKind::General, op, lhs: Box::new(lhs), rhs: Box::new(rhs) }
}

pub fn value_cmp(op: ComparisonOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Compare { kind: CompareKind::Value, op, lhs: Box::new(lhs), rhs: Box::new(rhs) }
}

pub fn eq(lhs: Expr, rhs: Expr) -> Expr {
    cmp(ComparisonOp::Eq, lhs, rhs)
}

pub fn ne(lhs: Expr, rhs: Expr) -> Expr {
    cmp(ComparisonOp::Ne, lhs, rhs)
}

pub fn lt(lhs: Expr, rhs: Expr) -> Expr {
    cmp(ComparisonOp::Lt, lhs, rhs)
}

pub fn le(lhs: Expr, rhs: Expr) -> Expr {
    cmp(ComparisonOp::Le, lhs, rhs)
}

pub fn gt(lhs: Expr, rhs: Expr) -> Expr {
    cmp(ComparisonOp::Gt, lhs, rhs)
}

pub fn ge(lhs: Expr, rhs: Expr) -> Expr {
    cmp(ComparisonOp::Ge, lhs, rhs)
}

pub fn and(ops: Vec<Expr>) -> Expr {
    Expr::And(ops)
}

pub fn or(ops: Vec<Expr>) -> Expr {
    Expr::Or(ops)
}

pub fn not(e: Expr) -> Expr {
    Expr::Call { func: Builtin::Not, args: vec![e] }
}

pub fn arith(op: ArithOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Arith { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }
}

pub fn neg(e: Expr) -> Expr {
    Expr::Neg(Box::new(e))
}

pub fn range(from: Expr, to: Expr) -> Expr {
    Expr::Range { from: Box::new(from), to: Box::new(to) }
}

pub fn if_(cond: Expr, then: Expr, els: Expr) -> Expr {
    Expr::If { cond: Box::new(cond), then: Box::new(then), els: Box::new(els) }
}

pub fn filter(base: Expr, predicates: Vec<Expr>) -> Expr {
    Expr::Filter { base: Box::new(base), predicates }
}

pub fn treat(e: Expr, ty: SeqType) -> Expr {
    Expr::Treat { expr: Box::new(e), ty }
}

pub fn instance_of(e: Expr, ty: SeqType) -> Expr {
    Expr::Instance { expr: Box::new(e), ty }
}

/// Namespace of the variable a typeswitch binds its operand to.
const TYPESWITCH_NS: &str = "urn:basalt:typeswitch";

/// One branch of a [`typeswitch`]: taken when the operand matches any of
/// `types`, with the operand bound to `var` in `ret`.
#[derive(Debug, Clone)]
pub struct TypeCase {
    var: Option<String>,
    types: Vec<SeqType>,
    ret: Expr,
}

pub fn type_case(var: Option<&str>, types: Vec<SeqType>, ret: Expr) -> TypeCase {
    TypeCase { var: var.map(str::to_string), types, ret }
}

/// `typeswitch (operand) case ... default $var return default`.
///
/// The operand is evaluated once into a hidden `let`; the cases become a chain
/// of `if` over instance tests, so the first matching case wins and literal
/// operands fold away.
pub fn typeswitch(operand: Expr, cases: Vec<TypeCase>, default_var: Option<&str>, default: Expr) -> Expr {
    let subject = ExpandedName::new(Some(TYPESWITCH_NS.to_string()), "operand");
    let bind = |var: Option<&str>, ret: Expr| match var {
        Some(v) => flwor(vec![let_(v, Expr::Var(subject.clone()))], ret),
        None => ret,
    };
    let mut out = bind(default_var, default);
    for case in cases.into_iter().rev() {
        let tests = case.types.into_iter().map(|ty| instance_of(Expr::Var(subject.clone()), ty)).collect();
        out = if_(or(tests), bind(case.var.as_deref(), case.ret), out);
    }
    let operand = Clause::Let { var: Binding::new(subject), value: operand, invariant: false };
    flwor(vec![operand], out)
}

/// Built-in function when `name` is one, host function otherwise.
pub fn call(name: &str, args: Vec<Expr>) -> Expr {
    match Builtin::lookup(name) {
        Some(func) => Expr::Call { func, args },
        None => Expr::ExternalCall { name: ExpandedName::local(name), args },
    }
}

pub fn for_(var: &str, source: Expr) -> Clause {
    Clause::for_in(var, source)
}

pub fn for_at(var: &str, at: &str, source: Expr) -> Clause {
    Clause::for_at(var, at, source)
}

pub fn let_(var: &str, value: Expr) -> Clause {
    Clause::let_(var, value)
}

pub fn where_(cond: Expr) -> Clause {
    Clause::Where(cond)
}

pub fn order(key: Expr, descending: bool, empty_greatest: bool) -> OrderSpec {
    OrderSpec { key, descending, empty_greatest }
}

pub fn flwor(clauses: Vec<Clause>, ret: Expr) -> Expr {
    flwor_ordered(clauses, Vec::new(), ret)
}

pub fn flwor_ordered(clauses: Vec<Clause>, order_by: Vec<OrderSpec>, ret: Expr) -> Expr {
    Expr::Flwor(Box::new(Flwor { clauses, order_by, ret }))
}

pub fn some(clauses: Vec<Clause>, satisfies: Expr) -> Expr {
    Expr::Quantified { kind: QuantifierKind::Some, clauses, satisfies: Box::new(satisfies) }
}

pub fn every(clauses: Vec<Clause>, satisfies: Expr) -> Expr {
    Expr::Quantified { kind: QuantifierKind::Every, clauses, satisfies: Box::new(satisfies) }
}

fn set_op(op: SetOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::SetOp { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }
}

pub fn union(lhs: Expr, rhs: Expr) -> Expr {
    set_op(SetOp::Union, lhs, rhs)
}

pub fn intersect(lhs: Expr, rhs: Expr) -> Expr {
    set_op(SetOp::Intersect, lhs, rhs)
}

pub fn except(lhs: Expr, rhs: Expr) -> Expr {
    set_op(SetOp::Except, lhs, rhs)
}

pub fn insert(position: InsertPosition, source: Expr, target: Expr) -> Expr {
    Expr::Insert { position, source: Box::new(source), target: Box::new(target) }
}

pub fn delete(target: Expr) -> Expr {
    Expr::Delete(Box::new(target))
}

pub fn rename(target: Expr, name: Expr) -> Expr {
    Expr::Rename { target: Box::new(target), name: Box::new(name) }
}

pub fn replace(target: Expr, with: Expr) -> Expr {
    Expr::ReplaceNode { target: Box::new(target), with: Box::new(with) }
}

pub fn replace_value(target: Expr, with: Expr) -> Expr {
    Expr::ReplaceValue { target: Box::new(target), with: Box::new(with) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_functions_become_external_calls() {
        assert!(matches!(call("count", vec![empty()]), Expr::Call { func: Builtin::Count, .. }));
        assert!(matches!(call("score", vec![]), Expr::ExternalCall { .. }));
    }

    #[test]
    fn typeswitch_binds_the_operand_once() {
        let ts = typeswitch(int(1), vec![type_case(Some("i"), vec![SeqType::INTEGER], var("i"))], None, empty());
        let Expr::Flwor(f) = ts else { panic!("not a flwor") };
        assert_eq!(f.clauses.len(), 1);
        assert!(matches!(&f.clauses[0], Clause::Let { value, .. } if *value == int(1)));
        assert!(matches!(f.ret, Expr::If { .. }));
    }

    #[test]
    fn descendant_path_shape() {
        let Expr::Path { base: Some(base), steps } = desc_path("item") else { panic!("not a path") };
        assert_eq!(*base, Expr::Root);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].axis, AxisIR::DescendantOrSelf);
        assert_eq!(steps[1].test, NodeTestIR::Name(ExpandedName::local("item")));
    }
}
