use smallvec::{SmallVec, smallvec};

use crate::index::IndexProbe;
use crate::model::NodeKind;
use crate::xdm::{AtomicType, ExpandedName, ItemType, Occurrence, SeqType, XdmAtomicValue, XdmItem, XdmSequence};

/// Identifier of a local variable binding, unique within one compiled tree.
pub type VarId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisIR {
    Child,
    Attribute,
    SelfAxis,
    Parent,
    Descendant,
    DescendantOrSelf,
    Ancestor,
    FollowingSibling,
    PrecedingSibling,
}

impl AxisIR {
    pub fn is_reverse(self) -> bool {
        matches!(self, AxisIR::Parent | AxisIR::Ancestor | AxisIR::PrecedingSibling)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeTestIR {
    AnyKind,            // node()
    Kind(NodeKind),     // text(), comment(), element(), ...
    Name(ExpandedName), // principal node kind with this name
    Wildcard,           // *
}

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub axis: AxisIR,
    pub test: NodeTestIR,
    pub predicates: Vec<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    IDiv,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl ComparisonOp {
    /// Operator obtained by swapping both operands.
    pub fn mirror(self) -> Self {
        match self {
            ComparisonOp::Lt => ComparisonOp::Gt,
            ComparisonOp::Le => ComparisonOp::Ge,
            ComparisonOp::Gt => ComparisonOp::Lt,
            ComparisonOp::Ge => ComparisonOp::Le,
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareKind {
    Value,
    General,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOp {
    Union,
    Intersect,
    Except,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantifierKind {
    Some,
    Every,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPosition {
    Before,
    After,
    AsFirst,
    Into,
    AsLast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    True,
    False,
    Not,
    Boolean,
    Count,
    Exists,
    Empty,
    String,
    Data,
    Sum,
    Concat,
    Contains,
    Name,
    ExactlyOne,
    ZeroOrOne,
    OneOrMore,
}

impl Builtin {
    pub fn lookup(local: &str) -> Option<Self> {
        Some(match local {
            "true" => Builtin::True,
            "false" => Builtin::False,
            "not" => Builtin::Not,
            "boolean" => Builtin::Boolean,
            "count" => Builtin::Count,
            "exists" => Builtin::Exists,
            "empty" => Builtin::Empty,
            "string" => Builtin::String,
            "data" => Builtin::Data,
            "sum" => Builtin::Sum,
            "concat" => Builtin::Concat,
            "contains" => Builtin::Contains,
            "name" => Builtin::Name,
            "exactly-one" => Builtin::ExactlyOne,
            "zero-or-one" => Builtin::ZeroOrOne,
            "one-or-more" => Builtin::OneOrMore,
            _ => return None,
        })
    }

    /// Accepted argument counts (inclusive).
    pub fn arity(self) -> (usize, usize) {
        match self {
            Builtin::True | Builtin::False => (0, 0),
            Builtin::String | Builtin::Name => (0, 1),
            Builtin::Concat => (2, usize::MAX),
            Builtin::Contains => (2, 2),
            _ => (1, 1),
        }
    }

    pub fn return_type(self) -> SeqType {
        match self {
            Builtin::True
            | Builtin::False
            | Builtin::Not
            | Builtin::Boolean
            | Builtin::Exists
            | Builtin::Empty
            | Builtin::Contains => SeqType::BOOLEAN,
            Builtin::Count => SeqType::INTEGER,
            Builtin::String | Builtin::Concat | Builtin::Name => SeqType::STRING,
            Builtin::Sum => SeqType::one(ItemType::Atomic(AtomicType::Numeric)),
            Builtin::Data => SeqType::new(ItemType::Atomic(AtomicType::AnyAtomic), Occurrence::ZeroOrMore),
            Builtin::ExactlyOne => SeqType::one(ItemType::AnyItem),
            Builtin::ZeroOrOne => SeqType::new(ItemType::AnyItem, Occurrence::ZeroOrOne),
            Builtin::OneOrMore => SeqType::new(ItemType::AnyItem, Occurrence::OneOrMore),
        }
    }

    /// Zero-argument forms read the context item.
    pub fn uses_focus(self, argc: usize) -> bool {
        argc == 0 && matches!(self, Builtin::String | Builtin::Name)
    }
}

/// Set of 1-based positions as sorted, disjoint, non-adjacent inclusive
/// ranges. `usize::MAX` as upper bound means unbounded.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PosSet(pub SmallVec<[(usize, usize); 4]>);

impl PosSet {
    pub fn single(pos: usize) -> Self {
        Self::range(pos, pos)
    }

    pub fn range(min: usize, max: usize) -> Self {
        let min = min.max(1);
        if min > max { Self::default() } else { Self(smallvec![(min, max)]) }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, pos: usize) -> bool {
        self.0.iter().any(|&(lo, hi)| lo <= pos && pos <= hi)
    }

    pub fn max(&self) -> usize {
        self.0.last().map_or(0, |r| r.1)
    }

    /// Smallest member greater than `pos`.
    pub fn next_after(&self, pos: usize) -> Option<usize> {
        self.0.iter().find(|r| r.1 > pos).map(|&(lo, _)| lo.max(pos + 1))
    }

    pub fn union(&self, other: &PosSet) -> PosSet {
        let mut all: Vec<(usize, usize)> = self.0.iter().chain(other.0.iter()).copied().collect();
        all.sort_unstable();
        let mut out: SmallVec<[(usize, usize); 4]> = SmallVec::new();
        for (lo, hi) in all {
            match out.last_mut() {
                Some(last) if lo <= last.1.saturating_add(1) => last.1 = last.1.max(hi),
                _ => out.push((lo, hi)),
            }
        }
        PosSet(out)
    }

    pub fn intersect(&self, other: &PosSet) -> PosSet {
        let mut out: SmallVec<[(usize, usize); 4]> = SmallVec::new();
        for &(a, b) in &self.0 {
            for &(c, d) in &other.0 {
                let (lo, hi) = (a.max(c), b.min(d));
                if lo <= hi {
                    out.push((lo, hi));
                }
            }
        }
        out.sort_unstable();
        PosSet(out)
    }

    /// Positions up to `size`, ascending.
    pub fn positions(&self, size: usize) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().flat_map(move |&(lo, hi)| lo..=hi.min(size))
    }
}

/// Numeric interval used by range comparisons.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumRange {
    pub min: f64,
    pub max: f64,
    pub min_incl: bool,
    pub max_incl: bool,
}

impl NumRange {
    pub fn from_comparison(op: ComparisonOp, v: f64) -> Option<Self> {
        let (min, max, min_incl, max_incl) = match op {
            ComparisonOp::Eq => (v, v, true, true),
            ComparisonOp::Lt => (f64::NEG_INFINITY, v, true, false),
            ComparisonOp::Le => (f64::NEG_INFINITY, v, true, true),
            ComparisonOp::Gt => (v, f64::INFINITY, false, true),
            ComparisonOp::Ge => (v, f64::INFINITY, true, true),
            ComparisonOp::Ne => return None,
        };
        Some(Self { min, max, min_incl, max_incl })
    }

    pub fn contains(&self, v: f64) -> bool {
        let lower = if self.min_incl { v >= self.min } else { v > self.min };
        let upper = if self.max_incl { v <= self.max } else { v < self.max };
        lower && upper
    }

    pub fn intersect(&self, other: &NumRange) -> NumRange {
        let (min, min_incl) = if self.min > other.min {
            (self.min, self.min_incl)
        } else if other.min > self.min {
            (other.min, other.min_incl)
        } else {
            (self.min, self.min_incl && other.min_incl)
        };
        let (max, max_incl) = if self.max < other.max {
            (self.max, self.max_incl)
        } else if other.max < self.max {
            (other.max, other.max_incl)
        } else {
            (self.max, self.max_incl && other.max_incl)
        };
        NumRange { min, max, min_incl, max_incl }
    }

    pub fn is_empty(&self) -> bool {
        self.min > self.max || (self.min == self.max && !(self.min_incl && self.max_incl))
    }
}

/// Index-backed candidate computation. Leaves yield the elements or
/// attributes matched by a probe; the owner (parent) elements of these
/// candidates are what an index access returns.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexPlan {
    Probe { probe: IndexProbe, estimate: usize },
    Intersect(Vec<IndexPlan>),
    Union(Vec<IndexPlan>),
}

impl IndexPlan {
    pub fn estimate(&self) -> usize {
        match self {
            IndexPlan::Probe { estimate, .. } => *estimate,
            IndexPlan::Intersect(parts) => parts.iter().map(IndexPlan::estimate).min().unwrap_or(0),
            IndexPlan::Union(parts) => parts.iter().map(IndexPlan::estimate).sum(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub name: ExpandedName,
    pub id: VarId,
}

impl Binding {
    pub fn new(name: ExpandedName) -> Self {
        Self { name, id: 0 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    For {
        var: Binding,
        at: Option<Binding>,
        source: Expr,
        /// Source does not depend on earlier clauses; its cursor is reset
        /// instead of rebuilt.
        invariant: bool,
    },
    Let {
        var: Binding,
        value: Expr,
        /// Value does not depend on earlier clauses; computed once.
        invariant: bool,
    },
    Where(Expr),
}

impl Clause {
    pub fn for_in(var: &str, source: Expr) -> Self {
        Clause::For { var: Binding::new(ExpandedName::local(var)), at: None, source, invariant: false }
    }

    pub fn for_at(var: &str, at: &str, source: Expr) -> Self {
        Clause::For {
            var: Binding::new(ExpandedName::local(var)),
            at: Some(Binding::new(ExpandedName::local(at))),
            source,
            invariant: false,
        }
    }

    pub fn let_(var: &str, value: Expr) -> Self {
        Clause::Let { var: Binding::new(ExpandedName::local(var)), value, invariant: false }
    }

    pub fn bound_vars(&self) -> SmallVec<[VarId; 2]> {
        match self {
            Clause::For { var, at, .. } => {
                let mut v = smallvec![var.id];
                if let Some(a) = at {
                    v.push(a.id);
                }
                v
            }
            Clause::Let { var, .. } => smallvec![var.id],
            Clause::Where(_) => SmallVec::new(),
        }
    }

    pub fn expr(&self) -> &Expr {
        match self {
            Clause::For { source, .. } => source,
            Clause::Let { value, .. } => value,
            Clause::Where(e) => e,
        }
    }

    pub fn expr_mut(&mut self) -> &mut Expr {
        match self {
            Clause::For { source, .. } => source,
            Clause::Let { value, .. } => value,
            Clause::Where(e) => e,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderSpec {
    pub key: Expr,
    pub descending: bool,
    pub empty_greatest: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Flwor {
    pub clauses: Vec<Clause>,
    pub order_by: Vec<OrderSpec>,
    pub ret: Expr,
}

/// Expression tree. Built by the constructors in [`crate::compiler::build`],
/// rewritten in place by [`crate::compiler::compile`] and evaluated by
/// [`crate::engine::evaluator`].
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Value(XdmSequence),
    /// Variable reference before scope resolution.
    Var(ExpandedName),
    LocalVar {
        name: ExpandedName,
        id: VarId,
        ty: SeqType,
    },
    ExternalVar {
        name: ExpandedName,
        ty: SeqType,
    },
    ContextItem,
    Root,
    Position,
    Last,
    Neg(Box<Expr>),
    Arith {
        op: ArithOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Compare {
        kind: CompareKind,
        op: ComparisonOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// General comparison of `expr` against a numeric interval.
    RangeCmp {
        expr: Box<Expr>,
        range: NumRange,
    },
    /// True when the focus position is in the set.
    Pos(PosSet),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Sequence(Vec<Expr>),
    Range {
        from: Box<Expr>,
        to: Box<Expr>,
    },
    If {
        cond: Box<Expr>,
        then: Box<Expr>,
        els: Box<Expr>,
    },
    Filter {
        base: Box<Expr>,
        predicates: Vec<Expr>,
    },
    /// Axis steps applied to `base`; `None` starts at the context item.
    Path {
        base: Option<Box<Expr>>,
        steps: Vec<Step>,
    },
    SetOp {
        op: SetOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Treat {
        expr: Box<Expr>,
        ty: SeqType,
    },
    /// True when the value of `expr` matches `ty`.
    Instance {
        expr: Box<Expr>,
        ty: SeqType,
    },
    Flwor(Box<Flwor>),
    Quantified {
        kind: QuantifierKind,
        clauses: Vec<Clause>,
        satisfies: Box<Expr>,
    },
    Call {
        func: Builtin,
        args: Vec<Expr>,
    },
    ExternalCall {
        name: ExpandedName,
        args: Vec<Expr>,
    },
    /// Elements matching `test` that own at least one candidate of `plan`.
    IndexAccess {
        plan: IndexPlan,
        test: NodeTestIR,
    },
    Insert {
        position: InsertPosition,
        source: Box<Expr>,
        target: Box<Expr>,
    },
    Delete(Box<Expr>),
    Rename {
        target: Box<Expr>,
        name: Box<Expr>,
    },
    ReplaceNode {
        target: Box<Expr>,
        with: Box<Expr>,
    },
    ReplaceValue {
        target: Box<Expr>,
        with: Box<Expr>,
    },
}

impl Expr {
    pub fn empty() -> Expr {
        Expr::Value(Vec::new())
    }

    pub fn boolean(b: bool) -> Expr {
        Expr::Value(vec![XdmItem::boolean(b)])
    }

    pub fn is_value(&self) -> bool {
        matches!(self, Expr::Value(_))
    }

    /// Literal boolean value when the expression is a single boolean literal.
    pub fn literal_bool(&self) -> Option<bool> {
        match self {
            Expr::Value(items) if items.len() == 1 => match &items[0] {
                XdmItem::Atomic(XdmAtomicValue::Boolean(b)) => Some(*b),
                _ => None,
            },
            _ => None,
        }
    }

    /// Literal single numeric value.
    pub fn literal_number(&self) -> Option<f64> {
        match self {
            Expr::Value(items) if items.len() == 1 => items[0].as_atomic().and_then(XdmAtomicValue::as_f64),
            _ => None,
        }
    }

    pub fn is_updating(&self) -> bool {
        matches!(
            self,
            Expr::Insert { .. }
                | Expr::Delete(_)
                | Expr::Rename { .. }
                | Expr::ReplaceNode { .. }
                | Expr::ReplaceValue { .. }
        ) || self.children().into_iter().any(Expr::is_updating)
    }

    /// True if this node or any descendant satisfies `f`.
    pub fn any(&self, f: &dyn Fn(&Expr) -> bool) -> bool {
        f(self) || self.children().into_iter().any(|c| c.any(f))
    }

    /// Depends on the focus (context item, position or size) of its
    /// evaluation. Predicates and path steps establish their own focus.
    pub fn uses_focus(&self) -> bool {
        match self {
            Expr::ContextItem | Expr::Position | Expr::Last | Expr::Pos(_) => true,
            Expr::Path { base: None, .. } => true,
            Expr::Path { base: Some(b), .. } => b.uses_focus(),
            Expr::Filter { base, .. } => base.uses_focus(),
            Expr::Call { func, args } if func.uses_focus(args.len()) => true,
            _ => self.children_outer().into_iter().any(Expr::uses_focus),
        }
    }

    /// Uses `last()` at its own focus level.
    pub fn uses_last(&self) -> bool {
        match self {
            Expr::Last => true,
            Expr::Path { base, .. } => base.as_deref().is_some_and(Expr::uses_last),
            Expr::Filter { base, .. } => base.uses_last(),
            _ => self.children_outer().into_iter().any(Expr::uses_last),
        }
    }

    /// Free of host calls and updates; may be evaluated any number of times.
    pub fn is_deterministic(&self) -> bool {
        !self.any(&|e| matches!(e, Expr::ExternalCall { .. }) || e.is_updating())
    }

    /// Local variables referenced anywhere below this node.
    pub fn referenced_vars(&self, out: &mut Vec<VarId>) {
        if let Expr::LocalVar { id, .. } = self {
            out.push(*id);
        }
        for c in self.children() {
            c.referenced_vars(out);
        }
    }

    /// Children evaluated with the same focus as this node.
    fn children_outer(&self) -> Vec<&Expr> {
        match self {
            Expr::Filter { base, .. } => vec![base.as_ref()],
            Expr::Path { base, .. } => base.iter().map(|b| b.as_ref()).collect(),
            _ => self.children(),
        }
    }

    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Value(_)
            | Expr::Var(_)
            | Expr::LocalVar { .. }
            | Expr::ExternalVar { .. }
            | Expr::ContextItem
            | Expr::Root
            | Expr::Position
            | Expr::Last
            | Expr::Pos(_)
            | Expr::IndexAccess { .. } => Vec::new(),
            Expr::Neg(e) | Expr::Delete(e) => vec![e.as_ref()],
            Expr::RangeCmp { expr, .. } | Expr::Treat { expr, .. } | Expr::Instance { expr, .. } => {
                vec![expr.as_ref()]
            }
            Expr::Arith { lhs, rhs, .. } | Expr::Compare { lhs, rhs, .. } | Expr::SetOp { lhs, rhs, .. } => {
                vec![lhs.as_ref(), rhs.as_ref()]
            }
            Expr::Range { from, to } => vec![from.as_ref(), to.as_ref()],
            Expr::And(ops) | Expr::Or(ops) | Expr::Sequence(ops) => ops.iter().collect(),
            Expr::Call { args, .. } | Expr::ExternalCall { args, .. } => args.iter().collect(),
            Expr::If { cond, then, els } => vec![cond.as_ref(), then.as_ref(), els.as_ref()],
            Expr::Filter { base, predicates } => {
                let mut v = vec![base.as_ref()];
                v.extend(predicates.iter());
                v
            }
            Expr::Path { base, steps } => {
                let mut v: Vec<&Expr> = base.iter().map(|b| b.as_ref()).collect();
                v.extend(steps.iter().flat_map(|s| s.predicates.iter()));
                v
            }
            Expr::Flwor(f) => {
                let mut v: Vec<&Expr> = f.clauses.iter().map(Clause::expr).collect();
                v.extend(f.order_by.iter().map(|o| &o.key));
                v.push(&f.ret);
                v
            }
            Expr::Quantified { clauses, satisfies, .. } => {
                let mut v: Vec<&Expr> = clauses.iter().map(Clause::expr).collect();
                v.push(satisfies.as_ref());
                v
            }
            Expr::Insert { source, target, .. } => vec![source.as_ref(), target.as_ref()],
            Expr::Rename { target, name } => vec![target.as_ref(), name.as_ref()],
            Expr::ReplaceNode { target, with } | Expr::ReplaceValue { target, with } => {
                vec![target.as_ref(), with.as_ref()]
            }
        }
    }

    /// Mutable counterpart of [`Self::children`], same order.
    pub fn children_mut(&mut self) -> Vec<&mut Expr> {
        match self {
            Expr::Value(_)
            | Expr::Var(_)
            | Expr::LocalVar { .. }
            | Expr::ExternalVar { .. }
            | Expr::ContextItem
            | Expr::Root
            | Expr::Position
            | Expr::Last
            | Expr::Pos(_)
            | Expr::IndexAccess { .. } => Vec::new(),
            Expr::Neg(e) | Expr::Delete(e) => vec![e.as_mut()],
            Expr::RangeCmp { expr, .. } | Expr::Treat { expr, .. } | Expr::Instance { expr, .. } => {
                vec![expr.as_mut()]
            }
            Expr::Arith { lhs, rhs, .. } | Expr::Compare { lhs, rhs, .. } | Expr::SetOp { lhs, rhs, .. } => {
                vec![lhs.as_mut(), rhs.as_mut()]
            }
            Expr::Range { from, to } => vec![from.as_mut(), to.as_mut()],
            Expr::And(ops) | Expr::Or(ops) | Expr::Sequence(ops) => ops.iter_mut().collect(),
            Expr::Call { args, .. } | Expr::ExternalCall { args, .. } => args.iter_mut().collect(),
            Expr::If { cond, then, els } => vec![cond.as_mut(), then.as_mut(), els.as_mut()],
            Expr::Filter { base, predicates } => {
                let mut v = vec![base.as_mut()];
                v.extend(predicates.iter_mut());
                v
            }
            Expr::Path { base, steps } => {
                let mut v: Vec<&mut Expr> = base.iter_mut().map(|b| b.as_mut()).collect();
                v.extend(steps.iter_mut().flat_map(|s| s.predicates.iter_mut()));
                v
            }
            Expr::Flwor(f) => {
                let Flwor { clauses, order_by, ret } = f.as_mut();
                let mut v: Vec<&mut Expr> = clauses.iter_mut().map(Clause::expr_mut).collect();
                v.extend(order_by.iter_mut().map(|o| &mut o.key));
                v.push(ret);
                v
            }
            Expr::Quantified { clauses, satisfies, .. } => {
                let mut v: Vec<&mut Expr> = clauses.iter_mut().map(Clause::expr_mut).collect();
                v.push(satisfies.as_mut());
                v
            }
            Expr::Insert { source, target, .. } => vec![source.as_mut(), target.as_mut()],
            Expr::Rename { target, name } => vec![target.as_mut(), name.as_mut()],
            Expr::ReplaceNode { target, with } | Expr::ReplaceValue { target, with } => {
                vec![target.as_mut(), with.as_mut()]
            }
        }
    }

    /// Largest variable id bound or referenced below this node.
    pub fn max_var_id(&self) -> VarId {
        let own = match self {
            Expr::LocalVar { id, .. } => *id,
            Expr::Flwor(f) => f.clauses.iter().flat_map(Clause::bound_vars).max().unwrap_or(0),
            Expr::Quantified { clauses, .. } => clauses.iter().flat_map(Clause::bound_vars).max().unwrap_or(0),
            _ => 0,
        };
        self.children().into_iter().map(Expr::max_var_id).fold(own, VarId::max)
    }

    /// Static type, derived from the (compiled) children.
    pub fn seq_type(&self) -> SeqType {
        match self {
            Expr::Value(items) => SeqType::of_value(items),
            Expr::LocalVar { ty, .. } | Expr::ExternalVar { ty, .. } => *ty,
            Expr::Var(_) | Expr::ContextItem => SeqType::one(ItemType::AnyItem),
            Expr::Root => SeqType::one(ItemType::Node(NodeKind::Document)),
            Expr::Position | Expr::Last => SeqType::INTEGER,
            Expr::Neg(e) => numeric_result(e.seq_type()),
            Expr::Arith { op, lhs, rhs } => {
                let (l, r) = (lhs.seq_type(), rhs.seq_type());
                let occ = if l.exactly_one() && r.exactly_one() { Occurrence::ExactlyOne } else { Occurrence::ZeroOrOne };
                let item = match (l.item, r.item, op) {
                    (ItemType::Atomic(AtomicType::Integer), ItemType::Atomic(AtomicType::Integer), op)
                        if *op != ArithOp::Div =>
                    {
                        ItemType::Atomic(AtomicType::Integer)
                    }
                    _ => ItemType::Atomic(AtomicType::Numeric),
                };
                SeqType::new(item, occ)
            }
            Expr::Compare { kind: CompareKind::Value, lhs, rhs, .. } => {
                if lhs.seq_type().exactly_one() && rhs.seq_type().exactly_one() {
                    SeqType::BOOLEAN
                } else {
                    SeqType::new(ItemType::Atomic(AtomicType::Boolean), Occurrence::ZeroOrOne)
                }
            }
            Expr::Compare { .. }
            | Expr::RangeCmp { .. }
            | Expr::Pos(_)
            | Expr::And(_)
            | Expr::Or(_)
            | Expr::Instance { .. }
            | Expr::Quantified { .. } => SeqType::BOOLEAN,
            Expr::Sequence(ops) => ops.iter().fold(SeqType::EMPTY, |acc, e| acc.concat(e.seq_type())),
            Expr::Range { .. } => SeqType::new(ItemType::Atomic(AtomicType::Integer), Occurrence::ZeroOrMore),
            Expr::If { then, els, .. } => then.seq_type().union(els.seq_type()),
            Expr::Filter { base, predicates } => {
                let b = base.seq_type();
                if b.empty {
                    SeqType::EMPTY
                } else if predicates.iter().any(|p| matches!(p, Expr::Pos(s) if s.max() == 1)) {
                    b.with_occ(Occurrence::ZeroOrOne)
                } else {
                    b.with_occ(b.occ.union(Occurrence::ZeroOrOne))
                }
            }
            Expr::Path { base, steps } => match steps.last() {
                Some(Step { axis: AxisIR::SelfAxis | AxisIR::Parent, .. }) if base.is_none() && steps.len() == 1 => {
                    SeqType::new(ItemType::AnyNode, Occurrence::ZeroOrOne)
                }
                Some(Step { axis: AxisIR::Attribute, .. }) => {
                    SeqType::new(ItemType::Node(NodeKind::Attribute), Occurrence::ZeroOrMore)
                }
                _ => SeqType::NODES,
            },
            Expr::SetOp { .. } | Expr::IndexAccess { .. } => SeqType::NODES,
            Expr::Treat { ty, .. } => *ty,
            Expr::Flwor(f) => {
                let r = f.ret.seq_type();
                if r.empty { SeqType::EMPTY } else { r.with_occ(Occurrence::ZeroOrMore) }
            }
            Expr::Call { func, .. } => func.return_type(),
            Expr::ExternalCall { .. } => SeqType::one(ItemType::AnyItem),
            Expr::Insert { .. }
            | Expr::Delete(_)
            | Expr::Rename { .. }
            | Expr::ReplaceNode { .. }
            | Expr::ReplaceValue { .. } => SeqType::EMPTY,
        }
    }
}

fn numeric_result(t: SeqType) -> SeqType {
    let item = if t.item.is_numeric() { t.item } else { ItemType::Atomic(AtomicType::Numeric) };
    let occ = if t.exactly_one() { Occurrence::ExactlyOne } else { Occurrence::ZeroOrOne };
    SeqType::new(item, occ)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pos_set_union_merges_adjacent() {
        let a = PosSet::single(2).union(&PosSet::single(3));
        assert_eq!(a, PosSet::range(2, 3));
        let b = PosSet::single(2).union(&PosSet::single(4));
        assert_eq!(b.0.as_slice(), &[(2, 2), (4, 4)]);
        assert_eq!(b.positions(5).collect::<Vec<_>>(), vec![2, 4]);
    }

    #[test]
    fn pos_set_intersection_can_be_empty() {
        let a = PosSet::range(1, 3).intersect(&PosSet::range(5, usize::MAX));
        assert!(a.is_empty());
        let b = PosSet::range(1, 3).intersect(&PosSet::range(2, usize::MAX));
        assert_eq!(b, PosSet::range(2, 3));
    }

    #[test]
    fn num_range_intersection() {
        let gt3 = NumRange::from_comparison(ComparisonOp::Gt, 3.0).unwrap();
        let lt3 = NumRange::from_comparison(ComparisonOp::Lt, 3.0).unwrap();
        assert!(gt3.intersect(&lt3).is_empty());
        let ge3 = NumRange::from_comparison(ComparisonOp::Ge, 3.0).unwrap();
        let le3 = NumRange::from_comparison(ComparisonOp::Le, 3.0).unwrap();
        let eq = ge3.intersect(&le3);
        assert!(!eq.is_empty());
        assert!(eq.contains(3.0));
    }
}
