use core::fmt;

use crate::model::NodeKind;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExpandedName {
    pub ns_uri: Option<String>,
    pub local: String,
}

impl ExpandedName {
    pub fn new(ns_uri: Option<String>, local: impl Into<String>) -> Self {
        Self { ns_uri, local: local.into() }
    }

    pub fn local(local: impl Into<String>) -> Self {
        Self { ns_uri: None, local: local.into() }
    }
}

impl fmt::Display for ExpandedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ns_uri {
            Some(ns) => write!(f, "Q{{{}}}{}", ns, self.local),
            None => f.write_str(&self.local),
        }
    }
}

/// Stable node identity. Assigned once when a node enters a document and never
/// reused while the node is live.
pub type NodeId = u64;

/// Atomic values understood by the engine. Decimals are kept as `f64`.
#[derive(Debug, Clone, PartialEq)]
pub enum XdmAtomicValue {
    Boolean(bool),
    String(String),
    UntypedAtomic(String),
    Integer(i64),
    Decimal(f64),
    Double(f64),
}

impl XdmAtomicValue {
    pub fn atomic_type(&self) -> AtomicType {
        match self {
            Self::Boolean(_) => AtomicType::Boolean,
            Self::String(_) => AtomicType::String,
            Self::UntypedAtomic(_) => AtomicType::UntypedAtomic,
            Self::Integer(_) => AtomicType::Integer,
            Self::Decimal(_) => AtomicType::Decimal,
            Self::Double(_) => AtomicType::Double,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer(_) | Self::Decimal(_) | Self::Double(_))
    }

    /// Numeric view of a numeric value; `None` for non-numeric values.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Decimal(d) | Self::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// Canonical lexical form.
    pub fn lexical(&self) -> String {
        match self {
            Self::Boolean(b) => b.to_string(),
            Self::String(s) | Self::UntypedAtomic(s) => s.clone(),
            Self::Integer(i) => i.to_string(),
            Self::Decimal(d) => format_decimal(*d),
            Self::Double(d) => format_double(*d),
        }
    }
}

fn format_decimal(d: f64) -> String {
    if d.fract() == 0.0 && d.is_finite() { format!("{}", d as i64) } else { d.to_string() }
}

fn format_double(d: f64) -> String {
    if d.is_nan() {
        "NaN".to_string()
    } else if d.is_infinite() {
        if d > 0.0 { "INF".to_string() } else { "-INF".to_string() }
    } else if d.fract() == 0.0 && d.abs() < 1e15 {
        format!("{}", d as i64)
    } else {
        d.to_string()
    }
}

/// Reference to a node of the document the current execution reads.
///
/// `pre` is only meaningful against the document snapshot the item was produced
/// from; `id` survives structural updates. `score` carries an optional relevance
/// value supplied by an index.
#[derive(Debug, Clone, Copy)]
pub struct NodeRef {
    pub pre: usize,
    pub id: NodeId,
    pub score: Option<f64>,
}

impl NodeRef {
    pub fn new(pre: usize, id: NodeId) -> Self {
        Self { pre, id, score: None }
    }
}

impl PartialEq for NodeRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for NodeRef {}

impl core::hash::Hash for NodeRef {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

pub type XdmSequence = Vec<XdmItem>;

#[derive(Debug, Clone, PartialEq)]
pub enum XdmItem {
    Node(NodeRef),
    Atomic(XdmAtomicValue),
}

impl From<XdmAtomicValue> for XdmItem {
    fn from(a: XdmAtomicValue) -> Self {
        XdmItem::Atomic(a)
    }
}

impl From<NodeRef> for XdmItem {
    fn from(n: NodeRef) -> Self {
        XdmItem::Node(n)
    }
}

impl XdmItem {
    pub fn boolean(b: bool) -> Self {
        XdmItem::Atomic(XdmAtomicValue::Boolean(b))
    }

    pub fn integer(i: i64) -> Self {
        XdmItem::Atomic(XdmAtomicValue::Integer(i))
    }

    pub fn string(s: impl Into<String>) -> Self {
        XdmItem::Atomic(XdmAtomicValue::String(s.into()))
    }

    pub fn as_node(&self) -> Option<NodeRef> {
        match self {
            XdmItem::Node(n) => Some(*n),
            XdmItem::Atomic(_) => None,
        }
    }

    pub fn as_atomic(&self) -> Option<&XdmAtomicValue> {
        match self {
            XdmItem::Atomic(a) => Some(a),
            XdmItem::Node(_) => None,
        }
    }

    pub fn score(&self) -> Option<f64> {
        match self {
            XdmItem::Node(n) => n.score,
            XdmItem::Atomic(_) => None,
        }
    }
}

impl fmt::Display for XdmItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XdmItem::Node(n) => write!(f, "node#{}", n.id),
            XdmItem::Atomic(XdmAtomicValue::String(s)) => write!(f, "\"{s}\""),
            XdmItem::Atomic(a) => f.write_str(&a.lexical()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtomicType {
    AnyAtomic,
    Boolean,
    String,
    UntypedAtomic,
    Numeric,
    Integer,
    Decimal,
    Double,
}

impl AtomicType {
    /// Subtype relation restricted to the atomic types modelled here.
    pub fn derives_from(self, other: AtomicType) -> bool {
        use AtomicType::*;
        self == other
            || other == AnyAtomic
            || (other == Numeric && matches!(self, Integer | Decimal | Double))
            || (other == Decimal && self == Integer)
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, AtomicType::Numeric | AtomicType::Integer | AtomicType::Decimal | AtomicType::Double)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemType {
    AnyItem,
    AnyNode,
    Node(NodeKind),
    Atomic(AtomicType),
}

impl ItemType {
    pub fn is_boolean(self) -> bool {
        self == ItemType::Atomic(AtomicType::Boolean)
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, ItemType::Atomic(t) if t.is_numeric())
    }

    pub fn is_node(self) -> bool {
        matches!(self, ItemType::AnyNode | ItemType::Node(_))
    }

    pub fn matches(self, item: &XdmItem, kind_of: impl Fn(NodeRef) -> NodeKind) -> bool {
        match (self, item) {
            (ItemType::AnyItem, _) => true,
            (ItemType::AnyNode, XdmItem::Node(_)) => true,
            (ItemType::Node(k), XdmItem::Node(n)) => kind_of(*n) == k,
            (ItemType::Atomic(t), XdmItem::Atomic(a)) => a.atomic_type().derives_from(t),
            _ => false,
        }
    }

    /// Least common supertype of two item types.
    pub fn union(self, other: ItemType) -> ItemType {
        if self == other {
            return self;
        }
        match (self, other) {
            (a, b) if a.is_node() && b.is_node() => ItemType::AnyNode,
            (ItemType::Atomic(a), ItemType::Atomic(b)) if a.is_numeric() && b.is_numeric() => {
                ItemType::Atomic(AtomicType::Numeric)
            }
            (ItemType::Atomic(_), ItemType::Atomic(_)) => ItemType::Atomic(AtomicType::AnyAtomic),
            _ => ItemType::AnyItem,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Occurrence {
    ExactlyOne,
    ZeroOrOne,
    ZeroOrMore,
    OneOrMore,
}

impl Occurrence {
    pub fn min(self) -> usize {
        match self {
            Occurrence::ExactlyOne | Occurrence::OneOrMore => 1,
            _ => 0,
        }
    }

    pub fn max(self) -> Option<usize> {
        match self {
            Occurrence::ExactlyOne | Occurrence::ZeroOrOne => Some(1),
            _ => None,
        }
    }

    pub fn allows(self, n: usize) -> bool {
        n >= self.min() && self.max().is_none_or(|m| n <= m)
    }

    fn from_bounds(min: usize, max: Option<usize>) -> Self {
        match (min >= 1, max.is_some_and(|m| m <= 1)) {
            (true, true) => Occurrence::ExactlyOne,
            (false, true) => Occurrence::ZeroOrOne,
            (true, false) => Occurrence::OneOrMore,
            (false, false) => Occurrence::ZeroOrMore,
        }
    }

    /// Occurrence of the concatenation of two sequences.
    pub fn concat(self, other: Occurrence) -> Occurrence {
        let min = self.min() + other.min();
        let max = match (self.max(), other.max()) {
            (Some(a), Some(b)) => Some(a + b),
            _ => None,
        };
        Occurrence::from_bounds(min.min(1), max)
    }

    /// Occurrence of either branch.
    pub fn union(self, other: Occurrence) -> Occurrence {
        let min = self.min().min(other.min());
        let max = match (self.max(), other.max()) {
            (Some(a), Some(b)) => Some(a.max(b)),
            _ => None,
        };
        Occurrence::from_bounds(min, max)
    }

    /// Occurrence of `n` repetitions where `n` has occurrence `outer`.
    pub fn repeat(self, outer: Occurrence) -> Occurrence {
        let min = self.min() * outer.min();
        let max = match (self.max(), outer.max()) {
            (Some(a), Some(b)) => Some(a * b),
            _ => None,
        };
        Occurrence::from_bounds(min, max)
    }
}

/// Static type of an expression: item type plus occurrence indicator.
/// `empty` marks the type of the empty sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SeqType {
    pub item: ItemType,
    pub occ: Occurrence,
    pub empty: bool,
}

impl SeqType {
    pub const EMPTY: SeqType = SeqType { item: ItemType::AnyItem, occ: Occurrence::ZeroOrOne, empty: true };
    pub const ITEMS: SeqType = SeqType { item: ItemType::AnyItem, occ: Occurrence::ZeroOrMore, empty: false };
    pub const BOOLEAN: SeqType = SeqType::one(ItemType::Atomic(AtomicType::Boolean));
    pub const INTEGER: SeqType = SeqType::one(ItemType::Atomic(AtomicType::Integer));
    pub const STRING: SeqType = SeqType::one(ItemType::Atomic(AtomicType::String));
    pub const NODES: SeqType = SeqType { item: ItemType::AnyNode, occ: Occurrence::ZeroOrMore, empty: false };

    pub const fn new(item: ItemType, occ: Occurrence) -> Self {
        Self { item, occ, empty: false }
    }

    pub const fn one(item: ItemType) -> Self {
        Self { item, occ: Occurrence::ExactlyOne, empty: false }
    }

    pub fn zero_or_one(self) -> bool {
        self.empty || self.occ.max() == Some(1)
    }

    pub fn exactly_one(self) -> bool {
        !self.empty && self.occ == Occurrence::ExactlyOne
    }

    pub fn with_occ(self, occ: Occurrence) -> Self {
        Self { occ, ..self }
    }

    /// Type of the sequence formed by concatenating values of both types.
    pub fn concat(self, other: SeqType) -> SeqType {
        match (self.empty, other.empty) {
            (true, _) => other,
            (_, true) => self,
            _ => SeqType::new(self.item.union(other.item), self.occ.concat(other.occ)),
        }
    }

    /// Type of a value that is one of both alternatives.
    pub fn union(self, other: SeqType) -> SeqType {
        match (self.empty, other.empty) {
            (true, true) => SeqType::EMPTY,
            (true, false) => other.with_occ(other.occ.union(Occurrence::ZeroOrOne)),
            (false, true) => self.with_occ(self.occ.union(Occurrence::ZeroOrOne)),
            _ => SeqType::new(self.item.union(other.item), self.occ.union(other.occ)),
        }
    }

    /// Static type of a literal sequence.
    pub fn of_value(items: &[XdmItem]) -> SeqType {
        let Some(first) = items.first() else {
            return SeqType::EMPTY;
        };
        let item_type = |it: &XdmItem| match it {
            XdmItem::Node(_) => ItemType::AnyNode,
            XdmItem::Atomic(a) => ItemType::Atomic(a.atomic_type()),
        };
        let item = items.iter().skip(1).fold(item_type(first), |acc, it| acc.union(item_type(it)));
        let occ = if items.len() == 1 { Occurrence::ExactlyOne } else { Occurrence::OneOrMore };
        SeqType::new(item, occ)
    }
}

impl fmt::Display for SeqType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.empty {
            return f.write_str("empty-sequence()");
        }
        let occ = match self.occ {
            Occurrence::ExactlyOne => "",
            Occurrence::ZeroOrOne => "?",
            Occurrence::ZeroOrMore => "*",
            Occurrence::OneOrMore => "+",
        };
        write!(f, "{:?}{}", self.item, occ)
    }
}
