//! Node model and the storage interface the engine consumes.
//!
//! Storage is addressed purely by position (`pre`, document order). Every stored
//! row carries the stable [`NodeId`] it was created with; translation from id to
//! position is the job of [`crate::store::IdPreMap`].

use core::fmt;

use compact_str::CompactString;

use crate::engine::runtime::Error;
use crate::xdm::NodeId;

pub mod builder;
pub mod mem;

pub use builder::{attr, comment, doc, elem, text, NodeBuilder};
pub use mem::MemStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Document,
    Element,
    Attribute,
    Text,
    Comment,
    ProcessingInstruction,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QName {
    pub prefix: Option<String>,
    pub local: String,
    pub ns_uri: Option<String>,
}

impl QName {
    pub fn local(local: impl Into<String>) -> Self {
        Self { prefix: None, local: local.into(), ns_uri: None }
    }

    /// Name equality ignores the prefix.
    pub fn same_name(&self, other: &QName) -> bool {
        self.local == other.local && self.ns_uri == other.ns_uri
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.prefix {
            Some(p) => write!(f, "{}:{}", p, self.local),
            None => f.write_str(&self.local),
        }
    }
}

/// One node in flattened pre-order form.
///
/// `size` counts the node itself plus all attribute and descendant rows.
/// `parent_offset` is the distance to the parent row inside the same table or
/// fragment; `None` for top-level rows.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRow {
    pub kind: NodeKind,
    pub name: Option<QName>,
    pub value: Option<CompactString>,
    pub parent_offset: Option<usize>,
    pub size: usize,
}

impl NodeRow {
    pub fn leaf(kind: NodeKind, name: Option<QName>, value: Option<&str>) -> Self {
        Self { kind, name, value: value.map(CompactString::from), parent_offset: None, size: 1 }
    }
}

/// Materialised node list used as update payload. Top-level rows are the
/// payload nodes in order; nested rows are their attributes and descendants.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fragment {
    pub rows: Vec<NodeRow>,
}

impl Fragment {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Indices of top-level rows.
    pub fn roots(&self) -> impl Iterator<Item = usize> + '_ {
        let mut i = 0;
        core::iter::from_fn(move || {
            let row = self.rows.get(i)?;
            let at = i;
            i += row.size;
            Some(at)
        })
    }

    pub fn root_kinds(&self) -> impl Iterator<Item = NodeKind> + '_ {
        self.roots().map(|i| self.rows[i].kind)
    }

    /// Appends a text row, merging it into a trailing top-level text row.
    pub fn push_text(&mut self, value: &str) {
        if let Some(last_root) = self.roots().last()
            && self.rows[last_root].kind == NodeKind::Text
        {
            if let Some(v) = self.rows[last_root].value.as_mut() {
                v.push_str(value);
            }
            return;
        }
        self.rows.push(NodeRow::leaf(NodeKind::Text, None, Some(value)));
    }

    /// Appends a copied subtree; `rows[0]` becomes a top-level row.
    pub fn push_subtree(&mut self, mut rows: Vec<NodeRow>) {
        let Some(first) = rows.first_mut() else { return };
        first.parent_offset = None;
        if first.kind == NodeKind::Text && rows.len() == 1 {
            let value = rows[0].value.clone().unwrap_or_default();
            self.push_text(&value);
            return;
        }
        self.rows.extend(rows);
    }

    /// Appends all top-level rows of `other`, preserving their order.
    pub fn append(&mut self, other: Fragment) {
        let roots: Vec<usize> = other.roots().collect();
        for r in roots {
            let size = other.rows[r].size;
            self.push_subtree(other.rows[r..r + size].to_vec());
        }
    }
}

/// Position-addressed storage consumed by the engine.
///
/// Read accessors are random access by `pre`; the mutation methods are only
/// invoked by the apply phase while it holds the document exclusively.
pub trait NodeStore: Send + Sync + fmt::Debug {
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn kind(&self, pre: usize) -> NodeKind;
    fn name(&self, pre: usize) -> Option<&QName>;
    fn value(&self, pre: usize) -> Option<&str>;
    fn parent(&self, pre: usize) -> Option<usize>;
    fn size(&self, pre: usize) -> usize;
    fn id(&self, pre: usize) -> NodeId;

    /// Number of attribute rows directly following an element row.
    fn attribute_count(&self, pre: usize) -> usize {
        let mut n = 0;
        while pre + 1 + n < self.len()
            && self.kind(pre + 1 + n) == NodeKind::Attribute
            && self.parent(pre + 1 + n) == Some(pre)
        {
            n += 1;
        }
        n
    }

    /// Inserts `rows` at `pre` below `parent`. Each row is paired with the id
    /// it is stored under.
    fn insert_range(&mut self, pre: usize, parent: usize, rows: Vec<(NodeId, NodeRow)>) -> Result<(), Error>;
    /// Removes the subtree rooted at `pre` and returns the removed ids in order.
    fn delete_range(&mut self, pre: usize) -> Result<Vec<NodeId>, Error>;
    fn rename(&mut self, pre: usize, name: QName) -> Result<(), Error>;
    fn set_value(&mut self, pre: usize, value: &str) -> Result<(), Error>;
    /// Independent copy of the whole table, used to stage an apply phase.
    fn boxed_clone(&self) -> Box<dyn NodeStore>;
}
