//! Pending update primitives.
//!
//! Updating expressions do not touch the document while a query runs; they
//! register primitives here, keyed by the stable id of their target. The set
//! is applied once, after evaluation succeeded, by [`apply`].

use std::collections::BTreeMap;

use crate::engine::runtime::{DeletePrecedence, Error, ErrorCode, UpdatePolicy};
use crate::model::{Fragment, NodeKind, QName};
use crate::store::Document;
use crate::xdm::{NodeId, XdmItem};

mod apply;

pub use apply::{ApplyReport, apply};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PrimitiveKind {
    InsertBefore,
    InsertAfter,
    InsertIntoFirst,
    InsertInto,
    InsertIntoLast,
    InsertAttributes,
    Delete,
    Rename,
    ReplaceNode,
    ReplaceValue,
}

/// One deferred mutation of a target node.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdatePrimitive {
    InsertBefore(Fragment),
    InsertAfter(Fragment),
    InsertIntoFirst(Fragment),
    InsertInto(Fragment),
    InsertIntoLast(Fragment),
    InsertAttributes(Fragment),
    Delete,
    Rename(QName),
    ReplaceNode(Fragment),
    ReplaceValue(String),
}

impl UpdatePrimitive {
    pub fn kind(&self) -> PrimitiveKind {
        match self {
            UpdatePrimitive::InsertBefore(_) => PrimitiveKind::InsertBefore,
            UpdatePrimitive::InsertAfter(_) => PrimitiveKind::InsertAfter,
            UpdatePrimitive::InsertIntoFirst(_) => PrimitiveKind::InsertIntoFirst,
            UpdatePrimitive::InsertInto(_) => PrimitiveKind::InsertInto,
            UpdatePrimitive::InsertIntoLast(_) => PrimitiveKind::InsertIntoLast,
            UpdatePrimitive::InsertAttributes(_) => PrimitiveKind::InsertAttributes,
            UpdatePrimitive::Delete => PrimitiveKind::Delete,
            UpdatePrimitive::Rename(_) => PrimitiveKind::Rename,
            UpdatePrimitive::ReplaceNode(_) => PrimitiveKind::ReplaceNode,
            UpdatePrimitive::ReplaceValue(_) => PrimitiveKind::ReplaceValue,
        }
    }
}

/// Merged primitives of one target.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetUpdates {
    pub insert_before: Fragment,
    pub insert_after: Fragment,
    pub insert_first: Fragment,
    pub insert_into: Fragment,
    pub insert_last: Fragment,
    pub insert_attributes: Fragment,
    pub delete: bool,
    pub rename: Option<QName>,
    pub replace_node: Option<Fragment>,
    pub replace_value: Option<String>,
}

impl TargetUpdates {
    fn conflict_with_delete(&self) -> Option<(ErrorCode, &'static str)> {
        if self.rename.is_some() {
            Some((ErrorCode::XUDY0015, "rename"))
        } else if self.replace_node.is_some() {
            Some((ErrorCode::XUDY0016, "replace"))
        } else if self.replace_value.is_some() {
            Some((ErrorCode::XUDY0017, "replace value"))
        } else {
            None
        }
    }
}

/// Pending set of one execution.
#[derive(Debug, Clone, Default)]
pub struct PendingUpdates {
    policy: UpdatePolicy,
    targets: BTreeMap<NodeId, TargetUpdates>,
    registered: usize,
}

impl PendingUpdates {
    pub fn new(policy: UpdatePolicy) -> Self {
        Self { policy, targets: BTreeMap::new(), registered: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Number of registered primitives.
    pub fn len(&self) -> usize {
        self.registered
    }

    pub fn policy(&self) -> UpdatePolicy {
        self.policy
    }

    pub fn get(&self, target: NodeId) -> Option<&TargetUpdates> {
        self.targets.get(&target)
    }

    /// Registers a primitive. Conflicting primitives are rejected here, not
    /// when the set is applied.
    pub fn add(&mut self, target: NodeId, primitive: UpdatePrimitive) -> Result<(), Error> {
        let reject_delete = self.policy.delete_precedence == DeletePrecedence::Reject;
        let entry = self.targets.entry(target).or_default();
        match primitive {
            UpdatePrimitive::InsertBefore(f) => entry.insert_before.append(f),
            UpdatePrimitive::InsertAfter(f) => entry.insert_after.append(f),
            UpdatePrimitive::InsertIntoFirst(f) => entry.insert_first.append(f),
            UpdatePrimitive::InsertInto(f) => entry.insert_into.append(f),
            UpdatePrimitive::InsertIntoLast(f) => entry.insert_last.append(f),
            UpdatePrimitive::InsertAttributes(f) => entry.insert_attributes.append(f),
            UpdatePrimitive::Delete => {
                if reject_delete && let Some((code, what)) = entry.conflict_with_delete() {
                    return Err(Error::from_code(code, format!("node {target} is deleted and has a pending {what}")));
                }
                entry.delete = true;
            }
            UpdatePrimitive::Rename(name) => {
                if entry.rename.is_some() {
                    return Err(Error::from_code(ErrorCode::XUDY0015, format!("node {target} is renamed twice"))
                        .with_preview(name.to_string()));
                }
                if reject_delete && entry.delete {
                    return Err(Error::from_code(ErrorCode::XUDY0015, format!("node {target} is deleted and renamed")));
                }
                entry.rename = Some(name);
            }
            UpdatePrimitive::ReplaceNode(f) => {
                if entry.replace_node.is_some() {
                    return Err(Error::from_code(ErrorCode::XUDY0016, format!("node {target} is replaced twice")));
                }
                if reject_delete && entry.delete {
                    return Err(Error::from_code(ErrorCode::XUDY0016, format!("node {target} is deleted and replaced")));
                }
                entry.replace_node = Some(f);
            }
            UpdatePrimitive::ReplaceValue(v) => {
                if entry.replace_value.is_some() {
                    return Err(Error::from_code(
                        ErrorCode::XUDY0017,
                        format!("value of node {target} is replaced twice"),
                    )
                    .with_preview(v));
                }
                if reject_delete && entry.delete {
                    return Err(Error::from_code(
                        ErrorCode::XUDY0017,
                        format!("node {target} is deleted and its value replaced"),
                    ));
                }
                entry.replace_value = Some(v);
            }
        }
        self.registered += 1;
        Ok(())
    }

    /// Per-target updates with the delete precedence applied: a deleted
    /// target loses the inserts into itself, its rename and its value
    /// replacement. Inserts before and after it are kept.
    pub(crate) fn into_resolved(self) -> BTreeMap<NodeId, TargetUpdates> {
        let policy = self.policy;
        self.targets
            .into_iter()
            .map(|(id, mut t)| {
                if t.delete {
                    t.insert_first = Fragment::default();
                    t.insert_into = Fragment::default();
                    t.insert_last = Fragment::default();
                    t.insert_attributes = Fragment::default();
                    t.rename = None;
                    t.replace_value = None;
                    if policy.delete_precedence == DeletePrecedence::DeleteWins {
                        t.replace_node = None;
                    }
                }
                (id, t)
            })
            .collect()
    }
}

/// Materialises an insert or replace payload: nodes are deep-copied
/// (documents contribute their children), each run of adjacent atomic values
/// becomes one text node joined by single spaces, and adjacent text nodes are
/// merged.
pub fn content_fragment(doc: &Document, items: &[XdmItem]) -> Fragment {
    let mut out = Fragment::default();
    let mut run: Vec<String> = Vec::new();
    let flush = |run: &mut Vec<String>, out: &mut Fragment| {
        if !run.is_empty() {
            out.push_text(&run.join(" "));
            run.clear();
        }
    };
    for item in items {
        match item {
            XdmItem::Atomic(a) => run.push(a.lexical()),
            XdmItem::Node(n) => {
                flush(&mut run, &mut out);
                if doc.kind(n.pre) == NodeKind::Document {
                    for child in doc.children(n.pre) {
                        out.push_subtree(doc.copy_subtree(child));
                    }
                } else if doc.kind(n.pre) == NodeKind::Text && doc.value(n.pre).is_none_or(str::is_empty) {
                    continue;
                } else {
                    out.push_subtree(doc.copy_subtree(n.pre));
                }
            }
        }
    }
    flush(&mut run, &mut out);
    out
}

/// Splits a fragment into its attribute roots and all other roots.
pub fn split_attributes(fragment: Fragment) -> (Fragment, Fragment) {
    let mut attrs = Fragment::default();
    let mut rest = Fragment::default();
    let roots: Vec<usize> = fragment.roots().collect();
    for r in roots {
        let size = fragment.rows[r].size;
        let rows = fragment.rows[r..r + size].to_vec();
        if fragment.rows[r].kind == NodeKind::Attribute {
            attrs.push_subtree(rows);
        } else {
            rest.push_subtree(rows);
        }
    }
    (attrs, rest)
}
