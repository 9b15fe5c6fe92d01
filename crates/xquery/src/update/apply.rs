use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::{debug, trace};

use super::{PendingUpdates, TargetUpdates};
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::{Fragment, NodeKind};
use crate::store::Document;
use crate::xdm::{ExpandedName, NodeId};

/// Summary of one apply phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub targets: usize,
    pub inserted: usize,
    pub deleted: usize,
    pub merged_texts: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Group {
    InsertAttributes,
    InsertBefore,
    InsertAfter,
    InsertIntoFirst,
    InsertIntoLast,
    ReplaceNode,
    ReplaceElementValue,
    Delete,
}

const GROUPS: [Group; 8] = [
    Group::InsertAttributes,
    Group::InsertBefore,
    Group::InsertAfter,
    Group::InsertIntoFirst,
    Group::InsertIntoLast,
    Group::ReplaceNode,
    Group::ReplaceElementValue,
    Group::Delete,
];

/// Applies a pending set to `doc` in one pass.
///
/// Targets are validated before anything is mutated. The batch then runs on a
/// staged copy that replaces `doc` only once every step succeeded, so a failed
/// batch leaves `doc` unchanged. Renames and in-place value replacements run
/// first since they do not move nodes. Structural groups follow; each resolves
/// its targets through the id map when it starts and processes them from the
/// highest position down, so positions of targets not yet processed stay
/// valid. A target removed with a replaced or emptied ancestor is skipped.
/// Adjacent text siblings around every touched region are merged at the end,
/// and the document version is bumped.
pub fn apply(doc: &mut Document, pending: PendingUpdates) -> Result<ApplyReport, Error> {
    if pending.is_empty() {
        return Ok(ApplyReport::default());
    }
    let targets = pending.into_resolved();
    preflight(doc, &targets)?;
    let mut staged = doc.clone();
    let report = apply_staged(&mut staged, &targets)?;
    *doc = staged;
    debug!(
        targets = report.targets,
        inserted = report.inserted,
        deleted = report.deleted,
        merged = report.merged_texts,
        version = doc.version(),
        "update applied"
    );
    Ok(report)
}

fn apply_staged(doc: &mut Document, targets: &BTreeMap<NodeId, TargetUpdates>) -> Result<ApplyReport, Error> {
    let mut report = ApplyReport { targets: targets.len(), ..ApplyReport::default() };
    for (&id, t) in targets {
        if let Some(name) = &t.rename {
            let pre = doc.resolve(id)?;
            trace!(id, pre, %name, "rename");
            doc.rename(pre, name.clone())?;
        }
        if let Some(value) = &t.replace_value
            && doc.kind(doc.resolve(id)?) != NodeKind::Element
        {
            let pre = doc.resolve(id)?;
            doc.set_value(pre, value)?;
        }
    }

    let mut touched: BTreeSet<NodeId> = BTreeSet::new();
    for group in GROUPS {
        let mut work: Vec<(usize, NodeId, &TargetUpdates)> = Vec::new();
        for (&id, t) in targets {
            if !selects(group, t) {
                continue;
            }
            let Some(pre) = doc.pre_of(id) else {
                trace!(id, group = ?group, "target removed with an ancestor");
                continue;
            };
            if group == Group::ReplaceElementValue && doc.kind(pre) != NodeKind::Element {
                continue;
            }
            work.push((pre, id, t));
        }
        if work.is_empty() {
            continue;
        }
        work.sort_by(|a, b| b.0.cmp(&a.0));
        debug!(group = ?group, targets = work.len(), "applying update group");
        for (pre, id, t) in work {
            apply_one(doc, group, pre, id, t, &mut report, &mut touched)?;
        }
    }

    for id in touched {
        if let Some(pre) = doc.pre_of(id) {
            report.merged_texts += merge_adjacent_texts(doc, pre)?;
        }
    }
    doc.bump_version();
    Ok(report)
}

fn selects(group: Group, t: &TargetUpdates) -> bool {
    match group {
        Group::InsertAttributes => !t.insert_attributes.is_empty(),
        Group::InsertBefore => !t.insert_before.is_empty(),
        Group::InsertAfter => !t.insert_after.is_empty(),
        Group::InsertIntoFirst => !t.insert_first.is_empty(),
        Group::InsertIntoLast => !t.insert_into.is_empty() || !t.insert_last.is_empty(),
        Group::ReplaceNode => t.replace_node.is_some(),
        Group::ReplaceElementValue => t.replace_value.is_some(),
        Group::Delete => t.delete,
    }
}

fn parent_of(doc: &Document, pre: usize, id: NodeId) -> Result<usize, Error> {
    doc.parent(pre).ok_or_else(|| Error::from_code(ErrorCode::BXST0001, format!("target {id} has no parent")))
}

fn insert(
    doc: &mut Document,
    at: usize,
    parent: usize,
    fragment: &Fragment,
    report: &mut ApplyReport,
    touched: &mut BTreeSet<NodeId>,
) -> Result<(), Error> {
    if fragment.is_empty() {
        return Ok(());
    }
    report.inserted += doc.insert_fragment(at, parent, fragment)?;
    touched.insert(doc.node(parent).id);
    Ok(())
}

fn apply_one(
    doc: &mut Document,
    group: Group,
    pre: usize,
    id: NodeId,
    t: &TargetUpdates,
    report: &mut ApplyReport,
    touched: &mut BTreeSet<NodeId>,
) -> Result<(), Error> {
    let attr_end = |doc: &Document| pre + 1 + doc.attributes(pre).count();
    match group {
        Group::InsertAttributes => {
            let at = attr_end(doc);
            insert(doc, at, pre, &t.insert_attributes, report, touched)?;
        }
        Group::ReplaceElementValue => {
            let children: Vec<usize> = doc.children(pre).collect();
            for child in children.into_iter().rev() {
                report.deleted += doc.delete_subtree(child)?;
            }
            if let Some(value) = t.replace_value.as_deref().filter(|v| !v.is_empty()) {
                let mut f = Fragment::default();
                f.push_text(value);
                let at = attr_end(doc);
                insert(doc, at, pre, &f, report, touched)?;
            }
        }
        Group::InsertBefore => {
            let parent = parent_of(doc, pre, id)?;
            insert(doc, pre, parent, &t.insert_before, report, touched)?;
        }
        Group::InsertAfter => {
            let parent = parent_of(doc, pre, id)?;
            let at = pre + doc.size(pre);
            insert(doc, at, parent, &t.insert_after, report, touched)?;
        }
        Group::InsertIntoFirst => {
            let at = attr_end(doc);
            insert(doc, at, pre, &t.insert_first, report, touched)?;
        }
        Group::InsertIntoLast => {
            let at = pre + doc.size(pre);
            insert(doc, at, pre, &t.insert_into, report, touched)?;
            let at = pre + doc.size(pre);
            insert(doc, at, pre, &t.insert_last, report, touched)?;
        }
        Group::ReplaceNode => {
            let parent = parent_of(doc, pre, id)?;
            if let Some(content) = &t.replace_node {
                let at = pre + doc.size(pre);
                insert(doc, at, parent, content, report, touched)?;
            }
            report.deleted += doc.delete_subtree(pre)?;
            touched.insert(doc.node(parent).id);
        }
        Group::Delete => {
            let parent = parent_of(doc, pre, id)?;
            report.deleted += doc.delete_subtree(pre)?;
            touched.insert(doc.node(parent).id);
        }
    }
    Ok(())
}

/// Merges adjacent text children of `parent`; returns the number of merges.
fn merge_adjacent_texts(doc: &mut Document, parent: usize) -> Result<usize, Error> {
    let mut merged = 0;
    let mut at = parent + 1 + doc.attributes(parent).count();
    while at < parent + doc.size(parent) {
        let next = at + doc.size(at);
        if doc.kind(at) == NodeKind::Text
            && next < parent + doc.size(parent)
            && doc.kind(next) == NodeKind::Text
            && doc.merge_texts(at, next)?
        {
            merged += 1;
            continue;
        }
        at = next;
    }
    Ok(merged)
}

fn expanded(q: &crate::model::QName) -> ExpandedName {
    ExpandedName::new(q.ns_uri.clone(), q.local.clone())
}

/// Checks that every target is live and that no element ends up with two
/// attributes of the same name.
fn preflight(doc: &Document, targets: &BTreeMap<NodeId, TargetUpdates>) -> Result<(), Error> {
    let mut owners: BTreeSet<usize> = BTreeSet::new();
    for (&id, t) in targets {
        let pre = doc.resolve(id)?;
        if !t.insert_attributes.is_empty() {
            owners.insert(pre);
        }
        if doc.kind(pre) == NodeKind::Attribute
            && (t.rename.is_some() || t.replace_node.is_some())
            && let Some(owner) = doc.parent(pre)
        {
            owners.insert(owner);
        }
    }
    for owner in owners {
        let owner_id = doc.node(owner).id;
        if targets.get(&owner_id).is_some_and(|t| t.delete) {
            continue;
        }
        let mut seen: HashSet<ExpandedName> = HashSet::new();
        let mut check = |name: ExpandedName| -> Result<(), Error> {
            if seen.insert(name.clone()) {
                Ok(())
            } else {
                Err(Error::from_code(ErrorCode::XUDY0021, format!("duplicate attribute {name} on node {owner_id}")))
            }
        };
        for a in doc.attributes(owner) {
            let aid = doc.node(a).id;
            let names: Vec<ExpandedName> = match targets.get(&aid) {
                Some(t) if t.delete && t.replace_node.is_none() => Vec::new(),
                Some(t) if t.replace_node.is_some() => t
                    .replace_node
                    .iter()
                    .flat_map(|f| f.roots().filter_map(|r| f.rows[r].name.as_ref().map(expanded)).collect::<Vec<_>>())
                    .collect(),
                Some(t) if t.rename.is_some() => t.rename.iter().map(expanded).collect(),
                _ => doc.name(a).map(expanded).into_iter().collect(),
            };
            for n in names {
                check(n)?;
            }
        }
        if let Some(t) = targets.get(&owner_id) {
            for r in t.insert_attributes.roots() {
                if let Some(name) = &t.insert_attributes.rows[r].name {
                    check(expanded(name))?;
                }
            }
        }
    }
    Ok(())
}
