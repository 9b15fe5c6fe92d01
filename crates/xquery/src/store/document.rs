use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::IdPreMap;
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::{Fragment, MemStore, NodeKind, NodeRow, NodeStore, QName};
use crate::xdm::{NodeId, NodeRef};

/// A document: node storage, stable id translation and a version counter that
/// is bumped by every applied update batch.
#[derive(Debug)]
pub struct Document {
    store: Box<dyn NodeStore>,
    ids: IdPreMap,
    next_id: NodeId,
    version: u64,
}

impl Clone for Document {
    fn clone(&self) -> Self {
        Self { store: self.store.boxed_clone(), ids: self.ids.clone(), next_id: self.next_id, version: self.version }
    }
}

impl Document {
    /// Creates a document backed by [`MemStore`]; ids are assigned in
    /// document order starting at zero.
    pub fn from_rows(rows: Vec<NodeRow>) -> Result<Self, Error> {
        if rows.first().map(|r| r.kind) != Some(NodeKind::Document) {
            return Err(Error::from_code(ErrorCode::BXST0001, "first row must be a document node"));
        }
        let store = MemStore::from_rows(rows.into_iter().enumerate().map(|(i, r)| (i as NodeId, r)))?;
        Self::with_store(Box::new(store))
    }

    /// Wraps an existing store. The id map is seeded from the ids the store
    /// reports for each position; a store reporting the same id twice is
    /// rejected.
    pub fn with_store(store: Box<dyn NodeStore>) -> Result<Self, Error> {
        let mut ids = IdPreMap::new();
        let mut next_id = 0;
        for pre in 0..store.len() {
            let id = store.id(pre);
            ids.insert(pre, id)?;
            next_id = next_id.max(id + 1);
        }
        Ok(Self { store, ids, next_id, version: 0 })
    }

    pub fn into_shared(self) -> SharedDocument {
        SharedDocument(Arc::new(RwLock::new(self)))
    }

    pub fn store(&self) -> &dyn NodeStore {
        self.store.as_ref()
    }

    pub fn id_map(&self) -> &IdPreMap {
        &self.ids
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn kind(&self, pre: usize) -> NodeKind {
        self.store.kind(pre)
    }

    pub fn name(&self, pre: usize) -> Option<&QName> {
        self.store.name(pre)
    }

    pub fn value(&self, pre: usize) -> Option<&str> {
        self.store.value(pre)
    }

    pub fn parent(&self, pre: usize) -> Option<usize> {
        self.store.parent(pre)
    }

    pub fn size(&self, pre: usize) -> usize {
        self.store.size(pre)
    }

    pub fn node(&self, pre: usize) -> NodeRef {
        NodeRef::new(pre, self.store.id(pre))
    }

    pub fn root(&self) -> NodeRef {
        self.node(0)
    }

    /// Current position of a live node id.
    pub fn pre_of(&self, id: NodeId) -> Option<usize> {
        self.ids.pre(id)
    }

    /// Like [`Self::pre_of`] but reports a position resolution error.
    pub fn resolve(&self, id: NodeId) -> Result<usize, Error> {
        self.ids
            .pre(id)
            .ok_or_else(|| Error::from_code(ErrorCode::BXUP0001, format!("node id {id} is no longer live")))
    }

    pub fn attributes(&self, pre: usize) -> impl Iterator<Item = usize> + '_ {
        let n = if self.kind(pre) == NodeKind::Element { self.store.attribute_count(pre) } else { 0 };
        pre + 1..pre + 1 + n
    }

    pub fn children(&self, pre: usize) -> impl Iterator<Item = usize> + '_ {
        let end = pre + self.size(pre);
        let mut next = pre + 1 + self.attributes(pre).count();
        core::iter::from_fn(move || {
            if next >= end {
                return None;
            }
            let at = next;
            next += self.size(at);
            Some(at)
        })
    }

    /// Descendants in document order, attributes excluded.
    pub fn descendants(&self, pre: usize) -> impl Iterator<Item = usize> + '_ {
        (pre + 1..pre + self.size(pre)).filter(move |&p| self.kind(p) != NodeKind::Attribute)
    }

    pub fn string_value(&self, pre: usize) -> String {
        match self.kind(pre) {
            NodeKind::Document | NodeKind::Element => self
                .descendants(pre)
                .filter(|&p| self.kind(p) == NodeKind::Text)
                .filter_map(|p| self.value(p))
                .collect(),
            _ => self.value(pre).unwrap_or_default().to_string(),
        }
    }

    /// Copies the subtree at `pre` into detached rows (first row top-level).
    pub fn copy_subtree(&self, pre: usize) -> Vec<NodeRow> {
        (pre..pre + self.size(pre))
            .map(|p| NodeRow {
                kind: self.kind(p),
                name: self.name(p).cloned(),
                value: self.value(p).map(Into::into),
                parent_offset: if p == pre { None } else { self.parent(p).map(|par| p - par) },
                size: self.size(p),
            })
            .collect()
    }

    /// Inserts all rows of `fragment` at `pre` under `parent`, allocating fresh
    /// ids. Returns the number of inserted rows.
    pub(crate) fn insert_fragment(&mut self, pre: usize, parent: usize, fragment: &Fragment) -> Result<usize, Error> {
        let mut rows = Vec::with_capacity(fragment.len());
        for row in &fragment.rows {
            rows.push((self.next_id, row.clone()));
            self.next_id += 1;
        }
        let n = rows.len();
        let ids: Vec<NodeId> = rows.iter().map(|(id, _)| *id).collect();
        self.store.insert_range(pre, parent, rows)?;
        for (k, id) in ids.into_iter().enumerate() {
            self.ids.insert(pre + k, id)?;
        }
        Ok(n)
    }

    /// Deletes the subtree at `pre`; returns the number of removed rows.
    pub(crate) fn delete_subtree(&mut self, pre: usize) -> Result<usize, Error> {
        let removed = self.store.delete_range(pre)?;
        for id in &removed {
            self.ids.delete(pre, *id)?;
        }
        Ok(removed.len())
    }

    pub(crate) fn rename(&mut self, pre: usize, name: QName) -> Result<(), Error> {
        self.store.rename(pre, name)
    }

    pub(crate) fn set_value(&mut self, pre: usize, value: &str) -> Result<(), Error> {
        self.store.set_value(pre, value)
    }

    /// Merges the text node at `b` into the text node at `a` when both are
    /// adjacent sibling text nodes. Returns whether a merge happened.
    pub(crate) fn merge_texts(&mut self, a: usize, b: usize) -> Result<bool, Error> {
        if b != a + 1 || b >= self.len() {
            return Ok(false);
        }
        if self.kind(a) != NodeKind::Text || self.kind(b) != NodeKind::Text || self.parent(a) != self.parent(b) {
            return Ok(false);
        }
        let joined = format!("{}{}", self.value(a).unwrap_or_default(), self.value(b).unwrap_or_default());
        self.store.set_value(a, &joined)?;
        self.delete_subtree(b)?;
        Ok(true)
    }

    pub(crate) fn bump_version(&mut self) {
        self.version += 1;
    }
}

/// Single-writer/multi-reader handle. Read-only evaluations share the read
/// lock; an apply phase holds the write lock for its whole duration.
#[derive(Debug, Clone)]
pub struct SharedDocument(Arc<RwLock<Document>>);

impl SharedDocument {
    pub fn new(doc: Document) -> Self {
        doc.into_shared()
    }

    pub fn read(&self) -> Result<RwLockReadGuard<'_, Document>, Error> {
        self.0.read().map_err(|_| Error::from_code(ErrorCode::BXST0001, "document lock poisoned"))
    }

    pub fn write(&self) -> Result<RwLockWriteGuard<'_, Document>, Error> {
        self.0.write().map_err(|_| Error::from_code(ErrorCode::BXST0001, "document lock poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(kind: NodeKind, parent_offset: Option<usize>, size: usize) -> NodeRow {
        NodeRow { parent_offset, size, ..NodeRow::leaf(kind, None, None) }
    }

    #[test]
    fn store_with_repeated_ids_is_rejected() {
        let store = MemStore::from_rows([(0, row(NodeKind::Document, None, 2)), (0, row(NodeKind::Text, Some(1), 1))])
            .unwrap();
        let err = Document::with_store(Box::new(store)).unwrap_err();
        assert_eq!(err.code, ErrorCode::BXST0001);
    }

    #[test]
    fn ids_continue_after_the_largest_stored_id() {
        let store = MemStore::from_rows([(4, row(NodeKind::Document, None, 2)), (9, row(NodeKind::Text, Some(1), 1))])
            .unwrap();
        let mut doc = Document::with_store(Box::new(store)).unwrap();
        assert_eq!(doc.pre_of(9), Some(1));
        let mut f = Fragment::default();
        f.push_text("x");
        doc.insert_fragment(1, 0, &f).unwrap();
        assert_eq!(doc.node(1).id, 10);
    }
}
