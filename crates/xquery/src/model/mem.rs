//! In-memory table storage: one row per node in document order.

use compact_str::CompactString;

use super::{NodeKind, NodeRow, NodeStore, QName};
use crate::engine::runtime::{Error, ErrorCode};
use crate::xdm::NodeId;

#[derive(Debug, Clone)]
struct Row {
    id: NodeId,
    kind: NodeKind,
    name: Option<QName>,
    value: Option<CompactString>,
    parent: Option<usize>,
    size: usize,
}

/// Position-addressed node table. Structural mutations shift rows; the cost is
/// linear in the table size, which is fine for the reference store.
#[derive(Debug, Clone, Default)]
pub struct MemStore {
    rows: Vec<Row>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table from pre-ordered rows. The first row must be the only
    /// top-level row.
    pub fn from_rows(rows: impl IntoIterator<Item = (NodeId, NodeRow)>) -> Result<Self, Error> {
        let mut out = Vec::new();
        for (pre, (id, row)) in rows.into_iter().enumerate() {
            let parent = match row.parent_offset {
                Some(off) if off <= pre && off > 0 => Some(pre - off),
                None if pre == 0 => None,
                _ => {
                    return Err(Error::from_code(
                        ErrorCode::BXST0001,
                        format!("row {pre} has no valid parent"),
                    ));
                }
            };
            out.push(Row { id, kind: row.kind, name: row.name, value: row.value, parent, size: row.size });
        }
        Ok(Self { rows: out })
    }

    fn row(&self, pre: usize) -> &Row {
        &self.rows[pre]
    }

    fn check(&self, pre: usize) -> Result<(), Error> {
        if pre < self.rows.len() {
            Ok(())
        } else {
            Err(Error::from_code(ErrorCode::BXST0001, format!("position {pre} outside table of {} rows", self.rows.len())))
        }
    }
}

impl NodeStore for MemStore {
    fn len(&self) -> usize {
        self.rows.len()
    }

    fn kind(&self, pre: usize) -> NodeKind {
        self.row(pre).kind
    }

    fn name(&self, pre: usize) -> Option<&QName> {
        self.row(pre).name.as_ref()
    }

    fn value(&self, pre: usize) -> Option<&str> {
        self.row(pre).value.as_deref()
    }

    fn parent(&self, pre: usize) -> Option<usize> {
        self.row(pre).parent
    }

    fn size(&self, pre: usize) -> usize {
        self.row(pre).size
    }

    fn id(&self, pre: usize) -> NodeId {
        self.row(pre).id
    }

    fn insert_range(&mut self, pre: usize, parent: usize, rows: Vec<(NodeId, NodeRow)>) -> Result<(), Error> {
        self.check(parent)?;
        if pre <= parent || pre > parent + self.size(parent) {
            return Err(Error::from_code(
                ErrorCode::BXST0001,
                format!("insert position {pre} is not inside the subtree of {parent}"),
            ));
        }
        let n = rows.len();
        if n == 0 {
            return Ok(());
        }
        for row in &mut self.rows {
            if let Some(p) = row.parent.as_mut()
                && *p >= pre
            {
                *p += n;
            }
        }
        let fresh: Vec<Row> = rows
            .into_iter()
            .enumerate()
            .map(|(k, (id, r))| Row {
                id,
                kind: r.kind,
                name: r.name,
                value: r.value,
                parent: Some(match r.parent_offset {
                    Some(off) => pre + k - off,
                    None => parent,
                }),
                size: r.size,
            })
            .collect();
        self.rows.splice(pre..pre, fresh);
        let mut anc = Some(parent);
        while let Some(a) = anc {
            self.rows[a].size += n;
            anc = self.rows[a].parent;
        }
        Ok(())
    }

    fn delete_range(&mut self, pre: usize) -> Result<Vec<NodeId>, Error> {
        self.check(pre)?;
        if self.kind(pre) == NodeKind::Document {
            return Err(Error::from_code(ErrorCode::BXST0001, "document node cannot be deleted"));
        }
        let n = self.size(pre);
        let mut anc = self.parent(pre);
        while let Some(a) = anc {
            self.rows[a].size -= n;
            anc = self.rows[a].parent;
        }
        let removed: Vec<NodeId> = self.rows.drain(pre..pre + n).map(|r| r.id).collect();
        for row in &mut self.rows {
            if let Some(p) = row.parent.as_mut()
                && *p > pre
            {
                *p -= n;
            }
        }
        Ok(removed)
    }

    fn rename(&mut self, pre: usize, name: QName) -> Result<(), Error> {
        self.check(pre)?;
        self.rows[pre].name = Some(name);
        Ok(())
    }

    fn set_value(&mut self, pre: usize, value: &str) -> Result<(), Error> {
        self.check(pre)?;
        self.rows[pre].value = Some(CompactString::from(value));
        Ok(())
    }

    fn boxed_clone(&self) -> Box<dyn NodeStore> {
        Box::new(self.clone())
    }
}
