//! Ergonomic tree builder for documents and update payloads.
//!
//! ```
//! use basalt_xquery::model::{doc, elem, text, attr};
//!
//! // <root id="r"><child>Hello</child><child/></root>
//! let document = doc()
//!     .child(
//!         elem("root")
//!             .attr(attr("id", "r"))
//!             .child(elem("child").child(text("Hello")))
//!             .child(elem("child")),
//!     )
//!     .build()
//!     .unwrap();
//! assert_eq!(document.len(), 6);
//! assert_eq!(document.string_value(0), "Hello");
//! ```

use super::{Fragment, NodeKind, NodeRow, QName};
use crate::engine::runtime::Error;
use crate::store::Document;

#[derive(Debug, Clone)]
pub struct NodeBuilder {
    kind: NodeKind,
    name: Option<QName>,
    value: Option<String>,
    attributes: Vec<NodeBuilder>,
    children: Vec<NodeBuilder>,
}

impl NodeBuilder {
    fn new(kind: NodeKind, name: Option<QName>, value: Option<String>) -> Self {
        Self { kind, name, value, attributes: Vec::new(), children: Vec::new() }
    }

    pub fn attr(mut self, attribute: NodeBuilder) -> Self {
        debug_assert_eq!(attribute.kind, NodeKind::Attribute);
        self.attributes.push(attribute);
        self
    }

    pub fn child(mut self, child: NodeBuilder) -> Self {
        self.children.push(child);
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = NodeBuilder>) -> Self {
        self.children.extend(children);
        self
    }

    /// Flattens the subtree into pre-ordered rows with parent offsets.
    pub fn rows(&self) -> Vec<NodeRow> {
        let mut out = Vec::new();
        self.flatten(None, &mut out);
        out
    }

    fn flatten(&self, parent: Option<usize>, out: &mut Vec<NodeRow>) {
        let at = out.len();
        out.push(NodeRow {
            kind: self.kind,
            name: self.name.clone(),
            value: self.value.as_deref().map(Into::into),
            parent_offset: parent.map(|p| at - p),
            size: 1,
        });
        for a in &self.attributes {
            a.flatten(Some(at), out);
        }
        for c in &self.children {
            c.flatten(Some(at), out);
        }
        out[at].size = out.len() - at;
    }

    pub fn fragment(&self) -> Fragment {
        let mut f = Fragment::default();
        f.push_subtree(self.rows());
        f
    }

    /// Builds a document. A non-document root is wrapped in a document node.
    pub fn build(self) -> Result<Document, Error> {
        let root = if self.kind == NodeKind::Document { self } else { doc().child(self) };
        Document::from_rows(root.rows())
    }
}

pub fn doc() -> NodeBuilder {
    NodeBuilder::new(NodeKind::Document, None, None)
}

pub fn elem(name: &str) -> NodeBuilder {
    NodeBuilder::new(NodeKind::Element, Some(QName::local(name)), None)
}

pub fn attr(name: &str, value: &str) -> NodeBuilder {
    NodeBuilder::new(NodeKind::Attribute, Some(QName::local(name)), Some(value.to_string()))
}

pub fn text(value: &str) -> NodeBuilder {
    NodeBuilder::new(NodeKind::Text, None, Some(value.to_string()))
}

pub fn comment(value: &str) -> NodeBuilder {
    NodeBuilder::new(NodeKind::Comment, None, Some(value.to_string()))
}
