//! Updating expressions. Each one validates its operands and registers
//! primitives in the pending set of the context; nothing is applied here.

use super::{atomize, atomize_opt, evaluate};
use crate::compiler::ir::{Expr, InsertPosition};
use crate::engine::context::QueryContext;
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::{NodeKind, QName};
use crate::store::Document;
use crate::update::{UpdatePrimitive, content_fragment, split_attributes};
use crate::xdm::{NodeRef, XdmItem};

/// The single node an update targets. `empty` is reported for an empty
/// target, `wrong` for several items or a non-node.
fn single_target(items: &[XdmItem], wrong: ErrorCode, what: &str) -> Result<NodeRef, Error> {
    match items {
        [] => Err(Error::from_code(ErrorCode::XUDY0027, format!("{what} target is empty"))),
        [XdmItem::Node(n)] => Ok(*n),
        _ => Err(Error::from_code(wrong, format!("{what} target must be a single node")).with_items(items)),
    }
}

fn kind_error(code: ErrorCode, what: &str, kind: NodeKind) -> Error {
    Error::from_code(code, format!("{what} target cannot be a {kind:?} node"))
}

pub(super) fn eval_insert(
    position: InsertPosition,
    source: &Expr,
    target: &Expr,
    ctx: &mut QueryContext<'_>,
) -> Result<(), Error> {
    let content = evaluate(source, ctx)?;
    let targets = evaluate(target, ctx)?;
    let doc = ctx.doc()?;
    let sibling = matches!(position, InsertPosition::Before | InsertPosition::After);
    let wrong = if sibling { ErrorCode::XUTY0006 } else { ErrorCode::XUTY0005 };
    let t = single_target(&targets, wrong, "insert")?;
    let kind = doc.kind(t.pre);
    let (attrs, rest) = split_attributes(content_fragment(doc, &content));

    if sibling {
        if matches!(kind, NodeKind::Attribute | NodeKind::Document) {
            return Err(kind_error(ErrorCode::XUTY0006, "insert before/after", kind));
        }
        let parent = doc
            .parent(t.pre)
            .ok_or_else(|| Error::from_code(ErrorCode::XUDY0029, "insert before/after target has no parent"))?;
        if !attrs.is_empty() {
            if doc.kind(parent) != NodeKind::Element {
                return Err(Error::from_code(ErrorCode::XUTY0022, "attributes inserted next to a child of a non-element"));
            }
            ctx.pending.add(doc.node(parent).id, UpdatePrimitive::InsertAttributes(attrs))?;
        }
        if !rest.is_empty() {
            let prim = if position == InsertPosition::Before {
                UpdatePrimitive::InsertBefore(rest)
            } else {
                UpdatePrimitive::InsertAfter(rest)
            };
            ctx.pending.add(t.id, prim)?;
        }
        return Ok(());
    }

    if !matches!(kind, NodeKind::Element | NodeKind::Document) {
        return Err(kind_error(ErrorCode::XUTY0005, "insert into", kind));
    }
    if !attrs.is_empty() {
        if kind != NodeKind::Element {
            return Err(Error::from_code(ErrorCode::XUTY0022, "attributes inserted into a document node"));
        }
        ctx.pending.add(t.id, UpdatePrimitive::InsertAttributes(attrs))?;
    }
    if !rest.is_empty() {
        let prim = match position {
            InsertPosition::AsFirst => UpdatePrimitive::InsertIntoFirst(rest),
            InsertPosition::AsLast => UpdatePrimitive::InsertIntoLast(rest),
            _ => UpdatePrimitive::InsertInto(rest),
        };
        ctx.pending.add(t.id, prim)?;
    }
    Ok(())
}

pub(super) fn eval_delete(target: &Expr, ctx: &mut QueryContext<'_>) -> Result<(), Error> {
    let items = evaluate(target, ctx)?;
    if items.is_empty() {
        return Ok(());
    }
    let doc = ctx.doc()?;
    for item in &items {
        let n = item.as_node().ok_or_else(|| {
            Error::from_code(ErrorCode::XUTY0007, "delete target is not a node").with_items(core::slice::from_ref(item))
        })?;
        // parentless nodes are left alone
        if doc.parent(n.pre).is_some() {
            ctx.pending.add(n.id, UpdatePrimitive::Delete)?;
        }
    }
    Ok(())
}

pub(super) fn eval_rename(target: &Expr, name: &Expr, ctx: &mut QueryContext<'_>) -> Result<(), Error> {
    let targets = evaluate(target, ctx)?;
    let doc = ctx.doc()?;
    let t = single_target(&targets, ErrorCode::XUTY0012, "rename")?;
    let kind = doc.kind(t.pre);
    if !matches!(kind, NodeKind::Element | NodeKind::Attribute | NodeKind::ProcessingInstruction) {
        return Err(kind_error(ErrorCode::XUTY0012, "rename", kind));
    }
    let local = atomize_opt(name, ctx)?
        .map(|v| v.lexical())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::from_code(ErrorCode::XPTY0004, "rename requires a non-empty name"))?;
    ctx.pending.add(t.id, UpdatePrimitive::Rename(QName::local(local)))
}

fn check_replacement(doc: &Document, target: NodeRef, kind: NodeKind, with: &[XdmItem]) -> Result<(), Error> {
    let attr_target = kind == NodeKind::Attribute;
    for item in with {
        let is_attr = item.as_node().is_some_and(|n| doc.kind(n.pre) == NodeKind::Attribute);
        if attr_target && !is_attr {
            return Err(Error::from_code(ErrorCode::XUTY0011, "attribute can only be replaced by attributes")
                .with_items(core::slice::from_ref(item)));
        }
        if !attr_target && is_attr {
            return Err(Error::from_code(
                ErrorCode::XUTY0010,
                format!("node {} cannot be replaced by an attribute", target.id),
            ));
        }
    }
    Ok(())
}

pub(super) fn eval_replace_node(target: &Expr, with: &Expr, ctx: &mut QueryContext<'_>) -> Result<(), Error> {
    let content = evaluate(with, ctx)?;
    let targets = evaluate(target, ctx)?;
    let doc = ctx.doc()?;
    let t = single_target(&targets, ErrorCode::XUTY0008, "replace")?;
    let kind = doc.kind(t.pre);
    if kind == NodeKind::Document {
        return Err(kind_error(ErrorCode::XUTY0008, "replace", kind));
    }
    if doc.parent(t.pre).is_none() {
        return Err(Error::from_code(ErrorCode::XUDY0009, "replace target has no parent"));
    }
    check_replacement(doc, t, kind, &content)?;
    ctx.pending.add(t.id, UpdatePrimitive::ReplaceNode(content_fragment(doc, &content)))
}

pub(super) fn eval_replace_value(target: &Expr, with: &Expr, ctx: &mut QueryContext<'_>) -> Result<(), Error> {
    let items = evaluate(with, ctx)?;
    let value = atomize(&items, ctx)?.iter().map(|v| v.lexical()).collect::<Vec<_>>().join(" ");
    let targets = evaluate(target, ctx)?;
    let doc = ctx.doc()?;
    let t = single_target(&targets, ErrorCode::XUTY0008, "replace value of")?;
    let kind = doc.kind(t.pre);
    if kind == NodeKind::Document {
        return Err(kind_error(ErrorCode::XUTY0008, "replace value of", kind));
    }
    ctx.pending.add(t.id, UpdatePrimitive::ReplaceValue(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::runtime::DynamicContext;
    use crate::model::{attr, elem, text};
    use crate::update::PrimitiveKind;

    fn sample() -> Document {
        elem("r").attr(attr("id", "1")).child(elem("a").child(text("x"))).build().unwrap()
    }

    fn node(doc: &Document, pre: usize) -> Expr {
        Expr::Value(vec![XdmItem::Node(doc.node(pre))])
    }

    #[test]
    fn inserted_attributes_go_to_the_parent() {
        let doc = sample();
        let dynamic = DynamicContext::default();
        let mut ctx = QueryContext::new(Some(&doc), &dynamic);
        // pre 3 is <a>, pre 2 is @id of <r>
        let source = Expr::Sequence(vec![node(&doc, 2), Expr::Value(vec![XdmItem::string("t")])]);
        eval_insert(InsertPosition::Before, &source, &node(&doc, 3), &mut ctx).unwrap();
        let r = ctx.pending.get(doc.node(1).id).unwrap();
        assert_eq!(r.insert_attributes.len(), 1);
        assert_eq!(ctx.pending.get(doc.node(3).id).unwrap().insert_before.len(), 1);
    }

    #[test]
    fn insert_errors() {
        let doc = sample();
        let dynamic = DynamicContext::default();
        let mut ctx = QueryContext::new(Some(&doc), &dynamic);
        let src = Expr::Value(vec![XdmItem::string("t")]);
        let err = eval_insert(InsertPosition::Into, &src, &Expr::empty(), &mut ctx).unwrap_err();
        assert_eq!(err.code, ErrorCode::XUDY0027);
        let err = eval_insert(InsertPosition::Into, &src, &node(&doc, 4), &mut ctx).unwrap_err();
        assert_eq!(err.code, ErrorCode::XUTY0005);
        let err = eval_insert(InsertPosition::After, &src, &node(&doc, 0), &mut ctx).unwrap_err();
        assert_eq!(err.code, ErrorCode::XUTY0006);
    }

    #[test]
    fn replace_checks_content_kinds() {
        let doc = sample();
        let dynamic = DynamicContext::default();
        let mut ctx = QueryContext::new(Some(&doc), &dynamic);
        let err = eval_replace_node(&node(&doc, 2), &Expr::Value(vec![XdmItem::string("v")]), &mut ctx).unwrap_err();
        assert_eq!(err.code, ErrorCode::XUTY0011);
        let err = eval_replace_node(&node(&doc, 3), &node(&doc, 2), &mut ctx).unwrap_err();
        assert_eq!(err.code, ErrorCode::XUTY0010);
        let err = eval_replace_node(&node(&doc, 0), &Expr::empty(), &mut ctx).unwrap_err();
        assert_eq!(err.code, ErrorCode::XUTY0008);
    }

    #[test]
    fn delete_skips_parentless_and_rejects_atomics() {
        let doc = sample();
        let dynamic = DynamicContext::default();
        let mut ctx = QueryContext::new(Some(&doc), &dynamic);
        eval_delete(&Expr::Sequence(vec![node(&doc, 0), node(&doc, 3)]), &mut ctx).unwrap();
        assert_eq!(ctx.pending.len(), 1);
        assert!(ctx.pending.get(doc.node(3).id).is_some_and(|t| t.delete));
        let err = eval_delete(&Expr::Value(vec![XdmItem::integer(1)]), &mut ctx).unwrap_err();
        assert_eq!(err.code, ErrorCode::XUTY0007);
    }

    #[test]
    fn replace_value_joins_atomized_items() {
        let doc = sample();
        let dynamic = DynamicContext::default();
        let mut ctx = QueryContext::new(Some(&doc), &dynamic);
        let with = Expr::Value(vec![XdmItem::integer(1), XdmItem::string("b")]);
        eval_replace_value(&node(&doc, 2), &with, &mut ctx).unwrap();
        let t = ctx.pending.get(doc.node(2).id).unwrap();
        assert_eq!(t.replace_value.as_deref(), Some("1 b"));
        assert_eq!(UpdatePrimitive::ReplaceValue(String::new()).kind(), PrimitiveKind::ReplaceValue);
    }
}
