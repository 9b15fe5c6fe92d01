use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use basalt_xquery::build::*;
use basalt_xquery::compiler::ir::{ArithOp, Expr, InsertPosition};
use basalt_xquery::update::UpdatePrimitive;
use basalt_xquery::{
    DeletePrecedence, Document, DynamicContext, NodeKind, DynamicContextBuilder, ErrorCode, PendingUpdates, SharedDocument,
    StaticContext, UpdatePolicy, XdmItem, apply, attr, compile, elem, evaluate, execute, text,
};
use rstest::{fixture, rstest};

/// `<r id="r1"><a>1</a><b/><c/></r>`; `r` is at position 1.
#[fixture]
fn shared() -> SharedDocument {
    SharedDocument::new(
        elem("r").attr(attr("id", "r1")).child(elem("a").child(text("1"))).child(elem("b")).child(elem("c")).build().unwrap(),
    )
}

fn child_names(doc: &Document) -> Vec<String> {
    doc.children(1)
        .map(|c| match doc.name(c) {
            Some(n) => n.local.clone(),
            None => format!("#{}", doc.value(c).unwrap_or_default()),
        })
        .collect()
}

fn r_child(name: &str) -> Expr {
    root_path(vec![child("r"), child(name)])
}

fn run(doc: &SharedDocument, expr: Expr) -> Result<Vec<XdmItem>, basalt_xquery::Error> {
    run_with(doc, expr, &DynamicContext::default())
}

fn run_with(doc: &SharedDocument, expr: Expr, dctx: &DynamicContext) -> Result<Vec<XdmItem>, basalt_xquery::Error> {
    let compiled = compile(expr, &StaticContext::default())?;
    assert!(compiled.updating);
    execute(&compiled, doc, dctx)
}

#[rstest]
fn delete_and_insert_before_the_same_target(shared: SharedDocument) {
    let e = seq(vec![delete(r_child("b")), insert(InsertPosition::Before, string("x"), r_child("b"))]);
    run(&shared, e).unwrap();
    let doc = shared.read().unwrap();
    assert_eq!(child_names(&doc), vec!["a", "#x", "c"]);
    assert_eq!(doc.version(), 1);
}

#[rstest]
#[case::first(InsertPosition::AsFirst, &["#t", "a", "b", "c"])]
#[case::last(InsertPosition::AsLast, &["a", "b", "c", "#t"])]
#[case::into(InsertPosition::Into, &["a", "b", "c", "#t"])]
fn insert_into_positions(shared: SharedDocument, #[case] position: InsertPosition, #[case] expected: &[&str]) {
    run(&shared, insert(position, string("t"), root_path(vec![child("r")]))).unwrap();
    assert_eq!(child_names(&shared.read().unwrap()), expected);
}

#[rstest]
fn inserted_nodes_are_copies(shared: SharedDocument) {
    run(&shared, insert(InsertPosition::After, r_child("a"), r_child("c"))).unwrap();
    let doc = shared.read().unwrap();
    assert_eq!(child_names(&doc), vec!["a", "b", "c", "a"]);
    let ids: Vec<_> = doc.children(1).map(|c| doc.node(c).id).collect();
    assert_ne!(ids[0], ids[3]);
}

#[rstest]
fn rename_and_replace_value(shared: SharedDocument) {
    let e = seq(vec![
        rename(r_child("b"), string("beta")),
        replace_value(r_child("a"), seq(vec![int(1), int(2)])),
        replace_value(root_path(vec![child("r"), attribute("id")]), string("r2")),
    ]);
    run(&shared, e).unwrap();
    let doc = shared.read().unwrap();
    assert_eq!(child_names(&doc), vec!["a", "beta", "c"]);
    assert_eq!(doc.string_value(1), "1 2");
    let id_attr = doc.attributes(1).next().unwrap();
    assert_eq!(doc.value(id_attr), Some("r2"));
}

#[rstest]
fn replace_node_merges_adjacent_text(shared: SharedDocument) {
    let e = seq(vec![
        replace(r_child("b"), string("mid")),
        insert(InsertPosition::Before, string("pre"), r_child("b")),
    ]);
    run(&shared, e).unwrap();
    let doc = shared.read().unwrap();
    assert_eq!(child_names(&doc), vec!["a", "#premid", "c"]);
}

#[rstest]
fn replaced_value_wins_over_changes_to_former_children() {
    let shared = SharedDocument::new(elem("r").child(elem("e").child(elem("c"))).build().unwrap());
    let c = root_path(vec![child("r"), child("e"), child("c")]);
    let e = seq(vec![
        replace_value(root_path(vec![child("r"), child("e")]), string("v")),
        insert(InsertPosition::Before, string("x"), c.clone()),
        rename(c.clone(), string("d")),
        delete(c),
    ]);
    run(&shared, e).unwrap();
    let doc = shared.read().unwrap();
    let kids: Vec<_> = doc.children(2).map(|k| (doc.kind(k), doc.value(k).map(str::to_owned))).collect();
    assert_eq!(kids, vec![(NodeKind::Text, Some("v".to_owned()))]);
    assert_eq!(doc.version(), 1);
}

#[rstest]
fn replaced_node_drops_updates_of_its_descendants(shared: SharedDocument) {
    let a_text = root_path(vec![child("r"), child("a"), text_step()]);
    let e = seq(vec![replace(r_child("a"), string("z")), replace_value(a_text, string("9"))]);
    run(&shared, e).unwrap();
    let doc = shared.read().unwrap();
    assert_eq!(child_names(&doc), vec!["#z", "b", "c"]);
    assert_eq!(doc.version(), 1);
}

#[rstest]
#[case::double_rename(seq(vec![rename(r_child("b"), string("x")), rename(r_child("b"), string("y"))]), ErrorCode::XUDY0015)]
#[case::double_replace(seq(vec![replace(r_child("b"), empty()), replace(r_child("b"), empty())]), ErrorCode::XUDY0016)]
#[case::double_replace_value(
    seq(vec![replace_value(r_child("a"), string("x")), replace_value(r_child("a"), string("y"))]),
    ErrorCode::XUDY0017
)]
#[case::duplicate_attribute(
    insert(InsertPosition::Into, root_path(vec![child("r"), attribute("id")]), root_path(vec![child("r")])),
    ErrorCode::XUDY0021
)]
#[case::evaluation_error(seq(vec![delete(r_child("b")), arith(ArithOp::Div, int(1), int(0))]), ErrorCode::FOAR0001)]
fn failed_updates_leave_the_document_untouched(shared: SharedDocument, #[case] e: Expr, #[case] code: ErrorCode) {
    assert_eq!(run(&shared, e).unwrap_err().code, code);
    let doc = shared.read().unwrap();
    assert_eq!(child_names(&doc), vec!["a", "b", "c"]);
    assert_eq!(doc.version(), 0);
}

#[rstest]
fn cancellation_discards_pending_updates(shared: SharedDocument) {
    let flag = Arc::new(AtomicBool::new(true));
    let dctx = DynamicContextBuilder::new().with_cancel_flag(flag).build();
    let err = run_with(&shared, delete(r_child("b")), &dctx).unwrap_err();
    assert_eq!(err.code, ErrorCode::BXCN0001);
    assert_eq!(child_names(&shared.read().unwrap()), vec!["a", "b", "c"]);
}

#[rstest]
fn pending_set_from_a_lazy_evaluation() {
    let mut doc = elem("r").child(elem("a")).child(elem("b")).build().unwrap();
    let compiled = compile(delete(root_path(vec![child("r"), child("a")])), &StaticContext::default()).unwrap();
    let dctx = DynamicContext::default();
    let mut results = evaluate(&compiled, &doc, &dctx).unwrap();
    assert!(results.next().is_none());
    let pending = results.into_pending();
    assert_eq!(pending.len(), 1);
    apply(&mut doc, pending).unwrap();
    assert_eq!(child_names(&doc), vec!["b"]);
}

fn precedence(policy: DeletePrecedence, extra: UpdatePrimitive) -> Result<Document, basalt_xquery::Error> {
    let mut doc = elem("r").child(elem("a")).child(elem("b")).child(elem("c")).build()?;
    let b = doc.node(3).id;
    let mut pending = PendingUpdates::new(UpdatePolicy { delete_precedence: policy });
    pending.add(b, UpdatePrimitive::Delete)?;
    pending.add(b, extra)?;
    apply(&mut doc, pending)?;
    Ok(doc)
}

#[rstest]
#[case::standard_keeps_replacement(DeletePrecedence::Standard, &["a", "z", "c"])]
#[case::delete_wins(DeletePrecedence::DeleteWins, &["a", "c"])]
fn delete_with_replace_node(#[case] policy: DeletePrecedence, #[case] expected: &[&str]) {
    let doc = precedence(policy, UpdatePrimitive::ReplaceNode(elem("z").fragment())).unwrap();
    assert_eq!(child_names(&doc), expected);
}

#[rstest]
#[case(UpdatePrimitive::ReplaceNode(elem("z").fragment()), ErrorCode::XUDY0016)]
#[case(UpdatePrimitive::Rename(basalt_xquery::QName::local("z")), ErrorCode::XUDY0015)]
#[case(UpdatePrimitive::ReplaceValue("v".to_string()), ErrorCode::XUDY0017)]
fn reject_policy_reports_conflicts(#[case] extra: UpdatePrimitive, #[case] code: ErrorCode) {
    assert_eq!(precedence(DeletePrecedence::Reject, extra).unwrap_err().code, code);
}

#[rstest]
#[case(UpdatePrimitive::Rename(basalt_xquery::QName::local("z")))]
#[case(UpdatePrimitive::InsertInto(text("t").fragment()))]
#[case(UpdatePrimitive::ReplaceValue("v".to_string()))]
fn delete_discards_changes_to_the_target(#[case] extra: UpdatePrimitive) {
    let doc = precedence(DeletePrecedence::Standard, extra).unwrap();
    assert_eq!(child_names(&doc), vec!["a", "c"]);
    assert_eq!(doc.len(), 4);
}
