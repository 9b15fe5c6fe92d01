use basalt_xquery::build::*;
use basalt_xquery::compiler::ir::Expr;
use basalt_xquery::{
    Document, DynamicContext, DynamicContextBuilder, StaticContext, XdmItem, attr, compile, elem, evaluate, text,
};
use rstest::{fixture, rstest};

/// `<list kind="l"><item>1</item>...<item>5</item></list>`
#[fixture]
fn list() -> Document {
    elem("list")
        .attr(attr("kind", "l"))
        .children((1..=5).map(|i| elem("item").child(text(&i.to_string()))))
        .build()
        .unwrap()
}

fn strings(doc: &Document, expr: Expr) -> Vec<String> {
    strings_with(doc, expr, &DynamicContext::default())
}

fn strings_with(doc: &Document, expr: Expr, dctx: &DynamicContext) -> Vec<String> {
    let compiled = compile(expr, &StaticContext::default()).unwrap();
    let (items, _) = evaluate(&compiled, doc, dctx).unwrap().finish().unwrap();
    items
        .iter()
        .map(|i| match i {
            XdmItem::Node(n) => doc.string_value(n.pre),
            XdmItem::Atomic(a) => a.lexical(),
        })
        .collect()
}

#[rstest]
#[case::union_of_positions(or(vec![eq(position(), int(2)), eq(position(), int(4))]), &["2", "4"])]
#[case::numeric_literal(int(3), &["3"])]
#[case::open_range(gt(position(), int(3)), &["4", "5"])]
#[case::intersected_range(and(vec![gt(position(), int(1)), lt(position(), int(3))]), &["2"])]
#[case::literal_on_the_left(ge(int(2), position()), &["1", "2"])]
#[case::out_of_range(eq(position(), int(0)), &[])]
#[case::fractional(dbl(2.5), &[])]
#[case::last(eq(position(), last()), &["5"])]
#[case::value_predicate(eq(context(), string("4")), &["4"])]
fn positional_predicates(list: Document, #[case] pred: Expr, #[case] expected: &[&str]) {
    assert_eq!(strings(&list, desc_path_where("item", vec![pred])), expected);
}

#[rstest]
fn filter_over_the_whole_path_uses_global_positions(list: Document) {
    let e = filter(desc_path("item"), vec![eq(position(), last())]);
    assert_eq!(strings(&list, e), vec!["5"]);
}

#[rstest]
fn parent_step_deduplicates(list: Document) {
    let e = call("count", vec![path(desc_path("item"), vec![parent()])]);
    assert_eq!(strings(&list, e), vec!["1"]);
}

#[rstest]
fn attribute_and_text_steps(list: Document) {
    assert_eq!(strings(&list, root_path(vec![child("list"), attribute("kind")])), vec!["l"]);
    let e = root_path(vec![child("list"), child("item"), text_step()]);
    assert_eq!(strings(&list, e), vec!["1", "2", "3", "4", "5"]);
}

#[rstest]
fn set_operators_return_document_order(list: Document) {
    let items = |p: Expr| desc_path_where("item", vec![p]);
    let e = union(items(int(4)), items(int(2)));
    assert_eq!(strings(&list, e), vec!["2", "4"]);
    let e = except(desc_path("item"), items(gt(position(), int(2))));
    assert_eq!(strings(&list, e), vec!["1", "2"]);
    let e = intersect(desc_path("item"), items(lt(position(), int(3))));
    assert_eq!(strings(&list, e), vec!["1", "2"]);
}

#[rstest]
fn general_comparison_over_nodes(list: Document) {
    let e = desc_path_where("item", vec![eq(context(), seq(vec![int(1), int(5)]))]);
    assert_eq!(strings(&list, e), vec!["1", "5"]);
}

#[rstest]
fn relative_path_from_context_item(list: Document) {
    let dctx = DynamicContextBuilder::new().with_context_item(list.node(1)).build();
    assert_eq!(strings_with(&list, rel_path(vec![child("item").with_predicate(int(2))]), &dctx), vec!["2"]);
}
