use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use basalt_xquery::build::*;
use basalt_xquery::compiler::ir::{ArithOp, Expr};
use basalt_xquery::{
    Document, DynamicContext, DynamicContextBuilder, Error, ExpandedName, ExternalFunctions, SeqType, StaticContext,
    StaticContextBuilder, XdmItem, XdmSequence, compile, elem, evaluate,
};
use proptest::prelude::*;
use rstest::rstest;

fn run_with(expr: Expr, sctx: &StaticContext, dctx: &DynamicContext) -> XdmSequence {
    let doc: Document = elem("r").build().unwrap();
    let compiled = compile(expr, sctx).unwrap();
    evaluate(&compiled, &doc, dctx).unwrap().finish().unwrap().0
}

fn run(expr: Expr) -> XdmSequence {
    run_with(expr, &StaticContext::default(), &DynamicContext::default())
}

fn ints(values: &[i64]) -> XdmSequence {
    values.iter().map(|v| XdmItem::integer(*v)).collect()
}

fn int_seq(values: &[i64]) -> Expr {
    seq(values.iter().map(|v| int(*v)).collect())
}

#[rstest]
fn last_binding_varies_fastest() {
    let e = flwor(
        vec![for_("a", int_seq(&[1, 2])), for_("b", int_seq(&[10, 20]))],
        arith(ArithOp::Add, var("a"), var("b")),
    );
    assert_eq!(run(e), ints(&[11, 21, 12, 22]));
}

#[rstest]
fn inner_source_depends_on_outer_binding() {
    let e = flwor(vec![for_("a", int_seq(&[1, 2])), for_("b", range(int(1), var("a")))], var("b"));
    assert_eq!(run(e), ints(&[1, 1, 2]));
}

#[rstest]
fn positional_variable_counts_from_one() {
    let e = flwor(vec![for_at("x", "i", seq(vec![string("a"), string("b")]))], var("i"));
    assert_eq!(run(e), ints(&[1, 2]));
}

#[rstest]
fn where_filters_tuples() {
    let e = flwor(
        vec![for_("x", range(int(1), int(10))), where_(eq(arith(ArithOp::Mod, var("x"), int(3)), int(0)))],
        var("x"),
    );
    assert_eq!(run(e), ints(&[3, 6, 9]));
}

#[rstest]
fn let_is_evaluated_per_tuple() {
    let e = flwor(
        vec![for_("x", int_seq(&[1, 2, 3])), let_("y", arith(ArithOp::Mul, var("x"), var("x")))],
        var("y"),
    );
    assert_eq!(run(e), ints(&[1, 4, 9]));
}

#[rstest]
#[case(false, &[1, 2, 3])]
#[case(true, &[3, 2, 1])]
fn order_by_direction(#[case] descending: bool, #[case] expected: &[i64]) {
    let e = flwor_ordered(vec![for_("x", int_seq(&[3, 1, 2]))], vec![order(var("x"), descending, false)], var("x"));
    assert_eq!(run(e), ints(expected));
}

proptest! {
    #[test]
    fn order_by_is_stable(keys in prop::collection::vec(0i64..4, 0..25), descending in any::<bool>()) {
        let values: Vec<i64> = keys.iter().enumerate().map(|(i, k)| k * 100 + i as i64).collect();
        let e = flwor_ordered(
            vec![for_("x", items(ints(&values)))],
            vec![order(arith(ArithOp::IDiv, var("x"), int(100)), descending, false)],
            var("x"),
        );
        let mut expected = values.clone();
        if descending {
            expected.sort_by_key(|v| std::cmp::Reverse(v / 100));
        } else {
            expected.sort_by_key(|v| v / 100);
        }
        prop_assert_eq!(run(e), ints(&expected));
    }
}

/// Host function `is-two($x)` that counts its invocations.
#[derive(Default)]
struct Probe {
    calls: AtomicUsize,
}

impl ExternalFunctions for Probe {
    fn call(&self, name: &ExpandedName, args: &[XdmSequence]) -> Result<XdmItem, Error> {
        assert_eq!(name.local, "is-two");
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(XdmItem::boolean(args.first().is_some_and(|a| a == &vec![XdmItem::integer(2)])))
    }
}

fn quantified(every_kind: bool, source: Expr) -> Expr {
    let clauses = vec![for_("x", source)];
    let test = call("is-two", vec![var("x")]);
    if every_kind { every(clauses, test) } else { some(clauses, test) }
}

#[rstest]
#[case::some_stops_at_first_match(false, &[1, 2, 3], true, 2)]
#[case::some_without_match(false, &[1, 3], false, 2)]
#[case::every_stops_at_first_failure(true, &[1, 2, 3], false, 1)]
#[case::every_all_match(true, &[2, 2], true, 2)]
fn quantifiers_short_circuit(
    #[case] every_kind: bool,
    #[case] source: &[i64],
    #[case] expected: bool,
    #[case] calls: usize,
) {
    let probe = Arc::new(Probe::default());
    let dctx = DynamicContextBuilder::new().with_externals(probe.clone()).build();
    let out = run_with(quantified(every_kind, int_seq(source)), &StaticContext::default(), &dctx);
    assert_eq!(out, vec![XdmItem::boolean(expected)]);
    assert_eq!(probe.calls.load(Ordering::SeqCst), calls);
}

#[rstest]
#[case(false, false)]
#[case(true, true)]
fn quantifier_over_empty_source_skips_the_test(#[case] every_kind: bool, #[case] expected: bool) {
    let name = ExpandedName::local("e");
    let sctx = StaticContextBuilder::new().with_variable(name.clone(), SeqType::ITEMS).build();
    let probe = Arc::new(Probe::default());
    let dctx = DynamicContextBuilder::new().with_variable(name, XdmSequence::new()).with_externals(probe.clone()).build();
    assert_eq!(run_with(quantified(every_kind, var("e")), &sctx, &dctx), vec![XdmItem::boolean(expected)]);
    assert_eq!(probe.calls.load(Ordering::SeqCst), 0);

    // statically empty: folded without evaluating anything
    let compiled = compile(quantified(every_kind, empty()), &StaticContext::default()).unwrap();
    assert_eq!(compiled.expr, Expr::boolean(expected));
}

#[rstest]
fn quantifier_inside_flwor_is_reevaluated_per_tuple() {
    let probe = Arc::new(Probe::default());
    let dctx = DynamicContextBuilder::new().with_externals(probe.clone()).build();
    let e = flwor(
        vec![for_("n", int_seq(&[1, 3]))],
        some(vec![for_("x", range(int(1), var("n")))], call("is-two", vec![var("x")])),
    );
    let out = run_with(e, &StaticContext::default(), &dctx);
    assert_eq!(out, vec![XdmItem::boolean(false), XdmItem::boolean(true)]);
    assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
}
