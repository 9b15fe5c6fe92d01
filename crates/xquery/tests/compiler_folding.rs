use basalt_xquery::build::*;
use basalt_xquery::compiler::ir::{ArithOp, Expr};
use basalt_xquery::xdm::{AtomicType, ItemType, Occurrence};
use basalt_xquery::{
    Document, DynamicContext, DynamicContextBuilder, ErrorCode, ExpandedName, NodeKind, SeqType, StaticContext,
    StaticContextBuilder, XdmItem, XdmSequence, compile, elem, evaluate,
};
use proptest::prelude::*;
use rstest::rstest;

fn document() -> Document {
    elem("r").build().unwrap()
}

fn run(expr: Expr, sctx: &StaticContext, dctx: &DynamicContext) -> XdmSequence {
    let doc = document();
    let compiled = compile(expr, sctx).unwrap();
    evaluate(&compiled, &doc, dctx).unwrap().finish().unwrap().0
}

fn unfolded() -> StaticContext {
    StaticContextBuilder::new().with_constant_folding(false).build()
}

#[rstest]
#[case(arith(ArithOp::Add, int(2), arith(ArithOp::Mul, int(3), int(4))))]
#[case(and(vec![boolean(true), gt(int(3), int(2))]))]
#[case(or(vec![boolean(false), lt(int(5), int(1))]))]
#[case(if_(gt(int(1), int(0)), string("yes"), string("no")))]
#[case(call("count", vec![range(int(1), int(10))]))]
#[case(call("sum", vec![range(int(1), int(100))]))]
#[case(flwor(vec![let_("x", int(5))], arith(ArithOp::Mul, var("x"), int(2))))]
#[case(call("concat", vec![string("a"), int(1), string("b")]))]
#[case(neg(arith(ArithOp::IDiv, int(7), int(2))))]
fn folding_preserves_results(#[case] expr: Expr) {
    let dctx = DynamicContext::default();
    let folded = compile(expr.clone(), &StaticContext::default()).unwrap();
    assert!(folded.expr.is_value(), "not folded: {:?}", folded.expr);
    assert_eq!(run(expr.clone(), &StaticContext::default(), &dctx), run(expr, &unfolded(), &dctx));
}

#[rstest]
fn contradictory_bounds_fold_to_false() {
    let sctx = StaticContextBuilder::new().with_variable(ExpandedName::local("x"), SeqType::INTEGER).build();
    let expr = and(vec![gt(var("x"), int(3)), lt(var("x"), int(3))]);
    assert_eq!(compile(expr.clone(), &sctx).unwrap().expr, Expr::boolean(false));

    let dctx = DynamicContextBuilder::new().with_variable(ExpandedName::local("x"), vec![XdmItem::integer(3)]).build();
    assert_eq!(run(expr, &sctx, &dctx), vec![XdmItem::boolean(false)]);
}

#[rstest]
fn failing_fold_is_deferred_to_run_time() {
    let compiled = compile(arith(ArithOp::Div, int(1), int(0)), &StaticContext::default()).unwrap();
    assert!(!compiled.expr.is_value());
    let doc = document();
    let dctx = DynamicContext::default();
    let err = evaluate(&compiled, &doc, &dctx).and_then(|it| it.finish()).unwrap_err();
    assert_eq!(err.code, ErrorCode::FOAR0001);
}

#[rstest]
fn external_calls_are_never_folded() {
    let compiled = compile(call("host-fn", vec![int(1)]), &StaticContext::default()).unwrap();
    assert!(matches!(compiled.expr, Expr::ExternalCall { .. }));
}

#[rstest]
fn large_ranges_stay_lazy() {
    let compiled = compile(range(int(1), int(1_000_000_000)), &StaticContext::default()).unwrap();
    assert!(matches!(compiled.expr, Expr::Range { .. }));
    let doc = document();
    let dctx = DynamicContext::default();
    let first: Vec<XdmItem> = evaluate(&compiled, &doc, &dctx).unwrap().take(3).map(Result::unwrap).collect();
    assert_eq!(first, vec![XdmItem::integer(1), XdmItem::integer(2), XdmItem::integer(3)]);
}

#[rstest]
#[case::single(i64::MAX, i64::MAX)]
#[case::last_two(i64::MAX - 1, i64::MAX)]
#[case::empty(i64::MAX, i64::MAX - 1)]
fn ranges_at_the_integer_limit(#[case] from: i64, #[case] to: i64) {
    let expected: Vec<XdmItem> = (from..=to).map(XdmItem::integer).collect();
    let dctx = DynamicContext::default();
    assert_eq!(run(range(int(from), int(to)), &StaticContext::default(), &dctx), expected);
    assert_eq!(run(range(int(from), int(to)), &unfolded(), &dctx), expected);
}

fn integers(occ: Occurrence) -> SeqType {
    SeqType::new(ItemType::Atomic(AtomicType::Integer), occ)
}

#[rstest]
#[case::single(int(1), SeqType::INTEGER, true)]
#[case::too_many(seq(vec![int(1), int(2)]), SeqType::INTEGER, false)]
#[case::range(range(int(1), int(3)), integers(Occurrence::OneOrMore), true)]
#[case::empty_optional(empty(), integers(Occurrence::ZeroOrOne), true)]
#[case::empty_required(empty(), SeqType::INTEGER, false)]
#[case::empty_sequence(empty(), SeqType::EMPTY, true)]
#[case::not_empty(int(1), SeqType::EMPTY, false)]
#[case::derived(int(7), SeqType::one(ItemType::Atomic(AtomicType::Numeric)), true)]
#[case::other_family(string("7"), SeqType::one(ItemType::Atomic(AtomicType::Numeric)), false)]
#[case::mixed(seq(vec![int(1), string("a")]), SeqType::ITEMS, true)]
fn instance_tests_agree_with_and_without_folding(#[case] e: Expr, #[case] ty: SeqType, #[case] expected: bool) {
    let dctx = DynamicContext::default();
    let expr = instance_of(e, ty);
    assert_eq!(compile(expr.clone(), &StaticContext::default()).unwrap().expr, Expr::boolean(expected));
    assert_eq!(run(expr.clone(), &StaticContext::default(), &dctx), vec![XdmItem::boolean(expected)]);
    assert_eq!(run(expr, &unfolded(), &dctx), vec![XdmItem::boolean(expected)]);
}

#[rstest]
#[case::subtype(SeqType::one(ItemType::Atomic(AtomicType::Decimal)), true)]
#[case::disjoint(SeqType::STRING, false)]
fn instance_test_on_a_bound_variable_folds_from_its_type(#[case] ty: SeqType, #[case] expected: bool) {
    let expr = flwor(vec![let_("n", call("count", vec![desc_path("r")]))], instance_of(var("n"), ty));
    let compiled = compile(expr.clone(), &StaticContext::default()).unwrap();
    let Expr::Flwor(f) = &compiled.expr else { panic!("let was not kept: {:?}", compiled.expr) };
    assert_eq!(f.ret, Expr::boolean(expected));
    let dctx = DynamicContext::default();
    assert_eq!(run(expr, &unfolded(), &dctx), vec![XdmItem::boolean(expected)]);
}

#[rstest]
fn instance_test_keeps_a_failing_operand() {
    let expr = instance_of(arith(ArithOp::Div, int(1), int(0)), SeqType::one(ItemType::Atomic(AtomicType::Numeric)));
    let compiled = compile(expr, &StaticContext::default()).unwrap();
    assert!(matches!(compiled.expr, Expr::Instance { .. }));
    let doc = document();
    let dctx = DynamicContext::default();
    let err = evaluate(&compiled, &doc, &dctx).and_then(|it| it.finish()).unwrap_err();
    assert_eq!(err.code, ErrorCode::FOAR0001);
}

#[rstest]
fn instance_test_checks_node_kinds_at_run_time() {
    let element = SeqType::one(ItemType::Node(NodeKind::Element));
    let dctx = DynamicContext::default();
    for sctx in [StaticContext::default(), unfolded()] {
        assert_eq!(run(instance_of(desc_path("r"), element), &sctx, &dctx), vec![XdmItem::boolean(true)]);
        assert_eq!(run(instance_of(root(), element), &sctx, &dctx), vec![XdmItem::boolean(false)]);
    }
}

fn classify(operand: Expr) -> Expr {
    typeswitch(
        operand,
        vec![
            type_case(Some("s"), vec![SeqType::STRING], call("concat", vec![string("s:"), var("s")])),
            type_case(
                None,
                vec![SeqType::one(ItemType::Atomic(AtomicType::Numeric)), SeqType::BOOLEAN],
                string("scalar"),
            ),
            type_case(Some("i"), vec![integers(Occurrence::OneOrMore)], call("count", vec![var("i")])),
        ],
        Some("d"),
        call("count", vec![var("d")]),
    )
}

#[rstest]
#[case::string(string("x"), XdmItem::string("s:x"))]
#[case::first_match_wins(int(3), XdmItem::string("scalar"))]
#[case::second_type_of_a_case(boolean(true), XdmItem::string("scalar"))]
#[case::sequence(range(int(1), int(3)), XdmItem::integer(3))]
#[case::default_on_empty(empty(), XdmItem::integer(0))]
#[case::default_binds(seq(vec![string("a"), string("b")]), XdmItem::integer(2))]
fn typeswitch_takes_the_first_matching_case(#[case] operand: Expr, #[case] expected: XdmItem) {
    let dctx = DynamicContext::default();
    let folded = compile(classify(operand.clone()), &StaticContext::default()).unwrap();
    assert!(folded.expr.is_value(), "not folded: {:?}", folded.expr);
    assert_eq!(run(classify(operand.clone()), &StaticContext::default(), &dctx), vec![expected.clone()]);
    assert_eq!(run(classify(operand), &unfolded(), &dctx), vec![expected]);
}

#[rstest]
fn typeswitch_on_nodes_is_decided_at_run_time() {
    let expr = typeswitch(
        desc_path("r"),
        vec![type_case(None, vec![SeqType::one(ItemType::Node(NodeKind::Attribute))], string("attribute"))],
        Some("n"),
        call("name", vec![var("n")]),
    );
    let compiled = compile(expr.clone(), &StaticContext::default()).unwrap();
    assert!(!compiled.expr.is_value());
    assert_eq!(run(expr, &StaticContext::default(), &DynamicContext::default()), vec![XdmItem::string("r")]);
}

#[derive(Debug, Clone)]
enum Leaf {
    Lit(bool),
    Var(usize),
}

fn leaf() -> impl Strategy<Value = Leaf> {
    prop_oneof![any::<bool>().prop_map(Leaf::Lit), (0usize..4).prop_map(Leaf::Var)]
}

fn leaf_expr(l: &Leaf) -> Expr {
    match l {
        Leaf::Lit(b) => boolean(*b),
        Leaf::Var(i) => var(&format!("v{i}")),
    }
}

fn leaf_value(l: &Leaf, values: &[bool]) -> bool {
    match l {
        Leaf::Lit(b) => *b,
        Leaf::Var(i) => values[*i],
    }
}

fn contexts(values: &[bool]) -> (StaticContext, DynamicContext) {
    let mut s = StaticContextBuilder::new();
    let mut d = DynamicContextBuilder::new();
    for (i, v) in values.iter().enumerate() {
        let name = ExpandedName::local(format!("v{i}"));
        s = s.with_variable(name.clone(), SeqType::BOOLEAN);
        d = d.with_variable(name, vec![XdmItem::boolean(*v)]);
    }
    (s.build(), d.build())
}

proptest! {
    #[test]
    fn simplified_boolean_algebra_matches_naive(
        groups in prop::collection::vec(prop::collection::vec(leaf(), 1..4), 1..4),
        values in prop::collection::vec(any::<bool>(), 4),
        conjunctive in any::<bool>(),
    ) {
        let (sctx, dctx) = contexts(&values);
        let (expr, expected) = if conjunctive {
            let e = and(groups.iter().map(|g| or(g.iter().map(leaf_expr).collect())).collect());
            let v = groups.iter().all(|g| g.iter().any(|l| leaf_value(l, &values)));
            (e, v)
        } else {
            let e = or(groups.iter().map(|g| and(g.iter().map(leaf_expr).collect())).collect());
            let v = groups.iter().any(|g| g.iter().all(|l| leaf_value(l, &values)));
            (e, v)
        };
        let mut unfolded_ctx = sctx.clone();
        unfolded_ctx.fold_constants = false;
        prop_assert_eq!(run(expr.clone(), &sctx, &dctx), vec![XdmItem::boolean(expected)]);
        prop_assert_eq!(run(expr, &unfolded_ctx, &dctx), vec![XdmItem::boolean(expected)]);
    }
}
