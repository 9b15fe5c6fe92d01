use std::collections::BTreeSet;
use std::sync::Arc;

use basalt_xquery::build::*;
use basalt_xquery::compiler::ir::{Expr, IndexPlan};
use basalt_xquery::update::UpdatePrimitive;
use basalt_xquery::{
    Document, DynamicContext, DynamicContextBuilder, ErrorCode, IndexProvider, NodeId, PendingUpdates, QName,
    StaticContext, StaticContextBuilder, ValueIndex, XdmItem, apply, attr, compile, elem, evaluate, text,
};
use proptest::prelude::*;
use rstest::{fixture, rstest};

const GENRES: [&str; 3] = ["a", "b", "c"];

fn library<Y: AsRef<str>>(books: &[(Y, usize)]) -> Document {
    elem("lib")
        .children(books.iter().map(|(year, genre)| {
            let year = year.as_ref();
            elem("book")
                .attr(attr("genre", GENRES[*genre]))
                .child(elem("title").child(text(&format!("t{year}"))))
                .child(elem("year").child(text(year)))
        }))
        .build()
        .unwrap()
}

/// Year spellings, including forms a numeric cast treats specially.
fn year_text() -> impl Strategy<Value = String> {
    prop_oneof![
        4 => (1995u32..2010).prop_map(|y| y.to_string()),
        1 => (1995u32..2010).prop_map(|y| format!(" {y} ")),
        1 => (1995u32..2010).prop_map(|y| format!("+{y}.0")),
        1 => prop::sample::select(vec!["inf", "Infinity", "INF", "-INF", "NaN", "2e3", ""]).prop_map(str::to_owned),
    ]
}

fn year() -> Expr {
    rel_path(vec![child("year")])
}

fn genre() -> Expr {
    rel_path(vec![attribute("genre")])
}

fn queries() -> Vec<Expr> {
    let books = |p: Expr| desc_path_where("book", vec![p]);
    vec![
        books(eq(year(), string("2004"))),
        books(eq(genre(), string("a"))),
        books(gt(year(), int(2000))),
        books(and(vec![ge(year(), int(1998)), lt(year(), int(2003))])),
        books(and(vec![eq(year(), string("2004")), eq(genre(), string("b"))])),
        books(or(vec![eq(genre(), string("a")), eq(genre(), string("c"))])),
        books(and(vec![eq(genre(), string("a")), ne(year(), string("1999"))])),
        path(books(le(year(), int(2001))), vec![child("title")]),
    ]
}

struct Setup {
    doc: Document,
    index: Arc<dyn IndexProvider>,
}

impl Setup {
    fn new(doc: Document) -> Self {
        let index: Arc<dyn IndexProvider> = Arc::new(ValueIndex::build(&doc));
        Self { doc, index }
    }

    fn rewriting(&self) -> StaticContext {
        StaticContextBuilder::new().with_indexes(self.index.clone()).build()
    }

    fn dynamic(&self) -> DynamicContext {
        DynamicContextBuilder::new().with_indexes(self.index.clone()).build()
    }

    fn try_ids(&self, expr: Expr, sctx: &StaticContext) -> Result<BTreeSet<NodeId>, ErrorCode> {
        let compiled = compile(expr, sctx).map_err(|e| e.code)?;
        let (items, _) = evaluate(&compiled, &self.doc, &self.dynamic()).and_then(|it| it.finish()).map_err(|e| e.code)?;
        Ok(items
            .iter()
            .map(|i| match i {
                XdmItem::Node(n) => n.id,
                XdmItem::Atomic(a) => panic!("unexpected atomic {a:?}"),
            })
            .collect())
    }

    fn ids(&self, expr: Expr, sctx: &StaticContext) -> BTreeSet<NodeId> {
        self.try_ids(expr, sctx).unwrap()
    }
}

#[fixture]
fn setup() -> Setup {
    Setup::new(library(&[("1999", 0), ("2004", 1), ("2004", 2), ("2001", 0), ("1995", 1)]))
}

proptest! {
    #[test]
    fn rewritten_queries_select_the_same_nodes(
        books in prop::collection::vec((year_text(), 0usize..3), 0..20),
    ) {
        let s = Setup::new(library(&books));
        let scan = StaticContextBuilder::new().with_index_rewriting(false).build();
        for q in queries() {
            prop_assert_eq!(s.try_ids(q.clone(), &s.rewriting()), s.try_ids(q, &scan));
        }
    }
}

#[rstest]
fn equality_becomes_an_index_access(setup: Setup) {
    let q = desc_path_where("book", vec![eq(genre(), string("a"))]);
    let compiled = compile(q, &setup.rewriting()).unwrap();
    let Expr::IndexAccess { plan: IndexPlan::Probe { estimate, .. }, .. } = &compiled.expr else {
        panic!("not rewritten: {:?}", compiled.expr)
    };
    assert_eq!(*estimate, 2);
}

#[rstest]
fn conjunction_keeps_inaccessible_operands_as_filter(setup: Setup) {
    let q = desc_path_where("book", vec![and(vec![eq(genre(), string("a")), ne(year(), string("1999"))])]);
    let compiled = compile(q.clone(), &setup.rewriting()).unwrap();
    let Expr::Filter { base, predicates } = &compiled.expr else { panic!("not rewritten: {:?}", compiled.expr) };
    assert!(matches!(base.as_ref(), Expr::IndexAccess { .. }));
    assert_eq!(predicates.len(), 1);
    assert_eq!(setup.ids(q, &setup.rewriting()).len(), 1);
}

#[rstest]
fn missing_value_folds_to_empty(setup: Setup) {
    let q = desc_path_where("book", vec![eq(year(), string("1850"))]);
    assert_eq!(compile(q, &setup.rewriting()).unwrap().expr, Expr::empty());
}

#[rstest]
fn positional_predicates_block_the_rewrite(setup: Setup) {
    let q = desc_path_where("book", vec![eq(genre(), string("a")), int(1)]);
    let compiled = compile(q.clone(), &setup.rewriting()).unwrap();
    assert!(!compiled.expr.any(&|e| matches!(e, Expr::IndexAccess { .. })), "rewritten: {:?}", compiled.expr);
    assert_eq!(setup.ids(q, &setup.rewriting()).len(), 1);
}

#[rstest]
#[case::lowercase_infinity("inf")]
#[case::spelled_out_infinity("Infinity")]
#[case::empty("")]
fn values_the_cast_rejects_keep_the_scan(#[case] odd: &str) {
    let s = Setup::new(library(&[(odd, 0), ("1999", 1), ("2004", 2)]));
    let q = desc_path_where("book", vec![gt(year(), int(2000))]);
    let compiled = compile(q.clone(), &s.rewriting()).unwrap();
    assert!(!compiled.expr.any(&|e| matches!(e, Expr::IndexAccess { .. })), "rewritten: {:?}", compiled.expr);
    assert_eq!(s.try_ids(q, &s.rewriting()), Err(ErrorCode::FORG0001));
}

#[rstest]
fn infinite_years_are_range_indexed() {
    let s = Setup::new(library(&[("INF", 0), ("1999", 1), ("+2004.0", 2)]));
    let q = desc_path_where("book", vec![gt(year(), int(2000))]);
    let compiled = compile(q.clone(), &s.rewriting()).unwrap();
    assert!(matches!(compiled.expr, Expr::IndexAccess { .. }), "not rewritten: {:?}", compiled.expr);
    assert_eq!(s.ids(q, &s.rewriting()).len(), 2);
}

#[rstest]
fn stale_index_is_reported(setup: Setup) {
    let Setup { mut doc, index } = setup;
    let sctx = StaticContextBuilder::new().with_indexes(index.clone()).build();
    let compiled = compile(desc_path_where("book", vec![eq(genre(), string("a"))]), &sctx).unwrap();

    let mut pending = PendingUpdates::default();
    pending.add(doc.node(1).id, UpdatePrimitive::Rename(QName::local("library"))).unwrap();
    apply(&mut doc, pending).unwrap();

    let dctx = DynamicContextBuilder::new().with_indexes(index).build();
    let err = evaluate(&compiled, &doc, &dctx).and_then(|it| it.finish()).unwrap_err();
    assert_eq!(err.code, ErrorCode::BXIX0001);
}
