//! FLWOR and quantified expressions.
//!
//! Clauses produce a stream of variable tuples. `for` sources are pulled one
//! item at a time; a source that does not depend on earlier clauses keeps its
//! cursor and rewinds it instead of being rebuilt. Without `order by` the
//! return clause streams too.

use core::cmp::Ordering;

use super::comparison::order_key_compare;
use super::cursors::VecCursor;
use super::{Cursor, SequenceCursor, atomize, ebv, evaluate, iterate};
use crate::compiler::ir::{Clause, Expr, Flwor, QuantifierKind, VarId};
use crate::engine::context::QueryContext;
use crate::engine::runtime::{Error, ErrorCode};
use crate::xdm::{XdmAtomicValue, XdmItem, XdmSequence};

enum ClauseState<'e> {
    For { cursor: Option<Cursor<'e>>, pos: usize },
    Let { cached: Option<XdmSequence> },
    Where,
}

/// Tuple generator over a clause list. Bindings are pushed onto the variable
/// stack above `mark`; after a successful `advance` every clause is bound.
struct TupleStream<'e> {
    clauses: &'e [Clause],
    states: Vec<ClauseState<'e>>,
    /// Stack height (relative to the mark) before each clause bound.
    offsets: Vec<usize>,
    started: bool,
    done: bool,
}

impl<'e> TupleStream<'e> {
    fn new(clauses: &'e [Clause]) -> Self {
        let states = clauses
            .iter()
            .map(|c| match c {
                Clause::For { .. } => ClauseState::For { cursor: None, pos: 0 },
                Clause::Let { .. } => ClauseState::Let { cached: None },
                Clause::Where(_) => ClauseState::Where,
            })
            .collect();
        Self { clauses, states, offsets: vec![0; clauses.len()], started: false, done: false }
    }

    /// Unbinds down to the closest `for` clause before `from`.
    fn backtrack(&mut self, from: usize, ctx: &mut QueryContext<'_>, mark: usize) -> Option<usize> {
        let j = self.clauses[..from].iter().rposition(|c| matches!(c, Clause::For { .. }))?;
        ctx.vars.reset(mark + self.offsets[j]);
        Some(j)
    }

    fn advance(&mut self, ctx: &mut QueryContext<'_>, mark: usize) -> Result<bool, Error> {
        if self.done {
            return Ok(false);
        }
        let clauses = self.clauses;
        let (mut i, mut resume) = if self.started {
            match self.backtrack(clauses.len(), ctx, mark) {
                Some(j) => (j, true),
                None => {
                    self.done = true;
                    return Ok(false);
                }
            }
        } else {
            self.started = true;
            (0, false)
        };

        while i < clauses.len() {
            if !resume {
                self.offsets[i] = ctx.vars.mark() - mark;
            }
            let bound = match (&clauses[i], &mut self.states[i]) {
                (Clause::For { var, at, source, invariant }, ClauseState::For { cursor, pos }) => {
                    ctx.check_cancelled()?;
                    if !resume {
                        let rewound = *invariant && cursor.as_mut().is_some_and(|c| c.reset());
                        if !rewound {
                            *cursor = Some(iterate(source, ctx)?);
                        }
                        *pos = 0;
                    }
                    let next = match cursor.as_mut() {
                        Some(c) => c.next_item(ctx)?,
                        None => None,
                    };
                    match next {
                        Some(item) => {
                            *pos += 1;
                            ctx.vars.push(var.id, vec![item]);
                            if let Some(at) = at {
                                ctx.vars.push(at.id, vec![XdmItem::integer(*pos as i64)]);
                            }
                            true
                        }
                        None => {
                            if !*invariant {
                                *cursor = None;
                            }
                            false
                        }
                    }
                }
                (Clause::Let { var, value, invariant }, ClauseState::Let { cached }) => {
                    let v = match cached {
                        Some(v) => v.clone(),
                        None => {
                            let v = evaluate(value, ctx)?;
                            if *invariant {
                                *cached = Some(v.clone());
                            }
                            v
                        }
                    };
                    ctx.vars.push(var.id, v);
                    true
                }
                (Clause::Where(cond), _) => ebv(cond, ctx)?,
                _ => return Err(Error::from_code(ErrorCode::BXST0001, "clause state out of step")),
            };
            if bound {
                i += 1;
                resume = false;
            } else {
                match self.backtrack(i, ctx, mark) {
                    Some(j) => {
                        i = j;
                        resume = true;
                    }
                    None => {
                        self.done = true;
                        return Ok(false);
                    }
                }
            }
        }
        Ok(true)
    }
}

/// Streaming FLWOR without `order by`. Its bindings are parked in `frame`
/// between pulls.
struct FlworCursor<'e> {
    flwor: &'e Flwor,
    stream: TupleStream<'e>,
    current: Option<Cursor<'e>>,
    frame: Vec<(VarId, XdmSequence)>,
}

impl<'e> FlworCursor<'e> {
    fn pull(&mut self, ctx: &mut QueryContext<'_>, mark: usize) -> Result<Option<XdmItem>, Error> {
        loop {
            if let Some(cur) = self.current.as_mut() {
                if let Some(item) = cur.next_item(ctx)? {
                    return Ok(Some(item));
                }
                self.current = None;
            }
            if !self.stream.advance(ctx, mark)? {
                return Ok(None);
            }
            self.current = Some(iterate(&self.flwor.ret, ctx)?);
        }
    }
}

impl SequenceCursor for FlworCursor<'_> {
    fn next_item(&mut self, ctx: &mut QueryContext<'_>) -> Result<Option<XdmItem>, Error> {
        let mark = ctx.vars.restore(&mut self.frame);
        let out = self.pull(ctx, mark);
        ctx.vars.save(mark, &mut self.frame);
        out
    }
}

pub(crate) fn iterate_flwor<'e>(flwor: &'e Flwor, ctx: &mut QueryContext<'_>) -> Result<Cursor<'e>, Error> {
    if flwor.order_by.is_empty() {
        return Ok(Box::new(FlworCursor {
            flwor,
            stream: TupleStream::new(&flwor.clauses),
            current: None,
            frame: Vec::new(),
        }));
    }
    let mark = ctx.vars.mark();
    let out = eval_ordered(flwor, ctx, mark);
    ctx.vars.reset(mark);
    Ok(Box::new(VecCursor::new(out?)))
}

type Row = (Vec<Option<XdmAtomicValue>>, XdmSequence);

fn order_key(key: &Expr, ctx: &mut QueryContext<'_>) -> Result<Option<XdmAtomicValue>, Error> {
    let items = evaluate(key, ctx)?;
    if items.len() > 1 {
        return Err(Error::from_code(ErrorCode::XPTY0004, "order by key has more than one item").with_items(&items));
    }
    Ok(atomize(&items, ctx)?.into_iter().next().map(|v| match v {
        XdmAtomicValue::UntypedAtomic(s) => XdmAtomicValue::String(s),
        other => other,
    }))
}

fn eval_ordered(flwor: &Flwor, ctx: &mut QueryContext<'_>, mark: usize) -> Result<XdmSequence, Error> {
    let mut stream = TupleStream::new(&flwor.clauses);
    let mut rows: Vec<Row> = Vec::new();
    while stream.advance(ctx, mark)? {
        let mut keys = Vec::with_capacity(flwor.order_by.len());
        for spec in &flwor.order_by {
            keys.push(order_key(&spec.key, ctx)?);
        }
        rows.push((keys, evaluate(&flwor.ret, ctx)?));
    }

    let mut failure: Option<Error> = None;
    // stable: equal keys keep tuple order
    rows.sort_by(|(a, _), (b, _)| {
        for (spec, (x, y)) in flwor.order_by.iter().zip(a.iter().zip(b)) {
            let empty_first = if spec.empty_greatest { Ordering::Greater } else { Ordering::Less };
            let ord = match (x, y) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => empty_first,
                (Some(_), None) => empty_first.reverse(),
                (Some(x), Some(y)) => order_key_compare(x, y).unwrap_or_else(|e| {
                    failure.get_or_insert(e);
                    Ordering::Equal
                }),
            };
            let ord = if spec.descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
    if let Some(e) = failure {
        return Err(e);
    }
    Ok(rows.into_iter().flat_map(|(_, items)| items).collect())
}

/// `some`/`every`: stops at the first deciding tuple. An empty binding
/// sequence gives `false` for `some` and `true` for `every`.
pub(crate) fn eval_quantified(
    kind: QuantifierKind,
    clauses: &[Clause],
    satisfies: &Expr,
    ctx: &mut QueryContext<'_>,
) -> Result<bool, Error> {
    let mark = ctx.vars.mark();
    let out = quantify(kind, clauses, satisfies, ctx, mark);
    ctx.vars.reset(mark);
    out
}

fn quantify(
    kind: QuantifierKind,
    clauses: &[Clause],
    satisfies: &Expr,
    ctx: &mut QueryContext<'_>,
    mark: usize,
) -> Result<bool, Error> {
    let every = matches!(kind, QuantifierKind::Every);
    let mut stream = TupleStream::new(clauses);
    while stream.advance(ctx, mark)? {
        if ebv(satisfies, ctx)? != every {
            return Ok(!every);
        }
    }
    Ok(every)
}
