//! Pull cursors for lazy sequence evaluation.

use super::{Cursor, iterate, predicate_matches};
use crate::compiler::ir::Expr;
use crate::engine::context::QueryContext;
use crate::engine::runtime::{Error, ErrorCode};
use crate::xdm::{XdmItem, XdmSequence};

/// Single pass over a sequence.
///
/// `size` reports the number of items still to be produced when known; `get`
/// is random access relative to the start and is only valid then. `reset`
/// restarts from the beginning and reports whether the cursor supports it.
pub trait SequenceCursor {
    fn next_item(&mut self, ctx: &mut QueryContext<'_>) -> Result<Option<XdmItem>, Error>;

    fn size(&self) -> Option<usize> {
        None
    }

    fn get(&mut self, _ctx: &mut QueryContext<'_>, _index: usize) -> Result<Option<XdmItem>, Error> {
        Err(Error::from_code(ErrorCode::BXST0001, "random access on a cursor of unknown size"))
    }

    fn reset(&mut self) -> bool {
        false
    }

    /// Drains the remaining items.
    fn finish(mut self: Box<Self>, ctx: &mut QueryContext<'_>) -> Result<XdmSequence, Error> {
        let mut out = Vec::with_capacity(self.size().unwrap_or(0));
        while let Some(item) = self.next_item(ctx)? {
            out.push(item);
        }
        Ok(out)
    }
}

/// Borrows a literal sequence of the expression tree.
pub(crate) struct SliceCursor<'e> {
    items: &'e [XdmItem],
    pos: usize,
}

impl<'e> SliceCursor<'e> {
    pub(crate) fn new(items: &'e [XdmItem]) -> Self {
        Self { items, pos: 0 }
    }
}

impl SequenceCursor for SliceCursor<'_> {
    fn next_item(&mut self, _ctx: &mut QueryContext<'_>) -> Result<Option<XdmItem>, Error> {
        let item = self.items.get(self.pos).cloned();
        self.pos += 1;
        Ok(item)
    }

    fn size(&self) -> Option<usize> {
        Some(self.items.len().saturating_sub(self.pos))
    }

    fn get(&mut self, _ctx: &mut QueryContext<'_>, index: usize) -> Result<Option<XdmItem>, Error> {
        Ok(self.items.get(self.pos + index).cloned())
    }

    fn reset(&mut self) -> bool {
        self.pos = 0;
        true
    }
}

/// Owns a computed sequence.
pub(crate) struct VecCursor {
    items: XdmSequence,
    pos: usize,
}

impl VecCursor {
    pub(crate) fn new(items: XdmSequence) -> Self {
        Self { items, pos: 0 }
    }
}

impl SequenceCursor for VecCursor {
    fn next_item(&mut self, _ctx: &mut QueryContext<'_>) -> Result<Option<XdmItem>, Error> {
        let item = self.items.get(self.pos).cloned();
        self.pos += 1;
        Ok(item)
    }

    fn size(&self) -> Option<usize> {
        Some(self.items.len().saturating_sub(self.pos))
    }

    fn get(&mut self, _ctx: &mut QueryContext<'_>, index: usize) -> Result<Option<XdmItem>, Error> {
        Ok(self.items.get(self.pos + index).cloned())
    }

    fn reset(&mut self) -> bool {
        self.pos = 0;
        true
    }

    fn finish(mut self: Box<Self>, _ctx: &mut QueryContext<'_>) -> Result<XdmSequence, Error> {
        let pos = self.pos.min(self.items.len());
        Ok(self.items.split_off(pos))
    }
}

/// `from to to`, produced without materialising.
pub(crate) struct RangeCursor {
    from: i64,
    to: i64,
    /// `None` once `to` has been produced.
    next: Option<i64>,
}

impl RangeCursor {
    pub(crate) fn new(from: i64, to: i64) -> Self {
        Self { from, to, next: (from <= to).then_some(from) }
    }
}

impl SequenceCursor for RangeCursor {
    fn next_item(&mut self, _ctx: &mut QueryContext<'_>) -> Result<Option<XdmItem>, Error> {
        let Some(v) = self.next else { return Ok(None) };
        self.next = v.checked_add(1).filter(|n| *n <= self.to);
        Ok(Some(XdmItem::integer(v)))
    }

    fn size(&self) -> Option<usize> {
        let left = self.next.map_or(0, |n| i128::from(self.to) - i128::from(n) + 1);
        Some(usize::try_from(left).unwrap_or(usize::MAX))
    }

    fn get(&mut self, _ctx: &mut QueryContext<'_>, index: usize) -> Result<Option<XdmItem>, Error> {
        let v = self.next.zip(i64::try_from(index).ok()).and_then(|(n, i)| n.checked_add(i));
        Ok(v.filter(|v| *v <= self.to).map(XdmItem::integer))
    }

    fn reset(&mut self) -> bool {
        self.next = (self.from <= self.to).then_some(self.from);
        true
    }
}

/// Concatenation of operand sequences; operands are opened one at a time.
pub(crate) struct ConcatCursor<'e> {
    parts: &'e [Expr],
    idx: usize,
    current: Option<Cursor<'e>>,
}

impl<'e> ConcatCursor<'e> {
    pub(crate) fn new(parts: &'e [Expr]) -> Self {
        Self { parts, idx: 0, current: None }
    }
}

impl<'e> SequenceCursor for ConcatCursor<'e> {
    fn next_item(&mut self, ctx: &mut QueryContext<'_>) -> Result<Option<XdmItem>, Error> {
        loop {
            if let Some(cur) = self.current.as_mut() {
                if let Some(item) = cur.next_item(ctx)? {
                    return Ok(Some(item));
                }
                self.current = None;
            }
            let Some(part) = self.parts.get(self.idx) else { return Ok(None) };
            self.idx += 1;
            self.current = Some(iterate(part, ctx)?);
        }
    }
}

/// Applies one predicate to its input.
///
/// A positional predicate over an input of known size is answered by random
/// access; over a streaming input it stops pulling after the largest
/// position. Predicates that read `last()` force the input to be buffered.
pub(crate) struct FilterCursor<'e> {
    input: Cursor<'e>,
    pred: &'e Expr,
    pos: usize,
    size: Option<usize>,
    done: bool,
}

impl<'e> FilterCursor<'e> {
    pub(crate) fn new(ctx: &mut QueryContext<'_>, input: Cursor<'e>, pred: &'e Expr) -> Result<Self, Error> {
        let (input, size) = if pred.uses_last() && input.size().is_none() {
            let items = input.finish(ctx)?;
            let n = items.len();
            (Box::new(VecCursor::new(items)) as Cursor<'e>, Some(n))
        } else {
            let n = input.size();
            (input, n)
        };
        Ok(Self { input, pred, pos: 0, size, done: false })
    }
}

impl SequenceCursor for FilterCursor<'_> {
    fn next_item(&mut self, ctx: &mut QueryContext<'_>) -> Result<Option<XdmItem>, Error> {
        if self.done {
            return Ok(None);
        }
        if let Expr::Pos(set) = self.pred {
            if let Some(n) = self.size {
                let Some(p) = set.next_after(self.pos).filter(|p| *p <= n) else {
                    self.done = true;
                    return Ok(None);
                };
                self.pos = p;
                return self.input.get(ctx, p - 1);
            }
            loop {
                if self.pos >= set.max() {
                    self.done = true;
                    return Ok(None);
                }
                let Some(item) = self.input.next_item(ctx)? else {
                    self.done = true;
                    return Ok(None);
                };
                self.pos += 1;
                if set.contains(self.pos) {
                    return Ok(Some(item));
                }
            }
        }
        while let Some(item) = self.input.next_item(ctx)? {
            self.pos += 1;
            if predicate_matches(self.pred, item.clone(), self.pos, self.size, ctx)? {
                return Ok(Some(item));
            }
        }
        self.done = true;
        Ok(None)
    }
}
