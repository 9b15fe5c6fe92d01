pub mod compiler;
pub mod engine;
pub mod index;
pub mod model;
pub mod store;
pub mod update;
pub mod xdm;

use tracing::debug;

pub use compiler::{Compiled, build, compile};
pub use engine::context::QueryContext;
pub use engine::evaluator::{Cursor, SequenceCursor};
pub use engine::runtime::{
    DeletePrecedence, DynamicContext, DynamicContextBuilder, Error, ErrorCode, ErrorKind, ExternalFunctions,
    StaticContext, StaticContextBuilder, UpdatePolicy,
};
pub use index::{Candidates, IndexProbe, IndexProvider, IndexRegistry, RangeTarget, ValueIndex};
pub use model::{NodeKind, QName, attr, comment, doc, elem, text};
pub use store::{Document, IdPreMap, SharedDocument};
pub use update::{ApplyReport, PendingUpdates, apply};
pub use xdm::{ExpandedName, NodeId, NodeRef, SeqType, XdmAtomicValue, XdmItem, XdmSequence};

/// Lazy result of [`evaluate`]. Items are pulled on demand; the first error
/// ends the iteration.
pub struct ResultIter<'a> {
    cursor: Option<Cursor<'a>>,
    ctx: QueryContext<'a>,
}

impl ResultIter<'_> {
    /// Updates registered by the evaluation so far. Intended to be called
    /// after the iterator is drained without error.
    pub fn into_pending(self) -> PendingUpdates {
        self.ctx.pending
    }

    /// Remaining items, materialised.
    pub fn finish(mut self) -> Result<(XdmSequence, PendingUpdates), Error> {
        let items = match self.cursor.take() {
            Some(cursor) => cursor.finish(&mut self.ctx)?,
            None => Vec::new(),
        };
        Ok((items, self.ctx.pending))
    }
}

impl Iterator for ResultIter<'_> {
    type Item = Result<XdmItem, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let cursor = self.cursor.as_mut()?;
        let pulled = self.ctx.check_cancelled().and_then(|()| cursor.next_item(&mut self.ctx));
        match pulled {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.cursor = None;
                None
            }
            Err(e) => {
                self.cursor = None;
                Some(Err(e))
            }
        }
    }
}

/// Opens a lazy evaluation of `compiled` against `doc`.
pub fn evaluate<'a>(
    compiled: &'a Compiled,
    doc: &'a Document,
    dynamic: &'a DynamicContext,
) -> Result<ResultIter<'a>, Error> {
    let mut ctx = QueryContext::new(Some(doc), dynamic);
    let cursor = engine::evaluator::iterate(&compiled.expr, &mut ctx)?;
    Ok(ResultIter { cursor: Some(cursor), ctx })
}

/// Evaluates `compiled` to completion. An updating expression runs under the
/// write lock and its pending updates are applied before the lock is
/// released; on error or cancellation nothing is applied.
pub fn execute(compiled: &Compiled, doc: &SharedDocument, dynamic: &DynamicContext) -> Result<XdmSequence, Error> {
    if !compiled.updating {
        let guard = doc.read()?;
        let (items, _) = evaluate(compiled, &guard, dynamic)?.finish()?;
        return Ok(items);
    }
    let mut guard = doc.write()?;
    let (items, pending) = evaluate(compiled, &guard, dynamic)?.finish()?;
    if dynamic.is_cancelled() {
        debug!(pending = pending.len(), "cancelled before apply, pending updates discarded");
        return Err(Error::cancelled());
    }
    let report = apply(&mut guard, pending)?;
    debug!(?report, version = guard.version(), "updates applied");
    Ok(items)
}
