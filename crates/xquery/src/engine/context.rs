use crate::compiler::ir::VarId;
use crate::engine::runtime::{DynamicContext, Error, ErrorCode};
use crate::store::Document;
use crate::update::PendingUpdates;
use crate::xdm::{XdmItem, XdmSequence};

/// Variable bindings of the running evaluation.
///
/// Binding forms record `mark()` before pushing and call `reset(mark)` on
/// scope exit. Ids are unique per compiled tree, so a lookup from the top
/// finds the innermost live binding.
#[derive(Debug, Default)]
pub struct VarStack {
    slots: Vec<(VarId, XdmSequence)>,
}

impl VarStack {
    pub fn mark(&self) -> usize {
        self.slots.len()
    }

    pub fn push(&mut self, id: VarId, value: XdmSequence) {
        self.slots.push((id, value));
    }

    pub fn reset(&mut self, mark: usize) {
        self.slots.truncate(mark);
    }

    pub fn lookup(&self, id: VarId) -> Option<&XdmSequence> {
        self.slots.iter().rev().find(|(v, _)| *v == id).map(|(_, s)| s)
    }

    /// Moves the bindings held by a suspended cursor onto the stack.
    pub fn restore(&mut self, frame: &mut Vec<(VarId, XdmSequence)>) -> usize {
        let mark = self.mark();
        self.slots.append(frame);
        mark
    }

    /// Moves everything above `mark` back into `frame`.
    pub fn save(&mut self, mark: usize, frame: &mut Vec<(VarId, XdmSequence)>) {
        frame.extend(self.slots.drain(mark..));
    }
}

/// Context item, position and size. `size` is `None` while unknown.
#[derive(Debug, Clone)]
pub struct Focus {
    pub item: XdmItem,
    pub position: usize,
    pub size: Option<usize>,
}

/// Per-execution state. Created for one evaluation and dropped at its end.
pub struct QueryContext<'d> {
    doc: Option<&'d Document>,
    pub dynamic: &'d DynamicContext,
    pub vars: VarStack,
    focus: Option<Focus>,
    pub pending: PendingUpdates,
}

impl<'d> QueryContext<'d> {
    pub fn new(doc: Option<&'d Document>, dynamic: &'d DynamicContext) -> Self {
        let focus =
            dynamic.context_item.clone().map(|item| Focus { item, position: 1, size: Some(1) });
        Self { doc, dynamic, vars: VarStack::default(), focus, pending: PendingUpdates::new(dynamic.update_policy) }
    }

    pub fn doc(&self) -> Result<&'d Document, Error> {
        self.doc.ok_or_else(|| Error::from_code(ErrorCode::XPDY0002, "no document is bound to this evaluation"))
    }

    pub fn focus(&self) -> Result<&Focus, Error> {
        self.focus.as_ref().ok_or_else(|| Error::from_code(ErrorCode::XPDY0002, "context item is absent"))
    }

    /// Runs `f` with `focus` installed, restoring the previous focus after.
    pub fn with_focus<T>(&mut self, focus: Focus, f: impl FnOnce(&mut Self) -> Result<T, Error>) -> Result<T, Error> {
        let saved = self.focus.replace(focus);
        let out = f(self);
        self.focus = saved;
        out
    }

    pub fn check_cancelled(&self) -> Result<(), Error> {
        if self.dynamic.is_cancelled() { Err(Error::cancelled()) } else { Ok(()) }
    }

    pub fn take_pending(&mut self) -> PendingUpdates {
        core::mem::replace(&mut self.pending, PendingUpdates::new(self.dynamic.update_policy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_and_reset_scope() {
        let mut vars = VarStack::default();
        vars.push(1, vec![XdmItem::integer(1)]);
        let mark = vars.mark();
        vars.push(2, vec![XdmItem::integer(2)]);
        vars.push(1, vec![XdmItem::integer(3)]);
        assert_eq!(vars.lookup(1), Some(&vec![XdmItem::integer(3)]));
        vars.reset(mark);
        assert_eq!(vars.lookup(1), Some(&vec![XdmItem::integer(1)]));
        assert_eq!(vars.lookup(2), None);
    }

    #[test]
    fn save_and_restore_round_trip() {
        let mut vars = VarStack::default();
        let mut frame = vec![(7, vec![XdmItem::integer(7)])];
        let mark = vars.restore(&mut frame);
        assert!(frame.is_empty());
        assert!(vars.lookup(7).is_some());
        vars.save(mark, &mut frame);
        assert_eq!(frame.len(), 1);
        assert!(vars.lookup(7).is_none());
    }
}
