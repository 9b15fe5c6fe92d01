use core::fmt;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::index::IndexProvider;
use crate::xdm::{ExpandedName, SeqType, XdmItem, XdmSequence};

/// Error taxonomy. Every [`ErrorCode`] belongs to exactly one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    StaticType,
    DynamicType,
    Cardinality,
    EmptySequence,
    Arithmetic,
    IndexState,
    UpdateConflict,
    PositionResolution,
    Cancelled,
    Invariant,
}

/// Stable error codes. W3C codes where the condition has one, `BX*` codes for
/// engine-specific conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    XPST0008, // undeclared variable
    XPST0017, // unknown function / wrong arity
    XPST0005, // expression statically typed as something that cannot match
    XPTY0004, // type error
    XPDY0002, // context item absent
    XPDY0050, // treat as: item type mismatch
    FORG0001, // invalid value for cast
    FORG0003, // zero-or-one violated
    FORG0004, // one-or-more violated
    FORG0005, // exactly-one violated
    FORG0006, // invalid argument for effective boolean value
    FOAR0001, // division by zero
    FOAR0002, // numeric overflow
    FOER0000, // unidentified error
    XUTY0005, // insert target must be a single element/document
    XUTY0006, // insert before/after target must be a single child node
    XUTY0007, // delete target must be nodes
    XUTY0008, // replace target must be a single node
    XUTY0010, // replacement of a non-attribute contains attributes
    XUTY0011, // replacement of an attribute contains non-attributes
    XUTY0012, // rename target must be element/attribute/PI
    XUTY0022, // attribute insert into non-element
    XUDY0009, // replace target has no parent
    XUDY0015, // node renamed twice
    XUDY0016, // node replaced twice
    XUDY0017, // node value replaced twice
    XUDY0021, // duplicate attribute after update
    XUDY0027, // empty update target
    XUDY0029, // insert before/after target has no parent
    BXIX0001, // index missing or stale
    BXUP0001, // node id no longer live
    BXCN0001, // evaluation cancelled
    BXST0001, // storage invariant violated
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        use ErrorCode::*;
        match self {
            XPST0008 => "err:XPST0008",
            XPST0017 => "err:XPST0017",
            XPST0005 => "err:XPST0005",
            XPTY0004 => "err:XPTY0004",
            XPDY0002 => "err:XPDY0002",
            XPDY0050 => "err:XPDY0050",
            FORG0001 => "err:FORG0001",
            FORG0003 => "err:FORG0003",
            FORG0004 => "err:FORG0004",
            FORG0005 => "err:FORG0005",
            FORG0006 => "err:FORG0006",
            FOAR0001 => "err:FOAR0001",
            FOAR0002 => "err:FOAR0002",
            FOER0000 => "err:FOER0000",
            XUTY0005 => "err:XUTY0005",
            XUTY0006 => "err:XUTY0006",
            XUTY0007 => "err:XUTY0007",
            XUTY0008 => "err:XUTY0008",
            XUTY0010 => "err:XUTY0010",
            XUTY0011 => "err:XUTY0011",
            XUTY0012 => "err:XUTY0012",
            XUTY0022 => "err:XUTY0022",
            XUDY0009 => "err:XUDY0009",
            XUDY0015 => "err:XUDY0015",
            XUDY0016 => "err:XUDY0016",
            XUDY0017 => "err:XUDY0017",
            XUDY0021 => "err:XUDY0021",
            XUDY0027 => "err:XUDY0027",
            XUDY0029 => "err:XUDY0029",
            BXIX0001 => "bx:BXIX0001",
            BXUP0001 => "bx:BXUP0001",
            BXCN0001 => "bx:BXCN0001",
            BXST0001 => "bx:BXST0001",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        use ErrorCode::*;
        match self {
            XPST0008 | XPST0017 | XPST0005 => ErrorKind::StaticType,
            XPTY0004 | XPDY0002 | XPDY0050 | FORG0001 | FORG0006 | FOER0000 => ErrorKind::DynamicType,
            XUTY0005 | XUTY0006 | XUTY0007 | XUTY0008 | XUTY0010 | XUTY0011 | XUTY0012 | XUTY0022 => {
                ErrorKind::DynamicType
            }
            XUDY0009 | XUDY0029 => ErrorKind::DynamicType,
            FORG0003 | FORG0004 | FORG0005 => ErrorKind::Cardinality,
            XUDY0027 => ErrorKind::EmptySequence,
            FOAR0001 | FOAR0002 => ErrorKind::Arithmetic,
            XUDY0015 | XUDY0016 | XUDY0017 | XUDY0021 => ErrorKind::UpdateConflict,
            BXIX0001 => ErrorKind::IndexState,
            BXUP0001 => ErrorKind::PositionResolution,
            BXCN0001 => ErrorKind::Cancelled,
            BXST0001 => ErrorKind::Invariant,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const PREVIEW_ITEMS: usize = 3;
const PREVIEW_CHARS: usize = 80;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    /// Bounded rendering of the offending items or expression fragment.
    pub preview: Option<String>,
}

impl Error {
    pub fn from_code(code: ErrorCode, msg: impl Into<String>) -> Self {
        Self { code, message: msg.into(), preview: None }
    }

    pub fn kind(&self) -> ErrorKind {
        self.code.kind()
    }

    pub fn code_enum(&self) -> ErrorCode {
        self.code
    }

    pub fn is_static(&self) -> bool {
        self.kind() == ErrorKind::StaticType
    }

    /// Attaches a preview, truncated to a fixed number of characters.
    pub fn with_preview(mut self, preview: impl Into<String>) -> Self {
        let p: String = preview.into();
        self.preview = Some(if p.chars().count() > PREVIEW_CHARS {
            let mut cut: String = p.chars().take(PREVIEW_CHARS).collect();
            cut.push_str("...");
            cut
        } else {
            p
        });
        self
    }

    /// Attaches a preview of up to three items; a fourth is rendered as `...`.
    pub fn with_items(self, items: &[XdmItem]) -> Self {
        let mut parts: Vec<String> = items.iter().take(PREVIEW_ITEMS).map(ToString::to_string).collect();
        if items.len() > PREVIEW_ITEMS {
            parts.push("...".to_string());
        }
        self.with_preview(format!("({})", parts.join(", ")))
    }

    pub fn cancelled() -> Self {
        Self::from_code(ErrorCode::BXCN0001, "evaluation cancelled")
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)?;
        if let Some(p) = &self.preview {
            write!(f, " [{p}]")?;
        }
        Ok(())
    }
}

/// Narrow capability for calling host-provided functions. The engine never
/// folds these calls at compile time.
pub trait ExternalFunctions: Send + Sync {
    fn call(&self, name: &ExpandedName, args: &[XdmSequence]) -> Result<XdmItem, Error>;
}

/// Precedence between a pending delete and other primitives on the same target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeletePrecedence {
    /// Delete discards renames, value replacements and inserts into the
    /// target. A pending node replacement still places its content.
    #[default]
    Standard,
    /// Delete also discards a pending node replacement of the target.
    DeleteWins,
    /// Registering a delete together with a rename, node replacement or value
    /// replacement of the same target is an update conflict.
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdatePolicy {
    pub delete_precedence: DeletePrecedence,
}

#[derive(Clone)]
pub struct StaticContext {
    pub fold_constants: bool,
    pub rewrite_indexes: bool,
    /// Declared types of external variables.
    pub variables: HashMap<ExpandedName, SeqType>,
    /// Index statistics used for compile-time accessibility analysis.
    pub indexes: Option<Arc<dyn IndexProvider>>,
}

impl fmt::Debug for StaticContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticContext")
            .field("fold_constants", &self.fold_constants)
            .field("rewrite_indexes", &self.rewrite_indexes)
            .field("variables", &self.variables)
            .field("indexes", &self.indexes.is_some())
            .finish()
    }
}

impl Default for StaticContext {
    fn default() -> Self {
        Self { fold_constants: true, rewrite_indexes: true, variables: HashMap::new(), indexes: None }
    }
}

pub struct StaticContextBuilder {
    ctx: StaticContext,
}

impl Default for StaticContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticContextBuilder {
    pub fn new() -> Self {
        Self { ctx: StaticContext::default() }
    }

    pub fn with_constant_folding(mut self, on: bool) -> Self {
        self.ctx.fold_constants = on;
        self
    }

    pub fn with_index_rewriting(mut self, on: bool) -> Self {
        self.ctx.rewrite_indexes = on;
        self
    }

    /// Declares an external variable with its static type.
    pub fn with_variable(mut self, name: ExpandedName, ty: SeqType) -> Self {
        self.ctx.variables.insert(name, ty);
        self
    }

    pub fn with_indexes(mut self, indexes: Arc<dyn IndexProvider>) -> Self {
        self.ctx.indexes = Some(indexes);
        self
    }

    pub fn build(self) -> StaticContext {
        self.ctx
    }
}

#[derive(Clone, Default)]
pub struct DynamicContext {
    pub context_item: Option<XdmItem>,
    pub variables: HashMap<ExpandedName, XdmSequence>,
    pub indexes: Option<Arc<dyn IndexProvider>>,
    pub externals: Option<Arc<dyn ExternalFunctions>>,
    pub cancel_flag: Option<Arc<AtomicBool>>,
    pub update_policy: UpdatePolicy,
}

impl DynamicContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancel_flag.as_ref().is_some_and(|f| f.load(Ordering::Relaxed))
    }
}

impl fmt::Debug for DynamicContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicContext")
            .field("context_item", &self.context_item)
            .field("variables", &self.variables)
            .field("indexes", &self.indexes.is_some())
            .field("externals", &self.externals.is_some())
            .field("update_policy", &self.update_policy)
            .finish()
    }
}

#[derive(Default)]
pub struct DynamicContextBuilder {
    ctx: DynamicContext,
}

impl DynamicContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context_item(mut self, item: impl Into<XdmItem>) -> Self {
        self.ctx.context_item = Some(item.into());
        self
    }

    pub fn with_variable(mut self, name: ExpandedName, value: impl Into<XdmSequence>) -> Self {
        self.ctx.variables.insert(name, value.into());
        self
    }

    pub fn with_indexes(mut self, indexes: Arc<dyn IndexProvider>) -> Self {
        self.ctx.indexes = Some(indexes);
        self
    }

    pub fn with_externals(mut self, externals: Arc<dyn ExternalFunctions>) -> Self {
        self.ctx.externals = Some(externals);
        self
    }

    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.ctx.cancel_flag = Some(flag);
        self
    }

    pub fn with_update_policy(mut self, policy: UpdatePolicy) -> Self {
        self.ctx.update_policy = policy;
        self
    }

    pub fn build(self) -> DynamicContext {
        self.ctx
    }
}
