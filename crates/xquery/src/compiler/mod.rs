use tracing::debug;

use crate::engine::runtime::{Error, ErrorCode, StaticContext};
use crate::xdm::{ExpandedName, Occurrence, SeqType, XdmSequence};

pub mod build;
mod index;
pub mod ir;
mod rewrite;

use ir::{Binding, Builtin, Clause, Expr, Flwor, QuantifierKind, VarId};

/// A compiled expression tree, ready for evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Compiled {
    pub expr: Expr,
    /// The tree contains updating expressions.
    pub updating: bool,
}

/// Resolves variables, checks function arities and rewrites `expr` into an
/// equivalent, cheaper tree. Compiling an already compiled tree is a no-op
/// apart from further simplification.
pub fn compile(expr: Expr, static_ctx: &StaticContext) -> Result<Compiled, Error> {
    let mut c = Compiler::new(static_ctx, expr.max_var_id());
    let mut expr = c.compile_expr(expr)?;
    if static_ctx.rewrite_indexes
        && let Some(provider) = static_ctx.indexes.as_deref()
    {
        expr = index::rewrite(expr, provider);
    }
    let updating = expr.is_updating();
    debug!(updating, vars = c.next_var, "compiled");
    Ok(Compiled { expr, updating })
}

#[derive(Debug, Clone)]
enum Scoped {
    Local(VarId, SeqType),
    /// A `let` bound to a literal, substituted at every reference.
    Inline(XdmSequence),
}

struct Compiler<'a> {
    static_ctx: &'a StaticContext,
    scope: Vec<(ExpandedName, Scoped)>,
    next_var: VarId,
}

type CResult<T> = Result<T, Error>;

/// Outcome of compiling a clause list.
enum Clauses {
    Tuples(Vec<Clause>),
    /// Statically no tuple is produced.
    None,
}

impl<'a> Compiler<'a> {
    fn new(static_ctx: &'a StaticContext, max_var: VarId) -> Self {
        Self { static_ctx, scope: Vec::new(), next_var: max_var + 1 }
    }

    fn fold(&self) -> bool {
        self.static_ctx.fold_constants
    }

    fn bind(&mut self, var: &mut Binding, ty: SeqType) {
        if var.id == 0 {
            var.id = self.next_var;
            self.next_var += 1;
        }
        self.scope.push((var.name.clone(), Scoped::Local(var.id, ty)));
    }

    fn resolve(&self, name: ExpandedName) -> CResult<Expr> {
        if let Some((_, s)) = self.scope.iter().rev().find(|(n, _)| *n == name) {
            return Ok(match s {
                Scoped::Local(id, ty) => Expr::LocalVar { name, id: *id, ty: *ty },
                Scoped::Inline(items) => Expr::Value(items.clone()),
            });
        }
        match self.static_ctx.variables.get(&name) {
            Some(ty) => Ok(Expr::ExternalVar { ty: *ty, name }),
            None => Err(Error::from_code(ErrorCode::XPST0008, format!("variable ${name} is not declared"))),
        }
    }

    fn compile_box(&mut self, e: &mut Box<Expr>) -> CResult<()> {
        let inner = core::mem::replace(e.as_mut(), Expr::empty());
        **e = self.compile_expr(inner)?;
        Ok(())
    }

    fn compile_predicates(&mut self, preds: Vec<Expr>) -> CResult<Vec<Expr>> {
        let mut out = Vec::with_capacity(preds.len());
        for p in preds {
            out.push(rewrite::positional_predicate(self.compile_expr(p)?));
        }
        Ok(rewrite::prune_predicates(out))
    }

    fn compile_expr(&mut self, expr: Expr) -> CResult<Expr> {
        let compiled = match expr {
            Expr::Var(name) => return self.resolve(name),
            Expr::Flwor(f) => return self.compile_flwor(*f),
            Expr::Quantified { kind, clauses, satisfies } => return self.compile_quantified(kind, clauses, *satisfies),
            Expr::Call { func, args } => {
                let (min, max) = func.arity();
                if args.len() < min || args.len() > max {
                    return Err(Error::from_code(
                        ErrorCode::XPST0017,
                        format!("{func:?} does not accept {} arguments", args.len()),
                    ));
                }
                let args = args.into_iter().map(|a| self.compile_expr(a)).collect::<CResult<Vec<_>>>()?;
                Expr::Call { func, args }
            }
            Expr::Filter { mut base, predicates } => {
                self.compile_box(&mut base)?;
                Expr::Filter { base, predicates: self.compile_predicates(predicates)? }
            }
            Expr::Path { base, steps } => {
                let base = match base {
                    Some(mut b) => {
                        self.compile_box(&mut b)?;
                        Some(b)
                    }
                    None => None,
                };
                let mut out = Vec::with_capacity(steps.len());
                for mut step in steps {
                    step.predicates = self.compile_predicates(core::mem::take(&mut step.predicates))?;
                    out.push(step);
                }
                Expr::Path { base, steps: out }
            }
            mut other => {
                for child in other.children_mut() {
                    let inner = core::mem::replace(child, Expr::empty());
                    *child = self.compile_expr(inner)?;
                }
                other
            }
        };
        Ok(rewrite::simplify(compiled, self.fold()))
    }

    /// Compiles clauses in order, leaving their bindings in scope.
    fn compile_clauses(&mut self, clauses: Vec<Clause>) -> CResult<Clauses> {
        let mut out = Vec::with_capacity(clauses.len());
        let mut bound: Vec<VarId> = Vec::new();
        let invariant = |e: &Expr, bound: &[VarId]| {
            let mut refs = Vec::new();
            e.referenced_vars(&mut refs);
            e.is_deterministic() && !refs.iter().any(|r| bound.contains(r))
        };
        for clause in clauses {
            match clause {
                Clause::For { mut var, mut at, source, .. } => {
                    let source = self.compile_expr(source)?;
                    let ty = source.seq_type();
                    if ty.empty {
                        debug!(var = %var.name, "for over an empty sequence");
                        return Ok(Clauses::None);
                    }
                    let inv = invariant(&source, &bound);
                    self.bind(&mut var, SeqType::new(ty.item, Occurrence::ExactlyOne));
                    bound.push(var.id);
                    if let Some(a) = at.as_mut() {
                        self.bind(a, SeqType::INTEGER);
                        bound.push(a.id);
                    }
                    out.push(Clause::For { var, at, source, invariant: inv });
                }
                Clause::Let { mut var, value, .. } => {
                    let value = self.compile_expr(value)?;
                    if self.fold()
                        && let Expr::Value(items) = &value
                    {
                        debug!(var = %var.name, "let inlined");
                        self.scope.push((var.name.clone(), Scoped::Inline(items.clone())));
                        continue;
                    }
                    let inv = invariant(&value, &bound);
                    self.bind(&mut var, value.seq_type());
                    bound.push(var.id);
                    out.push(Clause::Let { var, value, invariant: inv });
                }
                Clause::Where(cond) => {
                    let cond = self.compile_expr(cond)?;
                    match cond.literal_bool() {
                        Some(false) if self.fold() => {
                            debug!("where clause is always false");
                            return Ok(Clauses::None);
                        }
                        Some(true) if self.fold() => {}
                        _ => out.push(Clause::Where(cond)),
                    }
                }
            }
        }
        Ok(Clauses::Tuples(out))
    }

    fn compile_flwor(&mut self, f: Flwor) -> CResult<Expr> {
        let mark = self.scope.len();
        let out = self.compile_flwor_scoped(f);
        self.scope.truncate(mark);
        out
    }

    fn compile_flwor_scoped(&mut self, f: Flwor) -> CResult<Expr> {
        let Clauses::Tuples(clauses) = self.compile_clauses(f.clauses)? else {
            return Ok(Expr::empty());
        };
        let mut order_by = f.order_by;
        for spec in &mut order_by {
            let key = core::mem::replace(&mut spec.key, Expr::empty());
            spec.key = self.compile_expr(key)?;
        }
        let ret = self.compile_expr(f.ret)?;
        if clauses.is_empty() {
            // a single tuple; ordering is irrelevant
            return Ok(ret);
        }
        Ok(Expr::Flwor(Box::new(Flwor { clauses, order_by, ret })))
    }

    fn compile_quantified(&mut self, kind: QuantifierKind, clauses: Vec<Clause>, satisfies: Expr) -> CResult<Expr> {
        let mark = self.scope.len();
        let out = self.compile_quantified_scoped(kind, clauses, satisfies);
        self.scope.truncate(mark);
        out
    }

    fn compile_quantified_scoped(
        &mut self,
        kind: QuantifierKind,
        clauses: Vec<Clause>,
        satisfies: Expr,
    ) -> CResult<Expr> {
        let every = matches!(kind, QuantifierKind::Every);
        let Clauses::Tuples(clauses) = self.compile_clauses(clauses)? else {
            return Ok(Expr::boolean(every));
        };
        let satisfies = self.compile_expr(satisfies)?;
        if clauses.is_empty() {
            return Ok(rewrite::simplify(Expr::Call { func: Builtin::Boolean, args: vec![satisfies] }, self.fold()));
        }
        Ok(Expr::Quantified { kind, clauses, satisfies: Box::new(satisfies) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::runtime::StaticContextBuilder;
    use crate::xdm::XdmItem;
    use build::*;

    #[test]
    fn unknown_variable_is_static_error() {
        let err = compile(var("nope"), &StaticContext::default()).unwrap_err();
        assert_eq!(err.code, ErrorCode::XPST0008);
    }

    #[test]
    fn arity_is_checked() {
        let err = compile(call("count", vec![]), &StaticContext::default()).unwrap_err();
        assert_eq!(err.code, ErrorCode::XPST0017);
    }

    #[test]
    fn literal_let_is_inlined_and_flwor_disappears() {
        let e = flwor(vec![let_("x", int(2))], arith(ir::ArithOp::Add, var("x"), int(1)));
        let c = compile(e, &StaticContext::default()).unwrap();
        assert_eq!(c.expr, Expr::Value(vec![XdmItem::integer(3)]));
    }

    #[test]
    fn empty_for_source_folds_flwor() {
        let e = flwor(vec![for_("x", empty())], var("x"));
        assert_eq!(compile(e, &StaticContext::default()).unwrap().expr, Expr::empty());
    }

    #[test]
    fn contradictory_range_folds_to_false() {
        let ctx = StaticContextBuilder::new().with_variable(ExpandedName::local("x"), SeqType::INTEGER).build();
        let e = and(vec![gt(var("x"), int(3)), lt(var("x"), int(3))]);
        assert_eq!(compile(e, &ctx).unwrap().expr, Expr::boolean(false));
    }

    #[test]
    fn compile_is_idempotent() {
        let e = flwor(vec![for_("x", range(int(1), int(3)))], arith(ir::ArithOp::Mul, var("x"), var("x")));
        let once = compile(e, &StaticContext::default()).unwrap();
        let twice = compile(once.expr.clone(), &StaticContext::default()).unwrap();
        assert_eq!(once, twice);
    }
}
