use super::{atomize, atomize_opt, cardinality_error, ebv, evaluate, iterate, numeric, string_value};
use crate::compiler::ir::{ArithOp, Builtin, Expr};
use crate::engine::context::QueryContext;
use crate::engine::runtime::{Error, ErrorCode};
use crate::xdm::{Occurrence, XdmAtomicValue, XdmItem, XdmSequence};

fn arg(args: &[Expr], i: usize) -> Result<&Expr, Error> {
    args.get(i).ok_or_else(|| Error::from_code(ErrorCode::XPST0017, format!("missing argument {}", i + 1)))
}

fn one(item: XdmItem) -> Result<XdmSequence, Error> {
    Ok(vec![item])
}

fn string_arg(args: &[Expr], i: usize, ctx: &mut QueryContext<'_>) -> Result<String, Error> {
    Ok(atomize_opt(arg(args, i)?, ctx)?.map(|v| v.lexical()).unwrap_or_default())
}

/// Single item argument or, without arguments, the context item.
fn item_or_focus(args: &[Expr], ctx: &mut QueryContext<'_>) -> Result<Option<XdmItem>, Error> {
    if args.is_empty() {
        return Ok(Some(ctx.focus()?.item.clone()));
    }
    let items = evaluate(arg(args, 0)?, ctx)?;
    match items.len() {
        0 | 1 => Ok(items.into_iter().next()),
        _ => Err(Error::from_code(ErrorCode::XPTY0004, "expected at most one item").with_items(&items)),
    }
}

pub(crate) fn call_builtin(func: Builtin, args: &[Expr], ctx: &mut QueryContext<'_>) -> Result<XdmSequence, Error> {
    match func {
        Builtin::True => one(XdmItem::boolean(true)),
        Builtin::False => one(XdmItem::boolean(false)),
        Builtin::Not => one(XdmItem::boolean(!ebv(arg(args, 0)?, ctx)?)),
        Builtin::Boolean => one(XdmItem::boolean(ebv(arg(args, 0)?, ctx)?)),
        Builtin::Count => {
            let mut cur = iterate(arg(args, 0)?, ctx)?;
            if let Some(n) = cur.size() {
                return one(XdmItem::integer(n as i64));
            }
            let mut n = 0i64;
            while cur.next_item(ctx)?.is_some() {
                n += 1;
            }
            one(XdmItem::integer(n))
        }
        Builtin::Exists | Builtin::Empty => {
            let mut cur = iterate(arg(args, 0)?, ctx)?;
            let found = match cur.size() {
                Some(n) => n > 0,
                None => cur.next_item(ctx)?.is_some(),
            };
            one(XdmItem::boolean(found == (func == Builtin::Exists)))
        }
        Builtin::String => {
            let s = match item_or_focus(args, ctx)? {
                Some(item) => string_value(&item, ctx)?,
                None => String::new(),
            };
            one(XdmItem::string(s))
        }
        Builtin::Data => {
            let items = evaluate(arg(args, 0)?, ctx)?;
            Ok(atomize(&items, ctx)?.into_iter().map(XdmItem::Atomic).collect())
        }
        Builtin::Sum => {
            let items = evaluate(arg(args, 0)?, ctx)?;
            let values = atomize(&items, ctx)?;
            let mut it = values.into_iter();
            let Some(first) = it.next() else { return one(XdmItem::integer(0)) };
            let mut acc = match first {
                XdmAtomicValue::UntypedAtomic(s) => XdmAtomicValue::Double(numeric::cast_double(&s)?),
                v if v.is_numeric() => v,
                v => {
                    return Err(Error::from_code(ErrorCode::XPTY0004, "sum of non-numeric values")
                        .with_items(&[XdmItem::Atomic(v)]));
                }
            };
            for v in it {
                ctx.check_cancelled()?;
                acc = numeric::arithmetic(ArithOp::Add, &acc, &v)?;
            }
            one(XdmItem::Atomic(acc))
        }
        Builtin::Concat => {
            let mut out = String::new();
            for i in 0..args.len() {
                out.push_str(&string_arg(args, i, ctx)?);
            }
            one(XdmItem::string(out))
        }
        Builtin::Contains => {
            let hay = string_arg(args, 0, ctx)?;
            let needle = string_arg(args, 1, ctx)?;
            one(XdmItem::boolean(hay.contains(needle.as_str())))
        }
        Builtin::Name => {
            let name = match item_or_focus(args, ctx)? {
                None => String::new(),
                Some(XdmItem::Node(n)) => ctx.doc()?.name(n.pre).map(ToString::to_string).unwrap_or_default(),
                Some(other) => {
                    return Err(Error::from_code(ErrorCode::XPTY0004, "name() of a non-node").with_items(&[other]));
                }
            };
            one(XdmItem::string(name))
        }
        Builtin::ExactlyOne | Builtin::ZeroOrOne | Builtin::OneOrMore => {
            let occ = match func {
                Builtin::ExactlyOne => Occurrence::ExactlyOne,
                Builtin::ZeroOrOne => Occurrence::ZeroOrOne,
                _ => Occurrence::OneOrMore,
            };
            let items = evaluate(arg(args, 0)?, ctx)?;
            if !occ.allows(items.len()) {
                return Err(cardinality_error(occ, &items));
            }
            Ok(items)
        }
    }
}
