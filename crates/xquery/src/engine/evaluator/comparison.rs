use core::cmp::Ordering;

use super::numeric::cast_double;
use crate::compiler::ir::{ComparisonOp, NumRange};
use crate::engine::runtime::{Error, ErrorCode};
use crate::xdm::{XdmAtomicValue, XdmItem};

fn type_error(a: &XdmAtomicValue, b: &XdmAtomicValue) -> Error {
    Error::from_code(ErrorCode::XPTY0004, "values are not comparable")
        .with_items(&[XdmItem::Atomic(a.clone()), XdmItem::Atomic(b.clone())])
}

fn holds(op: ComparisonOp, ord: Option<Ordering>) -> bool {
    // `None` is an unordered (NaN) pair: only `ne` holds
    match ord {
        None => op == ComparisonOp::Ne,
        Some(o) => match op {
            ComparisonOp::Eq => o == Ordering::Equal,
            ComparisonOp::Ne => o != Ordering::Equal,
            ComparisonOp::Lt => o == Ordering::Less,
            ComparisonOp::Le => o != Ordering::Greater,
            ComparisonOp::Gt => o == Ordering::Greater,
            ComparisonOp::Ge => o != Ordering::Less,
        },
    }
}

/// Orders two atomic values of comparable types. Untyped values compare as
/// strings.
fn order(a: &XdmAtomicValue, b: &XdmAtomicValue) -> Result<Option<Ordering>, Error> {
    use XdmAtomicValue::*;
    match (a, b) {
        (Integer(x), Integer(y)) => Ok(Some(x.cmp(y))),
        (Boolean(x), Boolean(y)) => Ok(Some(x.cmp(y))),
        (String(x) | UntypedAtomic(x), String(y) | UntypedAtomic(y)) => Ok(Some(x.cmp(y))),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => Ok(x.partial_cmp(&y)),
            _ => Err(type_error(a, b)),
        },
    }
}

pub(crate) fn value_compare(op: ComparisonOp, a: &XdmAtomicValue, b: &XdmAtomicValue) -> Result<bool, Error> {
    Ok(holds(op, order(a, b)?))
}

fn parse_boolean(s: &str) -> Result<bool, Error> {
    match s.trim() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(Error::from_code(ErrorCode::FORG0001, format!("cannot cast {s:?} to a boolean"))),
    }
}

/// Converts an untyped operand of a general comparison against the type of
/// the other operand.
fn coerce(v: &XdmAtomicValue, other: &XdmAtomicValue) -> Result<XdmAtomicValue, Error> {
    match (v, other) {
        (XdmAtomicValue::UntypedAtomic(s), o) if o.is_numeric() => cast_double(s).map(XdmAtomicValue::Double),
        (XdmAtomicValue::UntypedAtomic(s), XdmAtomicValue::Boolean(_)) => parse_boolean(s).map(XdmAtomicValue::Boolean),
        _ => Ok(v.clone()),
    }
}

/// Existential comparison: true if some pair of items satisfies `op`.
pub(crate) fn general_compare(op: ComparisonOp, lhs: &[XdmAtomicValue], rhs: &[XdmAtomicValue]) -> Result<bool, Error> {
    for a in lhs {
        for b in rhs {
            let (x, y) = (coerce(a, b)?, coerce(b, a)?);
            if holds(op, order(&x, &y)?) {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// True if some value lies in `range`; untyped values are cast to double.
pub(crate) fn in_range(range: &NumRange, values: &[XdmAtomicValue]) -> Result<bool, Error> {
    for v in values {
        let n = match v {
            XdmAtomicValue::UntypedAtomic(s) => cast_double(s)?,
            other => other.as_f64().ok_or_else(|| {
                Error::from_code(ErrorCode::XPTY0004, "value is not comparable with a number")
                    .with_items(&[XdmItem::Atomic(other.clone())])
            })?,
        };
        if range.contains(n) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Ordering used by `order by`: NaN sorts below every other number.
pub(crate) fn order_key_compare(a: &XdmAtomicValue, b: &XdmAtomicValue) -> Result<Ordering, Error> {
    Ok(match order(a, b)? {
        Some(o) => o,
        None => {
            let (x, y) = (a.as_f64().is_some_and(f64::is_nan), b.as_f64().is_some_and(f64::is_nan));
            x.cmp(&y).reverse()
        }
    })
}
