use crate::compiler::ir::ArithOp;
use crate::engine::runtime::{Error, ErrorCode};
use crate::xdm::{XdmAtomicValue, XdmItem};

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
enum Num {
    Integer(i64),
    Decimal(f64),
    Double(f64),
}

impl Num {
    fn rank(self) -> u8 {
        match self {
            Num::Integer(_) => 0,
            Num::Decimal(_) => 1,
            Num::Double(_) => 2,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Num::Integer(i) => i as f64,
            Num::Decimal(d) | Num::Double(d) => d,
        }
    }
}

fn overflow() -> Error {
    Error::from_code(ErrorCode::FOAR0002, "integer overflow")
}

fn div_by_zero() -> Error {
    Error::from_code(ErrorCode::FOAR0001, "division by zero")
}

/// Numeric operand; untyped values are cast to double.
fn operand(v: &XdmAtomicValue) -> Result<Num, Error> {
    match v {
        XdmAtomicValue::Integer(i) => Ok(Num::Integer(*i)),
        XdmAtomicValue::Decimal(d) => Ok(Num::Decimal(*d)),
        XdmAtomicValue::Double(d) => Ok(Num::Double(*d)),
        XdmAtomicValue::UntypedAtomic(s) => cast_double(s).map(Num::Double),
        other => Err(Error::from_code(ErrorCode::XPTY0004, "arithmetic on a non-numeric value")
            .with_items(&[XdmItem::Atomic(other.clone())])),
    }
}

/// Casts a lexical form to a double the way untyped operands are cast.
pub(crate) fn cast_double(s: &str) -> Result<f64, Error> {
    let t = s.trim();
    match t {
        "NaN" => Ok(f64::NAN),
        "INF" | "+INF" => Ok(f64::INFINITY),
        "-INF" => Ok(f64::NEG_INFINITY),
        _ if t.is_empty() || t.contains(|c: char| c.is_ascii_alphabetic() && c != 'e' && c != 'E') => {
            Err(Error::from_code(ErrorCode::FORG0001, format!("cannot cast {s:?} to a double")))
        }
        _ => t
            .parse::<f64>()
            .map_err(|_| Error::from_code(ErrorCode::FORG0001, format!("cannot cast {s:?} to a double"))),
    }
}

fn promote(a: Num, b: Num) -> (Num, Num) {
    let rank = a.rank().max(b.rank());
    let lift = |n: Num| match (rank, n) {
        (0, n) => n,
        (1, Num::Integer(i)) => Num::Decimal(i as f64),
        (1, n) => n,
        (_, n) => Num::Double(n.as_f64()),
    };
    (lift(a), lift(b))
}

fn to_integer(v: f64) -> Result<i64, Error> {
    let t = v.trunc();
    if !t.is_finite() || t < i64::MIN as f64 || t >= i64::MAX as f64 {
        return Err(overflow());
    }
    Ok(t as i64)
}

pub(crate) fn arithmetic(op: ArithOp, a: &XdmAtomicValue, b: &XdmAtomicValue) -> Result<XdmAtomicValue, Error> {
    let (a, b) = promote(operand(a)?, operand(b)?);
    match (a, b) {
        (Num::Integer(x), Num::Integer(y)) => integer_op(op, x, y),
        (Num::Decimal(x), Num::Decimal(y)) => {
            if y == 0.0 && matches!(op, ArithOp::Div | ArithOp::IDiv | ArithOp::Mod) {
                return Err(div_by_zero());
            }
            float_op(op, x, y, XdmAtomicValue::Decimal)
        }
        _ => {
            let (x, y) = (a.as_f64(), b.as_f64());
            if op == ArithOp::IDiv && y == 0.0 {
                return Err(div_by_zero());
            }
            float_op(op, x, y, XdmAtomicValue::Double)
        }
    }
}

fn integer_op(op: ArithOp, x: i64, y: i64) -> Result<XdmAtomicValue, Error> {
    let v = match op {
        ArithOp::Add => x.checked_add(y).ok_or_else(overflow)?,
        ArithOp::Sub => x.checked_sub(y).ok_or_else(overflow)?,
        ArithOp::Mul => x.checked_mul(y).ok_or_else(overflow)?,
        ArithOp::Div => {
            if y == 0 {
                return Err(div_by_zero());
            }
            return Ok(XdmAtomicValue::Decimal(x as f64 / y as f64));
        }
        ArithOp::IDiv => {
            if y == 0 {
                return Err(div_by_zero());
            }
            x.checked_div(y).ok_or_else(overflow)?
        }
        ArithOp::Mod => {
            if y == 0 {
                return Err(div_by_zero());
            }
            x.checked_rem(y).unwrap_or(0)
        }
    };
    Ok(XdmAtomicValue::Integer(v))
}

fn float_op(op: ArithOp, x: f64, y: f64, wrap: fn(f64) -> XdmAtomicValue) -> Result<XdmAtomicValue, Error> {
    Ok(match op {
        ArithOp::Add => wrap(x + y),
        ArithOp::Sub => wrap(x - y),
        ArithOp::Mul => wrap(x * y),
        ArithOp::Div => wrap(x / y),
        ArithOp::Mod => wrap(x % y),
        ArithOp::IDiv => XdmAtomicValue::Integer(to_integer(x / y)?),
    })
}

pub(crate) fn negate(v: &XdmAtomicValue) -> Result<XdmAtomicValue, Error> {
    Ok(match operand(v)? {
        Num::Integer(i) => XdmAtomicValue::Integer(i.checked_neg().ok_or_else(overflow)?),
        Num::Decimal(d) => XdmAtomicValue::Decimal(-d),
        Num::Double(d) => XdmAtomicValue::Double(-d),
    })
}
