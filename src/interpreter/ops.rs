//! Operator semantics for interpreter values.

use std::cmp::Ordering;
use std::rc::Rc;

use super::ast::{BinOp, CmpOp, UnaryOp};
use super::value::{ExcValue, Value};

pub fn binop(op: BinOp, left: &Value, right: &Value) -> Result<Value, ExcValue> {
    use BinOp::*;
    match op {
        Add => add(left, right),
        Sub => arith(op, left, right),
        Mul => mul(left, right),
        Div => divide(left, right),
        FloorDiv => floor_div(left, right),
        Mod => modulo(left, right),
        Pow => power(left, right),
        LShift | RShift | BitAnd | BitOr | BitXor => bitwise(op, left, right),
    }
}

fn type_mismatch(op: BinOp, left: &Value, right: &Value) -> ExcValue {
    ExcValue::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op.symbol(),
        left.type_name(),
        right.type_name()
    ))
}

fn add(left: &Value, right: &Value) -> Result<Value, ExcValue> {
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => Ok(Value::str(format!("{}{}", a, b))),
        (Value::List(a), Value::List(b)) => {
            let mut out = a.borrow().clone();
            out.extend(b.borrow().iter().cloned());
            Ok(Value::list(out))
        }
        (Value::Tuple(a), Value::Tuple(b)) => {
            let mut out = a.as_ref().clone();
            out.extend(b.iter().cloned());
            Ok(Value::tuple(out))
        }
        _ => arith(BinOp::Add, left, right),
    }
}

fn mul(left: &Value, right: &Value) -> Result<Value, ExcValue> {
    match (left, right) {
        (Value::Str(s), Value::Int(n)) | (Value::Int(n), Value::Str(s)) => {
            Ok(Value::str(s.repeat((*n).max(0) as usize)))
        }
        (Value::List(l), Value::Int(n)) | (Value::Int(n), Value::List(l)) => {
            let src = l.borrow();
            let mut out = Vec::new();
            for _ in 0..(*n).max(0) {
                out.extend(src.iter().cloned());
            }
            Ok(Value::list(out))
        }
        _ => arith(BinOp::Mul, left, right),
    }
}

fn arith(op: BinOp, left: &Value, right: &Value) -> Result<Value, ExcValue> {
    if let (Some(a), Some(b)) = (left.as_i64(), right.as_i64()) {
        let result = match op {
            BinOp::Add => a.checked_add(b),
            BinOp::Sub => a.checked_sub(b),
            BinOp::Mul => a.checked_mul(b),
            _ => None,
        };
        return match result {
            Some(v) => Ok(Value::Int(v)),
            // i64 overflow degrades to float
            None => float_arith(op, a as f64, b as f64),
        };
    }
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => float_arith(op, a, b),
        _ => Err(type_mismatch(op, left, right)),
    }
}

fn float_arith(op: BinOp, a: f64, b: f64) -> Result<Value, ExcValue> {
    Ok(Value::Float(match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        _ => unreachable!(),
    }))
}

fn divide(left: &Value, right: &Value) -> Result<Value, ExcValue> {
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => {
            if b == 0.0 {
                Err(ExcValue::zero_division("division by zero"))
            } else {
                Ok(Value::Float(a / b))
            }
        }
        _ => Err(type_mismatch(BinOp::Div, left, right)),
    }
}

fn floor_div(left: &Value, right: &Value) -> Result<Value, ExcValue> {
    if let (Some(a), Some(b)) = (left.as_i64(), right.as_i64()) {
        if b == 0 {
            return Err(ExcValue::zero_division("integer division or modulo by zero"));
        }
        // Python floor division rounds toward negative infinity.
        let q = a / b;
        let r = a % b;
        let q = if r != 0 && (r < 0) != (b < 0) { q - 1 } else { q };
        return Ok(Value::Int(q));
    }
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => {
            if b == 0.0 {
                Err(ExcValue::zero_division("float floor division by zero"))
            } else {
                Ok(Value::Float((a / b).floor()))
            }
        }
        _ => Err(type_mismatch(BinOp::FloorDiv, left, right)),
    }
}

fn modulo(left: &Value, right: &Value) -> Result<Value, ExcValue> {
    match (left, right) {
        // printf-style string formatting with a single value or tuple
        (Value::Str(fmt), value) => Ok(Value::str(percent_format(fmt, value))),
        _ => {
            if let (Some(a), Some(b)) = (left.as_i64(), right.as_i64()) {
                if b == 0 {
                    return Err(ExcValue::zero_division("integer division or modulo by zero"));
                }
                let r = a % b;
                let r = if r != 0 && (r < 0) != (b < 0) { r + b } else { r };
                return Ok(Value::Int(r));
            }
            match (left.as_f64(), right.as_f64()) {
                (Some(a), Some(b)) => {
                    if b == 0.0 {
                        Err(ExcValue::zero_division("float modulo"))
                    } else {
                        let r = a % b;
                        let r = if r != 0.0 && (r < 0.0) != (b < 0.0) { r + b } else { r };
                        Ok(Value::Float(r))
                    }
                }
                _ => Err(type_mismatch(BinOp::Mod, left, right)),
            }
        }
    }
}

fn percent_format(fmt: &str, value: &Value) -> String {
    let values: Vec<Value> = match value {
        Value::Tuple(t) => t.as_ref().clone(),
        other => vec![other.clone()],
    };
    let mut out = String::new();
    let mut iter = values.into_iter();
    let mut chars = fmt.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some('s') => out.push_str(&iter.next().map(|v| v.str_value()).unwrap_or_default()),
            Some('d') => out.push_str(
                &iter
                    .next()
                    .and_then(|v| v.as_i64())
                    .map(|i| i.to_string())
                    .unwrap_or_default(),
            ),
            Some('f') => out.push_str(
                &iter
                    .next()
                    .and_then(|v| v.as_f64())
                    .map(|f| format!("{:.6}", f))
                    .unwrap_or_default(),
            ),
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    out
}

fn power(left: &Value, right: &Value) -> Result<Value, ExcValue> {
    if let (Some(a), Some(b)) = (left.as_i64(), right.as_i64()) {
        if b >= 0 {
            if let Some(v) = checked_ipow(a, b) {
                return Ok(Value::Int(v));
            }
            return Ok(Value::Float((a as f64).powf(b as f64)));
        }
        return Ok(Value::Float((a as f64).powi(b as i32)));
    }
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => Ok(Value::Float(a.powf(b))),
        _ => Err(type_mismatch(BinOp::Pow, left, right)),
    }
}

fn checked_ipow(base: i64, exp: i64) -> Option<i64> {
    let mut result: i64 = 1;
    let mut base = base;
    let mut exp = exp;
    while exp > 0 {
        if exp & 1 == 1 {
            result = result.checked_mul(base)?;
        }
        exp >>= 1;
        if exp > 0 {
            base = base.checked_mul(base)?;
        }
    }
    Some(result)
}

fn bitwise(op: BinOp, left: &Value, right: &Value) -> Result<Value, ExcValue> {
    // set operators
    if let (Value::Set(a), Value::Set(b)) = (left, right) {
        let (a, b) = (a.borrow(), b.borrow());
        let result: Vec<Value> = match op {
            BinOp::BitAnd => a.iter().filter(|x| b.iter().any(|y| x.py_eq(y))).cloned().collect(),
            BinOp::BitOr => {
                let mut out = a.clone();
                for y in b.iter() {
                    if !out.iter().any(|x| x.py_eq(y)) {
                        out.push(y.clone());
                    }
                }
                out
            }
            BinOp::BitXor => {
                let mut out: Vec<Value> = a
                    .iter()
                    .filter(|x| !b.iter().any(|y| x.py_eq(y)))
                    .cloned()
                    .collect();
                out.extend(b.iter().filter(|y| !a.iter().any(|x| x.py_eq(y))).cloned());
                out
            }
            _ => return Err(type_mismatch(op, left, right)),
        };
        return Ok(Value::set(result));
    }

    match (left.as_i64(), right.as_i64()) {
        (Some(a), Some(b)) => Ok(Value::Int(match op {
            BinOp::LShift => a.checked_shl(b as u32).unwrap_or(0),
            BinOp::RShift => a.checked_shr(b as u32).unwrap_or(0),
            BinOp::BitAnd => a & b,
            BinOp::BitOr => a | b,
            BinOp::BitXor => a ^ b,
            _ => unreachable!(),
        })),
        _ => Err(type_mismatch(op, left, right)),
    }
}

pub fn unaryop(op: UnaryOp, operand: &Value) -> Result<Value, ExcValue> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!operand.truthy())),
        UnaryOp::Neg => match operand {
            Value::Int(i) => Ok(Value::Int(-i)),
            Value::Float(f) => Ok(Value::Float(-f)),
            Value::Bool(b) => Ok(Value::Int(-(*b as i64))),
            _ => Err(ExcValue::type_error(format!(
                "bad operand type for unary -: '{}'",
                operand.type_name()
            ))),
        },
        UnaryOp::Pos => match operand {
            Value::Int(_) | Value::Float(_) | Value::Bool(_) => Ok(operand.clone()),
            _ => Err(ExcValue::type_error(format!(
                "bad operand type for unary +: '{}'",
                operand.type_name()
            ))),
        },
        UnaryOp::Invert => match operand.as_i64() {
            Some(i) => Ok(Value::Int(!i)),
            None => Err(ExcValue::type_error(format!(
                "bad operand type for unary ~: '{}'",
                operand.type_name()
            ))),
        },
    }
}

pub fn compare(op: CmpOp, left: &Value, right: &Value) -> Result<bool, ExcValue> {
    match op {
        CmpOp::Eq => Ok(left.py_eq(right)),
        CmpOp::NotEq => Ok(!left.py_eq(right)),
        CmpOp::Is => Ok(value_is(left, right)),
        CmpOp::IsNot => Ok(!value_is(left, right)),
        CmpOp::In => contains(right, left),
        CmpOp::NotIn => contains(right, left).map(|b| !b),
        CmpOp::Lt | CmpOp::LtE | CmpOp::Gt | CmpOp::GtE => {
            let ordering = left.py_cmp(right).ok_or_else(|| {
                ExcValue::type_error(format!(
                    "'{}' not supported between instances of '{}' and '{}'",
                    op.symbol(),
                    left.type_name(),
                    right.type_name()
                ))
            })?;
            Ok(match op {
                CmpOp::Lt => ordering == Ordering::Less,
                CmpOp::LtE => ordering != Ordering::Greater,
                CmpOp::Gt => ordering == Ordering::Greater,
                CmpOp::GtE => ordering != Ordering::Less,
                _ => unreachable!(),
            })
        }
    }
}

fn value_is(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::None, Value::None) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
        (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
        (Value::Set(a), Value::Set(b)) => Rc::ptr_eq(a, b),
        (Value::Instance(a), Value::Instance(b)) => Rc::ptr_eq(a, b),
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Str(a), Value::Str(b)) => Rc::ptr_eq(a, b) || a == b,
        _ => false,
    }
}

/// `needle in haystack`
pub fn contains(haystack: &Value, needle: &Value) -> Result<bool, ExcValue> {
    match haystack {
        Value::Str(s) => match needle {
            Value::Str(sub) => Ok(s.contains(sub.as_str())),
            _ => Err(ExcValue::type_error(
                "'in <string>' requires string as left operand",
            )),
        },
        Value::List(l) => Ok(l.borrow().iter().any(|v| v.py_eq(needle))),
        Value::Tuple(t) => Ok(t.iter().any(|v| v.py_eq(needle))),
        Value::Set(s) => Ok(s.borrow().iter().any(|v| v.py_eq(needle))),
        Value::Dict(d) => Ok(d.borrow().entries.iter().any(|(k, _)| k.py_eq(needle))),
        Value::Range { start, stop, step } => match needle.as_i64() {
            Some(n) => {
                let in_bounds = if *step > 0 {
                    n >= *start && n < *stop
                } else {
                    n <= *start && n > *stop
                };
                Ok(in_bounds && (n - start) % step == 0)
            }
            None => Ok(false),
        },
        _ => Err(ExcValue::type_error(format!(
            "argument of type '{}' is not iterable",
            haystack.type_name()
        ))),
    }
}

/// Subscript read: `value[index]`.
pub fn get_index(value: &Value, index: &Value) -> Result<Value, ExcValue> {
    match value {
        Value::List(l) => {
            let items = l.borrow();
            let idx = normalize_index(index, items.len())?;
            Ok(items[idx].clone())
        }
        Value::Tuple(t) => {
            let idx = normalize_index(index, t.len())?;
            Ok(t[idx].clone())
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let idx = normalize_index(index, chars.len())?;
            Ok(Value::str(chars[idx].to_string()))
        }
        Value::Dict(d) => d
            .borrow()
            .get(index)
            .cloned()
            .ok_or_else(|| ExcValue::key_error(index.repr())),
        _ => Err(ExcValue::type_error(format!(
            "'{}' object is not subscriptable",
            value.type_name()
        ))),
    }
}

/// Subscript write: `value[index] = item`.
pub fn set_index(value: &Value, index: &Value, item: Value) -> Result<(), ExcValue> {
    match value {
        Value::List(l) => {
            let mut items = l.borrow_mut();
            let idx = normalize_index(index, items.len())?;
            items[idx] = item;
            Ok(())
        }
        Value::Dict(d) => {
            d.borrow_mut().insert(index.clone(), item);
            Ok(())
        }
        _ => Err(ExcValue::type_error(format!(
            "'{}' object does not support item assignment",
            value.type_name()
        ))),
    }
}

pub fn del_index(value: &Value, index: &Value) -> Result<(), ExcValue> {
    match value {
        Value::List(l) => {
            let mut items = l.borrow_mut();
            let idx = normalize_index(index, items.len())?;
            items.remove(idx);
            Ok(())
        }
        Value::Dict(d) => {
            d.borrow_mut()
                .remove(index)
                .map(|_| ())
                .ok_or_else(|| ExcValue::key_error(index.repr()))
        }
        _ => Err(ExcValue::type_error(format!(
            "'{}' object doesn't support item deletion",
            value.type_name()
        ))),
    }
}

fn normalize_index(index: &Value, len: usize) -> Result<usize, ExcValue> {
    let raw = index
        .as_i64()
        .ok_or_else(|| ExcValue::type_error(format!("indices must be integers, not {}", index.type_name())))?;
    let idx = if raw < 0 { raw + len as i64 } else { raw };
    if idx < 0 || idx >= len as i64 {
        Err(ExcValue::index_error("index out of range"))
    } else {
        Ok(idx as usize)
    }
}

/// Slice read: `value[lower:upper:step]`.
pub fn get_slice(
    value: &Value,
    lower: Option<i64>,
    upper: Option<i64>,
    step: Option<i64>,
) -> Result<Value, ExcValue> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(ExcValue::value_error("slice step cannot be zero"));
    }
    match value {
        Value::List(l) => {
            let items = l.borrow();
            Ok(Value::list(slice_vec(&items, lower, upper, step)))
        }
        Value::Tuple(t) => Ok(Value::tuple(slice_vec(t, lower, upper, step))),
        Value::Str(s) => {
            let chars: Vec<Value> = s.chars().map(|c| Value::str(c.to_string())).collect();
            let sliced = slice_vec(&chars, lower, upper, step);
            Ok(Value::str(sliced.iter().map(|v| v.str_value()).collect::<String>()))
        }
        _ => Err(ExcValue::type_error(format!(
            "'{}' object is not sliceable",
            value.type_name()
        ))),
    }
}

fn slice_vec(items: &[Value], lower: Option<i64>, upper: Option<i64>, step: i64) -> Vec<Value> {
    let len = items.len() as i64;
    let resolve = |i: i64| if i < 0 { i + len } else { i };
    let mut out = Vec::new();
    if step > 0 {
        let start = resolve(lower.unwrap_or(0)).clamp(0, len);
        let stop = resolve(upper.unwrap_or(len)).clamp(0, len);
        let mut i = start;
        while i < stop {
            out.push(items[i as usize].clone());
            i += step;
        }
    } else {
        let start = resolve(lower.unwrap_or(len - 1)).clamp(-1, len - 1);
        let stop = upper.map(resolve).map(|s| s.max(-1)).unwrap_or(-1);
        let mut i = start;
        while i > stop {
            out.push(items[i as usize].clone());
            i += step;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_arithmetic() {
        assert!(binop(BinOp::Add, &Value::Int(2), &Value::Int(3)).unwrap().py_eq(&Value::Int(5)));
        assert!(binop(BinOp::Mul, &Value::Int(234), &Value::Int(568))
            .unwrap()
            .py_eq(&Value::Int(132912)));
    }

    #[test]
    fn test_true_division_always_float() {
        let v = binop(BinOp::Div, &Value::Int(7), &Value::Int(2)).unwrap();
        assert!(v.py_eq(&Value::Float(3.5)));
    }

    #[test]
    fn test_floor_division_negative() {
        let v = binop(BinOp::FloorDiv, &Value::Int(-7), &Value::Int(2)).unwrap();
        assert!(v.py_eq(&Value::Int(-4)));
    }

    #[test]
    fn test_python_modulo_sign() {
        let v = binop(BinOp::Mod, &Value::Int(-7), &Value::Int(3)).unwrap();
        assert!(v.py_eq(&Value::Int(2)));
    }

    #[test]
    fn test_division_by_zero() {
        let err = binop(BinOp::Div, &Value::Int(1), &Value::Int(0)).unwrap_err();
        assert_eq!(err.kind, "ZeroDivisionError");
    }

    #[test]
    fn test_string_ops() {
        let v = binop(BinOp::Add, &Value::str("ab"), &Value::str("cd")).unwrap();
        assert_eq!(v.str_value(), "abcd");
        let v = binop(BinOp::Mul, &Value::str("ab"), &Value::Int(3)).unwrap();
        assert_eq!(v.str_value(), "ababab");
    }

    #[test]
    fn test_slicing() {
        let xs = Value::list((0..6).map(Value::Int).collect());
        let v = get_slice(&xs, Some(1), Some(5), Some(2)).unwrap();
        assert!(v.py_eq(&Value::list(vec![Value::Int(1), Value::Int(3)])));
        let rev = get_slice(&xs, None, None, Some(-1)).unwrap();
        assert!(rev.py_eq(&Value::list((0..6).rev().map(Value::Int).collect())));
    }

    #[test]
    fn test_negative_index() {
        let xs = Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert!(get_index(&xs, &Value::Int(-1)).unwrap().py_eq(&Value::Int(3)));
    }

    #[test]
    fn test_set_operators() {
        let a = Value::set(vec![Value::Int(1), Value::Int(2)]);
        let b = Value::set(vec![Value::Int(2), Value::Int(3)]);
        let union = binop(BinOp::BitOr, &a, &b).unwrap();
        assert_eq!(union.len(), Some(3));
        let inter = binop(BinOp::BitAnd, &a, &b).unwrap();
        assert_eq!(inter.len(), Some(1));
    }

    #[test]
    fn test_contains() {
        let d = Value::dict(vec![(Value::str("k"), Value::Int(1))]);
        assert!(contains(&d, &Value::str("k")).unwrap());
        assert!(!contains(&d, &Value::str("v")).unwrap());
        let r = Value::Range { start: 0, stop: 10, step: 2 };
        assert!(contains(&r, &Value::Int(4)).unwrap());
        assert!(!contains(&r, &Value::Int(5)).unwrap());
    }
}
