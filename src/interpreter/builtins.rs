//! Curated builtin functions, methods, and allowlisted module backings.
//!
//! Builtins that never call back into interpreted code live here; the
//! higher-order ones (`map`, `filter`, `sorted` with `key=`, ...) are handled
//! inside the evaluator where user functions can be invoked.

use std::collections::HashMap;
use std::rc::Rc;

use rand::{Rng, SeedableRng};

use super::value::{format_float, ExcValue, ModuleObj, Value};

/// Names injected into the interpreter's global namespace.
pub const BUILTIN_NAMES: &[&str] = &[
    "len", "range", "print", "list", "dict", "set", "tuple", "str", "int", "float", "bool",
    "sum", "min", "max", "sorted", "enumerate", "zip", "reversed", "abs", "round", "any", "all",
    "map", "filter", "isinstance", "repr", "ord", "chr", "divmod", "pow", "type", "hasattr",
    "getattr",
];

/// Materialize an iterable into a vector of values.
pub fn iterate(value: &Value) -> Result<Vec<Value>, ExcValue> {
    match value {
        Value::List(l) => Ok(l.borrow().clone()),
        Value::Tuple(t) => Ok(t.as_ref().clone()),
        Value::Set(s) => Ok(s.borrow().clone()),
        Value::Str(s) => Ok(s.chars().map(|c| Value::str(c.to_string())).collect()),
        Value::Dict(d) => Ok(d.borrow().entries.iter().map(|(k, _)| k.clone()).collect()),
        Value::Range { start, stop, step } => {
            let len = value.len().unwrap_or(0);
            if len > 10_000_000 {
                return Err(ExcValue::overflow("range too large to materialize"));
            }
            let mut out = Vec::with_capacity(len);
            let mut i = *start;
            if *step > 0 {
                while i < *stop {
                    out.push(Value::Int(i));
                    i += step;
                }
            } else if *step < 0 {
                while i > *stop {
                    out.push(Value::Int(i));
                    i += step;
                }
            }
            Ok(out)
        }
        other => Err(ExcValue::type_error(format!(
            "'{}' object is not iterable",
            other.type_name()
        ))),
    }
}

fn arg_count(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), ExcValue> {
    if args.len() < min || args.len() > max {
        return Err(ExcValue::type_error(format!(
            "{}() takes {} to {} arguments but {} were given",
            name,
            min,
            max,
            args.len()
        )));
    }
    Ok(())
}

/// Dispatch a pure builtin by name.
pub fn call_builtin(name: &str, args: &[Value]) -> Result<Value, ExcValue> {
    if let Some(rest) = name.strip_prefix("math.") {
        return call_math(rest, args);
    }
    if let Some(rest) = name.strip_prefix("random.") {
        return call_random(rest, args);
    }
    if let Some(rest) = name.strip_prefix("json.") {
        return call_json(rest, args);
    }
    if let Some(rest) = name.strip_prefix("re.") {
        return call_re(rest, args);
    }
    if let Some(rest) = name.strip_prefix("statistics.") {
        return call_statistics(rest, args);
    }
    if let Some(rest) = name.strip_prefix("time.") {
        return call_time(rest, args);
    }
    if let Some(rest) = name.strip_prefix("itertools.") {
        return call_itertools(rest, args);
    }
    if let Some(rest) = name.strip_prefix("collections.") {
        return call_collections(rest, args);
    }

    match name {
        "len" => {
            arg_count("len", args, 1, 1)?;
            args[0]
                .len()
                .map(|l| Value::Int(l as i64))
                .ok_or_else(|| {
                    ExcValue::type_error(format!("object of type '{}' has no len()", args[0].type_name()))
                })
        }
        "range" => {
            arg_count("range", args, 1, 3)?;
            let as_int = |v: &Value| {
                v.as_i64()
                    .ok_or_else(|| ExcValue::type_error("range() arguments must be integers"))
            };
            let (start, stop, step) = match args.len() {
                1 => (0, as_int(&args[0])?, 1),
                2 => (as_int(&args[0])?, as_int(&args[1])?, 1),
                _ => (as_int(&args[0])?, as_int(&args[1])?, as_int(&args[2])?),
            };
            if step == 0 {
                return Err(ExcValue::value_error("range() arg 3 must not be zero"));
            }
            Ok(Value::Range { start, stop, step })
        }
        "list" => match args.len() {
            0 => Ok(Value::list(Vec::new())),
            1 => Ok(Value::list(iterate(&args[0])?)),
            _ => Err(ExcValue::type_error("list() takes at most 1 argument")),
        },
        "tuple" => match args.len() {
            0 => Ok(Value::tuple(Vec::new())),
            1 => Ok(Value::tuple(iterate(&args[0])?)),
            _ => Err(ExcValue::type_error("tuple() takes at most 1 argument")),
        },
        "set" => match args.len() {
            0 => Ok(Value::set(Vec::new())),
            1 => Ok(Value::set(iterate(&args[0])?)),
            _ => Err(ExcValue::type_error("set() takes at most 1 argument")),
        },
        "dict" => match args.len() {
            0 => Ok(Value::dict(Vec::new())),
            1 => {
                let pairs = iterate(&args[0])?;
                let mut entries = Vec::new();
                for pair in pairs {
                    let kv = iterate(&pair)?;
                    if kv.len() != 2 {
                        return Err(ExcValue::value_error(
                            "dictionary update sequence element is not a pair",
                        ));
                    }
                    entries.push((kv[0].clone(), kv[1].clone()));
                }
                Ok(Value::dict(entries))
            }
            _ => Err(ExcValue::type_error("dict() takes at most 1 positional argument")),
        },
        "str" => match args.len() {
            0 => Ok(Value::str("")),
            1 => Ok(Value::str(args[0].str_value())),
            _ => Err(ExcValue::type_error("str() takes at most 1 argument")),
        },
        "repr" => {
            arg_count("repr", args, 1, 1)?;
            Ok(Value::str(args[0].repr()))
        }
        "int" => {
            arg_count("int", args, 0, 2)?;
            match args.first() {
                None => Ok(Value::Int(0)),
                Some(Value::Int(i)) => Ok(Value::Int(*i)),
                Some(Value::Bool(b)) => Ok(Value::Int(*b as i64)),
                Some(Value::Float(f)) => Ok(Value::Int(f.trunc() as i64)),
                Some(Value::Str(s)) => {
                    let base = match args.get(1) {
                        Some(v) => v.as_i64().unwrap_or(10) as u32,
                        None => 10,
                    };
                    i64::from_str_radix(s.trim(), base)
                        .map(Value::Int)
                        .or_else(|_| {
                            if base == 10 {
                                s.trim()
                                    .parse::<f64>()
                                    .ok()
                                    .filter(|f| f.fract() == 0.0)
                                    .map(|f| Value::Int(f as i64))
                                    .ok_or(())
                            } else {
                                Err(())
                            }
                        })
                        .map_err(|_| {
                            ExcValue::value_error(format!(
                                "invalid literal for int() with base {}: '{}'",
                                base, s
                            ))
                        })
                }
                Some(other) => Err(ExcValue::type_error(format!(
                    "int() argument must be a string or a number, not '{}'",
                    other.type_name()
                ))),
            }
        }
        "float" => {
            arg_count("float", args, 0, 1)?;
            match args.first() {
                None => Ok(Value::Float(0.0)),
                Some(Value::Str(s)) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| ExcValue::value_error(format!("could not convert string to float: '{}'", s))),
                Some(v) => v
                    .as_f64()
                    .map(Value::Float)
                    .ok_or_else(|| ExcValue::type_error("float() argument must be a string or a number")),
            }
        }
        "bool" => {
            arg_count("bool", args, 0, 1)?;
            Ok(Value::Bool(args.first().map(|v| v.truthy()).unwrap_or(false)))
        }
        "sum" => {
            arg_count("sum", args, 1, 2)?;
            let items = iterate(&args[0])?;
            let mut acc = args.get(1).cloned().unwrap_or(Value::Int(0));
            for item in items {
                acc = super::ops::binop(super::ast::BinOp::Add, &acc, &item)?;
            }
            Ok(acc)
        }
        "min" | "max" => {
            let items = if args.len() == 1 {
                iterate(&args[0])?
            } else {
                args.to_vec()
            };
            if items.is_empty() {
                return Err(ExcValue::value_error(format!("{}() arg is an empty sequence", name)));
            }
            let mut best = items[0].clone();
            for item in &items[1..] {
                let replace = match item.py_cmp(&best) {
                    Some(ord) => {
                        (name == "min" && ord == std::cmp::Ordering::Less)
                            || (name == "max" && ord == std::cmp::Ordering::Greater)
                    }
                    None => return Err(ExcValue::type_error("values are not comparable")),
                };
                if replace {
                    best = item.clone();
                }
            }
            Ok(best)
        }
        "sorted" => {
            arg_count("sorted", args, 1, 1)?;
            let mut items = iterate(&args[0])?;
            sort_values(&mut items, false)?;
            Ok(Value::list(items))
        }
        "enumerate" => {
            arg_count("enumerate", args, 1, 2)?;
            let start = args.get(1).and_then(|v| v.as_i64()).unwrap_or(0);
            let items = iterate(&args[0])?;
            Ok(Value::list(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| Value::tuple(vec![Value::Int(start + i as i64), v]))
                    .collect(),
            ))
        }
        "zip" => {
            let mut columns = Vec::new();
            for arg in args {
                columns.push(iterate(arg)?);
            }
            let len = columns.iter().map(|c| c.len()).min().unwrap_or(0);
            let mut out = Vec::with_capacity(len);
            for i in 0..len {
                out.push(Value::tuple(columns.iter().map(|c| c[i].clone()).collect()));
            }
            Ok(Value::list(out))
        }
        "reversed" => {
            arg_count("reversed", args, 1, 1)?;
            let mut items = iterate(&args[0])?;
            items.reverse();
            Ok(Value::list(items))
        }
        "abs" => {
            arg_count("abs", args, 1, 1)?;
            match &args[0] {
                Value::Int(i) => Ok(Value::Int(i.abs())),
                Value::Float(f) => Ok(Value::Float(f.abs())),
                other => Err(ExcValue::type_error(format!(
                    "bad operand type for abs(): '{}'",
                    other.type_name()
                ))),
            }
        }
        "round" => {
            arg_count("round", args, 1, 2)?;
            let x = args[0]
                .as_f64()
                .ok_or_else(|| ExcValue::type_error("round() argument must be a number"))?;
            match args.get(1).and_then(|v| v.as_i64()) {
                Some(digits) => {
                    let factor = 10f64.powi(digits as i32);
                    Ok(Value::Float((x * factor).round() / factor))
                }
                None => {
                    // banker's rounding, as in Python
                    let floor = x.floor();
                    let diff = x - floor;
                    let rounded = if (diff - 0.5).abs() < f64::EPSILON {
                        if (floor as i64) % 2 == 0 {
                            floor
                        } else {
                            floor + 1.0
                        }
                    } else {
                        x.round()
                    };
                    Ok(Value::Int(rounded as i64))
                }
            }
        }
        "any" => {
            arg_count("any", args, 1, 1)?;
            Ok(Value::Bool(iterate(&args[0])?.iter().any(|v| v.truthy())))
        }
        "all" => {
            arg_count("all", args, 1, 1)?;
            Ok(Value::Bool(iterate(&args[0])?.iter().all(|v| v.truthy())))
        }
        "isinstance" => {
            arg_count("isinstance", args, 2, 2)?;
            Ok(Value::Bool(isinstance(&args[0], &args[1])?))
        }
        "ord" => {
            arg_count("ord", args, 1, 1)?;
            match &args[0] {
                Value::Str(s) if s.chars().count() == 1 => {
                    Ok(Value::Int(s.chars().next().unwrap() as i64))
                }
                _ => Err(ExcValue::type_error("ord() expected a character")),
            }
        }
        "chr" => {
            arg_count("chr", args, 1, 1)?;
            let code = args[0]
                .as_i64()
                .ok_or_else(|| ExcValue::type_error("an integer is required"))?;
            char::from_u32(code as u32)
                .map(|c| Value::str(c.to_string()))
                .ok_or_else(|| ExcValue::value_error("chr() arg not in range"))
        }
        "divmod" => {
            arg_count("divmod", args, 2, 2)?;
            let q = super::ops::binop(super::ast::BinOp::FloorDiv, &args[0], &args[1])?;
            let r = super::ops::binop(super::ast::BinOp::Mod, &args[0], &args[1])?;
            Ok(Value::tuple(vec![q, r]))
        }
        "pow" => {
            arg_count("pow", args, 2, 3)?;
            let p = super::ops::binop(super::ast::BinOp::Pow, &args[0], &args[1])?;
            match args.get(2) {
                Some(m) => super::ops::binop(super::ast::BinOp::Mod, &p, m),
                None => Ok(p),
            }
        }
        "type" => {
            arg_count("type", args, 1, 1)?;
            match &args[0] {
                Value::Instance(i) => Ok(Value::Class(i.class.clone())),
                other => Ok(Value::str(other.type_name())),
            }
        }
        "hasattr" => {
            arg_count("hasattr", args, 2, 2)?;
            let attr = args[1].str_value();
            match &args[0] {
                Value::Instance(i) => Ok(Value::Bool(
                    i.fields.borrow().contains_key(&attr) || i.class.lookup(&attr).is_some(),
                )),
                Value::Module(m) => Ok(Value::Bool(m.members.contains_key(&attr))),
                _ => Ok(Value::Bool(false)),
            }
        }
        "getattr" => {
            arg_count("getattr", args, 2, 3)?;
            let attr = args[1].str_value();
            let found = match &args[0] {
                Value::Instance(i) => i
                    .fields
                    .borrow()
                    .get(&attr)
                    .cloned()
                    .or_else(|| i.class.lookup(&attr)),
                Value::Module(m) => m.members.get(&attr).cloned(),
                _ => None,
            };
            match (found, args.get(2)) {
                (Some(v), _) => Ok(v),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => Err(ExcValue::attribute_error(format!("no attribute '{}'", attr))),
            }
        }
        _ => Err(ExcValue::name_error(format!("name '{}' is not defined", name))),
    }
}

pub fn isinstance(value: &Value, class: &Value) -> Result<bool, ExcValue> {
    match class {
        Value::Tuple(classes) => {
            for c in classes.iter() {
                if isinstance(value, c)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Value::Builtin(type_name) => Ok(match *type_name {
            "int" => matches!(value, Value::Int(_) | Value::Bool(_)),
            "float" => matches!(value, Value::Float(_)),
            "str" => matches!(value, Value::Str(_)),
            "bool" => matches!(value, Value::Bool(_)),
            "list" => matches!(value, Value::List(_)),
            "dict" => matches!(value, Value::Dict(_)),
            "set" => matches!(value, Value::Set(_)),
            "tuple" => matches!(value, Value::Tuple(_)),
            _ => false,
        }),
        Value::Class(c) => match value {
            Value::Instance(i) => Ok(i.class.is_subclass_of(&c.name)),
            _ => Ok(false),
        },
        Value::ExceptionType(kind) => match value {
            Value::Exception(e) => Ok(*kind == "Exception" || e.kind == *kind),
            _ => Ok(false),
        },
        _ => Err(ExcValue::type_error(
            "isinstance() arg 2 must be a type or tuple of types",
        )),
    }
}

/// Sort values in place using Python ordering; `reverse` flips the order.
pub fn sort_values(items: &mut [Value], reverse: bool) -> Result<(), ExcValue> {
    let mut error = None;
    items.sort_by(|a, b| match a.py_cmp(b) {
        Some(ord) => {
            if reverse {
                ord.reverse()
            } else {
                ord
            }
        }
        None => {
            error.get_or_insert_with(|| {
                ExcValue::type_error(format!(
                    "'<' not supported between instances of '{}' and '{}'",
                    a.type_name(),
                    b.type_name()
                ))
            });
            std::cmp::Ordering::Equal
        }
    });
    match error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Methods on builtin types
// ---------------------------------------------------------------------------

/// Dispatch a method call on a builtin receiver (str/list/dict/set).
pub fn call_method(recv: &Value, method: &str, args: &[Value]) -> Result<Value, ExcValue> {
    match recv {
        Value::Str(s) => str_method(s, method, args),
        Value::List(l) => list_method(l, method, args),
        Value::Dict(d) => dict_method(d, method, args),
        Value::Set(s) => set_method(s, method, args),
        _ => Err(ExcValue::attribute_error(format!(
            "'{}' object has no attribute '{}'",
            recv.type_name(),
            method
        ))),
    }
}

fn str_method(s: &Rc<String>, method: &str, args: &[Value]) -> Result<Value, ExcValue> {
    let str_arg = |i: usize| -> Result<String, ExcValue> {
        args.get(i)
            .map(|v| match v {
                Value::Str(s) => Ok(s.to_string()),
                other => Err(ExcValue::type_error(format!(
                    "expected str argument, got '{}'",
                    other.type_name()
                ))),
            })
            .transpose()
            .map(|o| o.unwrap_or_default())
    };
    match method {
        "upper" => Ok(Value::str(s.to_uppercase())),
        "lower" => Ok(Value::str(s.to_lowercase())),
        "strip" => Ok(Value::str(if args.is_empty() {
            s.trim().to_string()
        } else {
            let chars: Vec<char> = str_arg(0)?.chars().collect();
            s.trim_matches(|c| chars.contains(&c)).to_string()
        })),
        "lstrip" => Ok(Value::str(s.trim_start().to_string())),
        "rstrip" => Ok(Value::str(s.trim_end().to_string())),
        "split" => {
            let parts: Vec<Value> = if args.is_empty() || matches!(args[0], Value::None) {
                s.split_whitespace().map(Value::str).collect()
            } else {
                let sep = str_arg(0)?;
                if sep.is_empty() {
                    return Err(ExcValue::value_error("empty separator"));
                }
                match args.get(1).and_then(|v| v.as_i64()) {
                    Some(maxsplit) if maxsplit >= 0 => {
                        s.splitn(maxsplit as usize + 1, &sep).map(Value::str).collect()
                    }
                    _ => s.split(&sep).map(Value::str).collect(),
                }
            };
            Ok(Value::list(parts))
        }
        "rsplit" => {
            let sep = str_arg(0)?;
            let mut parts: Vec<Value> = s.rsplit(&sep).map(Value::str).collect();
            parts.reverse();
            Ok(Value::list(parts))
        }
        "splitlines" => Ok(Value::list(s.lines().map(Value::str).collect())),
        "join" => {
            let items = iterate(args.first().ok_or_else(|| {
                ExcValue::type_error("join() takes exactly one argument")
            })?)?;
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::Str(p) => parts.push(p.to_string()),
                    other => {
                        return Err(ExcValue::type_error(format!(
                            "sequence item: expected str instance, {} found",
                            other.type_name()
                        )))
                    }
                }
            }
            Ok(Value::str(parts.join(s.as_str())))
        }
        "replace" => Ok(Value::str(s.replace(&str_arg(0)?, &str_arg(1)?))),
        "startswith" => Ok(Value::Bool(s.starts_with(&str_arg(0)?))),
        "endswith" => Ok(Value::Bool(s.ends_with(&str_arg(0)?))),
        "find" => Ok(Value::Int(
            s.find(&str_arg(0)?)
                .map(|byte| s[..byte].chars().count() as i64)
                .unwrap_or(-1),
        )),
        "rfind" => Ok(Value::Int(
            s.rfind(&str_arg(0)?)
                .map(|byte| s[..byte].chars().count() as i64)
                .unwrap_or(-1),
        )),
        "index" => s
            .find(&str_arg(0)?)
            .map(|byte| Value::Int(s[..byte].chars().count() as i64))
            .ok_or_else(|| ExcValue::value_error("substring not found")),
        "count" => {
            let needle = str_arg(0)?;
            if needle.is_empty() {
                return Ok(Value::Int(s.chars().count() as i64 + 1));
            }
            Ok(Value::Int(s.matches(&needle).count() as i64))
        }
        "isdigit" => Ok(Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_ascii_digit()))),
        "isalpha" => Ok(Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_alphabetic()))),
        "isalnum" => Ok(Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_alphanumeric()))),
        "isspace" => Ok(Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_whitespace()))),
        "isupper" => Ok(Value::Bool(s.chars().any(|c| c.is_uppercase()) && !s.chars().any(|c| c.is_lowercase()))),
        "islower" => Ok(Value::Bool(s.chars().any(|c| c.is_lowercase()) && !s.chars().any(|c| c.is_uppercase()))),
        "title" => Ok(Value::str(
            s.split(' ')
                .map(|w| {
                    let mut chars = w.chars();
                    match chars.next() {
                        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
                        None => String::new(),
                    }
                })
                .collect::<Vec<_>>()
                .join(" "),
        )),
        "capitalize" => {
            let mut chars = s.chars();
            Ok(Value::str(match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
                None => String::new(),
            }))
        }
        "zfill" => {
            let width = args.first().and_then(|v| v.as_i64()).unwrap_or(0) as usize;
            let mut out = s.to_string();
            while out.len() < width {
                out.insert(0, '0');
            }
            Ok(Value::str(out))
        }
        "format" => {
            // positional `{}` substitution only
            let mut out = String::new();
            let mut arg_iter = args.iter();
            let mut chars = s.chars().peekable();
            while let Some(c) = chars.next() {
                if c == '{' && chars.peek() == Some(&'}') {
                    chars.next();
                    out.push_str(&arg_iter.next().map(|v| v.str_value()).unwrap_or_default());
                } else {
                    out.push(c);
                }
            }
            Ok(Value::str(out))
        }
        _ => Err(ExcValue::attribute_error(format!(
            "'str' object has no attribute '{}'",
            method
        ))),
    }
}

fn list_method(
    l: &Rc<std::cell::RefCell<Vec<Value>>>,
    method: &str,
    args: &[Value],
) -> Result<Value, ExcValue> {
    match method {
        "append" => {
            l.borrow_mut().push(args.first().cloned().unwrap_or(Value::None));
            Ok(Value::None)
        }
        "extend" => {
            let items = iterate(args.first().ok_or_else(|| {
                ExcValue::type_error("extend() takes exactly one argument")
            })?)?;
            l.borrow_mut().extend(items);
            Ok(Value::None)
        }
        "insert" => {
            let idx = args
                .first()
                .and_then(|v| v.as_i64())
                .ok_or_else(|| ExcValue::type_error("insert() index must be an integer"))?;
            let mut items = l.borrow_mut();
            let idx = if idx < 0 {
                (idx + items.len() as i64).max(0) as usize
            } else {
                (idx as usize).min(items.len())
            };
            items.insert(idx, args.get(1).cloned().unwrap_or(Value::None));
            Ok(Value::None)
        }
        "pop" => {
            let mut items = l.borrow_mut();
            if items.is_empty() {
                return Err(ExcValue::index_error("pop from empty list"));
            }
            let idx = match args.first().and_then(|v| v.as_i64()) {
                Some(i) => {
                    let i = if i < 0 { i + items.len() as i64 } else { i };
                    if i < 0 || i >= items.len() as i64 {
                        return Err(ExcValue::index_error("pop index out of range"));
                    }
                    i as usize
                }
                None => items.len() - 1,
            };
            Ok(items.remove(idx))
        }
        "remove" => {
            let target = args.first().cloned().unwrap_or(Value::None);
            let mut items = l.borrow_mut();
            match items.iter().position(|v| v.py_eq(&target)) {
                Some(idx) => {
                    items.remove(idx);
                    Ok(Value::None)
                }
                None => Err(ExcValue::value_error("list.remove(x): x not in list")),
            }
        }
        "sort" => {
            let reverse = args.first().map(|v| v.truthy()).unwrap_or(false);
            sort_values(&mut l.borrow_mut(), reverse)?;
            Ok(Value::None)
        }
        "reverse" => {
            l.borrow_mut().reverse();
            Ok(Value::None)
        }
        "index" => {
            let target = args.first().cloned().unwrap_or(Value::None);
            l.borrow()
                .iter()
                .position(|v| v.py_eq(&target))
                .map(|i| Value::Int(i as i64))
                .ok_or_else(|| ExcValue::value_error("value not in list"))
        }
        "count" => {
            let target = args.first().cloned().unwrap_or(Value::None);
            Ok(Value::Int(
                l.borrow().iter().filter(|v| v.py_eq(&target)).count() as i64,
            ))
        }
        "clear" => {
            l.borrow_mut().clear();
            Ok(Value::None)
        }
        "copy" => Ok(Value::list(l.borrow().clone())),
        _ => Err(ExcValue::attribute_error(format!(
            "'list' object has no attribute '{}'",
            method
        ))),
    }
}

fn dict_method(
    d: &Rc<std::cell::RefCell<super::value::Dict>>,
    method: &str,
    args: &[Value],
) -> Result<Value, ExcValue> {
    match method {
        "get" => {
            let key = args.first().cloned().unwrap_or(Value::None);
            Ok(d.borrow()
                .get(&key)
                .cloned()
                .unwrap_or_else(|| args.get(1).cloned().unwrap_or(Value::None)))
        }
        "keys" => Ok(Value::list(
            d.borrow().entries.iter().map(|(k, _)| k.clone()).collect(),
        )),
        "values" => Ok(Value::list(
            d.borrow().entries.iter().map(|(_, v)| v.clone()).collect(),
        )),
        "items" => Ok(Value::list(
            d.borrow()
                .entries
                .iter()
                .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
                .collect(),
        )),
        "pop" => {
            let key = args.first().cloned().unwrap_or(Value::None);
            match d.borrow_mut().remove(&key) {
                Some(v) => Ok(v),
                None => args
                    .get(1)
                    .cloned()
                    .ok_or_else(|| ExcValue::key_error(key.repr())),
            }
        }
        "update" => {
            let other = args.first().ok_or_else(|| {
                ExcValue::type_error("update() takes exactly one argument")
            })?;
            match other {
                Value::Dict(o) => {
                    let entries = o.borrow().entries.clone();
                    let mut this = d.borrow_mut();
                    for (k, v) in entries {
                        this.insert(k, v);
                    }
                    Ok(Value::None)
                }
                _ => Err(ExcValue::type_error("update() argument must be a dict")),
            }
        }
        "setdefault" => {
            let key = args.first().cloned().unwrap_or(Value::None);
            let default = args.get(1).cloned().unwrap_or(Value::None);
            let mut this = d.borrow_mut();
            if let Some(v) = this.get(&key) {
                Ok(v.clone())
            } else {
                this.insert(key, default.clone());
                Ok(default)
            }
        }
        "clear" => {
            d.borrow_mut().entries.clear();
            Ok(Value::None)
        }
        "copy" => Ok(Value::dict(d.borrow().entries.clone())),
        _ => Err(ExcValue::attribute_error(format!(
            "'dict' object has no attribute '{}'",
            method
        ))),
    }
}

fn set_method(
    s: &Rc<std::cell::RefCell<Vec<Value>>>,
    method: &str,
    args: &[Value],
) -> Result<Value, ExcValue> {
    match method {
        "add" => {
            let item = args.first().cloned().unwrap_or(Value::None);
            let mut items = s.borrow_mut();
            if !items.iter().any(|v| v.py_eq(&item)) {
                items.push(item);
            }
            Ok(Value::None)
        }
        "remove" => {
            let item = args.first().cloned().unwrap_or(Value::None);
            let mut items = s.borrow_mut();
            match items.iter().position(|v| v.py_eq(&item)) {
                Some(idx) => {
                    items.remove(idx);
                    Ok(Value::None)
                }
                None => Err(ExcValue::key_error(item.repr())),
            }
        }
        "discard" => {
            let item = args.first().cloned().unwrap_or(Value::None);
            let mut items = s.borrow_mut();
            if let Some(idx) = items.iter().position(|v| v.py_eq(&item)) {
                items.remove(idx);
            }
            Ok(Value::None)
        }
        "union" => {
            let mut out = s.borrow().clone();
            for arg in args {
                for item in iterate(arg)? {
                    if !out.iter().any(|v| v.py_eq(&item)) {
                        out.push(item);
                    }
                }
            }
            Ok(Value::set(out))
        }
        "intersection" => {
            let mut out = s.borrow().clone();
            for arg in args {
                let other = iterate(arg)?;
                out.retain(|v| other.iter().any(|o| o.py_eq(v)));
            }
            Ok(Value::set(out))
        }
        "difference" => {
            let mut out = s.borrow().clone();
            for arg in args {
                let other = iterate(arg)?;
                out.retain(|v| !other.iter().any(|o| o.py_eq(v)));
            }
            Ok(Value::set(out))
        }
        "copy" => Ok(Value::set(s.borrow().clone())),
        _ => Err(ExcValue::attribute_error(format!(
            "'set' object has no attribute '{}'",
            method
        ))),
    }
}

// ---------------------------------------------------------------------------
// Module backings
// ---------------------------------------------------------------------------

/// Build the module object for an allowlisted import. Allowlisted names with
/// no backing implementation yield an empty module.
pub fn load_module(name: &str) -> ModuleObj {
    let mut members = HashMap::new();
    match name {
        "math" => {
            for f in [
                "sqrt", "floor", "ceil", "fabs", "pow", "exp", "log", "log2", "log10", "sin",
                "cos", "tan", "asin", "acos", "atan", "atan2", "gcd", "factorial", "isnan",
                "isinf", "hypot", "degrees", "radians",
            ] {
                members.insert(f.to_string(), module_fn("math", f));
            }
            members.insert("pi".to_string(), Value::Float(std::f64::consts::PI));
            members.insert("e".to_string(), Value::Float(std::f64::consts::E));
            members.insert("inf".to_string(), Value::Float(f64::INFINITY));
            members.insert("nan".to_string(), Value::Float(f64::NAN));
        }
        "random" => {
            for f in ["random", "randint", "uniform", "choice", "shuffle", "seed"] {
                members.insert(f.to_string(), module_fn("random", f));
            }
        }
        "json" => {
            for f in ["dumps", "loads"] {
                members.insert(f.to_string(), module_fn("json", f));
            }
        }
        "re" => {
            for f in ["search", "match", "findall", "sub", "split"] {
                members.insert(f.to_string(), module_fn("re", f));
            }
        }
        "statistics" => {
            for f in ["mean", "median", "stdev", "variance"] {
                members.insert(f.to_string(), module_fn("statistics", f));
            }
        }
        "time" => {
            members.insert("time".to_string(), module_fn("time", "time"));
        }
        "itertools" => {
            for f in ["chain", "product", "combinations", "permutations"] {
                members.insert(f.to_string(), module_fn("itertools", f));
            }
        }
        "collections" => {
            members.insert("Counter".to_string(), module_fn("collections", "Counter"));
            members.insert("OrderedDict".to_string(), module_fn("collections", "OrderedDict"));
        }
        _ => {}
    }
    ModuleObj {
        name: name.to_string(),
        members,
    }
}

fn module_fn(module: &str, name: &str) -> Value {
    // leak the joined name so Builtin stays a &'static str; the set of
    // module functions is small and fixed
    let full: &'static str = Box::leak(format!("{}.{}", module, name).into_boxed_str());
    Value::Builtin(full)
}

fn call_math(name: &str, args: &[Value]) -> Result<Value, ExcValue> {
    let f = |i: usize| -> Result<f64, ExcValue> {
        args.get(i)
            .and_then(|v| v.as_f64())
            .ok_or_else(|| ExcValue::type_error("math function argument must be a number"))
    };
    Ok(match name {
        "sqrt" => {
            let x = f(0)?;
            if x < 0.0 {
                return Err(ExcValue::value_error("math domain error"));
            }
            Value::Float(x.sqrt())
        }
        "floor" => Value::Int(f(0)?.floor() as i64),
        "ceil" => Value::Int(f(0)?.ceil() as i64),
        "fabs" => Value::Float(f(0)?.abs()),
        "pow" => Value::Float(f(0)?.powf(f(1)?)),
        "exp" => Value::Float(f(0)?.exp()),
        "log" => {
            let x = f(0)?;
            if x <= 0.0 {
                return Err(ExcValue::value_error("math domain error"));
            }
            match args.get(1) {
                Some(base) => Value::Float(x.log(base.as_f64().unwrap_or(std::f64::consts::E))),
                None => Value::Float(x.ln()),
            }
        }
        "log2" => Value::Float(f(0)?.log2()),
        "log10" => Value::Float(f(0)?.log10()),
        "sin" => Value::Float(f(0)?.sin()),
        "cos" => Value::Float(f(0)?.cos()),
        "tan" => Value::Float(f(0)?.tan()),
        "asin" => Value::Float(f(0)?.asin()),
        "acos" => Value::Float(f(0)?.acos()),
        "atan" => Value::Float(f(0)?.atan()),
        "atan2" => Value::Float(f(0)?.atan2(f(1)?)),
        "hypot" => Value::Float(f(0)?.hypot(f(1)?)),
        "degrees" => Value::Float(f(0)?.to_degrees()),
        "radians" => Value::Float(f(0)?.to_radians()),
        "isnan" => Value::Bool(f(0)?.is_nan()),
        "isinf" => Value::Bool(f(0)?.is_infinite()),
        "gcd" => {
            let (mut a, mut b) = (
                args.first().and_then(|v| v.as_i64()).unwrap_or(0).abs(),
                args.get(1).and_then(|v| v.as_i64()).unwrap_or(0).abs(),
            );
            while b != 0 {
                let t = b;
                b = a % b;
                a = t;
            }
            Value::Int(a)
        }
        "factorial" => {
            let n = args
                .first()
                .and_then(|v| v.as_i64())
                .filter(|n| *n >= 0)
                .ok_or_else(|| ExcValue::value_error("factorial() not defined for negative values"))?;
            let mut acc: i64 = 1;
            for i in 2..=n {
                acc = acc
                    .checked_mul(i)
                    .ok_or_else(|| ExcValue::overflow("factorial() result too large"))?;
            }
            Value::Int(acc)
        }
        _ => return Err(ExcValue::attribute_error(format!("module 'math' has no attribute '{}'", name))),
    })
}

thread_local! {
    static RNG: std::cell::RefCell<rand::rngs::StdRng> =
        std::cell::RefCell::new(rand::rngs::StdRng::seed_from_u64(0x6d696e696f6e));
}

fn call_random(name: &str, args: &[Value]) -> Result<Value, ExcValue> {
    RNG.with(|rng| {
        let mut rng = rng.borrow_mut();
        Ok(match name {
            "random" => Value::Float(rng.gen::<f64>()),
            "uniform" => {
                let a = args.first().and_then(|v| v.as_f64()).unwrap_or(0.0);
                let b = args.get(1).and_then(|v| v.as_f64()).unwrap_or(1.0);
                Value::Float(rng.gen_range(a.min(b)..=a.max(b)))
            }
            "randint" => {
                let a = args.first().and_then(|v| v.as_i64()).unwrap_or(0);
                let b = args.get(1).and_then(|v| v.as_i64()).unwrap_or(0);
                if a > b {
                    return Err(ExcValue::value_error("empty range for randint()"));
                }
                Value::Int(rng.gen_range(a..=b))
            }
            "choice" => {
                let items = iterate(args.first().unwrap_or(&Value::None))?;
                if items.is_empty() {
                    return Err(ExcValue::index_error("cannot choose from an empty sequence"));
                }
                items[rng.gen_range(0..items.len())].clone()
            }
            "shuffle" => {
                match args.first() {
                    Some(Value::List(l)) => {
                        let mut items = l.borrow_mut();
                        let n = items.len();
                        for i in (1..n).rev() {
                            let j = rng.gen_range(0..=i);
                            items.swap(i, j);
                        }
                    }
                    _ => return Err(ExcValue::type_error("shuffle() argument must be a list")),
                }
                Value::None
            }
            "seed" => {
                let seed = args.first().and_then(|v| v.as_i64()).unwrap_or(0) as u64;
                *rng = rand::rngs::StdRng::seed_from_u64(seed);
                Value::None
            }
            _ => {
                return Err(ExcValue::attribute_error(format!(
                    "module 'random' has no attribute '{}'",
                    name
                )))
            }
        })
    })
}

fn call_json(name: &str, args: &[Value]) -> Result<Value, ExcValue> {
    match name {
        "dumps" => Ok(Value::str(
            serde_json::to_string(&args.first().unwrap_or(&Value::None).to_json())
                .map_err(|e| ExcValue::value_error(e.to_string()))?,
        )),
        "loads" => match args.first() {
            Some(Value::Str(s)) => serde_json::from_str::<serde_json::Value>(s)
                .map(|j| Value::from_json(&j))
                .map_err(|e| ExcValue::value_error(format!("invalid JSON: {}", e))),
            _ => Err(ExcValue::type_error("loads() argument must be a string")),
        },
        _ => Err(ExcValue::attribute_error(format!("module 'json' has no attribute '{}'", name))),
    }
}

fn call_re(name: &str, args: &[Value]) -> Result<Value, ExcValue> {
    let pattern = match args.first() {
        Some(Value::Str(p)) => p.to_string(),
        _ => return Err(ExcValue::type_error("first argument must be a pattern string")),
    };
    let re = regex::Regex::new(&pattern)
        .map_err(|e| ExcValue::value_error(format!("invalid pattern: {}", e)))?;
    match name {
        "search" | "match" => {
            let text = args.get(1).map(|v| v.str_value()).unwrap_or_default();
            let found = if name == "match" {
                re.find(&text).filter(|m| m.start() == 0)
            } else {
                re.find(&text)
            };
            Ok(found.map(|m| Value::str(m.as_str())).unwrap_or(Value::None))
        }
        "findall" => {
            let text = args.get(1).map(|v| v.str_value()).unwrap_or_default();
            Ok(Value::list(
                re.find_iter(&text).map(|m| Value::str(m.as_str())).collect(),
            ))
        }
        "sub" => {
            let repl = args.get(1).map(|v| v.str_value()).unwrap_or_default();
            let text = args.get(2).map(|v| v.str_value()).unwrap_or_default();
            Ok(Value::str(re.replace_all(&text, repl.as_str()).to_string()))
        }
        "split" => {
            let text = args.get(1).map(|v| v.str_value()).unwrap_or_default();
            Ok(Value::list(re.split(&text).map(Value::str).collect()))
        }
        _ => Err(ExcValue::attribute_error(format!("module 're' has no attribute '{}'", name))),
    }
}

fn call_statistics(name: &str, args: &[Value]) -> Result<Value, ExcValue> {
    let items = iterate(args.first().unwrap_or(&Value::None))?;
    let nums: Vec<f64> = items
        .iter()
        .map(|v| {
            v.as_f64()
                .ok_or_else(|| ExcValue::type_error("statistics arguments must be numbers"))
        })
        .collect::<Result<_, _>>()?;
    if nums.is_empty() {
        return Err(ExcValue::value_error("statistics argument must be non-empty"));
    }
    let mean = nums.iter().sum::<f64>() / nums.len() as f64;
    Ok(match name {
        "mean" => Value::Float(mean),
        "median" => {
            let mut sorted = nums.clone();
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let mid = sorted.len() / 2;
            if sorted.len() % 2 == 0 {
                Value::Float((sorted[mid - 1] + sorted[mid]) / 2.0)
            } else {
                Value::Float(sorted[mid])
            }
        }
        "variance" | "stdev" => {
            if nums.len() < 2 {
                return Err(ExcValue::value_error("at least two data points required"));
            }
            let var = nums.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (nums.len() - 1) as f64;
            if name == "variance" {
                Value::Float(var)
            } else {
                Value::Float(var.sqrt())
            }
        }
        _ => {
            return Err(ExcValue::attribute_error(format!(
                "module 'statistics' has no attribute '{}'",
                name
            )))
        }
    })
}

fn call_time(name: &str, _args: &[Value]) -> Result<Value, ExcValue> {
    match name {
        "time" => Ok(Value::Float(
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0),
        )),
        _ => Err(ExcValue::attribute_error(format!("module 'time' has no attribute '{}'", name))),
    }
}

fn call_itertools(name: &str, args: &[Value]) -> Result<Value, ExcValue> {
    match name {
        "chain" => {
            let mut out = Vec::new();
            for arg in args {
                out.extend(iterate(arg)?);
            }
            Ok(Value::list(out))
        }
        "product" => {
            let mut result: Vec<Vec<Value>> = vec![Vec::new()];
            for arg in args {
                let pool = iterate(arg)?;
                let mut next = Vec::new();
                for prefix in &result {
                    for item in &pool {
                        let mut row = prefix.clone();
                        row.push(item.clone());
                        next.push(row);
                    }
                }
                result = next;
            }
            Ok(Value::list(result.into_iter().map(Value::tuple).collect()))
        }
        "combinations" => {
            let pool = iterate(args.first().unwrap_or(&Value::None))?;
            let r = args.get(1).and_then(|v| v.as_i64()).unwrap_or(0) as usize;
            let mut out = Vec::new();
            combinations_rec(&pool, r, 0, &mut Vec::new(), &mut out);
            Ok(Value::list(out))
        }
        "permutations" => {
            let pool = iterate(args.first().unwrap_or(&Value::None))?;
            let r = args
                .get(1)
                .and_then(|v| v.as_i64())
                .map(|n| n as usize)
                .unwrap_or(pool.len());
            let mut out = Vec::new();
            permutations_rec(&pool, r, &mut Vec::new(), &mut vec![false; pool.len()], &mut out);
            Ok(Value::list(out))
        }
        _ => Err(ExcValue::attribute_error(format!(
            "module 'itertools' has no attribute '{}'",
            name
        ))),
    }
}

fn combinations_rec(pool: &[Value], r: usize, start: usize, acc: &mut Vec<Value>, out: &mut Vec<Value>) {
    if acc.len() == r {
        out.push(Value::tuple(acc.clone()));
        return;
    }
    for i in start..pool.len() {
        acc.push(pool[i].clone());
        combinations_rec(pool, r, i + 1, acc, out);
        acc.pop();
    }
}

fn permutations_rec(pool: &[Value], r: usize, acc: &mut Vec<Value>, used: &mut Vec<bool>, out: &mut Vec<Value>) {
    if acc.len() == r {
        out.push(Value::tuple(acc.clone()));
        return;
    }
    for i in 0..pool.len() {
        if used[i] {
            continue;
        }
        used[i] = true;
        acc.push(pool[i].clone());
        permutations_rec(pool, r, acc, used, out);
        acc.pop();
        used[i] = false;
    }
}

fn call_collections(name: &str, args: &[Value]) -> Result<Value, ExcValue> {
    match name {
        "Counter" => {
            let items = match args.first() {
                Some(v) => iterate(v)?,
                None => Vec::new(),
            };
            let mut counts: Vec<(Value, i64)> = Vec::new();
            for item in items {
                match counts.iter_mut().find(|(k, _)| k.py_eq(&item)) {
                    Some(entry) => entry.1 += 1,
                    None => counts.push((item, 1)),
                }
            }
            Ok(Value::dict(
                counts.into_iter().map(|(k, n)| (k, Value::Int(n))).collect(),
            ))
        }
        "OrderedDict" => call_builtin("dict", args),
        _ => Err(ExcValue::attribute_error(format!(
            "module 'collections' has no attribute '{}'",
            name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_len_and_range() {
        assert!(call_builtin("len", &[Value::str("abc")]).unwrap().py_eq(&Value::Int(3)));
        let r = call_builtin("range", &[Value::Int(5)]).unwrap();
        assert_eq!(r.len(), Some(5));
    }

    #[test]
    fn test_int_conversion() {
        assert!(call_builtin("int", &[Value::str("42")]).unwrap().py_eq(&Value::Int(42)));
        assert!(call_builtin("int", &[Value::Float(3.9)]).unwrap().py_eq(&Value::Int(3)));
        assert!(call_builtin("int", &[Value::str("ff"), Value::Int(16)])
            .unwrap()
            .py_eq(&Value::Int(255)));
        assert!(call_builtin("int", &[Value::str("oops")]).is_err());
    }

    #[test]
    fn test_sum_min_max_sorted() {
        let xs = Value::list(vec![Value::Int(3), Value::Int(1), Value::Int(2)]);
        assert!(call_builtin("sum", &[xs.clone()]).unwrap().py_eq(&Value::Int(6)));
        assert!(call_builtin("min", &[xs.clone()]).unwrap().py_eq(&Value::Int(1)));
        assert!(call_builtin("max", &[xs.clone()]).unwrap().py_eq(&Value::Int(3)));
        let sorted = call_builtin("sorted", &[xs]).unwrap();
        assert_eq!(sorted.repr(), "[1, 2, 3]");
    }

    #[test]
    fn test_str_methods() {
        let s = Value::str("  Hello World  ");
        assert_eq!(call_method(&s, "strip", &[]).unwrap().str_value(), "Hello World");
        let s = Value::str("a,b,c");
        let parts = call_method(&s, "split", &[Value::str(",")]).unwrap();
        assert_eq!(parts.len(), Some(3));
        let sep = Value::str("-");
        let joined = call_method(&sep, "join", &[parts]).unwrap();
        assert_eq!(joined.str_value(), "a-b-c");
    }

    #[test]
    fn test_list_methods() {
        let l = Value::list(vec![Value::Int(1)]);
        call_method(&l, "append", &[Value::Int(2)]).unwrap();
        assert_eq!(l.len(), Some(2));
        let popped = call_method(&l, "pop", &[]).unwrap();
        assert!(popped.py_eq(&Value::Int(2)));
    }

    #[test]
    fn test_dict_methods() {
        let d = Value::dict(vec![(Value::str("a"), Value::Int(1))]);
        assert!(call_method(&d, "get", &[Value::str("a")]).unwrap().py_eq(&Value::Int(1)));
        assert!(call_method(&d, "get", &[Value::str("z"), Value::Int(9)])
            .unwrap()
            .py_eq(&Value::Int(9)));
    }

    #[test]
    fn test_math_module() {
        assert!(call_builtin("math.sqrt", &[Value::Int(16)]).unwrap().py_eq(&Value::Float(4.0)));
        assert!(call_builtin("math.gcd", &[Value::Int(12), Value::Int(18)])
            .unwrap()
            .py_eq(&Value::Int(6)));
        assert!(call_builtin("math.sqrt", &[Value::Int(-1)]).is_err());
    }

    #[test]
    fn test_json_module() {
        let v = call_builtin("json.loads", &[Value::str(r#"{"a": [1, 2]}"#)]).unwrap();
        let s = call_builtin("json.dumps", &[v]).unwrap();
        assert_eq!(s.str_value(), r#"{"a":[1,2]}"#);
    }

    #[test]
    fn test_random_is_deterministic_after_seed() {
        call_builtin("random.seed", &[Value::Int(7)]).unwrap();
        let a = call_builtin("random.randint", &[Value::Int(0), Value::Int(100)]).unwrap();
        call_builtin("random.seed", &[Value::Int(7)]).unwrap();
        let b = call_builtin("random.randint", &[Value::Int(0), Value::Int(100)]).unwrap();
        assert!(a.py_eq(&b));
    }

    #[test]
    fn test_counter() {
        let xs = Value::list(vec![Value::str("a"), Value::str("b"), Value::str("a")]);
        let counts = call_builtin("collections.Counter", &[xs]).unwrap();
        assert!(super::super::ops::get_index(&counts, &Value::str("a"))
            .unwrap()
            .py_eq(&Value::Int(2)));
    }
}
