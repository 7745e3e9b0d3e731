//! Runtime values for the sandboxed interpreter.
//!
//! Values are reference-counted; lists, dicts, sets, and instances have
//! interior mutability. Dicts are insertion-ordered association vectors keyed
//! by value equality, which keeps arbitrary values usable as keys without a
//! hash requirement.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use super::ast::{Expr, FuncDecl, Params};
use crate::tools::Tool;

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<String>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<Vec<Value>>),
    Dict(Rc<RefCell<Dict>>),
    Set(Rc<RefCell<Vec<Value>>>),
    Range {
        start: i64,
        stop: i64,
        step: i64,
    },
    Function(Rc<PyFunction>),
    /// Builtin function or module member, dispatched by name.
    Builtin(&'static str),
    /// A user-registered native function (e.g. an injected `input`).
    Native(NativeFn),
    BoundMethod {
        recv: Box<Value>,
        method: Rc<PyFunction>,
    },
    /// Builtin method bound to a receiver, e.g. `"-".join`.
    MethodRef {
        recv: Box<Value>,
        name: Rc<String>,
    },
    Class(Rc<ClassObj>),
    Instance(Rc<InstanceObj>),
    Exception(Rc<ExcValue>),
    /// An exception class usable in `raise`/`except` and as a constructor.
    ExceptionType(&'static str),
    Tool(ToolHandle),
    Module(Rc<ModuleObj>),
}

pub type NativeFn = Rc<dyn Fn(Vec<Value>) -> Result<Value, ExcValue>>;

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<{} value>", self.type_name())
    }
}

#[derive(Default)]
pub struct Dict {
    pub entries: Vec<(Value, Value)>,
}

impl Dict {
    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k.py_eq(key)).map(|(_, v)| v)
    }

    pub fn insert(&mut self, key: Value, value: Value) {
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| k.py_eq(&key)) {
            entry.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        let idx = self.entries.iter().position(|(k, _)| k.py_eq(key))?;
        Some(self.entries.remove(idx).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

pub struct PyFunction {
    pub name: String,
    pub params: Params,
    /// Defaults evaluated at definition time, aligned to the tail of
    /// `params.names`.
    pub defaults: Vec<Value>,
    pub body: FuncBody,
    pub is_async: bool,
    pub doc: Option<String>,
}

pub enum FuncBody {
    Block(Rc<FuncDecl>),
    Expr(Rc<Expr>),
}

pub struct ClassObj {
    pub name: String,
    pub bases: Vec<Rc<ClassObj>>,
    pub attrs: RefCell<HashMap<String, Value>>,
}

impl ClassObj {
    /// Look up an attribute on this class or its bases (method resolution in
    /// definition order).
    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.attrs.borrow().get(name) {
            return Some(v.clone());
        }
        for base in &self.bases {
            if let Some(v) = base.lookup(name) {
                return Some(v);
            }
        }
        None
    }

    pub fn is_subclass_of(&self, name: &str) -> bool {
        self.name == name || self.bases.iter().any(|b| b.is_subclass_of(name))
    }
}

pub struct InstanceObj {
    pub class: Rc<ClassObj>,
    pub fields: RefCell<HashMap<String, Value>>,
}

/// A raised exception value.
#[derive(Debug, Clone)]
pub struct ExcValue {
    pub kind: String,
    pub message: String,
}

impl ExcValue {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new("TypeError", message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new("ValueError", message)
    }

    pub fn key_error(message: impl Into<String>) -> Self {
        Self::new("KeyError", message)
    }

    pub fn index_error(message: impl Into<String>) -> Self {
        Self::new("IndexError", message)
    }

    pub fn name_error(message: impl Into<String>) -> Self {
        Self::new("NameError", message)
    }

    pub fn attribute_error(message: impl Into<String>) -> Self {
        Self::new("AttributeError", message)
    }

    pub fn zero_division(message: impl Into<String>) -> Self {
        Self::new("ZeroDivisionError", message)
    }

    pub fn assertion(message: impl Into<String>) -> Self {
        Self::new("AssertionError", message)
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new("RuntimeError", message)
    }

    pub fn overflow(message: impl Into<String>) -> Self {
        Self::new("OverflowError", message)
    }
}

impl std::fmt::Display for ExcValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.message)
        }
    }
}

/// The set of recognized exception class names.
pub const EXCEPTION_TYPES: &[&str] = &[
    "Exception",
    "ValueError",
    "TypeError",
    "KeyError",
    "IndexError",
    "NameError",
    "AttributeError",
    "ZeroDivisionError",
    "RuntimeError",
    "AssertionError",
    "StopIteration",
    "OverflowError",
    "NotImplementedError",
];

/// Callable tool bound into the interpreter namespace.
#[derive(Clone)]
pub struct ToolHandle {
    pub name: String,
    /// Declared parameter names in order, for positional-argument mapping.
    pub param_names: Vec<String>,
    pub kind: ToolKind,
}

#[derive(Clone)]
pub enum ToolKind {
    /// Synchronous native closure; callable from both executors.
    Sync(Rc<dyn Fn(serde_json::Value) -> anyhow::Result<serde_json::Value>>),
    /// Async tool from the shared tool surface; async executor only.
    Async(Arc<dyn Tool>),
}

pub struct ModuleObj {
    pub name: String,
    pub members: HashMap<String, Value>,
}

impl Value {
    pub fn str(s: impl Into<String>) -> Value {
        Value::Str(Rc::new(s.into()))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Rc::new(items))
    }

    pub fn dict(entries: Vec<(Value, Value)>) -> Value {
        let mut d = Dict::default();
        for (k, v) in entries {
            d.insert(k, v);
        }
        Value::Dict(Rc::new(RefCell::new(d)))
    }

    pub fn set(items: Vec<Value>) -> Value {
        let mut unique: Vec<Value> = Vec::new();
        for item in items {
            if !unique.iter().any(|v| v.py_eq(&item)) {
                unique.push(item);
            }
        }
        Value::Set(Rc::new(RefCell::new(unique)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Set(_) => "set",
            Value::Range { .. } => "range",
            Value::Function(_) | Value::Native(_) => "function",
            Value::Builtin(_) => "builtin_function_or_method",
            Value::BoundMethod { .. } | Value::MethodRef { .. } => "method",
            Value::Class(_) => "type",
            Value::Instance(_) => "object",
            Value::Exception(_) => "Exception",
            Value::ExceptionType(_) => "type",
            Value::Tool(_) => "tool",
            Value::Module(_) => "module",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.borrow().is_empty(),
            Value::Tuple(t) => !t.is_empty(),
            Value::Dict(d) => d.borrow().len() > 0,
            Value::Set(s) => !s.borrow().is_empty(),
            Value::Range { start, stop, step } => {
                if *step > 0 {
                    start < stop
                } else {
                    start > stop
                }
            }
            _ => true,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(if *b { 1 } else { 0 }),
            _ => None,
        }
    }

    pub fn len(&self) -> Option<usize> {
        match self {
            Value::Str(s) => Some(s.chars().count()),
            Value::List(l) => Some(l.borrow().len()),
            Value::Tuple(t) => Some(t.len()),
            Value::Dict(d) => Some(d.borrow().len()),
            Value::Set(s) => Some(s.borrow().len()),
            Value::Range { start, stop, step } => {
                let len = if *step > 0 {
                    (stop - start + step - 1).max(0) / step
                } else if *step < 0 {
                    (start - stop - step - 1).max(0) / -step
                } else {
                    0
                };
                Some(len as usize)
            }
            _ => None,
        }
    }

    /// Python `==`.
    pub fn py_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                *a as f64 == *b
            }
            (Value::Bool(a), Value::Int(b)) | (Value::Int(b), Value::Bool(a)) => {
                (*a as i64) == *b
            }
            (Value::List(a), Value::List(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.py_eq(y))
            }
            (Value::Tuple(a), Value::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.py_eq(y))
            }
            (Value::Dict(a), Value::Dict(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len()
                    && a.entries
                        .iter()
                        .all(|(k, v)| b.get(k).map(|bv| bv.py_eq(v)).unwrap_or(false))
            }
            (Value::Set(a), Value::Set(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().all(|x| b.iter().any(|y| x.py_eq(y)))
            }
            (Value::Range { start: s1, stop: e1, step: t1 }, Value::Range { start: s2, stop: e2, step: t2 }) => {
                s1 == s2 && e1 == e2 && t1 == t2
            }
            (Value::Instance(a), Value::Instance(b)) => Rc::ptr_eq(a, b),
            (Value::Class(a), Value::Class(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Python ordering (`<`, `>` etc.). None means the types do not compare.
    pub fn py_cmp(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::List(a), Value::List(b)) => {
                seq_cmp(a.borrow().as_slice(), b.borrow().as_slice())
            }
            (Value::Tuple(a), Value::Tuple(b)) => seq_cmp(a.as_slice(), b.as_slice()),
            _ => {
                let (a, b) = (self.as_f64()?, other.as_f64()?);
                a.partial_cmp(&b)
            }
        }
    }

    /// Python `str()`.
    pub fn str_value(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            Value::Exception(e) => e.message.clone(),
            _ => self.repr(),
        }
    }

    /// Python `repr()`.
    pub fn repr(&self) -> String {
        match self {
            Value::None => "None".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Str(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            Value::List(l) => {
                let items: Vec<String> = l.borrow().iter().map(|v| v.repr()).collect();
                format!("[{}]", items.join(", "))
            }
            Value::Tuple(t) => {
                let items: Vec<String> = t.iter().map(|v| v.repr()).collect();
                if items.len() == 1 {
                    format!("({},)", items[0])
                } else {
                    format!("({})", items.join(", "))
                }
            }
            Value::Dict(d) => {
                let items: Vec<String> = d
                    .borrow()
                    .entries
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.repr(), v.repr()))
                    .collect();
                format!("{{{}}}", items.join(", "))
            }
            Value::Set(s) => {
                let inner = s.borrow();
                if inner.is_empty() {
                    "set()".to_string()
                } else {
                    let items: Vec<String> = inner.iter().map(|v| v.repr()).collect();
                    format!("{{{}}}", items.join(", "))
                }
            }
            Value::Range { start, stop, step } => {
                if *step == 1 {
                    format!("range({}, {})", start, stop)
                } else {
                    format!("range({}, {}, {})", start, stop, step)
                }
            }
            Value::Function(f) => format!("<function {}>", f.name),
            Value::Native(_) => "<function>".to_string(),
            Value::Builtin(name) => format!("<built-in function {}>", name),
            Value::BoundMethod { method, .. } => format!("<bound method {}>", method.name),
            Value::MethodRef { name, .. } => format!("<built-in method {}>", name),
            Value::Class(c) => format!("<class '{}'>", c.name),
            Value::Instance(i) => format!("<{} object>", i.class.name),
            Value::Exception(e) => format!("{}({:?})", e.kind, e.message),
            Value::ExceptionType(name) => format!("<class '{}'>", name),
            Value::Tool(t) => format!("<tool {}>", t.name),
            Value::Module(m) => format!("<module '{}'>", m.name),
        }
    }

    /// Convert to JSON for tool dispatch. Non-representable values degrade to
    /// their string form.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Value::None => J::Null,
            Value::Bool(b) => J::Bool(*b),
            Value::Int(i) => J::Number((*i).into()),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(J::Number)
                .unwrap_or(J::Null),
            Value::Str(s) => J::String(s.to_string()),
            Value::List(l) => J::Array(l.borrow().iter().map(|v| v.to_json()).collect()),
            Value::Tuple(t) => J::Array(t.iter().map(|v| v.to_json()).collect()),
            Value::Set(s) => J::Array(s.borrow().iter().map(|v| v.to_json()).collect()),
            Value::Dict(d) => {
                let mut map = serde_json::Map::new();
                for (k, v) in &d.borrow().entries {
                    map.insert(k.str_value(), v.to_json());
                }
                J::Object(map)
            }
            other => J::String(other.str_value()),
        }
    }

    pub fn from_json(json: &serde_json::Value) -> Value {
        use serde_json::Value as J;
        match json {
            J::Null => Value::None,
            J::Bool(b) => Value::Bool(*b),
            J::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            J::String(s) => Value::str(s.clone()),
            J::Array(items) => Value::list(items.iter().map(Value::from_json).collect()),
            J::Object(map) => Value::dict(
                map.iter()
                    .map(|(k, v)| (Value::str(k.clone()), Value::from_json(v)))
                    .collect(),
            ),
        }
    }
}

fn seq_cmp(a: &[Value], b: &[Value]) -> Option<Ordering> {
    for (x, y) in a.iter().zip(b.iter()) {
        if x.py_eq(y) {
            continue;
        }
        return x.py_cmp(y);
    }
    Some(a.len().cmp(&b.len()))
}

/// Format a float the way Python's `str()` does for the common cases.
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if f == f.trunc() && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_py_eq_across_numeric_types() {
        assert!(Value::Int(3).py_eq(&Value::Float(3.0)));
        assert!(Value::Bool(true).py_eq(&Value::Int(1)));
        assert!(!Value::Int(3).py_eq(&Value::str("3")));
    }

    #[test]
    fn test_dict_insert_and_lookup() {
        let mut d = Dict::default();
        d.insert(Value::str("a"), Value::Int(1));
        d.insert(Value::str("a"), Value::Int(2));
        assert_eq!(d.len(), 1);
        assert!(d.get(&Value::str("a")).unwrap().py_eq(&Value::Int(2)));
    }

    #[test]
    fn test_repr() {
        assert_eq!(Value::list(vec![Value::Int(1), Value::str("x")]).repr(), "[1, 'x']");
        assert_eq!(Value::tuple(vec![Value::Int(1)]).repr(), "(1,)");
        assert_eq!(Value::Float(2.0).repr(), "2.0");
        assert_eq!(Value::Bool(true).repr(), "True");
    }

    #[test]
    fn test_range_len() {
        let r = Value::Range { start: 0, stop: 10, step: 3 };
        assert_eq!(r.len(), Some(4));
        let r = Value::Range { start: 10, stop: 0, step: -2 };
        assert_eq!(r.len(), Some(5));
    }

    #[test]
    fn test_json_round_trip() {
        let v = Value::dict(vec![
            (Value::str("n"), Value::Int(3)),
            (Value::str("xs"), Value::list(vec![Value::Bool(true), Value::None])),
        ]);
        let json = v.to_json();
        assert_eq!(json["n"], 3);
        let back = Value::from_json(&json);
        assert!(back.py_eq(&v));
    }

    #[test]
    fn test_seq_ordering() {
        let a = Value::list(vec![Value::Int(1), Value::Int(2)]);
        let b = Value::list(vec![Value::Int(1), Value::Int(3)]);
        assert_eq!(a.py_cmp(&b), Some(Ordering::Less));
    }
}
