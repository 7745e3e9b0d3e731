//! Tree-walking evaluator shared by the sync and async executors.
//!
//! Written as a single async walker with boxed recursion. The sync executor
//! runs it with `async_mode = false`, in which configuration every future
//! resolves on first poll (tool dispatch is restricted to synchronous
//! handles), so driving it with a no-op waker never blocks.

use std::collections::HashMap;
use std::rc::Rc;

use futures::future::LocalBoxFuture;

use super::ast::*;
use super::builtins::{self, iterate, BUILTIN_NAMES};
use super::ops;
use super::value::{
    ClassObj, ExcValue, FuncBody, InstanceObj, PyFunction, ToolHandle, ToolKind, Value,
    EXCEPTION_TYPES,
};
use super::InterpreterError;

/// Non-local control flow during evaluation.
pub enum Flow {
    /// Sandbox-level failure; not catchable by interpreted `except`.
    Error(InterpreterError),
    /// A raised Python exception; catchable.
    Raise(ExcValue),
    Break,
    Continue,
    Return(Value),
    FinalAnswer(Value),
}

impl From<ExcValue> for Flow {
    fn from(e: ExcValue) -> Self {
        Flow::Raise(e)
    }
}

impl From<InterpreterError> for Flow {
    fn from(e: InterpreterError) -> Self {
        Flow::Error(e)
    }
}

pub type EvalResult<T> = Result<T, Flow>;

pub struct Interp {
    pub globals: HashMap<String, Value>,
    /// Tools bound into the namespace (callable by sanitized name).
    pub tools: HashMap<String, Value>,
    pub authorized_imports: Vec<String>,
    pub max_operations: u64,
    pub ops: u64,
    pub max_print_len: usize,
    pub print_buffer: String,
    print_truncated: bool,
    pub async_mode: bool,
    /// Local scope stack for function calls; empty at module level.
    scopes: Vec<HashMap<String, Value>>,
    /// Names declared `global` in the current function scopes.
    global_decls: Vec<Vec<String>>,
}

impl Interp {
    pub fn new(authorized_imports: Vec<String>, max_operations: u64, max_print_len: usize, async_mode: bool) -> Self {
        Self {
            globals: HashMap::new(),
            tools: HashMap::new(),
            authorized_imports,
            max_operations,
            ops: 0,
            max_print_len,
            print_buffer: String::new(),
            print_truncated: false,
            async_mode,
            scopes: Vec::new(),
            global_decls: Vec::new(),
        }
    }

    pub fn reset_run(&mut self) {
        self.ops = 0;
        self.print_buffer.clear();
        self.print_truncated = false;
        self.scopes.clear();
        self.global_decls.clear();
    }

    fn tick(&mut self) -> Result<(), Flow> {
        self.ops += 1;
        if self.ops > self.max_operations {
            return Err(Flow::Error(InterpreterError::OperationLimit));
        }
        Ok(())
    }

    pub fn emit_print(&mut self, text: &str) {
        if self.print_truncated {
            return;
        }
        self.print_buffer.push_str(text);
        if self.print_buffer.len() > self.max_print_len {
            self.print_buffer.truncate(self.max_print_len);
            self.print_buffer
                .push_str("\n_Print outputs were over the limit, so they have been truncated._\n");
            self.print_truncated = true;
        }
    }

    // ------------------------------------------------------------------
    // Name resolution
    // ------------------------------------------------------------------

    fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(scope) = self.scopes.last() {
            if let Some(v) = scope.get(name) {
                return Some(v.clone());
            }
        }
        if let Some(v) = self.globals.get(name) {
            return Some(v.clone());
        }
        if let Some(v) = self.tools.get(name) {
            return Some(v.clone());
        }
        if BUILTIN_NAMES.contains(&name) {
            return Some(Value::Builtin(
                BUILTIN_NAMES.iter().find(|n| **n == name).copied().unwrap(),
            ));
        }
        if let Some(kind) = EXCEPTION_TYPES.iter().find(|k| **k == name) {
            return Some(Value::ExceptionType(kind));
        }
        if name == "final_answer" {
            return Some(Value::Builtin("final_answer"));
        }
        // the grouped tool namespace and the parallel helper resolve without
        // an explicit import
        if name == "functions" {
            let members: HashMap<String, Value> = self
                .tools
                .iter()
                .filter(|(_, v)| matches!(v, Value::Tool(_) | Value::Native(_)))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            return Some(Value::Module(Rc::new(super::value::ModuleObj {
                name: "functions".to_string(),
                members,
            })));
        }
        if name == "multi_tool_use" {
            let mut members = HashMap::new();
            members.insert(
                "parallel".to_string(),
                Value::Builtin("multi_tool_use.parallel"),
            );
            return Some(Value::Module(Rc::new(super::value::ModuleObj {
                name: "multi_tool_use".to_string(),
                members,
            })));
        }
        None
    }

    fn bind(&mut self, name: &str, value: Value) -> Result<(), Flow> {
        if self.tools.contains_key(name) {
            return Err(Flow::Error(InterpreterError::Runtime(format!(
                "cannot assign to tool name '{}'",
                name
            ))));
        }
        let is_global_decl = self
            .global_decls
            .last()
            .map(|names| names.iter().any(|n| n == name))
            .unwrap_or(false);
        match self.scopes.last_mut() {
            Some(scope) if !is_global_decl => {
                scope.insert(name.to_string(), value);
            }
            _ => {
                self.globals.insert(name.to_string(), value);
            }
        }
        Ok(())
    }

    /// Bind without the tool-shadowing check; used by imports, which may
    /// legitimately re-bind a tool under its own name.
    fn bind_unchecked(&mut self, name: &str, value: Value) {
        match self.scopes.last_mut() {
            Some(scope) => {
                scope.insert(name.to_string(), value);
            }
            None => {
                self.globals.insert(name.to_string(), value);
            }
        }
    }

    fn unbind(&mut self, name: &str) -> Result<(), Flow> {
        let removed = match self.scopes.last_mut() {
            Some(scope) => scope.remove(name).is_some() || self.globals.remove(name).is_some(),
            None => self.globals.remove(name).is_some(),
        };
        if removed {
            Ok(())
        } else {
            Err(ExcValue::name_error(format!("name '{}' is not defined", name)).into())
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    pub fn eval_block<'a>(&'a mut self, stmts: &'a [Stmt]) -> LocalBoxFuture<'a, EvalResult<Value>> {
        Box::pin(async move {
            let mut last = Value::None;
            for stmt in stmts {
                last = self.eval_stmt(stmt).await?;
            }
            Ok(last)
        })
    }

    /// Evaluate one statement at module level, applying the REPL-style
    /// auto-print rule for bare expressions.
    ///
    /// Only literal `print(...)` calls are exempt from the auto-print: any
    /// other bare expression, tool calls included, lands its value in the
    /// logs so it always reaches the observation.
    pub async fn eval_top_stmt(&mut self, stmt: &Stmt) -> EvalResult<Value> {
        if let StmtKind::Expr(expr) = &stmt.kind {
            let value = self.eval_expr(expr).await?;
            self.globals.insert("_".to_string(), value.clone());
            if !is_print_call(expr) && !matches!(value, Value::None) {
                let shown = if matches!(expr.kind, ExprKind::Name(_)) {
                    value.repr()
                } else {
                    value.str_value()
                };
                self.emit_print(&shown);
                self.emit_print("\n");
            }
            return Ok(value);
        }
        self.eval_stmt(stmt).await
    }

    fn eval_stmt<'a>(&'a mut self, stmt: &'a Stmt) -> LocalBoxFuture<'a, EvalResult<Value>> {
        Box::pin(async move {
            self.tick()?;
            match &stmt.kind {
                StmtKind::Expr(expr) => self.eval_expr(expr).await,
                StmtKind::Assign { targets, value } => {
                    let value = self.eval_expr(value).await?;
                    for target in targets {
                        self.assign(target, value.clone()).await?;
                    }
                    Ok(value)
                }
                StmtKind::AugAssign { target, op, value } => {
                    let current = self.eval_expr(target).await?;
                    let rhs = self.eval_expr(value).await?;
                    let updated = ops::binop(*op, &current, &rhs)?;
                    self.assign(target, updated.clone()).await?;
                    Ok(updated)
                }
                StmtKind::If { cond, body, orelse } => {
                    if self.eval_expr(cond).await?.truthy() {
                        self.eval_block(body).await
                    } else {
                        self.eval_block(orelse).await
                    }
                }
                StmtKind::While { cond, body, orelse } => {
                    let mut result = Value::None;
                    loop {
                        self.tick()?;
                        if !self.eval_expr(cond).await?.truthy() {
                            result = self.eval_block(orelse).await?;
                            break;
                        }
                        match self.eval_block(body).await {
                            Ok(v) => result = v,
                            Err(Flow::Break) => break,
                            Err(Flow::Continue) => continue,
                            Err(other) => return Err(other),
                        }
                    }
                    Ok(result)
                }
                StmtKind::For {
                    target,
                    iter,
                    body,
                    orelse,
                } => {
                    let iterable = self.eval_expr(iter).await?;
                    let mut result = Value::None;
                    let mut broke = false;
                    // ranges iterate lazily; everything else is snapshotted
                    if let Value::Range { start, stop, step } = &iterable {
                        let (mut i, stop, step) = (*start, *stop, *step);
                        while (step > 0 && i < stop) || (step < 0 && i > stop) {
                            self.tick()?;
                            self.assign(target, Value::Int(i)).await?;
                            match self.eval_block(body).await {
                                Ok(v) => result = v,
                                Err(Flow::Break) => {
                                    broke = true;
                                    break;
                                }
                                Err(Flow::Continue) => {}
                                Err(other) => return Err(other),
                            }
                            i += step;
                        }
                    } else {
                        for item in iterate(&iterable)? {
                            self.tick()?;
                            self.assign(target, item).await?;
                            match self.eval_block(body).await {
                                Ok(v) => result = v,
                                Err(Flow::Break) => {
                                    broke = true;
                                    break;
                                }
                                Err(Flow::Continue) => {}
                                Err(other) => return Err(other),
                            }
                        }
                    }
                    if !broke {
                        result = self.eval_block(orelse).await?;
                    }
                    Ok(result)
                }
                StmtKind::FuncDef(decl) => {
                    let mut defaults = Vec::new();
                    for default in &decl.params.defaults {
                        defaults.push(self.eval_expr(default).await?);
                    }
                    let function = Value::Function(Rc::new(PyFunction {
                        name: decl.name.clone(),
                        params: decl.params.clone(),
                        defaults,
                        body: FuncBody::Block(decl.clone()),
                        is_async: decl.is_async,
                        doc: decl.docstring.clone(),
                    }));
                    self.bind(&decl.name, function.clone())?;
                    Ok(function)
                }
                StmtKind::ClassDef { name, bases, body } => {
                    let mut base_classes = Vec::new();
                    for base in bases {
                        match self.eval_expr(base).await? {
                            Value::Class(c) => base_classes.push(c),
                            Value::ExceptionType(_) => {}
                            other => {
                                return Err(ExcValue::type_error(format!(
                                    "class base must be a class, not '{}'",
                                    other.type_name()
                                ))
                                .into())
                            }
                        }
                    }
                    // class body executes in its own scope; bindings become attrs
                    self.scopes.push(HashMap::new());
                    self.global_decls.push(Vec::new());
                    let body_result = self.eval_block(body).await;
                    self.global_decls.pop();
                    let attrs = self.scopes.pop().unwrap_or_default();
                    body_result?;
                    let class = Value::Class(Rc::new(ClassObj {
                        name: name.clone(),
                        bases: base_classes,
                        attrs: std::cell::RefCell::new(attrs),
                    }));
                    self.bind(name, class.clone())?;
                    Ok(class)
                }
                StmtKind::Return(value) => {
                    let value = match value {
                        Some(expr) => self.eval_expr(expr).await?,
                        None => Value::None,
                    };
                    Err(Flow::Return(value))
                }
                StmtKind::Break => Err(Flow::Break),
                StmtKind::Continue => Err(Flow::Continue),
                StmtKind::Pass => Ok(Value::None),
                StmtKind::Import { module, alias } => {
                    let value = self.import_module(module)?;
                    let bind_name = alias
                        .clone()
                        .unwrap_or_else(|| module.split('.').next().unwrap_or(module).to_string());
                    self.bind_unchecked(&bind_name, value);
                    Ok(Value::None)
                }
                StmtKind::FromImport { module, names } => {
                    let module_value = self.import_module(module)?;
                    let Value::Module(m) = &module_value else {
                        return Err(ExcValue::type_error("not a module").into());
                    };
                    if names.len() == 1 && names[0].0 == "*" {
                        let members: Vec<(String, Value)> = m
                            .members
                            .iter()
                            .map(|(k, v)| (k.clone(), v.clone()))
                            .collect();
                        for (k, v) in members {
                            self.bind_unchecked(&k, v);
                        }
                    } else {
                        for (name, alias) in names {
                            let member = m.members.get(name).cloned().ok_or_else(|| {
                                Flow::Raise(ExcValue::new(
                                    "ImportError",
                                    format!("cannot import name '{}' from '{}'", name, module),
                                ))
                            })?;
                            self.bind_unchecked(alias.as_ref().unwrap_or(name), member);
                        }
                    }
                    Ok(Value::None)
                }
                StmtKind::Try {
                    body,
                    handlers,
                    orelse,
                    finally,
                } => {
                    let mut outcome = self.eval_block(body).await;
                    if outcome.is_ok() {
                        outcome = self.eval_block(orelse).await;
                    } else if let Err(Flow::Raise(exc)) = &outcome {
                        let exc = exc.clone();
                        for handler in handlers {
                            let matches = handler.kinds.is_empty()
                                || handler.kinds.iter().any(|k| {
                                    k == "Exception" || k == "BaseException" || *k == exc.kind
                                });
                            if matches {
                                if let Some(binding) = &handler.binding {
                                    self.bind(binding, Value::Exception(Rc::new(exc.clone())))?;
                                }
                                outcome = self.eval_block(&handler.body).await;
                                break;
                            }
                        }
                    }
                    let finally_result = self.eval_block(finally).await;
                    // a flow escaping finally wins over the body outcome
                    finally_result?;
                    outcome
                }
                StmtKind::Raise { exc } => match exc {
                    None => Err(ExcValue::runtime("No active exception to re-raise").into()),
                    Some(expr) => {
                        let value = self.eval_expr(expr).await?;
                        match value {
                            Value::Exception(e) => Err(Flow::Raise((*e).clone())),
                            Value::ExceptionType(kind) => {
                                Err(Flow::Raise(ExcValue::new(kind, "")))
                            }
                            // instances of user exception classes raise under
                            // their class name
                            Value::Instance(inst) => {
                                let message = inst
                                    .fields
                                    .borrow()
                                    .get("message")
                                    .map(|v| v.str_value())
                                    .unwrap_or_default();
                                Err(Flow::Raise(ExcValue::new(inst.class.name.clone(), message)))
                            }
                            Value::Str(s) => Err(Flow::Raise(ExcValue::new("Exception", s.to_string()))),
                            other => Err(ExcValue::type_error(format!(
                                "exceptions must derive from BaseException, not '{}'",
                                other.type_name()
                            ))
                            .into()),
                        }
                    }
                },
                StmtKind::Assert { test, msg } => {
                    if !self.eval_expr(test).await?.truthy() {
                        let message = match msg {
                            Some(m) => self.eval_expr(m).await?.str_value(),
                            None => String::new(),
                        };
                        return Err(ExcValue::assertion(message).into());
                    }
                    Ok(Value::None)
                }
                StmtKind::With { items, body } => {
                    // enter contexts in order
                    let mut entered: Vec<Value> = Vec::new();
                    for (ctx_expr, binding) in items {
                        let ctx = self.eval_expr(ctx_expr).await?;
                        let entered_value = match &ctx {
                            Value::Instance(inst) if inst.class.lookup("__enter__").is_some() => {
                                self.call_instance_method(&ctx, "__enter__", vec![]).await?
                            }
                            other => other.clone(),
                        };
                        if let Some(target) = binding {
                            self.assign(target, entered_value).await?;
                        }
                        entered.push(ctx);
                    }
                    let outcome = self.eval_block(body).await;
                    for ctx in entered.iter().rev() {
                        if let Value::Instance(inst) = ctx {
                            if inst.class.lookup("__exit__").is_some() {
                                self.call_instance_method(
                                    ctx,
                                    "__exit__",
                                    vec![Value::None, Value::None, Value::None],
                                )
                                .await?;
                            }
                        }
                    }
                    outcome
                }
                StmtKind::Del(targets) => {
                    for target in targets {
                        match &target.kind {
                            ExprKind::Name(name) => self.unbind(name)?,
                            ExprKind::Subscript { value, index } => {
                                let container = self.eval_expr(value).await?;
                                let index = self.eval_expr(index).await?;
                                ops::del_index(&container, &index)?;
                            }
                            _ => {
                                return Err(ExcValue::type_error("cannot delete this target").into())
                            }
                        }
                    }
                    Ok(Value::None)
                }
                StmtKind::Global(names) => {
                    if let Some(decls) = self.global_decls.last_mut() {
                        decls.extend(names.iter().cloned());
                    }
                    Ok(Value::None)
                }
            }
        })
    }

    fn import_module(&mut self, dotted: &str) -> EvalResult<Value> {
        let top_level = dotted.split('.').next().unwrap_or(dotted);
        let implicitly_allowed = matches!(top_level, "functions" | "multi_tool_use");
        if !implicitly_allowed && !self.authorized_imports.iter().any(|m| m == top_level) {
            return Err(Flow::Error(InterpreterError::ImportNotAllowed(
                top_level.to_string(),
            )));
        }
        if top_level == "functions" {
            let members: HashMap<String, Value> = self
                .tools
                .iter()
                .filter(|(_, v)| matches!(v, Value::Tool(_) | Value::Native(_)))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            return Ok(Value::Module(Rc::new(super::value::ModuleObj {
                name: "functions".to_string(),
                members,
            })));
        }
        if top_level == "multi_tool_use" {
            let mut members = HashMap::new();
            members.insert(
                "parallel".to_string(),
                Value::Builtin("multi_tool_use.parallel"),
            );
            return Ok(Value::Module(Rc::new(super::value::ModuleObj {
                name: "multi_tool_use".to_string(),
                members,
            })));
        }
        Ok(Value::Module(Rc::new(builtins::load_module(dotted))))
    }

    // ------------------------------------------------------------------
    // Assignment targets
    // ------------------------------------------------------------------

    fn assign<'a>(&'a mut self, target: &'a Expr, value: Value) -> LocalBoxFuture<'a, EvalResult<()>> {
        Box::pin(async move {
            match &target.kind {
                ExprKind::Name(name) => self.bind(name, value),
                ExprKind::Tuple(elts) | ExprKind::List(elts) => {
                    let values = iterate(&value).map_err(|_| {
                        Flow::Raise(ExcValue::type_error(format!(
                            "cannot unpack non-iterable {} object",
                            value.type_name()
                        )))
                    })?;
                    let star_pos = elts
                        .iter()
                        .position(|e| matches!(e.kind, ExprKind::Starred(_)));
                    match star_pos {
                        None => {
                            if values.len() != elts.len() {
                                return Err(ExcValue::value_error(format!(
                                    "expected {} values to unpack, got {}",
                                    elts.len(),
                                    values.len()
                                ))
                                .into());
                            }
                            for (elt, v) in elts.iter().zip(values) {
                                self.assign(elt, v).await?;
                            }
                        }
                        Some(pos) => {
                            let after = elts.len() - pos - 1;
                            if values.len() < elts.len() - 1 {
                                return Err(ExcValue::value_error("not enough values to unpack").into());
                            }
                            for (elt, v) in elts[..pos].iter().zip(values.iter()) {
                                self.assign(elt, v.clone()).await?;
                            }
                            let middle: Vec<Value> =
                                values[pos..values.len() - after].to_vec();
                            if let ExprKind::Starred(inner) = &elts[pos].kind {
                                self.assign(inner, Value::list(middle)).await?;
                            }
                            for (elt, v) in elts[pos + 1..]
                                .iter()
                                .zip(values[values.len() - after..].iter())
                            {
                                self.assign(elt, v.clone()).await?;
                            }
                        }
                    }
                    Ok(())
                }
                ExprKind::Subscript { value: container, index } => {
                    let container = self.eval_expr(container).await?;
                    let index = self.eval_expr(index).await?;
                    ops::set_index(&container, &index, value)?;
                    Ok(())
                }
                ExprKind::Attribute { value: obj, attr } => {
                    let obj = self.eval_expr(obj).await?;
                    match obj {
                        Value::Instance(inst) => {
                            inst.fields.borrow_mut().insert(attr.clone(), value);
                            Ok(())
                        }
                        Value::Class(class) => {
                            class.attrs.borrow_mut().insert(attr.clone(), value);
                            Ok(())
                        }
                        other => Err(ExcValue::attribute_error(format!(
                            "cannot set attribute '{}' on '{}'",
                            attr,
                            other.type_name()
                        ))
                        .into()),
                    }
                }
                _ => Err(ExcValue::type_error("invalid assignment target").into()),
            }
        })
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    pub fn eval_expr<'a>(&'a mut self, expr: &'a Expr) -> LocalBoxFuture<'a, EvalResult<Value>> {
        Box::pin(async move {
            self.tick()?;
            match &expr.kind {
                ExprKind::Int(v) => Ok(Value::Int(*v)),
                ExprKind::Float(v) => Ok(Value::Float(*v)),
                ExprKind::Str(s) => Ok(Value::str(s.clone())),
                ExprKind::Bool(b) => Ok(Value::Bool(*b)),
                ExprKind::NoneLit => Ok(Value::None),
                ExprKind::Name(name) => self.lookup(name).ok_or_else(|| {
                    Flow::Raise(ExcValue::name_error(format!(
                        "The variable `{}` is not defined.",
                        name
                    )))
                }),
                ExprKind::FString(parts) => {
                    let mut out = String::new();
                    for part in parts {
                        match part {
                            FStringPart::Literal(s) => out.push_str(s),
                            FStringPart::Expr { expr, spec } => {
                                let value = self.eval_expr(expr).await?;
                                out.push_str(&format_with_spec(&value, spec.as_deref())?);
                            }
                        }
                    }
                    Ok(Value::str(out))
                }
                ExprKind::Tuple(elts) => {
                    let mut values = Vec::with_capacity(elts.len());
                    for elt in elts {
                        if let ExprKind::Starred(inner) = &elt.kind {
                            values.extend(iterate(&self.eval_expr(inner).await?)?);
                        } else {
                            values.push(self.eval_expr(elt).await?);
                        }
                    }
                    Ok(Value::tuple(values))
                }
                ExprKind::List(elts) => {
                    let mut values = Vec::with_capacity(elts.len());
                    for elt in elts {
                        if let ExprKind::Starred(inner) = &elt.kind {
                            values.extend(iterate(&self.eval_expr(inner).await?)?);
                        } else {
                            values.push(self.eval_expr(elt).await?);
                        }
                    }
                    Ok(Value::list(values))
                }
                ExprKind::Set(elts) => {
                    let mut values = Vec::with_capacity(elts.len());
                    for elt in elts {
                        values.push(self.eval_expr(elt).await?);
                    }
                    Ok(Value::set(values))
                }
                ExprKind::Dict { keys, values } => {
                    let mut entries = Vec::with_capacity(keys.len());
                    for (k, v) in keys.iter().zip(values.iter()) {
                        entries.push((self.eval_expr(k).await?, self.eval_expr(v).await?));
                    }
                    Ok(Value::dict(entries))
                }
                ExprKind::BinOp { left, op, right } => {
                    let l = self.eval_expr(left).await?;
                    let r = self.eval_expr(right).await?;
                    Ok(ops::binop(*op, &l, &r)?)
                }
                ExprKind::UnaryOp { op, operand } => {
                    let v = self.eval_expr(operand).await?;
                    Ok(ops::unaryop(*op, &v)?)
                }
                ExprKind::BoolOp { op, values } => {
                    let mut last = Value::None;
                    for value in values {
                        last = self.eval_expr(value).await?;
                        match op {
                            BoolOpKind::And if !last.truthy() => return Ok(last),
                            BoolOpKind::Or if last.truthy() => return Ok(last),
                            _ => {}
                        }
                    }
                    Ok(last)
                }
                ExprKind::Compare { left, ops: chain } => {
                    let mut left = self.eval_expr(left).await?;
                    for (op, right) in chain {
                        let right = self.eval_expr(right).await?;
                        if !ops::compare(*op, &left, &right)? {
                            return Ok(Value::Bool(false));
                        }
                        left = right;
                    }
                    Ok(Value::Bool(true))
                }
                ExprKind::IfExp { cond, then, orelse } => {
                    if self.eval_expr(cond).await?.truthy() {
                        self.eval_expr(then).await
                    } else {
                        self.eval_expr(orelse).await
                    }
                }
                ExprKind::Lambda { params, body } => Ok(Value::Function(Rc::new(PyFunction {
                    name: "<lambda>".to_string(),
                    params: (**params).clone(),
                    defaults: Vec::new(),
                    body: FuncBody::Expr(body.clone()),
                    is_async: false,
                    doc: None,
                }))),
                ExprKind::Attribute { value, attr } => {
                    if attr.starts_with("__") && attr.ends_with("__") {
                        return Err(Flow::Error(InterpreterError::Runtime(format!(
                            "forbidden access to dunder attribute: {}",
                            attr
                        ))));
                    }
                    let obj = self.eval_expr(value).await?;
                    self.get_attribute(&obj, attr)
                }
                ExprKind::Subscript { value, index } => {
                    let container = self.eval_expr(value).await?;
                    if let ExprKind::Slice { lower, upper, step } = &index.kind {
                        let lower = self.eval_opt_index(lower).await?;
                        let upper = self.eval_opt_index(upper).await?;
                        let step = self.eval_opt_index(step).await?;
                        return Ok(ops::get_slice(&container, lower, upper, step)?);
                    }
                    let index = self.eval_expr(index).await?;
                    Ok(ops::get_index(&container, &index)?)
                }
                ExprKind::Slice { .. } => {
                    Err(ExcValue::type_error("slice outside of subscript").into())
                }
                ExprKind::Starred(_) => {
                    Err(ExcValue::type_error("starred expression outside of call or unpacking").into())
                }
                ExprKind::Await(inner) => {
                    // values are already resolved; awaiting is a no-op wrapper
                    self.eval_expr(inner).await
                }
                ExprKind::Comprehension { kind, elt, generators } => {
                    self.eval_comprehension(*kind, elt, generators).await
                }
                ExprKind::Call { func, args } => self.eval_call(func, args).await,
            }
        })
    }

    async fn eval_opt_index(&mut self, expr: &Option<Box<Expr>>) -> EvalResult<Option<i64>> {
        match expr {
            None => Ok(None),
            Some(e) => {
                let v = self.eval_expr(e).await?;
                match v {
                    Value::None => Ok(None),
                    other => other
                        .as_i64()
                        .map(Some)
                        .ok_or_else(|| Flow::Raise(ExcValue::type_error("slice indices must be integers"))),
                }
            }
        }
    }

    fn get_attribute(&mut self, obj: &Value, attr: &str) -> EvalResult<Value> {
        match obj {
            Value::Module(m) => m.members.get(attr).cloned().ok_or_else(|| {
                Flow::Raise(ExcValue::attribute_error(format!(
                    "module '{}' has no attribute '{}'",
                    m.name, attr
                )))
            }),
            Value::Instance(inst) => {
                if let Some(v) = inst.fields.borrow().get(attr) {
                    return Ok(v.clone());
                }
                match inst.class.lookup(attr) {
                    Some(Value::Function(f)) => Ok(Value::BoundMethod {
                        recv: Box::new(obj.clone()),
                        method: f,
                    }),
                    Some(other) => Ok(other),
                    None => Err(Flow::Raise(ExcValue::attribute_error(format!(
                        "'{}' object has no attribute '{}'",
                        inst.class.name, attr
                    )))),
                }
            }
            Value::Class(class) => class.lookup(attr).ok_or_else(|| {
                Flow::Raise(ExcValue::attribute_error(format!(
                    "type object '{}' has no attribute '{}'",
                    class.name, attr
                )))
            }),
            Value::Exception(e) => match attr {
                "args" => Ok(Value::tuple(vec![Value::str(e.message.clone())])),
                _ => Err(Flow::Raise(ExcValue::attribute_error(format!(
                    "'{}' object has no attribute '{}'",
                    e.kind, attr
                )))),
            },
            Value::Str(_) | Value::List(_) | Value::Dict(_) | Value::Set(_) | Value::Tuple(_) => {
                Ok(Value::MethodRef {
                    recv: Box::new(obj.clone()),
                    name: Rc::new(attr.to_string()),
                })
            }
            other => Err(Flow::Raise(ExcValue::attribute_error(format!(
                "'{}' object has no attribute '{}'",
                other.type_name(),
                attr
            )))),
        }
    }

    async fn eval_comprehension(
        &mut self,
        kind: ComprehensionKind,
        elt: &[Expr],
        generators: &[Generator],
    ) -> EvalResult<Value> {
        let mut rows: Vec<Value> = Vec::new();
        let mut pairs: Vec<(Value, Value)> = Vec::new();
        self.comprehension_level(kind, elt, generators, 0, &mut rows, &mut pairs)
            .await?;
        Ok(match kind {
            ComprehensionKind::List | ComprehensionKind::Generator => Value::list(rows),
            ComprehensionKind::Set => Value::set(rows),
            ComprehensionKind::Dict => Value::dict(pairs),
        })
    }

    fn comprehension_level<'a>(
        &'a mut self,
        kind: ComprehensionKind,
        elt: &'a [Expr],
        generators: &'a [Generator],
        depth: usize,
        rows: &'a mut Vec<Value>,
        pairs: &'a mut Vec<(Value, Value)>,
    ) -> LocalBoxFuture<'a, EvalResult<()>> {
        Box::pin(async move {
            if depth == generators.len() {
                match kind {
                    ComprehensionKind::Dict => {
                        let key = self.eval_expr(&elt[0]).await?;
                        let value = self.eval_expr(&elt[1]).await?;
                        pairs.push((key, value));
                    }
                    _ => rows.push(self.eval_expr(&elt[0]).await?),
                }
                return Ok(());
            }
            let generator = &generators[depth];
            let iterable = self.eval_expr(&generator.iter).await?;
            for item in iterate(&iterable)? {
                self.tick()?;
                self.assign(&generator.target, item).await?;
                let mut keep = true;
                for cond in &generator.ifs {
                    if !self.eval_expr(cond).await?.truthy() {
                        keep = false;
                        break;
                    }
                }
                if keep {
                    self.comprehension_level(kind, elt, generators, depth + 1, rows, pairs)
                        .await?;
                }
            }
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    async fn eval_call(&mut self, func: &Expr, args: &[CallArg]) -> EvalResult<Value> {
        // resolve callee
        let callee = match &func.kind {
            ExprKind::Name(name) => self.lookup(name).ok_or_else(|| {
                Flow::Raise(ExcValue::name_error(format!(
                    "Forbidden function evaluation: '{}' is not among the explicitly allowed tools or defined in the preceding code",
                    name
                )))
            })?,
            _ => self.eval_expr(func).await?,
        };

        // evaluate arguments
        let mut positional: Vec<Value> = Vec::new();
        let mut kwargs: Vec<(String, Value)> = Vec::new();
        for arg in args {
            match arg {
                CallArg::Positional(e) => positional.push(self.eval_expr(e).await?),
                CallArg::Keyword(name, e) => kwargs.push((name.clone(), self.eval_expr(e).await?)),
                CallArg::Star(e) => {
                    let v = self.eval_expr(e).await?;
                    positional.extend(iterate(&v)?);
                }
                CallArg::DoubleStar(e) => {
                    let v = self.eval_expr(e).await?;
                    match v {
                        Value::Dict(d) => {
                            for (k, v) in d.borrow().entries.iter() {
                                kwargs.push((k.str_value(), v.clone()));
                            }
                        }
                        _ => {
                            return Err(ExcValue::type_error("argument after ** must be a mapping").into())
                        }
                    }
                }
            }
        }

        self.call_value(callee, positional, kwargs).await
    }

    pub fn call_value<'a>(
        &'a mut self,
        callee: Value,
        positional: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> LocalBoxFuture<'a, EvalResult<Value>> {
        Box::pin(async move {
            match callee {
                Value::Function(f) => self.call_function(&f, positional, kwargs, None).await,
                Value::BoundMethod { recv, method } => {
                    self.call_function(&method, positional, kwargs, Some(*recv)).await
                }
                Value::MethodRef { recv, name } => {
                    self.call_builtin_method(&recv, &name, positional, kwargs).await
                }
                Value::Native(f) => Ok(f(positional)?),
                Value::Class(class) => {
                    let instance = Value::Instance(Rc::new(InstanceObj {
                        class: class.clone(),
                        fields: std::cell::RefCell::new(HashMap::new()),
                    }));
                    if let Some(Value::Function(init)) = class.lookup("__init__") {
                        self.call_function(&init, positional, kwargs, Some(instance.clone()))
                            .await?;
                    } else if !positional.is_empty() || !kwargs.is_empty() {
                        return Err(ExcValue::type_error(format!(
                            "{}() takes no arguments",
                            class.name
                        ))
                        .into());
                    }
                    Ok(instance)
                }
                Value::ExceptionType(kind) => {
                    let message = positional
                        .first()
                        .map(|v| v.str_value())
                        .unwrap_or_default();
                    Ok(Value::Exception(Rc::new(ExcValue::new(kind, message))))
                }
                Value::Tool(handle) => self.dispatch_tool(&handle, positional, kwargs).await,
                Value::Builtin(name) => {
                    self.call_named_builtin(name, positional, kwargs).await
                }
                other => Err(ExcValue::type_error(format!(
                    "'{}' object is not callable",
                    other.type_name()
                ))
                .into()),
            }
        })
    }

    async fn call_function(
        &mut self,
        function: &Rc<PyFunction>,
        positional: Vec<Value>,
        kwargs: Vec<(String, Value)>,
        receiver: Option<Value>,
    ) -> EvalResult<Value> {
        let params = &function.params;
        let mut scope: HashMap<String, Value> = HashMap::new();

        let mut all_positional = Vec::new();
        if let Some(recv) = receiver {
            all_positional.push(recv);
        }
        all_positional.extend(positional);

        let named = params.names.len();
        for (i, name) in params.names.iter().enumerate() {
            if let Some(v) = all_positional.get(i) {
                scope.insert(name.clone(), v.clone());
            }
        }
        if all_positional.len() > named {
            match &params.vararg {
                Some(vararg) => {
                    scope.insert(
                        vararg.clone(),
                        Value::tuple(all_positional[named..].to_vec()),
                    );
                }
                None => {
                    return Err(ExcValue::type_error(format!(
                        "{}() takes {} positional arguments but {} were given",
                        function.name,
                        named,
                        all_positional.len()
                    ))
                    .into())
                }
            }
        } else if let Some(vararg) = &params.vararg {
            scope.insert(vararg.clone(), Value::tuple(Vec::new()));
        }

        let mut extra_kwargs: Vec<(Value, Value)> = Vec::new();
        for (name, value) in kwargs {
            if params.names.contains(&name) {
                if scope.contains_key(&name) {
                    return Err(ExcValue::type_error(format!(
                        "{}() got multiple values for argument '{}'",
                        function.name, name
                    ))
                    .into());
                }
                scope.insert(name, value);
            } else if params.kwarg.is_some() {
                extra_kwargs.push((Value::str(name), value));
            } else {
                return Err(ExcValue::type_error(format!(
                    "{}() got an unexpected keyword argument '{}'",
                    function.name, name
                ))
                .into());
            }
        }
        if let Some(kwarg) = &params.kwarg {
            scope.insert(kwarg.clone(), Value::dict(extra_kwargs));
        }

        // defaults fill the trailing parameters
        let default_offset = params.names.len() - function.defaults.len();
        for (i, default) in function.defaults.iter().enumerate() {
            let name = &params.names[default_offset + i];
            scope.entry(name.clone()).or_insert_with(|| default.clone());
        }

        for name in &params.names {
            if !scope.contains_key(name) {
                return Err(ExcValue::type_error(format!(
                    "{}() missing required argument: '{}'",
                    function.name, name
                ))
                .into());
            }
        }

        self.scopes.push(scope);
        self.global_decls.push(Vec::new());
        let outcome = match &function.body {
            FuncBody::Expr(expr) => self.eval_expr(expr).await,
            FuncBody::Block(decl) => {
                let decl = decl.clone();
                match self.eval_block(&decl.body).await {
                    // a function's value is its return, not its last expression
                    Ok(_) => Ok(Value::None),
                    Err(Flow::Return(v)) => Ok(v),
                    Err(other) => Err(other),
                }
            }
        };
        self.global_decls.pop();
        self.scopes.pop();
        outcome
    }

    async fn call_instance_method(
        &mut self,
        instance: &Value,
        method: &str,
        args: Vec<Value>,
    ) -> EvalResult<Value> {
        let Value::Instance(inst) = instance else {
            return Err(ExcValue::type_error("not an instance").into());
        };
        match inst.class.lookup(method) {
            Some(Value::Function(f)) => {
                self.call_function(&f, args, Vec::new(), Some(instance.clone())).await
            }
            _ => Err(ExcValue::attribute_error(format!(
                "'{}' object has no attribute '{}'",
                inst.class.name, method
            ))
            .into()),
        }
    }

    async fn call_builtin_method(
        &mut self,
        recv: &Value,
        method: &str,
        positional: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> EvalResult<Value> {
        // list.sort(key=..., reverse=...) needs evaluator support for key
        if let (Value::List(l), "sort") = (recv, method) {
            let key = kwargs.iter().find(|(n, _)| n == "key").map(|(_, v)| v.clone());
            let reverse = kwargs
                .iter()
                .find(|(n, _)| n == "reverse")
                .map(|(_, v)| v.truthy())
                .unwrap_or(false);
            let mut items = l.borrow().clone();
            self.sort_with_key(&mut items, key, reverse).await?;
            *l.borrow_mut() = items;
            return Ok(Value::None);
        }
        if !kwargs.is_empty() {
            // only a few builtin methods accept keywords; map the common one
            if method == "split" {
                let maxsplit = kwargs.iter().find(|(n, _)| n == "maxsplit").map(|(_, v)| v.clone());
                let mut args = positional;
                if let Some(m) = maxsplit {
                    if args.is_empty() {
                        args.push(Value::None);
                    }
                    args.push(m);
                }
                return Ok(builtins::call_method(recv, method, &args)?);
            }
            return Err(ExcValue::type_error(format!(
                "{}() got an unexpected keyword argument",
                method
            ))
            .into());
        }
        Ok(builtins::call_method(recv, method, &positional)?)
    }

    async fn sort_with_key(
        &mut self,
        items: &mut Vec<Value>,
        key: Option<Value>,
        reverse: bool,
    ) -> EvalResult<()> {
        match key {
            None => {
                builtins::sort_values(items, reverse)?;
                Ok(())
            }
            Some(key_fn) => {
                let mut decorated: Vec<(Value, Value)> = Vec::with_capacity(items.len());
                for item in items.iter() {
                    let k = self
                        .call_value(key_fn.clone(), vec![item.clone()], Vec::new())
                        .await?;
                    decorated.push((k, item.clone()));
                }
                // stable sort by decorated keys
                decorated.sort_by(|(a, _), (b, _)| {
                    a.py_cmp(b).unwrap_or(std::cmp::Ordering::Equal)
                });
                if reverse {
                    decorated.reverse();
                }
                *items = decorated.into_iter().map(|(_, v)| v).collect();
                Ok(())
            }
        }
    }

    async fn call_named_builtin(
        &mut self,
        name: &'static str,
        positional: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> EvalResult<Value> {
        match name {
            "print" => {
                let sep = kwargs
                    .iter()
                    .find(|(n, _)| n == "sep")
                    .map(|(_, v)| v.str_value())
                    .unwrap_or_else(|| " ".to_string());
                let end = kwargs
                    .iter()
                    .find(|(n, _)| n == "end")
                    .map(|(_, v)| v.str_value())
                    .unwrap_or_else(|| "\n".to_string());
                let text = positional
                    .iter()
                    .map(|v| v.str_value())
                    .collect::<Vec<_>>()
                    .join(&sep);
                self.emit_print(&text);
                self.emit_print(&end);
                Ok(Value::None)
            }
            "final_answer" => {
                let value = positional.into_iter().next().unwrap_or(Value::None);
                Err(Flow::FinalAnswer(value))
            }
            "multi_tool_use.parallel" => self.multi_tool_parallel(positional).await,
            "map" => {
                let f = positional
                    .first()
                    .cloned()
                    .ok_or_else(|| Flow::Raise(ExcValue::type_error("map() requires a function")))?;
                let items = iterate(positional.get(1).unwrap_or(&Value::None))?;
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.call_value(f.clone(), vec![item], Vec::new()).await?);
                }
                Ok(Value::list(out))
            }
            "filter" => {
                let f = positional.first().cloned().unwrap_or(Value::None);
                let items = iterate(positional.get(1).unwrap_or(&Value::None))?;
                let mut out = Vec::new();
                for item in items {
                    let keep = match &f {
                        Value::None => item.truthy(),
                        _ => self
                            .call_value(f.clone(), vec![item.clone()], Vec::new())
                            .await?
                            .truthy(),
                    };
                    if keep {
                        out.push(item);
                    }
                }
                Ok(Value::list(out))
            }
            "sorted" => {
                let key = kwargs.iter().find(|(n, _)| n == "key").map(|(_, v)| v.clone());
                let reverse = kwargs
                    .iter()
                    .find(|(n, _)| n == "reverse")
                    .map(|(_, v)| v.truthy())
                    .unwrap_or(false);
                let mut items = iterate(positional.first().unwrap_or(&Value::None))?;
                self.sort_with_key(&mut items, key, reverse).await?;
                Ok(Value::list(items))
            }
            "min" | "max" => {
                let key = kwargs.iter().find(|(n, _)| n == "key").map(|(_, v)| v.clone());
                let default = kwargs.iter().find(|(n, _)| n == "default").map(|(_, v)| v.clone());
                let items = if positional.len() == 1 {
                    iterate(&positional[0])?
                } else {
                    positional.clone()
                };
                if items.is_empty() {
                    return match default {
                        Some(d) => Ok(d),
                        None => Err(ExcValue::value_error(format!(
                            "{}() arg is an empty sequence",
                            name
                        ))
                        .into()),
                    };
                }
                match key {
                    None => Ok(builtins::call_builtin(name, &positional)?),
                    Some(key_fn) => {
                        let mut best = items[0].clone();
                        let mut best_key = self
                            .call_value(key_fn.clone(), vec![best.clone()], Vec::new())
                            .await?;
                        for item in &items[1..] {
                            let k = self
                                .call_value(key_fn.clone(), vec![item.clone()], Vec::new())
                                .await?;
                            let better = match k.py_cmp(&best_key) {
                                Some(ord) => {
                                    (name == "min" && ord == std::cmp::Ordering::Less)
                                        || (name == "max" && ord == std::cmp::Ordering::Greater)
                                }
                                None => {
                                    return Err(ExcValue::type_error("values are not comparable").into())
                                }
                            };
                            if better {
                                best = item.clone();
                                best_key = k;
                            }
                        }
                        Ok(best)
                    }
                }
            }
            _ => {
                if !kwargs.is_empty() {
                    return Err(ExcValue::type_error(format!(
                        "{}() got an unexpected keyword argument",
                        name
                    ))
                    .into());
                }
                Ok(builtins::call_builtin(name, &positional)?)
            }
        }
    }

    // ------------------------------------------------------------------
    // Tool dispatch
    // ------------------------------------------------------------------

    fn tool_args_json(
        handle: &ToolHandle,
        positional: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> EvalResult<serde_json::Value> {
        let mut map = serde_json::Map::new();
        for (i, value) in positional.into_iter().enumerate() {
            match handle.param_names.get(i) {
                Some(name) => {
                    map.insert(name.clone(), value.to_json());
                }
                None => {
                    return Err(ExcValue::type_error(format!(
                        "{}() takes {} positional arguments",
                        handle.name,
                        handle.param_names.len()
                    ))
                    .into())
                }
            }
        }
        for (name, value) in kwargs {
            map.insert(name, value.to_json());
        }
        Ok(serde_json::Value::Object(map))
    }

    async fn dispatch_tool(
        &mut self,
        handle: &ToolHandle,
        positional: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> EvalResult<Value> {
        let args = Self::tool_args_json(handle, positional, kwargs)?;
        match &handle.kind {
            ToolKind::Sync(f) => match f(args) {
                Ok(result) => Ok(Value::from_json(&result)),
                Err(e) => Err(ExcValue::runtime(format!("tool '{}' failed: {}", handle.name, e)).into()),
            },
            ToolKind::Async(tool) => {
                if !self.async_mode {
                    return Err(Flow::Error(InterpreterError::Runtime(format!(
                        "async tool '{}' requires the async interpreter",
                        handle.name
                    ))));
                }
                match tool.call(args).await {
                    Ok(result) => Ok(Value::from_json(&result)),
                    Err(e) => {
                        Err(ExcValue::runtime(format!("tool '{}' failed: {}", handle.name, e)).into())
                    }
                }
            }
        }
    }

    /// `multi_tool_use.parallel({tool_uses: [{recipient_name, parameters}…]})`
    async fn multi_tool_parallel(&mut self, positional: Vec<Value>) -> EvalResult<Value> {
        if !self.async_mode {
            return Err(Flow::Error(InterpreterError::Runtime(
                "multi_tool_use.parallel requires the async interpreter".to_string(),
            )));
        }
        let config = positional
            .first()
            .map(|v| v.to_json())
            .unwrap_or(serde_json::Value::Null);
        let tool_uses = config
            .get("tool_uses")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        // collect dispatchable futures; unknown tools become error entries
        enum Planned {
            Missing(String),
            Ready(std::sync::Arc<dyn crate::tools::Tool>, serde_json::Value, String),
            SyncDone(serde_json::Value, String),
            SyncFailed(String, String),
        }
        let mut planned = Vec::new();
        for tool_use in &tool_uses {
            let raw_name = tool_use
                .get("recipient_name")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            let name = raw_name.strip_prefix("functions.").unwrap_or(raw_name);
            let parameters = tool_use
                .get("parameters")
                .cloned()
                .unwrap_or(serde_json::Value::Object(Default::default()));
            match self.tools.get(name) {
                Some(Value::Tool(handle)) => match &handle.kind {
                    ToolKind::Async(tool) => {
                        planned.push(Planned::Ready(tool.clone(), parameters, raw_name.to_string()))
                    }
                    ToolKind::Sync(f) => match f(parameters) {
                        Ok(v) => planned.push(Planned::SyncDone(v, raw_name.to_string())),
                        Err(e) => planned.push(Planned::SyncFailed(e.to_string(), raw_name.to_string())),
                    },
                },
                _ => planned.push(Planned::Missing(raw_name.to_string())),
            }
        }

        let futures: Vec<_> = planned
            .iter()
            .filter_map(|p| match p {
                Planned::Ready(tool, params, _) => {
                    let tool = tool.clone();
                    let params = params.clone();
                    Some(async move { tool.call(params).await })
                }
                _ => None,
            })
            .collect();
        let mut async_results = futures::future::join_all(futures).await.into_iter();

        let mut results = Vec::new();
        let mut successful = 0usize;
        let mut failed = 0usize;
        for p in planned {
            let entry = match p {
                Planned::Missing(name) => {
                    failed += 1;
                    serde_json::json!({
                        "recipient_name": name,
                        "success": false,
                        "error": "tool not found",
                    })
                }
                Planned::SyncDone(v, name) => {
                    successful += 1;
                    serde_json::json!({
                        "recipient_name": name,
                        "success": true,
                        "result": v,
                    })
                }
                Planned::SyncFailed(e, name) => {
                    failed += 1;
                    serde_json::json!({
                        "recipient_name": name,
                        "success": false,
                        "error": e,
                    })
                }
                Planned::Ready(_, _, name) => match async_results.next() {
                    Some(Ok(v)) => {
                        successful += 1;
                        serde_json::json!({
                            "recipient_name": name,
                            "success": true,
                            "result": v,
                        })
                    }
                    Some(Err(e)) => {
                        failed += 1;
                        serde_json::json!({
                            "recipient_name": name,
                            "success": false,
                            "error": e.to_string(),
                        })
                    }
                    None => unreachable!("async result count mismatch"),
                },
            };
            results.push(entry);
        }

        let total = results.len();
        Ok(Value::from_json(&serde_json::json!({
            "results": results,
            "total_calls": total,
            "successful_calls": successful,
            "failed_calls": failed,
        })))
    }
}

/// True for a bare `print(...)` statement, looking through one `await`.
fn is_print_call(expr: &Expr) -> bool {
    let kind = match &expr.kind {
        ExprKind::Await(inner) => &inner.kind,
        other => other,
    };
    matches!(kind, ExprKind::Call { func, .. }
        if matches!(&func.kind, ExprKind::Name(name) if name == "print"))
}

/// Apply an f-string format spec; only the common numeric forms are
/// supported, anything else falls back to `str()`.
fn format_with_spec(value: &Value, spec: Option<&str>) -> Result<String, Flow> {
    let Some(spec) = spec else {
        return Ok(value.str_value());
    };
    let spec = spec.trim();
    if let Some(precision) = spec
        .strip_prefix('.')
        .and_then(|rest| rest.strip_suffix('f'))
        .and_then(|digits| digits.parse::<usize>().ok())
    {
        let x = value
            .as_f64()
            .ok_or_else(|| Flow::Raise(ExcValue::value_error("format spec requires a number")))?;
        return Ok(format!("{:.*}", precision, x));
    }
    if spec == "d" {
        let i = value
            .as_i64()
            .ok_or_else(|| Flow::Raise(ExcValue::value_error("format spec 'd' requires an integer")))?;
        return Ok(i.to_string());
    }
    if let Some(width) = spec.strip_prefix('>').and_then(|w| w.parse::<usize>().ok()) {
        return Ok(format!("{:>width$}", value.str_value(), width = width));
    }
    if let Some(width) = spec.strip_prefix('<').and_then(|w| w.parse::<usize>().ok()) {
        return Ok(format!("{:<width$}", value.str_value(), width = width));
    }
    Ok(value.str_value())
}
