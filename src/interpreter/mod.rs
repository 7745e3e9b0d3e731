//! Sandboxed Python-subset interpreter.
//!
//! Evaluates untrusted model-generated code under three guarantees: an import
//! allowlist, a bounded operation count, and a curated builtin surface (no
//! raw eval/exec/open/system). Two executors share one evaluator:
//! [`PythonExecutor`] (synchronous; sync tool handles only) and
//! [`AsyncPythonExecutor`] (awaits async tools, exposes
//! `multi_tool_use.parallel`). State persists across calls within an
//! executor; a `final_answer(x)` call short-circuits the run.

mod ast;
mod builtins;
mod eval;
mod lexer;
mod ops;
mod parser;
pub mod value;

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use eval::{Flow, Interp};
use value::{ToolHandle, ToolKind, Value};

use crate::tools::{sanitize_tool_name, Tool};

/// Modules importable without caller additions.
pub const BASE_AUTHORIZED_IMPORTS: &[&str] = &[
    "collections",
    "datetime",
    "itertools",
    "json",
    "math",
    "queue",
    "random",
    "re",
    "stat",
    "statistics",
    "time",
    "unicodedata",
];

/// Cap on AST evaluation steps per run.
pub const MAX_OPERATIONS: u64 = 10_000_000;

/// Cap on the buffered print log, in bytes.
pub const DEFAULT_MAX_PRINT_OUTPUTS_LENGTH: usize = 50_000;

/// Sandbox-level failure. Not catchable by interpreted `except` clauses.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InterpreterError {
    #[error("import not allowed: {0}")]
    ImportNotAllowed(String),
    #[error("operation limit exceeded")]
    OperationLimit,
    #[error("syntax error at line {line}: {message}")]
    Syntax { line: u32, message: String },
    #[error("{0}")]
    Runtime(String),
}

impl InterpreterError {
    pub fn syntax(line: u32, message: impl Into<String>) -> Self {
        InterpreterError::Syntax {
            line,
            message: message.into(),
        }
    }
}

/// Result of one execution.
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    /// Last statement value, or the `final_answer` payload.
    pub value: serde_json::Value,
    /// Plain-text rendering of `value` (Python `str`).
    pub value_text: String,
    /// Buffered print output.
    pub logs: String,
    pub is_final_answer: bool,
    /// Compact error description; `None` on success.
    pub error: Option<String>,
}

impl ExecOutcome {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Observation text fed back to the model: error, else logs, else value.
    pub fn observation(&self) -> String {
        if let Some(error) = &self.error {
            return error.clone();
        }
        if !self.logs.trim().is_empty() {
            return self.logs.clone();
        }
        self.value_text.clone()
    }
}

fn outcome_ok(value: Value, logs: String, is_final_answer: bool) -> ExecOutcome {
    ExecOutcome {
        value_text: value.str_value(),
        value: value.to_json(),
        logs,
        is_final_answer,
        error: None,
    }
}

fn outcome_err(error: String, logs: String) -> ExecOutcome {
    ExecOutcome {
        value: serde_json::Value::Null,
        value_text: String::new(),
        logs,
        is_final_answer: false,
        error: Some(error),
    }
}

fn source_line(code: &str, line: u32) -> &str {
    code.lines()
        .nth(line.saturating_sub(1) as usize)
        .unwrap_or("")
        .trim()
}

async fn run_code(interp: &mut Interp, code: &str) -> ExecOutcome {
    interp.reset_run();
    let program = match parser::parse(code) {
        Ok(p) => p,
        Err(e) => return outcome_err(format!("InterpreterError: {}", e), String::new()),
    };
    let mut last = Value::None;
    for stmt in &program.body {
        match interp.eval_top_stmt(stmt).await {
            Ok(v) => last = v,
            Err(Flow::FinalAnswer(v)) => {
                let logs = interp.print_buffer.clone();
                return outcome_ok(v, logs, true);
            }
            Err(Flow::Raise(exc)) => {
                let logs = interp.print_buffer.clone();
                return outcome_err(
                    format!(
                        "Code execution failed at line '{}' due to: {}",
                        source_line(code, stmt.line),
                        exc
                    ),
                    logs,
                );
            }
            Err(Flow::Error(e)) => {
                let logs = interp.print_buffer.clone();
                return outcome_err(format!("InterpreterError: {}", e), logs);
            }
            Err(Flow::Break) | Err(Flow::Continue) => {
                let logs = interp.print_buffer.clone();
                return outcome_err(
                    "InterpreterError: 'break' or 'continue' outside loop".to_string(),
                    logs,
                );
            }
            Err(Flow::Return(_)) => {
                let logs = interp.print_buffer.clone();
                return outcome_err("InterpreterError: 'return' outside function".to_string(), logs);
            }
        }
    }
    let logs = interp.print_buffer.clone();
    outcome_ok(last, logs, false)
}

fn build_interp(additional_authorized_imports: &[String], max_print_len: usize, async_mode: bool) -> Interp {
    let mut imports: Vec<String> = BASE_AUTHORIZED_IMPORTS.iter().map(|s| s.to_string()).collect();
    for extra in additional_authorized_imports {
        if !imports.contains(extra) {
            imports.push(extra.clone());
        }
    }
    Interp::new(imports, MAX_OPERATIONS, max_print_len, async_mode)
}

fn tool_value(tool: Arc<dyn Tool>) -> Value {
    let param_names: Vec<String> = tool.inputs().iter().map(|p| p.name.clone()).collect();
    Value::Tool(ToolHandle {
        name: sanitize_tool_name(tool.name()),
        param_names,
        kind: ToolKind::Async(tool),
    })
}

/// Asynchronous executor: tool calls are awaited; `multi_tool_use.parallel`
/// runs a batch of tool invocations concurrently.
pub struct AsyncPythonExecutor {
    interp: Interp,
}

impl AsyncPythonExecutor {
    pub fn new(additional_authorized_imports: Vec<String>) -> Self {
        Self {
            interp: build_interp(&additional_authorized_imports, DEFAULT_MAX_PRINT_OUTPUTS_LENGTH, true),
        }
    }

    pub fn with_max_print_length(additional_authorized_imports: Vec<String>, max_print_len: usize) -> Self {
        Self {
            interp: build_interp(&additional_authorized_imports, max_print_len, true),
        }
    }

    /// Seed variables into the persistent namespace.
    pub fn send_variables(&mut self, variables: HashMap<String, serde_json::Value>) {
        for (name, value) in variables {
            self.interp.globals.insert(name, Value::from_json(&value));
        }
    }

    /// Bind tools into the namespace under their sanitized names (also
    /// reachable as `functions.<name>`).
    pub fn send_tools(&mut self, tools: Vec<Arc<dyn Tool>>) {
        for tool in tools {
            let value = tool_value(tool);
            if let Value::Tool(handle) = &value {
                self.interp.tools.insert(handle.name.clone(), value.clone());
            }
        }
    }

    /// Register a synchronous native function callable from code, e.g. an
    /// injected `input()` for stdin-driven checks.
    pub fn add_native(&mut self, name: &str, f: value::NativeFn) {
        self.interp.tools.insert(name.to_string(), Value::Native(f));
    }

    /// Register a synchronous tool-style closure with named parameters.
    pub fn add_sync_tool(
        &mut self,
        name: &str,
        param_names: Vec<String>,
        f: Rc<dyn Fn(serde_json::Value) -> anyhow::Result<serde_json::Value>>,
    ) {
        let sanitized = sanitize_tool_name(name);
        self.interp.tools.insert(
            sanitized.clone(),
            Value::Tool(ToolHandle {
                name: sanitized,
                param_names,
                kind: ToolKind::Sync(f),
            }),
        );
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.interp.tools.keys().cloned().collect()
    }

    /// Override the evaluation-step cap.
    pub fn set_max_operations(&mut self, cap: u64) {
        self.interp.max_operations = cap;
    }

    pub async fn run(&mut self, code: &str) -> ExecOutcome {
        run_code(&mut self.interp, code).await
    }
}

/// Synchronous executor. Only sync tool handles may be bound; in this
/// configuration the evaluator future always resolves on first poll, so
/// driving it to completion cannot block the thread.
pub struct PythonExecutor {
    interp: Interp,
}

impl PythonExecutor {
    pub fn new(additional_authorized_imports: Vec<String>) -> Self {
        Self {
            interp: build_interp(&additional_authorized_imports, DEFAULT_MAX_PRINT_OUTPUTS_LENGTH, false),
        }
    }

    pub fn send_variables(&mut self, variables: HashMap<String, serde_json::Value>) {
        for (name, value) in variables {
            self.interp.globals.insert(name, Value::from_json(&value));
        }
    }

    pub fn add_native(&mut self, name: &str, f: value::NativeFn) {
        self.interp.tools.insert(name.to_string(), Value::Native(f));
    }

    pub fn add_sync_tool(
        &mut self,
        name: &str,
        param_names: Vec<String>,
        f: Rc<dyn Fn(serde_json::Value) -> anyhow::Result<serde_json::Value>>,
    ) {
        let sanitized = sanitize_tool_name(name);
        self.interp.tools.insert(
            sanitized.clone(),
            Value::Tool(ToolHandle {
                name: sanitized,
                param_names,
                kind: ToolKind::Sync(f),
            }),
        );
    }

    /// Override the evaluation-step cap.
    pub fn set_max_operations(&mut self, cap: u64) {
        self.interp.max_operations = cap;
    }

    pub fn run(&mut self, code: &str) -> ExecOutcome {
        futures::executor::block_on(run_code(&mut self.interp, code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(code: &str) -> ExecOutcome {
        PythonExecutor::new(Vec::new()).run(code)
    }

    #[test]
    fn test_arithmetic_and_autoprint() {
        let out = run("234*568");
        assert!(!out.is_error(), "{:?}", out.error);
        assert_eq!(out.value, serde_json::json!(132912));
        assert!(out.logs.contains("132912"));
        assert!(!out.is_final_answer);
    }

    #[test]
    fn test_final_answer_signal() {
        let out = run("x = 6 * 7\nfinal_answer(x)");
        assert!(out.is_final_answer);
        assert_eq!(out.value, serde_json::json!(42));
    }

    #[test]
    fn test_final_answer_inside_function() {
        let out = run("def f():\n    final_answer('done')\nf()");
        assert!(out.is_final_answer);
        assert_eq!(out.value, serde_json::json!("done"));
    }

    #[test]
    fn test_import_allowlist() {
        let out = run("import os");
        assert_eq!(out.error.as_deref(), Some("InterpreterError: import not allowed: os"));

        let out = run("import os.path");
        assert_eq!(out.error.as_deref(), Some("InterpreterError: import not allowed: os"));

        let out = run("import math\nmath.sqrt(16)");
        assert!(!out.is_error());
        assert_eq!(out.value, serde_json::json!(4.0));
    }

    #[test]
    fn test_additional_authorized_imports() {
        let mut exec = PythonExecutor::new(vec!["numpy".to_string()]);
        // allowlisted but unbacked modules import as empty modules
        let out = exec.run("import numpy");
        assert!(!out.is_error(), "{:?}", out.error);
    }

    #[test]
    fn test_operation_cap() {
        let mut exec = PythonExecutor::new(Vec::new());
        exec.set_max_operations(10_000);
        let out = exec.run("while True:\n    pass");
        assert_eq!(out.error.as_deref(), Some("InterpreterError: operation limit exceeded"));
        assert!(!out.is_final_answer);
    }

    #[test]
    fn test_state_persists_across_runs() {
        let mut exec = PythonExecutor::new(Vec::new());
        exec.run("x = 10");
        let out = exec.run("x + 5");
        assert_eq!(out.value, serde_json::json!(15));
    }

    #[test]
    fn test_underscore_holds_last_value() {
        let mut exec = PythonExecutor::new(Vec::new());
        exec.run("3 + 4");
        let out = exec.run("_ * 2");
        assert_eq!(out.value, serde_json::json!(14));
    }

    #[test]
    fn test_runtime_error_formatting() {
        let out = run("x = 1\ny = x / 0");
        let error = out.error.unwrap();
        assert!(error.starts_with("Code execution failed at line 'y = x / 0'"), "{}", error);
        assert!(error.contains("ZeroDivisionError"));
    }

    #[test]
    fn test_try_except_catches_runtime_errors() {
        let out = run("try:\n    1 / 0\nexcept ZeroDivisionError as e:\n    result = 'caught'\nresult");
        assert!(!out.is_error());
        assert_eq!(out.value, serde_json::json!("caught"));
    }

    #[test]
    fn test_except_cannot_catch_sandbox_errors() {
        let out = run("try:\n    import os\nexcept Exception:\n    x = 'swallowed'");
        assert_eq!(out.error.as_deref(), Some("InterpreterError: import not allowed: os"));
    }

    #[test]
    fn test_functions_and_recursion() {
        let out = run("def fib(n):\n    if n < 2:\n        return n\n    return fib(n-1) + fib(n-2)\nfib(10)");
        assert_eq!(out.value, serde_json::json!(55));
    }

    #[test]
    fn test_closures_read_globals() {
        let out = run("base = 100\ndef add(x):\n    return base + x\nadd(5)");
        assert_eq!(out.value, serde_json::json!(105));
    }

    #[test]
    fn test_classes() {
        let out = run(concat!(
            "class Counter:\n",
            "    def __init__(self, start):\n",
            "        self.count = start\n",
            "    def bump(self, by=1):\n",
            "        self.count += by\n",
            "        return self.count\n",
            "c = Counter(10)\n",
            "c.bump()\n",
            "c.bump(5)\n",
            "c.count",
        ));
        assert_eq!(out.value, serde_json::json!(16));
    }

    #[test]
    fn test_comprehensions() {
        let out = run("[x * x for x in range(5) if x % 2 == 0]");
        assert_eq!(out.value, serde_json::json!([0, 4, 16]));

        let out = run("{k: len(k) for k in ['a', 'bb']}");
        assert_eq!(out.value, serde_json::json!({"a": 1, "bb": 2}));
    }

    #[test]
    fn test_fstring() {
        let out = run("n = 3\nf'value={n + 1} pi={3.14159:.2f}'");
        assert_eq!(out.value, serde_json::json!("value=4 pi=3.14"));
    }

    #[test]
    fn test_print_capture() {
        let out = run("print('hello', 42)\nprint('world')");
        assert_eq!(out.logs, "hello 42\nworld\n");
    }

    #[test]
    fn test_bare_call_value_lands_in_logs() {
        let mut exec = PythonExecutor::new(Vec::new());
        exec.add_sync_tool("probe", vec![], Rc::new(|_| Ok(serde_json::json!(7))));
        let out = exec.run("print('before')\nprobe()");
        // only literal print() is exempt from auto-printing, so the bare
        // tool call's value still shows up in the observation
        assert_eq!(out.logs, "before\n7\n");
        assert_eq!(out.value, serde_json::json!(7));
    }

    #[test]
    fn test_print_truncation() {
        let mut exec = PythonExecutor::with_limits(64);
        let out = exec.run("for i in range(100):\n    print('xxxxxxxxxx')");
        assert!(out.logs.contains("truncated"));
        assert!(out.logs.len() < 300);
    }

    #[test]
    fn test_sync_tool_dispatch() {
        let mut exec = PythonExecutor::new(Vec::new());
        exec.add_sync_tool(
            "adder",
            vec!["a".to_string(), "b".to_string()],
            Rc::new(|args: serde_json::Value| {
                let a = args["a"].as_i64().unwrap_or(0);
                let b = args["b"].as_i64().unwrap_or(0);
                Ok(serde_json::json!(a + b))
            }),
        );
        let out = exec.run("adder(2, b=3)");
        assert_eq!(out.value, serde_json::json!(5));
    }

    #[test]
    fn test_tool_reachable_via_functions_namespace() {
        let mut exec = PythonExecutor::new(Vec::new());
        exec.add_sync_tool(
            "doubler",
            vec!["x".to_string()],
            Rc::new(|args: serde_json::Value| {
                Ok(serde_json::json!(args["x"].as_i64().unwrap_or(0) * 2))
            }),
        );
        let out = exec.run("from functions import doubler\ndoubler(21)");
        assert_eq!(out.value, serde_json::json!(42));
    }

    #[test]
    fn test_tuple_unpacking_and_slicing() {
        let out = run("a, b, *rest = [1, 2, 3, 4, 5]\nrest[::-1]");
        assert_eq!(out.value, serde_json::json!([5, 4, 3]));
    }

    #[test]
    fn test_while_else_and_break() {
        let out = run(concat!(
            "found = None\n",
            "for x in [1, 3, 8, 5]:\n",
            "    if x % 2 == 0:\n",
            "        found = x\n",
            "        break\n",
            "else:\n",
            "    found = -1\n",
            "found",
        ));
        assert_eq!(out.value, serde_json::json!(8));
    }

    #[test]
    fn test_bare_identifier_repl_inspect() {
        let out = run("s = 'abc'\ns");
        assert!(out.logs.contains("'abc'"));
    }

    impl PythonExecutor {
        fn with_limits(max_print_len: usize) -> Self {
            Self {
                interp: build_interp(&[], max_print_len, false),
            }
        }
    }
}

#[cfg(test)]
mod async_tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::tools::{Tool, ToolParam};

    struct EchoTool {
        calls: AtomicUsize,
        last_args: Mutex<Option<serde_json::Value>>,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo.tool"
        }
        fn description(&self) -> &str {
            "echoes its input"
        }
        fn inputs(&self) -> Vec<ToolParam> {
            vec![ToolParam::required("text", "string", "text to echo")]
        }
        fn output_type(&self) -> &str {
            "string"
        }
        async fn call(&self, args: serde_json::Value) -> anyhow::Result<serde_json::Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_args.lock().unwrap() = Some(args.clone());
            Ok(serde_json::json!(format!("echo: {}", args["text"].as_str().unwrap_or(""))))
        }
    }

    fn echo_tool() -> Arc<EchoTool> {
        Arc::new(EchoTool {
            calls: AtomicUsize::new(0),
            last_args: Mutex::new(None),
        })
    }

    #[tokio::test]
    async fn test_async_tool_call_is_awaited() {
        let tool = echo_tool();
        let mut exec = AsyncPythonExecutor::new(Vec::new());
        exec.send_tools(vec![tool.clone() as Arc<dyn Tool>]);
        let out = exec.run("echo_tool('hi')").await;
        assert!(!out.is_error(), "{:?}", out.error);
        assert_eq!(out.value, serde_json::json!("echo: hi"));
        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sync_and_async_agree_on_pure_code() {
        let code = "total = 0\nfor i in range(10):\n    total += i\nprint(total)\nfinal_answer(total)";
        let sync_out = PythonExecutor::new(Vec::new()).run(code);
        let async_out = AsyncPythonExecutor::new(Vec::new()).run(code).await;
        assert_eq!(sync_out.value, async_out.value);
        assert_eq!(sync_out.logs, async_out.logs);
        assert!(sync_out.is_final_answer && async_out.is_final_answer);
    }

    #[tokio::test]
    async fn test_multi_tool_use_parallel() {
        let tool = echo_tool();
        let mut exec = AsyncPythonExecutor::new(Vec::new());
        exec.send_tools(vec![tool.clone() as Arc<dyn Tool>]);
        let out = exec
            .run(concat!(
                "from multi_tool_use import parallel\n",
                "result = parallel({'tool_uses': [\n",
                "    {'recipient_name': 'functions.echo_tool', 'parameters': {'text': 'a'}},\n",
                "    {'recipient_name': 'functions.echo_tool', 'parameters': {'text': 'b'}},\n",
                "    {'recipient_name': 'functions.missing', 'parameters': {}},\n",
                "]})\n",
                "result['successful_calls'], result['failed_calls'], result['total_calls']",
            ))
            .await;
        assert!(!out.is_error(), "{:?}", out.error);
        assert_eq!(out.value, serde_json::json!([2, 1, 3]));
        assert_eq!(tool.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_await_is_tolerated() {
        let tool = echo_tool();
        let mut exec = AsyncPythonExecutor::new(Vec::new());
        exec.send_tools(vec![tool as Arc<dyn Tool>]);
        let out = exec.run("x = await echo_tool('y')\nx").await;
        assert_eq!(out.value, serde_json::json!("echo: y"));
    }
}
