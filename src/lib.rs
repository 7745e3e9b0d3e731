//! # Minion
//!
//! An agentic reasoning core that turns a query into a verified answer by
//! iteratively producing, executing, checking, and improving candidate
//! solutions.
//!
//! This library provides:
//! - A brain orchestrator that routes queries to named reasoning strategies
//! - A worker family (raw, cot, dcot, python, code, plan, ensemble, ...)
//! - A check/improve loop that grades and refines candidate answers
//! - A sandboxed Python-subset interpreter with sync and async tool dispatch
//! - A long-running agent loop with auto-decay and auto-compact context
//!   management
//! - A tool surface with deferred loading, dynamic discovery, and skill/MCP
//!   collections
//!
//! ## Architecture
//!
//! ```text
//!        ┌──────────────────────────────────┐
//!        │            BaseAgent             │
//!        │ (step loop, decay/compact, mem)  │
//!        └────────────────┬─────────────────┘
//!                         │
//!                         ▼
//!        ┌──────────────────────────────────┐
//!        │              Brain               │
//!        │  (config, providers, registry)   │
//!        └────────────────┬─────────────────┘
//!                         │
//!                         ▼
//!        ┌──────────────────────────────────┐
//!        │         ModeratorMinion          │
//!        │   (route / ensemble / improve)   │
//!        └───────┬─────────────────┬────────┘
//!                │                 │
//!                ▼                 ▼
//!        ┌──────────────┐  ┌──────────────┐
//!        │   Workers    │  │ Check/Improve│
//!        │ (ActionNode) │  │  (critics)   │
//!        └───────┬──────┘  └──────────────┘
//!                │
//!                ▼
//!        ┌──────────────────────────────────┐
//!        │   AsyncPythonExecutor + Tools    │
//!        └──────────────────────────────────┘
//! ```
//!
//! ## Query Flow
//! 1. A caller hands the brain a query (or drives an agent over many steps)
//! 2. The moderator picks a worker by route, or runs an ensemble
//! 3. The worker builds messages, runs one or more LLM turns, possibly
//!    executing generated code in the sandbox
//! 4. The check/improve loop grades the candidate and refines it with
//!    critic feedback
//! 5. The answer comes back as `(answer, score, terminated, truncated, info)`
//!
//! ## Concurrency model
//!
//! The core is single-threaded and cooperative: all long operations are
//! async on one event loop, and parallelism comes from concurrent
//! awaitables (ensemble sub-workers, parallel tool batches, streaming).
//! Interpreter values are deliberately not `Send`; worker futures stay on
//! the task that created them.

pub mod action;
pub mod agent;
pub mod brain;
pub mod check;
pub mod config;
pub mod errors;
pub mod interpreter;
pub mod memory;
pub mod provider;
pub mod schema;
pub mod tools;
pub mod workers;

pub use action::{AgentResponse, ChunkType, StreamChunk};
pub use agent::{AgentConfig, AgentState, BaseAgent, CodeAgent};
pub use brain::{Brain, StepRequest, StepResult};
pub use config::Config;
pub use errors::MinionError;
pub use interpreter::{AsyncPythonExecutor, PythonExecutor};
pub use schema::{Message, Query, Role};
pub use workers::{Input, MinionRegistry};
