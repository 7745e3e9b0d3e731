//! Crate-wide error taxonomy.
//!
//! Recoverable failures (interpreter errors, tool errors) are fed back into
//! the reasoning loop as observations; the variants here are the
//! unrecoverable ones that surface to the caller.

use thiserror::Error;

use crate::provider::LlmError;

#[derive(Debug, Error)]
pub enum MinionError {
    #[error("provider error: {0}")]
    Provider(#[from] LlmError),

    #[error("unknown route: {0}")]
    UnknownRoute(String),

    #[error("interpreter failure: {0}")]
    Interpreter(String),

    #[error("checker failure: {0}")]
    Checker(String),

    #[error("plan error: {0}")]
    Plan(String),

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl MinionError {
    /// Short kind tag included in user-visible failures.
    pub fn kind(&self) -> &'static str {
        match self {
            MinionError::Provider(e) if e.is_transient() => "ProviderTransient",
            MinionError::Provider(_) => "ProviderFatal",
            MinionError::UnknownRoute(_) => "UnknownRoute",
            MinionError::Interpreter(_) => "InterpreterError",
            MinionError::Checker(_) => "CheckerFailure",
            MinionError::Plan(_) => "PlanError",
            MinionError::ToolNotFound(_) => "ToolNotFound",
            MinionError::Config(_) => "ConfigError",
            MinionError::Cancelled => "Cancelled",
            MinionError::Other(_) => "Error",
        }
    }
}
