use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A single execution attempt failed before the program could report its own
/// result. Scoped to one call; the engine itself stays usable.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("interpreter process error: {0}")]
    Io(#[from] std::io::Error),
    #[error("execution exceeded {0:?}")]
    Timeout(Duration),
}

/// Bootstrapping the engine failed. Terminal for the process: the loader
/// never retries a failed bootstrap.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("no usable interpreter found after {attempts} probes")]
    InterpreterUnavailable { attempts: u32 },
    #[error("interpreter failed its warm-up program: {0}")]
    WarmUpFailed(String),
}

// ---------------------------------------------------------------------------
// Engine trait
// ---------------------------------------------------------------------------

/// Raw result of one program run: both captured streams plus whether the
/// program finished cleanly.
#[derive(Debug, Clone)]
pub struct Execution {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

/// A bootstrapped code-execution engine.
///
/// An engine executes one program at a time; callers that need serialization
/// get it from [`crate::loader::RuntimeLoader`], not from implementations.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Execute one program with its output streams captured.
    ///
    /// A program that raises or exits non-zero is an `Ok(Execution)` with
    /// `success == false`; `Err` means the attempt itself fell over (spawn
    /// failure, per-call time budget exceeded).
    async fn execute(&self, code: &str) -> Result<Execution, EngineError>;

    /// Short human-readable identity for logs, e.g. `Python 3.12.1`.
    fn describe(&self) -> &str;
}

/// Knows how to locate and bootstrap a concrete engine.
///
/// Implementations are driven exactly once per process by the loader,
/// regardless of how many callers race on first use.
#[async_trait]
pub trait EngineLauncher: Send + Sync {
    async fn bootstrap(&self) -> Result<Arc<dyn Engine>, BootstrapError>;
}
