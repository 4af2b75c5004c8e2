//! Subprocess-backed Python engine.
//!
//! Bootstrap discovers an interpreter (configured path first, then
//! well-known names), polls for its availability within a bounded budget,
//! and proves it executes programs before handing out the engine handle.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use cs_core::config::RuntimeConfig;

use crate::engine::{BootstrapError, Engine, EngineError, EngineLauncher, Execution};

/// Interpreter names tried when no explicit path is configured.
const DEFAULT_CANDIDATES: &[&str] = &["python3", "python"];

/// Ceiling for one availability probe; a probe that stalls past this is
/// treated as a miss, not a hang.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// PythonEngine
// ---------------------------------------------------------------------------

/// A located, warmed-up interpreter.
pub struct PythonEngine {
    binary: PathBuf,
    version: String,
    exec_timeout: Duration,
}

impl PythonEngine {
    fn new(binary: PathBuf, version: String, exec_timeout: Duration) -> Self {
        Self {
            binary,
            version,
            exec_timeout,
        }
    }
}

#[async_trait]
impl Engine for PythonEngine {
    async fn execute(&self, code: &str) -> Result<Execution, EngineError> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-c")
            .arg(code)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.exec_timeout, cmd.output())
            .await
            .map_err(|_| EngineError::Timeout(self.exec_timeout))??;

        Ok(Execution {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            success: output.status.success(),
        })
    }

    fn describe(&self) -> &str {
        &self.version
    }
}

// ---------------------------------------------------------------------------
// PythonLauncher
// ---------------------------------------------------------------------------

/// Locates and warms up a Python interpreter.
pub struct PythonLauncher {
    config: RuntimeConfig,
}

impl PythonLauncher {
    pub fn new(config: RuntimeConfig) -> Self {
        Self { config }
    }

    fn candidates(&self) -> Vec<String> {
        match &self.config.interpreter_path {
            Some(path) => vec![path.clone()],
            None => DEFAULT_CANDIDATES.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// One availability probe: `<candidate> --version`, returning the
    /// reported version on a hit.
    async fn probe(&self, candidate: &str) -> Option<String> {
        let mut cmd = Command::new(candidate);
        cmd.arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(PROBE_TIMEOUT, cmd.output())
            .await
            .ok()?
            .ok()?;
        if !output.status.success() {
            return None;
        }
        // Older interpreters report the version on stderr.
        let text = if output.stdout.is_empty() {
            &output.stderr
        } else {
            &output.stdout
        };
        Some(String::from_utf8_lossy(text).trim().to_string())
    }
}

#[async_trait]
impl EngineLauncher for PythonLauncher {
    async fn bootstrap(&self) -> Result<Arc<dyn Engine>, BootstrapError> {
        let interval = Duration::from_millis(self.config.probe_interval_ms);

        let mut attempt = 0;
        let (binary, version) = loop {
            attempt += 1;
            let mut hit = None;
            for candidate in self.candidates() {
                if let Some(version) = self.probe(&candidate).await {
                    hit = Some((candidate, version));
                    break;
                }
            }
            if let Some(found) = hit {
                break found;
            }
            if attempt >= self.config.probe_attempts {
                return Err(BootstrapError::InterpreterUnavailable { attempts: attempt });
            }
            debug!(attempt, "interpreter not available yet, retrying");
            tokio::time::sleep(interval).await;
        };
        info!(binary = %binary, version = %version, "interpreter located");

        let engine = PythonEngine::new(
            PathBuf::from(binary),
            version,
            Duration::from_millis(self.config.exec_timeout_ms),
        );

        // Entry-point check: the interpreter must actually run a program,
        // not just answer --version.
        let warm = engine
            .execute("print('ready')")
            .await
            .map_err(|e| BootstrapError::WarmUpFailed(e.to_string()))?;
        if !warm.success || !warm.stdout.contains("ready") {
            return Err(BootstrapError::WarmUpFailed(warm.stderr.trim().to_string()));
        }

        Ok(Arc::new(engine))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
