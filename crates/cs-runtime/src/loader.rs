//! One-time engine bootstrap with shared awaiting.
//!
//! The engine handle is a process-wide singleton: transitions run
//! `Idle -> Loading -> Ready | Failed` and never backwards. Whichever caller
//! observes `Idle` claims the bootstrap; every other caller attaches to the
//! same in-flight attempt by watching the state channel. A waiter that
//! exhausts its budget gets a timeout error without cancelling the attempt,
//! so the machine always reaches a terminal state.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use cs_core::config::RuntimeConfig;

use crate::engine::{Engine, EngineLauncher, Execution};
use crate::python::PythonLauncher;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum LoadState {
    Idle,
    Loading,
    Ready(Arc<dyn Engine>),
    Failed(String),
}

/// Observable phase of the engine singleton, for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    Idle,
    Loading,
    Ready,
    Failed,
}

// ---------------------------------------------------------------------------
// Errors + result
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    /// The caller's wait budget ran out before the bootstrap reached a
    /// terminal state. The attempt itself keeps running.
    #[error("engine bootstrap did not complete within {0:?}")]
    InitializationTimeout(Duration),
    /// Bootstrap reached its terminal failure state. Every later call sees
    /// the same error; the engine is not retried within this process.
    #[error("engine bootstrap failed: {0}")]
    BootstrapFailed(String),
}

/// What one submitted program produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    /// Captured output streams, trimmed.
    pub output: String,
    /// Fault message when the program did not finish cleanly.
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// RuntimeLoader
// ---------------------------------------------------------------------------

/// Lazily bootstraps the code-execution engine and runs programs on it.
pub struct RuntimeLoader {
    launcher: Arc<dyn EngineLauncher>,
    bootstrap_timeout: Duration,
    wait_budget: Duration,
    state: Arc<watch::Sender<LoadState>>,
    /// The engine executes one program at a time; output capture must not
    /// interleave across callers.
    exec_gate: tokio::sync::Mutex<()>,
}

impl RuntimeLoader {
    /// Loader over the default subprocess Python launcher.
    pub fn new(config: &RuntimeConfig) -> Self {
        Self::with_launcher(Arc::new(PythonLauncher::new(config.clone())), config)
    }

    /// Loader over a custom launcher (tests, alternative engines).
    pub fn with_launcher(launcher: Arc<dyn EngineLauncher>, config: &RuntimeConfig) -> Self {
        let (state, _) = watch::channel(LoadState::Idle);
        Self {
            launcher,
            bootstrap_timeout: Duration::from_millis(config.bootstrap_timeout_ms),
            wait_budget: Duration::from_millis(config.wait_budget_ms),
            state: Arc::new(state),
            exec_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Current phase of the singleton.
    pub fn phase(&self) -> LoadPhase {
        match &*self.state.borrow() {
            LoadState::Idle => LoadPhase::Idle,
            LoadState::Loading => LoadPhase::Loading,
            LoadState::Ready(_) => LoadPhase::Ready,
            LoadState::Failed(_) => LoadPhase::Failed,
        }
    }

    /// Return the engine, bootstrapping it on first use.
    ///
    /// Guarantees at most one bootstrap attempt per process lifetime: all
    /// concurrent callers resolve to the same terminal state.
    pub async fn ensure_loaded(&self) -> Result<Arc<dyn Engine>, LoaderError> {
        {
            let state = self.state.borrow();
            match &*state {
                LoadState::Ready(engine) => return Ok(Arc::clone(engine)),
                LoadState::Failed(reason) => {
                    return Err(LoaderError::BootstrapFailed(reason.clone()))
                }
                LoadState::Idle | LoadState::Loading => {}
            }
        }

        // Claim the bootstrap if nobody has. The Loading marker is the
        // mutual-exclusion point: it is set exactly once.
        let mut claimed = false;
        self.state.send_if_modified(|state| {
            if matches!(state, LoadState::Idle) {
                *state = LoadState::Loading;
                claimed = true;
                true
            } else {
                false
            }
        });

        if claimed {
            info!("starting engine bootstrap");
            let launcher = Arc::clone(&self.launcher);
            let state = Arc::clone(&self.state);
            let budget = self.bootstrap_timeout;
            // Detached task: a cancelled caller must not strand the machine
            // in Loading.
            tokio::spawn(async move {
                let terminal = match tokio::time::timeout(budget, launcher.bootstrap()).await {
                    Ok(Ok(engine)) => {
                        info!(engine = engine.describe(), "engine ready");
                        LoadState::Ready(engine)
                    }
                    Ok(Err(e)) => {
                        error!(error = %e, "engine bootstrap failed");
                        LoadState::Failed(e.to_string())
                    }
                    Err(_) => {
                        error!(budget_ms = budget.as_millis() as u64, "engine bootstrap timed out");
                        LoadState::Failed(format!("bootstrap did not complete within {:?}", budget))
                    }
                };
                // send_replace stores the terminal state even when no
                // waiter currently holds a receiver.
                state.send_replace(terminal);
            });
        }

        let mut rx = self.state.subscribe();
        let terminal = tokio::time::timeout(
            self.wait_budget,
            rx.wait_for(|s| matches!(s, LoadState::Ready(_) | LoadState::Failed(_))),
        )
        .await;

        match terminal {
            Err(_) => Err(LoaderError::InitializationTimeout(self.wait_budget)),
            Ok(Err(_)) => Err(LoaderError::BootstrapFailed(
                "loader state channel closed".into(),
            )),
            Ok(Ok(state)) => match &*state {
                LoadState::Ready(engine) => Ok(Arc::clone(engine)),
                LoadState::Failed(reason) => Err(LoaderError::BootstrapFailed(reason.clone())),
                LoadState::Idle | LoadState::Loading => {
                    Err(LoaderError::InitializationTimeout(self.wait_budget))
                }
            },
        }
    }

    /// Execute one program on the (possibly just-bootstrapped) engine.
    ///
    /// Execution faults land in [`RunOutcome::error`] and leave the engine
    /// ready; only bootstrap problems surface as `Err`.
    pub async fn run(&self, code: &str) -> Result<RunOutcome, LoaderError> {
        let engine = self.ensure_loaded().await?;

        let _serial = self.exec_gate.lock().await;
        debug!(bytes = code.len(), "executing program");
        match engine.execute(code).await {
            Ok(execution) if execution.success => Ok(RunOutcome {
                output: combined_output(&execution),
                error: None,
            }),
            Ok(execution) => Ok(RunOutcome {
                output: execution.stdout.trim().to_string(),
                error: Some(fault_message(&execution)),
            }),
            Err(e) => {
                warn!(error = %e, "execution did not complete");
                Ok(RunOutcome {
                    output: String::new(),
                    error: Some(format!("unable to run code: {}", e)),
                })
            }
        }
    }
}

fn combined_output(execution: &Execution) -> String {
    let stdout = execution.stdout.trim();
    let stderr = execution.stderr.trim();
    match (stdout.is_empty(), stderr.is_empty()) {
        (_, true) => stdout.to_string(),
        (true, false) => stderr.to_string(),
        (false, false) => format!("{}\n{}", stdout, stderr),
    }
}

fn fault_message(execution: &Execution) -> String {
    let stderr = execution.stderr.trim();
    if stderr.is_empty() {
        "program exited with a failure status".to_string()
    } else {
        stderr.to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{BootstrapError, EngineError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockEngine {
        concurrent: AtomicUsize,
        max_concurrent: Arc<AtomicUsize>,
        exec_delay: Duration,
    }

    impl MockEngine {
        fn new(max_concurrent: Arc<AtomicUsize>, exec_delay: Duration) -> Self {
            Self {
                concurrent: AtomicUsize::new(0),
                max_concurrent,
                exec_delay,
            }
        }
    }

    #[async_trait]
    impl Engine for MockEngine {
        async fn execute(&self, code: &str) -> Result<Execution, EngineError> {
            let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_concurrent.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.exec_delay).await;
            self.concurrent.fetch_sub(1, Ordering::SeqCst);

            match code {
                "print(1+1)" => Ok(Execution {
                    stdout: "2\n".into(),
                    stderr: String::new(),
                    success: true,
                }),
                "1/0" => Ok(Execution {
                    stdout: String::new(),
                    stderr: "ZeroDivisionError: division by zero".into(),
                    success: false,
                }),
                "warn" => Ok(Execution {
                    stdout: "partial\n".into(),
                    stderr: "DeprecationWarning: old api".into(),
                    success: true,
                }),
                "vanish" => Err(EngineError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "interpreter disappeared",
                ))),
                _ => Ok(Execution {
                    stdout: String::new(),
                    stderr: String::new(),
                    success: true,
                }),
            }
        }

        fn describe(&self) -> &str {
            "mock engine"
        }
    }

    struct MockLauncher {
        calls: Arc<AtomicUsize>,
        boot_delay: Duration,
        fail: bool,
        max_concurrent: Arc<AtomicUsize>,
    }

    impl MockLauncher {
        fn new(boot_delay: Duration, fail: bool) -> Self {
            Self {
                calls: Arc::new(AtomicUsize::new(0)),
                boot_delay,
                fail,
                max_concurrent: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl EngineLauncher for MockLauncher {
        async fn bootstrap(&self) -> Result<Arc<dyn Engine>, BootstrapError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.boot_delay).await;
            if self.fail {
                return Err(BootstrapError::InterpreterUnavailable { attempts: 1 });
            }
            Ok(Arc::new(MockEngine::new(
                Arc::clone(&self.max_concurrent),
                Duration::from_millis(20),
            )))
        }
    }

    fn config(bootstrap_timeout_ms: u64, wait_budget_ms: u64) -> RuntimeConfig {
        RuntimeConfig {
            bootstrap_timeout_ms,
            wait_budget_ms,
            ..RuntimeConfig::default()
        }
    }

    fn loader_with(launcher: Arc<MockLauncher>, cfg: &RuntimeConfig) -> Arc<RuntimeLoader> {
        Arc::new(RuntimeLoader::with_launcher(launcher, cfg))
    }

    #[tokio::test(start_paused = true)]
    async fn run_maps_success_and_fault_without_poisoning_the_engine() {
        let launcher = Arc::new(MockLauncher::new(Duration::from_millis(10), false));
        let loader = loader_with(Arc::clone(&launcher), &config(5_000, 10_000));

        let ok = loader.run("print(1+1)").await.unwrap();
        assert_eq!(ok.output, "2");
        assert!(ok.error.is_none());
        assert_eq!(loader.phase(), LoadPhase::Ready);

        let fault = loader.run("1/0").await.unwrap();
        assert_eq!(fault.output, "");
        assert!(fault.error.unwrap().contains("ZeroDivisionError"));
        assert_eq!(loader.phase(), LoadPhase::Ready, "fault must not mark the engine failed");

        let again = loader.run("print(1+1)").await.unwrap();
        assert_eq!(again.output, "2");
        assert_eq!(launcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stderr_noise_on_success_is_part_of_the_output() {
        let launcher = Arc::new(MockLauncher::new(Duration::from_millis(1), false));
        let loader = loader_with(launcher, &config(5_000, 10_000));

        let outcome = loader.run("warn").await.unwrap();
        assert_eq!(outcome.output, "partial\nDeprecationWarning: old api");
        assert!(outcome.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn per_call_engine_errors_stay_per_call() {
        let launcher = Arc::new(MockLauncher::new(Duration::from_millis(1), false));
        let loader = loader_with(launcher, &config(5_000, 10_000));

        let broken = loader.run("vanish").await.unwrap();
        assert!(broken.error.unwrap().contains("unable to run code"));
        assert_eq!(loader.phase(), LoadPhase::Ready);

        let ok = loader.run("print(1+1)").await.unwrap();
        assert!(ok.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_bootstrap() {
        let launcher = Arc::new(MockLauncher::new(Duration::from_millis(100), false));
        let loader = loader_with(Arc::clone(&launcher), &config(5_000, 10_000));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let loader = Arc::clone(&loader);
            handles.push(tokio::spawn(async move { loader.ensure_loaded().await }));
        }

        let mut engines = Vec::new();
        for handle in handles {
            engines.push(handle.await.unwrap().expect("all callers resolve Ready"));
        }
        assert_eq!(launcher.calls.load(Ordering::SeqCst), 1);
        for pair in engines.windows(2) {
            assert!(Arc::ptr_eq(&pair[0], &pair[1]), "everyone sees the same handle");
        }
        assert_eq!(loader.phase(), LoadPhase::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_bootstrap_is_terminal_for_every_caller() {
        let launcher = Arc::new(MockLauncher::new(Duration::from_millis(10), true));
        let loader = loader_with(Arc::clone(&launcher), &config(5_000, 10_000));

        let first = loader.ensure_loaded().await;
        assert!(matches!(first, Err(LoaderError::BootstrapFailed(_))));
        assert_eq!(loader.phase(), LoadPhase::Failed);

        // No retry: later callers fail from the cached terminal state.
        let second = loader.ensure_loaded().await;
        assert!(matches!(second, Err(LoaderError::BootstrapFailed(_))));
        let run = loader.run("print(1+1)").await;
        assert!(matches!(run, Err(LoaderError::BootstrapFailed(_))));
        assert_eq!(launcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn bootstrap_overrunning_its_budget_becomes_failed() {
        let launcher = Arc::new(MockLauncher::new(Duration::from_secs(60), false));
        let loader = loader_with(Arc::clone(&launcher), &config(50, 10_000));

        let result = loader.ensure_loaded().await;
        match result {
            Err(LoaderError::BootstrapFailed(reason)) => {
                assert!(reason.contains("did not complete"), "got: {reason}");
            }
            other => panic!("expected BootstrapFailed, got {:?}", other.map(|_| ())),
        }
        assert_eq!(loader.phase(), LoadPhase::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_timeout_does_not_cancel_the_attempt() {
        let launcher = Arc::new(MockLauncher::new(Duration::from_millis(500), false));
        let loader = loader_with(Arc::clone(&launcher), &config(5_000, 100));

        let first = loader.ensure_loaded().await;
        assert!(matches!(first, Err(LoaderError::InitializationTimeout(_))));

        // The detached attempt keeps going and lands Ready.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(loader.phase(), LoadPhase::Ready);
        assert!(loader.ensure_loaded().await.is_ok());
        assert_eq!(launcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn executions_are_queued_never_interleaved() {
        let launcher = Arc::new(MockLauncher::new(Duration::from_millis(1), false));
        let loader = loader_with(Arc::clone(&launcher), &config(5_000, 10_000));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let loader = Arc::clone(&loader);
            handles.push(tokio::spawn(async move { loader.run("print(1+1)").await }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(
            launcher.max_concurrent.load(Ordering::SeqCst),
            1,
            "engine must see one program at a time"
        );
    }
}
