pub mod engine;
pub mod loader;
pub mod python;

pub use engine::{BootstrapError, Engine, EngineError, EngineLauncher, Execution};
pub use loader::{LoadPhase, LoaderError, RunOutcome, RuntimeLoader};
pub use python::{PythonEngine, PythonLauncher};
