pub mod cancellation;
pub mod error;
pub mod pause;
pub mod runner;
pub mod worker_pool;

pub use cancellation::CancellationToken;
pub use error::OrchestratorError;
pub use pause::PauseGate;
pub use runner::Orchestrator;
