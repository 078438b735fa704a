//! Vent - configuration deployment orchestrator for monitoring servers
//!
//! Vent keeps a versioned configuration checkout in sync, assigns every
//! monitored host to a deployment server (ventilation), generates the
//! per-server configuration trees and pushes them out with an atomic
//! switch and priority-ordered application restarts.

pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod generate;
pub mod models;
pub mod remote;
pub mod revision;
pub mod server;
pub mod store;
pub mod ventilation;

// Re-exports for convenience
pub use config::{Config, Context, Topology};
pub use dispatch::{AppsAction, DispatchOptions, Dispatcher, StopAfter};
pub use error::{VentError, VentResult};
pub use generate::{FileTreeGenerator, Generator};
pub use models::{Application, Host, ServerState, VentilationResult, WorkingCopyStatus};
pub use remote::{CommandOutput, Executor, LocalExecutor, SshExecutor};
pub use revision::{RevisionManager, ScmBackend, SvnBackend};
pub use server::{ServerHandle, ServerManager, UnitError};
pub use store::{ConfigStore, FileStore};
pub use ventilation::{checksum, Ventilator};
