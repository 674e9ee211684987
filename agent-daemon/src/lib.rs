//! Guest agent daemon: startup sequence, metadata-driven reconciliation and
//! shutdown coordination with the host service manager.

pub mod agent;
pub mod agent_init;
mod error;
pub mod logging;
pub mod paths;
pub mod reconcile;
mod runtime;
pub mod scheduler;
pub mod sshca;
pub mod telemetry;

pub use agent::{run_agent, watcher_ids, AgentDeps, AgentOptions, AgentSummary};
pub use error::AgentError;
pub use reconcile::{run_update, ManagerReport, Outcome, PassReport, Reconciler};
pub use runtime::{run, start_blocking};
