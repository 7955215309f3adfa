//! Host side: supervise the plugin process and call into it.

pub mod handle;
pub mod session;
pub mod supervisor;

pub use handle::{DialPolicy, RemoteHandle};
pub use session::{run, SessionReport};
pub use supervisor::{PluginInstance, ProcessSupervisor, Readiness, SupervisorSettings};
