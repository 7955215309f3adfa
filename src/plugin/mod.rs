//! Plugin side of the loopback call protocol.
//!
//! # Architecture
//!
//! - **Listener**: binds the agreed loopback endpoint and accepts exactly one
//!   host connection
//! - **Dispatcher**: decodes call frames, runs the named operation, writes the
//!   result or error back, one call at a time
//! - **Watchdog**: idle deadline that ends the plugin if the host never
//!   sends `exit`
//! - **Server**: ties the three together and decides which one ends the
//!   process
//!
//! # Modules
//!
//! - `registry`: the `Operation` trait and the immutable operation registry
//! - `operations`: built-in `revert` and `exit`
//! - `dispatcher`: per-connection serve loop
//! - `listener`: single-connection loopback listener
//! - `watchdog`: renewable idle deadline
//! - `server`: plugin-server mode runner

pub mod dispatcher;
pub mod listener;
pub mod operations;
pub mod registry;
pub mod server;
pub mod watchdog;

pub use dispatcher::{Dispatcher, ServeOutcome};
pub use listener::PluginListener;
pub use registry::{AfterReply, Operation, OperationRegistry, Reply};
pub use server::{BoundPlugin, ExitReason, PluginServer, PluginSettings};
pub use watchdog::IdleWatchdog;
