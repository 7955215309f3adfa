pub mod loader;
pub mod overrides;
pub mod schema;

pub use loader::{load, load_from_path, validate};
pub use overrides::{plugin_env, CliOverrides};
pub use schema::*;
