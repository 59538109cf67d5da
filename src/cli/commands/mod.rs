//! CLI command implementations.

mod config;
mod replay;
mod routes;

pub use config::{run_config, ConfigArgs};
pub use replay::{run_replay, ReplayArgs};
pub use routes::{run_routes, RoutesArgs};
