//! Process-wide configuration for kernel building and dispatch.
//!
//! Configuration is resolved once at startup from the environment (and,
//! optionally, a `genred.toml` file) into an immutable [`ProcessConfig`]
//! that is passed by reference into every component that needs it.

#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod types;

pub use error::ConfigError;
pub use loader::{from_env, from_lookup, load_config, load_config_from_str, CONFIG_FILE};
pub use types::*;
