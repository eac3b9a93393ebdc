//! Common types shared across the dd7to9 crates
//!
//! Right now this is the runtime configuration of the DirectDraw shim. It is
//! read once when the DLL attaches and then handed to the process context.

pub mod config;

pub use config::{Config, ConfigError, CONFIG_ENV_VAR, CONFIG_FILE_NAME};
