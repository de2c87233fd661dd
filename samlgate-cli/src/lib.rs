//! samlgate CLI library
//!
//! Exposes the CLI configuration for testing.

pub mod config;

pub use config::{CliConfig, LoginOverrides, LoginSettings, MetadataSource, load_config};
