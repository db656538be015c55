//! # Configuration Modules
//!
//! Client timing and sizing options, layered from defaults, an optional JSON
//! file and `SIGNALR_*` environment variables.

/// Provides the client configuration and its loaders.
pub mod config_client;
