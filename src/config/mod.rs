//! Settings and configuration module
//!
//! Provides unified configuration with:
//! - Per-region header templates and endpoints
//! - Device telemetry template for fingerprint issuance
//! - JSON loading with defaults for every field

pub mod settings;

pub use settings::{ClientConfig, ConfigError, Endpoints, RegionProfile};
