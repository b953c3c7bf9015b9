//! Utility modules: errors, configuration and logger setup.

pub mod config;
pub mod errors;
pub mod logger;
