//! Import Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging, and error handling for the import pipeline workspace.
//!
//! - **Error Handling**: [`ImportError`] and the [`Result`] alias
//! - **Logging**: tracing subscriber setup driven by [`logging::LogConfig`]
//! - **Types**: identity types shared by every adapter ([`types::FileStat`], [`types::ImportId`])
//!
//! # Example
//!
//! ```no_run
//! use import_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let _guard = init_logging(&LogConfig::from_env()?)?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{ImportError, Result};
pub use types::{FileStat, ImportId};
