//! Run multiple commands in tandem.
//!
//! A `ProcessManager` launches every command through `/bin/sh -c`, each on
//! its own pseudo-terminal, merges their output into one labeled stream, and
//! stops all of them as soon as any one exits or the operator interrupts.
//!
//! ```no_run
//! # async fn demo() -> Result<(), tandem::ConfigError> {
//! let config = tandem::Config::new(
//!     vec!["npm:dev:*".to_string(), "cargo watch -x run".to_string()],
//!     ".",
//! );
//! let manager = tandem::ProcessManager::new(config, Box::new(std::io::stdout()))?;
//! let summary = manager.run().await;
//! assert!(summary.success());
//! # Ok(())
//! # }
//! ```

pub mod ansi;
pub mod commands;
pub mod config;
pub mod error;
pub mod output;
pub mod process;
pub mod pty;
pub mod runner;
pub mod scanner;

pub use error::ConfigError;
pub use runner::{Config, Interrupter, ProcessManager, Summary, Trigger};
