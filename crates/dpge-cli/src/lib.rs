//! DPGE CLI library.
//!
//! Settings, dataset loading, command execution and output formatting for the
//! `dpge` binary.
//!
//! # Commands
//!
//! | Command | Does |
//! |---------|------|
//! | `train` | Builds an engine from a dataset directory and trains it |
//! | `update` | Grows the latest checkpoint with a delta directory and resumes training |
//! | `evaluate` | Ranks `valid.txt` or `test.txt` with a stored checkpoint |
//! | `recommend` | Lists the top-k unseen candidates for one node |
//! | `inspect` | Prints graph statistics and stored checkpoints |

pub mod cli;
pub mod commands;
pub mod config;
pub mod data;
pub mod error;
pub mod output;
pub mod session;

pub use cli::{Cli, Command};
pub use config::{OutputFormat, Settings};
pub use data::DatasetDir;
pub use error::{CliError, Result};
pub use output::Formatter;
pub use session::Session;
