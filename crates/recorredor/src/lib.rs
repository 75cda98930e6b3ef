//! Recorredor: command-line front end for Recorrido
//!
//! Resolves a suite selector against a [`recorrido::SuiteRegistry`], applies
//! configuration overrides, runs the suite over a lane pool and renders the
//! results.
//!
//! ```bash
//! recorredor list                                  # registered suites
//! recorredor run demo -j 4                         # four lanes
//! recorredor run demo -t sim-a -t sim-b            # one lane per target
//! recorredor run demo --filter 'login*,tag:smoke'  # subset
//! recorredor config --config recorrido.yaml        # effective config
//! ```

#![warn(missing_docs)]
#![allow(clippy::missing_errors_doc)]

mod commands;
mod config;
pub mod demo;
mod error;
mod output;
pub mod runner;

pub use commands::{Cli, ColorArg, Commands, ConfigArgs, FormatArg, RunArgs};
pub use config::{CliConfig, ColorChoice, Verbosity};
pub use error::{CliError, CliResult};
pub use output::{format_result, format_summary, FanoutSink, ProgressReporter, ProgressSink};
