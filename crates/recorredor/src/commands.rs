//! CLI command definitions using clap

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Recorredor: run element-based UI test suites across isolated lanes
#[derive(Parser, Debug)]
#[command(name = "recorredor")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output (auto, always, never)
    #[arg(long, value_enum, default_value_t = ColorArg::Auto, global = true)]
    pub color: ColorArg,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a registered suite
    Run(RunArgs),

    /// List registered suites and their tests
    List,

    /// Print the effective harness configuration as YAML
    Config(ConfigArgs),
}

/// Arguments for `run`
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Suite name
    pub suite: String,

    /// Test selector: comma-separated globs over test ids, `tag:<name>` for tags
    #[arg(short, long)]
    pub filter: Option<String>,

    /// Device/simulator target id (repeatable); one lane per target
    #[arg(short, long = "target")]
    pub targets: Vec<String>,

    /// Number of parallel lanes
    #[arg(short = 'j', long = "parallel")]
    pub parallel: Option<usize>,

    /// Harness configuration file (YAML or JSON)
    #[arg(short, long, env = "RECORRIDO_CONFIG")]
    pub config: Option<PathBuf>,

    /// Artifact directory
    #[arg(long)]
    pub artifacts: Option<PathBuf>,

    /// Whole-test budget in milliseconds
    #[arg(long, value_name = "MS")]
    pub timeout: Option<u64>,

    /// Output format
    #[arg(long, value_enum, default_value_t = FormatArg::Text)]
    pub format: FormatArg,

    /// Append every result and artifact as JSON lines to this file
    #[arg(long, value_name = "FILE")]
    pub results_log: Option<PathBuf>,
}

/// Arguments for `config`
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Harness configuration file (YAML or JSON)
    #[arg(short, long, env = "RECORRIDO_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Report format
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatArg {
    /// Human-readable lines and summary
    #[default]
    Text,
    /// The suite report as JSON on stdout
    Json,
}

/// Color argument
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorArg {
    /// Automatic color detection
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

impl From<ColorArg> for crate::config::ColorChoice {
    fn from(arg: ColorArg) -> Self {
        match arg {
            ColorArg::Auto => Self::Auto,
            ColorArg::Always => Self::Always,
            ColorArg::Never => Self::Never,
        }
    }
}
