//! Command handlers
//!
//! Each handler resolves its inputs (configuration file, CLI overrides,
//! registered suite) and returns what `main` should print, so the handlers
//! can be exercised without spawning the binary.

use crate::commands::{ConfigArgs, FormatArg, RunArgs};
use crate::config::{CliConfig, Verbosity};
use crate::error::{CliError, CliResult};
use crate::output::{FanoutSink, ProgressReporter};
use recorrido::{
    HarnessConfig, JsonLinesSink, Scheduler, SuiteReport, SuiteRegistry, SuiteSelector,
};
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Install the stderr log subscriber
///
/// `RUST_LOG` wins over the `-v`/`-q` derived default.
pub fn init_tracing(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.log_filter()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbosity.is_debug())
        .try_init();
}

/// Load the harness configuration file, or defaults when none is given
pub fn load_config(path: Option<&Path>) -> CliResult<HarnessConfig> {
    match path {
        Some(path) => {
            debug!(path = %path.display(), "loading harness configuration");
            Ok(HarnessConfig::from_path(path)?)
        }
        None => Ok(HarnessConfig::default()),
    }
}

/// Apply `run` overrides on top of the file configuration
pub fn effective_config(args: &RunArgs) -> CliResult<HarnessConfig> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(dir) = &args.artifacts {
        config = config.with_artifact_dir(dir);
    }
    if let Some(ms) = args.timeout {
        if ms == 0 {
            return Err(CliError::invalid_argument("--timeout must be positive"));
        }
        config = config.with_test_timeout(Duration::from_millis(ms));
    }
    if let Some(parallel) = args.parallel {
        config = config.with_parallelism(parallel);
    } else if !args.targets.is_empty() {
        config = config.with_parallelism(args.targets.len());
    }
    if config.parallelism == 0 {
        return Err(CliError::invalid_argument("--parallel must be at least 1"));
    }
    config.validate()?;
    Ok(config)
}

/// Run a registered suite and print its results
///
/// Returns the report when every test passed and
/// [`CliError::TestsFailed`] otherwise.
pub fn run_suite(
    cli: &CliConfig,
    args: &RunArgs,
    registry: &SuiteRegistry,
) -> CliResult<SuiteReport> {
    let config = effective_config(args)?;
    let entry = registry.get(&args.suite)?;
    let selector = match &args.filter {
        Some(expr) => SuiteSelector::parse(expr)?,
        None => SuiteSelector::all(),
    };
    let suite = entry.suite.filter(&selector);
    if suite.is_empty() {
        return Err(CliError::invalid_argument(format!(
            "no test in suite '{}' matches the filter",
            args.suite
        )));
    }

    let text = args.format == FormatArg::Text;
    let reporter =
        ProgressReporter::new(cli.color.should_color(), cli.verbosity.is_quiet() || !text);
    reporter.header(&format!("{} ({} tests)", suite.name(), suite.len()));

    let mut sinks = FanoutSink::new().with(Arc::new(reporter.progress(suite.len(), suite.name())));
    if let Some(path) = &args.results_log {
        sinks = sinks.with(Arc::new(JsonLinesSink::create(path)?));
    }

    let parallelism = config.parallelism;
    let artifact_dir = config.artifact_dir.clone();
    info!(suite = suite.name(), parallelism, targets = ?args.targets, "running suite");
    let scheduler = Scheduler::new(config, Arc::clone(&entry.provisioner))
        .with_targets(args.targets.clone())
        .with_sink(Arc::new(sinks));
    let report = scheduler.run(&suite, parallelism)?;

    match args.format {
        FormatArg::Text => {
            for result in &report.results {
                reporter.test_result(result);
            }
            reporter.summary(&report);
            if !report.artifact_paths().is_empty() {
                reporter.info(&format!("failure artifacts in {}", artifact_dir.display()));
            }
            if let Some(path) = &args.results_log {
                reporter.info(&format!("results written to {}", path.display()));
            }
        }
        FormatArg::Json => println!("{}", report.to_json()?),
    }

    if report.all_passed() {
        Ok(report)
    } else {
        Err(CliError::TestsFailed {
            failed: report.failed_count() + report.error_count(),
            total: report.total(),
        })
    }
}

/// Registered suites and their tests, one per line
#[must_use]
pub fn list_suites(registry: &SuiteRegistry) -> String {
    let mut out = String::new();
    for entry in registry.iter() {
        let _ = writeln!(out, "{} ({} tests)", entry.suite.name(), entry.suite.len());
        for test in entry.suite.tests() {
            if test.tags().is_empty() {
                let _ = writeln!(out, "  {}", test.id());
            } else {
                let tags: Vec<_> = test.tags().iter().map(String::as_str).collect();
                let _ = writeln!(out, "  {} [{}]", test.id(), tags.join(", "));
            }
        }
    }
    out
}

/// Effective configuration as YAML
pub fn show_config(args: &ConfigArgs) -> CliResult<String> {
    let config = load_config(args.config.as_deref())?;
    config.validate()?;
    Ok(config.to_yaml()?)
}
