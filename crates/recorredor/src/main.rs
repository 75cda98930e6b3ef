//! Recorredor CLI entry point

use clap::Parser;
use recorredor::{
    demo, runner, Cli, CliConfig, CliError, CliResult, ColorChoice, Commands, Verbosity,
};
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = build_config(&cli);
    runner::init_tracing(config.verbosity);

    match run(cli, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // The summary already explains failed tests
            if !matches!(e, CliError::TestsFailed { .. }) {
                eprintln!("Error: {e}");
            }
            ExitCode::from(e.exit_code())
        }
    }
}

fn run(cli: Cli, config: &CliConfig) -> CliResult<()> {
    let registry = demo::registry();
    match cli.command {
        Commands::Run(args) => runner::run_suite(config, &args, &registry).map(|_| ()),
        Commands::List => {
            print!("{}", runner::list_suites(&registry));
            Ok(())
        }
        Commands::Config(args) => {
            print!("{}", runner::show_config(&args)?);
            Ok(())
        }
    }
}

fn build_config(cli: &Cli) -> CliConfig {
    let color: ColorChoice = cli.color.into();
    CliConfig::new()
        .with_verbosity(Verbosity::from_flags(cli.quiet, cli.verbose))
        .with_color(color)
}
