use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use colored::Colorize;
use std::io;
use std::process::ExitCode;

mod commands;
mod logging;

use commands::EXIT_CONFIG_ERROR;

/// Test runner for the trance scripting language.
///
/// Discovers `.hyp` test sources, runs them on a worker pool with fixtures,
/// mocks and per-test timeouts, and reports the results.
///
/// EXAMPLES:
///     trance test                         Run every test below the current directory
///     trance test tests/ --filter math    Only units whose name contains "math"
///     trance test --workers 1             Run serially
///     trance test --format xml -o out.xml Write a JUnit report
///     trance test --watch                 Re-run on every change
///     trance list                         Show discovered units
///
/// ENVIRONMENT VARIABLES:
///     TRANCE_LOG                 Diagnostic log filter (e.g. "trance_test=debug")
///     TRANCE_WORKERS             Worker count override
///     TRANCE_TIMEOUT_MS          Default timeout override
///     TRANCE_COVERAGE_THRESHOLD  Coverage threshold override
///     NO_COLOR                   Set to disable colored output
#[derive(Parser)]
#[command(name = "trance")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run tests
    ///
    /// Loads test sources (files, directories or wildcard patterns such as
    /// `tests/**/*.hyp`), runs them and writes a report. Sources default to
    /// the `include` list of trance.toml, then to the current directory.
    ///
    /// EXIT CODES:
    ///     0   every run passed or was skipped
    ///     1   a run failed, errored or timed out, or coverage is below threshold
    ///     2   configuration or load error
    #[command(visible_alias = "t")]
    Test(commands::test::TestArgs),

    /// List discovered test units without running them
    #[command(visible_alias = "ls")]
    List(commands::list::ListArgs),

    /// Generate shell completions
    ///
    /// EXAMPLES:
    ///     trance completions bash > ~/.local/share/bash-completion/completions/trance
    ///     trance completions zsh > ~/.zfunc/_trance
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let verbose = matches!(&cli.command, Commands::Test(args) if args.verbose);
    logging::init(verbose);

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{} {:#}", "error:".red().bold(), err);
            ExitCode::from(EXIT_CONFIG_ERROR)
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Test(args) => commands::test::run(args),
        Commands::List(args) => commands::list::run(args),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "trance", &mut io::stdout());
            Ok(ExitCode::SUCCESS)
        }
    }
}
