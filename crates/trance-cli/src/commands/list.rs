//! List command - show discovered units without running them

use super::test::{Session, TestArgs};
use anyhow::Result;
use clap::Args;
use colored::*;
use std::process::ExitCode;
use trance_script::ScriptEngine;
use trance_test::TestUnit;

#[derive(Debug, Clone, Default, Args)]
pub struct ListArgs {
    /// Test sources: files, directories or wildcard patterns
    pub sources: Vec<String>,
    /// Mark units whose full name does not contain this substring as filtered
    #[arg(long, short = 'f')]
    pub filter: Option<String>,
    #[arg(long = "tag", value_name = "TAG")]
    pub tags: Vec<String>,
    #[arg(long = "exclude-tag", value_name = "TAG")]
    pub exclude_tags: Vec<String>,
    /// List the loadable units of broken files instead of failing
    #[arg(long)]
    pub continue_on_load_error: bool,
    /// Disable colored output
    #[arg(long, env = "NO_COLOR")]
    pub no_color: bool,
}

/// Run the list command
pub fn run(args: ListArgs) -> Result<ExitCode> {
    let test_args = TestArgs {
        sources: args.sources,
        filter: args.filter,
        tags: args.tags,
        exclude_tags: args.exclude_tags,
        continue_on_load_error: args.continue_on_load_error,
        no_color: args.no_color,
        ..Default::default()
    };
    let session = Session::from_args(&test_args)?;
    if !session.settings.color {
        colored::control::set_override(false);
    }

    let engine = ScriptEngine::new();
    let plan = session.load(&engine)?;
    let filter = &session.scheduler.filter;

    let units = plan.units();
    let mut runs = 0;
    for unit in &units {
        runs += unit.instances().len();
        println!("{}", describe(unit, filter.skip_reason(unit)));
    }
    for error in &plan.load_errors {
        eprintln!("{} {}", "warning:".yellow().bold(), error);
    }

    println!();
    println!(
        "{} unit{}, {} run{}",
        units.len().to_string().bold(),
        if units.len() == 1 { "" } else { "s" },
        runs.to_string().bold(),
        if runs == 1 { "" } else { "s" }
    );
    Ok(ExitCode::SUCCESS)
}

/// `file  group/name  [kind] #tags (skip reason)`
fn describe(unit: &TestUnit, skip: Option<String>) -> String {
    let mut line = format!(
        "{}  {}  [{}]",
        unit.file.name.dimmed(),
        unit.full_name().bold(),
        unit.kind.tag()
    );
    let params = unit.params.rows().map_or(0, <[_]>::len);
    if params > 0 {
        line.push_str(&format!(" x{}", params));
    }
    for tag in &unit.tags {
        line.push_str(&format!(" #{}", tag));
    }
    if let Some(reason) = skip {
        line.push_str(&format!(" {}", format!("({})", reason).yellow()));
    }
    line
}
