//! Watch mode - re-run the suite when a source or data file changes

use super::test::Session;
use anyhow::{Context, Result};
use colored::*;
use notify::{RecursiveMode, Watcher};
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::sync::mpsc::channel;
use std::time::Duration;
use tracing::{info, warn};
use trance_script::ScriptEngine;
use trance_test::{Scheduler, SOURCE_EXTENSION};

/// Quiet period that closes a burst of file events
const DEBOUNCE_MS: u64 = 300;

/// Run the suite, then again after every relevant change until interrupted
pub fn run_watch(session: &Session, engine: &ScriptEngine, scheduler: &Scheduler) -> Result<()> {
    let roots = watch_roots(&session.inputs);

    let (tx, rx) = channel();
    let mut watcher = notify::recommended_watcher(tx).context("Failed to create file watcher")?;
    for root in &roots {
        watcher
            .watch(root, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to start watching {}", root.display()))?;
    }

    println!(
        "Watching {} for changes...",
        roots
            .iter()
            .map(|r| r.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("Press Ctrl+C to stop\n");

    run_once(session, engine, scheduler);

    let debounce = Duration::from_millis(DEBOUNCE_MS);
    loop {
        match rx.recv() {
            Ok(Ok(event)) => {
                if !event.paths.iter().any(|p| is_relevant_change(p)) {
                    continue;
                }
                // Editors write in several steps; wait for the burst to end
                while rx.recv_timeout(debounce).is_ok() {}

                if io::stdout().is_terminal() {
                    clear_terminal();
                }
                info!(paths = ?event.paths, "change detected, re-running");
                scheduler.reset_fixtures();
                run_once(session, engine, scheduler);
            }
            Ok(Err(e)) => warn!(error = %e, "watch error"),
            Err(_) => break,
        }
    }

    Ok(())
}

/// Load, run and report once. Errors are printed, not returned, so a broken
/// save does not end the session.
fn run_once(session: &Session, engine: &ScriptEngine, scheduler: &Scheduler) {
    match session.load(engine) {
        Ok(plan) => {
            let result = scheduler.run(&plan);
            if let Err(e) = session.report(&result) {
                eprintln!("{} {:#}", "error:".red().bold(), e);
            }
            println!();
            println!("Watching for changes...");
        }
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            println!();
            println!("Watching for changes... (fix errors and save)");
        }
    }
}

/// Directories to watch for the given inputs
fn watch_roots(inputs: &[String]) -> Vec<PathBuf> {
    let mut roots: Vec<PathBuf> = inputs
        .iter()
        .map(|input| {
            let path = wildcard_base(input);
            if path.is_file() {
                match path.parent() {
                    Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                    _ => PathBuf::from("."),
                }
            } else {
                path
            }
        })
        .collect();
    roots.sort();
    roots.dedup();
    roots
}

/// Leading components of `input` before the first wildcard
fn wildcard_base(input: &str) -> PathBuf {
    let base: PathBuf = Path::new(input)
        .components()
        .take_while(|c| {
            let part = c.as_os_str().to_string_lossy();
            !part.contains('*') && !part.contains('?')
        })
        .collect();
    if base.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        base
    }
}

/// Test sources and JSON data files trigger a re-run
fn is_relevant_change(changed_path: &Path) -> bool {
    match changed_path.extension() {
        Some(ext) => ext == SOURCE_EXTENSION || ext == "json",
        None => false,
    }
}

/// Clear the terminal screen
fn clear_terminal() {
    // ANSI escape codes work on most terminals
    print!("\x1B[2J\x1B[1;1H");
}
