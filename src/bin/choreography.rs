//! Choreography player - drives one or two Piper arms through timed pose schedules.
//!
//! Usage:
//!   choreography --poses poses.json --schedule dance.txt [--can can0]
//!   choreography --poses poses.json --primary left.txt --secondary right.txt
//!
//! Exit codes: 0 completed, 1 load or configuration error, 2 an arm aborted,
//! 130 interrupted with Ctrl+C.

use anyhow::Result;
use choreo::cli::Cli;
use choreo::session::{self, SessionOutcome};
use clap::Parser;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const EXIT_LOAD_ERROR: u8 = 1;
const EXIT_ABORTED: u8 = 2;
const EXIT_INTERRUPTED: u8 = 130;

fn init_tracing(quiet: bool) -> Result<()> {
    let level = if quiet { "warn" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("choreo={}", level).parse()?)
                .add_directive(format!("choreography={}", level).parse()?)
                .add_directive("warn".parse()?),
        )
        .init();
    Ok(())
}

fn print_summary(outcome: &SessionOutcome) {
    println!();
    for result in outcome.outcomes() {
        let r = &result.report;
        match &result.abort_reason {
            None => println!(
                "[{}] {:?} after {:.1}s: {} commands, {} failures, {} stalls",
                result.label,
                result.state,
                r.elapsed.as_secs_f64(),
                r.commands,
                r.failures,
                r.stalls
            ),
            Some(reason) => println!(
                "[{}] {:?} ({}): {} commands, {} failures",
                result.label, result.state, reason, r.commands, r.failures
            ),
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.quiet)?;

    let dry_run = cli.dry_run;
    let config = match cli.into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return Ok(ExitCode::from(EXIT_LOAD_ERROR));
        }
    };

    let cancel = CancellationToken::new();
    let interrupted = Arc::new(AtomicBool::new(false));

    // Ctrl+C handler
    let cancel_clone = cancel.clone();
    let interrupted_clone = interrupted.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Ctrl+C received, stopping...");
        interrupted_clone.store(true, Ordering::SeqCst);
        cancel_clone.cancel();
    });

    let loaded = match session::load(&config) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return Ok(ExitCode::from(EXIT_LOAD_ERROR));
        }
    };

    if dry_run {
        println!();
        println!("========================================");
        println!("Dry run (no hardware)");
        println!("========================================");
        print!("{}", session::schedule_listing(&loaded));
        println!("========================================");
        println!();
    }

    let drivers = match session::open_drivers(&config.arms) {
        Ok(drivers) => drivers,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return Ok(ExitCode::from(EXIT_LOAD_ERROR));
        }
    };

    let outcome = match session::run_with_drivers(&config, &loaded, drivers, cancel).await {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return Ok(ExitCode::from(EXIT_LOAD_ERROR));
        }
    };
    print_summary(&outcome);

    if interrupted.load(Ordering::SeqCst) {
        Ok(ExitCode::from(EXIT_INTERRUPTED))
    } else if outcome.all_completed() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_ABORTED))
    }
}
