//! `strand` -- demo driver for the strand kernel.
//!
//! Parses the command line, initialises tracing, loads the kernel
//! configuration and dispatches to the requested subcommand.

mod cli;
mod helpers;
mod scenarios;

use anyhow::{Context, Result};
use clap::Parser;
use strand_kernel::KernelConfig;
use tracing::{error, info};

use crate::cli::{Cli, Commands, Scenario};
use crate::helpers::init_tracing;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Demo { scenario } => cmd_demo(scenario, &config),
        Commands::Demos => cmd_demos(&config),
        Commands::Config => cmd_config(&config),
    }
}

fn load_config(cli: &Cli) -> Result<KernelConfig> {
    match &cli.config {
        Some(path) => KernelConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(KernelConfig::default()),
    }
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

fn cmd_demo(scenario: Scenario, config: &KernelConfig) -> Result<()> {
    let report = scenarios::run(scenario, config)
        .with_context(|| format!("scenario `{}` failed", scenario.name()))?;
    print_report(&report);
    Ok(())
}

fn cmd_demos(config: &KernelConfig) -> Result<()> {
    let mut failures = 0usize;
    for scenario in Scenario::ALL {
        match scenarios::run(scenario, config) {
            Ok(report) => print_report(&report),
            Err(e) => {
                error!(scenario = scenario.name(), error = %format!("{e:#}"), "scenario failed");
                failures += 1;
            }
        }
    }

    info!(
        total = Scenario::ALL.len(),
        failures, "finished running scenarios"
    );
    if failures > 0 {
        anyhow::bail!("{failures} of {} scenarios failed", Scenario::ALL.len());
    }
    Ok(())
}

fn cmd_config(config: &KernelConfig) -> Result<()> {
    let rendered = toml::to_string_pretty(config).context("failed to render configuration")?;
    print!("{rendered}");
    Ok(())
}

fn print_report(report: &scenarios::Report) {
    println!();
    println!("  {}", report.scenario.name());
    println!("  {}", "-".repeat(report.scenario.name().len()));
    for line in &report.trace {
        println!("    | {line}");
    }
    println!("  => {}", report.result);
}
