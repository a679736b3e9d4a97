//! CLI argument definitions for the `strand` demo driver.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Strand -- a cooperative strand scheduler.
#[derive(Parser)]
#[command(
    name = "strand",
    version,
    about = "Strand -- cooperative strand scheduler demos",
    long_about = "Runs end-to-end scenarios against the strand kernel: composite waits, \
                  timeouts, links and stream reads."
)]
pub struct Cli {
    /// Default log level when `RUST_LOG` is unset.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Path to a kernel configuration file (TOML).
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a single scenario and print its result.
    Demo {
        /// Which scenario to run.
        #[arg(value_enum)]
        scenario: Scenario,
    },

    /// Run every scenario in order.
    Demos,

    /// Print the effective kernel configuration as TOML.
    Config,
}

/// The end-to-end scenarios the driver knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    /// `all` over two tasks that both succeed.
    All,
    /// `all` where one task fails and the sibling is terminated.
    AllFailure,
    /// A timeout that expires before its task finishes.
    Timeout,
    /// `some(2)` over three tasks.
    Some,
    /// `link` defaulting to the calling strand.
    Link,
    /// A read that waits for its minimum length.
    Read,
}

impl Scenario {
    /// Every scenario, in the order `demos` runs them.
    pub const ALL: [Scenario; 6] = [
        Scenario::All,
        Scenario::AllFailure,
        Scenario::Timeout,
        Scenario::Some,
        Scenario::Link,
        Scenario::Read,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::AllFailure => "all-failure",
            Self::Timeout => "timeout",
            Self::Some => "some",
            Self::Link => "link",
            Self::Read => "read",
        }
    }
}
