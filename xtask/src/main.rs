//! Workspace checks for the Veil relay
//!
//! Run with: cargo run -p xtask -- <task>

use clap::{Parser, ValueEnum};
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask", about = "Veil workspace checks")]
struct Cli {
    /// Task to run
    #[arg(value_enum)]
    task: Task,
}

#[derive(Clone, Copy, ValueEnum)]
enum Task {
    /// rustfmt in check mode
    Fmt,
    /// clippy with warnings denied
    Clippy,
    /// relay, CLI and integration tests
    Test,
    /// fmt, clippy and test in order, stopping at the first failure
    Ci,
}

impl Task {
    fn steps(self) -> Vec<&'static [&'static str]> {
        const FMT: &[&str] = &["fmt", "--all", "--check"];
        const CLIPPY: &[&str] = &["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"];
        const TEST: &[&str] = &["test", "--workspace"];

        match self {
            Task::Fmt => vec![FMT],
            Task::Clippy => vec![CLIPPY],
            Task::Test => vec![TEST],
            Task::Ci => vec![FMT, CLIPPY, TEST],
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    for args in cli.task.steps() {
        cargo(args)?;
    }
    Ok(())
}

fn cargo(args: &[&str]) -> anyhow::Result<()> {
    let status = Command::new(env!("CARGO")).args(args).status()?;
    anyhow::ensure!(status.success(), "cargo {} failed", args.join(" "));
    Ok(())
}
