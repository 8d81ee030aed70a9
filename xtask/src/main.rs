// Desktop/tooling crate: unwrap/expect/panic acceptable in non-embedded code.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod check;
mod emulate;
mod test;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Frame pipeline development tasks", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check no_std builds for the target and the emulator build on the host
    Check,
    /// Run all tests (unit, integration, doc)
    Test {
        /// Run only unit tests
        #[arg(long)]
        unit: bool,
        /// Run only integration tests
        #[arg(long)]
        integration: bool,
    },
    /// Run the pipeline emulator on the host
    Emulate {
        /// Frames to display before stopping
        #[arg(long, default_value_t = 60)]
        frames: u32,
        /// serial, early, te, te-early or single
        #[arg(long, default_value = "serial")]
        mode: String,
        /// Fail this sink write once (0-based)
        #[arg(long)]
        fault_at: Option<usize>,
        /// Build in release mode
        #[arg(short, long)]
        release: bool,
        /// Rerun whenever a .rs or .toml file changes
        #[arg(long)]
        watch: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check => check::run(),
        Commands::Test { unit, integration } => test::run(unit, integration),
        Commands::Emulate {
            frames,
            mode,
            fault_at,
            release,
            watch,
        } => emulate::run(&emulate::Options {
            frames,
            mode,
            fault_at,
            release,
            watch,
        }),
    }
}
