//! xtask emulate - run the pipeline emulator on the host
//!
//! Builds and runs `pipeline-emulator` with the options mapped to its
//! environment variables. With `--watch`, the run repeats whenever a source
//! file under `crates/` changes.

use anyhow::{Context, Result};
use colored::Colorize;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::process::Command;
use std::sync::mpsc::{channel, RecvTimeoutError};
use std::time::{Duration, Instant};

pub struct Options {
    pub frames: u32,
    pub mode: String,
    pub fault_at: Option<usize>,
    pub release: bool,
    pub watch: bool,
}

pub fn run(options: &Options) -> Result<()> {
    print_banner(options);

    if !options.watch {
        return run_once(options);
    }

    if let Err(e) = run_once(options) {
        eprintln!("{}", format!("Run failed: {e}").red().bold());
    }

    let (tx, rx) = channel();
    let mut watcher: RecommendedWatcher = Watcher::new(
        move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
                    && event.paths.iter().any(|p| {
                        p.extension()
                            .map(|ext| ext == "rs" || ext == "toml")
                            .unwrap_or(false)
                    })
                {
                    let _ = tx.send(());
                }
            }
        },
        notify::Config::default(),
    )?;

    for path in [Path::new("crates"), Path::new("Cargo.toml")] {
        if path.exists() {
            watcher
                .watch(path, RecursiveMode::Recursive)
                .with_context(|| format!("Failed to watch path: {}", path.display()))?;
        }
    }

    println!();
    println!("{}", "Watching crates/ - save a file to rerun, Ctrl+C to stop".dimmed());

    let mut last_run = Instant::now();
    loop {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(()) => {
                if last_run.elapsed() < Duration::from_millis(500) {
                    continue;
                }
                std::thread::sleep(Duration::from_millis(200));
                while rx.try_recv().is_ok() {}
                last_run = Instant::now();

                println!();
                println!("{}", "Changes detected - rerunning...".yellow().bold());
                if let Err(e) = run_once(options) {
                    eprintln!("{}", format!("Run failed: {e}").red().bold());
                    println!("{}", "Fix errors and save to trigger a rerun".dimmed());
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(e) => {
                eprintln!("Watcher error: {e}");
                break;
            }
        }
    }
    Ok(())
}

fn run_once(options: &Options) -> Result<()> {
    let start = Instant::now();

    let mut cmd = Command::new("cargo");
    cmd.args(["run", "-p", "firmware", "--bin", "pipeline-emulator", "--features", "emulator"]);
    if options.release {
        cmd.arg("--release");
    }
    cmd.env("PIPELINE_FRAMES", options.frames.to_string())
        .env("PIPELINE_MODE", &options.mode)
        .stdout(std::process::Stdio::inherit())
        .stderr(std::process::Stdio::inherit());
    if let Some(call) = options.fault_at {
        cmd.env("PIPELINE_FAULT_AT", call.to_string());
    }
    // Default the child to `info` so the run summary is always visible.
    if std::env::var("RUST_LOG").is_err() {
        cmd.env("RUST_LOG", "info");
    }

    let status = cmd.status().context("Failed to run cargo")?;
    if !status.success() {
        anyhow::bail!("Emulator exited with code: {:?}", status.code());
    }

    println!(
        "{}",
        format!("✓ Completed in {:.1}s", start.elapsed().as_secs_f64()).green()
    );
    Ok(())
}

fn print_banner(options: &Options) {
    println!("{}", "═════════════════════════════════════════════".cyan());
    println!(
        "{}",
        format!("     Frame pipeline emulator - {} x{}", options.mode, options.frames)
            .cyan()
            .bold()
    );
    println!("{}", "═════════════════════════════════════════════".cyan());
    println!();
}
