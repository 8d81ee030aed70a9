use anyhow::{Context, Result};
use colored::Colorize;
use std::process::Command;
use std::time::Instant;

const TARGET: &str = "thumbv7em-none-eabihf";

/// One `cargo` invocation and whether its failure stops the run.
struct Step {
    name: &'static str,
    args: &'static [&'static str],
    fatal: bool,
}

const STEPS: &[Step] = &[
    Step {
        name: "platform crate (no_std)",
        args: &["check", "-p", "platform", "--target", TARGET, "--features", "defmt"],
        fatal: true,
    },
    Step {
        name: "pipeline crate (no_std)",
        args: &["check", "-p", "pipeline", "--target", TARGET, "--features", "defmt"],
        fatal: true,
    },
    Step {
        name: "firmware library (no_std)",
        args: &["check", "-p", "firmware", "--lib", "--target", TARGET],
        fatal: true,
    },
    Step {
        name: "emulator target (host)",
        args: &["check", "-p", "firmware", "--features", "emulator"],
        fatal: true,
    },
    Step {
        name: "clippy lints",
        args: &["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"],
        fatal: false,
    },
    Step {
        name: "code formatting",
        args: &["fmt", "--all", "--check"],
        fatal: false,
    },
];

pub fn run() -> Result<()> {
    println!();
    println!("{}", "🔍 Checking pipeline builds...".cyan().bold());
    println!();

    let total_start = Instant::now();

    for step in STEPS {
        println!("{}", format!("  Checking {}...", step.name).cyan());
        let start = Instant::now();

        let output = Command::new("cargo")
            .args(step.args)
            .output()
            .with_context(|| format!("Failed to run {}", step.name))?;

        if output.status.success() {
            println!(
                "{}",
                format!(
                    "  ✓ {} passed in {:.2}s",
                    step.name,
                    start.elapsed().as_secs_f64()
                )
                .green()
            );
        } else if step.fatal {
            eprintln!("{}", format!("  ✗ {} failed", step.name).red().bold());
            eprintln!();
            eprintln!("{}", String::from_utf8_lossy(&output.stderr));
            anyhow::bail!("{} failed", step.name);
        } else {
            // Lint and format findings are reported, not fatal.
            eprintln!("{}", format!("  ⚠ {} reported issues", step.name).yellow().bold());
            eprintln!();
            eprintln!("{}", String::from_utf8_lossy(&output.stderr));
        }
        println!();
    }

    println!(
        "{}",
        format!(
            "✓ All checks completed in {:.2}s",
            total_start.elapsed().as_secs_f64()
        )
        .green()
        .bold()
    );
    println!();

    Ok(())
}
