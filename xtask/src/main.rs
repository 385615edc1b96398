//! Build automation tasks for the sqlpool workspace.
//!
//! Run with `cargo xtask <command>`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use xshell::{Shell, cmd};

#[derive(Parser)]
#[command(
    name = "xtask",
    about = "Build automation for the sqlpool workspace",
    long_about = "Build automation for the sqlpool workspace.\n\n\
                  `ci` runs the cheap static checks first and the pool and \
                  transaction test suites last."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run fmt, clippy and doc checks, then every test suite
    Ci,
    /// Check formatting of every crate
    Fmt,
    /// Lint every crate and test target, denying warnings
    Clippy,
    /// Run unit tests, then the pool integration suite
    Test,
    /// Build API docs for sqlpool and sqlpool-transaction
    Doc,
    /// Run only the property tests (pool size bound, savepoint records)
    Props {
        /// Extra cargo test arguments, e.g. a test name filter
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },
    /// Clean build artifacts
    Clean,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;

    // Change to workspace root
    let workspace_root = workspace_root()?;
    sh.change_dir(&workspace_root);

    match cli.command {
        Command::Ci => {
            println!("Running CI checks...");
            fmt(&sh)?;
            clippy(&sh)?;
            doc(&sh)?;
            test(&sh)?;
            println!("All CI checks passed!");
        }
        Command::Fmt => fmt(&sh)?,
        Command::Clippy => clippy(&sh)?,
        Command::Test => test(&sh)?,
        Command::Doc => doc(&sh)?,
        Command::Props { args } => props(&sh, &args)?,
        Command::Clean => clean(&sh)?,
    }

    Ok(())
}

fn workspace_root() -> Result<PathBuf> {
    let output = std::process::Command::new("cargo")
        .args(["locate-project", "--workspace", "--message-format=plain"])
        .output()
        .context("failed to run cargo locate-project")?;

    let path = String::from_utf8(output.stdout)
        .context("invalid UTF-8 in cargo output")?
        .trim()
        .to_string();

    Ok(PathBuf::from(path)
        .parent()
        .context("failed to get workspace root")?
        .to_path_buf())
}

fn fmt(sh: &Shell) -> Result<()> {
    println!("Checking formatting...");
    cmd!(sh, "cargo fmt --all -- --check").run()?;
    println!("Formatting check passed.");
    Ok(())
}

fn clippy(sh: &Shell) -> Result<()> {
    println!("Running clippy...");
    cmd!(sh, "cargo clippy --workspace --all-targets -- -D warnings").run()?;
    println!("Clippy check passed.");
    Ok(())
}

fn test(sh: &Shell) -> Result<()> {
    println!("Running unit tests...");
    cmd!(sh, "cargo test --workspace --exclude sqlpool-testing").run()?;

    // The pool suite asserts on wall-clock timeouts; keep it off a saturated CPU.
    println!("Running pool integration tests...");
    cmd!(sh, "cargo test -p sqlpool-testing -- --test-threads=2").run()?;
    println!("All tests passed.");
    Ok(())
}

fn doc(sh: &Shell) -> Result<()> {
    println!("Generating documentation...");
    cmd!(
        sh,
        "cargo doc --no-deps -p sqlpool -p sqlpool-transaction"
    )
    .env("RUSTDOCFLAGS", "-D warnings")
    .run()?;
    println!("Documentation generated.");
    Ok(())
}

fn props(sh: &Shell, args: &[String]) -> Result<()> {
    println!("Running property tests...");
    cmd!(sh, "cargo test --workspace prop_ {args...}").run()?;
    println!("Property tests passed.");
    Ok(())
}

fn clean(sh: &Shell) -> Result<()> {
    println!("Cleaning build artifacts...");
    cmd!(sh, "cargo clean").run()?;
    println!("Clean complete.");
    Ok(())
}

