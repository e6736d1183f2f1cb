//! TinyClaw decision core — demo CLI
//!
//! Runs a gateway scenario against the real router, authorizer and audit
//! log, or verifies an audit file written by an earlier run.
//!
//! Usage:
//!   cargo run -p demo -- scenario
//!   cargo run -p demo -- scenario --audit-file audit.jsonl
//!   cargo run -p demo -- verify audit.jsonl --head <HEX>

mod scenario;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tinyclaw_audit::{read_entries, verify_file};
use tinyclaw_contracts::error::TinyclawResult;

// ── CLI definition ────────────────────────────────────────────────────────────

/// TinyClaw — routing, tool authorization and a tamper-evident audit trail.
#[derive(Parser)]
#[command(
    name = "demo",
    about = "TinyClaw decision core demo",
    long_about = "Runs a multi-channel gateway scenario showing route resolution,\n\
                  fail-closed tool authorization and audit chain integrity."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Route messages and authorize tool calls, then verify the audit chain.
    Scenario {
        /// Append to this JSON-lines audit file instead of keeping the log in memory.
        #[arg(long, value_name = "PATH")]
        audit_file: Option<PathBuf>,
    },
    /// Verify a JSON-lines audit file and report the first broken entry.
    Verify {
        /// The audit file to check.
        path: PathBuf,
        /// Head digest recorded at the end of an earlier run. Without it a
        /// rewritten last entry cannot be detected.
        #[arg(long, value_name = "HEX")]
        head: Option<String>,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    // Set RUST_LOG=debug for per-decision logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::Scenario { audit_file } => {
            print_banner();
            scenario::run_scenario(audit_file.as_deref())
        }
        Command::Verify { path, head } => verify(&path, head.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

// ── Verify ────────────────────────────────────────────────────────────────────

fn verify(path: &Path, expected_head: Option<&str>) -> TinyclawResult<()> {
    let head = verify_file(path, expected_head)?;
    let entries = read_entries(path)?.len();

    println!("{}: {} entries, chain intact", path.display(), entries);
    println!("head: {}", head);
    if expected_head.is_none() {
        println!("note: the last entry is only covered when --head is given");
    }
    Ok(())
}

// ── Banner ────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("TinyClaw — Gateway Decision Core");
    println!("================================");
    println!();
    println!("Per inbound message:");
    println!("  [1] Router resolves (channel, peer, guild/team/account) → agent + session");
    println!("  [2] Authorizer checks each tool call: level table → grants → external PDP");
    println!("  [3] Tool runs ONLY after an allow has been written to the audit chain");
    println!("  [4] Every decision is a SHA-256 linked audit entry");
    println!();
}
