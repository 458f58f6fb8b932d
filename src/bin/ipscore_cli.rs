//! Thin CLI front-end for manual and scripted exercise of the scoring
//! engine's public API. Not a production daemon: it loads an optional
//! archive, runs one command, and saves it back on a successful
//! mutating command.

use clap::{Parser, Subcommand};
use ipscore::{parse_ipv4, ScoreEngine};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ipscore-cli", version, about = "IPv4 reputation score engine CLI")]
struct Cli {
    /// Archive file to load at start and save at end, if the command mutates state.
    #[arg(short = 'f', long = "file", global = true)]
    archive: Option<String>,

    /// Enable debug-level logging.
    #[arg(short = 'd', long = "debug", global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the score for an address.
    Get { ip: String },
    /// Overwrite the score for an address.
    Set { ip: String, score: i16 },
    /// Saturating increment.
    Incr { ip: String, delta: i16 },
    /// Saturating decrement.
    Decr { ip: String, delta: i16 },
    /// Zero an address's score.
    Delete { ip: String },
    /// Apply a decay factor and deadzone to every live score.
    Decay { factor: f32, deadzone: i16 },
    /// Print live-entry and block counts.
    Stats,
    /// Load an archive, replacing current state.
    Load { path: String },
    /// Save current state to an archive.
    Save { path: String },
}

fn is_mutating(cmd: &Command) -> bool {
    matches!(
        cmd,
        Command::Set { .. }
            | Command::Incr { .. }
            | Command::Decr { .. }
            | Command::Delete { .. }
            | Command::Decay { .. }
            | Command::Load { .. }
    )
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let engine = ScoreEngine::new();

    if let Some(archive) = &cli.archive {
        if std::path::Path::new(archive).exists() {
            if let Err(e) = ipscore::load_snapshot(&engine, archive) {
                eprintln!("error: failed to load archive '{archive}': {e}");
                return ExitCode::FAILURE;
            }
        }
    }

    let result = run_command(&engine, &cli.command);
    let succeeded = result.is_ok();
    if let Err(e) = result {
        eprintln!("error: {e}");
        return ExitCode::FAILURE;
    }

    if succeeded && is_mutating(&cli.command) {
        if let Some(archive) = &cli.archive {
            if let Err(e) = ipscore::save_snapshot(&engine, archive) {
                eprintln!("error: failed to save archive '{archive}': {e}");
                return ExitCode::FAILURE;
            }
        }
    }

    ExitCode::SUCCESS
}

fn run_command(engine: &ScoreEngine, command: &Command) -> ipscore::Result<()> {
    match command {
        Command::Get { ip } => {
            let score = engine.get_checked(ip)?;
            println!("{score}");
        }
        Command::Set { ip, score } => {
            let addr = require_valid(engine, ip)?;
            engine.set(addr, *score);
        }
        Command::Incr { ip, delta } => {
            let addr = require_valid(engine, ip)?;
            let new = engine.increment(addr, *delta);
            println!("{new}");
        }
        Command::Decr { ip, delta } => {
            let addr = require_valid(engine, ip)?;
            let new = engine.decrement(addr, *delta);
            println!("{new}");
        }
        Command::Delete { ip } => {
            let addr = require_valid(engine, ip)?;
            engine.delete(addr);
        }
        Command::Decay { factor, deadzone } => {
            let modified = engine.decay(*factor, *deadzone);
            println!("modified {modified} entries");
        }
        Command::Stats => {
            println!("count: {}", engine.count());
            println!("blocks: {}", engine.block_count());
            println!("directories: {}", engine.directory_count());
            println!("memory_bytes: {}", engine.memory_usage());
        }
        Command::Load { path } => {
            ipscore::load_snapshot(engine, path)?;
        }
        Command::Save { path } => {
            ipscore::save_snapshot(engine, path)?;
        }
    }
    Ok(())
}

fn require_valid(engine: &ScoreEngine, ip: &str) -> ipscore::Result<u32> {
    engine.get_checked(ip)?;
    Ok(parse_ipv4(ip))
}
