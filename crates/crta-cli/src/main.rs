//! `crta-sim` – runs a simulated coprocessor session.
//!
//! ```text
//! crta-sim [--frames N] [--instance N]
//! ```
//!
//! Reads `~/.crta/config.toml` (or `CRTA_CONFIG`) when present, installs
//! the tracing pipeline, streams N frames through the message adapter
//! against the simulation drivers and prints a summary.  Exits non-zero
//! if the session fails or any sensor-control batch was refused.

use colored::Colorize;
use tracing::error;

use crta_runtime::config::{self, RuntimeConfig};
use crta_runtime::{SessionSpec, init_tracing, run_sim_session};

fn main() {
    let (cfg, config_note) = match config::load() {
        Ok(Some(cfg)) => (cfg, format!("config {}", config::config_path().display())),
        Ok(None) => (RuntimeConfig::default(), "built-in defaults".to_string()),
        Err(e) => {
            eprintln!("{}: {e}", "Config error".red());
            (RuntimeConfig::default(), "built-in defaults".to_string())
        }
    };

    // Keep the guard alive until exit so pending spans are flushed.
    let _guard = init_tracing("crta-sim", cfg.log_format);

    let spec = match parse_args(std::env::args().skip(1)) {
        Ok(spec) => spec,
        Err(msg) => {
            eprintln!("{}: {msg}", "Usage error".red());
            eprintln!("usage: crta-sim [--frames N] [--instance N]");
            std::process::exit(2);
        }
    };

    println!();
    println!(
        "  {} {}  ({})",
        "crta-sim".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed(),
        config_note.dimmed()
    );
    println!(
        "  instance {}, {} frame(s)\n",
        spec.instance.to_string().bold(),
        spec.frames.to_string().bold()
    );

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to build tokio runtime");
            std::process::exit(1);
        }
    };

    match runtime.block_on(run_sim_session(cfg.adapter, &spec)) {
        Ok(report) => {
            println!("  {} frames sent", report.frames_sent);
            println!("  {} SHOT responses", report.shot_responses);
            println!(
                "  {} sensor-control batch(es) applied, {} refused",
                report.batches_succeeded.to_string().green(),
                report.batches_failed.to_string().red()
            );
            println!("  {} sensor actions recorded\n", report.sensor_log.len());
            if report.batches_failed > 0 {
                std::process::exit(1);
            }
            println!("  {} session complete", "✓".green().bold());
        }
        Err(e) => {
            error!(errno = e.errno(), error = %e, "simulated session failed");
            println!("  {} {e}", "✗".red().bold());
            std::process::exit(1);
        }
    }
}

fn parse_args(args: impl Iterator<Item = String>) -> Result<SessionSpec, String> {
    let mut spec = SessionSpec::default();
    let mut args = args;
    while let Some(flag) = args.next() {
        let value = args
            .next()
            .ok_or_else(|| format!("{flag} needs a value"))?;
        let n = value
            .parse::<u32>()
            .map_err(|_| format!("{flag}: `{value}` is not a number"))?;
        match flag.as_str() {
            "--frames" => spec.frames = n,
            "--instance" => spec.instance = n,
            other => return Err(format!("unknown option {other}")),
        }
    }
    Ok(spec)
}
