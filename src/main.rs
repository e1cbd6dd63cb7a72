mod cli;
mod commands;

use clap::Parser;
use cli::Cli;
use console::style;
use directories::ProjectDirs;
use std::fs;
use std::time::Instant;
use tracing_subscriber::fmt::time;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, fmt};
use unmask::config::EvaluatorConfig;
use unmask::errors::EvalResult;

fn init_tracing(emit_trace: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if emit_trace { "debug" } else { "warn" })
    });

    let fmt_layer = fmt::layer()
        .pretty()
        .with_thread_ids(true)
        .with_timer(time::UtcTime::rfc_3339());

    Registry::default().with(filter).with(fmt_layer).init();
}

fn main() -> EvalResult<()> {
    let now = Instant::now();
    let cli = Cli::parse();
    let emit_trace = matches!(cli.command, cli::Commands::Eval { emit_trace, .. } if emit_trace);
    init_tracing(emit_trace);

    tracing::debug!("CLI starting up");

    let proj_dirs = ProjectDirs::from("dev", "ecpeter23", "unmask")
        .ok_or("Unable to determine project directories")?;

    let config_dir = proj_dirs.config_dir();
    fs::create_dir_all(config_dir)?;

    let config = EvaluatorConfig::load(config_dir)?;

    commands::handle_command(cli.command, &config)?;

    eprintln!(
        "{} in {:.3}s.",
        style("Finished").green().bold(),
        now.elapsed().as_secs_f32()
    );
    Ok(())
}
