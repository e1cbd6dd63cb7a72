use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "unmask")]
#[command(about = "A taint-aware partial evaluator for deobfuscating JavaScript")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub(crate) command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Evaluate a typed syntax tree, emitting its residual form
    Eval {
        /// Path to the input tree, serialized as JSON (spec §6)
        tree: PathBuf,

        /// Write the residual tree here instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Stream the evaluator's diagnostic trace to stderr as it runs
        #[arg(long)]
        emit_trace: bool,
    },
}
