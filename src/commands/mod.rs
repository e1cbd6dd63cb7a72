pub mod eval;

use crate::cli::Commands;
use unmask::config::EvaluatorConfig;
use unmask::errors::EvalResult;

pub fn handle_command(command: Commands, config: &EvaluatorConfig) -> EvalResult<()> {
    match command {
        Commands::Eval { tree, out, emit_trace } => eval::handle(&tree, out.as_deref(), emit_trace, config),
    }
}
