use std::fs;
use std::path::Path;
use unmask::config::EvaluatorConfig;
use unmask::errors::EvalResult;
use unmask::evaluator::Evaluator;
use unmask::Node;

pub fn handle(tree_path: &Path, out: Option<&Path>, emit_trace: bool, config: &EvaluatorConfig) -> EvalResult<()> {
    if emit_trace {
        tracing::debug!(path = %tree_path.display(), "reading input tree");
    }

    let raw = fs::read_to_string(tree_path)?;
    let program: Node = serde_json::from_str(&raw)?;

    let mut evaluator = Evaluator::new(config.limits.clone());
    let residual = evaluator.run(&program)?;
    let output = Node::Program { body: residual };

    let rendered = if config.output.pretty {
        serde_json::to_string_pretty(&output)?
    } else {
        serde_json::to_string(&output)?
    };

    match out {
        Some(path) => fs::write(path, rendered)?,
        None => println!("{rendered}"),
    }
    Ok(())
}
