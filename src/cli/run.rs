//! One-shot batch execution from the command line

use anyhow::{Context, Result};
use coderun_sandbox::{BatchRequest, SessionController};
use std::io::Read;
use std::path::Path;

use crate::server::load_config;

pub async fn run(file: &Path, stdin: String) -> Result<()> {
    let code = read_source(file)?;
    let config = load_config()?;

    let controller = SessionController::from_config(&config.sandbox)
        .await
        .context("Failed to initialize session controller")?;

    let request = BatchRequest::new(code).with_stdin(stdin);
    let result = controller
        .run_batch(&request)
        .await
        .context("Execution failed")?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}

fn read_source(file: &Path) -> Result<String> {
    if file == Path::new("-") {
        let mut code = String::new();
        std::io::stdin()
            .read_to_string(&mut code)
            .context("Failed to read source from stdin")?;
        return Ok(code);
    }
    std::fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))
}
