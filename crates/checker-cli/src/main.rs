use std::io;
use std::process::ExitCode;

use checker_cli::{Environment, Runner};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<ExitCode> {
    // Logs go to stderr; stdout carries only the rendered response.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("warn"))?,
        )
        .with_writer(io::stderr)
        .init();

    let mut runner = Runner::new(Environment::from_process());
    let state = runner.run(
        std::env::args_os(),
        &mut io::stdout().lock(),
        &mut io::stderr().lock(),
    );
    Ok(state.exit_code())
}
