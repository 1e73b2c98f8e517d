mod cli;

use clap::Parser;

fn main() {
    // Logs go to stderr; stdout carries command output.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::debug!("agent-resume v{} starting", agent_resume::VERSION);

    let code = cli::ResumeCli::parse().run();
    std::process::exit(code);
}
