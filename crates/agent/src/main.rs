// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use vigil::config::AgentArgs;

#[derive(Parser)]
#[command(name = "vigil", version, about = "Host and container monitoring agent.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Run the monitoring agent.
    Agent(AgentArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Agent(args) => {
            init_tracing(&args.log_level, &args.log_format);
            if let Err(e) = vigil::run::run(args).await {
                error!("fatal: {e:#}");
                std::process::exit(1);
            }
        }
    }
}

fn init_tracing(level: &str, format: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    if format == "json" {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
