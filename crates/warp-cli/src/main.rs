use clap::{Parser, Subcommand};

mod commands;
mod config;

use commands::fleet::FleetArgs;

#[derive(Parser)]
#[command(
    name = "warp",
    about = "WarpGrid — cluster fleet tooling",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Log output format: text or json
    #[arg(long, global = true, default_value = "text")]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the instances behind an ECS cluster
    Fleet {
        #[command(subcommand)]
        action: FleetAction,
    },
}

#[derive(Subcommand)]
enum FleetAction {
    /// Drain and terminate the oldest nodes until the Auto Scaling Group
    /// reaches the desired count.
    ///
    /// Safe to rerun after a drain timeout: drain state and membership are
    /// re-read on every run.
    ScaleDown {
        #[command(flatten)]
        args: FleetArgs,
    },
    /// Show which nodes a scale-down would remove, without changing anything
    Plan {
        #[command(flatten)]
        args: FleetArgs,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_format)?;

    match cli.command {
        Commands::Fleet { action } => match action {
            FleetAction::ScaleDown { args } => commands::fleet::scale_down(&args).await,
            FleetAction::Plan { args, format } => commands::fleet::plan(&args, &format).await,
        },
    }
}

fn init_tracing(format: &str) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("warp=info,warpgrid=info"))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        "json" => builder.json().init(),
        _ => builder.init(),
    }
    Ok(())
}
