use std::path::PathBuf;

use clap::Parser;

use drover::Drover;

/// Control plane for bulk-email dispatch in front of an external MTA.
#[derive(Debug, Parser)]
#[command(name = "drover", version, about)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "drover.config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    Drover::from_config(&args.config)?.run().await
}
