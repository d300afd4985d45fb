mod cli;

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before the configuration reads the environment
    dotenvy::dotenv().ok();

    let cli = cli::Cli::parse();
    cli.execute().await
}
