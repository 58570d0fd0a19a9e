use anyhow::Result;
use clap::Parser;

use helm_cli::app::{self, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    app::run(cli).await
}
