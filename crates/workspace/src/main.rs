use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;
mod ui;

#[tokio::main]
async fn main() -> Result<()> {
    let parsed = cli::Cli::parse();
    parsed.dispatch().await
}
