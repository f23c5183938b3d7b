//! In-container agent for workspace environments.
//!
//! Installed in the base image as `/usr/local/bin/workspace-internal`. The
//! container's entrypoint script runs `workspace-internal entrypoint` as
//! root; the host controller later runs `workspace-internal init` as the
//! `workspace` user.

use anyhow::Result;
use clap::{Parser, Subcommand};

mod entrypoint;
mod init;
mod sshkeys;
mod usersync;

#[derive(Debug, Subcommand)]
enum Commands {
    /// Container entrypoint: sync the user, install SSH keys, launch and
    /// supervise dockerd and sshd (runs as root, never returns on success)
    Entrypoint,

    /// First-run initialization: clone the repository, install editor and
    /// dev tooling, run bootstrap scripts (runs as the workspace user)
    Init,

    /// Daemon supervision loop, spawned by the entrypoint
    #[command(hide = true)]
    Supervise,
}

#[derive(Parser, Debug)]
#[command(name = "workspace-internal", version, about = "Workspace in-container agent")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    workspace_core::logging::init(None)?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Entrypoint => entrypoint::run().await,
        Commands::Init => init::run().await,
        Commands::Supervise => entrypoint::supervise().await,
    }
}
