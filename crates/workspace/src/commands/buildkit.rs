//! `workspace buildkit`: inspect or manage the shared BuildKit
//! infrastructure.

use anyhow::{bail, Result};
use workspace_core::buildkit;
use workspace_core::docker::Docker;

/// Which buildkit operation was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Status,
    Stop,
    Restart,
    Clean,
}

impl Action {
    /// Map the mutually exclusive CLI flags onto one action; no flag means
    /// `--status`.
    pub fn from_flags(status: bool, stop: bool, restart: bool, clean: bool) -> Result<Self> {
        let picked = [status, stop, restart, clean].iter().filter(|f| **f).count();
        if picked > 1 {
            bail!("Pass at most one of --status, --stop, --restart, --clean");
        }
        Ok(if stop {
            Action::Stop
        } else if restart {
            Action::Restart
        } else if clean {
            Action::Clean
        } else {
            Action::Status
        })
    }
}

pub async fn execute(action: Action) -> Result<()> {
    let docker = Docker::new();

    match action {
        Action::Status => {
            let status = buildkit::status(&docker).await?;
            println!(
                "Network {} : {}",
                buildkit::BUILDKIT_NETWORK,
                present(status.network_exists)
            );
            println!(
                "Volume  {} : {}",
                buildkit::BUILDKIT_VOLUME,
                present(status.volume_exists)
            );
            let daemon = if !status.daemon_exists {
                "missing"
            } else if status.daemon_running {
                "running"
            } else {
                "stopped"
            };
            println!("Daemon  {} : {}", buildkit::BUILDKIT_CONTAINER, daemon);
            if status.daemon_running {
                println!("Networks : {}", status.connected_networks.join(", "));
            }
        }
        Action::Stop => {
            buildkit::stop_daemon(&docker).await?;
            println!("Stopped {}", buildkit::BUILDKIT_CONTAINER);
        }
        Action::Restart => {
            buildkit::restart_daemon(&docker).await?;
            println!("Restarted {}", buildkit::BUILDKIT_CONTAINER);
        }
        Action::Clean => {
            buildkit::clean(&docker).await?;
            println!("Removed BuildKit daemon, network, and cache volume");
        }
    }
    Ok(())
}

fn present(exists: bool) -> &'static str {
    if exists {
        "present"
    } else {
        "missing"
    }
}
