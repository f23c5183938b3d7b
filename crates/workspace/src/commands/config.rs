//! `workspace config`: print the resolved configuration for debugging.

use crate::commands::shared::{self, CommandContext};
use anyhow::Result;
use workspace_core::ports::collapse_ranges;

pub async fn execute(name: &str) -> Result<()> {
    let ctx = CommandContext::establish()?;
    let resolved = shared::resolve_workspace(&ctx, name, None).await?;

    println!("Workspace   : {}", resolved.identity.name);
    println!("Container   : {}", resolved.identity.container_name);
    println!("Config dir  : {}", resolved.config_dir.display());

    match &resolved.repo.remote {
        Some(remote) => {
            println!("Repo        : {} ({})", remote, resolved.repo.branch);
            if !resolved.repo.clone_args.is_empty() {
                println!("Clone args  : {}", resolved.repo.clone_args.join(" "));
            }
        }
        None => println!("Repo        : (none)"),
    }

    if resolved.forwards.is_empty() {
        println!("Forwards    : (none)");
    } else {
        println!("Forwards    : {}", collapse_ranges(&resolved.forwards));
    }

    if resolved.mounts.is_empty() {
        println!("Mounts      : (none)");
    } else {
        println!("Mounts      :");
        for mount in &resolved.mounts {
            println!("  {}", mount.to_volume_arg());
        }
    }

    if resolved.bootstrap_scripts.is_empty() {
        println!("Bootstrap   : (none)");
    } else {
        println!("Bootstrap   :");
        for script in &resolved.bootstrap_scripts {
            println!("  {} ({:?})", script.path, script.source);
        }
    }

    println!("State dir   : {}", resolved.state.root.display());
    Ok(())
}
