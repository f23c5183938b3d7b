//! `workspace status` and `workspace info`: report container state,
//! ports, forwards, and repository for one workspace.

use crate::commands::shared::{self, CommandContext};
use anyhow::Result;
use workspace_core::docker::Docker;
use workspace_core::runtime::RuntimeFile;
use workspace_core::workspace::WorkspaceIdentity;

pub async fn execute(name: &str, connection_details: bool) -> Result<()> {
    let ctx = CommandContext::establish()?;
    let identity = WorkspaceIdentity::new(name);
    let docker = Docker::new();

    let inspect = docker.inspect_container(&identity.container_name).await?;
    let record = ctx.store.get_workspace(name)?;

    println!("Workspace : {}", name);
    match &inspect {
        Some(info) => {
            println!("Container : {} ({})", identity.container_name, info.state.status);
            println!("Image     : {}", info.config.image);
        }
        None => {
            println!("Container : {} (absent)", identity.container_name);
        }
    }

    if let Some(record) = &record {
        println!("SSH port  : {}", record.ssh_port);
        for port in &record.forwards {
            println!("Forward   : {} -> {}", port, port);
        }
        if let Some(key) = &record.selected_key {
            println!("SSH key   : {}", key);
        }
    }

    if let Some(repo) = load_repo_line(&ctx, name) {
        println!("Repo      : {}", repo);
    }

    if connection_details {
        let record = shared::require_record(&ctx, name)?;
        let key_path = ctx.layout.workspace_state(name).key_path;
        println!();
        println!(
            "SSH       : ssh -i {} -p {} workspace@localhost",
            key_path.display(),
            record.ssh_port
        );
        if record.forwards.is_empty() {
            println!("Proxy     : no forwards configured");
        } else {
            println!("Proxy     : workspace proxy {}", name);
        }
    }

    Ok(())
}

/// `remote (branch)` from the runtime snapshot, when one was written.
fn load_repo_line(ctx: &CommandContext, name: &str) -> Option<String> {
    let runtime_path = ctx.layout.workspace_state(name).runtime_config_path;
    let runtime = RuntimeFile::read(&runtime_path).ok()?;
    let remote = runtime.workspace.repo.remote?;
    Some(format!("{} ({})", remote, runtime.workspace.repo.branch))
}
