//! `workspace proxy`: SSH tunnels for every configured forward.
//!
//! Blocks in `ssh -N` until interrupted; the summary line collapses
//! consecutive ports into ranges.

use crate::commands::shared::{self, CommandContext};
use anyhow::{bail, Result};
use workspace_core::ports::collapse_ranges;
use workspace_core::process::Cmd;

pub async fn execute(name: &str) -> Result<()> {
    let ctx = CommandContext::establish()?;
    let record = shared::require_record(&ctx, name)?;

    if record.forwards.is_empty() {
        bail!(
            "Workspace '{}' has no forwards configured; add some to .workspace.yml",
            name
        );
    }

    let key_path = ctx.layout.workspace_state(name).key_path;
    if !key_path.is_file() {
        bail!(
            "SSH key {} is missing; run `workspace start {}` to regenerate it",
            key_path.display(),
            name
        );
    }

    println!(
        "Forwarding {} -> localhost (SSH port {})",
        collapse_ranges(&record.forwards),
        record.ssh_port
    );

    let mut cmd = Cmd::new("ssh")
        .arg("-i")
        .arg(key_path.display().to_string())
        .args(["-o", "StrictHostKeyChecking=no"])
        .args(["-o", "UserKnownHostsFile=/dev/null"])
        .arg("-N")
        .arg("-p")
        .arg(record.ssh_port.to_string());
    for port in &record.forwards {
        cmd = cmd
            .arg("-L")
            .arg(format!("127.0.0.1:{port}:localhost:{port}"));
    }
    cmd = cmd.arg("workspace@localhost");

    cmd.run_streaming(false).await?;
    Ok(())
}
