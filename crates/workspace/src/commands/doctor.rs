//! `workspace doctor`: check the host for required tooling.

use crate::commands::shared::CommandContext;
use anyhow::Result;
use console::style;
use workspace_core::docker::Docker;
use workspace_core::process::Cmd;

struct Check {
    label: &'static str,
    ok: bool,
    detail: String,
}

pub async fn execute() -> Result<()> {
    let mut checks = Vec::new();

    for binary in ["docker", "ssh", "ssh-keygen", "git", "ss"] {
        checks.push(binary_check(binary).await);
    }

    let docker = Docker::new();
    checks.push(match docker.ping().await {
        Ok(()) => Check {
            label: "docker daemon",
            ok: true,
            detail: "reachable".to_string(),
        },
        Err(e) => Check {
            label: "docker daemon",
            ok: false,
            detail: e.to_string(),
        },
    });

    checks.push(match CommandContext::establish() {
        Ok(ctx) => Check {
            label: "user config",
            ok: true,
            detail: ctx.layout.root.display().to_string(),
        },
        Err(e) => Check {
            label: "user config",
            ok: false,
            detail: e.to_string(),
        },
    });

    let mut failures = 0;
    for check in &checks {
        let mark = if check.ok {
            style("ok").green()
        } else {
            failures += 1;
            style("FAIL").red()
        };
        println!("{:<16} {:<6} {}", check.label, mark, check.detail);
    }

    if failures > 0 {
        anyhow::bail!("{} check(s) failed", failures);
    }
    Ok(())
}

async fn binary_check(binary: &'static str) -> Check {
    let found = Cmd::new("sh")
        .arg("-c")
        .arg(format!("command -v {}", binary))
        .ignore_failure()
        .run_captured()
        .await;

    match found {
        Ok(out) if out.success() => Check {
            label: binary,
            ok: true,
            detail: out.stdout.trim().to_string(),
        },
        _ => Check {
            label: binary,
            ok: false,
            detail: "not found on PATH".to_string(),
        },
    }
}
