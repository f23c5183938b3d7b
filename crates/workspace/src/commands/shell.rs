//! `workspace shell`: interactive shell or one-shot command inside a
//! running workspace container.

use anyhow::{bail, Result};
use tracing::debug;
use workspace_core::docker::{Docker, ExecOptions};
use workspace_core::workspace::WorkspaceIdentity;

pub async fn execute(name: &str, command: Option<&str>, user: Option<&str>) -> Result<()> {
    let identity = WorkspaceIdentity::new(name);
    let docker = Docker::new();

    if !docker.container_running(&identity.container_name).await? {
        bail!(
            "Workspace '{}' is not running. Start it with: workspace start {}",
            name,
            name
        );
    }

    let user = user.unwrap_or("workspace");
    let shell = login_shell(&docker, &identity.container_name, user).await;
    debug!("Using shell {} for user {}", shell, user);

    let mut env = Vec::new();
    if let Ok(term) = std::env::var("TERM") {
        if !term.is_empty() {
            env.push(("TERM".to_string(), term));
        }
    }

    let options = ExecOptions {
        user: Some(user.to_string()),
        tty: command.is_none(),
        interactive: command.is_some(),
        env,
    };

    let argv: Vec<&str> = match command {
        Some(cmd) => vec![shell.as_str(), "-c", cmd],
        None => vec![shell.as_str()],
    };

    docker
        .exec_streaming(&identity.container_name, &argv, &options)
        .await?;
    Ok(())
}

/// Detect the user's login shell via `getent passwd`; fall back to bash.
async fn login_shell(docker: &Docker, container: &str, user: &str) -> String {
    let result = docker
        .exec_cmd(container, &["getent", "passwd", user], &ExecOptions::default())
        .ignore_failure()
        .run_captured()
        .await;

    if let Ok(output) = result {
        if output.success() {
            // user:x:uid:gid:gecos:home:shell
            if let Some(shell) = output.stdout.trim().rsplit(':').next() {
                if shell.starts_with('/') {
                    return shell.to_string();
                }
            }
        }
    }
    "/bin/bash".to_string()
}
