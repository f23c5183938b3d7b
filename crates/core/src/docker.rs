//! Docker CLI integration
//!
//! Thin, idempotent wrapper over the `docker` executable. Every operation
//! is defined by what holds after it returns, not by what it executed:
//! existence checks inspect-and-ignore-nonzero, removals tolerate missing
//! targets, and network connects tolerate "already exists in network".
//! Nothing here speaks the Docker API; the adapter is CLI-only by design
//! so it works against any docker-compatible binary on PATH.

use crate::errors::{DockerError, Result, WorkspaceError};
use crate::process::{Cmd, ExecOutput};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Options for container exec invocations
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// User to run as (`-u`)
    pub user: Option<String>,
    /// Allocate a TTY and keep stdin open (`-it`)
    pub tty: bool,
    /// Keep stdin open without a TTY (`-i`)
    pub interactive: bool,
    /// Extra environment entries (`-e KEY=VALUE`)
    pub env: Vec<(String, String)>,
}

/// Parsed subset of `docker inspect` for one container
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerInspect {
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "State")]
    pub state: ContainerState,
    #[serde(rename = "Config", default)]
    pub config: ContainerConfig,
    #[serde(rename = "NetworkSettings", default)]
    pub network_settings: NetworkSettings,
}

impl ContainerInspect {
    /// Names of the networks the container is connected to.
    pub fn network_names(&self) -> Vec<String> {
        self.network_settings.networks.keys().cloned().collect()
    }
}

/// Network settings subset
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkSettings {
    #[serde(rename = "Networks", default)]
    pub networks: std::collections::BTreeMap<String, serde_json::Value>,
}

/// Container state subset
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerState {
    #[serde(rename = "Status", default)]
    pub status: String,
    #[serde(rename = "Running", default)]
    pub running: bool,
}

/// Container config subset
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContainerConfig {
    #[serde(rename = "Image", default)]
    pub image: String,
}

/// Docker CLI adapter
#[derive(Debug, Clone)]
pub struct Docker {
    docker_path: String,
}

impl Default for Docker {
    fn default() -> Self {
        Self::new()
    }
}

impl Docker {
    pub fn new() -> Self {
        Self::with_path("docker".to_string())
    }

    pub fn with_path(docker_path: String) -> Self {
        Self { docker_path }
    }

    fn cmd<I, S>(&self, args: I) -> Cmd
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Cmd::new(&self.docker_path).args(args)
    }

    /// Verify the docker binary exists and the daemon responds.
    #[instrument(skip(self))]
    pub async fn ping(&self) -> Result<()> {
        let output = self
            .cmd(["version", "--format", "json"])
            .ignore_failure()
            .run_captured()
            .await
            .map_err(|_| WorkspaceError::from(DockerError::Unavailable))?;
        if !output.success() {
            return Err(DockerError::Unavailable.into());
        }
        Ok(())
    }

    async fn inspect_succeeds(&self, object: &str, name: &str) -> Result<bool> {
        let output = self
            .cmd([object, "inspect", name])
            .ignore_failure()
            .run_captured()
            .await?;
        Ok(output.success())
    }

    pub async fn image_exists(&self, tag: &str) -> Result<bool> {
        self.inspect_succeeds("image", tag).await
    }

    pub async fn container_exists(&self, name: &str) -> Result<bool> {
        self.inspect_succeeds("container", name).await
    }

    pub async fn volume_exists(&self, name: &str) -> Result<bool> {
        self.inspect_succeeds("volume", name).await
    }

    pub async fn network_exists(&self, name: &str) -> Result<bool> {
        self.inspect_succeeds("network", name).await
    }

    /// Build an image, streaming output to the terminal. Fails noisily.
    #[instrument(skip(self, build_args))]
    pub async fn build_image(
        &self,
        tag: &str,
        context_dir: &str,
        no_cache: bool,
        build_args: &[(String, String)],
    ) -> Result<()> {
        let mut args = vec!["build".to_string(), "-t".to_string(), tag.to_string()];
        if no_cache {
            args.push("--no-cache".to_string());
        }
        for (key, value) in build_args {
            args.push("--build-arg".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(context_dir.to_string());

        self.cmd(args).run_streaming(false).await?;
        Ok(())
    }

    /// `docker run` with fully assembled arguments (the caller includes
    /// `--detach`). Failure surfaces verbatim.
    #[instrument(skip(self, run_args))]
    pub async fn create_container(&self, run_args: &[String]) -> Result<String> {
        let mut args = vec!["run".to_string()];
        args.extend(run_args.iter().cloned());
        let output = self.cmd(args).run_captured().await?;
        Ok(output.stdout.trim().to_string())
    }

    /// Start a container; starting an already-running container is not an
    /// error path.
    #[instrument(skip(self))]
    pub async fn start_container(&self, name: &str) -> Result<()> {
        self.cmd(["start", name]).run_captured().await?;
        Ok(())
    }

    /// Stop a container; "already stopped" is not an error path.
    #[instrument(skip(self))]
    pub async fn stop_container(&self, name: &str) -> Result<()> {
        let output = self
            .cmd(["stop", name])
            .ignore_failure()
            .run_captured()
            .await?;
        if !output.success() && !is_missing_object(&output.stderr) {
            return Err(DockerError::Cli(output.stderr.trim().to_string()).into());
        }
        Ok(())
    }

    /// Remove a container; a missing container is not an error.
    #[instrument(skip(self))]
    pub async fn remove_container(&self, name: &str, force: bool) -> Result<()> {
        let mut args = vec!["rm"];
        if force {
            args.push("-f");
        }
        args.push(name);
        let output = self.cmd(args).ignore_failure().run_captured().await?;
        if !output.success() && !is_missing_object(&output.stderr) {
            return Err(DockerError::Cli(output.stderr.trim().to_string()).into());
        }
        Ok(())
    }

    pub async fn create_volume(&self, name: &str) -> Result<()> {
        self.cmd(["volume", "create", name]).run_captured().await?;
        Ok(())
    }

    /// Remove a volume; a missing volume is not an error.
    pub async fn remove_volume(&self, name: &str) -> Result<()> {
        let output = self
            .cmd(["volume", "rm", name])
            .ignore_failure()
            .run_captured()
            .await?;
        if !output.success() && !is_missing_object(&output.stderr) {
            return Err(DockerError::Cli(output.stderr.trim().to_string()).into());
        }
        Ok(())
    }

    pub async fn create_network(&self, name: &str) -> Result<()> {
        self.cmd(["network", "create", name]).run_captured().await?;
        Ok(())
    }

    /// Remove a network; a missing network is not an error.
    pub async fn remove_network(&self, name: &str) -> Result<()> {
        let output = self
            .cmd(["network", "rm", name])
            .ignore_failure()
            .run_captured()
            .await?;
        if !output.success() && !is_missing_object(&output.stderr) {
            return Err(DockerError::Cli(output.stderr.trim().to_string()).into());
        }
        Ok(())
    }

    /// Connect a container to a network, tolerating a prior connection.
    #[instrument(skip(self))]
    pub async fn connect_network(&self, container: &str, network: &str) -> Result<()> {
        let output = self
            .cmd(["network", "connect", network, container])
            .ignore_failure()
            .run_captured()
            .await?;
        if !output.success() && !is_already_connected(&output.stderr) {
            return Err(DockerError::Cli(output.stderr.trim().to_string()).into());
        }
        Ok(())
    }

    /// Inspect a container; `None` when it does not exist.
    #[instrument(skip(self))]
    pub async fn inspect_container(&self, name: &str) -> Result<Option<ContainerInspect>> {
        let output = self
            .cmd(["container", "inspect", name])
            .ignore_failure()
            .run_captured()
            .await?;
        if !output.success() {
            return Ok(None);
        }
        parse_inspect(&output.stdout).map_err(|e| {
            DockerError::Cli(format!("Failed to parse inspect output: {}", e)).into()
        })
    }

    /// Whether the container exists and its state is `running`.
    pub async fn container_running(&self, name: &str) -> Result<bool> {
        Ok(self
            .inspect_container(name)
            .await?
            .map(|info| info.state.running)
            .unwrap_or(false))
    }

    /// Execute a command inside a container, capturing output.
    #[instrument(skip(self, argv, options))]
    pub async fn exec_captured(
        &self,
        container: &str,
        argv: &[&str],
        options: &ExecOptions,
    ) -> Result<ExecOutput> {
        self.exec_cmd(container, argv, options).run_captured().await
    }

    /// Execute an interactive command inside a container, inheriting stdio.
    pub async fn exec_streaming(
        &self,
        container: &str,
        argv: &[&str],
        options: &ExecOptions,
    ) -> Result<ExecOutput> {
        self.exec_cmd(container, argv, options).run_streaming(false).await
    }

    /// Build the `docker exec` invocation without running it, for call
    /// sites that stream to a log file.
    pub fn exec_cmd(&self, container: &str, argv: &[&str], options: &ExecOptions) -> Cmd {
        let mut args = vec!["exec".to_string()];
        if options.tty {
            args.push("-it".to_string());
        } else if options.interactive {
            args.push("-i".to_string());
        }
        if let Some(user) = &options.user {
            args.push("-u".to_string());
            args.push(user.clone());
        }
        for (key, value) in &options.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(container.to_string());
        args.extend(argv.iter().map(|s| s.to_string()));
        self.cmd(args)
    }

    /// Stream container logs (`docker logs --tail N [-f]`).
    pub async fn logs(&self, container: &str, tail: u32, follow: bool) -> Result<()> {
        let mut args = vec!["logs".to_string(), "--tail".to_string(), tail.to_string()];
        if follow {
            args.push("--follow".to_string());
        }
        args.push(container.to_string());
        self.cmd(args).run_streaming(false).await?;
        Ok(())
    }

    /// Wait until `docker exec <container> true` succeeds.
    #[instrument(skip(self))]
    pub async fn wait_for_exec_ready(&self, container: &str, timeout: Duration) -> Result<()> {
        self.wait_until(container, &["true"], timeout, "container exec readiness")
            .await
    }

    /// Wait until the in-container Docker daemon answers `docker info`.
    #[instrument(skip(self))]
    pub async fn wait_for_dockerd(&self, container: &str, timeout: Duration) -> Result<()> {
        self.wait_until(container, &["docker", "info"], timeout, "in-container dockerd")
            .await
    }

    async fn wait_until(
        &self,
        container: &str,
        argv: &[&str],
        timeout: Duration,
        what: &str,
    ) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let output = self
                .exec_cmd(container, argv, &ExecOptions::default())
                .ignore_failure()
                .run_captured()
                .await;
            if matches!(&output, Ok(out) if out.success()) {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                warn!("{} did not become ready within {:?}", what, timeout);
                return Err(DockerError::ReadinessTimeout {
                    what: what.to_string(),
                    seconds: timeout.as_secs(),
                }
                .into());
            }
            debug!("{} not ready yet, retrying", what);
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }
}

fn is_missing_object(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("no such container")
        || lower.contains("no such volume")
        || lower.contains("no such network")
        || lower.contains("not found")
}

fn is_already_connected(stderr: &str) -> bool {
    stderr.contains("already exists in network")
}

fn parse_inspect(stdout: &str) -> serde_json::Result<Option<ContainerInspect>> {
    let mut parsed: Vec<ContainerInspect> = serde_json::from_str(stdout)?;
    if parsed.is_empty() {
        return Ok(None);
    }
    let mut info = parsed.remove(0);
    info.name = info.name.trim_start_matches('/').to_string();
    Ok(Some(info))
}
