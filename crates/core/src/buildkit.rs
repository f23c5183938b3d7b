//! Shared BuildKit infrastructure
//!
//! One buildkitd daemon serves every workspace on the host: a dedicated
//! bridge network, a cache volume mounted at `/var/lib/buildkit`, and a
//! privileged `moby/buildkit` container listening on TCP 1234. Workspace
//! containers join the network and get a buildx "remote" builder pointed at
//! it, so image builds inside any workspace share one cache.
//!
//! All ensure-operations are idempotent; two `start` invocations racing on
//! creation are resolved by the adapter's existence checks and docker's own
//! name conflicts being tolerated as "already there".

use crate::docker::{Docker, ExecOptions};
use crate::errors::Result;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Bridge network shared by buildkitd and all workspace containers
pub const BUILDKIT_NETWORK: &str = "workspace-internal-buildnet";

/// Named volume holding the shared build cache
pub const BUILDKIT_VOLUME: &str = "workspace-internal-buildkit-cache";

/// The buildkitd container name
pub const BUILDKIT_CONTAINER: &str = "workspace-internal-buildkitd";

/// TCP port buildkitd listens on
pub const BUILDKIT_PORT: u16 = 1234;

/// buildx builder name configured inside each workspace
pub const BUILDER_NAME: &str = "workspace-internal-builder";

/// Image used for the shared daemon
const BUILDKIT_IMAGE: &str = "moby/buildkit:latest";

/// Observed state of the shared infrastructure, for `buildkit --status`.
#[derive(Debug, Clone)]
pub struct BuildKitStatus {
    pub network_exists: bool,
    pub volume_exists: bool,
    pub daemon_exists: bool,
    pub daemon_running: bool,
    /// Networks the daemon is connected to; populated only while running
    pub connected_networks: Vec<String>,
}

/// Ensure the shared network, cache volume, and buildkitd daemon all exist
/// and the daemon is running.
///
/// After a fresh daemon start a two second grace delay gives buildkitd time
/// to open its socket before any builder connects.
#[instrument(skip(docker))]
pub async fn ensure_shared_buildkit(docker: &Docker) -> Result<()> {
    if !docker.network_exists(BUILDKIT_NETWORK).await? {
        info!("Creating BuildKit network {}", BUILDKIT_NETWORK);
        docker.create_network(BUILDKIT_NETWORK).await?;
    }

    if !docker.volume_exists(BUILDKIT_VOLUME).await? {
        info!("Creating BuildKit cache volume {}", BUILDKIT_VOLUME);
        docker.create_volume(BUILDKIT_VOLUME).await?;
    }

    let freshly_started = match docker.inspect_container(BUILDKIT_CONTAINER).await? {
        Some(daemon) if daemon.state.running => {
            debug!("buildkitd already running");
            false
        }
        Some(_) => {
            info!("Starting existing buildkitd container");
            docker.start_container(BUILDKIT_CONTAINER).await?;
            true
        }
        None => {
            info!("Creating buildkitd container");
            let run_args = daemon_run_args();
            docker.create_container(&run_args).await?;
            true
        }
    };

    if freshly_started {
        tokio::time::sleep(Duration::from_secs(2)).await;
    }

    Ok(())
}

fn daemon_run_args() -> Vec<String> {
    vec![
        "--detach".to_string(),
        "--privileged".to_string(),
        "--name".to_string(),
        BUILDKIT_CONTAINER.to_string(),
        "--network".to_string(),
        BUILDKIT_NETWORK.to_string(),
        "-v".to_string(),
        format!("{}:/var/lib/buildkit", BUILDKIT_VOLUME),
        "-p".to_string(),
        format!("127.0.0.1:{port}:{port}", port = BUILDKIT_PORT),
        BUILDKIT_IMAGE.to_string(),
        "--addr".to_string(),
        format!("tcp://0.0.0.0:{}", BUILDKIT_PORT),
    ]
}

/// Configure the buildx builder inside a workspace container, as the
/// `workspace` user: remove any stale builder of the same name, create a
/// remote builder bound to the shared daemon, and bootstrap it.
#[instrument(skip(docker))]
pub async fn configure_buildx_in_container(docker: &Docker, container: &str) -> Result<()> {
    let as_workspace = ExecOptions {
        user: Some("workspace".to_string()),
        ..Default::default()
    };

    // A builder left over from a previous container generation points at a
    // dead endpoint; always recreate.
    let _ = docker
        .exec_cmd(container, &["docker", "buildx", "rm", BUILDER_NAME], &as_workspace)
        .ignore_failure()
        .run_captured()
        .await;

    let endpoint = format!("tcp://{}:{}", BUILDKIT_CONTAINER, BUILDKIT_PORT);
    docker
        .exec_captured(
            container,
            &[
                "docker",
                "buildx",
                "create",
                "--name",
                BUILDER_NAME,
                "--driver",
                "remote",
                endpoint.as_str(),
                "--use",
            ],
            &as_workspace,
        )
        .await?;

    docker
        .exec_captured(
            container,
            &["docker", "buildx", "inspect", "--bootstrap"],
            &as_workspace,
        )
        .await?;

    debug!("buildx builder {} configured in {}", BUILDER_NAME, container);
    Ok(())
}

/// Gather current state for `buildkit --status`.
pub async fn status(docker: &Docker) -> Result<BuildKitStatus> {
    let daemon = docker.inspect_container(BUILDKIT_CONTAINER).await?;
    let daemon_running = daemon.as_ref().map(|d| d.state.running).unwrap_or(false);
    let connected_networks = if daemon_running {
        daemon.as_ref().map(|d| d.network_names()).unwrap_or_default()
    } else {
        Vec::new()
    };
    Ok(BuildKitStatus {
        network_exists: docker.network_exists(BUILDKIT_NETWORK).await?,
        volume_exists: docker.volume_exists(BUILDKIT_VOLUME).await?,
        daemon_running,
        daemon_exists: daemon.is_some(),
        connected_networks,
    })
}

/// Stop the daemon, leaving network and volume in place.
pub async fn stop_daemon(docker: &Docker) -> Result<()> {
    docker.stop_container(BUILDKIT_CONTAINER).await
}

/// Stop and restart the daemon.
pub async fn restart_daemon(docker: &Docker) -> Result<()> {
    docker.stop_container(BUILDKIT_CONTAINER).await?;
    ensure_shared_buildkit(docker).await
}

/// Remove daemon, network, and cache volume. Missing pieces are skipped.
pub async fn clean(docker: &Docker) -> Result<()> {
    docker.remove_container(BUILDKIT_CONTAINER, true).await?;
    docker.remove_network(BUILDKIT_NETWORK).await?;
    docker.remove_volume(BUILDKIT_VOLUME).await?;
    Ok(())
}
