//! `workspace start`: the workspace lifecycle engine.
//!
//! Two paths share the tail of the state machine:
//!
//! - an existing container (no recreate flags) is started and re-initialized
//! - otherwise the full provisioning sequence runs: config resolution,
//!   state claim under the lock, key selection, runtime snapshot, host key
//!   generation, image freshness, `docker run`, readiness waits, buildx
//!   configuration, and the in-container init
//!
//! Partial failures leave the container and state in place on purpose;
//! `workspace destroy` is the recovery path.

use crate::commands::build::build_shared_image;
use crate::commands::shared::{self, CommandContext};
use crate::ui::spinner::PlainSpinner;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use workspace_core::buildkit;
use workspace_core::config::ResolvedConfig;
use workspace_core::docker::{Docker, ExecOptions};
use workspace_core::errors::SshKeyError;
use workspace_core::fsutil;
use workspace_core::ports::collapse_ranges;
use workspace_core::process::Cmd;
use workspace_core::runtime::{
    RuntimeBootstrap, RuntimeFile, RuntimeRepo, RuntimeSsh, RuntimeWorkspace,
};
use workspace_core::sshkey;
use workspace_core::state::WorkspaceRecord;
use workspace_core::workspace::WorkspaceIdentity;

/// Shared image staleness threshold
const IMAGE_MAX_AGE_DAYS: i64 = 7;

/// `docker exec true` readiness deadline
const EXEC_READY_TIMEOUT: Duration = Duration::from_secs(15);

/// In-container dockerd readiness deadline
const DOCKERD_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Path of the agent binary inside the container
const AGENT_BIN: &str = "/usr/local/bin/workspace-internal";

#[derive(Debug, Clone)]
pub struct StartArgs {
    pub workspace: String,
    pub rebuild: bool,
    pub no_cache: bool,
    pub force_recreate: bool,
    pub no_init: bool,
    pub path: Option<PathBuf>,
}

#[instrument(skip(args), fields(workspace = %args.workspace))]
pub async fn execute(args: StartArgs) -> Result<()> {
    let ctx = CommandContext::establish()?;
    let identity = WorkspaceIdentity::new(&args.workspace);
    let docker = Docker::new();
    shared::ping_docker(&docker).await?;

    let exists = docker.container_exists(&identity.container_name).await?;
    let recreate = args.force_recreate || args.rebuild || args.no_cache;

    if exists && !recreate {
        return start_existing(&ctx, &docker, &identity, &args).await;
    }
    provision(&ctx, &docker, &identity, &args).await
}

/// Restart path: the container already exists and no recreate flag was
/// given.
async fn start_existing(
    ctx: &CommandContext,
    docker: &Docker,
    identity: &WorkspaceIdentity,
    args: &StartArgs,
) -> Result<()> {
    let container = &identity.container_name;
    let inspect = docker
        .inspect_container(container)
        .await?
        .context("container disappeared between checks")?;

    if inspect.state.running {
        println!("Workspace '{}' is already running", identity.name);
        return Ok(());
    }

    let spinner = PlainSpinner::start(&format!("Starting {}", container));
    docker.start_container(container).await?;
    docker
        .wait_for_exec_ready(container, EXEC_READY_TIMEOUT)
        .await?;
    docker
        .wait_for_dockerd(container, DOCKERD_READY_TIMEOUT)
        .await?;

    spinner.update("Configuring BuildKit");
    buildkit::ensure_shared_buildkit(docker).await?;
    docker
        .connect_network(container, buildkit::BUILDKIT_NETWORK)
        .await?;
    buildkit::configure_buildx_in_container(docker, container).await?;

    if !args.no_init {
        spinner.update("Running workspace init");
        run_agent_init(ctx, docker, identity).await?;
    }
    verify_source_checkout(ctx, docker, identity).await?;
    spinner.finish_with_message(&format!("Workspace '{}' started", identity.name));

    print_summary(ctx, &identity.name)?;
    Ok(())
}

/// Full provisioning path for new containers and `--force-recreate`.
async fn provision(
    ctx: &CommandContext,
    docker: &Docker,
    identity: &WorkspaceIdentity,
    args: &StartArgs,
) -> Result<()> {
    let resolved = shared::resolve_workspace(ctx, &identity.name, args.path.as_deref()).await?;
    let container = &identity.container_name;

    // State claim: allocate the SSH port under the lock.
    let record = ctx
        .store
        .ensure_workspace_state(
            &identity.name,
            &resolved.config_dir.display().to_string(),
            &resolved.forwards,
        )
        .await?;
    info!(
        "Workspace '{}' holds SSH port {}",
        identity.name, record.ssh_port
    );

    // Key selection, persisted by basename.
    let repo_url = resolved.repo.remote.clone().unwrap_or_default();
    let invoke_dir = std::env::current_dir().unwrap_or_else(|_| ctx.layout.home.clone());
    let selected_key =
        sshkey::select_key(&repo_url, &resolved.ssh, &ctx.layout.home, &invoke_dir).await;
    let selected_basename = selected_key.as_ref().and_then(|p| {
        p.file_name().map(|n| n.to_string_lossy().into_owned())
    });
    match &selected_key {
        Some(path) => info!("Selected SSH key {}", path.display()),
        None => debug!("No SSH key selected"),
    }
    ctx.store
        .set_selected_key(&identity.name, selected_basename.clone())?;

    write_runtime_file(&resolved, &record, selected_basename.clone())?;
    ensure_host_key(&resolved, &identity.name).await?;

    ensure_shared_image(ctx, docker, args).await?;

    if args.force_recreate && docker.container_exists(container).await? {
        info!("Removing existing container {}", container);
        docker.remove_container(container, true).await?;
    }

    let spinner = PlainSpinner::start(&format!("Creating {}", container));
    buildkit::ensure_shared_buildkit(docker).await?;

    let ssh_public_key = read_public_key(&resolved.state.key_path)?;
    let (host_uid, host_gid) = invoking_ids().await?;
    let ssh_auth_sock = std::env::var("SSH_AUTH_SOCK").ok().filter(|s| !s.is_empty());

    let run_args = assemble_run_args(
        identity,
        &resolved,
        &record,
        &ssh_public_key,
        &host_uid,
        &host_gid,
        selected_basename.as_deref(),
        ssh_auth_sock.as_deref(),
        &ctx.layout.home,
        &ctx.layout.root,
    );
    debug!("docker run args: {:?}", run_args);
    docker.create_container(&run_args).await?;

    docker
        .connect_network(container, buildkit::BUILDKIT_NETWORK)
        .await?;

    spinner.update("Waiting for container readiness");
    docker
        .wait_for_exec_ready(container, EXEC_READY_TIMEOUT)
        .await?;
    docker
        .wait_for_dockerd(container, DOCKERD_READY_TIMEOUT)
        .await?;

    spinner.update("Configuring BuildKit");
    buildkit::configure_buildx_in_container(docker, container).await?;

    if !args.no_init {
        spinner.update("Running workspace init");
        run_agent_init(ctx, docker, identity).await?;
    }
    verify_source_checkout(ctx, docker, identity).await?;
    spinner.finish_with_message(&format!("Workspace '{}' ready", identity.name));

    print_summary(ctx, &identity.name)?;
    Ok(())
}

/// Write the runtime snapshot consumed by the in-container agent.
fn write_runtime_file(
    resolved: &ResolvedConfig,
    record: &WorkspaceRecord,
    selected_key: Option<String>,
) -> Result<()> {
    let runtime = RuntimeFile {
        workspace: RuntimeWorkspace {
            name: resolved.identity.name.clone(),
            repo: RuntimeRepo {
                remote: resolved.repo.remote.clone(),
                branch: resolved.repo.branch.clone(),
                clone_args: resolved.repo.clone_args.clone(),
            },
        },
        ssh: RuntimeSsh {
            port: record.ssh_port,
            selected_key,
        },
        forwards: resolved.forwards.clone(),
        bootstrap: RuntimeBootstrap {
            scripts: resolved.bootstrap_scripts.clone(),
        },
    };
    runtime.write(&resolved.state.runtime_config_path)?;
    Ok(())
}

/// Generate the per-workspace ED25519 host key pair if absent.
async fn ensure_host_key(resolved: &ResolvedConfig, name: &str) -> Result<()> {
    let key_path = &resolved.state.key_path;
    if key_path.is_file() {
        return Ok(());
    }
    fsutil::ensure_dir(&resolved.state.ssh_dir)?;

    let result = Cmd::new("ssh-keygen")
        .args(["-t", "ed25519", "-N", ""])
        .arg("-f")
        .arg(key_path.display().to_string())
        .arg("-C")
        .arg(format!("workspace-{}", name))
        .arg("-q")
        .run_captured()
        .await;

    if let Err(e) = result {
        return Err(SshKeyError::Keygen {
            path: key_path.display().to_string(),
            message: e.to_string(),
        }
        .into());
    }
    info!("Generated SSH key pair at {}", key_path.display());
    Ok(())
}

fn read_public_key(key_path: &Path) -> Result<String> {
    let pub_path = key_path.with_extension("pub");
    let content = std::fs::read_to_string(&pub_path)
        .with_context(|| format!("Cannot read {}", pub_path.display()))?;
    Ok(content.trim().to_string())
}

/// UID and GID of the invoking host user.
async fn invoking_ids() -> Result<(String, String)> {
    let uid = Cmd::new("id").arg("-u").run_captured().await?;
    let gid = Cmd::new("id").arg("-g").run_captured().await?;
    Ok((
        uid.stdout.trim().to_string(),
        gid.stdout.trim().to_string(),
    ))
}

/// Rebuild the shared image when missing, explicitly requested, or older
/// than seven days.
async fn ensure_shared_image(
    ctx: &CommandContext,
    docker: &Docker,
    args: &StartArgs,
) -> Result<()> {
    let image_present = docker
        .image_exists(workspace_core::workspace::IMAGE_TAG)
        .await?;
    let last_build = ctx.store.get_last_shared_image_build()?;
    let stale = match last_build {
        Some(at) => chrono::Utc::now() - at > chrono::Duration::days(IMAGE_MAX_AGE_DAYS),
        None => true,
    };

    if args.rebuild || !image_present || stale {
        if image_present && stale && !args.rebuild {
            info!("Shared image is older than {} days, rebuilding", IMAGE_MAX_AGE_DAYS);
        }
        build_shared_image(ctx, docker, args.no_cache).await?;
    }
    Ok(())
}

/// Assemble the complete `docker run` argument list (includes `--detach`,
/// image tag last).
#[allow(clippy::too_many_arguments)]
fn assemble_run_args(
    identity: &WorkspaceIdentity,
    resolved: &ResolvedConfig,
    record: &WorkspaceRecord,
    ssh_public_key: &str,
    host_uid: &str,
    host_gid: &str,
    selected_key: Option<&str>,
    ssh_auth_sock: Option<&str>,
    host_home: &Path,
    workspaces_root: &Path,
) -> Vec<String> {
    let container = &identity.container_name;
    let mut args: Vec<String> = vec![
        "--detach".into(),
        "--privileged".into(),
        "--name".into(),
        container.clone(),
        "--hostname".into(),
        container.clone(),
        "-p".into(),
        format!("{}:22", record.ssh_port),
    ];

    // The `-e KEY=` form requires non-empty values; empty ones are dropped
    // here rather than in the container.
    let mut env = |key: &str, value: &str| {
        if !value.is_empty() {
            args.push("-e".into());
            args.push(format!("{}={}", key, value));
        }
    };
    env("USER", "workspace");
    env("WORKSPACE_NAME", &identity.name);
    env("SSH_PUBLIC_KEY", ssh_public_key);
    env("HOST_UID", host_uid);
    env("HOST_GID", host_gid);
    env("WORKSPACE_RUNTIME_CONFIG", "/workspace/config/runtime.json");
    env("WORKSPACE_SOURCE_DIR", "/workspace/source");
    env("HOST_HOME", "/host/home");
    env("WORKSPACE_ASSIGNED_SSH_PORT", &record.ssh_port.to_string());
    env(
        "WORKSPACE_REPO_URL",
        resolved.repo.remote.as_deref().unwrap_or(""),
    );
    env("WORKSPACE_REPO_BRANCH", &resolved.repo.branch);
    env("WORKSPACE_SELECTED_SSH_KEY", selected_key.unwrap_or(""));
    env("DOCKER_BUILDKIT", "1");
    env("COMPOSE_DOCKER_CLI_BUILD", "1");
    if ssh_auth_sock.is_some() {
        env("SSH_AUTH_SOCK", "/ssh-agent");
    }

    let mut bind = |source: String, target: &str| {
        args.push("-v".into());
        args.push(format!("{}:{}", source, target));
    };
    bind(
        resolved.state.runtime_config_path.display().to_string(),
        "/workspace/config/runtime.json:ro",
    );
    bind(
        resolved.config_dir.display().to_string(),
        "/workspace/source:ro",
    );
    if workspaces_root.exists() {
        bind(
            workspaces_root.display().to_string(),
            "/workspace/userconfig:ro",
        );
    }
    bind(host_home.display().to_string(), "/host/home:ro");
    if let Some(sock) = ssh_auth_sock {
        bind(sock.to_string(), "/ssh-agent");
    }
    for mount in &resolved.mounts {
        args.push("-v".into());
        args.push(mount.to_volume_arg());
    }

    let [home_vol, docker_vol, cache_vol] = identity.volume_names();
    args.push("-v".into());
    args.push(format!("{}:/home/workspace", home_vol));
    args.push("-v".into());
    args.push(format!("{}:/var/lib/docker", docker_vol));
    args.push("-v".into());
    args.push(format!("{}:/home/workspace/.cache", cache_vol));

    args.push(identity.image_tag.clone());
    args
}

/// Run the in-container agent init as the `workspace` user, teeing output
/// to a per-run host log file.
async fn run_agent_init(
    ctx: &CommandContext,
    docker: &Docker,
    identity: &WorkspaceIdentity,
) -> Result<()> {
    let log_path = ctx
        .layout
        .init_log_path(&identity.name, chrono::Utc::now());
    info!("Init log: {}", log_path.display());

    let options = ExecOptions {
        user: Some("workspace".to_string()),
        ..Default::default()
    };
    docker
        .exec_cmd(&identity.container_name, &[AGENT_BIN, "init"], &options)
        .run_logged(&log_path, None)
        .await
        .with_context(|| {
            format!(
                "Workspace init failed; full log at {}",
                log_path.display()
            )
        })?;
    Ok(())
}

/// Warn when a remote is configured but the mounted project is not a git
/// checkout. The mount is read-only, so this is host-side advice rather
/// than an error.
async fn verify_source_checkout(
    ctx: &CommandContext,
    docker: &Docker,
    identity: &WorkspaceIdentity,
) -> Result<()> {
    let runtime_path = ctx
        .layout
        .workspace_state(&identity.name)
        .runtime_config_path;
    let Ok(runtime) = RuntimeFile::read(&runtime_path) else {
        return Ok(());
    };
    if runtime.workspace.repo.remote.is_none() {
        return Ok(());
    }

    let check = docker
        .exec_cmd(
            &identity.container_name,
            &["test", "-d", "/workspace/source/.git"],
            &ExecOptions::default(),
        )
        .ignore_failure()
        .run_captured()
        .await;
    if !matches!(&check, Ok(out) if out.success()) {
        warn!(
            "A repo remote is configured but /workspace/source is not a git checkout"
        );
    }
    Ok(())
}

fn print_summary(ctx: &CommandContext, name: &str) -> Result<()> {
    if let Some(record) = ctx.store.get_workspace(name)? {
        println!("SSH port : {}", record.ssh_port);
        if !record.forwards.is_empty() {
            println!("Forwards : {}", collapse_ranges(&record.forwards));
        }
        println!("Shell    : workspace shell {}", name);
    }
    Ok(())
}
