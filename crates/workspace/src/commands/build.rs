//! `workspace build`: build the shared workspace image and stamp the
//! state file.

use crate::commands::shared::{self, CommandContext};
use anyhow::{Context, Result};
use tracing::info;
use workspace_core::docker::Docker;
use workspace_core::workspace::{build_context_dir, IMAGE_TAG};

pub async fn execute(no_cache: bool) -> Result<()> {
    let ctx = CommandContext::establish()?;
    let docker = Docker::new();
    shared::ping_docker(&docker).await?;

    build_shared_image(&ctx, &docker, no_cache).await
}

/// Build `workspace:latest` from the packaged context and record the build
/// time. Shared with `start`'s staleness rebuild path.
pub async fn build_shared_image(
    ctx: &CommandContext,
    docker: &Docker,
    no_cache: bool,
) -> Result<()> {
    let context_dir = build_context_dir()?;
    info!(
        "Building {} from {} (no_cache: {})",
        IMAGE_TAG,
        context_dir.display(),
        no_cache
    );

    docker
        .build_image(IMAGE_TAG, &context_dir.display().to_string(), no_cache, &[])
        .await
        .context("Shared image build failed")?;

    ctx.store.record_shared_image_build(chrono::Utc::now())?;
    println!("Built {}", IMAGE_TAG);
    Ok(())
}
