//! `workspace init`: drop a starter `.workspace.yml` into the current
//! directory.

use anyhow::{bail, Context, Result};
use tracing::info;
use workspace_core::config::CONFIG_FILE_NAME;

fn template(name: &str) -> String {
    format!(
        "\
# Workspace configuration for {name}.
#
# repo:
#   remote: git@github.com:acme/{name}.git
#   branch: main
#   cloneArgs: [\"--depth\", \"1\"]
#
# forwards:
#   - 3000
#   - \"5000-5003\"
#
# mounts:
#   - ./data:/workspace/data:ro
#
# bootstrap:
#   scripts:
#     - scripts/bootstrap.sh
#
# mountAgentsCredentials: false
forwards: []
"
    )
}

pub async fn execute(name: Option<String>, force: bool) -> Result<()> {
    let cwd = std::env::current_dir().context("Cannot determine the current directory")?;
    let path = cwd.join(CONFIG_FILE_NAME);

    if path.exists() && !force {
        bail!(
            "{} already exists (use -f to overwrite)",
            path.display()
        );
    }

    let name = match name {
        Some(name) => name,
        None => cwd
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "workspace".to_string()),
    };

    std::fs::write(&path, template(&name))
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Wrote {}", path.display());
    println!("Created {}", path.display());
    println!("Edit it, then run: workspace start {}", name);
    Ok(())
}
