//! Cross-module invariants of the state store and config resolver.

use std::collections::HashSet;
use std::path::PathBuf;
use workspace_core::config::{self, RawConfig, ResolveOptions};
use workspace_core::state::{StateStore, SSH_PORT_FLOOR};
use workspace_core::workspace::HostLayout;

fn store(home: &tempfile::TempDir) -> StateStore {
    StateStore::new(HostLayout::from_home(home.path().to_path_buf()))
}

#[tokio::test]
async fn ports_stay_unique_over_start_destroy_sequences() {
    let home = tempfile::tempdir().unwrap();
    let store = store(&home);

    // Three workspaces come up.
    for name in ["a", "b", "c"] {
        store
            .ensure_workspace_state(name, "/tmp", &[])
            .await
            .unwrap();
    }

    // One goes away; two more appear; the original comes back.
    store.remove_workspace_state("b").unwrap();
    for name in ["d", "e", "b"] {
        store
            .ensure_workspace_state(name, "/tmp", &[])
            .await
            .unwrap();
    }

    let state = store.load().unwrap();
    let ports: Vec<u16> = state.workspaces.values().map(|r| r.ssh_port).collect();
    let unique: HashSet<u16> = ports.iter().copied().collect();
    assert_eq!(ports.len(), 5);
    assert_eq!(unique.len(), 5, "ports must stay unique: {:?}", ports);
    assert!(ports.iter().all(|p| *p >= SSH_PORT_FLOOR));
}

#[tokio::test]
async fn forwards_follow_config_changes_across_starts() {
    let home = tempfile::tempdir().unwrap();
    let store = store(&home);

    store
        .ensure_workspace_state("api", "/p", &[3000, 3001])
        .await
        .unwrap();
    let record = store
        .ensure_workspace_state("api", "/p", &[8080])
        .await
        .unwrap();

    assert_eq!(record.forwards, vec![8080]);
    assert_eq!(
        store.get_workspace("api").unwrap().unwrap().forwards,
        vec![8080]
    );
}

#[test]
fn resolve_config_is_stable_under_reserialization() {
    let home = tempfile::tempdir().unwrap();
    let layout = HostLayout::from_home(home.path().to_path_buf());
    let config_dir = home.path().join("proj");
    std::fs::create_dir_all(&config_dir).unwrap();

    let yaml = r#"
    repo:
      remote: git@github.com:acme/api.git
      branch: develop
    forwards: [3000, "5000-5003", 8080, "9000-9001", "7000-7000"]
    mounts:
      - "/tmp/ro:/workspace/test-ro:ro"
      - "C:/data:/workspace/data"
    bootstrap:
      scripts: [scripts]
    "#;
    let raw: RawConfig = serde_yaml::from_str(yaml).unwrap();
    let round_tripped: RawConfig =
        serde_yaml::from_str(&serde_yaml::to_string(&raw).unwrap()).unwrap();

    let options = ResolveOptions {
        workspace_name_override: None,
        build_context: Some(PathBuf::from("/opt/image")),
    };
    let user = RawConfig::default();
    let a = config::resolve_config(&raw, &user, &config_dir, &layout, &options).unwrap();
    let b = config::resolve_config(&round_tripped, &user, &config_dir, &layout, &options).unwrap();

    assert_eq!(
        a.forwards,
        vec![3000, 5000, 5001, 5002, 5003, 8080, 9000, 9001, 7000]
    );
    assert_eq!(a.forwards, b.forwards);
    assert_eq!(a.mounts, b.mounts);
    assert_eq!(a.repo, b.repo);
    assert_eq!(a.mounts[1].source, "C:/data");
}
