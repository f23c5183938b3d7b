//! Persistent workspace state
//!
//! One JSON file at `~/.workspaces/state/state.json` records every known
//! workspace (SSH port, forwards, config directory, selected key) plus the
//! shared image's last build time. All mutation happens under an exclusive
//! advisory lock on a sibling lock file; concurrent controller processes
//! serialize here, which is what makes SSH port allocation race-free.
//!
//! Records that fail validation on load (wrong field types, missing port)
//! are dropped rather than propagating corruption into every command.

use crate::errors::{Result, StateError};
use crate::fsutil;
use crate::process::Cmd;
use crate::retry::RetryConfig;
use crate::workspace::HostLayout;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs::OpenOptions;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Lowest SSH port ever allocated to a workspace
pub const SSH_PORT_FLOOR: u16 = 2300;

/// State record for one workspace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceRecord {
    #[serde(rename = "sshPort")]
    pub ssh_port: u16,
    #[serde(default)]
    pub forwards: Vec<u16>,
    #[serde(rename = "configDir")]
    pub config_dir: String,
    #[serde(rename = "selectedKey", default)]
    pub selected_key: Option<String>,
}

/// Shared image metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SharedImageState {
    #[serde(rename = "lastBuildAt", default, skip_serializing_if = "Option::is_none")]
    pub last_build_at: Option<DateTime<Utc>>,
}

/// In-memory form of `state.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateFile {
    #[serde(default)]
    pub workspaces: BTreeMap<String, WorkspaceRecord>,
    #[serde(rename = "sharedImage", default)]
    pub shared_image: SharedImageState,
}

impl StateFile {
    /// Build from a parsed JSON value, dropping malformed workspace records.
    fn from_value(value: serde_json::Value) -> Self {
        let mut state = StateFile::default();

        if let Some(shared) = value.get("sharedImage") {
            if let Ok(shared) = serde_json::from_value(shared.clone()) {
                state.shared_image = shared;
            }
        }

        if let Some(map) = value.get("workspaces").and_then(|w| w.as_object()) {
            for (name, record) in map {
                match serde_json::from_value::<WorkspaceRecord>(record.clone()) {
                    Ok(record) => {
                        state.workspaces.insert(name.clone(), record);
                    }
                    Err(e) => {
                        warn!("Dropping malformed state record for '{}': {}", name, e);
                    }
                }
            }
        }

        state
    }
}

/// Handle to the locked state store
#[derive(Debug, Clone)]
pub struct StateStore {
    layout: HostLayout,
}

impl StateStore {
    pub fn new(layout: HostLayout) -> Self {
        Self { layout }
    }

    fn state_path(&self) -> PathBuf {
        self.layout.state_file()
    }

    fn lock_path(&self) -> PathBuf {
        self.layout.state_dir().join("state.lock")
    }

    /// Run `f` with the state loaded under the exclusive lock, persisting
    /// any changes before the lock is released.
    ///
    /// Acquisition retries with jittered backoff (50–500 ms, up to 10
    /// attempts); running out of attempts is fatal, and no mutation ever
    /// proceeds unlocked.
    pub fn with_lock<T>(&self, f: impl FnOnce(&mut StateFile) -> Result<T>) -> Result<T> {
        fsutil::ensure_dir(&self.layout.state_dir())?;

        let lock_path = self.lock_path();
        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)
            .map_err(|e| StateError::Io {
                path: lock_path.display().to_string(),
                source: e,
            })?;

        let retry = RetryConfig::state_lock();
        let mut acquired = false;
        for attempt in 0..retry.max_attempts {
            match lock_file.try_lock_exclusive() {
                Ok(()) => {
                    acquired = true;
                    break;
                }
                Err(_) => {
                    let backoff = retry.calculate_delay(attempt);
                    debug!(
                        "State lock busy (attempt {}/{}), backing off {:?}",
                        attempt + 1,
                        retry.max_attempts,
                        backoff
                    );
                    std::thread::sleep(backoff);
                }
            }
        }
        if !acquired {
            return Err(StateError::Locked {
                path: self.state_path().display().to_string(),
                attempts: retry.max_attempts,
            }
            .into());
        }

        let result = (|| {
            let mut state = self.load()?;
            let before = state.clone();
            let value = f(&mut state)?;
            if state != before {
                fsutil::write_json_atomic(&self.state_path(), &state)?;
            }
            Ok(value)
        })();

        let _ = fs2::FileExt::unlock(&lock_file);
        result
    }

    /// Load the state file without taking the lock. Reads outside a
    /// mutation (status, list) use this directly.
    pub fn load(&self) -> Result<StateFile> {
        let path = self.state_path();
        let value: serde_json::Value =
            fsutil::read_json_or(&path, || serde_json::json!({"workspaces": {}, "sharedImage": {}}))?;
        Ok(StateFile::from_value(value))
    }

    /// Ensure a record exists for the workspace, allocating an SSH port on
    /// first contact. `forwards` and the config directory are overwritten
    /// to match the resolved configuration; a previously selected key is
    /// preserved.
    pub async fn ensure_workspace_state(
        &self,
        name: &str,
        config_dir: &str,
        forwards: &[u16],
    ) -> Result<WorkspaceRecord> {
        // Probe the host's listening sockets before taking the lock; the
        // allocation itself is serialized by the lock, the probe is only a
        // best-effort availability filter.
        let listening = listening_ports().await;

        let name = name.to_string();
        let config_dir = config_dir.to_string();
        let forwards = forwards.to_vec();

        self.with_lock(move |state| {
            let record = match state.workspaces.get_mut(&name) {
                Some(existing) => {
                    existing.config_dir = config_dir;
                    existing.forwards = forwards;
                    existing.clone()
                }
                None => {
                    let port = find_available_ssh_port(state, &listening);
                    let record = WorkspaceRecord {
                        ssh_port: port,
                        forwards,
                        config_dir,
                        selected_key: None,
                    };
                    state.workspaces.insert(name.clone(), record.clone());
                    debug!("Allocated SSH port {} for workspace '{}'", port, name);
                    record
                }
            };
            Ok(record)
        })
    }

    /// Record the selected SSH key basename for a workspace.
    pub fn set_selected_key(&self, name: &str, key: Option<String>) -> Result<()> {
        let name = name.to_string();
        self.with_lock(move |state| {
            if let Some(record) = state.workspaces.get_mut(&name) {
                record.selected_key = key;
            }
            Ok(())
        })
    }

    /// Fetch one workspace record.
    pub fn get_workspace(&self, name: &str) -> Result<Option<WorkspaceRecord>> {
        Ok(self.load()?.workspaces.get(name).cloned())
    }

    /// Delete the record under the lock, then remove the per-workspace
    /// state directory outside it.
    pub fn remove_workspace_state(&self, name: &str) -> Result<()> {
        let owned = name.to_string();
        self.with_lock(move |state| {
            state.workspaces.remove(&owned);
            Ok(())
        })?;

        let dir = self.layout.workspace_state(name).root;
        if dir.exists() {
            std::fs::remove_dir_all(&dir).map_err(|e| StateError::Io {
                path: dir.display().to_string(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// Stamp the shared image build time.
    pub fn record_shared_image_build(&self, now: DateTime<Utc>) -> Result<()> {
        self.with_lock(move |state| {
            state.shared_image.last_build_at = Some(now);
            Ok(())
        })
    }

    /// Last shared image build time, if any build was ever recorded.
    pub fn get_last_shared_image_build(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.load()?.shared_image.last_build_at)
    }

    /// All known workspace names.
    pub fn list_workspace_names(&self) -> Result<Vec<String>> {
        Ok(self.load()?.workspaces.keys().cloned().collect())
    }
}

/// First port >= 2300 that no state record holds and the host is not
/// listening on.
pub fn find_available_ssh_port(state: &StateFile, listening: &HashSet<u16>) -> u16 {
    let taken: HashSet<u16> = state.workspaces.values().map(|r| r.ssh_port).collect();
    let mut port = SSH_PORT_FLOOR;
    loop {
        if !taken.contains(&port) && !listening.contains(&port) {
            return port;
        }
        port += 1;
    }
}

/// Ports currently in the LISTEN state on the host, via `ss -tlnH`.
/// An unavailable `ss` yields an empty set; uniqueness within the state
/// file still holds.
pub async fn listening_ports() -> HashSet<u16> {
    let output = Cmd::new("ss")
        .args(["-tlnH"])
        .ignore_failure()
        .run_captured()
        .await;

    let Ok(output) = output else {
        return HashSet::new();
    };
    parse_ss_listening(&output.stdout)
}

fn parse_ss_listening(stdout: &str) -> HashSet<u16> {
    let mut ports = HashSet::new();
    for line in stdout.lines() {
        // Local address is the 4th whitespace-separated column.
        let Some(local) = line.split_whitespace().nth(3) else {
            continue;
        };
        if let Some(port) = local.rsplit(':').next().and_then(|p| p.parse::<u16>().ok()) {
            ports.insert(port);
        }
    }
    ports
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn store_in(home: &Path) -> StateStore {
        StateStore::new(HostLayout::from_home(home.to_path_buf()))
    }

    #[tokio::test]
    async fn first_workspace_gets_port_floor() {
        let home = tempfile::tempdir().unwrap();
        let store = store_in(home.path());

        let record = store
            .ensure_workspace_state("api", "/home/u/api", &[3000])
            .await
            .unwrap();
        assert_eq!(record.ssh_port, SSH_PORT_FLOOR);
        assert_eq!(record.forwards, vec![3000]);
        assert!(record.selected_key.is_none());
    }

    #[tokio::test]
    async fn existing_record_keeps_port_and_key_but_updates_forwards() {
        let home = tempfile::tempdir().unwrap();
        let store = store_in(home.path());

        store
            .ensure_workspace_state("api", "/home/u/api", &[3000])
            .await
            .unwrap();
        store
            .set_selected_key("api", Some("id_work".to_string()))
            .unwrap();

        let record = store
            .ensure_workspace_state("api", "/home/u/api-moved", &[8080, 8081])
            .await
            .unwrap();
        assert_eq!(record.ssh_port, SSH_PORT_FLOOR);
        assert_eq!(record.forwards, vec![8080, 8081]);
        assert_eq!(record.config_dir, "/home/u/api-moved");
        assert_eq!(record.selected_key.as_deref(), Some("id_work"));
    }

    #[tokio::test]
    async fn ports_are_unique_across_workspaces() {
        let home = tempfile::tempdir().unwrap();
        let store = store_in(home.path());

        let mut ports = HashSet::new();
        for name in ["a", "b", "c", "d"] {
            let record = store
                .ensure_workspace_state(name, "/tmp", &[])
                .await
                .unwrap();
            assert!(record.ssh_port >= SSH_PORT_FLOOR);
            assert!(ports.insert(record.ssh_port), "duplicate port allocated");
        }
    }

    #[test]
    fn allocator_skips_taken_and_listening_ports() {
        let mut state = StateFile::default();
        for (i, name) in ["a", "b", "c", "d", "e", "f"].iter().enumerate() {
            state.workspaces.insert(
                name.to_string(),
                WorkspaceRecord {
                    ssh_port: 2300 + i as u16,
                    forwards: vec![],
                    config_dir: "/tmp".to_string(),
                    selected_key: None,
                },
            );
        }
        let listening: HashSet<u16> = [2306].into_iter().collect();
        assert_eq!(find_available_ssh_port(&state, &listening), 2307);
    }

    #[test]
    fn malformed_records_dropped_on_load() {
        let home = tempfile::tempdir().unwrap();
        let store = store_in(home.path());
        fsutil::ensure_dir(&store.layout.state_dir()).unwrap();
        std::fs::write(
            store.state_path(),
            r#"{
                "workspaces": {
                    "good": {"sshPort": 2300, "forwards": [1, 2], "configDir": "/a"},
                    "bad-port": {"sshPort": "not-a-number", "forwards": [], "configDir": "/b"},
                    "bad-forwards": {"sshPort": 2301, "forwards": "nope", "configDir": "/c"},
                    "missing-dir": {"sshPort": 2302, "forwards": []}
                },
                "sharedImage": {}
            }"#,
        )
        .unwrap();

        let state = store.load().unwrap();
        let names: Vec<&str> = state.workspaces.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["good"]);
    }

    #[test]
    fn corrupt_top_level_json_is_error() {
        let home = tempfile::tempdir().unwrap();
        let store = store_in(home.path());
        fsutil::ensure_dir(&store.layout.state_dir()).unwrap();
        std::fs::write(store.state_path(), "{garbage").unwrap();
        assert!(store.load().is_err());
    }

    #[test]
    fn shared_image_build_roundtrip() {
        use chrono::TimeZone;
        let home = tempfile::tempdir().unwrap();
        let store = store_in(home.path());

        assert!(store.get_last_shared_image_build().unwrap().is_none());

        let stamp = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        store.record_shared_image_build(stamp).unwrap();
        assert_eq!(store.get_last_shared_image_build().unwrap(), Some(stamp));

        // The stamp survives in RFC 3339 form on disk.
        let text = std::fs::read_to_string(store.state_path()).unwrap();
        assert!(text.contains("2026-01-02T03:04:05Z"));
    }

    #[tokio::test]
    async fn remove_deletes_record_and_state_dir() {
        let home = tempfile::tempdir().unwrap();
        let store = store_in(home.path());

        store
            .ensure_workspace_state("api", "/tmp", &[])
            .await
            .unwrap();
        let ws_dir = store.layout.workspace_state("api").root;
        fsutil::ensure_dir(&ws_dir.join("ssh")).unwrap();

        store.remove_workspace_state("api").unwrap();
        assert!(store.list_workspace_names().unwrap().is_empty());
        assert!(!ws_dir.exists());
    }

    #[test]
    fn parse_ss_output() {
        let stdout = "\
LISTEN 0      4096       127.0.0.1:2300       0.0.0.0:*
LISTEN 0      511          0.0.0.0:80         0.0.0.0:*
LISTEN 0      4096            [::]:22            [::]:*
";
        let ports = parse_ss_listening(stdout);
        assert!(ports.contains(&2300));
        assert!(ports.contains(&80));
        assert!(ports.contains(&22));
        assert_eq!(ports.len(), 3);
    }

    #[test]
    fn concurrent_mutation_serializes_through_lock() {
        let home = tempfile::tempdir().unwrap();
        let store = store_in(home.path());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store
                        .with_lock(|state| {
                            let port = find_available_ssh_port(state, &HashSet::new());
                            state.workspaces.insert(
                                format!("ws-{}", i),
                                WorkspaceRecord {
                                    ssh_port: port,
                                    forwards: vec![],
                                    config_dir: "/tmp".to_string(),
                                    selected_key: None,
                                },
                            );
                            Ok(())
                        })
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let state = store.load().unwrap();
        let ports: HashSet<u16> = state.workspaces.values().map(|r| r.ssh_port).collect();
        assert_eq!(state.workspaces.len(), 8);
        assert_eq!(ports.len(), 8, "every workspace holds a distinct port");
    }
}
