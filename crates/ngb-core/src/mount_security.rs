use std::path::{Path, PathBuf};

use ngb_config::Config;
use ngb_types::{Allowlist, Mount, NanoGridBotError, Result};
use serde::{Deserialize, Serialize};

use crate::security::check_path_traversal;

/// Substrings that are always rejected in a resolved mount host path,
/// regardless of what the allowlist file permits.
const BUILTIN_BLOCKED_PATTERNS: &[&str] = &[
    ".ssh",
    ".gnupg",
    ".gpg",
    ".aws",
    ".azure",
    ".gcloud",
    ".kube",
    ".docker",
    ".env",
    "private_key",
    "id_rsa",
    "id_ed25519",
    "credentials",
    "secrets",
    ".npmrc",
    ".pypirc",
];

/// Mount permission mode for Docker volumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MountMode {
    ReadOnly,
    ReadWrite,
}

impl MountMode {
    /// Docker volume suffix string.
    pub fn as_docker_flag(&self) -> &str {
        match self {
            Self::ReadOnly => "ro",
            Self::ReadWrite => "rw",
        }
    }
}

/// A validated Docker bind-mount specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountSpec {
    pub host_path: PathBuf,
    pub container_path: String,
    pub mode: MountMode,
}

impl MountSpec {
    /// Format as Docker `-v` argument value: `host:container:mode`.
    pub fn to_docker_arg(&self) -> String {
        format!(
            "{}:{}:{}",
            self.host_path.display(),
            self.container_path,
            self.mode.as_docker_flag()
        )
    }
}

/// Return the set of host paths allowed as mount sources for the host's own
/// standard mounts (distinct from the user-supplied-mount allowlist).
pub fn get_allowed_mount_paths(config: &Config) -> Vec<PathBuf> {
    vec![
        config.groups_dir.clone(),
        config.data_dir.clone(),
        config.store_dir.clone(),
        config.base_dir.clone(),
    ]
}

/// Load an `Allowlist` from a JSON file: `{"allowed_roots": [...], "blocked_patterns"?: [...]}`.
fn load_allowlist(path: &Path) -> Result<Allowlist> {
    let bytes = std::fs::read(path)
        .map_err(|e| NanoGridBotError::Security(format!("Cannot read allowlist {}: {e}", path.display())))?;
    let allowlist: Allowlist = serde_json::from_slice(&bytes)
        .map_err(|e| NanoGridBotError::Security(format!("Invalid allowlist {}: {e}", path.display())))?;
    if allowlist.allowed_roots.is_empty() {
        return Err(NanoGridBotError::Security(format!(
            "Allowlist {} has no allowed_roots",
            path.display()
        )));
    }
    Ok(allowlist)
}

/// Validate a set of user-supplied bind mounts against an allowlist file.
///
/// Empty `mounts` is trivially valid. A missing `allowlist_path` blocks every
/// mount (mount rejection is total when no policy is configured). `is_main`
/// is accepted but does not currently relax or tighten checks.
pub fn validate_mounts(
    mounts: &[Mount],
    _group_name: &str,
    _is_main: bool,
    allowlist_path: Option<&Path>,
) -> (bool, Vec<String>) {
    if mounts.is_empty() {
        return (true, Vec::new());
    }

    let Some(allowlist_path) = allowlist_path else {
        return (
            false,
            vec!["no mount allowlist configured; all additional mounts blocked".to_string()],
        );
    };

    let allowlist = match load_allowlist(allowlist_path) {
        Ok(a) => a,
        Err(e) => return (false, vec![e.to_string()]),
    };

    let allowed_roots: Vec<PathBuf> = allowlist
        .allowed_roots
        .iter()
        .filter_map(|r| std::fs::canonicalize(r).ok())
        .collect();

    let mut errors = Vec::new();
    for mount in mounts {
        if let Err(reason) = validate_one_mount(mount, &allowed_roots, &allowlist.blocked_patterns) {
            errors.push(reason);
        }
    }

    (errors.is_empty(), errors)
}

fn validate_one_mount(
    mount: &Mount,
    allowed_roots: &[PathBuf],
    blocked_patterns: &[String],
) -> std::result::Result<(), String> {
    if !mount.container_path.starts_with('/') || mount.container_path.contains("..") {
        return Err(format!(
            "container path must be absolute and contain no '..': {}",
            mount.container_path
        ));
    }

    let resolved = std::fs::canonicalize(&mount.host_path).map_err(|_| {
        format!(
            "host path does not exist or cannot be resolved: {}",
            mount.host_path
        )
    })?;

    let lowered = resolved.to_string_lossy().to_lowercase();
    for pattern in BUILTIN_BLOCKED_PATTERNS
        .iter()
        .copied()
        .chain(blocked_patterns.iter().map(|s| s.as_str()))
    {
        if lowered.contains(&pattern.to_lowercase()) {
            return Err(format!(
                "host path matches blocked pattern '{pattern}': {}",
                resolved.display()
            ));
        }
    }

    let within_allowed = allowed_roots.iter().any(|root| resolved.starts_with(root));
    if !within_allowed {
        return Err(format!(
            "host path is not under any allowed root: {}",
            resolved.display()
        ));
    }

    Ok(())
}

/// Build and validate the mount list for a container run.
///
/// Standard mounts:
/// - `{groups_dir}/{group_folder}`         → `/workspace/group` (rw)
/// - `{data_dir}/ipc/{group_folder}/messages` → `/workspace/ipc/messages` (rw)
/// - `{data_dir}/ipc/{group_folder}/tasks`    → `/workspace/ipc/tasks` (rw)
/// - `{data_dir}/ipc/{group_folder}/input`    → `/workspace/ipc/input` (rw)
///
/// Every IPC mount is keyed by `group_folder`, matching the directories the
/// host actually reads and writes (`container_prep::ensure_workspace_dirs`,
/// `group_queue::send_message`/`close_container`, `ipc_handler`'s tick).
///
/// Additional mounts come from `ContainerConfig::additional_mounts` and are
/// still subject to the simple allowed-roots check below (not the full
/// allowlist-file policy, which governs only explicitly declared user mounts
/// routed through [`validate_mounts`]).
pub fn validate_workspace_mounts(
    group_folder: &str,
    additional_mounts: &[std::collections::HashMap<String, serde_json::Value>],
    config: &Config,
) -> Result<Vec<MountSpec>> {
    let allowed = get_allowed_mount_paths(config);
    let mut mounts = Vec::new();

    // Group folder — read/write
    let group_host = config.groups_dir.join(group_folder);
    mounts.push(MountSpec {
        host_path: group_host,
        container_path: "/workspace/group".to_string(),
        mode: MountMode::ReadWrite,
    });

    // IPC mailboxes — one mount per subdirectory, all read/write
    let ipc_root = config.data_dir.join("ipc").join(group_folder);
    for sub in ["messages", "tasks", "input"] {
        mounts.push(MountSpec {
            host_path: ipc_root.join(sub),
            container_path: format!("/workspace/ipc/{sub}"),
            mode: MountMode::ReadWrite,
        });
    }

    // Merge additional mounts declared on the group's ContainerConfig.
    for mount_map in additional_mounts {
        let host = mount_map
            .get("host_path")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let container = mount_map
            .get("container_path")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let mode_str = mount_map
            .get("mode")
            .and_then(|v| v.as_str())
            .unwrap_or("ro");

        if host.is_empty() || container.is_empty() {
            continue;
        }

        if check_path_traversal(host) || check_path_traversal(container) {
            return Err(NanoGridBotError::Security(format!(
                "Path traversal detected in mount: {host} -> {container}"
            )));
        }

        let host_path = PathBuf::from(host);

        let is_allowed = allowed.iter().any(|a| host_path.starts_with(a));
        if !is_allowed {
            return Err(NanoGridBotError::Security(format!(
                "Mount host path not in allowed list: {host}"
            )));
        }

        let mode = if mode_str == "rw" {
            MountMode::ReadWrite
        } else {
            MountMode::ReadOnly
        };

        mounts.push(MountSpec {
            host_path,
            container_path: container.to_string(),
            mode,
        });
    }

    Ok(mounts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn test_config() -> Config {
        let base = PathBuf::from("/tmp/ngb-mount-test");
        Config {
            project_name: "test".to_string(),
            version: "0.0.1".to_string(),
            debug: false,
            base_dir: base.clone(),
            data_dir: base.join("data"),
            store_dir: base.join("store"),
            groups_dir: base.join("groups"),
            workspaces_dir: base.join("workspaces"),
            db_path: base.join("store/messages.db"),
            whatsapp_session_path: base.join("store/whatsapp_session"),
            openai_api_key: None,
            anthropic_api_key: None,
            telegram_bot_token: None,
            slack_bot_token: None,
            slack_signing_secret: None,
            discord_bot_token: None,
            qq_host: "127.0.0.1".to_string(),
            qq_port: 20000,
            feishu_app_id: None,
            feishu_app_secret: None,
            wecom_corp_id: None,
            wecom_agent_id: None,
            wecom_secret: None,
            dingtalk_app_key: None,
            dingtalk_app_secret: None,
            claude_api_url: "https://api.anthropic.com".to_string(),
            claude_api_version: "2023-06-01".to_string(),
            claude_model: "claude-sonnet-4-20250514".to_string(),
            claude_max_tokens: 4096,
            cli_default_group: "cli".to_string(),
            container_timeout: 300,
            container_max_output_size: 100_000,
            container_max_concurrent: 5,
            container_image: "nanogridbot-agent:latest".to_string(),
            container_runtime: "docker".to_string(),
            mount_allowlist_path: None,
            group_queue_max_depth: None,
            ipc_poll_interval: 2000,
            scheduler_poll_secs: 60,
            log_structured: false,
            log_file: None,
            assistant_name: "Andy".to_string(),
            trigger_pattern: None,
            poll_interval: 2000,
            max_messages_per_minute: 10,
            message_cache_size: 1000,
            batch_size: 100,
            db_connection_pool_size: 5,
            ipc_file_buffer_size: 8192,
            log_level: "INFO".to_string(),
            log_format: "default".to_string(),
            log_rotation: "10 MB".to_string(),
            log_retention: "7 days".to_string(),
            web_host: "0.0.0.0".to_string(),
            web_port: 8080,
        }
    }

    #[test]
    fn standard_mounts_are_folder_keyed() {
        let cfg = test_config();
        let mounts = validate_workspace_mounts("my_group", &[], &cfg).unwrap();
        assert_eq!(mounts.len(), 4);
        assert_eq!(mounts[0].container_path, "/workspace/group");
        assert_eq!(mounts[0].mode, MountMode::ReadWrite);
        assert_eq!(mounts[0].host_path, cfg.groups_dir.join("my_group"));

        let ipc_root = cfg.data_dir.join("ipc").join("my_group");
        assert_eq!(mounts[1].container_path, "/workspace/ipc/messages");
        assert_eq!(mounts[1].host_path, ipc_root.join("messages"));
        assert_eq!(mounts[2].container_path, "/workspace/ipc/tasks");
        assert_eq!(mounts[2].host_path, ipc_root.join("tasks"));
        assert_eq!(mounts[3].container_path, "/workspace/ipc/input");
        assert_eq!(mounts[3].host_path, ipc_root.join("input"));
        for mount in &mounts {
            assert_eq!(mount.mode, MountMode::ReadWrite);
        }
    }

    #[test]
    fn standard_mounts_ignore_chat_jid() {
        // Two different groups get independent, folder-keyed mount sets;
        // the chat JID that triggered the run plays no part in mount paths.
        let cfg = test_config();
        let a = validate_workspace_mounts("group_a", &[], &cfg).unwrap();
        let b = validate_workspace_mounts("group_b", &[], &cfg).unwrap();
        assert_ne!(a[1].host_path, b[1].host_path);
    }

    #[test]
    fn mount_spec_docker_arg_format() {
        let spec = MountSpec {
            host_path: PathBuf::from("/host/dir"),
            container_path: "/container/dir".to_string(),
            mode: MountMode::ReadOnly,
        };
        assert_eq!(spec.to_docker_arg(), "/host/dir:/container/dir:ro");
    }

    #[test]
    fn validate_mounts_empty_is_ok() {
        let (ok, errors) = validate_mounts(&[], "g1", false, None);
        assert!(ok);
        assert!(errors.is_empty());
    }

    #[test]
    fn validate_mounts_without_allowlist_blocks_everything() {
        let mount = Mount {
            host_path: "/tmp".to_string(),
            container_path: "/mnt/x".to_string(),
            read_only: true,
        };
        let (ok, errors) = validate_mounts(&[mount], "g1", false, None);
        assert!(!ok);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn validate_mounts_rejects_blocked_pattern() {
        let tmp = tempfile::tempdir().unwrap();
        let home = tmp.path().join("home_u");
        let ssh_dir = home.join(".ssh");
        std::fs::create_dir_all(&ssh_dir).unwrap();

        let allowlist_path = tmp.path().join("allowlist.json");
        let mut f = std::fs::File::create(&allowlist_path).unwrap();
        write!(f, r#"{{"allowed_roots": ["{}"]}}"#, home.display()).unwrap();

        let mount = Mount {
            host_path: ssh_dir.to_string_lossy().to_string(),
            container_path: "/mnt/k".to_string(),
            read_only: true,
        };
        let (ok, errors) = validate_mounts(&[mount], "g1", false, Some(&allowlist_path));
        assert!(!ok);
        assert!(errors[0].contains(".ssh"));
    }

    #[test]
    fn validate_mounts_accepts_path_under_allowed_root() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("allowed_root");
        let sub = root.join("project");
        std::fs::create_dir_all(&sub).unwrap();

        let allowlist_path = tmp.path().join("allowlist.json");
        let mut f = std::fs::File::create(&allowlist_path).unwrap();
        write!(f, r#"{{"allowed_roots": ["{}"]}}"#, root.display()).unwrap();

        let mount = Mount {
            host_path: sub.to_string_lossy().to_string(),
            container_path: "/mnt/project".to_string(),
            read_only: false,
        };
        let (ok, errors) = validate_mounts(&[mount], "g1", false, Some(&allowlist_path));
        assert!(ok, "errors: {errors:?}");
    }

    #[test]
    fn validate_mounts_rejects_path_outside_allowed_roots() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("allowed_root");
        let outside = tmp.path().join("elsewhere");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::create_dir_all(&outside).unwrap();

        let allowlist_path = tmp.path().join("allowlist.json");
        let mut f = std::fs::File::create(&allowlist_path).unwrap();
        write!(f, r#"{{"allowed_roots": ["{}"]}}"#, root.display()).unwrap();

        let mount = Mount {
            host_path: outside.to_string_lossy().to_string(),
            container_path: "/mnt/x".to_string(),
            read_only: true,
        };
        let (ok, errors) = validate_mounts(&[mount], "g1", false, Some(&allowlist_path));
        assert!(!ok);
        assert!(errors[0].contains("not under"));
    }

    #[test]
    fn validate_mounts_rejects_nonexistent_container_path() {
        let tmp = tempfile::tempdir().unwrap();
        let allowlist_path = tmp.path().join("allowlist.json");
        std::fs::write(&allowlist_path, r#"{"allowed_roots": ["/tmp"]}"#).unwrap();

        let mount = Mount {
            host_path: "/tmp".to_string(),
            container_path: "relative/path".to_string(),
            read_only: true,
        };
        let (ok, errors) = validate_mounts(&[mount], "g1", false, Some(&allowlist_path));
        assert!(!ok);
        assert!(errors[0].contains("absolute"));
    }

    #[test]
    fn validate_mounts_custom_blocked_pattern() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("root");
        let scratch = root.join("scratch_data");
        std::fs::create_dir_all(&scratch).unwrap();

        let allowlist_path = tmp.path().join("allowlist.json");
        let mut f = std::fs::File::create(&allowlist_path).unwrap();
        write!(
            f,
            r#"{{"allowed_roots": ["{}"], "blocked_patterns": ["scratch"]}}"#,
            root.display()
        )
        .unwrap();

        let mount = Mount {
            host_path: scratch.to_string_lossy().to_string(),
            container_path: "/mnt/scratch".to_string(),
            read_only: true,
        };
        let (ok, errors) = validate_mounts(&[mount], "g1", false, Some(&allowlist_path));
        assert!(!ok);
        assert!(errors[0].contains("scratch"));
    }
}
