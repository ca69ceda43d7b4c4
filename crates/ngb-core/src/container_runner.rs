use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ngb_config::Config;
use ngb_db::{Database, MetricsRepository};
use ngb_types::{ContainerInput, ContainerOutput, NanoGridBotError, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::time::Instant as TokioInstant;
use tracing::{debug, error, info, warn};

use crate::container_prep::ensure_workspace_dirs;
use crate::mount_security::validate_workspace_mounts;

/// Marker written by the agent container to delimit its JSON output.
pub const OUTPUT_START_MARKER: &str = "---NGB_OUTPUT_START---";
/// End marker.
pub const OUTPUT_END_MARKER: &str = "---NGB_OUTPUT_END---";

/// Handle to a just-spawned container, handed back through [`RunnerCallbacks::on_process`]
/// so the caller (the group queue) can register liveness without holding the
/// actual child process object — everything the queue needs to do afterward
/// (`send_message`, `close_container`, force-kill on shutdown) goes through the
/// filesystem mailbox or the runtime CLI by name, not the process handle itself.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pub container_name: String,
    pub pid: Option<u32>,
}

/// Inversion-of-control pair the runner calls back into. Modeled as one
/// capability with two methods rather than free-floating closures, so the
/// "hand the subprocess back to the caller" handshake is explicit.
pub trait RunnerCallbacks: Send + Sync {
    /// Invoked synchronously immediately after a successful spawn.
    fn on_process(&self, _handle: ProcessHandle) {}
    /// Invoked for every parsed output frame, in stdout order.
    fn on_output(&self, _output: &ContainerOutput) {}
}

/// No-op callbacks for callers that don't need the handshake.
pub struct NoopCallbacks;
impl RunnerCallbacks for NoopCallbacks {}

/// Run an agent container and return its output.
///
/// Flow: validate mounts → merge env → build runtime command →
/// stream stdout with idle-timeout enforcement → record metrics.
#[allow(clippy::too_many_arguments)]
pub async fn run_container_agent(
    group_folder: &str,
    prompt: &str,
    session_id: &str,
    chat_jid: &str,
    is_main: bool,
    additional_mounts: &[HashMap<String, serde_json::Value>],
    timeout_secs: Option<u64>,
    env: &HashMap<String, String>,
    config: &Config,
    db: &Database,
    callbacks: Arc<dyn RunnerCallbacks>,
) -> Result<ContainerOutput> {
    let metrics = MetricsRepository::new(db);
    let channel = chat_jid.split(':').next().unwrap_or("unknown");
    let metric_id = metrics
        .record_container_start(group_folder, channel)
        .await?;
    let start = Instant::now();

    let result = run_container_inner(
        group_folder,
        prompt,
        session_id,
        chat_jid,
        is_main,
        additional_mounts,
        timeout_secs,
        env,
        config,
        callbacks,
    )
    .await;

    let duration = start.elapsed().as_secs_f64();

    match &result {
        Ok(output) => {
            let status = if output.is_success() { "success" } else { "error" };
            info!(
                group_folder,
                status,
                duration_secs = duration,
                "Container execution completed"
            );
            metrics
                .record_container_end(metric_id, status, Some(duration), None, None, output.error_text())
                .await?;
        }
        Err(e) => {
            error!(group_folder, error = %e, "Container failed to spawn");
            metrics
                .record_container_end(metric_id, "error", Some(duration), None, None, Some(&e.to_string()))
                .await?;
        }
    }

    result
}

/// Inner function that handles the actual container invocation.
#[allow(clippy::too_many_arguments)]
async fn run_container_inner(
    group_folder: &str,
    prompt: &str,
    session_id: &str,
    chat_jid: &str,
    is_main: bool,
    additional_mounts: &[HashMap<String, serde_json::Value>],
    timeout_secs: Option<u64>,
    env: &HashMap<String, String>,
    config: &Config,
    callbacks: Arc<dyn RunnerCallbacks>,
) -> Result<ContainerOutput> {
    ensure_workspace_dirs(config, group_folder)?;
    let mounts = validate_workspace_mounts(group_folder, additional_mounts, config)?;

    let container_name = format!("ngb-{}-{}", group_folder, chrono::Utc::now().timestamp_millis());
    let args = build_runtime_args(&container_name, &mounts, env, config);

    let input = ContainerInput {
        prompt: prompt.to_string(),
        session_id: if session_id.is_empty() {
            None
        } else {
            Some(session_id.to_string())
        },
        group_folder: group_folder.to_string(),
        chat_jid: chat_jid.to_string(),
        is_main,
        is_scheduled_task: false,
    };
    let input_bytes = serde_json::to_vec(&input)?;

    debug!(group_folder, runtime = %config.container_runtime, args = ?args, "Launching container");

    let idle_timeout = Duration::from_secs(timeout_secs.unwrap_or(config.container_timeout));
    let max_output_size = config.container_max_output_size;

    let mut child = Command::new(&config.container_runtime)
        .args(&args)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .map_err(|e| NanoGridBotError::Container(format!("Failed to spawn container runtime: {e}")))?;

    let pid = child.id();
    callbacks.on_process(ProcessHandle {
        container_name: container_name.clone(),
        pid,
    });

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(&input_bytes).await.map_err(|e| {
            NanoGridBotError::Container(format!("Failed to write to container stdin: {e}"))
        })?;
    }

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| NanoGridBotError::Container("container has no stdout handle".to_string()))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| NanoGridBotError::Container("container has no stderr handle".to_string()))?;

    let stderr_task: tokio::task::JoinHandle<Vec<u8>> = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stderr.read_to_end(&mut buf).await;
        buf
    });

    let mut stdout_buf = String::new();
    let mut last_output: Option<ContainerOutput> = None;
    let mut timed_out = false;
    let runtime = config.container_runtime.clone();

    let mut idle_deadline = TokioInstant::now() + idle_timeout;

    'read_loop: loop {
        let mut chunk = [0u8; 4096];
        tokio::select! {
            read_result = stdout.read(&mut chunk) => {
                match read_result {
                    Ok(0) => break 'read_loop,
                    Ok(n) => {
                        stdout_buf.push_str(&String::from_utf8_lossy(&chunk[..n]));

                        while let Some(output) = try_parse_frame(&mut stdout_buf) {
                            callbacks.on_output(&output);
                            last_output = Some(output);
                            idle_deadline = TokioInstant::now() + idle_timeout;
                        }

                        if stdout_buf.len() > max_output_size {
                            warn!(group_folder, size = stdout_buf.len(), "stdout exceeded max_output_size, killing container");
                            stop_then_kill(&runtime, &container_name).await;
                            break 'read_loop;
                        }
                    }
                    Err(e) => {
                        warn!(group_folder, error = %e, "error reading container stdout");
                        break 'read_loop;
                    }
                }
            }
            _ = tokio::time::sleep_until(idle_deadline) => {
                timed_out = true;
                warn!(group_folder, timeout_ms = idle_timeout.as_millis(), "container idle timeout, stopping");
                stop_then_kill(&runtime, &container_name).await;
                break 'read_loop;
            }
        }
    }

    let stderr_bytes = stderr_task.await.unwrap_or_default();
    let stderr_text = String::from_utf8_lossy(&stderr_bytes).to_string();

    let exit_status = child.wait().await.ok();

    if timed_out {
        return Ok(ContainerOutput::Error {
            error: format!("Container timed out after {}ms", idle_timeout.as_millis()),
            result: last_output.as_ref().and_then(|o| o.result().map(str::to_string)),
            new_session_id: last_output.as_ref().and_then(|o| o.new_session_id().map(str::to_string)),
        });
    }

    if let Some(output) = last_output {
        return Ok(output);
    }

    match exit_status {
        Some(status) if status.success() => Ok(ContainerOutput::Success {
            result: None,
            new_session_id: None,
        }),
        Some(status) => {
            let tail: String = stderr_text.chars().rev().take(500).collect::<Vec<_>>().into_iter().rev().collect();
            Ok(ContainerOutput::Error {
                error: format!(
                    "Container exited with code {}. stderr: {tail}",
                    status.code().unwrap_or(-1)
                ),
                result: None,
                new_session_id: None,
            })
        }
        None => Ok(ContainerOutput::error("Container exited with unknown status")),
    }
}

/// Repeatedly-callable frame extractor: locates one marker-delimited JSON
/// payload in `buf`, consumes it (including both markers), and returns the
/// parsed output. Returns `None` once no complete frame remains.
fn try_parse_frame(buf: &mut String) -> Option<ContainerOutput> {
    let start_idx = buf.find(OUTPUT_START_MARKER)?;
    let after_start = start_idx + OUTPUT_START_MARKER.len();
    let end_rel = buf[after_start..].find(OUTPUT_END_MARKER)?;
    let payload_start = after_start;
    let payload_end = after_start + end_rel;
    let consumed_end = payload_end + OUTPUT_END_MARKER.len();

    let payload = buf[payload_start..payload_end].trim().to_string();
    let output = match serde_json::from_str::<ContainerOutput>(&payload) {
        Ok(o) => o,
        Err(_) => {
            let snippet: String = payload.chars().take(200).collect();
            ContainerOutput::error(format!("Failed to parse output: {snippet}"))
        }
    };

    buf.drain(..consumed_end);
    Some(output)
}

async fn stop_then_kill(runtime: &str, container_name: &str) {
    let stop = Command::new(runtime)
        .args(["stop", container_name])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await;

    let stopped = matches!(stop, Ok(s) if s.success());
    if !stopped {
        let _ = Command::new(runtime)
            .args(["kill", container_name])
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await;
    }
}

/// Build runtime-CLI arguments (without the runtime binary itself).
pub fn build_runtime_args(
    container_name: &str,
    mounts: &[crate::mount_security::MountSpec],
    env: &HashMap<String, String>,
    config: &Config,
) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-i".to_string(),
        "--rm".to_string(),
        "--name".to_string(),
        container_name.to_string(),
    ];

    for mount in mounts {
        match mount.mode {
            crate::mount_security::MountMode::ReadOnly => {
                args.push("--mount".to_string());
                args.push(format!(
                    "type=bind,source={},target={},readonly",
                    mount.host_path.display(),
                    mount.container_path
                ));
            }
            crate::mount_security::MountMode::ReadWrite => {
                args.push("-v".to_string());
                args.push(format!("{}:{}", mount.host_path.display(), mount.container_path));
            }
        }
    }

    for (k, v) in env {
        args.push("-e".to_string());
        args.push(format!("{k}={v}"));
    }
    if let Some(ref key) = config.anthropic_api_key {
        if !env.contains_key("ANTHROPIC_API_KEY") {
            args.push("-e".to_string());
            args.push(format!("ANTHROPIC_API_KEY={key}"));
        }
    }

    args.push(config.container_image.clone());

    args
}

/// Check if the configured container runtime is available on the system.
pub async fn check_docker_available(config: &Config) -> Result<bool> {
    match Command::new(&config.container_runtime)
        .arg("version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await
    {
        Ok(status) => Ok(status.success()),
        Err(_) => Ok(false),
    }
}

/// Get the status of a named container.
pub async fn get_container_status(runtime: &str, name: &str) -> Result<String> {
    let output = Command::new(runtime)
        .args(["inspect", "--format", "{{.State.Status}}", name])
        .output()
        .await
        .map_err(|e| NanoGridBotError::Container(format!("Failed to inspect container: {e}")))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        Ok("not_found".to_string())
    }
}

/// Forcibly remove a container by name.
pub async fn cleanup_container(runtime: &str, name: &str) -> Result<()> {
    let output = Command::new(runtime)
        .args(["rm", "-f", name])
        .output()
        .await
        .map_err(|e| NanoGridBotError::Container(format!("Failed to cleanup container: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.contains("No such container") {
            warn!(name, stderr = %stderr, "Container cleanup warning");
        }
    }

    Ok(())
}

impl ContainerOutput {
    fn error_text(&self) -> Option<&str> {
        match self {
            Self::Error { error, .. } => Some(error),
            Self::Success { .. } => None,
        }
    }
}
