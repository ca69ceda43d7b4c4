use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ngb_config::Config;
use ngb_db::{Database, GroupRepository};
use ngb_types::{IpcMessage, IpcTask, IpcTaskKind, NanoGridBotError, RegisteredGroup, Result};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::task_scheduler::TaskDirectiveHandler;

/// Trait for channel adapters that can send outbound messages.
///
/// Defined here because the IPC watcher is the primary consumer: it routes
/// a drained messages-mailbox entry to a channel through this trait. Exactly
/// zero or one adapter is expected to claim a given JID; first-match-wins.
pub trait ChannelSender: Send + Sync {
    /// Return true if this sender handles the given JID.
    fn owns_jid(&self, jid: &str) -> bool;

    /// Send a text message to the specified JID.
    fn send_message(
        &self,
        jid: &str,
        text: &str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + '_>>;
}

/// Minimal identifiers extracted from a `PauseTask`/`ResumeTask`/`CancelTask`
/// directive's `data` payload.
#[derive(Debug, serde::Deserialize)]
struct TaskIdPayload {
    task_id: i64,
}

/// Host-side IPC watcher (C4).
///
/// Owns a single periodic tick over every group folder under
/// `<data_dir>/ipc/`, draining each group's `messages/` and `tasks/`
/// mailboxes and dispatching the results to channel adapters and the task
/// scheduler respectively. Runs one tick immediately on `start`, then every
/// `config.ipc_poll_interval` ms; `stop` cancels the ticker without waiting
/// for an in-flight tick.
pub struct IpcHandler {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    channels: Arc<Vec<Box<dyn ChannelSender>>>,
    db: Arc<Database>,
    tasks: Arc<dyn TaskDirectiveHandler>,
    data_dir: PathBuf,
    poll_interval_ms: u64,
    warned_folder_fallback: Arc<AtomicBool>,
}

impl IpcHandler {
    /// Create a new IPC handler.
    pub fn new(
        channels: Arc<Vec<Box<dyn ChannelSender>>>,
        db: Arc<Database>,
        tasks: Arc<dyn TaskDirectiveHandler>,
        config: &Config,
    ) -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
            channels,
            db,
            tasks,
            data_dir: config.data_dir.clone(),
            poll_interval_ms: config.ipc_poll_interval,
            warned_folder_fallback: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the watcher loop: one tick immediately, then every
    /// `ipc_poll_interval` ms until `stop` is called.
    pub fn start(&mut self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("IPC watcher already running");
            return;
        }

        let running = self.running.clone();
        let channels = self.channels.clone();
        let db = self.db.clone();
        let tasks = self.tasks.clone();
        let data_dir = self.data_dir.clone();
        let interval_ms = self.poll_interval_ms;
        let warned = self.warned_folder_fallback.clone();

        let handle = tokio::spawn(async move {
            debug!("IPC watcher started");
            while running.load(Ordering::SeqCst) {
                if let Err(e) = tick(&data_dir, &db, &channels, tasks.as_ref(), &warned).await {
                    error!(error = %e, "IPC watcher tick failed");
                }
                tokio::time::sleep(std::time::Duration::from_millis(interval_ms)).await;
            }
            debug!("IPC watcher stopped");
        });

        self.handle = Some(handle);
    }

    /// Stop the watcher. Does not wait for an in-flight tick to finish.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Whether the watcher loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// One full tick: fetch registered groups, drain both mailboxes per group.
async fn tick(
    data_dir: &Path,
    db: &Database,
    channels: &[Box<dyn ChannelSender>],
    tasks: &dyn TaskDirectiveHandler,
    warned_folder_fallback: &AtomicBool,
) -> Result<()> {
    let groups = GroupRepository::new(db).get_all().await?;
    let by_folder: HashMap<&str, &RegisteredGroup> =
        groups.iter().map(|g| (g.folder.as_str(), g)).collect();

    let ipc_root = data_dir.join("ipc");
    let mut entries = match tokio::fs::read_dir(&ipc_root).await {
        Ok(rd) => rd,
        Err(_) => return Ok(()),
    };

    let mut folders = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_type().await.is_ok_and(|t| t.is_dir()) {
            folders.push(entry.file_name().to_string_lossy().to_string());
        }
    }

    for folder in folders {
        let Some(group) = by_folder.get(folder.as_str()) else {
            continue;
        };
        let group_dir = ipc_root.join(&folder);
        drain_messages(&group_dir, group, channels, warned_folder_fallback).await;
        drain_tasks(&group_dir, &folder, group, tasks, warned_folder_fallback).await;
    }

    Ok(())
}

fn is_main_group(group: &RegisteredGroup, warned_folder_fallback: &AtomicBool) -> bool {
    if group.is_main {
        return true;
    }
    if group.folder == "main" {
        if !warned_folder_fallback.swap(true, Ordering::SeqCst) {
            debug!("group is_main unset, falling back to folder == \"main\" heuristic");
        }
        return true;
    }
    false
}

async fn drain_messages(
    group_dir: &Path,
    group: &RegisteredGroup,
    channels: &[Box<dyn ChannelSender>],
    warned_folder_fallback: &AtomicBool,
) {
    let mailbox = group_dir.join("messages");
    let drained = crate::ipc::drain::<IpcMessage>(&mailbox).await;
    let is_main = is_main_group(group, warned_folder_fallback);

    for entry in drained {
        let msg = entry.obj;
        if msg.text.trim().is_empty() {
            warn!(folder = %group.folder, "skipping IPC message with empty text");
            continue;
        }

        let target_jid = msg.target_jid.clone().unwrap_or_else(|| group.jid.clone());
        if !is_main && msg.target_jid.is_some() && target_jid != group.jid {
            warn!(
                folder = %group.folder,
                target_jid,
                "non-main group attempted to address another group, dropping"
            );
            continue;
        }

        let sent = channels
            .iter()
            .find(|c| c.owns_jid(&target_jid))
            .ok_or_else(|| {
                NanoGridBotError::Channel(format!("no channel adapter owns jid {target_jid}"))
            });

        let result = match sent {
            Ok(channel) => channel.send_message(&target_jid, &msg.text).await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            error!(folder = %group.folder, error = %e, "failed to dispatch IPC message");
            if let Err(qe) = crate::ipc::quarantine(&mailbox, &entry.filename).await {
                debug!(file = %entry.filename, error = %qe, "failed to quarantine IPC message");
            }
        }
    }
}

async fn drain_tasks(
    group_dir: &Path,
    folder: &str,
    group: &RegisteredGroup,
    tasks: &dyn TaskDirectiveHandler,
    warned_folder_fallback: &AtomicBool,
) {
    let mailbox = group_dir.join("tasks");
    let drained = crate::ipc::drain::<IpcTask>(&mailbox).await;
    let is_main = is_main_group(group, warned_folder_fallback);

    for entry in drained {
        let task = entry.obj;
        let result = dispatch_task(&task, folder, is_main, tasks).await;
        if let Err(e) = result {
            error!(folder, kind = ?task.kind, error = %e, "failed to dispatch IPC task directive");
            if let Err(qe) = crate::ipc::quarantine(&mailbox, &entry.filename).await {
                debug!(file = %entry.filename, error = %qe, "failed to quarantine IPC task");
            }
        }
    }
}

async fn dispatch_task(
    task: &IpcTask,
    folder: &str,
    is_main: bool,
    tasks: &dyn TaskDirectiveHandler,
) -> Result<()> {
    match task.kind {
        IpcTaskKind::ScheduleTask => {
            let scheduled: ngb_types::ScheduledTask = serde_json::from_value(task.data.clone())?;
            if !is_main && scheduled.group_folder != folder {
                warn!(folder, "non-main group attempted to schedule a task for another group, dropping");
                return Ok(());
            }
            tasks.schedule_task(scheduled).await?;
            Ok(())
        }
        IpcTaskKind::PauseTask => {
            let payload: TaskIdPayload = serde_json::from_value(task.data.clone())?;
            tasks.pause_task(payload.task_id).await?;
            Ok(())
        }
        IpcTaskKind::ResumeTask => {
            let payload: TaskIdPayload = serde_json::from_value(task.data.clone())?;
            tasks.resume_task(payload.task_id).await?;
            Ok(())
        }
        IpcTaskKind::CancelTask => {
            let payload: TaskIdPayload = serde_json::from_value(task.data.clone())?;
            tasks.cancel_task(payload.task_id).await?;
            Ok(())
        }
    }
}
