//! Per-group FIFO work queue with a global concurrency cap and bounded
//! exponential retry. One group (jid) processes at most one item at a time;
//! across groups, `active_count` is capped at `container_max_concurrent`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ngb_config::Config;
use ngb_db::Database;
use ngb_types::{IpcInput, NanoGridBotError, Result, ScheduledTask};
use tokio::process::Command;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, error, warn};

use crate::container_runner::{run_container_agent, ProcessHandle, RunnerCallbacks};

/// Maximum number of retry attempts for a scheduled-task or message-check item.
const MAX_RETRIES: u32 = 5;

/// Fires exactly once with the item's terminal outcome, delivered back to
/// whoever called `enqueue_task`/`enqueue_message_check`.
type Completion = oneshot::Sender<Result<bool>>;

struct PendingMessage {
    session_id: String,
    last_timestamp: Option<String>,
    attempt: u32,
    completion: Completion,
}

enum WorkItem {
    Task {
        task: ScheduledTask,
        session_id: String,
        completion: Completion,
    },
    Message {
        session_id: String,
        last_timestamp: Option<String>,
        attempt: u32,
        completion: Completion,
    },
}

struct GroupState {
    folder: String,
    processing: bool,
    tasks: VecDeque<ScheduledTask>,
    task_sessions: VecDeque<String>,
    task_completions: VecDeque<Completion>,
    messages: VecDeque<PendingMessage>,
    container_name: Option<String>,
}

impl GroupState {
    fn new(folder: &str) -> Self {
        Self {
            folder: folder.to_string(),
            processing: false,
            tasks: VecDeque::new(),
            task_sessions: VecDeque::new(),
            task_completions: VecDeque::new(),
            messages: VecDeque::new(),
            container_name: None,
        }
    }

    fn is_empty(&self) -> bool {
        self.tasks.is_empty() && self.messages.is_empty()
    }

    fn pop_next(&mut self) -> Option<WorkItem> {
        if let Some(task) = self.tasks.pop_front() {
            let session_id = self.task_sessions.pop_front().unwrap_or_default();
            let completion = self
                .task_completions
                .pop_front()
                .expect("task_completions out of sync with tasks");
            return Some(WorkItem::Task {
                task,
                session_id,
                completion,
            });
        }
        self.messages.pop_front().map(|m| WorkItem::Message {
            session_id: m.session_id,
            last_timestamp: m.last_timestamp,
            attempt: m.attempt,
            completion: m.completion,
        })
    }
}

struct QueueInner {
    groups: HashMap<String, GroupState>,
    active_count: usize,
    max_concurrent: usize,
    max_depth: Option<usize>,
    config: Config,
    db: Arc<Database>,
}

/// Per-group serialized container queue with global concurrency limiting.
pub struct GroupQueue {
    inner: Arc<Mutex<QueueInner>>,
}

/// Callback bridge handed to [`run_container_agent`] so the queue learns the
/// container name for a group as soon as it spawns, without holding the
/// actual child process.
struct QueueCallbacks {
    inner: Arc<Mutex<QueueInner>>,
    jid: String,
}

impl RunnerCallbacks for QueueCallbacks {
    fn on_process(&self, handle: ProcessHandle) {
        let inner = self.inner.clone();
        let jid = self.jid.clone();
        tokio::spawn(async move {
            let mut guard = inner.lock().await;
            if let Some(state) = guard.groups.get_mut(&jid) {
                state.container_name = Some(handle.container_name);
            }
        });
    }
}

impl GroupQueue {
    pub fn new(config: Config, db: Arc<Database>) -> Self {
        let max_concurrent = config.container_max_concurrent;
        let max_depth = config.group_queue_max_depth;
        Self {
            inner: Arc::new(Mutex::new(QueueInner {
                groups: HashMap::new(),
                active_count: 0,
                max_concurrent,
                max_depth,
                config,
                db,
            })),
        }
    }

    /// Append a message-check for `jid`. Resolves once the check (and any
    /// retries) reach a terminal outcome; resolves to `false` immediately,
    /// without enqueueing, if `group_queue_max_depth` is set and the group's
    /// queue is already at the watermark.
    pub async fn enqueue_message_check(
        &self,
        jid: &str,
        folder: &str,
        session_id: &str,
        last_timestamp: Option<&str>,
    ) -> Result<bool> {
        let rx = {
            let mut inner = self.inner.lock().await;
            let state = inner
                .groups
                .entry(jid.to_string())
                .or_insert_with(|| GroupState::new(folder));

            if let Some(max) = inner.max_depth {
                if state.tasks.len() + state.messages.len() >= max {
                    warn!(jid, max, "group queue depth watermark reached, rejecting enqueue");
                    return Ok(false);
                }
            }

            let (tx, rx) = oneshot::channel();
            state.messages.push_back(PendingMessage {
                session_id: session_id.to_string(),
                last_timestamp: last_timestamp.map(str::to_string),
                attempt: 0,
                completion: tx,
            });
            rx
        };

        self.drain().await;
        rx.await.unwrap_or(Ok(false))
    }

    /// Prepend a scheduled-task item for `jid`. Tasks take priority over
    /// pending message checks and stack in LIFO order among themselves.
    /// Resolves once the task (and any retries) reach a terminal outcome.
    pub async fn enqueue_task(
        &self,
        jid: &str,
        folder: &str,
        task: ScheduledTask,
        session_id: &str,
    ) -> Result<bool> {
        let rx = {
            let mut inner = self.inner.lock().await;
            let state = inner
                .groups
                .entry(jid.to_string())
                .or_insert_with(|| GroupState::new(folder));

            if let Some(max) = inner.max_depth {
                if state.tasks.len() + state.messages.len() >= max {
                    warn!(jid, max, "group queue depth watermark reached, rejecting enqueue");
                    return Ok(false);
                }
            }

            let (tx, rx) = oneshot::channel();
            state.tasks.push_front(task);
            state.task_sessions.push_front(session_id.to_string());
            state.task_completions.push_front(tx);
            rx
        };

        self.drain().await;
        rx.await.unwrap_or(Ok(false))
    }

    /// Attach the live container name for `jid` so `send_message`/
    /// `close_container` know where to write. Called via the `on_process`
    /// callback during normal processing; exposed directly for callers that
    /// spawn containers outside the queue's own drain loop.
    pub async fn register_process(&self, jid: &str, container_name: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(state) = inner.groups.get_mut(jid) {
            state.container_name = Some(container_name.to_string());
        }
    }

    /// Push an ephemeral prompt into the running container's input mailbox.
    /// Returns `false` if the group has no active container.
    pub async fn send_message(&self, jid: &str, text: &str) -> Result<bool> {
        let (folder, data_dir) = {
            let inner = self.inner.lock().await;
            match inner.groups.get(jid) {
                Some(state) if state.container_name.is_some() => {
                    (state.folder.clone(), inner.config.data_dir.clone())
                }
                _ => return Ok(false),
            }
        };

        let dir = data_dir.join("ipc").join(&folder).join("input");
        let input = IpcInput {
            text: text.to_string(),
            timestamp: Utc::now(),
        };
        crate::ipc::write(&dir, &input, None)
            .await
            .map_err(NanoGridBotError::Io)?;
        Ok(true)
    }

    /// Write the `_close` sentinel into the group's input directory.
    pub async fn close_container(&self, jid: &str) -> Result<()> {
        let (folder, data_dir) = {
            let inner = self.inner.lock().await;
            match inner.groups.get(jid) {
                Some(state) => (state.folder.clone(), inner.config.data_dir.clone()),
                None => return Ok(()),
            }
        };
        let dir = data_dir.join("ipc").join(&folder).join("input");
        crate::ipc::write_close(&dir).await.map_err(NanoGridBotError::Io)
    }

    pub async fn has_active_container(&self, jid: &str) -> bool {
        self.inner
            .lock()
            .await
            .groups
            .get(jid)
            .is_some_and(|s| s.container_name.is_some())
    }

    pub async fn get_active_count(&self) -> usize {
        self.inner.lock().await.active_count
    }

    /// Count items sitting in a group queue that have not yet been dispatched
    /// (tasks plus pending message-checks across every group).
    pub async fn get_waiting_count(&self) -> usize {
        self.inner
            .lock()
            .await
            .groups
            .values()
            .map(|s| s.tasks.len() + s.messages.len())
            .sum()
    }

    /// Write close sentinels everywhere a container is live, wait `grace_ms`,
    /// then force-kill whatever is still running.
    pub async fn shutdown(&self, grace_ms: u64) {
        let live: Vec<(String, String)> = {
            let inner = self.inner.lock().await;
            inner
                .groups
                .iter()
                .filter_map(|(jid, s)| s.container_name.clone().map(|n| (jid.clone(), n)))
                .collect()
        };

        for (jid, _) in &live {
            if let Err(e) = self.close_container(jid).await {
                warn!(jid, error = %e, "failed to write close sentinel during shutdown");
            }
        }

        tokio::time::sleep(Duration::from_millis(grace_ms)).await;

        let (still_live, runtime) = {
            let inner = self.inner.lock().await;
            let live = inner
                .groups
                .values()
                .filter_map(|s| s.container_name.clone())
                .collect::<Vec<_>>();
            (live, inner.config.container_runtime.clone())
        };

        for name in still_live {
            debug!(container = %name, "force-killing container past shutdown grace period");
            let _ = Command::new(&runtime)
                .args(["kill", &name])
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .status()
                .await;
        }
    }

    /// Non-reentrant dispatch: if capacity allows, mark the first idle group
    /// with pending work as processing and spawn its item.
    async fn drain(&self) {
        dispatch_next(self.inner.clone()).await;
    }
}

/// Pop the first eligible group's next item (if capacity allows) and spawn
/// its processing task. Called on every enqueue and again whenever a slot
/// frees up, so work keeps flowing without a caller holding a `&GroupQueue`.
async fn dispatch_next(inner: Arc<Mutex<QueueInner>>) {
    let (jid, item, config, db) = {
        let mut guard = inner.lock().await;
        if guard.active_count >= guard.max_concurrent {
            return;
        }

        let candidate = guard
            .groups
            .iter()
            .find(|(_, s)| !s.processing && !s.is_empty())
            .map(|(jid, _)| jid.clone());

        let Some(jid) = candidate else { return };
        let state = guard.groups.get_mut(&jid).unwrap();
        let Some(item) = state.pop_next() else { return };
        state.processing = true;
        guard.active_count += 1;
        (jid, item, guard.config.clone(), guard.db.clone())
    };

    tokio::spawn(async move {
        process_item(inner.clone(), config, db, jid.clone(), item).await;
        release_and_redrain(inner, jid).await;
    });
}

async fn process_item(
    inner: Arc<Mutex<QueueInner>>,
    config: Config,
    db: Arc<Database>,
    jid: String,
    item: WorkItem,
) {
    let folder = {
        let guard = inner.lock().await;
        guard
            .groups
            .get(&jid)
            .map(|s| s.folder.clone())
            .unwrap_or_default()
    };

    match item {
        WorkItem::Task {
            task,
            session_id,
            completion,
        } => {
            let mut outcome: Result<bool> = Ok(false);
            for attempt in 0..=MAX_RETRIES {
                let callbacks = Arc::new(QueueCallbacks {
                    inner: inner.clone(),
                    jid: jid.clone(),
                });
                let result = run_container_agent(
                    &folder,
                    &task.prompt,
                    &session_id,
                    &jid,
                    false,
                    &[],
                    None,
                    &HashMap::new(),
                    &config,
                    &db,
                    callbacks,
                )
                .await;

                let succeeded = matches!(&result, Ok(o) if o.is_success());
                if succeeded {
                    debug!(jid, attempt, "scheduled task succeeded");
                    outcome = Ok(true);
                    break;
                }

                if attempt < MAX_RETRIES {
                    let delay = retry_delay(attempt);
                    warn!(jid, attempt, delay, "scheduled task failed, retrying same item");
                    tokio::time::sleep(Duration::from_secs(delay)).await;
                } else {
                    error!(jid, "scheduled task exhausted retries, giving up");
                    outcome = match result {
                        Err(e) => Err(e),
                        Ok(_) => Ok(false),
                    };
                }
            }
            let _ = completion.send(outcome);
        }
        WorkItem::Message {
            session_id,
            last_timestamp,
            attempt,
            completion,
        } => {
            let prompt = format!(
                "Check messages{}",
                last_timestamp
                    .as_deref()
                    .map(|t| format!(" since {t}"))
                    .unwrap_or_default()
            );
            let callbacks = Arc::new(QueueCallbacks {
                inner: inner.clone(),
                jid: jid.clone(),
            });
            let result = run_container_agent(
                &folder,
                &prompt,
                &session_id,
                &jid,
                false,
                &[],
                None,
                &HashMap::new(),
                &config,
                &db,
                callbacks,
            )
            .await;

            let succeeded = matches!(&result, Ok(o) if o.is_success());
            if succeeded {
                debug!(jid, attempt, "message check succeeded");
                let _ = completion.send(Ok(true));
            } else if attempt < MAX_RETRIES {
                let delay = retry_delay(attempt);
                warn!(
                    jid,
                    attempt, delay, "message check failed, releasing slot and retrying after backoff"
                );
                schedule_message_retry(
                    inner.clone(),
                    jid.clone(),
                    folder.clone(),
                    session_id,
                    last_timestamp,
                    attempt + 1,
                    delay,
                    completion,
                );
            } else {
                error!(jid, "message check exhausted retries, giving up");
                let outcome = match result {
                    Err(e) => Err(e),
                    Ok(_) => Ok(false),
                };
                let _ = completion.send(outcome);
            }
            // Message checks release the slot unconditionally after each
            // attempt: a retry re-enters the group's queue as a fresh item
            // instead of holding the slot across the backoff sleep, unlike
            // scheduled tasks, which retry inline while still processing.
        }
    }
}

/// Sleep out `delay_secs`, then re-enqueue the same logical message-check as
/// a fresh `WorkItem` at `next_attempt`, carrying the original `completion`
/// sender through so it still fires exactly once for the whole retry chain.
fn schedule_message_retry(
    inner: Arc<Mutex<QueueInner>>,
    jid: String,
    folder: String,
    session_id: String,
    last_timestamp: Option<String>,
    next_attempt: u32,
    delay_secs: u64,
    completion: Completion,
) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(delay_secs)).await;
        {
            let mut guard = inner.lock().await;
            let state = guard
                .groups
                .entry(jid.clone())
                .or_insert_with(|| GroupState::new(&folder));
            state.messages.push_back(PendingMessage {
                session_id,
                last_timestamp,
                attempt: next_attempt,
                completion,
            });
        }
        dispatch_next(inner).await;
    });
}

async fn release_and_redrain(inner: Arc<Mutex<QueueInner>>, jid: String) {
    {
        let mut guard = inner.lock().await;
        if let Some(state) = guard.groups.get_mut(&jid) {
            state.processing = false;
            state.container_name = None;
        }
        guard.active_count = guard.active_count.saturating_sub(1);
    }
    dispatch_next(inner).await;
}

/// Exponential backoff for scheduled-task and message-check retries:
/// `5 * 2^attempt` seconds.
fn retry_delay(attempt: u32) -> u64 {
    5 * 2u64.pow(attempt)
}
