use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{Duration, Utc};
use ngb_config::Config;
use ngb_db::{Database, TaskRepository};
use ngb_types::{NanoGridBotError, Result, ScheduleType, ScheduledTask, TaskStatus};
use regex::Regex;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::group_queue::GroupQueue;

/// CRON/INTERVAL/ONCE task scheduler.
///
/// Periodically checks for due tasks and enqueues them into the GroupQueue.
/// `start`/`stop` take `&self` (the join handle lives behind a mutex) so a
/// single `Arc<TaskScheduler>` can be shared with the IPC watcher for
/// task-directive dispatch while the orchestrator still drives its lifecycle.
pub struct TaskScheduler {
    db: Arc<Database>,
    queue: Arc<GroupQueue>,
    poll_secs: u64,
    running: Arc<AtomicBool>,
    task_handle: Mutex<Option<JoinHandle<()>>>,
}

impl TaskScheduler {
    /// Create a new scheduler, polling every `config.scheduler_poll_secs`.
    pub fn new(db: Arc<Database>, queue: Arc<GroupQueue>, config: &Config) -> Self {
        Self {
            db,
            queue,
            poll_secs: config.scheduler_poll_secs,
            running: Arc::new(AtomicBool::new(false)),
            task_handle: Mutex::new(None),
        }
    }

    /// Start the scheduler background loop.
    pub async fn start(&self) {
        if self.running.load(Ordering::SeqCst) {
            warn!("Scheduler is already running");
            return;
        }

        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let db = self.db.clone();
        let queue = self.queue.clone();
        let poll_secs = self.poll_secs;

        let handle = tokio::spawn(async move {
            info!(poll_secs, "Task scheduler started");
            while running.load(Ordering::SeqCst) {
                if let Err(e) = check_and_enqueue_due_tasks(&db, &queue).await {
                    error!(error = %e, "Scheduler tick failed");
                }
                tokio::time::sleep(std::time::Duration::from_secs(poll_secs)).await;
            }
            info!("Task scheduler stopped");
        });

        *self.task_handle.lock().await = Some(handle);
    }

    /// Stop the scheduler.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.task_handle.lock().await.take() {
            handle.abort();
        }
        info!("Task scheduler stop requested");
    }

    /// Check if the scheduler is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Schedule a new task: calculate its next_run and save to DB.
    pub async fn schedule_task(&self, mut task: ScheduledTask) -> Result<i64> {
        let next_run = calculate_next_run(&task)?;
        task.next_run = next_run;
        task.status = TaskStatus::Active;

        let repo = TaskRepository::new(&self.db);
        let id = repo.save_task(&task).await?;
        info!(
            task_id = id,
            next_run = ?task.next_run,
            "Task scheduled"
        );
        Ok(id)
    }

    /// Cancel (delete) a task.
    pub async fn cancel_task(&self, task_id: i64) -> Result<bool> {
        let repo = TaskRepository::new(&self.db);
        let deleted = repo.delete_task(task_id).await?;
        if deleted {
            info!(task_id, "Task cancelled");
        }
        Ok(deleted)
    }

    /// Pause a task.
    pub async fn pause_task(&self, task_id: i64) -> Result<bool> {
        let repo = TaskRepository::new(&self.db);
        let updated = repo.update_status(task_id, TaskStatus::Paused).await?;
        if updated {
            info!(task_id, "Task paused");
        }
        Ok(updated)
    }

    /// Resume a paused task (re-calculate next_run).
    pub async fn resume_task(&self, task_id: i64) -> Result<bool> {
        let repo = TaskRepository::new(&self.db);
        if let Some(mut task) = repo.get_task(task_id).await? {
            task.status = TaskStatus::Active;
            let next_run = calculate_next_run(&task)?;
            task.next_run = next_run;
            repo.save_task(&task).await?;
            info!(task_id, next_run = ?task.next_run, "Task resumed");
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

/// Capability the IPC watcher's task-mailbox drain dispatches the four task
/// directive kinds through, without depending on `TaskScheduler` directly.
pub trait TaskDirectiveHandler: Send + Sync {
    fn schedule_task(
        &self,
        task: ScheduledTask,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<i64>> + Send + '_>>;

    fn pause_task(
        &self,
        task_id: i64,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<bool>> + Send + '_>>;

    fn resume_task(
        &self,
        task_id: i64,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<bool>> + Send + '_>>;

    fn cancel_task(
        &self,
        task_id: i64,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<bool>> + Send + '_>>;
}

impl TaskDirectiveHandler for TaskScheduler {
    fn schedule_task(
        &self,
        task: ScheduledTask,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<i64>> + Send + '_>> {
        Box::pin(TaskScheduler::schedule_task(self, task))
    }

    fn pause_task(
        &self,
        task_id: i64,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<bool>> + Send + '_>> {
        Box::pin(TaskScheduler::pause_task(self, task_id))
    }

    fn resume_task(
        &self,
        task_id: i64,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<bool>> + Send + '_>> {
        Box::pin(TaskScheduler::resume_task(self, task_id))
    }

    fn cancel_task(
        &self,
        task_id: i64,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<bool>> + Send + '_>> {
        Box::pin(TaskScheduler::cancel_task(self, task_id))
    }
}

/// Check for due tasks and enqueue them into the GroupQueue.
async fn check_and_enqueue_due_tasks(db: &Database, queue: &GroupQueue) -> Result<()> {
    let repo = TaskRepository::new(db);
    let due_tasks = repo.get_due().await?;

    if due_tasks.is_empty() {
        return Ok(());
    }

    debug!(count = due_tasks.len(), "Found due tasks");

    for task in due_tasks {
        let task_id = task.id.unwrap_or(0);
        let jid = task
            .target_chat_jid
            .clone()
            .unwrap_or_else(|| format!("task:{}", task.group_folder));

        // Enqueue the task
        if let Err(e) = queue
            .enqueue_task(&jid, &task.group_folder, task.clone(), "scheduler")
            .await
        {
            error!(task_id, error = %e, "Failed to enqueue due task");
            continue;
        }

        // Update next_run based on schedule type
        match task.schedule_type {
            ScheduleType::Once => {
                // One-shot: mark as completed
                repo.update_status(task_id, TaskStatus::Completed).await?;
            }
            _ => {
                // Recurring: calculate next run
                if let Some(next) = calculate_next_run(&task)? {
                    repo.update_next_run(task_id, next).await?;
                }
            }
        }
    }

    Ok(())
}

/// Calculate the next run time for a task based on its schedule type.
pub fn calculate_next_run(task: &ScheduledTask) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
    match task.schedule_type {
        ScheduleType::Cron => calculate_cron_next(&task.schedule_value),
        ScheduleType::Interval => calculate_interval_next(&task.schedule_value),
        ScheduleType::Once => {
            if let Some(next) = task.next_run {
                if next > Utc::now() {
                    Ok(Some(next))
                } else {
                    Ok(None)
                }
            } else {
                // Schedule for immediate execution
                Ok(Some(Utc::now()))
            }
        }
    }
}

/// Convert 5-field cron to 7-field and calculate next occurrence.
///
/// Rust `cron` crate uses 7-field format: sec min hour dom month dow year.
/// Standard user input is 5-field: min hour dom month dow.
/// We prepend "0" (second) and append "*" (year).
fn calculate_cron_next(expr: &str) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    let normalized = fields.join(" ");
    let cron_expr = match fields.len() {
        5 => format!("0 {normalized} *"), // 5→7: prepend sec, append year
        6 => format!("{normalized} *"),   // 6→7: append year
        7 => normalized,                  // Already 7-field
        _ => {
            return Err(NanoGridBotError::Config(format!(
                "Invalid cron expression (expected 5-7 fields): {expr}"
            )));
        }
    };

    let schedule = cron::Schedule::from_str(&cron_expr).map_err(|e| {
        NanoGridBotError::Config(format!("Invalid cron expression '{cron_expr}': {e}"))
    })?;

    Ok(schedule.upcoming(Utc).next())
}

/// Parse interval expressions like "60s", "5m", "2h", "1d".
fn calculate_interval_next(value: &str) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
    let re = Regex::new(r"^(\d+)([smhd])$").unwrap();
    if let Some(caps) = re.captures(value.trim()) {
        let amount: i64 = caps[1]
            .parse()
            .map_err(|_| NanoGridBotError::Config(format!("Invalid interval amount: {value}")))?;

        let duration = match &caps[2] {
            "s" => Duration::seconds(amount),
            "m" => Duration::minutes(amount),
            "h" => Duration::hours(amount),
            "d" => Duration::days(amount),
            _ => unreachable!(),
        };

        Ok(Some(Utc::now() + duration))
    } else {
        // Try plain number as seconds
        if let Ok(secs) = value.trim().parse::<i64>() {
            Ok(Some(Utc::now() + Duration::seconds(secs)))
        } else {
            Err(NanoGridBotError::Config(format!(
                "Invalid interval expression: {value}. Expected format: 60s, 5m, 2h, 1d"
            )))
        }
    }
}
