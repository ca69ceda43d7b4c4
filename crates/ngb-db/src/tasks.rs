use chrono::{DateTime, Utc};

use ngb_types::{NanoGridBotError, Result, ScheduleType, ScheduledTask, TaskStatus};

use crate::connection::Database;

/// Repository for scheduled task storage and retrieval.
pub struct TaskRepository<'a> {
    db: &'a Database,
}

impl<'a> TaskRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Save or update a task. Returns the task ID.
    pub async fn save_task(&self, task: &ScheduledTask) -> Result<i64> {
        let schedule_type = serde_json::to_value(task.schedule_type)
            .unwrap()
            .as_str()
            .unwrap_or("cron")
            .to_string();
        let status = serde_json::to_value(task.status)
            .unwrap()
            .as_str()
            .unwrap_or("active")
            .to_string();
        let next_run = task.next_run.map(|dt| dt.to_rfc3339());

        if task.id.is_none() {
            // Insert
            let result = sqlx::query(
                "INSERT INTO tasks
                 (group_folder, prompt, schedule_type, schedule_value, status, next_run, context_mode, target_chat_jid)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&task.group_folder)
            .bind(&task.prompt)
            .bind(&schedule_type)
            .bind(&task.schedule_value)
            .bind(&status)
            .bind(&next_run)
            .bind(&task.context_mode)
            .bind(&task.target_chat_jid)
            .execute(self.db.pool())
            .await
            .map_err(|e| NanoGridBotError::Database(format!("Insert task: {e}")))?;

            Ok(result.last_insert_rowid())
        } else {
            // Update
            sqlx::query(
                "UPDATE tasks
                 SET group_folder = ?, prompt = ?, schedule_type = ?, schedule_value = ?,
                     status = ?, next_run = ?, context_mode = ?, target_chat_jid = ?
                 WHERE id = ?",
            )
            .bind(&task.group_folder)
            .bind(&task.prompt)
            .bind(&schedule_type)
            .bind(&task.schedule_value)
            .bind(&status)
            .bind(&next_run)
            .bind(&task.context_mode)
            .bind(&task.target_chat_jid)
            .bind(task.id.unwrap())
            .execute(self.db.pool())
            .await
            .map_err(|e| NanoGridBotError::Database(format!("Update task: {e}")))?;

            Ok(task.id.unwrap())
        }
    }

    /// Get a task by ID.
    pub async fn get_task(&self, task_id: i64) -> Result<Option<ScheduledTask>> {
        let row: Option<TaskRow> = sqlx::query_as(
            "SELECT id, group_folder, prompt, schedule_type, schedule_value,
                    status, next_run, context_mode, target_chat_jid
             FROM tasks WHERE id = ?",
        )
        .bind(task_id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| NanoGridBotError::Database(format!("Get task: {e}")))?;

        Ok(row.map(row_to_task))
    }

    /// Get all active tasks.
    pub async fn get_active(&self) -> Result<Vec<ScheduledTask>> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            "SELECT id, group_folder, prompt, schedule_type, schedule_value,
                    status, next_run, context_mode, target_chat_jid
             FROM tasks WHERE status = 'active'
             ORDER BY next_run ASC",
        )
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| NanoGridBotError::Database(format!("Get active tasks: {e}")))?;

        Ok(rows.into_iter().map(row_to_task).collect())
    }

    /// Get all tasks.
    pub async fn get_all(&self) -> Result<Vec<ScheduledTask>> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            "SELECT id, group_folder, prompt, schedule_type, schedule_value,
                    status, next_run, context_mode, target_chat_jid
             FROM tasks ORDER BY next_run ASC",
        )
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| NanoGridBotError::Database(format!("Get all tasks: {e}")))?;

        Ok(rows.into_iter().map(row_to_task).collect())
    }

    /// Get tasks by group folder.
    pub async fn get_by_group(&self, group_folder: &str) -> Result<Vec<ScheduledTask>> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            "SELECT id, group_folder, prompt, schedule_type, schedule_value,
                    status, next_run, context_mode, target_chat_jid
             FROM tasks WHERE group_folder = ?
             ORDER BY next_run ASC",
        )
        .bind(group_folder)
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| NanoGridBotError::Database(format!("Get tasks by group: {e}")))?;

        Ok(rows.into_iter().map(row_to_task).collect())
    }

    /// Update task status.
    pub async fn update_status(&self, task_id: i64, status: TaskStatus) -> Result<bool> {
        let status_str = serde_json::to_value(status)
            .unwrap()
            .as_str()
            .unwrap_or("active")
            .to_string();

        let result = sqlx::query("UPDATE tasks SET status = ? WHERE id = ?")
            .bind(&status_str)
            .bind(task_id)
            .execute(self.db.pool())
            .await
            .map_err(|e| NanoGridBotError::Database(format!("Update task status: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    /// Update task next run time.
    pub async fn update_next_run(&self, task_id: i64, next_run: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query("UPDATE tasks SET next_run = ? WHERE id = ?")
            .bind(next_run.to_rfc3339())
            .bind(task_id)
            .execute(self.db.pool())
            .await
            .map_err(|e| NanoGridBotError::Database(format!("Update next run: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a task.
    pub async fn delete_task(&self, task_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(task_id)
            .execute(self.db.pool())
            .await
            .map_err(|e| NanoGridBotError::Database(format!("Delete task: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    /// Get tasks that are due to run (active + next_run <= now).
    pub async fn get_due(&self) -> Result<Vec<ScheduledTask>> {
        let now = Utc::now().to_rfc3339();
        let rows: Vec<TaskRow> = sqlx::query_as(
            "SELECT id, group_folder, prompt, schedule_type, schedule_value,
                    status, next_run, context_mode, target_chat_jid
             FROM tasks
             WHERE status = 'active' AND next_run <= ?
             ORDER BY next_run ASC",
        )
        .bind(&now)
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| NanoGridBotError::Database(format!("Get due tasks: {e}")))?;

        Ok(rows.into_iter().map(row_to_task).collect())
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: i64,
    group_folder: String,
    prompt: String,
    schedule_type: String,
    schedule_value: String,
    status: String,
    next_run: Option<String>,
    context_mode: String,
    target_chat_jid: Option<String>,
}

fn row_to_task(row: TaskRow) -> ScheduledTask {
    let schedule_type = match row.schedule_type.as_str() {
        "interval" => ScheduleType::Interval,
        "once" => ScheduleType::Once,
        _ => ScheduleType::Cron,
    };
    let status = match row.status.as_str() {
        "paused" => TaskStatus::Paused,
        "completed" => TaskStatus::Completed,
        _ => TaskStatus::Active,
    };
    let next_run = row
        .next_run
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));

    ScheduledTask {
        id: Some(row.id),
        group_folder: row.group_folder,
        prompt: row.prompt,
        schedule_type,
        schedule_value: row.schedule_value,
        status,
        next_run,
        context_mode: row.context_mode,
        target_chat_jid: row.target_chat_jid,
    }
}
