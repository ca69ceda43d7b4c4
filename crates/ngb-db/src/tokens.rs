use ngb_types::{AccessToken, NanoGridBotError, Result};
use uuid::Uuid;

use crate::connection::Database;

/// Repository for access token management.
pub struct TokenRepository<'a> {
    db: &'a Database,
}

impl<'a> TokenRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Create a new access token for a workspace. Returns the generated token string.
    pub async fn create_token(&self, workspace_id: &str) -> Result<String> {
        let token = format!("ngb-{}", Uuid::new_v4().simple().to_string().get(..12).unwrap());

        sqlx::query(
            "INSERT INTO access_tokens (token, workspace_id) VALUES (?, ?)",
        )
        .bind(&token)
        .bind(workspace_id)
        .execute(self.db.pool())
        .await
        .map_err(|e| NanoGridBotError::Database(format!("Create token: {e}")))?;

        Ok(token)
    }

    /// Validate a token and mark it as used. Returns the workspace_id if valid.
    pub async fn validate_and_consume(&self, token: &str) -> Result<Option<String>> {
        let row: Option<TokenRow> = sqlx::query_as(
            "SELECT token, workspace_id, used FROM access_tokens WHERE token = ?",
        )
        .bind(token)
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| NanoGridBotError::Database(format!("Validate token: {e}")))?;

        match row {
            Some(r) if r.used == 0 => {
                sqlx::query("UPDATE access_tokens SET used = 1 WHERE token = ?")
                    .bind(token)
                    .execute(self.db.pool())
                    .await
                    .map_err(|e| NanoGridBotError::Database(format!("Consume token: {e}")))?;

                Ok(Some(r.workspace_id))
            }
            _ => Ok(None),
        }
    }

    /// Get all tokens for a workspace.
    pub async fn get_by_workspace(&self, workspace_id: &str) -> Result<Vec<AccessToken>> {
        let rows: Vec<TokenRow> = sqlx::query_as(
            "SELECT token, workspace_id, used FROM access_tokens WHERE workspace_id = ?",
        )
        .bind(workspace_id)
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| NanoGridBotError::Database(format!("Get tokens by workspace: {e}")))?;

        Ok(rows
            .into_iter()
            .map(|r| AccessToken {
                token: r.token,
                workspace_id: r.workspace_id,
                used: r.used != 0,
            })
            .collect())
    }
}

#[derive(sqlx::FromRow)]
struct TokenRow {
    token: String,
    workspace_id: String,
    used: i32,
}
