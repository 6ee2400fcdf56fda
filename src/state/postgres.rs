//! Postgres-backed session store
//!
//! One row per retained turn, serialized as JSON. The schema is created
//! on first use.

use super::{ConversationState, SessionStore};
use crate::error::OrchestrationError;
use crate::models::{SessionId, Turn};
use crate::Result;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::warn;

pub struct PostgresSessionStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
    max_turns: usize,
}

fn db_error(context: &str, e: sqlx::Error) -> OrchestrationError {
    OrchestrationError::DatabaseError(format!("{}: {}", context, e))
}

fn state_error(context: &str, e: impl std::fmt::Display) -> OrchestrationError {
    OrchestrationError::StateError(format!("{}: {}", context, e))
}

fn encode_turn(turn: &Turn) -> Result<String> {
    serde_json::to_string(turn).map_err(|e| state_error("Failed to encode turn", e))
}

impl PostgresSessionStore {
    /// Builds the pool without connecting; the first query connects
    pub fn connect_lazy(url: &str, max_turns: usize) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(url)
            .map_err(|e| db_error("Failed to create postgres pool", e))?;

        Ok(Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
            max_turns: max_turns.max(1),
        })
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS session_turns (
                      turn_id UUID PRIMARY KEY,
                      session_id UUID NOT NULL,
                      turn_index BIGINT NOT NULL,
                      body TEXT NOT NULL,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_session_turns_scope_index
                    ON session_turns (session_id, turn_index);
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| db_error("Failed to initialize session schema", e))?;

        Ok(())
    }
}

#[async_trait]
impl SessionStore for PostgresSessionStore {
    async fn load(&self, session_id: SessionId) -> Result<ConversationState> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            r#"
            SELECT body, turn_index
            FROM session_turns
            WHERE session_id = $1
            ORDER BY turn_index DESC
            LIMIT $2
            "#,
        )
        .bind(session_id)
        .bind(self.max_turns as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to load session turns", e))?;

        let mut total_turns = 0u64;
        let mut turns = Vec::with_capacity(rows.len());

        for row in rows.into_iter().rev() {
            let index: i64 = row
                .try_get("turn_index")
                .map_err(|e| state_error("Malformed session row", e))?;
            let body: String = row
                .try_get("body")
                .map_err(|e| state_error("Malformed session row", e))?;

            match serde_json::from_str::<Turn>(&body) {
                Ok(turn) => turns.push(turn),
                Err(error) => {
                    warn!(%session_id, turn_index = index, %error, "Skipping unreadable turn")
                }
            }
            total_turns = total_turns.max(index.max(0) as u64 + 1);
        }

        Ok(ConversationState::restore(
            session_id,
            self.max_turns,
            turns,
            total_turns,
        ))
    }

    async fn append(&self, session_id: SessionId, turn: Turn) -> Result<ConversationState> {
        self.ensure_schema().await?;

        let body = encode_turn(&turn)?;
        let index = turn.utterance.turn_index as i64;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin session transaction", e))?;

        sqlx::query(
            r#"
            INSERT INTO session_turns (turn_id, session_id, turn_index, body, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(turn.answer.turn_id)
        .bind(session_id)
        .bind(index)
        .bind(&body)
        .bind(turn.answer.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to insert session turn", e))?;

        // Evict outside the retained window
        sqlx::query("DELETE FROM session_turns WHERE session_id = $1 AND turn_index <= $2")
            .bind(session_id)
            .bind(index - self.max_turns as i64)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to evict old session turns", e))?;

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit session transaction", e))?;

        self.load(session_id).await
    }

    async fn clear(&self, session_id: SessionId) -> Result<()> {
        self.ensure_schema().await?;

        sqlx::query("DELETE FROM session_turns WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to clear session", e))?;

        Ok(())
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}
