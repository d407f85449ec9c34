//! Session memory
//!
//! Keeps per-session conversation history so follow-up questions can reuse
//! the previous intent and entities. Histories live in process memory, or in
//! Postgres when a database URL is configured.

pub mod store;

pub use store::{ConversationHistory, ConversationMessage, MessageRole};

use crate::classifier::TurnContext;
use crate::error::ForecastError;
use crate::Result;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

/// Messages kept per session (user and agent turns together)
pub const MAX_SESSION_MESSAGES: usize = 20;

#[derive(Clone)]
enum MemoryBackend {
    InMemory {
        histories: Arc<RwLock<HashMap<Uuid, ConversationHistory>>>,
    },
    Postgres {
        pool: PgPool,
        schema_ready: Arc<OnceCell<()>>,
    },
}

#[derive(Clone)]
pub struct SessionMemory {
    backend: MemoryBackend,
}

impl SessionMemory {
    pub fn in_memory() -> Self {
        Self {
            backend: MemoryBackend::InMemory {
                histories: Arc::new(RwLock::new(HashMap::new())),
            },
        }
    }

    /// Postgres-backed memory when `database_url` is set and usable,
    /// in-memory otherwise.
    pub fn from_database_url(database_url: Option<&str>) -> Self {
        if let Some(url) = database_url {
            match sqlx::postgres::PgPoolOptions::new()
                .max_connections(5)
                .connect_lazy(url)
            {
                Ok(pool) => {
                    info!("session memory backend: postgres");
                    return Self {
                        backend: MemoryBackend::Postgres {
                            pool,
                            schema_ready: Arc::new(OnceCell::new()),
                        },
                    };
                }
                Err(error) => {
                    warn!(error = %error, "failed to initialize postgres memory backend, falling back to in-memory");
                }
            }
        }

        info!("session memory backend: in-memory");
        Self::in_memory()
    }

    pub fn backend_name(&self) -> &'static str {
        match self.backend {
            MemoryBackend::InMemory { .. } => "in-memory",
            MemoryBackend::Postgres { .. } => "postgres",
        }
    }

    async fn ensure_schema(pool: &PgPool, schema_ready: &OnceCell<()>) -> Result<()> {
        schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS chat_messages (
                      message_id UUID PRIMARY KEY,
                      session_id UUID NOT NULL,
                      role TEXT NOT NULL,
                      content TEXT NOT NULL,
                      context TEXT,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_chat_messages_session_time
                    ON chat_messages (session_id, created_at);
                    "#,
                )
                .execute(pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| ForecastError::DatabaseError(format!("failed to initialize session memory schema: {}", e)))?;
        Ok(())
    }

    /// History of a session; an unknown session starts empty.
    pub async fn load(&self, session_id: Uuid) -> Result<ConversationHistory> {
        match &self.backend {
            MemoryBackend::InMemory { histories } => Ok(histories
                .read()
                .await
                .get(&session_id)
                .cloned()
                .unwrap_or_else(|| ConversationHistory::new(session_id))),
            MemoryBackend::Postgres { pool, schema_ready } => {
                Self::ensure_schema(pool, schema_ready).await?;

                let rows = sqlx::query(
                    r#"
                    SELECT message_id, role, content, context, created_at
                    FROM chat_messages
                    WHERE session_id = $1
                    ORDER BY created_at ASC
                    "#,
                )
                .bind(session_id)
                .fetch_all(pool)
                .await
                .map_err(|e| ForecastError::DatabaseError(format!("failed to load session history: {}", e)))?;

                let mut history = ConversationHistory::new(session_id);
                for row in rows {
                    let role: String = row.try_get("role")?;
                    let context: Option<String> = row.try_get("context")?;
                    history.add_message(ConversationMessage {
                        message_id: row.try_get("message_id")?,
                        timestamp: row.try_get("created_at")?,
                        role: MessageRole::parse(&role),
                        content: row.try_get("content")?,
                        context: context.and_then(|raw| serde_json::from_str::<TurnContext>(&raw).ok()),
                    });
                }
                Ok(history)
            }
        }
    }

    /// Trim to [`MAX_SESSION_MESSAGES`] and persist.
    pub async fn save(&self, history: &mut ConversationHistory) -> Result<()> {
        history.trim_to_recent(MAX_SESSION_MESSAGES);

        match &self.backend {
            MemoryBackend::InMemory { histories } => {
                histories.write().await.insert(history.session_id, history.clone());
                Ok(())
            }
            MemoryBackend::Postgres { pool, schema_ready } => {
                Self::ensure_schema(pool, schema_ready).await?;

                let mut tx = pool
                    .begin()
                    .await
                    .map_err(|e| ForecastError::DatabaseError(format!("failed to begin transaction: {}", e)))?;

                sqlx::query("DELETE FROM chat_messages WHERE session_id = $1")
                    .bind(history.session_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| ForecastError::DatabaseError(format!("failed to clear session history: {}", e)))?;

                for msg in history.messages() {
                    let context = msg.context.as_ref().map(serde_json::to_string).transpose()?;
                    sqlx::query(
                        r#"
                        INSERT INTO chat_messages (message_id, session_id, role, content, context, created_at)
                        VALUES ($1, $2, $3, $4, $5, $6)
                        "#,
                    )
                    .bind(msg.message_id)
                    .bind(history.session_id)
                    .bind(msg.role.as_str())
                    .bind(&msg.content)
                    .bind(context)
                    .bind(msg.timestamp)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| ForecastError::DatabaseError(format!("failed to insert chat message: {}", e)))?;
                }

                tx.commit()
                    .await
                    .map_err(|e| ForecastError::DatabaseError(format!("failed to commit session history: {}", e)))?;
                Ok(())
            }
        }
    }
}

impl Default for SessionMemory {
    fn default() -> Self {
        Self::in_memory()
    }
}
