//! PostgreSQL store for chat-service.

use super::store::{
    HealthProbe, ProfileDirectory, SessionStore, StoreError, UsageStore, SESSIONS_TABLE,
};
use crate::models::{NewChatMessage, NewChatSession, UsageRecord};
use async_trait::async_trait;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};

/// Name of the messages → sessions foreign key.
pub const MESSAGE_SESSION_FK: &str = "chat_messages_session_fk";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct ChatDb {
    pool: PgPool,
}

impl ChatDb {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "chat-service"))]
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

/// Translate a sqlx error into the store taxonomy.
fn store_error(operation: &str, e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::Database(ref db_err) if db_err.is_foreign_key_violation() => {
            let names_sessions = db_err.constraint() == Some(MESSAGE_SESSION_FK)
                || db_err.message().contains(SESSIONS_TABLE);
            if names_sessions {
                StoreError::missing_session()
            } else {
                StoreError::MissingParent {
                    table: db_err.table().unwrap_or("unknown").to_string(),
                }
            }
        }
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
            StoreError::Conflict(format!("{}: {}", operation, db_err.message()))
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(format!("{}: {}", operation, e))
        }
        other => StoreError::Other(format!("{}: {}", operation, other)),
    }
}

#[async_trait]
impl UsageStore for ChatDb {
    #[instrument(skip(self))]
    async fn fetch_usage(&self, user_id: &str) -> Result<Option<UsageRecord>, StoreError> {
        sqlx::query_as::<_, UsageRecord>(
            r#"
            SELECT user_id, question_count, updated_at
            FROM usage_records
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_error("fetch_usage", e))
    }

    #[instrument(skip(self))]
    async fn insert_usage(&self, user_id: &str, question_count: i32) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO usage_records (user_id, question_count, updated_at)
            VALUES ($1, $2, NOW())
            "#,
        )
        .bind(user_id)
        .bind(question_count)
        .execute(&self.pool)
        .await
        .map_err(|e| store_error("insert_usage", e))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn update_usage(&self, user_id: &str, question_count: i32) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE usage_records
            SET question_count = $2, updated_at = NOW()
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(question_count)
        .execute(&self.pool)
        .await
        .map_err(|e| store_error("update_usage", e))?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for ChatDb {
    #[instrument(skip(self, message), fields(session_id = %message.session_id, role = %message.role))]
    async fn insert_message(&self, message: &NewChatMessage) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO chat_messages (session_id, role, content)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(&message.session_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .execute(&self.pool)
        .await
        .map_err(|e| store_error("insert_message", e))?;
        Ok(())
    }

    #[instrument(skip(self, session), fields(session_id = %session.id))]
    async fn create_session(&self, session: &NewChatSession) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO chat_sessions (id, owner_id, title, locale)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&session.id)
        .bind(&session.owner_id)
        .bind(&session.title)
        .bind(&session.locale)
        .execute(&self.pool)
        .await
        .map_err(|e| store_error("create_session", e))?;

        info!(owner_id = %session.owner_id, "Chat session created");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn session_owner(&self, session_id: &str) -> Result<Option<String>, StoreError> {
        sqlx::query_scalar("SELECT owner_id FROM chat_sessions WHERE id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_error("session_owner", e))
    }

    #[instrument(skip(self))]
    async fn touch_session(&self, session_id: &str, owner_id: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE chat_sessions SET updated_at = NOW() WHERE id = $1 AND owner_id = $2")
            .bind(session_id)
            .bind(owner_id)
            .execute(&self.pool)
            .await
            .map_err(|e| store_error("touch_session", e))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn set_session_title(
        &self,
        session_id: &str,
        owner_id: &str,
        title: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE chat_sessions
            SET title = $3, updated_at = NOW()
            WHERE id = $1 AND owner_id = $2
            "#,
        )
        .bind(session_id)
        .bind(owner_id)
        .bind(title)
        .execute(&self.pool)
        .await
        .map_err(|e| store_error("set_session_title", e))?;
        Ok(())
    }
}

#[async_trait]
impl ProfileDirectory for ChatDb {
    #[instrument(skip(self))]
    async fn fetch_profile_role(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        let role: Option<Option<String>> =
            sqlx::query_scalar("SELECT role FROM profiles WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| store_error("fetch_profile_role", e))?;
        Ok(role.flatten())
    }
}

#[async_trait]
impl HealthProbe for ChatDb {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| store_error("ping", e))?;
        Ok(())
    }
}
