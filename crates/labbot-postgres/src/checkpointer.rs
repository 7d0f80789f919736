use async_trait::async_trait;
use labbot_core::{
    memory::{Checkpointer, ThreadState},
    Result,
};
use sqlx::{types::Json, PgPool};
use tracing::info;

use crate::pool::db_err;

const CREATE_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS conversation_checkpoints (
    thread_id  TEXT PRIMARY KEY,
    state      JSONB NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

const LOAD_SQL: &str = "SELECT state FROM conversation_checkpoints WHERE thread_id = $1";

const SAVE_SQL: &str = r#"
INSERT INTO conversation_checkpoints (thread_id, state, updated_at)
VALUES ($1, $2, now())
ON CONFLICT (thread_id) DO UPDATE
SET state = EXCLUDED.state, updated_at = EXCLUDED.updated_at
"#;

const RESET_SQL: &str = "DELETE FROM conversation_checkpoints WHERE thread_id = $1";

/// One JSONB row per thread in `conversation_checkpoints`.
#[derive(Clone)]
pub struct PostgresCheckpointer {
    pool: PgPool,
    run_migrations: bool,
}

impl PostgresCheckpointer {
    pub fn new(pool: PgPool, disable_migrations: bool) -> Self {
        Self {
            pool,
            run_migrations: !disable_migrations,
        }
    }
}

#[async_trait]
impl Checkpointer for PostgresCheckpointer {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn open(&self) -> Result<()> {
        if self.run_migrations {
            info!("creating conversation_checkpoints table if missing");
            sqlx::query(CREATE_TABLE_SQL)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        } else {
            info!("migrations disabled, skipping checkpoint table setup");
        }
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        info!("postgres checkpointer ready");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        info!("closing postgres checkpointer");
        self.pool.close().await;
        Ok(())
    }

    async fn load(&self, thread_id: &str) -> Result<Option<ThreadState>> {
        let row: Option<Json<ThreadState>> = sqlx::query_scalar(LOAD_SQL)
            .bind(thread_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(|Json(state)| state))
    }

    async fn save(&self, thread_id: &str, state: &ThreadState) -> Result<()> {
        sqlx::query(SAVE_SQL)
            .bind(thread_id)
            .bind(Json(state))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn reset_thread(&self, thread_id: &str) -> Result<()> {
        let done = sqlx::query(RESET_SQL)
            .bind(thread_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        info!(thread_id, deleted = done.rows_affected(), "thread reset");
        Ok(())
    }
}
