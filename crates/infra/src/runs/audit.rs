use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::instrument;

use brandkit_agent::{RunAuditLog, RunAuditRecord, SinkError};

/// Terminal run records in `agent_run_audit`.
#[derive(Debug, Clone)]
pub struct PostgresRunAuditLog {
    pool: Arc<PgPool>,
}

impl PostgresRunAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl RunAuditLog for PostgresRunAuditLog {
    #[instrument(skip(self, record), fields(session_id = %record.session_id), err)]
    async fn record(&self, record: RunAuditRecord) -> Result<(), SinkError> {
        sqlx::query(
            r#"
            INSERT INTO agent_run_audit (
                session_id, user_id, brand_id, reason, tool_call_count, ended_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (session_id) DO NOTHING
            "#,
        )
        .bind(&record.session_id)
        .bind(record.user_id.as_uuid())
        .bind(record.brand_id.as_uuid())
        .bind(&record.reason)
        .bind(record.tool_call_count as i32)
        .bind(record.ended_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| SinkError::new("run audit", format!("insert failed: {e}")))?;
        Ok(())
    }
}
