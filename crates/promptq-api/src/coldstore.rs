// Cold-store replicator
//
// Mirrors task records into a Greenplum-compatible warehouse table, one row
// per task id. Not part of the core's correctness: every failure here is
// logged and the queue choreography never notices.

use std::time::Duration;

use promptq_core::{ColdStoreSettings, Task};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use promptq_store::Store;

const REPLICATE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct ReplicationStats {
    new: usize,
    updated: usize,
    skipped: usize,
    errors: usize,
}

pub async fn run(store: Store, settings: ColdStoreSettings) {
    let pool = match PgPoolOptions::new()
        .max_connections(2)
        .connect(&settings.dsn())
        .await
    {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "Cold store unavailable, replicator disabled");
            return;
        }
    };

    if let Err(e) = ensure_table(&pool, &settings).await {
        tracing::error!(error = %e, "Failed to prepare cold-store table, replicator disabled");
        return;
    }
    tracing::info!(
        table = %format!("{}.{}", settings.schema, settings.table),
        "Cold-store replicator started"
    );

    loop {
        match replicate_once(&store, &pool, &settings).await {
            Ok(stats) => tracing::info!(
                new = stats.new,
                updated = stats.updated,
                skipped = stats.skipped,
                errors = stats.errors,
                "Processed stats"
            ),
            Err(e) => tracing::error!(error = %e, "Store scan error"),
        }
        tokio::time::sleep(REPLICATE_INTERVAL).await;
    }
}

async fn ensure_table(pool: &PgPool, settings: &ColdStoreSettings) -> Result<(), sqlx::Error> {
    let table = format!("{}.{}", settings.schema, settings.table);

    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            task_id TEXT,
            prompt TEXT,
            status TEXT,
            task_type TEXT,
            user_id TEXT,
            short_task_id TEXT,
            queued_at TIMESTAMP WITH TIME ZONE,
            finished_at TIMESTAMP WITH TIME ZONE,
            context TEXT,
            retries INTEGER,
            start_position INTEGER,
            current_position INTEGER,
            result_text TEXT,
            result_relevant_docs JSONB,
            error_text TEXT,
            error_relevant_docs JSONB,
            feedback TEXT,
            created_at TIMESTAMP WITH TIME ZONE DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP WITH TIME ZONE DEFAULT CURRENT_TIMESTAMP
        ) DISTRIBUTED RANDOMLY
        "#
    ))
    .execute(pool)
    .await?;

    for (suffix, column) in [("task_id", "task_id"), ("status", "status")] {
        let index = format!(
            "CREATE INDEX idx_{}_{} ON {} ({})",
            settings.table, suffix, table, column
        );
        if let Err(e) = sqlx::query(&index).execute(pool).await {
            tracing::warn!(error = %e, "Possible duplicate index");
        }
    }

    Ok(())
}

async fn replicate_once(
    store: &Store,
    pool: &PgPool,
    settings: &ColdStoreSettings,
) -> Result<ReplicationStats, promptq_store::StoreError> {
    let mut stats = ReplicationStats::default();

    for task in store.scan_tasks().await? {
        match upsert_task(pool, settings, &task).await {
            Ok(Some(true)) => stats.new += 1,
            Ok(Some(false)) => stats.updated += 1,
            Ok(None) => stats.skipped += 1,
            Err(e) => {
                tracing::error!(task_id = %task.task_id, error = %e, "Failed to replicate task");
                stats.errors += 1;
            }
        }
    }

    Ok(stats)
}

/// Replicate one task. `Ok(Some(true))` for a fresh row, `Ok(Some(false))`
/// for a rewrite, `Ok(None)` when the stored row is already final
/// (completed with neutral feedback) and is left alone.
async fn upsert_task(
    pool: &PgPool,
    settings: &ColdStoreSettings,
    task: &Task,
) -> Result<Option<bool>, sqlx::Error> {
    let table = format!("{}.{}", settings.schema, settings.table);

    let existing = sqlx::query(&format!(
        "SELECT status, feedback FROM {table} WHERE task_id = $1 LIMIT 1"
    ))
    .bind(&task.task_id)
    .fetch_optional(pool)
    .await?;

    let is_new = existing.is_none();
    if let Some(row) = existing {
        let status: Option<String> = row.try_get("status")?;
        let feedback: Option<String> = row.try_get("feedback")?;
        if status.as_deref() == Some("completed") && feedback.as_deref() == Some("neutral") {
            return Ok(None);
        }
    }

    sqlx::query(&format!("DELETE FROM {table} WHERE task_id = $1"))
        .bind(&task.task_id)
        .execute(pool)
        .await?;

    sqlx::query(&format!(
        r#"
        INSERT INTO {table} (
            task_id, prompt, status, task_type, user_id,
            short_task_id, queued_at, finished_at, context,
            retries, start_position, current_position,
            result_text, result_relevant_docs,
            error_text, error_relevant_docs, feedback
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
        "#
    ))
    .bind(&task.task_id)
    .bind(&task.prompt)
    .bind(task.status.to_string())
    .bind(task.task_type())
    .bind(&task.user_id)
    .bind(&task.short_task_id)
    .bind(task.queued_at)
    .bind(task.finished_at)
    .bind(&task.context)
    .bind(task.retries as i32)
    .bind(task.start_position as i32)
    .bind(task.current_position as i32)
    .bind(&task.result.text)
    .bind(serde_json::json!(task.result.relevant_docs))
    .bind(&task.error.text)
    .bind(serde_json::json!(task.error.relevant_docs))
    .bind(task.feedback.feedback.to_string())
    .execute(pool)
    .await?;

    Ok(Some(is_new))
}
