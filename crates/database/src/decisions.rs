// In crates/database/src/decisions.rs

use crate::row::unsigned;
use crate::Result;
use core_types::Decision;
use sqlx::{Row, SqliteConnection};

/// Appends one audit row per cycle.
pub async fn insert(conn: &mut SqliteConnection, decision: &Decision) -> Result<i64> {
    let iteration = i64::try_from(decision.iteration).unwrap_or(i64::MAX);
    let result = sqlx::query(
        r#"
        INSERT INTO decisions (iteration, system_instruction, context, output, actions,
                               prompt_tokens, completion_tokens, success, error, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(iteration)
    .bind(&decision.system_instruction)
    .bind(&decision.context)
    .bind(&decision.output)
    .bind(&decision.actions)
    .bind(i64::from(decision.prompt_tokens))
    .bind(i64::from(decision.completion_tokens))
    .bind(decision.success)
    .bind(&decision.error)
    .bind(decision.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}

/// The highest iteration ever recorded, so a restarted scheduler continues counting.
pub async fn latest_iteration(conn: &mut SqliteConnection) -> Result<Option<u64>> {
    let row = sqlx::query("SELECT MAX(iteration) AS iteration FROM decisions")
        .fetch_one(&mut *conn)
        .await?;
    let value: Option<i64> = row.try_get("iteration")?;
    Ok(value.and_then(|v| u64::try_from(v).ok()))
}

pub async fn latest(conn: &mut SqliteConnection) -> Result<Option<Decision>> {
    let row = sqlx::query(
        "SELECT id, iteration, system_instruction, context, output, actions, prompt_tokens, \
         completion_tokens, success, error, created_at FROM decisions ORDER BY id DESC LIMIT 1",
    )
    .fetch_optional(&mut *conn)
    .await?;

    row.map(|row| -> Result<Decision> {
        Ok(Decision {
            id: row.try_get("id")?,
            iteration: unsigned(&row, "iteration")?,
            system_instruction: row.try_get("system_instruction")?,
            context: row.try_get("context")?,
            output: row.try_get("output")?,
            actions: row.try_get("actions")?,
            prompt_tokens: unsigned(&row, "prompt_tokens")?,
            completion_tokens: unsigned(&row, "completion_tokens")?,
            success: row.try_get("success")?,
            error: row.try_get("error")?,
            created_at: row.try_get("created_at")?,
        })
    })
    .transpose()
}
