use common::models::{CapturedMessage, Role};
use sqlx::sqlite::SqlitePool;

pub struct NewMessage<'a> {
    pub session_id: &'a str,
    pub role: &'a Role,
    pub content: &'a str,
    pub model: &'a str,
}

/// Append one message to the log and return its row id.
pub async fn append_message(pool: &SqlitePool, msg: &NewMessage<'_>) -> anyhow::Result<i64> {
    let result = sqlx::query(
        "INSERT INTO messages (session_id, role, content, model) VALUES (?, ?, ?, ?)",
    )
    .bind(msg.session_id)
    .bind(msg.role.as_str())
    .bind(msg.content)
    .bind(msg.model)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn list_messages(
    pool: &SqlitePool,
    session_id: &str,
) -> anyhow::Result<Vec<CapturedMessage>> {
    Ok(sqlx::query_as::<_, CapturedMessage>(
        "SELECT id, session_id, role, content, model, CAST(timestamp AS TEXT) AS timestamp \
         FROM messages WHERE session_id = ? ORDER BY id ASC",
    )
    .bind(session_id)
    .fetch_all(pool)
    .await?)
}

pub async fn count_messages(pool: &SqlitePool, session_id: &str) -> anyhow::Result<i64> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages WHERE session_id = ?")
        .bind(session_id)
        .fetch_one(pool)
        .await?;
    Ok(row.0)
}
