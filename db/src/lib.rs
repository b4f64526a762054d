mod messages;

pub use messages::*;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

pub const MEMORY_DB: &str = ":memory:";

/// Open the message store at `db_path` (created if missing) and make sure the
/// schema exists. `:memory:` opens a private in-memory database held by a
/// single connection.
pub async fn init_pool(db_path: &str) -> anyhow::Result<SqlitePool> {
    let pool = if db_path == MEMORY_DB {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?
    } else {
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&format!("sqlite:{}?mode=rwc", db_path))
            .await?
    };

    init_schema(&pool).await?;
    Ok(pool)
}

/// Create the `messages` table and its index if they do not exist yet.
pub async fn init_schema(pool: &SqlitePool) -> anyhow::Result<()> {
    for stmt in include_str!("../../migrations/001_messages.sql").split(';') {
        let stmt = stmt.trim();
        if !stmt.is_empty() {
            sqlx::query(stmt).execute(pool).await?;
        }
    }
    Ok(())
}
