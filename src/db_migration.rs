use crate::errors::{DbError, DbResult};
use sqlx::{query, query_scalar, SqlitePool};

// Embed all migration SQL files at compile time
const MIGRATION_BASIC: &str = include_str!("../migrations/20240801000000_basic.sql");

// List of migrations with their names and SQL content, applied in order
const MIGRATIONS: &[(&str, &str)] = &[("20240801000000_basic.sql", MIGRATION_BASIC)];

/// Apply all pending migrations against the given pool.
pub async fn initialize_database(pool: &SqlitePool) -> DbResult<()> {
    create_migrations_table(pool).await?;

    for (name, sql) in MIGRATIONS {
        if is_applied(pool, name).await? {
            continue;
        }

        log::info!("Applying migration {}", name);
        apply_migration(pool, name, sql).await?;
    }

    Ok(())
}

async fn create_migrations_table(pool: &SqlitePool) -> DbResult<()> {
    query(
        "CREATE TABLE IF NOT EXISTS _migrations (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn is_applied(pool: &SqlitePool, name: &str) -> DbResult<bool> {
    let count: i64 = query_scalar("SELECT COUNT(*) FROM _migrations WHERE name = ?")
        .bind(name)
        .fetch_one(pool)
        .await?;

    Ok(count > 0)
}

async fn apply_migration(pool: &SqlitePool, name: &str, sql: &str) -> DbResult<()> {
    let mut tx = pool.begin().await?;

    // SQLite executes one statement at a time; split on the terminator
    for statement in sql.split(';') {
        let statement = statement.trim();
        if statement.is_empty() {
            continue;
        }
        query(statement)
            .execute(&mut *tx)
            .await
            .map_err(|e| DbError::Migration(format!("{}: {}", name, e)))?;
    }

    query("INSERT INTO _migrations (name, applied_at) VALUES (?, ?)")
        .bind(name)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}
