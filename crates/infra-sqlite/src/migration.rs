// Migration Runner

use crate::error::map_sqlx_error;
use dispatch_core::error::Result;
use sqlx::SqlitePool;
use tracing::info;

/// One embedded schema step; each file records its own version row
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "invoices and submission queue",
        sql: include_str!("../migrations/001_initial_schema.sql"),
    },
    Migration {
        version: 2,
        name: "queue outcome log",
        sql: include_str!("../migrations/002_queue_outcomes.sql"),
    },
];

/// Bring the schema up to the latest version
///
/// Pending steps run in order, each in its own transaction.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current = schema_version(pool).await?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > current).collect();

    if pending.is_empty() {
        info!(schema_version = current, "Schema up to date");
        return Ok(());
    }

    for migration in pending {
        info!(
            version = migration.version,
            name = migration.name,
            "Applying migration"
        );
        apply(pool, migration.sql).await?;
    }

    info!(schema_version = schema_version(pool).await?, "Migrations applied");
    Ok(())
}

/// Highest applied version, 0 on a fresh database
async fn schema_version(pool: &SqlitePool) -> Result<i64> {
    let has_table: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_version')",
    )
    .fetch_one(pool)
    .await
    .map_err(map_sqlx_error)?;

    if !has_table {
        return Ok(0);
    }

    let version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
        .fetch_one(pool)
        .await
        .map_err(map_sqlx_error)?;
    Ok(version.unwrap_or(0))
}

/// Statements of a migration file, `--` comment lines dropped
fn statements(sql: &str) -> impl Iterator<Item = String> + '_ {
    sql.split(';')
        .map(|chunk| {
            chunk
                .lines()
                .filter(|line| !line.trim_start().starts_with("--"))
                .collect::<Vec<_>>()
                .join("\n")
                .trim()
                .to_string()
        })
        .filter(|stmt| !stmt.is_empty())
}

async fn apply(pool: &SqlitePool, sql: &str) -> Result<()> {
    let mut tx = pool.begin().await.map_err(map_sqlx_error)?;
    for stmt in statements(sql) {
        sqlx::query(&stmt)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
    }
    tx.commit().await.map_err(map_sqlx_error)
}
