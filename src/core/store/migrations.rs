//! Migration runner: numbered SQL files applied once, tracked in
//! `schema_migrations`.
//!
//! TimescaleDB's hypertable/compression/continuous-aggregate calls
//! cannot run inside a multi-statement transaction block on some
//! server versions, so a migration is first attempted transactionally
//! and, on the specific "cannot run inside a transaction block"
//! failure, re-applied statement-by-statement outside one. Either way
//! the `schema_migrations` bookkeeping row is written as a separate
//! statement afterwards, so a transactional migration that fails
//! midway leaves nothing recorded and is retried in full next run.

use sqlx::postgres::PgPool;
use tracing::info;

use crate::error::Result;

struct Migration {
    version: i32,
    filename: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        filename: "0001_markets_resolutions.sql",
        sql: include_str!("../../../migrations/0001_markets_resolutions.sql"),
    },
    Migration {
        version: 2,
        filename: "0002_timeseries_hypertables.sql",
        sql: include_str!("../../../migrations/0002_timeseries_hypertables.sql"),
    },
    Migration {
        version: 3,
        filename: "0003_continuous_aggregates.sql",
        sql: include_str!("../../../migrations/0003_continuous_aggregates.sql"),
    },
];

pub async fn run(pool: &PgPool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INT PRIMARY KEY,
            filename TEXT NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    )
    .execute(pool)
    .await?;

    for migration in MIGRATIONS {
        let already_applied: Option<(i32,)> =
            sqlx::query_as("SELECT version FROM schema_migrations WHERE version = $1")
                .bind(migration.version)
                .fetch_optional(pool)
                .await?;
        if already_applied.is_some() {
            continue;
        }

        apply(pool, migration).await?;

        sqlx::query("INSERT INTO schema_migrations (version, filename) VALUES ($1, $2)")
            .bind(migration.version)
            .bind(migration.filename)
            .execute(pool)
            .await?;

        info!(version = migration.version, filename = migration.filename, "applied migration");
    }
    Ok(())
}

async fn apply(pool: &PgPool, migration: &Migration) -> Result<()> {
    let mut tx = pool.begin().await?;
    match sqlx::raw_sql(migration.sql).execute(&mut *tx).await {
        Ok(_) => {
            tx.commit().await?;
            Ok(())
        }
        Err(sqlx::Error::Database(db_err))
            if db_err
                .message()
                .contains("cannot run inside a transaction block") =>
        {
            drop(tx);
            sqlx::raw_sql(migration.sql).execute(pool).await?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_ordered_and_contiguous() {
        for (i, m) in MIGRATIONS.iter().enumerate() {
            assert_eq!(m.version, (i + 1) as i32);
        }
    }

    #[test]
    fn migration_bodies_are_non_empty() {
        for m in MIGRATIONS {
            assert!(!m.sql.trim().is_empty(), "{} is empty", m.filename);
        }
    }
}
