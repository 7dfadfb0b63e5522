//! Database connection and pool management.
//!
//! Connects SeaORM to Postgres (production) or SQLite (tests, local dry runs).
//! Every connection, retried or not, is built by [`connect_options`].

use anyhow::{Context, Result};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, Statement};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::AppConfig;

/// Connection attempts made by [`init_pool`] before giving up.
const CONNECT_ATTEMPTS: u32 = 5;

/// Delay before the second attempt; doubles after each failure.
const FIRST_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Failed to connect to database after {attempts} attempt(s): {source}")]
    ConnectionFailed {
        attempts: u32,
        #[source]
        source: DbErr,
    },
    #[error("Database URL cannot be empty")]
    MissingUrl,
}

/// Open the application pool, retrying transient connection failures with
/// exponential backoff.
///
/// ```no_run
/// use triage::{config::AppConfig, db::init_pool};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let db = init_pool(&AppConfig::default()).await?;
///     Ok(())
/// }
/// ```
pub async fn init_pool(cfg: &AppConfig) -> Result<DatabaseConnection> {
    let options = connect_options(
        &cfg.database_url,
        cfg.db_max_connections,
        cfg.db_acquire_timeout_ms,
    )?;
    Ok(connect_with_retry(options, CONNECT_ATTEMPTS).await?)
}

/// Single connection attempt, used by tests and tooling.
///
/// Each pooled connection to `sqlite::memory:` is its own database, so tests
/// pass `max_connections = 1`.
pub async fn connect(url: &str, max_connections: u32) -> Result<DatabaseConnection, DatabaseError> {
    connect_with_retry(connect_options(url, max_connections, 5_000)?, 1).await
}

async fn connect_with_retry(
    options: ConnectOptions,
    attempts: u32,
) -> Result<DatabaseConnection, DatabaseError> {
    let attempts = attempts.max(1);
    let mut delay = FIRST_RETRY_DELAY;
    let mut attempt = 1;

    loop {
        match Database::connect(options.clone()).await {
            Ok(conn) => {
                info!(attempt, "Connected to database");
                return Ok(conn);
            }
            Err(source) if attempt >= attempts => {
                return Err(DatabaseError::ConnectionFailed { attempts, source });
            }
            Err(err) => {
                warn!(
                    attempt,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %err,
                    "Database connection failed, retrying"
                );
                sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
        }
    }
}

fn connect_options(
    url: &str,
    max_connections: u32,
    acquire_timeout_ms: u64,
) -> Result<ConnectOptions, DatabaseError> {
    if url.trim().is_empty() {
        return Err(DatabaseError::MissingUrl);
    }

    let mut opt = ConnectOptions::new(url);
    opt.max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_millis(acquire_timeout_ms))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);

    // In-memory SQLite lives only as long as its connection.
    if !url.contains(":memory:") {
        opt.idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800));
    }

    Ok(opt)
}

/// `SELECT 1` against the pool.
pub async fn health_check(db: &DatabaseConnection) -> Result<()> {
    let stmt = Statement::from_string(db.get_database_backend(), "SELECT 1".to_string());
    db.query_one(stmt)
        .await
        .context("Database health check failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_url_is_rejected_before_connecting() {
        let config = AppConfig {
            database_url: "  ".to_string(),
            ..AppConfig::default()
        };

        let err = init_pool(&config).await.unwrap_err();
        assert!(matches!(
            err.downcast::<DatabaseError>(),
            Ok(DatabaseError::MissingUrl)
        ));
    }

    #[tokio::test]
    async fn init_pool_opens_sqlite_memory() {
        let config = AppConfig {
            database_url: "sqlite::memory:".to_string(),
            db_max_connections: 1,
            ..AppConfig::default()
        };

        let db = init_pool(&config).await.unwrap();
        health_check(&db).await.unwrap();
    }

    #[tokio::test]
    async fn single_attempt_reports_attempt_count() {
        let err = connect("sqlite:///nonexistent-triage-dir/nested/triage.db", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::ConnectionFailed { attempts: 1, .. }));
    }
}
