//! Transactional user provisioning.
//!
//! All statements of one creation request run inside a single transaction.
//! Either every statement applies or none does: a failure rolls the whole
//! transaction back, and an uncommitted `sqlx::Transaction` is rolled back when
//! dropped on any other early return.

use crate::db::context::RequestContext;
use crate::db::statement::{StatementContext, split_statements};
use crate::error::{DbError, DbResult};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Run the creation statements for `username` as one transaction.
///
/// `commands` must already be free of blank entries; see
/// [`remove_empty`](crate::db::statement::remove_empty).
pub async fn create_user(
    ctx: &RequestContext,
    pool: &PgPool,
    username: &str,
    password: &str,
    expiration: DateTime<Utc>,
    commands: &[String],
) -> DbResult<()> {
    if commands.is_empty() {
        return Err(DbError::EmptyStatement);
    }

    let start = Instant::now();
    let mut tx = ctx
        .run("begin transaction", async {
            pool.begin()
                .await
                .map_err(|e| DbError::from_pool(e, pool.options().get_acquire_timeout()))
        })
        .await
        .map_err(|e| e.context("failed to start a transaction"))?;

    let mut executed = 0usize;
    for stmt in commands {
        for query in split_statements(stmt, ';') {
            let statement_ctx = StatementContext::new(username, password, &expiration);
            let rendered = statement_ctx.render(&query);

            debug!(username = %username, query = %query, "Executing creation statement");

            let result = ctx
                .run("execute statement", async {
                    // Prepared, so a statement can never carry a second command.
                    sqlx::query(&rendered)
                        .persistent(false)
                        .execute(&mut *tx)
                        .await
                        .map(|_| ())
                        .map_err(DbError::from)
                })
                .await;

            if let Err(e) = result {
                warn!(
                    username = %username,
                    query = %query,
                    error = %e,
                    "Creation statement failed, rolling back"
                );
                let rollback = ctx
                    .run("rollback", async { tx.rollback().await.map_err(DbError::from) })
                    .await;
                if let Err(rollback_err) = rollback {
                    debug!(error = %rollback_err, "Rollback failed");
                }
                return Err(DbError::statement(
                    &e,
                    query,
                    statement_ctx.masked_values(),
                ));
            }
            executed += 1;
        }
    }

    ctx.run("commit", async { tx.commit().await.map_err(DbError::from) })
        .await
        .map_err(|e| e.context("failed to commit transaction"))?;

    info!(
        username = %username,
        statements = executed,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "User provisioned"
    );
    Ok(())
}
