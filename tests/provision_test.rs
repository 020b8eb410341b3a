//! Integration tests for user provisioning against a live YugabyteDB.
//!
//! Set TEST_YUGABYTE_HOST to run them. TEST_YUGABYTE_PORT, TEST_YUGABYTE_USER,
//! TEST_YUGABYTE_PASSWORD and TEST_YUGABYTE_DB default to a local
//! `yugabyted` node (5433, yugabyte/yugabyte, database yugabyte).
//! Example: TEST_YUGABYTE_HOST=127.0.0.1 cargo test --test provision_test

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use serde_json::{Map, Value, json};
use sqlx::PgPool;
use yugabyte_dbplugin::db::RequestContext;
use yugabyte_dbplugin::models::{InitializeRequest, NewUserRequest, Statements, UsernameMetadata};
use yugabyte_dbplugin::{DbError, YugabyteDb};

fn live_config(username_template: &str) -> Option<Map<String, Value>> {
    let host = match std::env::var("TEST_YUGABYTE_HOST") {
        Ok(host) => host,
        Err(_) => {
            eprintln!("Skipping test: TEST_YUGABYTE_HOST not set");
            return None;
        }
    };
    let var = |name: &str, default: &str| std::env::var(name).unwrap_or_else(|_| default.into());

    match json!({
        "host": host,
        "port": var("TEST_YUGABYTE_PORT", "5433"),
        "username": var("TEST_YUGABYTE_USER", "yugabyte"),
        "password": var("TEST_YUGABYTE_PASSWORD", "yugabyte"),
        "db": var("TEST_YUGABYTE_DB", "yugabyte"),
        "username_template": username_template,
    }) {
        Value::Object(map) => Some(map),
        _ => unreachable!(),
    }
}

async fn plugin(config: Map<String, Value>) -> YugabyteDb {
    let db = YugabyteDb::new();
    db.initialize(
        &RequestContext::background(),
        InitializeRequest {
            config,
            verify_connection: true,
        },
    )
    .await
    .unwrap();
    db
}

async fn role_exists(pool: &PgPool, name: &str) -> bool {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pg_roles WHERE rolname = $1")
        .bind(name)
        .fetch_one(pool)
        .await
        .unwrap();
    count > 0
}

fn request(role_name: &str, statements: &[&str]) -> NewUserRequest {
    NewUserRequest {
        username_config: UsernameMetadata::new("integration", role_name),
        statements: Statements::new(statements.iter().copied()),
        password: "Pr0v1s10n'ed".to_string(),
        expiration: Utc::now() + ChronoDuration::hours(1),
    }
}

/// `{{expiration}}` renders as `DD-MM-YYYY HH:MM:SS AM`. A morning on the first
/// of January reads the same under every DateStyle.
fn unambiguous_expiration() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2099, 1, 1, 9, 0, 0).unwrap()
}

async fn roles_like(pool: &PgPool, pattern: &str) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM pg_roles WHERE rolname LIKE $1")
        .bind(pattern)
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_failed_statement_leaves_no_user() {
    let Some(config) = live_config("atomic_test_user") else {
        return;
    };
    let db = plugin(config).await;
    let ctx = RequestContext::with_timeout(std::time::Duration::from_secs(60));
    let pool = db.producer().connection(&ctx).await.unwrap();

    sqlx::query("DROP ROLE IF EXISTS atomic_test_user")
        .execute(&pool)
        .await
        .unwrap();

    let err = db
        .new_user(
            &ctx,
            request(
                "atomic",
                &[
                    "CREATE ROLE \"{{name}}\" WITH LOGIN PASSWORD '{{password}}'",
                    "GRANT SELECT ON ALL TABLES IN SCHEMA schema_that_does_not_exist TO \"{{name}}\"",
                ],
            ),
        )
        .await
        .unwrap_err();

    match &err {
        DbError::StatementExecution { query, values, .. } => {
            assert!(query.contains("schema_that_does_not_exist"));
            assert_eq!(values.get("password").map(String::as_str), Some("[password]"));
            assert_eq!(
                values.get("username").map(String::as_str),
                Some("atomic_test_user")
            );
        }
        other => panic!("expected statement error, got {other:?}"),
    }
    assert!(!err.to_string().contains("Pr0v1s10n"));

    assert!(!role_exists(&pool, "atomic_test_user").await);
    db.producer().close().await.unwrap();
}

#[tokio::test]
async fn test_new_user_creates_role() {
    let Some(config) = live_config("{{.RoleName}}_{{random 8 | lowercase}}") else {
        return;
    };
    let db = plugin(config).await;
    let ctx = RequestContext::with_timeout(std::time::Duration::from_secs(60));

    let response = db
        .new_user(
            &ctx,
            request(
                "provtest",
                &[
                    "CREATE ROLE \"{{name}}\" WITH LOGIN PASSWORD '{{password}}'; \
                     COMMENT ON ROLE \"{{username}}\" IS 'expires {{expiration}}'",
                ],
            ),
        )
        .await
        .unwrap();
    assert!(response.username.starts_with("provtest_"));
    assert_eq!(response.username.len(), "provtest_".len() + 8);

    let pool = db.producer().connection(&ctx).await.unwrap();
    assert!(role_exists(&pool, &response.username).await);

    sqlx::query(&format!("DROP ROLE \"{}\"", response.username))
        .execute(&pool)
        .await
        .unwrap();
    db.producer().close().await.unwrap();
}

#[tokio::test]
async fn test_handle_is_reused_across_requests() {
    let Some(config) = live_config("reuse_{{random 10 | lowercase}}") else {
        return;
    };
    let db = plugin(config).await;
    let ctx = RequestContext::background();

    let first = db.producer().connection(&ctx).await.unwrap();
    let second = db.producer().connection(&ctx).await.unwrap();
    let one: i32 = sqlx::query_scalar("SELECT 1").fetch_one(&second).await.unwrap();
    assert_eq!(one, 1);
    assert!(!first.is_closed());

    db.producer().close().await.unwrap();
    assert!(second.is_closed());
}

#[tokio::test]
async fn test_failed_statement_in_one_entry_leaves_no_user() {
    let Some(config) = live_config("atomic_test_user") else {
        return;
    };
    let db = plugin(config).await;
    let ctx = RequestContext::with_timeout(std::time::Duration::from_secs(60));
    let pool = db.producer().connection(&ctx).await.unwrap();

    sqlx::query("DROP ROLE IF EXISTS atomic_test_user")
        .execute(&pool)
        .await
        .unwrap();

    let mut req = request(
        "atomic",
        &["CREATE ROLE {{name}} WITH LOGIN PASSWORD '{{password}}' VALID UNTIL '{{expiration}}'; \
           GRANT SELECT ON ALL TABLES IN SCHEMA schema_that_does_not_exist TO {{name}};"],
    );
    req.expiration = unambiguous_expiration();

    let err = db.new_user(&ctx, req).await.unwrap_err();
    match &err {
        DbError::StatementExecution { query, .. } => {
            assert!(query.starts_with("GRANT SELECT"), "got {query}");
        }
        other => panic!("expected statement error, got {other:?}"),
    }

    assert!(!role_exists(&pool, "atomic_test_user").await);
    db.producer().close().await.unwrap();
}

#[tokio::test]
async fn test_new_user_sets_valid_until() {
    let Some(config) = live_config("validuntil_{{random 8 | lowercase}}") else {
        return;
    };
    let db = plugin(config).await;
    let ctx = RequestContext::with_timeout(std::time::Duration::from_secs(60));

    let mut req = request(
        "validuntil",
        &["CREATE ROLE {{name}} WITH LOGIN PASSWORD '{{password}}' VALID UNTIL '{{expiration}}';"],
    );
    req.expiration = unambiguous_expiration();
    let response = db.new_user(&ctx, req).await.unwrap();

    let pool = db.producer().connection(&ctx).await.unwrap();
    let valid_until: Option<String> =
        sqlx::query_scalar("SELECT rolvaliduntil::text FROM pg_roles WHERE rolname = $1")
            .bind(&response.username)
            .fetch_one(&pool)
            .await
            .unwrap();
    let valid_until = valid_until.expect("rolvaliduntil should be set");
    assert!(valid_until.starts_with("2099-01-01"), "got {valid_until}");

    sqlx::query(&format!("DROP ROLE \"{}\"", response.username))
        .execute(&pool)
        .await
        .unwrap();
    db.producer().close().await.unwrap();
}

#[tokio::test]
async fn test_display_name_cannot_add_statements() {
    let Some(config) = live_config("") else {
        return;
    };
    let db = plugin(config).await;
    let ctx = RequestContext::with_timeout(std::time::Duration::from_secs(60));
    let pool = db.producer().connection(&ctx).await.unwrap();

    sqlx::query("DROP ROLE IF EXISTS injected_role")
        .execute(&pool)
        .await
        .unwrap();

    let mut req = request(
        "readonly",
        &["CREATE ROLE {{name}} WITH LOGIN PASSWORD '{{password}}'"],
    );
    req.username_config = UsernameMetadata::new("x; CREATE ROLE injected_role SUPERUSER; --", "readonly");

    assert!(db.new_user(&ctx, req).await.is_err());
    assert!(!role_exists(&pool, "injected_role").await);
    assert_eq!(roles_like(&pool, "v_x%").await, 0);
    db.producer().close().await.unwrap();
}

#[tokio::test]
async fn test_marker_in_password_is_not_expanded() {
    let Some(config) = live_config("marker_{{random 8 | lowercase}}") else {
        return;
    };
    let db = plugin(config).await;
    let ctx = RequestContext::with_timeout(std::time::Duration::from_secs(60));

    let mut req = request(
        "marker",
        &["CREATE ROLE {{name}} WITH LOGIN PASSWORD '{{password}}'; \
           COMMENT ON ROLE {{name}} IS '{{password}}'"],
    );
    req.password = "p{{expiration}}'x".to_string();
    let response = db.new_user(&ctx, req).await.unwrap();

    let pool = db.producer().connection(&ctx).await.unwrap();
    let comment: Option<String> = sqlx::query_scalar(
        "SELECT shobj_description(oid, 'pg_authid') FROM pg_roles WHERE rolname = $1",
    )
    .bind(&response.username)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(comment.as_deref(), Some("p{{expiration}}'x"));

    sqlx::query(&format!("DROP ROLE \"{}\"", response.username))
        .execute(&pool)
        .await
        .unwrap();
    db.producer().close().await.unwrap();
}
