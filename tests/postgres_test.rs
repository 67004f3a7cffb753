//! Integration tests against a live PostgreSQL server.
//!
//! Set TEST_POSTGRES_SERVER, TEST_POSTGRES_USER, TEST_POSTGRES_PASSWORD and
//! TEST_POSTGRES_DATABASE (optionally TEST_POSTGRES_PORT) to run them.
//! Example: TEST_POSTGRES_SERVER=localhost TEST_POSTGRES_USER=postgres ...

use authdb_core::config::ConnectionDescriptor;
use authdb_core::db::{
    ConnectionManager, Diagnostics, QueryExecutor, RetryPolicy, SqlxDriver, TransactionController,
};
use authdb_core::models::QueryParameters;
use chrono::{TimeZone, Utc};
use serde_json::json;
use std::sync::Arc;

fn live_descriptor() -> Option<ConnectionDescriptor> {
    let mut vars = Vec::new();
    for (test_var, db_var) in [
        ("TEST_POSTGRES_SERVER", "DB_SERVER"),
        ("TEST_POSTGRES_USER", "DB_USER"),
        ("TEST_POSTGRES_PASSWORD", "DB_PASSWORD"),
        ("TEST_POSTGRES_DATABASE", "DB_DATABASE"),
    ] {
        vars.push((db_var.to_string(), std::env::var(test_var).ok()?));
    }
    if let Ok(port) = std::env::var("TEST_POSTGRES_PORT") {
        vars.push(("DB_PORT".to_string(), port));
    }
    vars.push(("DB_KIND".to_string(), "postgres".to_string()));
    vars.push(("DB_USE_UTC".to_string(), "true".to_string()));
    Some(ConnectionDescriptor::resolve(vars).expect("TEST_POSTGRES_* settings are invalid"))
}

fn live_manager() -> Option<ConnectionManager> {
    let descriptor = live_descriptor()?;
    let driver = Arc::new(SqlxDriver::new(descriptor.db_type));
    Some(ConnectionManager::new(driver, descriptor).with_retry_policy(RetryPolicy::no_retry()))
}

#[tokio::test]
async fn test_health_check_live() {
    let Some(manager) = live_manager() else {
        eprintln!("Skipping test: TEST_POSTGRES_* not set");
        return;
    };
    let diagnostics = Diagnostics::new(manager, QueryExecutor::new());

    let report = diagnostics.health_check().await;
    assert!(report.is_healthy(), "unhealthy: {:?}", report.error);
    let details = report.details.unwrap();
    assert_eq!(details.row_count, 1);
    assert_eq!(details.rows[0].get("health_check"), Some(&json!(1)));
    assert!(details.rows[0].get("server_time").unwrap().is_string());
    assert_eq!(report.open_connection_count, 0);
}

#[tokio::test]
async fn test_parameter_types_round_trip_live() {
    let Some(manager) = live_manager() else {
        eprintln!("Skipping test: TEST_POSTGRES_* not set");
        return;
    };
    let conn = manager.acquire().await.unwrap();
    let when = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let params = QueryParameters::new()
        .with("name", "x")
        .with("age", 5)
        .with("active", true)
        .with("when", when);

    let result = QueryExecutor::new()
        .execute(
            &conn,
            "SELECT @name::text AS name, @age::bigint AS age, @active::boolean AS active, \
             @when::timestamptz AS at, @age::bigint + 1 AS next_age",
            params,
        )
        .await
        .unwrap();

    let row = &result.rows[0];
    assert_eq!(row.get("name"), Some(&json!("x")));
    assert_eq!(row.get("age"), Some(&json!(5)));
    assert_eq!(row.get("active"), Some(&json!(true)));
    assert_eq!(row.get("at"), Some(&json!("2024-05-01T12:00:00+00:00")));
    assert_eq!(row.get("next_age"), Some(&json!(6)));

    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_transaction_rollback_live() {
    let Some(manager) = live_manager() else {
        eprintln!("Skipping test: TEST_POSTGRES_* not set");
        return;
    };
    let conn = manager.acquire().await.unwrap();
    let executor = QueryExecutor::new();
    let tx = TransactionController::new();

    executor
        .execute(
            &conn,
            "CREATE TEMP TABLE authdb_tx_test (id BIGINT PRIMARY KEY, email TEXT)",
            (),
        )
        .await
        .unwrap();

    tx.begin(&conn).await.unwrap();
    let inserted = executor
        .execute(
            &conn,
            "INSERT INTO authdb_tx_test (id, email) VALUES (@id, @email)",
            json!({"id": 1, "email": "a@example.com"}),
        )
        .await
        .unwrap();
    assert_eq!(inserted.row_count, 1);
    tx.rollback(&conn).await.unwrap();

    let count = executor
        .execute(&conn, "SELECT COUNT(*) AS n FROM authdb_tx_test", ())
        .await
        .unwrap();
    assert_eq!(count.rows[0].get("n"), Some(&json!(0)));

    assert!(tx.commit(&conn).await.is_err());
    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_procedure_with_integer_and_timestamp_args_live() {
    let Some(manager) = live_manager() else {
        eprintln!("Skipping test: TEST_POSTGRES_* not set");
        return;
    };
    let conn = manager.acquire().await.unwrap();
    let executor = QueryExecutor::new();

    executor
        .execute(
            &conn,
            "CREATE TEMP TABLE authdb_proc_test (id INTEGER, seen_at TIMESTAMP, email TEXT)",
            (),
        )
        .await
        .unwrap();
    executor
        .execute(
            &conn,
            "CREATE PROCEDURE pg_temp.authdb_touch_user(\
             p_id integer, p_seen timestamp, p_email text) \
             LANGUAGE sql AS $$ INSERT INTO authdb_proc_test VALUES (p_id, p_seen, p_email) $$",
            (),
        )
        .await
        .unwrap();

    let when = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let params = QueryParameters::new()
        .with("p_id", 7)
        .with("p_seen", when)
        .with("p_email", "a@b.c");
    executor
        .execute_procedure(&conn, "pg_temp.authdb_touch_user", params)
        .await
        .unwrap();

    let stored = executor
        .execute(
            &conn,
            "SELECT id, email, seen_at = '2024-05-01 12:00:00'::timestamp AS same_time \
             FROM authdb_proc_test",
            (),
        )
        .await
        .unwrap();
    assert_eq!(stored.row_count, 1);
    assert_eq!(stored.rows[0].get("id"), Some(&json!(7)));
    assert_eq!(stored.rows[0].get("email"), Some(&json!("a@b.c")));
    assert_eq!(stored.rows[0].get("same_time"), Some(&json!(true)));

    conn.close().await.unwrap();
}
