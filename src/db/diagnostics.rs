//! Health, statistics and coordinated shutdown.

use crate::db::connection::ConnectionManager;
use crate::db::executor::QueryExecutor;
use crate::models::{ConnectionStats, QueryResult};
use serde::Serialize;
use tracing::{info, warn};

pub const HEALTH_CHECK_SQL: &str = "SELECT 1 AS health_check, CURRENT_TIMESTAMP AS server_time";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<QueryResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub open_connection_count: usize,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

#[derive(Debug, Clone)]
pub struct Diagnostics {
    manager: ConnectionManager,
    executor: QueryExecutor,
}

impl Diagnostics {
    pub fn new(manager: ConnectionManager, executor: QueryExecutor) -> Self {
        Self { manager, executor }
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Probe the database on a fresh connection. Never fails.
    pub async fn health_check(&self) -> HealthReport {
        let probe = async {
            let conn = self.manager.acquire().await?;
            let result = self.executor.execute(&conn, HEALTH_CHECK_SQL, ()).await;
            if let Err(e) = conn.close().await {
                warn!(error = %e, "Failed to close health-check connection");
            }
            result
        };

        match probe.await {
            Ok(details) => HealthReport {
                status: HealthStatus::Healthy,
                details: Some(details),
                error: None,
                open_connection_count: self.manager.registry().len().await,
            },
            Err(e) => {
                warn!(error = %e, "Health check failed");
                HealthReport {
                    status: HealthStatus::Unhealthy,
                    details: None,
                    error: Some(e.to_string()),
                    open_connection_count: self.manager.registry().len().await,
                }
            }
        }
    }

    pub async fn connection_stats(&self) -> ConnectionStats {
        self.manager.registry().stats().await
    }

    /// Close every open connection. Always leaves the registry empty.
    pub async fn shutdown(&self) {
        info!("Shutting down database connections");
        self.manager.close_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionDescriptor;
    use crate::db::memory::MemoryDriver;
    use crate::db::retry::RetryPolicy;
    use crate::models::Row;
    use serde_json::json;
    use std::sync::Arc;

    fn diagnostics(driver: &MemoryDriver) -> Diagnostics {
        let descriptor = ConnectionDescriptor::resolve([
            ("DB_SERVER", "localhost"),
            ("DB_USER", "auth"),
            ("DB_PASSWORD", "pw"),
            ("DB_DATABASE", "authdb"),
        ])
        .unwrap();
        let manager = ConnectionManager::new(Arc::new(driver.clone()), descriptor)
            .with_retry_policy(RetryPolicy::no_retry());
        Diagnostics::new(manager, QueryExecutor::with_retry_policy(RetryPolicy::no_retry()))
    }

    #[tokio::test]
    async fn test_healthy_report_closes_probe() {
        let driver = MemoryDriver::new();
        driver.respond_to(
            "health_check",
            vec![Row::from_pairs([
                ("health_check", json!(1)),
                ("server_time", json!("2024-05-01T12:00:00+00:00")),
            ])],
        );
        let diagnostics = diagnostics(&driver);
        let report = diagnostics.health_check().await;
        assert!(report.is_healthy());
        assert_eq!(report.open_connection_count, 0);
        let details = report.details.unwrap();
        assert_eq!(details.rows[0].get("health_check"), Some(&json!(1)));
        assert_eq!(driver.sessions_closed(), 1);
    }

    #[tokio::test]
    async fn test_report_serializes_lowercase_status() {
        let driver = MemoryDriver::new();
        driver.unreachable();
        let report = diagnostics(&driver).health_check().await;
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["status"], "unhealthy");
        assert!(value.get("details").is_none());
        assert!(value["error"].as_str().unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let driver = MemoryDriver::new();
        let diagnostics = diagnostics(&driver);
        let _conn = diagnostics.manager().acquire().await.unwrap();
        diagnostics.shutdown().await;
        diagnostics.shutdown().await;
        assert_eq!(diagnostics.connection_stats().await.open_connection_count, 0);
    }
}
