use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "controller_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ControllerStatus {
    Unknown,
    Healthy,
    Unhealthy,
}

/// Persisted view of one worker node, written by the health sweep. Rows are
/// created at startup and only ever updated afterwards; disabled controllers
/// are flagged, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ControllerRecord {
    pub id: String,
    pub base_url: String,
    pub server_type: String,
    pub enabled: bool,
    pub status: ControllerStatus,
    pub last_health_check: Option<DateTime<Utc>>,
    pub health_payload: Option<serde_json::Value>,
    pub consecutive_failures: i32,
    pub total_failures: i64,
    pub last_error: Option<String>,
    pub cpu_cores: Option<f64>,
    pub memory_total_gb: Option<f64>,
    pub memory_available_gb: Option<f64>,
    pub containers_running: Option<i32>,
    pub containers_max: Option<i32>,
    pub load_percentage: Option<f64>,
    pub capabilities: serde_json::Value,
}

const CONTROLLER_COLUMNS: &str = r#"
    id, base_url, server_type, enabled, status, last_health_check,
    health_payload, consecutive_failures, total_failures, last_error,
    cpu_cores, memory_total_gb, memory_available_gb,
    containers_running, containers_max, load_percentage, capabilities
"#;

impl ControllerRecord {
    /// Seed a row for a configured controller if none exists yet.
    pub async fn register(
        pool: &sqlx::PgPool,
        id: &str,
        base_url: &str,
        server_type: &str,
        enabled: bool,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO controllers (id, base_url, server_type, enabled)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET base_url = EXCLUDED.base_url,
                server_type = EXCLUDED.server_type,
                enabled = EXCLUDED.enabled
            "#,
        )
        .bind(id)
        .bind(base_url)
        .bind(server_type)
        .bind(enabled)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Overwrite the capacity snapshot after a successful health check.
    #[allow(clippy::too_many_arguments)]
    pub async fn mark_healthy(
        pool: &sqlx::PgPool,
        id: &str,
        payload: &serde_json::Value,
        cpu_cores: f64,
        memory_total_gb: f64,
        memory_available_gb: f64,
        containers_running: i32,
        containers_max: i32,
        load_percentage: f64,
        server_type: &str,
        capabilities: &serde_json::Value,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE controllers
            SET status = 'healthy', consecutive_failures = 0, last_error = NULL,
                last_health_check = NOW(), health_payload = $2,
                cpu_cores = $3, memory_total_gb = $4, memory_available_gb = $5,
                containers_running = $6, containers_max = $7,
                load_percentage = $8, server_type = $9, capabilities = $10
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(payload)
        .bind(cpu_cores)
        .bind(memory_total_gb)
        .bind(memory_available_gb)
        .bind(containers_running)
        .bind(containers_max)
        .bind(load_percentage)
        .bind(server_type)
        .bind(capabilities)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn mark_unhealthy(
        pool: &sqlx::PgPool,
        id: &str,
        error: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE controllers
            SET status = 'unhealthy',
                consecutive_failures = consecutive_failures + 1,
                total_failures = total_failures + 1,
                last_health_check = NOW(), last_error = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn find_all(pool: &sqlx::PgPool) -> Result<Vec<ControllerRecord>, sqlx::Error> {
        sqlx::query_as::<_, ControllerRecord>(&format!(
            "SELECT {CONTROLLER_COLUMNS} FROM controllers ORDER BY id"
        ))
        .fetch_all(pool)
        .await
    }
}
