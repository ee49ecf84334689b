use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "service_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
}

impl ServiceStatus {
    /// Legal lifecycle transitions. `Error` is reachable from everywhere;
    /// leaving it requires an explicit restart or delete.
    pub fn can_transition_to(&self, target: &ServiceStatus) -> bool {
        if *target == ServiceStatus::Error {
            return true;
        }
        match (self, target) {
            (ServiceStatus::Created, ServiceStatus::Starting) => true,
            (ServiceStatus::Created, ServiceStatus::Stopped) => true,

            (ServiceStatus::Starting, ServiceStatus::Running) => true,
            (ServiceStatus::Starting, ServiceStatus::Stopping) => true,

            (ServiceStatus::Running, ServiceStatus::Stopping) => true,
            (ServiceStatus::Running, ServiceStatus::Starting) => true, // force restart

            (ServiceStatus::Stopping, ServiceStatus::Stopped) => true,

            (ServiceStatus::Stopped, ServiceStatus::Starting) => true,
            (ServiceStatus::Stopped, ServiceStatus::Stopping) => true, // force stop

            (ServiceStatus::Error, ServiceStatus::Starting) => true, // manual retry
            (ServiceStatus::Error, ServiceStatus::Stopping) => true,
            (ServiceStatus::Error, ServiceStatus::Stopped) => true,

            _ => false,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, ServiceStatus::Running | ServiceStatus::Starting)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "health_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Unhealthy,
    Timeout,
}

/// A deployed model demo: one logical service backed by at most one
/// container at a time. `container_id` is null only before the first
/// container has been created.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Service {
    pub id: Uuid,
    pub repo_id: Uuid,
    pub user_id: Uuid,
    pub image_id: Option<Uuid>,
    pub name: String,
    pub cpu_limit: String,
    pub memory_limit: String,
    pub is_public: bool,
    pub priority: i32,
    pub access_token: Option<String>,
    pub gradio_port: Option<i32>,
    pub service_url: Option<String>,
    pub container_id: Option<String>,
    pub status: ServiceStatus,
    pub health_status: HealthStatus,
    pub error_message: Option<String>,
    pub access_count: i64,
    pub start_count: i32,
    pub total_runtime_secs: i64,
    pub created_at: DateTime<Utc>,
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_stopped_at: Option<DateTime<Utc>>,
    pub last_health_check: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewService {
    pub repo_id: Uuid,
    pub user_id: Uuid,
    pub image_id: Uuid,
    pub name: String,
    pub cpu_limit: String,
    pub memory_limit: String,
    pub is_public: bool,
    pub priority: i32,
    pub access_token: String,
    pub gradio_port: i32,
    pub service_url: String,
    pub container_id: String,
}

const SERVICE_COLUMNS: &str = r#"
    id, repo_id, user_id, image_id, name, cpu_limit, memory_limit,
    is_public, priority, access_token, gradio_port, service_url,
    container_id, status, health_status, error_message,
    access_count, start_count, total_runtime_secs,
    created_at, last_started_at, last_stopped_at, last_health_check
"#;

impl Service {
    pub async fn create(pool: &sqlx::PgPool, new: NewService) -> Result<Service, sqlx::Error> {
        sqlx::query_as::<_, Service>(&format!(
            r#"
            INSERT INTO services (
                repo_id, user_id, image_id, name, cpu_limit, memory_limit,
                is_public, priority, access_token, gradio_port, service_url,
                container_id, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, 'created')
            RETURNING {SERVICE_COLUMNS}
            "#
        ))
        .bind(new.repo_id)
        .bind(new.user_id)
        .bind(new.image_id)
        .bind(&new.name)
        .bind(&new.cpu_limit)
        .bind(&new.memory_limit)
        .bind(new.is_public)
        .bind(new.priority)
        .bind(&new.access_token)
        .bind(new.gradio_port)
        .bind(&new.service_url)
        .bind(&new.container_id)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &sqlx::PgPool, id: Uuid) -> Result<Option<Service>, sqlx::Error> {
        sqlx::query_as::<_, Service>(&format!(
            "SELECT {SERVICE_COLUMNS} FROM services WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_user(pool: &sqlx::PgPool, user_id: Uuid) -> Result<Vec<Service>, sqlx::Error> {
        sqlx::query_as::<_, Service>(&format!(
            "SELECT {SERVICE_COLUMNS} FROM services WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(pool)
        .await
    }

    pub async fn find_by_status(
        pool: &sqlx::PgPool,
        status: ServiceStatus,
    ) -> Result<Vec<Service>, sqlx::Error> {
        sqlx::query_as::<_, Service>(&format!(
            "SELECT {SERVICE_COLUMNS} FROM services WHERE status = $1 ORDER BY created_at"
        ))
        .bind(status)
        .fetch_all(pool)
        .await
    }

    /// Count of services in `running`/`starting` for the per-user quota check.
    pub async fn count_active_for_user(
        pool: &sqlx::PgPool,
        user_id: Uuid,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM services WHERE user_id = $1 AND status IN ('running', 'starting')",
        )
        .bind(user_id)
        .fetch_one(pool)
        .await
    }

    /// Ports already recorded on service rows, feeding the allocation scan.
    pub async fn used_ports(pool: &sqlx::PgPool) -> Result<Vec<i32>, sqlx::Error> {
        sqlx::query_scalar::<_, i32>(
            "SELECT gradio_port FROM services WHERE gradio_port IS NOT NULL",
        )
        .fetch_all(pool)
        .await
    }

    /// Reject the update unless the current row may legally move to
    /// `target`. Every status-changing statement goes through this first.
    async fn ensure_transition(
        pool: &sqlx::PgPool,
        id: Uuid,
        target: ServiceStatus,
    ) -> Result<(), sqlx::Error> {
        let current = Self::find_by_id(pool, id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)?;
        if !current.status.can_transition_to(&target) {
            return Err(sqlx::Error::Protocol(format!(
                "Invalid service transition from {:?} to {:?}",
                current.status, target
            )));
        }
        Ok(())
    }

    /// Transition-validated status update; rejects illegal moves before
    /// touching the row.
    pub async fn update_status(
        pool: &sqlx::PgPool,
        id: Uuid,
        status: ServiceStatus,
        error_message: Option<&str>,
    ) -> Result<Service, sqlx::Error> {
        Self::ensure_transition(pool, id, status).await?;

        sqlx::query_as::<_, Service>(&format!(
            r#"
            UPDATE services
            SET status = $2, error_message = $3
            WHERE id = $1
            RETURNING {SERVICE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(status)
        .bind(error_message)
        .fetch_one(pool)
        .await
    }

    /// Move into `starting`, bumping the start counter and timestamp in the
    /// same statement.
    pub async fn mark_starting(pool: &sqlx::PgPool, id: Uuid) -> Result<Service, sqlx::Error> {
        Self::ensure_transition(pool, id, ServiceStatus::Starting).await?;
        sqlx::query_as::<_, Service>(&format!(
            r#"
            UPDATE services
            SET status = 'starting', error_message = NULL,
                start_count = start_count + 1, last_started_at = NOW()
            WHERE id = $1
            RETURNING {SERVICE_COLUMNS}
            "#
        ))
        .bind(id)
        .fetch_one(pool)
        .await
    }

    pub async fn mark_running(pool: &sqlx::PgPool, id: Uuid) -> Result<Service, sqlx::Error> {
        Self::ensure_transition(pool, id, ServiceStatus::Running).await?;
        sqlx::query_as::<_, Service>(&format!(
            r#"
            UPDATE services
            SET status = 'running', health_status = 'unknown', error_message = NULL
            WHERE id = $1
            RETURNING {SERVICE_COLUMNS}
            "#
        ))
        .bind(id)
        .fetch_one(pool)
        .await
    }

    /// Move into `stopped`, folding the elapsed runtime into the cumulative
    /// counter when a start timestamp is present.
    pub async fn mark_stopped(pool: &sqlx::PgPool, id: Uuid) -> Result<Service, sqlx::Error> {
        Self::ensure_transition(pool, id, ServiceStatus::Stopped).await?;
        sqlx::query_as::<_, Service>(&format!(
            r#"
            UPDATE services
            SET status = 'stopped', health_status = 'unknown', last_stopped_at = NOW(),
                total_runtime_secs = total_runtime_secs + COALESCE(
                    EXTRACT(EPOCH FROM (NOW() - last_started_at))::bigint, 0)
            WHERE id = $1
            RETURNING {SERVICE_COLUMNS}
            "#
        ))
        .bind(id)
        .fetch_one(pool)
        .await
    }

    pub async fn update_health(
        pool: &sqlx::PgPool,
        id: Uuid,
        health: HealthStatus,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE services SET health_status = $2, last_health_check = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(health)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn record_access(pool: &sqlx::PgPool, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE services SET access_count = access_count + 1 WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Hard delete; logs and health checks go with the row via FK cascade.
    pub async fn delete(pool: &sqlx::PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM services WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_is_reachable_from_every_state() {
        for status in [
            ServiceStatus::Created,
            ServiceStatus::Starting,
            ServiceStatus::Running,
            ServiceStatus::Stopping,
            ServiceStatus::Stopped,
            ServiceStatus::Error,
        ] {
            assert!(status.can_transition_to(&ServiceStatus::Error));
        }
    }

    #[test]
    fn happy_path_transitions_are_legal() {
        assert!(ServiceStatus::Created.can_transition_to(&ServiceStatus::Starting));
        assert!(ServiceStatus::Starting.can_transition_to(&ServiceStatus::Running));
        assert!(ServiceStatus::Running.can_transition_to(&ServiceStatus::Stopping));
        assert!(ServiceStatus::Stopping.can_transition_to(&ServiceStatus::Stopped));
        assert!(ServiceStatus::Stopped.can_transition_to(&ServiceStatus::Starting));
    }

    #[test]
    fn skipping_states_is_rejected() {
        assert!(!ServiceStatus::Created.can_transition_to(&ServiceStatus::Running));
        assert!(!ServiceStatus::Stopped.can_transition_to(&ServiceStatus::Running));
        assert!(!ServiceStatus::Running.can_transition_to(&ServiceStatus::Stopped));
        assert!(!ServiceStatus::Stopped.can_transition_to(&ServiceStatus::Created));
    }

    #[test]
    fn stale_stopping_rows_cannot_restart() {
        // These are the moves the lifecycle marks must refuse: a service
        // mid-stop or mid-start cannot be pushed into `starting` again.
        assert!(!ServiceStatus::Stopping.can_transition_to(&ServiceStatus::Starting));
        assert!(!ServiceStatus::Starting.can_transition_to(&ServiceStatus::Starting));
        assert!(!ServiceStatus::Created.can_transition_to(&ServiceStatus::Running));
    }

    #[test]
    fn active_means_running_or_starting() {
        assert!(ServiceStatus::Running.is_active());
        assert!(ServiceStatus::Starting.is_active());
        assert!(!ServiceStatus::Stopped.is_active());
        assert!(!ServiceStatus::Error.is_active());
    }
}
