use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use uuid::Uuid;

use super::HealthStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "service_event_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ServiceEventType {
    Create,
    Start,
    Stop,
    Access,
    Error,
    HealthCheck,
}

/// Append-only audit event for a service. Never updated; removed only by
/// cascade when the service row is deleted.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ServiceLog {
    pub id: Uuid,
    pub service_id: Uuid,
    pub level: String,
    pub message: String,
    pub event_type: ServiceEventType,
    pub user_id: Option<Uuid>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl ServiceLog {
    pub async fn record(
        pool: &sqlx::PgPool,
        service_id: Uuid,
        level: &str,
        event_type: ServiceEventType,
        message: &str,
        user_id: Option<Uuid>,
        metadata: serde_json::Value,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO service_logs (service_id, level, message, event_type, user_id, metadata)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(service_id)
        .bind(level)
        .bind(message)
        .bind(event_type)
        .bind(user_id)
        .bind(metadata)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn find_by_service(
        pool: &sqlx::PgPool,
        service_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ServiceLog>, sqlx::Error> {
        sqlx::query_as::<_, ServiceLog>(
            r#"
            SELECT id, service_id, level, message, event_type, user_id, metadata, created_at
            FROM service_logs
            WHERE service_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(service_id)
        .bind(limit)
        .fetch_all(pool)
        .await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "check_method", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CheckMethod {
    Http,
    Tcp,
    Process,
}

/// One probe result. The newest row per service is the authoritative answer
/// to "is this service healthy right now".
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ServiceHealthCheck {
    pub id: Uuid,
    pub service_id: Uuid,
    pub status: HealthStatus,
    pub response_time_ms: Option<i32>,
    pub check_method: CheckMethod,
    pub endpoint: Option<String>,
    pub status_code: Option<i32>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewHealthCheck {
    pub service_id: Uuid,
    pub status: HealthStatus,
    pub response_time_ms: Option<i32>,
    pub check_method: CheckMethod,
    pub endpoint: Option<String>,
    pub status_code: Option<i32>,
    pub error_message: Option<String>,
}

impl ServiceHealthCheck {
    pub async fn record(
        pool: &sqlx::PgPool,
        new: NewHealthCheck,
    ) -> Result<ServiceHealthCheck, sqlx::Error> {
        sqlx::query_as::<_, ServiceHealthCheck>(
            r#"
            INSERT INTO service_health_checks
                (service_id, status, response_time_ms, check_method, endpoint, status_code, error_message)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, service_id, status, response_time_ms, check_method,
                      endpoint, status_code, error_message, created_at
            "#,
        )
        .bind(new.service_id)
        .bind(new.status)
        .bind(new.response_time_ms)
        .bind(new.check_method)
        .bind(&new.endpoint)
        .bind(new.status_code)
        .bind(&new.error_message)
        .fetch_one(pool)
        .await
    }

    pub async fn latest_for_service(
        pool: &sqlx::PgPool,
        service_id: Uuid,
    ) -> Result<Option<ServiceHealthCheck>, sqlx::Error> {
        sqlx::query_as::<_, ServiceHealthCheck>(
            r#"
            SELECT id, service_id, status, response_time_ms, check_method,
                   endpoint, status_code, error_message, created_at
            FROM service_health_checks
            WHERE service_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(service_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn history(
        pool: &sqlx::PgPool,
        service_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ServiceHealthCheck>, sqlx::Error> {
        sqlx::query_as::<_, ServiceHealthCheck>(
            r#"
            SELECT id, service_id, status, response_time_ms, check_method,
                   endpoint, status_code, error_message, created_at
            FROM service_health_checks
            WHERE service_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(service_id)
        .bind(limit)
        .fetch_all(pool)
        .await
    }
}
