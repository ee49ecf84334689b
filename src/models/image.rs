use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "image_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ImageStatus {
    Pending,
    Building,
    Ready,
    Failed,
}

/// Built demo image, produced by the (external) build pipeline. This
/// subsystem only ever reads these rows.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Image {
    pub id: Uuid,
    pub repo_id: Uuid,
    pub name: String,
    pub tag: String,
    pub status: ImageStatus,
    pub created_at: DateTime<Utc>,
}

impl Image {
    /// Full pullable reference, e.g. `registry/repo-demo:latest`.
    pub fn reference(&self) -> String {
        format!("{}:{}", self.name, self.tag)
    }

    pub async fn find_by_id(pool: &sqlx::PgPool, id: Uuid) -> Result<Option<Image>, sqlx::Error> {
        sqlx::query_as::<_, Image>(
            "SELECT id, repo_id, name, tag, status, created_at FROM images WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }
}
