use sqlx::{Pool, Postgres};
use std::sync::Arc;

pub mod controller;
pub mod image;
pub mod service;
pub mod service_log;

pub use controller::{ControllerRecord, ControllerStatus};
pub use image::{Image, ImageStatus};
pub use service::{HealthStatus, NewService, Service, ServiceStatus};
pub use service_log::{CheckMethod, NewHealthCheck, ServiceEventType, ServiceHealthCheck, ServiceLog};

// Application state shared by every component; constructed once at startup
// and passed by Arc, never through globals.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Pool<Postgres>>,
    pub config: Arc<crate::config::Config>,
}
