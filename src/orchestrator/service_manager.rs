use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::error::OrchestratorError;
use crate::controller::{
    ContainerInfo, ControllerError, ControllerManager, CreateContainerRequest, LogsResponse,
    PlacementRequirements,
};
use crate::models::{
    AppState, CheckMethod, HealthStatus, Image, ImageStatus, NewHealthCheck, NewService, Service,
    ServiceEventType, ServiceHealthCheck, ServiceLog, ServiceStatus,
};
use crate::resources::ResourceManager;

/// The gradio server port inside every demo container.
const CONTAINER_PORT: u16 = 7860;

#[derive(Debug, Clone)]
pub struct CreateServiceRequest {
    pub repo_id: Uuid,
    pub user_id: Uuid,
    pub image_id: Uuid,
    pub cpu_limit: String,
    pub memory_limit: String,
    pub is_public: bool,
    pub priority: i32,
}

/// DB view of a service merged with the live container descriptor and the
/// most recent health probe. `diverged` is set when the database believes
/// the service is running but no controller knows the container.
#[derive(Debug)]
pub struct ServiceStatusReport {
    pub service: Service,
    pub container: Option<ContainerInfo>,
    pub last_check: Option<ServiceHealthCheck>,
    pub diverged: bool,
}

/// Orchestrates the create/start/stop/delete state machine for services,
/// coordinating the resource manager (ports, limits), the controller manager
/// (placement, location) and the per-controller clients.
pub struct ServiceManager {
    state: Arc<AppState>,
    controllers: Arc<ControllerManager>,
    resources: ResourceManager,
    probe: reqwest::Client,
    /// Health-monitor task handles, keyed by service id, so stop/delete and
    /// shutdown can cancel them deterministically.
    monitors: Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

impl ServiceManager {
    pub fn new(state: Arc<AppState>, controllers: Arc<ControllerManager>) -> anyhow::Result<Self> {
        let probe = reqwest::Client::builder()
            .timeout(Duration::from_secs(state.config.rpc_timeout_secs))
            .build()?;
        let resources = ResourceManager::new(Arc::clone(&state));
        Ok(Self {
            state,
            controllers,
            resources,
            probe,
            monitors: Mutex::new(HashMap::new()),
        })
    }

    pub fn resources(&self) -> &ResourceManager {
        &self.resources
    }

    /// Create the service record together with its (not yet started)
    /// container: quota -> limits -> image readiness -> name -> port ->
    /// placement -> image pull -> container create -> persist.
    pub async fn create_service(
        &self,
        req: CreateServiceRequest,
    ) -> Result<Service, OrchestratorError> {
        let active = Service::count_active_for_user(&self.state.db, req.user_id).await?;
        let max = self.state.config.max_services_per_user;
        if active >= max {
            return Err(OrchestratorError::QuotaExceeded { current: active, max });
        }

        let limits = self
            .resources
            .validate_resource_limits(&req.cpu_limit, &req.memory_limit);
        if !limits.is_valid {
            return Err(OrchestratorError::InvalidResourceLimit(
                limits.error.unwrap_or_else(|| "invalid limits".to_string()),
            ));
        }

        // Advisory only; the chosen controller can still reject placement.
        let (fits, reason) = self
            .resources
            .check_resource_availability(&req.cpu_limit, &req.memory_limit)
            .await?;
        if !fits {
            return Err(OrchestratorError::InsufficientResources(reason));
        }

        let image = Image::find_by_id(&self.state.db, req.image_id)
            .await?
            .ok_or(OrchestratorError::ImageNotFound(req.image_id))?;
        if image.status != ImageStatus::Ready {
            return Err(OrchestratorError::ImageNotReady(format!(
                "image {} is {:?}",
                image.reference(),
                image.status
            )));
        }

        let name = generate_service_name(&image.name);
        let port = self.resources.allocate_port(&HashSet::new()).await?;

        let requirements = derive_requirements(&image.name, limits.memory_mb.unwrap_or(0));
        let controller = self.controllers.select_optimal_controller(&requirements).await?;

        // A failed pull must not leave a half-created container behind. The
        // allocated port is not rolled back; the next allocation scan
        // recomputes the free set from live state.
        self.controllers
            .ensure_image_available(controller.id(), &image.reference(), None)
            .await
            .map_err(|e| match e {
                ControllerError::PullFailed { .. } => {
                    OrchestratorError::ImagePullFailed(e.to_string())
                }
                other => other.into(),
            })?;

        let access_token = Uuid::new_v4().simple().to_string();
        let service_url = format!("http://{}:{}", controller.host(), port);
        let container_config = build_container_config(
            &name,
            &image.reference(),
            port,
            &req,
            &access_token,
            &service_url,
        );

        let container_id = controller.create_container(&container_config).await
            .map_err(ControllerError::from)?;
        self.controllers
            .register_container(&container_id, controller.id())
            .await;

        let service = Service::create(
            &self.state.db,
            NewService {
                repo_id: req.repo_id,
                user_id: req.user_id,
                image_id: req.image_id,
                name: name.clone(),
                cpu_limit: req.cpu_limit.clone(),
                memory_limit: req.memory_limit.clone(),
                is_public: req.is_public,
                priority: req.priority,
                access_token,
                gradio_port: port as i32,
                service_url,
                container_id: container_id.clone(),
            },
        )
        .await?;

        ServiceLog::record(
            &self.state.db,
            service.id,
            "info",
            ServiceEventType::Create,
            &format!("Service {} created on controller {}", name, controller.id()),
            Some(req.user_id),
            serde_json::json!({ "container_id": container_id, "port": port }),
        )
        .await?;

        info!(
            "Created service {} ({}) with container {} on {}",
            service.id, name, container_id, controller.id()
        );
        Ok(service)
    }

    /// Start the service's container. No-op when already running unless
    /// `force_restart`; on failure the service lands in `error` with the
    /// cause persisted, and the error propagates.
    pub async fn start_service(
        self: &Arc<Self>,
        service_id: Uuid,
        user_id: Uuid,
        force_restart: bool,
    ) -> Result<Service, OrchestratorError> {
        let service = self.owned_service(service_id, user_id).await?;

        if start_is_noop(service.status, force_restart) {
            debug!("Service {} already running, nothing to do", service_id);
            return Ok(service);
        }
        let Some(container_id) = service.container_id.clone() else {
            return Err(OrchestratorError::InvalidState(
                "service has no container; delete and recreate it".to_string(),
            ));
        };

        if force_restart && service.status.is_active() {
            if let Some(client) = best_effort(
                "locate container for restart",
                self.controllers.find_container_location(&container_id),
            )
            .await
            {
                best_effort("stop container before restart", client.stop_container(&container_id, 10))
                    .await;
            }
        }

        Service::mark_starting(&self.state.db, service_id).await?;

        match self.try_start(service_id, &container_id).await {
            Ok(service) => {
                ServiceLog::record(
                    &self.state.db,
                    service_id,
                    "info",
                    ServiceEventType::Start,
                    "Service started",
                    Some(user_id),
                    serde_json::json!({ "container_id": container_id }),
                )
                .await?;
                self.spawn_monitor(service_id).await;
                Ok(service)
            }
            Err(e) => {
                let message = e.to_string();
                if let Err(db_err) =
                    Service::update_status(&self.state.db, service_id, ServiceStatus::Error, Some(&message))
                        .await
                {
                    error!("Failed to persist error state for {}: {}", service_id, db_err);
                }
                let _ = ServiceLog::record(
                    &self.state.db,
                    service_id,
                    "error",
                    ServiceEventType::Error,
                    &format!("Start failed: {message}"),
                    Some(user_id),
                    serde_json::Value::Null,
                )
                .await;
                Err(e)
            }
        }
    }

    async fn try_start(
        &self,
        service_id: Uuid,
        container_id: &str,
    ) -> Result<Service, OrchestratorError> {
        let client = self.controllers.find_container_location(container_id).await?;
        let response = client.start_container(container_id).await
            .map_err(ControllerError::from)?;
        if !response.success {
            return Err(OrchestratorError::InvalidState(format!(
                "controller refused to start container: {}",
                response.message.unwrap_or_default()
            )));
        }
        let service = Service::mark_running(&self.state.db, service_id).await?;
        info!("Service {} is running on controller {}", service_id, client.id());
        Ok(service)
    }

    /// Stop the service's container. Idempotent: stopped/stopping services
    /// are left alone unless `force_stop`. A remote stop failure is logged
    /// as an `error` event but the local row still advances to `stopped`;
    /// divergence is corrected by a later health check or manual action.
    pub async fn stop_service(
        self: &Arc<Self>,
        service_id: Uuid,
        user_id: Uuid,
        force_stop: bool,
        timeout_secs: u64,
    ) -> Result<Service, OrchestratorError> {
        let service = self.owned_service(service_id, user_id).await?;

        if stop_is_noop(service.status, force_stop) {
            debug!("Service {} already stopped, nothing to do", service_id);
            return Ok(service);
        }

        self.cancel_monitor(service_id).await;

        // A never-started service has no remote call to make.
        if service.status != ServiceStatus::Created {
            Service::update_status(&self.state.db, service_id, ServiceStatus::Stopping, None).await?;

            if let Some(container_id) = &service.container_id {
                let stop = async {
                    let client = self.controllers.find_container_location(container_id).await?;
                    client
                        .stop_container(container_id, timeout_secs)
                        .await
                        .map_err(ControllerError::from)
                };
                if let Err(e) = stop.await {
                    let message = format!("Remote stop failed: {e}");
                    warn!("Service {}: {}", service_id, message);
                    let _ = ServiceLog::record(
                        &self.state.db,
                        service_id,
                        "error",
                        ServiceEventType::Error,
                        &message,
                        Some(user_id),
                        serde_json::Value::Null,
                    )
                    .await;
                }
            }
        }

        let service = Service::mark_stopped(&self.state.db, service_id).await?;
        ServiceLog::record(
            &self.state.db,
            service_id,
            "info",
            ServiceEventType::Stop,
            "Service stopped",
            Some(user_id),
            serde_json::Value::Null,
        )
        .await?;
        info!("Service {} stopped", service_id);
        Ok(service)
    }

    /// Tear the service down: stop if active, best-effort remove the remote
    /// container, then delete the row (logs and health checks cascade).
    pub async fn delete_service(
        self: &Arc<Self>,
        service_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), OrchestratorError> {
        let service = self.owned_service(service_id, user_id).await?;

        if service.status.is_active() {
            self.stop_service(service_id, user_id, true, 10).await?;
        }
        self.cancel_monitor(service_id).await;

        if let Some(container_id) = &service.container_id {
            // The record is going away regardless of what the remote says.
            let remove = async {
                let client = self.controllers.find_container_location(container_id).await?;
                client
                    .remove_container(container_id, true)
                    .await
                    .map_err(ControllerError::from)
            };
            best_effort("remove remote container", remove).await;
            self.controllers.forget_container(container_id).await;
        }

        Service::delete(&self.state.db, service_id).await?;
        info!("Service {} deleted", service_id);
        Ok(())
    }

    /// Probe the service's HTTP health endpoint and persist the outcome.
    /// Probe failures never propagate; every failure mode is encoded in the
    /// persisted row. Only a database failure surfaces as an error.
    pub async fn perform_health_check(
        &self,
        service_id: Uuid,
    ) -> Result<ServiceHealthCheck, sqlx::Error> {
        let service = Service::find_by_id(&self.state.db, service_id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)?;

        let mut check = NewHealthCheck {
            service_id,
            status: HealthStatus::Unhealthy,
            response_time_ms: None,
            check_method: CheckMethod::Http,
            endpoint: None,
            status_code: None,
            error_message: None,
        };

        match (&service.status, &service.service_url) {
            (ServiceStatus::Running, Some(url)) => {
                let endpoint = format!("{url}/health");
                let started = Instant::now();
                match self.probe.get(&endpoint).send().await {
                    Ok(resp) => {
                        let code = resp.status().as_u16();
                        check.status = classify_status(code);
                        check.status_code = Some(code as i32);
                        if !resp.status().is_success() {
                            check.error_message = Some(format!("HTTP {code}"));
                        }
                    }
                    Err(e) if e.is_timeout() => {
                        check.status = HealthStatus::Timeout;
                        check.error_message = Some("health probe timed out".to_string());
                    }
                    Err(e) => {
                        check.status = HealthStatus::Unhealthy;
                        check.error_message = Some(e.to_string());
                    }
                }
                check.response_time_ms = Some(started.elapsed().as_millis() as i32);
                check.endpoint = Some(endpoint);
            }
            _ => {
                check.error_message = Some("service not running".to_string());
            }
        }

        let status = check.status;
        let row = ServiceHealthCheck::record(&self.state.db, check).await?;
        Service::update_health(&self.state.db, service_id, status).await?;
        debug!("Health check for {}: {:?}", service_id, status);
        Ok(row)
    }

    /// Live status: DB row merged with the container descriptor from its
    /// hosting controller. A running row whose container cannot be found
    /// anywhere is reported as diverged rather than masked.
    pub async fn get_service_status(
        &self,
        service_id: Uuid,
    ) -> Result<ServiceStatusReport, OrchestratorError> {
        let service = Service::find_by_id(&self.state.db, service_id)
            .await?
            .ok_or(OrchestratorError::ServiceNotFound(service_id))?;
        let last_check =
            ServiceHealthCheck::latest_for_service(&self.state.db, service_id).await?;

        let Some(container_id) = service.container_id.clone() else {
            return Ok(ServiceStatusReport { service, container: None, last_check, diverged: false });
        };

        match self.controllers.find_container_location(&container_id).await {
            Ok(client) => match client.get_container_info(&container_id).await {
                Ok(info) => Ok(ServiceStatusReport {
                    service,
                    container: Some(info),
                    last_check,
                    diverged: false,
                }),
                Err(e) => {
                    warn!("Container {} vanished during status read: {}", container_id, e);
                    let diverged = service.status == ServiceStatus::Running;
                    Ok(ServiceStatusReport { service, container: None, last_check, diverged })
                }
            },
            Err(ControllerError::ContainerNotFound(_)) => {
                let diverged = service.status == ServiceStatus::Running;
                if diverged {
                    warn!(
                        "Service {} is recorded running but container {} is gone",
                        service_id, container_id
                    );
                }
                Ok(ServiceStatusReport { service, container: None, last_check, diverged })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Audit trail for a service, newest first.
    pub async fn get_service_events(
        &self,
        service_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ServiceLog>, OrchestratorError> {
        Ok(ServiceLog::find_by_service(&self.state.db, service_id, limit).await?)
    }

    /// Recent health probe results, newest first.
    pub async fn get_health_history(
        &self,
        service_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ServiceHealthCheck>, OrchestratorError> {
        Ok(ServiceHealthCheck::history(&self.state.db, service_id, limit).await?)
    }

    /// Proxy the container's stdout/stderr through its hosting controller.
    pub async fn get_service_logs(
        &self,
        service_id: Uuid,
        lines: u32,
    ) -> Result<LogsResponse, OrchestratorError> {
        let service = Service::find_by_id(&self.state.db, service_id)
            .await?
            .ok_or(OrchestratorError::ServiceNotFound(service_id))?;
        let Some(container_id) = &service.container_id else {
            return Err(OrchestratorError::InvalidState(
                "service has no container".to_string(),
            ));
        };
        let client = self.controllers.find_container_location(container_id).await?;
        Ok(client
            .get_container_logs(container_id, lines)
            .await
            .map_err(ControllerError::from)?)
    }

    pub async fn list_services(&self, user_id: Uuid) -> Result<Vec<Service>, OrchestratorError> {
        Ok(Service::find_by_user(&self.state.db, user_id).await?)
    }

    /// Count a demo hit against the service.
    pub async fn record_access(
        &self,
        service_id: Uuid,
        user_id: Option<Uuid>,
    ) -> Result<(), OrchestratorError> {
        Service::record_access(&self.state.db, service_id).await?;
        ServiceLog::record(
            &self.state.db,
            service_id,
            "info",
            ServiceEventType::Access,
            "Service accessed",
            user_id,
            serde_json::Value::Null,
        )
        .await?;
        Ok(())
    }

    /// One background monitor per running service: grace sleep, then poll
    /// until the service leaves `running`. A failing iteration logs and
    /// exits; a fresh loop only comes from a later start.
    async fn spawn_monitor(self: &Arc<Self>, service_id: Uuid) {
        let manager = Arc::clone(self);
        let grace = Duration::from_secs(manager.state.config.monitor_grace_secs);
        let period = Duration::from_secs(manager.state.config.health_check_interval_secs);

        let handle = tokio::spawn(async move {
            sleep(grace).await;
            loop {
                match Service::find_by_id(&manager.state.db, service_id).await {
                    Ok(Some(svc)) if svc.status == ServiceStatus::Running => {}
                    Ok(_) => {
                        debug!("Service {} no longer running, monitor exiting", service_id);
                        break;
                    }
                    Err(e) => {
                        error!("Monitor for {} failed to read service: {}", service_id, e);
                        break;
                    }
                }
                if let Err(e) = manager.perform_health_check(service_id).await {
                    error!("Monitor for {} failed to persist check: {}", service_id, e);
                    break;
                }
                sleep(period).await;
            }
        });

        let mut monitors = self.monitors.lock().await;
        if let Some(old) = monitors.insert(service_id, handle) {
            old.abort();
        }
    }

    async fn cancel_monitor(&self, service_id: Uuid) {
        if let Some(handle) = self.monitors.lock().await.remove(&service_id) {
            handle.abort();
            debug!("Cancelled health monitor for {}", service_id);
        }
    }

    /// Abort every retained monitor task; used on process shutdown.
    pub async fn shutdown(&self) {
        let mut monitors = self.monitors.lock().await;
        for (service_id, handle) in monitors.drain() {
            handle.abort();
            debug!("Aborted monitor for {}", service_id);
        }
    }

    async fn owned_service(
        &self,
        service_id: Uuid,
        user_id: Uuid,
    ) -> Result<Service, OrchestratorError> {
        let service = Service::find_by_id(&self.state.db, service_id)
            .await?
            .ok_or(OrchestratorError::ServiceNotFound(service_id))?;
        if service.user_id != user_id {
            return Err(OrchestratorError::PermissionDenied);
        }
        Ok(service)
    }
}

/// Starting an already-running service changes nothing unless a restart is
/// forced.
fn start_is_noop(status: ServiceStatus, force_restart: bool) -> bool {
    status == ServiceStatus::Running && !force_restart
}

/// Stopping a stopped or already-stopping service changes nothing unless
/// forced.
fn stop_is_noop(status: ServiceStatus, force_stop: bool) -> bool {
    matches!(status, ServiceStatus::Stopped | ServiceStatus::Stopping) && !force_stop
}

/// Run an operation whose failure must not abort the surrounding workflow.
/// The failure is logged and swallowed; the distinction from must-propagate
/// calls is deliberate and visible at the call site.
async fn best_effort<T, E, F>(what: &str, fut: F) -> Option<T>
where
    E: std::fmt::Display,
    F: Future<Output = Result<T, E>>,
{
    match fut.await {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Best-effort {} failed: {}", what, e);
            None
        }
    }
}

/// `space-<image slug>-<random suffix>`. The suffix space is large enough
/// that collisions are avoided rather than prevented by construction.
fn generate_service_name(image_name: &str) -> String {
    let slug: String = image_name
        .rsplit('/')
        .next()
        .unwrap_or(image_name)
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let slug = slug.trim_matches('-');
    let slug = &slug[..slug.len().min(24)];
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect();
    format!("space-{slug}-{suffix}")
}

/// Image-name heuristics for GPU placement; there is no capability metadata
/// on images, only naming conventions.
fn image_requires_gpu(image_name: &str) -> bool {
    let lower = image_name.to_ascii_lowercase();
    ["gpu", "cuda", "tensorrt", "rocm"]
        .iter()
        .any(|marker| lower.contains(marker))
}

fn derive_requirements(image_name: &str, memory_mb: i64) -> PlacementRequirements {
    PlacementRequirements {
        gpu_required: image_requires_gpu(image_name),
        memory_gb: if memory_mb > 0 {
            Some((memory_mb as f64 / 1024.0).ceil())
        } else {
            None
        },
    }
}

fn classify_status(code: u16) -> HealthStatus {
    if (200..300).contains(&code) {
        HealthStatus::Healthy
    } else {
        HealthStatus::Unhealthy
    }
}

fn build_container_config(
    name: &str,
    image_ref: &str,
    host_port: u16,
    req: &CreateServiceRequest,
    access_token: &str,
    service_url: &str,
) -> CreateContainerRequest {
    let mut config = CreateContainerRequest {
        name: name.to_string(),
        image: image_ref.to_string(),
        memory_limit: req.memory_limit.clone(),
        cpu_limit: req.cpu_limit.clone(),
        restart_policy: "on-failure".to_string(),
        auto_remove: false,
        detach: true,
        ..Default::default()
    };
    config
        .ports
        .insert(format!("{CONTAINER_PORT}/tcp"), host_port);
    config
        .environment
        .insert("GRADIO_SERVER_NAME".to_string(), "0.0.0.0".to_string());
    config
        .environment
        .insert("GRADIO_SERVER_PORT".to_string(), CONTAINER_PORT.to_string());
    config
        .environment
        .insert("SPACE_ACCESS_TOKEN".to_string(), access_token.to_string());
    config
        .environment
        .insert("SPACE_URL".to_string(), service_url.to_string());
    config
        .labels
        .insert("spacedock.managed".to_string(), "true".to_string());
    config
        .labels
        .insert("spacedock.repo_id".to_string(), req.repo_id.to_string());
    config
        .labels
        .insert("spacedock.user_id".to_string(), req.user_id.to_string());
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_names_carry_slug_and_suffix() {
        let name = generate_service_name("registry.local/acme/Sentiment_Demo:latest");
        assert!(name.starts_with("space-sentiment-demo-latest"), "got {name}");
        let suffix = name.rsplit('-').next().unwrap();
        assert_eq!(suffix.len(), 8);
    }

    #[test]
    fn service_names_differ_between_calls() {
        let a = generate_service_name("demo");
        let b = generate_service_name("demo");
        assert_ne!(a, b);
    }

    #[test]
    fn gpu_heuristics_match_common_markers() {
        assert!(image_requires_gpu("acme/llama-CUDA:latest"));
        assert!(image_requires_gpu("demo-gpu"));
        assert!(!image_requires_gpu("acme/sentiment:latest"));
    }

    #[test]
    fn requirements_round_memory_up_to_gb() {
        let req = derive_requirements("demo", 1536);
        assert_eq!(req.memory_gb, Some(2.0));
        assert!(!req.gpu_required);

        let none = derive_requirements("demo", 0);
        assert_eq!(none.memory_gb, None);
    }

    #[test]
    fn repeated_start_and_stop_are_noops() {
        assert!(start_is_noop(ServiceStatus::Running, false));
        assert!(!start_is_noop(ServiceStatus::Running, true)); // forced restart proceeds
        assert!(!start_is_noop(ServiceStatus::Stopped, false));
        assert!(!start_is_noop(ServiceStatus::Error, false));

        assert!(stop_is_noop(ServiceStatus::Stopped, false));
        assert!(stop_is_noop(ServiceStatus::Stopping, false));
        assert!(!stop_is_noop(ServiceStatus::Stopped, true)); // forced stop proceeds
        assert!(!stop_is_noop(ServiceStatus::Running, false));
    }

    #[test]
    fn only_2xx_counts_as_healthy() {
        assert_eq!(classify_status(200), HealthStatus::Healthy);
        assert_eq!(classify_status(204), HealthStatus::Healthy);
        assert_eq!(classify_status(302), HealthStatus::Unhealthy);
        assert_eq!(classify_status(500), HealthStatus::Unhealthy);
    }

    #[test]
    fn container_config_exposes_gradio_port() {
        let req = CreateServiceRequest {
            repo_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            image_id: Uuid::new_v4(),
            cpu_limit: "0.5".to_string(),
            memory_limit: "512Mi".to_string(),
            is_public: true,
            priority: 0,
        };
        let config = build_container_config(
            "space-demo-abc",
            "registry/demo:latest",
            7861,
            &req,
            "token",
            "http://10.0.0.5:7861",
        );
        assert_eq!(config.ports.get("7860/tcp"), Some(&7861));
        assert_eq!(config.environment.get("GRADIO_SERVER_PORT").unwrap(), "7860");
        assert_eq!(config.labels.get("spacedock.managed").unwrap(), "true");
        assert_eq!(config.memory_limit, "512Mi");
        assert!(config.detach);
    }
}
