use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use super::client::{ControllerClient, ControllerHealth, ControllerRequestError, RegistryAuth};
use crate::models::{AppState, ControllerRecord, ControllerStatus};

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("No healthy controller available")]
    NoneAvailable,
    #[error("Unknown controller: {0}")]
    UnknownController(String),
    #[error("Container {0} not found on any controller")]
    ContainerNotFound(String),
    #[error("Location lookup for container {0} timed out")]
    LookupTimeout(String),
    #[error("Image pull failed on controller {controller}: {message}")]
    PullFailed { controller: String, message: String },
    #[error(transparent)]
    Request(#[from] ControllerRequestError),
}

/// In-memory view of one controller, refreshed by the health sweep and read
/// by placement decisions. May be up to one sweep interval stale.
#[derive(Debug, Clone)]
pub struct ControllerSnapshot {
    pub id: String,
    pub enabled: bool,
    pub status: ControllerStatus,
    pub server_type: String,
    pub load_percentage: f64,
    pub max_memory_gb: f64,
    pub gpu: bool,
    pub containers_running: i32,
    pub containers_max: i32,
    pub consecutive_failures: i32,
}

impl ControllerSnapshot {
    fn initial(id: &str, server_type: &str, enabled: bool, max_containers: i32) -> Self {
        Self {
            id: id.to_string(),
            enabled,
            status: ControllerStatus::Unknown,
            server_type: server_type.to_string(),
            load_percentage: 100.0,
            max_memory_gb: 0.0,
            gpu: false,
            containers_running: 0,
            containers_max: max_containers,
            consecutive_failures: 0,
        }
    }

    fn has_container_headroom(&self) -> bool {
        self.containers_max <= 0 || self.containers_running < self.containers_max
    }

    fn apply_health(&mut self, health: &ControllerHealth) {
        self.status = ControllerStatus::Healthy;
        self.consecutive_failures = 0;
        self.server_type = health.server_type.clone();
        self.load_percentage = health.load_percentage;
        self.gpu = health.capabilities.get("gpu").and_then(|v| v.as_bool()).unwrap_or(false);
        self.max_memory_gb = health
            .capabilities
            .get("max_memory_gb")
            .and_then(|v| v.as_f64())
            .unwrap_or(health.resources.memory_total_gb);
        self.containers_running = health.containers.running;
        self.containers_max = health.containers.max_allowed;
    }
}

/// Hard placement constraints derived from a create request.
#[derive(Debug, Clone, Default)]
pub struct PlacementRequirements {
    pub gpu_required: bool,
    pub memory_gb: Option<f64>,
}

/// Pick the best controller id from a set of snapshots: healthy and enabled,
/// matching the hard requirements, lowest load first. When no controller
/// matches the requirements, degrade to the lowest-load healthy one; the
/// caller must be prepared for downstream placement failure in that case.
pub fn pick_controller(
    snapshots: &[ControllerSnapshot],
    requirements: &PlacementRequirements,
) -> Option<String> {
    let mut healthy: Vec<&ControllerSnapshot> = snapshots
        .iter()
        .filter(|s| s.enabled && s.status == ControllerStatus::Healthy)
        .collect();
    // Deterministic tie-break on id.
    healthy.sort_by(|a, b| {
        a.load_percentage
            .partial_cmp(&b.load_percentage)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });

    let matching = healthy.iter().find(|s| {
        if !s.has_container_headroom() {
            return false;
        }
        if requirements.gpu_required && !s.gpu {
            return false;
        }
        if let Some(needed) = requirements.memory_gb {
            if needed > s.max_memory_gb {
                return false;
            }
        }
        true
    });

    matching
        .map(|s| s.id.clone())
        .or_else(|| healthy.first().map(|s| s.id.clone()))
}

/// Registry of worker-node clients plus the health and container-location
/// bookkeeping around them. Clients are registered once at startup; the
/// client map itself is never mutated afterwards.
pub struct ControllerManager {
    state: Arc<AppState>,
    clients: HashMap<String, Arc<ControllerClient>>,
    snapshots: RwLock<HashMap<String, ControllerSnapshot>>,
    /// container id -> controller id, for location lookups.
    containers: RwLock<HashMap<String, String>>,
}

impl ControllerManager {
    pub async fn new(state: Arc<AppState>) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(state.config.rpc_timeout_secs);
        let mut clients = HashMap::new();
        let mut snapshots = HashMap::new();

        for cfg in &state.config.controllers {
            let client = ControllerClient::new(&cfg.id, &cfg.url, timeout)?;
            ControllerRecord::register(&state.db, &cfg.id, &cfg.url, &cfg.server_type, cfg.enabled)
                .await?;
            snapshots.insert(
                cfg.id.clone(),
                ControllerSnapshot::initial(
                    &cfg.id,
                    &cfg.server_type,
                    cfg.enabled,
                    state.config.max_containers_per_controller,
                ),
            );
            clients.insert(cfg.id.clone(), Arc::new(client));
            info!("Registered controller {} at {}", cfg.id, cfg.url);
        }

        Ok(Self {
            state,
            clients,
            snapshots: RwLock::new(snapshots),
            containers: RwLock::new(HashMap::new()),
        })
    }

    pub fn client(&self, controller_id: &str) -> Result<Arc<ControllerClient>, ControllerError> {
        self.clients
            .get(controller_id)
            .cloned()
            .ok_or_else(|| ControllerError::UnknownController(controller_id.to_string()))
    }

    pub async fn snapshot_list(&self) -> Vec<ControllerSnapshot> {
        self.snapshots.read().await.values().cloned().collect()
    }

    /// Spawn the periodic health sweep. Returns the task handle so shutdown
    /// can abort it.
    pub fn run_health_sweep(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let period = Duration::from_secs(manager.state.config.health_check_interval_secs);
        tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                ticker.tick().await;
                manager.check_all().await;
            }
        })
    }

    /// One sweep tick: health-check every controller in turn. Each remote
    /// call carries its own timeout, so a hung controller delays but never
    /// prevents checking the rest.
    pub async fn check_all(&self) {
        for (id, client) in &self.clients {
            match client.health_check().await {
                Ok(health) => {
                    if let Some(snap) = self.snapshots.write().await.get_mut(id) {
                        snap.apply_health(&health);
                    }
                    let payload = serde_json::to_value(&health).unwrap_or_default();
                    let result = ControllerRecord::mark_healthy(
                        &self.state.db,
                        id,
                        &payload,
                        health.resources.cpu_cores,
                        health.resources.memory_total_gb,
                        health.resources.memory_available_gb,
                        health.containers.running,
                        health.containers.max_allowed,
                        health.load_percentage,
                        &health.server_type,
                        &health.capabilities,
                    )
                    .await;
                    if let Err(e) = result {
                        error!("Failed to persist health for controller {}: {}", id, e);
                    }
                    debug!(
                        "Controller {} healthy, load {:.1}%",
                        id, health.load_percentage
                    );
                }
                Err(e) => {
                    let message = e.to_string();
                    if let Some(snap) = self.snapshots.write().await.get_mut(id) {
                        snap.status = ControllerStatus::Unhealthy;
                        snap.consecutive_failures += 1;
                    }
                    if let Err(db_err) =
                        ControllerRecord::mark_unhealthy(&self.state.db, id, &message).await
                    {
                        error!("Failed to persist failure for controller {}: {}", id, db_err);
                    }
                    warn!("Controller {} health check failed: {}", id, message);
                }
            }
        }
    }

    /// Bin-pack a new container: lowest-load healthy controller satisfying
    /// the hard requirements, with graceful degradation to any healthy one.
    pub async fn select_optimal_controller(
        &self,
        requirements: &PlacementRequirements,
    ) -> Result<Arc<ControllerClient>, ControllerError> {
        let snapshots = self.snapshot_list().await;
        let chosen = pick_controller(&snapshots, requirements).ok_or(ControllerError::NoneAvailable)?;
        info!("Selected controller {} for placement ({:?})", chosen, requirements);
        self.client(&chosen)
    }

    pub async fn register_container(&self, container_id: &str, controller_id: &str) {
        self.containers
            .write()
            .await
            .insert(container_id.to_string(), controller_id.to_string());
    }

    pub async fn forget_container(&self, container_id: &str) {
        self.containers.write().await.remove(container_id);
    }

    /// Which controller hosts this container? Checks the local registry
    /// first; on a miss (process restart, out-of-band creation) falls back
    /// to asking every controller, bounded by a total broadcast timeout.
    /// A clean miss everywhere is a definite not-found, not a transient
    /// error.
    pub async fn find_container_location(
        &self,
        container_id: &str,
    ) -> Result<Arc<ControllerClient>, ControllerError> {
        if let Some(controller_id) = self.containers.read().await.get(container_id).cloned() {
            if let Some(client) = self.clients.get(&controller_id) {
                return Ok(Arc::clone(client));
            }
        }

        let budget = Duration::from_secs(self.state.config.broadcast_timeout_secs);
        let search = async {
            let lookups = self.clients.iter().map(|(id, client)| async move {
                match client.get_container_info(container_id).await {
                    Ok(_) => Some((id, Arc::clone(client))),
                    Err(e) => {
                        debug!("Controller {} does not host {}: {}", id, container_id, e);
                        None
                    }
                }
            });
            for hit in futures::future::join_all(lookups).await.into_iter().flatten() {
                let (id, client) = hit;
                warn!(
                    "Container {} found unregistered on controller {}",
                    container_id, id
                );
                self.register_container(container_id, id).await;
                return Some(client);
            }
            None
        };

        match tokio::time::timeout(budget, search).await {
            Ok(Some(client)) => Ok(client),
            Ok(None) => Err(ControllerError::ContainerNotFound(container_id.to_string())),
            Err(_) => Err(ControllerError::LookupTimeout(container_id.to_string())),
        }
    }

    /// Make sure `image` exists on the given controller, pulling it when
    /// absent. Pull failure is fatal here; trying another controller is the
    /// caller's decision.
    pub async fn ensure_image_available(
        &self,
        controller_id: &str,
        image: &str,
        auth: Option<&RegistryAuth>,
    ) -> Result<(), ControllerError> {
        let client = self.client(controller_id)?;

        match client.get_image_info(image).await {
            Ok(_) => {
                debug!("Image {} already present on {}", image, controller_id);
                return Ok(());
            }
            Err(e) if e.is_not_found() => {
                info!("Image {} missing on {}, pulling", image, controller_id);
            }
            Err(e) => return Err(e.into()),
        }

        let pull = client.pull_image(image, auth).await?;
        if !pull.success {
            return Err(ControllerError::PullFailed {
                controller: controller_id.to_string(),
                message: pull.message.unwrap_or_else(|| "pull reported failure".to_string()),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(id: &str, load: f64, gpu: bool, mem_gb: f64, status: ControllerStatus) -> ControllerSnapshot {
        ControllerSnapshot {
            id: id.to_string(),
            enabled: true,
            status,
            server_type: if gpu { "gpu" } else { "cpu" }.to_string(),
            load_percentage: load,
            max_memory_gb: mem_gb,
            gpu,
            containers_running: 0,
            containers_max: 20,
            consecutive_failures: 0,
        }
    }

    #[test]
    fn picks_lowest_load_matching_controller() {
        let snapshots = vec![
            snap("a", 60.0, false, 32.0, ControllerStatus::Healthy),
            snap("b", 20.0, false, 32.0, ControllerStatus::Healthy),
            snap("c", 40.0, false, 32.0, ControllerStatus::Healthy),
        ];
        let picked = pick_controller(&snapshots, &PlacementRequirements::default());
        assert_eq!(picked.as_deref(), Some("b"));
        // Same inputs, same answer.
        let again = pick_controller(&snapshots, &PlacementRequirements::default());
        assert_eq!(picked, again);
    }

    #[test]
    fn gpu_requirement_filters_non_gpu_nodes() {
        let snapshots = vec![
            snap("cpu-lo", 10.0, false, 32.0, ControllerStatus::Healthy),
            snap("gpu-hi", 80.0, true, 64.0, ControllerStatus::Healthy),
        ];
        let req = PlacementRequirements {
            gpu_required: true,
            memory_gb: None,
        };
        assert_eq!(pick_controller(&snapshots, &req).as_deref(), Some("gpu-hi"));
    }

    #[test]
    fn memory_requirement_filters_small_nodes() {
        let snapshots = vec![
            snap("small", 10.0, false, 8.0, ControllerStatus::Healthy),
            snap("big", 50.0, false, 64.0, ControllerStatus::Healthy),
        ];
        let req = PlacementRequirements {
            gpu_required: false,
            memory_gb: Some(16.0),
        };
        assert_eq!(pick_controller(&snapshots, &req).as_deref(), Some("big"));
    }

    #[test]
    fn falls_back_to_lowest_load_when_nothing_matches() {
        let snapshots = vec![
            snap("a", 30.0, false, 8.0, ControllerStatus::Healthy),
            snap("b", 70.0, false, 8.0, ControllerStatus::Healthy),
        ];
        let req = PlacementRequirements {
            gpu_required: true,
            memory_gb: None,
        };
        // No GPU anywhere: degrade to the least-loaded healthy node.
        assert_eq!(pick_controller(&snapshots, &req).as_deref(), Some("a"));
    }

    #[test]
    fn unhealthy_and_disabled_controllers_are_never_picked() {
        let mut disabled = snap("disabled", 1.0, false, 32.0, ControllerStatus::Healthy);
        disabled.enabled = false;
        let snapshots = vec![
            disabled,
            snap("down", 2.0, false, 32.0, ControllerStatus::Unhealthy),
            snap("up", 90.0, false, 32.0, ControllerStatus::Healthy),
        ];
        assert_eq!(
            pick_controller(&snapshots, &PlacementRequirements::default()).as_deref(),
            Some("up")
        );
    }

    #[test]
    fn no_healthy_controller_yields_none() {
        let snapshots = vec![snap("down", 10.0, false, 32.0, ControllerStatus::Unhealthy)];
        assert!(pick_controller(&snapshots, &PlacementRequirements::default()).is_none());
    }

    #[test]
    fn full_controllers_are_not_placement_candidates() {
        let mut full = snap("full", 5.0, false, 32.0, ControllerStatus::Healthy);
        full.containers_running = 20;
        full.containers_max = 20;
        let snapshots = vec![full, snap("open", 50.0, false, 32.0, ControllerStatus::Healthy)];
        assert_eq!(
            pick_controller(&snapshots, &PlacementRequirements::default()).as_deref(),
            Some("open")
        );
    }

    #[test]
    fn ties_break_deterministically_on_id() {
        let snapshots = vec![
            snap("zz", 25.0, false, 32.0, ControllerStatus::Healthy),
            snap("aa", 25.0, false, 32.0, ControllerStatus::Healthy),
        ];
        assert_eq!(
            pick_controller(&snapshots, &PlacementRequirements::default()).as_deref(),
            Some("aa")
        );
    }

    #[test]
    fn snapshot_absorbs_health_payload() {
        let health: ControllerHealth = serde_json::from_value(serde_json::json!({
            "status": "ok",
            "resources": {"cpu_cores": 8.0, "memory_total_gb": 32.0, "memory_available_gb": 20.0},
            "containers": {"running": 2, "max_allowed": 10},
            "load_percentage": 12.5,
            "server_type": "gpu",
            "capabilities": {"gpu": true}
        }))
        .unwrap();

        let mut snap = ControllerSnapshot::initial("n", "cpu", true, 20);
        snap.consecutive_failures = 3;
        snap.apply_health(&health);

        assert_eq!(snap.status, ControllerStatus::Healthy);
        assert_eq!(snap.consecutive_failures, 0);
        assert!(snap.gpu);
        assert_eq!(snap.load_percentage, 12.5);
        // No explicit ceiling capability: total memory is the ceiling.
        assert_eq!(snap.max_memory_gb, 32.0);
    }
}
