use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::debug;

use crate::models::{AppState, Service, ServiceStatus};

#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("No ports available in range {start}-{end}")]
    Exhausted { start: u16, end: u16 },
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result of parsing a cpu/memory limit pair. Callers must check `is_valid`
/// before trusting the parsed values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub cpu_cores: Option<f64>,
    pub memory_mb: Option<i64>,
    pub error: Option<String>,
}

impl ValidationResult {
    fn ok(cpu_cores: f64, memory_mb: i64) -> Self {
        Self {
            is_valid: true,
            cpu_cores: Some(cpu_cores),
            memory_mb: Some(memory_mb),
            error: None,
        }
    }

    fn invalid(reason: String) -> Self {
        Self {
            is_valid: false,
            cpu_cores: None,
            memory_mb: None,
            error: Some(reason),
        }
    }
}

/// Best-effort host metrics snapshot. All fields zero when collection fails.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_percent: f64,
    pub memory_used_mb: u64,
    pub memory_percent: f64,
    pub disk_used_gb: u64,
    pub disk_percent: f64,
    pub net_rx_bytes: u64,
    pub net_tx_bytes: u64,
    pub net_rx_packets: u64,
    pub net_tx_packets: u64,
}

/// Parse a CPU limit: a plain decimal core count ("1", "1.5") or a
/// millicores suffix ("500m" -> 0.5).
pub fn parse_cpu_limit(raw: &str) -> Result<f64, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("CPU limit is empty".to_string());
    }
    let cores = if let Some(millis) = raw.strip_suffix('m') {
        millis
            .parse::<f64>()
            .map_err(|_| format!("Invalid millicores value: '{raw}'"))?
            / 1000.0
    } else {
        raw.parse::<f64>()
            .map_err(|_| format!("Invalid CPU value: '{raw}'"))?
    };
    if !cores.is_finite() || cores <= 0.0 {
        return Err(format!("CPU limit must be positive, got '{raw}'"));
    }
    Ok(cores)
}

/// Parse a memory limit into megabytes. Accepts binary suffixes
/// (Ki/Mi/Gi/Ti, or bare K/M/G/T), decimal suffixes (KB/MB/GB/TB), a bare
/// B for bytes, and a unit-less integer meaning MB.
pub fn parse_memory_limit(raw: &str) -> Result<i64, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("Memory limit is empty".to_string());
    }

    // Longest suffix first so "Gi" wins over "i" and "GB" over "B".
    const UNITS: &[(&str, f64)] = &[
        ("Ti", 1024.0 * 1024.0),
        ("Gi", 1024.0),
        ("Mi", 1.0),
        ("Ki", 1.0 / 1024.0),
        ("TB", 1_000_000.0),
        ("GB", 1000.0),
        ("MB", 1.0),
        ("KB", 1.0 / 1000.0),
        ("T", 1024.0 * 1024.0),
        ("G", 1024.0),
        ("M", 1.0),
        ("K", 1.0 / 1024.0),
        ("B", 1.0 / (1024.0 * 1024.0)),
    ];

    let (digits, multiplier) = UNITS
        .iter()
        .find_map(|(suffix, mult)| raw.strip_suffix(suffix).map(|rest| (rest, *mult)))
        .unwrap_or((raw, 1.0));

    let value = digits
        .trim()
        .parse::<i64>()
        .map_err(|_| format!("Invalid memory value: '{raw}'"))?;
    if value <= 0 {
        return Err(format!("Memory limit must be positive, got '{raw}'"));
    }

    let mb = (value as f64 * multiplier).ceil() as i64;
    if mb < 1 {
        return Err(format!("Memory limit below 1 MB: '{raw}'"));
    }
    Ok(mb)
}

/// Lowest port in `range` that is neither already used, excluded by the
/// caller, nor rejected by the `bindable` probe.
fn lowest_free_port(
    range: (u16, u16),
    used: &HashSet<u16>,
    exclude: &HashSet<u16>,
    bindable: impl Fn(u16) -> bool,
) -> Option<u16> {
    let (start, end) = range;
    (start..=end).find(|port| !used.contains(port) && !exclude.contains(port) && bindable(*port))
}

/// Tracks scarce local resources: the host port range handed to containers
/// and the configured cpu/memory ceilings.
pub struct ResourceManager {
    state: Arc<AppState>,
    /// Persistent sampler: CPU usage is a delta between successive refreshes
    /// of the same `System`, so it must outlive individual calls.
    sys: Mutex<sysinfo::System>,
}

impl ResourceManager {
    pub fn new(state: Arc<AppState>) -> Self {
        let mut sys = sysinfo::System::new_all();
        sys.refresh_all();
        Self {
            state,
            sys: Mutex::new(sys),
        }
    }

    /// Lowest port in the configured range that is neither recorded on a
    /// service row, reported in use by the OS, nor excluded by the caller.
    ///
    /// The port is not reserved; the caller must persist it promptly.
    /// Two concurrent allocations can race between the scan and the insert,
    /// in which case the duplicate surfaces as a container create failure
    /// at the runtime, not as silent corruption.
    pub async fn allocate_port(&self, exclude: &HashSet<u16>) -> Result<u16, ResourceError> {
        let db_ports: HashSet<u16> = Service::used_ports(&self.state.db)
            .await?
            .into_iter()
            .filter_map(|p| u16::try_from(p).ok())
            .collect();

        let (start, end) = (
            self.state.config.port_range_start,
            self.state.config.port_range_end,
        );
        match lowest_free_port((start, end), &db_ports, exclude, port_is_bindable) {
            Some(port) => {
                debug!("Allocated port {}", port);
                Ok(port)
            }
            None => Err(ResourceError::Exhausted { start, end }),
        }
    }

    /// Parse and range-check a cpu/memory limit pair. Never fails; malformed
    /// input comes back as `is_valid = false` with a reason.
    pub fn validate_resource_limits(&self, cpu_limit: &str, memory_limit: &str) -> ValidationResult {
        let cpu = match parse_cpu_limit(cpu_limit) {
            Ok(v) => v,
            Err(reason) => return ValidationResult::invalid(reason),
        };
        let memory = match parse_memory_limit(memory_limit) {
            Ok(v) => v,
            Err(reason) => return ValidationResult::invalid(reason),
        };

        let max_cpu = self.state.config.max_cpu_cores;
        if cpu > max_cpu {
            return ValidationResult::invalid(format!(
                "CPU limit {cpu} exceeds the maximum of {max_cpu} cores"
            ));
        }
        let max_mb = self.state.config.max_memory_mb;
        if memory > max_mb {
            return ValidationResult::invalid(format!(
                "Memory limit {memory} MB exceeds the maximum of {max_mb} MB"
            ));
        }
        ValidationResult::ok(cpu, memory)
    }

    /// Refresh CPU and memory on the retained `System` and read them back.
    /// The very first delta after startup undershoots; every later call
    /// reads usage accumulated since the previous one.
    fn sample_host(&self) -> HostSample {
        let mut sys = self.sys.lock().unwrap_or_else(|e| e.into_inner());
        sys.refresh_cpu_usage();
        sys.refresh_memory();
        HostSample {
            cpu_percent: sys.global_cpu_usage() as f64,
            cpu_cores: sys.cpus().len() as f64,
            memory_total: sys.total_memory(),
            memory_used: sys.used_memory(),
        }
    }

    /// Host-level metrics snapshot. Collection problems yield zeros, never
    /// an error; metrics are best-effort.
    pub fn get_system_resource_usage(&self) -> ResourceUsage {
        let host = self.sample_host();
        if host.memory_total == 0 {
            return ResourceUsage::default();
        }

        let disks = sysinfo::Disks::new_with_refreshed_list();
        let (disk_total, disk_avail) = disks
            .list()
            .iter()
            .fold((0u64, 0u64), |(t, a), d| (t + d.total_space(), a + d.available_space()));
        let disk_used = disk_total.saturating_sub(disk_avail);
        let disk_percent = if disk_total > 0 {
            disk_used as f64 / disk_total as f64 * 100.0
        } else {
            0.0
        };

        let networks = sysinfo::Networks::new_with_refreshed_list();
        let mut usage = ResourceUsage {
            cpu_percent: host.cpu_percent,
            memory_used_mb: host.memory_used / (1024 * 1024),
            memory_percent: host.memory_used as f64 / host.memory_total as f64 * 100.0,
            disk_used_gb: disk_used / (1024 * 1024 * 1024),
            disk_percent,
            ..Default::default()
        };
        for (_name, data) in networks.list() {
            usage.net_rx_bytes += data.total_received();
            usage.net_tx_bytes += data.total_transmitted();
            usage.net_rx_packets += data.total_packets_received();
            usage.net_tx_packets += data.total_packets_transmitted();
        }
        usage
    }

    /// Advisory pre-admission check: do the requested limits fit next to
    /// what running services have already been promised? Subject to TOCTOU;
    /// placement can still fail downstream.
    pub async fn check_resource_availability(
        &self,
        cpu_limit: &str,
        memory_limit: &str,
    ) -> Result<(bool, String), ResourceError> {
        let parsed = self.validate_resource_limits(cpu_limit, memory_limit);
        let (Some(req_cpu), Some(req_mb)) = (parsed.cpu_cores, parsed.memory_mb) else {
            return Ok((
                false,
                parsed.error.unwrap_or_else(|| "Invalid resource limits".to_string()),
            ));
        };

        let mut committed_cpu = 0.0;
        let mut committed_mb = 0i64;
        for svc in Service::find_by_status(&self.state.db, ServiceStatus::Running).await? {
            committed_cpu += parse_cpu_limit(&svc.cpu_limit).unwrap_or(0.0);
            committed_mb += parse_memory_limit(&svc.memory_limit).unwrap_or(0);
        }

        let host = self.sample_host();
        let total_cores = host.cpu_cores;
        let total_mb = (host.memory_total / (1024 * 1024)) as i64;
        let load_factor = 1.0 - (host.cpu_percent / 100.0).min(1.0);

        let free_cpu = (total_cores * load_factor - committed_cpu).max(0.0);
        let free_mb = total_mb - committed_mb;

        if req_cpu > free_cpu {
            return Ok((
                false,
                format!("Requested {req_cpu} cores but only {free_cpu:.2} are uncommitted"),
            ));
        }
        if req_mb > free_mb {
            return Ok((
                false,
                format!("Requested {req_mb} MB but only {free_mb} MB are uncommitted"),
            ));
        }
        Ok((true, "ok".to_string()))
    }
}

/// One CPU/memory reading off the retained sampler.
struct HostSample {
    cpu_percent: f64,
    cpu_cores: f64,
    memory_total: u64,
    memory_used: u64,
}

fn port_is_bindable(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_parses_cores_and_millicores() {
        assert_eq!(parse_cpu_limit("1").unwrap(), 1.0);
        assert_eq!(parse_cpu_limit("1.5").unwrap(), 1.5);
        assert_eq!(parse_cpu_limit("500m").unwrap(), 0.5);
        assert_eq!(parse_cpu_limit("250m").unwrap(), 0.25);
    }

    #[test]
    fn cpu_rejects_garbage() {
        assert!(parse_cpu_limit("abc").is_err());
        assert!(parse_cpu_limit("-1").is_err());
        assert!(parse_cpu_limit("0").is_err());
        assert!(parse_cpu_limit("").is_err());
        assert!(parse_cpu_limit("m").is_err());
    }

    #[test]
    fn memory_parses_binary_and_decimal_suffixes() {
        assert_eq!(parse_memory_limit("512Mi").unwrap(), 512);
        assert_eq!(parse_memory_limit("2Gi").unwrap(), 2048);
        assert_eq!(parse_memory_limit("1Ti").unwrap(), 1024 * 1024);
        assert_eq!(parse_memory_limit("1024MB").unwrap(), 1024);
        assert_eq!(parse_memory_limit("2GB").unwrap(), 2000);
        assert_eq!(parse_memory_limit("1G").unwrap(), 1024);
        assert_eq!(parse_memory_limit("2048K").unwrap(), 2);
        assert_eq!(parse_memory_limit("512").unwrap(), 512);
    }

    #[test]
    fn memory_bytes_round_up_to_a_megabyte() {
        assert_eq!(parse_memory_limit("1048576B").unwrap(), 1);
        assert_eq!(parse_memory_limit("1B").unwrap(), 1);
    }

    #[test]
    fn memory_rejects_garbage() {
        assert!(parse_memory_limit("abc").is_err());
        assert!(parse_memory_limit("-1Gi").is_err());
        assert!(parse_memory_limit("0Mi").is_err());
        assert!(parse_memory_limit("").is_err());
        assert!(parse_memory_limit("1.5Gi").is_err()); // integers only
    }

    #[test]
    fn zeroed_usage_is_the_failure_shape() {
        let usage = ResourceUsage::default();
        assert_eq!(usage.cpu_percent, 0.0);
        assert_eq!(usage.net_rx_bytes, 0);
    }

    #[test]
    fn allocated_ports_stay_distinct_and_in_range() {
        let mut used = HashSet::new();
        let exclude = HashSet::new();
        for _ in 7860..=7864 {
            let port = lowest_free_port((7860, 7864), &used, &exclude, |_| true).unwrap();
            assert!((7860..=7864).contains(&port));
            assert!(used.insert(port), "port {port} handed out twice");
        }
        // Every port persisted: the range is spent.
        assert_eq!(lowest_free_port((7860, 7864), &used, &exclude, |_| true), None);
    }

    #[test]
    fn exhausted_range_yields_none() {
        let used: HashSet<u16> = (7860..=7862).collect();
        assert_eq!(
            lowest_free_port((7860, 7862), &used, &HashSet::new(), |_| true),
            None
        );
        // A range where the OS holds every port is just as exhausted.
        assert_eq!(
            lowest_free_port((7860, 7862), &HashSet::new(), &HashSet::new(), |_| false),
            None
        );
    }

    #[test]
    fn excluded_and_os_bound_ports_are_skipped() {
        let exclude: HashSet<u16> = [7860].into_iter().collect();
        let port =
            lowest_free_port((7860, 7865), &HashSet::new(), &exclude, |p| p != 7861).unwrap();
        assert_eq!(port, 7862);
    }

    #[tokio::test]
    async fn host_snapshot_reports_bounded_percentages() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/spacedock")
            .unwrap();
        let state = Arc::new(AppState {
            db: Arc::new(pool),
            config: Arc::new(crate::config::Config::from_env()),
        });
        let manager = ResourceManager::new(state);
        // Two reads so the second covers the refresh-then-read delta path.
        for usage in [
            manager.get_system_resource_usage(),
            manager.get_system_resource_usage(),
        ] {
            assert!((0.0..=100.0).contains(&usage.cpu_percent));
            assert!((0.0..=100.0).contains(&usage.memory_percent));
            assert!((0.0..=100.0).contains(&usage.disk_percent));
        }
    }
}
