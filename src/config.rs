use std::time::Duration;

/// Fixed reconciler cadence (spec §6.3 — not user-configurable).
pub const CHECK_CONFIGURING_NODES_INTERVAL: Duration = Duration::from_secs(5);

/// Head-node node-group name the controller ensures exists.
pub const MESOS_NODE_GROUP_NAME: &str = "Mesos";
pub const MESOS_NODE_GROUP_DESCRIPTION: &str = "The Mesos compute nodes in the cluster";

/// Controller configuration. Durations default to the values in spec §6.3;
/// all are overridable via environment variables so operators don't need a
/// rebuild to retune timeouts.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub provisioning_timeout: Duration,
    pub heartbeat_timeout: Duration,
    pub node_idle_timeout: Duration,
    pub node_group: String,
    pub rest_base_url: String,
    pub log_filter: String,
}

impl ControllerConfig {
    pub fn from_env() -> Self {
        Self {
            provisioning_timeout: env_secs("HPC_PROVISIONING_TIMEOUT_SECS", 15 * 60),
            heartbeat_timeout: env_secs("HPC_HEARTBEAT_TIMEOUT_SECS", 3 * 60),
            node_idle_timeout: env_secs("HPC_NODE_IDLE_TIMEOUT_SECS", 180),
            node_group: std::env::var("HPC_NODE_GROUP").unwrap_or_default(),
            rest_base_url: std::env::var("HPC_REST_BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8080".to_string()),
            log_filter: std::env::var("HPC_LOG_FILTER").unwrap_or_else(|_| "info".to_string()),
        }
    }

    /// True iff a target node group (beyond the default Mesos group) was
    /// configured.
    pub fn node_group_specified(&self) -> bool {
        !self.node_group.is_empty()
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            provisioning_timeout: Duration::from_secs(15 * 60),
            heartbeat_timeout: Duration::from_secs(3 * 60),
            node_idle_timeout: Duration::from_secs(180),
            node_group: String::new(),
            rest_base_url: "http://127.0.0.1:8080".to_string(),
            log_filter: "info".to_string(),
        }
    }
}

fn env_secs(var: &str, default_secs: u64) -> Duration {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(default_secs))
}
