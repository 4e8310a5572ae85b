use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Instant;

use tracing::{error, info, warn};

use crate::error::NodeTableError;
use crate::id;

/// Lifecycle states a node record can be in. Declaration order matches the
/// spec's state diagram; `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeState {
    Unknown,
    Provisioning,
    Configuring,
    Running,
    Draining,
    Closing,
    Closed,
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NodeState::Unknown => "Unknown",
            NodeState::Provisioning => "Provisioning",
            NodeState::Configuring => "Configuring",
            NodeState::Running => "Running",
            NodeState::Draining => "Draining",
            NodeState::Closing => "Closing",
            NodeState::Closed => "Closed",
        };
        write!(f, "{}", name)
    }
}

/// A node's record. Value type — transitions replace the whole record
/// rather than mutating fields in place, so a reader holding a clone never
/// observes a torn update.
#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub hostname: String,
    pub fqdn: String,
    pub agent_id: String,
    pub task_id: String,
    pub cpus: f64,
    pub last_heartbeat: Instant,
    pub state: NodeState,
}

/// Thread-safe hostname → record table. The map itself uses a synchronous
/// `RwLock`: no method here holds the lock across an `.await`, since all
/// I/O (REST calls) happens in the machines against a `snapshot()` taken
/// beforehand.
pub struct NodeTable {
    records: RwLock<HashMap<String, NodeRecord>>,
}

impl Default for NodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeTable {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Register a newly-acquired host. Rejects a hostname collision against
    /// a different fqdn; re-admits a `Closed` record under the same fqdn;
    /// warns and overwrites a present non-`Closed` record under the same
    /// fqdn (duplicate registration from the scheduler).
    pub fn add_node(
        &self,
        fqdn: &str,
        agent_id: &str,
        task_id: &str,
        cpus: f64,
        now: Instant,
    ) -> Result<(), NodeTableError> {
        let u_fqdn = id::canonical_fqdn(fqdn);
        let hostname = id::hostname_from_fqdn(&u_fqdn);

        let mut records = self.records.write().unwrap();
        if let Some(existing) = records.get(&hostname) {
            if existing.fqdn != u_fqdn {
                error!(
                    hostname = %hostname,
                    existing_fqdn = %existing.fqdn,
                    new_fqdn = %u_fqdn,
                    "duplicate hostname with different fqdn, rejecting add_node"
                );
                return Err(NodeTableError::FqdnCollision {
                    hostname,
                    existing_fqdn: existing.fqdn.clone(),
                    new_fqdn: u_fqdn,
                });
            }
            if existing.state != NodeState::Closed {
                warn!(hostname = %hostname, state = %existing.state, "overwriting existing non-closed record on re-add_node");
            }
        }

        let record = NodeRecord {
            hostname: hostname.clone(),
            fqdn: u_fqdn,
            agent_id: agent_id.to_string(),
            task_id: task_id.to_string(),
            cpus,
            last_heartbeat: now,
            state: NodeState::Provisioning,
        };
        info!(hostname = %hostname, cpus, "node record added");
        records.insert(hostname, record);
        Ok(())
    }

    /// Record a heartbeat. Unknown hostnames are logged and dropped. A
    /// record in `Provisioning` transitions to `Configuring` exactly once;
    /// other states are left untouched (heartbeats never resurrect
    /// terminal or draining records).
    pub fn on_heartbeat(&self, hostname: &str, now: Instant) {
        let u_hostname = id::canonical_hostname(hostname);
        let mut records = self.records.write().unwrap();
        match records.get_mut(&u_hostname) {
            Some(record) => {
                record.last_heartbeat = now;
                info!(hostname = %u_hostname, "heartbeat received");
                if record.state == NodeState::Provisioning {
                    record.state = NodeState::Configuring;
                    info!(hostname = %u_hostname, "configuring host");
                }
            }
            None => {
                error!(hostname = %u_hostname, "host not recognized, heartbeat ignored");
            }
        }
    }

    pub fn get_task_info(&self, hostname: &str) -> (String, String) {
        let u_hostname = id::canonical_hostname(hostname);
        let records = self.records.read().unwrap();
        match records.get(&u_hostname) {
            Some(record) => (record.task_id.clone(), record.agent_id.clone()),
            None => {
                error!(hostname = %u_hostname, "host not recognized, failed to get task info");
                (String::new(), String::new())
            }
        }
    }

    pub fn get_state(&self, hostname: &str) -> NodeState {
        let u_hostname = id::canonical_hostname(hostname);
        let records = self.records.read().unwrap();
        match records.get(&u_hostname) {
            Some(record) => record.state,
            None => {
                error!(hostname = %u_hostname, "host not recognized, failed to get host state");
                NodeState::Unknown
            }
        }
    }

    pub fn get(&self, hostname: &str) -> Option<NodeRecord> {
        let u_hostname = id::canonical_hostname(hostname);
        self.records.read().unwrap().get(&u_hostname).cloned()
    }

    /// True iff the hostname exists with a different fqdn than the one
    /// given.
    pub fn check_fqdn_collision(&self, fqdn: &str) -> bool {
        let u_fqdn = id::canonical_fqdn(fqdn);
        let hostname = id::hostname_from_fqdn(&u_fqdn);
        match self.records.read().unwrap().get(&hostname) {
            Some(existing) => existing.fqdn != u_fqdn,
            None => false,
        }
    }

    pub fn cores_in_provisioning(&self) -> f64 {
        let records = self.records.read().unwrap();
        let cores: f64 = records
            .values()
            .filter(|r| matches!(r.state, NodeState::Provisioning | NodeState::Configuring))
            .map(|r| r.cpus)
            .sum();
        info!(cores, "cores in provisioning");
        cores
    }

    /// Point-in-time copy of every record, for the reconciler and machines
    /// to work against without holding the table lock during REST calls.
    pub fn snapshot(&self) -> Vec<NodeRecord> {
        self.records.read().unwrap().values().cloned().collect()
    }

    /// Transition primitive: set state on the named hosts, returning the
    /// subset whose state actually changed. Unknown names are logged and
    /// skipped. Legality of the transition is the caller's responsibility.
    pub fn set_state(&self, names: &[String], new_state: NodeState) -> Vec<String> {
        let mut changed = Vec::new();
        let mut records = self.records.write().unwrap();
        for name in names {
            let u_hostname = id::canonical_hostname(name);
            match records.get_mut(&u_hostname) {
                Some(record) => {
                    if record.state != new_state {
                        let old_state = record.state;
                        record.state = new_state;
                        changed.push(u_hostname.clone());
                        info!(hostname = %u_hostname, from = %old_state, to = %new_state, "host state transition");
                    }
                }
                None => {
                    error!(hostname = %u_hostname, state = %new_state, "host not recognized, state change ignored");
                }
            }
        }
        changed
    }
}
