//! Public facade (spec §4.6 / §6.1). Grounded on
//! `sandchest-node/src/main.rs`'s `NodeService` — a thin struct wrapping
//! the manager(s) and exposing the public operation set — and directly on
//! `heartbeat_table.py`'s `HpcClusterManager` method list.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::warn;

use crate::config::ControllerConfig;
use crate::error::NodeTableError;
use crate::node_table::{NodeState, NodeTable};
use crate::reconciler::{NodeClosedCallback, Reconciler};
use crate::rest_client::RestClient;

pub struct Controller {
    table: Arc<NodeTable>,
    reconciler: Arc<Reconciler>,
    started: AtomicBool,
}

impl Controller {
    pub fn new(rest: Arc<dyn RestClient>, config: ControllerConfig) -> Arc<Self> {
        let table = Arc::new(NodeTable::new());
        let reconciler = Arc::new(Reconciler::new(Arc::clone(&table), rest, config));
        Arc::new(Self {
            table,
            reconciler,
            started: AtomicBool::new(false),
        })
    }

    /// Register a newly-acquired host for the state machine to track.
    pub fn add_node(
        &self,
        fqdn: &str,
        agent_id: &str,
        task_id: &str,
        cpus: f64,
    ) -> Result<(), NodeTableError> {
        self.table.add_node(fqdn, agent_id, task_id, cpus, Instant::now())
    }

    pub fn on_heartbeat(&self, hostname: &str) {
        self.table.on_heartbeat(hostname, Instant::now());
    }

    pub fn check_fqdn_collision(&self, fqdn: &str) -> bool {
        self.table.check_fqdn_collision(fqdn)
    }

    pub fn get_task_info(&self, hostname: &str) -> (String, String) {
        self.table.get_task_info(hostname)
    }

    pub fn get_state(&self, hostname: &str) -> NodeState {
        self.table.get_state(hostname)
    }

    pub fn get_cores_in_provisioning(&self) -> f64 {
        self.table.cores_in_provisioning()
    }

    /// Register a callback invoked once per batch of hostnames that
    /// transition to `Closed`, so the framework scheduler can reclaim
    /// resources exactly once.
    pub fn subscribe_node_closed(&self, callback: NodeClosedCallback) {
        self.reconciler.subscribe_node_closed(callback);
    }

    /// Start the reconciler loop. Idempotent: a second call is a logged
    /// no-op rather than spawning a duplicate loop. Resolves spec §4.6's
    /// unstated "idempotent from the caller's standpoint" requirement via
    /// an `AtomicBool` compare-exchange (a `std::sync::Once` has no
    /// non-blocking "already run" check usable from a sync signature).
    pub fn start(self: &Arc<Self>) {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            Arc::clone(&self.reconciler).start();
        } else {
            warn!("controller already started, ignoring duplicate start() call");
        }
    }
}
