//! Periodic tick composing the three machines against the `NodeTable`
//! (spec §4.5). Grounded on `sandchest-node/src/heartbeat.rs`'s
//! `start_heartbeat` loop shape: a `tokio::time::interval` driving a
//! `loop { interval.tick().await; ... }`, spawned once from the binary.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::ControllerConfig;
use crate::node_table::{NodeState, NodeTable};
use crate::rest_client::RestClient;
use crate::timeout::TimeoutTracker;
use crate::{configure_machine, drain_close_machine};

/// Registered subscriber for terminal-close notifications.
pub type NodeClosedCallback = Box<dyn Fn(&[String]) + Send + Sync>;

pub struct Reconciler {
    table: Arc<NodeTable>,
    rest: Arc<dyn RestClient>,
    config: ControllerConfig,
    timeout_tracker: Mutex<TimeoutTracker>,
    callbacks: Mutex<Vec<NodeClosedCallback>>,
}

impl Reconciler {
    pub fn new(table: Arc<NodeTable>, rest: Arc<dyn RestClient>, config: ControllerConfig) -> Self {
        Self {
            table,
            rest,
            config,
            timeout_tracker: Mutex::new(TimeoutTracker::new()),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe_node_closed(&self, callback: NodeClosedCallback) {
        self.callbacks.lock().unwrap().push(callback);
    }

    /// Run one tick using the current wall clock. Returns the hostnames
    /// that advanced to `Closed` this tick (loop callers ignore the
    /// return; tests use it directly).
    pub async fn tick(&self) -> Vec<String> {
        self.tick_at(Instant::now()).await
    }

    /// Same as `tick`, but with an injectable `now` so tests can simulate
    /// timeouts without sleeping. `now` is computed once per call by the
    /// caller, never captured as a stale default (spec §9).
    pub async fn tick_at(&self, now: Instant) -> Vec<String> {
        self.configure_phase().await;
        self.timeout_phase(now).await;
        let closed = self.drain_close_phase().await;
        if !closed.is_empty() {
            self.dispatch_closed(&closed);
        }
        closed
    }

    async fn configure_phase(&self) {
        let configuring: Vec<String> = self
            .table
            .snapshot()
            .into_iter()
            .filter(|r| r.state == NodeState::Configuring)
            .map(|r| r.hostname)
            .collect();

        if configuring.is_empty() {
            return;
        }
        info!(hosts = ?configuring, "nodes in configuring");
        let configured =
            configure_machine::run(self.rest.as_ref(), &configuring, &self.config.node_group).await;
        if !configured.is_empty() {
            info!(hosts = ?configured, "nodes configured");
            self.table.set_state(&configured, NodeState::Running);
        }
    }

    async fn timeout_phase(&self, now: Instant) {
        let snapshot = self.table.snapshot();
        let buckets = {
            let tracker = self.timeout_tracker.lock().unwrap();
            tracker.classify(
                &snapshot,
                now,
                self.config.provisioning_timeout,
                self.config.heartbeat_timeout,
            )
        };

        if !buckets.provision_timeout.is_empty() {
            info!(hosts = ?buckets.provision_timeout, "provisioning timeout");
            self.drain(&buckets.provision_timeout);
        }
        if !buckets.heartbeat_timeout.is_empty() {
            info!(hosts = ?buckets.heartbeat_timeout, "heartbeat timeout");
            self.drain(&buckets.heartbeat_timeout);
        }

        if !buckets.running_ok.is_empty() {
            match self.rest.check_nodes_idle(&buckets.running_ok).await {
                Ok(idle_nodes) => {
                    let idle_hosts: Vec<String> =
                        idle_nodes.into_iter().map(|n| n.node_name).collect();
                    info!(hosts = ?idle_hosts, "idle hosts reported");
                    let idle_timed_out = {
                        let mut tracker = self.timeout_tracker.lock().unwrap();
                        tracker.idle_timeout(&idle_hosts, now, self.config.node_idle_timeout)
                    };
                    if !idle_timed_out.is_empty() {
                        info!(hosts = ?idle_timed_out, "idle timeout");
                        self.drain(&idle_timed_out);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to check idle nodes, deferring");
                }
            }
        }
    }

    fn drain(&self, hostnames: &[String]) {
        self.table.set_state(hostnames, NodeState::Draining);
        self.timeout_tracker.lock().unwrap().mark_removed(hostnames);
    }

    async fn drain_close_phase(&self) -> Vec<String> {
        let snapshot = self.table.snapshot();
        let draining: Vec<String> = snapshot
            .iter()
            .filter(|r| r.state == NodeState::Draining)
            .map(|r| r.hostname.clone())
            .collect();
        let mut closing: Vec<String> = snapshot
            .iter()
            .filter(|r| r.state == NodeState::Closing)
            .map(|r| r.hostname.clone())
            .collect();

        if !draining.is_empty() {
            let drained = drain_close_machine::drain_step(self.rest.as_ref(), &draining).await;
            if !drained.is_empty() {
                info!(hosts = ?drained, "drained nodes");
                self.table.set_state(&drained, NodeState::Closing);
                self.timeout_tracker.lock().unwrap().mark_removed(&drained);
                closing.extend(drained);
            }
        }

        if closing.is_empty() {
            return Vec::new();
        }

        let (closed, re_drain) = drain_close_machine::close_step(self.rest.as_ref(), &closing).await;
        if !closed.is_empty() {
            info!(hosts = ?closed, "closed nodes");
            self.table.set_state(&closed, NodeState::Closed);
            self.timeout_tracker.lock().unwrap().mark_removed(&closed);
        }
        if !re_drain.is_empty() {
            info!(hosts = ?re_drain, "nodes failed to close, re-draining");
            self.table.set_state(&re_drain, NodeState::Draining);
            self.timeout_tracker.lock().unwrap().mark_removed(&re_drain);
        }
        closed
    }

    /// Fire every registered callback with the full closed batch, outside
    /// of any table/tracker lock. A panicking subscriber is caught, logged,
    /// and does not prevent the remaining callbacks from running — the
    /// fulfillment of spec §7/§9's note about the original's buggy
    /// `_exec_callback`.
    fn dispatch_closed(&self, closed: &[String]) {
        let callbacks = self.callbacks.lock().unwrap();
        for callback in callbacks.iter() {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| callback(closed)));
            if let Err(panic) = result {
                let msg = panic_message(&panic);
                error!(error = %msg, "node_closed callback panicked");
            }
        }
    }

    /// Spawn the reconciler loop at the fixed cadence. Ticks are serial:
    /// the loop body awaits each `tick()` to completion before the next
    /// `interval.tick().await` can fire.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(crate::config::CHECK_CONFIGURING_NODES_INTERVAL);
            loop {
                interval.tick().await;
                self.tick().await;
            }
        })
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
