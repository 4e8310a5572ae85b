//! End-to-end scenario tests, one per spec §8 walkthrough. Drives the
//! `Reconciler` directly (rather than through `Controller::start()`'s
//! background loop) so each tick can be triggered explicitly with a
//! synthetic clock instead of sleeping in real time.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hpc_node_controller::config::ControllerConfig;
use hpc_node_controller::node_table::{NodeState, NodeTable};
use hpc_node_controller::reconciler::Reconciler;
use hpc_node_controller::rest_client::mock::MockRestClient;
use hpc_node_controller::rest_client::{NodeHealth, NodeState as RestState};

fn names(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

fn setup() -> (Arc<NodeTable>, Arc<MockRestClient>, Reconciler) {
    let table = Arc::new(NodeTable::new());
    let rest = Arc::new(MockRestClient::new());
    let config = ControllerConfig::default();
    let reconciler = Reconciler::new(Arc::clone(&table), rest.clone(), config);
    (table, rest, reconciler)
}

/// Scenario 1: happy path through unapproved -> group fix-up -> online ->
/// Running.
#[tokio::test]
async fn happy_path_to_running() {
    let (table, rest, reconciler) = setup();
    let now = Instant::now();

    table.add_node("h1.ex.com", "a1", "t1", 8.0, now).unwrap();
    assert_eq!(table.get_state("h1"), NodeState::Provisioning);
    assert_eq!(table.cores_in_provisioning(), 8.0);

    table.on_heartbeat("H1", now);
    assert_eq!(table.get_state("h1"), NodeState::Configuring);

    // Tick 1: unapproved -> template assigned, no advance.
    rest.set_status("H1", RestState::Offline, NodeHealth::Unapproved, &[]);
    reconciler.tick_at(now).await;
    assert_eq!(table.get_state("h1"), NodeState::Configuring);
    assert_eq!(rest.call_count("assign_default_compute_node_template"), 1);

    // Tick 2: offline, not in Mesos -> added to group.
    rest.set_status("H1", RestState::Offline, NodeHealth::Other, &[]);
    reconciler.tick_at(now).await;
    assert_eq!(table.get_state("h1"), NodeState::Configuring);
    assert_eq!(rest.call_count("add_node_to_node_group"), 1);

    // Tick 3: offline in Mesos -> brought online.
    rest.set_status("H1", RestState::Offline, NodeHealth::Other, &["Mesos"]);
    reconciler.tick_at(now).await;
    assert_eq!(table.get_state("h1"), NodeState::Configuring);
    assert_eq!(rest.call_count("bring_nodes_online"), 1);

    // Tick 4: online in Mesos -> advance to Running.
    rest.set_status("H1", RestState::Online, NodeHealth::Other, &["Mesos"]);
    reconciler.tick_at(now).await;
    assert_eq!(table.get_state("h1"), NodeState::Running);
}

/// Scenario 2: a node that never heartbeats times out of Provisioning,
/// drains, and closes.
#[tokio::test]
async fn provisioning_timeout_then_close() {
    let (table, rest, reconciler) = setup();
    let t0 = Instant::now();
    table.add_node("h2.ex.com", "a2", "t2", 4.0, t0).unwrap();

    let past_provisioning_timeout = t0 + Duration::from_secs(16 * 60);
    reconciler.tick_at(past_provisioning_timeout).await;
    assert_eq!(table.get_state("h2"), NodeState::Draining);

    // Reports online -> take offline.
    rest.set_status("H2", RestState::Online, NodeHealth::Other, &["Mesos"]);
    reconciler.tick_at(past_provisioning_timeout).await;
    assert_eq!(table.get_state("h2"), NodeState::Draining);
    assert_eq!(rest.call_count("take_nodes_offline"), 1);

    // Mock already reflects the take-offline side effect: drained and
    // removed in the same tick, with the callback firing.
    let closed_hosts = Arc::new(std::sync::Mutex::new(Vec::new()));
    let closed_hosts2 = Arc::clone(&closed_hosts);
    reconciler.subscribe_node_closed(Box::new(move |hosts| {
        closed_hosts2.lock().unwrap().extend_from_slice(hosts);
    }));
    reconciler.tick_at(past_provisioning_timeout).await;
    assert_eq!(table.get_state("h2"), NodeState::Closed);
    assert_eq!(closed_hosts.lock().unwrap().as_slice(), &["H2".to_string()]);
}

/// Scenario 3: heartbeat loss from a Running node follows the same
/// drain/close path as provisioning timeout.
#[tokio::test]
async fn heartbeat_loss_drains_running_node() {
    let (table, rest, reconciler) = setup();
    let t0 = Instant::now();
    table.add_node("h3.ex.com", "a3", "t3", 2.0, t0).unwrap();
    table.on_heartbeat("H3", t0);
    rest.set_status("H3", RestState::Online, NodeHealth::Other, &["Mesos"]);
    reconciler.tick_at(t0).await; // Configuring -> Running
    assert_eq!(table.get_state("h3"), NodeState::Running);

    let past_heartbeat_timeout = t0 + Duration::from_secs(4 * 60);
    reconciler.tick_at(past_heartbeat_timeout).await;
    assert_eq!(table.get_state("h3"), NodeState::Draining);
}

/// Scenario 4: continuous idle observation drains a Running node; a single
/// non-idle tick in the middle resets the clock and cancels the drain.
/// Heartbeats keep arriving every tick throughout, as they would from a
/// live agent, so only the idle clock — never the heartbeat timeout — is
/// under test here.
#[tokio::test]
async fn idle_shutdown_reset_by_single_non_idle_tick() {
    let (table, rest, reconciler) = setup();
    let t0 = Instant::now();
    table.add_node("h4.ex.com", "a4", "t4", 2.0, t0).unwrap();
    table.on_heartbeat("H4", t0);
    rest.set_status("H4", RestState::Online, NodeHealth::Other, &["Mesos"]);
    reconciler.tick_at(t0).await; // -> Running
    assert_eq!(table.get_state("h4"), NodeState::Running);

    rest.set_idle(&["H4"]);
    reconciler.tick_at(t0).await; // idle observation starts
    assert_eq!(table.get_state("h4"), NodeState::Running);

    // Interruption: head node no longer reports H4 idle.
    let t1 = t0 + Duration::from_secs(100);
    table.on_heartbeat("H4", t1);
    rest.set_idle(&[]);
    reconciler.tick_at(t1).await;
    assert_eq!(table.get_state("h4"), NodeState::Running);

    // Idle again — clock restarted, so 200s later is not yet over 180s.
    let t2 = t0 + Duration::from_secs(300);
    table.on_heartbeat("H4", t2);
    rest.set_idle(&["H4"]);
    reconciler.tick_at(t2).await;
    assert_eq!(table.get_state("h4"), NodeState::Running);

    let t3 = t0 + Duration::from_secs(300 + 181);
    table.on_heartbeat("H4", t3);
    reconciler.tick_at(t3).await;
    assert_eq!(table.get_state("h4"), NodeState::Draining);
}

/// Scenario 5: a `Closing` node still reported online re-enters `Draining`.
#[tokio::test]
async fn re_drain_on_close_when_still_online() {
    let (table, rest, reconciler) = setup();
    let now = Instant::now();
    table.add_node("h5.ex.com", "a5", "t5", 2.0, now).unwrap();
    table.set_state(&names(&["H5"]), NodeState::Closing);
    rest.set_status("H5", RestState::Online, NodeHealth::Other, &["Mesos"]);

    reconciler.tick_at(now).await;
    assert_eq!(table.get_state("h5"), NodeState::Draining);

    // Next tick proceeds with take-offline as an ordinary drain.
    reconciler.tick_at(now).await;
    assert_eq!(rest.call_count("take_nodes_offline"), 1);
}

/// Scenario 6: an fqdn collision against a `Configuring` host is rejected
/// without disturbing the existing record or firing any callback.
#[tokio::test]
async fn fqdn_collision_rejected() {
    let (table, _rest, _reconciler) = setup();
    let now = Instant::now();
    table.add_node("h6.ex.com", "a6", "t6", 2.0, now).unwrap();
    table.on_heartbeat("H6", now);
    assert_eq!(table.get_state("h6"), NodeState::Configuring);

    let err = table.add_node("h6.other.com", "a7", "t7", 1.0, now).unwrap_err();
    assert!(format!("{}", err).contains("duplicate hostname"));
    assert_eq!(table.get_state("h6"), NodeState::Configuring);
    let (task_id, agent_id) = table.get_task_info("h6");
    assert_eq!((task_id, agent_id), ("t6".to_string(), "a6".to_string()));
}

/// Invariant: two consecutive ticks with no external input and stable REST
/// responses produce no additional state transitions.
#[tokio::test]
async fn stable_ticks_are_idempotent() {
    let (table, rest, reconciler) = setup();
    let now = Instant::now();
    table.add_node("h8.ex.com", "a8", "t8", 2.0, now).unwrap();
    table.on_heartbeat("H8", now);
    rest.set_status("H8", RestState::Online, NodeHealth::Other, &["Mesos"]);

    reconciler.tick_at(now).await;
    assert_eq!(table.get_state("h8"), NodeState::Running);

    let transitions = Arc::new(AtomicUsize::new(0));
    for _ in 0..3 {
        let before = table.get_state("h8");
        reconciler.tick_at(now).await;
        let after = table.get_state("h8");
        if before != after {
            transitions.fetch_add(1, Ordering::SeqCst);
        }
    }
    assert_eq!(transitions.load(Ordering::SeqCst), 0);
}

/// Invariant: re-adding an already-present non-Closed hostname under the
/// identical fqdn is accepted (overwrite) rather than rejected as a
/// collision, and does not touch unrelated hosts.
#[tokio::test]
async fn readd_identical_fqdn_is_not_a_collision() {
    let (table, _rest, _reconciler) = setup();
    let now = Instant::now();
    table.add_node("h9.ex.com", "a9", "t9", 2.0, now).unwrap();
    table.on_heartbeat("H9", now);
    assert_eq!(table.get_state("h9"), NodeState::Configuring);

    table.add_node("h9.ex.com", "a9b", "t9b", 3.0, now).unwrap();
    assert_eq!(table.get_state("h9"), NodeState::Provisioning);
    assert_eq!(table.get_task_info("h9"), ("t9b".to_string(), "a9b".to_string()));
    assert!(!table.check_fqdn_collision("h9.ex.com"));
}
