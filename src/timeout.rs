use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::id;
use crate::node_table::{NodeRecord, NodeState};

/// Disjoint buckets produced by `TimeoutTracker::classify`.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TimeoutBuckets {
    pub provision_timeout: Vec<String>,
    pub heartbeat_timeout: Vec<String>,
    pub running_ok: Vec<String>,
}

/// Classifies records by elapsed time since last heartbeat, and maintains
/// the idle-observation table used to decide when a steady-state node has
/// been reported idle for long enough to drain. Owned exclusively by the
/// `Reconciler` — no internal locking needed, every method takes `&mut
/// self`.
#[derive(Default)]
pub struct TimeoutTracker {
    idle_observed_since: HashMap<String, Instant>,
    removed: HashSet<String>,
}

impl TimeoutTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bucket a table snapshot by elapsed time since `last_heartbeat`.
    /// Records in states other than `Provisioning`/`Running` are excluded.
    /// Boundary: a heartbeat landing exactly at `now - last == timeout` IS
    /// a timeout (spec uses strict `>=`).
    pub fn classify(
        &self,
        records: &[NodeRecord],
        now: Instant,
        provisioning_timeout: Duration,
        heartbeat_timeout: Duration,
    ) -> TimeoutBuckets {
        let mut buckets = TimeoutBuckets::default();
        for record in records {
            match record.state {
                NodeState::Provisioning => {
                    if now.saturating_duration_since(record.last_heartbeat) >= provisioning_timeout
                    {
                        warn!(hostname = %record.hostname, "provisioning timeout");
                        buckets.provision_timeout.push(record.hostname.clone());
                    }
                }
                NodeState::Running => {
                    if now.saturating_duration_since(record.last_heartbeat) >= heartbeat_timeout {
                        warn!(hostname = %record.hostname, "heartbeat lost");
                        buckets.heartbeat_timeout.push(record.hostname.clone());
                    } else {
                        buckets.running_ok.push(record.hostname.clone());
                    }
                }
                _ => {}
            }
        }
        buckets
    }

    /// Record hostnames that have just been ordered into
    /// draining/closing/closed, so a later re-entry into idle observation
    /// resets the clock instead of inheriting a stale streak.
    pub fn mark_removed(&mut self, hostnames: &[String]) {
        for h in hostnames {
            self.removed.insert(id::canonical_hostname(h));
        }
    }

    /// Update the idle-observation table from the head-node's current idle
    /// report and return hostnames whose continuous idle streak now
    /// exceeds `node_idle_timeout`.
    ///
    /// Any hostname not present in `idle_hostnames` is dropped from the
    /// table (a single non-idle tick resets the streak). A hostname that
    /// re-appears after having been in `RemovedSet` (i.e. it previously
    /// drained and has since come back online) has its clock reset and is
    /// dropped from `RemovedSet`.
    pub fn idle_timeout(
        &mut self,
        idle_hostnames: &[String],
        now: Instant,
        node_idle_timeout: Duration,
    ) -> Vec<String> {
        let mut next = HashMap::with_capacity(idle_hostnames.len());
        for raw in idle_hostnames {
            let h = id::canonical_hostname(raw);
            if let Some(&observed_since) = self.idle_observed_since.get(&h) {
                if self.removed.contains(&h) {
                    next.insert(h.clone(), now);
                    self.removed.remove(&h);
                } else {
                    next.insert(h, observed_since);
                }
            } else {
                next.insert(h, now);
            }
        }
        self.idle_observed_since = next;

        let timed_out: Vec<String> = self
            .idle_observed_since
            .iter()
            .filter(|(_, &since)| now.saturating_duration_since(since) > node_idle_timeout)
            .map(|(h, _)| h.clone())
            .collect();
        info!(count = timed_out.len(), "idle timeout observation");
        timed_out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_table::NodeRecord;
    use std::time::Duration;

    fn record(hostname: &str, state: NodeState, last_heartbeat: Instant) -> NodeRecord {
        NodeRecord {
            hostname: hostname.to_string(),
            fqdn: format!("{}.EX.COM", hostname),
            agent_id: "a".to_string(),
            task_id: "t".to_string(),
            cpus: 1.0,
            last_heartbeat,
            state,
        }
    }

    #[test]
    fn classify_buckets_by_state_and_elapsed() {
        let tracker = TimeoutTracker::new();
        let now = Instant::now();
        let recs = vec![
            record("H1", NodeState::Provisioning, now - Duration::from_secs(20 * 60)),
            record("H2", NodeState::Running, now - Duration::from_secs(4 * 60)),
            record("H3", NodeState::Running, now - Duration::from_secs(1 * 60)),
            record("H4", NodeState::Configuring, now),
        ];
        let buckets = tracker.classify(
            &recs,
            now,
            Duration::from_secs(15 * 60),
            Duration::from_secs(3 * 60),
        );
        assert_eq!(buckets.provision_timeout, vec!["H1".to_string()]);
        assert_eq!(buckets.heartbeat_timeout, vec!["H2".to_string()]);
        assert_eq!(buckets.running_ok, vec!["H3".to_string()]);
    }

    #[test]
    fn boundary_exact_timeout_triggers() {
        let tracker = TimeoutTracker::new();
        let now = Instant::now();
        let timeout = Duration::from_secs(180);
        let recs = vec![record("H1", NodeState::Running, now - timeout)];
        let buckets = tracker.classify(&recs, now, Duration::from_secs(900), timeout);
        assert_eq!(buckets.heartbeat_timeout, vec!["H1".to_string()]);
        assert!(buckets.running_ok.is_empty());
    }

    #[test]
    fn boundary_one_tick_before_timeout_is_ok() {
        let tracker = TimeoutTracker::new();
        let now = Instant::now();
        let timeout = Duration::from_secs(180);
        let recs = vec![record(
            "H1",
            NodeState::Running,
            now - timeout + Duration::from_secs(1),
        )];
        let buckets = tracker.classify(&recs, now, Duration::from_secs(900), timeout);
        assert!(buckets.heartbeat_timeout.is_empty());
        assert_eq!(buckets.running_ok, vec!["H1".to_string()]);
    }

    #[test]
    fn idle_timeout_starts_clock_on_first_observation() {
        let mut tracker = TimeoutTracker::new();
        let now = Instant::now();
        let timed_out = tracker.idle_timeout(&["H1".to_string()], now, Duration::from_secs(180));
        assert!(timed_out.is_empty());
    }

    #[test]
    fn idle_timeout_fires_after_continuous_observation() {
        let mut tracker = TimeoutTracker::new();
        let t0 = Instant::now();
        tracker.idle_timeout(&["H1".to_string()], t0, Duration::from_secs(180));
        let t1 = t0 + Duration::from_secs(200);
        let timed_out = tracker.idle_timeout(&["H1".to_string()], t1, Duration::from_secs(180));
        assert_eq!(timed_out, vec!["H1".to_string()]);
    }

    #[test]
    fn idle_timeout_interrupted_by_non_idle_tick_resets() {
        let mut tracker = TimeoutTracker::new();
        let t0 = Instant::now();
        tracker.idle_timeout(&["H1".to_string()], t0, Duration::from_secs(180));
        // H1 not idle this tick -> dropped from the table.
        tracker.idle_timeout(&[], t0 + Duration::from_secs(100), Duration::from_secs(180));
        // H1 idle again -> clock restarts.
        let t2 = t0 + Duration::from_secs(300);
        let timed_out = tracker.idle_timeout(&["H1".to_string()], t2, Duration::from_secs(180));
        assert!(timed_out.is_empty());
    }

    #[test]
    fn idle_timeout_resets_clock_for_removed_hostname() {
        let mut tracker = TimeoutTracker::new();
        let t0 = Instant::now();
        tracker.mark_removed(&["H1".to_string()]);
        // H1 was drained/closed previously, now reported idle again after
        // re-entering Running. Even though it's "tracked" for the first
        // time here, mark_removed alone shouldn't start a streak; but if
        // it had an existing streak, removal resets it.
        tracker.idle_observed_since.insert("H1".to_string(), t0);
        let t1 = t0 + Duration::from_secs(200);
        let timed_out = tracker.idle_timeout(&["H1".to_string()], t1, Duration::from_secs(180));
        // Clock was reset to t1 because H1 was in removed set, so no timeout yet.
        assert!(timed_out.is_empty());
        assert!(!tracker.removed.contains("H1"));
    }

    #[test]
    fn idle_timeout_drops_hostnames_absent_from_report() {
        let mut tracker = TimeoutTracker::new();
        let t0 = Instant::now();
        tracker.idle_timeout(&["H1".to_string(), "H2".to_string()], t0, Duration::from_secs(180));
        let t1 = t0 + Duration::from_secs(200);
        let timed_out = tracker.idle_timeout(&["H2".to_string()], t1, Duration::from_secs(180));
        assert_eq!(timed_out, vec!["H2".to_string()]);
    }
}
