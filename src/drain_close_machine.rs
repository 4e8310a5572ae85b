//! Stateless drain/close state machines (spec §4.4).

use tracing::{info, warn};

use crate::rest_client::RestClient;

/// Drive `Draining` hosts toward offline. Returns hostnames observed
/// already offline (ready to advance to `Closing`). REST failures on the
/// take-offline call are logged and swallowed; drained names are returned
/// regardless.
pub async fn drain_step(rest: &dyn RestClient, node_names: &[String]) -> Vec<String> {
    if node_names.is_empty() {
        return Vec::new();
    }

    let statuses = match rest.get_node_status_exact(node_names).await {
        Ok(statuses) => statuses,
        Err(e) => {
            warn!(error = %e, "failed to get node status while draining, deferring");
            return Vec::new();
        }
    };

    let mut take_offline = Vec::new();
    let mut drained = Vec::new();
    for status in &statuses {
        if status.is_online() {
            take_offline.push(status.node_name.clone());
        } else if status.is_offline() {
            drained.push(status.node_name.clone());
        } else {
            info!(node = %status.node_name, "invalid state while draining, skipping this tick");
        }
    }

    if !take_offline.is_empty() {
        info!(nodes = ?take_offline, "taking node(s) offline");
        if let Err(e) = rest.take_nodes_offline(&take_offline).await {
            warn!(error = %e, "take_nodes_offline failed while draining");
        }
    }

    drained
}

/// Drive `Closing` hosts toward removal. Returns `(closed, re_drain)`:
/// `closed` hostnames may advance to `Closed` and fire callbacks;
/// `re_drain` hostnames drifted back online and must re-enter `Draining`.
pub async fn close_step(rest: &dyn RestClient, node_names: &[String]) -> (Vec<String>, Vec<String>) {
    if node_names.is_empty() {
        return (Vec::new(), Vec::new());
    }

    let statuses = match rest.get_node_status_exact(node_names).await {
        Ok(statuses) => statuses,
        Err(e) => {
            warn!(error = %e, "failed to get node status while closing, deferring");
            return (Vec::new(), Vec::new());
        }
    };

    let mut closed = Vec::new();
    let mut re_drain = Vec::new();
    let mut to_remove = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for status in &statuses {
        seen.insert(status.node_name.clone());
        if status.is_unapproved() {
            closed.push(status.node_name.clone());
        } else if !status.is_offline() {
            re_drain.push(status.node_name.clone());
        } else {
            to_remove.push(status.node_name.clone());
        }
    }

    // Names absent from the returned status list are already gone.
    for name in node_names {
        if !seen.contains(name) {
            closed.push(name.clone());
        }
    }

    if !to_remove.is_empty() {
        info!(nodes = ?to_remove, "removing node(s)");
        if let Err(e) = rest.remove_nodes(&to_remove).await {
            warn!(error = %e, "remove_nodes failed, next tick will re-verify via status");
        }
        // Reported closed regardless of the remove call's outcome.
        closed.extend(to_remove);
    }

    (closed, re_drain)
}
