//! Stateless configure state machine (spec §4.3). Given the `Configuring`
//! hostnames from a table snapshot and fresh head-node status, issues the
//! minimal REST actions and returns the subset that is now fully
//! configured and may advance to `Running`.

use tracing::{error, info, warn};

use crate::config::{MESOS_NODE_GROUP_DESCRIPTION, MESOS_NODE_GROUP_NAME};
use crate::rest_client::{NodeStatus, RestClient};

/// Run one configure tick. Empty input is a no-op. REST failures during
/// the side-effecting calls (step 5) are logged and swallowed — nodes
/// already determined `configured` in step 4 are still returned, since
/// their classification doesn't depend on those calls succeeding.
pub async fn run(
    rest: &dyn RestClient,
    configuring_hostnames: &[String],
    node_group: &str,
) -> Vec<String> {
    if configuring_hostnames.is_empty() {
        return Vec::new();
    }

    // Step 1: ensure the Mesos group exists.
    match rest.list_node_groups(MESOS_NODE_GROUP_NAME).await {
        Ok(groups) => {
            if !groups.iter().any(|g| g == MESOS_NODE_GROUP_NAME) {
                if let Err(e) = rest
                    .add_node_group(MESOS_NODE_GROUP_NAME, MESOS_NODE_GROUP_DESCRIPTION)
                    .await
                {
                    warn!(error = %e, "failed to create Mesos node group");
                }
            }
        }
        Err(e) => {
            warn!(error = %e, "failed to list Mesos node group, continuing");
        }
    }

    // Step 2: validate the target group, if one was specified.
    if !node_group.is_empty() {
        match rest.list_node_groups(node_group).await {
            Ok(target_groups) => {
                if !target_groups.iter().any(|g| g.eq_ignore_ascii_case(node_group)) {
                    error!(node_group, "target node group is not created, stopping configure tick");
                    return Vec::new();
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to validate target node group, stopping configure tick");
                return Vec::new();
            }
        }
    }

    // Step 3: pull fresh head-node status for exactly this batch.
    let statuses = match rest.get_node_status_exact(configuring_hostnames).await {
        Ok(statuses) => statuses,
        Err(e) => {
            warn!(error = %e, "failed to get node status, deferring configure tick");
            return Vec::new();
        }
    };
    info!(count = statuses.len(), "got node status for configuring batch");

    // Step 4: bucket.
    let mut unapproved = Vec::new();
    let mut take_offline = Vec::new();
    let mut change_group = Vec::new();
    let mut bring_online = Vec::new();
    let mut configured = Vec::new();

    for status in &statuses {
        bucket_one(status, node_group, &mut unapproved, &mut take_offline, &mut change_group, &mut bring_online, &mut configured);
    }

    // Step 5: issue REST actions, one call per bucket, swallowing failures.
    if !unapproved.is_empty() {
        info!(nodes = ?unapproved, "assigning default compute node template");
        if let Err(e) = rest.assign_default_compute_node_template(&unapproved).await {
            warn!(error = %e, "assign_default_compute_node_template failed");
        }
    }
    if !take_offline.is_empty() {
        info!(nodes = ?take_offline, "taking nodes offline for group reassignment");
        if let Err(e) = rest.take_nodes_offline(&take_offline).await {
            warn!(error = %e, "take_nodes_offline failed");
        }
    }
    if !bring_online.is_empty() {
        info!(nodes = ?bring_online, "bringing nodes online");
        if let Err(e) = rest.bring_nodes_online(&bring_online).await {
            warn!(error = %e, "bring_nodes_online failed");
        }
    }
    if !change_group.is_empty() {
        info!(nodes = ?change_group, "adding nodes to Mesos group");
        if let Err(e) = rest.add_node_to_node_group(MESOS_NODE_GROUP_NAME, &change_group).await {
            warn!(error = %e, "add_node_to_node_group(Mesos) failed");
        }
        if !node_group.is_empty() {
            if let Err(e) = rest.add_node_to_node_group(node_group, &change_group).await {
                warn!(error = %e, "add_node_to_node_group(target) failed");
            }
        }
    }

    configured
}

#[allow(clippy::too_many_arguments)]
fn bucket_one(
    status: &NodeStatus,
    node_group: &str,
    unapproved: &mut Vec<String>,
    take_offline: &mut Vec<String>,
    change_group: &mut Vec<String>,
    bring_online: &mut Vec<String>,
    configured: &mut Vec<String>,
) {
    if status.is_unapproved() {
        unapproved.push(status.node_name.clone());
        return;
    }

    // True when group membership still needs fixing: absent from Mesos,
    // or absent from the specified target group when one was configured.
    let needs_group_change = status.not_in_group(MESOS_NODE_GROUP_NAME)
        || (!node_group.is_empty() && status.not_in_group(node_group));

    if needs_group_change {
        if status.is_online() {
            // Group membership changes require the node to be offline first.
            take_offline.push(status.node_name.clone());
        } else if status.is_offline() {
            change_group.push(status.node_name.clone());
        } else {
            info!(node = %status.node_name, "invalid state while fixing group membership, skipping this tick");
        }
        return;
    }

    // Group membership is already correct.
    if status.is_offline() {
        bring_online.push(status.node_name.clone());
    } else if status.is_online() {
        configured.push(status.node_name.clone());
    } else {
        info!(node = %status.node_name, "invalid state while configuring, skipping this tick");
    }
}
