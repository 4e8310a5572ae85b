//! The outbound REST surface (spec §6.2). `RestClient` is the interface
//! the controller depends on; the head-node HTTP service and its exact
//! routes are deliberately out of scope (spec §1), so `HttpRestClient` is
//! one reasonable adapter rather than a spec requirement.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RestError;

/// Head-node-reported online/offline state for a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    Online,
    Offline,
    #[serde(other)]
    Other,
}

/// Head-node-reported health/approval state for a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeHealth {
    Unapproved,
    #[serde(other)]
    Other,
}

/// One node's head-node status, as returned by `get_node_status_exact`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    #[serde(rename = "NodeName")]
    pub node_name: String,
    #[serde(rename = "NodeState")]
    pub node_state: NodeState,
    #[serde(rename = "NodeHealth")]
    pub node_health: NodeHealth,
    #[serde(rename = "NodeGroup")]
    pub node_group: Vec<String>,
}

/// One node reported idle by `check_nodes_idle`. Kept as a small wire
/// struct (rather than a bare `String`) to match the `list[{node_name}]`
/// shape spec §6.2 documents, the same convention `NodeStatus` follows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdleNode {
    pub node_name: String,
}

impl NodeStatus {
    pub fn is_unapproved(&self) -> bool {
        self.node_health == NodeHealth::Unapproved
    }

    pub fn is_online(&self) -> bool {
        self.node_state == NodeState::Online
    }

    pub fn is_offline(&self) -> bool {
        self.node_state == NodeState::Offline
    }

    /// True when the node is *not* a member of `group_name` (case
    /// insensitive). Named for what it checks, resolving spec.md §9's
    /// open question about the original's inverted predicate name.
    pub fn not_in_group(&self, group_name: &str) -> bool {
        !self
            .node_group
            .iter()
            .any(|g| g.eq_ignore_ascii_case(group_name))
    }
}

/// The exact set of head-node operations the controller depends on. All
/// methods take/return the well-known fields in spec §6.2.
#[async_trait]
pub trait RestClient: Send + Sync {
    async fn list_node_groups(&self, name_filter: &str) -> Result<Vec<String>, RestError>;
    async fn add_node_group(&self, name: &str, description: &str) -> Result<(), RestError>;
    async fn get_node_status_exact(
        &self,
        names: &[String],
    ) -> Result<Vec<NodeStatus>, RestError>;
    async fn assign_default_compute_node_template(
        &self,
        names: &[String],
    ) -> Result<(), RestError>;
    async fn take_nodes_offline(&self, names: &[String]) -> Result<(), RestError>;
    async fn bring_nodes_online(&self, names: &[String]) -> Result<(), RestError>;
    async fn add_node_to_node_group(
        &self,
        group: &str,
        names: &[String],
    ) -> Result<(), RestError>;
    async fn check_nodes_idle(&self, names: &[String]) -> Result<Vec<IdleNode>, RestError>;
    async fn remove_nodes(&self, names: &[String]) -> Result<(), RestError>;
}

/// A thin `reqwest`-based adapter. Route shapes below are this adapter's
/// own convention — the real head-node API's routes are out of scope.
pub struct HttpRestClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRestClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn post_names(&self, path: &str, names: &[String]) -> Result<(), RestError> {
        #[derive(Serialize)]
        struct Body<'a> {
            names: &'a [String],
        }
        self.client
            .post(self.url(path))
            .json(&Body { names })
            .send()
            .await
            .map_err(|e| RestError::Transport(e.to_string()))?
            .error_for_status()
            .map_err(|e| RestError::Protocol(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl RestClient for HttpRestClient {
    async fn list_node_groups(&self, name_filter: &str) -> Result<Vec<String>, RestError> {
        let resp = self
            .client
            .get(self.url("/nodegroups"))
            .query(&[("filter", name_filter)])
            .send()
            .await
            .map_err(|e| RestError::Transport(e.to_string()))?;
        resp.json::<Vec<String>>()
            .await
            .map_err(|e| RestError::Protocol(e.to_string()))
    }

    async fn add_node_group(&self, name: &str, description: &str) -> Result<(), RestError> {
        #[derive(Serialize)]
        struct Body<'a> {
            name: &'a str,
            description: &'a str,
        }
        self.client
            .post(self.url("/nodegroups"))
            .json(&Body { name, description })
            .send()
            .await
            .map_err(|e| RestError::Transport(e.to_string()))?
            .error_for_status()
            .map_err(|e| RestError::Protocol(e.to_string()))?;
        Ok(())
    }

    async fn get_node_status_exact(
        &self,
        names: &[String],
    ) -> Result<Vec<NodeStatus>, RestError> {
        let resp = self
            .client
            .get(self.url("/nodes/status"))
            .query(&[("names", names.join(","))])
            .send()
            .await
            .map_err(|e| RestError::Transport(e.to_string()))?;
        resp.json::<Vec<NodeStatus>>()
            .await
            .map_err(|e| RestError::Protocol(e.to_string()))
    }

    async fn assign_default_compute_node_template(
        &self,
        names: &[String],
    ) -> Result<(), RestError> {
        self.post_names("/nodes/assign-default-template", names).await
    }

    async fn take_nodes_offline(&self, names: &[String]) -> Result<(), RestError> {
        self.post_names("/nodes/offline", names).await
    }

    async fn bring_nodes_online(&self, names: &[String]) -> Result<(), RestError> {
        self.post_names("/nodes/online", names).await
    }

    async fn add_node_to_node_group(
        &self,
        group: &str,
        names: &[String],
    ) -> Result<(), RestError> {
        #[derive(Serialize)]
        struct Body<'a> {
            group: &'a str,
            names: &'a [String],
        }
        self.client
            .post(self.url("/nodegroups/members"))
            .json(&Body { group, names })
            .send()
            .await
            .map_err(|e| RestError::Transport(e.to_string()))?
            .error_for_status()
            .map_err(|e| RestError::Protocol(e.to_string()))?;
        Ok(())
    }

    async fn check_nodes_idle(&self, names: &[String]) -> Result<Vec<IdleNode>, RestError> {
        let resp = self
            .client
            .get(self.url("/nodes/idle"))
            .query(&[("names", names.join(","))])
            .send()
            .await
            .map_err(|e| RestError::Transport(e.to_string()))?;
        resp.json::<Vec<IdleNode>>()
            .await
            .map_err(|e| RestError::Protocol(e.to_string()))
    }

    async fn remove_nodes(&self, names: &[String]) -> Result<(), RestError> {
        self.post_names("/nodes/remove", names).await
    }
}

/// A scriptable in-memory double for tests, shared across unit and
/// integration tests alike. Gated so it never ships in a non-test build.
#[cfg(any(test, feature = "test-util"))]
pub mod mock {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockState {
        groups: HashSet<String>,
        statuses: HashMap<String, NodeStatus>,
        idle: HashSet<String>,
        calls: Vec<String>,
        fail_once: HashSet<String>,
    }

    /// In-memory stand-in for the head node. Tests drive it directly
    /// (`set_status`, `set_idle`) between reconciler ticks to script the
    /// head node's side of the conversation.
    #[derive(Default)]
    pub struct MockRestClient {
        state: Mutex<MockState>,
    }

    impl MockRestClient {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_status(&self, name: &str, state: NodeState, health: NodeHealth, groups: &[&str]) {
            let mut s = self.state.lock().unwrap();
            s.statuses.insert(
                name.to_string(),
                NodeStatus {
                    node_name: name.to_string(),
                    node_state: state,
                    node_health: health,
                    node_group: groups.iter().map(|g| g.to_string()).collect(),
                },
            );
        }

        pub fn remove_status(&self, name: &str) {
            self.state.lock().unwrap().statuses.remove(name);
        }

        pub fn set_idle(&self, names: &[&str]) {
            let mut s = self.state.lock().unwrap();
            s.idle = names.iter().map(|n| n.to_string()).collect();
        }

        pub fn has_group(&self, name: &str) -> bool {
            self.state.lock().unwrap().groups.contains(name)
        }

        pub fn calls(&self) -> Vec<String> {
            self.state.lock().unwrap().calls.clone()
        }

        pub fn call_count(&self, method: &str) -> usize {
            self.calls().iter().filter(|c| c.as_str() == method).count()
        }

        /// Make the next invocation of `method` return a transport error.
        pub fn fail_once(&self, method: &str) {
            self.state.lock().unwrap().fail_once.insert(method.to_string());
        }

        fn maybe_fail(&self, s: &mut MockState, method: &str) -> Result<(), RestError> {
            if s.fail_once.remove(method) {
                return Err(RestError::Transport(format!("injected failure for {}", method)));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl RestClient for MockRestClient {
        async fn list_node_groups(&self, name_filter: &str) -> Result<Vec<String>, RestError> {
            let mut s = self.state.lock().unwrap();
            s.calls.push("list_node_groups".to_string());
            self.maybe_fail(&mut s, "list_node_groups")?;
            Ok(s.groups
                .iter()
                .filter(|g| g.eq_ignore_ascii_case(name_filter))
                .cloned()
                .collect())
        }

        async fn add_node_group(&self, name: &str, _description: &str) -> Result<(), RestError> {
            let mut s = self.state.lock().unwrap();
            s.calls.push("add_node_group".to_string());
            self.maybe_fail(&mut s, "add_node_group")?;
            s.groups.insert(name.to_string());
            Ok(())
        }

        async fn get_node_status_exact(
            &self,
            names: &[String],
        ) -> Result<Vec<NodeStatus>, RestError> {
            let mut s = self.state.lock().unwrap();
            s.calls.push("get_node_status_exact".to_string());
            self.maybe_fail(&mut s, "get_node_status_exact")?;
            Ok(names
                .iter()
                .filter_map(|n| s.statuses.get(n).cloned())
                .collect())
        }

        async fn assign_default_compute_node_template(
            &self,
            names: &[String],
        ) -> Result<(), RestError> {
            let mut s = self.state.lock().unwrap();
            s.calls.push("assign_default_compute_node_template".to_string());
            self.maybe_fail(&mut s, "assign_default_compute_node_template")?;
            for n in names {
                if let Some(status) = s.statuses.get_mut(n) {
                    status.node_health = NodeHealth::Other;
                }
            }
            Ok(())
        }

        async fn take_nodes_offline(&self, names: &[String]) -> Result<(), RestError> {
            let mut s = self.state.lock().unwrap();
            s.calls.push("take_nodes_offline".to_string());
            self.maybe_fail(&mut s, "take_nodes_offline")?;
            for n in names {
                if let Some(status) = s.statuses.get_mut(n) {
                    status.node_state = NodeState::Offline;
                }
            }
            Ok(())
        }

        async fn bring_nodes_online(&self, names: &[String]) -> Result<(), RestError> {
            let mut s = self.state.lock().unwrap();
            s.calls.push("bring_nodes_online".to_string());
            self.maybe_fail(&mut s, "bring_nodes_online")?;
            for n in names {
                if let Some(status) = s.statuses.get_mut(n) {
                    status.node_state = NodeState::Online;
                }
            }
            Ok(())
        }

        async fn add_node_to_node_group(
            &self,
            group: &str,
            names: &[String],
        ) -> Result<(), RestError> {
            let mut s = self.state.lock().unwrap();
            s.calls.push("add_node_to_node_group".to_string());
            self.maybe_fail(&mut s, "add_node_to_node_group")?;
            for n in names {
                if let Some(status) = s.statuses.get_mut(n) {
                    if !status.node_group.iter().any(|g| g.eq_ignore_ascii_case(group)) {
                        status.node_group.push(group.to_string());
                    }
                }
            }
            Ok(())
        }

        async fn check_nodes_idle(&self, names: &[String]) -> Result<Vec<IdleNode>, RestError> {
            let mut s = self.state.lock().unwrap();
            s.calls.push("check_nodes_idle".to_string());
            self.maybe_fail(&mut s, "check_nodes_idle")?;
            Ok(names
                .iter()
                .filter(|n| s.idle.contains(n.as_str()))
                .cloned()
                .map(|node_name| IdleNode { node_name })
                .collect())
        }

        async fn remove_nodes(&self, names: &[String]) -> Result<(), RestError> {
            let mut s = self.state.lock().unwrap();
            s.calls.push("remove_nodes".to_string());
            self.maybe_fail(&mut s, "remove_nodes")?;
            for n in names {
                s.statuses.remove(n);
            }
            Ok(())
        }
    }
}
