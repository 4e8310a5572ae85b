//! Error types. Manual `Display`/`Error` impls, no `thiserror` — matches
//! the teacher's `SlotError`/`AgentClientError`/`SandboxError` style.

/// Errors `NodeTable` operations can surface to a caller that cares.
#[derive(Debug)]
pub enum NodeTableError {
    /// `add_node` was called with a hostname already bound to a different
    /// fqdn.
    FqdnCollision {
        hostname: String,
        existing_fqdn: String,
        new_fqdn: String,
    },
}

impl std::fmt::Display for NodeTableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeTableError::FqdnCollision {
                hostname,
                existing_fqdn,
                new_fqdn,
            } => write!(
                f,
                "duplicate hostname {} detected: existing fqdn {}, new fqdn {}",
                hostname, existing_fqdn, new_fqdn
            ),
        }
    }
}

impl std::error::Error for NodeTableError {}

/// Errors from the outbound REST surface (`RestClient`).
#[derive(Debug)]
pub enum RestError {
    /// Transport-level failure (connection refused, timeout, DNS, …).
    Transport(String),
    /// The head-node responded but with a non-success status or a body
    /// that didn't parse as expected.
    Protocol(String),
}

impl std::fmt::Display for RestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RestError::Transport(msg) => write!(f, "REST transport error: {}", msg),
            RestError::Protocol(msg) => write!(f, "REST protocol error: {}", msg),
        }
    }
}

impl std::error::Error for RestError {}
