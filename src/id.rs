//! Hostname/FQDN canonicalization.
//!
//! All comparisons in this crate are case-insensitive; we normalize to
//! uppercase once at the boundary instead of re-uppercasing on every lookup.

/// Uppercase an FQDN for storage and comparison.
pub fn canonical_fqdn(fqdn: &str) -> String {
    fqdn.to_uppercase()
}

/// Uppercase a bare hostname for storage and comparison.
pub fn canonical_hostname(hostname: &str) -> String {
    hostname.to_uppercase()
}

/// Derive the short hostname from an already-uppercased FQDN: the prefix up
/// to (not including) the first `.`.
pub fn hostname_from_fqdn(fqdn: &str) -> String {
    match fqdn.split_once('.') {
        Some((host, _rest)) => host.to_string(),
        None => fqdn.to_string(),
    }
}
