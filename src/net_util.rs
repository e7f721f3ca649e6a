//! Shared DNS resolution ordering (§4.4, §4.5): A records preferred, then
//! AAAA, used by both Stage 1 reachability and Stage 2 port probing.

use std::net::{IpAddr, SocketAddr};

use tokio::net::lookup_host;

/// Resolve `host` and return its addresses with IPv4 results first.
pub async fn resolve_ordered(host: &str, port: u16) -> Vec<SocketAddr> {
    let Ok(addrs) = lookup_host((host, port)).await else {
        return Vec::new();
    };
    let mut v4 = Vec::new();
    let mut v6 = Vec::new();
    for addr in addrs {
        match addr.ip() {
            IpAddr::V4(_) => v4.push(addr),
            IpAddr::V6(_) => v6.push(addr),
        }
    }
    v4.extend(v6);
    v4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_localhost_to_loopback() {
        let addrs = resolve_ordered("localhost", 0).await;
        assert!(addrs.iter().any(|a| a.ip().is_loopback()));
    }

    #[tokio::test]
    async fn unresolvable_host_yields_empty() {
        let addrs = resolve_ordered("this-host-does-not-resolve.invalid", 80).await;
        assert!(addrs.is_empty());
    }
}
