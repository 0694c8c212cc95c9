// Connection Target Classification
// Decides whether a configured host is on this machine or a private network.
// Advisory only: it gates warnings and confirmations, never access.

use ipnet::Ipv4Net;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::LazyLock;

const LOCAL_RANGES: [&str; 3] = ["192.168.0.0/16", "10.0.0.0/8", "172.16.0.0/12"];

static LOCAL_NETWORKS: LazyLock<Vec<Ipv4Net>> = LazyLock::new(|| {
    LOCAL_RANGES
        .iter()
        .filter_map(|range| range.parse().ok())
        .collect()
});

/// Blank hosts, `localhost` and loopback literals
pub fn is_local_host_name(host: Option<&str>) -> bool {
    let host = match host.map(str::trim) {
        None => return true,
        Some(h) if h.is_empty() => return true,
        Some(h) => h,
    };

    if host.eq_ignore_ascii_case("localhost") || host == "." || host.eq_ignore_ascii_case("(local)") {
        return true;
    }

    host.parse::<IpAddr>().map(|ip| ip.is_loopback()).unwrap_or(false)
}

/// True for loopback addresses and the 10/8, 172.16/12 and 192.168/16 ranges
pub fn is_local_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || LOCAL_NETWORKS.iter().any(|net| net.contains(&v4)),
        IpAddr::V6(v6) => v6.is_loopback(),
    }
}

/// First IPv4 address the host resolves to; lookup failures yield `None`
pub async fn resolve_ipv4(host: &str) -> Option<Ipv4Addr> {
    // Literal addresses skip the resolver
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return Some(ip);
    }

    match tokio::net::lookup_host((host, 0)).await {
        Ok(addrs) => addrs
            .filter_map(|addr| match addr.ip() {
                IpAddr::V4(v4) => Some(v4),
                IpAddr::V6(_) => None,
            })
            .next(),
        Err(e) => {
            tracing::debug!(host, error = %e, "host did not resolve");
            None
        }
    }
}

/// Whether a connection target counts as local
pub async fn is_local_database(host: Option<&str>) -> bool {
    if is_local_host_name(host) {
        return true;
    }

    let Some(host) = host.map(str::trim) else {
        return true;
    };

    match resolve_ipv4(host).await {
        Some(ip) => is_local_ip(IpAddr::V4(ip)),
        None => false,
    }
}
