//! Client identification utilities
//!
//! Common functions for identifying clients via HTTP headers.

use axum::http::HeaderMap;
use std::net::IpAddr;

/// Extract client IP address
///
/// With `trusted_proxy_hops == 0` the `X-Forwarded-For` header is ignored and
/// only the socket address counts; any client can write that header.
///
/// Behind `n` trusted proxies, the entry the outermost trusted proxy appended
/// (the `n`-th from the right) is the client. Entries to its left were sent by
/// the client and are never used. A chain shorter than `n`, or an entry that
/// is not an IP, falls back to the socket address.
///
/// ## Arguments
/// * `headers` - HTTP request headers
/// * `direct_ip` - Direct connection IP address
/// * `trusted_proxy_hops` - Number of reverse proxies in front of this service
///
/// ## Returns
/// The client IP address, or None if not determinable
pub fn extract_client_ip(
    headers: &HeaderMap,
    direct_ip: Option<IpAddr>,
    trusted_proxy_hops: usize,
) -> Option<IpAddr> {
    if trusted_proxy_hops == 0 {
        return direct_ip;
    }

    let forwarded = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|xff| xff.split(','))
        .map(str::trim)
        .collect::<Vec<_>>();

    forwarded
        .len()
        .checked_sub(trusted_proxy_hops)
        .and_then(|idx| forwarded[idx].parse::<IpAddr>().ok())
        .or(direct_ip)
}
