//! Network allow-list for model endpoints.
//!
//! Only loopback hosts and hosts named explicitly by the operator are
//! reachable. Literal addresses in private, link-local, or unspecified ranges
//! are refused even when listed.

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use hyper::Uri;
use tracing::warn;

use crate::error::{AdapterError, AdapterResult};

/// Validates model endpoints before any request is sent.
#[derive(Clone, Debug, Default)]
pub struct EndpointGuard {
    allowed_hosts: BTreeSet<String>,
}

fn is_private_v4(ip: Ipv4Addr) -> bool {
    ip.is_private() || ip.is_link_local() || ip.is_unspecified() || ip.is_broadcast()
}

fn is_private_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_unspecified()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (first & 0xffc0) == 0xfe80
        || ip.to_ipv4_mapped().is_some_and(is_private_v4)
}

fn is_loopback(host: &str, ip: Option<IpAddr>) -> bool {
    match ip {
        Some(IpAddr::V4(v4)) => v4.is_loopback(),
        Some(IpAddr::V6(v6)) => {
            v6.is_loopback() || v6.to_ipv4_mapped().is_some_and(|v4| v4.is_loopback())
        }
        None => host == "localhost",
    }
}

impl EndpointGuard {
    /// Guard permitting loopback plus the supplied hosts (case-insensitive).
    #[must_use]
    pub fn new<I, S>(allowed_hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed_hosts: allowed_hosts
                .into_iter()
                .map(|host| host.as_ref().trim().to_ascii_lowercase())
                .filter(|host| !host.is_empty())
                .collect(),
        }
    }

    /// Checks `endpoint` and returns the parsed URI.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Configuration`] for unparsable URLs and
    /// [`AdapterError::EndpointBlocked`] for anything outside the allow-list.
    pub fn check(&self, endpoint: &str) -> AdapterResult<Uri> {
        let uri: Uri = endpoint
            .trim()
            .parse()
            .map_err(|err| AdapterError::configuration(format!("invalid endpoint: {err}")))?;

        match uri.scheme_str() {
            Some("http" | "https") => {}
            _ => return Err(AdapterError::blocked("endpoint must use http or https")),
        }
        let host = uri
            .host()
            .ok_or_else(|| AdapterError::blocked("endpoint has no host"))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_ascii_lowercase();
        let ip = host.parse::<IpAddr>().ok();

        if is_loopback(&host, ip) {
            return Ok(uri);
        }
        let private = match ip {
            Some(IpAddr::V4(v4)) => is_private_v4(v4),
            Some(IpAddr::V6(v6)) => is_private_v6(v6),
            None => false,
        };
        if private {
            warn!(%host, "model endpoint in private range refused");
            return Err(AdapterError::blocked(format!("{host} is in a private network range")));
        }
        if self.allowed_hosts.contains(&host) {
            return Ok(uri);
        }
        warn!(%host, "model endpoint not on allow-list");
        Err(AdapterError::blocked(format!("{host} is not an allowed host")))
    }
}
