//! Client IP extraction for rate limiting and request records.
//!
//! # Source Priority
//!
//! When the socket peer is a trusted proxy (or no peer is known):
//!
//! 1. `X-Forwarded-For`: the right-most hop that is not itself a trusted
//!    proxy (the left-most entry when every hop is trusted)
//! 2. `X-Real-IP`
//! 3. The socket peer address
//! 4. The [`UNKNOWN_IP`] sentinel
//!
//! When the peer is known and outside `TRUSTED_PROXIES`, the forwarding
//! headers are ignored and the peer address is the client. A direct client
//! therefore cannot rotate spoofed `X-Forwarded-For` values to get a fresh
//! per-IP budget on every request.
//!
//! Blank header values are skipped rather than used as a key.
//!
//! # Deployment
//!
//! Behind a reverse proxy, list its addresses:
//!
//! ```bash
//! TRUSTED_PROXIES="10.0.0.0/8,172.16.0.0/12"
//! ```
//!
//! Without connect info (the router embedded without
//! `into_make_service_with_connect_info`) there is no peer to check, and the
//! headers are taken as given.
//!
//! ## The "unknown" Fallback
//!
//! Requests with no identifiable address all share the `"unknown"` key, so
//! they are limited collectively instead of skipping the check.

use std::borrow::Cow;
use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::request::Parts;
use tracing::{debug, warn};

/// Fallback identifier when no client IP can be determined.
pub const UNKNOWN_IP: &str = "unknown";

// =============================================================================
// Trusted Proxy CIDR Matching
// =============================================================================

/// Parsed CIDR network range, e.g. `10.0.0.0/8` or `::1/128`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CidrRange {
    network: IpAddr,
    prefix_len: u8,
}

impl CidrRange {
    /// Parse CIDR notation. A bare address is an implicit `/32` or `/128`.
    ///
    /// Returns `None` if the format is invalid.
    pub fn parse(cidr: &str) -> Option<Self> {
        let cidr = cidr.trim();
        let (address, prefix) = match cidr.split_once('/') {
            Some((address, prefix)) => (address, Some(prefix)),
            None => (cidr, None),
        };

        let network: IpAddr = address.parse().ok()?;
        let max_prefix = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix_len = match prefix {
            Some(prefix) => prefix.parse::<u8>().ok().filter(|len| *len <= max_prefix)?,
            None => max_prefix,
        };

        Some(Self {
            network,
            prefix_len,
        })
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (&self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = u32::MAX
                    .checked_shl(32 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                (u32::from(*net) & mask) == (u32::from(*addr) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = u128::MAX
                    .checked_shl(128 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                (u128::from(*net) & mask) == (u128::from(*addr) & mask)
            }
            _ => false,
        }
    }
}

/// Reverse proxies whose forwarding headers are believed.
///
/// Empty means no peer is trusted.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxies {
    ranges: Vec<CidrRange>,
}

impl TrustedProxies {
    /// Build from CIDR strings. Invalid entries are logged and skipped.
    pub fn new(cidrs: &[String]) -> Self {
        let ranges: Vec<CidrRange> = cidrs
            .iter()
            .filter_map(|cidr| {
                let parsed = CidrRange::parse(cidr);
                if parsed.is_none() {
                    warn!(cidr = %cidr, "Invalid CIDR range in TRUSTED_PROXIES, skipping");
                }
                parsed
            })
            .collect();

        if !ranges.is_empty() {
            debug!(count = ranges.len(), "Trusted proxy validation enabled");
        }

        Self { ranges }
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.ranges.iter().any(|range| range.contains(ip))
    }

    fn contains_str(&self, ip: &str) -> bool {
        ip.parse::<IpAddr>().is_ok_and(|ip| self.contains(&ip))
    }
}

// =============================================================================
// Extraction
// =============================================================================

/// Where the client address came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IpSource<'a> {
    ForwardedFor(&'a str),
    RealIp(&'a str),
    Peer(SocketAddr),
    NotFound,
}

fn forwarded_client<'a>(value: &'a str, trusted: &TrustedProxies) -> Option<&'a str> {
    let hops: Vec<&str> = value
        .split(',')
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
        .collect();

    hops.iter()
        .rev()
        .find(|hop| !trusted.contains_str(hop))
        .or_else(|| hops.first())
        .copied()
}

fn locate_ip<'a>(parts: &'a Parts, trusted: &TrustedProxies) -> IpSource<'a> {
    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    if let Some(addr) = peer
        && !trusted.contains(&addr.ip())
    {
        return IpSource::Peer(addr);
    }

    if let Some(forwarded) = parts.headers.get("x-forwarded-for")
        && let Ok(value) = forwarded.to_str()
        && let Some(client) = forwarded_client(value, trusted)
    {
        return IpSource::ForwardedFor(client);
    }

    if let Some(real_ip) = parts.headers.get("x-real-ip")
        && let Ok(value) = real_ip.to_str()
        && !value.trim().is_empty()
    {
        return IpSource::RealIp(value.trim());
    }

    match peer {
        Some(addr) => IpSource::Peer(addr),
        None => IpSource::NotFound,
    }
}

/// Extract the client IP, falling back to [`UNKNOWN_IP`].
///
/// Returns a borrowed `Cow` for the sentinel so the common fallback does not
/// allocate.
#[inline]
pub fn extract_client_ip(parts: &Parts, trusted: &TrustedProxies) -> Cow<'static, str> {
    match locate_ip(parts, trusted) {
        IpSource::ForwardedFor(ip) | IpSource::RealIp(ip) => Cow::Owned(ip.to_string()),
        IpSource::Peer(addr) => Cow::Owned(addr.ip().to_string()),
        IpSource::NotFound => Cow::Borrowed(UNKNOWN_IP),
    }
}
