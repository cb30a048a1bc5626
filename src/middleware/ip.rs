//! Client IP resolution shared by the access logger and auth brute-force
//! protection.
//!
//! # Security: IP Spoofing
//!
//! `X-Forwarded-For` and `X-Real-IP` are client-controlled unless a reverse
//! proxy overwrites them. They are therefore only honoured when the TCP peer
//! (axum's `ConnectInfo<SocketAddr>`) lies inside a configured trusted proxy
//! range (`TRUSTED_PROXIES`, comma-separated CIDRs). With no ranges configured
//! the peer address is always used, so rotating forwarding headers cannot mint
//! fresh brute-force budgets.
//!
//! # Resolution Order
//!
//! Peer inside a trusted range:
//! 1. `X-Forwarded-For` (first entry, must parse as an IP)
//! 2. `X-Real-IP` (must parse as an IP)
//! 3. The peer address
//!
//! Any other peer: the peer address. No peer at all: [`UNKNOWN_IP`].

use std::borrow::Cow;
use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::Request;
use tracing::{debug, warn};

/// Fallback when no client IP can be determined.
///
/// All such requests share this key for brute-force tracking.
pub const UNKNOWN_IP: &str = "unknown";

// =============================================================================
// Trusted Proxy CIDR Matching
// =============================================================================

/// Parsed CIDR network range, e.g. `10.0.0.0/8` or `::1/128`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CidrRange {
    network: IpAddr,
    prefix_len: u8,
}

impl CidrRange {
    /// Parse CIDR notation. A bare address means a single host.
    ///
    /// Returns `None` if the format is invalid.
    pub fn parse(cidr: &str) -> Option<Self> {
        let (addr, prefix) = match cidr.trim().split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (cidr.trim(), None),
        };

        let network: IpAddr = addr.parse().ok()?;
        let max_prefix = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix_len = match prefix {
            Some(p) => p.parse::<u8>().ok().filter(|len| *len <= max_prefix)?,
            None => max_prefix,
        };

        Some(Self {
            network,
            prefix_len,
        })
    }

    /// Check if `ip` falls inside this range. Families never match each other.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (&self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = u32::MAX.checked_shl(32 - u32::from(self.prefix_len)).unwrap_or(0);
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
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustedProxies {
    ranges: Vec<CidrRange>,
}

impl TrustedProxies {
    /// Trust no proxy: the peer address is always the client.
    pub const NONE: TrustedProxies = TrustedProxies { ranges: Vec::new() };

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
            debug!(count = ranges.len(), "Trusted proxy ranges configured");
        }

        Self { ranges }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ranges.is_empty()
    }

    /// Whether `peer` is a proxy whose headers may be believed.
    pub fn is_trusted(&self, peer: &IpAddr) -> bool {
        self.ranges.iter().any(|range| range.contains(peer))
    }
}

// =============================================================================
// Extraction
// =============================================================================

/// Where a forwarded client IP was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExtractedIp {
    FromXff(IpAddr),
    FromRealIp(IpAddr),
    NotFound,
}

#[inline]
fn extract_ip_from_headers<B>(req: &Request<B>) -> ExtractedIp {
    // Format: "client, proxy1, proxy2" - we want the first (client) IP
    if let Some(forwarded) = req.headers().get("x-forwarded-for")
        && let Ok(value) = forwarded.to_str()
        && let Some(first_ip) = value.split(',').next()
        && let Ok(ip) = first_ip.trim().parse::<IpAddr>()
    {
        return ExtractedIp::FromXff(ip);
    }

    if let Some(real_ip) = req.headers().get("x-real-ip")
        && let Ok(value) = real_ip.to_str()
        && let Ok(ip) = value.trim().parse::<IpAddr>()
    {
        return ExtractedIp::FromRealIp(ip);
    }

    ExtractedIp::NotFound
}

/// Client IP for logging and per-IP accounting.
///
/// Returns `Cow::Borrowed(UNKNOWN_IP)` without allocating when the request
/// carries no peer address. Call `.into_owned()` before moving into an async
/// block.
pub fn extract_client_ip<B>(req: &Request<B>, proxies: &TrustedProxies) -> Cow<'static, str> {
    let Some(ConnectInfo(peer)) = req.extensions().get::<ConnectInfo<SocketAddr>>() else {
        return Cow::Borrowed(UNKNOWN_IP);
    };
    let peer = peer.ip();

    if !proxies.is_trusted(&peer) {
        if extract_ip_from_headers(req) != ExtractedIp::NotFound {
            debug!(peer = %peer, "Ignoring forwarding headers from untrusted peer");
        }
        return Cow::Owned(peer.to_string());
    }

    match extract_ip_from_headers(req) {
        ExtractedIp::FromXff(ip) | ExtractedIp::FromRealIp(ip) => Cow::Owned(ip.to_string()),
        ExtractedIp::NotFound => Cow::Owned(peer.to_string()),
    }
}
