//! Client identity resolution shared by the rate limiter, the access log and
//! the calculator handlers.
//!
//! # Resolution order
//!
//! 1. First entry of `X-Forwarded-For` (trimmed, non-empty)
//! 2. `X-Real-IP` (trimmed, non-empty)
//! 3. Transport peer address from axum's `ConnectInfo<SocketAddr>` (IP only)
//! 4. [`UNKNOWN_IP`]
//!
//! The identity is an opaque string: it is not validated as an IP address.
//!
//! # Trusted proxies
//!
//! Headers are client-controlled. When `TRUSTED_PROXIES` is configured and
//! the peer address is known and outside every range, forwarded headers are
//! ignored and the peer address is used instead. With no ranges configured
//! every peer is trusted, so the service must sit behind a proxy that
//! overwrites these headers:
//!
//! ```nginx
//! proxy_set_header X-Real-IP $remote_addr;
//! proxy_set_header X-Forwarded-For $remote_addr;
//! ```
//!
//! All requests with no resolvable identity share the `"unknown"` key and are
//! therefore rate limited together.

use std::borrow::Cow;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Request};
use tracing::{debug, warn};

/// Fallback identity when no client address can be determined.
pub const UNKNOWN_IP: &str = "unknown";

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

// =============================================================================
// Trusted Proxy CIDR Matching
// =============================================================================

/// Parsed CIDR network range for trusted proxy validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CidrRange {
    network: IpAddr,
    prefix_len: u8,
}

impl CidrRange {
    /// Parse CIDR notation (`"10.0.0.0/8"`, `"::1/128"`) or a bare address
    /// (implicit `/32` or `/128`).
    ///
    /// Returns `None` if the format is invalid.
    pub fn parse(cidr: &str) -> Option<Self> {
        let cidr = cidr.trim();
        let (addr, prefix) = match cidr.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (cidr, None),
        };

        let network: IpAddr = addr.parse().ok()?;
        let max_prefix = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix_len = match prefix {
            Some(p) => p.parse::<u8>().ok().filter(|&p| p <= max_prefix)?,
            None => max_prefix,
        };

        Some(Self {
            network,
            prefix_len,
        })
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Check if an IP address is contained within this range.
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
            // IPv4 and IPv6 never match each other
            _ => false,
        }
    }
}

/// Set of trusted reverse-proxy ranges.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxyConfig {
    ranges: Vec<CidrRange>,
}

impl TrustedProxyConfig {
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

    /// Whether any ranges are configured.
    pub fn is_enabled(&self) -> bool {
        !self.ranges.is_empty()
    }

    /// Whether forwarded headers from `peer` should be honoured.
    ///
    /// Always `true` when no ranges are configured.
    pub fn is_trusted(&self, peer: &IpAddr) -> bool {
        self.ranges.is_empty() || self.ranges.iter().any(|range| range.contains(peer))
    }
}

// =============================================================================
// Header parsing
// =============================================================================

/// First non-empty entry of `X-Forwarded-For`, else non-empty `X-Real-IP`.
///
/// Returns a slice borrowed from the header map; non-UTF-8 values are skipped.
#[inline]
pub fn forwarded_client(headers: &HeaderMap) -> Option<&str> {
    // Format: "client, proxy1, proxy2" - the first entry is the client
    let from_xff = headers
        .get(X_FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());

    from_xff.or_else(|| {
        headers
            .get(X_REAL_IP)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
    })
}

// =============================================================================
// Public API
// =============================================================================

/// Resolve a client identity from headers and an optional peer address.
#[inline]
pub fn resolve_client_identity(
    headers: &HeaderMap,
    peer: Option<IpAddr>,
    trusted_proxies: &TrustedProxyConfig,
) -> Cow<'static, str> {
    if let Some(peer) = peer
        && !trusted_proxies.is_trusted(&peer)
    {
        if forwarded_client(headers).is_some() {
            debug!(peer = %peer, "Ignoring forwarded headers from untrusted peer");
        }
        return Cow::Owned(peer.to_string());
    }

    if let Some(ip) = forwarded_client(headers) {
        return Cow::Owned(ip.to_string());
    }

    match peer {
        Some(peer) => Cow::Owned(peer.to_string()),
        None => Cow::Borrowed(UNKNOWN_IP),
    }
}

/// Peer address recorded by `into_make_service_with_connect_info`, if any.
#[inline]
pub fn peer_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

/// Client identity resolved once per request and stored in its extensions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIp(Arc<str>);

impl ClientIp {
    pub fn new(ip: impl Into<Arc<str>>) -> Self {
        Self(ip.into())
    }

    pub fn unknown() -> Self {
        Self::new(UNKNOWN_IP)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientIp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The [`ClientIp`] extension if an earlier stage stored one, otherwise a
/// fresh resolution.
pub fn resolved_client_ip<B>(req: &Request<B>, trusted_proxies: &TrustedProxyConfig) -> ClientIp {
    match req.extensions().get::<ClientIp>() {
        Some(ip) => ip.clone(),
        None => ClientIp::new(client_identity(req, trusted_proxies).as_ref()),
    }
}

/// Resolve the client identity of `req`.
///
/// Returns `Cow::Borrowed` for the `"unknown"` fallback so the common
/// no-information case does not allocate.
#[inline]
pub fn client_identity<B>(
    req: &Request<B>,
    trusted_proxies: &TrustedProxyConfig,
) -> Cow<'static, str> {
    resolve_client_identity(req.headers(), peer_ip(req), trusted_proxies)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request(headers: &[(&str, &str)], peer: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder();
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let mut req = builder.body(Body::empty()).unwrap();
        if let Some(peer) = peer {
            let addr: SocketAddr = peer.parse().unwrap();
            req.extensions_mut().insert(ConnectInfo(addr));
        }
        req
    }

    fn identity(headers: &[(&str, &str)], peer: Option<&str>) -> String {
        client_identity(&request(headers, peer), &TrustedProxyConfig::default()).into_owned()
    }

    #[test]
    fn test_xff_first_entry() {
        assert_eq!(
            identity(&[("x-forwarded-for", "192.168.1.1, 10.0.0.1")], None),
            "192.168.1.1"
        );
    }

    #[test]
    fn test_xff_with_whitespace() {
        assert_eq!(
            identity(&[("x-forwarded-for", "  192.168.1.1  , 10.0.0.1")], None),
            "192.168.1.1"
        );
    }

    #[test]
    fn test_xff_priority_over_real_ip() {
        assert_eq!(
            identity(
                &[("x-forwarded-for", "10.0.0.1"), ("x-real-ip", "192.168.1.1")],
                Some("172.16.0.9:4000")
            ),
            "10.0.0.1"
        );
    }

    #[test]
    fn test_real_ip_fallback() {
        assert_eq!(identity(&[("x-real-ip", " ::1 ")], None), "::1");
    }

    #[test]
    fn test_empty_xff_falls_through() {
        assert_eq!(
            identity(&[("x-forwarded-for", "   "), ("x-real-ip", "192.168.1.1")], None),
            "192.168.1.1"
        );
        assert_eq!(identity(&[("x-forwarded-for", ", 10.0.0.1")], None), "unknown");
    }

    #[test]
    fn test_peer_address_fallback_drops_port() {
        assert_eq!(identity(&[], Some("203.0.113.5:51234")), "203.0.113.5");
        assert_eq!(identity(&[], Some("[2001:db8::1]:443")), "2001:db8::1");
    }

    #[test]
    fn test_unknown_is_borrowed() {
        let ip = client_identity(&request(&[], None), &TrustedProxyConfig::default());
        assert_eq!(ip, UNKNOWN_IP);
        assert!(matches!(ip, Cow::Borrowed(_)));
    }

    #[test]
    fn test_resolved_client_ip_prefers_extension() {
        let mut req = request(&[("x-real-ip", "1.2.3.4")], None);
        let trusted = TrustedProxyConfig::default();
        assert_eq!(resolved_client_ip(&req, &trusted).as_str(), "1.2.3.4");

        req.extensions_mut().insert(ClientIp::new("5.6.7.8"));
        assert_eq!(resolved_client_ip(&req, &trusted).as_str(), "5.6.7.8");
    }

    #[test]
    fn test_identity_is_not_validated() {
        // Ports and garbage pass through as-is
        assert_eq!(
            identity(&[("x-forwarded-for", "192.168.1.1:8080, 10.0.0.1")], None),
            "192.168.1.1:8080"
        );
        assert_eq!(identity(&[("x-real-ip", "not-an-ip")], None), "not-an-ip");
    }

    #[test]
    fn test_untrusted_peer_ignores_forwarded_headers() {
        let trusted = TrustedProxyConfig::new(&["10.0.0.0/8".to_string()]);

        let spoofed = request(&[("x-forwarded-for", "1.2.3.4")], Some("198.51.100.7:1000"));
        assert_eq!(client_identity(&spoofed, &trusted), "198.51.100.7");

        let proxied = request(&[("x-forwarded-for", "1.2.3.4")], Some("10.1.2.3:1000"));
        assert_eq!(client_identity(&proxied, &trusted), "1.2.3.4");
    }

    #[test]
    fn test_trusted_proxies_without_peer_uses_headers() {
        let trusted = TrustedProxyConfig::new(&["10.0.0.0/8".to_string()]);
        let req = request(&[("x-real-ip", "1.2.3.4")], None);
        assert_eq!(client_identity(&req, &trusted), "1.2.3.4");
    }

    // ==========================================================================
    // CIDR Range Tests
    // ==========================================================================

    #[test]
    fn test_cidr_parse() {
        assert_eq!(CidrRange::parse("10.0.0.0/8").unwrap().prefix_len(), 8);
        assert_eq!(CidrRange::parse("::1/128").unwrap().prefix_len(), 128);
        assert_eq!(CidrRange::parse("192.168.1.1").unwrap().prefix_len(), 32);
        assert_eq!(CidrRange::parse(" 2001:db8::/32 ").unwrap().prefix_len(), 32);
    }

    #[test]
    fn test_cidr_parse_invalid() {
        assert!(CidrRange::parse("not-an-ip").is_none());
        assert!(CidrRange::parse("10.0.0.0/33").is_none());
        assert!(CidrRange::parse("10.0.0.0/8/1").is_none());
        assert!(CidrRange::parse("").is_none());
    }

    #[test]
    fn test_cidr_contains_ipv4() {
        let cidr = CidrRange::parse("10.0.0.0/8").unwrap();

        assert!(cidr.contains(&"10.0.0.1".parse().unwrap()));
        assert!(cidr.contains(&"10.255.255.255".parse().unwrap()));
        assert!(!cidr.contains(&"11.0.0.1".parse().unwrap()));
        assert!(!cidr.contains(&"::1".parse().unwrap()));
    }

    #[test]
    fn test_cidr_zero_prefix_matches_everything() {
        let cidr = CidrRange::parse("0.0.0.0/0").unwrap();
        assert!(cidr.contains(&"8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn test_cidr_contains_ipv6() {
        let cidr = CidrRange::parse("2001:db8::/32").unwrap();
        assert!(cidr.contains(&"2001:db8::42".parse().unwrap()));
        assert!(!cidr.contains(&"2001:db9::1".parse().unwrap()));
    }

    #[test]
    fn test_trusted_proxy_config() {
        let empty = TrustedProxyConfig::new(&[]);
        assert!(!empty.is_enabled());
        assert!(empty.is_trusted(&"1.2.3.4".parse().unwrap()));

        let config = TrustedProxyConfig::new(&[
            "10.0.0.0/8".to_string(),
            "bogus".to_string(),
            "172.16.0.0/12".to_string(),
        ]);
        assert!(config.is_enabled());
        assert!(config.is_trusted(&"172.31.255.255".parse().unwrap()));
        assert!(!config.is_trusted(&"192.168.1.1".parse().unwrap()));
    }
}
