//! Fuzz testing for header-driven request classification.
//!
//! Feeds arbitrary bytes as `X-Forwarded-For`, `X-Real-IP`,
//! `Accept-Encoding` and `X-Request-ID` values.
//!
//! ```bash
//! cargo +nightly fuzz run fuzz_headers
//! ```

#![no_main]

use std::net::{IpAddr, Ipv4Addr};

use arbitrary::Arbitrary;
use axum::http::{HeaderMap, HeaderValue};
use libfuzzer_sys::fuzz_target;
use playground_server::middleware::ip::{forwarded_client, resolve_client_identity};
use playground_server::middleware::request_id::is_valid_request_id;
use playground_server::middleware::{TrustedProxyConfig, accepts_gzip};

#[derive(Debug, Arbitrary)]
struct Input<'a> {
    forwarded_for: &'a [u8],
    real_ip: &'a [u8],
    accept_encoding: &'a [u8],
    request_id: &'a [u8],
    peer: Option<[u8; 4]>,
}

fuzz_target!(|input: Input<'_>| {
    let mut headers = HeaderMap::new();
    for (name, raw) in [
        ("x-forwarded-for", input.forwarded_for),
        ("x-real-ip", input.real_ip),
        ("accept-encoding", input.accept_encoding),
    ] {
        if let Ok(value) = HeaderValue::from_bytes(raw) {
            headers.insert(name, value);
        }
    }

    if let Some(client) = forwarded_client(&headers) {
        assert!(!client.is_empty());
        assert_eq!(client, client.trim());
    }

    let peer = input.peer.map(|octets| IpAddr::V4(Ipv4Addr::from(octets)));
    let trusted = TrustedProxyConfig::new(&["10.0.0.0/8".to_string()]);
    let identity = resolve_client_identity(&headers, peer, &trusted);
    assert!(!identity.is_empty());

    let _ = accepts_gzip(&headers);

    if is_valid_request_id(input.request_id) {
        assert!(HeaderValue::from_bytes(input.request_id).is_ok());
    }
});
