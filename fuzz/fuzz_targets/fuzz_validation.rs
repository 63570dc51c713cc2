//! Fuzz testing for query parameter parsing.
//!
//! This fuzz target tests the robustness of the validation module against
//! arbitrary input strings. It ensures that parsing functions:
//!
//! - Never panic on any input
//! - Only accept what round-trips as a base-10 integer
//! - Never return a zero history limit
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! # Install cargo-fuzz (requires nightly)
//! cargo +nightly install cargo-fuzz
//!
//! # Run the validation fuzz target
//! cargo +nightly fuzz run fuzz_validation
//!
//! # Run with a time limit (e.g., 60 seconds)
//! cargo +nightly fuzz run fuzz_validation -- -max_total_time=60
//! ```
//!
//! # What This Tests
//!
//! - `parse_operand`: Calculator operand parsing
//! - `parse_limit`: History limit parsing with fallback
//! - `query_param`: First-value lookup in a raw query string
//! - `CidrRange::parse`: Trusted proxy range parsing

#![no_main]

use libfuzzer_sys::fuzz_target;
use playground_server::middleware::ip::CidrRange;
use playground_server::validation::{parse_limit, parse_operand, query_param};

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(value) = parse_operand(Some(s)) {
        assert_eq!(value.to_string().parse::<i64>().ok(), Some(value));
    }

    assert!(parse_limit(Some(s), 10) > 0);

    // A value found for `a` is also what `a` yields when more params follow
    let first = query_param(Some(s), "a");
    assert!(query_param(Some(&format!("{s}&a=trailing")), "a").is_some());
    if first.is_some() {
        assert_eq!(query_param(Some(&format!("{s}&a=trailing")), "a"), first);
    }

    if let Some(range) = CidrRange::parse(s) {
        assert!(range.prefix_len() <= 128);
    }
});
