//! Integration tests for the entitlement engine
//!
//! Everything here runs against the in-memory backends and collaborators.
//!
//! ## Running Tests
//! ```bash
//! cargo test -p seatkeeper-entitlements --test integration
//! ```

mod cleanup;
mod refresh;
mod resolution;
mod support;
