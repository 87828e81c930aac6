//! Integration tests for mtd-shuffler
//!
//! These tests drive the public API the way a switch adapter and the
//! daemon do, with real DNS messages built by hickory-proto and simulated
//! time for the shuffling loops.
//!
//! # Test Organization
//!
//! - `dns_rewrite`: A-record rewriting, checksums, name compression, flooding
//! - `shuffle_timing`: tier cadence, uniform rounds, distinct allocation
//! - `controller`: initial rule sets and rule synchronisation
//! - `support`: frame builders and independent checksum verification
//!
//! # Running Tests
//!
//! ```bash
//! # Run all integration tests
//! cargo test --test integration_tests
//!
//! # Run specific test module
//! cargo test --test integration_tests dns_rewrite
//! ```

pub mod controller;
pub mod dns_rewrite;
pub mod shuffle_timing;
pub mod support;
