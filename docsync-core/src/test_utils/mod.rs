//! Test utilities and helpers for docsync
//!
//! This module provides common testing utilities, fixtures, and helper functions
//! shared by unit tests, integration tests, benchmarks and the harness.

pub mod assertions;
pub mod async_helpers;
pub mod deterministic_rng;
pub mod fixtures;
pub mod replica;

pub use assertions::*;
pub use async_helpers::*;
pub use deterministic_rng::*;
pub use fixtures::*;
pub use replica::{link, test_configs, Replica};
