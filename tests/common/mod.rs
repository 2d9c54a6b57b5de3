//! Common test utilities for ekman.
//!
//! Synthetic fields with known analytic values, and float comparison helpers.

#[allow(dead_code)]
pub mod assertions;
#[allow(dead_code)]
pub mod test_data;
