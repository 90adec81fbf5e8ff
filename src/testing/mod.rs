//! Testing utilities and mock implementations
//!
//! Provides an in-memory transport so client behavior can be exercised
//! without a running broker.

pub mod mocks;

pub use mocks::*;
