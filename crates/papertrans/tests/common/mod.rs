//! Shared test utilities for papertrans integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated job-service instances with temp directories
//! - Fake engine scripts standing in for the translation program

pub mod engines;
pub mod harness;

pub use engines::FakeEngine;
pub use harness::TestHarness;
