//! Shared test utilities for Trellis
//!
//! This module provides common helpers for integration tests:
//! - Git repository fixtures with an optional nested tooling repository

pub mod git_fixtures;
