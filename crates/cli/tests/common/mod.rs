//! Common utilities for integration tests

#[macro_use]
pub mod cli;
