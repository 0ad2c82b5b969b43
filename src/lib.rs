//! ttb library crate: configuration and output helpers shared by the
//! `ttb` binary and its integration tests.
//!
//! The selection engine itself lives in the `ttb-select` crate.

pub mod config;
pub mod format;
