//! SEEDSWEEP — seed account scanner and transfer finality engine
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod ledger;
pub mod engine;
pub mod console;
