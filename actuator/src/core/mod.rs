//! Deterministic, pure logic shared by the engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod analysis;
pub mod command_guard;
pub mod ledger;
pub mod plan;
pub mod types;
