//! Deterministic core logic (no I/O).
//!
//! Everything here is pure over its inputs so it can be tested without a
//! workspace, a generator or a sandbox.

pub mod invariants;
pub mod response_parser;
pub mod types;
pub mod variables;
