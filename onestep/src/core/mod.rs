//! Deterministic, pure logic shared by the step orchestrator.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod action_plan;
pub mod policy;
pub mod types;
