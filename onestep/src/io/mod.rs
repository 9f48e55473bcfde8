//! Side-effecting adapters behind the step ports.
//!
//! Each port trait lives next to its production adapter: [`model`],
//! [`workspace`], [`exec`], [`events`] and [`memory`]. The remaining modules
//! are helpers those adapters share.

pub mod config;
pub mod events;
pub mod exec;
pub mod git;
pub mod jsonl;
pub mod memory;
pub mod model;
pub mod process;
pub mod prompt;
pub mod workspace;
