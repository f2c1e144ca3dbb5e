//! Host-side tests for the concurrency and process core.
//!
//! The platform contracts are replaced by recording mocks; the harness plays
//! the role of the context-switch stub, completing every switch exactly as
//! `schedule_tail` would in the incoming thread.

pub mod harness;

mod process_tests;
