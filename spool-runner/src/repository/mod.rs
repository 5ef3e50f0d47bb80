//! Repository layer
//!
//! Repositories abstract communication with the orchestrator behind a
//! trait so the worker can be tested against an in-memory fake.

mod jobs;

pub use jobs::{HttpJobRepository, JobRepository};
