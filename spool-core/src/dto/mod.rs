//! Data Transfer Objects for inter-service communication
//!
//! DTOs used between the orchestrator, runners and clients. Job snapshots
//! travel as [`crate::domain::job::Job`] directly; these types cover the
//! requests around them.

pub mod job;
