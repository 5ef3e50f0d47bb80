//! Service Module
//!
//! Business logic layer for the orchestrator.
//! Services sit between the HTTP handlers, the job store and the publisher.

pub mod job;

// Re-export for convenience
pub use job as job_service;
