//! Spool Core
//!
//! Core types and abstractions for the Spool generation job system.
//!
//! This crate contains:
//! - Domain types: Jobs, outputs, failures and the live stream events
//! - DTOs: Data transfer objects for orchestrator, runner and client traffic
//!
//! Persistence lives in the orchestrator, execution in the runner.

pub mod domain;
pub mod dto;
