//! Core domain types
//!
//! This module contains the core domain structures used across Spool services.
//! These types are shared between the orchestrator (persistence and fan-out),
//! the runner (execution) and clients (reconciliation).

pub mod event;
pub mod failure;
pub mod job;
pub mod metadata;
pub mod output;
