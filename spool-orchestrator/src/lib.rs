//! Spool orchestrator
//!
//! Owns the job store, accepts submissions over HTTP, serves the
//! worker-facing lifecycle endpoints, and pushes live job status to
//! subscribers over Server-Sent Events.

pub mod api;
pub mod background;
pub mod config;
pub mod db;
pub mod publisher;
pub mod repository;
pub mod service;
pub mod state;
