//! Scheduler layer for the runner
//!
//! A fixed pool of workers, each claiming and running one job at a time.
//! The pool size bounds the number of concurrent provider calls.

pub mod dispatcher;
pub mod worker;

pub use dispatcher::Dispatcher;
pub use worker::{Worker, WorkerSettings};
