//! Periodic task scheduling.
//!
//! A [`TaskRunner`] owns a priority-aware queue of named [`Task`]s and
//! dispatches them from a single loop. See [`runner`] for the dispatch
//! rules and [`task`] for how tasks are declared.

pub mod runner;
pub mod task;

pub use runner::TaskRunner;
pub use task::{Task, TaskAction, TaskInterval, TaskStatus};
