//! Long-running side of the bot: blog workers and the scheduler that drives
//! them one at a time.

pub mod publisher;
pub mod scheduler;
pub mod worker;

pub use publisher::LogPublisher;
pub use scheduler::{BlogStatus, Scheduler, SchedulerContext, SchedulerState, StatusSnapshot, WorkerMap};
pub use worker::{BlogWorker, Collaborators, RunSummary};
