//! A durable, persisted background job queue for slow, fallible work.
//!
//! The queue decouples a synchronous request surface from report generation,
//! which can take minutes and depends on external collaborators. Jobs are
//! persisted through the [`store::JobStore`] trait, dequeued strictly FIFO by
//! creation time, and driven through their lifecycle by a single polling
//! [`worker::Worker`]. Job business logic lives behind the
//! [`executor::JobExecutor`] trait and runs in its own task so that a failure
//! or long runtime cannot corrupt queue state.

pub mod executor;
pub mod job;
pub mod queue;
pub mod store;
pub mod worker;
