//! # dswp-runtime
//!
//! Host-side support library for decoupled software pipelines: the bounded
//! single-producer/single-consumer queue stages communicate through, and
//! the runner that spawns one worker per stage, links them, and joins the
//! pipeline. This is the implementation behind the `queue_push` /
//! `queue_pop` / `pipeline_runner` symbols the compiler pass targets.
//!
//! Stages share no mutable state other than the queues; end-of-stream is
//! signalled by the runner closing a finished stage's outbound queue.

pub mod queue;
pub mod runner;

pub use queue::SpscQueue;
pub use runner::{PipelineRunner, Slot, StageFn, DEFAULT_QUEUE_CAPACITY};
