//! Pipeline Runner
//!
//! Launches the stages of a decoupled pipeline on their own workers, wires
//! one queue between each consecutive pair, and joins everything. A stage
//! receives its inbound and outbound queue ends (either may be absent at
//! the pipeline's edges) and returns an `i32` status the way the emitted
//! stage procedures do; the runner reports the last stage's result.

use std::thread;

use log::debug;

use crate::queue::SpscQueue;

/// Values crossing a stage boundary. Wide enough for every scalar the IR
/// transports.
pub type Slot = i64;

/// One pipeline stage: consume from the inbound end, produce to the
/// outbound end, return a status.
pub type StageFn<'a> =
    Box<dyn FnOnce(Option<&SpscQueue<Slot>>, Option<&SpscQueue<Slot>>) -> i32 + Send + 'a>;

/// Default in-flight budget per link.
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// Spawns stage workers and joins them.
#[derive(Debug, Clone, Copy)]
pub struct PipelineRunner {
    /// Bound of each inter-stage queue
    pub queue_capacity: usize,
}

impl Default for PipelineRunner {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl PipelineRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the pipeline to completion and return the last stage's result.
    ///
    /// Each stage gets one OS worker. When a stage returns, its outbound
    /// queue is closed so the successor observes end-of-stream after
    /// draining. A panicking stage propagates its panic to the caller after
    /// the others are joined.
    pub fn run(&self, stages: Vec<StageFn<'_>>) -> i32 {
        if stages.is_empty() {
            return 0;
        }
        let links: Vec<SpscQueue<Slot>> = (1..stages.len())
            .map(|_| SpscQueue::with_capacity(self.queue_capacity))
            .collect();
        debug!("running {}-stage pipeline", stages.len());

        let last = stages.len() - 1;
        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(stages.len());
            for (index, stage) in stages.into_iter().enumerate() {
                let inbound = if index > 0 { Some(&links[index - 1]) } else { None };
                let outbound = if index < last { Some(&links[index]) } else { None };
                handles.push(scope.spawn(move || {
                    let result = stage(inbound, outbound);
                    if let Some(q) = outbound {
                        q.close();
                    }
                    debug!("stage {index} finished with {result}");
                    result
                }));
            }
            let mut result = 0;
            for handle in handles {
                match handle.join() {
                    Ok(r) => result = r,
                    Err(panic) => std::panic::resume_unwind(panic),
                }
            }
            result
        })
    }
}
