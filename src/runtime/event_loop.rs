//! Per-context job executor
//!
//! Every Boa context (the host and each worker) gets its own instance. Nothing
//! here blocks: the host loop in [`super::HostRuntime`] decides when to run
//! ready jobs and how long to sleep until the next timer.
//!
//! Order within one turn:
//! - Promise jobs (microtasks)
//! - Due timers, each followed by the microtasks it queued
//! - Generic jobs

use boa_engine::{
    Context, JsResult,
    job::{Job, JobExecutor, PromiseJob, TimeoutJob},
};
use std::{
    cell::{Cell, RefCell},
    cmp::Ordering,
    collections::{BinaryHeap, VecDeque},
    rc::Rc,
    time::{Duration, Instant},
};
use tracing::warn;

/// A timer entry in the priority queue
struct TimerEntry {
    deadline: Instant,
    job: TimeoutJob,
    /// Insertion order, so timers with equal deadlines fire FIFO
    id: u64,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest deadline first)
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// Job queues of one context
#[derive(Default)]
pub struct ContextEventLoop {
    microtasks: RefCell<VecDeque<PromiseJob>>,
    timers: RefCell<BinaryHeap<TimerEntry>>,
    generic_jobs: RefCell<VecDeque<Job>>,
    timer_counter: Cell<u64>,
}

impl ContextEventLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Anything queued that would eventually run
    pub fn has_pending_work(&self) -> bool {
        self.prune_cancelled();
        !self.microtasks.borrow().is_empty()
            || !self.generic_jobs.borrow().is_empty()
            || !self.timers.borrow().is_empty()
    }

    /// Anything that could run right now
    pub fn has_ready_work(&self) -> bool {
        !self.microtasks.borrow().is_empty()
            || !self.generic_jobs.borrow().is_empty()
            || self
                .next_deadline()
                .is_some_and(|deadline| deadline <= Instant::now())
    }

    /// Deadline of the earliest live timer
    pub fn next_deadline(&self) -> Option<Instant> {
        self.prune_cancelled();
        self.timers.borrow().peek().map(|entry| entry.deadline)
    }

    /// Drain the microtask queue, including microtasks queued while draining
    pub fn run_microtasks(&self, context: &mut Context) -> JsResult<()> {
        loop {
            let job = self.microtasks.borrow_mut().pop_front();
            match job {
                Some(job) => {
                    job.call(context)?;
                }
                None => return Ok(()),
            }
        }
    }

    /// Run one turn without blocking. Returns `true` if any job ran.
    ///
    /// A failing job is already dequeued when its error is returned, so the
    /// caller can report it and call again.
    pub fn run_ready(&self, context: &mut Context) -> JsResult<bool> {
        let mut ran = !self.microtasks.borrow().is_empty();
        self.run_microtasks(context)?;

        ran |= self.process_timers(context)?;

        loop {
            let job = self.generic_jobs.borrow_mut().pop_front();
            let Some(job) = job else {
                break;
            };
            ran = true;
            match job {
                Job::PromiseJob(job) => {
                    job.call(context)?;
                }
                Job::TimeoutJob(job) => {
                    job.call(context)?;
                }
                Job::GenericJob(job) => {
                    job.call(context)?;
                }
                _ => {}
            }
            self.run_microtasks(context)?;
        }

        Ok(ran)
    }

    /// Drop all queued work
    pub fn clear(&self) {
        self.microtasks.borrow_mut().clear();
        self.timers.borrow_mut().clear();
        self.generic_jobs.borrow_mut().clear();
    }

    fn next_timer_id(&self) -> u64 {
        let id = self.timer_counter.get() + 1;
        self.timer_counter.set(id);
        id
    }

    /// Fire every timer whose deadline has passed
    fn process_timers(&self, context: &mut Context) -> JsResult<bool> {
        let now = Instant::now();
        let mut processed_any = false;

        loop {
            let entry = {
                let mut timers = self.timers.borrow_mut();
                match timers.peek() {
                    Some(entry) if entry.deadline <= now => timers.pop(),
                    _ => None,
                }
            };
            let Some(entry) = entry else {
                break;
            };

            if !entry.job.is_cancelled() {
                // setInterval re-enqueues itself from inside the call
                entry.job.call(context)?;
                processed_any = true;
                self.run_microtasks(context)?;
            }
        }

        Ok(processed_any)
    }

    fn prune_cancelled(&self) {
        let mut timers = self.timers.borrow_mut();
        while timers.peek().is_some_and(|entry| entry.job.is_cancelled()) {
            timers.pop();
        }
    }
}

impl JobExecutor for ContextEventLoop {
    fn enqueue_job(self: Rc<Self>, job: Job, _context: &mut Context) {
        match job {
            Job::PromiseJob(promise_job) => {
                self.microtasks.borrow_mut().push_back(promise_job);
            }
            Job::TimeoutJob(timeout_job) => {
                let timeout_ms = timeout_job.timeout().as_millis() as u64;
                let deadline = Instant::now() + Duration::from_millis(timeout_ms);
                let id = self.next_timer_id();
                self.timers.borrow_mut().push(TimerEntry {
                    deadline,
                    job: timeout_job,
                    id,
                });
            }
            Job::AsyncJob(_) => {
                warn!("async jobs are not supported by this executor; job dropped");
            }
            other => {
                self.generic_jobs.borrow_mut().push_back(other);
            }
        }
    }

    fn run_jobs(self: Rc<Self>, context: &mut Context) -> JsResult<()> {
        self.run_ready(context).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boa_engine::{Source, context::ContextBuilder};
    use boa_runtime::{
        extensions::{MicrotaskExtension, TimeoutExtension},
        register_extensions,
    };

    fn context_with_loop() -> (Context, Rc<ContextEventLoop>) {
        let event_loop = Rc::new(ContextEventLoop::new());
        let mut context = ContextBuilder::default()
            .job_executor(event_loop.clone())
            .build()
            .unwrap();
        register_extensions((TimeoutExtension, MicrotaskExtension), None, &mut context).unwrap();
        (context, event_loop)
    }

    fn read(context: &mut Context, code: &str) -> String {
        context
            .eval(Source::from_bytes(code.as_bytes()))
            .unwrap()
            .to_string(context)
            .unwrap()
            .to_std_string_escaped()
    }

    #[test]
    fn test_event_loop_creation() {
        let event_loop = ContextEventLoop::new();
        assert!(!event_loop.has_pending_work());
        assert!(event_loop.next_deadline().is_none());
    }

    #[test]
    fn test_microtasks_run_before_timers() {
        let (mut context, event_loop) = context_with_loop();
        context
            .eval(Source::from_bytes(
                "globalThis.order = []; setTimeout(() => order.push('timer'), 0); Promise.resolve().then(() => order.push('micro'));",
            ))
            .unwrap();
        assert!(event_loop.has_pending_work());

        event_loop.run_ready(&mut context).unwrap();
        assert_eq!(read(&mut context, "order.join(',')"), "micro,timer");
        assert!(!event_loop.has_pending_work());
    }

    #[test]
    fn test_future_timer_does_not_block() {
        let (mut context, event_loop) = context_with_loop();
        context
            .eval(Source::from_bytes("globalThis.fired = false; setTimeout(() => { fired = true; }, 60000);"))
            .unwrap();

        let started = Instant::now();
        event_loop.run_ready(&mut context).unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(read(&mut context, "String(fired)"), "false");
        let deadline = event_loop.next_deadline().unwrap();
        assert!(deadline > Instant::now() + Duration::from_secs(1));
    }

    #[test]
    fn test_failing_timer_can_be_resumed() {
        let (mut context, event_loop) = context_with_loop();
        context
            .eval(Source::from_bytes(
                "globalThis.after = false; setTimeout(() => { throw new Error('x'); }, 0); setTimeout(() => { after = true; }, 0);",
            ))
            .unwrap();

        assert!(event_loop.run_ready(&mut context).is_err());
        event_loop.run_ready(&mut context).unwrap();
        assert_eq!(read(&mut context, "String(after)"), "true");
    }
}
