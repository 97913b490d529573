//! Message relay between a host and its isolated contexts
//!
//! Host → context: [`HostState::send_to_context`] either buffers the envelope on
//! the handle (context not ready yet) or queues a delivery task. The buffer is
//! drained in FIFO order on the ready transition.
//!
//! Context → host: the isolated scope queues `Inbound` / `Error` tasks that are
//! routed through the registry to the owning handle's listeners.

use boa_engine::Context;
use serde::Serialize;
use std::collections::VecDeque;
use tracing::{debug, error, warn};

use super::error::{ErrorReport, WorkerError, WorkerResult};
use super::events::{ErrorEvent, MessageEvent, WorkerEvent};
use super::handle::WorkerHandle;
use super::id::{ContextId, now_millis};
use super::state::{Diagnostic, HostState, Task};

/// A message in transit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Envelope {
    /// The isolated context the envelope travels to or from
    pub source: ContextId,
    /// JSON text of the payload
    pub payload: String,
    pub time_stamp: u64,
}

impl Envelope {
    pub fn new(source: ContextId, payload: String) -> Self {
        Self {
            source,
            payload,
            time_stamp: now_millis(),
        }
    }
}

/// Messages sent to a context before it signalled readiness
#[derive(Debug, Default)]
pub struct OutboundQueue {
    pending: VecDeque<Envelope>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, envelope: Envelope) {
        self.pending.push_back(envelope);
    }

    /// Take every pending envelope, oldest first
    pub fn drain(&mut self) -> Vec<Envelope> {
        self.pending.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl HostState {
    /// Route a host → context message according to the handle's state
    pub fn send_to_context(&self, handle: &WorkerHandle, envelope: Envelope) -> WorkerResult<()> {
        if handle.is_terminated() {
            return Err(WorkerError::HandleTerminated(handle.id().clone()));
        }
        if self.is_ready(handle.id()) {
            self.push_task(Task::Deliver {
                target: handle.id().clone(),
                envelope,
            });
        } else {
            handle.enqueue_outbound(envelope);
        }
        Ok(())
    }

    /// Deliver everything buffered on a handle. Runs once, on the ready transition.
    pub(crate) fn drain_outbound(&self, id: &ContextId) {
        let Some(handle) = self.registry.borrow().get(id) else {
            return;
        };
        let pending = handle.take_outbound();
        if !pending.is_empty() {
            debug!(worker = %id, count = pending.len(), "flushing messages sent before ready");
        }
        for envelope in pending {
            self.deliver(id, &envelope);
        }
    }

    /// Run one envelope inside its target context
    pub(crate) fn deliver(&self, target: &ContextId, envelope: &Envelope) {
        if !self.registry.borrow().contains(target) {
            debug!(worker = %target, "dropping message for terminated worker");
            return;
        }
        let context = self.factory.borrow().get(target);
        match context {
            Ok(context) => match context.try_borrow_mut() {
                Ok(mut context) => context.deliver(envelope),
                Err(_) => {
                    // only possible if a delivery is attempted from inside the context itself
                    warn!(worker = %target, "context busy, message requeued");
                    self.push_task(Task::Deliver {
                        target: target.clone(),
                        envelope: envelope.clone(),
                    });
                }
            },
            Err(err) => {
                error!(worker = %target, "{}", err);
                self.record(Diagnostic::ContextLost {
                    worker: target.clone(),
                    message: err.to_string(),
                });
            }
        }
    }

    /// Dispatch a context → host message on the owning handle
    pub fn receive_from_context(&self, source: &ContextId, envelope: &Envelope, context: &mut Context) {
        let Some(handle) = self.registry.borrow().get(source) else {
            warn!(worker = %source, "discarding message from unknown or terminated worker");
            self.record(Diagnostic::DiscardedMessage {
                worker: source.clone(),
                reason: "worker is not registered".to_string(),
            });
            return;
        };

        let event = WorkerEvent::Message(MessageEvent::new(
            source.clone(),
            envelope.payload.clone(),
            envelope.time_stamp,
        ));
        let failures = handle.dispatch(&event, context);
        self.queue_listener_failures(source, failures);
    }

    /// Dispatch an uncaught worker error on the owning handle
    pub fn forward_error(&self, source: &ContextId, report: ErrorReport, context: &mut Context) {
        let Some(handle) = self.registry.borrow().get(source) else {
            debug!(worker = %source, message = %report.message, "error from terminated worker ignored");
            return;
        };

        let event = WorkerEvent::Error(ErrorEvent::new(source.clone(), report));
        let failures = handle.dispatch(&event, context);
        self.queue_listener_failures(source, failures);

        if let Some(event) = event.as_error() {
            if !event.default_prevented() {
                error!(
                    worker = %source,
                    filename = %event.report.filename,
                    lineno = event.report.lineno,
                    "unhandled worker error: {}",
                    event.report.message
                );
                self.record(Diagnostic::UnhandledError {
                    worker: source.clone(),
                    report: event.report.clone(),
                });
            }
        }
    }

    pub(crate) fn queue_listener_failures(&self, worker: &ContextId, failures: Vec<String>) {
        for message in failures {
            self.push_task(Task::ListenerFailure {
                worker: worker.clone(),
                message,
            });
        }
    }

    /// Called by an isolated context's `postMessage`
    pub(crate) fn queue_inbound(&self, source: &ContextId, envelope: Envelope) {
        self.push_task(Task::Inbound {
            source: source.clone(),
            envelope,
        });
    }

    /// Called by an isolated context for errors its own handlers left unhandled
    pub(crate) fn queue_error(&self, source: &ContextId, report: ErrorReport) {
        self.push_task(Task::Error {
            source: source.clone(),
            report,
        });
    }
}
