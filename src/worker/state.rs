//! Host runtime state: the single owner of every worker-related table
//!
//! Created together with the [`HostRuntime`](crate::runtime::HostRuntime) and
//! handed out as `Rc` / `Weak`. Nothing here is global, so any number of hosts
//! can coexist in one process (tests build one each).

use boa_engine::Context;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Instant;
use tracing::{debug, error, warn};
use url::Url;

use super::base_uri::{BaseUriResolver, HostLocation};
use super::context::{ContextHandle, IsolatedContextFactory};
use super::error::{ErrorReport, WorkerError, WorkerResult};
use super::handle::WorkerHandle;
use super::id::{ContextId, IdAllocator};
use super::ready::ReadyGate;
use super::registry::Registry;
use super::relay::Envelope;
use crate::loader::ScriptLoader;
use crate::transpiler::Transpiler;

/// Unit of work for the host loop.
///
/// Everything that crosses a context boundary goes through this queue, so no
/// context ever runs while another one is on the stack.
#[derive(Debug)]
pub enum Task {
    /// Interpret the bootstrap descriptor of a new context
    Boot(ContextId),
    /// A context finished bootstrapping
    Ready(ContextId),
    Deliver { target: ContextId, envelope: Envelope },
    Inbound { source: ContextId, envelope: Envelope },
    Error { source: ContextId, report: ErrorReport },
    /// A context called `close()` on itself
    Close(ContextId),
    ListenerFailure { worker: ContextId, message: String },
}

/// Something that went wrong without being anyone's `Err`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    DiscardedMessage { worker: ContextId, reason: String },
    UnhandledError { worker: ContextId, report: ErrorReport },
    ListenerFailed { worker: ContextId, message: String },
    ContextLost { worker: ContextId, message: String },
}

pub struct HostState {
    ids: IdAllocator,
    pub(super) resolver: BaseUriResolver,
    location: RefCell<HostLocation>,
    pub(super) loader: Rc<dyn ScriptLoader>,
    pub(super) transpiler: Transpiler,
    pub(super) factory: RefCell<IsolatedContextFactory>,
    gate: RefCell<ReadyGate>,
    pub(super) registry: RefCell<Registry>,
    tasks: RefCell<VecDeque<Task>>,
    diagnostics: RefCell<Vec<Diagnostic>>,
}

impl HostState {
    pub fn new(location: HostLocation, loader: Rc<dyn ScriptLoader>, transpiler: Transpiler) -> Rc<Self> {
        Rc::new(Self {
            ids: IdAllocator::new(),
            resolver: BaseUriResolver::new(),
            location: RefCell::new(location),
            loader,
            transpiler,
            factory: RefCell::new(IsolatedContextFactory::new()),
            gate: RefCell::new(ReadyGate::new()),
            registry: RefCell::new(Registry::new()),
            tasks: RefCell::new(VecDeque::new()),
            diagnostics: RefCell::new(Vec::new()),
        })
    }

    pub fn location(&self) -> HostLocation {
        self.location.borrow().clone()
    }

    /// Record which host script is running, for base URI resolution
    pub fn set_current_script(&self, script: Option<Url>) {
        self.location.borrow_mut().current_script = script;
    }

    /// Construct a worker for `script_ref`.
    ///
    /// Returns immediately; the new context boots on the next loop turn.
    pub fn spawn(self: &Rc<Self>, script_ref: &str, base_override: Option<&Url>) -> WorkerResult<WorkerHandle> {
        if script_ref.trim().is_empty() {
            return Err(WorkerError::invalid(
                "worker script reference must be a non-empty string",
            ));
        }

        let id = self.ids.next();
        let base = self
            .resolver
            .resolve_script_base(&self.location.borrow(), base_override)?;
        let script_url = self.resolver.resolve_script(&base, script_ref)?;

        let context = self
            .factory
            .borrow_mut()
            .create(&id, base, script_url.clone(), Rc::downgrade(self))?;
        self.gate.borrow_mut().track(&id);

        let handle = WorkerHandle::new(script_ref, script_url, context, Rc::downgrade(self));
        self.registry.borrow_mut().insert(handle.clone());
        self.push_task(Task::Boot(id.clone()));

        debug!(worker = %id, script = %handle.script_url(), "worker created");
        Ok(handle)
    }

    pub fn handle(&self, id: &ContextId) -> Option<WorkerHandle> {
        self.registry.borrow().get(id)
    }

    /// Number of live, non-terminated workers
    pub fn worker_count(&self) -> usize {
        self.registry.borrow().len()
    }

    pub fn worker_ids(&self) -> Vec<ContextId> {
        self.registry.borrow().ids()
    }

    pub fn is_ready(&self, id: &ContextId) -> bool {
        self.gate.borrow().is_ready(id)
    }

    /// Tear down everything belonging to a terminated handle
    pub(crate) fn release(&self, id: &ContextId) {
        let removed = self.registry.borrow_mut().remove(id);
        drop(removed);
        self.gate.borrow_mut().remove(id);

        let destroyed = self.factory.borrow_mut().destroy(&ContextHandle::new(id.clone()));
        if let Err(err) = destroyed {
            debug!(worker = %id, "{}", err);
        }
    }

    /// Terminate every worker
    pub fn shutdown(&self) {
        let handles: Vec<WorkerHandle> = self
            .worker_ids()
            .iter()
            .filter_map(|id| self.handle(id))
            .collect();
        for handle in handles {
            handle.terminate();
        }
    }

    pub(crate) fn push_task(&self, task: Task) {
        self.tasks.borrow_mut().push_back(task);
    }

    pub(crate) fn record(&self, diagnostic: Diagnostic) {
        self.diagnostics.borrow_mut().push(diagnostic);
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.borrow().clone()
    }

    pub fn take_diagnostics(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut *self.diagnostics.borrow_mut())
    }

    pub fn has_pending_tasks(&self) -> bool {
        !self.tasks.borrow().is_empty()
    }

    /// Queued tasks or scheduled jobs in any worker
    pub fn has_pending_work(&self) -> bool {
        self.has_pending_tasks()
            || self
                .factory
                .borrow()
                .live()
                .iter()
                .any(|c| c.try_borrow().is_ok_and(|c| c.has_pending_work()))
    }

    /// Work that can run without waiting for a timer
    pub fn has_ready_work(&self) -> bool {
        self.has_pending_tasks()
            || self
                .factory
                .borrow()
                .live()
                .iter()
                .any(|c| c.try_borrow().is_ok_and(|c| c.has_ready_work()))
    }

    /// Earliest timer deadline across all workers
    pub fn next_deadline(&self) -> Option<Instant> {
        self.factory
            .borrow()
            .live()
            .iter()
            .filter_map(|c| c.try_borrow().ok().and_then(|c| c.next_deadline()))
            .min()
    }

    /// Process queued tasks until the queue is empty, including tasks queued
    /// while processing. Returns how many ran.
    pub fn run_tasks(&self, context: &mut Context) -> usize {
        let mut processed = 0;
        loop {
            let task = self.tasks.borrow_mut().pop_front();
            let Some(task) = task else {
                return processed;
            };
            self.process(task, context);
            processed += 1;
        }
    }

    /// Run ready jobs in every worker. Returns `true` if anything ran.
    pub fn pump_contexts(&self) -> bool {
        let live = self.factory.borrow().live();
        let mut ran = false;
        for context in live {
            let Ok(mut context) = context.try_borrow_mut() else {
                continue;
            };
            ran |= context.pump();
        }
        ran
    }

    fn process(&self, task: Task, context: &mut Context) {
        match task {
            Task::Boot(id) => self.boot(&id),
            Task::Ready(id) => {
                let opened = self.gate.borrow_mut().open(&id);
                match opened {
                    Ok(true) => {
                        debug!(worker = %id, "ready");
                        self.drain_outbound(&id);
                    }
                    Ok(false) => {}
                    Err(err) => debug!(worker = %id, "ready signal ignored: {}", err),
                }
            }
            Task::Deliver { target, envelope } => self.deliver(&target, &envelope),
            Task::Inbound { source, envelope } => self.receive_from_context(&source, &envelope, context),
            Task::Error { source, report } => self.forward_error(&source, report, context),
            Task::Close(id) => match self.handle(&id) {
                Some(handle) => handle.terminate(),
                None => {
                    let destroyed = self.factory.borrow_mut().destroy(&ContextHandle::new(id.clone()));
                    drop(destroyed);
                }
            },
            Task::ListenerFailure { worker, message } => {
                error!(worker = %worker, "listener failed: {}", message);
                self.record(Diagnostic::ListenerFailed { worker, message });
            }
        }
    }

    fn boot(&self, id: &ContextId) {
        let context = self.factory.borrow().get(id);
        match context {
            Ok(context) => match context.try_borrow_mut() {
                Ok(mut context) => context.boot(self),
                Err(_) => {
                    warn!(worker = %id, "context busy, boot requeued");
                    self.push_task(Task::Boot(id.clone()));
                }
            },
            Err(_) => debug!(worker = %id, "terminated before boot"),
        }
    }
}
