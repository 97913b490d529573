//! Isolated execution contexts and the factory that owns them

use boa_engine::{Context, Source, context::ContextBuilder};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::time::Instant;
use tracing::{debug, error, warn};
use url::Url;

use super::bootstrap::BootstrapSpec;
use super::error::{ErrorReport, WorkerError, WorkerResult};
use super::id::ContextId;
use super::relay::Envelope;
use super::scope::{self, ScopeShared};
use super::state::{HostState, Task};
use crate::loader::fetch_script;
use crate::runtime::event_loop::ContextEventLoop;

/// Opaque reference to a factory-owned context
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextHandle {
    id: ContextId,
}

impl ContextHandle {
    pub(crate) fn new(id: ContextId) -> Self {
        Self { id }
    }

    pub fn id(&self) -> &ContextId {
        &self.id
    }
}

/// One worker's Boa context, with its own globals, call stack and job queues
pub struct IsolatedContext {
    id: ContextId,
    base: Url,
    script: Url,
    context: Context,
    event_loop: Rc<ContextEventLoop>,
    bootstrap: Option<BootstrapSpec>,
    shared: Rc<ScopeShared>,
    booted: bool,
}

impl IsolatedContext {
    fn new(id: &ContextId, base: Url, script: Url, host: Weak<HostState>) -> WorkerResult<Self> {
        let event_loop = Rc::new(ContextEventLoop::new());
        let context = ContextBuilder::default()
            .job_executor(event_loop.clone())
            .build()
            .map_err(|e| WorkerError::ContextCreation(e.to_string()))?;

        Ok(Self {
            id: id.clone(),
            bootstrap: Some(BootstrapSpec::dedicated(id, &script)),
            shared: Rc::new(ScopeShared::new(id.clone(), script.clone(), host)),
            base,
            script,
            context,
            event_loop,
            booted: false,
        })
    }

    pub fn id(&self) -> &ContextId {
        &self.id
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn script(&self) -> &Url {
        &self.script
    }

    pub fn is_booted(&self) -> bool {
        self.booted
    }

    pub fn is_closing(&self) -> bool {
        self.shared.closing.get()
    }

    /// Interpret the bootstrap descriptor. Runs at most once.
    pub(crate) fn boot(&mut self, host: &HostState) {
        let Some(spec) = self.bootstrap.take() else {
            return;
        };
        debug!(worker = %self.id, script = %self.script, "booting");

        for global in &spec.globals {
            if let Err(err) = scope::install(*global, &mut self.context, &self.shared, &spec.location) {
                error!(worker = %self.id, "failed to install {:?}: {}", global, err);
                let report = ErrorReport::new(
                    format!("failed to set up worker scope: {}", err),
                    self.script.as_str(),
                );
                host.queue_error(&self.id, report);
                return;
            }
        }

        for script in &spec.scripts {
            let source = match fetch_script(host.loader.as_ref(), &host.transpiler, script) {
                Ok(source) => source,
                Err(err) => {
                    warn!(worker = %self.id, script = %script, "{}", err);
                    let report = ErrorReport::new(
                        format!("NetworkError: failed to load worker script '{}': {}", script, err),
                        script.as_str(),
                    );
                    host.queue_error(&self.id, report);
                    return;
                }
            };
            self.evaluate(&source, script.as_str());
        }

        self.booted = true;
        host.push_task(Task::Ready(spec.ready.context));
    }

    /// Run one inbound message inside the context
    pub(crate) fn deliver(&mut self, envelope: &Envelope) {
        if self.is_closing() {
            debug!(worker = %self.id, "closing, message dropped");
            return;
        }
        scope::dispatch_message(&mut self.context, &self.shared, envelope);
    }

    /// Run whatever jobs are ready. Returns `true` if anything ran.
    pub(crate) fn pump(&mut self) -> bool {
        if !self.booted {
            return false;
        }
        if self.is_closing() {
            self.event_loop.clear();
            return false;
        }

        let mut ran = false;
        loop {
            match self.event_loop.run_ready(&mut self.context) {
                Ok(more) => return ran || more,
                Err(err) => {
                    ran = true;
                    let report = ErrorReport::from_js_error(&err, self.script.as_str(), &mut self.context);
                    let thrown = err.to_opaque(&mut self.context);
                    scope::report_uncaught(&mut self.context, &self.shared, report, thrown);
                }
            }
        }
    }

    pub(crate) fn has_pending_work(&self) -> bool {
        self.booted && !self.is_closing() && self.event_loop.has_pending_work()
    }

    pub(crate) fn has_ready_work(&self) -> bool {
        self.booted && !self.is_closing() && self.event_loop.has_ready_work()
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        if self.booted && !self.is_closing() {
            self.event_loop.next_deadline()
        } else {
            None
        }
    }

    fn evaluate(&mut self, source: &str, filename: &str) {
        if let Err(err) = self.context.eval(Source::from_bytes(source.as_bytes())) {
            // a throwing top-level script still counts as loaded
            let report = ErrorReport::from_js_error(&err, filename, &mut self.context);
            let thrown = err.to_opaque(&mut self.context);
            scope::report_uncaught(&mut self.context, &self.shared, report, thrown);
        }
    }
}

struct Entry {
    context: Rc<RefCell<IsolatedContext>>,
    // reachable without borrowing the context, which may be executing
    shared: Rc<ScopeShared>,
    event_loop: Rc<ContextEventLoop>,
}

/// Creates, tracks and destroys isolated contexts
#[derive(Default)]
pub struct IsolatedContextFactory {
    contexts: HashMap<ContextId, Entry>,
}

impl IsolatedContextFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a context for `script`. Its bootstrap runs when the host
    /// processes the `Boot` task queued for it.
    pub fn create(
        &mut self,
        id: &ContextId,
        base: Url,
        script: Url,
        host: Weak<HostState>,
    ) -> WorkerResult<ContextHandle> {
        let context = IsolatedContext::new(id, base, script, host)?;
        let entry = Entry {
            shared: context.shared.clone(),
            event_loop: context.event_loop.clone(),
            context: Rc::new(RefCell::new(context)),
        };
        self.contexts.insert(id.clone(), entry);
        debug!(worker = %id, "context created");
        Ok(ContextHandle::new(id.clone()))
    }

    /// Detach a context. Later operations on the handle fail with `ContextDestroyed`.
    ///
    /// A context that is still running finishes its current call and is dropped
    /// when its stack unwinds.
    pub fn destroy(&mut self, handle: &ContextHandle) -> WorkerResult<()> {
        let entry = self
            .contexts
            .remove(handle.id())
            .ok_or_else(|| WorkerError::ContextDestroyed(handle.id().clone()))?;

        entry.shared.closing.set(true);
        entry.shared.listeners.borrow_mut().clear();
        entry.event_loop.clear();
        debug!(worker = %handle.id(), "context destroyed");
        Ok(())
    }

    pub fn get(&self, id: &ContextId) -> WorkerResult<Rc<RefCell<IsolatedContext>>> {
        self.contexts
            .get(id)
            .map(|entry| entry.context.clone())
            .ok_or_else(|| WorkerError::ContextDestroyed(id.clone()))
    }

    pub fn contains(&self, id: &ContextId) -> bool {
        self.contexts.contains_key(id)
    }

    /// Every live context, detached from the table
    pub fn live(&self) -> Vec<Rc<RefCell<IsolatedContext>>> {
        self.contexts.values().map(|entry| entry.context.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_create_and_destroy() {
        let mut factory = IsolatedContextFactory::new();
        let id = ContextId::from("worker-0-0");
        let handle = factory
            .create(&id, url("http://example.com/"), url("http://example.com/w.js"), Weak::new())
            .unwrap();

        assert_eq!(handle.id(), &id);
        assert!(factory.contains(&id));
        let context = factory.get(&id).unwrap();
        assert!(!context.borrow().is_booted());
        assert_eq!(context.borrow().script().as_str(), "http://example.com/w.js");

        factory.destroy(&handle).unwrap();
        assert!(context.borrow().is_closing());
        assert!(factory.is_empty());
        assert_eq!(factory.get(&id).err(), Some(WorkerError::ContextDestroyed(id.clone())));
        assert_eq!(factory.destroy(&handle), Err(WorkerError::ContextDestroyed(id)));
    }

    #[test]
    fn test_contexts_do_not_share_globals() {
        let mut factory = IsolatedContextFactory::new();
        let a = ContextId::from("worker-0-0");
        let b = ContextId::from("worker-1-0");
        for id in [&a, &b] {
            factory
                .create(id, url("http://example.com/"), url("http://example.com/w.js"), Weak::new())
                .unwrap();
        }

        let first = factory.get(&a).unwrap();
        first
            .borrow_mut()
            .context
            .eval(Source::from_bytes("globalThis.secret = 42;"))
            .unwrap();

        let second = factory.get(&b).unwrap();
        let seen = second
            .borrow_mut()
            .context
            .eval(Source::from_bytes("typeof secret"))
            .unwrap();
        assert_eq!(seen.as_string().map(|s| s.to_std_string_escaped()).as_deref(), Some("undefined"));
        assert_eq!(factory.live().len(), 2);
    }
}
