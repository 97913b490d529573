//! The public face of a worker

use boa_engine::{Context, JsObject, JsValue};
use serde::Serialize;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use tracing::debug;
use url::Url;

use super::codec;
use super::context::ContextHandle;
use super::error::{WorkerError, WorkerResult};
use super::events::{self, EventKind, Listener, ListenerSet, WorkerEvent};
use super::id::ContextId;
use super::relay::{Envelope, OutboundQueue};
use super::state::HostState;

/// Lifecycle of a worker as seen from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Created, bootstrap not finished; messages are buffered
    Constructing,
    /// Bootstrap signalled ready; messages are delivered
    Ready,
    Terminated,
}

/// Host-side handle to one isolated context.
///
/// Cheap to clone; every clone refers to the same worker.
#[derive(Clone)]
pub struct WorkerHandle {
    inner: Rc<HandleInner>,
}

struct HandleInner {
    id: ContextId,
    script_ref: String,
    script_url: Url,
    context: ContextHandle,
    terminated: Cell<bool>,
    outbound: RefCell<OutboundQueue>,
    listeners: RefCell<ListenerSet>,
    /// Script object standing for this worker in the host context
    target: RefCell<Option<JsObject>>,
    host: Weak<HostState>,
}

impl WorkerHandle {
    pub(crate) fn new(
        script_ref: &str,
        script_url: Url,
        context: ContextHandle,
        host: Weak<HostState>,
    ) -> Self {
        Self {
            inner: Rc::new(HandleInner {
                id: context.id().clone(),
                script_ref: script_ref.to_string(),
                script_url,
                context,
                terminated: Cell::new(false),
                outbound: RefCell::new(OutboundQueue::new()),
                listeners: RefCell::new(ListenerSet::new()),
                target: RefCell::new(None),
                host,
            }),
        }
    }

    pub fn id(&self) -> &ContextId {
        &self.inner.id
    }

    /// The reference the worker was constructed with, before resolution
    pub fn script_ref(&self) -> &str {
        &self.inner.script_ref
    }

    pub fn script_url(&self) -> &Url {
        &self.inner.script_url
    }

    pub fn context(&self) -> &ContextHandle {
        &self.inner.context
    }

    pub fn state(&self) -> WorkerState {
        if self.is_terminated() {
            return WorkerState::Terminated;
        }
        match self.inner.host.upgrade() {
            Some(host) if host.is_ready(self.id()) => WorkerState::Ready,
            Some(_) => WorkerState::Constructing,
            None => WorkerState::Terminated,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.terminated.get()
    }

    /// Send any serializable value to the worker
    pub fn post_message<T: Serialize + ?Sized>(&self, message: &T) -> WorkerResult<()> {
        self.ensure_live()?;
        self.post_text(codec::encode(message)?)
    }

    /// Send a JSON value
    pub fn post_value(&self, data: Value) -> WorkerResult<()> {
        self.ensure_live()?;
        self.post_text(data.to_string())
    }

    /// Send a script value from the host context
    pub fn post_script_value(&self, data: &JsValue, context: &mut Context) -> WorkerResult<()> {
        self.ensure_live()?;
        self.post_text(codec::to_wire(data, context)?)
    }

    fn post_text(&self, payload: String) -> WorkerResult<()> {
        let host = self
            .inner
            .host
            .upgrade()
            .ok_or_else(|| WorkerError::HandleTerminated(self.id().clone()))?;
        host.send_to_context(self, Envelope::new(self.id().clone(), payload))
    }

    /// Stop the worker. Only the first call has an effect.
    pub fn terminate(&self) {
        if self.inner.terminated.replace(true) {
            return;
        }
        debug!(worker = %self.id(), "terminating");

        if let Some(host) = self.inner.host.upgrade() {
            host.release(self.id());
        }
        self.inner.outbound.borrow_mut().clear();
        self.inner.listeners.borrow_mut().clear();
        self.inner.target.borrow_mut().take();
    }

    /// Add an event listener. Returns `false` for a duplicate or a terminated worker.
    pub fn add_listener(&self, kind: EventKind, listener: Listener, capture: bool) -> bool {
        if self.is_terminated() {
            return false;
        }
        self.inner.listeners.borrow_mut().add(kind, listener, capture)
    }

    pub fn remove_listener(&self, kind: EventKind, listener: &Listener, capture: bool) -> bool {
        self.inner.listeners.borrow_mut().remove(kind, listener, capture)
    }

    /// Set or clear the `onmessage` / `onerror` slot
    pub fn set_handler(&self, kind: EventKind, listener: Option<Listener>) {
        if self.is_terminated() {
            return;
        }
        self.inner.listeners.borrow_mut().set_handler(kind, listener);
    }

    pub fn handler(&self, kind: EventKind) -> Option<Listener> {
        self.inner.listeners.borrow().handler(kind)
    }

    /// Number of messages waiting for the ready signal
    pub fn pending_messages(&self) -> usize {
        self.inner.outbound.borrow().len()
    }

    pub(crate) fn set_target(&self, target: JsObject) {
        *self.inner.target.borrow_mut() = Some(target);
    }

    pub(crate) fn enqueue_outbound(&self, envelope: Envelope) {
        self.inner.outbound.borrow_mut().push(envelope);
    }

    pub(crate) fn take_outbound(&self) -> Vec<Envelope> {
        self.inner.outbound.borrow_mut().drain()
    }

    /// Run this handle's listeners for `event`.
    ///
    /// Works on a snapshot, so listeners may add, remove or terminate freely.
    pub(crate) fn dispatch(&self, event: &WorkerEvent, context: &mut Context) -> Vec<String> {
        if self.is_terminated() {
            return Vec::new();
        }
        let listeners = self.inner.listeners.borrow().snapshot(event.kind());
        if listeners.is_empty() {
            return Vec::new();
        }
        let target = self.inner.target.borrow().clone();
        let this: JsValue = target.clone().map(JsValue::from).unwrap_or_default();
        events::dispatch(&listeners, event, &this, target.as_ref(), context)
    }

    /// Run a caller-built event object through the listeners, `dispatchEvent` style
    pub(crate) fn dispatch_object(
        &self,
        event: &WorkerEvent,
        object: &JsObject,
        context: &mut Context,
    ) -> Vec<String> {
        if self.is_terminated() {
            return Vec::new();
        }
        let listeners = self.inner.listeners.borrow().snapshot(event.kind());
        let this: JsValue = self.inner.target.borrow().clone().map(JsValue::from).unwrap_or_default();
        events::dispatch_object(&listeners, event, object, &this, context)
    }

    fn ensure_live(&self) -> WorkerResult<()> {
        if self.is_terminated() {
            Err(WorkerError::HandleTerminated(self.id().clone()))
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", self.id())
            .field("script", &self.inner.script_url.as_str())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}
