//! `Worker` constructor for the host context
//!
//! The class itself is plain JavaScript holding nothing but the worker id in a
//! private field. Every operation goes through a native bridge function that
//! looks the handle up in the host state's registry.

use boa_engine::{
    Context, JsNativeError, JsResult, JsString, JsValue, NativeFunction, Source,
};
use boa_gc::{Finalize, Trace, empty_trace};
use std::rc::{Rc, Weak};
use url::Url;

use super::error::WorkerError;
use super::events::{self, EventKind, Listener};
use super::handle::WorkerHandle;
use super::id::ContextId;
use super::state::HostState;

#[derive(Finalize)]
struct HostCapture {
    host: Weak<HostState>,
}

unsafe impl Trace for HostCapture {
    empty_trace!();
}

impl HostCapture {
    fn host(&self) -> JsResult<Rc<HostState>> {
        self.host.upgrade().ok_or_else(|| {
            JsNativeError::error()
                .with_message("the worker host has shut down")
                .into()
        })
    }
}

type HostNative = fn(&JsValue, &[JsValue], &HostCapture, &mut Context) -> JsResult<JsValue>;

const WORKER_CLASS: &str = r#"
(function () {
    const create = __frameworker_create;
    const post = __frameworker_post;
    const terminate = __frameworker_terminate;
    const listen = __frameworker_listen;
    const slot = __frameworker_slot;
    const dispatch = __frameworker_dispatch;

    class Worker {
        #id;

        constructor(scriptRef) {
            if (arguments.length === 0) {
                throw new TypeError("Worker constructor: 1 argument required");
            }
            if (typeof URL === "function" && scriptRef instanceof URL) {
                scriptRef = scriptRef.href;
            }
            this.#id = create(scriptRef, Worker.baseURI, this);
        }

        postMessage(data) {
            post(this.#id, data);
        }

        terminate() {
            terminate(this.#id);
        }

        addEventListener(type, listener, useCapture) {
            listen(this.#id, type, listener, useCapture, true);
        }

        removeEventListener(type, listener, useCapture) {
            listen(this.#id, type, listener, useCapture, false);
        }

        dispatchEvent(event) {
            return dispatch(this.#id, event, this);
        }

        get onmessage() { return slot(this.#id, "message"); }
        set onmessage(handler) { slot(this.#id, "message", handler); }

        get onerror() { return slot(this.#id, "error"); }
        set onerror(handler) { slot(this.#id, "error", handler); }
    }

    Worker.baseURI = "";

    Object.defineProperty(globalThis, "Worker", {
        value: Worker,
        writable: true,
        configurable: true,
        enumerable: false,
    });
})();
"#;

/// Install the `Worker` class and its bridge natives into the host context
pub fn install(context: &mut Context, host: Weak<HostState>) -> JsResult<()> {
    let natives: [(&str, usize, HostNative); 6] = [
        ("__frameworker_create", 3, create_worker),
        ("__frameworker_post", 2, post_message),
        ("__frameworker_terminate", 1, terminate_worker),
        ("__frameworker_listen", 5, listen),
        ("__frameworker_slot", 3, slot),
        ("__frameworker_dispatch", 3, dispatch_event),
    ];
    for (name, length, function) in natives {
        let native = NativeFunction::from_copy_closure_with_captures(
            move |this, args, captures, context| function(this, args, captures, context),
            HostCapture { host: host.clone() },
        );
        context.register_global_callable(JsString::from(name), length, native)?;
    }

    context.eval(Source::from_bytes(WORKER_CLASS.as_bytes()))?;
    Ok(())
}

fn string_arg(args: &[JsValue], index: usize) -> Option<String> {
    args.get(index)
        .and_then(|v| v.as_string().map(|s| s.to_std_string_escaped()))
}

fn lookup(host: &HostState, args: &[JsValue]) -> JsResult<Option<WorkerHandle>> {
    let id = string_arg(args, 0)
        .ok_or_else(|| JsNativeError::typ().with_message("illegal invocation"))?;
    Ok(host.handle(&ContextId::from(id.as_str())))
}

/// `__frameworker_create(scriptRef, baseURI, target)`
fn create_worker(
    _this: &JsValue,
    args: &[JsValue],
    captures: &HostCapture,
    _context: &mut Context,
) -> JsResult<JsValue> {
    let host = captures.host()?;
    let script_ref = string_arg(args, 0)
        .ok_or_else(|| WorkerError::invalid("worker script reference must be a string"))?;

    let base_override = match string_arg(args, 1) {
        Some(base) if !base.trim().is_empty() => Some(Url::parse(base.trim()).map_err(|e| {
            WorkerError::invalid(format!("Worker.baseURI '{}' is not a valid URL: {}", base, e))
        })?),
        _ => None,
    };

    let handle = host.spawn(&script_ref, base_override.as_ref())?;
    if let Some(target) = args.get(2).and_then(|v| v.as_object()) {
        handle.set_target(target.clone());
    }
    Ok(JsString::from(handle.id().as_str()).into())
}

/// `__frameworker_post(id, data)`
fn post_message(
    _this: &JsValue,
    args: &[JsValue],
    captures: &HostCapture,
    context: &mut Context,
) -> JsResult<JsValue> {
    let host = captures.host()?;
    let handle = match lookup(&host, args)? {
        Some(handle) => handle,
        None => {
            let id = string_arg(args, 0).unwrap_or_default();
            return Err(WorkerError::HandleTerminated(ContextId::from(id.as_str())).into());
        }
    };
    let data = args.get(1).cloned().unwrap_or_default();
    handle.post_script_value(&data, context)?;
    Ok(JsValue::undefined())
}

/// `__frameworker_terminate(id)`
fn terminate_worker(
    _this: &JsValue,
    args: &[JsValue],
    captures: &HostCapture,
    _context: &mut Context,
) -> JsResult<JsValue> {
    let host = captures.host()?;
    if let Some(handle) = lookup(&host, args)? {
        handle.terminate();
    }
    Ok(JsValue::undefined())
}

/// `__frameworker_listen(id, type, listener, useCapture, add)`
fn listen(
    _this: &JsValue,
    args: &[JsValue],
    captures: &HostCapture,
    _context: &mut Context,
) -> JsResult<JsValue> {
    let host = captures.host()?;
    let listener_args = args.get(1..).unwrap_or_default();
    let parsed = events::parse_listener_args(listener_args)?;
    let add = args.get(4).is_some_and(|v| v.to_boolean());

    let (Some(handle), Some((kind, listener, capture))) = (lookup(&host, args)?, parsed) else {
        return Ok(JsValue::undefined());
    };
    if add {
        handle.add_listener(kind, listener, capture);
    } else {
        handle.remove_listener(kind, &listener, capture);
    }
    Ok(JsValue::undefined())
}

/// `__frameworker_slot(id, type)` reads, `__frameworker_slot(id, type, value)` writes
fn slot(
    _this: &JsValue,
    args: &[JsValue],
    captures: &HostCapture,
    _context: &mut Context,
) -> JsResult<JsValue> {
    let host = captures.host()?;
    let kind = string_arg(args, 1)
        .as_deref()
        .and_then(EventKind::parse)
        .ok_or_else(|| JsNativeError::typ().with_message("unknown event handler slot"))?;
    let handle = lookup(&host, args)?;

    if args.len() < 3 {
        let current = handle
            .and_then(|h| h.handler(kind))
            .and_then(|listener| listener.as_script().cloned())
            .map(JsValue::from)
            .unwrap_or_else(JsValue::null);
        return Ok(current);
    }

    if let Some(handle) = handle {
        // non-callable values clear the slot, as with DOM event handler attributes
        handle.set_handler(kind, args.get(2).and_then(Listener::script));
    }
    Ok(JsValue::undefined())
}

/// `__frameworker_dispatch(id, event, target)`
fn dispatch_event(
    _this: &JsValue,
    args: &[JsValue],
    captures: &HostCapture,
    context: &mut Context,
) -> JsResult<JsValue> {
    let host = captures.host()?;
    let object = args.get(1).cloned().unwrap_or_default();
    let target = args.get(2).cloned().unwrap_or_default();
    let id = ContextId::from(string_arg(args, 0).unwrap_or_default().as_str());

    let Some(event) = events::adopt_event(&object, &target, &id, context)? else {
        return Ok(true.into());
    };
    if let (Some(handle), Some(event_object)) = (lookup(&host, args)?, object.as_object()) {
        let failures = handle.dispatch_object(&event, &event_object.clone(), context);
        host.queue_listener_failures(handle.id(), failures);
    }
    Ok(events::not_canceled(&event, &object, context).into())
}
