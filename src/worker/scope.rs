//! The global scope of an isolated context
//!
//! Installs the dedicated-worker surface into a fresh Boa context and runs
//! inbound events inside it. Native functions here never touch another
//! context: anything aimed at the host is queued as a task.

use boa_engine::{
    Context, JsNativeError, JsObject, JsResult, JsString, JsValue, NativeFunction, Source,
    js_string,
    object::{ObjectInitializer, builtins::JsArray},
    property::Attribute,
};
use boa_gc::{Finalize, Trace, empty_trace};
use boa_runtime::{
    extensions::{ConsoleExtension, EncodingExtension, MicrotaskExtension, TimeoutExtension, UrlExtension},
    register_extensions,
};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use tracing::{debug, warn};
use url::Url;

use super::binary;
use super::bootstrap::{LocationSnapshot, ShimGlobal};
use super::codec;
use super::error::{ErrorReport, WorkerError};
use super::events::{self, ErrorEvent, EventKind, Listener, ListenerSet, MessageEvent, WorkerEvent};
use super::id::ContextId;
use super::relay::Envelope;
use super::state::{HostState, Task};
use crate::loader::fetch_script;
use crate::runtime::console::ConsoleLogger;

/// State shared between an isolated context and the natives installed in it
pub(crate) struct ScopeShared {
    pub id: ContextId,
    pub script: Url,
    pub closing: Cell<bool>,
    pub listeners: RefCell<ListenerSet>,
    pub host: Weak<HostState>,
}

impl ScopeShared {
    pub fn new(id: ContextId, script: Url, host: Weak<HostState>) -> Self {
        Self {
            id,
            script,
            closing: Cell::new(false),
            listeners: RefCell::new(ListenerSet::new()),
            host,
        }
    }

    fn host(&self) -> JsResult<Rc<HostState>> {
        self.host.upgrade().ok_or_else(|| {
            JsNativeError::error()
                .with_message("the worker host has shut down")
                .into()
        })
    }
}

#[derive(Finalize)]
struct ScopeCapture {
    shared: Rc<ScopeShared>,
}

unsafe impl Trace for ScopeCapture {
    empty_trace!();
}

/// Install one global from the bootstrap descriptor
pub(crate) fn install(
    global: ShimGlobal,
    context: &mut Context,
    shared: &Rc<ScopeShared>,
    location: &LocationSnapshot,
) -> JsResult<()> {
    match global {
        ShimGlobal::SelfReference => {
            let global_object = context.global_object();
            context.register_global_property(
                js_string!("self"),
                global_object,
                Attribute::WRITABLE | Attribute::CONFIGURABLE,
            )?;
        }
        ShimGlobal::Location => install_location(context, location)?,
        ShimGlobal::PostMessage => {
            register(context, shared, "postMessage", 1, post_message)?;
        }
        ShimGlobal::ImportScripts => {
            register(context, shared, "importScripts", 1, import_scripts)?;
        }
        ShimGlobal::Close => {
            register(context, shared, "close", 0, close)?;
        }
        ShimGlobal::EventTarget => {
            context.register_global_property(js_string!("onmessage"), JsValue::null(), Attribute::all())?;
            context.register_global_property(js_string!("onerror"), JsValue::null(), Attribute::all())?;
            register(context, shared, "addEventListener", 2, add_event_listener)?;
            register(context, shared, "removeEventListener", 2, remove_event_listener)?;
            register(context, shared, "dispatchEvent", 1, dispatch_event)?;
        }
        ShimGlobal::Timers => {
            register_extensions((TimeoutExtension, MicrotaskExtension), None, context)?;
        }
        ShimGlobal::Base64 => {
            let btoa = NativeFunction::from_fn_ptr(binary::js_btoa);
            let atob = NativeFunction::from_fn_ptr(binary::js_atob);
            context.register_global_callable(js_string!("btoa"), 1, btoa)?;
            context.register_global_callable(js_string!("atob"), 1, atob)?;
        }
        ShimGlobal::Navigator => install_navigator(context)?,
        ShimGlobal::Console => {
            register_extensions(
                (
                    ConsoleExtension(ConsoleLogger::labelled(shared.id.as_str())),
                    UrlExtension,
                    EncodingExtension,
                ),
                None,
                context,
            )?;
        }
    }
    Ok(())
}

type ScopeNative = fn(&JsValue, &[JsValue], &ScopeCapture, &mut Context) -> JsResult<JsValue>;

fn register(
    context: &mut Context,
    shared: &Rc<ScopeShared>,
    name: &'static str,
    length: usize,
    function: ScopeNative,
) -> JsResult<()> {
    let native = NativeFunction::from_copy_closure_with_captures(
        move |this, args, captures, context| function(this, args, captures, context),
        ScopeCapture {
            shared: shared.clone(),
        },
    );
    context.register_global_callable(JsString::from(name), length, native)
}

fn install_location(context: &mut Context, location: &LocationSnapshot) -> JsResult<()> {
    let fixed = Attribute::READONLY | Attribute::ENUMERABLE | Attribute::PERMANENT;
    let fields = [
        ("href", &location.href),
        ("origin", &location.origin),
        ("protocol", &location.protocol),
        ("host", &location.host),
        ("hostname", &location.hostname),
        ("port", &location.port),
        ("pathname", &location.pathname),
        ("search", &location.search),
        ("hash", &location.hash),
    ];

    let mut builder = ObjectInitializer::new(context);
    for (name, value) in fields {
        builder.property(JsString::from(name), JsString::from(value.as_str()), fixed);
    }
    builder.function(
        NativeFunction::from_fn_ptr(location_to_string),
        js_string!("toString"),
        0,
    );
    let object = builder.build();

    context.register_global_property(js_string!("location"), object, fixed)
}

fn install_navigator(context: &mut Context) -> JsResult<()> {
    let fixed = Attribute::READONLY | Attribute::ENUMERABLE | Attribute::PERMANENT;
    let concurrency = std::thread::available_parallelism().map_or(1, |n| n.get());
    let user_agent = format!("frameworker/{}", env!("CARGO_PKG_VERSION"));
    let languages = JsArray::from_iter([JsValue::from(js_string!("en-US"))], context);

    let navigator = ObjectInitializer::new(context)
        .property(js_string!("userAgent"), JsString::from(user_agent.as_str()), fixed)
        .property(js_string!("appName"), js_string!("frameworker"), fixed)
        .property(js_string!("platform"), JsString::from(std::env::consts::OS), fixed)
        .property(js_string!("language"), js_string!("en-US"), fixed)
        .property(js_string!("languages"), languages, fixed)
        .property(js_string!("onLine"), true, fixed)
        .property(js_string!("hardwareConcurrency"), concurrency as u32, fixed)
        .build();

    context.register_global_property(js_string!("navigator"), navigator, fixed)
}

fn location_to_string(this: &JsValue, _args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    match this.as_object() {
        Some(location) => location.get(js_string!("href"), context),
        None => Ok(JsValue::undefined()),
    }
}

fn post_message(
    _this: &JsValue,
    args: &[JsValue],
    captures: &ScopeCapture,
    context: &mut Context,
) -> JsResult<JsValue> {
    let shared = &captures.shared;
    let data = args
        .first()
        .ok_or_else(|| WorkerError::invalid("postMessage requires a message argument"))?;
    let payload = codec::to_wire(data, context)?;

    if shared.closing.get() {
        debug!(worker = %shared.id, "message posted after close() discarded");
        return Ok(JsValue::undefined());
    }
    let host = shared.host()?;
    host.queue_inbound(&shared.id, Envelope::new(shared.id.clone(), payload));
    Ok(JsValue::undefined())
}

fn import_scripts(
    _this: &JsValue,
    args: &[JsValue],
    captures: &ScopeCapture,
    context: &mut Context,
) -> JsResult<JsValue> {
    let shared = &captures.shared;
    let host = shared.host()?;

    // resolve every argument before loading any of them
    let mut urls = Vec::with_capacity(args.len());
    for (index, arg) in args.iter().enumerate() {
        let script_ref = arg
            .as_string()
            .map(|s| s.to_std_string_escaped())
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| {
                WorkerError::invalid(format!(
                    "arguments passed to importScripts must be non-empty strings; argument #{} was not",
                    index
                ))
            })?;
        urls.push(host.resolver.resolve_script(&shared.script, &script_ref)?);
    }

    for url in urls {
        let source = fetch_script(host.loader.as_ref(), &host.transpiler, &url).map_err(|err| {
            JsNativeError::error()
                .with_message(format!("NetworkError: failed to load '{}': {}", url, err))
        })?;
        debug!(worker = %shared.id, script = %url, "importScripts");
        context.eval(Source::from_bytes(source.as_bytes()))?;
    }

    Ok(JsValue::undefined())
}

fn close(
    _this: &JsValue,
    _args: &[JsValue],
    captures: &ScopeCapture,
    _context: &mut Context,
) -> JsResult<JsValue> {
    let shared = &captures.shared;
    if !shared.closing.replace(true) {
        debug!(worker = %shared.id, "close() called");
        if let Some(host) = shared.host.upgrade() {
            host.push_task(Task::Close(shared.id.clone()));
        }
    }
    Ok(JsValue::undefined())
}

fn add_event_listener(
    _this: &JsValue,
    args: &[JsValue],
    captures: &ScopeCapture,
    _context: &mut Context,
) -> JsResult<JsValue> {
    if let Some((kind, listener, capture)) = events::parse_listener_args(args)? {
        captures.shared.listeners.borrow_mut().add(kind, listener, capture);
    }
    Ok(JsValue::undefined())
}

fn remove_event_listener(
    _this: &JsValue,
    args: &[JsValue],
    captures: &ScopeCapture,
    _context: &mut Context,
) -> JsResult<JsValue> {
    if let Some((kind, listener, capture)) = events::parse_listener_args(args)? {
        captures.shared.listeners.borrow_mut().remove(kind, &listener, capture);
    }
    Ok(JsValue::undefined())
}

fn dispatch_event(
    _this: &JsValue,
    args: &[JsValue],
    captures: &ScopeCapture,
    context: &mut Context,
) -> JsResult<JsValue> {
    let shared = &captures.shared;
    let global = context.global_object();
    let this: JsValue = global.clone().into();
    let object = args.first().cloned().unwrap_or_default();

    let Some(event) = events::adopt_event(&object, &this, &shared.id, context)? else {
        return Ok(true.into());
    };
    let Some(event_object) = object.as_object().map(|o| o.clone()) else {
        return Ok(true.into());
    };

    let mut listeners: Vec<Listener> = Vec::new();
    if event.kind() == EventKind::Message {
        listeners.extend(
            global
                .get(js_string!("onmessage"), context)
                .ok()
                .and_then(|handler| Listener::script(&handler)),
        );
    }
    listeners.extend(shared.listeners.borrow().snapshot(event.kind()));

    let failures = events::dispatch_object(&listeners, &event, &event_object, &this, context);
    for message in failures {
        let report = ErrorReport::new(message, shared.script.as_str());
        report_uncaught(context, shared, report, JsValue::null());
    }
    Ok(events::not_canceled(&event, &object, context).into())
}

/// Fire a `message` event on the scope: `onmessage` first, then listeners
pub(crate) fn dispatch_message(context: &mut Context, shared: &ScopeShared, envelope: &Envelope) {
    let event = WorkerEvent::Message(MessageEvent::new(
        shared.id.clone(),
        envelope.payload.clone(),
        envelope.time_stamp,
    ));

    let global = context.global_object();
    let mut listeners: Vec<Listener> = global
        .get(js_string!("onmessage"), context)
        .ok()
        .and_then(|handler| Listener::script(&handler))
        .into_iter()
        .collect();
    listeners.extend(shared.listeners.borrow().snapshot(EventKind::Message));
    if listeners.is_empty() {
        return;
    }

    let this: JsValue = global.clone().into();
    let failures = events::dispatch(&listeners, &event, &this, Some(&global), context);
    for message in failures {
        let report = ErrorReport::new(message, shared.script.as_str());
        report_uncaught(context, shared, report, JsValue::null());
    }
}

/// Give the scope a chance to handle an uncaught error, then forward it to the host.
///
/// Handled means `onerror` returned `true` or an `error` listener called
/// `preventDefault()`.
pub(crate) fn report_uncaught(
    context: &mut Context,
    shared: &ScopeShared,
    report: ErrorReport,
    error: JsValue,
) {
    let global = context.global_object();
    let this: JsValue = global.clone().into();

    if let Some(onerror) = global
        .get(js_string!("onerror"), context)
        .ok()
        .and_then(|handler| callable(&handler))
    {
        let args = [
            JsString::from(report.message.as_str()).into(),
            JsString::from(report.filename.as_str()).into(),
            report.lineno.into(),
            report.colno.into(),
            error,
        ];
        match onerror.call(&this, &args, context) {
            Ok(handled) if handled.as_boolean() == Some(true) => return,
            Ok(_) => {}
            Err(err) => warn!(worker = %shared.id, "onerror threw: {}", err),
        }
    }

    let listeners = shared.listeners.borrow().snapshot(EventKind::Error);
    if !listeners.is_empty() {
        let event = WorkerEvent::Error(ErrorEvent::new(shared.id.clone(), report.clone()));
        for failure in events::dispatch(&listeners, &event, &this, Some(&global), context) {
            warn!(worker = %shared.id, "error listener failed: {}", failure);
        }
        if event.as_error().is_some_and(|e| e.default_prevented()) {
            return;
        }
    }

    if let Some(host) = shared.host.upgrade() {
        host.queue_error(&shared.id, report);
    }
}

fn callable(value: &JsValue) -> Option<JsObject> {
    value
        .as_object()
        .filter(|obj| obj.is_callable())
        .map(|obj| obj.clone())
}
