//! Worker events and listener bookkeeping
//!
//! The same listener table backs both sides of the boundary: the host's
//! `WorkerHandle` and the isolated context's global scope.

use boa_engine::{
    Context, JsNativeError, JsObject, JsResult, JsString, JsValue, NativeFunction, js_string,
    object::{ObjectInitializer, builtins::JsArray},
    property::Attribute,
};
use serde_json::Value;
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use super::codec;
use super::error::{ErrorReport, WorkerError, WorkerResult};
use super::id::{ContextId, now_millis};

/// Event types a worker understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Message,
    Error,
}

impl EventKind {
    /// Parse a DOM event type. Unknown types yield `None` and are ignored by callers.
    pub fn parse(event_type: &str) -> Option<Self> {
        match event_type {
            "message" => Some(EventKind::Message),
            "error" => Some(EventKind::Error),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Message => "message",
            EventKind::Error => "error",
        }
    }
}

/// Data delivered by `postMessage` on the other side of the boundary
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEvent {
    /// JSON text of the message, exactly as the sender serialized it
    pub payload: String,
    pub origin: String,
    pub last_event_id: String,
    pub time_stamp: u64,
    pub source: ContextId,
}

impl MessageEvent {
    pub fn new(source: ContextId, payload: String, time_stamp: u64) -> Self {
        Self {
            payload,
            origin: String::new(),
            last_event_id: String::new(),
            time_stamp,
            source,
        }
    }

    /// Decode the message for a Rust listener
    pub fn data(&self) -> WorkerResult<Value> {
        serde_json::from_str(&self.payload)
            .map_err(|e| WorkerError::invalid(format!("malformed message payload: {}", e)))
    }
}

/// An uncaught error raised inside an isolated context
#[derive(Debug)]
pub struct ErrorEvent {
    pub report: ErrorReport,
    pub source: ContextId,
    pub time_stamp: u64,
    default_prevented: Cell<bool>,
}

impl ErrorEvent {
    pub fn new(source: ContextId, report: ErrorReport) -> Self {
        Self {
            report,
            source,
            time_stamp: now_millis(),
            default_prevented: Cell::new(false),
        }
    }

    /// Mark the error as handled
    pub fn prevent_default(&self) {
        self.default_prevented.set(true);
    }

    pub fn default_prevented(&self) -> bool {
        self.default_prevented.get()
    }
}

#[derive(Debug)]
pub enum WorkerEvent {
    Message(MessageEvent),
    Error(ErrorEvent),
}

impl WorkerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            WorkerEvent::Message(_) => EventKind::Message,
            WorkerEvent::Error(_) => EventKind::Error,
        }
    }

    pub fn as_message(&self) -> Option<&MessageEvent> {
        match self {
            WorkerEvent::Message(event) => Some(event),
            WorkerEvent::Error(_) => None,
        }
    }

    pub fn as_error(&self) -> Option<&ErrorEvent> {
        match self {
            WorkerEvent::Error(event) => Some(event),
            WorkerEvent::Message(_) => None,
        }
    }

    /// Build the DOM-shaped object handed to script listeners
    pub(crate) fn to_js(&self, target: Option<&JsObject>, context: &mut Context) -> JsResult<JsObject> {
        let target: JsValue = target.map(|t| t.clone().into()).unwrap_or_default();

        match self {
            WorkerEvent::Message(event) => {
                let data = codec::from_wire(&event.payload, context)?;
                let ports = JsArray::new(context);
                let object = ObjectInitializer::new(context)
                    .property(js_string!("type"), js_string!("message"), Attribute::all())
                    .property(js_string!("data"), data, Attribute::all())
                    .property(js_string!("origin"), JsString::from(event.origin.as_str()), Attribute::all())
                    .property(
                        js_string!("lastEventId"),
                        JsString::from(event.last_event_id.as_str()),
                        Attribute::all(),
                    )
                    .property(js_string!("ports"), ports, Attribute::all())
                    .property(js_string!("timeStamp"), event.time_stamp as f64, Attribute::all())
                    .property(js_string!("target"), target, Attribute::all())
                    .build();
                Ok(object)
            }
            WorkerEvent::Error(event) => {
                let report = &event.report;
                let object = ObjectInitializer::new(context)
                    .property(js_string!("type"), js_string!("error"), Attribute::all())
                    .property(js_string!("message"), JsString::from(report.message.as_str()), Attribute::all())
                    .property(js_string!("filename"), JsString::from(report.filename.as_str()), Attribute::all())
                    .property(js_string!("lineno"), report.lineno, Attribute::all())
                    .property(js_string!("colno"), report.colno, Attribute::all())
                    .property(js_string!("timeStamp"), event.time_stamp as f64, Attribute::all())
                    .property(js_string!("defaultPrevented"), event.default_prevented(), Attribute::all())
                    .property(js_string!("target"), target, Attribute::all())
                    .function(
                        NativeFunction::from_fn_ptr(prevent_default),
                        js_string!("preventDefault"),
                        0,
                    )
                    .build();
                Ok(object)
            }
        }
    }

    /// Copy `defaultPrevented` back from a script event object
    fn sync_from_js(&self, object: &JsObject, context: &mut Context) {
        if let WorkerEvent::Error(event) = self {
            let prevented = object
                .get(js_string!("defaultPrevented"), context)
                .map(|v| v.to_boolean())
                .unwrap_or(false);
            if prevented {
                event.prevent_default();
            }
        }
    }
}

fn prevent_default(this: &JsValue, _args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    if let Some(event) = this.as_object() {
        event.set(js_string!("defaultPrevented"), true, false, context)?;
    }
    Ok(JsValue::undefined())
}

/// Outcome of a native listener; an `Err` is reported as a listener failure
pub type ListenerResult = Result<(), String>;

/// Something that can receive worker events
#[derive(Clone)]
pub enum Listener {
    Native(Rc<dyn Fn(&WorkerEvent) -> ListenerResult>),
    Script(JsObject),
}

impl Listener {
    pub fn native(f: impl Fn(&WorkerEvent) -> ListenerResult + 'static) -> Self {
        Listener::Native(Rc::new(f))
    }

    /// Wrap a script value; `None` unless it is callable
    pub fn script(value: &JsValue) -> Option<Self> {
        value
            .as_object()
            .filter(|obj| obj.is_callable())
            .map(|obj| Listener::Script(obj.clone()))
    }

    /// Identity comparison used for de-duplication and removal
    pub fn same(&self, other: &Listener) -> bool {
        match (self, other) {
            (Listener::Native(a), Listener::Native(b)) => Rc::ptr_eq(a, b),
            (Listener::Script(a), Listener::Script(b)) => JsObject::equals(a, b),
            _ => false,
        }
    }

    pub fn as_script(&self) -> Option<&JsObject> {
        match self {
            Listener::Script(obj) => Some(obj),
            Listener::Native(_) => None,
        }
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Listener::Native(_) => f.write_str("Listener::Native"),
            Listener::Script(_) => f.write_str("Listener::Script"),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    kind: EventKind,
    listener: Listener,
    capture: bool,
    /// `onmessage` / `onerror` slot rather than an `addEventListener` registration
    handler: bool,
}

/// Ordered listener table for one event target
#[derive(Debug, Default)]
pub struct ListenerSet {
    entries: Vec<Entry>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. Returns `false` if the same `(listener, capture)` pair
    /// is already registered for this kind.
    pub fn add(&mut self, kind: EventKind, listener: Listener, capture: bool) -> bool {
        let duplicate = self.entries.iter().any(|e| {
            !e.handler && e.kind == kind && e.capture == capture && e.listener.same(&listener)
        });
        if duplicate {
            return false;
        }
        self.entries.push(Entry {
            kind,
            listener,
            capture,
            handler: false,
        });
        true
    }

    pub fn remove(&mut self, kind: EventKind, listener: &Listener, capture: bool) -> bool {
        let position = self.entries.iter().position(|e| {
            !e.handler && e.kind == kind && e.capture == capture && e.listener.same(listener)
        });
        match position {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Set or clear the `on<kind>` slot.
    ///
    /// The slot is replaced in place, so it keeps the position it got when
    /// it was first set.
    pub fn set_handler(&mut self, kind: EventKind, listener: Option<Listener>) {
        let slot = self.entries.iter().position(|e| e.handler && e.kind == kind);
        match (slot, listener) {
            (Some(index), Some(listener)) => self.entries[index].listener = listener,
            (Some(index), None) => {
                self.entries.remove(index);
            }
            (None, Some(listener)) => self.entries.push(Entry {
                kind,
                listener,
                capture: false,
                handler: true,
            }),
            (None, None) => {}
        }
    }

    pub fn handler(&self, kind: EventKind) -> Option<Listener> {
        self.entries
            .iter()
            .find(|e| e.handler && e.kind == kind)
            .map(|e| e.listener.clone())
    }

    /// Listeners for `kind` in attachment order, detached from the table
    pub fn snapshot(&self, kind: EventKind) -> Vec<Listener> {
        self.entries
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.listener.clone())
            .collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Validate `(type, listener, useCapture)` as passed to `addEventListener`.
///
/// `Ok(None)` means a well-formed call for an event type workers never fire.
pub(crate) fn parse_listener_args(
    args: &[JsValue],
) -> WorkerResult<Option<(EventKind, Listener, bool)>> {
    let event_type = args
        .first()
        .and_then(|v| v.as_string().map(|s| s.to_std_string_escaped()))
        .ok_or_else(|| WorkerError::invalid("event type must be a string"))?;
    let listener = args
        .get(1)
        .and_then(Listener::script)
        .ok_or_else(|| WorkerError::invalid("listener must be a function"))?;
    let capture = match args.get(2) {
        None => false,
        Some(v) if v.is_undefined() => false,
        Some(v) => v
            .as_boolean()
            .ok_or_else(|| WorkerError::invalid("useCapture must be a boolean"))?,
    };

    Ok(EventKind::parse(&event_type).map(|kind| (kind, listener, capture)))
}

/// Run `listeners` in order, each in isolation.
///
/// Returns one message per failed listener. Script listeners share a single
/// event object so `preventDefault()` is visible to the ones that follow.
pub(crate) fn dispatch(
    listeners: &[Listener],
    event: &WorkerEvent,
    this: &JsValue,
    target: Option<&JsObject>,
    context: &mut Context,
) -> Vec<String> {
    run_listeners(listeners, event, None, this, target, context)
}

/// Like [`dispatch`], but script listeners receive `object` itself
pub(crate) fn dispatch_object(
    listeners: &[Listener],
    event: &WorkerEvent,
    object: &JsObject,
    this: &JsValue,
    context: &mut Context,
) -> Vec<String> {
    run_listeners(listeners, event, Some(object.clone()), this, None, context)
}

fn run_listeners(
    listeners: &[Listener],
    event: &WorkerEvent,
    mut script_event: Option<JsObject>,
    this: &JsValue,
    target: Option<&JsObject>,
    context: &mut Context,
) -> Vec<String> {
    let mut failures = Vec::new();

    for listener in listeners {
        match listener {
            Listener::Native(f) => {
                if let Err(message) = f(event) {
                    failures.push(message);
                }
            }
            Listener::Script(function) => {
                let object = match &script_event {
                    Some(object) => object.clone(),
                    None => match event.to_js(target, context) {
                        Ok(object) => {
                            script_event = Some(object.clone());
                            object
                        }
                        Err(err) => {
                            failures.push(err.to_string());
                            continue;
                        }
                    },
                };
                if let Err(err) = function.call(this, &[object.clone().into()], context) {
                    failures.push(ErrorReport::from_js_error(&err, "", context).message);
                }
                event.sync_from_js(&object, context);
            }
        }
    }

    failures
}

/// Prepare a caller-built object for `dispatchEvent`.
///
/// The object must carry a non-empty string `type`. A missing `target` becomes
/// `target`, and `preventDefault` / `defaultPrevented` are added when absent.
/// Returns the typed event native listeners see, or `None` for event types
/// workers never fire.
pub(crate) fn adopt_event(
    object: &JsValue,
    target: &JsValue,
    source: &ContextId,
    context: &mut Context,
) -> JsResult<Option<WorkerEvent>> {
    let object = object
        .as_object()
        .map(|o| o.clone())
        .ok_or_else(|| JsNativeError::typ().with_message("dispatchEvent requires an event object"))?;
    let event_type = object
        .get(js_string!("type"), context)?
        .as_string()
        .map(|s| s.to_std_string_escaped())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            JsNativeError::typ().with_message("event must have a non-empty string `type`")
        })?;

    if object.get(js_string!("target"), context)?.is_null_or_undefined() {
        object.set(js_string!("target"), target.clone(), false, context)?;
    }
    if !object.get(js_string!("defaultPrevented"), context)?.is_boolean() {
        object.set(js_string!("defaultPrevented"), false, false, context)?;
    }
    if Listener::script(&object.get(js_string!("preventDefault"), context)?).is_none() {
        let function = NativeFunction::from_fn_ptr(prevent_default).to_js_function(context.realm());
        object.set(js_string!("preventDefault"), function, false, context)?;
    }

    let event = match EventKind::parse(&event_type) {
        Some(EventKind::Message) => {
            let data = object.get(js_string!("data"), context)?;
            let payload = if data.is_undefined() {
                "null".to_string()
            } else {
                codec::to_wire(&data, context)?
            };
            WorkerEvent::Message(MessageEvent::new(source.clone(), payload, now_millis()))
        }
        Some(EventKind::Error) => {
            let text = |value: JsValue| {
                value
                    .as_string()
                    .map(|s| s.to_std_string_escaped())
                    .unwrap_or_default()
            };
            let mut report = ErrorReport::new(
                text(object.get(js_string!("message"), context)?),
                text(object.get(js_string!("filename"), context)?),
            );
            report.lineno = object.get(js_string!("lineno"), context)?.to_u32(context)?;
            report.colno = object.get(js_string!("colno"), context)?.to_u32(context)?;
            WorkerEvent::Error(ErrorEvent::new(source.clone(), report))
        }
        None => return Ok(None),
    };
    Ok(Some(event))
}

/// `dispatchEvent`'s return value: `false` once any listener cancelled the event
pub(crate) fn not_canceled(event: &WorkerEvent, object: &JsValue, context: &mut Context) -> bool {
    let prevented_in_script = object
        .as_object()
        .and_then(|o| o.get(js_string!("defaultPrevented"), context).ok())
        .is_some_and(|v| v.to_boolean());
    let prevented_natively = event.as_error().is_some_and(|e| e.default_prevented());
    !(prevented_in_script || prevented_natively)
}

#[cfg(test)]
mod tests {
    use super::*;
    use boa_engine::Source;
    use serde_json::json;
    use std::cell::RefCell;

    fn recorder(log: &Rc<RefCell<Vec<&'static str>>>, name: &'static str) -> Listener {
        let log = log.clone();
        Listener::native(move |_| {
            log.borrow_mut().push(name);
            Ok(())
        })
    }

    fn message() -> WorkerEvent {
        WorkerEvent::Message(MessageEvent::new(ContextId::from("worker-0-0"), r#"{"n":1}"#.to_string(), 5))
    }

    #[test]
    fn test_event_kind_parse() {
        assert_eq!(EventKind::parse("message"), Some(EventKind::Message));
        assert_eq!(EventKind::parse("error"), Some(EventKind::Error));
        assert_eq!(EventKind::parse("messageerror"), None);
        assert_eq!(EventKind::Error.as_str(), "error");
    }

    #[test]
    fn test_message_data() {
        let event = MessageEvent::new(ContextId::from("worker-0-0"), r#"{"b":1,"a":[2]}"#.to_string(), 0);
        let data = event.data().unwrap();
        assert_eq!(data, json!({"b": 1, "a": [2]}));
        let keys: Vec<&String> = data.as_object().unwrap().keys().collect();
        assert_eq!(keys, ["b", "a"]);

        let broken = MessageEvent::new(ContextId::from("worker-0-0"), "{not json".to_string(), 0);
        assert!(matches!(broken.data(), Err(WorkerError::InvalidArgument(_))));
    }

    #[test]
    fn test_duplicate_pairs_are_ignored() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let listener = recorder(&log, "a");
        let mut set = ListenerSet::new();

        assert!(set.add(EventKind::Message, listener.clone(), false));
        assert!(!set.add(EventKind::Message, listener.clone(), false));
        assert!(set.add(EventKind::Message, listener.clone(), true));
        assert!(set.add(EventKind::Error, listener.clone(), false));
        assert_eq!(set.len(), 3);

        assert!(set.remove(EventKind::Message, &listener, true));
        assert!(!set.remove(EventKind::Message, &listener, true));
        assert_eq!(set.snapshot(EventKind::Message).len(), 1);
    }

    #[test]
    fn test_handler_slot_keeps_its_position() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut set = ListenerSet::new();
        set.add(EventKind::Message, recorder(&log, "first"), false);
        set.set_handler(EventKind::Message, Some(recorder(&log, "slot")));
        set.add(EventKind::Message, recorder(&log, "last"), false);
        set.set_handler(EventKind::Message, Some(recorder(&log, "replaced")));

        let mut context = Context::default();
        let listeners = set.snapshot(EventKind::Message);
        let failures = dispatch(&listeners, &message(), &JsValue::undefined(), None, &mut context);
        assert!(failures.is_empty());
        assert_eq!(*log.borrow(), vec!["first", "replaced", "last"]);

        set.set_handler(EventKind::Message, None);
        assert!(set.handler(EventKind::Message).is_none());
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_failing_listener_does_not_stop_the_rest() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let listeners = vec![
            Listener::native(|_| Err("first listener failed".to_string())),
            recorder(&log, "second"),
        ];

        let mut context = Context::default();
        let failures = dispatch(&listeners, &message(), &JsValue::undefined(), None, &mut context);
        assert_eq!(failures, vec!["first listener failed".to_string()]);
        assert_eq!(*log.borrow(), vec!["second"]);
    }

    #[test]
    fn test_script_listener_sees_dom_shaped_event() {
        let mut context = Context::default();
        let function = context
            .eval(Source::from_bytes(
                "(e) => { globalThis.seen = [e.type, e.data.n, e.origin, e.lastEventId, e.ports.length, e.timeStamp]; }",
            ))
            .unwrap();
        let listener = Listener::script(&function).unwrap();

        let failures = dispatch(&[listener], &message(), &JsValue::undefined(), None, &mut context);
        assert!(failures.is_empty());

        let seen = context
            .eval(Source::from_bytes("JSON.stringify(seen)"))
            .unwrap()
            .to_string(&mut context)
            .unwrap()
            .to_std_string_escaped();
        assert_eq!(seen, r#"["message",1,"","",0,5]"#);
    }

    #[test]
    fn test_script_prevent_default_reaches_rust() {
        let mut context = Context::default();
        let function = context
            .eval(Source::from_bytes("(e) => { if (e.lineno === 3) e.preventDefault(); }"))
            .unwrap();
        let mut report = ErrorReport::new("Uncaught Error: x", "w.js");
        report.lineno = 3;
        let event = WorkerEvent::Error(ErrorEvent::new(ContextId::from("worker-0-0"), report));

        let failures = dispatch(
            &[Listener::script(&function).unwrap()],
            &event,
            &JsValue::undefined(),
            None,
            &mut context,
        );
        assert!(failures.is_empty());
        assert!(event.as_error().unwrap().default_prevented());
    }

    #[test]
    fn test_script_listener_failure_is_reported() {
        let mut context = Context::default();
        let function = context
            .eval(Source::from_bytes("() => { throw new TypeError('nope'); }"))
            .unwrap();
        let failures = dispatch(
            &[Listener::script(&function).unwrap()],
            &message(),
            &JsValue::undefined(),
            None,
            &mut context,
        );
        assert_eq!(failures, vec!["Uncaught TypeError: nope".to_string()]);
    }

    #[test]
    fn test_listener_argument_validation() {
        let mut context = Context::default();
        let function = context.eval(Source::from_bytes("() => {}")).unwrap();
        let name = |s: &str| JsValue::from(JsString::from(s));

        let parsed = parse_listener_args(&[name("message"), function.clone()]).unwrap();
        assert!(matches!(parsed, Some((EventKind::Message, _, false))));

        let parsed = parse_listener_args(&[name("error"), function.clone(), JsValue::from(true)]).unwrap();
        assert!(matches!(parsed, Some((EventKind::Error, _, true))));

        assert!(parse_listener_args(&[name("online"), function.clone()]).unwrap().is_none());

        let bad = [
            vec![JsValue::from(1), function.clone()],
            vec![name("message"), JsValue::from(1)],
            vec![name("message")],
            vec![name("message"), function.clone(), JsValue::from(1)],
        ];
        for args in bad {
            assert!(matches!(
                parse_listener_args(&args),
                Err(WorkerError::InvalidArgument(_))
            ));
        }
    }

    #[test]
    fn test_non_callable_is_not_a_listener() {
        assert!(Listener::script(&JsValue::from(3)).is_none());
        assert!(Listener::script(&JsValue::undefined()).is_none());
    }
}
