//! JSON text codec for values crossing the context boundary
//!
//! There is no structured clone between two Boa contexts, so every payload is
//! turned into JSON text by the sending context's `JSON.stringify` and rebuilt
//! by the receiving context's `JSON.parse`. The text itself is the wire form:
//! key order and nesting survive the trip untouched.
//!
//! Values JSON cannot represent are rejected instead of being silently dropped
//! the way `JSON.stringify` would. The check runs as a replacer inside the same
//! stringify pass, so getters and proxy traps fire exactly once.

use boa_engine::{
    Context, JsError, JsNativeError, JsObject, JsResult, JsString, JsValue, NativeFunction,
    js_string,
    object::{FunctionObjectBuilder, builtins::JsFunction},
};
use boa_gc::{Finalize, GcRefCell, Trace};
use serde::Serialize;

use super::error::{WorkerError, WorkerResult};

/// Deepest object nesting a message may have
pub const MAX_DEPTH: usize = 256;

/// Serialize a script value to its wire form
pub fn to_wire(value: &JsValue, context: &mut Context) -> WorkerResult<String> {
    if value.is_undefined() {
        return Err(WorkerError::invalid("undefined is not a serializable message"));
    }
    let (json, stringify) = json_method("stringify", context)?;

    let replacer = FunctionObjectBuilder::new(
        context.realm(),
        NativeFunction::from_copy_closure_with_captures(
            |this, args, open, _context| check_member(this, args, open),
            OpenObjects {
                path: GcRefCell::new(Vec::new()),
            },
        ),
    )
    .length(2)
    .build();

    let result = stringify
        .call(&json, &[value.clone(), replacer.into()], context)
        .map_err(|e| WorkerError::invalid(format!("message is not serializable: {}", e)))?;

    result
        .as_string()
        .map(|s| s.to_std_string_escaped())
        .ok_or_else(|| WorkerError::invalid("message has no JSON representation"))
}

/// Rebuild wire text inside a context with that context's own `JSON.parse`
pub fn from_wire(text: &str, context: &mut Context) -> WorkerResult<JsValue> {
    let (json, parse) = json_method("parse", context)?;
    parse
        .call(&json, &[JsString::from(text).into()], context)
        .map_err(|e| WorkerError::invalid(format!("cannot deserialize message: {}", e)))
}

/// Serialize a Rust value to its wire form
pub fn encode<T: Serialize + ?Sized>(payload: &T) -> WorkerResult<String> {
    serde_json::to_string(payload)
        .map_err(|e| WorkerError::invalid(format!("message is not serializable: {}", e)))
}

/// Objects on the path from the root to the member being serialized
#[derive(Trace, Finalize)]
struct OpenObjects {
    path: GcRefCell<Vec<JsObject>>,
}

/// `JSON.stringify` replacer: sees every member after its `toJSON` hook ran
fn check_member(this: &JsValue, args: &[JsValue], open: &OpenObjects) -> JsResult<JsValue> {
    let value = args.get(1).cloned().unwrap_or_default();

    if value.is_symbol() {
        return Err(reject("symbols cannot be sent to a worker"));
    }
    if value.is_bigint() {
        return Err(reject("BigInt values cannot be sent to a worker"));
    }
    let Some(obj) = value.as_object() else {
        return Ok(value);
    };
    let obj = obj.clone();
    if obj.is_callable() {
        return Err(reject("functions cannot be sent to a worker"));
    }

    // the holder is the innermost open object; everything above it is finished
    let mut path = open.path.borrow_mut();
    if let Some(holder) = this.as_object() {
        let holder = holder.clone();
        while path.last().is_some_and(|top| !JsObject::equals(top, &holder)) {
            path.pop();
        }
    }
    if path.len() >= MAX_DEPTH {
        return Err(JsNativeError::range()
            .with_message(format!("messages cannot nest deeper than {} levels", MAX_DEPTH))
            .into());
    }
    path.push(obj);

    Ok(value)
}

fn reject(message: &'static str) -> JsError {
    JsNativeError::typ().with_message(message).into()
}

fn json_method(name: &'static str, context: &mut Context) -> WorkerResult<(JsValue, JsFunction)> {
    let missing = || WorkerError::MissingDependency("JSON");

    let json = context
        .global_object()
        .get(js_string!("JSON"), context)
        .map_err(|_| missing())?;
    let method = json
        .as_object()
        .and_then(|obj| obj.get(JsString::from(name), context).ok())
        .and_then(|f| f.as_object().and_then(|o| JsFunction::from_object(o.clone())))
        .ok_or_else(missing)?;

    Ok((json, method))
}

#[cfg(test)]
mod tests {
    use super::*;
    use boa_engine::Source;
    use std::collections::HashMap;

    fn eval(context: &mut Context, code: &str) -> JsValue {
        context.eval(Source::from_bytes(code.as_bytes())).unwrap()
    }

    #[test]
    fn test_plain_values() {
        let mut context = Context::default();
        let value = eval(&mut context, "({ a: 1, list: [true, null, 'x'], nested: { b: 2.5 } })");
        let wire = to_wire(&value, &mut context).unwrap();
        assert_eq!(wire, r#"{"a":1,"list":[true,null,"x"],"nested":{"b":2.5}}"#);
    }

    #[test]
    fn test_key_order_is_kept() {
        let mut context = Context::default();
        let value = eval(&mut context, "({ b: 1, a: 2, c: 3 })");
        assert_eq!(to_wire(&value, &mut context).unwrap(), r#"{"b":1,"a":2,"c":3}"#);
    }

    #[test]
    fn test_nested_undefined_is_dropped() {
        let mut context = Context::default();
        let value = eval(&mut context, "({ keep: 1, gone: undefined })");
        assert_eq!(to_wire(&value, &mut context).unwrap(), r#"{"keep":1}"#);
    }

    #[test]
    fn test_to_json_hook_is_honoured() {
        let mut context = Context::default();
        let value = eval(
            &mut context,
            "({ when: new Date(0), custom: { secret: 1, toJSON() { return 'later'; } } })",
        );
        assert_eq!(
            to_wire(&value, &mut context).unwrap(),
            r#"{"when":"1970-01-01T00:00:00.000Z","custom":"later"}"#
        );
    }

    #[test]
    fn test_rejects_unrepresentable_values() {
        let mut context = Context::default();
        let cases = [
            "(function () {})",
            "({ callback: () => 1 })",
            "[1, [2, () => 3]]",
            "Symbol('s')",
            "({ tag: Symbol('s') })",
            "10n",
            "(() => { const o = {}; o.self = o; return o; })()",
            "undefined",
        ];
        for code in cases {
            let value = eval(&mut context, code);
            let err = to_wire(&value, &mut context).unwrap_err();
            assert!(
                matches!(err, WorkerError::InvalidArgument(_)),
                "{} should be rejected, got {:?}",
                code,
                err
            );
        }
    }

    #[test]
    fn test_shared_reference_is_not_a_cycle() {
        let mut context = Context::default();
        let value = eval(&mut context, "(() => { const s = { n: 1 }; return { a: s, b: s }; })()");
        assert_eq!(to_wire(&value, &mut context).unwrap(), r#"{"a":{"n":1},"b":{"n":1}}"#);
    }

    #[test]
    fn test_getters_run_once() {
        let mut context = Context::default();
        let value = eval(
            &mut context,
            "globalThis.reads = 0; ({ get n() { globalThis.reads += 1; return 7; } })",
        );
        assert_eq!(to_wire(&value, &mut context).unwrap(), r#"{"n":7}"#);
        assert_eq!(eval(&mut context, "reads").as_number(), Some(1.0));
    }

    #[test]
    fn test_deep_nesting() {
        let mut context = Context::default();
        let value = eval(
            &mut context,
            "(() => { let v = 0; for (let i = 0; i < 200; i++) v = [v]; return v; })()",
        );
        let wire = to_wire(&value, &mut context).unwrap();
        assert!(wire.starts_with(&"[".repeat(200)));

        let too_deep = eval(
            &mut context,
            &format!(
                "(() => {{ let v = 0; for (let i = 0; i < {}; i++) v = [v]; return v; }})()",
                MAX_DEPTH + 1
            ),
        );
        assert!(matches!(
            to_wire(&too_deep, &mut context),
            Err(WorkerError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_siblings_do_not_count_as_depth() {
        let mut context = Context::default();
        let value = eval(
            &mut context,
            &format!("Array.from({{ length: {} }}, (_, i) => ({{ i }}))", MAX_DEPTH * 2),
        );
        assert!(to_wire(&value, &mut context).is_ok());
    }

    #[test]
    fn test_from_wire_builds_objects() {
        let mut context = Context::default();
        let value = from_wire(r#"{"b":[1,2],"a":0}"#, &mut context).unwrap();
        context
            .global_object()
            .set(js_string!("v"), value, false, &mut context)
            .unwrap();
        let sum = eval(&mut context, "v.b[0] + v.b[1]");
        assert_eq!(sum.as_number(), Some(3.0));
        let keys = eval(&mut context, "Object.keys(v).join()");
        assert_eq!(keys.as_string().unwrap().to_std_string_escaped(), "b,a");
    }

    #[test]
    fn test_from_wire_rejects_malformed_text() {
        let mut context = Context::default();
        assert!(matches!(
            from_wire("{not json", &mut context),
            Err(WorkerError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_encode_rejects_non_string_keys() {
        let mut map = HashMap::new();
        map.insert((1, 2), "pair");
        assert!(matches!(encode(&map), Err(WorkerError::InvalidArgument(_))));
        assert_eq!(encode(&vec![1, 2]).unwrap(), "[1,2]");
    }
}
