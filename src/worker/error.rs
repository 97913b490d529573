//! Error taxonomy for the worker emulation layer

use boa_engine::{Context, JsError, JsNativeError, JsValue, js_string};
use serde::Serialize;
use thiserror::Error;

use super::id::ContextId;

/// Errors raised synchronously by worker operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    #[error("missing dependency: {0}")]
    MissingDependency(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("worker {0} has been terminated")]
    HandleTerminated(ContextId),

    #[error("isolated context {0} has been destroyed")]
    ContextDestroyed(ContextId),

    #[error("failed to create isolated context: {0}")]
    ContextCreation(String),
}

/// Result type for worker operations
pub type WorkerResult<T> = Result<T, WorkerError>;

impl WorkerError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        WorkerError::InvalidArgument(message.into())
    }
}

impl From<WorkerError> for JsError {
    fn from(err: WorkerError) -> Self {
        match err {
            WorkerError::InvalidArgument(msg) => JsNativeError::typ().with_message(msg).into(),
            WorkerError::HandleTerminated(id) => JsNativeError::error()
                .with_message(format!("InvalidStateError: worker {} has been terminated", id))
                .into(),
            other => JsNativeError::error().with_message(other.to_string()).into(),
        }
    }
}

/// An uncaught exception raised inside an isolated context.
///
/// Never returned as an `Err`: it crosses the boundary as an `error` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub message: String,
    pub filename: String,
    pub lineno: u32,
    pub colno: u32,
}

impl ErrorReport {
    pub fn new(message: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            filename: filename.into(),
            lineno: 0,
            colno: 0,
        }
    }

    /// Build a report from a thrown value, reading `message`, `lineNumber` and
    /// `columnNumber` off error objects when they exist.
    pub fn from_js_error(err: &JsError, filename: &str, context: &mut Context) -> Self {
        let thrown = err.to_opaque(context);
        let mut report = Self::new(describe_thrown(&thrown, context), filename);

        if let Some(obj) = thrown.as_object() {
            if let Ok(line) = obj.get(js_string!("lineNumber"), context) {
                report.lineno = line.as_number().map(|n| n as u32).unwrap_or(0);
            }
            if let Ok(col) = obj.get(js_string!("columnNumber"), context) {
                report.colno = col.as_number().map(|n| n as u32).unwrap_or(0);
            }
        }

        report
    }
}

fn describe_thrown(thrown: &JsValue, context: &mut Context) -> String {
    if let Some(obj) = thrown.as_object() {
        let name = obj
            .get(js_string!("name"), context)
            .ok()
            .and_then(|v| v.as_string().map(|s| s.to_std_string_escaped()));
        let message = obj
            .get(js_string!("message"), context)
            .ok()
            .and_then(|v| v.as_string().map(|s| s.to_std_string_escaped()));
        match (name, message) {
            (Some(name), Some(message)) if !message.is_empty() => {
                return format!("Uncaught {}: {}", name, message);
            }
            (Some(name), _) => return format!("Uncaught {}", name),
            (None, Some(message)) => return format!("Uncaught {}", message),
            (None, None) => {}
        }
    }

    thrown
        .to_string(context)
        .map(|s| format!("Uncaught {}", s.to_std_string_escaped()))
        .unwrap_or_else(|_| "Uncaught exception".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use boa_engine::Source;

    #[test]
    fn test_report_from_thrown_error() {
        let mut context = Context::default();
        let err = context
            .eval(Source::from_bytes("throw new RangeError('too far')"))
            .unwrap_err();

        let report = ErrorReport::from_js_error(&err, "file:///w.js", &mut context);
        assert_eq!(report.message, "Uncaught RangeError: too far");
        assert_eq!(report.filename, "file:///w.js");
    }

    #[test]
    fn test_report_from_thrown_primitive() {
        let mut context = Context::default();
        let err = context
            .eval(Source::from_bytes("throw 'boom'"))
            .unwrap_err();

        let report = ErrorReport::from_js_error(&err, "w.js", &mut context);
        assert_eq!(report.message, "Uncaught boom");
        assert_eq!(report.lineno, 0);
    }

    #[test]
    fn test_report_reads_position_properties() {
        let mut context = Context::default();
        let err = context
            .eval(Source::from_bytes(
                "throw { name: 'Oops', message: 'bad', lineNumber: 7, columnNumber: 3 }",
            ))
            .unwrap_err();

        let report = ErrorReport::from_js_error(&err, "w.js", &mut context);
        assert_eq!(report.message, "Uncaught Oops: bad");
        assert_eq!((report.lineno, report.colno), (7, 3));
    }

    #[test]
    fn test_js_error_mapping() {
        let err: JsError = WorkerError::invalid("listener must be a function").into();
        assert!(err.as_native().is_some());
        assert!(err.to_string().contains("listener must be a function"));
    }
}
