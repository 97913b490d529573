//! One-time feature detection for the host context

use boa_engine::{Context, JsString, JsValue, js_string};

use crate::worker::{WorkerError, WorkerResult};

/// What the host context already provides
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// A real `Worker` constructor exists; the emulation stays out of the way
    pub native_worker: bool,
    /// `JSON.stringify` / `JSON.parse` are available
    pub json: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            native_worker: false,
            json: true,
        }
    }
}

impl Capabilities {
    pub fn detect(context: &mut Context) -> Self {
        let global = context.global_object();
        let native_worker = global
            .get(js_string!("Worker"), context)
            .map(|worker| is_callable(&worker))
            .unwrap_or(false);

        let json = match global.get(js_string!("JSON"), context) {
            Ok(json) => match json.as_object() {
                Some(json) => ["stringify", "parse"].iter().all(|name| {
                    json.get(JsString::from(*name), context)
                        .map(|f| is_callable(&f))
                        .unwrap_or(false)
                }),
                None => false,
            },
            Err(_) => false,
        };

        Self {
            native_worker,
            json,
        }
    }

    pub fn require_json(&self) -> WorkerResult<()> {
        if self.json {
            Ok(())
        } else {
            Err(WorkerError::MissingDependency("JSON"))
        }
    }
}

fn is_callable(value: &JsValue) -> bool {
    value.as_object().is_some_and(|obj| obj.is_callable())
}
