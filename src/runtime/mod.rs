//! Host runtime powered by the Boa engine
//!
//! Owns the host context and the worker [`HostState`], and drives the single
//! cooperative loop shared by all of them.
//!
//! Globals provided to the host context:
//! - Console API (console.log, console.error, etc.)
//! - Timers (setTimeout, setInterval, clearTimeout, clearInterval)
//! - URL API (URL, URLSearchParams)
//! - Text encoding (TextEncoder, TextDecoder)
//! - queueMicrotask
//! - `Worker`, unless the context already has one

use boa_engine::{Context, JsError, JsValue, Source, context::ContextBuilder};
use boa_runtime::{
    extensions::{ConsoleExtension, EncodingExtension, MicrotaskExtension, TimeoutExtension, UrlExtension},
    register_extensions,
};
use std::{
    path::{Path, PathBuf},
    rc::Rc,
    time::{Duration, Instant},
};
use thiserror::Error;
use tracing::debug;
use url::Url;

pub mod capabilities;
pub mod console;
pub mod event_loop;

use crate::loader::{FsScriptLoader, ScriptLoader};
use crate::transpiler::{Transpiler, TranspilerConfig, needs_transpile};
use crate::worker::{
    Diagnostic, ErrorReport, HostLocation, HostState, WorkerError, WorkerHandle, WorkerResult,
    host_api,
};
pub use capabilities::Capabilities;
use console::ConsoleLogger;
use event_loop::ContextEventLoop;

/// Upper bound on a single idle sleep, so the loop stays responsive
const MAX_IDLE_SLEEP: Duration = Duration::from_millis(10);

/// Errors that can occur during runtime execution
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("JavaScript error: {0}")]
    JsError(String),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error("Transpilation error: {0}")]
    TranspileError(#[from] crate::transpiler::TranspileError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("event loop still busy after {0:?}")]
    Timeout(Duration),
}

/// Result type for runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Configuration for the host runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Directory standing in for the host document's location
    pub base_path: PathBuf,
    /// Explicit document base URI, the `<base href>` equivalent
    pub base_uri: Option<String>,
    pub transpiler_config: TranspilerConfig,
    /// Skip detection and use these capabilities
    pub capabilities: Option<Capabilities>,
    /// Safety limit for `run_until_idle`
    pub max_runtime: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            base_path: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            base_uri: None,
            transpiler_config: TranspilerConfig::default(),
            capabilities: None,
            max_runtime: Duration::from_secs(300),
        }
    }
}

/// A host page: one Boa context plus every worker it spawned
pub struct HostRuntime {
    context: Context,
    event_loop: Rc<ContextEventLoop>,
    state: Rc<HostState>,
    transpiler: Transpiler,
    capabilities: Capabilities,
    config: RuntimeConfig,
}

impl HostRuntime {
    /// Create a runtime with default configuration, loading scripts from disk
    pub fn new() -> RuntimeResult<Self> {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> RuntimeResult<Self> {
        Self::with_loader(config, Rc::new(FsScriptLoader::new()))
    }

    /// Create a runtime that fetches worker scripts through `loader`
    pub fn with_loader(config: RuntimeConfig, loader: Rc<dyn ScriptLoader>) -> RuntimeResult<Self> {
        let event_loop = Rc::new(ContextEventLoop::new());
        let mut context = ContextBuilder::default()
            .job_executor(event_loop.clone())
            .build()
            .map_err(|e| RuntimeError::JsError(e.to_string()))?;

        register_extensions(
            (
                ConsoleExtension(ConsoleLogger::host()),
                TimeoutExtension,
                MicrotaskExtension,
                UrlExtension,
                EncodingExtension,
            ),
            None,
            &mut context,
        )
        .map_err(|e| RuntimeError::JsError(e.to_string()))?;

        let capabilities = match config.capabilities {
            Some(capabilities) => capabilities,
            None => Capabilities::detect(&mut context),
        };
        capabilities.require_json()?;

        let base_path = std::path::absolute(&config.base_path)?;
        let mut location = HostLocation::from_directory(&base_path)?;
        if let Some(base_uri) = &config.base_uri {
            let base_href = Url::parse(base_uri).map_err(|e| {
                WorkerError::invalid(format!("base URI '{}' is not a valid URL: {}", base_uri, e))
            })?;
            location.base_href = Some(base_href);
        }

        let transpiler = Transpiler::with_config(config.transpiler_config.clone());
        let state = HostState::new(location, loader, transpiler.clone());

        if capabilities.native_worker {
            debug!("host already provides Worker; emulation not installed");
        } else {
            host_api::install(&mut context, Rc::downgrade(&state))
                .map_err(|e| RuntimeError::JsError(e.to_string()))?;
        }

        Ok(Self {
            context,
            event_loop,
            state,
            transpiler,
            capabilities,
            config,
        })
    }

    /// Evaluate code in the host context and run the microtasks it queued
    pub fn eval(&mut self, code: &str, filename: &str) -> RuntimeResult<JsValue> {
        let js_code = if needs_transpile(filename) {
            self.transpiler.transpile(code, filename)?
        } else {
            code.to_string()
        };

        let result = self.context.eval(Source::from_bytes(js_code.as_bytes()));
        let value = result.map_err(|e| js_error(&mut self.context, e, filename))?;
        self.event_loop
            .run_microtasks(&mut self.context)
            .map_err(|e| js_error(&mut self.context, e, filename))?;
        Ok(value)
    }

    /// Evaluate code, then keep the loop running until every worker is idle
    pub fn run(&mut self, code: &str, filename: &str) -> RuntimeResult<JsValue> {
        let value = self.eval(code, filename)?;
        self.run_until_idle()?;
        Ok(value)
    }

    /// Run a host script from disk.
    ///
    /// Workers it creates resolve relative to its directory, unless the
    /// runtime was configured with an explicit base URI.
    pub fn run_file(&mut self, path: &Path) -> RuntimeResult<JsValue> {
        let source = std::fs::read_to_string(path)?;
        let full_path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let script_url = match self.config.base_uri {
            Some(_) => None,
            None => Url::from_file_path(&full_path).ok(),
        };

        self.state.set_current_script(script_url);
        let result = self.run(&source, &full_path.to_string_lossy());
        self.state.set_current_script(None);
        result
    }

    /// Construct a worker from Rust
    pub fn spawn_worker(&self, script_ref: &str) -> WorkerResult<WorkerHandle> {
        self.state.spawn(script_ref, None)
    }

    /// One loop turn: host jobs, then every queued task, then worker jobs.
    ///
    /// Returns whether any work is left.
    pub fn tick(&mut self) -> RuntimeResult<bool> {
        self.event_loop
            .run_ready(&mut self.context)
            .map_err(|e| js_error(&mut self.context, e, ""))?;
        self.state.run_tasks(&mut self.context);
        self.state.pump_contexts();
        Ok(self.has_pending_work())
    }

    /// Turn the loop until nothing is queued or scheduled anywhere
    pub fn run_until_idle(&mut self) -> RuntimeResult<()> {
        let started = Instant::now();
        while self.tick()? {
            if started.elapsed() > self.config.max_runtime {
                return Err(RuntimeError::Timeout(self.config.max_runtime));
            }
            if self.has_ready_work() {
                continue;
            }
            if let Some(deadline) = self.next_deadline() {
                let wait = deadline.saturating_duration_since(Instant::now());
                if !wait.is_zero() {
                    std::thread::sleep(wait.min(MAX_IDLE_SLEEP));
                }
            }
        }
        Ok(())
    }

    pub fn has_pending_work(&self) -> bool {
        self.event_loop.has_pending_work() || self.state.has_pending_work()
    }

    fn has_ready_work(&self) -> bool {
        self.event_loop.has_ready_work() || self.state.has_ready_work()
    }

    fn next_deadline(&self) -> Option<Instant> {
        [self.event_loop.next_deadline(), self.state.next_deadline()]
            .into_iter()
            .flatten()
            .min()
    }

    pub fn state(&self) -> &Rc<HostState> {
        &self.state
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Number of live workers
    pub fn registry_len(&self) -> usize {
        self.state.worker_count()
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.state.diagnostics()
    }

    pub fn take_diagnostics(&self) -> Vec<Diagnostic> {
        self.state.take_diagnostics()
    }

    /// Get mutable reference to the underlying context
    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    /// Convert a JsValue to a displayable string
    pub fn value_to_string(&mut self, value: &JsValue) -> String {
        value
            .to_string(&mut self.context)
            .map(|s| s.to_std_string_escaped())
            .unwrap_or_else(|_| "[error converting value]".to_string())
    }
}

impl Drop for HostRuntime {
    fn drop(&mut self) {
        self.state.shutdown();
    }
}

fn js_error(context: &mut Context, err: JsError, filename: &str) -> RuntimeError {
    RuntimeError::JsError(ErrorReport::from_js_error(&err, filename, context).message)
}
