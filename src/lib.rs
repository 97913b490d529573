//! Frameworker - dedicated Worker emulation for the Boa JS engine
//!
//! Frameworker gives a Boa host context a browser-style `Worker` constructor:
//! - Each worker runs in its own isolated Boa context
//! - Messages cross the boundary as JSON only
//! - Everything is driven by one cooperative, single-threaded event loop
//! - Worker scripts may be TypeScript, transpiled with OXC on load

pub mod loader;
pub mod runtime;
pub mod transpiler;
pub mod worker;

// Re-export commonly used types
pub use loader::{FsScriptLoader, LoadError, MemoryScriptLoader, ScriptLoader};
pub use runtime::{Capabilities, HostRuntime, RuntimeConfig, RuntimeError, RuntimeResult};
pub use transpiler::{TranspileError, Transpiler, TranspilerConfig};
pub use worker::{Diagnostic, ErrorReport, WorkerError, WorkerEvent, WorkerHandle, WorkerResult, WorkerState};
