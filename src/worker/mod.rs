//! Dedicated worker emulation
//!
//! Each worker is a separate Boa [`Context`](boa_engine::Context) owned by the
//! host's [`HostState`]. Workers share nothing with the host except JSON
//! messages. Everything runs on the host's thread:
//!
//! ```text
//!   Worker::new ──► HostState::spawn ──► IsolatedContextFactory::create
//!                          │                      │
//!                          ▼                      ▼
//!                      Registry              Task::Boot ─► scripts ─► Task::Ready
//!                                                                        │
//!   postMessage ──► OutboundQueue (not ready) ────── drained on ready ◄──┘
//!               └─► Task::Deliver (ready)
//!
//!   self.postMessage ──► Task::Inbound ──► Registry ──► handle listeners
//! ```

pub mod base_uri;
pub mod binary;
pub mod bootstrap;
pub mod codec;
pub mod context;
pub mod error;
pub mod events;
pub mod handle;
pub mod host_api;
pub mod id;
pub mod ready;
pub mod registry;
pub mod relay;
mod scope;
pub mod state;

pub use base_uri::{BaseUriResolver, HostLocation};
pub use bootstrap::{BootstrapSpec, LocationSnapshot, ShimGlobal};
pub use context::{ContextHandle, IsolatedContext, IsolatedContextFactory};
pub use error::{ErrorReport, WorkerError, WorkerResult};
pub use events::{ErrorEvent, EventKind, Listener, ListenerResult, MessageEvent, WorkerEvent};
pub use handle::{WorkerHandle, WorkerState};
pub use id::{ContextId, IdAllocator};
pub use ready::ReadyGate;
pub use registry::Registry;
pub use relay::{Envelope, OutboundQueue};
pub use state::{Diagnostic, HostState, Task};
