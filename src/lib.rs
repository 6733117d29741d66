//! StreamGate - transparent intercepting proxy for patching vulnerable
//! network services at runtime.
//!
//! Every connection to a protected service is routed through the proxy.
//! Each direction of a connection is reconstructed into discrete messages
//! (opaque reads for raw TCP, parsed requests/responses for HTTP) and every
//! message is evaluated against the operator-authored filter rules for that
//! (service, direction) before being forwarded to the peer.
//!
//! # Filter modules
//!
//! Rules live in YAML files named `<service>_in.yaml` / `<service>_out.yaml`
//! under the filter directory and hot-reload on save: the registry compiles
//! each file into an immutable generation and swaps an atomic pointer, so
//! in-flight decisions keep the generation they started with and readers
//! never block on a reload. A file that fails to compile leaves the
//! previous generation active.
//!
//! # Fail-open
//!
//! A predicate that errors (or exceeds its deadline) aborts the remaining
//! predicate chain for that message and the message is forwarded. A broken
//! filter degrades security, never availability: traffic is never dropped
//! because of a filter bug. The `Aborted` verdict stays distinct from
//! `Allow` in logs and counters so a silently disabled module is visible.

pub mod config;
pub mod error;
pub mod filter;
pub mod proxy;
pub mod stream;

pub use config::{BlockAction, Config, ProtocolKind, ServiceConfig, Tuning};
pub use error::ProxyError;
pub use filter::{Decision, DecisionEngine, FilterRegistry};
pub use proxy::{serve, ConnectionTracker};
pub use stream::{Direction, Message, Stream, StreamKind};
