//! Filter modules: discovery, compilation, hot reload, and decisions.
//!
//! Module sources are YAML rule files, one per (service, direction),
//! found by naming convention under the filter directory. The registry
//! compiles each into an immutable generation behind an atomic pointer;
//! the watcher swaps generations when sources change; the decision engine
//! evaluates the current generation against each message.

mod engine;
mod module;
mod predicate;
mod registry;
mod rules;
mod watcher;

pub use engine::{Decision, DecisionEngine, EngineStats};
pub use module::{FilterLoadError, FilterModule, ModuleState};
pub use predicate::{Predicate, PredicateError};
pub use registry::{module_path, FilterRegistry};
pub use rules::{Condition, FilterFile, PredicateDef};
pub use watcher::spawn as spawn_watcher;
