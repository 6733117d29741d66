//! The decision engine.
//!
//! For each reconstructed message, evaluates the predicates of the current
//! module generation for (service, direction) in declaration order and
//! produces a single [`Decision`].
//!
//! The error contract is fail-open for the whole chain: the first
//! predicate that errors aborts the remaining predicates and the message
//! is forwarded. A filter that errors on every invocation therefore
//! disables blocking for its whole module until it is fixed: traffic is
//! never dropped because a filter is broken, it is only let through.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use super::predicate::PredicateError;
use super::registry::FilterRegistry;
use crate::stream::{Direction, Stream};

/// Verdict for one message.
///
/// `Aborted` is deliberately distinct from `Allow`: both forward the
/// message, but logs and tests can tell a deliberate pass from a failed
/// evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// No predicate matched; forward.
    Allow,
    /// A predicate matched; drop the message.
    Block {
        /// First predicate (in declaration order) that returned true.
        predicate: String,
    },
    /// A predicate errored; the chain was abandoned and the message is
    /// forwarded.
    Aborted { error: PredicateError },
}

impl Decision {
    /// Whether the message is forwarded to the peer.
    pub fn forwards(&self) -> bool {
        !matches!(self, Self::Block { .. })
    }
}

/// Snapshot of the engine's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    pub evaluations: u64,
    pub blocks: u64,
    pub aborts: u64,
}

/// Evaluates messages against the registry. Shared by all connections.
pub struct DecisionEngine {
    registry: Arc<FilterRegistry>,
    predicate_timeout: Duration,
    evaluations: AtomicU64,
    blocks: AtomicU64,
    aborts: AtomicU64,
}

impl DecisionEngine {
    pub fn new(registry: Arc<FilterRegistry>, predicate_timeout: Duration) -> Self {
        Self {
            registry,
            predicate_timeout,
            evaluations: AtomicU64::new(0),
            blocks: AtomicU64::new(0),
            aborts: AtomicU64::new(0),
        }
    }

    /// Decide the fate of the stream's current message.
    ///
    /// Takes one snapshot of the module generation up front; a reload
    /// landing mid-evaluation has no effect on this decision.
    pub fn decide(&self, service: &str, direction: Direction, stream: &Stream) -> Decision {
        self.evaluations.fetch_add(1, Ordering::Relaxed);

        let Some(module) = self.registry.module(service, direction) else {
            debug!(service, %direction, "no module registered, allowing");
            return Decision::Allow;
        };

        for predicate in module.predicates() {
            let deadline = Instant::now() + self.predicate_timeout;
            match predicate.check(stream, module.state(), deadline) {
                Ok(false) => {}
                Ok(true) => {
                    self.blocks.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        service,
                        %direction,
                        predicate = predicate.name(),
                        generation = module.generation(),
                        "message blocked"
                    );
                    return Decision::Block {
                        predicate: predicate.name().to_string(),
                    };
                }
                Err(err) => {
                    self.aborts.fetch_add(1, Ordering::Relaxed);
                    error!(
                        service,
                        %direction,
                        predicate = predicate.name(),
                        generation = module.generation(),
                        error = %err,
                        "predicate failed; aborting chain and allowing message"
                    );
                    return Decision::Aborted { error: err };
                }
            }
        }

        Decision::Allow
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            evaluations: self.evaluations.load(Ordering::Relaxed),
            blocks: self.blocks.load(Ordering::Relaxed),
            aborts: self.aborts.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::registry::module_path;
    use crate::stream::{Message, StreamKind};
    use bytes::Bytes;
    use std::path::Path;

    fn engine_with(dir: &Path, source: &str) -> DecisionEngine {
        std::fs::write(module_path(dir, "svc", Direction::In), source).unwrap();
        let registry = Arc::new(FilterRegistry::discover(dir, ["svc"]));
        DecisionEngine::new(registry, Duration::from_millis(50))
    }

    fn staged(payload: &[u8]) -> Stream {
        let mut stream = Stream::new(StreamKind::Raw, Direction::In);
        stream.begin(Message::raw(Bytes::copy_from_slice(payload)));
        stream
    }

    #[test]
    fn first_matching_predicate_wins_in_declaration_order() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(
            dir.path(),
            r#"
predicates:
  - name: never
    when:
      contains: "zzz"
  - name: early
    when:
      contains: "attack"
  - name: late
    when:
      contains: "attack"
"#,
        );

        let stream = staged(b"attack payload");
        assert_eq!(
            engine.decide("svc", Direction::In, &stream),
            Decision::Block {
                predicate: "early".to_string()
            }
        );
        assert_eq!(engine.stats().blocks, 1);
    }

    #[test]
    fn no_match_allows() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(
            dir.path(),
            r#"
predicates:
  - name: only
    when:
      contains: "attack"
"#,
        );

        let stream = staged(b"benign");
        assert_eq!(engine.decide("svc", Direction::In, &stream), Decision::Allow);
    }

    #[test]
    fn erroring_predicate_aborts_chain_and_allows() {
        let dir = tempfile::tempdir().unwrap();
        // Second predicate errors on a raw stream; the third would match
        // but must never run.
        let engine = engine_with(
            dir.path(),
            r#"
predicates:
  - name: quiet
    when:
      contains: "zzz"
  - name: broken
    when:
      header_contains: { name: user-agent, value: curl }
  - name: would_block
    when:
      contains: "attack"
"#,
        );

        let stream = staged(b"attack payload");
        let decision = engine.decide("svc", Direction::In, &stream);
        assert_eq!(
            decision,
            Decision::Aborted {
                error: PredicateError::ExpectsHttp
            }
        );
        assert!(decision.forwards());
        assert_eq!(engine.stats().blocks, 0);
        assert_eq!(engine.stats().aborts, 1);
    }

    #[test]
    fn broken_module_allows_everything_with_an_error_each_time() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(
            dir.path(),
            r#"
predicates:
  - name: always_broken
    when:
      previous_contains: { back: 99, value: "x" }
"#,
        );

        for payload in [b"one".as_slice(), b"two", b"three"] {
            let stream = staged(payload);
            let decision = engine.decide("svc", Direction::In, &stream);
            assert!(matches!(decision, Decision::Aborted { .. }));
            assert!(decision.forwards());
        }
        assert_eq!(engine.stats().aborts, 3);
        assert_eq!(engine.stats().evaluations, 3);
    }

    #[test]
    fn unknown_service_allows() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(FilterRegistry::discover(dir.path(), Vec::<&str>::new()));
        let engine = DecisionEngine::new(registry, Duration::from_millis(50));
        let stream = staged(b"anything");
        assert_eq!(
            engine.decide("ghost", Direction::Out, &stream),
            Decision::Allow
        );
    }

    #[test]
    fn no_decision_straddles_a_reload() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(
            dir.path(),
            r#"
predicates:
  - name: foo
    when:
      contains: "foo"
"#,
        );

        // Hold the pre-reload snapshot the way decide() does internally.
        let before = engine.registry.module("svc", Direction::In).unwrap();

        std::fs::write(
            module_path(dir.path(), "svc", Direction::In),
            r#"
predicates:
  - name: bar
    when:
      contains: "bar"
"#,
        )
        .unwrap();
        engine.registry.poll();

        // The old snapshot still evaluates with the old predicate set.
        assert_eq!(before.predicates()[0].name(), "foo");
        assert_eq!(before.generation(), 1);

        // New decisions see only the new generation.
        let stream = staged(b"bar");
        assert_eq!(
            engine.decide("svc", Direction::In, &stream),
            Decision::Block {
                predicate: "bar".to_string()
            }
        );
    }
}
