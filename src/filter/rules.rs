//! Filter rule file schema.
//!
//! One YAML file per (service, direction) defines the predicates for that
//! slot, in declaration order:
//!
//! ```yaml
//! predicates:
//!   - name: curl
//!     when:
//!       header_contains: { name: user-agent, value: curl }
//!
//!   - name: password
//!     when:
//!       all:
//!         - previous_contains: { back: 0, value: "Insert password:" }
//!         - length_gt: { value: 10, trim: true }
//! ```
//!
//! A predicate returning `true` blocks the message under evaluation.

use serde::Deserialize;

/// A whole filter module source file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterFile {
    /// Predicates in declaration order (= evaluation order).
    #[serde(default)]
    pub predicates: Vec<PredicateDef>,
}

/// One named predicate.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PredicateDef {
    /// Predicate name, reported with every block decision.
    pub name: String,

    /// Disabled predicates stay in the file but are never evaluated.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Root condition; `true` blocks.
    pub when: Condition,
}

fn default_true() -> bool {
    true
}

/// Condition tree evaluated against a stream.
///
/// Conditions on the current payload work for both stream kinds (for HTTP
/// messages they see the exact wire bytes). Header/method/target/body/
/// status conditions require an HTTP message and error on a raw stream;
/// errors take the engine's fail-open path.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Condition {
    /// Current payload contains the literal bytes.
    Contains(String),

    /// Current payload matches the regex (payload is lossily decoded).
    Matches(String),

    /// Current payload longer than `value` bytes, optionally after
    /// trimming ASCII whitespace.
    LengthGt {
        value: usize,
        #[serde(default)]
        trim: bool,
    },

    /// Current payload contains a byte outside the printable set
    /// (space..tilde plus tab/newline/carriage-return/vertical-tab/
    /// form-feed).
    NonPrintable,

    /// Current payload was already observed by this module generation.
    /// State resets on reload.
    SeenBefore {
        #[serde(default)]
        trim: bool,
    },

    /// A committed message, counting backwards (`back: 0` = immediately
    /// preceding), contains the literal bytes. Out-of-range indexing is a
    /// runtime error.
    PreviousContains { back: usize, value: String },

    /// At least `n` messages committed to history.
    HistoryAtLeast(usize),

    /// Header value contains the literal text. A missing header is a
    /// runtime error.
    HeaderContains { name: String, value: String },

    /// Header value matches the regex. A missing header is a runtime
    /// error.
    HeaderMatches { name: String, pattern: String },

    /// Request method equals the given method exactly.
    MethodIs(String),

    /// Request target (path + query) contains the literal text.
    TargetContains(String),

    /// HTTP body contains the literal bytes.
    BodyContains(String),

    /// HTTP body matches the regex.
    BodyMatches(String),

    /// Response status equals the given code.
    StatusIs(u16),

    /// Every child holds (empty list holds vacuously).
    All(Vec<Condition>),

    /// At least one child holds.
    Any(Vec<Condition>),

    /// Child does not hold.
    Not(Box<Condition>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_doc_example() {
        let yaml = r#"
predicates:
  - name: curl
    when:
      header_contains: { name: user-agent, value: curl }

  - name: password
    when:
      all:
        - previous_contains: { back: 0, value: "Insert password:" }
        - length_gt: { value: 10, trim: true }
"#;
        let file: FilterFile = serde_saphyr::from_str(yaml).unwrap();
        assert_eq!(file.predicates.len(), 2);
        assert_eq!(file.predicates[0].name, "curl");
        assert!(file.predicates[0].enabled);
        assert!(matches!(
            file.predicates[0].when,
            Condition::HeaderContains { .. }
        ));
        match &file.predicates[1].when {
            Condition::All(children) => assert_eq!(children.len(), 2),
            other => panic!("expected all, got {other:?}"),
        }
    }

    #[test]
    fn unit_and_newtype_variants() {
        let yaml = r#"
predicates:
  - name: printable
    when: non_printable
  - name: leak
    when:
      body_matches: "flag\\{[0-9a-f]+\\}"
  - name: warmup
    when:
      history_at_least: 2
"#;
        let file: FilterFile = serde_saphyr::from_str(yaml).unwrap();
        assert!(matches!(file.predicates[0].when, Condition::NonPrintable));
        assert!(matches!(file.predicates[1].when, Condition::BodyMatches(_)));
        assert!(matches!(
            file.predicates[2].when,
            Condition::HistoryAtLeast(2)
        ));
    }

    #[test]
    fn disabled_predicate_parses() {
        let yaml = r#"
predicates:
  - name: off_for_now
    enabled: false
    when:
      contains: "leet"
"#;
        let file: FilterFile = serde_saphyr::from_str(yaml).unwrap();
        assert!(!file.predicates[0].enabled);
    }

    #[test]
    fn empty_file_means_no_predicates() {
        let file: FilterFile = serde_saphyr::from_str("predicates: []\n").unwrap();
        assert!(file.predicates.is_empty());
    }

    #[test]
    fn unknown_condition_is_rejected() {
        let yaml = r#"
predicates:
  - name: x
    when:
      frobnicate: 1
"#;
        assert!(serde_saphyr::from_str::<FilterFile>(yaml).is_err());
    }

    #[test]
    fn nested_combinators() {
        let yaml = r#"
predicates:
  - name: nested
    when:
      any:
        - not:
            contains: "ok"
        - all:
            - contains: "a"
            - contains: "b"
"#;
        let file: FilterFile = serde_saphyr::from_str(yaml).unwrap();
        match &file.predicates[0].when {
            Condition::Any(children) => {
                assert!(matches!(children[0], Condition::Not(_)));
                assert!(matches!(children[1], Condition::All(_)));
            }
            other => panic!("expected any, got {other:?}"),
        }
    }
}
