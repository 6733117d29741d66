//! Compiled predicates and their evaluation.
//!
//! Predicates compile once per module load (regexes included, so a bad
//! pattern is a load error, not a runtime one) and are then evaluated
//! against a [`Stream`]. Evaluation is strict: out-of-range history
//! indexing, a missing header, or a condition applied to the wrong stream
//! kind is a runtime error, and the engine maps any runtime error to the
//! fail-open path. Every condition node checks the invocation deadline.

use regex::Regex;
use std::time::Instant;
use thiserror::Error;

use super::module::{FilterLoadError, ModuleState};
use super::rules::{Condition, PredicateDef};
use crate::stream::{HttpMessage, Message, Stream};

/// Runtime evaluation failure of a single predicate invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PredicateError {
    /// The per-invocation deadline expired.
    #[error("evaluation deadline exceeded")]
    Deadline,

    /// No message staged for evaluation.
    #[error("no message under evaluation")]
    NoCurrentMessage,

    /// Strict history indexing failed.
    #[error("history index {back} out of range (history length {len})")]
    HistoryOutOfRange { back: usize, len: usize },

    /// Header condition on a message without that header.
    #[error("missing header '{name}'")]
    MissingHeader { name: String },

    /// HTTP condition on a raw (or fallback) message.
    #[error("condition requires an http message")]
    ExpectsHttp,

    /// Request-only condition on a response.
    #[error("condition requires a request")]
    ExpectsRequest,

    /// Response-only condition on a request.
    #[error("condition requires a response")]
    ExpectsResponse,
}

/// One named, compiled predicate.
#[derive(Debug)]
pub struct Predicate {
    name: String,
    root: Compiled,
}

impl Predicate {
    /// Compile a predicate definition. Regex patterns are compiled here.
    pub fn compile(def: &PredicateDef) -> Result<Self, FilterLoadError> {
        let root = compile(&def.when, &def.name)?;
        Ok(Self {
            name: def.name.clone(),
            root,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Evaluate against the stream. `true` means block.
    pub fn check(
        &self,
        stream: &Stream,
        state: &ModuleState,
        deadline: Instant,
    ) -> Result<bool, PredicateError> {
        eval(&self.root, stream, state, deadline)
    }
}

#[derive(Debug)]
enum Compiled {
    Contains(Vec<u8>),
    Matches(Regex),
    LengthGt { value: usize, trim: bool },
    NonPrintable,
    SeenBefore { trim: bool },
    PreviousContains { back: usize, value: Vec<u8> },
    HistoryAtLeast(usize),
    HeaderContains { name: String, value: String },
    HeaderMatches { name: String, regex: Regex },
    MethodIs(String),
    TargetContains(String),
    BodyContains(Vec<u8>),
    BodyMatches(Regex),
    StatusIs(u16),
    All(Vec<Compiled>),
    Any(Vec<Compiled>),
    Not(Box<Compiled>),
}

fn compile(cond: &Condition, predicate: &str) -> Result<Compiled, FilterLoadError> {
    let regex = |pattern: &str| {
        Regex::new(pattern).map_err(|source| FilterLoadError::Regex {
            predicate: predicate.to_string(),
            source,
        })
    };

    Ok(match cond {
        Condition::Contains(s) => Compiled::Contains(s.clone().into_bytes()),
        Condition::Matches(p) => Compiled::Matches(regex(p)?),
        Condition::LengthGt { value, trim } => Compiled::LengthGt {
            value: *value,
            trim: *trim,
        },
        Condition::NonPrintable => Compiled::NonPrintable,
        Condition::SeenBefore { trim } => Compiled::SeenBefore { trim: *trim },
        Condition::PreviousContains { back, value } => Compiled::PreviousContains {
            back: *back,
            value: value.clone().into_bytes(),
        },
        Condition::HistoryAtLeast(n) => Compiled::HistoryAtLeast(*n),
        Condition::HeaderContains { name, value } => Compiled::HeaderContains {
            name: name.clone(),
            value: value.clone(),
        },
        Condition::HeaderMatches { name, pattern } => Compiled::HeaderMatches {
            name: name.clone(),
            regex: regex(pattern)?,
        },
        Condition::MethodIs(m) => Compiled::MethodIs(m.clone()),
        Condition::TargetContains(t) => Compiled::TargetContains(t.clone()),
        Condition::BodyContains(s) => Compiled::BodyContains(s.clone().into_bytes()),
        Condition::BodyMatches(p) => Compiled::BodyMatches(regex(p)?),
        Condition::StatusIs(code) => Compiled::StatusIs(*code),
        Condition::All(children) => Compiled::All(compile_all(children, predicate)?),
        Condition::Any(children) => Compiled::Any(compile_all(children, predicate)?),
        Condition::Not(child) => Compiled::Not(Box::new(compile(child, predicate)?)),
    })
}

fn compile_all(children: &[Condition], predicate: &str) -> Result<Vec<Compiled>, FilterLoadError> {
    children.iter().map(|c| compile(c, predicate)).collect()
}

fn eval(
    cond: &Compiled,
    stream: &Stream,
    state: &ModuleState,
    deadline: Instant,
) -> Result<bool, PredicateError> {
    if Instant::now() >= deadline {
        return Err(PredicateError::Deadline);
    }

    Ok(match cond {
        Compiled::Contains(needle) => contains_bytes(current(stream)?.wire(), needle),
        Compiled::Matches(regex) => {
            regex.is_match(&String::from_utf8_lossy(current(stream)?.wire()))
        }
        Compiled::LengthGt { value, trim } => {
            let payload = current(stream)?.wire();
            let payload = if *trim { payload.trim_ascii() } else { payload };
            payload.len() > *value
        }
        Compiled::NonPrintable => current(stream)?
            .wire()
            .iter()
            .any(|&b| !is_printable(b)),
        Compiled::SeenBefore { trim } => {
            let payload = current(stream)?.wire();
            let payload = if *trim { payload.trim_ascii() } else { payload };
            !state.observe(payload.to_vec())
        }
        Compiled::PreviousContains { back, value } => {
            let prev = stream
                .previous(*back)
                .ok_or(PredicateError::HistoryOutOfRange {
                    back: *back,
                    len: stream.history_len(),
                })?;
            contains_bytes(prev.wire(), value)
        }
        Compiled::HistoryAtLeast(n) => stream.history_len() >= *n,
        Compiled::HeaderContains { name, value } => header(stream, name)?.contains(value),
        Compiled::HeaderMatches { name, regex } => regex.is_match(header(stream, name)?),
        Compiled::MethodIs(m) => {
            http(stream)?.method().ok_or(PredicateError::ExpectsRequest)? == m.as_str()
        }
        Compiled::TargetContains(t) => http(stream)?
            .target()
            .ok_or(PredicateError::ExpectsRequest)?
            .contains(t.as_str()),
        Compiled::BodyContains(needle) => contains_bytes(http(stream)?.body(), needle),
        Compiled::BodyMatches(regex) => {
            regex.is_match(&String::from_utf8_lossy(http(stream)?.body()))
        }
        Compiled::StatusIs(code) => {
            http(stream)?.status().ok_or(PredicateError::ExpectsResponse)? == *code
        }
        Compiled::All(children) => {
            for child in children {
                if !eval(child, stream, state, deadline)? {
                    return Ok(false);
                }
            }
            true
        }
        Compiled::Any(children) => {
            for child in children {
                if eval(child, stream, state, deadline)? {
                    return Ok(true);
                }
            }
            false
        }
        Compiled::Not(child) => !eval(child, stream, state, deadline)?,
    })
}

fn current(stream: &Stream) -> Result<&Message, PredicateError> {
    stream.current().ok_or(PredicateError::NoCurrentMessage)
}

fn http(stream: &Stream) -> Result<&HttpMessage, PredicateError> {
    current(stream)?
        .as_http()
        .ok_or(PredicateError::ExpectsHttp)
}

fn header<'a>(stream: &'a Stream, name: &str) -> Result<&'a str, PredicateError> {
    http(stream)?
        .header(name)
        .ok_or_else(|| PredicateError::MissingHeader {
            name: name.to_string(),
        })
}

fn contains_bytes(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}

fn is_printable(b: u8) -> bool {
    matches!(b, 0x20..=0x7e | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c)
}
