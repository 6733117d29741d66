//! Compiled filter modules.
//!
//! A [`FilterModule`] is one generation of the predicate set for a
//! (service, direction) slot: the compiled predicates in declaration
//! order, the source checksum that generation was built from, and the
//! generation-local scratch state used by stateful conditions. A reload
//! builds a whole new module; generations are never mutated in place.

use dashmap::DashSet;
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::predicate::Predicate;
use super::rules::FilterFile;
use crate::stream::Direction;

/// Errors while loading or compiling a filter module source.
#[derive(Debug, Error)]
pub enum FilterLoadError {
    /// I/O error reading the source file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Source file is not valid UTF-8.
    #[error("filter source is not valid UTF-8")]
    NotUtf8,

    /// YAML syntax or schema error.
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_saphyr::Error),

    /// A predicate regex failed to compile.
    #[error("invalid regex in predicate '{predicate}': {source}")]
    Regex {
        predicate: String,
        #[source]
        source: regex::Error,
    },

    /// Two predicates share a name.
    #[error("duplicate predicate name '{name}'")]
    DuplicatePredicate { name: String },
}

/// Generation-local scratch state for stateful conditions.
///
/// Dropped (and therefore reset) whenever the module reloads, matching the
/// source-file lifecycle an author expects from re-saving a module.
#[derive(Debug, Default)]
pub struct ModuleState {
    seen: DashSet<Vec<u8>>,
}

impl ModuleState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `key`; returns `true` the first time it is observed.
    pub fn observe(&self, key: Vec<u8>) -> bool {
        self.seen.insert(key)
    }
}

/// One atomically-swappable generation of a (service, direction) slot.
#[derive(Debug)]
pub struct FilterModule {
    service: String,
    direction: Direction,
    generation: u64,
    checksum: Option<[u8; 32]>,
    predicates: Vec<Predicate>,
    state: ModuleState,
}

impl FilterModule {
    /// An allow-all module for a slot whose source file is absent.
    pub fn empty(service: &str, direction: Direction, generation: u64) -> Self {
        Self {
            service: service.to_string(),
            direction,
            generation,
            checksum: None,
            predicates: Vec::new(),
            state: ModuleState::new(),
        }
    }

    /// Compile a module from its source bytes.
    ///
    /// Disabled predicates are skipped entirely; the remaining ones keep
    /// their declaration order.
    pub fn compile(
        service: &str,
        direction: Direction,
        generation: u64,
        source: &[u8],
    ) -> Result<Self, FilterLoadError> {
        let text = std::str::from_utf8(source).map_err(|_| FilterLoadError::NotUtf8)?;
        let file: FilterFile = serde_saphyr::from_str(text)?;

        let mut predicates = Vec::new();
        for def in file.predicates.iter().filter(|d| d.enabled) {
            if predicates.iter().any(|p: &Predicate| p.name() == def.name) {
                return Err(FilterLoadError::DuplicatePredicate {
                    name: def.name.clone(),
                });
            }
            predicates.push(Predicate::compile(def)?);
        }

        Ok(Self {
            service: service.to_string(),
            direction,
            generation,
            checksum: Some(Self::checksum_of(source)),
            predicates,
            state: ModuleState::new(),
        })
    }

    pub fn checksum_of(source: &[u8]) -> [u8; 32] {
        Sha256::digest(source).into()
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Checksum of the source this generation was compiled from; `None`
    /// for the empty module of an absent file.
    pub fn checksum(&self) -> Option<[u8; 32]> {
        self.checksum
    }

    /// Predicates in evaluation order.
    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn state(&self) -> &ModuleState {
        &self.state
    }
}
