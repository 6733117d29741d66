//! The filter module registry.
//!
//! One slot per (service, direction), each holding the current compiled
//! generation behind an atomic pointer. Readers take a full snapshot of
//! the generation they evaluate against, so an in-progress reload can
//! never hand a reader half of one generation and half of another. Slots
//! are written only by [`poll`](FilterRegistry::poll); on any load
//! failure the previous good generation stays active.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use super::module::FilterModule;
use crate::stream::Direction;

/// Registry of filter modules for every configured service.
pub struct FilterRegistry {
    slots: DashMap<String, ServiceSlots>,
    reloads: AtomicU64,
}

struct ServiceSlots {
    inbound: Slot,
    outbound: Slot,
}

impl ServiceSlots {
    fn get(&self, direction: Direction) -> &Slot {
        match direction {
            Direction::In => &self.inbound,
            Direction::Out => &self.outbound,
        }
    }
}

struct Slot {
    path: PathBuf,
    current: ArcSwap<FilterModule>,
    missing_warned: AtomicBool,
    // Checksum of a source that already failed to compile, so a broken
    // file is reported once instead of on every poll.
    last_failed: Mutex<Option<[u8; 32]>>,
}

impl Slot {
    fn new(path: PathBuf, service: &str, direction: Direction) -> Self {
        Self {
            path,
            current: ArcSwap::new(Arc::new(FilterModule::empty(service, direction, 0))),
            missing_warned: AtomicBool::new(false),
            last_failed: Mutex::new(None),
        }
    }
}

/// Source path for a (service, direction) module under `filter_dir`.
pub fn module_path(filter_dir: &Path, service: &str, direction: Direction) -> PathBuf {
    filter_dir.join(format!("{service}_{}.yaml", direction.suffix()))
}

impl FilterRegistry {
    /// Discover and load the modules for every service.
    ///
    /// A missing or broken source file is reported and yields an empty
    /// (allow-all) module; startup never fails on filter content.
    pub fn discover<I, S>(filter_dir: &Path, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let registry = Self {
            slots: DashMap::new(),
            reloads: AtomicU64::new(0),
        };

        for service in services {
            let service = service.as_ref();
            let slots = ServiceSlots {
                inbound: Slot::new(
                    module_path(filter_dir, service, Direction::In),
                    service,
                    Direction::In,
                ),
                outbound: Slot::new(
                    module_path(filter_dir, service, Direction::Out),
                    service,
                    Direction::Out,
                ),
            };

            for direction in [Direction::In, Direction::Out] {
                let slot = slots.get(direction);
                if slot.path.exists() {
                    registry.refresh(service, direction, slot);
                } else {
                    info!(
                        service,
                        %direction,
                        path = %slot.path.display(),
                        "no filter source; starting with empty module"
                    );
                }
            }

            registry.slots.insert(service.to_string(), slots);
        }

        registry
    }

    /// Snapshot of the current generation for a slot.
    ///
    /// The returned module is immutable and survives any number of
    /// subsequent reloads, so one decision is always computed against
    /// exactly one generation.
    pub fn module(&self, service: &str, direction: Direction) -> Option<Arc<FilterModule>> {
        self.slots
            .get(service)
            .map(|slots| slots.get(direction).current.load_full())
    }

    /// Number of successful module loads, initial discovery included.
    pub fn reload_count(&self) -> u64 {
        self.reloads.load(Ordering::Relaxed)
    }

    /// Re-check every slot's source and swap in new generations where the
    /// content changed. Called by the watcher task.
    pub fn poll(&self) {
        for entry in self.slots.iter() {
            let service = entry.key();
            for direction in [Direction::In, Direction::Out] {
                self.refresh(service, direction, entry.value().get(direction));
            }
        }
    }

    fn refresh(&self, service: &str, direction: Direction, slot: &Slot) {
        let bytes = match std::fs::read(&slot.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let had_source = slot.current.load().checksum().is_some();
                if had_source && !slot.missing_warned.swap(true, Ordering::Relaxed) {
                    warn!(
                        service,
                        %direction,
                        path = %slot.path.display(),
                        "filter source removed; keeping previous generation"
                    );
                }
                return;
            }
            Err(error) => {
                error!(
                    service,
                    %direction,
                    path = %slot.path.display(),
                    %error,
                    "failed to read filter source"
                );
                return;
            }
        };
        slot.missing_warned.store(false, Ordering::Relaxed);

        let checksum = FilterModule::checksum_of(&bytes);
        let current = slot.current.load();
        if current.checksum() == Some(checksum) {
            return;
        }
        if *slot.last_failed.lock() == Some(checksum) {
            return;
        }

        let generation = current.generation() + 1;
        match FilterModule::compile(service, direction, generation, &bytes) {
            Ok(module) => {
                let predicates = module.predicates().len();
                slot.current.store(Arc::new(module));
                *slot.last_failed.lock() = None;
                self.reloads.fetch_add(1, Ordering::Relaxed);
                info!(
                    service,
                    %direction,
                    generation,
                    predicates,
                    "filter module loaded"
                );
            }
            Err(error) => {
                *slot.last_failed.lock() = Some(checksum);
                error!(
                    service,
                    %direction,
                    path = %slot.path.display(),
                    %error,
                    "filter module load failed; keeping previous generation"
                );
            }
        }
    }
}
