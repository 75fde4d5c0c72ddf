//! Structured build events
//!
//! The core never renders output. Each state transition pushes an [`Event`]
//! onto a shared [`EventBuffer`]; the CLI layer drains the buffer and decides
//! how to print. Events carry enough structure to render a precise message
//! without reaching back into core state.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::types::PackageName;
use crate::version::Version;

/// How a resolution was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveStrategy {
    /// Full constraint collection and selection.
    Solver,
    /// Entries trusted verbatim from the lock file.
    LockFile,
}

impl std::fmt::Display for ResolveStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResolveStrategy::Solver => "solver",
            ResolveStrategy::LockFile => "lockfile",
        };
        write!(f, "{s}")
    }
}

/// One state transition in the resolve/build pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Resolution started with the given strategy.
    Resolve { strategy: ResolveStrategy },
    /// A package is reachable from itself through declared dependencies.
    CircularDependency { package: PackageName },
    /// A requested name was not found on any registry search path.
    UnknownPackage {
        requester: PackageName,
        name: PackageName,
    },
    /// The intersection of collected ranges was empty for `package`.
    ResolveConflict {
        package: PackageName,
        low_requester: PackageName,
        low_constraint: String,
        high_requester: PackageName,
        high_constraint: String,
    },
    /// Fetching sources for the resolved set began.
    Fetch,
    /// A package's repository was synced.
    Sync { package: PackageName },
    /// A package was checked out at a version/commit.
    Checkout {
        package: PackageName,
        version: Version,
        commit: String,
    },
    /// A build-phase command finished successfully.
    CommandPassed { tag: String },
    /// A build-phase command failed.
    CommandFailed { tag: String, error: String },
    /// A whole phase completed with no failures.
    PhasePassed { phase: &'static str },
    /// Dirty commands remained but none could ever become ready: a cycle
    /// through file dependencies. Distinct from completion.
    GraphDeadlock {
        phase: &'static str,
        stuck: Vec<String>,
    },
    /// All requested targets built.
    BuildPassed,
    /// A test binary ran and exited zero.
    TestPassed { name: String },
    /// A test binary ran and exited nonzero.
    TestFailed { name: String, error: String },
    /// Every requested test passed.
    TestsPassed { count: usize },
    /// Build state was removed.
    Clean { path: std::path::PathBuf },
    /// A flag file was generated.
    Generate { path: std::path::PathBuf },
}

/// Mutex-guarded event queue shared between the core (producers, including
/// executor worker threads) and the CLI (consumer).
#[derive(Debug, Default)]
pub struct EventBuffer {
    queue: Mutex<VecDeque<Event>>,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: Event) {
        self.queue
            .lock()
            .expect("event buffer mutex poisoned")
            .push_back(event);
    }

    /// Take every queued event, oldest first.
    pub fn drain(&self) -> Vec<Event> {
        self.queue
            .lock()
            .expect("event buffer mutex poisoned")
            .drain(..)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_drain_ordering() {
        let buffer = EventBuffer::new();
        buffer.push(Event::Resolve {
            strategy: ResolveStrategy::Solver,
        });
        buffer.push(Event::BuildPassed);

        let events = buffer.drain();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Event::Resolve { .. }));
        assert!(matches!(events[1], Event::BuildPassed));
        assert!(buffer.drain().is_empty());
    }
}
