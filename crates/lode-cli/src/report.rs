//! Event rendering
//!
//! The core raises structured events; this module turns them into log
//! lines. One place owns the phrasing so core modules never format output.

use lode_core::builder::BuildOutcome;
use lode_core::events::{Event, EventBuffer};

/// Drain and print everything queued on the buffer.
pub fn render(events: &EventBuffer) {
    for event in events.drain() {
        render_event(&event);
    }
}

fn render_event(event: &Event) {
    match event {
        Event::Resolve { strategy } => tracing::info!("resolving dependencies ({strategy})"),
        Event::CircularDependency { package } => {
            tracing::error!("circular dependency involving {package}");
        }
        Event::UnknownPackage { requester, name } => {
            tracing::error!("{requester} requires unknown package {name}");
        }
        Event::ResolveConflict {
            package,
            low_requester,
            low_constraint,
            high_requester,
            high_constraint,
        } => {
            tracing::error!(
                "{package} cannot be resolved: {low_requester} requires {low_constraint}, {high_requester} requires {high_constraint}"
            );
        }
        Event::Fetch => tracing::info!("fetching dependency sources"),
        Event::Sync { package } => tracing::info!("synced {package}"),
        Event::Checkout {
            package,
            version,
            commit,
        } => tracing::info!("checked out {package} {version} @ {commit}"),
        Event::CommandPassed { tag } => tracing::debug!("{tag} passed"),
        Event::CommandFailed { tag, error } => tracing::error!("{tag} failed: {error}"),
        Event::PhasePassed { phase } => tracing::debug!("{phase} phase passed"),
        Event::GraphDeadlock { phase, stuck } => {
            tracing::error!(
                "[{phase}] build graph deadlock; commands never became ready: {}",
                stuck.join(", ")
            );
        }
        Event::BuildPassed => tracing::info!("build passed"),
        Event::TestPassed { name } => tracing::info!("test {name} passed"),
        Event::TestFailed { name, error } => tracing::error!("test {name} failed: {error}"),
        Event::TestsPassed { count } => tracing::info!("all {count} tests passed"),
        Event::Clean { path } => tracing::info!("removed {}", path.display()),
        Event::Generate { path } => tracing::info!("wrote {}", path.display()),
    }
}

/// Print per-phase failures and return whether the build succeeded.
pub fn render_outcome(outcome: &BuildOutcome) -> bool {
    for phase in &outcome.phases {
        for failure in &phase.report.failures {
            tracing::error!("[{}] {} failed: {}", phase.phase, failure.tag, failure.error);
        }
        if let Some(stuck) = &phase.report.deadlock {
            tracing::error!(
                "[{}] build graph deadlock; commands never became ready: {}",
                phase.phase,
                stuck.join(", ")
            );
        }
    }
    outcome.ok()
}
