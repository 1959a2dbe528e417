//! Best-effort cleanup of what a reconciliation pass classified as orphaned.
//!
//! Each target is written to the audit feed before it is killed. Crew
//! sessions and unmanaged processes are filtered out here regardless of
//! what the classification says.

use serde::Serialize;

use crate::events::{EventFeed, FeedEvent};
use crate::inventory::{ProcessRecord, ProcessTable, SessionManager};
use crate::naming;
use crate::reconcile::Classification;

const SESSION_REASON: &str = "orphan cleanup";
const PROCESS_REASON: &str = "orphan process cleanup";

/// Aggregate failure of a fix pass; carries the last error seen.
#[derive(Debug, thiserror::Error)]
#[error("{failed} of {attempted} cleanup target(s) failed; last error on {last_target}: {last_error}")]
pub struct RemediationError {
    pub attempted: usize,
    pub failed: usize,
    pub last_target: String,
    pub last_error: String,
}

/// What a fix pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct FixSummary {
    pub sessions_killed: Vec<String>,
    pub processes_killed: Vec<u32>,
    pub failures: Vec<String>,
}

/// Sessions eligible for a kill. Crew sessions never are.
pub fn session_kill_targets(orphans: &[String]) -> Vec<&str> {
    orphans
        .iter()
        .map(String::as_str)
        .filter(|s| !naming::is_crew_session(s))
        .collect()
}

/// Processes eligible for a kill. Only managed ones, re-checked here.
pub fn process_kill_targets(orphans: &[ProcessRecord]) -> Vec<&ProcessRecord> {
    orphans.iter().filter(|p| p.managed).collect()
}

/// Tracks per-target failures without stopping the pass.
#[derive(Default)]
struct Outcome {
    attempted: usize,
    failures: Vec<(String, String)>,
}

impl Outcome {
    fn fail(&mut self, target: String, error: &anyhow::Error) {
        tracing::warn!(target = %target, "cleanup failed: {error:#}");
        self.failures.push((target, format!("{error:#}")));
    }

    fn into_result(self) -> Result<(), RemediationError> {
        match self.failures.last() {
            None => Ok(()),
            Some((target, error)) => Err(RemediationError {
                attempted: self.attempted,
                failed: self.failures.len(),
                last_target: target.clone(),
                last_error: error.clone(),
            }),
        }
    }
}

/// Audit, then kill. A target whose audit entry cannot be written is not
/// killed and counts as a failure.
fn audited_kill(
    feed: &dyn EventFeed,
    outcome: &mut Outcome,
    subject: &str,
    reason: &str,
    kill: impl FnOnce() -> anyhow::Result<()>,
) -> bool {
    outcome.attempted += 1;
    if let Err(e) = feed.log(&FeedEvent::session_death(subject, reason)) {
        outcome.fail(subject.to_string(), &e.context("audit feed unavailable; not killed"));
        return false;
    }
    tracing::info!(subject = %subject, reason, "killing");
    match kill() {
        Ok(()) => true,
        Err(e) => {
            outcome.fail(subject.to_string(), &e);
            false
        }
    }
}

/// Kill orphaned sessions, skipping crew.
pub fn fix_sessions(
    orphans: &[String],
    manager: &dyn SessionManager,
    feed: &dyn EventFeed,
    summary: &mut FixSummary,
) -> Result<(), RemediationError> {
    let mut outcome = Outcome::default();
    for session in session_kill_targets(orphans) {
        if audited_kill(feed, &mut outcome, session, SESSION_REASON, || {
            manager.kill_session(session)
        }) {
            summary.sessions_killed.push(session.to_string());
        }
    }
    summary
        .failures
        .extend(outcome.failures.iter().map(|(t, e)| format!("{t}: {e}")));
    outcome.into_result()
}

/// Kill orphaned managed processes, skipping anything unmanaged.
pub fn fix_processes(
    orphans: &[ProcessRecord],
    table: &dyn ProcessTable,
    feed: &dyn EventFeed,
    summary: &mut FixSummary,
) -> Result<(), RemediationError> {
    let mut outcome = Outcome::default();
    for proc in process_kill_targets(orphans) {
        let subject = format!("pid-{}", proc.pid);
        if audited_kill(feed, &mut outcome, &subject, PROCESS_REASON, || table.kill(proc.pid)) {
            summary.processes_killed.push(proc.pid);
        }
    }
    summary
        .failures
        .extend(outcome.failures.iter().map(|(t, e)| format!("{t}: {e}")));
    outcome.into_result()
}

/// Consume a classification and run both fixes. Both always run; the
/// process fix's error wins when both fail, as the later one seen.
pub fn remediate(
    classification: Classification,
    manager: &dyn SessionManager,
    table: &dyn ProcessTable,
    feed: &dyn EventFeed,
) -> (FixSummary, Result<(), RemediationError>) {
    let mut summary = FixSummary::default();
    let sessions = fix_sessions(&classification.orphan_sessions, manager, feed, &mut summary);
    let processes = fix_processes(
        &classification.orphaned_managed_processes,
        table,
        feed,
        &mut summary,
    );
    let result = match (sessions, processes) {
        (_, Err(e)) | (Err(e), Ok(())) => Err(e),
        (Ok(()), Ok(())) => Ok(()),
    };
    (summary, result)
}
