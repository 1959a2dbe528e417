//! Fleet health reconciliation.
//!
//! A pass lists sessions and processes, classifies each against the naming
//! scheme and the supervisor tree, and returns both a human report and a
//! single-use [`Classification`] that the remediation step consumes.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::inventory::{
    Ancestry, ParentLookup, ProcessRecord, ProcessTable, SessionManager, SessionSnapshot,
    SnapshotParents, WorkerFilter, processes,
};
use crate::naming::{self, Role, TownSessions};

pub const ORPHAN_SESSIONS: &str = "orphan-sessions";
pub const ORPHAN_PROCESSES: &str = "orphan-processes";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    Warning,
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CheckStatus::Ok => "ok",
            CheckStatus::Warning => "warning",
            CheckStatus::Error => "error",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_hint: Option<String>,
}

impl CheckResult {
    fn new(name: &str, status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            message: message.into(),
            details: Vec::new(),
            fix_hint: None,
        }
    }

    fn unavailable(name: &str, message: &str, error: &str) -> Self {
        let mut result = Self::new(name, CheckStatus::Warning, message);
        result.details.push(error.to_string());
        result
    }

    pub fn is_ok(&self) -> bool {
        self.status == CheckStatus::Ok
    }
}

/// The outcome of one reconciliation pass, handed by value to remediation.
///
/// Deliberately not `Clone`: one classification feeds exactly one fix.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Classification {
    pub orphan_sessions: Vec<String>,
    pub orphaned_managed_processes: Vec<ProcessRecord>,
    pub orphaned_personal_processes: Vec<ProcessRecord>,
    pub valid_count: usize,
}

impl Classification {
    pub fn is_clean(&self) -> bool {
        self.orphan_sessions.is_empty()
            && self.orphaned_managed_processes.is_empty()
            && self.orphaned_personal_processes.is_empty()
    }
}

// --- Sessions ---

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SessionClassification {
    pub orphans: Vec<String>,
    pub valid_count: usize,
}

/// Decide whether a fleet session maps to a recognised role in a known rig.
pub fn is_valid_session(session: &str, known_rigs: &BTreeSet<String>, town: &TownSessions) -> bool {
    if town.contains(session) {
        return true;
    }
    let Some(parsed) = naming::parse_rig_session(session) else {
        return false;
    };
    if !known_rigs.contains(parsed.rig) {
        return false;
    }
    match parsed.role {
        Role::Witness | Role::Refinery => true,
        // Worker and crew names can't be checked without live assignment
        // state; missing an orphan beats killing a live worker.
        Role::Polecat(_) | Role::Crew(_) => true,
        // Town roles only count under their canonical names, handled above.
        Role::Mayor | Role::Deacon => false,
    }
}

/// Split fleet sessions into valid and orphaned. Non-fleet sessions are
/// ignored entirely.
pub fn classify_sessions(
    sessions: &[String],
    known_rigs: &BTreeSet<String>,
    town: &TownSessions,
) -> SessionClassification {
    let mut result = SessionClassification::default();
    for session in sessions {
        if session.is_empty() || !naming::is_fleet_session(session) {
            continue;
        }
        if is_valid_session(session, known_rigs, town) {
            result.valid_count += 1;
        } else {
            result.orphans.push(session.clone());
        }
    }
    result
}

pub fn session_check(
    snapshot: &SessionSnapshot,
    known_rigs: &BTreeSet<String>,
    town: &TownSessions,
) -> (CheckResult, SessionClassification) {
    let sessions = match snapshot {
        SessionSnapshot::Unavailable(err) => {
            return (
                CheckResult::unavailable(ORPHAN_SESSIONS, "Could not list tmux sessions", err),
                SessionClassification::default(),
            );
        }
        SessionSnapshot::Listed(sessions) => sessions,
    };

    if sessions.is_empty() {
        return (
            CheckResult::new(ORPHAN_SESSIONS, CheckStatus::Ok, "No tmux sessions found"),
            SessionClassification::default(),
        );
    }

    let classified = classify_sessions(sessions, known_rigs, town);
    if classified.orphans.is_empty() {
        let msg = format!("All {} Gas Town sessions are valid", classified.valid_count);
        return (CheckResult::new(ORPHAN_SESSIONS, CheckStatus::Ok, msg), classified);
    }

    let mut result = CheckResult::new(
        ORPHAN_SESSIONS,
        CheckStatus::Warning,
        format!("Found {} orphaned session(s)", classified.orphans.len()),
    );
    result.details = classified
        .orphans
        .iter()
        .map(|s| format!("Orphan: {s}"))
        .collect();
    result.fix_hint = Some("Run 'gt doctor --fix' to kill orphaned sessions".to_string());
    (result, classified)
}

// --- Processes ---

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ProcessClassification {
    pub supervised: usize,
    pub orphaned_managed: Vec<ProcessRecord>,
    pub orphaned_personal: Vec<ProcessRecord>,
}

/// Place every candidate in exactly one bucket.
pub fn classify_processes(
    candidates: Vec<ProcessRecord>,
    supervisors: &HashSet<u32>,
    lookup: &dyn ParentLookup,
) -> ProcessClassification {
    let mut result = ProcessClassification::default();
    for proc in candidates {
        if !processes::is_orphan(&proc, supervisors, lookup) {
            result.supervised += 1;
        } else if proc.managed {
            result.orphaned_managed.push(proc);
        } else {
            result.orphaned_personal.push(proc);
        }
    }
    result
}

pub fn process_report(classified: &ProcessClassification) -> CheckResult {
    let managed = &classified.orphaned_managed;
    let personal = &classified.orphaned_personal;

    if managed.is_empty() && personal.is_empty() {
        return CheckResult::new(
            ORPHAN_PROCESSES,
            CheckStatus::Ok,
            format!("All {} runtime processes are inside tmux", classified.supervised),
        );
    }

    let mut details = Vec::new();
    if !managed.is_empty() {
        details.push(format!("Orphaned Gas Town processes ({}):", managed.len()));
        for p in managed {
            details.push(format!("  PID {}: {} (will be killed with --fix)", p.pid, p.command));
        }
    }
    if !personal.is_empty() {
        if !managed.is_empty() {
            details.push(String::new());
        }
        details.push(format!("Personal sessions ({}) - PROTECTED:", personal.len()));
        for p in personal {
            details.push(format!(
                "  PID {}: {} (personal session, not auto-fixed)",
                p.pid, p.command
            ));
        }
    }

    let mut message = format!("Found {} orphaned Gas Town process(es)", managed.len());
    if !personal.is_empty() {
        message.push_str(&format!(", {} personal session(s) protected", personal.len()));
    }

    let mut result = CheckResult::new(ORPHAN_PROCESSES, CheckStatus::Warning, message);
    result.details = details;
    if !managed.is_empty() {
        result.fix_hint = Some("Run 'gt doctor --fix' to kill orphaned Gas Town processes".to_string());
    }
    result
}

// --- Pass ---

/// Everything a pass needs, borrowed from the caller.
pub struct Reconciler<'a> {
    pub sessions: &'a dyn SessionManager,
    pub processes: &'a dyn ProcessTable,
    pub filter: &'a WorkerFilter,
    pub town: &'a TownSessions,
    pub known_rigs: &'a BTreeSet<String>,
}

/// Report plus the classification it was derived from.
#[derive(Debug)]
pub struct PassReport {
    pub checks: Vec<CheckResult>,
    pub classification: Classification,
}

impl PassReport {
    pub fn issue_count(&self) -> usize {
        self.checks.iter().filter(|c| !c.is_ok()).count()
    }
}

impl Reconciler<'_> {
    /// Run one synchronous pass: inventory, then classify.
    pub fn run(&self) -> PassReport {
        let snapshot = SessionSnapshot::take(self.sessions);
        let (session_result, sessions) = session_check(&snapshot, self.known_rigs, self.town);
        let (process_result, procs) = self.process_check(&snapshot);

        tracing::info!(
            orphan_sessions = sessions.orphans.len(),
            orphaned_managed = procs.orphaned_managed.len(),
            orphaned_personal = procs.orphaned_personal.len(),
            "reconciliation pass complete"
        );

        PassReport {
            checks: vec![session_result, process_result],
            classification: Classification {
                orphan_sessions: sessions.orphans,
                orphaned_managed_processes: procs.orphaned_managed,
                orphaned_personal_processes: procs.orphaned_personal,
                valid_count: sessions.valid_count,
            },
        }
    }

    fn process_check(&self, snapshot: &SessionSnapshot) -> (CheckResult, ProcessClassification) {
        if let SessionSnapshot::Unavailable(err) = snapshot {
            return (
                CheckResult::unavailable(ORPHAN_PROCESSES, "Could not get tmux session info", err),
                ProcessClassification::default(),
            );
        }

        let table = match self.processes.snapshot() {
            Ok(table) => table,
            Err(e) => {
                tracing::warn!("could not list processes: {e:#}");
                return (
                    CheckResult::unavailable(
                        ORPHAN_PROCESSES,
                        "Could not list runtime processes",
                        &format!("{e:#}"),
                    ),
                    ProcessClassification::default(),
                );
            }
        };

        let candidates = self.filter.candidates(&table);
        if candidates.is_empty() {
            return (
                CheckResult::new(ORPHAN_PROCESSES, CheckStatus::Ok, "No runtime processes found"),
                ProcessClassification::default(),
            );
        }

        let supervisors = processes::supervisor_pids(&table, snapshot.names(), self.sessions);
        let parents = SnapshotParents::new(&table);
        let ancestry = Ancestry {
            snapshot: &parents,
            live: self.processes,
        };
        let classified = classify_processes(candidates, &supervisors, &ancestry);
        (process_report(&classified), classified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProcessConfig;
    use crate::inventory::processes::fake::FakeProcesses;
    use crate::inventory::sessions::fake::FakeSessions;

    fn rigs(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn strings(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn proc(pid: u32, ppid: u32, managed: bool) -> ProcessRecord {
        ProcessRecord {
            pid,
            ppid,
            command: "claude".into(),
            args: String::new(),
            managed,
        }
    }

    #[test]
    fn end_to_end_session_scenario() {
        let town = TownSessions::for_town("acme");
        let snapshot = SessionSnapshot::Listed(strings(&[
            "gt-acme-mayor",
            "gt-acme-witness",
            "gt-old-rig-witness",
        ]));
        let (result, classified) = session_check(&snapshot, &rigs(&["acme"]), &town);
        assert_eq!(classified.orphans, vec!["gt-old-rig-witness"]);
        assert_eq!(classified.valid_count, 2);
        assert_eq!(result.status, CheckStatus::Warning);
        assert_eq!(result.details, vec!["Orphan: gt-old-rig-witness"]);
        assert!(result.fix_hint.unwrap().contains("--fix"));
    }

    #[test]
    fn valid_session_patterns() {
        let town = TownSessions::for_town("hq");
        let known = rigs(&["gastown"]);
        assert!(is_valid_session("gt-hq-mayor", &known, &town));
        assert!(is_valid_session("gt-hq-deacon", &known, &town));
        assert!(is_valid_session("gt-gastown-witness", &known, &town));
        assert!(is_valid_session("gt-gastown-refinery", &known, &town));
        assert!(is_valid_session("gt-gastown-nux", &known, &town));
        assert!(is_valid_session("gt-gastown-crew-joe", &known, &town));
        assert!(!is_valid_session("gt-other-mayor", &known, &town));
        assert!(!is_valid_session("gt-deleted-witness", &known, &town));
        assert!(!is_valid_session("gt-gastown", &known, &town));
    }

    #[test]
    fn non_fleet_sessions_are_ignored() {
        let town = TownSessions::for_town("acme");
        let classified = classify_sessions(&strings(&["main", "", "work-1"]), &rigs(&[]), &town);
        assert!(classified.orphans.is_empty());
        assert_eq!(classified.valid_count, 0);
    }

    #[test]
    fn all_valid_sessions_ok() {
        let town = TownSessions::for_town("acme");
        let snapshot = SessionSnapshot::Listed(strings(&["gt-acme-mayor", "gt-acme-nux"]));
        let (result, _) = session_check(&snapshot, &rigs(&["acme"]), &town);
        assert_eq!(result.status, CheckStatus::Ok);
        assert_eq!(result.message, "All 2 Gas Town sessions are valid");
    }

    #[test]
    fn empty_and_unavailable_sessions() {
        let town = TownSessions::for_town("acme");
        let (result, _) = session_check(&SessionSnapshot::Listed(vec![]), &rigs(&[]), &town);
        assert_eq!(result.status, CheckStatus::Ok);
        assert_eq!(result.message, "No tmux sessions found");

        let (result, classified) = session_check(
            &SessionSnapshot::Unavailable("boom".into()),
            &rigs(&[]),
            &town,
        );
        assert_eq!(result.status, CheckStatus::Warning);
        assert_eq!(result.details, vec!["boom"]);
        assert!(classified.orphans.is_empty());
    }

    #[test]
    fn processes_land_in_exactly_one_bucket() {
        let mut table = FakeProcesses::default();
        table.push(100, 1, "zsh", "-zsh");
        let supervisors = HashSet::from([100]);
        let classified = classify_processes(
            vec![proc(1, 100, true), proc(2, 1, true), proc(3, 1, false)],
            &supervisors,
            &table,
        );
        assert_eq!(classified.supervised, 1);
        assert_eq!(classified.orphaned_managed, vec![proc(2, 1, true)]);
        assert_eq!(classified.orphaned_personal, vec![proc(3, 1, false)]);
    }

    #[test]
    fn process_report_distinguishes_fixable_and_protected() {
        let classified = ProcessClassification {
            supervised: 4,
            orphaned_managed: vec![proc(2, 1, true)],
            orphaned_personal: vec![proc(3, 1, false), proc(4, 1, false)],
        };
        let result = process_report(&classified);
        assert_eq!(result.status, CheckStatus::Warning);
        assert_eq!(
            result.message,
            "Found 1 orphaned Gas Town process(es), 2 personal session(s) protected"
        );
        assert!(result.details.iter().any(|d| d.contains("PID 2") && d.contains("will be killed")));
        assert!(result.details.iter().any(|d| d.contains("PID 3") && d.contains("not auto-fixed")));
        assert!(result.fix_hint.is_some());
    }

    #[test]
    fn personal_only_orphans_still_warn_without_hint() {
        let classified = ProcessClassification {
            supervised: 0,
            orphaned_managed: vec![],
            orphaned_personal: vec![proc(3, 1, false)],
        };
        let result = process_report(&classified);
        assert_eq!(result.status, CheckStatus::Warning);
        assert!(result.fix_hint.is_none());
    }

    #[test]
    fn process_report_all_supervised() {
        let result = process_report(&ProcessClassification {
            supervised: 3,
            ..ProcessClassification::default()
        });
        assert!(result.is_ok());
        assert_eq!(result.message, "All 3 runtime processes are inside tmux");
    }

    fn fleet() -> (FakeSessions, FakeProcesses) {
        let mut sessions = FakeSessions::with(&["gt-acme-mayor", "gt-acme-witness", "gt-old-rig-witness"]);
        sessions.panes.insert("gt-acme-mayor".into(), vec![100]);
        sessions.panes.insert("gt-acme-witness".into(), vec![101]);

        let mut table = FakeProcesses::default();
        table.push(50, 1, "tmux", "tmux new-session -d");
        table.push(100, 50, "zsh", "-zsh");
        table.push(101, 50, "zsh", "-zsh");
        table.push(200, 100, "claude", "claude --dangerously-skip-permissions");
        table.push(201, 1, "claude", "claude --dangerously-skip-permissions");
        table.push(202, 1, "claude", "claude");
        table.push(203, 1, "claude", "/Applications/Claude.app/claude");
        (sessions, table)
    }

    #[test]
    fn full_pass_builds_single_classification() {
        let (sessions, table) = fleet();
        let filter = WorkerFilter::from_config(&ProcessConfig::default()).unwrap();
        let town = TownSessions::for_town("acme");
        let known = rigs(&["acme"]);
        let reconciler = Reconciler {
            sessions: &sessions,
            processes: &table,
            filter: &filter,
            town: &town,
            known_rigs: &known,
        };

        let report = reconciler.run();
        assert_eq!(report.checks.len(), 2);
        assert_eq!(report.issue_count(), 2);

        let c = report.classification;
        assert_eq!(c.orphan_sessions, vec!["gt-old-rig-witness"]);
        assert_eq!(c.valid_count, 2);
        assert_eq!(c.orphaned_managed_processes.len(), 1);
        assert_eq!(c.orphaned_managed_processes[0].pid, 201);
        assert_eq!(c.orphaned_personal_processes.len(), 1);
        assert_eq!(c.orphaned_personal_processes[0].pid, 202);
        assert!(!c.is_clean());
    }

    #[test]
    fn pass_degrades_when_sessions_unavailable() {
        let (mut sessions, table) = fleet();
        sessions.fail_list = true;
        let filter = WorkerFilter::from_config(&ProcessConfig::default()).unwrap();
        let town = TownSessions::for_town("acme");
        let known = rigs(&["acme"]);
        let report = Reconciler {
            sessions: &sessions,
            processes: &table,
            filter: &filter,
            town: &town,
            known_rigs: &known,
        }
        .run();

        assert!(report.checks.iter().all(|c| c.status == CheckStatus::Warning));
        assert!(report.classification.is_clean());
    }

    #[test]
    fn pass_degrades_when_process_table_unavailable() {
        let (sessions, mut table) = fleet();
        table.fail_snapshot = true;
        let filter = WorkerFilter::from_config(&ProcessConfig::default()).unwrap();
        let town = TownSessions::for_town("acme");
        let known = rigs(&["acme"]);
        let report = Reconciler {
            sessions: &sessions,
            processes: &table,
            filter: &filter,
            town: &town,
            known_rigs: &known,
        }
        .run();

        assert_eq!(report.checks[0].status, CheckStatus::Warning);
        assert_eq!(report.checks[1].message, "Could not list runtime processes");
        assert!(report.classification.orphaned_managed_processes.is_empty());
        assert_eq!(report.classification.orphan_sessions.len(), 1);
    }
}
