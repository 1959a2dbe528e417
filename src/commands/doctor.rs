use std::path::Path;

use clap::Args;
use serde::Serialize;

use super::{OutputFormat, TownArgs};
use crate::config::Config;
use crate::error::ExitError;
use crate::events::JsonlFeed;
use crate::inventory::{Ps, Tmux, WorkerFilter};
use crate::lock::LockFile;
use crate::naming::TownSessions;
use crate::reconcile::{CheckResult, CheckStatus, PassReport, Reconciler};
use crate::remediate::{self, FixSummary};
use crate::rigs;

/// Lock serializing health passes within a town.
pub const DOCTOR_LOCK: &str = ".runtime/doctor.lock";

#[derive(Debug, Args)]
pub struct DoctorArgs {
    #[command(flatten)]
    pub town: TownArgs,
    /// Kill orphaned sessions and orphaned fleet-managed processes
    #[arg(long)]
    pub fix: bool,
    /// Output format
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,
}

#[derive(Debug, Serialize)]
pub struct DoctorReport {
    pub town: String,
    pub checks: Vec<CheckResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix: Option<FixSummary>,
    /// Checks re-run after a fix.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after_fix: Option<Vec<CheckResult>>,
}

impl DoctorReport {
    /// Non-ok checks in the final state of the town.
    pub fn issue_count(&self) -> usize {
        self.after_fix
            .as_ref()
            .unwrap_or(&self.checks)
            .iter()
            .filter(|c| !c.is_ok())
            .count()
    }
}

/// The live collaborators a health pass runs against.
struct Fleet {
    tmux: Tmux,
    ps: Ps,
    filter: WorkerFilter,
    town: TownSessions,
}

impl Fleet {
    fn new(config: &Config, town_name: &str) -> anyhow::Result<Self> {
        let timeout = config.doctor.command_timeout();
        Ok(Self {
            tmux: Tmux::new(timeout),
            ps: Ps::new(timeout),
            filter: WorkerFilter::from_config(&config.processes)?,
            town: TownSessions::for_town(town_name),
        })
    }

    fn pass(&self, town_root: &Path) -> anyhow::Result<PassReport> {
        let known_rigs = rigs::names(&rigs::discover(town_root)?);
        Ok(Reconciler {
            sessions: &self.tmux,
            processes: &self.ps,
            filter: &self.filter,
            town: &self.town,
            known_rigs: &known_rigs,
        }
        .run())
    }
}

impl DoctorArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let (town_root, config) = self.town.load()?;
        let format = OutputFormat::resolve(self.format);

        let _lock = LockFile::acquire_now(&town_root.join(DOCTOR_LOCK))?;

        let town_name = config.town_name(&town_root);
        let fleet = Fleet::new(&config, &town_name)?;
        let PassReport {
            checks,
            classification,
        } = fleet.pass(&town_root)?;

        let mut report = DoctorReport {
            town: town_name,
            checks,
            fix: None,
            after_fix: None,
        };

        if self.fix {
            let feed = JsonlFeed::for_town(&town_root);
            let (summary, result) = remediate::remediate(classification, &fleet.tmux, &fleet.ps, &feed);
            if let Err(e) = result {
                tracing::warn!("{e}");
            }
            report.fix = Some(summary);
            report.after_fix = Some(fleet.pass(&town_root)?.checks);
        }

        match format {
            OutputFormat::Pretty => print_pretty(&report),
            OutputFormat::Text => print_text(&report),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        }

        let issue_count = report.issue_count();
        if issue_count > 0 {
            return Err(ExitError::new(
                std::cmp::min(issue_count, 125) as u8,
                format!("{issue_count} issue(s) found"),
            )
            .into());
        }
        Ok(())
    }
}

fn status_mark(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Ok => "✓",
        CheckStatus::Warning => "⚠",
        CheckStatus::Error => "✗",
    }
}

fn print_checks_pretty(checks: &[CheckResult]) {
    for check in checks {
        println!("  {} {}: {}", status_mark(check.status), check.name, check.message);
        for detail in &check.details {
            println!("      {detail}");
        }
        if let Some(hint) = &check.fix_hint {
            println!("      → {hint}");
        }
    }
}

fn print_pretty(report: &DoctorReport) {
    println!("=== Gas Town Doctor ===\n");
    println!("Town: {}\n", report.town);
    println!("Checks:");
    print_checks_pretty(&report.checks);

    if let Some(fix) = &report.fix {
        println!("\nFix:");
        for session in &fix.sessions_killed {
            println!("  ✓ killed session {session}");
        }
        for pid in &fix.processes_killed {
            println!("  ✓ killed process {pid}");
        }
        for failure in &fix.failures {
            println!("  ✗ {failure}");
        }
        if fix.sessions_killed.is_empty() && fix.processes_killed.is_empty() && fix.failures.is_empty() {
            println!("  - nothing to fix");
        }
    }
    if let Some(after) = &report.after_fix {
        println!("\nAfter fix:");
        print_checks_pretty(after);
    }

    let issues = report.issue_count();
    if issues == 0 {
        println!("\n✓ No issues found");
    } else {
        println!("\nIssues: {issues}");
    }
}

fn print_checks_text(prefix: &str, checks: &[CheckResult]) {
    for check in checks {
        println!("{prefix}  {}  {}  {}", check.name, check.status, check.message);
        for detail in &check.details {
            println!("detail  {}  {}", check.name, detail.trim());
        }
    }
}

fn print_text(report: &DoctorReport) {
    println!("gt-doctor  town={}", report.town);
    print_checks_text("check", &report.checks);
    if let Some(fix) = &report.fix {
        println!(
            "fix  sessions_killed={}  processes_killed={}  failures={}",
            fix.sessions_killed.len(),
            fix.processes_killed.len(),
            fix.failures.len()
        );
        for failure in &fix.failures {
            println!("fix-failure  {failure}");
        }
    }
    if let Some(after) = &report.after_fix {
        print_checks_text("after-fix", after);
    }
    println!("issues  count={}", report.issue_count());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(status: CheckStatus) -> CheckResult {
        CheckResult {
            name: "orphan-sessions".into(),
            status,
            message: String::new(),
            details: vec![],
            fix_hint: None,
        }
    }

    #[test]
    fn issue_count_prefers_post_fix_state() {
        let mut report = DoctorReport {
            town: "acme".into(),
            checks: vec![check(CheckStatus::Warning), check(CheckStatus::Warning)],
            fix: None,
            after_fix: None,
        };
        assert_eq!(report.issue_count(), 2);

        report.fix = Some(FixSummary::default());
        report.after_fix = Some(vec![check(CheckStatus::Ok), check(CheckStatus::Warning)]);
        assert_eq!(report.issue_count(), 1);
    }

    #[test]
    fn json_omits_absent_fix() {
        let report = DoctorReport {
            town: "acme".into(),
            checks: vec![check(CheckStatus::Ok)],
            fix: None,
            after_fix: None,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("fix").is_none());
        assert_eq!(json["checks"][0]["status"], "ok");
    }
}
