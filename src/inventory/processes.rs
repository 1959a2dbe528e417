//! Process-table collaborator, worker-candidate filtering, the supervisor
//! PID set, and the ancestry walk that decides whether a worker is orphaned.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use regex::Regex;
use serde::Serialize;

use super::sessions::SessionManager;
use crate::config::ProcessConfig;
use crate::subprocess::Tool;

/// PID of the root of the process tree.
pub const INIT_PID: u32 = 1;

/// One row of the process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub ppid: u32,
    /// Executable name, no path or arguments.
    pub comm: String,
    /// Full command line.
    pub args: String,
}

/// Parent-PID lookup used by the ancestry walk.
pub trait ParentLookup {
    fn parent_of(&self, pid: u32) -> anyhow::Result<u32>;
}

/// The OS process table.
pub trait ProcessTable: ParentLookup {
    fn snapshot(&self) -> anyhow::Result<Vec<ProcessEntry>>;
    fn kill(&self, pid: u32) -> anyhow::Result<()>;
}

/// `ps`/`kill` driven through subprocesses, each bounded by `timeout`.
#[derive(Debug, Clone)]
pub struct Ps {
    timeout: Duration,
}

impl Ps {
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ParentLookup for Ps {
    fn parent_of(&self, pid: u32) -> anyhow::Result<u32> {
        let output = Tool::new("ps")
            .args(&["-p", &pid.to_string(), "-o", "ppid="])
            .timeout(self.timeout)
            .run_ok()?;
        output
            .stdout
            .trim()
            .parse::<u32>()
            .map_err(|e| anyhow::anyhow!("unparseable ppid for {pid}: {e}"))
    }
}

impl ProcessTable for Ps {
    fn snapshot(&self) -> anyhow::Result<Vec<ProcessEntry>> {
        let output = Tool::new("ps")
            .args(&["-eo", "pid=,ppid=,comm=,args="])
            .timeout(self.timeout)
            .run_ok()?;
        Ok(output.stdout.lines().filter_map(parse_ps_line).collect())
    }

    fn kill(&self, pid: u32) -> anyhow::Result<()> {
        Tool::new("kill")
            .arg(&pid.to_string())
            .timeout(self.timeout)
            .run_ok()?;
        Ok(())
    }
}

/// Parse a `pid ppid comm args...` line. `comm` may carry a path on some
/// platforms; only its basename is kept.
pub fn parse_ps_line(line: &str) -> Option<ProcessEntry> {
    let mut fields = line.split_whitespace();
    let pid = fields.next()?.parse::<u32>().ok()?;
    let ppid = fields.next()?.parse::<u32>().ok()?;
    let comm_raw = fields.next()?;
    let args = fields.collect::<Vec<_>>().join(" ");
    if args.is_empty() {
        return None;
    }
    let comm = comm_raw.rsplit('/').next().unwrap_or(comm_raw).to_string();
    Some(ProcessEntry {
        pid,
        ppid,
        comm,
        args,
    })
}

/// A candidate worker process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessRecord {
    pub pid: u32,
    pub ppid: u32,
    pub command: String,
    pub args: String,
    /// Carries the fleet's managed flag; decides remediation, never orphanhood.
    pub managed: bool,
}

/// Selects worker processes out of a full snapshot.
#[derive(Debug, Clone)]
pub struct WorkerFilter {
    commands: Vec<String>,
    managed_flag: String,
    exclude: Regex,
}

impl WorkerFilter {
    pub fn from_config(config: &ProcessConfig) -> anyhow::Result<Self> {
        Ok(Self {
            commands: config.worker_commands.clone(),
            managed_flag: config.managed_flag.clone(),
            exclude: config.exclude_regex()?,
        })
    }

    /// Keep entries whose executable is exactly a worker CLI (not a launcher
    /// mentioning one) and that are not desktop helpers.
    pub fn candidates(&self, snapshot: &[ProcessEntry]) -> Vec<ProcessRecord> {
        snapshot
            .iter()
            .filter(|p| self.commands.iter().any(|c| *c == p.comm))
            .filter(|p| !self.exclude.is_match(&p.args))
            .map(|p| ProcessRecord {
                pid: p.pid,
                ppid: p.ppid,
                command: p.comm.clone(),
                args: p.args.clone(),
                managed: self.is_managed(&p.args),
            })
            .collect()
    }

    fn is_managed(&self, args: &str) -> bool {
        !self.managed_flag.is_empty()
            && args.split_whitespace().any(|a| a == self.managed_flag)
    }
}

fn is_multiplexer_server(comm: &str) -> bool {
    comm == "tmux" || comm.ends_with("/tmux") || comm.starts_with("tmux:")
}

/// PIDs under which a worker counts as supervised: multiplexer server
/// processes plus every pane shell of every live session. A failed pane
/// query skips that session.
pub fn supervisor_pids(
    snapshot: &[ProcessEntry],
    sessions: &[String],
    manager: &dyn SessionManager,
) -> HashSet<u32> {
    let mut pids: HashSet<u32> = snapshot
        .iter()
        .filter(|p| is_multiplexer_server(&p.comm))
        .map(|p| p.pid)
        .collect();

    for session in sessions {
        match manager.list_pane_pids(session) {
            Ok(panes) => pids.extend(panes),
            Err(e) => tracing::warn!(session = %session, "skipping pane query: {e:#}"),
        }
    }
    pids
}

/// Walk the parent chain from `proc.ppid`. Supervised if a supervisor PID is
/// reached; orphaned on reaching PID 1, on a failed lookup, or on a cycle.
pub fn is_orphan(
    proc: &ProcessRecord,
    supervisors: &HashSet<u32>,
    lookup: &dyn ParentLookup,
) -> bool {
    let mut current = proc.ppid;
    let mut visited = HashSet::new();

    while current > INIT_PID && visited.insert(current) {
        if supervisors.contains(&current) {
            return false;
        }
        match lookup.parent_of(current) {
            Ok(next) => current = next,
            Err(e) => {
                tracing::debug!(pid = proc.pid, ancestor = current, "ancestry lookup failed: {e:#}");
                return true;
            }
        }
    }
    true
}

/// Parent lookup answered from a snapshot taken at one instant.
#[derive(Debug, Default)]
pub struct SnapshotParents(HashMap<u32, u32>);

impl SnapshotParents {
    pub fn new(snapshot: &[ProcessEntry]) -> Self {
        Self(snapshot.iter().map(|p| (p.pid, p.ppid)).collect())
    }
}

impl ParentLookup for SnapshotParents {
    fn parent_of(&self, pid: u32) -> anyhow::Result<u32> {
        self.0
            .get(&pid)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("pid {pid} not in snapshot"))
    }
}

/// Try the snapshot first, then ask the live table for PIDs that appeared
/// after the snapshot was taken.
pub struct Ancestry<'a> {
    pub snapshot: &'a SnapshotParents,
    pub live: &'a dyn ParentLookup,
}

impl ParentLookup for Ancestry<'_> {
    fn parent_of(&self, pid: u32) -> anyhow::Result<u32> {
        self.snapshot
            .parent_of(pid)
            .or_else(|_| self.live.parent_of(pid))
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use std::cell::RefCell;
    use std::collections::HashMap;

    use super::{ParentLookup, ProcessEntry, ProcessTable};

    /// In-memory process table for tests.
    #[derive(Default)]
    pub struct FakeProcesses {
        pub entries: Vec<ProcessEntry>,
        pub parents: HashMap<u32, u32>,
        pub fail_snapshot: bool,
        pub fail_kill: Vec<u32>,
        pub killed: RefCell<Vec<u32>>,
    }

    impl FakeProcesses {
        pub fn push(&mut self, pid: u32, ppid: u32, comm: &str, args: &str) {
            self.parents.insert(pid, ppid);
            self.entries.push(ProcessEntry {
                pid,
                ppid,
                comm: comm.to_string(),
                args: args.to_string(),
            });
        }
    }

    impl ParentLookup for FakeProcesses {
        fn parent_of(&self, pid: u32) -> anyhow::Result<u32> {
            self.parents
                .get(&pid)
                .copied()
                .ok_or_else(|| anyhow::anyhow!("no such process {pid}"))
        }
    }

    impl ProcessTable for FakeProcesses {
        fn snapshot(&self) -> anyhow::Result<Vec<ProcessEntry>> {
            if self.fail_snapshot {
                anyhow::bail!("ps failed");
            }
            Ok(self.entries.clone())
        }

        fn kill(&self, pid: u32) -> anyhow::Result<()> {
            if self.fail_kill.contains(&pid) {
                anyhow::bail!("kill {pid}: operation not permitted");
            }
            self.killed.borrow_mut().push(pid);
            Ok(())
        }
    }
}
