//! Session-manager collaborator and the typed session snapshot.

use std::time::Duration;

use crate::subprocess::Tool;

/// The terminal-multiplexer operations a health pass depends on.
pub trait SessionManager {
    /// Names of all live sessions.
    fn list_sessions(&self) -> anyhow::Result<Vec<String>>;
    /// Shell PIDs of every pane in a session.
    fn list_pane_pids(&self, session: &str) -> anyhow::Result<Vec<u32>>;
    /// Terminate a session by name.
    fn kill_session(&self, session: &str) -> anyhow::Result<()>;
}

/// `tmux` driven through subprocesses, each bounded by `timeout`.
#[derive(Debug, Clone)]
pub struct Tmux {
    timeout: Duration,
}

impl Tmux {
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn tool(&self) -> Tool {
        Tool::new("tmux").timeout(self.timeout)
    }
}

/// tmux reports a missing server as a failure; for listing purposes that is
/// simply an empty fleet.
fn is_no_server(stderr: &str) -> bool {
    stderr.contains("no server running")
        || stderr.contains("no current client")
        || stderr.contains("error connecting to")
}

impl SessionManager for Tmux {
    fn list_sessions(&self) -> anyhow::Result<Vec<String>> {
        let output = self.tool().args(&["list-sessions", "-F", "#{session_name}"]).run()?;
        if !output.success() {
            if is_no_server(&output.stderr) {
                return Ok(Vec::new());
            }
            anyhow::bail!("tmux list-sessions failed: {}", output.stderr.trim());
        }
        Ok(output.lines().map(str::to_string).collect())
    }

    fn list_pane_pids(&self, session: &str) -> anyhow::Result<Vec<u32>> {
        let output = self
            .tool()
            .args(&["list-panes", "-s", "-t", session, "-F", "#{pane_pid}"])
            .run_ok()?;
        Ok(parse_pids(&output.stdout))
    }

    fn kill_session(&self, session: &str) -> anyhow::Result<()> {
        self.tool().args(&["kill-session", "-t", session]).run_ok()?;
        Ok(())
    }
}

/// Parse one PID per line, skipping anything unparseable.
pub fn parse_pids(stdout: &str) -> Vec<u32> {
    stdout
        .lines()
        .filter_map(|l| l.trim().parse::<u32>().ok())
        .collect()
}

/// Outcome of listing sessions for one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSnapshot {
    Listed(Vec<String>),
    /// The collaborator failed; the pass degrades instead of aborting.
    Unavailable(String),
}

impl SessionSnapshot {
    /// Take a snapshot, capturing failure as a value.
    pub fn take(manager: &dyn SessionManager) -> Self {
        match manager.list_sessions() {
            Ok(mut sessions) => {
                sessions.retain(|s| !s.trim().is_empty());
                Self::Listed(sessions)
            }
            Err(e) => {
                tracing::warn!("could not list sessions: {e:#}");
                Self::Unavailable(format!("{e:#}"))
            }
        }
    }

    /// Live session names, empty when unavailable.
    pub fn names(&self) -> &[String] {
        match self {
            Self::Listed(names) => names,
            Self::Unavailable(_) => &[],
        }
    }

    pub fn is_running(&self, session: &str) -> bool {
        self.names().iter().any(|s| s == session)
    }
}


#[cfg(test)]
mod tests {
    use super::fake::FakeSessions;
    use super::*;

    #[test]
    fn parse_pids_skips_garbage() {
        assert_eq!(parse_pids("101\n\nabc\n 202 \n"), vec![101, 202]);
    }

    #[test]
    fn no_server_detection() {
        assert!(is_no_server("no server running on /tmp/tmux-0/default"));
        assert!(is_no_server("error connecting to /tmp/tmux-1000/default (No such file or directory)"));
        assert!(!is_no_server("unknown option"));
    }

    #[test]
    fn snapshot_drops_blank_names() {
        let fake = FakeSessions::with(&["gt-acme-mayor", "", "  "]);
        let snap = SessionSnapshot::take(&fake);
        assert_eq!(snap.names(), ["gt-acme-mayor".to_string()]);
        assert!(snap.is_running("gt-acme-mayor"));
        assert!(!snap.is_running("gt-acme-deacon"));
    }

    #[test]
    fn snapshot_captures_failure() {
        let fake = FakeSessions {
            fail_list: true,
            ..FakeSessions::default()
        };
        let snap = SessionSnapshot::take(&fake);
        assert!(matches!(snap, SessionSnapshot::Unavailable(ref e) if e.contains("timed out")));
        assert!(snap.names().is_empty());
    }
}
