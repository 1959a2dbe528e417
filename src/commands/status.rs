use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use clap::Args;
use serde::Serialize;

use super::TownArgs;
use crate::config::Config;
use crate::inventory::{SessionManager, SessionSnapshot, Tmux};
use crate::naming::Role;
use crate::rigs::{self, Rig};

#[derive(Debug, Args)]
pub struct StatusArgs {
    #[command(flatten)]
    pub town: TownArgs,
    /// Emit JSON instead of the human view
    #[arg(long)]
    pub json: bool,
    /// Re-render until interrupted
    #[arg(long)]
    pub watch: bool,
    /// Seconds between refreshes in watch mode
    #[arg(long, default_value_t = 2, allow_negative_numbers = true)]
    pub interval: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StatusOptionsError {
    #[error("interval must be positive, got {0}")]
    NonPositiveInterval(i64),
    #[error("--json and --watch cannot be used together")]
    JsonWithWatch,
}

/// Validated status options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusOptions {
    Once { json: bool },
    Watch { interval: Duration },
}

impl StatusOptions {
    pub fn new(json: bool, watch: bool, interval: i64) -> Result<Self, StatusOptionsError> {
        if !watch {
            return Ok(Self::Once { json });
        }
        if interval <= 0 {
            return Err(StatusOptionsError::NonPositiveInterval(interval));
        }
        if json {
            return Err(StatusOptionsError::JsonWithWatch);
        }
        Ok(Self::Watch {
            interval: Duration::from_secs(interval.unsigned_abs()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentRuntime {
    pub name: String,
    pub address: String,
    pub role: String,
    pub session: String,
    pub running: bool,
    /// Present on disk but switched off in rig settings.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub disabled: bool,
}

impl AgentRuntime {
    fn new(role: &Role, scope: &str, rig: &str, snapshot: &SessionSnapshot) -> Self {
        let session = role.session_name(scope);
        Self {
            name: match role {
                Role::Polecat(name) | Role::Crew(name) => name.clone(),
                _ => role.keyword().to_string(),
            },
            address: role.address(rig),
            role: role.keyword().to_string(),
            running: snapshot.is_running(&session),
            session,
            disabled: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RigStatus {
    pub name: String,
    pub agents: Vec<AgentRuntime>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TownStatus {
    pub name: String,
    pub root: String,
    /// Set when the session manager could not be queried.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sessions_error: Option<String>,
    pub agents: Vec<AgentRuntime>,
    pub rigs: Vec<RigStatus>,
}

/// Agents a rig has on disk, with running state from the live session list.
pub fn rig_agents(rig: &Rig, snapshot: &SessionSnapshot) -> Vec<AgentRuntime> {
    let mut agents = Vec::new();
    if rig.has_witness {
        agents.push(AgentRuntime::new(&Role::Witness, &rig.name, &rig.name, snapshot));
    }
    if rig.has_refinery {
        let mut refinery = AgentRuntime::new(&Role::Refinery, &rig.name, &rig.name, snapshot);
        refinery.disabled = !rig.settings.refinery.enabled;
        agents.push(refinery);
    }
    for name in &rig.polecats {
        agents.push(AgentRuntime::new(&Role::Polecat(name.clone()), &rig.name, &rig.name, snapshot));
    }
    for name in &rig.crew {
        agents.push(AgentRuntime::new(&Role::Crew(name.clone()), &rig.name, &rig.name, snapshot));
    }
    agents
}

pub fn collect(town_root: &Path, config: &Config, sessions: &dyn SessionManager) -> anyhow::Result<TownStatus> {
    let name = config.town_name(town_root);
    let snapshot = SessionSnapshot::take(sessions);

    let agents = [Role::Mayor, Role::Deacon]
        .iter()
        .map(|role| AgentRuntime::new(role, &name, "", &snapshot))
        .collect();

    let rigs = rigs::discover(town_root)?
        .iter()
        .map(|rig| RigStatus {
            name: rig.name.clone(),
            agents: rig_agents(rig, &snapshot),
        })
        .collect();

    Ok(TownStatus {
        sessions_error: match &snapshot {
            SessionSnapshot::Unavailable(e) => Some(e.clone()),
            SessionSnapshot::Listed(_) => None,
        },
        root: town_root.display().to_string(),
        name,
        agents,
        rigs,
    })
}

/// One-glance marker for an agent.
pub fn status_indicator(agent: &AgentRuntime) -> &'static str {
    if agent.disabled {
        "○ disabled"
    } else if agent.running {
        "● running"
    } else {
        "○ stopped"
    }
}

pub fn render(status: &TownStatus) -> String {
    let mut out = format!("Town: {}  ({})\n", status.name, status.root);
    if let Some(err) = &status.sessions_error {
        out.push_str(&format!("  ⚠ sessions unavailable: {err}\n"));
    }
    for agent in &status.agents {
        out.push_str(&format!("  {:<10} {}\n", agent.name, status_indicator(agent)));
    }
    for rig in &status.rigs {
        out.push_str(&format!("\n{}/\n", rig.name));
        if rig.agents.is_empty() {
            out.push_str("  (no agents)\n");
        }
        for agent in &rig.agents {
            let label = match agent.role.as_str() {
                "polecat" | "crew" => format!("{}/{}", agent.role, agent.name),
                _ => agent.name.clone(),
            };
            out.push_str(&format!("  {label:<20} {}\n", status_indicator(agent)));
        }
    }
    out
}

impl StatusArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let options = StatusOptions::new(self.json, self.watch, self.interval)?;
        let (town_root, config) = self.town.load()?;
        let tmux = Tmux::new(config.doctor.command_timeout());

        match options {
            StatusOptions::Once { json: true } => {
                let status = collect(&town_root, &config, &tmux)?;
                println!("{}", serde_json::to_string_pretty(&status)?);
            }
            StatusOptions::Once { json: false } => {
                print!("{}", render(&collect(&town_root, &config, &tmux)?));
            }
            StatusOptions::Watch { interval } => watch(&town_root, &config, &tmux, interval)?,
        }
        Ok(())
    }
}

fn watch(town_root: &Path, config: &Config, tmux: &Tmux, interval: Duration) -> anyhow::Result<()> {
    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = Arc::clone(&stop);
    ctrlc::set_handler(move || handler_stop.store(true, Ordering::SeqCst))
        .map_err(|e| anyhow::anyhow!("installing Ctrl-C handler: {e}"))?;

    while !stop.load(Ordering::SeqCst) {
        let status = collect(town_root, config, tmux)?;
        // Clear screen, cursor home.
        print!("\x1b[2J\x1b[H{}", render(&status));
        println!("\nRefreshing every {}s. Ctrl-C to exit.", interval.as_secs());

        let started = Instant::now();
        while started.elapsed() < interval && !stop.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(100));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::inventory::sessions::fake::FakeSessions;

    #[test]
    fn watch_rejects_non_positive_interval() {
        for interval in [0, -5] {
            let err = StatusOptions::new(false, true, interval).unwrap_err();
            assert!(err.to_string().contains("positive"));
        }
    }

    #[test]
    fn watch_rejects_json() {
        let err = StatusOptions::new(true, true, 2).unwrap_err();
        assert!(err.to_string().contains("cannot be used together"));
    }

    #[test]
    fn interval_ignored_without_watch() {
        assert_eq!(StatusOptions::new(true, false, 0), Ok(StatusOptions::Once { json: true }));
        assert_eq!(
            StatusOptions::new(false, true, 3),
            Ok(StatusOptions::Watch {
                interval: Duration::from_secs(3)
            })
        );
    }

    fn agent(running: bool, disabled: bool) -> AgentRuntime {
        AgentRuntime {
            name: "refinery".into(),
            address: "acme/refinery".into(),
            role: "refinery".into(),
            session: "gt-acme-refinery".into(),
            running,
            disabled,
        }
    }

    #[test]
    fn indicator_marks_disabled() {
        assert!(status_indicator(&agent(true, true)).contains("disabled"));
        assert!(!status_indicator(&agent(true, false)).contains("disabled"));
        assert!(status_indicator(&agent(false, false)).contains("stopped"));
    }

    fn make_rig(root: &Path, settings: Option<&str>) {
        let rig = root.join("testrig");
        fs::create_dir_all(rig.join("refinery/rig")).unwrap();
        fs::create_dir_all(rig.join("polecats/nux")).unwrap();
        if let Some(json) = settings {
            fs::create_dir_all(rig.join("settings")).unwrap();
            fs::write(rig.join("settings/config.json"), json).unwrap();
        }
    }

    #[test]
    fn refinery_disabled_by_settings() {
        let dir = tempfile::tempdir().unwrap();
        make_rig(
            dir.path(),
            Some(r#"{"type":"rig-settings","version":1,"refinery":{"enabled":false}}"#),
        );
        let rig = &rigs::discover(dir.path()).unwrap()[0];
        let agents = rig_agents(rig, &SessionSnapshot::Listed(vec![]));
        let refinery = agents.iter().find(|a| a.role == "refinery").unwrap();
        assert!(refinery.disabled);
    }

    #[test]
    fn refinery_enabled_by_default() {
        let dir = tempfile::tempdir().unwrap();
        make_rig(dir.path(), Some(r#"{"type":"rig-settings","version":1}"#));
        let rig = &rigs::discover(dir.path()).unwrap()[0];
        let agents = rig_agents(rig, &SessionSnapshot::Listed(vec![]));
        assert!(agents.iter().all(|a| !a.disabled));
    }

    #[test]
    fn collect_reports_running_sessions() {
        let dir = tempfile::tempdir().unwrap();
        make_rig(dir.path(), None);
        let mut config = Config::default();
        config.town.name = Some("acme".into());
        let sessions = FakeSessions::with(&["gt-acme-mayor", "gt-testrig-nux"]);

        let status = collect(dir.path(), &config, &sessions).unwrap();
        assert!(status.sessions_error.is_none());
        assert!(status.agents[0].running);
        assert!(!status.agents[1].running);

        let rig = &status.rigs[0];
        let nux = rig.agents.iter().find(|a| a.name == "nux").unwrap();
        assert!(nux.running);
        assert_eq!(nux.address, "testrig/polecats/nux");

        let text = render(&status);
        assert!(text.contains("polecat/nux"));
        assert!(text.contains("● running"));
    }

    #[test]
    fn collect_survives_session_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut sessions = FakeSessions::default();
        sessions.fail_list = true;
        let status = collect(dir.path(), &Config::default(), &sessions).unwrap();
        assert!(status.sessions_error.is_some());
        assert!(status.agents.iter().all(|a| !a.running));
    }
}
