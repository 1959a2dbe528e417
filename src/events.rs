//! Append-only audit feed.
//!
//! Every destructive action is recorded here before it is attempted.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Feed file name at the town root.
pub const FEED_FILE: &str = ".events.jsonl";

/// Actor recorded for terminations issued by a health pass.
pub const HEALTH_PASS_ACTOR: &str = "gt doctor";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SessionDeath,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDeath {
    pub session: String,
    pub agent: String,
    pub reason: String,
    pub caller: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedEvent {
    pub ts: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub actor: String,
    pub subject: String,
    pub payload: serde_json::Value,
}

impl FeedEvent {
    /// A pre-termination record for a session or process.
    pub fn session_death(subject: &str, reason: &str) -> Self {
        let payload = SessionDeath {
            session: subject.to_string(),
            agent: "unknown".to_string(),
            reason: reason.to_string(),
            caller: HEALTH_PASS_ACTOR.to_string(),
        };
        Self {
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            event_type: EventType::SessionDeath,
            actor: HEALTH_PASS_ACTOR.to_string(),
            subject: subject.to_string(),
            payload: serde_json::to_value(payload).unwrap_or_default(),
        }
    }
}

pub trait EventFeed {
    fn log(&self, event: &FeedEvent) -> anyhow::Result<()>;
}

/// Feed stored as JSON lines in the town root.
#[derive(Debug, Clone)]
pub struct JsonlFeed {
    path: PathBuf,
}

impl JsonlFeed {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn for_town(town_root: &Path) -> Self {
        Self::new(town_root.join(FEED_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back every event, skipping lines that fail to parse.
    pub fn read_all(&self) -> anyhow::Result<Vec<FeedEvent>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;
        Ok(contents
            .lines()
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect())
    }
}

impl EventFeed for JsonlFeed {
    fn log(&self, event: &FeedEvent) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut line = serde_json::to_string(event).context("encoding feed event")?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("appending to {}", self.path.display()))?;
        file.sync_data()
            .with_context(|| format!("syncing {}", self.path.display()))?;
        Ok(())
    }
}
