//! Rig discovery under a town root.
//!
//! A rig is an immediate subdirectory of the town holding a `polecats/` or
//! `crew/` directory. Per-rig settings live in `<rig>/settings/config.json`.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

/// Directories at the town root that are never rigs.
const RESERVED: &[&str] = &["mayor", "deacon", "settings"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rig {
    pub name: String,
    pub path: PathBuf,
    pub has_witness: bool,
    pub has_refinery: bool,
    pub polecats: Vec<String>,
    pub crew: Vec<String>,
    pub settings: RigSettings,
}

impl Rig {
    /// Refinery present on disk and not disabled in settings.
    pub const fn refinery_enabled(&self) -> bool {
        self.has_refinery && self.settings.refinery.enabled
    }
}

/// Parsed `<rig>/settings/config.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RigSettings {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub version: Option<u32>,
    #[serde(default)]
    pub refinery: RefinerySettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RefinerySettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for RefinerySettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

const fn default_true() -> bool {
    true
}

impl RigSettings {
    /// Load a rig's settings; a missing file means defaults.
    pub fn load(rig_path: &Path) -> anyhow::Result<Self> {
        let path = rig_path.join("settings").join("config.json");
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents =
            fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
    }
}

/// Scan the town root for rigs, sorted by name.
///
/// Unreadable or malformed rig settings fall back to defaults with a warning
/// so one bad rig cannot hide the others from classification.
pub fn discover(town_root: &Path) -> anyhow::Result<Vec<Rig>> {
    let entries = fs::read_dir(town_root)
        .with_context(|| format!("reading town root {}", town_root.display()))?;

    let mut rigs = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || RESERVED.contains(&name.as_str()) {
            continue;
        }
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let polecats_dir = path.join("polecats");
        let crew_dir = path.join("crew");
        if !polecats_dir.is_dir() && !crew_dir.is_dir() {
            continue;
        }

        let settings = RigSettings::load(&path).unwrap_or_else(|e| {
            tracing::warn!(rig = %name, "ignoring rig settings: {e:#}");
            RigSettings::default()
        });

        rigs.push(Rig {
            has_witness: path.join("witness").is_dir(),
            has_refinery: path.join("refinery").is_dir(),
            polecats: subdirs(&polecats_dir),
            crew: subdirs(&crew_dir),
            settings,
            name,
            path,
        });
    }
    rigs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(rigs)
}

/// Names of the known rigs, for session classification.
pub fn names(rigs: &[Rig]) -> BTreeSet<String> {
    rigs.iter().map(|r| r.name.clone()).collect()
}

fn subdirs(dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .flatten()
        .filter(|e| e.path().is_dir())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| !n.starts_with('.'))
        .collect();
    names.sort();
    names
}
