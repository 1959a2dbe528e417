pub mod doctor;
pub mod init;
pub mod queue;
pub mod schema;
pub mod status;

use std::io::IsTerminal;
use std::path::PathBuf;

use clap::Args;

use crate::config::{self, Config};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Pretty,
    Text,
    Json,
}

impl OutputFormat {
    /// Explicit choice, else pretty on a terminal and text when piped.
    pub fn resolve(choice: Option<Self>) -> Self {
        choice.unwrap_or_else(|| {
            if std::io::stdout().is_terminal() {
                OutputFormat::Pretty
            } else {
                OutputFormat::Text
            }
        })
    }
}

/// `--town-root`, shared by every town-scoped command.
#[derive(Debug, Clone, Args)]
pub struct TownArgs {
    /// Town root directory (defaults to $GT_TOWN_ROOT, then the nearest
    /// ancestor holding gt.toml or mayor/)
    #[arg(long)]
    pub town_root: Option<PathBuf>,
}

impl TownArgs {
    /// Resolve the town root and load its config.
    pub fn load(&self) -> anyhow::Result<(PathBuf, Config)> {
        let root = config::resolve_town_root(self.town_root.as_deref())?;
        let config = Config::load_for_town(&root)?;
        tracing::debug!(town_root = %root.display(), "loaded town");
        Ok((root, config))
    }
}
