use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use crate::config::{CONFIG_TOML, Config, QueueConfig};
use crate::error::ExitError;

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Directory to turn into a town (defaults to the current directory)
    #[arg(long)]
    pub town_root: Option<PathBuf>,
    /// Town name (defaults to the directory name)
    #[arg(long)]
    pub name: Option<String>,
    /// Overwrite an existing gt.toml
    #[arg(long)]
    pub force: bool,
}

/// Town names end up inside session names, which split on `-`.
fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 64 {
        return Err(ExitError::Config(format!("town name must be 1-64 characters, got {}", name.len())).into());
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
    {
        return Err(ExitError::Config(format!("town name must match [a-z0-9_], got {name:?}")).into());
    }
    Ok(())
}

/// Starter config: defaults plus one example queue open to every worker.
pub fn starter_config(name: Option<String>) -> Config {
    let mut config = Config::default();
    config.town.name = name;
    config.queues.push(QueueConfig {
        name: "work".to_string(),
        workers: vec!["*".to_string()],
    });
    config
}

impl InitArgs {
    pub fn execute(&self) -> Result<()> {
        let root = match &self.town_root {
            Some(p) => p.clone(),
            None => std::env::current_dir().context("could not determine current directory")?,
        };
        if let Some(name) = &self.name {
            validate_name(name)?;
        }

        let config_path = root.join(CONFIG_TOML);
        if config_path.exists() && !self.force {
            return Err(ExitError::Config(format!(
                "{} already exists (use --force to overwrite)",
                config_path.display()
            ))
            .into());
        }

        for dir in ["mayor", ".runtime"] {
            let path = root.join(dir);
            fs::create_dir_all(&path).with_context(|| format!("creating {}", path.display()))?;
        }
        let toml = starter_config(self.name.clone()).to_toml()?;
        fs::write(&config_path, toml).with_context(|| format!("writing {}", config_path.display()))?;

        tracing::info!(path = %config_path.display(), "wrote town config");
        println!("Initialized town at {}", root.display());
        Ok(())
    }
}
