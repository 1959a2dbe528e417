use std::time::Duration;

use clap::{Args, Subcommand};

use super::{OutputFormat, TownArgs};
use crate::error::ExitError;
use crate::queue::{self, ClaimError, FileStore, WorkItem, WorkItemStore};

/// Environment variable naming the caller's worker identity.
pub const IDENTITY_ENV: &str = "GT_IDENTITY";

/// How long a queue command waits on the store lock.
const STORE_WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, Args)]
pub struct QueueCommand {
    #[command(flatten)]
    pub town: TownArgs,
    #[command(subcommand)]
    pub action: QueueAction,
}

#[derive(Debug, Subcommand)]
pub enum QueueAction {
    /// Put a new item into a queue
    Add {
        queue: String,
        title: String,
    },
    /// List work items
    List {
        /// Only items in this queue
        queue: Option<String>,
        /// Output format
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },
    /// Claim one unclaimed item from a queue
    Claim {
        queue: String,
        #[command(flatten)]
        identity: Identity,
    },
    /// Return a claimed item to its queue
    Release {
        id: String,
        #[command(flatten)]
        identity: Identity,
    },
}

#[derive(Debug, Args)]
pub struct Identity {
    /// Worker identity (defaults to $GT_IDENTITY), e.g. acme/polecats/nux
    #[arg(long = "as", value_name = "IDENTITY")]
    pub caller: Option<String>,
}

impl Identity {
    pub fn resolve(&self) -> anyhow::Result<String> {
        if let Some(caller) = self.caller.as_deref()
            && !caller.is_empty()
        {
            return Ok(caller.to_string());
        }
        match std::env::var(IDENTITY_ENV) {
            Ok(caller) if !caller.is_empty() => Ok(caller),
            _ => Err(ExitError::Config(format!("no identity: pass --as or set {IDENTITY_ENV}")).into()),
        }
    }
}

impl QueueCommand {
    pub fn execute(&self) -> anyhow::Result<()> {
        let (town_root, config) = self.town.load()?;
        let store = FileStore::for_town(&town_root, STORE_WAIT);

        match &self.action {
            QueueAction::Add { queue, title } => {
                if !queue.is_empty() && config.queue(queue).is_none() {
                    tracing::warn!(queue = %queue, "queue has no [[queues]] entry; nobody can claim from it");
                }
                let item = store.add(queue, title)?;
                println!("{}", item.id);
            }
            QueueAction::List { queue, format } => {
                let mut items = store.list()?;
                if let Some(queue) = queue {
                    items.retain(|item| &item.queue_name == queue);
                }
                print_items(&items, OutputFormat::resolve(*format))?;
            }
            QueueAction::Claim { queue, identity } => {
                let caller = identity.resolve()?;
                let workers = config.queue(queue).map(|q| q.workers.as_slice()).unwrap_or_default();
                let item = queue::claim(&store, queue, workers, &caller).map_err(claim_failure)?;
                println!("{}  {}", item.id, item.title);
            }
            QueueAction::Release { id, identity } => {
                let caller = identity.resolve()?;
                let item = queue::release(&store, id, &caller).map_err(claim_failure)?;
                println!("released {} to {}", item.id, item.queue_name);
            }
        }
        Ok(())
    }
}

fn claim_failure(e: ClaimError) -> anyhow::Error {
    match e {
        ClaimError::Store(inner) => inner,
        other @ ClaimError::NoQueueName => ExitError::Config(other.to_string()).into(),
        other => ExitError::Other(other.to_string()).into(),
    }
}

fn print_items(items: &[WorkItem], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(items)?),
        OutputFormat::Text => {
            for item in items {
                println!(
                    "item  id={}  queue={}  status={}  assignee={}  title={}",
                    item.id, item.queue_name, item.status, item.assignee, item.title
                );
            }
        }
        OutputFormat::Pretty => {
            if items.is_empty() {
                println!("No work items.");
            }
            for item in items {
                let state = if item.is_unclaimed() {
                    "unclaimed".to_string()
                } else {
                    format!("→ {}", item.assignee)
                };
                println!("  {}  [{}]  {}  ({state})", item.id, item.queue_name, item.title);
            }
        }
    }
    Ok(())
}
