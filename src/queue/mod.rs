//! Work-item queue coordination.
//!
//! An item sitting in queue `Q` has assignee `queue:Q`. Claiming swaps that
//! sentinel for a worker identity in one compare-and-swap against the
//! store; releasing swaps it back, and only the current holder may do so.
//!
//! ```text
//! unclaimed(queue:Q) --claim(W)--> claimed(W) --release(W)--> unclaimed(queue:Q)
//! ```

pub mod store;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::pattern;
pub use store::{FileStore, MemoryStore, SwapOutcome, WorkItemStore};

/// Assignee prefix marking an unclaimed item.
pub const QUEUE_PREFIX: &str = "queue:";

pub const STATUS_OPEN: &str = "open";
pub const STATUS_IN_PROGRESS: &str = "in_progress";

/// The unclaimed sentinel for a queue.
pub fn sentinel(queue: &str) -> String {
    format!("{QUEUE_PREFIX}{queue}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub title: String,
    pub assignee: String,
    /// Empty when the item is not queue-managed.
    #[serde(default, rename = "queue")]
    pub queue_name: String,
    pub status: String,
}

impl WorkItem {
    /// A fresh item already sitting unclaimed in `queue`.
    pub fn queued(id: &str, title: &str, queue: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            assignee: sentinel(queue),
            queue_name: queue.to_string(),
            status: STATUS_OPEN.to_string(),
        }
    }

    pub fn is_queue_item(&self) -> bool {
        !self.queue_name.is_empty()
    }

    pub fn is_unclaimed(&self) -> bool {
        self.is_queue_item() && self.assignee == sentinel(&self.queue_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReleaseError {
    #[error("message {id} is not a queue message (no queue label)")]
    NotAQueueMessage { id: String },

    #[error("message {id} is not claimed (still in queue)")]
    NotClaimed { id: String },

    #[error("message {id} was claimed by {holder}, not {caller}")]
    ClaimedByOther {
        id: String,
        holder: String,
        caller: String,
    },
}

/// Check that `caller` may release `item`. Mutation is the store's job.
pub fn validate_release(item: &WorkItem, caller: &str) -> Result<(), ReleaseError> {
    if item.queue_name.is_empty() {
        return Err(ReleaseError::NotAQueueMessage {
            id: item.id.clone(),
        });
    }
    if item.assignee != caller {
        if item.assignee.starts_with(QUEUE_PREFIX) {
            return Err(ReleaseError::NotClaimed {
                id: item.id.clone(),
            });
        }
        return Err(ReleaseError::ClaimedByOther {
            id: item.id.clone(),
            holder: item.assignee.clone(),
            caller: caller.to_string(),
        });
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ClaimError {
    #[error("queue name must not be empty")]
    NoQueueName,

    #[error("{caller} is not eligible to claim from queue {queue}")]
    NotEligible { caller: String, queue: String },

    #[error("no unclaimed items in queue {queue}")]
    Empty { queue: String },

    #[error(transparent)]
    Release(#[from] ReleaseError),

    #[error("work-item store: {0:#}")]
    Store(anyhow::Error),
}

impl From<anyhow::Error> for ClaimError {
    fn from(e: anyhow::Error) -> Self {
        ClaimError::Store(e)
    }
}

/// Claim one unclaimed item from `queue` for `caller`.
///
/// Candidates are tried in shuffled order so racing claimants spread out;
/// losing a swap moves on to the next candidate rather than retrying.
pub fn claim<S: AsRef<str>>(
    store: &dyn WorkItemStore,
    queue: &str,
    eligible: &[S],
    caller: &str,
) -> Result<WorkItem, ClaimError> {
    if queue.is_empty() {
        return Err(ClaimError::NoQueueName);
    }
    if !pattern::is_eligible_worker(caller, eligible) {
        return Err(ClaimError::NotEligible {
            caller: caller.to_string(),
            queue: queue.to_string(),
        });
    }

    let unclaimed = sentinel(queue);
    let mut candidates: Vec<WorkItem> = store
        .list()?
        .into_iter()
        .filter(|item| item.is_queue_item() && item.queue_name == queue && item.assignee == unclaimed)
        .collect();
    candidates.shuffle(&mut rand::rng());

    for candidate in candidates {
        match store.swap_assignee(&candidate.id, &unclaimed, caller, STATUS_IN_PROGRESS)? {
            SwapOutcome::Swapped(item) => {
                tracing::info!(id = %item.id, queue, caller, "claimed");
                return Ok(item);
            }
            SwapOutcome::Conflict { current } => {
                tracing::debug!(id = %candidate.id, current = %current, "lost claim race");
            }
        }
    }
    Err(ClaimError::Empty {
        queue: queue.to_string(),
    })
}

/// Release an item `caller` holds back into its queue.
pub fn release(store: &dyn WorkItemStore, id: &str, caller: &str) -> Result<WorkItem, ClaimError> {
    let item = store.get(id)?;
    validate_release(&item, caller)?;

    match store.swap_assignee(id, caller, &sentinel(&item.queue_name), STATUS_OPEN)? {
        SwapOutcome::Swapped(item) => {
            tracing::info!(id, caller, "released");
            Ok(item)
        }
        // Changed between read and swap; report against what is there now.
        SwapOutcome::Conflict { .. } => {
            let current = store.get(id)?;
            validate_release(&current, caller)?;
            Err(ClaimError::Store(anyhow::anyhow!("release of {id} raced; try again")))
        }
    }
}
