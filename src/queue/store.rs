//! Work-item persistence.
//!
//! The claim protocol only needs read access and one atomic operation:
//! swap the assignee if it still equals an expected value.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use super::WorkItem;
use crate::error::ExitError;
use crate::lock::LockFile;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapOutcome {
    Swapped(WorkItem),
    /// The assignee no longer matched; `current` is what was found.
    Conflict { current: String },
}

pub trait WorkItemStore {
    fn get(&self, id: &str) -> anyhow::Result<WorkItem>;
    fn list(&self) -> anyhow::Result<Vec<WorkItem>>;
    /// Add a new item; fails if the id already exists.
    fn insert(&self, item: WorkItem) -> anyhow::Result<()>;
    /// Queue a new item under a fresh id chosen while the store is held.
    fn add(&self, queue: &str, title: &str) -> anyhow::Result<WorkItem>;
    /// Atomically set `assignee = new` and `status` iff `assignee == expected`.
    fn swap_assignee(
        &self,
        id: &str,
        expected: &str,
        new: &str,
        status: &str,
    ) -> anyhow::Result<SwapOutcome>;
}

type Items = BTreeMap<String, WorkItem>;

fn swap_in(items: &mut Items, id: &str, expected: &str, new: &str, status: &str) -> anyhow::Result<SwapOutcome> {
    let item = items
        .get_mut(id)
        .ok_or_else(|| anyhow::anyhow!("work item {id} not found"))?;
    if item.assignee != expected {
        return Ok(SwapOutcome::Conflict {
            current: item.assignee.clone(),
        });
    }
    item.assignee = new.to_string();
    item.status = status.to_string();
    Ok(SwapOutcome::Swapped(item.clone()))
}

/// A short random id not already in `items`.
fn new_id(items: &Items) -> String {
    loop {
        let id = format!("gt-{:05x}", rand::random::<u32>() & 0xf_ffff);
        if !items.contains_key(&id) {
            return id;
        }
    }
}

fn add_in(items: &mut Items, queue: &str, title: &str) -> anyhow::Result<WorkItem> {
    if queue.is_empty() {
        return Err(ExitError::Config("queue name must not be empty".into()).into());
    }
    let item = WorkItem::queued(&new_id(items), title, queue);
    items.insert(item.id.clone(), item.clone());
    Ok(item)
}

fn insert_in(items: &mut Items, item: WorkItem) -> anyhow::Result<()> {
    if items.contains_key(&item.id) {
        anyhow::bail!("work item {} already exists", item.id);
    }
    items.insert(item.id.clone(), item);
    Ok(())
}

/// Process-local store guarded by a mutex.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: Mutex<Items>,
}

impl MemoryStore {
    fn with_items<T>(&self, f: impl FnOnce(&mut Items) -> anyhow::Result<T>) -> anyhow::Result<T> {
        let mut items = self
            .items
            .lock()
            .map_err(|_| anyhow::anyhow!("work-item store lock poisoned"))?;
        f(&mut items)
    }
}

impl WorkItemStore for MemoryStore {
    fn get(&self, id: &str) -> anyhow::Result<WorkItem> {
        self.with_items(|items| {
            items
                .get(id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("work item {id} not found"))
        })
    }

    fn list(&self) -> anyhow::Result<Vec<WorkItem>> {
        self.with_items(|items| Ok(items.values().cloned().collect()))
    }

    fn insert(&self, item: WorkItem) -> anyhow::Result<()> {
        self.with_items(|items| insert_in(items, item))
    }

    fn add(&self, queue: &str, title: &str) -> anyhow::Result<WorkItem> {
        self.with_items(|items| add_in(items, queue, title))
    }

    fn swap_assignee(&self, id: &str, expected: &str, new: &str, status: &str) -> anyhow::Result<SwapOutcome> {
        self.with_items(|items| swap_in(items, id, expected, new, status))
    }
}

/// On-disk layout of the file store.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    items: Vec<WorkItem>,
}

/// JSON file store shared by every process in a town. Each mutation holds
/// an exclusive lock file and replaces the data file by rename.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
    lock_path: PathBuf,
    wait: Duration,
}

impl FileStore {
    pub fn new(path: PathBuf, wait: Duration) -> Self {
        let lock_path = path.with_extension("lock");
        Self {
            path,
            lock_path,
            wait,
        }
    }

    /// The town's store at `<town>/.runtime/work-items.json`.
    pub fn for_town(town_root: &Path, wait: Duration) -> Self {
        Self::new(town_root.join(".runtime").join("work-items.json"), wait)
    }

    fn read(&self) -> anyhow::Result<Items> {
        if !self.path.exists() {
            return Ok(Items::new());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;
        let file: StoreFile = serde_json::from_str(&contents)
            .with_context(|| format!("parsing {}", self.path.display()))?;
        Ok(file
            .items
            .into_iter()
            .map(|item| (item.id.clone(), item))
            .collect())
    }

    fn write(&self, items: &Items) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let file = StoreFile {
            items: items.values().cloned().collect(),
        };
        let json = serde_json::to_string_pretty(&file).context("encoding work items")?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut Items) -> anyhow::Result<T>) -> anyhow::Result<T> {
        let _lock = LockFile::acquire_within(&self.lock_path, self.wait)?;
        let mut items = self.read()?;
        let out = f(&mut items)?;
        self.write(&items)?;
        Ok(out)
    }
}

impl WorkItemStore for FileStore {
    fn get(&self, id: &str) -> anyhow::Result<WorkItem> {
        self.read()?
            .remove(id)
            .ok_or_else(|| anyhow::anyhow!("work item {id} not found"))
    }

    fn list(&self) -> anyhow::Result<Vec<WorkItem>> {
        Ok(self.read()?.into_values().collect())
    }

    fn insert(&self, item: WorkItem) -> anyhow::Result<()> {
        self.mutate(|items| insert_in(items, item))
    }

    fn add(&self, queue: &str, title: &str) -> anyhow::Result<WorkItem> {
        self.mutate(|items| add_in(items, queue, title))
    }

    fn swap_assignee(&self, id: &str, expected: &str, new: &str, status: &str) -> anyhow::Result<SwapOutcome> {
        self.mutate(|items| swap_in(items, id, expected, new, status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{self, STATUS_IN_PROGRESS};

    #[test]
    fn memory_swap_and_conflict() {
        let store = MemoryStore::default();
        store.insert(WorkItem::queued("a", "t", "q")).unwrap();
        assert!(store.insert(WorkItem::queued("a", "t", "q")).is_err());

        let out = store.swap_assignee("a", "queue:q", "rig/polecats/nux", STATUS_IN_PROGRESS).unwrap();
        assert!(matches!(out, SwapOutcome::Swapped(ref i) if i.assignee == "rig/polecats/nux"));

        let out = store.swap_assignee("a", "queue:q", "rig/polecats/toast", STATUS_IN_PROGRESS).unwrap();
        assert_eq!(
            out,
            SwapOutcome::Conflict {
                current: "rig/polecats/nux".into()
            }
        );
        assert!(store.swap_assignee("missing", "x", "y", "z").is_err());
    }

    #[test]
    fn file_store_persists_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::for_town(dir.path(), Duration::from_secs(1));
        assert!(store.list().unwrap().is_empty());

        store.insert(WorkItem::queued("gt-1", "first", "work/acme")).unwrap();
        store.insert(WorkItem::queued("gt-2", "second", "work/acme")).unwrap();

        let other = FileStore::for_town(dir.path(), Duration::from_secs(1));
        let claimed = queue::claim(&other, "work/acme", &["*"], "acme/polecats/nux").unwrap();
        assert_eq!(store.get(&claimed.id).unwrap().assignee, "acme/polecats/nux");
        assert!(dir.path().join(".runtime/work-items.lock").exists());
    }

    #[test]
    fn file_store_swap_is_exclusive_across_threads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("items.json");
        FileStore::new(path.clone(), Duration::from_secs(5))
            .insert(WorkItem::queued("only", "t", "q"))
            .unwrap();

        let handles: Vec<_> = (0..6)
            .map(|i| {
                let store = FileStore::new(path.clone(), Duration::from_secs(5));
                std::thread::spawn(move || {
                    store
                        .swap_assignee("only", "queue:q", &format!("r/polecats/{i}"), STATUS_IN_PROGRESS)
                        .unwrap()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|o| matches!(o, SwapOutcome::Swapped(_)))
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn concurrent_adds_get_distinct_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("items.json");

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = FileStore::new(path.clone(), Duration::from_secs(10));
                std::thread::spawn(move || {
                    (0..5)
                        .map(|n| store.add("work/acme", &format!("task {i}.{n}")).unwrap().id)
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut ids: Vec<String> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 40);

        let stored = FileStore::new(path, Duration::from_secs(1)).list().unwrap();
        assert_eq!(stored.len(), 40);
        assert!(stored.iter().all(WorkItem::is_unclaimed));
    }

    #[test]
    fn add_refuses_empty_queue() {
        let store = MemoryStore::default();
        let err = store.add("", "nowhere").unwrap_err();
        assert!(matches!(err.downcast_ref::<ExitError>(), Some(ExitError::Config(_))));
        assert!(store.list().unwrap().is_empty());

        let item = store.add("work/acme", "somewhere").unwrap();
        assert!(item.id.starts_with("gt-"));
        assert_eq!(store.get(&item.id).unwrap(), item);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("items.json");
        fs::write(&path, "{oops").unwrap();
        let store = FileStore::new(path, Duration::from_secs(1));
        assert!(store.list().is_err());
    }
}
