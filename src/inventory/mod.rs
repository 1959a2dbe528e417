//! Typed snapshots over the external session manager and process table.

pub mod processes;
pub mod sessions;

pub use processes::{
    Ancestry, ParentLookup, ProcessEntry, ProcessRecord, ProcessTable, Ps, SnapshotParents,
    WorkerFilter,
};
pub use sessions::{SessionManager, SessionSnapshot, Tmux};
