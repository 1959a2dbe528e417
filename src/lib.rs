//! gt - fleet supervisor for a town of tmux-hosted coding agents

pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod inventory;
pub mod lock;
pub mod naming;
pub mod pattern;
pub mod queue;
pub mod reconcile;
pub mod remediate;
pub mod rigs;
pub mod subprocess;
pub mod telemetry;
