//! Task execution engine.
//!
//! Runs automation playbooks as supervised subprocesses, one at a time per
//! engine, in submission order:
//!
//! ```text
//! submit ──► queue ──► prepare artifacts ──► spawn ──► stream output ──► finalize
//!                      (keys, inventory)              │                  (status,
//!                                                     ├─► record store    cleanup)
//!                                                     └─► live listeners
//! ```
//!
//! The [`Engine`] handle is cheap to share; all scheduling state is owned by
//! a single background task.

pub mod artifacts;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod inventory;
pub mod notify;
pub mod output;
pub mod runner;
mod scheduler;
pub mod secrets;
pub mod store;

pub use artifacts::{ArtifactSet, SweepResult, sweep_stale};
pub use command::{CommandSpec, PreparedRun, build_command};
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, Result, StoreError, StoreResult};
pub use inventory::{InventoryArtifact, resolve_inventory};
pub use notify::{EventBus, NullNotifier, Notifier};
pub use output::{OutputBroadcaster, Subscription};
pub use runner::{CommandRunner, ProcessRunner, RunHandle};
pub use secrets::{KeyPurpose, install_key};
pub use store::{JsonlRecordStore, MemoryRecordStore, RecordStore, StatusChange};
