//! Sandbox lifecycle orchestration for pylearn.
//!
//! This crate owns every state transition of a sandbox: the lifecycle
//! manager provisions and repairs it, the sync engine mirrors files in copy
//! mode, and the dispatcher runs demo scripts and commands inside it. All
//! backend-specific behavior stays behind the
//! [`SandboxBackend`](pl_sandbox_core::SandboxBackend) trait.

pub mod dispatch;
pub mod manager;
pub mod sync;

pub use dispatch::{DispatchOutcome, Dispatcher};
pub use manager::SandboxManager;
pub use sync::{SyncEngine, SyncReport, SKIP_SUBSTRINGS, SYNC_PATTERNS};
