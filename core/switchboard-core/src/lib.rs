//! # switchboard-core
//!
//! Core library for Switchboard: worktree-aware status coordination for
//! terminal-based assistant sessions.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime. Background work runs on plain
//!   threads that talk to the caller over channels.
//! - **Graceful degradation**: A failing repository, pane, or store call
//!   costs one project or pane one cycle, never the process.
//! - **Narrow tool seams**: All external processes (git, the terminal
//!   multiplexer) sit behind traits so coordination logic tests against
//!   fakes.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use switchboard_core::{StatusStore, WorktreeCoordinator};
//!
//! let store = StatusStore::new(&db_path)?;
//! let coordinator = WorktreeCoordinator::new();
//! coordinator.discover_worktrees(&projects)?;
//! ```

pub mod activity;
pub mod config;
pub mod error;
pub mod git;
pub mod recommend;
pub mod store;
pub mod types;
pub mod worktree;

pub use activity::{
    ActivityMonitor, ActivitySignal, CommandMultiplexerClient, MultiplexerClient,
    PaneActivityState, PaneInfo, PaneState, PaneUpdate, TrackedPane,
};
pub use config::{load_config, save_config, EngineConfig};
pub use error::{CoreError, Result};
pub use git::{BranchService, CommandGitClient, GitClient};
pub use recommend::{Priority, Recommendation, RecommendationEngine};
pub use store::StatusStore;
pub use types::{Branch, BranchInfo, HealthState, Project, ProjectStatus, StatusRecord, Worktree};
pub use worktree::{WorktreeCoordinator, WorktreeManager};
