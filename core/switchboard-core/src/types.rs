//! Shared domain types for the coordination engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Aggregate status flag for a project or worktree. Persisted as text;
/// `Normal` is the neutral default and is what an absent row decodes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    #[default]
    Normal,
    Blocked,
    Testing,
    Idle,
    Active,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Normal => "normal",
            ProjectStatus::Blocked => "blocked",
            ProjectStatus::Testing => "testing",
            ProjectStatus::Idle => "idle",
            ProjectStatus::Active => "active",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "normal" | "" => Some(ProjectStatus::Normal),
            "blocked" => Some(ProjectStatus::Blocked),
            "testing" => Some(ProjectStatus::Testing),
            "idle" => Some(ProjectStatus::Idle),
            "active" => Some(ProjectStatus::Active),
            _ => None,
        }
    }
}

/// A discovered repository root. Re-scanned on restart, never deleted
/// during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub status: ProjectStatus,
    #[serde(default)]
    pub purpose: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl Project {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            status: ProjectStatus::Normal,
            purpose: None,
            dependencies: Vec::new(),
        }
    }
}

/// A git ref as reported by branch enumeration. Derived fresh on every
/// query, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchInfo {
    pub name: String,
    pub full_name: String,
    /// Empty for local branches.
    pub remote: String,
    pub is_current: bool,
    pub is_remote_only: bool,
    pub commit_hash: String,
    /// Set when a live worktree is checked out on this branch.
    pub worktree_path: Option<String>,
}

/// Display model for a branch, produced by `BranchService::to_branch`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branch {
    pub display_name: String,
    pub name: String,
    pub full_name: String,
    pub remote: String,
    pub is_current: bool,
    pub is_remote_only: bool,
    pub commit_hash: String,
    pub worktree: Option<Worktree>,
}

/// A git worktree instance. Existence is authoritative from the VCS tool
/// and not cached beyond a single discovery pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Worktree {
    /// The worktree's filesystem path doubles as its identifier.
    pub id: String,
    pub path: String,
    pub branch: String,
    pub head: String,
    pub is_prunable: bool,
}

/// Energy/focus/stress scalars plus categorical labels, updated from
/// external health-tracking input. Defaults are mid-scale neutral.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthState {
    pub energy: u8,
    pub focus: u8,
    pub stress: u8,
    pub mood: String,
    pub capacity: String,
}

impl Default for HealthState {
    fn default() -> Self {
        Self {
            energy: 5,
            focus: 5,
            stress: 5,
            mood: "neutral".to_string(),
            capacity: "medium".to_string(),
        }
    }
}

/// A persisted status row, as returned by bulk loads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusRecord {
    pub project_path: String,
    pub worktree_id: Option<String>,
    pub status: ProjectStatus,
    pub updated_at: DateTime<Utc>,
}
