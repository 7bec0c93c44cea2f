//! Worktree lifecycle management and session coordination.
//!
//! `WorktreeManager` owns the git plumbing for one repository;
//! `WorktreeCoordinator` tracks one manager per discovered project plus the
//! in-memory session registry. Session associations are deliberately not
//! persisted; they are rebuilt from live multiplexer state after a restart.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{debug, info, warn};

use crate::error::{CoreError, Result};
use crate::git::{parse_worktree_list, CommandGitClient, GitClient};
use crate::types::{Project, Worktree};

pub struct WorktreeManager<G: GitClient> {
    project_path: String,
    git: G,
}

impl WorktreeManager<CommandGitClient> {
    pub fn new(project_path: impl Into<String>) -> Self {
        Self::with_client(project_path, CommandGitClient)
    }
}

impl<G: GitClient> WorktreeManager<G> {
    pub fn with_client(project_path: impl Into<String>, git: G) -> Self {
        Self {
            project_path: project_path.into(),
            git,
        }
    }

    pub fn project_path(&self) -> &str {
        &self.project_path
    }

    /// Enumerates worktrees for the project. A repository where the worktree
    /// command fails (not a git repo, old git) yields an empty list.
    pub fn list_worktrees(&self) -> Result<Vec<Worktree>> {
        match self
            .git
            .run(&self.project_path, &["worktree", "list", "--porcelain"])
        {
            Ok(output) => Ok(parse_worktree_list(&output)),
            Err(err) => {
                debug!(project = %self.project_path, error = %err, "Worktree listing failed, treating as empty");
                Ok(Vec::new())
            }
        }
    }

    pub fn create_worktree(&self, path: &str, branch: &str) -> Result<Worktree> {
        self.git
            .run(&self.project_path, &["worktree", "add", path, branch])?;
        Ok(Worktree {
            id: path.to_string(),
            path: path.to_string(),
            branch: branch.to_string(),
            head: String::new(),
            is_prunable: false,
        })
    }

    pub fn remove_worktree(&self, path: &str) -> Result<()> {
        self.git
            .run(&self.project_path, &["worktree", "remove", path])?;
        Ok(())
    }

    /// Removes worktrees whose branch has been merged into the main
    /// checkout, then deletes the branch. The main repository worktree is
    /// never touched.
    pub fn cleanup_merged_worktrees(&self) -> Result<()> {
        let merged_output = self.git.run(&self.project_path, &["branch", "--merged"])?;
        let merged: Vec<&str> = merged_output
            .lines()
            .map(|line| line.trim_start_matches('*').trim())
            .filter(|name| !name.is_empty() && !name.starts_with('('))
            .collect();

        let current = merged_output
            .lines()
            .find_map(|line| line.strip_prefix('*'))
            .map(|name| name.trim().to_string())
            .unwrap_or_default();

        for worktree in self.list_worktrees()? {
            if worktree.path == self.project_path || worktree.branch.is_empty() {
                continue;
            }
            if worktree.branch == current || !merged.contains(&worktree.branch.as_str()) {
                continue;
            }

            info!(
                project = %self.project_path,
                worktree = %worktree.path,
                branch = %worktree.branch,
                "Removing merged worktree"
            );
            self.remove_worktree(&worktree.path)?;
            if let Err(err) = self
                .git
                .run(&self.project_path, &["branch", "-d", &worktree.branch])
            {
                warn!(branch = %worktree.branch, error = %err, "Failed to delete merged branch");
            }
        }

        Ok(())
    }
}

/// Coordinates worktree managers across all discovered projects and tracks
/// which terminal sessions are registered against each worktree.
pub struct WorktreeCoordinator<G: GitClient + Clone> {
    git: G,
    // project path -> manager
    managers: RwLock<HashMap<String, WorktreeManager<G>>>,
    // worktree id (branch name) -> session ids
    sessions: RwLock<HashMap<String, Vec<String>>>,
    shutdown: Arc<AtomicBool>,
}

impl WorktreeCoordinator<CommandGitClient> {
    pub fn new() -> Self {
        Self::with_client(CommandGitClient)
    }
}

impl Default for WorktreeCoordinator<CommandGitClient> {
    fn default() -> Self {
        Self::new()
    }
}

impl<G: GitClient + Clone> WorktreeCoordinator<G> {
    pub fn with_client(git: G) -> Self {
        Self {
            git,
            managers: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Scans each project for existing worktrees and seeds an empty session
    /// list per discovered worktree, keyed by branch name. One project's
    /// failure never aborts the scan.
    pub fn discover_worktrees(&self, projects: &[Project]) -> Result<()> {
        info!(count = projects.len(), "Discovering worktrees across projects");

        let mut managers = self
            .managers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        for project in projects {
            let manager = WorktreeManager::with_client(project.path.clone(), self.git.clone());

            let worktrees = match manager.list_worktrees() {
                Ok(worktrees) => worktrees,
                Err(err) => {
                    warn!(project = %project.name, error = %err, "Failed to list worktrees");
                    managers.insert(project.path.clone(), manager);
                    continue;
                }
            };

            debug!(project = %project.name, count = worktrees.len(), "Found worktrees");
            for worktree in &worktrees {
                if !worktree.branch.is_empty() {
                    sessions.entry(worktree.branch.clone()).or_default();
                }
            }
            managers.insert(project.path.clone(), manager);
        }

        Ok(())
    }

    /// Associates a terminal session with a worktree. The worktree must
    /// resolve against the project's current worktree list before anything
    /// is recorded, so a failed call leaves no partial registration.
    pub fn register_session(
        &self,
        worktree_id: &str,
        session_id: &str,
        project_path: &str,
        shell_kind: &str,
    ) -> Result<()> {
        let worktree_path = {
            let managers = self
                .managers
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let manager = managers
                .get(project_path)
                .ok_or_else(|| CoreError::ProjectNotFound(project_path.to_string()))?;

            manager
                .list_worktrees()?
                .into_iter()
                .find(|wt| wt.branch == worktree_id || wt.path == worktree_id)
                .map(|wt| wt.path)
                .ok_or_else(|| CoreError::WorktreeNotFound(worktree_id.to_string()))?
        };

        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        sessions
            .entry(worktree_id.to_string())
            .or_default()
            .push(session_id.to_string());

        debug!(
            worktree = %worktree_id,
            session = %session_id,
            path = %worktree_path,
            shell = %shell_kind,
            "Registered session"
        );
        Ok(())
    }

    /// Returns all session ids registered against a worktree. Unknown
    /// worktrees yield an empty vec.
    pub fn worktree_sessions(&self, worktree_id: &str) -> Vec<String> {
        self.sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(worktree_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Runs `f` against the manager for `project_path`, if one is tracked.
    pub fn with_manager<R>(
        &self,
        project_path: &str,
        f: impl FnOnce(&WorktreeManager<G>) -> R,
    ) -> Option<R> {
        let managers = self
            .managers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        managers.get(project_path).map(f)
    }

    /// Prunes merged worktrees across every tracked project. Per-project
    /// failures are logged so one bad repository cannot block the rest.
    pub fn cleanup_merged_worktrees(&self) -> Result<()> {
        let project_paths: Vec<String> = {
            let managers = self
                .managers
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            managers.keys().cloned().collect()
        };

        for path in project_paths {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            let result = self.with_manager(&path, |manager| manager.cleanup_merged_worktrees());
            if let Some(Err(err)) = result {
                warn!(project = %path, error = %err, "Failed to cleanup merged worktrees");
            }
        }

        Ok(())
    }

    /// Handle background workers can watch for shutdown.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}
