//! Git branch discovery and worktree association for one repository.
//!
//! All git access goes through the narrow `GitClient` trait so the
//! filtering logic can be exercised with canned output instead of real
//! processes.

use std::process::Command;

use tracing::{debug, warn};

use crate::error::{CoreError, Result};
use crate::types::{Branch, BranchInfo, Worktree};

pub trait GitClient: Send + Sync {
    /// Runs a git subcommand against `repo_path` and returns stdout.
    fn run(&self, repo_path: &str, args: &[&str]) -> Result<String>;
}

#[derive(Debug, Clone, Default)]
pub struct CommandGitClient;

impl GitClient for CommandGitClient {
    fn run(&self, repo_path: &str, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .arg("-C")
            .arg(repo_path)
            .args(args)
            .output()
            .map_err(|err| CoreError::ToolFailed {
                command: format!("git {}", args.join(" ")),
                details: err.to_string(),
            })?;

        if !output.status.success() {
            return Err(CoreError::ToolFailed {
                command: format!("git {}", args.join(" ")),
                details: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

pub struct BranchService<G: GitClient> {
    repo_path: String,
    git: G,
}

impl BranchService<CommandGitClient> {
    pub fn new(repo_path: impl Into<String>) -> Self {
        Self::with_client(repo_path, CommandGitClient)
    }
}

impl<G: GitClient> BranchService<G> {
    pub fn with_client(repo_path: impl Into<String>, git: G) -> Self {
        Self {
            repo_path: repo_path.into(),
            git,
        }
    }

    pub fn repo_path(&self) -> &str {
        &self.repo_path
    }

    /// Name of the branch checked out in the main repository.
    pub fn current_branch(&self) -> Result<String> {
        let output = self
            .git
            .run(&self.repo_path, &["rev-parse", "--abbrev-ref", "HEAD"])?;
        Ok(output.trim().to_string())
    }

    /// Best-effort sync with the remote. A missing remote is reported as a
    /// tool failure the caller may ignore.
    pub fn fetch_from_remote(&self) -> Result<()> {
        debug!(repo = %self.repo_path, "Fetching from remote");
        self.git.run(&self.repo_path, &["fetch", "--prune"])?;
        Ok(())
    }

    /// Enumerates local and remote branches, marking the current checkout
    /// and remote-only refs. Remote HEAD pointers are skipped.
    pub fn list_all_branches(&self) -> Result<Vec<BranchInfo>> {
        let output = self.git.run(
            &self.repo_path,
            &[
                "branch",
                "-a",
                "--format=%(refname)\t%(objectname:short)\t%(HEAD)",
            ],
        )?;

        let mut branches = Vec::new();
        for line in output.lines() {
            if line.is_empty() {
                continue;
            }
            let parts: Vec<&str> = line.split('\t').collect();
            if parts.len() < 2 {
                warn!(line = %line, "Skipping unparseable branch line");
                continue;
            }
            let refname = parts[0];
            let commit_hash = parts[1].to_string();
            let is_current = parts.get(2) == Some(&"*");

            if let Some(name) = refname.strip_prefix("refs/heads/") {
                branches.push(BranchInfo {
                    name: name.to_string(),
                    full_name: refname.to_string(),
                    remote: String::new(),
                    is_current,
                    is_remote_only: false,
                    commit_hash,
                    worktree_path: None,
                });
            } else if let Some(remote_branch) = refname.strip_prefix("refs/remotes/") {
                let Some((remote, name)) = remote_branch.split_once('/') else {
                    continue;
                };
                if name == "HEAD" {
                    continue;
                }
                branches.push(BranchInfo {
                    name: name.to_string(),
                    full_name: refname.to_string(),
                    remote: remote.to_string(),
                    is_current,
                    is_remote_only: true,
                    commit_hash,
                    worktree_path: None,
                });
            }
        }

        debug!(repo = %self.repo_path, count = branches.len(), "Discovered branches");
        Ok(branches)
    }

    /// Attaches worktree paths to local branches in place.
    pub fn attach_worktrees(&self, branches: &mut [BranchInfo]) -> Result<()> {
        let output = self
            .git
            .run(&self.repo_path, &["worktree", "list", "--porcelain"])?;
        let worktrees = parse_worktree_list(&output);

        for branch in branches.iter_mut() {
            if branch.is_remote_only {
                continue;
            }
            if let Some(worktree) = worktrees.iter().find(|wt| wt.branch == branch.name) {
                branch.worktree_path = Some(worktree.path.clone());
            }
        }
        Ok(())
    }

    /// Branches a user can act on: locals with a live worktree (the main
    /// repo checkout excluded) and genuinely remote-only branches. Local
    /// branches with no worktree are stale noise and are dropped, as is the
    /// remote counterpart of the current branch.
    pub fn list_remote_branches_and_worktrees(&self) -> Result<Vec<BranchInfo>> {
        let current_branch = match self.current_branch() {
            Ok(branch) => branch,
            Err(err) => {
                warn!(repo = %self.repo_path, error = %err, "Failed to get current branch");
                String::new()
            }
        };

        let mut branches = self.list_all_branches()?;
        self.attach_worktrees(&mut branches)?;

        let filtered: Vec<BranchInfo> = branches
            .into_iter()
            .filter(|branch| {
                if branch.is_remote_only {
                    current_branch.is_empty() || branch.name != current_branch
                } else {
                    branch
                        .worktree_path
                        .as_deref()
                        .is_some_and(|path| path != self.repo_path)
                }
            })
            .collect();

        debug!(
            repo = %self.repo_path,
            current_branch = %current_branch,
            filtered = filtered.len(),
            "Filtered to remote branches and worktrees"
        );
        Ok(filtered)
    }

    /// Remote branches with no local counterpart, i.e. candidates for a
    /// fresh worktree.
    pub fn remote_branches_without_worktrees(&self) -> Result<Vec<BranchInfo>> {
        let mut branches = self.list_all_branches()?;
        self.attach_worktrees(&mut branches)?;

        let local_names: Vec<&str> = branches
            .iter()
            .filter(|branch| !branch.is_remote_only)
            .map(|branch| branch.name.as_str())
            .collect();

        Ok(branches
            .iter()
            .filter(|branch| branch.is_remote_only && !local_names.contains(&branch.name.as_str()))
            .cloned()
            .collect())
    }

    /// Creates a worktree under `.worktrees/<name>`, branching off the
    /// remote when the ref is remote-only. Returns the worktree path.
    pub fn create_worktree_for_branch(
        &self,
        branch: &BranchInfo,
        worktree_name: &str,
    ) -> Result<String> {
        let worktree_path = format!("{}/.worktrees/{}", self.repo_path, worktree_name);

        if branch.is_remote_only {
            let remote_ref = format!("{}/{}", branch.remote, branch.name);
            self.git.run(
                &self.repo_path,
                &[
                    "worktree",
                    "add",
                    "-b",
                    &branch.name,
                    &worktree_path,
                    &remote_ref,
                ],
            )?;
        } else {
            self.git.run(
                &self.repo_path,
                &["worktree", "add", &worktree_path, &branch.name],
            )?;
        }

        debug!(path = %worktree_path, branch = %branch.name, "Created worktree");
        Ok(worktree_path)
    }

    /// Pure display mapping: `name` for local branches, `remote/name` for
    /// remote-only ones.
    pub fn to_branch(&self, info: &BranchInfo) -> Branch {
        let display_name = if info.is_remote_only {
            format!("{}/{}", info.remote, info.name)
        } else {
            info.name.clone()
        };

        let worktree = info
            .worktree_path
            .as_deref()
            .filter(|path| *path != self.repo_path)
            .map(|path| Worktree {
                id: path.to_string(),
                path: path.to_string(),
                branch: info.name.clone(),
                head: info.commit_hash.clone(),
                is_prunable: false,
            });

        Branch {
            display_name,
            name: info.name.clone(),
            full_name: info.full_name.clone(),
            remote: info.remote.clone(),
            is_current: info.is_current,
            is_remote_only: info.is_remote_only,
            commit_hash: info.commit_hash.clone(),
            worktree,
        }
    }
}

/// Parses `git worktree list --porcelain`: blank-line-delimited records of
/// `worktree <path>`, `HEAD <hash>`, `branch <ref>` lines. Branch refs carry
/// the `refs/heads/` prefix, stripped here for display.
pub fn parse_worktree_list(output: &str) -> Vec<Worktree> {
    let mut worktrees = Vec::new();
    let mut current: Option<Worktree> = None;

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            if let Some(worktree) = current.take() {
                worktrees.push(worktree);
            }
            continue;
        }

        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(worktree) = current.take() {
                worktrees.push(worktree);
            }
            current = Some(Worktree {
                id: path.to_string(),
                path: path.to_string(),
                branch: String::new(),
                head: String::new(),
                is_prunable: false,
            });
        } else if let Some(branch_ref) = line.strip_prefix("branch ") {
            if let Some(worktree) = current.as_mut() {
                worktree.branch = branch_ref
                    .strip_prefix("refs/heads/")
                    .unwrap_or(branch_ref)
                    .to_string();
            }
        } else if let Some(head) = line.strip_prefix("HEAD ") {
            if let Some(worktree) = current.as_mut() {
                worktree.head = head.to_string();
            }
        } else if line == "prunable" || line.starts_with("prunable ") {
            if let Some(worktree) = current.as_mut() {
                worktree.is_prunable = true;
            }
        }
    }

    if let Some(worktree) = current {
        worktrees.push(worktree);
    }

    worktrees
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Maps the first argument of each git invocation to canned stdout.
    struct FakeGit {
        responses: HashMap<&'static str, String>,
    }

    impl FakeGit {
        fn new(entries: &[(&'static str, &str)]) -> Self {
            Self {
                responses: entries
                    .iter()
                    .map(|(key, value)| (*key, value.to_string()))
                    .collect(),
            }
        }
    }

    impl GitClient for FakeGit {
        fn run(&self, _repo_path: &str, args: &[&str]) -> Result<String> {
            let key = match args.first() {
                Some(&"rev-parse") => "rev-parse",
                Some(&"branch") => "branch",
                Some(&"worktree") => "worktree",
                Some(&"fetch") => "fetch",
                other => panic!("unexpected git invocation: {:?}", other),
            };
            self.responses
                .get(key)
                .cloned()
                .ok_or_else(|| CoreError::ToolFailed {
                    command: format!("git {}", args.join(" ")),
                    details: "no canned response".to_string(),
                })
        }
    }

    fn service(git: FakeGit) -> BranchService<FakeGit> {
        BranchService::with_client("/repo/main", git)
    }

    #[test]
    fn parses_local_and_remote_branches() {
        let git = FakeGit::new(&[(
            "branch",
            "refs/heads/main\tabc123\t*\n\
             refs/heads/feature-x\tdef456\t\n\
             refs/remotes/origin/feature-y\t789abc\t\n\
             refs/remotes/origin/HEAD\t789abc\t\n",
        )]);
        let branches = service(git).list_all_branches().expect("list");

        assert_eq!(branches.len(), 3);
        assert!(branches[0].is_current);
        assert_eq!(branches[0].name, "main");
        assert!(!branches[1].is_remote_only);
        assert_eq!(branches[2].remote, "origin");
        assert!(branches[2].is_remote_only);
    }

    #[test]
    fn attach_worktrees_maps_paths_to_local_branches() {
        let git = FakeGit::new(&[(
            "worktree",
            "worktree /repo/main\n\
             HEAD abc123\n\
             branch refs/heads/main\n\
             \n\
             worktree /repo/main/.worktrees/feature-x\n\
             HEAD def456\n\
             branch refs/heads/feature-x\n",
        )]);
        let mut branches = vec![
            BranchInfo {
                name: "feature-x".to_string(),
                full_name: "refs/heads/feature-x".to_string(),
                remote: String::new(),
                is_current: false,
                is_remote_only: false,
                commit_hash: "def456".to_string(),
                worktree_path: None,
            },
            BranchInfo {
                name: "feature-x".to_string(),
                full_name: "refs/remotes/origin/feature-x".to_string(),
                remote: "origin".to_string(),
                is_current: false,
                is_remote_only: true,
                commit_hash: "def456".to_string(),
                worktree_path: None,
            },
        ];

        service(git).attach_worktrees(&mut branches).expect("attach");

        assert_eq!(
            branches[0].worktree_path.as_deref(),
            Some("/repo/main/.worktrees/feature-x")
        );
        // Remote-only refs never get a worktree attached.
        assert!(branches[1].worktree_path.is_none());
    }

    #[test]
    fn filter_excludes_stale_locals_and_includes_worktree_backed_branches() {
        let git = FakeGit::new(&[
            ("rev-parse", "main\n"),
            (
                "branch",
                "refs/heads/main\tabc123\t*\n\
                 refs/heads/stale\t111111\t\n\
                 refs/heads/active-wt\t222222\t\n\
                 refs/remotes/origin/main\tabc123\t\n\
                 refs/remotes/origin/fresh\t333333\t\n",
            ),
            (
                "worktree",
                "worktree /repo/main\n\
                 HEAD abc123\n\
                 branch refs/heads/main\n\
                 \n\
                 worktree /repo/main/.worktrees/active-wt\n\
                 HEAD 222222\n\
                 branch refs/heads/active-wt\n",
            ),
        ]);

        let filtered = service(git)
            .list_remote_branches_and_worktrees()
            .expect("filter");
        let names: Vec<&str> = filtered.iter().map(|b| b.name.as_str()).collect();

        assert!(names.contains(&"active-wt"), "worktree-backed local kept");
        assert!(names.contains(&"fresh"), "remote-only branch kept");
        assert!(!names.contains(&"stale"), "stale local dropped");
        // origin/main matches the current checkout and the main repo path.
        assert_eq!(names.iter().filter(|name| **name == "main").count(), 0);
    }

    #[test]
    fn remote_branches_without_worktrees_excludes_tracked_locals() {
        let git = FakeGit::new(&[
            (
                "branch",
                "refs/heads/feature-x\tdef456\t\n\
                 refs/remotes/origin/feature-x\tdef456\t\n\
                 refs/remotes/origin/fresh\t333333\t\n",
            ),
            ("worktree", "worktree /repo/main\nHEAD abc123\nbranch refs/heads/main\n"),
        ]);

        let available = service(git)
            .remote_branches_without_worktrees()
            .expect("available");
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].name, "fresh");
    }

    #[test]
    fn display_name_prefixes_remote_for_remote_only_branches() {
        let git = FakeGit::new(&[]);
        let service = service(git);

        let local = BranchInfo {
            name: "feature-x".to_string(),
            full_name: "refs/heads/feature-x".to_string(),
            remote: String::new(),
            is_current: false,
            is_remote_only: false,
            commit_hash: "def456".to_string(),
            worktree_path: Some("/repo/main/.worktrees/feature-x".to_string()),
        };
        let remote = BranchInfo {
            name: "fresh".to_string(),
            full_name: "refs/remotes/origin/fresh".to_string(),
            remote: "origin".to_string(),
            is_current: false,
            is_remote_only: true,
            commit_hash: "333333".to_string(),
            worktree_path: None,
        };

        assert_eq!(service.to_branch(&local).display_name, "feature-x");
        assert!(service.to_branch(&local).worktree.is_some());
        assert_eq!(service.to_branch(&remote).display_name, "origin/fresh");
        assert!(service.to_branch(&remote).worktree.is_none());
    }

    #[test]
    fn worktree_parser_handles_prunable_and_missing_branch() {
        let parsed = parse_worktree_list(
            "worktree /repo/main\n\
             HEAD abc123\n\
             branch refs/heads/main\n\
             \n\
             worktree /repo/main/.worktrees/orphan\n\
             HEAD def456\n\
             detached\n\
             prunable gitdir file points to non-existent location\n",
        );

        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].branch, "main");
        assert_eq!(parsed[1].branch, "");
        assert!(parsed[1].is_prunable);
    }

    #[test]
    fn worktree_parser_returns_empty_for_empty_output() {
        assert!(parse_worktree_list("").is_empty());
    }
}
