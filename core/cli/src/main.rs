//! Switchboard CLI entrypoint.
//!
//! Three thin commands over the core library: `run` hosts the engine,
//! `switch` focuses or launches an assistant pane in the current
//! multiplexer session, and `status` prints persisted statuses.

use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use switchboard_core::activity::{CommandMultiplexerClient, MultiplexerClient};
use switchboard_core::{config, BranchService, StatusStore};

mod engine;

const ASSISTANT_LAUNCH_COMMAND: &str = "claude";

#[derive(Parser)]
#[command(name = "switchboard", about = "Worktree-aware status coordination for assistant sessions", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Host the coordination engine until interrupted
    Run,
    /// Focus an existing assistant pane in the current session, or launch one
    Switch,
    /// Print persisted project and worktree statuses
    Status {
        /// Limit output to one project path
        #[arg(long)]
        project: Option<String>,
    },
    /// Print ranked focus recommendations
    Recommend,
    /// List actionable branches for a repository: worktree-backed locals
    /// and remote-only branches
    Branches {
        /// Repository path; defaults to the current directory
        #[arg(long)]
        repo: Option<String>,
    },
}

static SHUTDOWN: OnceLock<Arc<AtomicBool>> = OnceLock::new();

extern "C" fn handle_signal(_: libc::c_int) {
    if let Some(flag) = SHUTDOWN.get() {
        flag.store(true, Ordering::SeqCst);
    }
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Run => {
            let shutdown = Arc::new(AtomicBool::new(false));
            let _ = SHUTDOWN.set(Arc::clone(&shutdown));
            unsafe {
                libc::signal(libc::SIGINT, handle_signal as libc::sighandler_t);
                libc::signal(libc::SIGTERM, handle_signal as libc::sighandler_t);
            }
            engine::run(shutdown)
        }
        Commands::Switch => switch_mode(),
        Commands::Status { project } => print_status(project.as_deref()),
        Commands::Recommend => engine::print_recommendations(),
        Commands::Branches { repo } => print_branches(repo.as_deref()),
    };
    std::process::exit(code);
}

fn init_logging() {
    let debug_enabled = std::env::var("SWITCHBOARD_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Focuses the first assistant pane in the current multiplexer session;
/// launches a new window running the assistant when none exists.
fn switch_mode() -> i32 {
    let current_session = match tmux_output(&["display-message", "-p", "#{session_name}"]) {
        Ok(session) => session.trim().to_string(),
        Err(err) => {
            error!(error = %err, "Not inside a multiplexer session");
            return 1;
        }
    };

    let mux = CommandMultiplexerClient::default();
    let panes = match mux.list_panes() {
        Ok(panes) => panes,
        Err(err) => {
            error!(error = %err, "Pane enumeration failed");
            return 1;
        }
    };

    let existing = panes
        .iter()
        .find(|pane| pane.session == current_session && pane.command == ASSISTANT_LAUNCH_COMMAND);

    match existing {
        Some(pane) => {
            let window_target = format!("{}:{}", pane.session, pane.window);
            if let Err(err) = tmux_output(&["select-window", "-t", &window_target])
                .and_then(|_| tmux_output(&["select-pane", "-t", &pane.id]))
            {
                error!(pane = %pane.id, error = %err, "Failed to focus pane");
                return 1;
            }
            info!(pane = %pane.id, "Focused existing assistant pane");
            0
        }
        None => {
            if let Err(err) = tmux_output(&["new-window", ASSISTANT_LAUNCH_COMMAND]) {
                error!(error = %err, "Failed to launch assistant window");
                return 1;
            }
            info!(session = %current_session, "Launched new assistant window");
            0
        }
    }
}

fn print_status(project_filter: Option<&str>) -> i32 {
    let cfg = match config::load_config() {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "Failed to load configuration");
            return 1;
        }
    };
    let db_path = match engine::resolve_db_path(&cfg) {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve database path");
            return 1;
        }
    };
    let store = match StatusStore::new(db_path) {
        Ok(store) => store,
        Err(err) => {
            error!(error = %err, "Failed to open status store");
            return 1;
        }
    };

    let records = match store.load_project_records() {
        Ok(records) => records,
        Err(err) => {
            error!(error = %err, "Failed to load project statuses");
            return 1;
        }
    };
    let worktrees = match store.load_all_worktree_statuses() {
        Ok(statuses) => statuses,
        Err(err) => {
            error!(error = %err, "Failed to load worktree statuses");
            return 1;
        }
    };

    for record in records
        .iter()
        .filter(|record| project_filter.map_or(true, |filter| filter == record.project_path))
    {
        println!(
            "{}\t{}\t{}",
            record.project_path,
            record.status.as_str(),
            record.updated_at.to_rfc3339()
        );
        if let Some(worktree_statuses) = worktrees.get(&record.project_path) {
            let mut ids: Vec<&String> = worktree_statuses.keys().collect();
            ids.sort();
            for id in ids {
                println!("  {}\t{}", id, worktree_statuses[id].as_str());
            }
        }
    }
    0
}

fn print_branches(repo: Option<&str>) -> i32 {
    let repo_path = match repo {
        Some(path) => path.to_string(),
        None => match std::env::current_dir() {
            Ok(dir) => dir.to_string_lossy().to_string(),
            Err(err) => {
                error!(error = %err, "Failed to resolve current directory");
                return 1;
            }
        },
    };

    let service = BranchService::new(repo_path);
    if let Err(err) = service.fetch_from_remote() {
        // No remote configured is an everyday case; the local picture is
        // still useful.
        tracing::debug!(error = %err, "Fetch skipped");
    }

    let branches = match service.list_remote_branches_and_worktrees() {
        Ok(branches) => branches,
        Err(err) => {
            error!(error = %err, "Failed to list branches");
            return 1;
        }
    };

    for info in &branches {
        let branch = service.to_branch(info);
        match &branch.worktree {
            Some(worktree) => println!("{}\t{}", branch.display_name, worktree.path),
            None => println!("{}\t(no worktree)", branch.display_name),
        }
    }
    0
}

fn tmux_output(args: &[&str]) -> Result<String, String> {
    let output = Command::new("tmux")
        .args(args)
        .output()
        .map_err(|err| err.to_string())?;
    if !output.status.success() {
        return Err(String::from_utf8_lossy(&output.stderr).trim().to_string());
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}
