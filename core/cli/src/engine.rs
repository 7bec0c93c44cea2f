//! The engine host: workers, event fusion, and shutdown.
//!
//! All components are explicit instances wired together here; background
//! workers communicate with the single fusion loop over one mpsc channel
//! and never mutate loop state directly.

use std::io::Read;
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use fs_err as fs;
use tracing::{debug, error, info, warn};

use switchboard_core::activity::{ActivityMonitor, CommandMultiplexerClient, PaneInfo, PaneState, PaneUpdate, TrackedPane};
use switchboard_core::{
    config, EngineConfig, HealthState, Project, ProjectStatus, RecommendationEngine, StatusStore,
    WorktreeCoordinator,
};
use switchboard_notify_protocol::{parse_event, NotificationEvent, MAX_EVENT_BYTES};

const NOTIFY_SOCKET_NAME: &str = "notify.sock";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
/// Commands whose panes are treated as assistant panes.
const ASSISTANT_COMMANDS: &[&str] = &["claude"];

/// Messages consumed by the fusion loop. Producers are the pane monitor,
/// the notify socket listener, and the periodic tickers.
#[derive(Debug)]
pub enum EngineEvent {
    Pane(PaneUpdate),
    Notification(NotificationEvent),
    PaneRefreshTick,
    RecommendationTick,
    CleanupTick,
    /// Completion message from the cleanup worker; carries the failure
    /// text when the pass failed.
    CleanupDone(Option<String>),
}

pub fn run(shutdown: Arc<AtomicBool>) -> i32 {
    let cfg = match config::load_config() {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "Failed to load configuration");
            return 1;
        }
    };

    let db_path = match resolve_db_path(&cfg) {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve database path");
            return 1;
        }
    };
    let store = match StatusStore::new(db_path.clone()) {
        Ok(store) => store,
        Err(err) => {
            error!(error = %err, "Failed to initialize status store");
            return 1;
        }
    };

    let projects = discover_projects(&cfg);
    info!(count = projects.len(), "Discovered projects");

    let coordinator = Arc::new(WorktreeCoordinator::new());
    if let Err(err) = coordinator.discover_worktrees(&projects) {
        warn!(error = %err, "Worktree discovery failed");
    }

    let monitor = Arc::new(ActivityMonitor::new(CommandMultiplexerClient::default()));
    refresh_panes(&monitor, &projects);

    let (tx, rx) = mpsc::channel();
    let mut workers = Vec::new();

    workers.push(forward_pane_updates(monitor.subscribe(), tx.clone(), Arc::clone(&shutdown)));
    workers.push(monitor.spawn_poller(cfg.scan_interval()));
    workers.push(spawn_ticker(
        tx.clone(),
        cfg.scan_interval() * 10,
        Arc::clone(&shutdown),
        || EngineEvent::PaneRefreshTick,
    ));
    workers.push(spawn_ticker(
        tx.clone(),
        cfg.recommendation_interval(),
        Arc::clone(&shutdown),
        || EngineEvent::RecommendationTick,
    ));
    workers.push(spawn_ticker(
        tx.clone(),
        cfg.cleanup_interval(),
        Arc::clone(&shutdown),
        || EngineEvent::CleanupTick,
    ));

    let tx_loop = tx.clone();
    match spawn_notify_listener(tx, Arc::clone(&shutdown)) {
        Ok(handle) => workers.push(handle),
        Err(err) => warn!(error = %err, "Notify socket unavailable; notification events disabled"),
    }

    info!(db = %db_path.display(), "Switchboard engine started");
    fusion_loop(
        rx,
        tx_loop,
        &store,
        &coordinator,
        &monitor,
        &projects,
        &shutdown,
    );

    info!("Shutting down");
    monitor.shutdown();
    coordinator.shutdown();
    join_with_grace(workers, SHUTDOWN_GRACE);
    0
}

/// Drains engine events until shutdown. Store writes stop the moment the
/// flag is set.
fn fusion_loop(
    rx: Receiver<EngineEvent>,
    tx: Sender<EngineEvent>,
    store: &StatusStore,
    coordinator: &Arc<WorktreeCoordinator<switchboard_core::CommandGitClient>>,
    monitor: &ActivityMonitor<CommandMultiplexerClient>,
    projects: &[Project],
    shutdown: &AtomicBool,
) {
    let recommender = RecommendationEngine::new();
    let health = HealthState::default();
    let mut cleanup_in_flight = false;

    while !shutdown.load(Ordering::SeqCst) {
        let event = match rx.recv_timeout(Duration::from_millis(250)) {
            Ok(event) => event,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        };
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        match event {
            EngineEvent::Pane(update) => {
                let project = monitor
                    .project_for_pane(&update.pane_id)
                    .and_then(|path| projects.iter().find(|p| p.path == path));
                if let Some(project) = project {
                    persist_pane_state(store, project, update.state);
                }
            }
            EngineEvent::Notification(event) => monitor.apply_notification(&event),
            EngineEvent::PaneRefreshTick => refresh_panes(monitor, projects),
            EngineEvent::RecommendationTick => {
                let ranked = rank_projects(store, projects, &recommender, &health);
                if let Some(top) = ranked.first() {
                    info!(
                        project = %top.project.name,
                        priority = ?top.priority,
                        reasoning = %top.reasoning,
                        "Top recommendation"
                    );
                }
            }
            EngineEvent::CleanupTick => {
                if cleanup_in_flight {
                    debug!("Previous cleanup pass still running; skipping tick");
                } else {
                    cleanup_in_flight = true;
                    let _ = spawn_cleanup(Arc::clone(coordinator), tx.clone());
                }
            }
            EngineEvent::CleanupDone(failure) => {
                cleanup_in_flight = false;
                match failure {
                    Some(details) => warn!(error = %details, "Worktree cleanup failed"),
                    None => debug!("Worktree cleanup pass completed"),
                }
            }
        }
    }
}

/// Runs one merged-worktree cleanup pass off the fusion loop so a slow
/// repository cannot stall pane and notification handling. Completion is
/// reported back through the engine channel.
fn spawn_cleanup<G>(
    coordinator: Arc<WorktreeCoordinator<G>>,
    tx: Sender<EngineEvent>,
) -> JoinHandle<()>
where
    G: switchboard_core::GitClient + Clone + Send + Sync + 'static,
{
    thread::spawn(move || {
        let failure = coordinator
            .cleanup_merged_worktrees()
            .err()
            .map(|err| err.to_string());
        let _ = tx.send(EngineEvent::CleanupDone(failure));
    })
}

fn persist_pane_state(store: &StatusStore, project: &Project, state: PaneState) {
    let status = match state {
        PaneState::Processing => ProjectStatus::Active,
        PaneState::Idle => ProjectStatus::Idle,
        PaneState::AwaitingPermission => ProjectStatus::Blocked,
        PaneState::Inactive => ProjectStatus::Normal,
    };
    match store.save_project_status(&project.path, status) {
        Ok(()) => debug!(project = %project.name, status = status.as_str(), "Persisted status"),
        Err(err) if err.is_transient() => {
            debug!(project = %project.name, "Status store busy; skipping this cycle")
        }
        Err(err) => warn!(project = %project.name, error = %err, "Failed to persist status"),
    }
}

/// One-shot ranking for the `recommend` command.
pub fn print_recommendations() -> i32 {
    let cfg = match config::load_config() {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "Failed to load configuration");
            return 1;
        }
    };
    let db_path = match resolve_db_path(&cfg) {
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

    let projects = discover_projects(&cfg);
    let recommender = RecommendationEngine::new();
    for rec in rank_projects(&store, &projects, &recommender, &HealthState::default()) {
        println!(
            "{:?}\t{}\t{}",
            rec.priority, rec.project.name, rec.reasoning
        );
    }
    0
}

fn rank_projects(
    store: &StatusStore,
    projects: &[Project],
    recommender: &RecommendationEngine,
    health: &HealthState,
) -> Vec<switchboard_core::Recommendation> {
    let statuses = match store.load_all_project_statuses() {
        Ok(statuses) => statuses,
        Err(err) => {
            warn!(error = %err, "Failed to load statuses for ranking");
            return Vec::new();
        }
    };
    let snapshot: Vec<Project> = projects
        .iter()
        .map(|project| Project {
            status: statuses
                .get(&project.path)
                .copied()
                .unwrap_or(ProjectStatus::Normal),
            ..project.clone()
        })
        .collect();
    recommender.analyze(&snapshot, health)
}

/// One level of directories under the workspace root; anything carrying a
/// `.git` entry (directory or worktree file) is a project.
pub fn discover_projects(cfg: &EngineConfig) -> Vec<Project> {
    let Some(root) = cfg.workspace_root.as_deref() else {
        warn!("No workspace root configured; no projects to track");
        return Vec::new();
    };

    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(root = %root, error = %err, "Failed to read workspace root");
            return Vec::new();
        }
    };

    let mut projects = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() || !path.join(".git").exists() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        projects.push(Project::new(name, path.to_string_lossy().to_string()));
    }
    projects.sort_by(|a, b| a.name.cmp(&b.name));
    projects
}

/// Maps live panes to tracked panes: assistant panes only, each associated
/// with the project whose path is the longest prefix of the pane's path.
pub fn refresh_panes(
    monitor: &ActivityMonitor<CommandMultiplexerClient>,
    projects: &[Project],
) {
    let mux = CommandMultiplexerClient::default();
    let panes = match switchboard_core::MultiplexerClient::list_panes(&mux) {
        Ok(panes) => panes,
        Err(err) => {
            warn!(error = %err, "Pane enumeration failed");
            return;
        }
    };
    monitor.set_panes(&tracked_panes(&panes, projects));
}

pub fn tracked_panes(panes: &[PaneInfo], projects: &[Project]) -> Vec<TrackedPane> {
    panes
        .iter()
        .filter(|pane| ASSISTANT_COMMANDS.contains(&pane.command.as_str()))
        .filter_map(|pane| {
            match_project(projects, &pane.path).map(|project| TrackedPane {
                pane_id: pane.id.clone(),
                project_path: project.path.clone(),
            })
        })
        .collect()
}

/// Longest-prefix match of a pane's working directory against project
/// roots, so worktree checkouts under a project still map to it.
pub fn match_project<'a>(projects: &'a [Project], pane_path: &str) -> Option<&'a Project> {
    projects
        .iter()
        .filter(|project| {
            pane_path == project.path
                || pane_path.starts_with(&format!("{}/", project.path))
        })
        .max_by_key(|project| project.path.len())
}

fn forward_pane_updates(
    updates: Receiver<PaneUpdate>,
    tx: Sender<EngineEvent>,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        while !shutdown.load(Ordering::SeqCst) {
            match updates.recv_timeout(Duration::from_millis(250)) {
                Ok(update) => {
                    if tx.send(EngineEvent::Pane(update)).is_err() {
                        return;
                    }
                }
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => return,
            }
        }
    })
}

fn spawn_ticker(
    tx: Sender<EngineEvent>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
    make_event: impl Fn() -> EngineEvent + Send + 'static,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut next = Instant::now() + interval;
        while !shutdown.load(Ordering::SeqCst) {
            if Instant::now() >= next {
                if tx.send(make_event()).is_err() {
                    return;
                }
                next = Instant::now() + interval;
            }
            thread::sleep(Duration::from_millis(100));
        }
    })
}

/// Accepts notification events on a unix socket, one JSON event per
/// connection, and forwards parsed events to the fusion loop. Malformed
/// events are logged and dropped.
fn spawn_notify_listener(
    tx: Sender<EngineEvent>,
    shutdown: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>> {
    let socket_path = notify_socket_path()?;
    if let Some(parent) = socket_path.parent() {
        fs::create_dir_all(parent)?;
    }
    if socket_path.exists() {
        fs::remove_file(&socket_path)?;
    }
    let listener = UnixListener::bind(&socket_path)?;
    listener.set_nonblocking(true)?;
    info!(path = %socket_path.display(), "Listening for notification events");

    Ok(thread::spawn(move || {
        while !shutdown.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((mut stream, _)) => {
                    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
                    let mut buf = Vec::with_capacity(1024);
                    let mut chunk = [0u8; 4096];
                    loop {
                        match stream.read(&mut chunk) {
                            Ok(0) => break,
                            Ok(n) => {
                                buf.extend_from_slice(&chunk[..n]);
                                if buf.len() > MAX_EVENT_BYTES {
                                    break;
                                }
                            }
                            Err(_) => break,
                        }
                    }
                    match parse_event(&buf) {
                        Ok(event) => {
                            if tx.send(EngineEvent::Notification(event)).is_err() {
                                return;
                            }
                        }
                        Err(err) => {
                            warn!(code = %err.code, message = %err.message, "Dropped malformed notification event")
                        }
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(100));
                }
                Err(err) => {
                    warn!(error = %err, "Notify socket accept failed");
                    thread::sleep(Duration::from_millis(500));
                }
            }
        }
    }))
}

fn notify_socket_path() -> std::io::Result<PathBuf> {
    config::state_dir()
        .map(|dir| dir.join(NOTIFY_SOCKET_NAME))
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::NotFound, err.to_string()))
}

pub fn resolve_db_path(cfg: &EngineConfig) -> switchboard_core::Result<PathBuf> {
    match cfg.db_path.as_deref() {
        Some(path) => Ok(Path::new(path).to_path_buf()),
        None => config::default_db_path(),
    }
}

fn join_with_grace(workers: Vec<JoinHandle<()>>, grace: Duration) {
    let deadline = Instant::now() + grace;
    for worker in workers {
        if worker.is_finished() || Instant::now() < deadline {
            if worker.join().is_err() {
                warn!("Worker panicked during shutdown");
            }
        } else {
            warn!("Worker did not stop within the grace period");
        }
    }
}
