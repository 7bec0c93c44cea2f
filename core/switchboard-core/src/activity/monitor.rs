//! Hybrid activity monitor: content-scan polling fused with notification
//! events.
//!
//! Panes are registered explicitly by the caller, which knows which panes
//! run the assistant and which project each belongs to. Notifications are
//! addressed by project, so the monitor keeps a project-to-pane map to
//! route them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use switchboard_notify_protocol::{NotificationEvent, NotificationKind};

use super::patterns::{detect_activity, ActivitySignal};
use super::reconcile::{needs_attention, reconcile, PaneState};
use super::tmux::MultiplexerClient;

/// A pane the monitor should watch, with the project it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedPane {
    pub pane_id: String,
    pub project_path: String,
}

/// Emitted whenever a pane's displayed state or duration changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaneUpdate {
    pub pane_id: String,
    pub state: PaneState,
    pub duration_text: String,
    pub needs_attention: bool,
}

/// Point-in-time snapshot of everything known about one pane.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PaneActivityState {
    pub is_processing: bool,
    pub duration_text: String,
    pub has_permission_request: bool,
    pub is_idle: bool,
    pub last_notification: Option<NotificationKind>,
    pub last_active: Option<DateTime<Utc>>,
    pub last_inactive: Option<DateTime<Utc>>,
    pub last_changed: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct PaneRecord {
    signal: ActivitySignal,
    notification: Option<NotificationKind>,
    last_state: PaneState,
    last_active: Option<DateTime<Utc>>,
    last_inactive: Option<DateTime<Utc>>,
    last_changed: Option<DateTime<Utc>>,
}

impl PaneRecord {
    fn state(&self) -> PaneState {
        reconcile(self.signal.active, self.notification)
    }

    fn snapshot(&self) -> PaneActivityState {
        PaneActivityState {
            is_processing: self.signal.active,
            duration_text: self.signal.duration_text.clone(),
            has_permission_request: self.notification
                == Some(NotificationKind::PermissionRequest),
            is_idle: self.notification == Some(NotificationKind::Idle),
            last_notification: self.notification,
            last_active: self.last_active,
            last_inactive: self.last_inactive,
            last_changed: self.last_changed,
        }
    }
}

pub struct ActivityMonitor<M: MultiplexerClient> {
    mux: M,
    panes: RwLock<HashMap<String, PaneRecord>>,
    // project path -> pane id, rebuilt on every set_panes call
    project_panes: RwLock<HashMap<String, String>>,
    subscribers: Mutex<Vec<Sender<PaneUpdate>>>,
    shutdown: Arc<AtomicBool>,
}

impl<M: MultiplexerClient> ActivityMonitor<M> {
    pub fn new(mux: M) -> Self {
        Self {
            mux,
            panes: RwLock::new(HashMap::new()),
            project_panes: RwLock::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Registers an update channel. Disconnected receivers are pruned on
    /// the next emit.
    pub fn subscribe(&self) -> Receiver<PaneUpdate> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(tx);
        rx
    }

    /// Replaces the set of watched panes. Records for panes no longer
    /// tracked are dropped; new panes are scanned immediately rather than
    /// defaulting to inactive until the next poll.
    pub fn set_panes(&self, tracked: &[TrackedPane]) {
        let new_ids: Vec<String> = {
            let mut panes = self
                .panes
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let mut project_panes = self
                .project_panes
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());

            panes.retain(|id, _| tracked.iter().any(|t| t.pane_id == *id));
            project_panes.clear();
            let mut new_ids = Vec::new();
            for pane in tracked {
                if !panes.contains_key(&pane.pane_id) {
                    panes.insert(pane.pane_id.clone(), PaneRecord::default());
                    new_ids.push(pane.pane_id.clone());
                }
                project_panes.insert(pane.project_path.clone(), pane.pane_id.clone());
            }
            new_ids
        };

        for pane_id in &new_ids {
            self.scan_pane(pane_id);
        }

        debug!(count = tracked.len(), new = new_ids.len(), "Updated watched panes");
    }

    /// Scans every watched pane once. A single pane's capture failure
    /// degrades that pane to inactive and never blocks the rest.
    pub fn scan_cycle(&self) {
        let pane_ids: Vec<String> = {
            let panes = self
                .panes
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            panes.keys().cloned().collect()
        };

        for pane_id in pane_ids {
            self.scan_pane(&pane_id);
        }
    }

    /// Scans one pane now.
    pub fn scan_pane(&self, pane_id: &str) {
        let signal = match self.mux.capture_pane(pane_id) {
            Ok(content) => detect_activity(&content),
            Err(err) => {
                debug!(pane = %pane_id, error = %err, "Pane capture failed, treating as inactive");
                ActivitySignal::default()
            }
        };
        self.apply_signal(pane_id, signal);
    }

    /// Routes a notification event to the pane of its project. Events for
    /// unknown projects are dropped with a debug log.
    pub fn apply_notification(&self, event: &NotificationEvent) {
        let pane_id = {
            let project_panes = self
                .project_panes
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            project_panes.get(&event.project_id).cloned()
        };
        let Some(pane_id) = pane_id else {
            debug!(project = %event.project_id, kind = %event.kind.as_str(), "Notification for untracked project");
            return;
        };

        let update = {
            let mut panes = self
                .panes
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let Some(record) = panes.get_mut(&pane_id) else {
                return;
            };
            match event.kind {
                NotificationKind::PermissionRequest | NotificationKind::Idle => {
                    record.notification = Some(event.kind);
                }
                // A fresh activity event supersedes any held idle or
                // permission state.
                NotificationKind::Activity => record.notification = None,
                NotificationKind::Error => {
                    warn!(project = %event.project_id, message = ?event.message, "Error notification");
                }
            }
            self.refresh_record(&pane_id, record)
        };

        if let Some(update) = update {
            self.emit(update);
        }
    }

    /// Reverse lookup of the project a tracked pane belongs to.
    pub fn project_for_pane(&self, pane_id: &str) -> Option<String> {
        let project_panes = self
            .project_panes
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        project_panes
            .iter()
            .find(|(_, id)| id.as_str() == pane_id)
            .map(|(project, _)| project.clone())
    }

    pub fn pane_state(&self, pane_id: &str) -> PaneState {
        let panes = self
            .panes
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        panes.get(pane_id).map(|r| r.state()).unwrap_or_default()
    }

    /// Full snapshot for one pane; unknown panes return the default state.
    pub fn activity_state(&self, pane_id: &str) -> PaneActivityState {
        let panes = self
            .panes
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        panes.get(pane_id).map(|r| r.snapshot()).unwrap_or_default()
    }

    pub fn duration_text(&self, pane_id: &str) -> String {
        let panes = self
            .panes
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        panes
            .get(pane_id)
            .map(|r| r.signal.duration_text.clone())
            .unwrap_or_default()
    }

    pub fn all_states(&self) -> HashMap<String, PaneState> {
        let panes = self
            .panes
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        panes
            .iter()
            .map(|(id, record)| (id.clone(), record.state()))
            .collect()
    }

    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    fn apply_signal(&self, pane_id: &str, mut signal: ActivitySignal) {
        let update = {
            let mut panes = self
                .panes
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let Some(record) = panes.get_mut(pane_id) else {
                return;
            };
            // A timing line caught mid-render carries a zero-ish duration;
            // keep the previous reading until a real one appears. Inactive
            // panes reset to empty.
            if signal.active && !signal.has_valid_duration() && record.signal.active {
                signal.duration_text = record.signal.duration_text.clone();
            }
            let now = Utc::now();
            if signal.active {
                record.last_active = Some(now);
            } else if record.signal.active {
                record.last_inactive = Some(now);
            }
            let duration_changed = record.signal.duration_text != signal.duration_text;
            record.signal = signal;
            let update = self.refresh_record(pane_id, record);
            if update.is_none() && duration_changed {
                Some(PaneUpdate {
                    pane_id: pane_id.to_string(),
                    state: record.last_state,
                    duration_text: record.signal.duration_text.clone(),
                    needs_attention: needs_attention(record.last_state),
                })
            } else {
                update
            }
        };

        if let Some(update) = update {
            self.emit(update);
        }
    }

    /// Recomputes the record's displayed state; returns an update only when
    /// it changed.
    fn refresh_record(&self, pane_id: &str, record: &mut PaneRecord) -> Option<PaneUpdate> {
        let state = record.state();
        if state == record.last_state {
            return None;
        }
        debug!(pane = %pane_id, state = ?state, "Pane state changed");
        record.last_state = state;
        record.last_changed = Some(Utc::now());
        Some(PaneUpdate {
            pane_id: pane_id.to_string(),
            state,
            duration_text: record.signal.duration_text.clone(),
            needs_attention: needs_attention(state),
        })
    }

    fn emit(&self, update: PaneUpdate) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subscribers.retain(|tx| tx.send(update.clone()).is_ok());
    }
}

impl<M: MultiplexerClient + 'static> ActivityMonitor<M> {
    /// Spawns the polling worker. The thread checks the shutdown flag
    /// frequently so it terminates within a bounded grace period even with
    /// a long scan interval.
    pub fn spawn_poller(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        thread::spawn(move || {
            let shutdown = monitor.shutdown_flag();
            while !shutdown.load(Ordering::SeqCst) {
                monitor.scan_cycle();

                let deadline = Instant::now() + interval;
                while Instant::now() < deadline {
                    if shutdown.load(Ordering::SeqCst) {
                        return;
                    }
                    thread::sleep(Duration::from_millis(50).min(interval));
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CoreError, Result};
    use chrono::Utc;

    #[derive(Default)]
    struct FakeMux {
        contents: Mutex<HashMap<String, String>>,
    }

    impl FakeMux {
        fn set_content(&self, pane_id: &str, content: &str) {
            self.contents
                .lock()
                .expect("lock")
                .insert(pane_id.to_string(), content.to_string());
        }
    }

    impl MultiplexerClient for FakeMux {
        fn list_panes(&self) -> Result<Vec<super::super::tmux::PaneInfo>> {
            Ok(Vec::new())
        }

        fn capture_pane(&self, pane_id: &str) -> Result<String> {
            self.contents
                .lock()
                .expect("lock")
                .get(pane_id)
                .cloned()
                .ok_or_else(|| CoreError::ToolFailed {
                    command: "tmux capture-pane".to_string(),
                    details: format!("can't find pane: {pane_id}"),
                })
        }
    }

    fn event(project: &str, kind: NotificationKind) -> NotificationEvent {
        NotificationEvent {
            project_id: project.to_string(),
            kind,
            timestamp: Utc::now(),
            session_id: None,
            message: None,
            metadata: None,
        }
    }

    fn tracked(pane: &str, project: &str) -> TrackedPane {
        TrackedPane {
            pane_id: pane.to_string(),
            project_path: project.to_string(),
        }
    }

    #[test]
    fn new_pane_is_scanned_immediately_and_emits() {
        let mux = FakeMux::default();
        mux.set_content("main:0.0", "(41s · esc to interrupt)");
        let monitor = ActivityMonitor::new(mux);
        let updates = monitor.subscribe();

        monitor.set_panes(&[tracked("main:0.0", "/repo/alpha")]);

        assert_eq!(monitor.pane_state("main:0.0"), PaneState::Processing);
        assert_eq!(monitor.duration_text("main:0.0"), "41s");
        let update = updates.try_recv().expect("one update");
        assert_eq!(update.state, PaneState::Processing);
        assert!(!update.needs_attention);
    }

    #[test]
    fn one_failing_pane_does_not_block_the_cycle() {
        let mux = FakeMux::default();
        mux.set_content("main:0.1", "(2m15s · esc to interrupt)");
        // main:0.0 has no content; capture fails.
        let monitor = ActivityMonitor::new(mux);
        monitor.set_panes(&[
            tracked("main:0.0", "/repo/alpha"),
            tracked("main:0.1", "/repo/beta"),
        ]);

        monitor.scan_cycle();

        assert_eq!(monitor.pane_state("main:0.0"), PaneState::Inactive);
        assert_eq!(monitor.pane_state("main:0.1"), PaneState::Processing);
    }

    #[test]
    fn idle_notification_routes_by_project() {
        let monitor = ActivityMonitor::new(FakeMux::default());
        monitor.set_panes(&[tracked("main:0.0", "/repo/alpha")]);

        monitor.apply_notification(&event("/repo/alpha", NotificationKind::Idle));

        assert_eq!(monitor.pane_state("main:0.0"), PaneState::Idle);
    }

    #[test]
    fn active_content_overrides_stale_idle_notification() {
        let mux = FakeMux::default();
        mux.set_content("main:0.0", "✻ Working… (41s · esc to interrupt)");
        let monitor = ActivityMonitor::new(mux);
        monitor.set_panes(&[tracked("main:0.0", "/repo/alpha")]);

        monitor.apply_notification(&event("/repo/alpha", NotificationKind::Idle));
        monitor.scan_cycle();

        assert_eq!(monitor.pane_state("main:0.0"), PaneState::Processing);
    }

    #[test]
    fn permission_request_surfaces_after_processing_ends() {
        let mux = FakeMux::default();
        mux.set_content("main:0.0", "> \n");
        let monitor = ActivityMonitor::new(mux);
        monitor.set_panes(&[tracked("main:0.0", "/repo/alpha")]);

        monitor.apply_notification(&event("/repo/alpha", NotificationKind::PermissionRequest));
        monitor.scan_cycle();

        assert_eq!(monitor.pane_state("main:0.0"), PaneState::AwaitingPermission);
    }

    #[test]
    fn activity_notification_clears_held_state() {
        let monitor = ActivityMonitor::new(FakeMux::default());
        monitor.set_panes(&[tracked("main:0.0", "/repo/alpha")]);

        monitor.apply_notification(&event("/repo/alpha", NotificationKind::Idle));
        monitor.apply_notification(&event("/repo/alpha", NotificationKind::Activity));

        assert_eq!(monitor.pane_state("main:0.0"), PaneState::Inactive);
    }

    #[test]
    fn notification_for_untracked_project_is_dropped() {
        let monitor = ActivityMonitor::new(FakeMux::default());
        monitor.set_panes(&[tracked("main:0.0", "/repo/alpha")]);

        monitor.apply_notification(&event("/repo/ghost", NotificationKind::Idle));

        assert_eq!(monitor.pane_state("main:0.0"), PaneState::Inactive);
    }

    #[test]
    fn untracked_panes_are_dropped_on_set_panes() {
        let mux = FakeMux::default();
        mux.set_content("main:0.0", "(41s · esc to interrupt)");
        let monitor = ActivityMonitor::new(mux);
        monitor.set_panes(&[tracked("main:0.0", "/repo/alpha")]);
        monitor.scan_cycle();

        monitor.set_panes(&[tracked("main:0.1", "/repo/beta")]);

        assert_eq!(monitor.pane_state("main:0.0"), PaneState::Inactive);
        assert!(monitor.all_states().contains_key("main:0.1"));
        assert!(!monitor.all_states().contains_key("main:0.0"));
    }

    #[test]
    fn no_duplicate_update_when_state_is_unchanged() {
        let mux = FakeMux::default();
        mux.set_content("main:0.0", "(41s · esc to interrupt)");
        let monitor = ActivityMonitor::new(mux);
        let updates = monitor.subscribe();
        monitor.set_panes(&[tracked("main:0.0", "/repo/alpha")]);

        monitor.scan_cycle();
        monitor.scan_cycle();

        assert!(updates.try_recv().is_ok());
        assert!(updates.try_recv().is_err(), "repeat scans with no change are silent");
    }

    #[test]
    fn snapshot_tracks_timestamps_and_duration_hold() {
        let mux = FakeMux::default();
        mux.set_content("main:0.0", "(41s · esc to interrupt)");
        let monitor = ActivityMonitor::new(mux);
        monitor.set_panes(&[tracked("main:0.0", "/repo/alpha")]);

        let state = monitor.activity_state("main:0.0");
        assert!(state.is_processing);
        assert!(state.last_active.is_some());
        assert!(state.last_changed.is_some());

        // Mid-render capture with no extractable duration keeps the last
        // good reading.
        monitor.apply_signal(
            "main:0.0",
            ActivitySignal {
                active: true,
                duration_text: String::new(),
            },
        );
        assert_eq!(monitor.duration_text("main:0.0"), "41s");

        // Going inactive resets the duration and stamps last_inactive.
        monitor.apply_signal("main:0.0", ActivitySignal::default());
        let state = monitor.activity_state("main:0.0");
        assert!(!state.is_processing);
        assert_eq!(state.duration_text, "");
        assert!(state.last_inactive.is_some());
    }

    #[test]
    fn poller_stops_on_shutdown() {
        let monitor = Arc::new(ActivityMonitor::new(FakeMux::default()));
        let handle = monitor.spawn_poller(Duration::from_millis(10));

        monitor.shutdown();
        handle.join().expect("poller thread exits");
    }
}
