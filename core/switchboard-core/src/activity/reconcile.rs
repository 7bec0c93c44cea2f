//! Fusion of the two activity signal sources into one displayed state.
//!
//! The content scan is the only real-time source for "currently
//! processing", so it always wins. Notifications fill in what the scan
//! cannot see: a pending permission prompt and input idleness.

use switchboard_notify_protocol::NotificationKind;

/// Displayed activity state for one pane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PaneState {
    #[default]
    Inactive,
    Processing,
    AwaitingPermission,
    Idle,
}

/// Combines the latest content-scan verdict with the most recent
/// notification for the pane's project.
pub fn reconcile(content_active: bool, last_notification: Option<NotificationKind>) -> PaneState {
    if content_active {
        return PaneState::Processing;
    }
    match last_notification {
        Some(NotificationKind::PermissionRequest) => PaneState::AwaitingPermission,
        Some(NotificationKind::Idle) => PaneState::Idle,
        _ => PaneState::Inactive,
    }
}

/// Whether the pane should be highlighted as needing the user.
pub fn needs_attention(state: PaneState) -> bool {
    match state {
        PaneState::Processing => false,
        PaneState::Inactive | PaneState::AwaitingPermission | PaneState::Idle => true,
    }
}
