//! Assistant activity detection for terminal panes.
//!
//! Two independent producers feed one reconciliation function: a polling
//! content scanner of rendered pane text and a consumer of asynchronous
//! notification events. See `reconcile` for the precedence rule.

mod monitor;
mod patterns;
mod reconcile;
mod tmux;

pub use monitor::{ActivityMonitor, PaneActivityState, PaneUpdate, TrackedPane};
pub use patterns::{detect_activity, ActivitySignal};
pub use reconcile::{needs_attention, reconcile, PaneState};
pub use tmux::{parse_pane_list, CommandMultiplexerClient, MultiplexerClient, PaneInfo};
