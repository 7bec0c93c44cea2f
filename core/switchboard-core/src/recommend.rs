//! Focus recommendations ranked from project status and health state.

use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::types::{HealthState, Project, ProjectStatus};

/// Recommendation priority. Derived ordering gives `Low < Medium < High <
/// Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub project: Project,
    pub priority: Priority,
    pub reasoning: String,
    pub health_state: HealthState,
    #[serde(with = "duration_secs")]
    pub time_window: Duration,
}

mod duration_secs {
    use super::Duration;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }
}

pub const DEFAULT_TIME_WINDOW: Duration = Duration::from_secs(30 * 60);

/// Stateless ranking: each call fully recomputes from the inputs. Callers
/// regenerate on status change, health update, and a periodic tick.
#[derive(Debug, Clone)]
pub struct RecommendationEngine {
    time_window: Duration,
}

impl Default for RecommendationEngine {
    fn default() -> Self {
        Self {
            time_window: DEFAULT_TIME_WINDOW,
        }
    }
}

impl RecommendationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_time_window(&mut self, window: Duration) {
        self.time_window = window;
    }

    /// Ranks every project, highest priority first. Ties break on project
    /// name so output is deterministic.
    pub fn analyze(&self, projects: &[Project], health: &HealthState) -> Vec<Recommendation> {
        let mut recommendations: Vec<Recommendation> = projects
            .iter()
            .map(|project| Recommendation {
                priority: priority_for(project.status),
                reasoning: reasoning_for(project.status).to_string(),
                project: project.clone(),
                health_state: health.clone(),
                time_window: self.time_window,
            })
            .collect();

        recommendations.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.project.name.cmp(&b.project.name))
        });

        debug!(count = recommendations.len(), "Recomputed recommendations");
        recommendations
    }
}

fn priority_for(status: ProjectStatus) -> Priority {
    match status {
        ProjectStatus::Active => Priority::High,
        ProjectStatus::Blocked => Priority::Critical,
        ProjectStatus::Idle => Priority::Medium,
        ProjectStatus::Normal | ProjectStatus::Testing => Priority::Low,
    }
}

fn reasoning_for(status: ProjectStatus) -> &'static str {
    match status {
        ProjectStatus::Active => "Project has active work in progress",
        ProjectStatus::Blocked => "Project has blocking issues that need attention",
        ProjectStatus::Idle => "Project is ready for new work",
        ProjectStatus::Normal | ProjectStatus::Testing => "Project status review recommended",
    }
}
