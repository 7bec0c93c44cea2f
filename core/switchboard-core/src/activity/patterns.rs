//! Pattern matching for assistant activity in rendered pane text.
//!
//! An active assistant renders a timing line like
//! `(41s · 5.7k tokens · esc to interrupt)`. The text may be interleaved
//! with ANSI escape sequences and wrapped across lines, so the patterns
//! match in dot-all mode and tolerate arbitrary bytes between the words.

use once_cell::sync::Lazy;
use regex::Regex;

static TIMING_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\(.*?esc.*?to.*?interrupt.*?\)").expect("timing pattern")
});

// Duration can appear before the marker, "(41s · ... esc to interrupt)",
// or after it, "esc to interrupt · 3m 1s".
static DURATION_BEFORE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\((\d+[hms](?:\d+[ms])?(?:\d+s)?)").expect("duration pattern"));

static DURATION_AFTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)esc.*?to.*?interrupt.*?·\s*((?:\d+[hms]\s*)+)").expect("duration pattern")
});

// CSI sequences (colors, cursor movement) as rendered by the terminal.
static ANSI_ESCAPES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").expect("ansi pattern"));

/// What one content scan of a pane said.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ActivitySignal {
    pub active: bool,
    /// e.g. "41s", "2m15s", "1h 15m 30s". Empty when not extractable.
    pub duration_text: String,
}

impl ActivitySignal {
    /// A zero-ish duration means the timing line was caught mid-render.
    pub fn has_valid_duration(&self) -> bool {
        !matches!(self.duration_text.as_str(), "" | "0s" | "0m")
    }
}

/// Scans rendered pane content for the assistant's working marker and
/// extracts the elapsed duration when present.
///
/// The activity match runs on raw content, which tolerates escapes between
/// the words. The duration regexes anchor digits against punctuation that
/// color codes interrupt, so they run on escape-stripped text.
pub fn detect_activity(content: &str) -> ActivitySignal {
    if TIMING_PATTERN.is_match(content) {
        return ActivitySignal {
            active: true,
            duration_text: extract_duration(&strip_ansi(content)),
        };
    }

    // Fall back to per-line matching for terminals that never wrap the
    // marker across lines but inject resets between them.
    for line in content.lines() {
        if TIMING_PATTERN.is_match(line) {
            return ActivitySignal {
                active: true,
                duration_text: extract_duration(&strip_ansi(line)),
            };
        }
    }

    ActivitySignal::default()
}

fn strip_ansi(content: &str) -> String {
    ANSI_ESCAPES.replace_all(content, "").into_owned()
}

fn extract_duration(content: &str) -> String {
    if let Some(captures) = DURATION_BEFORE.captures(content) {
        return captures[1].trim().to_string();
    }
    if let Some(captures) = DURATION_AFTER.captures(content) {
        return captures[1].trim().to_string();
    }
    String::new()
}
