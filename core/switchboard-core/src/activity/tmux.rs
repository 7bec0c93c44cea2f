//! Terminal multiplexer access behind a narrow trait.

use std::process::Command;

use crate::error::{CoreError, Result};

/// One pane as reported by the multiplexer's pane enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaneInfo {
    /// `session:window.pane`, the multiplexer's target syntax.
    pub id: String,
    pub session: String,
    pub window: String,
    pub pane: String,
    pub command: String,
    pub path: String,
}

pub trait MultiplexerClient: Send + Sync {
    fn list_panes(&self) -> Result<Vec<PaneInfo>>;
    /// Raw rendered content of a pane, escape sequences preserved.
    fn capture_pane(&self, pane_id: &str) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct CommandMultiplexerClient {
    binary: String,
}

impl Default for CommandMultiplexerClient {
    fn default() -> Self {
        Self {
            binary: "tmux".to_string(),
        }
    }
}

impl CommandMultiplexerClient {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .map_err(|err| CoreError::ToolFailed {
                command: format!("{} {}", self.binary, args.join(" ")),
                details: err.to_string(),
            })?;

        if !output.status.success() {
            return Err(CoreError::ToolFailed {
                command: format!("{} {}", self.binary, args.join(" ")),
                details: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl MultiplexerClient for CommandMultiplexerClient {
    fn list_panes(&self) -> Result<Vec<PaneInfo>> {
        let output = self.run(&[
            "list-panes",
            "-a",
            "-F",
            "#{session_name}:#{window_index}:#{pane_index}:#{pane_current_command}:#{pane_current_path}",
        ])?;
        parse_pane_list(&output)
    }

    fn capture_pane(&self, pane_id: &str) -> Result<String> {
        // -e preserves escape sequences so the activity patterns can match
        // content the terminal renders with color.
        self.run(&["capture-pane", "-p", "-e", "-t", pane_id])
    }
}

/// Parses pane enumeration output: one pane per line, colon-delimited
/// session, window, pane, current command, current path. Paths may contain
/// colons, so the split is bounded at five fields.
pub fn parse_pane_list(output: &str) -> Result<Vec<PaneInfo>> {
    let mut panes = Vec::new();
    for line in output.lines() {
        if line.is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.splitn(5, ':').collect();
        if parts.len() < 5 {
            return Err(CoreError::Parse {
                tool: "tmux".to_string(),
                details: format!("pane line has {} fields: {line:?}", parts.len()),
            });
        }
        panes.push(PaneInfo {
            id: format!("{}:{}.{}", parts[0], parts[1], parts[2]),
            session: parts[0].to_string(),
            window: parts[1].to_string(),
            pane: parts[2].to_string(),
            command: parts[3].to_string(),
            path: parts[4].to_string(),
        });
    }
    Ok(panes)
}
