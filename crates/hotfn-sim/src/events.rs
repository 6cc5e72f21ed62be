//! Event stream files.
//!
//! One event per line: `start_ms,function_name`. Blank lines and lines
//! starting with `#` are skipped, as is a leading header line whose first
//! column is not a number.

use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventError {
    #[error("failed to read event stream {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("line {line}: {message}")]
    Malformed { line: usize, message: String },
}

/// One scheduled invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Offset from the start of the simulation.
    pub start_ms: u64,
    pub function: String,
}

pub fn load_events(path: &Path) -> Result<Vec<Event>, EventError> {
    let content = std::fs::read_to_string(path).map_err(|source| EventError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_events(&content)
}

/// Parse an event stream. Events are returned sorted by start time.
pub fn parse_events(content: &str) -> Result<Vec<Event>, EventError> {
    let mut events = Vec::new();
    let mut seen_data = false;

    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let malformed = |message: String| EventError::Malformed {
            line: idx + 1,
            message,
        };

        let (start, function) = line
            .split_once(',')
            .ok_or_else(|| malformed(format!("expected 'start_ms,function_name', got '{line}'")))?;
        let (start, function) = (start.trim(), function.trim());

        let start_ms = match start.parse::<u64>() {
            Ok(ms) => ms,
            Err(_) if !seen_data => {
                // Header row.
                seen_data = true;
                continue;
            }
            Err(_) => return Err(malformed(format!("invalid start time '{start}'"))),
        };
        if function.is_empty() {
            return Err(malformed("missing function name".to_string()));
        }

        seen_data = true;
        events.push(Event {
            start_ms,
            function: function.to_string(),
        });
    }

    events.sort_by_key(|e| e.start_ms);
    Ok(events)
}
