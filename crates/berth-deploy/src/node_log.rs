//! Parsing of the tab-separated node log format.
//!
//! Each line is `epochSeconds.micros \t host \t processId \t service \t
//! component \t levelName \t message`, with newlines and tabs escaped inside
//! the message. Lines with a different number of fields are skipped.

use crate::persistence::{LogEntry, LogLevel};

/// The number of tab-separated fields of a well-formed log line.
const FIELDS: usize = 7;

/// Parses a node log stream into log entries.
///
/// Entry ids are 0; the log store assigns real ids on append. The entry text
/// is `host\tservice\tcomponent\n<unescaped message>`.
#[must_use]
pub fn parse_node_log(log: &str) -> Vec<LogEntry> {
    log.lines().filter_map(parse_line).collect()
}

#[allow(clippy::cast_possible_truncation)]
fn parse_line(line: &str) -> Option<LogEntry> {
    let parts: Vec<&str> = line.split('\t').collect();
    if parts.len() != FIELDS {
        return None;
    }
    let epoch_seconds: f64 = parts[0].parse().ok()?;
    let millis = (epoch_seconds * 1000.0).floor() as i64;
    let message = format!(
        "{}\t{}\t{}\n{}",
        parts[1],
        parts[3],
        parts[4],
        parts[6].replace("\\n", "\n").replace("\\t", "\t")
    );
    Some(LogEntry::new(
        0,
        millis,
        LogLevel::from_level_name(parts[5]),
        message,
    ))
}
