//! Recording metadata extraction
//!
//! Recording gateways name session files like:
//! - "alice_1700000000.guac" (owner, epoch seconds)
//! - "alice_rdp-prod_1700000000123.guac" (owner, connection, epoch millis)
//! - "bob_10.0.0.7_1700000000.guac" (owner, client address, epoch seconds)
//!
//! Every field is best effort. A name that fits no convention yields an empty
//! result rather than an error.
//!
//! The recording body is a stream of event records, each prefixed with its
//! offset from session start in milliseconds (`<millis>.<opcode>`). Duration
//! is recovered from a bounded window at the end of the file.

use std::io::SeekFrom;
use std::net::IpAddr;
use std::path::Path;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::bytes::Regex;
use serde_json::{Map, Value as JsonValue, json};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

/// Bytes read from the end of a recording when looking for the last event
pub const DURATION_TAIL_BYTES: u64 = 10 * 1024;

/// Event timestamp token at the start of a line or right after an instruction terminator
static EVENT_TIMESTAMP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)(?:^|;)[ \t]*(\d{1,19})\.[A-Za-z_][A-Za-z0-9_\-]*").unwrap());

/// Fields recovered from a recording's filename
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedRecording {
    pub original_filename: String,
    pub session_name: String,
    pub owner_username: Option<String>,
    pub client_ip: Option<String>,
    pub session_start: Option<DateTime<Utc>>,
}

impl ParsedRecording {
    /// Provenance map stored alongside the catalog record
    pub fn to_metadata(&self) -> Map<String, JsonValue> {
        let mut metadata = Map::new();
        metadata.insert("original_filename".into(), json!(self.original_filename));
        metadata.insert("session_name".into(), json!(self.session_name));
        if let Some(ref username) = self.owner_username {
            metadata.insert("username".into(), json!(username));
        }
        if let Some(ref ip) = self.client_ip {
            metadata.insert("client_ip".into(), json!(ip));
        }
        if let Some(start) = self.session_start {
            metadata.insert("timestamp".into(), json!(start.to_rfc3339()));
        }
        metadata
    }
}

/// Parse a recording filename for owner, client address and start time
pub fn parse_filename(filename: &str, extension: &str) -> ParsedRecording {
    let stem = strip_extension(filename, extension);

    let mut result = ParsedRecording {
        original_filename: filename.to_string(),
        session_name: stem.to_string(),
        ..Default::default()
    };

    let parts: Vec<&str> = stem.split('_').collect();
    if parts.len() < 2 {
        return result;
    }

    if !parts[0].is_empty() {
        result.owner_username = Some(parts[0].to_string());
    }

    let last = parts[parts.len() - 1];
    result.session_start = parse_epoch(last);

    result.client_ip = parts[1..parts.len() - 1]
        .iter()
        .find_map(|p| p.parse::<IpAddr>().ok())
        .map(|ip| ip.to_string());

    result
}

/// `filename` without a trailing `.<extension>`, matched case-insensitively
fn strip_extension<'a>(filename: &'a str, extension: &str) -> &'a str {
    let Some((stem, ext)) = filename.rsplit_once('.') else {
        return filename;
    };
    if ext.eq_ignore_ascii_case(extension) { stem } else { filename }
}

/// Interpret a 10-digit (seconds) or 13-digit (milliseconds) epoch token
fn parse_epoch(token: &str) -> Option<DateTime<Utc>> {
    if !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value: i64 = token.parse().ok()?;
    match token.len() {
        13 => DateTime::from_timestamp_millis(value),
        10 => DateTime::from_timestamp(value, 0),
        _ => None,
    }
}

/// Largest event timestamp (milliseconds) in a chunk of recording content.
///
/// When `partial_head` is set the chunk starts mid-record, so everything up to
/// the first record boundary is ignored.
pub fn max_event_timestamp(chunk: &[u8], partial_head: bool) -> Option<u64> {
    let body = if partial_head {
        match chunk.iter().position(|&b| b == b'\n' || b == b';') {
            Some(pos) => &chunk[pos..],
            None => return None,
        }
    } else {
        chunk
    };

    EVENT_TIMESTAMP_RE
        .captures_iter(body)
        .filter_map(|caps| {
            let digits = caps.get(1)?.as_bytes();
            std::str::from_utf8(digits).ok()?.parse::<u64>().ok()
        })
        .max()
}

/// Session duration in whole seconds, read from the tail of the recording.
///
/// Never fails: an unreadable file or a tail without timestamps yields 0.
pub async fn extract_duration(path: &Path) -> i64 {
    match read_tail(path, DURATION_TAIL_BYTES).await {
        Ok((chunk, partial_head)) => max_event_timestamp(&chunk, partial_head)
            .map(|millis| (millis / 1000) as i64)
            .unwrap_or(0),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Could not extract duration");
            0
        }
    }
}

/// Read at most `window` bytes from the end of a file
async fn read_tail(path: &Path, window: u64) -> std::io::Result<(Vec<u8>, bool)> {
    let mut file = tokio::fs::File::open(path).await?;
    let len = file.metadata().await?.len();
    let start = len.saturating_sub(window);
    file.seek(SeekFrom::Start(start)).await?;

    let mut buf = Vec::with_capacity(window.min(len) as usize);
    file.take(window).read_to_end(&mut buf).await?;
    Ok((buf, start > 0))
}
