//! Extractors for values embedded in reply text, and the MLSD fact parser.
//!
//! - `227` → IPv4 address and port (`h1,h2,h3,h4,p1,p2`)
//! - `229` → port (`(<d><d><d><port><d>)`)
//! - `150` → optional expected transfer size
//! - `257` → double-quoted pathname
//! - MLSD lines (RFC 3659): `type=file;size=1234;modify=20260101120000; file.txt`

use crate::ftp::error::{FtpError, FtpErrorKind, FtpResult};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::net::Ipv4Addr;

/// Contents between the first `(` and the first `)` after it.
fn find_parentheses(text: &str) -> Option<&str> {
    let start = text.find('(')?;
    let end = text[start..].find(')')? + start;
    Some(&text[start + 1..end])
}

fn reply_code_of(text: &str) -> Option<u16> {
    text.get(..3).and_then(|c| c.parse().ok())
}

fn require_code(text: &str, code: &str) -> FtpResult<()> {
    if text.starts_with(code) {
        return Ok(());
    }
    let err = FtpError::new(FtpErrorKind::ReplyRejected, text.to_string());
    Err(match reply_code_of(text) {
        Some(c) => err.with_code(c),
        None => err,
    })
}

/// Parse a `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)` reply.
pub fn parse_pasv(text: &str) -> FtpResult<(Ipv4Addr, u16)> {
    require_code(text, "227")?;
    let inner = find_parentheses(text)
        .ok_or_else(|| FtpError::protocol_error(format!("no address in PASV reply: {}", text)))?;
    let nums = inner
        .split(',')
        .map(|p| p.trim().parse::<u8>())
        .collect::<Result<Vec<u8>, _>>()
        .map_err(|e| FtpError::protocol_error(format!("bad PASV field in '{}': {}", text, e)))?;
    if nums.len() != 6 {
        return Err(FtpError::protocol_error(format!(
            "PASV reply needs 6 fields, got {}: {}",
            nums.len(),
            text
        )));
    }
    let ip = Ipv4Addr::new(nums[0], nums[1], nums[2], nums[3]);
    let port = (nums[4] as u16) << 8 | nums[5] as u16;
    Ok((ip, port))
}

/// Parse a `229 Entering Extended Passive Mode (|||port|)` reply.
///
/// The delimiter may be any character but must be the same on both ends.
pub fn parse_epsv(text: &str) -> FtpResult<u16> {
    require_code(text, "229")?;
    let inner = find_parentheses(text)
        .ok_or_else(|| FtpError::protocol_error(format!("no port in EPSV reply: {}", text)))?;
    let mut chars = inner.chars();
    let (first, last) = match (chars.next(), chars.next_back()) {
        (Some(f), Some(l)) => (f, l),
        _ => return Err(FtpError::protocol_error(format!("empty EPSV argument: {}", text))),
    };
    if first != last {
        return Err(FtpError::protocol_error(format!(
            "EPSV delimiters do not match: {}",
            text
        )));
    }
    let parts: Vec<&str> = inner.split(first).collect();
    if parts.len() != 5 {
        return Err(FtpError::protocol_error(format!("malformed EPSV reply: {}", text)));
    }
    parts[3]
        .parse::<u16>()
        .map_err(|e| FtpError::protocol_error(format!("bad EPSV port in '{}': {}", text, e)))
}

/// Expected byte count from a `150 Opening data connection (1234 bytes)` reply.
///
/// Returns `None` when the reply carries no parenthesised hint.
pub fn parse_transfer_size(text: &str) -> FtpResult<Option<u64>> {
    let inner = match find_parentheses(text) {
        Some(inner) => inner,
        None => return Ok(None),
    };
    let token = inner.split_whitespace().next().unwrap_or("");
    token
        .parse::<u64>()
        .map(Some)
        .map_err(|_| FtpError::protocol_error(format!("bad size hint in reply: {}", text)))
}

/// Pathname from a `257 "/a/b""c" is current directory` reply.
///
/// Doubled quotes collapse to one. Returns an empty string when the reply
/// does not quote a name.
pub fn parse_pathname(text: &str) -> String {
    if text.get(3..5) != Some(" \"") {
        return String::new();
    }
    let mut name = String::new();
    let mut chars = text[5..].chars().peekable();
    while let Some(c) = chars.next() {
        if c == '"' {
            if chars.peek() == Some(&'"') {
                chars.next();
            } else {
                break;
            }
        }
        name.push(c);
    }
    name
}

// ─── MLSD ────────────────────────────────────────────────────────────

/// Entry kind from the MLSD `type` fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MlsdKind {
    File,
    Directory,
    /// `cdir`: the listed directory itself.
    CurrentDir,
    /// `pdir`: its parent.
    ParentDir,
    Symlink,
    Unknown,
}

/// One MLSD line: a name plus its lower-cased facts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MlsdEntry {
    pub name: String,
    pub facts: HashMap<String, String>,
}

impl MlsdEntry {
    pub fn fact(&self, key: &str) -> Option<&str> {
        self.facts.get(key).map(String::as_str)
    }

    pub fn kind(&self) -> MlsdKind {
        match self.fact("type").map(|s| s.to_lowercase()).as_deref() {
            Some("file") => MlsdKind::File,
            Some("dir") => MlsdKind::Directory,
            Some("cdir") => MlsdKind::CurrentDir,
            Some("pdir") => MlsdKind::ParentDir,
            Some("os.unix=symlink") | Some("os.unix=slink") => MlsdKind::Symlink,
            _ => MlsdKind::Unknown,
        }
    }

    pub fn size(&self) -> Option<u64> {
        self.fact("size").and_then(|v| v.parse().ok())
    }

    /// The `modify` fact as UTC (`YYYYMMDDHHMMSS[.sss]`).
    pub fn modified(&self) -> Option<DateTime<Utc>> {
        self.fact("modify").and_then(parse_mlsd_time)
    }
}

fn parse_mlsd_time(s: &str) -> Option<DateTime<Utc>> {
    let base = s.get(..14)?;
    NaiveDateTime::parse_from_str(base, "%Y%m%d%H%M%S")
        .ok()
        .map(|dt| Utc.from_utc_datetime(&dt))
}

/// Parse one MLSD line: facts, one space, then the name.
///
/// The name is everything after the first space, so it may itself
/// contain spaces.
pub fn parse_mlsd_line(line: &str) -> MlsdEntry {
    let (facts_part, name) = line.split_once(' ').unwrap_or((line, ""));
    let facts_part = facts_part.strip_suffix(';').unwrap_or(facts_part);

    let facts = facts_part
        .split(';')
        .filter(|f| !f.is_empty())
        .map(|f| {
            let (k, v) = f.split_once('=').unwrap_or((f, ""));
            (k.to_lowercase(), v.to_string())
        })
        .collect();

    MlsdEntry {
        name: name.to_string(),
        facts,
    }
}

/// Single-pass sequence of entries over buffered MLSD lines.
#[derive(Debug)]
pub struct MlsdEntries {
    lines: std::vec::IntoIter<String>,
}

impl MlsdEntries {
    pub fn new(lines: Vec<String>) -> Self {
        Self {
            lines: lines.into_iter(),
        }
    }
}

impl Iterator for MlsdEntries {
    type Item = MlsdEntry;

    fn next(&mut self) -> Option<MlsdEntry> {
        self.lines.next().map(|l| parse_mlsd_line(&l))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.lines.size_hint()
    }
}
