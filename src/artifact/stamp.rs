use std::fs;
use std::io;
use std::path::Path;

use chrono::Local;
use tracing::{info, warn};

pub const STAMP_PREFIX: &str = "# source_ip=";
const PLAYLIST_HEADER: &str = "#EXTM3U";

pub fn stamp_line(ip: &str, rank: usize, updated_at: &str) -> String {
    format!("{}{} rank={} updated_at={}", STAMP_PREFIX, ip, rank, updated_at)
}

/// Best-effort provenance stamp. Errors are logged, never returned.
pub fn stamp(path: &Path, ip: &str, rank: usize) {
    match try_stamp(path, ip, rank) {
        Ok(()) => info!(path = %path.display(), ip, rank, "Stamped playlist"),
        Err(e) => warn!(path = %path.display(), error = %e, "Could not stamp playlist"),
    }
}

pub fn try_stamp(path: &Path, ip: &str, rank: usize) -> io::Result<()> {
    let content = fs::read_to_string(path)?;
    let now = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    fs::write(path, apply_stamp(&content, &stamp_line(ip, rank, &now)))
}

/// Replace any existing stamp lines with `line`, placed right after the
/// `#EXTM3U` header when there is one. Other lines are left untouched.
pub fn apply_stamp(content: &str, line: &str) -> String {
    let newline = if content.contains("\r\n") { "\r\n" } else { "\n" };
    let trailing = content.ends_with('\n');

    let mut lines: Vec<&str> = content
        .lines()
        .filter(|l| !l.starts_with(STAMP_PREFIX))
        .collect();

    let has_header = lines
        .first()
        .is_some_and(|l| l.trim_start_matches('\u{feff}').trim().starts_with(PLAYLIST_HEADER));
    lines.insert(usize::from(has_header), line);

    let mut out = lines.join(newline);
    if trailing || lines.len() == 1 {
        out.push_str(newline);
    }
    out
}
