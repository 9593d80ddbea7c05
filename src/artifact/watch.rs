use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use tracing::{debug, info};

pub const DEFAULT_EXTENSION: &str = "m3u";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Absorbs mtime truncation and skew between the trigger and the write landing.
pub const DEFAULT_TOLERANCE: Duration = Duration::from_millis(500);

/// Name → mtime of matching files, taken once before a download is triggered.
#[derive(Debug, Clone, Default)]
pub struct FileSnapshot {
    files: HashMap<String, SystemTime>,
}

impl FileSnapshot {
    pub fn capture(dir: &Path, extension: &str) -> Self {
        let files = list_matching(dir, extension)
            .into_iter()
            .map(|f| (f.name, f.modified))
            .collect();
        FileSnapshot { files }
    }

    pub fn get(&self, name: &str) -> Option<SystemTime> {
        self.files.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[derive(Debug)]
struct Observed {
    path: PathBuf,
    name: String,
    modified: SystemTime,
    size: u64,
}

/// Files in `dir` whose extension matches case-insensitively. Unreadable
/// entries are skipped; an unreadable directory yields nothing.
fn list_matching(dir: &Path, extension: &str) -> Vec<Observed> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    entries
        .filter_map(|entry| {
            let entry = entry.ok()?;
            let path = entry.path();
            let ext = path.extension()?.to_str()?;
            if !ext.eq_ignore_ascii_case(extension) {
                return None;
            }
            let meta = entry.metadata().ok()?;
            if !meta.is_file() {
                return None;
            }
            Some(Observed {
                name: entry.file_name().to_string_lossy().into_owned(),
                modified: meta.modified().ok()?,
                size: meta.len(),
                path,
            })
        })
        .collect()
}

/// Polls a download directory for a playlist that appeared or changed after a trigger.
#[derive(Debug, Clone)]
pub struct ArtifactWatcher {
    dir: PathBuf,
    extension: String,
    interval: Duration,
    tolerance: Duration,
}

impl ArtifactWatcher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        ArtifactWatcher {
            dir: dir.into(),
            extension: DEFAULT_EXTENSION.to_string(),
            interval: DEFAULT_POLL_INTERVAL,
            tolerance: DEFAULT_TOLERANCE,
        }
    }

    pub fn with_extension(mut self, extension: &str) -> Self {
        self.extension = extension.trim_start_matches('.').to_string();
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn snapshot(&self) -> FileSnapshot {
        FileSnapshot::capture(&self.dir, &self.extension)
    }

    /// Single scan: the most recently modified qualifying file, if any.
    pub fn poll_once(&self, before: &FileSnapshot, trigger: SystemTime) -> Option<PathBuf> {
        list_matching(&self.dir, &self.extension)
            .into_iter()
            .filter(|f| self.qualifies(f, before, trigger))
            .max_by_key(|f| f.modified)
            .map(|f| f.path)
    }

    fn qualifies(&self, f: &Observed, before: &FileSnapshot, trigger: SystemTime) -> bool {
        let fresh_file = match before.get(&f.name) {
            None => f.size > 0,
            Some(recorded) => f.modified > recorded + self.tolerance,
        };
        // Catches files the snapshot missed, e.g. written between capture and trigger.
        fresh_file || f.modified > trigger + self.tolerance
    }

    /// Poll until a qualifying file shows up. `None` is only returned once
    /// `timeout` has fully elapsed.
    pub fn wait_for_new_file(
        &self,
        before: &FileSnapshot,
        trigger: SystemTime,
        timeout: Duration,
    ) -> Option<PathBuf> {
        let deadline = Instant::now() + timeout;
        let mut polls = 0u32;

        loop {
            polls += 1;
            if let Some(path) = self.poll_once(before, trigger) {
                info!(path = %path.display(), polls, "Detected downloaded playlist");
                return Some(path);
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(dir = %self.dir.display(), polls, "Gave up waiting for playlist");
                return None;
            }
            thread::sleep(self.interval.min(deadline - now));
        }
    }
}
