pub mod stamp;
pub mod watch;

use std::fs;
use std::io;
use std::path::Path;

pub use watch::{ArtifactWatcher, FileSnapshot};

/// Move a detected download onto `target`, replacing whatever was there.
pub fn move_into_place(downloaded: &Path, target: &Path) -> io::Result<()> {
    if same_path(downloaded, target) {
        return Ok(());
    }
    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    if target.exists() {
        fs::remove_file(target)?;
    }
    if fs::rename(downloaded, target).is_err() {
        // rename fails across filesystems
        fs::copy(downloaded, target)?;
        fs::remove_file(downloaded)?;
    }
    Ok(())
}

fn same_path(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(x), Ok(y)) => x == y,
        _ => a == b,
    }
}
