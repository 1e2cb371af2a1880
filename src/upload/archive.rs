use std::fs;
use std::io;
use std::path::Path;
use tracing::warn;

pub const ARCHIVE_SUBDIR: &str = "archive";

/// Move every top-level file of `dir` into `dir/<subdir>`, creating it if
/// needed. The sync orchestrator scans archive subfolders too, so archived
/// activities still count as exported.
pub fn move_to_subdirectory(dir: &Path, subdir: &str) -> io::Result<usize> {
    let target = dir.join(subdir);
    fs::create_dir_all(&target)?;

    let mut moved = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let destination = target.join(entry.file_name());
        match fs::rename(&path, &destination) {
            Ok(()) => moved += 1,
            Err(e) => warn!("could not archive {}: {e}", path.display()),
        }
    }
    Ok(moved)
}
