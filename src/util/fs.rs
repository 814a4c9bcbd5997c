use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Opens a temp file in the directory of `path` that `commit` can later
/// rename over it. New files get the usual umask-filtered `0666`; an
/// existing target keeps its own permissions.
pub fn temp_beside(path: &Path) -> io::Result<NamedTempFile> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut builder = tempfile::Builder::new();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(std::fs::Permissions::from_mode(0o666));
    }
    let tmp = builder.tempfile_in(dir)?;

    if let Ok(existing) = std::fs::metadata(path) {
        if existing.is_file() {
            tmp.as_file().set_permissions(existing.permissions())?;
        }
    }
    Ok(tmp)
}

/// Flushes `tmp` to disk and renames it onto `path`.
pub fn commit(tmp: NamedTempFile, path: &Path) -> io::Result<()> {
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Writes `contents` to a temp file beside `path` and renames it into place,
/// so readers only ever see the old file or the complete new one.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut tmp = temp_beside(path)?;
    tmp.write_all(contents)?;
    commit(tmp, path)
}
