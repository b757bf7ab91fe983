//! Cross-platform filesystem helpers.
//!
//! Unix permission bits are captured when archiving and restored on extraction so that
//! executables shipped in an update stay executable. On other platforms the mode is
//! neither recorded nor applied.

use std::fs::Metadata;
use std::io;
use std::path::Path;

#[cfg(unix)]
/// Permission bits of `metadata`, without the file-type bits.
pub fn mode_of(metadata: &Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(metadata.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
pub fn mode_of(_metadata: &Metadata) -> Option<u32> {
    None
}

#[cfg(unix)]
/// Set POSIX permission bits on Unix.
pub fn set_unix_permissions(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
/// No-op off Unix: POSIX permission bits are not preserved.
pub fn set_unix_permissions(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

/// Gives the owner write access to an existing file or directory, so a file can be
/// overwritten or a directory written into. Missing paths are not an error.
pub fn make_writable(path: &Path) -> io::Result<()> {
    let metadata = match std::fs::metadata(path) {
        Ok(md) => md,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    let mut permissions = metadata.permissions();

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if permissions.mode() & 0o200 == 0 {
            permissions.set_mode(permissions.mode() | 0o200);
            std::fs::set_permissions(path, permissions)?;
        }
    }
    #[cfg(not(unix))]
    if permissions.readonly() {
        #[allow(clippy::permissions_set_readonly_false)]
        permissions.set_readonly(false);
        std::fs::set_permissions(path, permissions)?;
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn readonly_file_becomes_writable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locked.bin");
        std::fs::write(&path, b"x").unwrap();
        set_unix_permissions(&path, 0o444).unwrap();
        make_writable(&path).unwrap();
        std::fs::write(&path, b"y").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"y");
        assert_eq!(mode_of(&std::fs::metadata(&path).unwrap()), Some(0o644));
    }

    #[test]
    fn locked_directory_accepts_new_files() {
        let dir = tempfile::tempdir().unwrap();
        let locked = dir.path().join("locked");
        std::fs::create_dir(&locked).unwrap();
        set_unix_permissions(&locked, 0o555).unwrap();
        make_writable(&locked).unwrap();
        assert_eq!(mode_of(&std::fs::metadata(&locked).unwrap()), Some(0o755));
        std::fs::write(locked.join("new.txt"), b"n").unwrap();
    }

    #[test]
    fn missing_file_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        make_writable(&dir.path().join("nope")).unwrap();
    }
}
