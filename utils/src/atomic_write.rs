//! Atomic file write helpers.
//!
//! Bytes are written to a temp file in the target's directory, synced, then
//! renamed over the target. A write that is staged but never committed leaves
//! the target untouched; the temp file is removed on drop.

use std::fs::{self, File, Permissions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PersistMode {
    /// Inherit the temp file's default mode.
    #[default]
    Default,
    /// Owner-only read/write (0o600 on Unix).
    OwnerOnly,
    /// Apply an explicit Unix mode. Ignored on non-Unix platforms.
    Preserve(u32),
}

impl PersistMode {
    /// Keep the mode of the file currently at `path`, if there is one.
    #[must_use]
    pub fn preserve_existing(path: &Path) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(meta) = fs::metadata(path) {
                return Self::Preserve(meta.permissions().mode() & 0o7777);
            }
        }
        #[cfg(not(unix))]
        let _ = path;
        Self::Default
    }

    #[cfg(unix)]
    fn mode(self) -> Option<u32> {
        match self {
            Self::Default => None,
            Self::OwnerOnly => Some(0o600),
            Self::Preserve(mode) => Some(mode),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSyncPolicy {
    SyncAll,
    SkipSync,
}

#[derive(Debug, Clone, Copy)]
pub struct AtomicWriteOptions {
    pub file_sync: FileSyncPolicy,
    /// Sync the parent directory after the rename (best effort).
    pub sync_parent: bool,
    pub mode: PersistMode,
}

impl Default for AtomicWriteOptions {
    fn default() -> Self {
        Self {
            file_sync: FileSyncPolicy::SyncAll,
            sync_parent: false,
            mode: PersistMode::Default,
        }
    }
}

impl AtomicWriteOptions {
    /// Options that keep the Unix mode of whatever file is at `path` now.
    #[must_use]
    pub fn preserving(path: &Path) -> Self {
        Self {
            mode: PersistMode::preserve_existing(path),
            ..Self::default()
        }
    }
}

/// A fully written temp file waiting to be renamed over its target.
#[derive(Debug)]
pub struct StagedWrite {
    tmp: NamedTempFile,
    target: PathBuf,
    options: AtomicWriteOptions,
}

impl StagedWrite {
    /// Write `bytes` next to `path` without touching `path` itself.
    pub fn stage(
        path: impl AsRef<Path>,
        bytes: &[u8],
        options: AtomicWriteOptions,
    ) -> io::Result<Self> {
        let target = path.as_ref().to_path_buf();
        let parent = parent_dir(&target);

        let mut tmp = NamedTempFile::new_in(parent)?;
        #[cfg(unix)]
        if let Some(mode) = options.mode.mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(tmp.path(), Permissions::from_mode(mode))?;
        }

        tmp.write_all(bytes)?;
        if matches!(options.file_sync, FileSyncPolicy::SyncAll) {
            tmp.as_file().sync_all()?;
        }

        Ok(Self {
            tmp,
            target,
            options,
        })
    }

    #[must_use]
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Rename the staged file over the target.
    pub fn commit(self) -> io::Result<()> {
        let Self {
            tmp,
            target,
            options,
        } = self;

        tmp.persist(&target).map_err(|err| err.error)?;

        #[cfg(unix)]
        if let Some(mode) = options.mode.mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&target, Permissions::from_mode(mode))?;
        }

        if options.sync_parent {
            best_effort_sync_parent_dir(parent_dir(&target));
        }
        Ok(())
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

fn best_effort_sync_parent_dir(parent: &Path) {
    #[cfg(unix)]
    if let Err(e) = File::open(parent).and_then(|d| d.sync_all()) {
        debug!(path = %parent.display(), "Parent directory sync_all failed (best-effort): {e}");
    }
    #[cfg(not(unix))]
    let _ = parent;
}

pub fn atomic_write(path: impl AsRef<Path>, bytes: &[u8]) -> io::Result<()> {
    atomic_write_with_options(path, bytes, AtomicWriteOptions::default())
}

pub fn atomic_write_with_options(
    path: impl AsRef<Path>,
    bytes: &[u8],
    options: AtomicWriteOptions,
) -> io::Result<()> {
    StagedWrite::stage(path, bytes, options)?.commit()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{AtomicWriteOptions, FileSyncPolicy, PersistMode, StagedWrite, atomic_write_with_options};

    fn fast() -> AtomicWriteOptions {
        AtomicWriteOptions {
            file_sync: FileSyncPolicy::SkipSync,
            sync_parent: false,
            mode: PersistMode::Default,
        }
    }

    #[test]
    fn atomic_write_overwrites_existing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("test.txt");

        atomic_write_with_options(&path, b"one", fast()).expect("write one");
        atomic_write_with_options(&path, b"two", fast()).expect("write two");

        assert_eq!(fs::read_to_string(&path).expect("read"), "two");
        assert_eq!(fs::read_dir(dir.path()).expect("read_dir").count(), 1);
    }

    #[test]
    fn staged_write_dropped_before_commit_leaves_target_intact() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("keep.txt");
        fs::write(&path, "original contents").expect("seed");

        let staged = StagedWrite::stage(&path, b"half", fast()).expect("stage");
        assert_eq!(staged.target(), path.as_path());
        drop(staged);

        assert_eq!(fs::read_to_string(&path).expect("read"), "original contents");
        assert_eq!(fs::read_dir(dir.path()).expect("read_dir").count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn preserving_options_keep_existing_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("script.sh");
        fs::write(&path, "#!/bin/sh\n").expect("seed");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");

        let opts = AtomicWriteOptions {
            file_sync: FileSyncPolicy::SkipSync,
            ..AtomicWriteOptions::preserving(&path)
        };
        atomic_write_with_options(&path, b"#!/bin/sh\necho hi\n", opts).expect("write");

        let mode = fs::metadata(&path).expect("metadata").permissions().mode() & 0o777;
        assert_eq!(mode, 0o755);
    }

    #[cfg(unix)]
    #[test]
    fn owner_only_mode_is_applied() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("secure.json");
        let opts = AtomicWriteOptions {
            mode: PersistMode::OwnerOnly,
            ..fast()
        };

        atomic_write_with_options(&path, b"{}", opts).expect("write");

        let mode = fs::metadata(&path).expect("metadata").permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
