//! Directory provisioning and pruning for shard directories.
use std::{
    fs::{self, DirBuilder, File, OpenOptions},
    io,
    path::{Path, PathBuf},
    sync::Mutex,
};

use log::trace;

use super::MessageId;

/// The directory tree holding a queue's message files.
///
/// Creating a file (with its shard directories) and removing one (with the
/// pruning that follows) both run under one lock, so a directory is never
/// pruned between being created for a new message and that message's file
/// appearing in it.
#[derive(Debug)]
pub struct ShardTree {
    root: PathBuf,
    lock: Mutex<()>,
}

impl ShardTree {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn message_path(&self, id: &MessageId) -> PathBuf {
        self.root.join(id.shard_path())
    }

    /// Creates a new, empty message file for `id`.
    pub fn create(&self, id: &MessageId) -> io::Result<File> {
        let path = self.message_path(id);
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        ensure_parent_dirs(&path)?;
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
    }

    /// Deletes a message file and prunes the shard directories it leaves empty.
    pub fn remove(&self, path: &Path) -> io::Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        fs::remove_file(path)?;
        prune_empty_dirs(path, &self.root)
    }
}

/// Creates every missing parent directory of `path`.
///
/// New directories take the permissions of the closest ancestor that already
/// exists, so a queue root created with restricted permissions keeps them all
/// the way down.
pub fn ensure_parent_dirs(path: &Path) -> io::Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() || parent.is_dir() {
        return Ok(());
    }

    let existing = parent.ancestors().find(|dir| dir.is_dir());
    let mut builder = DirBuilder::new();
    builder.recursive(true);

    if let Some(existing) = existing {
        inherit_mode(&mut builder, existing)?;
    }

    trace!("creating shard directory {}", parent.display());
    builder.create(parent)
}

#[cfg(unix)]
fn inherit_mode(builder: &mut DirBuilder, from: &Path) -> io::Result<()> {
    use std::os::unix::fs::{DirBuilderExt, PermissionsExt};

    let mode = fs::metadata(from)?.permissions().mode();
    builder.mode(mode & 0o7777);
    Ok(())
}

#[cfg(not(unix))]
fn inherit_mode(_builder: &mut DirBuilder, _from: &Path) -> io::Result<()> {
    Ok(())
}

/// Removes the now-empty directories between `file` and `root`.
///
/// Walks upward from the file's parent, deleting each directory while it is
/// empty. Stops at the first non-empty directory, and never touches `root`
/// itself or anything outside it.
pub fn prune_empty_dirs(file: &Path, root: &Path) -> io::Result<()> {
    let mut current = file.parent();

    while let Some(dir) = current {
        if dir == root || !dir.starts_with(root) {
            break;
        }

        match fs::read_dir(dir) {
            Ok(mut entries) => {
                if entries.next().is_some() {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                current = dir.parent();
                continue;
            }
            Err(e) => return Err(e),
        }

        match fs::remove_dir(dir) {
            Ok(()) => trace!("pruned empty directory {}", dir.display()),
            // Another entry landed in the directory after the emptiness check.
            Err(e) if e.kind() == io::ErrorKind::DirectoryNotEmpty => break,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        current = dir.parent();
    }

    Ok(())
}
