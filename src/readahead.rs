//! Background read-ahead.
//!
//! Warms the page cache for a file or a directory tree on a detached,
//! low-priority worker thread. The command completes as soon as the worker
//! is spawned; nothing waits for it and its result is only logged.

use crate::error::{BuiltinError, Result};
use nix::fcntl::{PosixFadviseAdvice, posix_fadvise};
use std::fs::File;
use std::io::{self, Read};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::thread;
use walkdir::WalkDir;

const WORKER_NICE: i32 = 19;

/// Spawn a detached worker that reads ahead `path`.
///
/// With `fully`, every file is read to the end instead of only being
/// advised to the kernel.
///
/// # Errors
///
/// Fails if `path` cannot be stat'ed or the worker cannot be spawned.
pub fn spawn(path: &Path, fully: bool) -> Result<()> {
    std::fs::metadata(path)
        .map_err(|e| BuiltinError::io(format!("Error opening {}", path.display()), e))?;

    let path: PathBuf = path.to_path_buf();
    thread::Builder::new()
        .name("readahead".to_string())
        .spawn(move || {
            lower_priority();
            let started = std::time::Instant::now();
            let files = readahead_tree(&path, fully);
            log::info!(
                "Readahead {} took {}ms for {} files",
                path.display(),
                started.elapsed().as_millis(),
                files
            );
        })
        .map_err(|e| BuiltinError::io("Failed to spawn readahead worker", e))?;
    Ok(())
}

/// Read ahead every regular file under `root` on the same filesystem,
/// without following symlinks. Returns the number of files handled.
pub fn readahead_tree(root: &Path, fully: bool) -> usize {
    let mut files = 0;
    for entry in WalkDir::new(root).follow_links(false).same_file_system(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::debug!("Readahead walk error: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        match readahead_file(entry.path(), fully) {
            Ok(()) => files += 1,
            Err(e) => log::warn!("Readahead of {} failed: {}", entry.path().display(), e),
        }
    }
    files
}

fn readahead_file(path: &Path, fully: bool) -> io::Result<()> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();

    posix_fadvise(
        file.as_raw_fd(),
        0,
        len as nix::libc::off_t,
        PosixFadviseAdvice::POSIX_FADV_WILLNEED,
    )?;

    if fully {
        let mut buf = vec![0u8; 64 * 1024];
        while file.read(&mut buf)? > 0 {}
    }
    Ok(())
}

/// nix has no wrapper for setpriority
fn lower_priority() {
    // SAFETY: who = 0 targets the calling thread
    let rc = unsafe { nix::libc::setpriority(nix::libc::PRIO_PROCESS, 0, WORKER_NICE) };
    if rc != 0 {
        log::debug!("Failed to lower readahead priority: {}", io::Error::last_os_error());
    }
}
