//! Disk usage accounting for the upload folder.
//!
//! The tracker keeps the last rescanned total behind an async mutex. Holding
//! the guard is the critical section in which an upload is admitted,
//! committed and rescanned, so concurrent uploads never admit against a
//! stale total.

use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

use crate::atomic::is_staging_name;

#[derive(Debug)]
pub struct UsageTracker {
    folder: PathBuf,
    used: Mutex<u64>,
}

/// Exclusive access to the running total.
pub struct UsageGuard<'a> {
    folder: &'a Path,
    used: MutexGuard<'a, u64>,
}

impl UsageTracker {
    /// Creates the folder when missing (usage 0) or rescans an existing one.
    ///
    /// Staging files left behind by an interrupted run are removed first.
    pub async fn open(folder: PathBuf) -> io::Result<Self> {
        let used = match fs::create_dir(&folder).await {
            Ok(()) => 0,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                remove_staging_files(&folder).await?;
                scan_usage(&folder).await?
            }
            Err(err) => return Err(err),
        };
        Ok(Self {
            folder,
            used: Mutex::new(used),
        })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Last computed total. Only a snapshot: admission must go through [`lock`].
    ///
    /// [`lock`]: UsageTracker::lock
    pub async fn space_used(&self) -> u64 {
        *self.used.lock().await
    }

    pub async fn lock(&self) -> UsageGuard<'_> {
        UsageGuard {
            folder: &self.folder,
            used: self.used.lock().await,
        }
    }
}

impl UsageGuard<'_> {
    pub fn used(&self) -> u64 {
        *self.used
    }

    pub fn fits(&self, size: u64, limit: u64) -> bool {
        fits_within(*self.used, size, limit)
    }

    pub async fn rescan(&mut self) -> io::Result<u64> {
        let total = scan_usage(self.folder).await?;
        *self.used = total;
        Ok(total)
    }

    pub fn set(&mut self, total: u64) {
        *self.used = total;
    }
}

pub fn fits_within(used: u64, size: u64, limit: u64) -> bool {
    used.checked_add(size).is_some_and(|total| total <= limit)
}

async fn remove_staging_files(folder: &Path) -> io::Result<()> {
    let mut dir = fs::read_dir(folder).await?;
    while let Some(entry) = dir.next_entry().await? {
        if !is_staging_name(&entry.file_name().to_string_lossy()) {
            continue;
        }
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let path = entry.path();
        match fs::remove_file(&path).await {
            Ok(()) => info!(path = %path.display(), "removed leftover staging file"),
            Err(err) => warn!(path = %path.display(), error = %err, "failed to remove staging file"),
        }
    }
    Ok(())
}

/// Sums the sizes of regular files directly inside `folder`.
pub async fn scan_usage(folder: &Path) -> io::Result<u64> {
    let mut dir = fs::read_dir(folder).await?;
    let mut used: u64 = 0;
    while let Some(entry) = dir.next_entry().await? {
        if is_staging_name(&entry.file_name().to_string_lossy()) {
            continue;
        }
        let metadata = entry.metadata().await?;
        if metadata.is_file() {
            used = used.saturating_add(metadata.len());
        }
    }
    Ok(used)
}
