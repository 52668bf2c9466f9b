use axum::body::Bytes;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use futures_util::stream::{Stream, StreamExt};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::pin::pin;
use std::time::{Duration, UNIX_EPOCH};
use tokio::fs;
use tokio::io::{AsyncWriteExt, ErrorKind};
use tracing::warn;

use crate::atomic::{AtomicFile, is_staging_name};
use crate::config::NEUTRALIZED_SUFFIX;
use crate::settings::Limits;
use crate::usage::{UsageTracker, fits_within};

/// The upload folder: admission limits, usage accounting and committed files.
#[derive(Debug)]
pub struct Storage {
    tracker: UsageTracker,
    limits: Limits,
}

#[derive(Debug)]
pub struct StoredFile {
    pub name: String,
    pub size: u64,
    pub space_used: u64,
}

impl Storage {
    pub async fn open(root: PathBuf, limits: Limits) -> io::Result<Self> {
        let tracker = UsageTracker::open(root).await?;
        Ok(Self { tracker, limits })
    }

    pub fn root_path(&self) -> &Path {
        self.tracker.folder()
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub async fn space_used(&self) -> u64 {
        self.tracker.space_used().await
    }

    /// Validates a client supplied file name and neutralizes forbidden extensions.
    pub fn destination_name(&self, client_name: &str) -> Result<String, StorageError> {
        let name = check_file_name(client_name)?;
        Ok(neutralize(name, &self.limits.forbidden_extensions))
    }

    /// Streams an upload into a staging file, then admits and commits it.
    ///
    /// Per-file and quota limits are checked against the bytes actually
    /// received. The final quota check, the rename into place and the rescan
    /// happen while the usage guard is held. No file is left behind on any
    /// rejection or I/O failure.
    pub async fn store<S, E>(&self, client_name: &str, body: S) -> Result<StoredFile, StorageError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Into<StorageError>,
    {
        let name = self.destination_name(client_name)?;
        let target = self.root_path().join(&name);
        let snapshot = self.tracker.space_used().await;

        let mut atomic = AtomicFile::new(&target).await?;
        let size = match self.stage(&mut atomic, body, snapshot).await {
            Ok(size) => size,
            Err(err) => {
                atomic.cleanup().await;
                return Err(err);
            }
        };

        let mut usage = self.tracker.lock().await;
        if !usage.fits(size, self.limits.size_limit_bytes) {
            atomic.cleanup().await;
            return Err(StorageError::QuotaExceeded);
        }
        atomic.finalize().await?;

        let space_used = match usage.rescan().await {
            Ok(total) => total,
            Err(err) => {
                warn!(error = %err, "failed to update used space");
                let total = usage.used().saturating_add(size);
                usage.set(total);
                total
            }
        };

        Ok(StoredFile {
            name,
            size,
            space_used,
        })
    }

    async fn stage<S, E>(
        &self,
        atomic: &mut AtomicFile,
        body: S,
        snapshot: u64,
    ) -> Result<u64, StorageError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Into<StorageError>,
    {
        let mut body = pin!(body);
        let mut written: u64 = 0;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(Into::into)?;
            if chunk.is_empty() {
                continue;
            }
            written = written.saturating_add(chunk.len() as u64);
            if written > self.limits.single_file_size_limit_bytes {
                return Err(StorageError::FileTooLarge);
            }
            if !fits_within(snapshot, written, self.limits.size_limit_bytes) {
                return Err(StorageError::QuotaExceeded);
            }
            atomic.file_mut().write_all(&chunk).await?;
        }
        Ok(written)
    }

    pub async fn resolve_path_checked(&self, relative: &str) -> Result<PathBuf, StorageError> {
        let target = self.resolve(relative)?;
        self.ensure_no_symlink_components(&target).await?;
        Ok(target)
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf, StorageError> {
        let mut normalized = PathBuf::new();
        let trimmed = relative.trim_start_matches(['/', '\\']);
        for component in Path::new(trimmed).components() {
            match component {
                Component::Normal(segment) => {
                    if is_staging_name(&segment.to_string_lossy()) {
                        return Err(StorageError::InvalidPath);
                    }
                    normalized.push(segment)
                }
                Component::CurDir => continue,
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(StorageError::InvalidPath);
                }
            }
        }
        Ok(self.root_path().join(normalized))
    }

    async fn ensure_no_symlink_components(&self, target: &Path) -> Result<(), StorageError> {
        let root = self.root_path();
        let relative = target
            .strip_prefix(root)
            .map_err(|_| StorageError::InvalidPath)?;
        let mut current = root.to_path_buf();
        let mut components = relative.components().peekable();

        while let Some(component) = components.next() {
            current.push(component.as_os_str());
            let metadata = fs::symlink_metadata(&current).await?;
            if metadata.file_type().is_symlink() {
                return Err(StorageError::InvalidPath);
            }
            if components.peek().is_some() && !metadata.is_dir() {
                return Err(StorageError::InvalidPath);
            }
        }

        Ok(())
    }

    /// Lists the regular files in the upload folder, hiding staging files.
    pub async fn list_files(&self) -> Result<Vec<FileEntry>, StorageError> {
        let mut dir = fs::read_dir(self.root_path()).await?;
        let mut entries = Vec::new();

        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if is_staging_name(&name) {
                continue;
            }
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata
                .modified()
                .ok()
                .and_then(|ts| ts.duration_since(UNIX_EPOCH).ok())
                .map(format_timestamp);

            entries.push(FileEntry {
                name,
                size: metadata.len(),
                modified,
            });
        }

        entries.sort_by_key(|entry| entry.name.to_lowercase());

        Ok(entries)
    }
}

/// Accepts only a single plain path component.
fn check_file_name(name: &str) -> Result<&str, StorageError> {
    if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\', '\0']) {
        return Err(StorageError::InvalidName);
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(name),
        _ => Err(StorageError::InvalidName),
    }
}

/// Appends the neutral suffix when the extension is forbidden (case-insensitive).
pub fn neutralize(name: &str, forbidden: &[String]) -> String {
    let Some(ext) = Path::new(name).extension().and_then(|ext| ext.to_str()) else {
        return name.to_string();
    };
    let ext = ext.to_lowercase();
    if forbidden
        .iter()
        .any(|entry| entry.trim_start_matches('.').to_lowercase() == ext)
    {
        format!("{name}{NEUTRALIZED_SUFFIX}")
    } else {
        name.to_string()
    }
}

fn format_timestamp(duration: Duration) -> String {
    let timestamp = UNIX_EPOCH + duration;
    let datetime: DateTime<Utc> = timestamp.into();
    datetime.format("%Y-%m-%d %H:%M:%S").to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid file name")]
    InvalidName,
    #[error("invalid path")]
    InvalidPath,
    #[error("file too large")]
    FileTooLarge,
    #[error("not enough space")]
    QuotaExceeded,
    #[error("upload stream failed: {0}")]
    Stream(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<MultipartError> for StorageError {
    fn from(err: MultipartError) -> Self {
        // Hitting the request body limit means the file did not fit.
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            StorageError::FileTooLarge
        } else {
            StorageError::Stream(err.body_text())
        }
    }
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::Io(err) if err.kind() == ErrorKind::NotFound)
    }
}

pub struct FileEntry {
    pub name: String,
    pub size: u64,
    pub modified: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MIB;
    use crate::usage::scan_usage;
    use futures_util::stream;
    use tempfile::tempdir;

    fn limits(size_mib: u64, single_mib: u64) -> Limits {
        Limits {
            size_limit_bytes: size_mib * MIB,
            single_file_size_limit_bytes: single_mib * MIB,
            max_multipart_bytes: single_mib * MIB + (10 << 10),
            read_only: false,
            forbidden_extensions: vec![".html".to_string()],
        }
    }

    async fn make_storage(size_mib: u64, single_mib: u64) -> (tempfile::TempDir, Storage) {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("uploads");
        let storage = Storage::open(root, limits(size_mib, single_mib))
            .await
            .expect("open storage");
        (temp, storage)
    }

    fn body(len: u64) -> impl Stream<Item = Result<Bytes, StorageError>> {
        let chunk = Bytes::from(vec![7u8; 64 * 1024]);
        let full = (len / chunk.len() as u64) as usize;
        let rest = (len % chunk.len() as u64) as usize;
        let mut chunks: Vec<Result<Bytes, StorageError>> =
            (0..full).map(|_| Ok(chunk.clone())).collect();
        if rest > 0 {
            chunks.push(Ok(Bytes::from(vec![7u8; rest])));
        }
        stream::iter(chunks)
    }

    fn folder_names(storage: &Storage) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(storage.root_path())
            .expect("read dir")
            .filter_map(Result::ok)
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn oversized_file_is_rejected_without_writing() {
        let (_temp, storage) = make_storage(10, 8).await;

        let result = storage.store("big.bin", body(9 * MIB)).await;

        assert!(matches!(result, Err(StorageError::FileTooLarge)));
        assert!(folder_names(&storage).is_empty());
        assert_eq!(storage.space_used().await, 0);
    }

    #[tokio::test]
    async fn upload_over_quota_is_rejected() {
        let (_temp, storage) = make_storage(10, 8).await;
        std::fs::write(storage.root_path().join("existing.bin"), vec![0u8; 9 * MIB as usize])
            .expect("seed file");
        storage.tracker.lock().await.rescan().await.expect("rescan");

        let result = storage.store("more.bin", body(2 * MIB)).await;

        assert!(matches!(result, Err(StorageError::QuotaExceeded)));
        assert_eq!(folder_names(&storage), vec!["existing.bin".to_string()]);
        assert_eq!(storage.space_used().await, 9 * MIB);
    }

    #[tokio::test]
    async fn forbidden_extension_is_neutralized() {
        let (_temp, storage) = make_storage(10, 8).await;

        let stored = storage
            .store("page.html", body(3 * 1024))
            .await
            .expect("store page");

        assert_eq!(stored.name, "page.html.txt");
        assert_eq!(stored.size, 3 * 1024);
        assert_eq!(stored.space_used, 3 * 1024);
        assert_eq!(folder_names(&storage), vec!["page.html.txt".to_string()]);
    }

    #[tokio::test]
    async fn usage_matches_folder_after_each_upload() {
        let (_temp, storage) = make_storage(10, 8).await;

        for (name, len) in [("a.bin", 1000), ("b.bin", 70_000), ("c.bin", 0)] {
            let stored = storage.store(name, body(len)).await.expect("store");
            let on_disk = crate::usage::scan_usage(storage.root_path())
                .await
                .expect("scan");
            assert_eq!(stored.space_used, on_disk);
            assert_eq!(storage.space_used().await, on_disk);
        }
        assert_eq!(storage.space_used().await, 71_000);
    }

    #[tokio::test]
    async fn concurrent_uploads_cannot_jointly_exceed_quota() {
        let (_temp, storage) = make_storage(10, 8).await;

        let (first, second) = tokio::join!(
            storage.store("one.bin", body(6 * MIB)),
            storage.store("two.bin", body(6 * MIB)),
        );

        let admitted = [first.is_ok(), second.is_ok()]
            .iter()
            .filter(|ok| **ok)
            .count();
        assert_eq!(admitted, 1);
        assert!(
            matches!(first, Err(StorageError::QuotaExceeded))
                || matches!(second, Err(StorageError::QuotaExceeded))
        );
        assert_eq!(folder_names(&storage).len(), 1);
        assert_eq!(storage.space_used().await, 6 * MIB);
    }

    /// Stages and commits like `store`, but admits against a caller-supplied
    /// snapshot and never takes the usage guard.
    async fn store_unguarded(
        storage: &Storage,
        client_name: &str,
        len: u64,
        snapshot: u64,
    ) -> Result<String, StorageError> {
        let name = storage.destination_name(client_name)?;
        let mut atomic = AtomicFile::new(&storage.root_path().join(&name)).await?;
        let size = match storage.stage(&mut atomic, body(len), snapshot).await {
            Ok(size) => size,
            Err(err) => {
                atomic.cleanup().await;
                return Err(err);
            }
        };
        if !fits_within(snapshot, size, storage.limits().size_limit_bytes) {
            atomic.cleanup().await;
            return Err(StorageError::QuotaExceeded);
        }
        atomic.finalize().await?;
        Ok(name)
    }

    #[tokio::test]
    async fn stale_snapshot_admission_lets_both_uploads_through() {
        let (_temp, storage) = make_storage(10, 8).await;
        let limit = storage.limits().size_limit_bytes;

        let snapshot = storage.space_used().await;
        let (first, second) = tokio::join!(
            store_unguarded(&storage, "first.bin", 6 * MIB, snapshot),
            store_unguarded(&storage, "second.bin", 6 * MIB, snapshot),
        );

        assert_eq!(first.expect("first upload"), "first.bin");
        assert_eq!(second.expect("second upload"), "second.bin");
        assert_eq!(folder_names(&storage), vec!["first.bin", "second.bin"]);
        let on_disk = scan_usage(storage.root_path()).await.expect("scan");
        assert_eq!(on_disk, 12 * MIB);
        assert!(on_disk > limit);
    }

    #[tokio::test]
    async fn long_file_names_can_be_staged() {
        let (_temp, storage) = make_storage(10, 8).await;
        let name = format!("{}.bin", "a".repeat(226));
        assert_eq!(name.len(), 230);

        let stored = storage.store(&name, body(1024)).await.expect("store");

        assert_eq!(stored.name, name);
        assert_eq!(folder_names(&storage), vec![name]);
        assert_eq!(storage.space_used().await, 1024);
    }

    #[tokio::test]
    async fn stream_failure_discards_partial_file() {
        let (_temp, storage) = make_storage(10, 8).await;
        let chunks: Vec<Result<Bytes, StorageError>> = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(StorageError::Stream("peer went away".into())),
        ];

        let result = storage.store("cut.bin", stream::iter(chunks)).await;

        assert!(matches!(result, Err(StorageError::Stream(_))));
        assert!(folder_names(&storage).is_empty());
    }

    #[tokio::test]
    async fn traversal_names_are_rejected() {
        let (temp, storage) = make_storage(10, 8).await;

        for name in ["../escape.txt", "..", "dir/inner.txt", "dir\\inner.txt", ".hidden", ""] {
            let result = storage.store(name, body(10)).await;
            assert!(
                matches!(result, Err(StorageError::InvalidName)),
                "{name:?} should be rejected"
            );
        }
        assert!(!temp.path().join("escape.txt").exists());
        assert!(folder_names(&storage).is_empty());
    }

    #[test]
    fn neutralize_is_case_insensitive() {
        let forbidden = vec![".html".to_string(), ".SVG".to_string()];
        assert_eq!(neutralize("page.HTML", &forbidden), "page.HTML.txt");
        assert_eq!(neutralize("logo.svg", &forbidden), "logo.svg.txt");
        assert_eq!(neutralize("notes.md", &forbidden), "notes.md");
        assert_eq!(neutralize("Makefile", &forbidden), "Makefile");
    }

    #[tokio::test]
    async fn list_files_hides_staging_entries_and_directories() {
        let (_temp, storage) = make_storage(10, 8).await;
        std::fs::write(storage.root_path().join("b.txt"), b"b").expect("write b");
        std::fs::write(storage.root_path().join("A.txt"), b"a").expect("write a");
        std::fs::write(storage.root_path().join(".b.txt.tmp.123"), b"x").expect("write tmp");
        std::fs::create_dir(storage.root_path().join("nested")).expect("mkdir");

        let entries = storage.list_files().await.expect("list");
        let names: Vec<&str> = entries.iter().map(|entry| entry.name.as_str()).collect();
        assert_eq!(names, vec!["A.txt", "b.txt"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn resolve_path_rejects_symlink() {
        use std::os::unix::fs::symlink;

        let (temp, storage) = make_storage(10, 8).await;
        let outside = temp.path().join("outside.txt");
        std::fs::write(&outside, b"secret").expect("write outside file");
        symlink(&outside, storage.root_path().join("link")).expect("symlink");

        let result = storage.resolve_path_checked("link").await;
        assert!(matches!(result, Err(StorageError::InvalidPath)));
        let result = storage.resolve_path_checked("../outside.txt").await;
        assert!(matches!(result, Err(StorageError::InvalidPath)));
    }
}
