//! Temporary on-disk staging for uploads under moderation.
//!
//! A [`StagedFile`] owns its path exclusively and deletes it when dropped,
//! so every exit from a request (admit, rejection, error or panic unwinding)
//! leaves nothing behind in the staging directory.

use std::io;
use std::path::{Path, PathBuf};

const FALLBACK_FILE_NAME: &str = "upload";

/// Directory that staged uploads are written into
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `data` to a fresh staging path derived from the client file name.
    ///
    /// A random prefix keeps concurrent uploads that share a name apart.
    pub async fn stage(&self, file_name: &str, data: &[u8]) -> io::Result<StagedFile> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let original_name = sanitize_file_name(file_name);
        let path = self
            .dir
            .join(format!("{:016x}_{}", rand::random::<u64>(), original_name));

        // Owned before the write so a partial file is still removed on failure
        let staged = StagedFile {
            path,
            original_name,
        };
        tokio::fs::write(&staged.path, data).await?;

        log::info!(
            "[staging] Saved {} bytes to {}",
            data.len(),
            staged.path.display()
        );
        Ok(staged)
    }
}

/// A staged upload. The file is removed when this value is dropped.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    original_name: String,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sanitised name the client uploaded the file under
    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    /// Remove the file now rather than at end of scope.
    pub fn discard(self) {
        drop(self);
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => log::info!("[staging] Removed {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::error!(
                "[staging] Failed to remove {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

/// Reduce a client-supplied file name to a safe single path component.
pub fn sanitize_file_name(name: &str) -> String {
    let base = Path::new(name.trim())
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut cleaned = String::with_capacity(base.len());
    for c in base.chars() {
        let c = if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
            c
        } else {
            '_'
        };
        // Runs of dots collapse to one
        if c == '.' && cleaned.ends_with('.') {
            continue;
        }
        cleaned.push(c);
    }

    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        FALLBACK_FILE_NAME.to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("clip.mp4"), "clip.mp4");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("my holiday (1).jpg"), "my_holiday__1_.jpg");
        assert_eq!(sanitize_file_name(".."), "upload");
        assert_eq!(sanitize_file_name(""), "upload");
        assert_eq!(sanitize_file_name(".hidden"), "hidden");
        assert_eq!(sanitize_file_name("my..cat.png"), "my.cat.png");
        assert_eq!(sanitize_file_name("a...b"), "a.b");
    }

    #[tokio::test]
    async fn test_staged_file_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let area = StagingArea::new(dir.path().join("temp_files"));

        let staged = area.stage("photo.png", b"bytes").await.unwrap();
        let path = staged.path().to_path_buf();
        assert!(path.exists());
        assert_eq!(staged.original_name(), "photo.png");
        assert_eq!(std::fs::read(&path).unwrap(), b"bytes");

        drop(staged);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_same_name_gets_distinct_paths() {
        let dir = tempfile::tempdir().unwrap();
        let area = StagingArea::new(dir.path());

        let a = area.stage("clip.mp4", b"a").await.unwrap();
        let b = area.stage("clip.mp4", b"b").await.unwrap();
        assert_ne!(a.path(), b.path());
        assert!(a.path().starts_with(dir.path()));

        let (pa, pb) = (a.path().to_path_buf(), b.path().to_path_buf());
        a.discard();
        assert!(!pa.exists());
        assert!(pb.exists());
    }

    #[tokio::test]
    async fn test_drop_after_external_removal_is_quiet() {
        let dir = tempfile::tempdir().unwrap();
        let area = StagingArea::new(dir.path());

        let staged = area.stage("note.txt", b"x").await.unwrap();
        std::fs::remove_file(staged.path()).unwrap();
        drop(staged);
    }
}
