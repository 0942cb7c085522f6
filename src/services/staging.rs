use crate::models::{StagedFile, UploadDescriptor};
use crate::utils::validation::{FilenameError, MAX_FILENAME_BYTES, sanitize_filename_within};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

const COPY_BUFFER_SIZE: usize = 8192;

/// Hex characters in the staging prefix
const ID_LEN: usize = 8;

#[derive(Error, Debug)]
pub enum StagingError {
    #[error("invalid filename: {0}")]
    InvalidFilename(#[from] FilenameError),

    #[error("could not create {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("upload stream could not be read: {0}")]
    Read(#[source] std::io::Error),

    #[error("could not write staged file: {0}")]
    Write(#[source] std::io::Error),

    #[error("file exceeds the maximum size of {max_mb} MB")]
    TooLarge { max_mb: u64 },
}

/// Random 8-hex-character prefix that keeps staged names unique
fn short_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(ID_LEN);
    id
}

fn file_stem(name: &str) -> String {
    Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or(name)
        .to_string()
}

/// Persist one upload under `destination` with a unique name. The stream is
/// drained to completion; writing stops with `TooLarge` once more than
/// `max_bytes` have arrived, whatever size the client declared.
pub async fn stage_upload(
    upload: UploadDescriptor,
    destination: &Path,
    max_bytes: u64,
) -> Result<StagedFile, StagingError> {
    let UploadDescriptor {
        filename,
        mut reader,
        ..
    } = upload;

    // `<id>_` is prepended, the whole component must still fit the filesystem
    let sanitized = sanitize_filename_within(&filename, MAX_FILENAME_BYTES - ID_LEN - 1)?;
    let path = destination.join(format!("{}_{}", short_id(), sanitized));

    let mut file = tokio::fs::File::create(&path)
        .await
        .map_err(|source| StagingError::Create {
            path: path.clone(),
            source,
        })?;

    let copied = async {
        let mut buffer = [0u8; COPY_BUFFER_SIZE];
        let mut total: u64 = 0;
        loop {
            let n = reader.read(&mut buffer).await.map_err(StagingError::Read)?;
            if n == 0 {
                break;
            }
            total += n as u64;
            if total > max_bytes {
                return Err(StagingError::TooLarge {
                    max_mb: max_bytes / (1024 * 1024),
                });
            }
            file.write_all(&buffer[..n])
                .await
                .map_err(StagingError::Write)?;
        }
        file.flush().await.map_err(StagingError::Write)?;
        Ok::<u64, StagingError>(total)
    }
    .await;

    match copied {
        Ok(total) => {
            tracing::debug!("Staged {} ({} bytes) at {}", filename, total, path.display());
            Ok(StagedFile {
                stem: file_stem(&sanitized),
                path,
                original_name: filename,
            })
        }
        Err(e) => {
            drop(file);
            if let Err(remove_err) = tokio::fs::remove_file(&path).await {
                tracing::debug!(
                    "Could not remove partial upload {}: {}",
                    path.display(),
                    remove_err
                );
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncRead, ReadBuf};

    struct FailingReader;

    impl AsyncRead for FailingReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            Poll::Ready(Err(std::io::Error::other("connection reset")))
        }
    }

    #[tokio::test]
    async fn test_stage_writes_full_content_with_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let upload = UploadDescriptor::from_bytes(
            "report.docx",
            None,
            Bytes::from(vec![7u8; 20_000]),
        );

        let staged = stage_upload(upload, dir.path(), 1024 * 1024).await.unwrap();

        let name = staged.path.file_name().unwrap().to_str().unwrap();
        assert_eq!(name.len(), "12345678_report.docx".len());
        assert!(name.ends_with("_report.docx"));
        assert!(name[..8].chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(staged.original_name, "report.docx");
        assert_eq!(staged.stem, "report");
        assert_eq!(std::fs::read(&staged.path).unwrap().len(), 20_000);
    }

    #[tokio::test]
    async fn test_longest_legal_name_still_stages() {
        let dir = tempfile::tempdir().unwrap();
        let filename = format!("{}.docx", "a".repeat(250));
        assert_eq!(filename.len(), MAX_FILENAME_BYTES);

        let upload = UploadDescriptor::from_bytes(filename.clone(), None, Bytes::from_static(b"doc"));
        let staged = stage_upload(upload, dir.path(), 1024).await.unwrap();

        let name = staged.path.file_name().unwrap().to_str().unwrap();
        assert_eq!(name.len(), MAX_FILENAME_BYTES);
        assert!(name.ends_with(".docx"));
        assert_eq!(staged.original_name, filename);
        assert_eq!(std::fs::read(&staged.path).unwrap(), b"doc");
    }

    #[tokio::test]
    async fn test_same_name_twice_gets_distinct_paths() {
        let dir = tempfile::tempdir().unwrap();
        let a = stage_upload(
            UploadDescriptor::from_bytes("a.pdf", None, Bytes::from_static(b"one")),
            dir.path(),
            1024,
        )
        .await
        .unwrap();
        let b = stage_upload(
            UploadDescriptor::from_bytes("a.pdf", None, Bytes::from_static(b"two")),
            dir.path(),
            1024,
        )
        .await
        .unwrap();
        assert_ne!(a.path, b.path);
    }

    #[tokio::test]
    async fn test_stream_cap_applies_without_declared_size() {
        let dir = tempfile::tempdir().unwrap();
        let upload = UploadDescriptor::new(
            "huge.pdf",
            None,
            None,
            Box::pin(std::io::Cursor::new(vec![0u8; 4096])),
        );

        let err = stage_upload(upload, dir.path(), 1000).await.unwrap_err();
        assert!(matches!(err, StagingError::TooLarge { .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_read_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let upload = UploadDescriptor::new("x.pdf", None, None, Box::pin(FailingReader));
        let err = stage_upload(upload, dir.path(), 1000).await.unwrap_err();
        assert!(matches!(err, StagingError::Read(_)));
    }

    #[tokio::test]
    async fn test_missing_destination_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let upload = UploadDescriptor::from_bytes("x.pdf", None, Bytes::from_static(b"x"));
        let err = stage_upload(upload, &missing, 1000).await.unwrap_err();
        assert!(matches!(err, StagingError::Create { .. }));
    }

    #[tokio::test]
    async fn test_hidden_name_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let upload = UploadDescriptor::from_bytes(".pdf", None, Bytes::from_static(b"x"));
        let err = stage_upload(upload, dir.path(), 1000).await.unwrap_err();
        assert!(matches!(err, StagingError::InvalidFilename(FilenameError::Hidden)));
    }
}
