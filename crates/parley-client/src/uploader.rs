//! Attachment upload.
//!
//! Turns a locally picked file into a stored, publicly addressable object.
//! Nothing here touches the message store: a message may only reference an
//! attachment after [`AttachmentUploader::upload`] returned it.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use parley_shared::constants::MAX_STORED_FILE_NAME;
use parley_shared::{Attachment, AttachmentKind, AttachmentMetadata, UserId};
use tracing::{debug, info, warn};

use crate::backend::ObjectStorage;
use crate::error::UploadError;

/// A file picked for the next message but not uploaded yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAttachment {
    pub path: PathBuf,
    pub kind: AttachmentKind,
    pub file_name: String,
    pub mime_type: String,
    pub size: u64,
}

impl PendingAttachment {
    /// Describe a local file; the name defaults to the path's file name.
    pub fn new(path: impl Into<PathBuf>, kind: AttachmentKind, mime_type: impl Into<String>) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file")
            .to_string();
        let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        Self {
            path,
            kind,
            file_name,
            mime_type: mime_type.into(),
            size,
        }
    }

    /// What the attachment will look like locally until the upload lands.
    pub(crate) fn local_preview(&self) -> Attachment {
        Attachment {
            url: format!("file://{}", self.path.display()),
            kind: self.kind,
            metadata: AttachmentMetadata {
                file_name: self.file_name.clone(),
                file_size: self.size,
                mime_type: self.mime_type.clone(),
            },
        }
    }
}

/// Reduce a name to a safe single path segment.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let mut cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.len() > MAX_STORED_FILE_NAME {
        // ASCII only at this point, any byte index is a char boundary
        cleaned.truncate(MAX_STORED_FILE_NAME);
    }
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

/// Map an owner id onto one path segment without collisions. Bytes other
/// than ASCII alphanumerics, `-` and `_` are written as `~XX`, `~` included.
fn owner_segment(owner: &UserId) -> String {
    let mut segment = String::with_capacity(owner.as_str().len());
    for b in owner.as_str().bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
            segment.push(char::from(b));
        } else {
            segment.push_str(&format!("~{b:02X}"));
        }
    }
    segment
}

/// `{owner_id}/{unix_millis}-{sanitized_filename}`
pub fn storage_key(owner: &UserId, file_name: &str, unix_millis: i64) -> String {
    format!(
        "{}/{}-{}",
        owner_segment(owner),
        unix_millis,
        sanitize_file_name(file_name)
    )
}

#[derive(Clone)]
pub struct AttachmentUploader {
    storage: Arc<dyn ObjectStorage>,
}

impl AttachmentUploader {
    pub fn new(storage: Arc<dyn ObjectStorage>) -> Self {
        Self { storage }
    }

    pub async fn upload(
        &self,
        pending: &PendingAttachment,
        owner: &UserId,
    ) -> Result<Attachment, UploadError> {
        let data = tokio::fs::read(&pending.path).await.map_err(|e| {
            warn!(path = %pending.path.display(), error = %e, "Attachment unreadable");
            UploadError::Unreadable(format!("{}: {e}", pending.path.display()))
        })?;
        if data.is_empty() {
            return Err(UploadError::Unreadable(format!(
                "{}: file is empty",
                pending.path.display()
            )));
        }

        let key = storage_key(owner, &pending.file_name, Utc::now().timestamp_millis());
        let file_size = data.len() as u64;
        debug!(key = %key, size = file_size, "Uploading attachment");

        let url = self.storage.put(&key, data, &pending.mime_type).await?;

        info!(key = %key, size = file_size, kind = %pending.kind, "Attachment uploaded");
        Ok(Attachment {
            url,
            kind: pending.kind,
            metadata: AttachmentMetadata {
                file_name: pending.file_name.clone(),
                file_size,
                mime_type: pending.mime_type.clone(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use parley_store::ObjectStore;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn sanitizes_names() {
        assert_eq!(sanitize_file_name("holiday photo.JPG"), "holiday_photo.JPG");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "_.._etc_passwd");
        assert_eq!(sanitize_file_name(".hidden"), "hidden");
        assert_eq!(sanitize_file_name("ünï"), "_n_");
        assert_eq!(sanitize_file_name(""), "file");
        assert_eq!(sanitize_file_name(&"a".repeat(300)).len(), MAX_STORED_FILE_NAME);
    }

    #[test]
    fn key_is_namespaced_by_owner() {
        let key = storage_key(&"alice".into(), "cat pic.png", 1_700_000_000_000);
        assert_eq!(key, "alice/1700000000000-cat_pic.png");
    }

    #[test]
    fn distinct_owners_never_share_a_prefix() {
        let owners = ["a b", "a_b", "a~20b", "a.b", "..", "ü"];
        let prefixes: Vec<String> = owners
            .iter()
            .map(|o| owner_segment(&(*o).into()))
            .collect();
        assert_eq!(prefixes, ["a~20b", "a_b", "a~7E20b", "a~2Eb", "~2E~2E", "~C3~BC"]);

        let mut unique = prefixes.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), owners.len());
    }

    #[tokio::test]
    async fn upload_stores_bytes_and_reports_metadata() {
        let dir = TempDir::new().unwrap();
        let objects = ObjectStore::new(dir.path().join("objects"), "http://localhost:8080", 1 << 20)
            .await
            .unwrap();
        let file = dir.path().join("cat.png");
        std::fs::write(&file, b"meow-bytes").unwrap();

        let uploader = AttachmentUploader::new(Arc::new(objects.clone()));
        let pending = PendingAttachment::new(&file, AttachmentKind::Image, "image/png");
        let attachment = uploader.upload(&pending, &"alice".into()).await.unwrap();

        assert!(attachment.url.starts_with("http://localhost:8080/objects/alice/"));
        assert_eq!(attachment.metadata.file_size, 10);
        assert_eq!(attachment.metadata.file_name, "cat.png");

        let key = objects.key_for_url(&attachment.url).unwrap();
        let (data, content_type) = objects.get(key).await.unwrap();
        assert_eq!(data, b"meow-bytes");
        assert_eq!(content_type, "image/png");
    }

    #[tokio::test]
    async fn oversized_file_is_rejected_not_retried() {
        let dir = TempDir::new().unwrap();
        let objects = ObjectStore::new(dir.path().join("objects"), "http://localhost", 4)
            .await
            .unwrap();
        let file = dir.path().join("big.bin");
        std::fs::write(&file, b"0123456789").unwrap();

        let uploader = AttachmentUploader::new(Arc::new(objects));
        let pending = PendingAttachment::new(&file, AttachmentKind::Document, "application/octet-stream");
        let err = uploader.upload(&pending, &"alice".into()).await.unwrap_err();

        assert!(matches!(err, UploadError::Rejected(ref reason) if reason.contains("too large")));
        let err = crate::error::ClientError::from(err);
        assert!(!err.is_retryable());
        assert!(!err.user_message().contains("try again"));
    }

    #[tokio::test]
    async fn missing_file_is_unreadable() {
        let dir = TempDir::new().unwrap();
        let objects = ObjectStore::new(dir.path().to_path_buf(), "http://localhost", 1024)
            .await
            .unwrap();
        let uploader = AttachmentUploader::new(Arc::new(objects));
        let pending = PendingAttachment::new(
            dir.path().join("nope.pdf"),
            AttachmentKind::Document,
            "application/pdf",
        );

        assert!(matches!(
            uploader.upload(&pending, &"alice".into()).await,
            Err(UploadError::Unreadable(_))
        ));
    }
}
