use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::path::PathBuf;
use uuid::Uuid;

use crate::{
    error::{EngineError, EngineResult},
    models::ObjectRef,
};

// Characters left as-is in a download path segment.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.');

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(&self, file_name: &str, bytes: &[u8]) -> EngineResult<ObjectRef>;
    fn download_url(&self, object: &ObjectRef) -> String;
    /// Best-effort removal of an object nothing refers to.
    async fn discard(&self, object: &ObjectRef);
}

/// Stores objects under `DATA_DIR`; the router serves that directory at `/content`.
pub struct LocalObjectStore {
    root: PathBuf,
    url_prefix: String,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            url_prefix: "/content".into(),
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn upload(&self, file_name: &str, bytes: &[u8]) -> EngineResult<ObjectRef> {
        if bytes.is_empty() {
            return Err(EngineError::Validation("uploaded file is empty".into()));
        }
        let rel = format!("submissions/{}/{}", Uuid::new_v4(), sanitize_file_name(file_name));
        let path = self.root.join(&rel);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        tracing::debug!(object = %rel, size = bytes.len(), "stored object");
        Ok(ObjectRef(rel))
    }

    fn download_url(&self, object: &ObjectRef) -> String {
        let encoded: Vec<String> = object
            .as_str()
            .split('/')
            .map(|seg| utf8_percent_encode(seg, SEGMENT).to_string())
            .collect();
        format!("{}/{}", self.url_prefix, encoded.join("/"))
    }

    async fn discard(&self, object: &ObjectRef) {
        let path = self.root.join(object.as_str());
        if let Err(e) = tokio::fs::remove_file(&path).await {
            tracing::warn!(object = %object.as_str(), error = %e, "could not discard object");
            return;
        }
        if let Some(dir) = path.parent() {
            let _ = tokio::fs::remove_dir(dir).await;
        }
    }
}

/// Keeps a client-supplied name to one safe path segment.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload".into()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_paths_and_odd_characters() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\exam\\my answers.pdf"), "my_answers.pdf");
        assert_eq!(sanitize_file_name(".."), "upload");
        assert_eq!(sanitize_file_name(""), "upload");
    }

    #[test]
    fn download_url_encodes_segments() {
        let store = LocalObjectStore::new("/tmp/unused");
        let url = store.download_url(&ObjectRef("submissions/abc/report é.pdf".into()));
        assert_eq!(url, "/content/submissions/abc/report%20%C3%A9.pdf");
    }

    #[tokio::test]
    async fn upload_writes_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        let obj = store.upload("answers.pdf", b"%PDF-1.4").await.unwrap();
        assert!(obj.as_str().starts_with("submissions/"));
        assert!(obj.as_str().ends_with("/answers.pdf"));
        let written = tokio::fs::read(dir.path().join(obj.as_str())).await.unwrap();
        assert_eq!(written, b"%PDF-1.4");
    }

    #[tokio::test]
    async fn discard_removes_object_and_its_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        let obj = store.upload("answers.pdf", b"%PDF-1.4").await.unwrap();
        let path = dir.path().join(obj.as_str());
        store.discard(&obj).await;
        assert!(!path.exists());
        assert!(!path.parent().unwrap().exists());
        // discarding twice only logs
        store.discard(&obj).await;
    }

    #[tokio::test]
    async fn empty_upload_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        assert!(matches!(
            store.upload("a.pdf", b"").await,
            Err(EngineError::Validation(_))
        ));
    }
}
