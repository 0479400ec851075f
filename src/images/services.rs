use anyhow::Context;
use bytes::Bytes;
use tracing::{info, warn};
use uuid::Uuid;

use crate::storage::StorageClient;

pub struct UploadItem<'a> {
    pub body: Bytes,
    pub content_type: &'a str,
}

/// Where an uploaded avatar landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    pub key: String,
    pub url: String,
}

pub fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}

/// Upload an avatar under `avatars/` and return its public URL.
/// Callers must check the content type with [`ext_from_mime`] first.
pub async fn upload_avatar(
    storage: &dyn StorageClient,
    item: UploadItem<'_>,
) -> anyhow::Result<StoredImage> {
    let ext = ext_from_mime(item.content_type).unwrap_or("bin");
    let key = format!("avatars/{}.{}", Uuid::new_v4(), ext);
    storage
        .put_object(&key, item.body, item.content_type)
        .await
        .with_context(|| format!("put_object {}", key))?;
    let url = storage.object_url(&key);
    info!(%key, "avatar uploaded");
    Ok(StoredImage { key, url })
}

/// Best-effort removal of an avatar whose record write did not happen.
pub async fn discard_avatar(storage: &dyn StorageClient, image: &StoredImage) {
    if let Err(e) = storage.delete_object(&image.key).await {
        warn!(error = %e, key = %image.key, "orphaned avatar left on image host");
    }
}

#[cfg(test)]
mod image_tests {
    use super::*;
    use crate::storage::fake::FakeStorage;

    #[test]
    fn test_ext_from_mime() {
        assert_eq!(ext_from_mime("image/jpeg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/jpg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/png"), Some("png"));
        assert_eq!(ext_from_mime("image/webp"), Some("webp"));
        assert_eq!(ext_from_mime("image/gif"), Some("gif"));
        assert_eq!(ext_from_mime("application/octet-stream"), None);
        assert_eq!(ext_from_mime("whatever/else"), None);
    }

    #[tokio::test]
    async fn upload_then_discard() {
        let storage = FakeStorage::default();
        let img = upload_avatar(
            &storage,
            UploadItem {
                body: Bytes::from_static(b"\x89PNG"),
                content_type: "image/png",
            },
        )
        .await
        .unwrap();
        assert!(img.key.starts_with("avatars/"));
        assert!(img.key.ends_with(".png"));
        assert_eq!(img.url, format!("https://fake.local/{}", img.key));
        assert_eq!(storage.keys(), vec![img.key.clone()]);

        discard_avatar(&storage, &img).await;
        assert!(storage.keys().is_empty());
    }

    #[tokio::test]
    async fn upload_failure_propagates() {
        let storage = FakeStorage::failing();
        let res = upload_avatar(
            &storage,
            UploadItem {
                body: Bytes::from_static(b"x"),
                content_type: "image/jpeg",
            },
        )
        .await;
        assert!(res.is_err());
    }
}
