use chrono::{DateTime, Utc};
use image::ImageFormat;

use super::model::PendingImage;
use crate::backend::BlobStore;
use crate::error::StoreError;
use crate::users::model::Session;

const OCTET_STREAM: &str = "application/octet-stream";

/// Blob key for a post image: namespaced by owner, unique per submission.
pub fn image_key(owner_id: &str, submitted_at: DateTime<Utc>) -> String {
    format!("posts/{}/{}", owner_id, submitted_at.timestamp_millis())
}

/// Content type to store the image with. Never rejects a file: unknown
/// bytes are stored as an octet stream.
pub fn content_type_for(image: &PendingImage) -> String {
    if let Some(ct) = image.content_type.as_deref().filter(|ct| !ct.is_empty()) {
        return ct.to_string();
    }

    let sniffed = match image::guess_format(&image.bytes) {
        Ok(ImageFormat::Png) => "image/png",
        Ok(ImageFormat::Jpeg) => "image/jpeg",
        Ok(ImageFormat::Gif) => "image/gif",
        Ok(ImageFormat::WebP) => "image/webp",
        Ok(ImageFormat::Bmp) => "image/bmp",
        _ => OCTET_STREAM,
    };
    sniffed.to_string()
}

/// Upload a post image and return its durable retrieval URL.
pub async fn upload_post_image(
    blobs: &dyn BlobStore,
    session: &Session,
    image: &PendingImage,
    submitted_at: DateTime<Utc>,
) -> Result<String, StoreError> {
    let key = image_key(&session.user_id, submitted_at);
    let content_type = content_type_for(image);

    tracing::info!(
        "uploading {} ({} bytes, {}) as {}",
        image.file_name,
        image.bytes.len(),
        content_type,
        key
    );

    let handle = blobs.upload(&key, image.bytes.clone(), &content_type).await?;
    blobs.retrieval_url(&handle).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBlobStore;
    use chrono::TimeZone;

    const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    #[test]
    fn key_is_owner_and_millis() {
        let at = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        assert_eq!(image_key("u1", at), "posts/u1/1700000000123");
    }

    #[test]
    fn picker_content_type_wins() {
        let mut image = PendingImage::new("a.png", PNG_MAGIC.to_vec());
        image.content_type = Some("image/x-custom".into());
        assert_eq!(content_type_for(&image), "image/x-custom");
    }

    #[test]
    fn content_type_is_sniffed_or_defaulted() {
        assert_eq!(
            content_type_for(&PendingImage::new("a", PNG_MAGIC.to_vec())),
            "image/png"
        );
        assert_eq!(
            content_type_for(&PendingImage::new("notes.txt", b"plain text".to_vec())),
            OCTET_STREAM
        );
    }

    #[tokio::test]
    async fn uploaded_url_resolves_to_same_bytes() {
        let blobs = MemoryBlobStore::new();
        let session = Session {
            user_id: "u1".into(),
            user_name: "alice".into(),
            user_email: None,
        };
        let image = PendingImage::new("dragon.png", PNG_MAGIC.to_vec());

        let url = upload_post_image(&blobs, &session, &image, Utc::now())
            .await
            .unwrap();
        assert_eq!(blobs.fetch(&url).await.unwrap(), PNG_MAGIC.to_vec());
    }
}
