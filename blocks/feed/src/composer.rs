use std::sync::Arc;

use chrono::Utc;
use feedline_atoms::backend::{BlobStore, DocumentStore};
use feedline_atoms::media::{self, PendingImage};
use feedline_atoms::posts::{self, Post};
use feedline_atoms::users::Session;
use feedline_atoms::FeedError;

use crate::drop_zone::{DragEvent, DropZone};
use crate::router::Route;

/// Input state of the "create a post" screen.
#[derive(Debug, Default)]
pub struct PostComposer {
    text: String,
    image: Option<PendingImage>,
    drop_zone: DropZone,
}

impl PostComposer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    pub fn image(&self) -> Option<&PendingImage> {
        self.image.as_ref()
    }

    /// Name shown under the drop zone once a file is attached.
    pub fn image_name(&self) -> Option<&str> {
        self.image.as_ref().map(|i| i.file_name.as_str())
    }

    /// Manual file selection. Only the first selected file is kept.
    pub fn select_files(&mut self, files: Vec<PendingImage>) {
        if let Some(first) = files.into_iter().next() {
            self.image = Some(first);
        }
    }

    pub fn handle_drag(&mut self, event: DragEvent) {
        if let Some(dropped) = self.drop_zone.handle(event) {
            self.image = Some(dropped);
        }
    }

    pub fn is_dragging(&self) -> bool {
        self.drop_zone.is_dragging()
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.image = None;
    }
}

#[derive(Debug)]
pub struct Submitted {
    pub post: Post,
    pub navigate_to: Route,
}

/// Writes a composed post: optional image upload, then the post record.
#[derive(Clone)]
pub struct PostSubmissionFlow {
    documents: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
}

impl PostSubmissionFlow {
    pub fn new(documents: Arc<dyn DocumentStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { documents, blobs }
    }

    /// Submit the composer's contents as `session`.
    ///
    /// The composer is cleared only on success. After an upload or write
    /// failure it still holds the text and image, so the caller can retry
    /// without picking the file again. Taking `&mut PostComposer` keeps a
    /// composer to one submission in flight.
    pub async fn submit(
        &self,
        session: Option<&Session>,
        composer: &mut PostComposer,
    ) -> Result<Submitted, FeedError> {
        let session = session.ok_or_else(|| {
            tracing::warn!("post submission without a session");
            FeedError::AuthAbsent
        })?;

        let image_url = match composer.image() {
            Some(image) => {
                media::upload_post_image(self.blobs.as_ref(), session, image, Utc::now())
                    .await
                    .map_err(|e| {
                        tracing::error!("image upload failed for {}: {}", session.user_id, e);
                        FeedError::Upload(e)
                    })?
            }
            None => String::new(),
        };

        let post = posts::create_post(
            self.documents.as_ref(),
            session,
            composer.text().to_string(),
            image_url,
        )
        .await
        .map_err(|e| {
            tracing::error!("creating post failed for {}: {}", session.user_id, e);
            FeedError::Write(e)
        })?;

        composer.clear();
        Ok(Submitted {
            post,
            navigate_to: Route::Home,
        })
    }
}
