pub mod cognito;
pub mod config;
pub mod dynamo;
pub mod s3;
pub mod telemetry;

use std::sync::Arc;

use feed_block::{FeedView, PostSubmissionFlow};
use feedline_atoms::backend::{
    BlobStore, DocumentStore, IdentityProvider, MemoryBlobStore, MemoryDocumentStore,
    MemoryIdentity,
};
use feedline_atoms::posts::AUTHOR_FIELD;

use crate::cognito::CognitoIdentity;
use crate::config::{AppConfig, Backend, ConfigError};
use crate::dynamo::DynamoDocumentStore;
use crate::s3::S3BlobStore;

/// Collaborators shared by every request handled by one process.
pub struct AppState {
    pub identity: Arc<dyn IdentityProvider>,
    pub documents: Arc<dyn DocumentStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub config: AppConfig,
}

impl AppState {
    pub async fn from_config(config: AppConfig) -> Result<Self, ConfigError> {
        match config.backend {
            Backend::Memory => Ok(Self::in_memory(config)),
            Backend::Aws => {
                let cognito = config
                    .cognito
                    .clone()
                    .ok_or(ConfigError::Missing("COGNITO_CLIENT_ID"))?;
                let aws = aws_config::load_from_env().await;

                let identity = CognitoIdentity::new(
                    aws_sdk_cognitoidentityprovider::Client::new(&aws),
                    &cognito.client_id,
                    &cognito.client_secret,
                );
                let documents = DynamoDocumentStore::new(
                    aws_sdk_dynamodb::Client::new(&aws),
                    &config.table_name,
                    config.poll_interval,
                )
                .with_owner_field(AUTHOR_FIELD);
                let blobs = S3BlobStore::new(
                    aws_sdk_s3::Client::new(&aws),
                    &config.bucket_name,
                    config.media_base_url.clone(),
                );

                tracing::info!(
                    "AWS backend: table {} bucket {}",
                    config.table_name,
                    config.bucket_name
                );
                Ok(Self {
                    identity: Arc::new(identity),
                    documents: Arc::new(documents),
                    blobs: Arc::new(blobs),
                    config,
                })
            }
        }
    }

    /// Everything in process. Accounts come from `MEMORY_ACCOUNTS`; each
    /// account's user id is its username.
    pub fn in_memory(config: AppConfig) -> Self {
        let identity = config
            .memory_accounts
            .iter()
            .fold(MemoryIdentity::new(), |identity, account| {
                identity.with_account(&account.username, &account.username, &account.password)
            });

        tracing::info!(
            "memory backend with {} account(s)",
            config.memory_accounts.len()
        );
        Self {
            identity: Arc::new(identity),
            documents: Arc::new(MemoryDocumentStore::with_owner_field(AUTHOR_FIELD)),
            blobs: Arc::new(MemoryBlobStore::new()),
            config,
        }
    }

    pub fn submission_flow(&self) -> PostSubmissionFlow {
        PostSubmissionFlow::new(self.documents.clone(), self.blobs.clone())
    }

    pub fn mount_feed(&self) -> FeedView {
        FeedView::mount(self.documents.clone(), self.config.retry)
    }
}
