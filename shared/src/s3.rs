use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use feedline_atoms::backend::{BlobHandle, BlobStore};
use feedline_atoms::StoreError;

/// Post images in a single bucket. Objects are addressed by their public
/// URL, either under a configured base (e.g. a CDN) or the bucket's
/// virtual-hosted S3 endpoint.
#[derive(Clone)]
pub struct S3BlobStore {
    client: S3Client,
    bucket: String,
    public_base_url: Option<String>,
}

impl S3BlobStore {
    pub fn new(client: S3Client, bucket: &str, public_base_url: Option<String>) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            public_base_url: public_base_url.map(|base| base.trim_end_matches('/').to_string()),
        }
    }

    pub fn url_for_key(&self, key: &str) -> String {
        match &self.public_base_url {
            Some(base) => format!("{}/{}", base, key),
            None => format!("https://{}.s3.amazonaws.com/{}", self.bucket, key),
        }
    }

    fn key_for_url(&self, url: &str) -> Option<String> {
        if let Some(key) = self
            .public_base_url
            .as_deref()
            .and_then(|base| url.strip_prefix(base))
            .and_then(|rest| rest.strip_prefix('/'))
        {
            return Some(key.to_string());
        }

        match parse_bucket_and_key(url) {
            Some((bucket, key)) if bucket == self.bucket => Some(key),
            _ => None,
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<BlobHandle, StoreError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| StoreError::Backend(format!("S3 put_object error: {}", e)))?;

        tracing::info!("stored s3://{}/{}", self.bucket, key);
        Ok(BlobHandle {
            key: key.to_string(),
        })
    }

    async fn retrieval_url(&self, handle: &BlobHandle) -> Result<String, StoreError> {
        Ok(self.url_for_key(&handle.key))
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, StoreError> {
        let key = self
            .key_for_url(url)
            .ok_or_else(|| StoreError::NotFound(url.to_string()))?;

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().map(|se| se.is_no_such_key()).unwrap_or(false) {
                    StoreError::NotFound(url.to_string())
                } else {
                    StoreError::Backend(format!("S3 get_object error: {}", e))
                }
            })?;

        let body = response
            .body
            .collect()
            .await
            .map_err(|e| StoreError::Backend(format!("S3 body read error: {}", e)))?;
        Ok(body.into_bytes().to_vec())
    }
}

/// Split an S3 object URL into bucket and key. Accepts both
/// `bucket.s3[.region].amazonaws.com/key` and
/// `s3.region.amazonaws.com/bucket/key`.
pub fn parse_bucket_and_key(url: &str) -> Option<(String, String)> {
    let no_scheme = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    let (host, path) = no_scheme.split_once('/')?;
    if !host.ends_with(".amazonaws.com") {
        return None;
    }

    let (bucket, key) = if host.starts_with("s3.") {
        path.split_once('/')?
    } else {
        (host.split(".s3").next()?, path)
    };

    if bucket.is_empty() || key.is_empty() {
        return None;
    }
    Some((bucket.to_string(), key.to_string()))
}
