use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::{Builder as S3ConfigBuilder, Region},
    primitives::ByteStream,
    Client as S3Client,
};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use uuid::Uuid;

use crate::config::AppConfig;

/// Characters escaped inside an object key when it is placed in a URL path.
/// `/` is kept so prefixes stay readable.
const KEY_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

#[async_trait]
pub trait ObjectStorage: Send + Sync + 'static {
    /// Stores the bytes under `key` and returns the URL the object is served from.
    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<String>,
    ) -> Result<String>;

    async fn delete_object(&self, key: &str) -> Result<()>;
}

pub struct S3Storage {
    client: S3Client,
    bucket: String,
    public_base_url: String,
}

impl S3Storage {
    pub fn new(client: S3Client, bucket: impl Into<String>, public_base_url: String) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            public_base_url,
        }
    }

    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let client = build_client(config).await?;
        Ok(Self::new(
            client,
            config.s3_bucket.clone(),
            public_base_url(config),
        ))
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<String>,
    ) -> Result<String> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes));

        if let Some(content_type) = content_type {
            request = request.content_type(content_type);
        }

        request
            .send()
            .await
            .with_context(|| format!("failed to upload object {key} to S3"))?;

        Ok(object_url(&self.public_base_url, key))
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("failed to delete object {key} from S3"))?;
        Ok(())
    }
}

async fn build_client(config: &AppConfig) -> Result<S3Client> {
    let region = Region::new(config.aws_region.clone());
    let region_provider = RegionProviderChain::first_try(Some(region))
        .or_default_provider()
        .or_else("us-east-1");

    #[allow(deprecated)]
    let mut loader = aws_config::from_env().region(region_provider);

    if let Some(endpoint) = &config.aws_endpoint_url {
        loader = loader.endpoint_url(endpoint);
    }

    if let (Some(access_key), Some(secret_key)) = (
        config.aws_access_key_id.clone(),
        config.aws_secret_access_key.clone(),
    ) {
        let credentials = Credentials::new(access_key, secret_key, None, None, "static");
        loader = loader.credentials_provider(credentials);
    }

    let base_config = loader.load().await;
    let s3_config = S3ConfigBuilder::from(&base_config)
        .force_path_style(true)
        .build();

    Ok(S3Client::from_conf(s3_config))
}

/// Base URL objects are reachable under, without a trailing slash.
pub fn public_base_url(config: &AppConfig) -> String {
    if let Some(base) = &config.storage_public_base_url {
        return base.trim_end_matches('/').to_string();
    }
    match &config.aws_endpoint_url {
        Some(endpoint) => format!("{}/{}", endpoint.trim_end_matches('/'), config.s3_bucket),
        None => format!(
            "https://{}.s3.{}.amazonaws.com",
            config.s3_bucket, config.aws_region
        ),
    }
}

pub fn object_url(base: &str, key: &str) -> String {
    format!("{base}/{}", utf8_percent_encode(key, KEY_SEGMENT))
}

/// Builds a collision-free key for an uploaded résumé, keeping a readable
/// form of the original file name.
pub fn cv_object_key(prefix: &str, file_name: &str) -> String {
    let base = file_name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.');
    let name = if cleaned.is_empty() { "cv" } else { cleaned };
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        format!("{}-{name}", Uuid::new_v4())
    } else {
        format!("{prefix}/{}-{name}", Uuid::new_v4())
    }
}
