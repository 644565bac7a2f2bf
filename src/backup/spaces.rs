use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use aws_sdk_s3::Client;

use super::{BackupError, UploadSnafu, Uploader};
use crate::config::SpacesConfig;

/// Uploads to an S3-compatible bucket (DigitalOcean Spaces, MinIO, AWS S3).
#[derive(Debug, Clone)]
pub struct SpacesUploader {
    client: Client,
    bucket: String,
}

impl SpacesUploader {
    pub fn new(spaces: &SpacesConfig) -> Self {
        let credentials = Credentials::new(&spaces.key, &spaces.secret, None, None, "spaces");

        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(spaces.region.clone()))
            .endpoint_url(spaces.endpoint.as_str().trim_end_matches('/'))
            .credentials_provider(credentials)
            .build();

        Self {
            client: Client::from_conf(config),
            bucket: spaces.bucket.clone(),
        }
    }
}

impl Uploader for SpacesUploader {
    #[tracing::instrument(skip(self, file), fields(bucket = %self.bucket))]
    async fn upload(&self, key: &str, file: tokio::fs::File) -> Result<(), BackupError> {
        let body = ByteStream::read_from()
            .file(file)
            .build()
            .await
            .map_err(|error| {
                UploadSnafu {
                    key,
                    message: error.to_string(),
                }
                .build()
            })?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .acl(ObjectCannedAcl::Private)
            .body(body)
            .send()
            .await
            .map_err(|error| {
                UploadSnafu {
                    key,
                    message: DisplayErrorContext(&error).to_string(),
                }
                .build()
            })?;

        Ok(())
    }
}
