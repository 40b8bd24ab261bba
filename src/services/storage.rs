use anyhow::{Result, anyhow};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use std::path::Path;
use std::time::Duration;

use crate::services::stager::read_block;

/// S3 requires every part except the last to be at least 5 MiB
const UPLOAD_PART_SIZE: usize = 10 * 1024 * 1024;

pub struct RemoteObject {
    pub key: String,
    pub size: u64,
    pub url: String,
}

/// Object store that can take the final merged document instead of a direct download
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Uploads a local file under `key` and returns its size in bytes.
    async fn upload_path(&self, key: &str, path: &Path) -> Result<u64>;
    async fn presigned_url(&self, key: &str, expires_in: Duration) -> Result<String>;
    async fn delete(&self, key: &str) -> Result<()>;
    fn describe(&self) -> String;
}

pub struct S3RemoteStore {
    client: Client,
    bucket: String,
}

impl S3RemoteStore {
    pub fn new(client: Client, bucket: String) -> Self {
        Self { client, bucket }
    }

    async fn abort(&self, key: &str, upload_id: &str) {
        if let Err(e) = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
        {
            tracing::warn!("Failed to abort multipart upload for {}: {}", key, e);
        }
    }

    async fn upload_parts(&self, key: &str, upload_id: &str, path: &Path) -> Result<u64> {
        let mut reader = tokio::fs::File::open(path).await?;
        let mut buffer = vec![0u8; UPLOAD_PART_SIZE];
        let mut part_number = 1;
        let mut completed_parts = Vec::new();
        let mut total_size: u64 = 0;

        loop {
            let n = read_block(&mut reader, &mut buffer).await?;
            if n == 0 && part_number > 1 {
                break;
            }

            total_size += n as u64;
            let upload_part_res = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .body(ByteStream::from(buffer[..n].to_vec()))
                .part_number(part_number)
                .send()
                .await?;

            completed_parts.push(
                CompletedPart::builder()
                    .e_tag(upload_part_res.e_tag().unwrap_or_default())
                    .part_number(part_number)
                    .build(),
            );
            part_number += 1;

            if n < UPLOAD_PART_SIZE {
                break;
            }
        }

        let completed_multipart_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_multipart_upload)
            .send()
            .await?;

        Ok(total_size)
    }
}

#[async_trait]
impl RemoteStore for S3RemoteStore {
    async fn upload_path(&self, key: &str, path: &Path) -> Result<u64> {
        let multipart_upload_res = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type("application/pdf")
            .send()
            .await?;

        let upload_id = multipart_upload_res
            .upload_id()
            .ok_or_else(|| anyhow!("No upload ID"))?
            .to_string();

        match self.upload_parts(key, &upload_id, path).await {
            Ok(size) => Ok(size),
            Err(e) => {
                self.abort(key, &upload_id).await;
                Err(e)
            }
        }
    }

    async fn presigned_url(&self, key: &str, expires_in: Duration) -> Result<String> {
        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(PresigningConfig::expires_in(expires_in)?)
            .await?;
        Ok(presigned.uri().to_string())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("s3://{}", self.bucket)
    }
}
