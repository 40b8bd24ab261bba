use crate::services::storage::{RemoteStore, S3RemoteStore};
use aws_sdk_s3::config::Region;
use std::env;
use std::sync::Arc;
use tracing::{info, warn};

/// Builds the remote store from `MINIO_*` variables. Returns None when any of
/// them is missing, in which case results are only delivered locally.
pub async fn setup_remote_store() -> Option<Arc<dyn RemoteStore>> {
    let vars = (
        env::var("MINIO_ENDPOINT"),
        env::var("MINIO_ACCESS_KEY"),
        env::var("MINIO_SECRET_KEY"),
        env::var("MINIO_BUCKET"),
    );
    let (Ok(endpoint_url), Ok(access_key), Ok(secret_key), Ok(bucket)) = vars else {
        info!("☁️  Remote store not configured, results are delivered locally");
        return None;
    };

    info!("☁️  Remote store: {} (Bucket: {})", endpoint_url, bucket);

    let aws_config = aws_config::from_env()
        .endpoint_url(&endpoint_url)
        .region(Region::new(
            env::var("MINIO_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
        ))
        .credentials_provider(aws_sdk_s3::config::Credentials::new(
            access_key, secret_key, None, None, "static",
        ))
        .load()
        .await;

    let s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
        .force_path_style(true)
        .build();

    let client = aws_sdk_s3::Client::from_conf(s3_config);

    if let Err(e) = client.head_bucket().bucket(&bucket).send().await {
        warn!(
            "⚠️  Bucket '{}' not reachable ({}), trying to create it",
            bucket, e
        );
        if let Err(e) = client.create_bucket().bucket(&bucket).send().await {
            warn!("⚠️  Could not create bucket '{}': {}", bucket, e);
        }
    }

    Some(Arc::new(S3RemoteStore::new(client, bucket)))
}
