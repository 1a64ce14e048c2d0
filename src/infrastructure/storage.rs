use crate::services::storage::S3StorageService;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{Credentials, Region};
use std::env;
use std::sync::Arc;
use tracing::{info, warn};

fn required(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{} must be set", key))
}

/// Build the S3 client from the environment and make sure the bucket is
/// there before the first request needs it.
pub async fn setup_storage() -> Arc<S3StorageService> {
    let endpoint = required("S3_ENDPOINT");
    let bucket = required("S3_BUCKET");
    let credentials = Credentials::new(
        required("S3_ACCESS_KEY"),
        required("S3_SECRET_KEY"),
        None,
        None,
        "env",
    );

    // Region is nominal for MinIO-style endpoints but the SDK insists on one.
    let base = aws_config::from_env()
        .endpoint_url(&endpoint)
        .region(Region::new(
            env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
        ))
        .credentials_provider(credentials)
        .load()
        .await;

    // Path-style addressing: room blob keys contain '/', and virtual-host
    // style does not survive local object stores.
    let client = Client::from_conf(
        aws_sdk_s3::config::Builder::from(&base)
            .force_path_style(true)
            .build(),
    );

    info!(endpoint = %endpoint, bucket = %bucket, "Object store configured");
    ensure_bucket(&client, &bucket).await;

    Arc::new(S3StorageService::new(client, bucket))
}

/// Create the bucket if this is a fresh deployment. Failure here is loud
/// but not fatal: the store may simply deny bucket creation to this key
/// while the bucket already exists under another account.
async fn ensure_bucket(client: &Client, bucket: &str) {
    if client.head_bucket().bucket(bucket).send().await.is_ok() {
        return;
    }

    match client.create_bucket().bucket(bucket).send().await {
        Ok(_) => info!(bucket = %bucket, "Created missing bucket"),
        Err(e) => warn!(
            bucket = %bucket,
            "Bucket neither reachable nor creatable: {}",
            e
        ),
    }
}
