/*
 * Copyright 2023 Oxide Computer Company
 */

use crate::error::DownloadError;
use anyhow::{bail, Result};
use std::path::Path;
use std::time::Duration;

/**
 * Parse `<scheme>://<host>/<bucket>/<object_path>` into its bucket and
 * object path, the format every item's `storage.location_uri` comes in.
 */
pub(crate) fn parse_location(location: &str) -> Result<(String, String)> {
    let rest = location.rsplit_once("//").map(|(_, r)| r).unwrap_or(location);
    let mut parts = rest.splitn(3, '/');
    let _host = parts.next();
    let bucket = parts.next();
    let object_path = parts.next();
    match (bucket, object_path) {
        (Some(b), Some(p)) => Ok((b.to_string(), p.to_string())),
        _ => bail!("malformed object location: {location}"),
    }
}

/**
 * One configured S3-compatible client. Two instances are built at
 * startup — one bound to the in-cluster endpoint for bulk fetches, one
 * bound to the public endpoint for presigned URLs a browser will follow
 * directly.
 */
pub(crate) struct ObjectStore {
    client: aws_sdk_s3::Client,
}

impl ObjectStore {
    pub(crate) async fn new(
        endpoint: &str,
        https: bool,
        access_key: &str,
        secret_key: &str,
    ) -> ObjectStore {
        let scheme = if https { "https" } else { "http" };
        let creds = aws_credential_types::Credentials::new(
            access_key, secret_key, None, None, "download-service",
        );
        let cfg = aws_config::from_env()
            .endpoint_url(format!("{scheme}://{endpoint}"))
            .credentials_provider(creds)
            .region(aws_types::region::Region::new("us-east-1"))
            .load()
            .await;
        ObjectStore { client: aws_sdk_s3::Client::new(&cfg) }
    }

    /** Cheap reachability probe for the health endpoint. */
    pub(crate) async fn ping(&self) -> Result<()> {
        self.client.list_buckets().send().await?;
        Ok(())
    }

    pub(crate) async fn download(
        &self,
        bucket: &str,
        object_path: &str,
        dest: &Path,
    ) -> Result<(), DownloadError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::ObjectStoreError(e.to_string()))?;
        }

        let res = self
            .client
            .get_object()
            .bucket(bucket)
            .key(object_path)
            .send()
            .await
            .map_err(|e| match e {
                aws_sdk_s3::error::SdkError::ServiceError(se)
                    if se.err().is_no_such_key() =>
                {
                    DownloadError::ObjectNotFound(object_path.to_string())
                }
                other => DownloadError::ObjectStoreError(other.to_string()),
            })?;

        let data = res
            .body
            .collect()
            .await
            .map_err(|e| DownloadError::ObjectStoreError(e.to_string()))?
            .into_bytes();

        tokio::fs::write(dest, data)
            .await
            .map_err(|e| DownloadError::ObjectStoreError(e.to_string()))?;

        Ok(())
    }

    pub(crate) async fn presign_get(
        &self,
        bucket: &str,
        object_path: &str,
        expiry: Duration,
    ) -> Result<String, DownloadError> {
        let presigned = self
            .client
            .get_object()
            .bucket(bucket)
            .key(object_path)
            .presigned(
                aws_sdk_s3::presigning::PresigningConfig::builder()
                    .expires_in(expiry)
                    .build()
                    .map_err(|e| DownloadError::ObjectStoreError(e.to_string()))?,
            )
            .await
            .map_err(|e| DownloadError::ObjectStoreError(e.to_string()))?;

        Ok(presigned.uri().to_string())
    }

}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_standard_location() {
        let (bucket, path) =
            parse_location("https://minio.example/core-proj1/a/b/file.txt")
                .unwrap();
        assert_eq!(bucket, "core-proj1");
        assert_eq!(path, "a/b/file.txt");
    }

    #[test]
    fn rejects_location_without_object_path() {
        assert!(parse_location("https://minio.example/core-proj1").is_err());
    }
}
