/*
 * Copyright 2023 Oxide Computer Company
 */

use crate::metadata::Item;
use anyhow::{bail, Result};
use serde::Serialize;
use std::time::Duration;

#[derive(Serialize)]
struct BulkLockBody<'a> {
    resource_keys: &'a [String],
    operation: &'a str,
}

/**
 * Client for the data-ops lock service. Locks are acquired read-only
 * (`operation = "read"`) for the duration of the fetch stage of a download
 * job; nothing here distinguishes read locks from write locks beyond
 * passing the string through, since this service never takes write locks.
 */
pub(crate) struct LockClient {
    http: reqwest::Client,
    base_url: String,
    bucket_prefix_green: String,
    bucket_prefix_core: String,
}

impl LockClient {
    pub(crate) fn new(
        base_url: &str,
        bucket_prefix_green: &str,
        bucket_prefix_core: &str,
    ) -> LockClient {
        LockClient {
            http: reqwest::Client::new(),
            base_url: base_url.to_string(),
            bucket_prefix_green: bucket_prefix_green.to_string(),
            bucket_prefix_core: bucket_prefix_core.to_string(),
        }
    }

    /**
     * Build the `<bucket>/<parent_path>/<name>` resource key for an item.
     * Projects get a zone-dependent bucket prefix; datasets address the
     * bucket by their raw container code.
     */
    pub(crate) fn resource_key(
        &self,
        container_type: &str,
        zone_is_core: bool,
        item: &Item,
    ) -> String {
        let bucket = if container_type == "project" {
            let prefix = if zone_is_core {
                &self.bucket_prefix_core
            } else {
                &self.bucket_prefix_green
            };
            format!("{prefix}{}", item.container_code)
        } else {
            item.container_code.clone()
        };

        format!(
            "{bucket}/{}/{}",
            item.parent_path.as_deref().unwrap_or(""),
            item.name
        )
    }

    async fn bulk(
        &self,
        resource_keys: &[String],
        operation: &str,
        lock: bool,
    ) -> Result<()> {
        if resource_keys.is_empty() {
            return Ok(());
        }

        let url = format!("{}resource/lock/bulk", self.base_url);
        let method =
            if lock { reqwest::Method::POST } else { reqwest::Method::DELETE };

        let res = self
            .http
            .request(method, &url)
            .json(&BulkLockBody { resource_keys, operation })
            .timeout(Duration::from_secs(3600))
            .send()
            .await?;

        if !res.status().is_success() {
            bail!("resource {:?} already in use", resource_keys);
        }

        Ok(())
    }

    pub(crate) async fn acquire(
        &self,
        resource_keys: &[String],
        operation: &str,
    ) -> Result<()> {
        self.bulk(resource_keys, operation, true).await
    }

    pub(crate) async fn release(
        &self,
        resource_keys: &[String],
        operation: &str,
    ) -> Result<()> {
        self.bulk(resource_keys, operation, false).await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::metadata::{Item, ItemType};

    fn item(parent_path: Option<&str>) -> Item {
        Item {
            id: "id-1".into(),
            item_type: ItemType::File,
            name: "file.txt".into(),
            parent_path: parent_path.map(|s| s.to_string()),
            container_code: "proj1".into(),
            container_type: "project".into(),
            zone: 1,
            owner: "alice".into(),
            location: Some("https://s3.example/core-proj1/a/file.txt".into()),
        }
    }

    #[test]
    fn resource_key_applies_zone_prefix_for_projects() {
        let lc = LockClient::new("http://dataops/", "gr-", "core-");
        let key = lc.resource_key("project", true, &item(Some("a")));
        assert_eq!(key, "core-proj1/a/file.txt");
    }

    #[test]
    fn resource_key_has_no_prefix_for_datasets() {
        let lc = LockClient::new("http://dataops/", "gr-", "core-");
        let key = lc.resource_key("dataset", false, &item(None));
        assert_eq!(key, "proj1//file.txt");
    }
}
