/*
 * Copyright 2023 Oxide Computer Company
 */

use crate::error::DownloadError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub(crate) enum ItemType {
    File,
    Folder,
}

/**
 * An item as returned by the metadata service. `parent_path` is
 * normalised to `Some("")` rather than `None` for top-level items, since
 * that is the shape every other component (lock key construction, zip
 * entry naming) expects.
 */
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub(crate) struct Item {
    pub id: String,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub name: String,
    pub parent_path: Option<String>,
    pub container_code: String,
    pub container_type: String,
    pub zone: i32,
    pub owner: String,
    pub location: Option<String>,
}

impl Item {
    pub(crate) fn normalised_parent_path(&self) -> String {
        self.parent_path.clone().unwrap_or_default()
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    result: Vec<RawItem>,
}

#[derive(Deserialize)]
struct ItemResponse {
    result: Option<RawItem>,
}

#[derive(Deserialize)]
struct RawItem {
    id: String,
    #[serde(rename = "type")]
    item_type: ItemType,
    name: String,
    parent_path: Option<String>,
    container_code: String,
    container_type: String,
    zone: i32,
    owner: String,
    storage: Option<RawStorage>,
}

#[derive(Deserialize)]
struct RawStorage {
    location_uri: Option<String>,
}

impl From<RawItem> for Item {
    fn from(r: RawItem) -> Item {
        Item {
            id: r.id,
            item_type: r.item_type,
            name: r.name,
            parent_path: r.parent_path,
            container_code: r.container_code,
            container_type: r.container_type,
            zone: r.zone,
            owner: r.owner,
            location: r.storage.and_then(|s| s.location_uri),
        }
    }
}

pub(crate) struct MetadataClient {
    http: reqwest::Client,
    base_url: String,
}

impl MetadataClient {
    pub(crate) fn new(base_url: &str) -> MetadataClient {
        MetadataClient { http: reqwest::Client::new(), base_url: base_url.to_string() }
    }

    pub(crate) async fn get_by_id(
        &self,
        id: &str,
    ) -> Result<Item, DownloadError> {
        let url = format!("{}item/{}/", self.base_url, id);
        let res = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| DownloadError::UpstreamUnavailable(e.to_string()))?;

        if res.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(DownloadError::ItemNotFound(id.to_string()));
        }
        if !res.status().is_success() {
            return Err(DownloadError::UpstreamUnavailable(format!(
                "metadata service returned {}",
                res.status()
            )));
        }

        let body: ItemResponse = res
            .json()
            .await
            .map_err(|e| DownloadError::UpstreamUnavailable(e.to_string()))?;

        body.result
            .map(Item::from)
            .ok_or_else(|| DownloadError::ItemNotFound(id.to_string()))
    }

    /**
     * Recursively list every file under `parent_path` for a container.
     * `zone` follows the upstream convention of 0 for green room, 1 for
     * core.
     */
    pub(crate) async fn list_recursive(
        &self,
        container_code: &str,
        container_type: &str,
        owner: &str,
        zone: i32,
        parent_path: &str,
    ) -> Result<Vec<Item>, DownloadError> {
        let url = format!("{}items/search/", self.base_url);
        let res = self
            .http
            .get(&url)
            .query(&[
                ("container_code", container_code),
                ("container_type", container_type),
                ("owner", owner),
                ("parent_path", parent_path),
                ("type", "file"),
            ])
            .query(&[("zone", zone), ("recursive", 1), ("archived", 0)])
            .send()
            .await
            .map_err(|e| DownloadError::UpstreamUnavailable(e.to_string()))?;

        if !res.status().is_success() {
            return Err(DownloadError::UpstreamUnavailable(format!(
                "metadata service returned {}",
                res.status()
            )));
        }

        let body: SearchResponse = res
            .json()
            .await
            .map_err(|e| DownloadError::UpstreamUnavailable(e.to_string()))?;

        Ok(body.result.into_iter().map(Item::from).collect())
    }

    /**
     * Same recursive listing, but addressed to a dataset's root rather
     * than a specific folder's path — used by whole-dataset downloads.
     * Zone 1 (core), per `prepare_dataset`'s contract: dataset archives are
     * always assembled from the core copy of the data.
     */
    pub(crate) async fn list_dataset(
        &self,
        dataset_code: &str,
        owner: &str,
    ) -> Result<Vec<Item>, DownloadError> {
        self.list_recursive(dataset_code, "dataset", owner, 1, "").await
    }
}
