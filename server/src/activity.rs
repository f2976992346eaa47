/*
 * Copyright 2023 Oxide Computer Company
 */

use crate::metadata::Item;
use chrono::Utc;
use jsonschema::JSONSchema;
use once_cell::sync::Lazy;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use serde::Serialize;
use slog::{warn, Logger};
use std::time::Duration;

/**
 * One entry in the item activity log. Multi-file archives redact
 * `item_id`/`item_name` down to the archive's own name, matching the
 * upstream policy of not attributing a bulk download to any single
 * constituent file.
 */
#[derive(Debug, Serialize)]
struct ActivityMessage<'a> {
    activity_type: &'a str,
    activity_time: chrono::DateTime<Utc>,
    item_id: Option<&'a str>,
    item_type: &'a str,
    item_name: Option<&'a str>,
    item_parent_path: &'a str,
    container_code: &'a str,
    container_type: &'a str,
    zone: i32,
    user: &'a str,
    imported_from: &'a str,
    changes: [(); 0],
}

fn compile_schema(raw: &str) -> JSONSchema {
    let doc: serde_json::Value =
        serde_json::from_str(raw).expect("embedded activity schema is valid JSON");
    JSONSchema::compile(&doc).expect("embedded activity schema is valid JSON Schema")
}

static ITEM_SCHEMA: Lazy<JSONSchema> = Lazy::new(|| {
    compile_schema(include_str!("../schemas/metadata_items_activity.json"))
});

static DATASET_SCHEMA: Lazy<JSONSchema> = Lazy::new(|| {
    compile_schema(include_str!("../schemas/dataset_activity.json"))
});

pub(crate) struct ActivityLog {
    producer: FutureProducer,
    item_topic: String,
    dataset_topic: String,
    log: Logger,
}

impl ActivityLog {
    pub(crate) fn new(
        brokers: &str,
        item_topic: &str,
        dataset_topic: &str,
        log: &Logger,
    ) -> anyhow::Result<ActivityLog> {
        let producer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(ActivityLog {
            producer,
            item_topic: item_topic.to_string(),
            dataset_topic: dataset_topic.to_string(),
            log: log.clone(),
        })
    }

    /** Cheap reachability probe for the health endpoint. */
    pub(crate) fn ping(&self) -> anyhow::Result<()> {
        self.producer
            .client()
            .fetch_metadata(None, Duration::from_secs(3))?;
        Ok(())
    }

    /**
     * Publish a download activity event for one or more files.
     * `redact` is set when more than one file went into the archive, so
     * the logged entry describes the archive instead of any one
     * constituent item.
     */
    pub(crate) async fn publish_item_download(
        &self,
        source: &Item,
        archive_name: Option<&str>,
        operator: &str,
    ) {
        let redact = archive_name.is_some();
        let message = ActivityMessage {
            activity_type: "download",
            activity_time: Utc::now(),
            item_id: if redact { None } else { Some(&source.id) },
            item_type: "file",
            item_name: if redact {
                archive_name
            } else {
                Some(source.name.as_str())
            },
            item_parent_path: source.parent_path.as_deref().unwrap_or(""),
            container_code: &source.container_code,
            container_type: &source.container_type,
            zone: source.zone,
            user: operator,
            imported_from: "",
            changes: [],
        };

        self.send(&self.item_topic, &source.id, &message, &ITEM_SCHEMA).await;
    }

    pub(crate) async fn publish_dataset_download(
        &self,
        dataset_geid: &str,
        operator: &str,
        container_code: &str,
    ) {
        let message = ActivityMessage {
            activity_type: "download",
            activity_time: Utc::now(),
            item_id: Some(dataset_geid),
            item_type: "dataset",
            item_name: None,
            item_parent_path: "",
            container_code,
            container_type: "dataset",
            zone: 0,
            user: operator,
            imported_from: "",
            changes: [],
        };

        self.send(&self.dataset_topic, dataset_geid, &message, &DATASET_SCHEMA).await;
    }

    /**
     * Audit log entry for a completed `retrieve` — matches the upstream
     * `update_file_operation_logs` call made the moment a file is handed to
     * its caller, distinct from the worker's item/dataset publish made when
     * the archive first becomes ready.
     */
    pub(crate) async fn publish_retrieval(
        &self,
        container_code: &str,
        container_type: &str,
        operator: &str,
        file_path: &str,
        zone: i32,
    ) {
        let item_name = std::path::Path::new(file_path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string());

        let message = ActivityMessage {
            activity_type: "download",
            activity_time: Utc::now(),
            item_id: None,
            item_type: if container_type == "dataset" { "dataset" } else { "file" },
            item_name: item_name.as_deref(),
            item_parent_path: "",
            container_code,
            container_type,
            zone,
            user: operator,
            imported_from: "",
            changes: [],
        };

        if container_type == "dataset" {
            self.send(&self.dataset_topic, container_code, &message, &DATASET_SCHEMA).await;
        } else {
            self.send(&self.item_topic, container_code, &message, &ITEM_SCHEMA).await;
        }
    }

    async fn send<T: Serialize>(
        &self,
        topic: &str,
        key: &str,
        message: &T,
        schema: &JSONSchema,
    ) {
        let value = match serde_json::to_value(message) {
            Ok(v) => v,
            Err(_) => return,
        };

        if let Err(errors) = schema.validate(&value) {
            for e in errors {
                warn!(self.log, "activity message failed schema validation: {e}");
            }
            return;
        }

        let payload = match serde_json::to_vec(&value) {
            Ok(p) => p,
            Err(_) => return,
        };

        let record = FutureRecord::to(topic).key(key).payload(&payload);
        let _ = self.producer.send(record, Duration::from_secs(5)).await;
    }
}
