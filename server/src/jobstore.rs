/*
 * Copyright 2023 Oxide Computer Company
 */

use anyhow::{Context, Result};
use redis::AsyncCommands;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

const ACTION: &str = "data_download";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum JobStatus {
    Init,
    Cancelled,
    Zipping,
    ReadyForDownloading,
    Succeed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self).unwrap();
        write!(f, "{}", s.as_str().unwrap())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub(crate) struct JobRecord {
    pub session_id: String,
    pub job_id: String,
    pub source: String,
    pub action: String,
    pub status: JobStatus,
    pub container_code: String,
    pub operator: String,
    pub payload: serde_json::Value,
    pub update_timestamp: String,
}

/**
 * Thin wrapper over a single Redis connection that knows the key format
 * download job records are stored under. Every key begins with
 * `dataaction:` so that job status keys can never collide with other
 * consumers of the same Redis instance.
 */
#[derive(Clone)]
pub(crate) struct JobStore {
    conn: redis::aio::ConnectionManager,
}

impl JobStore {
    pub(crate) async fn connect(url: &str) -> Result<JobStore> {
        let client = redis::Client::open(url)
            .context("invalid redis connection url")?;
        let conn = client
            .get_tokio_connection_manager()
            .await
            .context("failed to connect to redis")?;
        Ok(JobStore { conn })
    }

    fn prefix(
        session_id: &str,
        job_id: &str,
        container_code: &str,
        operator: Option<&str>,
    ) -> String {
        match operator {
            Some(op) => format!(
                "dataaction:{session_id}:Container:{job_id}:{ACTION}:{container_code}:{op}"
            ),
            None => format!(
                "dataaction:{session_id}:Container:{job_id}:{ACTION}:{container_code}"
            ),
        }
    }

    fn key(
        session_id: &str,
        job_id: &str,
        container_code: &str,
        operator: &str,
        source: &str,
    ) -> String {
        format!(
            "{}:{source}",
            Self::prefix(session_id, job_id, container_code, Some(operator))
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn set_status(
        &mut self,
        session_id: &str,
        job_id: &str,
        source: &str,
        status: JobStatus,
        container_code: &str,
        operator: &str,
        payload: serde_json::Value,
    ) -> Result<JobRecord> {
        let record = JobRecord {
            session_id: session_id.to_string(),
            job_id: job_id.to_string(),
            source: source.to_string(),
            action: ACTION.to_string(),
            status,
            container_code: container_code.to_string(),
            operator: operator.to_string(),
            payload,
            update_timestamp: download_common::unix_seconds().to_string(),
        };

        let key = Self::key(session_id, job_id, container_code, operator, source);
        let value = serde_json::to_string(&record)?;
        self.conn.set(key, value).await?;

        Ok(record)
    }

    /**
     * Scan every record matching the session/job/container/operator
     * prefix. `operator` is optional the same way it is in the upstream
     * helper: omitting it broadens the scan across every operator who has
     * touched this job.
     */
    pub(crate) async fn get_status(
        &mut self,
        session_id: &str,
        job_id: &str,
        container_code: &str,
        operator: Option<&str>,
    ) -> Result<Vec<JobRecord>> {
        let prefix = Self::prefix(session_id, job_id, container_code, operator);
        let pattern = format!("{prefix}*");

        let mut records = Vec::new();
        let mut cursor = 0u64;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .query_async(&mut self.conn)
                .await?;

            for key in &keys {
                let raw: Option<String> = self.conn.get(key).await?;
                if let Some(raw) = raw {
                    records.push(serde_json::from_str(&raw)?);
                }
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        Ok(records)
    }

    /**
     * Delete every record matching the session/job/container/operator
     * prefix, the same `SCAN`-then-act shape as `get_status`, substituting
     * `DEL` for the read. Used to reclaim a job's status keys once its
     * scratch directory has been collected.
     */
    pub(crate) async fn delete_by_prefix(
        &mut self,
        session_id: &str,
        job_id: &str,
        container_code: &str,
        operator: Option<&str>,
    ) -> Result<u64> {
        let prefix = Self::prefix(session_id, job_id, container_code, operator);
        let pattern = format!("{prefix}*");

        let mut deleted = 0u64;
        let mut cursor = 0u64;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .query_async(&mut self.conn)
                .await?;

            if !keys.is_empty() {
                deleted += self.conn.del::<_, u64>(&keys).await?;
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        Ok(deleted)
    }
}
