/*
 * Copyright 2023 Oxide Computer Company
 */

use crate::activity::ActivityLog;
use crate::approval::ApprovalStore;
use crate::archive;
use crate::config::ConfigFile;
use crate::error::DownloadError;
use crate::jobstore::{JobRecord, JobStatus, JobStore};
use crate::locks::LockClient;
use crate::metadata::{Item, MetadataClient};
use crate::objectstore::{self, ObjectStore};
use crate::token::TokenCodec;
use serde_json::json;
use slog::{error, info, o, warn, Logger};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub(crate) struct DownloadManager {
    pub(crate) config: ConfigFile,
    pub(crate) token: TokenCodec,
    pub(crate) jobstore: JobStore,
    pub(crate) locks: LockClient,
    pub(crate) metadata: MetadataClient,
    pub(crate) object_internal: ObjectStore,
    pub(crate) object_public: ObjectStore,
    pub(crate) approval: ApprovalStore,
    pub(crate) activity: ActivityLog,
}

/**
 * Everything a spawned background worker needs, gathered once up front so
 * the worker task owns it outright rather than borrowing from the
 * request that triggered it.
 */
struct ArchiveJobContext {
    job_id: String,
    session_id: String,
    operator: String,
    container_code: String,
    container_type: String,
    items: Vec<Item>,
    folder_download: bool,
    scratch_dir: PathBuf,
    /** The token payload's `file_path`: either a local zip path or a presigned URL. */
    result_file_name: String,
    token: String,
}

pub(crate) enum RetrieveOutcome {
    PresignedUrl(String),
    LocalFile { path: PathBuf, filename: String },
}

impl DownloadManager {
    fn scratch_dir_for(
        &self,
        container_type: &str,
        container_code: &str,
        job_id: &str,
    ) -> PathBuf {
        PathBuf::from(&self.config.scratch.root)
            .join("tmp")
            .join(format!("{container_type}{container_code}_{job_id}"))
    }

    /**
     * Confirm the target container (project or dataset) actually exists
     * before any item lookup or locking begins, matching the upstream
     * `project_client.get`/`dataset-peek` checks that gate both pre-download
     * routes. Any non-success response (not found, or the collaborator
     * itself erroring) is treated as the container being absent, since
     * spec-level behavior for this service is a flat 404 either way.
     */
    async fn ensure_container_exists(
        &self,
        container_code: &str,
        container_type: &str,
    ) -> Result<(), DownloadError> {
        let http = reqwest::Client::new();
        let url = if container_type == "project" {
            format!("{}{}", self.config.services.project, container_code)
        } else {
            format!("{}dataset-peek/{}", self.config.services.dataset, container_code)
        };

        let res = http.get(&url).send().await;

        match res {
            Ok(res) if res.status().is_success() => Ok(()),
            _ => Err(DownloadError::ContainerNotFound(container_code.to_string())),
        }
    }

    /**
     * Resolve a list of requested item ids into the flat set of files to
     * archive, expanding any folder into its full recursive file listing
     * and, if an approval request id is supplied, narrowing the result to
     * only the files that request approved.
     */
    async fn resolve_items(
        &self,
        log: &Logger,
        ids: &[String],
        operator: &str,
        container_code: &str,
        container_type: &str,
        approval_request_id: Option<Uuid>,
    ) -> Result<(Vec<Item>, bool), DownloadError> {
        let allowed = match approval_request_id {
            Some(rid) => Some(self.approval.allowed_entities(rid)?),
            None => None,
        };

        let mut out = Vec::new();
        let mut folder_download = false;

        for id in ids {
            let head = self.metadata.get_by_id(id).await?;

            let mut batch = match head.item_type {
                crate::metadata::ItemType::Folder => {
                    folder_download = true;
                    let parent_path = match &head.parent_path {
                        Some(p) => format!("{p}.{}", head.name),
                        None => head.name.clone(),
                    };
                    self.metadata
                        .list_recursive(
                            container_code,
                            container_type,
                            &head.owner,
                            head.zone,
                            &parent_path,
                        )
                        .await?
                }
                crate::metadata::ItemType::File => vec![head],
            };

            if let Some(allowed) = &allowed {
                batch.retain(|i| allowed.contains(&i.id));
            }

            out.extend(batch);
        }

        info!(log, "resolved {} files for download", out.len());
        Ok((out, folder_download))
    }

    /**
     * Prepare a file or folder (or several) for download. Mirrors the
     * project download path; dataset-level requests that target an
     * already-approved subset of files also flow through here.
     */
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn prepare_file_or_folder(
        self: &Arc<Self>,
        log: &Logger,
        ids: &[String],
        operator: &str,
        container_code: &str,
        container_type: &str,
        session_id: &str,
        approval_request_id: Option<Uuid>,
    ) -> Result<JobRecord, DownloadError> {
        self.ensure_container_exists(container_code, container_type).await?;

        let (items, folder_download) = self
            .resolve_items(
                log,
                ids,
                operator,
                container_code,
                container_type,
                approval_request_id,
            )
            .await?;

        if items.is_empty() && container_type == "project" {
            return Err(DownloadError::EmptySelection);
        }

        let job_id = format!("data-download-{}", download_common::unix_seconds());
        let scratch_dir = self.scratch_dir_for(container_type, container_code, &job_id);

        let single_file_shortcut = !folder_download && items.len() == 1;
        let result_file_name = if single_file_shortcut {
            let (bucket, obj_path) = objectstore::parse_location(
                items[0].location.as_deref().unwrap_or_default(),
            )?;
            self.object_public
                .presign_get(&bucket, &obj_path, Duration::from_secs(3600))
                .await?
        } else {
            archive::zip_path_for(&scratch_dir).to_string_lossy().to_string()
        };

        let token = self.token.generate(
            container_code,
            container_type,
            &result_file_name,
            operator,
            session_id,
            &job_id,
            serde_json::Value::Null,
        )?;

        let zone = items.first().map(|i| i.zone).unwrap_or(0);
        let mut js = self.jobstore.clone();
        let record = js
            .set_status(
                session_id,
                &job_id,
                &result_file_name,
                JobStatus::Zipping,
                container_code,
                operator,
                json!({ "hash_code": token, "zone": zone }),
            )
            .await
            .map_err(DownloadError::Internal)?;

        let ctx = ArchiveJobContext {
            job_id,
            session_id: session_id.to_string(),
            operator: operator.to_string(),
            container_code: container_code.to_string(),
            container_type: container_type.to_string(),
            items,
            folder_download,
            scratch_dir,
            result_file_name,
            token,
        };

        let mgr = Arc::clone(self);
        let log = log.new(o!("job_id" => ctx.job_id.clone()));
        tokio::task::spawn(async move { mgr.run_background_worker(&log, ctx).await });

        Ok(record)
    }

    /**
     * Prepare a whole dataset for download: every file under it plus the
     * `default` and `open_minds` metadata schema documents, all zipped
     * together regardless of file count.
     */
    pub(crate) async fn prepare_dataset(
        self: &Arc<Self>,
        log: &Logger,
        dataset_code: &str,
        dataset_geid: &str,
        operator: &str,
        session_id: &str,
    ) -> Result<JobRecord, DownloadError> {
        self.ensure_container_exists(dataset_code, "dataset").await?;

        let items = self.metadata.list_dataset(dataset_code, operator).await?;

        let job_id = format!("data-download-{}", download_common::unix_seconds());
        let scratch_dir = self.scratch_dir_for("dataset", dataset_code, &job_id);
        let result_file_name =
            archive::zip_path_for(&scratch_dir).to_string_lossy().to_string();

        let token = self.token.generate(
            dataset_code,
            "dataset",
            &result_file_name,
            operator,
            session_id,
            &job_id,
            serde_json::Value::Null,
        )?;

        let mut js = self.jobstore.clone();
        let record = js
            .set_status(
                session_id,
                &job_id,
                &result_file_name,
                JobStatus::Zipping,
                dataset_code,
                operator,
                json!({ "hash_code": token }),
            )
            .await
            .map_err(DownloadError::Internal)?;

        let ctx = ArchiveJobContext {
            job_id,
            session_id: session_id.to_string(),
            operator: operator.to_string(),
            container_code: dataset_code.to_string(),
            container_type: "dataset".to_string(),
            items,
            folder_download: true,
            scratch_dir,
            result_file_name,
            token,
        };

        let mgr = Arc::clone(self);
        let dataset_geid = dataset_geid.to_string();
        let log = log.new(o!("job_id" => ctx.job_id.clone()));
        tokio::task::spawn(async move {
            mgr.run_dataset_worker(&log, ctx, dataset_geid).await
        });

        Ok(record)
    }

    async fn lock_keys_for(&self, ctx: &ArchiveJobContext) -> Vec<String> {
        ctx.items
            .iter()
            .map(|item| {
                self.locks.resource_key(
                    &ctx.container_type,
                    item.zone == 1,
                    item,
                )
            })
            .collect()
    }

    async fn fetch_all(
        &self,
        log: &Logger,
        ctx: &ArchiveJobContext,
    ) -> Result<(), DownloadError> {
        for item in &ctx.items {
            let location = item
                .location
                .as_deref()
                .ok_or_else(|| DownloadError::ObjectNotFound(item.id.clone()))?;
            let (bucket, obj_path) = objectstore::parse_location(location)?;
            let dest = ctx.scratch_dir.join(&obj_path);
            info!(log, "fetching {bucket}:{obj_path}");
            self.object_internal.download(&bucket, &obj_path, &dest).await?;
        }
        Ok(())
    }

    /**
     * Acquire read locks, fetch every file, release the locks, and on
     * any failure record the job as cancelled instead of propagating —
     * a single job's failure must never bring down the worker task pool.
     */
    async fn run_fetch_stage(
        &self,
        log: &Logger,
        ctx: &ArchiveJobContext,
    ) -> Result<(), ()> {
        let lock_keys = self.lock_keys_for(ctx).await;

        if let Err(e) = self.locks.acquire(&lock_keys, "read").await {
            warn!(log, "failed to acquire locks: {e:?}");
            self.cancel(log, ctx, &e.to_string()).await;
            return Err(());
        }

        let fetch_result = self.fetch_all(log, ctx).await;

        if let Err(e) = self.locks.release(&lock_keys, "read").await {
            warn!(log, "failed to release locks: {e:?}");
        }

        if let Err(e) = fetch_result {
            self.cancel(log, ctx, &e.to_string()).await;
            return Err(());
        }

        Ok(())
    }

    async fn cancel(&self, log: &Logger, ctx: &ArchiveJobContext, error_msg: &str) {
        error!(log, "download job failed: {error_msg}");
        let mut js = self.jobstore.clone();
        let _ = js
            .set_status(
                &ctx.session_id,
                &ctx.job_id,
                &ctx.result_file_name,
                JobStatus::Cancelled,
                &ctx.container_code,
                &ctx.operator,
                json!({ "error_msg": error_msg }),
            )
            .await;
    }

    async fn mark_ready(&self, ctx: &ArchiveJobContext) -> anyhow::Result<JobRecord> {
        let mut js = self.jobstore.clone();
        js.set_status(
            &ctx.session_id,
            &ctx.job_id,
            &ctx.result_file_name,
            JobStatus::ReadyForDownloading,
            &ctx.container_code,
            &ctx.operator,
            json!({ "hash_code": ctx.token }),
        )
        .await
    }

    async fn run_background_worker(&self, log: &Logger, ctx: ArchiveJobContext) {
        if self.run_fetch_stage(log, &ctx).await.is_err() {
            return;
        }

        if ctx.folder_download || ctx.items.len() > 1 {
            let scratch = ctx.scratch_dir.clone();
            let dest = PathBuf::from(&ctx.result_file_name);
            let zip_result =
                tokio::task::spawn_blocking(move || archive::build_zip(&scratch, &dest))
                    .await;
            match zip_result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.cancel(log, &ctx, &e.to_string()).await;
                    return;
                }
                Err(e) => {
                    self.cancel(log, &ctx, &e.to_string()).await;
                    return;
                }
            }
        }

        if let Err(e) = self.mark_ready(&ctx).await {
            warn!(log, "failed to record ready status: {e:?}");
            return;
        }

        info!(log, "download job ready");

        if let Some(source) = ctx.items.first() {
            let archive_name = if ctx.folder_download || ctx.items.len() > 1 {
                Some(
                    PathBuf::from(&ctx.result_file_name)
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default(),
                )
            } else {
                None
            };
            self.activity
                .publish_item_download(
                    source,
                    archive_name.as_deref(),
                    &ctx.operator,
                )
                .await;
        }
    }

    /**
     * The dataset worker always zips the result, embeds the dataset's
     * metadata schemas alongside the files, and publishes a dataset-level
     * (not item-level) activity event on success.
     */
    async fn run_dataset_worker(
        &self,
        log: &Logger,
        ctx: ArchiveJobContext,
        dataset_geid: String,
    ) {
        if self.run_fetch_stage(log, &ctx).await.is_err() {
            return;
        }

        if let Err(e) = self.stage_dataset_schemas(&ctx, &dataset_geid).await {
            self.cancel(log, &ctx, &e.to_string()).await;
            return;
        }

        let scratch = ctx.scratch_dir.clone();
        let dest = PathBuf::from(&ctx.result_file_name);
        let zip_result =
            tokio::task::spawn_blocking(move || archive::build_zip(&scratch, &dest)).await;
        if zip_result.is_err() || matches!(zip_result, Ok(Err(_))) {
            self.cancel(log, &ctx, "failed to assemble dataset archive").await;
            return;
        }

        if let Err(e) = self.mark_ready(&ctx).await {
            warn!(log, "failed to record ready status: {e:?}");
            return;
        }

        info!(log, "dataset download job ready");
        self.activity
            .publish_dataset_download(&dataset_geid, &ctx.operator, &ctx.container_code)
            .await;
    }

    async fn stage_dataset_schemas(
        &self,
        ctx: &ArchiveJobContext,
        dataset_geid: &str,
    ) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(ctx.scratch_dir.join("data")).await?;

        let http = reqwest::Client::new();
        for (standard, prefix) in [("default", "default_"), ("open_minds", "openMINDS_")] {
            let url = format!("{}schema/list", self.config.services.dataset);
            let res = http
                .post(&url)
                .json(&json!({
                    "dataset_geid": dataset_geid,
                    "standard": standard,
                    "is_draft": false,
                }))
                .send()
                .await?;
            let body: serde_json::Value = res.json().await?;
            if let Some(schemas) = body.get("result").and_then(|r| r.as_array()) {
                for schema in schemas {
                    let name = schema
                        .get("name")
                        .and_then(|n| n.as_str())
                        .unwrap_or("schema.json");
                    let content = schema.get("content").cloned().unwrap_or_default();
                    let path = ctx.scratch_dir.join(format!("{prefix}{name}"));
                    let rendered = serde_json::to_string_pretty(&content)?;
                    tokio::fs::write(path, rendered).await?;
                }
            }
        }

        Ok(())
    }

    /**
     * Look up the status of a previously submitted job. Only one record
     * is ever written per session/job/container/operator combination, so
     * returning the first match covers every real case; should more than
     * one ever be found, that indicates a key collision worth logging.
     */
    pub(crate) async fn status(
        &self,
        session_id: &str,
        job_id: &str,
        container_code: &str,
        operator: Option<&str>,
    ) -> Result<JobRecord, DownloadError> {
        let mut js = self.jobstore.clone();
        let mut records = js
            .get_status(session_id, job_id, container_code, operator)
            .await
            .map_err(DownloadError::Internal)?;

        if records.len() > 1 {
            records.sort_by(|a, b| a.update_timestamp.cmp(&b.update_timestamp));
        }

        records.pop().ok_or_else(|| DownloadError::JobNotFound(job_id.to_string()))
    }

    /**
     * Validate a download token and resolve it to either a presigned URL
     * the caller should redirect to, or a local file ready to stream.
     * Either outcome updates the job record to `SUCCEED` and publishes an
     * activity log entry, matching the retrieval being a one-shot action;
     * a `FileNotFound` failure records neither.
     */
    pub(crate) async fn retrieve(
        &self,
        token: &str,
    ) -> Result<RetrieveOutcome, DownloadError> {
        let claims = self.token.verify(token)?;

        let outcome = if claims.file_path.starts_with("http://")
            || claims.file_path.starts_with("https://")
        {
            RetrieveOutcome::PresignedUrl(claims.file_path.clone())
        } else {
            let path = PathBuf::from(&claims.file_path);
            if !path.is_file() {
                return Err(DownloadError::FileNotFound(claims.file_path.clone()));
            }

            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "download".to_string());

            RetrieveOutcome::LocalFile { path, filename }
        };

        let mut js = self.jobstore.clone();
        let _ = js
            .set_status(
                &claims.session_id,
                &claims.job_id,
                &claims.file_path,
                JobStatus::Succeed,
                &claims.container_code,
                &claims.operator,
                claims.payload.clone(),
            )
            .await;

        let zone = claims.payload.get("zone").and_then(|z| z.as_i64()).unwrap_or(0) as i32;
        self.activity
            .publish_retrieval(
                &claims.container_code,
                &claims.container_type,
                &claims.operator,
                &claims.file_path,
                zone,
            )
            .await;

        Ok(outcome)
    }

    /**
     * A dataset *version* download is a separate, simpler path: the
     * token is minted by the dataset service and already names an object
     * store location that is zipped ahead of time, so this only needs to
     * mint a presigned URL against the public endpoint.
     */
    pub(crate) async fn retrieve_dataset_version(
        &self,
        token: &str,
    ) -> Result<String, DownloadError> {
        let claims = self.token.verify_dataset_version(token)?;
        let (bucket, obj_path) = objectstore::parse_location(&claims.location)?;
        self.object_public
            .presign_get(&bucket, &obj_path, Duration::from_secs(3600))
            .await
    }
}
