/*
 * Copyright 2023 Oxide Computer Company
 */

use std::process::exit;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use dropshot::{ApiDescription, ConfigDropshot, HttpServerStarter};
use getopts::Options;
use slog::o;

#[macro_use]
extern crate diesel;

mod activity;
mod api;
mod approval;
mod archive;
mod config;
mod db;
mod error;
mod jobstore;
mod locks;
mod manager;
mod metadata;
mod objectstore;
mod token;

use activity::ActivityLog;
use approval::ApprovalStore;
use db::Database;
use download_common::make_log;
use jobstore::JobStore;
use locks::LockClient;
use manager::DownloadManager;
use metadata::MetadataClient;
use objectstore::ObjectStore;
use token::TokenCodec;

pub(crate) trait ApiResultEx {
    fn api_check(&self) -> Result<()>;
}

impl ApiResultEx for std::result::Result<(), String> {
    fn api_check(&self) -> Result<()> {
        self.as_ref()
            .map_err(|e| anyhow!("API registration failure: {}", e))?;
        Ok(())
    }
}

pub(crate) struct App {
    pub(crate) manager: Arc<DownloadManager>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut opts = Options::new();

    opts.optopt("b", "", "bind address:port", "BIND_ADDRESS");
    opts.optopt("f", "", "configuration file", "CONFIG");
    opts.optopt("S", "", "dump OpenAPI schema", "FILE");

    let p = match opts.parse(std::env::args().skip(1)) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("ERROR: usage: {}", e);
            eprintln!("       {}", opts.usage("usage"));
            exit(1);
        }
    };

    let mut ad = ApiDescription::new();
    ad.register(api::download::data_pre_download).api_check()?;
    ad.register(api::download::dataset_pre_download).api_check()?;
    ad.register(api::download::data_download_status).api_check()?;
    ad.register(api::download::data_download).api_check()?;
    ad.register(api::download::dataset_version_download).api_check()?;
    ad.register(api::health::health).api_check()?;

    if let Some(s) = p.opt_str("S") {
        let mut f = std::fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&s)?;
        ad.openapi("Download Orchestration Service", "1.0").write(&mut f)?;
        return Ok(());
    }

    let config = if let Some(f) = p.opt_str("f").as_deref() {
        config::load(f).context("loading configuration file")?
    } else {
        bail!("must specify configuration file (-f)");
    };

    let bind_address = p
        .opt_str("b")
        .as_deref()
        .unwrap_or(&config.bind.address)
        .parse()
        .context("parsing bind address")?;

    let log = make_log("download-service");

    let token =
        TokenCodec::new(&config.token.secret, config.token.expiry_minutes);

    let jobstore = JobStore::connect(&config.cache.redis_url)
        .await
        .context("connecting to job status cache")?;

    let locks = LockClient::new(
        &config.services.dataops,
        &config.storage.bucket_prefix_green,
        &config.storage.bucket_prefix_core,
    );

    let metadata = MetadataClient::new(&config.services.metadata);

    let object_internal = ObjectStore::new(
        &config.storage.internal_endpoint,
        config.storage.internal_https,
        &config.storage.access_key,
        &config.storage.secret_key,
    )
    .await;

    let object_public = ObjectStore::new(
        &config.storage.public_endpoint,
        config.storage.public_https,
        &config.storage.access_key,
        &config.storage.secret_key,
    )
    .await;

    let db =
        Database::new(&config.approval.database_url, &config.approval.schema)
            .context("connecting to approval database")?;
    let approval = ApprovalStore::new(db);

    let activity = ActivityLog::new(
        &config.activity.brokers,
        &config.activity.item_topic,
        &config.activity.dataset_topic,
        &log.new(o!("component" => "activity")),
    )
    .context("connecting to activity message bus")?;

    let manager = Arc::new(DownloadManager {
        config,
        token,
        jobstore,
        locks,
        metadata,
        object_internal,
        object_public,
        approval,
        activity,
    });

    let app = Arc::new(App { manager });

    let server = HttpServerStarter::new(
        #[allow(clippy::needless_update)]
        &ConfigDropshot {
            request_body_max_bytes: 10 * 1024 * 1024,
            bind_address,
            ..Default::default()
        },
        ad,
        app,
        &log,
    )
    .map_err(|e| anyhow!("server startup failure: {:?}", e))?;

    let log0 = log.new(o!("component" => "server"));
    slog::info!(log0, "starting download orchestration service");

    server.start().await.map_err(|e| anyhow!("server stopped: {e}"))
}
