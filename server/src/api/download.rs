/*
 * Copyright 2023 Oxide Computer Company
 */

use super::prelude::*;
use crate::jobstore::JobRecord;
use crate::manager::RetrieveOutcome;
use http::StatusCode;
use hyper::{header::LOCATION, Body, Response};
use hyper_staticfile::FileBytesStream;
use uuid::Uuid;

#[derive(Serialize, JsonSchema)]
pub(crate) struct ApiEnvelope<T> {
    pub code: u16,
    pub result: T,
    pub error_msg: String,
}

impl<T> ApiEnvelope<T> {
    fn ok(result: T) -> ApiEnvelope<T> {
        ApiEnvelope { code: 200, result, error_msg: String::new() }
    }
}

fn session_id(rqctx: &RequestContext<Arc<App>>) -> DSResult<String> {
    let headers = rqctx.request.headers();
    let cookie = headers
        .get(http::header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    cookie
        .split(';')
        .map(|kv| kv.trim())
        .find_map(|kv| kv.strip_prefix("sessionId="))
        .map(|s| s.to_string())
        .ok_or_else(|| {
            HttpError::for_client_error(
                None,
                StatusCode::BAD_REQUEST,
                "missing sessionId cookie".into(),
            )
        })
}

#[derive(Deserialize, JsonSchema)]
pub(crate) struct FileRef {
    pub id: String,
}

#[derive(Deserialize, JsonSchema)]
pub(crate) struct PreDataDownloadBody {
    pub files: Vec<FileRef>,
    pub operator: String,
    pub container_code: String,
    pub container_type: String,
    pub approval_request_id: Option<Uuid>,
}

#[endpoint {
    method = POST,
    path = "/v2/download/pre/",
}]
pub(crate) async fn data_pre_download(
    rqctx: RequestContext<Arc<App>>,
    body: TypedBody<PreDataDownloadBody>,
) -> DSResult<HttpResponseOk<ApiEnvelope<JobRecord>>> {
    let app = rqctx.context();
    let log = &rqctx.log;
    let b = body.into_inner();
    let sid = session_id(&rqctx)?;

    let ids: Vec<String> = b.files.into_iter().map(|f| f.id).collect();

    let record = app
        .manager
        .prepare_file_or_folder(
            log,
            &ids,
            &b.operator,
            &b.container_code,
            &b.container_type,
            &sid,
            b.approval_request_id,
        )
        .await?;

    Ok(HttpResponseOk(ApiEnvelope::ok(record)))
}

#[derive(Deserialize, JsonSchema)]
pub(crate) struct DatasetPreDownloadBody {
    pub dataset_code: String,
    pub dataset_geid: String,
    pub operator: String,
}

#[endpoint {
    method = POST,
    path = "/v2/dataset/download/pre",
}]
pub(crate) async fn dataset_pre_download(
    rqctx: RequestContext<Arc<App>>,
    body: TypedBody<DatasetPreDownloadBody>,
) -> DSResult<HttpResponseOk<ApiEnvelope<JobRecord>>> {
    let app = rqctx.context();
    let log = &rqctx.log;
    let b = body.into_inner();
    let sid = session_id(&rqctx)?;

    let record = app
        .manager
        .prepare_dataset(log, &b.dataset_code, &b.dataset_geid, &b.operator, &sid)
        .await?;

    Ok(HttpResponseOk(ApiEnvelope::ok(record)))
}

#[derive(Deserialize, JsonSchema)]
pub(crate) struct TokenPath {
    token: String,
}

#[derive(Deserialize, JsonSchema)]
pub(crate) struct StatusQuery {
    container_code: Option<String>,
    operator: Option<String>,
}

#[endpoint {
    method = GET,
    path = "/v1/download/status/{token}",
}]
pub(crate) async fn data_download_status(
    rqctx: RequestContext<Arc<App>>,
    path: TypedPath<TokenPath>,
    query: TypedQuery<StatusQuery>,
) -> DSResult<HttpResponseOk<ApiEnvelope<JobRecord>>> {
    let app = rqctx.context();
    let p = path.into_inner();
    let q = query.into_inner();

    let claims = app.manager.token.verify(&p.token)?;
    let container_code =
        q.container_code.unwrap_or_else(|| claims.container_code.clone());

    let record = app
        .manager
        .status(
            &claims.session_id,
            &claims.job_id,
            &container_code,
            q.operator.as_deref(),
        )
        .await?;

    Ok(HttpResponseOk(ApiEnvelope::ok(record)))
}

/**
 * Streams the archive (or whatever single file was requested) straight
 * off disk, or redirects to a presigned object store URL when the
 * single-file shortcut produced one instead of a local path.
 */
#[endpoint {
    method = GET,
    path = "/v1/download/{token}",
}]
pub(crate) async fn data_download(
    rqctx: RequestContext<Arc<App>>,
    path: TypedPath<TokenPath>,
) -> Result<Response<Body>, HttpError> {
    let app = rqctx.context();
    let p = path.into_inner();

    match app.manager.retrieve(&p.token).await? {
        RetrieveOutcome::PresignedUrl(url) => Ok(Response::builder()
            .status(StatusCode::TEMPORARY_REDIRECT)
            .header(LOCATION, url)
            .body(Body::empty())?),
        RetrieveOutcome::LocalFile { path, filename } => {
            let f = tokio::fs::File::open(&path).await.or_500()?;
            let fbs = FileBytesStream::new(f);

            Ok(Response::builder()
                .header(
                    "content-disposition",
                    format!("attachment; filename=\"{filename}\""),
                )
                .body(fbs.into_body())?)
        }
    }
}

/**
 * Dataset *version* downloads never land on local disk; the token
 * already names an object store location, so the only job here is to
 * mint a presigned URL and redirect to it.
 */
#[endpoint {
    method = GET,
    path = "/v2/dataset/download/{token}",
}]
pub(crate) async fn dataset_version_download(
    rqctx: RequestContext<Arc<App>>,
    path: TypedPath<TokenPath>,
) -> Result<Response<Body>, HttpError> {
    let app = rqctx.context();
    let p = path.into_inner();

    let url = app.manager.retrieve_dataset_version(&p.token).await?;

    Ok(Response::builder()
        .status(StatusCode::TEMPORARY_REDIRECT)
        .header(LOCATION, url)
        .body(Body::empty())?)
}
