/*
 * Copyright 2023 Oxide Computer Company
 */

use super::prelude::*;
use slog::warn;

/**
 * Reports healthy only when every external collaborator this service
 * depends on answers: the job status cache, the object store, the
 * approval database, and the activity message bus.
 */
#[endpoint {
    method = GET,
    path = "/v1/health",
    unpublished = true,
}]
pub(crate) async fn health(
    rqctx: RequestContext<Arc<App>>,
) -> DSResult<HttpResponseUpdatedNoContent> {
    let app = rqctx.context();
    let log = &rqctx.log;
    let mgr = &app.manager;

    let mut js = mgr.jobstore.clone();
    if let Err(e) =
        js.get_status("healthcheck", "healthcheck", "healthcheck", None).await
    {
        warn!(log, "cache health check failed: {e:?}");
        return Err(HttpError::for_unavail(None, "cache unreachable".into()));
    }

    if let Err(e) = mgr.object_internal.ping().await {
        warn!(log, "object store health check failed: {e:?}");
        return Err(HttpError::for_unavail(
            None,
            "object store unreachable".into(),
        ));
    }

    if let Err(e) = mgr.approval.ping() {
        warn!(log, "approval database health check failed: {e:?}");
        return Err(HttpError::for_unavail(None, "database unreachable".into()));
    }

    if let Err(e) = mgr.activity.ping() {
        warn!(log, "activity bus health check failed: {e:?}");
        return Err(HttpError::for_unavail(None, "bus unreachable".into()));
    }

    Ok(HttpResponseUpdatedNoContent())
}
