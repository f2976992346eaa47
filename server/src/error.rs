/*
 * Copyright 2023 Oxide Computer Company
 */

use dropshot::HttpError;
use http::StatusCode;
use std::result::Result as SResult;
use thiserror::Error;

/**
 * The error taxonomy shared by every component.  Kinds that can only
 * occur on a background worker path (`ResourceLocked`, `ObjectStoreError`,
 * `ObjectNotFound`) are still represented here so that `JobRecord::status`
 * can carry the same vocabulary the synchronous API surface uses.
 */
#[derive(Debug, Error)]
pub(crate) enum DownloadError {
    #[error("token invalid: {0}")]
    TokenInvalid(String),
    #[error("token expired")]
    TokenExpired,
    #[error("item not found: {0}")]
    ItemNotFound(String),
    #[error("job not found: {0}")]
    JobNotFound(String),
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("container not found: {0}")]
    ContainerNotFound(String),
    #[error("[Invalid file amount] must greater than 0")]
    EmptySelection,
    #[error("resource already locked: {0}")]
    ResourceLocked(String),
    #[error("object store error: {0}")]
    ObjectStoreError(String),
    #[error("object not found: {0}")]
    ObjectNotFound(String),
    #[error("upstream service unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl DownloadError {
    pub(crate) fn status(&self) -> StatusCode {
        use DownloadError::*;
        match self {
            TokenInvalid(_) => StatusCode::BAD_REQUEST,
            TokenExpired => StatusCode::UNAUTHORIZED,
            ItemNotFound(_) | JobNotFound(_) | FileNotFound(_)
            | ContainerNotFound(_) => StatusCode::NOT_FOUND,
            EmptySelection => StatusCode::BAD_REQUEST,
            ResourceLocked(_) | ObjectStoreError(_) | ObjectNotFound(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            UpstreamUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<DownloadError> for HttpError {
    fn from(e: DownloadError) -> HttpError {
        let status = e.status();
        let msg = e.to_string();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            HttpError::for_internal_error(msg)
        } else {
            HttpError::for_client_error(None, status, msg)
        }
    }
}

pub(crate) trait MakeInternalError<T> {
    fn or_500(self) -> SResult<T, HttpError>;
}

impl<T> MakeInternalError<T> for SResult<T, anyhow::Error> {
    fn or_500(self) -> SResult<T, HttpError> {
        self.map_err(|e| HttpError::for_internal_error(format!("{e:?}")))
    }
}

impl<T> MakeInternalError<T> for SResult<T, DownloadError> {
    fn or_500(self) -> SResult<T, HttpError> {
        self.map_err(HttpError::from)
    }
}

impl<T> MakeInternalError<T> for std::io::Result<T> {
    fn or_500(self) -> SResult<T, HttpError> {
        self.map_err(|e| HttpError::for_internal_error(format!("{e:?}")))
    }
}
