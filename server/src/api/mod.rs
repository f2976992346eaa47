/*
 * Copyright 2023 Oxide Computer Company
 */

pub(crate) mod download;
pub(crate) mod health;

mod prelude {
    pub(crate) use crate::error::{DownloadError, MakeInternalError};
    pub(crate) use crate::App;
    pub(crate) use dropshot::{
        endpoint, HttpError, HttpResponseOk, HttpResponseUpdatedNoContent,
        Path as TypedPath, Query as TypedQuery, RequestContext, TypedBody,
    };
    pub(crate) use schemars::JsonSchema;
    pub(crate) use serde::{Deserialize, Serialize};
    pub(crate) use std::sync::Arc;

    pub(crate) type DSResult<T> = Result<T, HttpError>;
}
