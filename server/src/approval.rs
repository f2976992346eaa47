/*
 * Copyright 2023 Oxide Computer Company
 */

use crate::db::Database;
use crate::error::DownloadError;
use std::collections::HashSet;
use uuid::Uuid;

/**
 * Looks up the set of entity ids approved under a given copy-request, so
 * that a download can be restricted to only the files a reviewer signed
 * off on.
 */
pub(crate) struct ApprovalStore {
    db: Database,
}

impl ApprovalStore {
    pub(crate) fn new(db: Database) -> ApprovalStore {
        ApprovalStore { db }
    }

    pub(crate) fn ping(&self) -> anyhow::Result<()> {
        self.db.ping()
    }

    pub(crate) fn allowed_entities(
        &self,
        request_id: Uuid,
    ) -> Result<HashSet<String>, DownloadError> {
        let rows = self
            .db
            .approval_entities_for_request(request_id)
            .map_err(DownloadError::Internal)?;

        Ok(rows.into_iter().filter_map(|r| r.entity_geid).collect())
    }
}
