/*
 * Copyright 2023 Oxide Computer Company
 */

pub(crate) mod schema;

use anyhow::Result;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

type Pg = ConnectionManager<PgConnection>;

pub(crate) struct Database {
    pool: Pool<Pg>,
    schema: String,
}

#[derive(Debug, Clone, Queryable, Serialize, Deserialize, JsonSchema)]
pub(crate) struct ApprovalEntity {
    pub id: Uuid,
    pub request_id: Option<Uuid>,
    pub entity_geid: Option<String>,
    pub entity_type: Option<String>,
    pub review_status: Option<String>,
    pub parent_geid: Option<String>,
    pub copy_status: Option<String>,
    pub name: String,
}

impl Database {
    pub(crate) fn new(database_url: &str, schema: &str) -> Result<Database> {
        let manager = ConnectionManager::<PgConnection>::new(database_url);
        let pool = Pool::builder().max_size(8).build(manager)?;
        Ok(Database { pool, schema: schema.to_string() })
    }

    /** Cheap reachability probe for the health endpoint. */
    pub(crate) fn ping(&self) -> Result<()> {
        self.pool.get()?;
        Ok(())
    }

    /**
     * Load every approval entity associated with a given approval request.
     * Grounded on the upstream service's schema-reflected `approval_entity`
     * table lookup: a plain equality filter on `request_id`, nothing more.
     */
    pub(crate) fn approval_entities_for_request(
        &self,
        request_id: Uuid,
    ) -> Result<Vec<ApprovalEntity>> {
        use schema::approval_entity::dsl;

        let mut conn = self.pool.get()?;

        /*
         * The approval table lives in a deployment-specific schema, so we
         * point the search path at it for the lifetime of this connection
         * rather than hard-coding the schema into every query.
         */
        diesel::sql_query(format!("SET search_path TO {}", self.schema))
            .execute(&mut conn)?;

        let rows = dsl::approval_entity
            .filter(dsl::request_id.eq(request_id))
            .load::<ApprovalEntity>(&mut conn)?;

        Ok(rows)
    }
}
