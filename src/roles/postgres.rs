use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use std::collections::HashSet;
use std::time::Duration;
use uuid::Uuid;

use super::{Role, RoleStore, RoleStoreError};
use crate::auth::Identity;

const ROLES_QUERY: &str = "SELECT role::text AS role FROM user_roles WHERE user_id = $1";

/// Reads `user_roles` straight from the provider's Postgres database.
#[derive(Clone)]
pub struct PgRoleStore {
    pool: PgPool,
}

impl PgRoleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Pool that connects on first use, so startup never blocks on the database.
    pub fn lazy_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect_lazy(database_url)
    }
}

#[async_trait]
impl RoleStore for PgRoleStore {
    async fn get_roles(&self, identity: &Identity) -> Result<HashSet<Role>, RoleStoreError> {
        // user_id is a uuid column; any other id cannot own rows
        let user_id = match Uuid::parse_str(&identity.id) {
            Ok(id) => id,
            Err(_) => {
                tracing::debug!("Identity '{}' is not a uuid, no role rows possible", identity.id);
                return Ok(HashSet::new());
            }
        };

        let rows = sqlx::query(ROLES_QUERY)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("role")
                    .map(|role| Role::parse(&role))
                    .map_err(RoleStoreError::from)
            })
            .collect()
    }
}
