pub mod memory;
pub mod postgres;
pub mod rest;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

use crate::auth::Identity;

pub use memory::StaticRoleStore;
pub use postgres::PgRoleStore;
pub use rest::RestRoleStore;

/// Flat permission label. Matching is exact, there is no hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    Bidder,
    PhotoTeam,
    Admin,
    Customs,
    Other(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::Bidder => "bidder",
            Role::PhotoTeam => "photo_team",
            Role::Admin => "admin",
            Role::Customs => "customs",
            Role::Other(s) => s,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "bidder" => Role::Bidder,
            "photo_team" => Role::PhotoTeam,
            "admin" => Role::Admin,
            "customs" => Role::Customs,
            other => Role::Other(other.to_string()),
        }
    }
}

impl From<String> for Role {
    fn from(s: String) -> Self {
        Role::parse(&s)
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum RoleStoreError {
    #[error("role query failed: {0}")]
    Query(String),

    #[error("role store unreachable: {0}")]
    Unreachable(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Read-only access to persisted role assignments.
#[async_trait]
pub trait RoleStore: Send + Sync {
    async fn get_roles(&self, identity: &Identity) -> Result<HashSet<Role>, RoleStoreError>;
}

#[derive(Debug, Error)]
pub enum AuthorizationError {
    #[error("identity {identity} holds none of the required roles")]
    Forbidden { identity: String, required: Vec<String> },

    /// The store could not be asked. Never reported as an empty role set.
    #[error("could not read roles for {identity}: {reason}")]
    Unavailable { identity: String, reason: String },
}

/// Grants access when the identity holds at least one required role.
pub struct RoleAuthorizer {
    store: std::sync::Arc<dyn RoleStore>,
    required: Vec<Role>,
}

impl RoleAuthorizer {
    pub fn new(store: std::sync::Arc<dyn RoleStore>, required: impl IntoIterator<Item = Role>) -> Self {
        let mut ordered = Vec::new();
        for role in required {
            if !ordered.contains(&role) {
                ordered.push(role);
            }
        }
        Self {
            store,
            required: ordered,
        }
    }

    pub fn required(&self) -> &[Role] {
        &self.required
    }

    pub async fn authorize(&self, identity: &Identity) -> Result<(), AuthorizationError> {
        let held = self
            .store
            .get_roles(identity)
            .await
            .map_err(|e| AuthorizationError::Unavailable {
                identity: identity.id.clone(),
                reason: e.to_string(),
            })?;

        if self.required.iter().any(|role| held.contains(role)) {
            tracing::debug!("Identity '{}' authorized with roles {:?}", identity.id, held);
            Ok(())
        } else {
            Err(AuthorizationError::Forbidden {
                identity: identity.id.clone(),
                required: self.required.iter().map(|r| r.as_str().to_string()).collect(),
            })
        }
    }
}
