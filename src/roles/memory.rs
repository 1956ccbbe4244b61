use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

use super::{Role, RoleStore, RoleStoreError};
use crate::auth::Identity;

/// Role assignments held in memory, loaded from configuration.
#[derive(Debug, Default, Clone)]
pub struct StaticRoleStore {
    assignments: HashMap<String, HashSet<Role>>,
}

impl StaticRoleStore {
    pub fn from_assignments<I, K, R, S>(assignments: I) -> Self
    where
        I: IntoIterator<Item = (K, R)>,
        K: Into<String>,
        R: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let assignments = assignments
            .into_iter()
            .map(|(id, roles)| {
                let roles = roles.into_iter().map(|r| Role::parse(r.as_ref())).collect();
                (id.into(), roles)
            })
            .collect();
        Self { assignments }
    }
}

#[async_trait]
impl RoleStore for StaticRoleStore {
    async fn get_roles(&self, identity: &Identity) -> Result<HashSet<Role>, RoleStoreError> {
        Ok(self.assignments.get(&identity.id).cloned().unwrap_or_default())
    }
}
