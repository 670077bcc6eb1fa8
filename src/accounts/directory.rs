//! User directory collaborator
//!
//! User management lives outside this service. The directory only answers
//! whether a user id is known.

use async_trait::async_trait;
use dashmap::DashSet;

use crate::ledger::{StoreError, UserId};

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn user_exists(&self, user_id: UserId) -> Result<bool, StoreError>;
}

/// Every caller that made it past the authenticating proxy is a known user
pub struct TrustedProxyDirectory;

#[async_trait]
impl UserDirectory for TrustedProxyDirectory {
    async fn user_exists(&self, _user_id: UserId) -> Result<bool, StoreError> {
        Ok(true)
    }
}

/// Fixed set of users
#[derive(Default)]
pub struct StaticUserDirectory {
    users: DashSet<UserId>,
}

impl StaticUserDirectory {
    pub fn new(users: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            users: users.into_iter().collect(),
        }
    }
}

#[async_trait]
impl UserDirectory for StaticUserDirectory {
    async fn user_exists(&self, user_id: UserId) -> Result<bool, StoreError> {
        Ok(self.users.contains(&user_id))
    }
}
