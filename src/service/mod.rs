//! Caller-facing operations of the tracker.
//!
//! Every operation validates its input first, resolves the owner, then runs
//! its storage calls. Mutations touching more than one statement run inside a
//! single `Database::with_tx` scope; storage failures are classified once.

pub mod inputs;
mod labels;
pub mod owner;
pub mod pagination;
mod projects;
mod tasks;
pub mod validate;

use log::debug;

use crate::{
    db::{
        models::{Owner, OwnerProfile},
        repositories::users,
        Database,
    },
    error::{classify, ServiceError},
};
use inputs::UpsertOwnerInput;
use owner::OwnerResolver;

/// Entry point for every tracker operation, scoped to the resolved owner.
pub struct TrackerService {
    db: Database,
    owner: OwnerResolver,
}

impl TrackerService {
    pub fn new(db: Database, defaults: OwnerProfile) -> Self {
        Self {
            owner: OwnerResolver::new(db.clone(), defaults),
            db,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Resolves the owner eagerly so the first request does not pay for it.
    pub async fn bootstrap(&self) -> Result<(), ServiceError> {
        self.owner.owner_id().await.map(|_| ())
    }

    pub async fn me(&self) -> Result<Owner, ServiceError> {
        let owner_id = self.owner.owner_id().await?;
        self.db
            .execute(move |conn| users::get_user_by_id(conn, owner_id))
            .await
            .map_err(|err| classify(err, "user not found"))
    }

    pub async fn upsert_me(&self, input: UpsertOwnerInput) -> Result<Owner, ServiceError> {
        let profile = OwnerProfile {
            name: validate::required(&input.name, "name is required")?,
            email: validate::normalize_email(&input.email)?,
            timezone: validate::required(&input.timezone, "timezone is required")?,
            avatar_url: input.avatar_url,
        };

        let owner = self.owner.upsert(profile).await?;
        debug!("Updated owner profile {}", owner.id);
        Ok(owner)
    }
}
