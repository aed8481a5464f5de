use std::sync::RwLock;

use log::info;
use uuid::Uuid;

use crate::{
    db::{
        models::{Owner, OwnerProfile},
        repositories::users,
        Database,
    },
    error::{classify, ServiceError},
};

/// Resolves the single account every row belongs to and caches its id for
/// the life of the process.
///
/// There is no single-flight guard: concurrent first callers may each run the
/// upsert before the cache is filled. The upsert is idempotent on email, so
/// they all converge on the same id and only pay a redundant round trip.
pub struct OwnerResolver {
    db: Database,
    defaults: OwnerProfile,
    cached: RwLock<Option<Uuid>>,
}

impl OwnerResolver {
    pub fn new(db: Database, defaults: OwnerProfile) -> Self {
        Self {
            db,
            defaults,
            cached: RwLock::new(None),
        }
    }

    fn cached_id(&self) -> Option<Uuid> {
        match self.cached.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn remember(&self, id: Uuid) {
        let mut guard = match self.cached.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(id);
    }

    /// Owner id, creating the default owner on first use.
    pub async fn owner_id(&self) -> Result<Uuid, ServiceError> {
        if let Some(id) = self.cached_id() {
            return Ok(id);
        }

        let defaults = self.defaults.clone();
        let owner = self
            .db
            .with_tx("failed to bootstrap default user", move |tx| {
                users::upsert_user_by_email(tx, &defaults)
                    .map_err(|err| classify(err, "failed to bootstrap default user"))
            })
            .await?;

        info!("Resolved default owner {} <{}>", owner.id, owner.email);
        self.remember(owner.id);
        Ok(owner.id)
    }

    /// Writes `profile` unconditionally and makes the result the cached owner.
    pub async fn upsert(&self, profile: OwnerProfile) -> Result<Owner, ServiceError> {
        let owner = self
            .db
            .with_tx("failed to update user", move |tx| {
                users::upsert_user_by_email(tx, &profile)
                    .map_err(|err| classify(err, "failed to update user"))
            })
            .await?;

        self.remember(owner.id);
        Ok(owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn profile(email: &str) -> OwnerProfile {
        OwnerProfile {
            name: "ZenList User".into(),
            email: email.into(),
            timezone: "UTC".into(),
            avatar_url: None,
        }
    }

    async fn user_count(db: &Database) -> i64 {
        db.execute(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn first_call_creates_then_caches() {
        let db = Database::in_memory(Duration::from_secs(3)).unwrap();
        let resolver = OwnerResolver::new(db.clone(), profile("user@zenlist.local"));

        let first = resolver.owner_id().await.unwrap();
        // Wipe the row: a cached id must not go back to storage.
        db.execute(|conn| Ok(conn.execute("DELETE FROM users", [])?))
            .await
            .unwrap();
        let second = resolver.owner_id().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(user_count(&db).await, 0);
    }

    #[tokio::test]
    async fn concurrent_first_calls_converge() {
        let db = Database::in_memory(Duration::from_secs(3)).unwrap();
        let resolver = OwnerResolver::new(db.clone(), profile("user@zenlist.local"));

        let (a, b) = tokio::join!(resolver.owner_id(), resolver.owner_id());
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(user_count(&db).await, 1);
    }

    #[tokio::test]
    async fn upsert_refreshes_cache() {
        let db = Database::in_memory(Duration::from_secs(3)).unwrap();
        let resolver = OwnerResolver::new(db.clone(), profile("user@zenlist.local"));
        let default_id = resolver.owner_id().await.unwrap();

        let other = resolver.upsert(profile("someone@else.dev")).await.unwrap();
        assert_ne!(other.id, default_id);
        assert_eq!(resolver.owner_id().await.unwrap(), other.id);
    }
}
