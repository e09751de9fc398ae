//! User record storage.
//!
//! [`UserStore`] is the contract the session layer consumes. Every epoch
//! increment goes through [`UserStore::update_with`], which applies the
//! change atomically on the stored record, so concurrent revocations never
//! lose an update.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::accounts::listing::{ListQuery, Page};
use crate::accounts::model::{normalize_email, NewPrincipal, Principal, PrincipalId, INITIAL_EPOCH};
use crate::clock::Clock;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("email already registered")]
    Conflict,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// An in-place change applied atomically to one record.
pub type Mutation = Box<dyn FnOnce(&mut Principal) + Send>;

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: PrincipalId) -> Result<Principal, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Principal, StoreError>;

    /// Insert a new record at [`INITIAL_EPOCH`]. Fails with `Conflict` if the
    /// email is taken.
    async fn create(&self, new: NewPrincipal) -> Result<PrincipalId, StoreError>;

    /// Replace a whole record, epoch included, in one step.
    async fn update(&self, principal: Principal) -> Result<(), StoreError>;

    /// Apply `mutate` to the stored record atomically and return the result.
    ///
    /// The email is not changeable through this path; use `update`.
    async fn update_with(&self, id: PrincipalId, mutate: Mutation)
        -> Result<Principal, StoreError>;

    /// One page of live records matching `query`, with the total match count.
    async fn list(&self, query: &ListQuery) -> Result<Page<Principal>, StoreError>;

    /// Soft-delete: the record disappears from every lookup, its email can
    /// be registered again, and its epoch is bumped so outstanding
    /// credentials die with it. Returns the record as deleted.
    async fn soft_delete(&self, id: PrincipalId) -> Result<Principal, StoreError>;

    /// Remove a record for good, whether live or soft-deleted. Returns it.
    async fn purge(&self, id: PrincipalId) -> Result<Principal, StoreError>;

    /// Increment the session epoch by one and return the new value.
    async fn bump_epoch(&self, id: PrincipalId) -> Result<u64, StoreError> {
        let principal = self
            .update_with(id, Box::new(|p: &mut Principal| p.epoch += 1))
            .await?;
        Ok(principal.epoch)
    }
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    next_id: u64,
    principals: Vec<Principal>,
}

/// A thread-safe in-memory store with optional JSON snapshots.
pub struct InMemoryUserStore {
    records: DashMap<PrincipalId, Principal>,
    /// normalized email -> id
    emails: DashMap<String, PrincipalId>,
    next_id: AtomicU64,
    snapshot_path: Option<PathBuf>,
    clock: Arc<dyn Clock>,
}

impl InMemoryUserStore {
    /// Create a new empty store.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: DashMap::new(),
            emails: DashMap::new(),
            next_id: AtomicU64::new(1),
            snapshot_path: None,
            clock,
        }
    }

    /// Create a store backed by `path`, loading it if the file exists.
    pub fn open(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let mut store = Self::new(clock);
        store.snapshot_path = Some(path.to_path_buf());

        if path.exists() {
            let reader = BufReader::new(File::open(path)?);
            let snapshot: Snapshot = serde_json::from_reader(reader)?;

            let mut max_id = 0;
            for principal in snapshot.principals {
                max_id = max_id.max(principal.id);
                if !principal.is_deleted() {
                    store
                        .emails
                        .insert(normalize_email(&principal.email), principal.id);
                }
                store.records.insert(principal.id, principal);
            }
            store
                .next_id
                .store(snapshot.next_id.max(max_id + 1), Ordering::SeqCst);

            tracing::info!(
                path = %path.display(),
                count = store.records.len(),
                "Loaded user records from snapshot"
            );
        }

        Ok(store)
    }

    /// Write the snapshot file, if this store has one.
    pub fn save(&self) -> std::io::Result<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };

        let mut principals: Vec<Principal> =
            self.records.iter().map(|r| r.value().clone()).collect();
        principals.sort_by_key(|p| p.id);
        let snapshot = Snapshot {
            next_id: self.next_id.load(Ordering::SeqCst),
            principals,
        };

        // Write beside the target and rename so a crash never leaves half a file.
        let tmp = path.with_extension("tmp");
        {
            let writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer(writer, &snapshot)?;
        }
        std::fs::rename(&tmp, path)?;

        tracing::info!(
            path = %path.display(),
            count = snapshot.principals.len(),
            "Saved user records to snapshot"
        );
        Ok(())
    }

    /// Number of records, soft-deleted ones included.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_by_id(&self, id: PrincipalId) -> Result<Principal, StoreError> {
        self.records
            .get(&id)
            .filter(|r| !r.value().is_deleted())
            .map(|r| r.value().clone())
            .ok_or(StoreError::NotFound)
    }

    async fn find_by_email(&self, email: &str) -> Result<Principal, StoreError> {
        let id = self
            .emails
            .get(&normalize_email(email))
            .map(|r| *r.value())
            .ok_or(StoreError::NotFound)?;
        self.find_by_id(id).await
    }

    async fn create(&self, new: NewPrincipal) -> Result<PrincipalId, StoreError> {
        let email = normalize_email(&new.email);
        let now = self.clock.unix_secs();

        match self.emails.entry(email.clone()) {
            Entry::Occupied(_) => Err(StoreError::Conflict),
            Entry::Vacant(slot) => {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                self.records.insert(
                    id,
                    Principal {
                        id,
                        email,
                        password_hash: new.password_hash,
                        full_name: new.full_name,
                        avatar: String::new(),
                        phone: String::new(),
                        role: new.role,
                        epoch: INITIAL_EPOCH,
                        reset_code: None,
                        created_at: now,
                        updated_at: now,
                        deleted_at: None,
                    },
                );
                slot.insert(id);
                Ok(id)
            }
        }
    }

    async fn update(&self, mut principal: Principal) -> Result<(), StoreError> {
        principal.email = normalize_email(&principal.email);
        principal.updated_at = self.clock.unix_secs();

        let old_email = self
            .records
            .get(&principal.id)
            .filter(|r| !r.value().is_deleted())
            .map(|r| r.value().email.clone())
            .ok_or(StoreError::NotFound)?;

        if old_email != principal.email {
            match self.emails.entry(principal.email.clone()) {
                Entry::Occupied(_) => return Err(StoreError::Conflict),
                Entry::Vacant(slot) => {
                    slot.insert(principal.id);
                }
            }
            self.emails.remove(&old_email);
        }

        match self.records.get_mut(&principal.id) {
            Some(mut record) => {
                // Deletion state only changes through soft_delete and purge.
                principal.deleted_at = record.deleted_at;
                *record = principal;
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }

    async fn update_with(
        &self,
        id: PrincipalId,
        mutate: Mutation,
    ) -> Result<Principal, StoreError> {
        let now = self.clock.unix_secs();
        let mut record = self
            .records
            .get_mut(&id)
            .filter(|r| !r.value().is_deleted())
            .ok_or(StoreError::NotFound)?;

        let email = record.email.clone();
        mutate(&mut record);
        record.email = email;
        record.deleted_at = None;
        record.updated_at = now;

        Ok(record.clone())
    }

    async fn list(&self, query: &ListQuery) -> Result<Page<Principal>, StoreError> {
        let keyword = query.keyword.to_lowercase();
        let mut matches: Vec<Principal> = self
            .records
            .iter()
            .filter(|r| !r.value().is_deleted())
            .filter(|r| keyword.is_empty() || r.value().email.contains(&keyword))
            .map(|r| r.value().clone())
            .collect();
        matches.sort_by(|a, b| query.sort.compare(a, b));

        let total = matches.len();
        let items = matches
            .into_iter()
            .skip(query.offset())
            .take(query.limit)
            .collect();
        Ok(Page { items, total })
    }

    async fn soft_delete(&self, id: PrincipalId) -> Result<Principal, StoreError> {
        let now = self.clock.unix_secs();
        let deleted = {
            let mut record = self
                .records
                .get_mut(&id)
                .filter(|r| !r.value().is_deleted())
                .ok_or(StoreError::NotFound)?;
            record.deleted_at = Some(now);
            record.updated_at = now;
            record.reset_code = None;
            record.epoch += 1;
            record.clone()
        };

        // Released the record before touching the index: `create` locks them
        // in the opposite order.
        self.emails.remove_if(&deleted.email, |_, owner| *owner == id);
        Ok(deleted)
    }

    async fn purge(&self, id: PrincipalId) -> Result<Principal, StoreError> {
        let (_, removed) = self.records.remove(&id).ok_or(StoreError::NotFound)?;
        self.emails.remove_if(&removed.email, |_, owner| *owner == id);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::model::Role;
    use crate::clock::ManualClock;
    use std::time::Duration;

    fn store() -> InMemoryUserStore {
        InMemoryUserStore::new(Arc::new(ManualClock::new(Duration::from_secs(500))))
    }

    fn new_principal(email: &str) -> NewPrincipal {
        NewPrincipal {
            email: email.into(),
            password_hash: "hash".into(),
            full_name: String::new(),
            role: Role::User,
        }
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let store = store();
        let id = store.create(new_principal("Bob@Example.com")).await.unwrap();

        let by_id = store.find_by_id(id).await.unwrap();
        assert_eq!(by_id.email, "bob@example.com");
        assert_eq!(by_id.epoch, INITIAL_EPOCH);
        assert_eq!(by_id.created_at, 500);

        let by_email = store.find_by_email("BOB@example.com").await.unwrap();
        assert_eq!(by_email.id, id);

        assert_eq!(store.find_by_id(999).await, Err(StoreError::NotFound));
    }

    #[tokio::test]
    async fn test_duplicate_email_conflicts() {
        let store = store();
        store.create(new_principal("a@example.com")).await.unwrap();
        assert_eq!(
            store.create(new_principal(" A@example.com")).await,
            Err(StoreError::Conflict)
        );
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_update_replaces_record_and_reindexes_email() {
        let store = store();
        let a = store.create(new_principal("a@example.com")).await.unwrap();
        store.create(new_principal("taken@example.com")).await.unwrap();

        let mut record = store.find_by_id(a).await.unwrap();
        record.email = "taken@example.com".into();
        assert_eq!(store.update(record.clone()).await, Err(StoreError::Conflict));

        record.email = "new@example.com".into();
        record.epoch = 9;
        store.update(record).await.unwrap();

        assert_eq!(store.find_by_email("new@example.com").await.unwrap().epoch, 9);
        assert_eq!(
            store.find_by_email("a@example.com").await,
            Err(StoreError::NotFound)
        );
    }

    #[tokio::test]
    async fn test_update_with_cannot_change_email() {
        let store = store();
        let id = store.create(new_principal("a@example.com")).await.unwrap();

        let updated = store
            .update_with(
                id,
                Box::new(|p: &mut Principal| {
                    p.email = "sneaky@example.com".into();
                    p.full_name = "Alice".into();
                }),
            )
            .await
            .unwrap();

        assert_eq!(updated.email, "a@example.com");
        assert_eq!(updated.full_name, "Alice");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_bumps_never_lose_updates() {
        let store = Arc::new(store());
        let id = store.create(new_principal("a@example.com")).await.unwrap();

        let tasks: Vec<_> = (0..64)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.bump_epoch(id).await.unwrap() })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(store.find_by_id(id).await.unwrap().epoch, INITIAL_EPOCH + 64);
    }

    #[tokio::test]
    async fn test_soft_delete_hides_record_and_frees_email() {
        let store = store();
        let id = store.create(new_principal("a@example.com")).await.unwrap();

        let deleted = store.soft_delete(id).await.unwrap();
        assert_eq!(deleted.deleted_at, Some(500));
        assert_eq!(deleted.epoch, INITIAL_EPOCH + 1);

        assert_eq!(store.find_by_id(id).await, Err(StoreError::NotFound));
        assert_eq!(
            store.find_by_email("a@example.com").await,
            Err(StoreError::NotFound)
        );
        assert_eq!(store.bump_epoch(id).await, Err(StoreError::NotFound));
        assert_eq!(store.soft_delete(id).await, Err(StoreError::NotFound));

        let again = store.create(new_principal("a@example.com")).await.unwrap();
        assert_ne!(again, id);
        assert_eq!(store.find_by_email("a@example.com").await.unwrap().id, again);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_purge_removes_live_and_deleted_records() {
        let store = store();
        let live = store.create(new_principal("live@example.com")).await.unwrap();
        let gone = store.create(new_principal("gone@example.com")).await.unwrap();
        store.soft_delete(gone).await.unwrap();

        assert_eq!(store.purge(live).await.unwrap().email, "live@example.com");
        assert_eq!(store.purge(gone).await.unwrap().email, "gone@example.com");
        assert!(store.is_empty());
        assert_eq!(store.purge(live).await, Err(StoreError::NotFound));
        assert!(store.create(new_principal("live@example.com")).await.is_ok());
    }

    #[tokio::test]
    async fn test_list_filters_sorts_and_pages() {
        use crate::accounts::listing::Sort;

        let store = store();
        for name in ["carol", "alice", "bob", "alfred", "dave"] {
            store
                .create(new_principal(&format!("{name}@example.com")))
                .await
                .unwrap();
        }
        let dave = store.find_by_email("dave@example.com").await.unwrap();
        store.soft_delete(dave.id).await.unwrap();

        let query = ListQuery {
            sort: Sort::parse_lenient("email asc"),
            limit: 2,
            ..ListQuery::default()
        };
        let page = store.list(&query).await.unwrap();
        assert_eq!(page.total, 4);
        let emails: Vec<_> = page.items.iter().map(|p| p.email.as_str()).collect();
        assert_eq!(emails, vec!["alfred@example.com", "alice@example.com"]);

        let page = store.list(&ListQuery { page: 2, ..query.clone() }).await.unwrap();
        let emails: Vec<_> = page.items.iter().map(|p| p.email.as_str()).collect();
        assert_eq!(emails, vec!["bob@example.com", "carol@example.com"]);

        let page = store
            .list(&ListQuery {
                keyword: "AL".into(),
                ..query
            })
            .await
            .unwrap();
        assert_eq!(page.total, 2);

        // Same created_at everywhere: newest id first.
        let page = store.list(&ListQuery::default()).await.unwrap();
        let ids: Vec<_> = page.items.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![4, 3, 2, 1]);
    }

    #[tokio::test]
    async fn test_snapshot_round_trip_keeps_epochs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(Duration::from_secs(1)));

        let store = InMemoryUserStore::open(&path, clock.clone()).unwrap();
        let id = store.create(new_principal("a@example.com")).await.unwrap();
        store.bump_epoch(id).await.unwrap();
        store.save().unwrap();

        let loaded = InMemoryUserStore::open(&path, clock).unwrap();
        assert_eq!(loaded.find_by_id(id).await.unwrap().epoch, 2);
        assert_eq!(loaded.find_by_email("a@example.com").await.unwrap().id, id);

        let next = loaded.create(new_principal("b@example.com")).await.unwrap();
        assert!(next > id);

        // Soft-deleted records survive a reload without claiming their email.
        loaded.soft_delete(next).await.unwrap();
        loaded.save().unwrap();
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(Duration::from_secs(2)));
        let reloaded = InMemoryUserStore::open(&path, clock).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.create(new_principal("b@example.com")).await.is_ok());
    }
}
