//! In-memory account storage.

use std::{
    collections::BTreeMap,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use async_trait::async_trait;
use mackerel_core::{AccountStorage, AppSettings, Identity, IdentityId, StorageError};

/// In-memory storage implementation.
///
/// Useful for tests and ephemeral sessions. Data is lost on drop.
pub struct MemoryStorage {
    state: RwLock<State>,
}

#[derive(Default)]
struct State {
    identities: BTreeMap<IdentityId, Identity>,
    last_id: IdentityId,
    settings: Option<AppSettings>,
}

impl State {
    fn allocate_id(&mut self) -> IdentityId {
        self.last_id += 1;
        self.last_id
    }

    fn find(&self, matches: impl Fn(&Identity) -> bool) -> Option<Identity> {
        self.identities.values().find(|i| matches(i)).cloned()
    }
}

impl MemoryStorage {
    /// Create an empty in-memory storage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StorageError> {
        self.state
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StorageError> {
        self.state
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccountStorage for MemoryStorage {
    async fn get(&self, id: IdentityId) -> Result<Option<Identity>, StorageError> {
        Ok(self.read()?.identities.get(&id).cloned())
    }

    async fn find_by_did(&self, did: &str) -> Result<Option<Identity>, StorageError> {
        Ok(self.read()?.find(|i| i.did == did))
    }

    async fn find_by_handle(&self, handle: &str) -> Result<Option<Identity>, StorageError> {
        Ok(self.read()?.find(|i| i.handle == handle))
    }

    async fn find_default(&self) -> Result<Option<Identity>, StorageError> {
        Ok(self.read()?.find(|i| i.is_default))
    }

    async fn list(&self) -> Result<Vec<Identity>, StorageError> {
        Ok(self.read()?.identities.values().cloned().collect())
    }

    async fn insert(&self, identity: &Identity) -> Result<IdentityId, StorageError> {
        let mut state = self.write()?;
        let id = state.allocate_id();
        let mut record = identity.clone();
        record.id = Some(id);
        state.identities.insert(id, record);
        Ok(id)
    }

    async fn update(&self, identity: &Identity) -> Result<bool, StorageError> {
        let Some(id) = identity.id else {
            return Ok(false);
        };

        let mut state = self.write()?;
        match state.identities.get_mut(&id) {
            Some(existing) => {
                existing.clone_from(identity);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove(&self, id: IdentityId) -> Result<bool, StorageError> {
        Ok(self.write()?.identities.remove(&id).is_some())
    }

    async fn promote_default(&self, identity: &Identity) -> Result<IdentityId, StorageError> {
        let mut state = self.write()?;

        let id = match identity.id {
            Some(id) if state.identities.contains_key(&id) => id,
            Some(id) => return Err(StorageError::NotFound(id)),
            None => state.allocate_id(),
        };

        for other in state.identities.values_mut() {
            other.is_default = false;
        }

        let mut record = identity.clone();
        record.id = Some(id);
        record.is_default = true;
        state.identities.insert(id, record);

        Ok(id)
    }

    async fn load_settings(&self) -> Result<AppSettings, StorageError> {
        let mut state = self.write()?;
        Ok(*state.settings.get_or_insert(AppSettings {
            id: 1,
            ..AppSettings::default()
        }))
    }

    async fn store_settings(&self, settings: &AppSettings) -> Result<bool, StorageError> {
        let mut state = self.write()?;
        match state.settings.as_mut() {
            Some(existing) if existing.id == settings.id => {
                *existing = *settings;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use mackerel_core::{AppTheme, LoginKind};

    use super::*;

    #[tokio::test]
    async fn insert_assigns_increasing_ids() {
        let storage = MemoryStorage::new();

        let a = storage.insert(&Identity::new("did:a", "a")).await.unwrap();
        let b = storage.insert(&Identity::new("did:b", "b")).await.unwrap();

        assert!(b > a);
        assert_eq!(storage.get(a).await.unwrap().unwrap().id, Some(a));
    }

    #[tokio::test]
    async fn lookups_prefer_lowest_id() {
        let storage = MemoryStorage::new();
        let first = storage.insert(&Identity::new("did:dup", "one")).await.unwrap();
        storage.insert(&Identity::new("did:dup", "two")).await.unwrap();

        let found = storage.find_by_did("did:dup").await.unwrap().unwrap();
        assert_eq!(found.id, Some(first));
    }

    #[tokio::test]
    async fn update_missing_row_changes_nothing() {
        let storage = MemoryStorage::new();
        let mut ghost = Identity::new("did:ghost", "ghost");
        assert!(!storage.update(&ghost).await.unwrap());

        ghost.id = Some(99);
        assert!(!storage.update(&ghost).await.unwrap());
        assert!(storage.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn promote_default_clears_other_flags() {
        let storage = MemoryStorage::new();
        let a = storage
            .promote_default(&Identity::new("did:a", "a"))
            .await
            .unwrap();
        let b = storage
            .promote_default(&Identity::new("did:b", "b").with_login_kind(LoginKind::OAuth))
            .await
            .unwrap();

        assert!(!storage.get(a).await.unwrap().unwrap().is_default);
        let default = storage.find_default().await.unwrap().unwrap();
        assert_eq!(default.id, Some(b));
        assert_eq!(default.login_kind, LoginKind::OAuth);
    }

    #[tokio::test]
    async fn promote_default_of_vanished_row_fails_without_side_effects() {
        let storage = MemoryStorage::new();
        let a = storage
            .promote_default(&Identity::new("did:a", "a"))
            .await
            .unwrap();

        let mut ghost = Identity::new("did:ghost", "ghost");
        ghost.id = Some(42);
        let err = storage.promote_default(&ghost).await.unwrap_err();

        assert!(matches!(err, StorageError::NotFound(42)));
        assert_eq!(storage.find_default().await.unwrap().unwrap().id, Some(a));
    }

    #[tokio::test]
    async fn settings_row_is_created_on_first_read() {
        let storage = MemoryStorage::new();
        let mut settings = storage.load_settings().await.unwrap();
        assert_eq!(settings.theme, AppTheme::System);

        settings.theme = AppTheme::Dark;
        assert!(storage.store_settings(&settings).await.unwrap());
        assert_eq!(storage.load_settings().await.unwrap().theme, AppTheme::Dark);
    }

    #[tokio::test]
    async fn storing_settings_before_first_read_is_a_no_op() {
        let storage = MemoryStorage::new();
        let settings = AppSettings {
            id: 1,
            theme: AppTheme::Light,
            ..AppSettings::default()
        };

        assert!(!storage.store_settings(&settings).await.unwrap());
    }
}
