//! Account store orchestrating storage writes and session events.

use std::sync::Arc;

use mackerel_core::{
    AccountStorage, AppSettings, Identity, IdentityId, SessionBus, SessionChanged,
    SessionEventKind, StorageError,
};
use tokio::sync::Mutex;

/// Persistent set of signed-in identities.
///
/// Every write is serialized through one lock and announced on the bus after
/// it has been persisted. Reads go straight to storage.
pub struct SessionStore<S>
where
    S: AccountStorage,
{
    storage: S,
    bus: Arc<SessionBus>,
    write_lock: Mutex<()>,
}

impl<S> SessionStore<S>
where
    S: AccountStorage,
{
    /// Create a store over `storage`, announcing changes on `bus`.
    #[must_use]
    pub fn new(storage: S, bus: Arc<SessionBus>) -> Self {
        Self {
            storage,
            bus,
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub const fn bus(&self) -> &Arc<SessionBus> {
        &self.bus
    }

    #[must_use]
    pub const fn storage(&self) -> &S {
        &self.storage
    }

    /// Record a fresh login and make it the default account.
    ///
    /// A stored identity with the same `did` is reused, falling back to one
    /// with the same `handle`. Its login fields are refreshed from `login`;
    /// otherwise a new row is inserted. Every other identity loses the
    /// default flag in the same write.
    ///
    /// # Errors
    /// Returns error if storage fails. Nothing is written or published then.
    pub async fn upsert_as_default(&self, login: Identity) -> Result<IdentityId, StorageError> {
        let _guard = self.write_lock.lock().await;

        let (mut record, kind) = match self.find_existing(&login).await? {
            Some(mut existing) => {
                existing.absorb_login(&login);
                (existing, SessionEventKind::Updated)
            }
            None => {
                let mut fresh = login;
                fresh.id = None;
                (fresh, SessionEventKind::Inserted)
            }
        };
        record.is_default = true;

        let id = self.storage.promote_default(&record).await?;
        record.id = Some(id);

        tracing::info!(id, did = %record.did, handle = %record.handle, ?kind, "Default account set");

        self.bus.publish(SessionChanged::new(record, kind));
        Ok(id)
    }

    async fn find_existing(&self, login: &Identity) -> Result<Option<Identity>, StorageError> {
        if !login.did.is_empty() {
            if let Some(found) = self.storage.find_by_did(&login.did).await? {
                return Ok(Some(found));
            }
        }
        if !login.handle.is_empty() {
            return self.storage.find_by_handle(&login.handle).await;
        }
        Ok(None)
    }

    /// The identity flagged as default, if any.
    ///
    /// # Errors
    /// Returns error if storage fails.
    pub async fn get_default(&self) -> Result<Option<Identity>, StorageError> {
        self.storage.find_default().await
    }

    /// # Errors
    /// Returns error if storage fails.
    pub async fn get_by_did(&self, did: &str) -> Result<Option<Identity>, StorageError> {
        self.storage.find_by_did(did).await
    }

    /// # Errors
    /// Returns error if storage fails.
    pub async fn get_by_handle(&self, handle: &str) -> Result<Option<Identity>, StorageError> {
        self.storage.find_by_handle(handle).await
    }

    /// # Errors
    /// Returns error if storage fails.
    pub async fn get_by_id(&self, id: IdentityId) -> Result<Option<Identity>, StorageError> {
        self.storage.get(id).await
    }

    /// Every stored identity, ordered by id.
    ///
    /// # Errors
    /// Returns error if storage fails.
    pub async fn list_all(&self) -> Result<Vec<Identity>, StorageError> {
        self.storage.list().await
    }

    /// Remove a stored identity.
    ///
    /// Returns `false` without publishing when the identity was never saved
    /// or is already gone.
    ///
    /// # Errors
    /// Returns error if storage fails.
    pub async fn delete(&self, identity: &Identity) -> Result<bool, StorageError> {
        let Some(id) = identity.id else {
            return Ok(false);
        };

        let _guard = self.write_lock.lock().await;
        if !self.storage.remove(id).await? {
            return Ok(false);
        }

        tracing::info!(id, did = %identity.did, "Account removed");
        self.bus
            .publish(SessionChanged::new(identity.clone(), SessionEventKind::Deleted));
        Ok(true)
    }

    /// Persist `identity` as given, assigning its id on first save.
    ///
    /// A default identity is written through the same path as
    /// [`upsert_as_default`](Self::upsert_as_default) so the single-default
    /// rule holds. Returns `false` when a previously saved row no longer
    /// exists.
    ///
    /// # Errors
    /// Returns error if storage fails.
    pub async fn save(&self, identity: &mut Identity) -> Result<bool, StorageError> {
        let _guard = self.write_lock.lock().await;
        let kind = if identity.is_saved() {
            SessionEventKind::Updated
        } else {
            SessionEventKind::Inserted
        };

        if identity.is_default {
            match self.storage.promote_default(identity).await {
                Ok(id) => identity.id = Some(id),
                Err(StorageError::NotFound(_)) => return Ok(false),
                Err(e) => return Err(e),
            }
        } else if identity.is_saved() {
            if !self.storage.update(identity).await? {
                return Ok(false);
            }
        } else {
            identity.id = Some(self.storage.insert(identity).await?);
        }

        tracing::debug!(id = ?identity.id, ?kind, "Account saved");
        self.bus.publish(SessionChanged::new(identity.clone(), kind));
        Ok(true)
    }

    /// Application settings, or `None` if storage is unavailable.
    pub async fn settings(&self) -> Option<AppSettings> {
        match self.storage.load_settings().await {
            Ok(settings) => Some(settings),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load settings");
                None
            }
        }
    }

    /// Persist application settings. Returns `false` on any failure.
    pub async fn save_settings(&self, settings: &AppSettings) -> bool {
        let _guard = self.write_lock.lock().await;
        match self.storage.store_settings(settings).await {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to save settings");
                false
            }
        }
    }

    /// Release the storage backend.
    pub async fn close(self) {
        self.storage.close().await;
        tracing::debug!("Account store closed");
    }
}
