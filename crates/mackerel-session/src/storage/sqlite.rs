//! SQLite account storage (feature-gated).

use std::{str::FromStr, time::Duration};

use async_trait::async_trait;
use mackerel_core::{
    AccountStorage, AppLanguage, AppSettings, AppTheme, Identity, IdentityId, LoginKind,
    StorageError,
};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

use crate::config::StoreConfig;

const SELECT_LOGIN_USER: &str =
    "SELECT id, handle, email, did, session_data, login_type, is_default FROM login_user";

/// SQLite-based account storage.
///
/// Uses WAL mode for concurrent reads/writes.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open the database named by `config`, creating it if it doesn't exist.
    ///
    /// # Errors
    /// Returns error if the database cannot be opened or migrated.
    pub async fn open(config: &StoreConfig) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::new()
            .filename(&config.database)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(config.busy_timeout_secs));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(backend)?;

        tracing::info!(database = %config.database.display(), "Opened account store");

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Create an in-memory database (for testing).
    ///
    /// # Errors
    /// Returns error if the database cannot be created.
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(backend)?;

        // A single connection that never expires keeps the database alive.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(backend)?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS login_user (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                handle TEXT NOT NULL DEFAULT '',
                email TEXT NOT NULL DEFAULT '',
                did TEXT NOT NULL DEFAULT '',
                session_data TEXT NOT NULL DEFAULT '',
                login_type INTEGER NOT NULL DEFAULT 0,
                is_default INTEGER NOT NULL DEFAULT 0
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS app_settings (
                id INTEGER PRIMARY KEY,
                language INTEGER NOT NULL DEFAULT 0,
                theme INTEGER NOT NULL DEFAULT 0
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        // Not unique: duplicates are tolerated and resolved by lowest id.
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_login_user_did ON login_user(did)")
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_login_user_handle ON login_user(handle)")
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        Ok(())
    }

    async fn fetch_one_where(
        &self,
        clause: &str,
        value: &str,
    ) -> Result<Option<Identity>, StorageError> {
        let sql = format!("{SELECT_LOGIN_USER} WHERE {clause} ORDER BY id LIMIT 1");
        sqlx::query_as::<_, LoginUserRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .map(Identity::try_from)
            .transpose()
    }
}

#[async_trait]
impl AccountStorage for SqliteStorage {
    async fn get(&self, id: IdentityId) -> Result<Option<Identity>, StorageError> {
        let sql = format!("{SELECT_LOGIN_USER} WHERE id = ?1");
        sqlx::query_as::<_, LoginUserRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .map(Identity::try_from)
            .transpose()
    }

    async fn find_by_did(&self, did: &str) -> Result<Option<Identity>, StorageError> {
        self.fetch_one_where("did = ?1", did).await
    }

    async fn find_by_handle(&self, handle: &str) -> Result<Option<Identity>, StorageError> {
        self.fetch_one_where("handle = ?1", handle).await
    }

    async fn find_default(&self) -> Result<Option<Identity>, StorageError> {
        let sql = format!("{SELECT_LOGIN_USER} WHERE is_default = 1 ORDER BY id LIMIT 1");
        sqlx::query_as::<_, LoginUserRow>(&sql)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .map(Identity::try_from)
            .transpose()
    }

    async fn list(&self) -> Result<Vec<Identity>, StorageError> {
        let sql = format!("{SELECT_LOGIN_USER} ORDER BY id");
        sqlx::query_as::<_, LoginUserRow>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?
            .into_iter()
            .map(Identity::try_from)
            .collect()
    }

    async fn insert(&self, identity: &Identity) -> Result<IdentityId, StorageError> {
        let result = sqlx::query(
            r"
            INSERT INTO login_user (handle, email, did, session_data, login_type, is_default)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
        )
        .bind(&identity.handle)
        .bind(&identity.email)
        .bind(&identity.did)
        .bind(&identity.session_data)
        .bind(identity.login_kind.code())
        .bind(identity.is_default)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(result.last_insert_rowid())
    }

    async fn update(&self, identity: &Identity) -> Result<bool, StorageError> {
        let Some(id) = identity.id else {
            return Ok(false);
        };

        let result = sqlx::query(
            r"
            UPDATE login_user
            SET handle = ?1, email = ?2, did = ?3, session_data = ?4, login_type = ?5, is_default = ?6
            WHERE id = ?7
            ",
        )
        .bind(&identity.handle)
        .bind(&identity.email)
        .bind(&identity.did)
        .bind(&identity.session_data)
        .bind(identity.login_kind.code())
        .bind(identity.is_default)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(result.rows_affected() > 0)
    }

    async fn remove(&self, id: IdentityId) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM login_user WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        Ok(result.rows_affected() > 0)
    }

    async fn promote_default(&self, identity: &Identity) -> Result<IdentityId, StorageError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        sqlx::query("UPDATE login_user SET is_default = 0 WHERE is_default = 1")
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        let id = if let Some(id) = identity.id {
            let result = sqlx::query(
                r"
                UPDATE login_user
                SET handle = ?1, email = ?2, did = ?3, session_data = ?4, login_type = ?5, is_default = 1
                WHERE id = ?6
                ",
            )
            .bind(&identity.handle)
            .bind(&identity.email)
            .bind(&identity.did)
            .bind(&identity.session_data)
            .bind(identity.login_kind.code())
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

            if result.rows_affected() == 0 {
                tx.rollback().await.map_err(backend)?;
                return Err(StorageError::NotFound(id));
            }
            id
        } else {
            sqlx::query(
                r"
                INSERT INTO login_user (handle, email, did, session_data, login_type, is_default)
                VALUES (?1, ?2, ?3, ?4, ?5, 1)
                ",
            )
            .bind(&identity.handle)
            .bind(&identity.email)
            .bind(&identity.did)
            .bind(&identity.session_data)
            .bind(identity.login_kind.code())
            .execute(&mut *tx)
            .await
            .map_err(backend)?
            .last_insert_rowid()
        };

        tx.commit().await.map_err(backend)?;
        Ok(id)
    }

    async fn load_settings(&self) -> Result<AppSettings, StorageError> {
        sqlx::query("INSERT OR IGNORE INTO app_settings (id, language, theme) VALUES (1, ?1, ?2)")
            .bind(AppLanguage::default().code())
            .bind(AppTheme::default().code())
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        let row = sqlx::query_as::<_, SettingsRow>(
            "SELECT id, language, theme FROM app_settings ORDER BY id LIMIT 1",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;

        row.try_into()
    }

    async fn store_settings(&self, settings: &AppSettings) -> Result<bool, StorageError> {
        let result = sqlx::query("UPDATE app_settings SET language = ?1, theme = ?2 WHERE id = ?3")
            .bind(settings.language.code())
            .bind(settings.theme.code())
            .bind(settings.id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        Ok(result.rows_affected() > 0)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

fn backend(e: sqlx::Error) -> StorageError {
    StorageError::Backend(Box::new(e))
}

#[derive(sqlx::FromRow)]
struct LoginUserRow {
    id: i64,
    handle: String,
    email: String,
    did: String,
    session_data: String,
    login_type: i64,
    is_default: bool,
}

impl TryFrom<LoginUserRow> for Identity {
    type Error = StorageError;

    fn try_from(row: LoginUserRow) -> Result<Self, Self::Error> {
        let login_kind = LoginKind::from_code(row.login_type).ok_or(StorageError::InvalidValue {
            column: "login_type",
            value: row.login_type,
        })?;

        Ok(Self {
            id: Some(row.id),
            handle: row.handle,
            email: row.email,
            did: row.did,
            session_data: row.session_data,
            login_kind,
            is_default: row.is_default,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SettingsRow {
    id: i64,
    language: i64,
    theme: i64,
}

impl TryFrom<SettingsRow> for AppSettings {
    type Error = StorageError;

    fn try_from(row: SettingsRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            language: AppLanguage::from_code(row.language).ok_or(StorageError::InvalidValue {
                column: "language",
                value: row.language,
            })?,
            theme: AppTheme::from_code(row.theme).ok_or(StorageError::InvalidValue {
                column: "theme",
                value: row.theme,
            })?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn storage() -> SqliteStorage {
        SqliteStorage::in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn insert_and_get_round_trip() {
        let storage = storage().await;
        let identity = Identity::new("did:plc:alice", "alice.example")
            .with_email("alice@example.com")
            .with_session_data("{\"token\":\"abc\"}")
            .with_login_kind(LoginKind::OAuth);

        let id = storage.insert(&identity).await.unwrap();
        let stored = storage.get(id).await.unwrap().unwrap();

        assert_eq!(stored.id, Some(id));
        assert_eq!(stored.handle, "alice.example");
        assert_eq!(stored.email, "alice@example.com");
        assert_eq!(stored.session_data, "{\"token\":\"abc\"}");
        assert_eq!(stored.login_kind, LoginKind::OAuth);
        assert!(!stored.is_default);
    }

    #[tokio::test]
    async fn duplicate_did_resolves_to_lowest_id() {
        let storage = storage().await;
        let first = storage.insert(&Identity::new("did:dup", "one")).await.unwrap();
        storage.insert(&Identity::new("did:dup", "two")).await.unwrap();

        let found = storage.find_by_did("did:dup").await.unwrap().unwrap();
        assert_eq!(found.id, Some(first));
        assert_eq!(storage.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn find_by_handle_misses_cleanly() {
        let storage = storage().await;
        storage.insert(&Identity::new("did:a", "a.example")).await.unwrap();

        assert!(storage.find_by_handle("b.example").await.unwrap().is_none());
        assert!(storage.find_by_handle("a.example").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn update_and_remove_report_affected_rows() {
        let storage = storage().await;
        let id = storage.insert(&Identity::new("did:a", "a")).await.unwrap();

        let mut identity = storage.get(id).await.unwrap().unwrap();
        identity.handle = "renamed".to_string();
        assert!(storage.update(&identity).await.unwrap());
        assert_eq!(storage.get(id).await.unwrap().unwrap().handle, "renamed");

        assert!(storage.remove(id).await.unwrap());
        assert!(!storage.remove(id).await.unwrap());
        identity.id = Some(id);
        assert!(!storage.update(&identity).await.unwrap());
    }

    #[tokio::test]
    async fn promote_default_keeps_single_default() {
        let storage = storage().await;
        let a = storage
            .promote_default(&Identity::new("did:a", "a"))
            .await
            .unwrap();
        let b = storage
            .promote_default(&Identity::new("did:b", "b"))
            .await
            .unwrap();

        let mut first = storage.get(a).await.unwrap().unwrap();
        assert!(!first.is_default);

        first.session_data = "refreshed".to_string();
        assert_eq!(storage.promote_default(&first).await.unwrap(), a);

        let defaults: Vec<_> = storage
            .list()
            .await
            .unwrap()
            .into_iter()
            .filter(|i| i.is_default)
            .collect();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0].id, Some(a));
        assert_eq!(defaults[0].session_data, "refreshed");
        assert!(!storage.get(b).await.unwrap().unwrap().is_default);
    }

    #[tokio::test]
    async fn failed_promotion_rolls_back() {
        let storage = storage().await;
        let a = storage
            .promote_default(&Identity::new("did:a", "a"))
            .await
            .unwrap();

        let mut ghost = Identity::new("did:ghost", "ghost");
        ghost.id = Some(a + 100);
        let err = storage.promote_default(&ghost).await.unwrap_err();

        assert!(matches!(err, StorageError::NotFound(_)));
        assert_eq!(storage.find_default().await.unwrap().unwrap().id, Some(a));
    }

    #[tokio::test]
    async fn unknown_login_type_is_rejected() {
        let storage = storage().await;
        sqlx::query("INSERT INTO login_user (did, handle, login_type) VALUES ('did:x', 'x', 7)")
            .execute(&storage.pool)
            .await
            .unwrap();

        let err = storage.find_by_did("did:x").await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::InvalidValue {
                column: "login_type",
                value: 7
            }
        ));
    }

    #[tokio::test]
    async fn settings_are_created_then_updated() {
        let storage = storage().await;
        let mut settings = storage.load_settings().await.unwrap();
        assert_eq!(settings.id, 1);
        assert_eq!(settings.language, AppLanguage::System);

        settings.language = AppLanguage::Japanese;
        settings.theme = AppTheme::Dark;
        assert!(storage.store_settings(&settings).await.unwrap());

        let reloaded = storage.load_settings().await.unwrap();
        assert_eq!(reloaded, settings);
    }

    #[tokio::test]
    async fn data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::with_database(dir.path().join("accounts.db"));

        let storage = SqliteStorage::open(&config).await.unwrap();
        let id = storage
            .promote_default(&Identity::new("did:a", "a"))
            .await
            .unwrap();
        storage.close().await;

        let reopened = SqliteStorage::open(&config).await.unwrap();
        let default = reopened.find_default().await.unwrap().unwrap();
        assert_eq!(default.id, Some(id));
        reopened.close().await;
    }
}
