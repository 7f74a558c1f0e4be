//! Account and settings records shared by the store and its subscribers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Store-assigned row identifier for an [`Identity`].
pub type IdentityId = i64;

/// How an identity authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoginKind {
    /// App password login.
    #[default]
    Password,
    /// OAuth login.
    #[serde(rename = "oauth")]
    OAuth,
}

impl LoginKind {
    /// Integer code used by the persistence layer.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::Password => 0,
            Self::OAuth => 1,
        }
    }

    #[must_use]
    pub const fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Password),
            1 => Some(Self::OAuth),
            _ => None,
        }
    }
}

/// A persisted authenticated account.
///
/// `did` and `handle` are lookup keys, but the store does not enforce
/// their uniqueness. `session_data` belongs to the protocol client and is
/// stored verbatim.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Identity {
    /// Row id, `None` until the identity has been stored.
    pub id: Option<IdentityId>,
    pub handle: String,
    pub email: String,
    /// Stable protocol identifier.
    pub did: String,
    /// Serialized credentials owned by the protocol client.
    pub session_data: String,
    pub login_kind: LoginKind,
    pub is_default: bool,
}

impl Identity {
    /// Create an unsaved identity.
    #[must_use]
    pub fn new(did: impl Into<String>, handle: impl Into<String>) -> Self {
        Self {
            did: did.into(),
            handle: handle.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = email.into();
        self
    }

    #[must_use]
    pub fn with_session_data(mut self, session_data: impl Into<String>) -> Self {
        self.session_data = session_data.into();
        self
    }

    #[must_use]
    pub const fn with_login_kind(mut self, login_kind: LoginKind) -> Self {
        self.login_kind = login_kind;
        self
    }

    /// Whether the store has assigned a row id.
    #[must_use]
    pub const fn is_saved(&self) -> bool {
        self.id.is_some()
    }

    /// Overwrite the fields a fresh login refreshes, keeping row id and
    /// default flag.
    pub fn absorb_login(&mut self, login: &Self) {
        self.handle.clone_from(&login.handle);
        self.email.clone_from(&login.email);
        self.did.clone_from(&login.did);
        self.session_data.clone_from(&login.session_data);
        self.login_kind = login.login_kind;
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("id", &self.id)
            .field("handle", &self.handle)
            .field("email", &self.email)
            .field("did", &self.did)
            .field("session_data", &"<redacted>")
            .field("login_kind", &self.login_kind)
            .field("is_default", &self.is_default)
            .finish()
    }
}

/// What happened to an identity row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEventKind {
    Inserted,
    Updated,
    Deleted,
}

/// Broadcast after every successful identity write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionChanged {
    /// The identity as written (or as it was before deletion).
    pub identity: Identity,
    pub kind: SessionEventKind,
}

impl SessionChanged {
    #[must_use]
    pub const fn new(identity: Identity, kind: SessionEventKind) -> Self {
        Self { identity, kind }
    }
}

/// UI language preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppLanguage {
    #[default]
    System,
    English,
    Japanese,
}

impl AppLanguage {
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::System => 0,
            Self::English => 1,
            Self::Japanese => 2,
        }
    }

    #[must_use]
    pub const fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::System),
            1 => Some(Self::English),
            2 => Some(Self::Japanese),
            _ => None,
        }
    }
}

/// UI theme preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppTheme {
    #[default]
    System,
    Light,
    Dark,
}

impl AppTheme {
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::System => 0,
            Self::Light => 1,
            Self::Dark => 2,
        }
    }

    #[must_use]
    pub const fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::System),
            1 => Some(Self::Light),
            2 => Some(Self::Dark),
            _ => None,
        }
    }
}

/// Singleton preferences row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AppSettings {
    pub id: i64,
    pub language: AppLanguage,
    pub theme: AppTheme,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absorb_login_keeps_row_identity() {
        let mut stored = Identity::new("did:plc:old", "old.bsky.social");
        stored.id = Some(7);
        stored.is_default = false;

        let login = Identity::new("did:plc:new", "new.bsky.social")
            .with_email("new@example.com")
            .with_session_data("{\"jwt\":\"abc\"}")
            .with_login_kind(LoginKind::OAuth);
        stored.absorb_login(&login);

        assert_eq!(stored.id, Some(7));
        assert!(!stored.is_default);
        assert_eq!(stored.did, "did:plc:new");
        assert_eq!(stored.handle, "new.bsky.social");
        assert_eq!(stored.email, "new@example.com");
        assert_eq!(stored.login_kind, LoginKind::OAuth);
    }

    #[test]
    fn debug_output_hides_session_data() {
        let identity = Identity::new("did:plc:x", "x").with_session_data("secret-token");
        let rendered = format!("{identity:?}");
        assert!(!rendered.contains("secret-token"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn codes_are_stable() {
        for kind in [LoginKind::Password, LoginKind::OAuth] {
            assert_eq!(LoginKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(LoginKind::from_code(9), None);
        assert_eq!(AppLanguage::from_code(2), Some(AppLanguage::Japanese));
        assert_eq!(AppTheme::from_code(-1), None);
    }

    #[test]
    fn event_kind_serializes_snake_case() {
        let event = SessionChanged::new(Identity::new("did:x", "a"), SessionEventKind::Deleted);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"deleted\""));
        assert!(json.contains("\"password\""));

        let parsed: SessionChanged = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }
}
