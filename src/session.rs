//! The persisted "current user" record.
//!
//! One JSON blob under the `user` key. Reads never fail: a missing or
//! unreadable store yields `None`, and a blob that no longer parses is
//! deleted on the spot so the next read starts clean.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::{MarketError, MarketResult};
use crate::local_store::{Storage, USER_KEY};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Customer,
    Farmer,
    Admin,
}

impl Role {
    /// Where the UI sends this role after signing in.
    pub fn landing_route(&self) -> &'static str {
        match self {
            Role::Customer => "/",
            Role::Farmer => "/farm/dashboard",
            Role::Admin => "/admin",
        }
    }

    pub fn can_manage_products(&self) -> bool {
        matches!(self, Role::Farmer | Role::Admin)
    }
}

impl FromStr for Role {
    type Err = MarketError;

    fn from_str(input: &str) -> Result<Role, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "customer" | "user" => Ok(Role::Customer),
            "farmer" | "farm" => Ok(Role::Farmer),
            "admin" => Ok(Role::Admin),
            other => Err(MarketError::validation("role", format!("unknown role '{other}'"))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Customer => "customer",
            Role::Farmer => "farmer",
            Role::Admin => "admin",
        };
        f.write_str(name)
    }
}

/// The signed-in user as remembered by this client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub role: Role,
    pub issued_at: DateTime<Utc>,
    /// Opaque marker, not a credential. Nothing verifies it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl SessionRecord {
    pub fn new(
        id: impl Into<String>,
        email: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        role: Role,
    ) -> Self {
        let id = id.into();
        let issued_at = Utc::now();
        let token = Some(issue_token(&id, issued_at));
        Self {
            id,
            email: email.into(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            role,
            issued_at,
            token,
        }
    }

    pub fn display_name(&self) -> String {
        let full = format!("{} {}", self.first_name, self.last_name);
        let full = full.trim();
        if full.is_empty() {
            self.email.clone()
        } else {
            full.to_string()
        }
    }
}

/// Build the opaque session marker: base64 of id, issue time and a nonce.
pub fn issue_token(id: &str, issued_at: DateTime<Utc>) -> String {
    let raw = format!("{id}:{}:{}", issued_at.timestamp_millis(), Uuid::new_v4().simple());
    general_purpose::URL_SAFE_NO_PAD.encode(raw.as_bytes())
}

/// Session lifecycle: there is no refresh transition.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Anonymous,
    Authenticated(SessionRecord),
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated(_))
    }
}

impl From<Option<SessionRecord>> for SessionState {
    fn from(record: Option<SessionRecord>) -> Self {
        match record {
            Some(record) => SessionState::Authenticated(record),
            None => SessionState::Anonymous,
        }
    }
}

/// Read/write helper for the persisted session record.
#[derive(Clone)]
pub struct SessionStore {
    storage: Arc<dyn Storage>,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> Arc<dyn Storage> {
        Arc::clone(&self.storage)
    }

    /// Current record, or `None` when absent, unreadable or corrupted.
    pub fn read_session(&self) -> Option<SessionRecord> {
        let raw = match self.storage.get(USER_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "session read skipped, storage unavailable");
                return None;
            }
        };

        match serde_json::from_str::<SessionRecord>(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(error = %e, "stored session is corrupted, discarding it");
                if let Err(e) = self.storage.remove(USER_KEY) {
                    warn!(error = %e, "failed to discard corrupted session");
                }
                None
            }
        }
    }

    /// Persist `record` and confirm it reads back identically.
    pub fn write_session(&self, record: &SessionRecord) -> MarketResult<()> {
        if record.id.trim().is_empty() {
            return Err(MarketError::validation("id", "session id cannot be empty"));
        }

        let serialized = serde_json::to_string(record)
            .map_err(|e| MarketError::serialization("session record", e))?;

        self.storage
            .set(USER_KEY, &serialized)
            .map_err(|e| MarketError::storage("write_session", e.to_string()))?;

        let stored = self
            .storage
            .get(USER_KEY)
            .map_err(|e| MarketError::storage("write_session verify", e.to_string()))?
            .ok_or_else(|| MarketError::SessionPersistence {
                message: "session vanished immediately after being written".to_string(),
            })?;

        let reparsed: SessionRecord =
            serde_json::from_str(&stored).map_err(|e| MarketError::SessionPersistence {
                message: format!("stored session does not parse: {e}"),
            })?;

        if &reparsed != record {
            return Err(MarketError::SessionPersistence {
                message: "stored session differs from the one written".to_string(),
            });
        }

        info!(user_id = %record.id, role = %record.role, "session stored");
        Ok(())
    }

    /// Forget the current user. Failures are logged and otherwise ignored.
    pub fn clear_session(&self) {
        match self.storage.remove(USER_KEY) {
            Ok(()) => info!("session cleared"),
            Err(e) => warn!(error = %e, "failed to clear session"),
        }
    }

    pub fn session_state(&self) -> SessionState {
        self.read_session().into()
    }
}
