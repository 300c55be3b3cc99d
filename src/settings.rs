//! Per-user, per-farm and site-wide settings, plus the local theme switch.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::client::ClientHandle;
use crate::errors::{BackendError, MarketError, MarketResult};
use crate::local_store::{Storage, DARK_MODE_KEY};
use crate::models::{tables, AdminPaymentMethod, FarmSettings, ShippingMethod, SiteSetting, UserSettings};
use crate::query::{Direction, Query};
use crate::session::{Role, SessionRecord};

#[derive(Clone)]
pub struct SettingsService {
    handle: ClientHandle,
}

impl SettingsService {
    pub fn new(handle: ClientHandle) -> Self {
        Self { handle }
    }

    fn require_role(&self, allowed: &[Role], action: &str) -> MarketResult<SessionRecord> {
        let session = self.handle.require_session()?;
        if !allowed.contains(&session.role) {
            return Err(MarketError::forbidden(action));
        }
        Ok(session)
    }

    /// The signed-in user's preferences; defaults when nothing is saved yet.
    pub async fn user_settings(&self) -> MarketResult<UserSettings> {
        let session = self.handle.require_session()?;
        let stored: Option<UserSettings> = self
            .handle
            .client()
            .fetch_optional(Query::table(tables::USER_SETTINGS).eq("user_id", session.id.clone()))
            .await?;
        Ok(stored.unwrap_or_else(|| UserSettings::defaults_for(&session.id)))
    }

    pub async fn save_user_settings(&self, mut settings: UserSettings) -> MarketResult<UserSettings> {
        let session = self.handle.require_session()?;
        settings.user_id = session.id;
        let row = serde_json::to_value(&settings)?;
        self.upsert_one(tables::USER_SETTINGS, row, "user_id").await
    }

    pub async fn farm_settings(&self) -> MarketResult<Option<FarmSettings>> {
        let session = self.require_role(&[Role::Farmer], "view farm settings")?;
        self.handle
            .client()
            .fetch_optional(Query::table(tables::FARM_SETTINGS).eq("farm_id", session.id))
            .await
    }

    pub async fn save_farm_settings(&self, mut settings: FarmSettings) -> MarketResult<FarmSettings> {
        let session = self.require_role(&[Role::Farmer], "edit farm settings")?;
        if settings.farm_name.trim().is_empty() {
            return Err(MarketError::validation("farm_name", "cannot be empty"));
        }
        if settings.min_order_amount < 0.0 {
            return Err(MarketError::validation("min_order_amount", "cannot be negative"));
        }
        settings.farm_id = session.id;
        let row = serde_json::to_value(&settings)?;
        self.upsert_one(tables::FARM_SETTINGS, row, "farm_id").await
    }

    pub async fn site_settings(&self) -> MarketResult<Vec<SiteSetting>> {
        self.require_role(&[Role::Admin], "view site settings")?;
        self.handle
            .client()
            .fetch(Query::table(tables::SETTINGS).order("key", Direction::Asc))
            .await
    }

    pub async fn site_setting(&self, key: &str) -> MarketResult<Option<SiteSetting>> {
        self.handle
            .client()
            .fetch_optional(Query::table(tables::SETTINGS).eq("key", key))
            .await
    }

    pub async fn update_site_setting(&self, key: &str, value: Value) -> MarketResult<SiteSetting> {
        self.require_role(&[Role::Admin], "edit site settings")?;
        if key.trim().is_empty() {
            return Err(MarketError::validation("key", "cannot be empty"));
        }
        let row = json!({ "key": key, "value": value, "updated_at": Utc::now() });
        let saved = self.upsert_one(tables::SETTINGS, row, "key").await?;
        info!(key, "site setting updated");
        Ok(saved)
    }

    /// Active shipping options, cheapest first.
    pub async fn shipping_methods(&self) -> MarketResult<Vec<ShippingMethod>> {
        self.handle
            .client()
            .fetch(
                Query::table(tables::SHIPPING_METHODS)
                    .eq("is_active", true)
                    .order("price", Direction::Asc),
            )
            .await
    }

    pub async fn admin_payment_methods(&self) -> MarketResult<Vec<AdminPaymentMethod>> {
        self.handle
            .client()
            .fetch(
                Query::table(tables::ADMIN_PAYMENT_METHODS)
                    .eq("is_active", true)
                    .order("name", Direction::Asc),
            )
            .await
    }

    async fn upsert_one<T: serde::de::DeserializeOwned>(
        &self,
        table: &str,
        row: Value,
        on_conflict: &str,
    ) -> MarketResult<T> {
        self.handle
            .client()
            .fetch::<T>(Query::table(table).upsert(vec![row], on_conflict))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| MarketError::Backend(BackendError::other(format!("upsert into {table} returned no row"))))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThemePreference {
    Light,
    Dark,
    #[default]
    System,
}

impl fmt::Display for ThemePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ThemePreference::Light => "light",
            ThemePreference::Dark => "dark",
            ThemePreference::System => "system",
        })
    }
}

impl FromStr for ThemePreference {
    type Err = MarketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "light" => Ok(ThemePreference::Light),
            "dark" => Ok(ThemePreference::Dark),
            "system" => Ok(ThemePreference::System),
            other => Err(MarketError::validation("theme", format!("unknown theme '{other}'"))),
        }
    }
}

/// The `darkMode` flag in the local store: `"true"`, `"false"` or absent.
#[derive(Clone)]
pub struct ThemeStore {
    storage: Arc<dyn Storage>,
}

impl ThemeStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub fn get(&self) -> ThemePreference {
        match self.storage.get(DARK_MODE_KEY) {
            Ok(Some(raw)) => match raw.trim() {
                "true" => ThemePreference::Dark,
                "false" => ThemePreference::Light,
                _ => ThemePreference::System,
            },
            Ok(None) => ThemePreference::System,
            Err(e) => {
                warn!(error = %e, "theme preference unavailable");
                ThemePreference::System
            }
        }
    }

    pub fn set(&self, theme: ThemePreference) -> MarketResult<()> {
        let result = match theme {
            ThemePreference::Dark => self.storage.set(DARK_MODE_KEY, "true"),
            ThemePreference::Light => self.storage.set(DARK_MODE_KEY, "false"),
            ThemePreference::System => self.storage.remove(DARK_MODE_KEY),
        };
        result.map_err(|e| MarketError::storage("save theme", e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_store::MemoryStorage;

    #[test]
    fn theme_round_trip() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let theme = ThemeStore::new(Arc::clone(&storage));
        assert_eq!(theme.get(), ThemePreference::System);

        theme.set(ThemePreference::Dark).unwrap();
        assert_eq!(storage.get(DARK_MODE_KEY).unwrap().as_deref(), Some("true"));
        assert_eq!(theme.get(), ThemePreference::Dark);

        theme.set(ThemePreference::System).unwrap();
        assert_eq!(storage.get(DARK_MODE_KEY).unwrap(), None);
    }

    #[test]
    fn unknown_flag_means_system() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        storage.set(DARK_MODE_KEY, "maybe").unwrap();
        assert_eq!(ThemeStore::new(storage).get(), ThemePreference::System);
    }
}
