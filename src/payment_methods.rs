//! Saved cards for the signed-in customer.
//!
//! State changes go through [`reduce`], a pure function over
//! [`PaymentMethodsState`]. The controller performs the backend calls and
//! dispatches actions around them.
//!
//! Automatic loading is bounded: every automatic fetch counts an attempt, and
//! once `max_fetch_attempts` is reached `auto_fetch` stops issuing requests
//! until the user asks for a manual refresh or creates the missing table.

use std::sync::{Mutex, MutexGuard};

use chrono::{Datelike, NaiveDate, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::client::ClientHandle;
use crate::errors::{BackendError, MarketError, MarketResult};
use crate::load_state::LoadError;
use crate::models::{tables, PaymentMethod};
use crate::query::{Direction, Query};

pub const DEFAULT_MAX_FETCH_ATTEMPTS: u32 = 3;
pub const CREATE_SCHEMA_FUNCTION: &str = "create_payment_methods_table";

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentMethodsState {
    pub methods: Vec<PaymentMethod>,
    pub initialized: bool,
    pub loading: bool,
    pub error: Option<LoadError>,
    pub fetch_attempts: u32,
}

impl Default for PaymentMethodsState {
    fn default() -> Self {
        Self {
            methods: Vec::new(),
            initialized: false,
            loading: false,
            error: None,
            fetch_attempts: 0,
        }
    }
}

impl PaymentMethodsState {
    pub fn default_method(&self) -> Option<&PaymentMethod> {
        self.methods.iter().find(|m| m.is_default)
    }

    pub fn schema_missing(&self) -> bool {
        matches!(self.error, Some(LoadError::SchemaNotReady { .. }))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PaymentAction {
    /// An automatic fetch is starting; counts against the attempt budget.
    FetchStarted,
    /// A manual fetch is starting; does not count.
    RefreshStarted,
    FetchSucceeded(Vec<PaymentMethod>),
    FetchFailed(LoadError),
    Added(PaymentMethod),
    Removed(i64),
    DefaultChanged(i64),
    ResetAttempts,
    Reset,
}

pub fn reduce(mut state: PaymentMethodsState, action: PaymentAction) -> PaymentMethodsState {
    match action {
        PaymentAction::FetchStarted => {
            state.loading = true;
            state.fetch_attempts = state.fetch_attempts.saturating_add(1);
        }
        PaymentAction::RefreshStarted => {
            state.loading = true;
        }
        PaymentAction::FetchSucceeded(methods) => {
            state.methods = methods;
            state.loading = false;
            state.initialized = true;
            state.error = None;
            state.fetch_attempts = 0;
        }
        PaymentAction::FetchFailed(error) => {
            state.loading = false;
            state.initialized = true;
            state.error = Some(error);
        }
        PaymentAction::Added(method) => {
            if method.is_default {
                for existing in &mut state.methods {
                    existing.is_default = false;
                }
            }
            state.methods.push(method);
            state.error = None;
        }
        PaymentAction::Removed(id) => {
            state.methods.retain(|m| m.id != id);
        }
        PaymentAction::DefaultChanged(id) => {
            for method in &mut state.methods {
                method.is_default = method.id == id;
            }
        }
        PaymentAction::ResetAttempts => {
            state.fetch_attempts = 0;
        }
        PaymentAction::Reset => return PaymentMethodsState::default(),
    }
    state
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotAuthenticated,
    AlreadyLoaded,
    AttemptsExhausted,
    InFlight,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Loaded(usize),
    Failed(LoadError),
    Skipped(SkipReason),
}

/// A card as entered in the add-card form.
#[derive(Debug, Clone)]
pub struct NewPaymentMethod {
    pub card_type: String,
    pub last_four: String,
    pub expiry_month: u8,
    pub expiry_year: u16,
    pub cardholder_name: String,
}

impl NewPaymentMethod {
    pub fn validate(&self, today: NaiveDate) -> MarketResult<()> {
        if self.last_four.len() != 4 || !self.last_four.chars().all(|c| c.is_ascii_digit()) {
            return Err(MarketError::validation("last_four", "must be exactly four digits"));
        }
        if !(1..=12).contains(&self.expiry_month) {
            return Err(MarketError::validation("expiry_month", "must be between 1 and 12"));
        }
        let year = i32::from(self.expiry_year);
        let month = u32::from(self.expiry_month);
        if (year, month) < (today.year(), today.month()) {
            return Err(MarketError::validation("expiry", "card has expired"));
        }
        if self.card_type.trim().is_empty() {
            return Err(MarketError::validation("card_type", "cannot be empty"));
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct NewPaymentRow<'a> {
    user_id: &'a str,
    card_type: &'a str,
    last_four: &'a str,
    expiry_month: u8,
    expiry_year: u16,
    cardholder_name: &'a str,
    is_default: bool,
}

pub struct PaymentMethodsController {
    handle: ClientHandle,
    max_fetch_attempts: u32,
    state: Mutex<PaymentMethodsState>,
}

impl PaymentMethodsController {
    pub fn new(handle: ClientHandle, max_fetch_attempts: u32) -> Self {
        Self {
            handle,
            max_fetch_attempts,
            state: Mutex::new(PaymentMethodsState::default()),
        }
    }

    pub fn max_fetch_attempts(&self) -> u32 {
        self.max_fetch_attempts
    }

    fn lock(&self) -> MutexGuard<'_, PaymentMethodsState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> PaymentMethodsState {
        self.lock().clone()
    }

    fn dispatch(&self, action: PaymentAction) -> PaymentMethodsState {
        let mut guard = self.lock();
        let next = reduce(std::mem::take(&mut *guard), action);
        *guard = next.clone();
        next
    }

    /// Check the guards and count the attempt under one lock, so concurrent
    /// callers cannot both spend the last attempt.
    fn begin_auto_fetch(&self, signed_in: bool) -> Result<u32, SkipReason> {
        let mut guard = self.lock();
        if guard.fetch_attempts >= self.max_fetch_attempts {
            debug!(attempts = guard.fetch_attempts, "payment methods auto-fetch exhausted");
            return Err(SkipReason::AttemptsExhausted);
        }
        if guard.loading {
            return Err(SkipReason::InFlight);
        }
        if guard.initialized && guard.error.is_none() {
            return Err(SkipReason::AlreadyLoaded);
        }
        if !signed_in {
            return Err(SkipReason::NotAuthenticated);
        }
        *guard = reduce(std::mem::take(&mut *guard), PaymentAction::FetchStarted);
        Ok(guard.fetch_attempts)
    }

    async fn load(&self) -> MarketResult<Vec<PaymentMethod>> {
        let session = self.handle.require_session()?;
        self.handle
            .client()
            .fetch(
                Query::table(tables::PAYMENT_METHODS)
                    .eq("user_id", session.id)
                    .order("is_default", Direction::Desc)
                    .order("created_at", Direction::Desc),
            )
            .await
    }

    /// Fetch on view mount. Issues no request once the attempt budget is spent.
    pub async fn auto_fetch(&self) -> FetchOutcome {
        let signed_in = self.handle.sessions().read_session().is_some();
        let attempt = match self.begin_auto_fetch(signed_in) {
            Ok(attempt) => attempt,
            Err(reason) => return FetchOutcome::Skipped(reason),
        };
        match self.load().await {
            Ok(methods) => {
                let count = methods.len();
                self.dispatch(PaymentAction::FetchSucceeded(methods));
                FetchOutcome::Loaded(count)
            }
            Err(e) => {
                warn!(attempt, max = self.max_fetch_attempts, error = %e, "payment methods fetch failed");
                let error = LoadError::from(&e);
                self.dispatch(PaymentAction::FetchFailed(error.clone()));
                FetchOutcome::Failed(error)
            }
        }
    }

    /// User-initiated reload. Resets the attempt budget.
    pub async fn refresh(&self) -> MarketResult<Vec<PaymentMethod>> {
        self.dispatch(PaymentAction::ResetAttempts);
        self.dispatch(PaymentAction::RefreshStarted);
        match self.load().await {
            Ok(methods) => {
                self.dispatch(PaymentAction::FetchSucceeded(methods.clone()));
                Ok(methods)
            }
            Err(e) => {
                self.dispatch(PaymentAction::FetchFailed(LoadError::from(&e)));
                Err(e)
            }
        }
    }

    /// Ask the backend to create the `payment_methods` table, then reload.
    pub async fn create_schema(&self) -> MarketResult<Vec<PaymentMethod>> {
        self.handle
            .client()
            .rpc(CREATE_SCHEMA_FUNCTION, json!({}))
            .await?;
        info!("payment_methods table created");
        self.refresh().await
    }

    pub async fn add_method(&self, card: NewPaymentMethod) -> MarketResult<PaymentMethod> {
        let session = self.handle.require_session()?;
        card.validate(Utc::now().date_naive())?;

        let client = self.handle.client();
        let existing = client
            .execute(
                Query::table(tables::PAYMENT_METHODS)
                    .select("id")
                    .eq("user_id", session.id.clone())
                    .limit(1),
            )
            .await?;

        let row = NewPaymentRow {
            user_id: &session.id,
            card_type: card.card_type.trim(),
            last_four: &card.last_four,
            expiry_month: card.expiry_month,
            expiry_year: card.expiry_year,
            cardholder_name: card.cardholder_name.trim(),
            is_default: existing.is_empty(),
        };
        let method: PaymentMethod = client.insert_one(tables::PAYMENT_METHODS, &row).await?;
        info!(method_id = method.id, is_default = method.is_default, "payment method added");

        self.dispatch(PaymentAction::Added(method.clone()));
        Ok(method)
    }

    /// Delete a card. Removing the default promotes the newest remaining
    /// card, as stored in the backend.
    pub async fn remove_method(&self, method_id: i64) -> MarketResult<()> {
        let session = self.handle.require_session()?;
        let client = self.handle.client();
        let removed: Vec<PaymentMethod> = client
            .fetch(
                Query::table(tables::PAYMENT_METHODS)
                    .eq("id", method_id)
                    .eq("user_id", session.id.clone())
                    .delete(),
            )
            .await?;

        let Some(removed) = removed.into_iter().next() else {
            return Err(MarketError::Backend(BackendError::not_found(format!(
                "payment method {method_id}"
            ))));
        };
        self.dispatch(PaymentAction::Removed(method_id));

        if removed.is_default {
            let next: Option<PaymentMethod> = client
                .fetch_optional(
                    Query::table(tables::PAYMENT_METHODS)
                        .eq("user_id", session.id)
                        .order("created_at", Direction::Desc)
                        .order("id", Direction::Desc),
                )
                .await?;
            if let Some(next) = next {
                self.set_default(next.id).await?;
            }
        }
        Ok(())
    }

    pub async fn set_default(&self, method_id: i64) -> MarketResult<()> {
        let session = self.handle.require_session()?;
        let client = self.handle.client();

        client
            .execute(
                Query::table(tables::PAYMENT_METHODS)
                    .eq("user_id", session.id.clone())
                    .neq("id", method_id)
                    .update(json!({ "is_default": false })),
            )
            .await?;
        let updated = client
            .execute(
                Query::table(tables::PAYMENT_METHODS)
                    .eq("user_id", session.id)
                    .eq("id", method_id)
                    .update(json!({ "is_default": true })),
            )
            .await?;
        if updated.is_empty() {
            return Err(MarketError::Backend(BackendError::not_found(format!(
                "payment method {method_id}"
            ))));
        }

        self.dispatch(PaymentAction::DefaultChanged(method_id));
        Ok(())
    }

    /// Forget everything, e.g. after sign-out.
    pub fn reset(&self) {
        self.dispatch(PaymentAction::Reset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(id: i64, is_default: bool) -> PaymentMethod {
        PaymentMethod {
            id,
            user_id: "u1".into(),
            card_type: "visa".into(),
            last_four: "4242".into(),
            expiry_month: 12,
            expiry_year: 2099,
            cardholder_name: "Ada".into(),
            is_default,
            created_at: None,
        }
    }

    #[test]
    fn failed_fetch_still_initializes() {
        let state = reduce(PaymentMethodsState::default(), PaymentAction::FetchStarted);
        assert!(state.loading);
        assert_eq!(state.fetch_attempts, 1);

        let state = reduce(
            state,
            PaymentAction::FetchFailed(LoadError::SchemaNotReady {
                table: "payment_methods".into(),
            }),
        );
        assert!(state.initialized);
        assert!(!state.loading);
        assert!(state.schema_missing());
        assert_eq!(state.fetch_attempts, 1);
    }

    #[test]
    fn adding_a_default_clears_the_old_one() {
        let state = reduce(
            PaymentMethodsState::default(),
            PaymentAction::FetchSucceeded(vec![card(1, true)]),
        );
        let state = reduce(state, PaymentAction::Added(card(2, true)));
        assert_eq!(state.default_method().map(|m| m.id), Some(2));
        assert_eq!(state.methods.iter().filter(|m| m.is_default).count(), 1);
    }

    #[test]
    fn refresh_does_not_count_attempts() {
        let state = PaymentMethodsState {
            fetch_attempts: 3,
            ..Default::default()
        };
        let state = reduce(state, PaymentAction::ResetAttempts);
        let state = reduce(state, PaymentAction::RefreshStarted);
        assert_eq!(state.fetch_attempts, 0);
    }

    #[test]
    fn card_validation() {
        let today = NaiveDate::from_ymd_opt(2026, 5, 1).unwrap();
        let mut new = NewPaymentMethod {
            card_type: "visa".into(),
            last_four: "4242".into(),
            expiry_month: 5,
            expiry_year: 2026,
            cardholder_name: "Ada".into(),
        };
        assert!(new.validate(today).is_ok());

        new.expiry_month = 4;
        assert!(new.validate(today).is_err());

        new.expiry_month = 13;
        new.expiry_year = 2030;
        assert!(new.validate(today).is_err());

        new.expiry_month = 1;
        new.last_four = "42a2".into();
        assert!(new.validate(today).is_err());
    }
}
