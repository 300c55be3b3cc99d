//! Credential check, sign-up and sign-out.
//!
//! There is no auth server: the `users` table is queried directly and the
//! password hash compared on this side. A successful check writes the
//! session record and rebuilds the client handle so later requests carry
//! the new identity headers.

use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::client::ClientHandle;
use crate::errors::{MarketError, MarketResult};
use crate::models::{tables, User};
use crate::password::{hash_password, validate_new_password, verify_password};
use crate::query::Query;
use crate::session::{Role, SessionRecord, SessionState};

/// Details collected by the sign-up form.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
}

#[derive(Serialize)]
struct NewUserRow<'a> {
    id: String,
    email: &'a str,
    first_name: &'a str,
    last_name: &'a str,
    role: Role,
    password_hash: String,
    email_verified: bool,
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validate_email(email: &str) -> MarketResult<()> {
    let valid = match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(MarketError::validation("email", "not a valid email address"))
    }
}

#[derive(Clone)]
pub struct AuthService {
    handle: ClientHandle,
}

impl AuthService {
    pub fn new(handle: ClientHandle) -> Self {
        Self { handle }
    }

    /// Verify `email`/`password` against the `users` table and sign in.
    pub async fn login(&self, email: &str, password: &str) -> MarketResult<SessionRecord> {
        let email = normalize_email(email);
        if email.is_empty() || password.is_empty() {
            return Err(MarketError::InvalidCredentials);
        }

        let client = self.handle.client();
        let user: Option<User> = client
            .fetch_optional(Query::table(tables::USERS).eq("email", email.clone()))
            .await?;

        let Some(user) = user else {
            info!(%email, "login rejected: no such account");
            return Err(MarketError::InvalidCredentials);
        };

        let hash = match user.password_hash.as_deref() {
            Some(hash) if !hash.trim().is_empty() => hash,
            _ => return Err(MarketError::AccountIncomplete { email }),
        };

        if !verify_password(hash, password) {
            info!(%email, "login rejected: password mismatch");
            return Err(MarketError::InvalidCredentials);
        }

        self.establish_session(user).await
    }

    /// Create an account and sign it in.
    pub async fn register(&self, account: NewAccount) -> MarketResult<SessionRecord> {
        let email = normalize_email(&account.email);
        validate_email(&email)?;
        validate_new_password(&account.password)?;
        if account.role == Role::Admin {
            return Err(MarketError::forbidden("self-registration as admin"));
        }

        if self.email_taken(&email).await? {
            return Err(MarketError::validation("email", "an account with this email already exists"));
        }

        let row = NewUserRow {
            id: Uuid::new_v4().to_string(),
            email: &email,
            first_name: account.first_name.trim(),
            last_name: account.last_name.trim(),
            role: account.role,
            password_hash: hash_password(&account.password)?,
            email_verified: false,
        };
        let user: User = self.handle.client().insert_one(tables::USERS, &row).await?;
        info!(user_id = %user.id, role = %user.role, "account registered");

        self.establish_session(user).await
    }

    async fn email_taken(&self, email: &str) -> MarketResult<bool> {
        let rows = self
            .handle
            .client()
            .execute(Query::table(tables::USERS).select("id").eq("email", email).limit(1))
            .await?;
        Ok(!rows.is_empty())
    }

    async fn establish_session(&self, user: User) -> MarketResult<SessionRecord> {
        if !user.email_verified {
            // No verification mail exists, so signing in counts as verifying.
            let marked = self
                .handle
                .client()
                .execute(
                    Query::table(tables::USERS)
                        .eq("id", user.id.clone())
                        .update(json!({ "email_verified": true })),
                )
                .await;
            if let Err(e) = marked {
                warn!(user_id = %user.id, error = %e, "failed to mark account verified");
            }
        }

        let record = SessionRecord::new(user.id, user.email, user.first_name, user.last_name, user.role);

        if let Err(e) = self.handle.sessions().write_session(&record) {
            warn!(user_id = %record.id, error = %e, "session not persisted; continuing in memory");
        }

        self.handle.rebuild_client_headers()?;
        info!(user_id = %record.id, route = record.role.landing_route(), "signed in");
        Ok(record)
    }

    /// Sign out: forget the stored session and drop identity headers.
    pub fn logout(&self) -> MarketResult<()> {
        self.handle.sessions().clear_session();
        self.handle.rebuild_client_headers()?;
        info!("signed out");
        Ok(())
    }

    pub fn current_session(&self) -> Option<SessionRecord> {
        self.handle.sessions().read_session()
    }

    pub fn state(&self) -> SessionState {
        self.handle.sessions().session_state()
    }

    pub fn require_session(&self) -> MarketResult<SessionRecord> {
        self.handle.require_session()
    }
}
