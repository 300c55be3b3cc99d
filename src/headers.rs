//! Request headers derived from the current session.
//!
//! Known weak point: the `Authorization` value is the same base credential
//! for every user. Identity travels only in `x-user-id` / `x-user-email`,
//! which backend row rules trust as-is. The session token is never sent.
//! Changing this needs a decision on the backend policies, so it is kept.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};

use crate::errors::MarketError;
use crate::session::SessionRecord;

pub const IDENTITY_ID_HEADER: &str = "x-user-id";
pub const IDENTITY_EMAIL_HEADER: &str = "x-user-email";

/// Headers attached to every request a client sends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSet {
    pub authorization: Option<String>,
    pub identity_id: Option<String>,
    pub identity_email: Option<String>,
}

impl HeaderSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.authorization.is_none() && self.identity_id.is_none() && self.identity_email.is_none()
    }

    pub fn has_identity(&self) -> bool {
        self.identity_id.is_some()
    }

    /// Header name/value pairs in a stable order.
    pub fn pairs(&self) -> Vec<(&'static str, &str)> {
        let mut pairs = Vec::with_capacity(3);
        if let Some(v) = &self.authorization {
            pairs.push(("authorization", v.as_str()));
        }
        if let Some(v) = &self.identity_id {
            pairs.push((IDENTITY_ID_HEADER, v.as_str()));
        }
        if let Some(v) = &self.identity_email {
            pairs.push((IDENTITY_EMAIL_HEADER, v.as_str()));
        }
        pairs
    }

    pub fn to_header_map(&self) -> Result<HeaderMap, MarketError> {
        let mut map = HeaderMap::new();
        for (name, value) in self.pairs() {
            let value = HeaderValue::from_str(value)
                .map_err(|e| MarketError::validation(name, e.to_string()))?;
            let name = if name == "authorization" {
                AUTHORIZATION
            } else {
                HeaderName::from_static(name)
            };
            map.insert(name, value);
        }
        Ok(map)
    }
}

/// Compute the header set for `session`.
///
/// A session without a token still identifies itself by id; its email falls
/// back to an empty string.
pub fn derive_headers(session: Option<&SessionRecord>, base_credential: &str) -> HeaderSet {
    let Some(session) = session else {
        return HeaderSet::empty();
    };

    if session.token.is_none() && session.id.is_empty() {
        return HeaderSet::empty();
    }

    HeaderSet {
        authorization: Some(format!("Bearer {base_credential}")),
        identity_id: Some(session.id.clone()),
        identity_email: Some(session.email.clone()),
    }
}
