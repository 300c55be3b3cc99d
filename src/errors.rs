//! Error types for the marketplace client
//!
//! `BackendError` is what the transport hands back, classified once at the
//! boundary. `MarketError` is what feature modules return to their callers.

use thiserror::Error;

/// Postgres error code for "relation does not exist".
pub const UNDEFINED_TABLE_CODE: &str = "42P01";
/// PostgREST code for a table missing from its schema cache.
pub const SCHEMA_CACHE_MISS_CODE: &str = "PGRST205";
/// PostgREST code for a single-row request that matched nothing.
pub const NO_ROWS_CODE: &str = "PGRST116";

/// Coarse classification of a backend failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    SchemaMissing,
    NotFound,
    Other,
}

/// A failure reported by the hosted database or the transport in front of it.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub code: Option<String>,
    pub message: String,
    pub table: Option<String>,
}

impl BackendError {
    /// Classify a raw code/message pair coming off the wire.
    pub fn classify(code: Option<&str>, message: impl Into<String>) -> Self {
        let message = message.into();
        let lowered = message.to_lowercase();

        let kind = match code {
            Some(UNDEFINED_TABLE_CODE) | Some(SCHEMA_CACHE_MISS_CODE) => {
                BackendErrorKind::SchemaMissing
            }
            Some(NO_ROWS_CODE) => BackendErrorKind::NotFound,
            _ if lowered.contains("relation") && lowered.contains("does not exist") => {
                BackendErrorKind::SchemaMissing
            }
            _ => BackendErrorKind::Other,
        };

        Self {
            kind,
            code: code.map(str::to_string),
            message,
            table: None,
        }
    }

    /// The error the hosted service returns when `table` has not been created.
    pub fn schema_missing(table: &str) -> Self {
        Self {
            kind: BackendErrorKind::SchemaMissing,
            code: Some(UNDEFINED_TABLE_CODE.to_string()),
            message: format!("relation \"public.{table}\" does not exist"),
            table: Some(table.to_string()),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            kind: BackendErrorKind::NotFound,
            code: Some(NO_ROWS_CODE.to_string()),
            message: message.into(),
            table: None,
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self {
            kind: BackendErrorKind::Other,
            code: None,
            message: message.into(),
            table: None,
        }
    }

    /// Attach the table the failing query targeted.
    pub fn on_table(mut self, table: &str) -> Self {
        if self.table.is_none() {
            self.table = Some(table.to_string());
        }
        self
    }

    pub fn is_schema_missing(&self) -> bool {
        self.kind == BackendErrorKind::SchemaMissing
    }
}

/// Main error type for marketplace operations
#[derive(Error, Debug)]
pub enum MarketError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Account {email} has no password set")]
    AccountIncomplete { email: String },

    #[error("Backend table '{table}' has not been created yet")]
    SchemaNotReady { table: String },

    #[error("Local storage unavailable during {operation}: {message}")]
    StorageUnavailable { operation: String, message: String },

    #[error("Not signed in")]
    NotAuthenticated,

    #[error("Not permitted: {action}")]
    Forbidden { action: String },

    #[error("Backend request failed: {0}")]
    Backend(BackendError),

    #[error("Session could not be saved: {message}")]
    SessionPersistence { message: String },

    #[error("Order {order_id} was created but is incomplete: {message}")]
    PartialOrder { order_id: i64, message: String },

    #[error("Order cannot move from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Serialization failed: {context}")]
    Serialization {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type MarketResult<T> = Result<T, MarketError>;

impl MarketError {
    /// Create a storage error
    pub fn storage(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StorageUnavailable {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a forbidden error
    pub fn forbidden(action: impl Into<String>) -> Self {
        Self::Forbidden {
            action: action.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            context: context.into(),
            source,
        }
    }

    pub fn is_schema_not_ready(&self) -> bool {
        matches!(self, Self::SchemaNotReady { .. })
    }

    /// Text suitable for showing to the person at the keyboard.
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidCredentials => "Invalid email or password".to_string(),
            Self::AccountIncomplete { .. } => {
                "This account has no password yet. Please reset your password.".to_string()
            }
            Self::SchemaNotReady { table } => format!(
                "The {table} table has not been set up yet. Create it and try again."
            ),
            Self::NotAuthenticated => "Please sign in to continue".to_string(),
            Self::Backend(err) => err.message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<BackendError> for MarketError {
    fn from(err: BackendError) -> Self {
        match err.kind {
            BackendErrorKind::SchemaMissing => MarketError::SchemaNotReady {
                table: err.table.unwrap_or_else(|| "unknown".to_string()),
            },
            _ => MarketError::Backend(err),
        }
    }
}

impl From<serde_json::Error> for MarketError {
    fn from(err: serde_json::Error) -> Self {
        MarketError::serialization("json_operation", err)
    }
}

impl From<figment::Error> for MarketError {
    fn from(err: figment::Error) -> Self {
        MarketError::config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_undefined_table_by_code() {
        let err = BackendError::classify(Some("42P01"), "whatever");
        assert_eq!(err.kind, BackendErrorKind::SchemaMissing);
    }

    #[test]
    fn classifies_undefined_table_by_message() {
        let err = BackendError::classify(None, "relation \"public.payment_methods\" does not exist");
        assert!(err.is_schema_missing());

        let err = BackendError::classify(Some("23505"), "duplicate key value");
        assert_eq!(err.kind, BackendErrorKind::Other);
    }

    #[test]
    fn schema_missing_converts_to_schema_not_ready() {
        let err: MarketError = BackendError::schema_missing("orders").into();
        match err {
            MarketError::SchemaNotReady { table } => assert_eq!(table, "orders"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn other_backend_errors_pass_through() {
        let err: MarketError = BackendError::other("boom").into();
        assert!(matches!(err, MarketError::Backend(_)));
        assert_eq!(err.user_message(), "boom");
    }
}
