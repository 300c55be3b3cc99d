//! Database client and the shared handle feature modules query through.
//!
//! A `DatabaseClient` is immutable: it carries one backend built for one
//! header set. The `ClientHandle` owns the current client and swaps in a
//! fresh one whenever the session changes. Every clone of the handle sees
//! the swap; requests already in flight finish on the client they started
//! with.

use std::sync::{Arc, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::backend::{Backend, BackendFactory};
use crate::errors::{BackendError, MarketError, MarketResult};
use crate::headers::{derive_headers, HeaderSet};
use crate::query::Query;
use crate::session::{SessionRecord, SessionStore};

pub struct DatabaseClient {
    backend: Arc<dyn Backend>,
}

impl DatabaseClient {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub fn headers(&self) -> &HeaderSet {
        self.backend.headers()
    }

    /// Run a query and return raw rows.
    pub async fn execute(&self, query: Query) -> MarketResult<Vec<Value>> {
        debug!(table = %query.table, filters = query.filters.len(), "executing query");
        let table = query.table.clone();
        self.backend
            .execute(&query)
            .await
            .map_err(|e| MarketError::from(e.on_table(&table)))
    }

    /// Run a query and decode every row into `T`.
    pub async fn fetch<T: DeserializeOwned>(&self, query: Query) -> MarketResult<Vec<T>> {
        let table = query.table.clone();
        let rows = self.execute(query).await?;
        rows.into_iter()
            .map(|row| {
                serde_json::from_value(row)
                    .map_err(|e| MarketError::serialization(format!("{table} row"), e))
            })
            .collect()
    }

    /// First row of the result, if any.
    pub async fn fetch_optional<T: DeserializeOwned>(&self, query: Query) -> MarketResult<Option<T>> {
        Ok(self.fetch(query.limit(1)).await?.into_iter().next())
    }

    /// Exactly one row; a missing row is a `NotFound` backend error.
    pub async fn fetch_one<T: DeserializeOwned>(&self, query: Query) -> MarketResult<T> {
        let table = query.table.clone();
        self.fetch_optional(query)
            .await?
            .ok_or_else(|| MarketError::Backend(BackendError::not_found(format!("no matching row in {table}"))))
    }

    /// Insert one serializable row and return what the backend stored.
    pub async fn insert_one<T: Serialize, R: DeserializeOwned>(&self, table: &str, row: &T) -> MarketResult<R> {
        let row = serde_json::to_value(row).map_err(|e| MarketError::serialization(format!("{table} insert"), e))?;
        let stored = self.fetch::<R>(Query::table(table).insert(vec![row])).await?;
        stored
            .into_iter()
            .next()
            .ok_or_else(|| MarketError::Backend(BackendError::other(format!("insert into {table} returned no row"))))
    }

    /// Call a database function. Errors name the table a
    /// `create_<table>_table` function targets, else the function itself.
    pub async fn rpc(&self, function: &str, args: Value) -> MarketResult<Value> {
        debug!(%function, "calling rpc");
        let target = created_table(function).unwrap_or(function);
        self.backend
            .rpc(function, args)
            .await
            .map_err(|e| MarketError::from(e.on_table(target)))
    }
}

/// `payment_methods` for `create_payment_methods_table`.
pub fn created_table(function: &str) -> Option<&str> {
    function
        .strip_prefix("create_")
        .and_then(|rest| rest.strip_suffix("_table"))
        .filter(|table| !table.is_empty())
}

/// The shared, rebuildable reference to the current `DatabaseClient`.
#[derive(Clone)]
pub struct ClientHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    factory: Arc<dyn BackendFactory>,
    sessions: SessionStore,
    current: RwLock<Arc<DatabaseClient>>,
}

impl ClientHandle {
    /// Build the initial client from whatever session is already stored.
    pub fn new(factory: Arc<dyn BackendFactory>, sessions: SessionStore) -> MarketResult<Self> {
        let headers = derive_headers(sessions.read_session().as_ref(), factory.base_credential());
        let backend = factory.build(&headers).map_err(MarketError::from)?;

        Ok(Self {
            inner: Arc::new(HandleInner {
                factory,
                sessions,
                current: RwLock::new(Arc::new(DatabaseClient::new(backend))),
            }),
        })
    }

    /// The client to use for the next request.
    pub fn client(&self) -> Arc<DatabaseClient> {
        let guard = self
            .inner
            .current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&*guard)
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.inner.sessions
    }

    pub fn headers(&self) -> HeaderSet {
        self.client().headers().clone()
    }

    /// The stored session, or `NotAuthenticated`.
    pub fn require_session(&self) -> MarketResult<SessionRecord> {
        self.inner
            .sessions
            .read_session()
            .ok_or(MarketError::NotAuthenticated)
    }

    /// Re-derive headers from the stored session and replace the client.
    pub fn rebuild_client_headers(&self) -> MarketResult<HeaderSet> {
        let session = self.inner.sessions.read_session();
        let headers = derive_headers(session.as_ref(), self.inner.factory.base_credential());
        let backend = self.inner.factory.build(&headers).map_err(MarketError::from)?;
        let client = Arc::new(DatabaseClient::new(backend));

        let mut current = self
            .inner
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *current = client;

        info!(identified = headers.has_identity(), "database client rebuilt");
        Ok(headers)
    }
}
