//! Transport seam between feature modules and the hosted database.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::BackendError;
use crate::headers::HeaderSet;
use crate::query::Query;

/// Executes queries with the headers it was built with.
///
/// Headers are fixed at construction; a backend for different headers is a
/// new backend.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Run `query` and return the affected or selected rows.
    async fn execute(&self, query: &Query) -> Result<Vec<Value>, BackendError>;

    /// Call a stored procedure.
    async fn rpc(&self, function: &str, args: Value) -> Result<Value, BackendError>;

    fn headers(&self) -> &HeaderSet;
}

/// Builds backends bound to one endpoint/key pair.
pub trait BackendFactory: Send + Sync {
    fn build(&self, headers: &HeaderSet) -> Result<Arc<dyn Backend>, BackendError>;

    /// The credential sent as `Authorization: Bearer ...` for signed-in users.
    fn base_credential(&self) -> &str;
}
