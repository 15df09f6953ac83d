//! Interface of the network engine, which implements transport, protocol,
//! retries and timeouts. Every completion declared here is invoked on the
//! io loop thread.
use crate::io::IoHandle;
use colbridge_protocol::error::{EngineError, Result};
use colbridge_protocol::meta::QueryMetadata;
use colbridge_protocol::options::ClusterOptions;
use colbridge_protocol::request::QueryRequest;
use colbridge_protocol::row::Row;
use std::sync::Arc;

pub type CloseCallback = Box<dyn FnOnce() + Send>;

pub type RowCallback = Box<dyn FnOnce(Row) + Send>;

/// Promotion callback of a submitted query, called once per request.
pub type PromoteCallback = Box<dyn FnOnce(Option<Arc<dyn ResultStream>>, Option<EngineError>) + Send>;

/// Creates engine handles bound to an io loop.
pub trait Connector: Send + Sync {
    fn connect(&self, io: IoHandle, opts: &ClusterOptions) -> Result<EngineHandles>;
}

pub struct EngineHandles {
    pub cluster: Arc<dyn Cluster>,
    pub agent: Arc<dyn QueryAgent>,
}

pub trait Cluster: Send + Sync {
    /// Close all connections, then call `on_closed`.
    fn close(&self, on_closed: CloseCallback);
}

pub trait QueryAgent: Send + Sync {
    /// Submit a query. The returned operation can cancel the request
    /// until it is promoted to a result stream.
    fn execute_query(
        &self,
        request: QueryRequest,
        on_promoted: PromoteCallback,
    ) -> std::result::Result<Arc<dyn PendingOperation>, EngineError>;
}

pub trait PendingOperation: Send + Sync {
    fn cancel(&self);
}

/// Active, row-producing stream of a query.
pub trait ResultStream: Send + Sync {
    /// Request the next row. Callers must not issue another request
    /// before the callback of the previous one fires.
    fn next_row(&self, callback: RowCallback);

    /// Rows produced after cancellation are suppressed.
    fn cancel(&self);

    /// Available once the stream concluded.
    fn metadata(&self) -> Option<QueryMetadata>;
}
