//! In-memory engine that replays scripted responses on the io loop.
//!
//! It has no transport. Each submitted query consumes the next queued
//! [`MemResponse`], and every completion is delivered from the io loop
//! thread, same as a real engine would do.
use crate::cancel::{Cancellable, Cancellation};
use crate::engine::{
    CloseCallback, Cluster, Connector, EngineHandles, PendingOperation, PromoteCallback,
    QueryAgent, ResultStream, RowCallback,
};
use crate::io::IoHandle;
use async_io::Timer;
use colbridge_protocol::error::{EngineError, ErrorCode, Result};
use colbridge_protocol::meta::QueryMetadata;
use colbridge_protocol::options::ClusterOptions;
use colbridge_protocol::request::QueryRequest;
use colbridge_protocol::row::Row;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Scripted outcome of one query.
#[derive(Debug, Clone, Default)]
pub struct MemResponse {
    rows: Vec<Row>,
    delay: Option<Duration>,
    error: Option<EngineError>,
    metadata: QueryMetadata,
}

impl MemResponse {
    #[inline]
    pub fn rows(rows: Vec<Row>) -> Self {
        MemResponse {
            rows,
            ..Default::default()
        }
    }

    /// Promotion fails with given error and no stream.
    #[inline]
    pub fn failed(error: EngineError) -> Self {
        MemResponse {
            error: Some(error),
            ..Default::default()
        }
    }

    /// Wait before promotion. The request can be cancelled meanwhile.
    #[inline]
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    #[inline]
    pub fn metadata(mut self, metadata: QueryMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

#[derive(Default)]
struct MemState {
    responses: Mutex<VecDeque<MemResponse>>,
    requests: Mutex<Vec<QueryRequest>>,
    pending: Mutex<Vec<Arc<MemPendingOperation>>>,
    streams: Mutex<Vec<Arc<MemResultStream>>>,
    close_count: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct MemConnector {
    state: Arc<MemState>,
}

impl MemConnector {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn push_response(&self, response: MemResponse) {
        self.state.responses.lock().push_back(response);
    }

    /// All requests submitted so far.
    #[inline]
    pub fn requests(&self) -> Vec<QueryRequest> {
        self.state.requests.lock().clone()
    }

    #[inline]
    pub fn pending_operations(&self) -> Vec<Arc<MemPendingOperation>> {
        self.state.pending.lock().clone()
    }

    #[inline]
    pub fn streams(&self) -> Vec<Arc<MemResultStream>> {
        self.state.streams.lock().clone()
    }

    /// How many times clusters of this connector were closed.
    #[inline]
    pub fn close_count(&self) -> usize {
        self.state.close_count.load(Ordering::Acquire)
    }
}

impl Connector for MemConnector {
    #[inline]
    fn connect(&self, io: IoHandle, opts: &ClusterOptions) -> Result<EngineHandles> {
        opts.validate()?;
        log::debug!("connect in-memory cluster {}", opts.conn_str());
        let cluster = MemCluster {
            io: io.clone(),
            state: Arc::clone(&self.state),
        };
        let agent = MemAgent {
            io,
            state: Arc::clone(&self.state),
        };
        Ok(EngineHandles {
            cluster: Arc::new(cluster),
            agent: Arc::new(agent),
        })
    }
}

struct MemCluster {
    io: IoHandle,
    state: Arc<MemState>,
}

impl Cluster for MemCluster {
    #[inline]
    fn close(&self, on_closed: CloseCallback) {
        self.state.close_count.fetch_add(1, Ordering::AcqRel);
        // outstanding requests fail before the loop goes away.
        for op in self.state.pending.lock().iter() {
            op.cancel.cancel();
        }
        let mut reply = Reply::new(on_closed, |on_closed: CloseCallback| on_closed());
        self.io.spawn(async move {
            log::debug!("in-memory cluster closed");
            if let Some(on_closed) = reply.take() {
                on_closed()
            }
        });
    }
}

struct MemAgent {
    io: IoHandle,
    state: Arc<MemState>,
}

impl QueryAgent for MemAgent {
    fn execute_query(
        &self,
        request: QueryRequest,
        on_promoted: PromoteCallback,
    ) -> std::result::Result<Arc<dyn PendingOperation>, EngineError> {
        let response = self.state.responses.lock().pop_front().ok_or_else(|| {
            EngineError::new(ErrorCode::Generic, "no response for query")
                .with_ctx(serde_json::json!({ "statement": request.statement }))
        })?;
        self.state.requests.lock().push(request);
        let op = Arc::new(MemPendingOperation::default());
        self.state.pending.lock().push(Arc::clone(&op));

        let io = self.io.clone();
        let state = Arc::clone(&self.state);
        let cancel = op.cancel.clone();
        let mut reply = Reply::new(on_promoted, |on_promoted: PromoteCallback| {
            on_promoted(None, Some(closed_error()))
        });
        self.io.spawn(async move {
            let cancelled = match response.delay {
                Some(delay) => matches!(
                    cancel.select_future(Timer::after(delay)).await,
                    Cancellable::Cancelled
                ),
                None => cancel.cancelled(),
            };
            let (stream, err) = if cancelled {
                (None, Some(EngineError::canceled()))
            } else if let Some(err) = response.error {
                (None, Some(err))
            } else {
                let stream = Arc::new(MemResultStream::new(io, response.rows, response.metadata));
                state.streams.lock().push(Arc::clone(&stream));
                let stream: Arc<dyn ResultStream> = stream;
                (Some(stream), None)
            };
            if let Some(on_promoted) = reply.take() {
                on_promoted(stream, err)
            }
        });
        Ok(op)
    }
}

#[derive(Default)]
pub struct MemPendingOperation {
    cancel: Cancellation,
    cancel_count: AtomicUsize,
}

impl MemPendingOperation {
    #[inline]
    pub fn cancel_count(&self) -> usize {
        self.cancel_count.load(Ordering::Acquire)
    }
}

impl PendingOperation for MemPendingOperation {
    #[inline]
    fn cancel(&self) {
        self.cancel_count.fetch_add(1, Ordering::AcqRel);
        self.cancel.cancel();
    }
}

pub struct MemResultStream {
    io: IoHandle,
    inner: Arc<StreamInner>,
}

struct StreamInner {
    rows: Mutex<VecDeque<Row>>,
    cancel: Cancellation,
    cancel_count: AtomicUsize,
    cancel_reported: AtomicBool,
    // metadata is published once the stream reaches its end.
    unpublished: Mutex<Option<QueryMetadata>>,
    metadata: Mutex<Option<QueryMetadata>>,
}

impl MemResultStream {
    #[inline]
    pub fn new(io: IoHandle, rows: Vec<Row>, metadata: QueryMetadata) -> Self {
        MemResultStream {
            io,
            inner: Arc::new(StreamInner {
                rows: Mutex::new(rows.into()),
                cancel: Cancellation::new(),
                cancel_count: AtomicUsize::new(0),
                cancel_reported: AtomicBool::new(false),
                unpublished: Mutex::new(Some(metadata)),
                metadata: Mutex::new(None),
            }),
        }
    }

    #[inline]
    pub fn cancel_count(&self) -> usize {
        self.inner.cancel_count.load(Ordering::Acquire)
    }
}

impl StreamInner {
    #[inline]
    fn next(&self) -> Row {
        if self.cancel.cancelled() {
            // report cancellation once, then behave as exhausted.
            if !self.cancel_reported.swap(true, Ordering::AcqRel) {
                return Row::ErrorOnly(EngineError::canceled());
            }
            return Row::End;
        }
        match self.rows.lock().pop_front() {
            Some(Row::End) | None => {
                if let Some(meta) = self.unpublished.lock().take() {
                    *self.metadata.lock() = Some(meta);
                }
                Row::End
            }
            Some(row) => row,
        }
    }
}

impl ResultStream for MemResultStream {
    #[inline]
    fn next_row(&self, callback: RowCallback) {
        let inner = Arc::clone(&self.inner);
        let mut reply = Reply::new(callback, |callback: RowCallback| {
            callback(Row::ErrorOnly(closed_error()))
        });
        self.io.spawn(async move {
            if let Some(callback) = reply.take() {
                callback(inner.next())
            }
        });
    }

    #[inline]
    fn cancel(&self) {
        self.inner.cancel_count.fetch_add(1, Ordering::AcqRel);
        self.inner.cancel.cancel();
    }

    #[inline]
    fn metadata(&self) -> Option<QueryMetadata> {
        self.inner.metadata.lock().clone()
    }
}

/// Completion of a task on the io loop. If the task is dropped without
/// completing, e.g. rejected by a stopped loop, the fallback reports it.
struct Reply<C> {
    callback: Option<C>,
    fallback: fn(C),
}

impl<C> Reply<C> {
    #[inline]
    fn new(callback: C, fallback: fn(C)) -> Self {
        Reply {
            callback: Some(callback),
            fallback,
        }
    }

    #[inline]
    fn take(&mut self) -> Option<C> {
        self.callback.take()
    }
}

impl<C> Drop for Reply<C> {
    #[inline]
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            (self.fallback)(callback)
        }
    }
}

#[inline]
fn closed_error() -> EngineError {
    EngineError::new(ErrorCode::Canceled, "cluster closed")
}
