use colbridge_protocol::error::{Error, Result};
use colbridge_protocol::row::Row;
use colbridge_runtime::bridge::HostEnv;
use colbridge_runtime::engine::{PendingOperation, ResultStream};
use parking_lot::Mutex;
use std::rc::Rc;
use std::sync::{Arc, Weak};

const NEXT_ROW_LABEL: &str = "cbQueryNextRow";

/// State of a query result. Pending and active are never populated
/// at the same time.
enum QueryState {
    None,
    Pending(Arc<dyn PendingOperation>),
    Active(Arc<dyn ResultStream>),
}

/// Part of the query result shared with in-flight engine callbacks.
/// Callbacks hold it weakly, so they become no-ops once the host
/// drops the result.
pub(crate) struct QueryShared {
    state: Mutex<QueryState>,
}

impl QueryShared {
    /// Promotion: supersede any pending operation or previous stream.
    /// The previous stream reference is released.
    #[inline]
    pub(crate) fn set_result_stream(&self, stream: Arc<dyn ResultStream>) {
        let prev = std::mem::replace(&mut *self.state.lock(), QueryState::Active(stream));
        drop(prev);
    }

    #[inline]
    fn set_pending_operation(&self, op: Arc<dyn PendingOperation>) {
        let mut g = self.state.lock();
        if let QueryState::Active(_) = &*g {
            // already promoted, pending handle is irrelevant.
            log::debug!("ignore pending operation of promoted query result");
            return;
        }
        *g = QueryState::Pending(op);
    }
}

/// Streaming, cancellable result of a query, living on the host thread.
///
/// Single consumer: `next_row` must not be called again before the
/// callback of the previous call fired. This is not checked.
pub struct QueryResult {
    env: Rc<HostEnv>,
    shared: Arc<QueryShared>,
}

impl QueryResult {
    /// Create an empty result waiting for a pending operation or
    /// promotion.
    #[inline]
    pub fn new(env: Rc<HostEnv>) -> Self {
        QueryResult {
            env,
            shared: Arc::new(QueryShared {
                state: Mutex::new(QueryState::None),
            }),
        }
    }

    /// Create a result with an already active stream.
    #[inline]
    pub fn with_stream(env: Rc<HostEnv>, stream: Arc<dyn ResultStream>) -> Self {
        QueryResult {
            env,
            shared: Arc::new(QueryShared {
                state: Mutex::new(QueryState::Active(stream)),
            }),
        }
    }

    /// Request next row. The callback fires exactly once on the host
    /// thread, with:
    ///
    /// - `(None, None)` at end of stream.
    /// - `(Some(row), err)` for a row, where an error may accompany a
    ///   partial result.
    /// - `(None, Some(err))` for an error without row, including a
    ///   result that is not yet promoted.
    pub fn next_row<F>(&self, callback: F)
    where
        F: FnOnce(Option<String>, Option<Error>) + 'static,
    {
        let cookie = self.env.cookie(callback, NEXT_ROW_LABEL);
        let stream = match &*self.shared.state.lock() {
            QueryState::Active(stream) => Arc::clone(stream),
            _ => {
                cookie.invoke(|_, callback| callback(None, Some(Error::ResultNotStarted)));
                return;
            }
        };
        stream.next_row(Box::new(move |row| {
            cookie.invoke(move |_, callback| {
                let (content, err) = marshal_row(row);
                callback(content, err)
            })
        }));
    }

    /// Best-effort cancellation of whichever of pending operation or
    /// active stream is populated. Returns false if neither is.
    #[inline]
    pub fn cancel(&self) -> bool {
        // take a consistent snapshot, then cancel outside the lock.
        let snapshot = match &*self.shared.state.lock() {
            QueryState::None => None,
            QueryState::Pending(op) => Some(QueryState::Pending(Arc::clone(op))),
            QueryState::Active(stream) => Some(QueryState::Active(Arc::clone(stream))),
        };
        match snapshot {
            Some(QueryState::Pending(op)) => {
                op.cancel();
                true
            }
            Some(QueryState::Active(stream)) => {
                stream.cancel();
                true
            }
            _ => false,
        }
    }

    /// Metadata of the concluded stream as a host value, or None if
    /// not available yet. Never blocks.
    #[inline]
    pub fn metadata(&self) -> Result<Option<serde_json::Value>> {
        let stream = match &*self.shared.state.lock() {
            QueryState::Active(stream) => Arc::clone(stream),
            _ => return Ok(None),
        };
        match stream.metadata() {
            Some(meta) => Ok(Some(serde_json::to_value(&meta)?)),
            None => Ok(None),
        }
    }

    #[inline]
    pub(crate) fn set_pending_operation(&self, op: Arc<dyn PendingOperation>) {
        self.shared.set_pending_operation(op)
    }

    #[inline]
    pub(crate) fn set_result_stream(&self, stream: Arc<dyn ResultStream>) {
        self.shared.set_result_stream(stream)
    }

    #[inline]
    pub(crate) fn downgrade(&self) -> Weak<QueryShared> {
        Arc::downgrade(&self.shared)
    }
}

/// Convert a row into host values. Marshalling failure is reported as
/// the error of the callback.
#[inline]
fn marshal_row(row: Row) -> (Option<String>, Option<Error>) {
    match row {
        Row::End => (None, None),
        Row::Content { content, error } => match String::from_utf8(content) {
            Ok(content) => (Some(content), error.map(Error::from)),
            Err(e) => (None, Some(Error::from(e))),
        },
        Row::ErrorOnly(err) => (None, Some(Error::from(err))),
    }
}
