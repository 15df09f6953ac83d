use crate::connection::Connection;
use crate::query_result::QueryResult;
use colbridge_protocol::error::{Error, Result};
use colbridge_protocol::meta::QueryMetadata;
use colbridge_protocol::request::QueryRequest;
use std::cell::Cell;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamingState {
    NotStarted,
    Started,
    Cancelled,
    Complete,
}

/// Drives one query on behalf of the host and tracks how far its
/// rows were consumed.
pub struct QueryExecutor {
    result: Option<QueryResult>,
    state: Rc<Cell<StreamingState>>,
}

impl QueryExecutor {
    #[inline]
    pub fn new() -> Self {
        QueryExecutor {
            result: None,
            state: Rc::new(Cell::new(StreamingState::NotStarted)),
        }
    }

    #[inline]
    pub fn state(&self) -> StreamingState {
        self.state.get()
    }

    /// Submit the query on given connection. `callback` receives the
    /// promotion outcome. Client side cancellation is not reported as
    /// an error.
    pub fn query<F>(&mut self, conn: &Connection, request: QueryRequest, callback: F) -> Result<()>
    where
        F: FnOnce(Option<Error>) + 'static,
    {
        if self.result.is_some() {
            return Err(Error::InvalidArgument(
                "query already submitted by this executor".to_string(),
            ));
        }
        let result = conn.query(request, move |err| {
            let err = err.filter(|e| !e.engine().map_or(false, |e| e.is_canceled()));
            callback(err)
        })?;
        self.result = Some(result);
        self.state.set(StreamingState::Started);
        Ok(())
    }

    /// Pull next row. End of stream completes the executor.
    #[inline]
    pub fn next_row<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce(Option<String>, Option<Error>) + 'static,
    {
        let result = self.result.as_ref().ok_or(Error::ResultNotStarted)?;
        let state = Rc::clone(&self.state);
        result.next_row(move |content, err| {
            if content.is_none() && err.is_none() {
                state.set(StreamingState::Complete);
            }
            callback(content, err)
        });
        Ok(())
    }

    /// Abort the query unless it is already cancelled or complete.
    /// Returns whether the query was cancelled by this call.
    #[inline]
    pub fn abort(&self) -> bool {
        let result = match &self.result {
            Some(result) => result,
            None => return false,
        };
        match self.state.get() {
            StreamingState::Cancelled | StreamingState::Complete => false,
            _ => {
                if result.cancel() {
                    self.state.set(StreamingState::Cancelled);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Metadata of the query, only available once all rows were iterated.
    #[inline]
    pub fn metadata(&self) -> Result<QueryMetadata> {
        let value = match &self.result {
            Some(result) => result.metadata()?,
            None => None,
        };
        match value {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Err(Error::InvalidArgument(
                "metadata is only available once all rows have been iterated".to_string(),
            )),
        }
    }
}

impl Default for QueryExecutor {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}
