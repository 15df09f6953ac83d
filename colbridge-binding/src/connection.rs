use crate::instance::{Instance, InstanceState};
use crate::query_result::QueryResult;
use colbridge_protocol::error::{Error, Result};
use colbridge_protocol::options::ClusterOptions;
use colbridge_protocol::request::QueryRequest;
use colbridge_runtime::bridge::HostEnv;
use colbridge_runtime::engine::Connector;
use flume::Receiver;
use std::rc::Rc;
use std::sync::Arc;

const QUERY_LABEL: &str = "cbQuery";

/// Host-side connection to a cluster.
pub struct Connection {
    env: Rc<HostEnv>,
    instance: Arc<Instance>,
}

impl Connection {
    /// Connect with given options and start the io loop.
    #[inline]
    pub fn create(
        env: Rc<HostEnv>,
        connector: &dyn Connector,
        opts: &ClusterOptions,
    ) -> Result<Self> {
        let instance = Instance::new(connector, opts)?;
        Ok(Connection { env, instance })
    }

    #[inline]
    pub fn state(&self) -> InstanceState {
        self.instance.state()
    }

    /// Submit a query. The returned result is empty until the engine
    /// promotes it, which is reported through `callback` on the host
    /// thread. The callback is dropped without invocation if the
    /// result is dropped before promotion.
    pub fn query<F>(&self, request: QueryRequest, callback: F) -> Result<QueryResult>
    where
        F: FnOnce(Option<Error>) + 'static,
    {
        let agent = self.instance.agent()?;
        let result = QueryResult::new(Rc::clone(&self.env));
        let shared = result.downgrade();
        let cookie = self.env.cookie(callback, QUERY_LABEL);
        log::debug!("submit query: {}", request.statement);
        let op = agent.execute_query(
            request,
            Box::new(move |stream, err| {
                let shared = match shared.upgrade() {
                    Some(shared) => shared,
                    None => {
                        log::debug!("query result dropped before promotion");
                        return;
                    }
                };
                if let Some(stream) = stream {
                    shared.set_result_stream(stream);
                }
                cookie.invoke(move |_, callback| callback(err.map(Error::from)))
            }),
        )?;
        result.set_pending_operation(op);
        Ok(result)
    }

    /// Start asynchronous shutdown of the underlying instance.
    #[inline]
    pub fn request_async_destroy(&self) -> Result<()> {
        self.instance.request_async_destroy()
    }

    /// Receiver disconnected once the instance is destroyed.
    #[inline]
    pub fn destroyed_signal(&self) -> Receiver<()> {
        self.instance.destroyed_signal()
    }
}

impl Drop for Connection {
    #[inline]
    fn drop(&mut self) {
        if self.instance.state() == InstanceState::Running {
            let _ = self.instance.request_async_destroy();
        }
    }
}
