use colbridge_protocol::error::{Error, Result};
use colbridge_protocol::options::ClusterOptions;
use colbridge_runtime::engine::{Connector, EngineHandles, QueryAgent};
use colbridge_runtime::io::{IoContext, IoHandle, IoThread};
use flume::{Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;

const REAPER_THREAD_NAME: &str = "colbridge-reaper";

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Running = 0,
    ClosingNetwork = 1,
    JoiningThread = 2,
    Destroyed = 3,
}

impl From<u8> for InstanceState {
    #[inline]
    fn from(src: u8) -> Self {
        match src {
            0 => InstanceState::Running,
            1 => InstanceState::ClosingNetwork,
            2 => InstanceState::JoiningThread,
            _ => InstanceState::Destroyed,
        }
    }
}

/// Instance owns the io loop thread and the engine handles.
///
/// Shutdown is asynchronous:
///
/// 1. `request_async_destroy` moves Running to ClosingNetwork and asks the
///    cluster to close.
/// 2. Close completion runs on the io loop thread. It moves to JoiningThread,
///    stops the loop, and hands over to a detached reaper thread, as the
///    loop thread cannot join itself.
/// 3. The reaper joins the loop thread, releases the engine handles and
///    moves to Destroyed. Every later operation fails.
pub struct Instance {
    state: AtomicU8,
    io: IoHandle,
    io_thread: Mutex<Option<IoThread>>,
    engine: Mutex<Option<EngineHandles>>,
    destroyed_signal: Mutex<Option<Sender<()>>>,
    destroyed_notify: Receiver<()>,
}

impl Instance {
    /// Create engine handles and start the io loop thread.
    pub fn new(connector: &dyn Connector, opts: &ClusterOptions) -> Result<Arc<Self>> {
        opts.validate()?;
        let io = IoContext::new();
        let handle = io.handle();
        let engine = connector.connect(handle.clone(), opts)?;
        let io_thread = io.start(opts.get_io_thread_name())?;
        log::debug!(
            "instance of {} started io thread {}",
            opts.conn_str(),
            opts.get_io_thread_name()
        );
        let (destroyed_signal, destroyed_notify) = flume::bounded(1);
        Ok(Arc::new(Instance {
            state: AtomicU8::new(InstanceState::Running as u8),
            io: handle,
            io_thread: Mutex::new(Some(io_thread)),
            engine: Mutex::new(Some(engine)),
            destroyed_signal: Mutex::new(Some(destroyed_signal)),
            destroyed_notify,
        }))
    }

    #[inline]
    pub fn state(&self) -> InstanceState {
        InstanceState::from(self.state.load(Ordering::Acquire))
    }

    /// Receiver disconnected once the instance is destroyed.
    #[inline]
    pub fn destroyed_signal(&self) -> Receiver<()> {
        self.destroyed_notify.clone()
    }

    #[inline]
    pub fn agent(&self) -> Result<Arc<dyn QueryAgent>> {
        match self.state() {
            InstanceState::Running => self
                .engine
                .lock()
                .as_ref()
                .map(|e| Arc::clone(&e.agent))
                .ok_or(Error::InstanceDestroyed),
            InstanceState::Destroyed => Err(Error::InstanceDestroyed),
            _ => Err(Error::InstanceClosing),
        }
    }

    /// Start asynchronous shutdown. Fire-and-forget: nothing is reported
    /// back except that the instance eventually becomes destroyed.
    ///
    /// Only one request is allowed. Later ones are rejected with
    /// [`Error::DestroyInProgress`].
    pub fn request_async_destroy(self: &Arc<Self>) -> Result<()> {
        if !self.transit(InstanceState::Running, InstanceState::ClosingNetwork) {
            log::error!("destroy requested on instance in state {:?}", self.state());
            return Err(Error::DestroyInProgress);
        }
        let cluster = self
            .engine
            .lock()
            .as_ref()
            .map(|e| Arc::clone(&e.cluster))
            .ok_or(Error::InstanceDestroyed)?;
        let this = Arc::clone(self);
        cluster.close(Box::new(move || this.on_cluster_closed()));
        Ok(())
    }

    #[inline]
    fn transit(&self, from: InstanceState, to: InstanceState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Runs on the io loop thread.
    fn on_cluster_closed(self: Arc<Self>) {
        if !self.transit(InstanceState::ClosingNetwork, InstanceState::JoiningThread) {
            log::error!("unexpected close completion in state {:?}", self.state());
            return;
        }
        self.io.stop();
        let this = Arc::clone(&self);
        let res = thread::Builder::new()
            .name(REAPER_THREAD_NAME.to_string())
            .spawn(move || this.join_and_release());
        if let Err(e) = res {
            log::error!("failed to spawn reaper thread, detach io thread: {}", e);
            self.detach_and_release();
        }
    }

    fn join_and_release(self: Arc<Self>) {
        let io_thread = self.io_thread.lock().take();
        if let Some(io_thread) = io_thread {
            if let Err(e) = io_thread.join() {
                log::error!("failed to join io thread: {}", e);
            }
        }
        self.release();
    }

    /// Release without joining. The stopped loop thread exits by itself.
    fn detach_and_release(&self) {
        drop(self.io_thread.lock().take());
        self.release();
    }

    fn release(&self) {
        let engine = self.engine.lock().take();
        drop(engine);
        self.state
            .store(InstanceState::Destroyed as u8, Ordering::Release);
        self.destroyed_signal.lock().take();
        log::debug!("instance destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colbridge_runtime::mem_impl::MemConnector;
    use std::time::{Duration, Instant};

    fn wait_destroyed(instance: &Instance) {
        let res = instance
            .destroyed_signal()
            .recv_timeout(Duration::from_secs(5));
        assert!(matches!(res, Err(flume::RecvTimeoutError::Disconnected)));
    }

    #[test]
    fn test_instance_async_destroy() {
        let connector = MemConnector::new();
        let instance = Instance::new(&connector, &ClusterOptions::new("couchbase://mem")).unwrap();
        assert_eq!(instance.state(), InstanceState::Running);
        assert!(instance.agent().is_ok());
        instance.request_async_destroy().unwrap();
        assert!(matches!(
            instance.agent(),
            Err(Error::InstanceClosing) | Err(Error::InstanceDestroyed)
        ));
        wait_destroyed(&instance);
        assert_eq!(instance.state(), InstanceState::Destroyed);
        assert!(matches!(instance.agent(), Err(Error::InstanceDestroyed)));
        assert!(instance.io.is_stopped());
        assert!(instance.io_thread.lock().is_none());
        assert!(instance.engine.lock().is_none());
        assert_eq!(connector.close_count(), 1);
    }

    #[test]
    fn test_instance_double_destroy() {
        let connector = MemConnector::new();
        let instance = Instance::new(&connector, &ClusterOptions::new("couchbase://mem")).unwrap();
        instance.request_async_destroy().unwrap();
        // second request is a precondition violation, reported not tolerated.
        assert!(matches!(
            instance.request_async_destroy(),
            Err(Error::DestroyInProgress)
        ));
        wait_destroyed(&instance);
        assert!(matches!(
            instance.request_async_destroy(),
            Err(Error::DestroyInProgress)
        ));
        assert_eq!(connector.close_count(), 1);
    }

    #[test]
    fn test_instance_unreachable_after_destroy() {
        let connector = MemConnector::new();
        let instance = Instance::new(&connector, &ClusterOptions::new("couchbase://mem")).unwrap();
        let signal = instance.destroyed_signal();
        let weak = Arc::downgrade(&instance);
        instance.request_async_destroy().unwrap();
        drop(instance);
        assert!(matches!(
            signal.recv_timeout(Duration::from_secs(5)),
            Err(flume::RecvTimeoutError::Disconnected)
        ));
        // reaper releases its reference right after signaling.
        let deadline = Instant::now() + Duration::from_secs(5);
        while weak.upgrade().is_some() {
            assert!(Instant::now() < deadline, "instance still reachable");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_instance_release_without_reaper() {
        let connector = MemConnector::new();
        let instance = Instance::new(&connector, &ClusterOptions::new("couchbase://mem")).unwrap();
        assert!(instance.transit(InstanceState::Running, InstanceState::ClosingNetwork));
        assert!(instance.transit(InstanceState::ClosingNetwork, InstanceState::JoiningThread));
        instance.io.stop();
        instance.detach_and_release();
        wait_destroyed(&instance);
        assert_eq!(instance.state(), InstanceState::Destroyed);
        assert!(instance.io_thread.lock().is_none());
        assert!(instance.engine.lock().is_none());
        assert!(matches!(instance.agent(), Err(Error::InstanceDestroyed)));
    }

    #[test]
    fn test_instance_invalid_options() {
        let res = Instance::new(
            &MemConnector::new(),
            &ClusterOptions::new("couchbase://mem").io_thread_name(""),
        );
        assert!(matches!(res, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_instance_state_from_u8() {
        assert_eq!(InstanceState::from(0), InstanceState::Running);
        assert_eq!(InstanceState::from(1), InstanceState::ClosingNetwork);
        assert_eq!(InstanceState::from(2), InstanceState::JoiningThread);
        assert_eq!(InstanceState::from(3), InstanceState::Destroyed);
    }
}
