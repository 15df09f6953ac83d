//! Dedicated background thread running the event loop of the network engine.
//!
//! The loop is an [`async_executor::Executor`] driven by one thread until
//! its stop signal is dropped. Everything the engine does, including its
//! completion callbacks, runs on that thread.
use async_executor::Executor;
use async_io::block_on;
use colbridge_protocol::error::{Error, Result};
use flume::{Receiver, Sender};
use futures_lite::future::{self, FutureExt};
use parking_lot::Mutex;
use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

type PanicPayload = Box<dyn Any + Send>;

pub struct IoContext {
    handle: IoHandle,
    stop_notify: Receiver<()>,
    panic_notify: Receiver<PanicPayload>,
}

impl IoContext {
    #[inline]
    pub fn new() -> Self {
        let (stop_signal, stop_notify) = flume::unbounded();
        let (panic_signal, panic_notify) = flume::unbounded();
        IoContext {
            handle: IoHandle {
                ex: Arc::new(Executor::new()),
                stop_signal: Arc::new(Mutex::new(Some(stop_signal))),
                panic_signal,
            },
            stop_notify,
            panic_notify,
        }
    }

    #[inline]
    pub fn handle(&self) -> IoHandle {
        self.handle.clone()
    }

    /// Start the loop on a new thread.
    ///
    /// A panic in any task escapes the loop. It is logged and re-raised,
    /// so the thread terminates abnormally and the joiner can treat it
    /// as fatal.
    ///
    /// After a normal stop, tasks already scheduled are run once more
    /// before the thread exits, so completions woken by the shutdown
    /// itself are still delivered.
    pub fn start(self, name: &str) -> Result<IoThread> {
        let IoContext {
            handle,
            stop_notify,
            panic_notify,
        } = self;
        let ex = Arc::clone(&handle.ex);
        let thread_name = name.to_string();
        let handle = thread::Builder::new().name(thread_name.clone()).spawn(move || {
            log::debug!("io loop {} started", thread_name);
            let res = panic::catch_unwind(AssertUnwindSafe(|| {
                let stopped = async {
                    let _ = stop_notify.recv_async().await;
                    None::<PanicPayload>
                };
                let panicked = async {
                    match panic_notify.recv_async().await {
                        Ok(payload) => Some(payload),
                        Err(_) => future::pending().await,
                    }
                };
                if let Some(payload) = block_on(ex.run(stopped.or(panicked))) {
                    panic::resume_unwind(payload)
                }
                while ex.try_tick() {}
            }));
            match res {
                Ok(_) => log::debug!("io loop {} stopped", thread_name),
                Err(payload) => {
                    log::error!("io loop {} aborted: {}", thread_name, panic_message(&*payload));
                    panic::resume_unwind(payload)
                }
            }
        })?;
        Ok(IoThread(handle))
    }
}

impl Default for IoContext {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable handle to schedule work on the io loop.
#[derive(Clone)]
pub struct IoHandle {
    ex: Arc<Executor<'static>>,
    stop_signal: Arc<Mutex<Option<Sender<()>>>>,
    panic_signal: Sender<PanicPayload>,
}

impl IoHandle {
    /// Spawn a detached task on the io loop.
    ///
    /// Returns false and drops the task without running it if the loop
    /// is already stopped. Callers owning a completion must make sure
    /// dropping the task still reports it.
    #[inline]
    pub fn spawn<F>(&self, fut: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        {
            let g = self.stop_signal.lock();
            if g.is_some() {
                let panic_signal = self.panic_signal.clone();
                self.ex
                    .spawn(async move {
                        if let Err(payload) = AssertUnwindSafe(fut).catch_unwind().await {
                            let _ = panic_signal.send(payload);
                        }
                    })
                    .detach();
                return true;
            }
        }
        // task is dropped outside the lock, its drop may spawn again.
        log::debug!("io loop stopped, task rejected");
        false
    }

    /// Stop the io loop. The loop returns once the task currently
    /// running yields. Calling it more than once has no effect.
    #[inline]
    pub fn stop(&self) {
        let mut g = self.stop_signal.lock();
        if g.take().is_some() {
            log::debug!("io loop stop requested");
        }
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.stop_signal.lock().is_none()
    }
}

/// Handle of the io loop thread.
pub struct IoThread(JoinHandle<()>);

impl IoThread {
    #[inline]
    pub fn thread_id(&self) -> ThreadId {
        self.0.thread().id()
    }

    /// Wait for the io loop to finish.
    ///
    /// Joining from the loop thread itself would deadlock, so it is
    /// rejected. An abnormally terminated loop is unrecoverable: the
    /// failure is logged and the process aborts.
    pub fn join(self) -> Result<()> {
        if thread::current().id() == self.thread_id() {
            return Err(Error::InvalidArgument(
                "io thread cannot join itself".to_string(),
            ));
        }
        if self.0.join().is_err() {
            log::error!("io thread terminated abnormally");
            std::process::abort();
        }
        Ok(())
    }
}

#[inline]
fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_io_loop_runs_tasks() {
        let io = IoContext::new();
        let handle = io.handle();
        let thread = io.start("test-io").unwrap();
        let thread_id = thread.thread_id();
        let (tx, rx) = flume::unbounded();
        handle.spawn(async move {
            let _ = tx.send(thread::current().id());
        });
        let id = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(id, thread_id);
        assert_ne!(id, thread::current().id());
        handle.stop();
        handle.stop();
        assert!(handle.is_stopped());
        thread.join().unwrap();
    }

    #[test]
    fn test_stop_from_loop() {
        let io = IoContext::new();
        let handle = io.handle();
        let thread = io.start("test-io").unwrap();
        let h = handle.clone();
        handle.spawn(async move {
            async_io::Timer::after(Duration::from_millis(10)).await;
            h.stop();
        });
        thread.join().unwrap();
        assert!(handle.is_stopped());
    }

    #[test]
    fn test_self_join_rejected() {
        let io = IoContext::new();
        let handle = io.handle();
        let thread = Arc::new(Mutex::new(Some(io.start("test-io").unwrap())));
        let (tx, rx) = flume::unbounded();
        {
            let thread = Arc::clone(&thread);
            let h = handle.clone();
            handle.spawn(async move {
                let t = thread.lock().take().unwrap();
                let thread_id = t.thread_id();
                let res = t.join();
                let _ = tx.send((res.is_err(), thread_id == thread::current().id()));
                h.stop();
            });
        }
        let (rejected, same_thread) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(rejected);
        assert!(same_thread);
    }

    #[test]
    fn test_spawn_after_stop_rejected() {
        let io = IoContext::new();
        let handle = io.handle();
        let thread = io.start("test-io").unwrap();
        handle.stop();
        let (tx, rx) = flume::unbounded::<()>();
        assert!(!handle.spawn(async move {
            let _ = tx.send(());
        }));
        // rejected task is dropped right away, never run.
        assert!(matches!(
            rx.recv_timeout(Duration::from_secs(1)),
            Err(flume::RecvTimeoutError::Disconnected)
        ));
        thread.join().unwrap();
    }

    #[test]
    fn test_scheduled_tasks_run_after_stop() {
        let io = IoContext::new();
        let handle = io.handle();
        let thread = io.start("test-io").unwrap();
        let (tx, rx) = flume::unbounded();
        let h = handle.clone();
        assert!(handle.spawn(async move {
            assert!(h.spawn(async move {
                let _ = tx.send(1);
            }));
            h.stop();
        }));
        thread.join().unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 1);
    }

    #[test]
    fn test_task_panic_terminates_loop() {
        let io = IoContext::new();
        let handle = io.handle();
        let thread = io.start("test-io-panic").unwrap();
        assert!(handle.spawn(async {
            panic!("io task failure");
        }));
        // IoThread::join would abort the process, check the raw handle.
        let res = thread.0.join();
        let payload = res.unwrap_err();
        assert_eq!(panic_message(&*payload), "io task failure");
        assert!(!handle.is_stopped());
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*payload), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&*payload), "bang");
        let payload: Box<dyn Any + Send> = Box::new(1u8);
        assert_eq!(panic_message(&*payload), "unknown panic");
    }
}
