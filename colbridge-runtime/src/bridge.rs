//! Dispatch bridge from any thread into the single-threaded host.
//!
//! Host callbacks are registered on the host thread and stay there, in
//! a slab owned by [`HostEnv`]. What crosses threads is a [`CallCookie`]:
//! a one-shot token naming the registered callback. Invoking the cookie
//! sends the work through a queue consumed only by [`Host`], which pairs
//! it with the callback and runs it on the host thread.
//!
//! Once the host is torn down, queued and late work is dropped without
//! being invoked.
use colbridge_protocol::error::{Error, Result};
use flume::{Receiver, Sender};
use slab::Slab;
use std::any::Any;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

type Work = Box<dyn FnOnce(&HostEnv, Box<dyn Any>) + Send>;

enum Message {
    Call {
        key: usize,
        label: &'static str,
        work: Work,
    },
    Release {
        key: usize,
        label: &'static str,
    },
}

/// Host-side environment. Only accessible from the host thread.
pub struct HostEnv {
    callbacks: RefCell<Slab<Box<dyn Any>>>,
    tx: Sender<Message>,
    closed: Arc<AtomicBool>,
}

impl HostEnv {
    /// Register a host callback and return the cookie to reach it
    /// from any thread.
    ///
    /// After teardown nothing is registered: the callback is dropped and
    /// the returned cookie is inert.
    #[inline]
    pub fn cookie<C: 'static>(&self, callback: C, label: &'static str) -> CallCookie<C> {
        let key = if self.is_closed() {
            log::trace!("host closed, drop callback {}", label);
            drop(callback);
            None
        } else {
            let key = self.callbacks.borrow_mut().insert(Box::new(callback));
            log::trace!("register host callback {} with key {}", label, key);
            Some(key)
        };
        CallCookie {
            key,
            label,
            tx: self.tx.clone(),
            closed: Arc::clone(&self.closed),
            _marker: PhantomData,
        }
    }

    /// Returns whether the host has begun or completed teardown.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of registered callbacks not yet consumed.
    #[inline]
    pub fn pending_callbacks(&self) -> usize {
        self.callbacks.borrow().len()
    }

    #[inline]
    fn take_callback(&self, key: usize) -> Option<Box<dyn Any>> {
        self.callbacks.borrow_mut().try_remove(key)
    }
}

/// The single consumer of the dispatch queue, bound to the host thread.
pub struct Host {
    env: Rc<HostEnv>,
    rx: Receiver<Message>,
}

impl Host {
    #[inline]
    pub fn new() -> Self {
        let (tx, rx) = flume::unbounded();
        Host {
            env: Rc::new(HostEnv {
                callbacks: RefCell::new(Slab::new()),
                tx,
                closed: Arc::new(AtomicBool::new(false)),
            }),
            rx,
        }
    }

    #[inline]
    pub fn env(&self) -> Rc<HostEnv> {
        Rc::clone(&self.env)
    }

    /// Run all work queued so far, without blocking.
    /// Returns number of host callbacks invoked.
    #[inline]
    pub fn poll(&self) -> usize {
        let mut n = 0;
        while let Ok(msg) = self.rx.try_recv() {
            if self.dispatch(msg) {
                n += 1;
            }
        }
        n
    }

    /// Run queued work until given condition is satisfied or timeout.
    /// The condition is checked before waiting and after each dispatch.
    pub fn run_until<F>(&self, mut cond: F, timeout: Duration) -> Result<()>
    where
        F: FnMut() -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if cond() {
                return Ok(());
            }
            if self.env.is_closed() {
                return Err(Error::HostClosed);
            }
            match self.rx.recv_deadline(deadline) {
                Ok(msg) => {
                    self.dispatch(msg);
                }
                Err(flume::RecvTimeoutError::Timeout) => {
                    return if cond() {
                        Ok(())
                    } else {
                        Err(Error::IOError(std::io::ErrorKind::TimedOut))
                    };
                }
                // host holds one sender itself, never disconnected.
                Err(flume::RecvTimeoutError::Disconnected) => return Err(Error::HostClosed),
            }
        }
    }

    /// Tear down the host environment.
    /// Queued work is discarded, and work arriving later is ignored.
    #[inline]
    pub fn teardown(&self) {
        if self.env.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let dropped = self.rx.drain().count();
        // callbacks may own host objects, release them outside the borrow.
        let callbacks = std::mem::take(&mut *self.env.callbacks.borrow_mut());
        log::debug!(
            "host teardown, dropped {} queued work and {} callbacks",
            dropped,
            callbacks.len()
        );
        drop(callbacks);
    }

    #[inline]
    fn dispatch(&self, msg: Message) -> bool {
        match msg {
            Message::Call { key, label, work } => {
                if self.env.is_closed() {
                    log::trace!("drop {} after host teardown", label);
                    return false;
                }
                match self.env.take_callback(key) {
                    Some(callback) => {
                        log::trace!("invoke host callback {}", label);
                        work(&self.env, callback);
                        true
                    }
                    None => {
                        log::warn!("host callback {} with key {} not found", label, key);
                        false
                    }
                }
            }
            Message::Release { key, label } => {
                log::trace!("release host callback {} without invocation", label);
                drop(self.env.take_callback(key));
                false
            }
        }
    }
}

impl Default for Host {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Host {
    #[inline]
    fn drop(&mut self) {
        self.teardown()
    }
}

/// One-shot handle to a host callback, usable from any thread.
///
/// The callback type only appears in the marker, so the cookie is
/// `Send` even if the callback itself is not.
pub struct CallCookie<C> {
    key: Option<usize>,
    label: &'static str,
    tx: Sender<Message>,
    closed: Arc<AtomicBool>,
    _marker: PhantomData<fn(C)>,
}

impl<C: 'static> CallCookie<C> {
    #[inline]
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Schedule `work` on the host thread with the registered callback.
    ///
    /// Work executes at most once. If the host is already torn down, or
    /// is torn down before the work is processed, it is dropped silently.
    pub fn invoke<W>(mut self, work: W)
    where
        W: FnOnce(&HostEnv, C) + Send + 'static,
    {
        let key = match self.key.take() {
            Some(key) => key,
            None => return,
        };
        if self.closed.load(Ordering::Acquire) {
            log::trace!("host closed, drop invocation of {}", self.label);
            return;
        }
        let label = self.label;
        let work: Work = Box::new(move |env, callback| match callback.downcast::<C>() {
            Ok(callback) => work(env, *callback),
            Err(_) => log::error!("host callback {} has unexpected type", label),
        });
        if self.tx.send(Message::Call { key, label, work }).is_err() {
            log::trace!("host gone, drop invocation of {}", label);
        }
    }
}

impl<C> Drop for CallCookie<C> {
    #[inline]
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            if !self.closed.load(Ordering::Acquire) {
                let _ = self.tx.send(Message::Release {
                    key,
                    label: self.label,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::thread;

    #[test]
    fn test_invoke_from_other_thread() {
        let host = Host::new();
        let env = host.env();
        let host_thread = thread::current().id();
        let res = Rc::new(Cell::new(None));
        let cookie = {
            let res = Rc::clone(&res);
            // Rc makes the callback non-Send, only the cookie crosses threads.
            env.cookie(move |v: u32| res.set(Some(v)), "cbTest")
        };
        assert_eq!(cookie.label(), "cbTest");
        thread::spawn(move || {
            cookie.invoke(move |_env, callback| {
                assert_eq!(thread::current().id(), host_thread);
                callback(42)
            })
        })
        .join()
        .unwrap();
        assert!(res.get().is_none());
        host.run_until(|| res.get().is_some(), Duration::from_secs(5))
            .unwrap();
        assert_eq!(res.get(), Some(42));
        assert_eq!(env.pending_callbacks(), 0);
        assert_eq!(host.poll(), 0);
    }

    #[test]
    fn test_invoke_after_teardown() {
        let host = Host::new();
        let env = host.env();
        let called = Rc::new(Cell::new(false));
        let before = {
            let called = Rc::clone(&called);
            env.cookie(move |_: ()| called.set(true), "cbBefore")
        };
        let queued = {
            let called = Rc::clone(&called);
            env.cookie(move |_: ()| called.set(true), "cbQueued")
        };
        // queued before teardown, processed after.
        queued.invoke(|_, cb| cb(()));
        host.teardown();
        assert!(env.is_closed());
        assert_eq!(env.pending_callbacks(), 0);
        thread::spawn(move || before.invoke(|_, cb| cb(())))
            .join()
            .unwrap();
        assert_eq!(host.poll(), 0);
        assert!(!called.get());
        assert!(matches!(
            host.run_until(|| false, Duration::from_millis(10)),
            Err(Error::HostClosed)
        ));
    }

    #[test]
    fn test_invoke_after_host_dropped() {
        let host = Host::new();
        let env = host.env();
        let cookie = env.cookie(|_: ()| panic!("must not be invoked"), "cbDropped");
        drop(host);
        thread::spawn(move || cookie.invoke(|_, cb| cb(())))
            .join()
            .unwrap();
    }

    #[test]
    fn test_cookie_after_teardown() {
        let host = Host::new();
        let env = host.env();
        host.teardown();
        let dropped = Rc::new(Cell::new(false));
        let guard = DropFlag(Rc::clone(&dropped));
        let cookie = env.cookie(
            move |_: ()| {
                let _g = &guard;
                panic!("must not be invoked")
            },
            "cbLate",
        );
        // callback released right away, nothing kept in the registry.
        assert!(dropped.get());
        assert_eq!(env.pending_callbacks(), 0);
        thread::spawn(move || cookie.invoke(|_, cb| cb(())))
            .join()
            .unwrap();
        assert_eq!(host.poll(), 0);
        assert_eq!(env.pending_callbacks(), 0);
    }

    struct DropFlag(Rc<Cell<bool>>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.set(true)
        }
    }

    #[test]
    fn test_drop_cookie_releases_callback() {
        let host = Host::new();
        let env = host.env();
        let cookie = env.cookie(|_: ()| {}, "cbUnused");
        assert_eq!(env.pending_callbacks(), 1);
        thread::spawn(move || drop(cookie)).join().unwrap();
        assert_eq!(host.poll(), 0);
        assert_eq!(env.pending_callbacks(), 0);
    }

    #[test]
    fn test_nested_cookie_in_callback() {
        let host = Host::new();
        let env = host.env();
        let res = Rc::new(Cell::new(0));
        let outer = {
            let res = Rc::clone(&res);
            env.cookie(
                move |env: &HostEnv| {
                    let res = Rc::clone(&res);
                    let inner = env.cookie(move |v: i32| res.set(v), "cbInner");
                    inner.invoke(|_, cb| cb(7));
                },
                "cbOuter",
            )
        };
        outer.invoke(|env, cb| cb(env));
        host.run_until(|| res.get() == 7, Duration::from_secs(5))
            .unwrap();
        assert_eq!(env.pending_callbacks(), 0);
    }

    #[test]
    fn test_run_until_timeout() {
        let host = Host::new();
        let res = host.run_until(|| false, Duration::from_millis(10));
        assert!(matches!(
            res,
            Err(Error::IOError(std::io::ErrorKind::TimedOut))
        ));
    }
}
