//SPDX-License-Identifier: MPL-2.0
/*!
A single-consumer rendezvous queue for running work on an owner thread.

Any thread may hand a closure to a [`Bridge`].  The closure runs exactly once, on the thread that
drains the matching [`BridgeReceiver`], with mutable access to that thread's state `S`.
Requests from all submitters share one FIFO, and the receiver runs them one at a time.

If the receiver goes away, every request still in the queue is cancelled and its submitter
observes [`BridgeError::Closed`] instead of waiting forever.
*/

use std::collections::VecDeque;
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, OnceLock};
use std::thread::ThreadId;
use std::time::Duration;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("the owner loop has terminated; the bridge is closed")]
    Closed,
    #[error("{label} was not executed within {after:?}")]
    Timeout { label: String, after: Duration },
    #[error("{label} panicked on the owner thread: {message}")]
    TaskPanicked { label: String, message: String },
    #[error("{label} was submitted from the owner thread and would deadlock")]
    Reentrant { label: String },
}

type Job<S> = Box<dyn FnOnce(Option<&mut S>) + Send>;

/**
One unit of deferred work.

A request that is dropped without being run tells its job so (by passing `None`), which is how
submitters learn that the bridge closed underneath them.
*/
struct Request<S> {
    label: String,
    job: Option<Job<S>>,
}

impl<S> Request<S> {
    fn new<J>(label: String, job: J) -> Self
    where
        J: FnOnce(Option<&mut S>) + Send + 'static,
    {
        Request {
            label,
            job: Some(Box::new(job)),
        }
    }

    fn run(mut self, state: &mut S) {
        logwise::debuginternal_sync!("bridge: running {label}", label = self.label.clone());
        if let Some(job) = self.job.take() {
            job(Some(state));
        }
    }
}

impl<S> Drop for Request<S> {
    fn drop(&mut self) {
        if let Some(job) = self.job.take() {
            logwise::debuginternal_sync!("bridge: cancelling {label}", label = self.label.clone());
            job(None);
        }
    }
}

#[derive(Debug)]
struct Shared {
    pending: AtomicUsize,
    closed: AtomicBool,
    owner: OnceLock<ThreadId>,
}

/**
The submitting side of the bridge.

Cheap to clone; every clone feeds the same queue.
*/
pub struct Bridge<S> {
    sender: Sender<Request<S>>,
    shared: Arc<Shared>,
}

impl<S> Clone for Bridge<S> {
    fn clone(&self) -> Self {
        Bridge {
            sender: self.sender.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl<S> Debug for Bridge<S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("pending", &self.shared.pending.load(Ordering::Relaxed))
            .field("closed", &self.shared.closed.load(Ordering::Relaxed))
            .finish()
    }
}

/**
The draining side of the bridge.  Lives on the owner thread.
*/
pub struct BridgeReceiver<S> {
    receiver: Receiver<Request<S>>,
    parked: Option<Request<S>>,
    shared: Arc<Shared>,
}

/// Creates a connected bridge pair.
pub fn channel<S: 'static>() -> (Bridge<S>, BridgeReceiver<S>) {
    let (sender, receiver) = mpsc::channel();
    let shared = Arc::new(Shared {
        pending: AtomicUsize::new(0),
        closed: AtomicBool::new(false),
        owner: OnceLock::new(),
    });
    (
        Bridge {
            sender,
            shared: shared.clone(),
        },
        BridgeReceiver {
            receiver,
            parked: None,
            shared,
        },
    )
}

/// Runs `f`, converting a panic into a typed error.
fn execute<R>(label: &str, f: impl FnOnce() -> R) -> Result<R, BridgeError> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(r) => Ok(r),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            logwise::error_sync!(
                "{label} panicked on the owner thread: {message}",
                label = label.to_owned(),
                message = message.clone()
            );
            Err(BridgeError::TaskPanicked {
                label: label.to_owned(),
                message,
            })
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

impl<S: 'static> Bridge<S> {
    fn enqueue(&self, request: Request<S>) -> Result<(), BridgeError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(BridgeError::Closed);
        }
        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        match self.sender.send(request) {
            Ok(()) => Ok(()),
            Err(rejected) => {
                self.shared.pending.fetch_sub(1, Ordering::AcqRel);
                //dropping the request cancels it
                drop(rejected);
                Err(BridgeError::Closed)
            }
        }
    }

    fn reject_on_owner(&self, label: &str) -> Result<(), BridgeError> {
        if self.is_owner_thread() {
            logwise::warn_sync!(
                "{label} submitted from the owner thread; refusing to block",
                label = label.to_owned()
            );
            return Err(BridgeError::Reentrant {
                label: label.to_owned(),
            });
        }
        Ok(())
    }

    /**
    Runs `f` on the owner thread and blocks until it has finished.

    Fails with [`BridgeError::Closed`] if the owner loop is gone (or goes away before reaching
    this request), and with [`BridgeError::Reentrant`] when called from the owner thread itself.
    */
    pub fn submit<R, F>(&self, label: impl Into<String>, f: F) -> Result<R, BridgeError>
    where
        R: Send + 'static,
        F: FnOnce(&mut S) -> R + Send + 'static,
    {
        let label = label.into();
        self.reject_on_owner(&label)?;
        let (tx, rx) = mpsc::sync_channel(1);
        self.enqueue(Self::replying(label, f, move |outcome| {
            _ = tx.send(outcome);
        }))?;
        rx.recv().unwrap_or(Err(BridgeError::Closed))
    }

    /**
    Like [`Bridge::submit`], but gives up waiting after `timeout`.

    A timed-out request stays queued and may still run later; only the wait is abandoned.
    */
    pub fn submit_timeout<R, F>(
        &self,
        label: impl Into<String>,
        timeout: Duration,
        f: F,
    ) -> Result<R, BridgeError>
    where
        R: Send + 'static,
        F: FnOnce(&mut S) -> R + Send + 'static,
    {
        let label = label.into();
        self.reject_on_owner(&label)?;
        let (tx, rx) = mpsc::sync_channel(1);
        self.enqueue(Self::replying(label.clone(), f, move |outcome| {
            _ = tx.send(outcome);
        }))?;
        match rx.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => Err(BridgeError::Timeout {
                label,
                after: timeout,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(BridgeError::Closed),
        }
    }

    /**
    Enqueues `f` and returns a future for its result.

    The request takes its place in the queue when this function is called, not when the
    future is first polled.  Safe to use from the owner thread.
    */
    pub fn submit_async<L, R, F>(
        &self,
        label: L,
        f: F,
    ) -> impl Future<Output = Result<R, BridgeError>> + use<S, L, R, F>
    where
        L: Into<String>,
        R: Send + 'static,
        F: FnOnce(&mut S) -> R + Send + 'static,
    {
        let (sender, future) = r#continue::continuation();
        let enqueued = self.enqueue(Self::replying(label.into(), f, move |outcome| {
            sender.send(outcome);
        }));
        async move {
            enqueued?;
            future.await
        }
    }

    /**
    Enqueues `f` without waiting for it.

    A panic inside `f` is logged on the owner thread and otherwise ignored.
    */
    pub fn post<F>(&self, label: impl Into<String>, f: F) -> Result<(), BridgeError>
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        let label = label.into();
        let job_label = label.clone();
        self.enqueue(Request::new(label, move |state: Option<&mut S>| {
            if let Some(state) = state {
                _ = execute(&job_label, || f(state));
            }
        }))
    }

    fn replying<R, F, D>(label: String, f: F, deliver: D) -> Request<S>
    where
        R: Send + 'static,
        F: FnOnce(&mut S) -> R + Send + 'static,
        D: FnOnce(Result<R, BridgeError>) + Send + 'static,
    {
        let job_label = label.clone();
        Request::new(label, move |state: Option<&mut S>| {
            let outcome = match state {
                Some(state) => execute(&job_label, || f(state)),
                None => Err(BridgeError::Closed),
            };
            deliver(outcome);
        })
    }

    /// True when called on the thread that drains this bridge.
    pub fn is_owner_thread(&self) -> bool {
        self.shared.owner.get() == Some(&std::thread::current().id())
    }

    /// True once the receiving side has been dropped.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Number of requests enqueued but not yet run.
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    /// Erases the state type, keeping only the ability to run plain closures on the owner thread.
    pub fn dispatcher(&self) -> Dispatcher {
        let bridge = self.clone();
        let probe = self.clone();
        Dispatcher {
            post: Arc::new(move |label: String, job: Box<dyn FnOnce() + Send>| {
                bridge.post(label, move |_: &mut S| job())
            }),
            on_owner: Arc::new(move || probe.is_owner_thread()),
        }
    }
}

impl<S> BridgeReceiver<S> {
    fn claim_thread(&self) {
        let current = std::thread::current().id();
        let owner = *self.shared.owner.get_or_init(|| current);
        assert_eq!(owner, current, "BridgeReceiver drained from a second thread");
    }

    /**
    Runs every request that was pending when the call began, in FIFO order.

    Requests enqueued by the tasks themselves wait for the next call.  Never blocks waiting
    for new work.  Returns the number of requests run.
    */
    pub fn drain(&mut self, state: &mut S) -> usize {
        self.claim_thread();
        //pending may count a request still on its way into the channel; it only caps the batch
        let budget = self.shared.pending.load(Ordering::Acquire);
        let mut batch: VecDeque<Request<S>> = self.parked.take().into_iter().collect();
        while batch.len() < budget {
            match self.receiver.try_recv() {
                Ok(request) => batch.push_back(request),
                Err(_) => break,
            }
        }
        let executed = batch.len();
        while let Some(request) = batch.pop_front() {
            self.shared.pending.fetch_sub(1, Ordering::AcqRel);
            request.run(state);
        }
        executed
    }

    /**
    Parks the owner thread until work arrives or `timeout` elapses.

    Returns true if work is ready for the next [`BridgeReceiver::drain`].
    */
    pub fn wait(&mut self, timeout: Duration) -> bool {
        self.claim_thread();
        if self.parked.is_some() || self.shared.pending.load(Ordering::Acquire) > 0 {
            return true;
        }
        match self.receiver.recv_timeout(timeout) {
            Ok(request) => {
                self.parked = Some(request);
                true
            }
            Err(_) => false,
        }
    }

    /// True when nothing is waiting to run.
    pub fn is_idle(&self) -> bool {
        self.parked.is_none() && self.shared.pending.load(Ordering::Acquire) == 0
    }

    /// True once every [`Bridge`] and [`Dispatcher`] feeding this receiver has been dropped.
    pub fn is_orphaned(&self) -> bool {
        Arc::strong_count(&self.shared) == 1
    }
}

impl<S> Drop for BridgeReceiver<S> {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        //remaining requests are cancelled as the parked slot and the channel buffer drop
    }
}

type PostFn = dyn Fn(String, Box<dyn FnOnce() + Send>) -> Result<(), BridgeError> + Send + Sync;

/**
A type-erased handle for running plain closures on some owner thread.
*/
#[derive(Clone)]
pub struct Dispatcher {
    post: Arc<PostFn>,
    on_owner: Arc<dyn Fn() -> bool + Send + Sync>,
}

impl Debug for Dispatcher {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").finish()
    }
}

impl Dispatcher {
    /// Enqueues `f` on the owner thread without waiting.
    pub fn post(&self, label: impl Into<String>, f: impl FnOnce() + Send + 'static) -> Result<(), BridgeError> {
        (self.post)(label.into(), Box::new(f))
    }

    /// Runs `f` on the owner thread and waits for its result.
    pub fn submit<R: Send + 'static>(
        &self,
        label: impl Into<String>,
        f: impl FnOnce() -> R + Send + 'static,
    ) -> Result<R, BridgeError> {
        let label = label.into();
        if self.is_owner_thread() {
            return Err(BridgeError::Reentrant { label });
        }
        let (tx, rx) = mpsc::sync_channel(1);
        let job_label = label.clone();
        self.post(label, move || {
            _ = tx.send(execute(&job_label, f));
        })?;
        //a cancelled job drops `tx` without sending
        rx.recv().unwrap_or(Err(BridgeError::Closed))
    }

    /**
    Enqueues `f` and returns a future for its result.

    Resolves to [`BridgeError::Closed`] if the owner loop goes away before running `f`.
    */
    pub fn submit_async<L, R, F>(&self, label: L, f: F) -> impl Future<Output = Result<R, BridgeError>> + use<L, R, F>
    where
        L: Into<String>,
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let label = label.into();
        let (sender, future) = r#continue::continuation();
        let reply = Reply { sender: Some(sender) };
        let job_label = label.clone();
        let posted = self.post(label, move || {
            reply.send(execute(&job_label, f));
        });
        async move {
            posted?;
            future.await
        }
    }

    pub fn is_owner_thread(&self) -> bool {
        (self.on_owner)()
    }
}

/// Answers `Closed` if dropped unanswered, so a cancelled job never strands its future.
struct Reply<R> {
    sender: Option<r#continue::Sender<Result<R, BridgeError>>>,
}

impl<R> Reply<R> {
    fn send(mut self, outcome: Result<R, BridgeError>) {
        if let Some(sender) = self.sender.take() {
            sender.send(outcome);
        }
    }
}

impl<R> Drop for Reply<R> {
    fn drop(&mut self) {
        if let Some(sender) = self.sender.take() {
            sender.send(Err(BridgeError::Closed));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn spawn_owner<S: Send + 'static>(mut state: S, mut receiver: BridgeReceiver<S>) -> thread::JoinHandle<S> {
        thread::Builder::new()
            .name("bridge test owner".to_string())
            .spawn(move || {
                loop {
                    receiver.drain(&mut state);
                    if !receiver.wait(Duration::from_millis(5)) && receiver.is_orphaned() {
                        //every bridge handle is gone
                        return state;
                    }
                }
            })
            .unwrap()
    }

    #[test]
    fn submit_returns_value_from_owner() {
        let (bridge, receiver) = channel::<Vec<u32>>();
        let owner = spawn_owner(Vec::new(), receiver);
        let len = bridge
            .submit("push", |v: &mut Vec<u32>| {
                v.push(7);
                v.len()
            })
            .unwrap();
        assert_eq!(len, 1);
        drop(bridge);
        assert_eq!(owner.join().unwrap(), vec![7]);
    }

    #[test]
    fn submit_after_receiver_dropped_is_closed() {
        let (bridge, receiver) = channel::<()>();
        drop(receiver);
        assert!(bridge.is_closed());
        assert_eq!(bridge.submit("late", |_| ()), Err(BridgeError::Closed));
        assert_eq!(bridge.post("late", |_| ()), Err(BridgeError::Closed));
    }

    #[test]
    fn queued_requests_are_cancelled_when_receiver_drops() {
        let (bridge, receiver) = channel::<()>();
        let submitter = {
            let bridge = bridge.clone();
            thread::spawn(move || bridge.submit("never runs", |_| 1))
        };
        while bridge.pending() == 0 {
            thread::yield_now();
        }
        drop(receiver);
        assert_eq!(submitter.join().unwrap(), Err(BridgeError::Closed));
    }

    #[test]
    fn panics_are_reported_not_propagated() {
        let (bridge, receiver) = channel::<u8>();
        let owner = spawn_owner(0u8, receiver);
        let r: Result<(), _> = bridge.submit("boom", |_| panic!("exploded"));
        match r {
            Err(BridgeError::TaskPanicked { label, message }) => {
                assert_eq!(label, "boom");
                assert!(message.contains("exploded"));
            }
            other => panic!("unexpected {other:?}"),
        }
        //the owner survives
        assert_eq!(bridge.submit("after", |s: &mut u8| { *s += 1; *s }), Ok(1));
        drop(bridge);
        owner.join().unwrap();
    }

    #[test]
    fn timeout_when_owner_stalls() {
        let (bridge, receiver) = channel::<()>();
        let r = bridge.submit_timeout("stalled", Duration::from_millis(20), |_| ());
        assert!(matches!(r, Err(BridgeError::Timeout { .. })));
        assert_eq!(bridge.pending(), 1);
        drop(receiver);
    }

    #[test]
    fn drain_runs_only_the_snapshot() {
        let (bridge, mut receiver) = channel::<Vec<&'static str>>();
        let inner = bridge.clone();
        bridge
            .post("outer", move |v: &mut Vec<&'static str>| {
                v.push("outer");
                inner.post("inner", |v: &mut Vec<&'static str>| v.push("inner")).unwrap();
            })
            .unwrap();
        let mut log = Vec::new();
        assert_eq!(receiver.drain(&mut log), 1);
        assert_eq!(log, vec!["outer"]);
        assert_eq!(receiver.drain(&mut log), 1);
        assert_eq!(log, vec!["outer", "inner"]);
        assert!(receiver.is_idle());
    }

    #[test]
    fn nested_requests_wait_even_with_a_send_in_flight() {
        let (bridge, mut receiver) = channel::<Vec<&'static str>>();
        //a producer that has counted its request but not sent it yet
        bridge.shared.pending.fetch_add(1, Ordering::AcqRel);
        let inner = bridge.clone();
        bridge
            .post("outer", move |v: &mut Vec<&'static str>| {
                v.push("outer");
                inner.post("inner", |v: &mut Vec<&'static str>| v.push("inner")).unwrap();
            })
            .unwrap();
        let mut log = Vec::new();
        assert_eq!(receiver.drain(&mut log), 1);
        assert_eq!(log, vec!["outer"]);
        bridge.shared.pending.fetch_sub(1, Ordering::AcqRel);
        assert_eq!(receiver.drain(&mut log), 1);
        assert_eq!(log, vec!["outer", "inner"]);
    }

    #[test]
    fn submit_from_owner_thread_is_rejected() {
        let (bridge, mut receiver) = channel::<Option<Result<(), BridgeError>>>();
        let inner = bridge.clone();
        bridge
            .post("reenter", move |slot: &mut Option<Result<(), BridgeError>>| {
                *slot = Some(inner.submit("nested", |_| ()));
            })
            .unwrap();
        let mut slot = None;
        receiver.drain(&mut slot);
        assert!(matches!(slot, Some(Err(BridgeError::Reentrant { .. }))));
    }

    #[test]
    fn dispatcher_runs_plain_closures() {
        let (bridge, receiver) = channel::<()>();
        let owner = spawn_owner((), receiver);
        let dispatcher = bridge.dispatcher();
        assert!(!dispatcher.is_owner_thread());
        let on_owner = {
            let d = dispatcher.clone();
            dispatcher.submit("probe", move || d.is_owner_thread()).unwrap()
        };
        assert!(on_owner);
        drop(dispatcher);
        drop(bridge);
        owner.join().unwrap();
    }

    #[test_executors::async_test]
    async fn submit_async_resolves() {
        let (bridge, receiver) = channel::<u32>();
        let owner = spawn_owner(41u32, receiver);
        let r = bridge.submit_async("async", |s: &mut u32| *s + 1).await;
        assert_eq!(r, Ok(42));
        drop(bridge);
        owner.join().unwrap();
    }
}
