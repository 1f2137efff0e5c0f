//SPDX-License-Identifier: MPL-2.0

//! A cell type for owner-thread-only values that can be shared across threads.
//!
//! [`OwnerCell<T>`] lets a value that must never leave an owner thread (a native handle, an
//! `Rc`, a GPU object) be held by any thread.  Every access happens on the owner thread, and
//! so does the final drop.
//!
//! # Example
//!
//! ```
//! use std::rc::Rc;
//! use std::sync::Arc;
//! use window_host::config::HostConfig;
//! use window_host::headless::HeadlessControl;
//! use window_host::host::Host;
//! use window_host::owner_cell::OwnerCell;
//! use window_host::registry::Registry;
//! use window_host::shutdown::Liveness;
//!
//! let control = HeadlessControl::new();
//! let factory = control.clone();
//! let host = Host::spawn(HostConfig::default(), Arc::new(Registry::new()), Liveness::new(), move || factory.connect())
//!     .unwrap();
//!
//! let dispatcher = host.dispatcher();
//! let cell = OwnerCell::new_on_owner(&dispatcher, || Rc::new(21)).unwrap();
//!
//! // Runs on the owner thread
//! let doubled = cell.with(|value| **value * 2).unwrap();
//! assert_eq!(doubled, 42);
//! ```

use send_cells::UnsafeSendCell;
use send_cells::unsafe_sync_cell::UnsafeSyncCell;
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::bridge::{BridgeError, Dispatcher};

struct Shared<T: 'static> {
    inner: Option<UnsafeSendCell<UnsafeSyncCell<T>>>,
    mutex: Mutex<()>,
    dispatcher: Dispatcher,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, ()> {
        self.mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Owner thread only, with `mutex` held.
    unsafe fn value(&self) -> Option<&T> {
        self.inner.as_ref().map(|inner| unsafe { inner.get().get() })
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        // The last reference must drop the value on the owner thread
        let Some(take) = self.inner.take() else {
            return;
        };
        if self.dispatcher.is_owner_thread() {
            drop(take);
            return;
        }
        let label = format!("OwnerCell::drop({})", std::any::type_name::<T>());
        //if the job is cancelled instead of run, the value leaks rather than dropping here
        let take = ManuallyDrop::new(take);
        if self
            .dispatcher
            .post(label, move || drop(ManuallyDrop::into_inner(take)))
            .is_err()
        {
            logwise::warn_sync!(
                "OwnerCell<{ty}> outlived its owner loop; leaking the value",
                ty = std::any::type_name::<T>()
            );
        }
    }
}

/// Mutable access to the contents of an [`OwnerCell`], held under its lock.
pub struct OwnerGuard<'a, T: 'static> {
    _guard: MutexGuard<'a, ()>,
    value: &'a mut T,
}

impl<T> Deref for OwnerGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &*self.value
    }
}

impl<T> DerefMut for OwnerGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.value
    }
}

impl<T: Debug> Debug for OwnerGuard<'_, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnerGuard").field("value", &*self.value).finish()
    }
}

/**
A thread-safe cell whose contents are only ever touched on one owner thread.

- The cell can be cloned and sent to any thread.
- [`OwnerCell::lock`] and [`OwnerCell::assume`] check that they run on the owner thread.
- [`OwnerCell::with`] and [`OwnerCell::with_async`] dispatch to it.
- The value is dropped on the owner thread.
*/
pub struct OwnerCell<T: 'static> {
    shared: Arc<Shared<T>>,
}

impl<T> PartialEq for OwnerCell<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl<T> Clone for OwnerCell<T> {
    fn clone(&self) -> Self {
        OwnerCell {
            shared: self.shared.clone(),
        }
    }
}

impl<T> OwnerCell<T> {
    /**
    Wraps a value that lives on the thread behind `dispatcher`.

    # Panics

    Panics unless called on that owner thread.
    */
    pub fn new(dispatcher: Dispatcher, t: T) -> Self {
        assert!(dispatcher.is_owner_thread(), "OwnerCell created off its owner thread");
        let cell = unsafe { UnsafeSendCell::new_unchecked(UnsafeSyncCell::new(t)) };
        OwnerCell {
            shared: Arc::new(Shared {
                inner: Some(cell),
                mutex: Mutex::new(()),
                dispatcher,
            }),
        }
    }

    /// Builds the value on the owner thread and wraps it.
    pub fn new_on_owner<C>(dispatcher: &Dispatcher, c: C) -> Result<Self, BridgeError>
    where
        C: FnOnce() -> T + Send + 'static,
    {
        if dispatcher.is_owner_thread() {
            return Ok(OwnerCell::new(dispatcher.clone(), c()));
        }
        let label = format!("OwnerCell::new_on_owner({})", std::any::type_name::<T>());
        let owner = dispatcher.clone();
        dispatcher.submit(label, move || OwnerCell::new(owner, c()))
    }

    #[inline]
    fn verify_owner_thread(&self) {
        assert!(
            self.shared.dispatcher.is_owner_thread(),
            "OwnerCell accessed off its owner thread"
        );
    }

    /**
    Locks the cell for mutable access.

    # Panics

    Panics unless called on the owner thread.
    */
    pub fn lock(&self) -> OwnerGuard<'_, T> {
        self.verify_owner_thread();
        let guard = self.shared.lock();
        let inner = self
            .shared
            .inner
            .as_ref()
            .expect("OwnerCell value is only taken on drop");
        let value = unsafe { inner.get().get_mut_unchecked() };
        OwnerGuard { _guard: guard, value }
    }

    /**
    Runs `c` with shared access to the value.

    # Panics

    Panics unless called on the owner thread.
    */
    pub fn assume<C, R>(&self, c: C) -> R
    where
        C: FnOnce(&T) -> R,
    {
        self.verify_owner_thread();
        let guard = self.shared.lock();
        let value = unsafe { self.shared.value() }.expect("OwnerCell value is only taken on drop");
        let r = c(value);
        drop(guard);
        r
    }

    /**
    Runs `c` with the value on the owner thread and waits for the result.

    Runs inline when already on the owner thread.
    */
    pub fn with<C, R>(&self, c: C) -> Result<R, BridgeError>
    where
        C: FnOnce(&T) -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.shared.dispatcher.is_owner_thread() {
            return Ok(self.assume(c));
        }
        let shared = self.clone();
        let label = format!("OwnerCell({})", std::any::type_name::<T>());
        self.shared.dispatcher.submit(label, move || shared.assume(c))
    }

    /// Like [`OwnerCell::with`], without blocking the calling thread.
    pub fn with_async<C, R>(&self, c: C) -> impl Future<Output = Result<R, BridgeError>> + use<C, R, T>
    where
        C: FnOnce(&T) -> R + Send + 'static,
        R: Send + 'static,
    {
        let shared = self.clone();
        let label = format!("OwnerCell({})", std::any::type_name::<T>());
        self.shared.dispatcher.submit_async(label, move || shared.assume(c))
    }
}

// Safety: the value is only reached through methods that run on the owner thread
unsafe impl<T> Send for OwnerCell<T> {}
unsafe impl<T> Sync for OwnerCell<T> {}

impl<T> Debug for OwnerCell<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnerCell").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::channel;
    use std::cell::Cell;
    use std::rc::Rc;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    /// An owner thread with nothing but a bridge, stopped by dropping every handle.
    fn owner() -> (Dispatcher, thread::JoinHandle<()>) {
        let (bridge, mut receiver) = channel::<()>();
        let dispatcher = bridge.dispatcher();
        drop(bridge);
        let handle = thread::Builder::new()
            .name("owner cell test".to_string())
            .spawn(move || {
                let mut state = ();
                loop {
                    receiver.drain(&mut state);
                    if !receiver.wait(Duration::from_millis(5)) && receiver.is_orphaned() {
                        return;
                    }
                }
            })
            .unwrap();
        (dispatcher, handle)
    }

    #[test]
    fn with_runs_on_the_owner_thread() {
        let (dispatcher, handle) = owner();
        let cell = OwnerCell::new_on_owner(&dispatcher, || Rc::new(Cell::new(1))).unwrap();
        cell.with(|v| v.set(v.get() + 1)).unwrap();
        let (tx, rx) = mpsc::channel();
        let probe = cell.clone();
        thread::spawn(move || {
            tx.send(probe.with(|v| v.get()).unwrap()).unwrap();
        });
        assert_eq!(rx.recv().unwrap(), 2);
        assert_eq!(cell, cell.clone());
        drop(cell);
        drop(dispatcher);
        handle.join().unwrap();
    }

    #[test]
    #[should_panic(expected = "off its owner thread")]
    fn lock_off_owner_panics() {
        let (dispatcher, _handle) = owner();
        let cell = OwnerCell::new_on_owner(&dispatcher, || 5u8).unwrap();
        let _guard = cell.lock();
    }

    #[test]
    fn value_drops_on_owner_thread() {
        struct Witness(mpsc::Sender<Option<String>>);
        impl Drop for Witness {
            fn drop(&mut self) {
                _ = self.0.send(thread::current().name().map(str::to_owned));
            }
        }
        let (dispatcher, handle) = owner();
        let (tx, rx) = mpsc::channel();
        let cell = OwnerCell::new_on_owner(&dispatcher, move || Witness(tx)).unwrap();
        drop(cell);
        assert_eq!(rx.recv().unwrap().as_deref(), Some("owner cell test"));
        drop(dispatcher);
        handle.join().unwrap();
    }

    #[test_executors::async_test]
    async fn with_async_resolves() {
        let (dispatcher, handle) = owner();
        let cell = OwnerCell::new_on_owner(&dispatcher, || Rc::new(20)).unwrap();
        let r = cell.with_async(|v| **v + 1).await;
        assert_eq!(r, Ok(21));
        drop(cell);
        drop(dispatcher);
        handle.join().unwrap();
    }
}
