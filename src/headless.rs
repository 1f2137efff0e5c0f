//SPDX-License-Identifier: MPL-2.0
/*!
An in-process backend with no display.

[`HeadlessBackend`] behaves like a native binding that must only be touched by the thread that
connected it.  Its handles are not `Send`.  [`HeadlessControl`] is the shareable side: it injects
native events and failures, and records every call the core made so callers can check what
happened (and on which thread).

```
use std::sync::Arc;
use window_host::config::HostConfig;
use window_host::headless::HeadlessControl;
use window_host::host::Host;
use window_host::impulse::Tick;
use window_host::registry::Registry;
use window_host::shutdown::Liveness;

let control = HeadlessControl::new();
let factory = control.clone();
let host = Host::spawn(HostConfig::default(), Arc::new(Registry::new()), Liveness::new(), move || factory.connect())
    .unwrap();
let window = host.create_window("doc", None, None, |_: &Tick| {}).unwrap();
assert_eq!(control.live_windows(), 1);
window.stop().unwrap();
assert!(host.quiescent());
assert!(control.violations().is_empty());
```
*/

use std::collections::{HashMap, HashSet, VecDeque};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::ThreadId;

use crate::backend::{Backend, Key, NativeEvent};
use crate::coordinates::WindowSpec;
use crate::error::{BackendError, BackendErrorKind};

/// One backend call, as observed by the headless binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    CreateWindow { native: u64, spec: WindowSpec },
    ShowWindow(u64),
    DestroyWindow(u64),
    CreateContext(u64),
    AttachContext(u64),
    DestroyContext(u64),
    SwapBuffers(u64),
}

#[derive(Debug, Default)]
struct State {
    refuse_connection: Option<String>,
    fail_windows: VecDeque<String>,
    fail_contexts: VecDeque<String>,
    fail_swaps: bool,
    next_native: u64,
    owner: Option<ThreadId>,
    in_call: bool,
    events: VecDeque<NativeEvent>,
    ops: Vec<Op>,
    windows: HashSet<u64>,
    shown: HashSet<u64>,
    contexts: HashMap<u64, u64>,
    current: Option<u64>,
    swaps: HashMap<u64, u64>,
    violations: Vec<String>,
}

impl State {
    fn violation(&mut self, what: String) {
        logwise::error_sync!("headless backend: {what}", what = what.clone());
        self.violations.push(what);
    }
}

/**
Shareable handle onto a headless display.
*/
#[derive(Debug, Clone, Default)]
pub struct HeadlessControl {
    state: Arc<Mutex<State>>,
}

impl HeadlessControl {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /**
    Connects to the display from the calling thread.

    Meant to be used as a host's backend factory.  The calling thread becomes the only thread
    allowed to use the returned backend.
    */
    pub fn connect(&self) -> Result<HeadlessBackend, BackendError> {
        let mut state = self.lock();
        if let Some(reason) = state.refuse_connection.clone() {
            return Err(BackendError::connect(reason));
        }
        let current = std::thread::current().id();
        if state.owner.replace(current).is_some_and(|previous| previous != current) {
            logwise::warn_sync!("headless display reconnected from another thread");
        }
        Ok(HeadlessBackend {
            control: self.clone(),
            owner: current,
            _not_send: PhantomData,
        })
    }

    /// Makes every later [`HeadlessControl::connect`] fail.
    pub fn refuse_connection(&self, reason: impl Into<String>) {
        self.lock().refuse_connection = Some(reason.into());
    }

    pub fn fail_next_window(&self, reason: impl Into<String>) {
        self.lock().fail_windows.push_back(reason.into());
    }

    pub fn fail_next_context(&self, reason: impl Into<String>) {
        self.lock().fail_contexts.push_back(reason.into());
    }

    pub fn fail_swaps(&self, fail: bool) {
        self.lock().fail_swaps = fail;
    }

    /// Queues a native event for the owner loop's next poll.
    pub fn inject(&self, event: NativeEvent) {
        self.lock().events.push_back(event);
    }

    /// The window manager's close button.
    pub fn request_close(&self, native: u64) {
        self.inject(NativeEvent::CloseRequested { native });
    }

    pub fn press_key(&self, native: u64, key: Key) {
        self.inject(NativeEvent::KeyPressed { native, key });
    }

    /// The native window vanishes on its own (display lost, killed by the window manager).
    pub fn destroy_natively(&self, native: u64) {
        let mut state = self.lock();
        state.windows.remove(&native);
        state.events.push_back(NativeEvent::Destroyed { native });
    }

    pub fn ops(&self) -> Vec<Op> {
        self.lock().ops.clone()
    }

    /// Native ids of windows that currently exist, oldest first.
    pub fn natives(&self) -> Vec<u64> {
        let mut natives: Vec<u64> = self.lock().windows.iter().copied().collect();
        natives.sort_unstable();
        natives
    }

    pub fn live_windows(&self) -> usize {
        self.lock().windows.len()
    }

    pub fn live_contexts(&self) -> usize {
        self.lock().contexts.len()
    }

    pub fn was_shown(&self, native: u64) -> bool {
        self.lock().shown.contains(&native)
    }

    pub fn swap_count(&self, native: u64) -> u64 {
        self.lock().swaps.get(&native).copied().unwrap_or(0)
    }

    /// Every broken rule observed so far: off-thread calls, overlapping calls, misuse of handles.
    pub fn violations(&self) -> Vec<String> {
        self.lock().violations.clone()
    }
}

/// A headless native window.  Not `Send`.
#[derive(Debug)]
pub struct HeadlessWindow {
    native: u64,
    _not_send: PhantomData<*const ()>,
}

/// A headless rendering context.  Not `Send`.
#[derive(Debug)]
pub struct HeadlessContext {
    window: u64,
    _not_send: PhantomData<*const ()>,
}

#[derive(Debug)]
pub struct HeadlessBackend {
    control: HeadlessControl,
    owner: ThreadId,
    _not_send: PhantomData<*const ()>,
}

/// Marks a backend call in progress; a second call while one is running is a violation.
struct CallGuard<'a> {
    control: &'a HeadlessControl,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.control.lock().in_call = false;
    }
}

impl HeadlessBackend {
    fn enter(&self, call: &'static str) -> CallGuard<'_> {
        let mut state = self.control.lock();
        let current = std::thread::current().id();
        if current != self.owner {
            state.violation(format!("{call} called off the owner thread ({current:?})"));
        }
        if state.in_call {
            state.violation(format!("{call} overlapped another backend call"));
        }
        state.in_call = true;
        CallGuard { control: &self.control }
    }

    pub fn control(&self) -> &HeadlessControl {
        &self.control
    }
}

impl Backend for HeadlessBackend {
    type Window = HeadlessWindow;
    type Context = HeadlessContext;

    fn create_window(&mut self, spec: &WindowSpec) -> Result<HeadlessWindow, BackendError> {
        let _call = self.enter("create_window");
        let mut state = self.control.lock();
        if let Some(reason) = state.fail_windows.pop_front() {
            return Err(BackendError::window(reason));
        }
        state.next_native += 1;
        let native = state.next_native;
        state.windows.insert(native);
        state.ops.push(Op::CreateWindow {
            native,
            spec: spec.clone(),
        });
        Ok(HeadlessWindow {
            native,
            _not_send: PhantomData,
        })
    }

    fn native_id(&self, window: &HeadlessWindow) -> u64 {
        window.native
    }

    fn show_window(&mut self, window: &HeadlessWindow) {
        let _call = self.enter("show_window");
        let mut state = self.control.lock();
        state.shown.insert(window.native);
        state.ops.push(Op::ShowWindow(window.native));
    }

    fn destroy_window(&mut self, window: HeadlessWindow) {
        let _call = self.enter("destroy_window");
        let mut state = self.control.lock();
        if !state.windows.remove(&window.native) {
            state.violation(format!("window {} destroyed but it does not exist", window.native));
        }
        if state.contexts.values().any(|w| *w == window.native) {
            state.violation(format!("window {} destroyed before its context", window.native));
        }
        state.ops.push(Op::DestroyWindow(window.native));
    }

    fn poll_event(&mut self) -> Option<NativeEvent> {
        let _call = self.enter("poll_event");
        self.control.lock().events.pop_front()
    }

    fn create_context(&mut self, window: &HeadlessWindow) -> Result<HeadlessContext, BackendError> {
        let _call = self.enter("create_context");
        let mut state = self.control.lock();
        if let Some(reason) = state.fail_contexts.pop_front() {
            return Err(BackendError::context(reason));
        }
        state.contexts.insert(window.native, window.native);
        state.ops.push(Op::CreateContext(window.native));
        Ok(HeadlessContext {
            window: window.native,
            _not_send: PhantomData,
        })
    }

    fn attach_context(&mut self, window: &HeadlessWindow, context: &HeadlessContext) -> Result<(), BackendError> {
        let _call = self.enter("attach_context");
        let mut state = self.control.lock();
        if context.window != window.native {
            return Err(BackendError::new(
                BackendErrorKind::Attach,
                format!("context of {} used with window {}", context.window, window.native),
            ));
        }
        state.current = Some(window.native);
        state.ops.push(Op::AttachContext(window.native));
        Ok(())
    }

    fn destroy_context(&mut self, context: HeadlessContext) {
        let _call = self.enter("destroy_context");
        let mut state = self.control.lock();
        if state.contexts.remove(&context.window).is_none() {
            state.violation(format!("context of {} destroyed twice", context.window));
        }
        if state.current == Some(context.window) {
            state.current = None;
        }
        state.ops.push(Op::DestroyContext(context.window));
    }

    fn swap_buffers(&mut self, window: &HeadlessWindow, _context: &HeadlessContext) -> Result<(), BackendError> {
        let _call = self.enter("swap_buffers");
        let mut state = self.control.lock();
        if state.fail_swaps {
            return Err(BackendError::new(BackendErrorKind::Swap, "swap refused"));
        }
        if state.current != Some(window.native) {
            state.violation(format!("swap on {} without its context current", window.native));
        }
        *state.swaps.entry(window.native).or_default() += 1;
        state.ops.push(Op::SwapBuffers(window.native));
        Ok(())
    }
}
