//SPDX-License-Identifier: MPL-2.0
/*!
The application-facing surface: one [`Host`] per backend instance.
*/

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::backend::{Backend, NativeEvent};
use crate::bridge::{self, Bridge, BridgeError, Dispatcher};
use crate::config::HostConfig;
use crate::coordinates::{Position, Size, WindowSpec};
use crate::error::{BackendError, HostError};
use crate::impulse::Tick;
use crate::lifecycle::{CoalescePolicy, Pulse, Renderer};
use crate::owner_loop::{self, LoopControl, Owner};
use crate::registry::{EntityId, HostId, Registry};
use crate::shutdown::{HasNoWindows, Liveness};
use crate::window::Window;

/**
Hands native events to an owner loop from another thread.

For backends whose events arrive on a dedicated blocking wait loop rather than through
[`Backend::poll_event`].
*/
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: Sender<NativeEvent>,
}

impl EventSink {
    /// Fails once the owner loop has stopped.
    pub fn deliver(&self, event: NativeEvent) -> Result<(), BridgeError> {
        self.sender.send(event).map_err(|_| BridgeError::Closed)
    }
}

/**
Owns an owner loop and everything needed to talk to it.

Dropping a host stops its loop, tears down its windows, and waits for the thread.
*/
pub struct Host<B: Backend> {
    id: HostId,
    bridge: Bridge<Owner<B>>,
    registry: Arc<Registry>,
    control: LoopControl,
    config: HostConfig,
    events: EventSink,
    pulses: Mutex<HashMap<EntityId, Arc<Pulse>>>,
    thread: Option<JoinHandle<()>>,
}

impl<B: Backend> std::fmt::Debug for Host<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("id", &self.id)
            .field("bridge", &self.bridge)
            .finish()
    }
}

impl<B: Backend> Host<B> {
    /**
    Starts an owner thread and constructs the backend on it.

    `factory` runs on the new thread, since native connections are bound to the thread that
    makes them.  If it fails the error comes back as [`HostError::Fatal`] and no loop runs.
    */
    pub fn spawn<F>(config: HostConfig, registry: Arc<Registry>, liveness: Liveness, factory: F) -> Result<Self, HostError>
    where
        F: FnOnce() -> Result<B, BackendError> + Send + 'static,
    {
        let id = HostId::next();
        let (bridge, receiver) = bridge::channel::<Owner<B>>();
        let (event_sender, event_receiver) = mpsc::channel();
        let (ready_sender, ready_receiver) = mpsc::sync_channel(1);
        let control = LoopControl {
            liveness,
            running: Arc::new(AtomicBool::new(true)),
        };
        let thread_registry = registry.clone();
        let thread_control = control.clone();
        let thread_config = config.clone();
        let thread = std::thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || {
                owner_loop::run(
                    id,
                    thread_config,
                    thread_registry,
                    thread_control,
                    receiver,
                    event_receiver,
                    factory,
                    ready_sender,
                )
            })?;
        match ready_receiver.recv() {
            Ok(Ok(())) => Ok(Host {
                id,
                bridge,
                registry,
                control,
                config,
                events: EventSink {
                    sender: event_sender,
                },
                pulses: Mutex::new(HashMap::new()),
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                _ = thread.join();
                Err(HostError::Fatal(e))
            }
            Err(_) => {
                //the factory panicked before reporting
                _ = thread.join();
                Err(HostError::Fatal(BackendError::connect("owner thread died during initialization")))
            }
        }
    }

    pub fn id(&self) -> HostId {
        self.id
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn liveness(&self) -> &Liveness {
        &self.control.liveness
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn event_sink(&self) -> EventSink {
        self.events.clone()
    }

    pub fn dispatcher(&self) -> Dispatcher {
        self.bridge.dispatcher()
    }

    /**
    Creates, shows, and starts a window.

    Blocks until the owner thread has bound its context and run the renderer's `initialize`.
    A window that fails anywhere along the way is never shown.
    */
    pub fn create_window<R: Renderer>(
        &self,
        title: impl Into<String>,
        size: Option<Size>,
        position: Option<Position>,
        renderer: R,
    ) -> Result<Window<B>, HostError> {
        let spec = WindowSpec::windowed(title, size.unwrap_or(self.config.default_size), position);
        self.open(spec, Box::new(renderer))
    }

    /// Creates a window covering the whole display.
    pub fn create_fullscreen_window<R: Renderer>(&self, title: impl Into<String>, renderer: R) -> Result<Window<B>, HostError> {
        let spec = WindowSpec::fullscreen(title, self.config.default_size);
        self.open(spec, Box::new(renderer))
    }

    fn open(&self, spec: WindowSpec, renderer: Box<dyn Renderer>) -> Result<Window<B>, HostError> {
        if !self.control.liveness.is_alive() {
            return Err(HostError::ShuttingDown);
        }
        let pulse = Arc::new(Pulse::new());
        let owner_pulse = pulse.clone();
        let label = format!("create window {}", spec.title);
        let id = self
            .bridge
            .submit(label, move |owner: &mut Owner<B>| owner.open(&spec, renderer, owner_pulse))??;
        self.pulses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, pulse.clone());
        Ok(Window::new(
            id,
            self.bridge.clone(),
            self.registry.clone(),
            pulse,
            self.config.coalesce,
        ))
    }

    /**
    Closes `id`: renderer cleanup, context and window destroyed, entry evicted.

    Returns once the window is gone.  Stopping a window that is already gone is a no-op.
    Called on the owner thread, the teardown is queued behind the current task instead.
    */
    pub fn stop(&self, id: EntityId) -> Result<(), HostError> {
        stop_window(&self.bridge, &self.registry, id)?;
        self.forget(id);
        Ok(())
    }

    /**
    Requests a frame for `id`.  Never waits for the frame itself.
    */
    pub fn impulse(&self, id: EntityId, tick: Tick) -> Result<(), HostError> {
        let pulse = self
            .pulses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned();
        let Some(pulse) = pulse else {
            return Err(HostError::UnknownWindow(id));
        };
        let r = impulse_window(&self.bridge, &self.registry, &pulse, self.config.coalesce, id, tick);
        if matches!(r, Err(HostError::UnknownWindow(_))) {
            self.forget(id);
        }
        r
    }

    fn forget(&self, id: EntityId) {
        self.pulses.lock().unwrap_or_else(PoisonError::into_inner).remove(&id);
    }

    /// True when no live windows remain in the registry (across every host sharing it).
    pub fn quiescent(&self) -> bool {
        self.registry.is_quiescent()
    }

    pub fn live_count(&self) -> usize {
        self.registry.live_count()
    }

    /// A potential that holds once every window is closed.
    pub fn has_no_windows(&self) -> HasNoWindows {
        HasNoWindows(self.registry.clone())
    }

    pub fn wait_until_quiescent(&self, timeout: Duration) -> bool {
        self.registry.wait_quiescent(timeout)
    }

    /// Runs `f` on the owner thread and waits for it.
    pub fn submit<R, F>(&self, label: impl Into<String>, f: F) -> Result<R, BridgeError>
    where
        R: Send + 'static,
        F: FnOnce(&mut Owner<B>) -> R + Send + 'static,
    {
        self.bridge.submit(label, f)
    }

    pub fn submit_timeout<R, F>(&self, label: impl Into<String>, timeout: Duration, f: F) -> Result<R, BridgeError>
    where
        R: Send + 'static,
        F: FnOnce(&mut Owner<B>) -> R + Send + 'static,
    {
        self.bridge.submit_timeout(label, timeout, f)
    }

    pub fn submit_async<L, R, F>(&self, label: L, f: F) -> impl Future<Output = Result<R, BridgeError>> + use<B, L, R, F>
    where
        L: Into<String>,
        R: Send + 'static,
        F: FnOnce(&mut Owner<B>) -> R + Send + 'static,
    {
        self.bridge.submit_async(label, f)
    }

    /// Enqueues `f` on the owner thread without waiting.
    pub fn post<F>(&self, label: impl Into<String>, f: F) -> Result<(), BridgeError>
    where
        F: FnOnce(&mut Owner<B>) + Send + 'static,
    {
        self.bridge.post(label, f)
    }

    /**
    Stops this host's loop without touching the process-wide liveness flag.

    Remaining windows are torn down on the owner thread before it exits.
    */
    pub fn stop_loop(&self) {
        self.control.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        !self.bridge.is_closed()
    }

    /// Stops the loop and waits for the owner thread to finish.
    pub fn join(mut self) {
        self.stop_loop();
        self.join_thread();
    }

    fn join_thread(&mut self) {
        if let Some(thread) = self.thread.take() {
            if self.bridge.is_owner_thread() {
                //can't join ourselves; the loop exits on its own after this task
                return;
            }
            if thread.join().is_err() {
                let host = self.id.get() as usize;
                logwise::error_sync!("owner thread {host} panicked", host = host);
            }
        }
    }
}

impl<B: Backend> Drop for Host<B> {
    fn drop(&mut self) {
        self.stop_loop();
        self.join_thread();
    }
}

pub(crate) fn stop_window<B: Backend>(bridge: &Bridge<Owner<B>>, registry: &Registry, id: EntityId) -> Result<(), HostError> {
    //the owner thread can't wait on itself
    let on_owner = bridge.is_owner_thread();
    match registry.request_close(id) {
        Ok(_) => {}
        Err(_) => {
            logwise::debuginternal_sync!("stop: {id} already gone", id = logwise::privacy::LogIt(id));
            return Ok(());
        }
    }
    let label = format!("stop {id}");
    let close = move |owner: &mut Owner<B>| owner.close(id);
    let r = if on_owner { bridge.post(label, close) } else { bridge.submit(label, close) };
    match r {
        //if the loop is gone it already tore everything down
        Ok(()) | Err(BridgeError::Closed) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn impulse_window<B: Backend>(
    bridge: &Bridge<Owner<B>>,
    registry: &Registry,
    pulse: &Arc<Pulse>,
    policy: CoalescePolicy,
    id: EntityId,
    tick: Tick,
) -> Result<(), HostError> {
    if registry.state(id).is_none() {
        return Err(HostError::UnknownWindow(id));
    }
    match policy {
        CoalescePolicy::LatestWins => {
            if pulse.offer(tick) {
                if let Err(e) = bridge.post(format!("frame {id}"), move |owner: &mut Owner<B>| owner.frame(id)) {
                    pulse.withdraw();
                    return Err(e.into());
                }
            }
            Ok(())
        }
        CoalescePolicy::QueueAll => {
            bridge.post(format!("frame {id}"), move |owner: &mut Owner<B>| owner.frame_with(id, &tick))?;
            Ok(())
        }
    }
}
