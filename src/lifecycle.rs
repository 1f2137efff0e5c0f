//SPDX-License-Identifier: MPL-2.0
/*!
Per-window lifecycle: `Created → Running → CloseRequested → Destroyed`.

The app-facing half is [`Pulse`], which turns impulses into frame work on the bridge.  The
owner-facing half is [`Controller`], which holds the native handles and the renderer and is
only ever touched on the owner thread.
*/

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::backend::Backend;
use crate::bridge::panic_message;
use crate::coordinates::WindowSpec;
use crate::error::HostError;
use crate::impulse::Tick;
use crate::registry::{EntityId, HostId, LifecycleState, NativeKey, Registry};

/**
The rendering collaborator.

All three methods run on the owner thread with the window's context attached.
*/
pub trait Renderer: Send + 'static {
    fn initialize(&mut self) {}
    fn update(&mut self, tick: &Tick);
    fn cleanup(&mut self) {}
}

impl<F> Renderer for F
where
    F: FnMut(&Tick) + Send + 'static,
{
    fn update(&mut self, tick: &Tick) {
        self(tick)
    }
}

/// What to do with an impulse that arrives while the previous frame is still queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoalescePolicy {
    /// Replace the queued frame's tick; at most one frame per window is in flight.
    #[default]
    LatestWins,
    /// Queue a frame for every impulse.
    QueueAll,
}

#[derive(Debug, Default)]
struct PulseSlot {
    pending: Option<Tick>,
    scheduled: bool,
}

/**
Impulse bookkeeping shared between schedulers and the owner thread.
*/
#[derive(Debug, Default)]
pub struct Pulse {
    slot: Mutex<PulseSlot>,
    coalesced: AtomicU64,
    rendered: AtomicU64,
}

impl Pulse {
    pub fn new() -> Self {
        Self::default()
    }

    /**
    Records `tick` as the next frame to render.

    Returns true if the caller must schedule a frame task; false if one is already queued and
    will pick this tick up.
    */
    pub(crate) fn offer(&self, tick: Tick) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.pending.replace(tick).is_some() {
            self.coalesced.fetch_add(1, Ordering::Relaxed);
        }
        if slot.scheduled {
            false
        } else {
            slot.scheduled = true;
            true
        }
    }

    /// Takes the latest tick and re-arms scheduling.  Owner thread.
    pub(crate) fn take(&self) -> Option<Tick> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.scheduled = false;
        slot.pending.take()
    }

    /// Undoes an [`Pulse::offer`] whose frame task could not be enqueued.
    pub(crate) fn withdraw(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.scheduled = false;
        slot.pending = None;
    }

    /// Impulses that replaced a not-yet-rendered tick.
    pub fn impulses_coalesced(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }

    pub fn frames_rendered(&self) -> u64 {
        self.rendered.load(Ordering::Relaxed)
    }
}

/// Runs a renderer callback, keeping a panic from unwinding into the owner loop.
fn guarded(id: EntityId, what: &str, f: impl FnOnce()) -> Result<(), String> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let message = panic_message(payload.as_ref());
        logwise::error_sync!(
            "window {id}: renderer {what} panicked: {message}",
            id = logwise::privacy::LogIt(id),
            what = what.to_owned(),
            message = message.clone()
        );
        message
    })
}

/**
Owner-thread state for one window.
*/
pub struct Controller<B: Backend> {
    id: EntityId,
    native: NativeKey,
    window: B::Window,
    context: B::Context,
    renderer: Box<dyn Renderer>,
    pulse: std::sync::Arc<Pulse>,
}

impl<B: Backend> Controller<B> {
    /**
    Brings a window all the way to `Running`.

    On any failure the native resources created so far are released and the window is never
    shown.
    */
    pub(crate) fn open(
        backend: &mut B,
        registry: &Registry,
        host: HostId,
        spec: &WindowSpec,
        mut renderer: Box<dyn Renderer>,
        pulse: std::sync::Arc<Pulse>,
    ) -> Result<Self, HostError> {
        let window = backend.create_window(spec).map_err(HostError::WindowCreation)?;
        let context = match backend.create_context(&window) {
            Ok(context) => context,
            Err(e) => {
                backend.destroy_window(window);
                return Err(HostError::ContextCreation(e));
            }
        };
        if let Err(e) = backend.attach_context(&window, &context) {
            backend.destroy_context(context);
            backend.destroy_window(window);
            return Err(HostError::ContextCreation(e));
        }
        let native = NativeKey {
            host,
            native: backend.native_id(&window),
        };
        let id = registry.register(native, spec.title.clone());
        if let Err(message) = guarded(id, "initialize", || renderer.initialize()) {
            backend.destroy_context(context);
            backend.destroy_window(window);
            registry.evict(id);
            return Err(HostError::RendererPanicked(message));
        }
        if registry.mark_running(id).is_err() {
            //a close raced with creation; the registry already dropped us
            logwise::warn_sync!("window {id} closed during creation", id = logwise::privacy::LogIt(id));
        }
        backend.show_window(&window);
        let native_number = native.native as usize;
        let entity = id.get() as usize;
        logwise::info_sync!(
            "window [{native}.{id}] created",
            native = native_number,
            id = entity
        );
        Ok(Controller {
            id,
            native,
            window,
            context,
            renderer,
            pulse,
        })
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn native(&self) -> NativeKey {
        self.native
    }

    pub(crate) fn pulse(&self) -> &Pulse {
        &self.pulse
    }

    /// Makes this window's context current unless it already is.
    pub(crate) fn bind(&self, backend: &mut B, attached: &mut Option<EntityId>) -> bool {
        if *attached == Some(self.id) {
            return true;
        }
        match backend.attach_context(&self.window, &self.context) {
            Ok(()) => {
                *attached = Some(self.id);
                true
            }
            Err(e) => {
                logwise::warn_sync!(
                    "window {id}: attach failed: {err}",
                    id = logwise::privacy::LogIt(self.id),
                    err = logwise::privacy::LogIt(e)
                );
                *attached = None;
                false
            }
        }
    }

    /**
    Renders one frame: bind, update, swap.

    Does nothing unless the window is `Running`.
    */
    pub(crate) fn render(&mut self, backend: &mut B, registry: &Registry, attached: &mut Option<EntityId>, tick: &Tick) {
        if registry.state(self.id) != Some(LifecycleState::Running) {
            return;
        }
        if !self.bind(backend, attached) {
            return;
        }
        let renderer = &mut self.renderer;
        if guarded(self.id, "update", || renderer.update(tick)).is_err() {
            return;
        }
        match backend.swap_buffers(&self.window, &self.context) {
            Ok(()) => {
                self.pulse.rendered.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                logwise::warn_sync!(
                    "window {id}: swap failed: {err}",
                    id = logwise::privacy::LogIt(self.id),
                    err = logwise::privacy::LogIt(e)
                );
            }
        }
    }

    /// Cleanup, destroy the context, destroy the window, evict.
    pub(crate) fn close(self, backend: &mut B, registry: &Registry, attached: &mut Option<EntityId>) {
        self.release(backend, registry, attached, true);
    }

    /// Like [`Controller::close`] for a window whose native resource has already disappeared.
    pub(crate) fn lost(self, backend: &mut B, registry: &Registry, attached: &mut Option<EntityId>) {
        self.release(backend, registry, attached, false);
    }

    fn release(mut self, backend: &mut B, registry: &Registry, attached: &mut Option<EntityId>, destroy_window: bool) {
        _ = registry.request_close(self.id);
        //cleanup may free context resources, so it wants the context current
        if destroy_window {
            self.bind(backend, attached);
        }
        let renderer = &mut self.renderer;
        _ = guarded(self.id, "cleanup", || renderer.cleanup());
        if *attached == Some(self.id) {
            *attached = None;
        }
        let Controller {
            id,
            native,
            window,
            context,
            ..
        } = self;
        backend.destroy_context(context);
        if destroy_window {
            backend.destroy_window(window);
        } else {
            //the native side is gone already; only our bookkeeping remains
            drop(window);
        }
        registry.evict(id);
        let native_number = native.native as usize;
        let entity = id.get() as usize;
        logwise::info_sync!(
            "window [{native}.{id}] cleaned up",
            native = native_number,
            id = entity
        );
    }
}
