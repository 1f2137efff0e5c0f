//SPDX-License-Identifier: MPL-2.0
/*!
The owner loop: the one thread allowed to touch a backend.

Each iteration drains the bridge, polls native events (then any externally delivered ones),
dispatches them, and parks until more work arrives or the poll interval elapses.
*/

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::Arc;

use crate::backend::{Backend, Key, NativeEvent};
use crate::bridge::BridgeReceiver;
use crate::config::HostConfig;
use crate::coordinates::WindowSpec;
use crate::error::{BackendError, HostError};
use crate::impulse::Tick;
use crate::lifecycle::{Controller, Pulse, Renderer};
use crate::registry::{EntityId, HostId, NativeKey, Registry};
use crate::shutdown::Liveness;

/**
Owner-thread state.  Bridge tasks receive `&mut Owner<B>`.
*/
pub struct Owner<B: Backend> {
    host: HostId,
    backend: B,
    registry: Arc<Registry>,
    windows: HashMap<EntityId, Controller<B>>,
    attached: Option<EntityId>,
    close_all_on_escape: bool,
}

impl<B: Backend> Owner<B> {
    pub(crate) fn new(host: HostId, backend: B, registry: Arc<Registry>, config: &HostConfig) -> Self {
        Owner {
            host,
            backend,
            registry,
            windows: HashMap::new(),
            attached: None,
            close_all_on_escape: config.close_all_on_escape,
        }
    }

    pub fn host(&self) -> HostId {
        self.host
    }

    /// Direct access to the native binding.  Only reachable on the owner thread.
    pub fn backend(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Windows this owner currently holds, oldest first.
    pub fn window_ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self.windows.keys().copied().collect();
        ids.sort();
        ids
    }

    pub(crate) fn open(
        &mut self,
        spec: &WindowSpec,
        renderer: Box<dyn Renderer>,
        pulse: Arc<Pulse>,
    ) -> Result<EntityId, HostError> {
        let controller = Controller::open(&mut self.backend, &self.registry, self.host, spec, renderer, pulse);
        match controller {
            Ok(controller) => {
                let id = controller.id();
                //open leaves the new context current
                self.attached = Some(id);
                if let Some(stale) = self
                    .windows
                    .iter()
                    .find(|(_, c)| c.native() == controller.native())
                    .map(|(id, _)| *id)
                {
                    //the backend recycled a native id; its previous owner is long gone
                    if let Some(c) = self.windows.remove(&stale) {
                        c.lost(&mut self.backend, &self.registry, &mut self.attached);
                    }
                    self.attached = None;
                }
                self.windows.insert(id, controller);
                Ok(id)
            }
            Err(e) => {
                self.attached = None;
                logwise::warn_sync!("window creation failed: {err}", err = logwise::privacy::LogIt(&e));
                Err(e)
            }
        }
    }

    /// Renders the latest coalesced tick for `id`, if any.
    pub(crate) fn frame(&mut self, id: EntityId) {
        let Some(controller) = self.windows.get_mut(&id) else {
            return;
        };
        if let Some(tick) = controller.pulse().take() {
            controller.render(&mut self.backend, &self.registry, &mut self.attached, &tick);
        }
    }

    /// Renders exactly `tick` for `id`.
    pub(crate) fn frame_with(&mut self, id: EntityId, tick: &Tick) {
        if let Some(controller) = self.windows.get_mut(&id) {
            controller.render(&mut self.backend, &self.registry, &mut self.attached, tick);
        }
    }

    /// Tears `id` down.  Unknown ids are ignored.
    pub fn close(&mut self, id: EntityId) {
        if let Some(controller) = self.windows.remove(&id) {
            controller.close(&mut self.backend, &self.registry, &mut self.attached);
        }
    }

    fn lost(&mut self, id: EntityId) {
        if let Some(controller) = self.windows.remove(&id) {
            logwise::warn_sync!("window {id} disappeared", id = logwise::privacy::LogIt(id));
            controller.lost(&mut self.backend, &self.registry, &mut self.attached);
        }
    }

    pub(crate) fn close_all(&mut self) {
        for id in self.window_ids() {
            self.close(id);
        }
    }

    fn resolve(&self, native: u64) -> Option<EntityId> {
        let id = self.registry.lookup(NativeKey {
            host: self.host,
            native,
        })?;
        self.windows.contains_key(&id).then_some(id)
    }

    pub(crate) fn dispatch(&mut self, event: NativeEvent) {
        logwise::debuginternal_sync!("event {event}", event = logwise::privacy::LogIt(&event));
        match event {
            NativeEvent::CloseRequested { native } => {
                if let Some(id) = self.resolve(native) {
                    _ = self.registry.request_close(id);
                    self.close(id);
                }
            }
            NativeEvent::Destroyed { native } => {
                if let Some(id) = self.resolve(native) {
                    self.lost(id);
                }
            }
            NativeEvent::KeyPressed { key: Key::Escape, .. } if self.close_all_on_escape => {
                logwise::info_sync!("escape pressed; closing all windows");
                self.close_all();
            }
            NativeEvent::KeyPressed { .. } | NativeEvent::Resized { .. } => {}
        }
    }
}

/// Flags the host and its owner thread both look at.
#[derive(Debug, Clone)]
pub(crate) struct LoopControl {
    pub liveness: Liveness,
    pub running: Arc<AtomicBool>,
}

impl LoopControl {
    fn keep_going(&self) -> bool {
        self.liveness.is_alive() && self.running.load(Ordering::Acquire)
    }
}

/**
Body of the owner thread.

Reports backend construction on `ready` before entering the loop.  A construction failure is
fatal: nothing is retried and the bridge closes with the thread.
*/
pub(crate) fn run<B, F>(
    host: HostId,
    config: HostConfig,
    registry: Arc<Registry>,
    control: LoopControl,
    mut receiver: BridgeReceiver<Owner<B>>,
    events: Receiver<NativeEvent>,
    factory: F,
    ready: SyncSender<Result<(), BackendError>>,
) where
    B: Backend,
    F: FnOnce() -> Result<B, BackendError>,
{
    let host_number = host.get() as usize;
    let backend = match factory() {
        Ok(backend) => backend,
        Err(e) => {
            logwise::error_sync!(
                "owner loop {host}: backend initialization failed: {err}",
                host = host_number,
                err = logwise::privacy::LogIt(&e)
            );
            _ = ready.send(Err(e));
            return;
        }
    };
    let mut owner = Owner::new(host, backend, registry, &config);
    _ = ready.send(Ok(()));
    logwise::info_sync!("owner loop {host} started", host = host_number);

    loop {
        receiver.drain(&mut owner);
        while let Some(event) = owner.backend.poll_event() {
            owner.dispatch(event);
        }
        while let Ok(event) = events.try_recv() {
            owner.dispatch(event);
        }
        if !control.keep_going() && receiver.is_idle() {
            break;
        }
        receiver.wait(config.poll_interval);
    }

    let remaining = owner.windows.len();
    owner.close_all();
    logwise::info_sync!(
        "owner loop {host} stopped; tore down {remaining} windows",
        host = host_number,
        remaining = remaining
    );
    //dropping the receiver cancels anything submitted after the last drain
    drop(receiver);
}
