//SPDX-License-Identifier: MPL-2.0
use std::sync::Arc;

use crate::backend::Backend;
use crate::bridge::Bridge;
use crate::error::HostError;
use crate::host::{impulse_window, stop_window};
use crate::impulse::Tick;
use crate::lifecycle::{CoalescePolicy, Pulse};
use crate::owner_loop::Owner;
use crate::registry::{EntityId, LifecycleState, Registry};

/**
A logical window.

The window stays open as long as this handle exists, or until it is closed natively.  Use
[`Window::detach`] to keep it open without the handle.
*/
pub struct Window<B: Backend> {
    id: EntityId,
    bridge: Bridge<Owner<B>>,
    registry: Arc<Registry>,
    pulse: Arc<Pulse>,
    coalesce: CoalescePolicy,
    attached: bool,
}

impl<B: Backend> Window<B> {
    pub(crate) fn new(
        id: EntityId,
        bridge: Bridge<Owner<B>>,
        registry: Arc<Registry>,
        pulse: Arc<Pulse>,
        coalesce: CoalescePolicy,
    ) -> Self {
        Window {
            id,
            bridge,
            registry,
            pulse,
            coalesce,
            attached: true,
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    /// `None` once the window is gone.
    pub fn state(&self) -> Option<LifecycleState> {
        self.registry.state(self.id)
    }

    pub fn is_open(&self) -> bool {
        self.state().is_some()
    }

    /**
    Requests a frame.

    Returns as soon as the frame is queued.  Fails with [`HostError::UnknownWindow`] once the
    window has been closed.
    */
    pub fn impulse(&self, tick: Tick) -> Result<(), HostError> {
        impulse_window(&self.bridge, &self.registry, &self.pulse, self.coalesce, self.id, tick)
    }

    /// Closes the window and waits for its teardown.  On the owner thread the teardown is queued instead.
    pub fn stop(mut self) -> Result<(), HostError> {
        self.attached = false;
        stop_window(&self.bridge, &self.registry, self.id)
    }

    /// Lets the window outlive this handle.  Returns its id for use with the host.
    pub fn detach(mut self) -> EntityId {
        self.attached = false;
        self.id
    }

    pub fn frames_rendered(&self) -> u64 {
        self.pulse.frames_rendered()
    }

    pub fn impulses_coalesced(&self) -> u64 {
        self.pulse.impulses_coalesced()
    }
}

impl<B: Backend> std::fmt::Debug for Window<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Window")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

impl<B: Backend> Drop for Window<B> {
    fn drop(&mut self) {
        if !self.attached {
            return;
        }
        //only the first close request schedules teardown
        if self.registry.request_close(self.id) != Ok(true) {
            return;
        }
        let id = self.id;
        //may run on the owner thread itself, so never block here
        if self
            .bridge
            .post(format!("drop window {id}"), move |owner: &mut Owner<B>| owner.close(id))
            .is_err()
        {
            logwise::debuginternal_sync!("window {id} dropped after its owner loop", id = logwise::privacy::LogIt(id));
        }
    }
}
