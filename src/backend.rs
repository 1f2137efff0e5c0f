//SPDX-License-Identifier: MPL-2.0
/*!
The capability set a native windowing/graphics binding must provide.

Every method is called on the owner thread only, one call at a time, so implementations may
use thread-affine native APIs freely and need not be `Send`.
*/

use crate::coordinates::WindowSpec;
use crate::error::BackendError;

/// Keys the core cares about.  Everything else is passed through as the backend's raw code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Escape,
    Other(u32),
}

/// A native event, already translated out of backend-specific event codes.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum NativeEvent {
    /// The user (or window manager) asked to close the window.
    CloseRequested { native: u64 },
    /// The native window went away without being asked to.
    Destroyed { native: u64 },
    KeyPressed { native: u64, key: Key },
    Resized { native: u64, width: u32, height: u32 },
}

impl NativeEvent {
    pub fn native(&self) -> u64 {
        match self {
            NativeEvent::CloseRequested { native }
            | NativeEvent::Destroyed { native }
            | NativeEvent::KeyPressed { native, .. }
            | NativeEvent::Resized { native, .. } => *native,
        }
    }
}

pub trait Backend: 'static {
    type Window;
    type Context;

    fn create_window(&mut self, spec: &WindowSpec) -> Result<Self::Window, BackendError>;
    /// The identifier native events use to refer to `window`.
    fn native_id(&self, window: &Self::Window) -> u64;
    fn show_window(&mut self, window: &Self::Window);
    fn destroy_window(&mut self, window: Self::Window);
    /// Returns the next pending event without blocking.
    fn poll_event(&mut self) -> Option<NativeEvent>;

    fn create_context(&mut self, window: &Self::Window) -> Result<Self::Context, BackendError>;
    /// Makes `context` current for `window` on the calling thread.
    fn attach_context(&mut self, window: &Self::Window, context: &Self::Context) -> Result<(), BackendError>;
    fn destroy_context(&mut self, context: Self::Context);
    fn swap_buffers(&mut self, window: &Self::Window, context: &Self::Context) -> Result<(), BackendError>;
}
