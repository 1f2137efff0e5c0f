//SPDX-License-Identifier: MPL-2.0

/*!
Drive thread-affine windowing and graphics backends from anywhere.

Native windowing layers (X11, EGL, GLX, SDL video, most OpenGL drivers) insist that a window
and its rendering context are only touched from the thread that created them.  Applications,
on the other hand, want to open windows and request frames from whatever thread they happen to
be on: a frame scheduler, an input thread, application logic.

This crate sits in between:
* A [`bridge::Bridge`] carries closures to an owner thread and (optionally) waits for them.
  All work submitted to one owner thread runs one at a time, in submission order.
* Each [`host::Host`] spawns one owner loop per backend instance.  The loop drains the bridge,
  polls native events, and routes them to the windows it owns.
* A shared [`registry::Registry`] tracks every logical window through
  `Created → Running → CloseRequested → Destroyed`, and knows when none are left.
* [`shutdown::Liveness`] and [`shutdown::Potential`]s let schedulers such as [`impulse::Ticker`]
  know when to stop.

The native binding itself is out of scope; it plugs in through [`backend::Backend`].  A
[`headless::HeadlessBackend`] is included for tests and demos.

# Quick Start

```
use std::sync::Arc;
use std::time::{Duration, Instant};
use window_host::config::HostConfig;
use window_host::coordinates::Size;
use window_host::headless::HeadlessControl;
use window_host::host::Host;
use window_host::impulse::Tick;
use window_host::registry::Registry;
use window_host::shutdown::Liveness;

let display = HeadlessControl::new();
let connect = display.clone();
let host = Host::spawn(HostConfig::default(), Arc::new(Registry::new()), Liveness::new(), move || connect.connect())
    .unwrap();

// The renderer runs on the owner thread with the window's context current
let window = host
    .create_window("My Window", Some(Size::new(800, 600)), None, |tick: &Tick| {
        let _ = tick.beat();
    })
    .unwrap();

// From any thread: request a frame
window.impulse(Tick::new(0, Instant::now(), Duration::from_millis(16))).unwrap();

// Window stays open as long as the handle exists
drop(window);
assert!(host.wait_until_quiescent(Duration::from_secs(5)));
```

# Threading Model

- Every [`backend::Backend`] method runs on its host's owner thread and nowhere else.
- [`host::Host`], [`window::Window`], [`bridge::Bridge`] and [`owner_cell::OwnerCell`] are
  `Send` and may be used from any thread.
- Blocking calls ([`host::Host::create_window`], [`host::Host::stop`], [`bridge::Bridge::submit`])
  refuse to run on the owner thread itself rather than deadlock.
- When the owner loop is gone, waiting callers get [`bridge::BridgeError::Closed`] instead of
  hanging.
*/

/// The execution bridge: run closures on an owner thread.
///
/// # Example
/// ```
/// use window_host::bridge;
///
/// let (bridge, mut receiver) = bridge::channel::<Vec<u32>>();
/// bridge.post("push", |v: &mut Vec<u32>| v.push(1)).unwrap();
///
/// // on the owner thread
/// let mut state = Vec::new();
/// assert_eq!(receiver.drain(&mut state), 1);
/// assert_eq!(state, vec![1]);
/// ```
pub mod bridge;

/// The owner loop and its per-thread state.
pub mod owner_loop;

/// Window identities and lifecycle bookkeeping.
pub mod registry;

/// Renderers, impulse coalescing, and per-window control.
pub mod lifecycle;

/// Process-wide liveness and scheduler stop conditions.
pub mod shutdown;

/// Application-facing host API.
pub mod host;

/// Window handles.
pub mod window;

/// The capability set a native binding provides.
pub mod backend;

/// A display-less backend for tests and demos.
pub mod headless;

/// Ticks and a periodic scheduler.
pub mod impulse;

/// Thread-safe cell for owner-thread-only values.
///
/// This module provides [`owner_cell::OwnerCell`], which allows sharing values across threads
/// while ensuring all access happens on the owner thread that created them.
pub mod owner_cell;

/// Coordinate types for window positioning and sizing.
///
/// # Example
/// ```
/// use window_host::coordinates::{Position, Size};
///
/// let pos = Position::new(100, 200);
/// assert_eq!(pos.x(), 100);
/// assert_eq!(pos.y(), 200);
///
/// let size = Size::new(800, 600);
/// assert_eq!(size.width(), 800);
/// assert_eq!(size.height(), 600);
/// ```
pub mod coordinates;

pub mod config;

pub mod error;

logwise::declare_logging_domain!();
