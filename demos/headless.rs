// SPDX-License-Identifier: MPL-2.0
/*!
Opens three headless windows, drives them from a 60Hz ticker, and closes them one by one the
way a user clicking close buttons would.
*/
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use window_host::config::HostConfig;
use window_host::coordinates::{Position, Size};
use window_host::headless::HeadlessControl;
use window_host::host::Host;
use window_host::impulse::{Frequency, Tick, Ticker, TickerConfig};
use window_host::lifecycle::Renderer;
use window_host::registry::Registry;
use window_host::shutdown::{Either, Liveness, ShutdownRequested};

struct Spinner {
    name: String,
    angle: f32,
}

impl Renderer for Spinner {
    fn initialize(&mut self) {
        logwise::info_sync!("{name}: compiling shaders", name = self.name.clone());
    }
    fn update(&mut self, tick: &Tick) {
        self.angle = (self.angle + 90.0 * tick.period().as_secs_f32()) % 360.0;
    }
    fn cleanup(&mut self) {
        logwise::info_sync!(
            "{name}: final angle {angle}",
            name = self.name.clone(),
            angle = format!("{:.1}", self.angle)
        );
    }
}

pub fn main() {
    let display = HeadlessControl::new();
    let connect = display.clone();
    let registry = Arc::new(Registry::new());
    let liveness = Liveness::new();
    let host = Host::spawn(HostConfig::default(), registry.clone(), liveness.clone(), move || connect.connect())
        .expect("headless display");

    let windows: Vec<_> = (0..3)
        .map(|i| {
            let name = format!("spinner {i}");
            host.create_window(
                name.clone(),
                Some(Size::new(320, 240)),
                Some(Position::new(i * 340, 0)),
                Spinner { name, angle: 0.0 },
            )
            .expect("window")
        })
        .collect();
    let windows = Arc::new(windows);

    let driven = windows.clone();
    let ticker = Ticker::spawn(
        TickerConfig::new("demo ticker", Frequency::new(60.0)),
        liveness.clone(),
        Either(host.has_no_windows(), ShutdownRequested(liveness.clone())),
        move |tick: &Tick| {
            for w in driven.iter() {
                _ = w.impulse(*tick);
            }
        },
    )
    .expect("ticker");

    for native in display.natives() {
        thread::sleep(Duration::from_millis(250));
        display.request_close(native);
    }
    host.wait_until_quiescent(Duration::from_secs(5));
    let beats = ticker.join();
    for w in windows.iter() {
        let id = w.id().get() as usize;
        let frames = w.frames_rendered() as usize;
        logwise::info_sync!("window {id} rendered {frames} frames", id = id, frames = frames);
    }
    let beats = beats as usize;
    logwise::info_sync!("ticker issued {beats} beats", beats = beats);
    liveness.shutdown();
    host.join();
}
