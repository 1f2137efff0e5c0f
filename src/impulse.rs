//SPDX-License-Identifier: MPL-2.0
/*!
Periodic impulses.

A [`Tick`] describes one impulse.  [`Ticker`] is a small scheduler thread that issues ticks at
a [`Frequency`] which can be changed while it runs.
*/

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use atomic_float::AtomicF64;

use crate::shutdown::{Liveness, Potential};

/// One impulse from a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    beat: u64,
    moment: Instant,
    period: Duration,
}

impl Tick {
    pub fn new(beat: u64, moment: Instant, period: Duration) -> Self {
        Tick {
            beat,
            moment,
            period,
        }
    }

    /// Zero-based count of impulses issued by the scheduler so far.
    #[inline] pub fn beat(&self) -> u64 { self.beat }
    /// When the impulse was issued.
    #[inline] pub fn moment(&self) -> Instant { self.moment }
    /// The scheduler's period at the time of this impulse.
    #[inline] pub fn period(&self) -> Duration { self.period }
}

/**
An impulse rate in hertz, shared by reference.

Clones observe each other's updates.  A rate that is not a positive finite number pauses the
scheduler.
*/
#[derive(Debug, Clone)]
pub struct Frequency(Arc<AtomicF64>);

const PAUSED_RECHECK: Duration = Duration::from_millis(10);

impl Frequency {
    pub fn new(hertz: f64) -> Self {
        Frequency(Arc::new(AtomicF64::new(hertz)))
    }

    #[inline]
    pub fn hertz(&self) -> f64 {
        self.0.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set(&self, hertz: f64) {
        self.0.store(hertz, Ordering::Relaxed)
    }

    /// `None` while paused, or when the rate is too small for its period to fit a [`Duration`].
    pub fn period(&self) -> Option<Duration> {
        let hz = self.hertz();
        if hz.is_finite() && hz > 0.0 {
            Duration::try_from_secs_f64(1.0 / hz).ok()
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct TickerConfig {
    pub name: String,
    pub frequency: Frequency,
    pub muted: bool,
}

impl TickerConfig {
    pub fn new(name: impl Into<String>, frequency: Frequency) -> Self {
        TickerConfig {
            name: name.into(),
            frequency,
            muted: false,
        }
    }

    pub fn muted(mut self, muted: bool) -> Self {
        self.muted = muted;
        self
    }
}

/**
Issues ticks on its own thread until `stop` holds or liveness is lost.

While muted the ticker keeps time but skips the impulse callback.
*/
#[derive(Debug)]
pub struct Ticker {
    muted: Arc<AtomicBool>,
    frequency: Frequency,
    thread: Option<JoinHandle<u64>>,
}

impl Ticker {
    pub fn spawn<P, F>(config: TickerConfig, liveness: Liveness, stop: P, mut impulse: F) -> std::io::Result<Ticker>
    where
        P: Potential + 'static,
        F: FnMut(&Tick) + Send + 'static,
    {
        let muted = Arc::new(AtomicBool::new(config.muted));
        let thread_muted = muted.clone();
        let frequency = config.frequency.clone();
        let thread = std::thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || {
                let mut beat = 0;
                let mut next = Instant::now();
                while liveness.is_alive() && !stop.holds() {
                    let Some(period) = config.frequency.period() else {
                        std::thread::sleep(PAUSED_RECHECK);
                        next = Instant::now();
                        continue;
                    };
                    let now = Instant::now();
                    if next > now {
                        std::thread::sleep(next - now);
                    }
                    let moment = Instant::now();
                    if !thread_muted.load(Ordering::Relaxed) {
                        impulse(&Tick::new(beat, moment, period));
                    }
                    beat += 1;
                    next += period;
                    if next < moment {
                        //fell behind; don't try to catch up with a burst
                        next = moment;
                    }
                }
                let beats = beat as usize;
                logwise::debuginternal_sync!("ticker stopped after {beats} beats", beats = beats);
                beat
            })?;
        Ok(Ticker {
            muted,
            frequency,
            thread: Some(thread),
        })
    }

    pub fn mute(&self) {
        self.muted.store(true, Ordering::Relaxed);
    }

    pub fn unmute(&self) {
        self.muted.store(false, Ordering::Relaxed);
    }

    pub fn frequency(&self) -> &Frequency {
        &self.frequency
    }

    /// Waits for the ticker to stop and returns how many beats it issued.
    pub fn join(mut self) -> u64 {
        self.thread
            .take()
            .map(|t| t.join().unwrap_or(0))
            .unwrap_or(0)
    }
}
