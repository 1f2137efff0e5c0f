//SPDX-License-Identifier: MPL-2.0
/*!
Cooperative shutdown.

[`Liveness`] is the process-wide "keep going" flag.  It flips to false exactly once and is
polled by owner loops and tickers; nothing is interrupted mid-work.

A [`Potential`] is a yes/no question a scheduler asks before issuing the next impulse.
*/

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::registry::Registry;

#[derive(Debug, Clone)]
pub struct Liveness {
    alive: Arc<AtomicBool>,
}

impl Default for Liveness {
    fn default() -> Self {
        Liveness {
            alive: Arc::new(AtomicBool::new(true)),
        }
    }
}

impl Liveness {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /**
    Requests shutdown.

    Returns true for the call that actually flipped the flag.
    */
    pub fn shutdown(&self) -> bool {
        let was_alive = self.alive.swap(false, Ordering::AcqRel);
        if was_alive {
            logwise::info_sync!("shutdown requested");
        }
        was_alive
    }
}

/// A predicate polled by an external scheduler.
pub trait Potential: Send + Sync {
    fn holds(&self) -> bool;
}

impl<F> Potential for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn holds(&self) -> bool {
        self()
    }
}

/// Holds once every window in the registry has been closed.
#[derive(Debug, Clone)]
pub struct HasNoWindows(pub Arc<Registry>);

impl Potential for HasNoWindows {
    fn holds(&self) -> bool {
        self.0.is_quiescent()
    }
}

/// Holds once shutdown has been requested.
#[derive(Debug, Clone)]
pub struct ShutdownRequested(pub Liveness);

impl Potential for ShutdownRequested {
    fn holds(&self) -> bool {
        !self.0.is_alive()
    }
}

/// Holds when either side holds.
#[derive(Debug, Clone)]
pub struct Either<A, B>(pub A, pub B);

impl<A: Potential, B: Potential> Potential for Either<A, B> {
    fn holds(&self) -> bool {
        self.0.holds() || self.1.holds()
    }
}
