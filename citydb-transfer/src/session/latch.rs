//! Counter of in-flight units of work.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

/// Counts accepted units of work until they finish.
#[derive(Debug, Default)]
pub(crate) struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

impl InFlight {
    /// Count one more unit; the returned guard counts it down when dropped,
    /// whether the unit ran, failed, panicked or was never run.
    pub(crate) fn enter(self: &Arc<Self>) -> InFlightGuard {
        *self.count.lock() += 1;
        InFlightGuard {
            latch: Arc::clone(self),
        }
    }

    /// Number of units not yet finished.
    pub(crate) fn current(&self) -> usize {
        *self.count.lock()
    }

    /// Block until every counted unit has finished.
    pub(crate) fn wait_idle(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.idle.wait(&mut count);
        }
    }

    fn leave(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }
}

/// Decrements the owning [`InFlight`] on drop.
#[derive(Debug)]
pub(crate) struct InFlightGuard {
    latch: Arc<InFlight>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.latch.leave();
    }
}
