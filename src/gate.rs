use log::warn;
use parking_lot::{Condvar, Mutex};

static GLOBAL_GATE: InterruptGate = InterruptGate::new();

/// Coarse process-wide "interrupts disabled" flag.
///
/// Unlike a mutex guard, the gate may be released from a different thread
/// than the one that closed it. Watcher threads never consult it; it only
/// serialises code that opts into bracketing critical sections with it.
pub struct InterruptGate {
    held: Mutex<bool>,
    released: Condvar,
}

impl Default for InterruptGate {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptGate {
    pub const fn new() -> Self {
        Self {
            held: Mutex::new(false),
            released: Condvar::new(),
        }
    }

    pub fn global() -> &'static InterruptGate {
        &GLOBAL_GATE
    }

    /// Closes the gate, blocking while someone else holds it.
    pub fn disable(&self) {
        let mut held = self.held.lock();
        while *held {
            self.released.wait(&mut held);
        }
        *held = true;
    }

    pub fn enable(&self) {
        let mut held = self.held.lock();
        if !*held {
            warn!("interrupts enabled while not disabled");
            return;
        }
        *held = false;
        self.released.notify_one();
    }

    pub fn is_disabled(&self) -> bool {
        *self.held.lock()
    }

    pub fn hold(&self) -> GateGuard<'_> {
        self.disable();
        GateGuard { gate: self }
    }
}

pub struct GateGuard<'a> {
    gate: &'a InterruptGate,
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.gate.enable();
    }
}
