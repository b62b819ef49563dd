use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock, RwLockUpgradableReadGuard};
use rustc_hash::FxHashMap;

use crate::config::EdgeDetect;
use crate::error::GpioError;
use crate::pinmap::PIN_COUNT;
use crate::watcher::{EdgeWatcher, SharedEvents};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineState {
    Detached,
    Attaching,
    Watching,
}

/// Interrupt bookkeeping for one logical line.
pub struct LineEntry {
    pub(crate) state: LineState,
    pub(crate) exported: bool,
    pub(crate) edge: Option<EdgeDetect>,
    pub(crate) events: Option<SharedEvents>,
    pub(crate) watcher: Option<EdgeWatcher>,
}

impl Default for LineEntry {
    fn default() -> Self {
        Self {
            state: LineState::Detached,
            exported: false,
            edge: None,
            events: None,
            watcher: None,
        }
    }
}

impl LineEntry {
    pub fn state(&self) -> LineState {
        match self.state {
            LineState::Watching if !self.watcher.as_ref().is_some_and(EdgeWatcher::is_running) => {
                LineState::Detached
            }
            state => state,
        }
    }

    pub fn edge(&self) -> Option<EdgeDetect> {
        self.edge
    }

    pub fn is_exported(&self) -> bool {
        self.exported
    }

    pub fn events_open(&self) -> bool {
        // a running watcher holds the handle lock for as long as it waits
        self.events
            .as_ref()
            .is_some_and(|e| e.try_lock().is_none_or(|handle| handle.is_some()))
    }

    /// Closes the event handle and forgets the edge. The watcher must already
    /// be gone (see [`lock_idle`]). Returns whether the line was left exported.
    pub(crate) fn reset(&mut self) -> bool {
        debug_assert!(self.watcher.is_none());
        if let Some(events) = self.events.take() {
            events.lock().take();
        }
        self.state = LineState::Detached;
        self.edge = None;
        std::mem::take(&mut self.exported)
    }
}

pub type LineSlot = Arc<Mutex<LineEntry>>;

/// Locks `slot` once it has no watcher.
///
/// Watchers are signalled under the lock but joined with the slot unlocked, so
/// a callback that attaches or detaches its own line can still take the lock
/// meanwhile. A watcher installed during that window is stopped on the next
/// pass.
pub(crate) fn lock_idle(slot: &LineSlot) -> MutexGuard<'_, LineEntry> {
    loop {
        let mut entry = slot.lock();
        let Some(mut watcher) = entry.watcher.take() else {
            return entry;
        };
        entry.state = LineState::Attaching;
        watcher.signal();
        drop(entry);
        watcher.stop();
    }
}

/// Process-wide per-line interrupt state.
///
/// Entries are created on first use and never removed, so a slot handed out
/// by [`LineRegistry::entry`] stays the line's only slot.
#[derive(Default)]
pub struct LineRegistry {
    lines: RwLock<FxHashMap<u8, LineSlot>>, // keyed by logical line
}

impl LineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn check(line: u8) -> Result<(), GpioError> {
        if (line as usize) < PIN_COUNT {
            Ok(())
        } else {
            Err(GpioError::InvalidLine(line))
        }
    }

    pub fn get(&self, line: u8) -> Result<Option<LineSlot>, GpioError> {
        Self::check(line)?;
        Ok(self.lines.read().get(&line).cloned())
    }

    pub fn entry(&self, line: u8) -> Result<LineSlot, GpioError> {
        Self::check(line)?;
        let lines = self.lines.upgradable_read();
        if let Some(slot) = lines.get(&line) {
            return Ok(slot.clone());
        }
        let mut lines = RwLockUpgradableReadGuard::upgrade(lines);
        Ok(lines.entry(line).or_default().clone())
    }

    /// Resets a line's entry; returns whether it was left exported.
    pub fn clear(&self, line: u8) -> Result<bool, GpioError> {
        Ok(match self.get(line)? {
            Some(slot) => lock_idle(&slot).reset(),
            None => false,
        })
    }

    pub fn lines(&self) -> Vec<u8> {
        let mut lines: Vec<u8> = self.lines.read().keys().copied().collect();
        lines.sort_unstable();
        lines
    }
}
