use std::io;
use std::os::fd::AsFd;
use std::sync::Arc;

use libc::c_short;
use log::{debug, error, info, warn};
use parking_lot::Mutex;

use crate::config::EdgeDetect;
use crate::error::GpioError;
use crate::registry::{self, LineEntry, LineRegistry, LineState};
use crate::watcher::{EdgeCallback, EdgeWatcher, SharedEvents};

/// An open, pollable event source for one line.
pub trait EdgeEvents: AsFd + Send {
    /// `poll(2)` events that signal a pending edge.
    fn interest(&self) -> c_short;
    /// Clears the edge that woke the poll.
    fn acknowledge(&mut self) -> io::Result<()>;
    /// Discards everything already pending; returns the number of bytes dropped.
    fn drain(&mut self) -> io::Result<usize>;
}

/// Kernel side of interrupt delivery: the sysfs export/configure protocol.
pub trait InterruptBackend: Send + Sync {
    fn export(&self, line: u8) -> Result<(), GpioError>;
    fn set_input(&self, line: u8) -> Result<(), GpioError>;
    fn set_edge(&self, line: u8, edge: EdgeDetect) -> Result<(), GpioError>;
    fn open_events(&self, line: u8) -> Result<Box<dyn EdgeEvents>, GpioError>;
    fn unexport(&self, line: u8) -> Result<(), GpioError>;
}

pub struct InterruptController<K: InterruptBackend> {
    backend: Arc<K>,
    registry: LineRegistry,
    priority: Option<i32>,
}

impl<K: InterruptBackend> InterruptController<K> {
    pub fn new(backend: Arc<K>, priority: Option<i32>) -> Self {
        Self {
            backend,
            registry: LineRegistry::new(),
            priority,
        }
    }

    pub fn registry(&self) -> &LineRegistry {
        &self.registry
    }

    /// Starts delivering `edge` interrupts of `line` to `callback`,
    /// replacing any watcher already on the line.
    pub fn attach<F>(&self, line: u8, edge: EdgeDetect, callback: F) -> Result<(), GpioError>
    where
        F: FnMut() + Send + 'static,
    {
        let slot = self.registry.entry(line)?;
        let mut entry = registry::lock_idle(&slot);
        entry.state = LineState::Attaching;

        match self.start(line, edge, &mut entry, Box::new(callback)) {
            Ok(()) => {
                entry.state = LineState::Watching;
                entry.edge = Some(edge);
                info!("line {line} watching {edge} edges");
                Ok(())
            }
            Err(e) => {
                entry.state = LineState::Detached;
                entry.edge = None;
                error!("attach failed for line {line}: {e}");
                Err(e)
            }
        }
    }

    fn start(
        &self,
        line: u8,
        edge: EdgeDetect,
        entry: &mut LineEntry,
        callback: EdgeCallback,
    ) -> Result<(), GpioError> {
        self.backend.export(line)?;
        entry.exported = true;
        self.backend.set_input(line)?;
        self.backend.set_edge(line, edge)?;

        let events = self.events_for(line, entry)?;
        if let Some(handle) = events.lock().as_mut() {
            match handle.drain() {
                Ok(0) => {}
                Ok(n) => debug!("discarded {n} pending bytes on line {line}"),
                Err(e) => warn!("failed to clear pending interrupt on line {line}: {e}"),
            }
        }

        entry.watcher = Some(EdgeWatcher::spawn(line, events, callback, self.priority)?);
        Ok(())
    }

    /// The entry's open handle, or a freshly opened one. A handle still held
    /// by a retiring watcher is left to that watcher, which closes it on exit.
    fn events_for(&self, line: u8, entry: &mut LineEntry) -> Result<SharedEvents, GpioError> {
        if let Some(events) = &entry.events
            && Arc::strong_count(events) == 1
            && events.lock().is_some()
        {
            return Ok(events.clone());
        }
        let events: SharedEvents = Arc::new(Mutex::new(Some(self.backend.open_events(line)?)));
        entry.events = Some(events.clone());
        Ok(events)
    }

    /// Stops the line's watcher, closes its event handle and unexports it.
    /// Lines that were never attached are left alone.
    pub fn detach(&self, line: u8) -> Result<(), GpioError> {
        if self.registry.get(line)?.is_none() {
            debug!("detach on line {line} with no interrupt attached");
            return Ok(());
        }
        if self.registry.clear(line)? {
            self.backend.unexport(line)?;
            info!("line {line} detached");
        }
        Ok(())
    }

    pub fn line_state(&self, line: u8) -> Result<LineState, GpioError> {
        Ok(match self.registry.get(line)? {
            Some(slot) => slot.lock().state(),
            None => LineState::Detached,
        })
    }

    pub fn active_watchers(&self) -> usize {
        self.registry
            .lines()
            .into_iter()
            .filter(|&line| matches!(self.line_state(line), Ok(LineState::Watching)))
            .count()
    }

    /// Detaches every line, continuing past failures; returns the first error.
    pub fn shutdown(&self) -> Result<(), GpioError> {
        let mut first = None;
        for line in self.registry.lines() {
            if let Err(e) = self.detach(line) {
                error!("detach failed for line {line}: {e}");
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }
}

impl<K: InterruptBackend> Drop for InterruptController<K> {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}
