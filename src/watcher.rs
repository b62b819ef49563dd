use std::fs::File;
use std::io::{self, Write};
use std::os::fd::AsFd;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, error, info, warn};
use parking_lot::Mutex;

use crate::error::GpioError;
use crate::interrupt::EdgeEvents;
use crate::sys::{self, Wake};

/// Event handle shared by a line's registry entry and its watcher thread.
/// Taking the inner value closes the handle.
pub type SharedEvents = Arc<Mutex<Option<Box<dyn EdgeEvents>>>>;

pub type EdgeCallback = Box<dyn FnMut() + Send>;

/// Background thread delivering edges of one line to a callback.
///
/// Dropping the watcher stops it and joins the thread, except when the drop
/// happens on the watcher thread itself (a callback detaching its own line).
pub struct EdgeWatcher {
    line: u8,
    stop: Option<File>,
    handle: Option<JoinHandle<()>>,
}

impl EdgeWatcher {
    pub fn spawn(
        line: u8,
        events: SharedEvents,
        callback: EdgeCallback,
        priority: Option<i32>,
    ) -> Result<Self, GpioError> {
        let (stop_rx, stop_tx) = sys::pipe().map_err(|source| GpioError::Watcher { line, source })?;

        let handle = thread::Builder::new()
            .name(format!("gpio{line}-irq"))
            .spawn(move || {
                if let Some(priority) = priority
                    && let Err(e) = sys::set_realtime_priority(priority)
                {
                    warn!("cannot raise watcher priority for line {line}: {e}");
                }
                run(line, events, stop_rx, callback);
            })
            .map_err(|source| GpioError::Watcher { line, source })?;

        info!("watcher started for line {line}");
        Ok(Self {
            line,
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Asks the thread to leave its loop without waiting for it.
    pub fn signal(&mut self) {
        if let Some(mut stop) = self.stop.take() {
            // a failed write still hangs up the pipe once `stop` drops
            let _ = stop.write_all(&[1]);
        }
    }

    /// Signals the thread and waits for it to leave its loop.
    pub fn stop(&mut self) {
        self.signal();
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                debug!("watcher for line {} stopped from its own callback", self.line);
                return;
            }
            if handle.join().is_err() {
                error!("watcher for line {} panicked", self.line);
            }
            info!("watcher stopped for line {}", self.line);
        }
    }
}

impl Drop for EdgeWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(line: u8, events: SharedEvents, stop: File, mut callback: EdgeCallback) {
    loop {
        {
            let mut guard = events.lock();
            let Some(handle) = guard.as_mut() else {
                debug!("event handle for line {line} closed, watcher exiting");
                return;
            };
            match wait_and_acknowledge(&mut **handle, &stop) {
                Ok(Wake::Stop) => return,
                Ok(Wake::Event) => {}
                Err(e) => {
                    error!("error waiting for interrupt on line {line}: {e}");
                    guard.take();
                    return;
                }
            }
        }
        callback();
    }
}

fn wait_and_acknowledge(events: &mut dyn EdgeEvents, stop: &File) -> io::Result<Wake> {
    let wake = sys::wait_event(events.as_fd(), events.interest(), stop.as_fd())?;
    if wake == Wake::Event {
        events.acknowledge()?;
    }
    Ok(wake)
}
