use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use libc::{c_short, POLLIN};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::config::EdgeDetect;
use crate::error::{GpioError, KernelOp};
use crate::gpio::{Level, PinMode, RegisterDriver, SpiBus};
use crate::interrupt::{EdgeEvents, InterruptBackend};
use crate::sys;

/// One step of the kernel protocol as seen by [`MockInterruptBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysfsCall {
    Export(u8),
    Direction(u8),
    Edge(u8, EdgeDetect),
    Open(u8),
    Unexport(u8),
}

/// In-memory interrupt backend. Each opened line gets a pipe; writing to
/// its far end through [`MockInterruptBackend::trigger`] raises an edge.
#[derive(Default)]
pub struct MockInterruptBackend {
    state: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    calls: Vec<SysfsCall>,
    failing: FxHashSet<KernelOp>,
    injectors: FxHashMap<u8, File>, // write end, keyed by line
    stale: FxHashMap<u8, usize>,
    acks: FxHashMap<u8, Arc<AtomicUsize>>,
}

impl MockInterruptBackend {
    fn record(&self, call: SysfsCall, op: KernelOp, line: u8) -> Result<(), GpioError> {
        let mut state = self.state.lock();
        if state.failing.contains(&op) {
            return Err(GpioError::kernel(
                op,
                line,
                io::Error::from(io::ErrorKind::PermissionDenied),
            ));
        }
        state.calls.push(call);
        Ok(())
    }

    pub fn calls(&self) -> Vec<SysfsCall> {
        self.state.lock().calls.clone()
    }

    /// Makes every later `op` fail with `PermissionDenied`.
    pub fn fail(&self, op: KernelOp) {
        self.state.lock().failing.insert(op);
    }

    pub fn recover(&self, op: KernelOp) {
        self.state.lock().failing.remove(&op);
    }

    /// Queues `count` edges that are already pending when the line is next opened.
    pub fn preload(&self, line: u8, count: usize) {
        self.state.lock().stale.insert(line, count);
    }

    /// Raises one edge. Fails with `NotFound` if the line was never opened
    /// and `BrokenPipe` once its handle has been closed.
    pub fn trigger(&self, line: u8) -> io::Result<()> {
        let mut state = self.state.lock();
        let injector = state
            .injectors
            .get_mut(&line)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("line {line} not open")))?;
        injector.write_all(b"1")
    }

    /// Hangs up the line's pipe so the next wait sees end of file.
    pub fn disconnect(&self, line: u8) {
        self.state.lock().injectors.remove(&line);
    }

    pub fn acknowledged(&self, line: u8) -> usize {
        self.state
            .lock()
            .acks
            .get(&line)
            .map_or(0, |acks| acks.load(Ordering::SeqCst))
    }
}

impl InterruptBackend for MockInterruptBackend {
    fn export(&self, line: u8) -> Result<(), GpioError> {
        self.record(SysfsCall::Export(line), KernelOp::Export, line)
    }

    fn set_input(&self, line: u8) -> Result<(), GpioError> {
        self.record(SysfsCall::Direction(line), KernelOp::Direction, line)
    }

    fn set_edge(&self, line: u8, edge: EdgeDetect) -> Result<(), GpioError> {
        self.record(SysfsCall::Edge(line, edge), KernelOp::Edge, line)
    }

    fn open_events(&self, line: u8) -> Result<Box<dyn EdgeEvents>, GpioError> {
        self.record(SysfsCall::Open(line), KernelOp::Open, line)?;
        let (rx, mut tx) = sys::pipe().map_err(|e| GpioError::kernel(KernelOp::Open, line, e))?;

        let mut state = self.state.lock();
        if let Some(stale) = state.stale.remove(&line) {
            tx.write_all(&vec![b'1'; stale])
                .map_err(|e| GpioError::kernel(KernelOp::Open, line, e))?;
        }
        state.injectors.insert(line, tx);
        let acks = state.acks.entry(line).or_default().clone();
        Ok(Box::new(MockEvents { rx, acks }))
    }

    fn unexport(&self, line: u8) -> Result<(), GpioError> {
        self.record(SysfsCall::Unexport(line), KernelOp::Unexport, line)
    }
}

struct MockEvents {
    rx: File,
    acks: Arc<AtomicUsize>,
}

impl AsFd for MockEvents {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.rx.as_fd()
    }
}

impl EdgeEvents for MockEvents {
    fn interest(&self) -> c_short {
        POLLIN
    }

    fn acknowledge(&mut self) -> io::Result<()> {
        let mut byte = [0u8; 1];
        if self.rx.read(&mut byte)? == 0 {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof));
        }
        self.acks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn drain(&mut self) -> io::Result<usize> {
        let pending = sys::pending_bytes(self.rx.as_fd())?;
        let mut buf = vec![0u8; pending];
        self.rx.read_exact(&mut buf)?;
        Ok(pending)
    }
}

/// Register driver that keeps line levels and functions in memory.
#[derive(Default)]
pub struct MockRegisterDriver {
    modes: Mutex<FxHashMap<u8, PinMode>>,
    levels: Mutex<FxHashMap<u8, Level>>,
    jammed: Mutex<FxHashSet<u8>>,
    writes: AtomicUsize,
}

impl MockRegisterDriver {
    pub fn mode(&self, line: u8) -> Option<PinMode> {
        self.modes.lock().get(&line).copied()
    }

    /// Forces the level seen by reads, as external hardware would.
    pub fn drive(&self, line: u8, level: Level) {
        self.levels.lock().insert(line, level);
    }

    /// Makes every later write to `line` fail, as a stuck register would.
    pub fn jam(&self, line: u8) {
        self.jammed.lock().insert(line);
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl RegisterDriver for MockRegisterDriver {
    fn set_function(&self, line: u8, mode: PinMode) -> Result<(), GpioError> {
        self.modes.lock().insert(line, mode);
        Ok(())
    }

    fn write(&self, line: u8, level: Level) -> Result<(), GpioError> {
        if self.jammed.lock().contains(&line) {
            return Err(GpioError::Gpio(format!("line {line} is jammed")));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.levels.lock().insert(line, level);
        Ok(())
    }

    fn read(&self, line: u8) -> Result<Level, GpioError> {
        Ok(self.levels.lock().get(&line).copied().unwrap_or(Level::Low))
    }
}

#[derive(Default)]
pub struct MockSpiBus {
    initialized: AtomicBool,
    selected: Mutex<Vec<u8>>,
}

impl MockSpiBus {
    pub fn set_initialized(&self, initialized: bool) {
        self.initialized.store(initialized, Ordering::SeqCst);
    }

    pub fn selected(&self) -> Vec<u8> {
        self.selected.lock().clone()
    }
}

impl SpiBus for MockSpiBus {
    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn chip_select(&self, line: u8) -> Result<(), GpioError> {
        self.selected.lock().push(line);
        Ok(())
    }
}
