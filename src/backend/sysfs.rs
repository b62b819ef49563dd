use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use libc::{c_short, POLLERR, POLLPRI};
use log::debug;

use crate::config::{EdgeDetect, SysfsConfig};
use crate::error::{GpioError, KernelOp};
use crate::interrupt::{EdgeEvents, InterruptBackend};
use crate::sys;

/// Interrupt backend speaking the legacy `/sys/class/gpio` protocol.
pub struct SysfsBackend {
    root: PathBuf,
    export_timeout: Duration,
    poll_interval: Duration,
}

impl SysfsBackend {
    pub fn new(config: &SysfsConfig) -> Self {
        Self {
            root: config.root.clone(),
            export_timeout: Duration::from_millis(config.export_timeout_ms),
            poll_interval: Duration::from_millis(config.export_poll_ms.max(1)),
        }
    }

    fn line_attr(&self, line: u8, attr: &str) -> PathBuf {
        self.root.join(format!("gpio{line}")).join(attr)
    }

    fn write_control(path: &Path, contents: &str) -> io::Result<()> {
        let mut f = OpenOptions::new().write(true).open(path)?;
        f.write_all(contents.as_bytes())
    }

    /// Writes a per-line attribute, retrying while the kernel or udev is
    /// still materialising it after export.
    fn write_attr(&self, line: u8, attr: &str, contents: &str, op: KernelOp) -> Result<(), GpioError> {
        let path = self.line_attr(line, attr);
        let deadline = Instant::now() + self.export_timeout;
        loop {
            match Self::write_control(&path, contents) {
                Ok(()) => {
                    debug!("wrote {:?} to {}", contents.trim_end(), path.display());
                    return Ok(());
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
                    ) && Instant::now() < deadline =>
                {
                    thread::sleep(self.poll_interval);
                }
                Err(e) => return Err(GpioError::kernel(op, line, e)),
            }
        }
    }

    fn wait_for_value(&self, line: u8) -> Result<(), GpioError> {
        let value = self.line_attr(line, "value");
        let deadline = Instant::now() + self.export_timeout;
        while !value.exists() {
            if Instant::now() >= deadline {
                return Err(GpioError::kernel(
                    KernelOp::Export,
                    line,
                    io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("{} did not appear", value.display()),
                    ),
                ));
            }
            thread::sleep(self.poll_interval);
        }
        Ok(())
    }
}

impl InterruptBackend for SysfsBackend {
    fn export(&self, line: u8) -> Result<(), GpioError> {
        match Self::write_control(&self.root.join("export"), &format!("{line}\n")) {
            Ok(()) => debug!("exported line {line}"),
            Err(e) if e.raw_os_error() == Some(libc::EBUSY) => {
                debug!("line {line} already exported");
            }
            Err(e) => return Err(GpioError::kernel(KernelOp::Export, line, e)),
        }
        self.wait_for_value(line)
    }

    fn set_input(&self, line: u8) -> Result<(), GpioError> {
        self.write_attr(line, "direction", "in\n", KernelOp::Direction)
    }

    fn set_edge(&self, line: u8, edge: EdgeDetect) -> Result<(), GpioError> {
        self.write_attr(
            line,
            "edge",
            &format!("{}\n", edge.as_sysfs_str()),
            KernelOp::Edge,
        )
    }

    fn open_events(&self, line: u8) -> Result<Box<dyn EdgeEvents>, GpioError> {
        let path = self.line_attr(line, "value");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| GpioError::kernel(KernelOp::Open, line, e))?;
        Ok(Box::new(SysfsEvents { file }))
    }

    fn unexport(&self, line: u8) -> Result<(), GpioError> {
        Self::write_control(&self.root.join("unexport"), &line.to_string())
            .map_err(|e| GpioError::kernel(KernelOp::Unexport, line, e))?;
        debug!("unexported line {line}");
        Ok(())
    }
}

/// An open sysfs `value` file; the kernel flags edges with POLLPRI.
pub struct SysfsEvents {
    file: File,
}

impl AsFd for SysfsEvents {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl EdgeEvents for SysfsEvents {
    fn interest(&self) -> c_short {
        POLLPRI | POLLERR
    }

    fn acknowledge(&mut self) -> io::Result<()> {
        let mut byte = [0u8; 1];
        self.file.read(&mut byte)?;
        self.file.seek(SeekFrom::Start(0))?;
        Ok(())
    }

    fn drain(&mut self) -> io::Result<usize> {
        let pending = sys::pending_bytes(self.file.as_fd())?;
        let mut byte = [0u8; 1];
        for _ in 0..pending {
            self.file.read(&mut byte)?;
        }
        self.file.seek(SeekFrom::Start(0))?;
        Ok(pending)
    }
}
