use std::convert::Infallible;
use std::fmt;
use std::io;

use thiserror::Error;

/// Kernel sysfs step that failed while configuring or releasing a line.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum KernelOp {
    Export,
    Direction,
    Edge,
    Open,
    Unexport,
}

impl fmt::Display for KernelOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            KernelOp::Export => "export",
            KernelOp::Direction => "direction",
            KernelOp::Edge => "edge",
            KernelOp::Open => "open value",
            KernelOp::Unexport => "unexport",
        })
    }
}

#[derive(Debug, Error)]
pub enum GpioError {
    #[error("Invalid pin: {0}")]
    InvalidPin(u8),
    #[error("Invalid line: {0}")]
    InvalidLine(u8),
    #[error("Invalid interrupt mode: {0}")]
    InvalidMode(String),
    #[error("Kernel {op} failed for line {line}: {source}")]
    Kernel {
        op: KernelOp,
        line: u8,
        #[source]
        source: io::Error,
    },
    #[error("Watcher error on line {line}: {source}")]
    Watcher {
        line: u8,
        #[source]
        source: io::Error,
    },
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("GPIO error: {0}")]
    Gpio(String),
}

impl GpioError {
    pub(crate) fn kernel(op: KernelOp, line: u8, source: io::Error) -> Self {
        GpioError::Kernel { op, line, source }
    }
}

// Lets a typed `EdgeDetect` flow through the same `TryInto` bound as raw mode codes.
impl From<Infallible> for GpioError {
    fn from(never: Infallible) -> Self {
        match never {}
    }
}
