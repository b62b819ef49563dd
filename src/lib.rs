mod backend;
mod config;
mod error;
mod gate;
mod gpio;
mod interrupt;
mod pinmap;
mod registry;
mod sys;
mod watcher;

pub use backend::{MockInterruptBackend, MockRegisterDriver, MockSpiBus, SysfsBackend, SysfsCall};
pub use config::{AppConfig, BoardConfig, DEFAULT_SYSFS_ROOT, EdgeDetect, SysfsConfig, WatchConfig};
pub use error::{GpioError, KernelOp};
pub use gate::{GateGuard, InterruptGate};
pub use gpio::{
    Board, Level, PinMode, RegisterDriver, SPI_CHIP_SELECT_LINES, SPI_RESERVED_LINES, SpiBus,
    WRITE_SETTLE_DELAY,
};
pub use interrupt::{EdgeEvents, InterruptBackend, InterruptController};
pub use pinmap::{PIN_COUNT, PinMap, Revision};
pub use registry::{LineEntry, LineRegistry, LineSlot, LineState};
