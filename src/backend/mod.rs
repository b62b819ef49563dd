mod mock;
mod sysfs;

pub use mock::{MockInterruptBackend, MockRegisterDriver, MockSpiBus, SysfsCall};
pub use sysfs::SysfsBackend;
