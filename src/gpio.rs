use std::ops::RangeInclusive;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::error;
use serde::{Deserialize, Serialize};

use crate::config::{BoardConfig, EdgeDetect};
use crate::error::GpioError;
use crate::gate::InterruptGate;
use crate::interrupt::{InterruptBackend, InterruptController};
use crate::pinmap::PinMap;

/// Lines claimed by SPI0 while the bus is initialised (CE1, CE0, MISO, MOSI, SCLK).
pub const SPI_RESERVED_LINES: RangeInclusive<u8> = 7..=11;
/// Chip-select lines; driving one low selects the matching device.
pub const SPI_CHIP_SELECT_LINES: [u8; 2] = [8, 7];
/// Time for a written level to show up in the level register.
pub const WRITE_SETTLE_DELAY: Duration = Duration::from_micros(1);

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Level {
    Low,
    High,
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high { Level::High } else { Level::Low }
    }
}

impl From<Level> for u8 {
    fn from(level: Level) -> Self {
        match level {
            Level::Low => 0,
            Level::High => 1,
        }
    }
}

/// BCM2835 function-select codes.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum PinMode {
    Input = 0,
    Output = 1,
    Alt5 = 2,
    Alt4 = 3,
    Alt0 = 4,
    Alt1 = 5,
    Alt2 = 6,
    Alt3 = 7,
}

/// Peripheral register access for a logical line.
pub trait RegisterDriver: Send + Sync {
    fn set_function(&self, line: u8, mode: PinMode) -> Result<(), GpioError>;
    fn write(&self, line: u8, level: Level) -> Result<(), GpioError>;
    fn read(&self, line: u8) -> Result<Level, GpioError>;
}

/// The SPI controller that owns [`SPI_RESERVED_LINES`] once initialised.
pub trait SpiBus: Send + Sync {
    fn is_initialized(&self) -> bool;
    fn chip_select(&self, line: u8) -> Result<(), GpioError>;
}

/// Physical-pin front end over the register driver and interrupt controller.
pub struct Board<D: RegisterDriver, K: InterruptBackend> {
    pins: PinMap,
    driver: Arc<D>,
    bus: Option<Arc<dyn SpiBus>>,
    interrupts: InterruptController<K>,
    gate: &'static InterruptGate,
}

impl<D: RegisterDriver, K: InterruptBackend> Board<D, K> {
    pub fn new(config: &BoardConfig, driver: Arc<D>, backend: Arc<K>) -> Self {
        Self {
            pins: PinMap::new(config.revision),
            driver,
            bus: None,
            interrupts: InterruptController::new(backend, config.watcher_priority),
            gate: InterruptGate::global(),
        }
    }

    pub fn with_spi_bus(mut self, bus: Arc<dyn SpiBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn pins(&self) -> &PinMap {
        &self.pins
    }

    pub fn interrupts(&self) -> &InterruptController<K> {
        &self.interrupts
    }

    fn resolve(&self, op: &str, pin: u8) -> Result<u8, GpioError> {
        self.pins.resolve(pin).inspect_err(|_| {
            error!("{op}: invalid pin: {pin}");
        })
    }

    /// The SPI bus, if it currently owns `line`.
    fn bus_owner(&self, line: u8) -> Option<&Arc<dyn SpiBus>> {
        self.bus
            .as_ref()
            .filter(|bus| SPI_RESERVED_LINES.contains(&line) && bus.is_initialized())
    }

    pub fn set_mode(&self, pin: u8, mode: PinMode) -> Result<(), GpioError> {
        let line = self.resolve("set_mode", pin)?;
        if self.bus_owner(line).is_some() {
            return Ok(());
        }
        self.driver.set_function(line, mode)
    }

    pub fn write(&self, pin: u8, level: Level) -> Result<(), GpioError> {
        let line = self.resolve("write", pin)?;
        if let Some(bus) = self.bus_owner(line) {
            if level == Level::Low && SPI_CHIP_SELECT_LINES.contains(&line) {
                bus.chip_select(line)?;
            }
            return Ok(());
        }
        self.driver.write(line, level)?;
        thread::sleep(WRITE_SETTLE_DELAY);
        Ok(())
    }

    pub fn read(&self, pin: u8) -> Result<Level, GpioError> {
        let line = self.resolve("read", pin)?;
        if self.bus_owner(line).is_some() {
            return Ok(Level::Low);
        }
        self.driver.read(line)
    }

    /// Calls `callback` on a dedicated thread for every `mode` edge on `pin`.
    ///
    /// `mode` is an [`EdgeDetect`] or a raw Arduino interrupt code. Attaching
    /// again replaces the previous callback. A callback may re-attach or detach
    /// its own pin; when another thread does the same at once, the call that
    /// finishes last decides the outcome.
    pub fn attach_interrupt<M, F>(&self, pin: u8, mode: M, callback: F) -> Result<(), GpioError>
    where
        M: TryInto<EdgeDetect>,
        GpioError: From<M::Error>,
        F: FnMut() + Send + 'static,
    {
        let line = self.resolve("attach_interrupt", pin)?;
        let edge = mode.try_into().map_err(GpioError::from).inspect_err(|e| {
            error!("attach_interrupt: {e}");
        })?;
        self.interrupts.attach(line, edge, callback)
    }

    pub fn detach_interrupt(&self, pin: u8) -> Result<(), GpioError> {
        let line = self.resolve("detach_interrupt", pin)?;
        self.interrupts.detach(line)
    }

    /// Interrupt number for a pin; attach takes physical pins directly.
    pub fn pin_to_interrupt(&self, pin: u8) -> u8 {
        pin
    }

    pub fn disable_global_interrupts(&self) {
        self.gate.disable();
    }

    pub fn enable_global_interrupts(&self) {
        self.gate.enable();
    }
}
