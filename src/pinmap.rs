//! Physical header pin to BCM line translation.

use serde::{Deserialize, Serialize};

use crate::error::GpioError;

/// Number of physical positions (and logical lines) the tables cover.
pub const PIN_COUNT: usize = 64;

const INVALID: u8 = 255;

/// Board layout the translation table is chosen from.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Revision {
    /// Original 26-pin header.
    Rev1,
    /// 40-pin header boards, including the P5 lines 28-31.
    BPlus,
}

#[rustfmt::skip]
static REV1_PHYS_TO_LINE: [u8; PIN_COUNT] = [
    INVALID,
    INVALID, INVALID,
      0, INVALID,
      1, INVALID,
      4,  14,
    INVALID,  15,
     17,  18,
     21, INVALID,
     22,  23,
    INVALID,  24,
     10, INVALID,
      9,  25,
     11,   8,
    INVALID,   7,
    INVALID, INVALID, INVALID, INVALID, INVALID,
    INVALID, INVALID, INVALID, INVALID, INVALID, INVALID, INVALID, INVALID,
    INVALID, INVALID, INVALID, INVALID, INVALID, INVALID, INVALID, INVALID,
    INVALID, INVALID, INVALID, INVALID, INVALID, INVALID, INVALID, INVALID,
    INVALID, INVALID, INVALID, INVALID, INVALID, INVALID, INVALID, INVALID,
];

#[rustfmt::skip]
static B_PLUS_PHYS_TO_LINE: [u8; PIN_COUNT] = [
    INVALID,
    INVALID, INVALID,
      2, INVALID,
      3, INVALID,
      4,  14,
    INVALID,  15,
     17,  18,
     27, INVALID,
     22,  23,
    INVALID,  24,
     10, INVALID,
      9,  25,
     11,   8,
    INVALID,   7,
      0,   1,
      5, INVALID,
      6,  12,
     13, INVALID,
     19,  16,
     26,  20,
    INVALID,  21,
    // P5 header
    INVALID, INVALID,
    INVALID, INVALID,
    INVALID, INVALID,
    INVALID, INVALID,
    INVALID, INVALID,
     28,  29,
     30,  31,
    INVALID, INVALID,
    INVALID, INVALID,
    INVALID, INVALID,
    INVALID, INVALID,
    INVALID,
];

#[derive(Debug, Clone, Copy)]
pub struct PinMap {
    revision: Revision,
    table: &'static [u8; PIN_COUNT],
}

impl PinMap {
    pub fn new(revision: Revision) -> Self {
        let table = match revision {
            Revision::Rev1 => &REV1_PHYS_TO_LINE,
            Revision::BPlus => &B_PLUS_PHYS_TO_LINE,
        };
        Self { revision, table }
    }

    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// Returns the logical line behind a physical pin, or `None` for
    /// power, ground, reserved and out-of-range positions.
    pub fn translate(&self, physical: u8) -> Option<u8> {
        match self.table.get(physical as usize) {
            Some(&line) if line != INVALID => Some(line),
            _ => None,
        }
    }

    pub fn resolve(&self, physical: u8) -> Result<u8, GpioError> {
        self.translate(physical)
            .ok_or(GpioError::InvalidPin(physical))
    }

    /// Valid `(physical, line)` pairs in header order.
    pub fn iter(&self) -> impl Iterator<Item = (u8, u8)> + '_ {
        (0..PIN_COUNT as u8).filter_map(|pin| self.translate(pin).map(|line| (pin, line)))
    }
}
