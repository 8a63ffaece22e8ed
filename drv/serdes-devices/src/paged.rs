// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Indirect (paged) register access on FPD-Link parts
//!
//! The DS90Ux983 and DS90Ux984 hide their PLL, video processor, DTG and DP
//! blocks behind a three-register window; see [`crate::regmap::indirect`].

use crate::regmap::indirect::{DATA, OFFSET, PAGE};
use crate::stage::{w, RegOp};
use crate::RegisterRw;
use drv_serdes_api::TransportError;

/// Handle for paged access to one chip. This assumes exclusive access to the
/// chip for its lifetime, because it remembers the selected page and skips
/// redundant page writes.
pub struct Paged<'a, D: ?Sized> {
    dev: &'a mut D,
    last_page: Option<u8>,
}

impl<'a, D: RegisterRw + ?Sized> Paged<'a, D> {
    pub fn new(dev: &'a mut D) -> Self {
        Self {
            dev,
            last_page: None,
        }
    }

    fn set_page(&mut self, page: u8) -> Result<(), TransportError> {
        if self.last_page != Some(page) {
            // Forget the page first, so that a failed write leaves us
            // unsure rather than wrong.
            self.last_page = None;
            self.dev.write_reg(PAGE, page)?;
            self.last_page = Some(page);
        }
        Ok(())
    }

    pub fn read(&mut self, page: u8, offset: u8) -> Result<u8, TransportError> {
        self.set_page(page)?;
        self.dev.write_reg(OFFSET, offset)?;
        self.dev.read_reg(DATA)
    }

    /// Reads a register outside the window.
    pub fn read_direct(&mut self, reg: u16) -> Result<u8, TransportError> {
        self.dev.read_reg(reg)
    }
}

/// Stage operations that select `page` and point the window at `offset`.
pub const fn select(page: u8, offset: u8) -> [RegOp; 2] {
    [w(PAGE, page), w(OFFSET, offset)]
}

/// Stage operation that points the window at `offset` on the current page.
pub const fn seek(offset: u8) -> RegOp {
    w(OFFSET, offset)
}

/// Stage operation that writes one byte through the window.
pub const fn data(value: u8) -> RegOp {
    w(DATA, value)
}
