// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Drivers for video SerDes chips on I2C
//!
//! This crate contains the register-level pieces of link bring-up:
//!
//! - register transport over a shared I2C bus ([`SharedBus`], [`I2cDevice`])
//! - [`regmap`]: symbolic register maps for each supported chip
//! - [`stage`]: register operations and the stage sequencer
//! - [`paged`]: indirect register access on FPD-Link parts
//! - [`plan`]: ordered stages making up one chip's bring-up
//! - [`lock`]: the lock-polling state machine and status sampling
//! - [`fpd`]: DS90Ux983 serializer / DS90Ux984 deserializer plans
//! - [`gmsl`]: MAX96789 serializer / MAX96772 deserializer plans
//!
//! None of this schedules anything; deferred polling is up to the link
//! server.

#![cfg_attr(not(any(test, feature = "mock")), no_std)]

use drv_serdes_api::{AddressWidth, DeviceHandle, ErrorPolicy, TransportError};
use ringbuf::*;

pub mod fpd;
pub mod gmsl;
pub mod lock;
pub mod paged;
pub mod plan;
pub mod regmap;
pub mod stage;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Read { addr: u8, reg: u16, value: u8 },
    Write { addr: u8, reg: u16, value: u8 },
    Failed { addr: u8, reg: u16, err: TransportError },
    Ignored { addr: u8, reg: u16, err: TransportError },
    ReadbackMismatch { addr: u8, reg: u16, wrote: u8, read: u8 },
}

ringbuf!(Trace, 64, Trace::None);

/// A physical I2C controller.
pub trait I2cBus {
    /// Writes `wbuf` to `address`, then, if `rbuf` is non-empty, reads
    /// `rbuf.len()` bytes back with a repeated start.
    fn write_read(
        &mut self,
        address: u8,
        wbuf: &[u8],
        rbuf: &mut [u8],
    ) -> Result<(), TransportError>;
}

/// One physical bus, shared by every device handle that lives on it.
///
/// Each register access holds the bus for its whole wire-level sequence, so
/// the address phase of a read can never be split from its data phase by a
/// transfer to some other chip.
pub struct SharedBus<B> {
    id: drv_serdes_api::BusId,
    bus: spin::Mutex<B>,
}

impl<B: I2cBus> SharedBus<B> {
    pub const fn new(id: drv_serdes_api::BusId, bus: B) -> Self {
        Self {
            id,
            bus: spin::Mutex::new(bus),
        }
    }

    pub fn id(&self) -> drv_serdes_api::BusId {
        self.id
    }

    pub fn transact(
        &self,
        address: u8,
        wbuf: &[u8],
        rbuf: &mut [u8],
    ) -> Result<(), TransportError> {
        self.bus.lock().write_read(address, wbuf, rbuf)
    }

    /// Runs `f` with the bus locked, for callers that need to inspect the
    /// underlying controller.
    pub fn with<R>(&self, f: impl FnOnce(&mut B) -> R) -> R {
        f(&mut self.bus.lock())
    }
}

/// Byte-wide register access to one chip.
pub trait RegisterRw {
    fn read_reg(&mut self, reg: u16) -> Result<u8, TransportError>;
    fn write_reg(&mut self, reg: u16, value: u8) -> Result<(), TransportError>;

    /// Read-modify-write of the bits in `mask`. If the read fails, nothing
    /// is written.
    fn update_masked(
        &mut self,
        reg: u16,
        mask: u8,
        value: u8,
    ) -> Result<(), TransportError> {
        let old = self.read_reg(reg)?;
        self.write_reg(reg, masked(old, mask, value))
    }
}

impl<R: RegisterRw + ?Sized> RegisterRw for &mut R {
    fn read_reg(&mut self, reg: u16) -> Result<u8, TransportError> {
        (**self).read_reg(reg)
    }

    fn write_reg(&mut self, reg: u16, value: u8) -> Result<(), TransportError> {
        (**self).write_reg(reg, value)
    }
}

/// Replaces the bits of `old` selected by `mask` with those of `value`.
pub const fn masked(old: u8, mask: u8, value: u8) -> u8 {
    (old & !mask) | (value & mask)
}

/// Cooperative delay used for settle times inside a stage.
pub trait Sleep {
    fn sleep_us(&self, us: u32);
}

impl<S: Sleep + ?Sized> Sleep for &S {
    fn sleep_us(&self, us: u32) {
        (**self).sleep_us(us)
    }
}

/// A chip reached through a [`SharedBus`].
pub struct I2cDevice<'a, B> {
    bus: &'a SharedBus<B>,
    handle: DeviceHandle,
    policy: ErrorPolicy,
    verify_writes: bool,
}

impl<'a, B: I2cBus> I2cDevice<'a, B> {
    pub fn new(
        bus: &'a SharedBus<B>,
        handle: DeviceHandle,
        policy: ErrorPolicy,
    ) -> Self {
        Self {
            bus,
            handle,
            policy,
            verify_writes: false,
        }
    }

    /// Reads every register back after writing it and traces mismatches.
    pub fn verify_writes(mut self, verify: bool) -> Self {
        self.verify_writes = verify;
        self
    }

    pub fn handle(&self) -> DeviceHandle {
        self.handle
    }

    fn encode(&self, reg: u16, buf: &mut [u8; 3]) -> Result<usize, TransportError> {
        if !self.handle.width.fits(reg) {
            return Err(TransportError::BadRegister(reg));
        }
        match self.handle.width {
            AddressWidth::Byte => {
                buf[0] = reg as u8;
                Ok(1)
            }
            AddressWidth::Word => {
                buf[..2].copy_from_slice(&reg.to_be_bytes());
                Ok(2)
            }
        }
    }

    fn raw_read(&self, reg: u16) -> Result<u8, TransportError> {
        let mut wbuf = [0u8; 3];
        let n = self.encode(reg, &mut wbuf)?;
        let mut rbuf = [0u8; 1];
        self.bus.transact(self.handle.address, &wbuf[..n], &mut rbuf)?;
        Ok(rbuf[0])
    }

    fn raw_write(&self, reg: u16, value: u8) -> Result<(), TransportError> {
        let mut wbuf = [0u8; 3];
        let n = self.encode(reg, &mut wbuf)?;
        wbuf[n] = value;
        self.bus
            .transact(self.handle.address, &wbuf[..n + 1], &mut [])
    }

    /// Applies the error policy to a failed access, returning the value the
    /// caller should see in its place.
    fn absorb<T>(
        &self,
        reg: u16,
        err: TransportError,
        fallback: T,
    ) -> Result<T, TransportError> {
        let addr = self.handle.address;
        match self.policy {
            ErrorPolicy::Propagate => {
                ringbuf_entry!(Trace::Failed { addr, reg, err });
                Err(err)
            }
            ErrorPolicy::IgnoreLegacy => {
                ringbuf_entry!(Trace::Ignored { addr, reg, err });
                Ok(fallback)
            }
        }
    }
}

impl<B: I2cBus> RegisterRw for I2cDevice<'_, B> {
    fn read_reg(&mut self, reg: u16) -> Result<u8, TransportError> {
        let addr = self.handle.address;
        match self.raw_read(reg) {
            Ok(value) => {
                ringbuf_entry!(Trace::Read { addr, reg, value });
                Ok(value)
            }
            Err(err) => self.absorb(reg, err, 0),
        }
    }

    fn write_reg(&mut self, reg: u16, value: u8) -> Result<(), TransportError> {
        let addr = self.handle.address;
        if let Err(err) = self.raw_write(reg, value) {
            return self.absorb(reg, err, ());
        }
        ringbuf_entry!(Trace::Write { addr, reg, value });

        if self.verify_writes {
            // The readback is diagnostic only.
            if let Ok(read) = self.raw_read(reg) {
                if read != value {
                    ringbuf_entry!(Trace::ReadbackMismatch {
                        addr,
                        reg,
                        wrote: value,
                        read,
                    });
                }
            }
        }
        Ok(())
    }
}
