// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Model bus and clock for running plans without hardware
//!
//! [`ModelBus`] implements [`I2cBus`] over a set of [`ModelDevice`]s, each a
//! register file decoded with the device's address width. FPD-Link devices
//! can additionally model the indirect window, with auto-increment. Status
//! registers can be scripted to return a sequence of values, and faults can
//! be injected at a given wire transaction.

use crate::regmap::indirect::{DATA, OFFSET, PAGE};
use crate::{I2cBus, Sleep};
use drv_serdes_api::{AddressWidth, TransportError};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

/// A register-level access as the model device decoded it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Transaction {
    Write { addr: u8, reg: u16, value: u8 },
    Read { addr: u8, reg: u16, value: u8 },
}

impl Transaction {
    pub fn addr(&self) -> u8 {
        match *self {
            Transaction::Write { addr, .. } | Transaction::Read { addr, .. } => {
                addr
            }
        }
    }
}

/// Where a scripted value is read from.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Location {
    Direct(u16),
    Paged { page: u8, offset: u8 },
}

/// Fails the wire transaction with index `at` (counting from zero over the
/// life of the bus).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Fault {
    pub at: usize,
    pub err: TransportError,
}

impl Fault {
    pub fn at(at: usize, err: TransportError) -> Self {
        Self { at, err }
    }
}

pub struct ModelDevice {
    width: AddressWidth,
    regs: BTreeMap<u16, u8>,
    paging: bool,
    paged: BTreeMap<(u8, u8), u8>,
    page: u8,
    offset: u8,
    scripts: BTreeMap<Location, VecDeque<u8>>,
    paged_writes: Vec<(u8, u8, u8)>,
}

impl ModelDevice {
    fn new(width: AddressWidth) -> Self {
        Self {
            width,
            regs: BTreeMap::new(),
            paging: false,
            paged: BTreeMap::new(),
            page: 0,
            offset: 0,
            scripts: BTreeMap::new(),
            paged_writes: vec![],
        }
    }

    /// Routes `DATA` accesses through the page/offset window.
    pub fn enable_paging(&mut self) {
        self.paging = true;
    }

    pub fn get(&self, reg: u16) -> u8 {
        self.regs.get(&reg).copied().unwrap_or(0)
    }

    pub fn set(&mut self, reg: u16, value: u8) {
        self.regs.insert(reg, value);
    }

    pub fn paged(&self, page: u8, offset: u8) -> u8 {
        self.paged.get(&(page, offset)).copied().unwrap_or(0)
    }

    pub fn set_paged(&mut self, page: u8, offset: u8, value: u8) {
        self.paged.insert((page, offset), value);
    }

    /// Every write through the window, as `(page, offset, value)`.
    pub fn paged_writes(&self) -> &[(u8, u8, u8)] {
        &self.paged_writes
    }

    /// Makes successive reads of `loc` return `values` in order. The last
    /// value sticks once the script runs out.
    pub fn script(&mut self, loc: Location, values: &[u8]) {
        self.scripts.insert(loc, values.iter().copied().collect());
    }

    fn scripted(&mut self, loc: Location) -> Option<u8> {
        let script = self.scripts.get_mut(&loc)?;
        if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().copied()
        }
    }

    fn decode(&self, wbuf: &[u8]) -> Option<(u16, Option<u8>)> {
        match (self.width, wbuf) {
            (AddressWidth::Byte, [reg]) => Some((u16::from(*reg), None)),
            (AddressWidth::Byte, [reg, v]) => Some((u16::from(*reg), Some(*v))),
            (AddressWidth::Word, [hi, lo]) => {
                Some((u16::from_be_bytes([*hi, *lo]), None))
            }
            (AddressWidth::Word, [hi, lo, v]) => {
                Some((u16::from_be_bytes([*hi, *lo]), Some(*v)))
            }
            _ => None,
        }
    }

    fn write(&mut self, reg: u16, value: u8) {
        if self.paging {
            match reg {
                PAGE => self.page = value,
                OFFSET => self.offset = value,
                DATA => {
                    self.paged.insert((self.page, self.offset), value);
                    self.paged_writes.push((self.page, self.offset, value));
                    self.offset = self.offset.wrapping_add(1);
                    return;
                }
                _ => (),
            }
        }
        self.regs.insert(reg, value);
    }

    fn read(&mut self, reg: u16) -> u8 {
        if self.paging && reg == DATA {
            let loc = Location::Paged {
                page: self.page,
                offset: self.offset,
            };
            let v = self
                .scripted(loc)
                .unwrap_or_else(|| self.paged(self.page, self.offset));
            self.offset = self.offset.wrapping_add(1);
            return v;
        }
        self.scripted(Location::Direct(reg))
            .unwrap_or_else(|| self.get(reg))
    }
}

/// A bus full of model devices. Addresses with no device don't acknowledge.
#[derive(Default)]
pub struct ModelBus {
    devices: BTreeMap<u8, ModelDevice>,
    faults: Vec<Fault>,
    wire: Vec<(u8, Vec<u8>, usize)>,
    log: Vec<Transaction>,
}

impl ModelBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_device(&mut self, addr: u8, width: AddressWidth) {
        self.devices.insert(addr, ModelDevice::new(width));
    }

    pub fn device(&self, addr: u8) -> Option<&ModelDevice> {
        self.devices.get(&addr)
    }

    pub fn device_mut(&mut self, addr: u8) -> Option<&mut ModelDevice> {
        self.devices.get_mut(&addr)
    }

    pub fn inject(&mut self, fault: Fault) {
        self.faults.push(fault);
    }

    /// Every transfer put on the wire, including failed ones, as
    /// `(address, bytes written, bytes read)`.
    pub fn wire(&self) -> &[(u8, Vec<u8>, usize)] {
        &self.wire
    }

    /// Every successful register access, in order.
    pub fn log(&self) -> &[Transaction] {
        &self.log
    }

    /// The successful writes to `addr`, as `(register, value)`.
    pub fn writes_to(&self, addr: u8) -> Vec<(u16, u8)> {
        self.log
            .iter()
            .filter_map(|t| match *t {
                Transaction::Write { addr: a, reg, value } if a == addr => {
                    Some((reg, value))
                }
                _ => None,
            })
            .collect()
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
    }
}

impl I2cBus for ModelBus {
    fn write_read(
        &mut self,
        address: u8,
        wbuf: &[u8],
        rbuf: &mut [u8],
    ) -> Result<(), TransportError> {
        let index = self.wire.len();
        self.wire.push((address, wbuf.to_vec(), rbuf.len()));

        if let Some(f) = self.faults.iter().find(|f| f.at == index) {
            return Err(f.err);
        }

        let dev = self
            .devices
            .get_mut(&address)
            .ok_or(TransportError::NoAck)?;
        let (reg, value) = dev.decode(wbuf).ok_or(TransportError::IoFailure)?;

        match (value, rbuf) {
            (Some(value), []) => {
                dev.write(reg, value);
                self.log.push(Transaction::Write {
                    addr: address,
                    reg,
                    value,
                });
            }
            (None, [out]) => {
                let value = dev.read(reg);
                *out = value;
                self.log.push(Transaction::Read {
                    addr: address,
                    reg,
                    value,
                });
            }
            _ => return Err(TransportError::IoFailure),
        }
        Ok(())
    }
}

/// Virtual time. Sleeping advances the clock instantly.
#[derive(Debug, Default)]
pub struct FakeClock {
    now_us: AtomicU64,
}

impl FakeClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now_ms(&self) -> u64 {
        self.now_us.load(Ordering::Relaxed) / 1000
    }

    /// Moves the clock forward to `ms` if it is behind it.
    pub fn advance_to_ms(&self, ms: u64) {
        self.now_us.fetch_max(ms * 1000, Ordering::Relaxed);
    }
}

impl deferred::Clock for FakeClock {
    fn now(&self) -> u64 {
        self.now_ms()
    }
}

impl Sleep for FakeClock {
    fn sleep_us(&self, us: u32) {
        self.now_us.fetch_add(u64::from(us), Ordering::Relaxed);
    }
}
