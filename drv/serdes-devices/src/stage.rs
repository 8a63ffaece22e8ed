// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Register operations and the stage sequencer

use crate::{RegisterRw, Sleep};
use drv_serdes_api::{Role, StageError};
use ringbuf::*;

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Start(&'static str),
    Done(&'static str),
    Sampled { stage: &'static str, reg: u16, value: u8 },
    Failed { stage: &'static str, index: usize },
}

ringbuf!(Trace, 32, Trace::None);

/// One step of a stage.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RegOp {
    Write { reg: u16, value: u8 },
    /// Reads a register for its side effect or to observe it; the value is
    /// traced and handed to the caller's observer.
    Read { reg: u16 },
    /// `new = (old & !mask) | (value & mask)`; always reads first.
    UpdateMasked { reg: u16, mask: u8, value: u8 },
    Delay { us: u32 },
}

pub const fn w(reg: u16, value: u8) -> RegOp {
    RegOp::Write { reg, value }
}

pub const fn r(reg: u16) -> RegOp {
    RegOp::Read { reg }
}

pub const fn rmw(reg: u16, mask: u8, value: u8) -> RegOp {
    RegOp::UpdateMasked { reg, mask, value }
}

pub const fn delay_ms(ms: u32) -> RegOp {
    RegOp::Delay { us: ms * 1000 }
}

/// Builds a fixed-size operation table in a constant, so that tables can be
/// assembled from helpers. `build` fails to compile if the table isn't
/// filled exactly.
pub struct OpList<const N: usize> {
    ops: [RegOp; N],
    len: usize,
}

impl<const N: usize> OpList<N> {
    #[allow(clippy::new_without_default)]
    pub const fn new() -> Self {
        Self {
            ops: [RegOp::Delay { us: 0 }; N],
            len: 0,
        }
    }

    pub const fn op(mut self, op: RegOp) -> Self {
        self.ops[self.len] = op;
        self.len += 1;
        self
    }

    pub const fn ops(mut self, ops: &[RegOp]) -> Self {
        let mut i = 0;
        while i < ops.len() {
            self.ops[self.len] = ops[i];
            self.len += 1;
            i += 1;
        }
        self
    }

    pub const fn build(self) -> [RegOp; N] {
        assert!(self.len == N);
        self.ops
    }
}

/// A named, ordered list of operations against one chip.
///
/// Stages are not safe to re-run from the middle: a write may reset a PLL
/// or toggle HPD, so a stage that fails partway leaves the chip in an
/// intermediate configuration.
#[derive(Copy, Clone, Debug)]
pub struct Stage<'a> {
    pub name: &'static str,
    pub target: Role,
    pub ops: &'a [RegOp],
}

impl<'a> Stage<'a> {
    pub const fn new(name: &'static str, target: Role, ops: &'a [RegOp]) -> Self {
        Self { name, target, ops }
    }
}

/// Runs `stage` against `dev`, stopping at the first failed operation.
pub fn execute<D: RegisterRw + ?Sized, S: Sleep + ?Sized>(
    dev: &mut D,
    stage: &Stage<'_>,
    sleep: &S,
) -> Result<(), StageError> {
    execute_with(dev, stage, sleep, |_, _| ())
}

/// As [`execute`], handing the result of every `Read` to `on_read`.
pub fn execute_with<D, S, F>(
    dev: &mut D,
    stage: &Stage<'_>,
    sleep: &S,
    mut on_read: F,
) -> Result<(), StageError>
where
    D: RegisterRw + ?Sized,
    S: Sleep + ?Sized,
    F: FnMut(u16, u8),
{
    ringbuf_entry!(Trace::Start(stage.name));

    for (index, op) in stage.ops.iter().enumerate() {
        let result = match *op {
            RegOp::Write { reg, value } => dev.write_reg(reg, value),
            RegOp::Read { reg } => dev.read_reg(reg).map(|value| {
                ringbuf_entry!(Trace::Sampled {
                    stage: stage.name,
                    reg,
                    value
                });
                on_read(reg, value);
            }),
            RegOp::UpdateMasked { reg, mask, value } => {
                dev.update_masked(reg, mask, value)
            }
            RegOp::Delay { us } => {
                sleep.sleep_us(us);
                Ok(())
            }
        };

        if let Err(cause) = result {
            ringbuf_entry!(Trace::Failed {
                stage: stage.name,
                index
            });
            return Err(StageError::OperationFailed {
                stage: stage.name,
                index,
                cause,
            });
        }
    }

    ringbuf_entry!(Trace::Done(stage.name));
    Ok(())
}
