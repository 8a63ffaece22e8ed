// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bring-up plans: ordered stages across the chips of one link

use crate::stage::{execute_with, Stage};
use crate::{RegisterRw, Sleep};
use drv_serdes_api::{BringUpError, Role};
use ringbuf::*;

/// Upper bound on the number of stages in one plan.
pub const MAX_STAGES: usize = 16;

pub type Plan<'a> = heapless::Vec<Stage<'a>, MAX_STAGES>;

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    PlanStart { stages: usize },
    PlanDone,
    Aborted { stage: &'static str },
}

ringbuf!(Trace, 8, Trace::None);

/// Register access to every chip in one link, by role.
pub struct ChipSet<D> {
    pub serializer: D,
    pub deserializer: Option<D>,
    pub deserializer_b: Option<D>,
}

impl<D: RegisterRw> ChipSet<D> {
    pub fn get_mut(&mut self, role: Role) -> Result<&mut D, BringUpError> {
        match role {
            Role::Serializer => Some(&mut self.serializer),
            Role::Deserializer => self.deserializer.as_mut(),
            Role::DeserializerB => self.deserializer_b.as_mut(),
        }
        .ok_or(BringUpError::MissingDevice(role))
    }
}

struct Fits<const N: usize, const CAP: usize>;

impl<const N: usize, const CAP: usize> Fits<N, CAP> {
    const OK: () = assert!(N <= CAP, "list is longer than its capacity");
}

/// Collects the items of `items` that are present, in order. An array that
/// could overflow `CAP` fails to build, so the collection cannot truncate.
pub fn bounded<T, const N: usize, const CAP: usize>(
    items: [Option<T>; N],
) -> heapless::Vec<T, CAP> {
    #[allow(clippy::let_unit_value)]
    let () = Fits::<N, CAP>::OK;
    items.into_iter().flatten().collect()
}

/// Builds a plan from a list of stages. A list longer than [`MAX_STAGES`]
/// fails to build.
pub fn plan_of<'a, const N: usize>(stages: [Stage<'a>; N]) -> Plan<'a> {
    bounded(stages.map(Some))
}

/// Runs every stage of `plan` in order against its target chip, stopping
/// at the first failure. There is no retry and no rollback.
pub fn run_plan<D: RegisterRw, S: Sleep + ?Sized>(
    chips: &mut ChipSet<D>,
    plan: &[Stage<'_>],
    sleep: &S,
) -> Result<(), BringUpError> {
    run_plan_with(chips, plan, sleep, |_, _, _| ())
}

/// As [`run_plan`], handing each value read by a `Read` operation to
/// `on_read` along with the name of its stage.
pub fn run_plan_with<D, S, F>(
    chips: &mut ChipSet<D>,
    plan: &[Stage<'_>],
    sleep: &S,
    mut on_read: F,
) -> Result<(), BringUpError>
where
    D: RegisterRw,
    S: Sleep + ?Sized,
    F: FnMut(&'static str, u16, u8),
{
    ringbuf_entry!(Trace::PlanStart {
        stages: plan.len()
    });

    // Check every target up front, so that a missing chip is reported
    // before anything is programmed.
    for stage in plan {
        chips.get_mut(stage.target)?;
    }

    for stage in plan {
        let dev = chips.get_mut(stage.target)?;
        if let Err(e) =
            execute_with(dev, stage, sleep, |reg, v| on_read(stage.name, reg, v))
        {
            ringbuf_entry!(Trace::Aborted { stage: stage.name });
            return Err(e.into());
        }
    }

    ringbuf_entry!(Trace::PlanDone);
    Ok(())
}
