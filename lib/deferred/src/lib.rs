// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A deferred-task scheduler.
//!
//! `Deferred` tracks a set of one-shot deferred tasks against a single clock.
//! The tasks correspond to variants of an enum type, so that a link worker
//! can tell its pollers apart without allocating.
//!
//! The expected usage model is:
//!
//! - Create an `enum` type naming your tasks, and derive the `Enum` trait
//!   (from the `enum_map` crate) for it.
//!
//! - Create a `Deferred<YourEnumType, YourClock>`.
//!
//! - `schedule` a task with a delay and a token. The token is opaque to the
//!   scheduler; link workers use it to carry the generation of the link
//!   instance that armed the task, so that a task armed by a torn-down
//!   instance can be recognized and ignored when it fires.
//!
//! - Sleep until `next_deadline`, then call `poll_now` and drain the fired
//!   tasks with `iter_fired`.
//!
//! Each task kind has at most one pending deadline. Scheduling a kind that is
//! already pending replaces the prior deadline and token, and also discards a
//! firing of that kind that has not yet been observed.

#![cfg_attr(not(test), no_std)]

use enum_map::{EnumArray, EnumMap};

/// A monotonic millisecond clock.
pub trait Clock {
    fn now(&self) -> u64;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> u64 {
        (**self).now()
    }
}

pub struct Deferred<E: EnumArray<Slot>, C> {
    clock: C,
    slots: EnumMap<E, Slot>,
}

impl<E: EnumArray<Slot> + Copy, C: Clock> Deferred<E, C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            slots: EnumMap::default(),
        }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Arms the task chosen by `which` to fire `delay` milliseconds from now,
    /// carrying `token`. This replaces any prior setting for the task.
    pub fn schedule(&mut self, which: E, delay: u64, token: u32) {
        let deadline = self.clock.now().saturating_add(delay);
        self.slots[which] = Slot {
            deadline: Some((deadline, token)),
            fired: None,
        };
    }

    /// Disarms every task, including any that fired without being observed.
    pub fn cancel_all(&mut self) {
        for slot in self.slots.values_mut() {
            *slot = Slot::default();
        }
    }

    /// The earliest pending deadline, which is when the worker next needs to
    /// wake up.
    pub fn next_deadline(&self) -> Option<u64> {
        self.slots
            .values()
            .filter_map(|slot| slot.deadline)
            .map(|(dl, _token)| dl)
            .min()
    }

    /// Checks all deadlines against the clock, marking each task whose
    /// deadline has passed as fired. Fired tasks can be read out
    /// (destructively) using `iter_fired()`.
    pub fn poll_now(&mut self) {
        let t = self.clock.now();
        for slot in self.slots.values_mut() {
            if let Some((d, token)) = slot.deadline {
                if d <= t {
                    slot.deadline = None;
                    slot.fired = Some(token);
                }
            }
        }
    }

    /// Returns an iterator over all tasks that have fired since the last time
    /// they were observed through this function, with the token each was
    /// armed with.
    ///
    /// Tasks that have fired will appear in the order given by their `Enum`
    /// implementation, which in practice means declaration order.
    ///
    /// If you drop the iterator before it's exhausted, any tasks you didn't
    /// observe will appear next time you call this.
    pub fn iter_fired(&mut self) -> impl Iterator<Item = (E, u32)> + '_ {
        self.slots
            .iter_mut()
            .filter_map(|(e, slot)| slot.fired.take().map(|token| (e, token)))
    }
}

#[derive(Copy, Clone, Default)]
pub struct Slot {
    deadline: Option<(u64, u32)>,
    fired: Option<u32>,
}
