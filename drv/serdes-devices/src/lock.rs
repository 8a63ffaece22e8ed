// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Lock polling
//!
//! After a chip is configured, its lock and status bits take a while to
//! become meaningful. A [`LockPoller`] samples them once per call and
//! decides whether the link is locked, should be retried, or has run out of
//! attempts. It does not schedule itself; whoever owns the poller calls
//! [`LockPoller::poll`] again after [`PollTiming::poll_interval_ms`].
//!
//! The same poller serves every kind of lock we wait for. What differs is
//! the [`LockSpec`]: which registers are sampled on which chips, which bits
//! can bypass a check, and what corrective stage is issued between
//! attempts.

use crate::paged::Paged;
use crate::plan::ChipSet;
use crate::stage::{execute, Stage};
use crate::{RegisterRw, Sleep};
use drv_serdes_api::{
    BringUpError, LockTimeout, PollTiming, PollerKind, Role, TransportError,
};
use ringbuf::*;

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Poll { kind: PollerKind, attempt: u8 },
    Channel { name: &'static str, status: ChannelStatus },
    Locked(PollerKind),
    Retrying { kind: PollerKind, attempt: u8 },
    Exhausted { kind: PollerKind, attempts: u8 },
    SampleFailed { name: &'static str, err: TransportError },
}

ringbuf!(Trace, 32, Trace::None);

/// Upper bound on the channels one poller supervises.
pub const MAX_CHANNELS: usize = 4;

/// Where a status bit lives.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StatusReg {
    Direct(u16),
    /// Behind the FPD-Link indirect window
    Paged { page: u8, offset: u8 },
}

/// `(value & mask) == expected`
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StatusCheck {
    pub reg: StatusReg,
    pub mask: u8,
    pub expected: u8,
}

impl StatusCheck {
    /// Panics, at compile time when used in a constant, if the mask is zero
    /// or `expected` has bits outside it.
    pub const fn new(reg: StatusReg, mask: u8, expected: u8) -> Self {
        assert!(mask != 0);
        assert!(expected & !mask == 0);
        Self {
            reg,
            mask,
            expected,
        }
    }

    pub fn matches(&self, value: u8) -> bool {
        value & self.mask == self.expected
    }

    fn sample<D: RegisterRw + ?Sized>(
        &self,
        dev: &mut Paged<'_, D>,
    ) -> Result<bool, TransportError> {
        let value = match self.reg {
            StatusReg::Direct(reg) => dev.read_direct(reg)?,
            StatusReg::Paged { page, offset } => dev.read(page, offset)?,
        };
        Ok(self.matches(value))
    }
}

/// One supervised entity (a video processor, a GMSL link) and the checks
/// that must all pass for it to count as locked.
#[derive(Copy, Clone, Debug)]
pub struct LockChannel<'a> {
    pub name: &'static str,
    pub target: Role,
    pub checks: &'a [StatusCheck],
    /// If this check passes, the channel counts as locked whatever the other
    /// checks say (e.g. a VP fed by its own pattern generator).
    pub bypass: Option<StatusCheck>,
}

/// Everything one poller needs to know about what it's waiting for.
#[derive(Clone, Debug)]
pub struct LockSpec<'a> {
    pub kind: PollerKind,
    pub channels: heapless::Vec<LockChannel<'a>, MAX_CHANNELS>,
    /// Issued after each failed attempt that will be retried
    pub corrective: Option<Stage<'a>>,
}

/// What sampling found for one channel.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ChannelStatus {
    Locked,
    Bypassed,
    NotLocked,
    /// A status register could not be read; treated as not locked.
    Unreadable,
}

impl ChannelStatus {
    pub fn is_locked(self) -> bool {
        matches!(self, ChannelStatus::Locked | ChannelStatus::Bypassed)
    }
}

/// Where a [`LockSession`] is. Lock status itself is never stored; it is
/// sampled fresh on every poll.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SessionState {
    Idle,
    Polling,
    Retrying,
    Locked,
    Exhausted,
}

/// Outcome of one poll.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Transition {
    Locked,
    /// Not locked; poll again. `attempt` counts failed polls so far.
    Retrying { attempt: u8 },
    Exhausted(LockTimeout),
}

/// Attempt bookkeeping for one poller, with no I/O.
///
/// A failed poll is retried while fewer than `max_attempts` retries have
/// been used; the poll after the last retry is final. With a limit of ten
/// and a link that never locks, that is ten `Retrying` outcomes followed by
/// `Exhausted` on the eleventh poll.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LockSession {
    kind: PollerKind,
    attempt_count: u8,
    max_attempts: u8,
    state: SessionState,
}

impl LockSession {
    pub const fn new(kind: PollerKind, max_attempts: u8) -> Self {
        Self {
            kind,
            attempt_count: 0,
            max_attempts,
            state: SessionState::Idle,
        }
    }

    pub fn kind(&self) -> PollerKind {
        self.kind
    }

    pub fn attempt_count(&self) -> u8 {
        self.attempt_count
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, SessionState::Locked | SessionState::Exhausted)
    }

    /// Marks the start of a poll. Returns `false` if the session is already
    /// finished and the poll should not run.
    pub fn begin(&mut self) -> bool {
        if self.is_finished() {
            return false;
        }
        self.state = SessionState::Polling;
        true
    }

    /// Records the outcome of a poll.
    pub fn record(&mut self, locked: bool) -> Transition {
        if locked {
            self.attempt_count = 0;
            self.state = SessionState::Locked;
            Transition::Locked
        } else if self.attempt_count < self.max_attempts {
            self.attempt_count += 1;
            self.state = SessionState::Retrying;
            Transition::Retrying {
                attempt: self.attempt_count,
            }
        } else {
            self.state = SessionState::Exhausted;
            Transition::Exhausted(LockTimeout {
                poller: self.kind,
                attempts: self.attempt_count,
            })
        }
    }
}

fn check_channel<D: RegisterRw + ?Sized>(
    dev: &mut Paged<'_, D>,
    channel: &LockChannel<'_>,
) -> Result<ChannelStatus, TransportError> {
    if let Some(bypass) = &channel.bypass {
        if bypass.sample(dev)? {
            return Ok(ChannelStatus::Bypassed);
        }
    }
    for check in channel.checks {
        if !check.sample(dev)? {
            return Ok(ChannelStatus::NotLocked);
        }
    }
    Ok(ChannelStatus::Locked)
}

/// Samples one channel.
pub fn sample_channel<D: RegisterRw + ?Sized>(
    dev: &mut D,
    channel: &LockChannel<'_>,
) -> ChannelStatus {
    let status = check_channel(&mut Paged::new(dev), channel)
        .unwrap_or_else(|err| {
            ringbuf_entry!(Trace::SampleFailed {
                name: channel.name,
                err
            });
            ChannelStatus::Unreadable
        });
    ringbuf_entry!(Trace::Channel {
        name: channel.name,
        status
    });
    status
}

/// Samples every channel of `spec`. All channels are sampled even after one
/// is found unlocked, so that the trace shows the state of each.
pub fn sample_all<D: RegisterRw>(
    chips: &mut ChipSet<D>,
    spec: &LockSpec<'_>,
) -> Result<bool, BringUpError> {
    let mut all = true;
    for channel in &spec.channels {
        let dev = chips.get_mut(channel.target)?;
        all &= sample_channel(dev, channel).is_locked();
    }
    Ok(all)
}

/// A [`LockSpec`] plus the session tracking attempts against it.
pub struct LockPoller<'a> {
    spec: LockSpec<'a>,
    timing: PollTiming,
    session: LockSession,
}

impl<'a> LockPoller<'a> {
    pub fn new(spec: LockSpec<'a>, timing: PollTiming) -> Self {
        let session = LockSession::new(spec.kind, timing.max_attempts);
        Self {
            spec,
            timing,
            session,
        }
    }

    pub fn kind(&self) -> PollerKind {
        self.spec.kind
    }

    pub fn timing(&self) -> PollTiming {
        self.timing
    }

    pub fn session(&self) -> &LockSession {
        &self.session
    }

    /// Runs one poll: settle, sample, record, and issue the corrective stage
    /// if another attempt will follow.
    ///
    /// Returns `Ok(None)` if the session had already finished. Errors are
    /// reserved for a missing chip or a failed corrective stage; a status
    /// register that can't be read just counts as not locked.
    pub fn poll<D: RegisterRw, S: Sleep + ?Sized>(
        &mut self,
        chips: &mut ChipSet<D>,
        sleep: &S,
    ) -> Result<Option<Transition>, BringUpError> {
        if !self.session.begin() {
            return Ok(None);
        }
        let kind = self.spec.kind;
        ringbuf_entry!(Trace::Poll {
            kind,
            attempt: self.session.attempt_count()
        });

        if self.timing.settle_ms != 0 {
            sleep.sleep_us(self.timing.settle_ms.saturating_mul(1000));
        }

        let locked = sample_all(chips, &self.spec)?;
        let t = self.session.record(locked);
        match t {
            Transition::Locked => ringbuf_entry!(Trace::Locked(kind)),
            Transition::Retrying { attempt } => {
                ringbuf_entry!(Trace::Retrying { kind, attempt });
                if let Some(stage) = &self.spec.corrective {
                    let dev = chips.get_mut(stage.target)?;
                    execute(dev, stage, sleep)?;
                }
            }
            Transition::Exhausted(timeout) => {
                ringbuf_entry!(Trace::Exhausted {
                    kind,
                    attempts: timeout.attempts
                });
            }
        }
        Ok(Some(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{FakeClock, Fault, Location, ModelBus};
    use crate::stage::{w, RegOp};
    use crate::{I2cDevice, SharedBus};
    use drv_serdes_api::{
        AddressWidth, BusId, ChipFamily, DeviceHandle, ErrorPolicy,
        StageError,
    };

    const SER: u8 = 0x40;
    const STATUS: u16 = 0x0102;
    const BYPASS: u16 = 0x0103;

    static CHECKS: [StatusCheck; 1] =
        [StatusCheck::new(StatusReg::Direct(STATUS), 0x0f, 0x0a)];
    static NUDGE: [RegOp; 1] = [w(0x0200, 0x01)];

    fn spec(corrective: bool) -> LockSpec<'static> {
        let mut channels = heapless::Vec::new();
        channels
            .push(LockChannel {
                name: "test",
                target: Role::Serializer,
                checks: &CHECKS,
                bypass: Some(StatusCheck::new(
                    StatusReg::Direct(BYPASS),
                    0x01,
                    0x01,
                )),
            })
            .unwrap();
        LockSpec {
            kind: PollerKind::GmslSerializerLock,
            channels,
            corrective: corrective
                .then(|| Stage::new("nudge", Role::Serializer, &NUDGE)),
        }
    }

    const TIMING: PollTiming = PollTiming {
        initial_delay_ms: 0,
        settle_ms: 0,
        poll_interval_ms: 100,
        max_attempts: 10,
    };

    fn bus(samples: &[u8]) -> SharedBus<ModelBus> {
        let mut model = ModelBus::new();
        model.add_device(SER, AddressWidth::Word);
        model
            .device_mut(SER)
            .unwrap()
            .script(Location::Direct(STATUS), samples);
        SharedBus::new(BusId(0), model)
    }

    fn chips(bus: &SharedBus<ModelBus>) -> ChipSet<I2cDevice<'_, ModelBus>> {
        ChipSet {
            serializer: I2cDevice::new(
                bus,
                DeviceHandle::new(BusId(0), SER, ChipFamily::Gmsl),
                ErrorPolicy::Propagate,
            ),
            deserializer: None,
            deserializer_b: None,
        }
    }

    /// Polls until the session finishes, returning every outcome.
    fn run(
        poller: &mut LockPoller<'_>,
        chips: &mut ChipSet<I2cDevice<'_, ModelBus>>,
    ) -> Vec<Transition> {
        let clock = FakeClock::new();
        let mut out = vec![];
        while let Some(t) = poller.poll(chips, &clock).unwrap() {
            out.push(t);
        }
        out
    }

    #[test]
    fn session_retries_then_exhausts() {
        let mut s = LockSession::new(PollerKind::VideoProcessorSync, 10);
        assert_eq!(s.state(), SessionState::Idle);
        for attempt in 1..=10 {
            assert!(s.begin());
            assert_eq!(s.state(), SessionState::Polling);
            assert_eq!(s.record(false), Transition::Retrying { attempt });
            assert_eq!(s.state(), SessionState::Retrying);
        }
        assert!(s.begin());
        assert_eq!(
            s.record(false),
            Transition::Exhausted(LockTimeout {
                poller: PollerKind::VideoProcessorSync,
                attempts: 10,
            })
        );
        assert_eq!(s.state(), SessionState::Exhausted);
        assert!(!s.begin());
    }

    #[test]
    fn lock_resets_the_attempt_count() {
        let mut s = LockSession::new(PollerKind::GmslDeserializerLock, 10);
        for _ in 0..3 {
            s.begin();
            s.record(false);
        }
        assert_eq!(s.attempt_count(), 3);
        s.begin();
        assert_eq!(s.record(true), Transition::Locked);
        assert_eq!(s.attempt_count(), 0);
        assert!(s.is_finished());
        assert!(!s.begin());
    }

    #[test]
    fn zero_attempts_exhausts_on_first_failure() {
        let mut s = LockSession::new(PollerKind::GmslSerializerLock, 0);
        assert!(s.begin());
        assert!(matches!(s.record(false), Transition::Exhausted(_)));
    }

    #[test]
    fn locks_after_n_failures() {
        for n in [0usize, 1, 5, 9] {
            let mut samples = vec![0x00; n];
            samples.push(0x0a);
            let bus = bus(&samples);
            let mut c = chips(&bus);
            let mut poller = LockPoller::new(spec(false), TIMING);

            let out = run(&mut poller, &mut c);
            assert_eq!(out.len(), n + 1);
            assert_eq!(out.last(), Some(&Transition::Locked));
            assert_eq!(poller.session().state(), SessionState::Locked);
        }
    }

    /// `max_attempts` failures each earn a retry, so the poll after the
    /// last retry is still sampled and may lock. Only a failure with no
    /// retries left exhausts the session.
    #[test]
    fn lock_on_the_poll_after_the_last_retry() {
        let mut samples = vec![0x00; usize::from(TIMING.max_attempts)];
        samples.push(0x0a);
        let bus = bus(&samples);
        let mut c = chips(&bus);
        let mut poller = LockPoller::new(spec(false), TIMING);

        let out = run(&mut poller, &mut c);
        assert_eq!(out.len(), 11);
        assert_eq!(out[9], Transition::Retrying { attempt: 10 });
        assert_eq!(out[10], Transition::Locked);
        assert_eq!(poller.session().state(), SessionState::Locked);
    }

    #[test]
    fn exhausts_when_never_locked() {
        let bus = bus(&[0x00; 12]);
        let mut c = chips(&bus);
        let mut poller = LockPoller::new(spec(false), TIMING);

        let out = run(&mut poller, &mut c);
        assert_eq!(out.len(), 11);
        assert!(out[..10]
            .iter()
            .all(|t| matches!(t, Transition::Retrying { .. })));
        assert_eq!(
            out[10],
            Transition::Exhausted(LockTimeout {
                poller: PollerKind::GmslSerializerLock,
                attempts: 10,
            })
        );
        assert!(!out.contains(&Transition::Locked));
    }

    #[test]
    fn masked_bits_are_ignored() {
        // Upper nibble is outside the mask.
        let bus = bus(&[0xfa]);
        let mut c = chips(&bus);
        let mut poller = LockPoller::new(spec(false), TIMING);
        assert_eq!(
            poller.poll(&mut c, &FakeClock::new()).unwrap(),
            Some(Transition::Locked)
        );
    }

    #[test]
    fn bypass_short_circuits_the_checks() {
        let bus = bus(&[0x00]);
        bus.with(|m| m.device_mut(SER).unwrap().set(BYPASS, 0x01));
        let mut c = chips(&bus);
        let channel = spec(false).channels[0];
        assert_eq!(
            sample_channel(&mut c.serializer, &channel),
            ChannelStatus::Bypassed
        );
        // The status register was never read.
        bus.with(|m| {
            assert!(m.log().iter().all(|t| !matches!(
                t,
                crate::mock::Transaction::Read { reg: STATUS, .. }
            )))
        });
    }

    #[test]
    fn unreadable_status_counts_as_not_locked() {
        let bus = bus(&[0x0a]);
        // Transaction 0 is the bypass read, 1 the status read.
        bus.with(|m| m.inject(Fault::at(1, TransportError::NoAck)));
        let mut c = chips(&bus);
        let channel = spec(false).channels[0];
        assert_eq!(
            sample_channel(&mut c.serializer, &channel),
            ChannelStatus::Unreadable
        );
        assert_eq!(
            sample_channel(&mut c.serializer, &channel),
            ChannelStatus::Locked
        );
    }

    #[test]
    fn corrective_stage_runs_only_between_attempts() {
        let bus = bus(&[0x00]);
        let mut c = chips(&bus);
        let timing = PollTiming {
            max_attempts: 2,
            ..TIMING
        };
        let mut poller = LockPoller::new(spec(true), timing);
        let out = run(&mut poller, &mut c);
        assert_eq!(out.len(), 3);

        // Two retries, two nudges; nothing after exhaustion.
        assert_eq!(
            bus.with(|m| m.writes_to(SER)),
            [(0x0200, 0x01), (0x0200, 0x01)]
        );
    }

    #[test]
    fn failed_corrective_stage_is_an_error() {
        let bus = bus(&[0x00]);
        // Bypass read, status read, then the nudge write.
        bus.with(|m| m.inject(Fault::at(2, TransportError::IoFailure)));
        let mut c = chips(&bus);
        let mut poller = LockPoller::new(spec(true), TIMING);
        assert_eq!(
            poller.poll(&mut c, &FakeClock::new()),
            Err(BringUpError::Stage(StageError::OperationFailed {
                stage: "nudge",
                index: 0,
                cause: TransportError::IoFailure,
            }))
        );
    }

    #[test]
    fn missing_chip_is_an_error() {
        let bus = bus(&[0x0a]);
        let mut c = chips(&bus);
        let mut spec = spec(false);
        spec.channels[0].target = Role::Deserializer;
        let mut poller = LockPoller::new(spec, TIMING);
        assert_eq!(
            poller.poll(&mut c, &FakeClock::new()),
            Err(BringUpError::MissingDevice(Role::Deserializer))
        );
    }

    #[test]
    fn settle_precedes_each_sample() {
        let bus = bus(&[0x00, 0x0a]);
        let mut c = chips(&bus);
        let clock = FakeClock::new();
        let mut poller = LockPoller::new(spec(false), PollTiming::VP_SYNC);
        poller.poll(&mut c, &clock).unwrap();
        assert_eq!(clock.now_ms(), 20);
        poller.poll(&mut c, &clock).unwrap();
        assert_eq!(clock.now_ms(), 40);
        // A finished poller neither sleeps nor samples.
        assert_eq!(poller.poll(&mut c, &clock), Ok(None));
        assert_eq!(clock.now_ms(), 40);
    }
}
