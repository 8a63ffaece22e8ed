// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Link server: owns one SerDes link and drives it from configuration to
//! live video.
//!
//! Bring-up has a synchronous half and a deferred half. `bring_up_link`
//! programs the serializer on the caller's thread and arms the first lock
//! poller; everything after that happens in `handle_timer`, which the
//! owner calls whenever the scheduler's next deadline passes (or lets
//! `run_until_idle` do so).
//!
//! ```text
//! FPD-Link: serializer plan -> VP sync poller -> post-lock plan -> Live
//! GMSL:     serializer plan -> serializer poller -> deserializer plans
//!           -> deserializer poller -> Live
//! ```
//!
//! Every bring-up gets a new generation number, which rides along as the
//! token of each timer it arms. Superseding or tearing down a bring-up
//! disarms its timers; one that had already fired carries an older
//! generation and is ignored.

use deferred::{Clock, Deferred};
use drv_serdes_api::{
    BringUpError, ChipFamily, DeviceSet, DisplayMode, LinkEvent,
    LinkNotification, LinkState, PollerKind, Role, StrapRate,
};
use drv_serdes_devices::lock::{LockPoller, LockSpec, Transition};
use drv_serdes_devices::plan::ChipSet;
use drv_serdes_devices::{
    fpd, gmsl, I2cBus, I2cDevice, RegisterRw, SharedBus, Sleep,
};
use ringbuf::*;
use std::time::{Duration, Instant};

mod config;

pub use config::{
    ConfigError, FpdAddresses, GmslAddresses, LinkConfig, TimingOverride,
};

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    BringUp {
        generation: u32,
        family: ChipFamily,
        mode: DisplayMode,
    },
    Rejected(BringUpError),
    Armed { kind: PollerKind, delay_ms: u64 },
    Fired { kind: PollerKind, token: u32 },
    Stale { kind: PollerKind, token: u32 },
    State(LinkState),
    Failed(BringUpError),
    TearDown { generation: u32 },
}

ringbuf!(Trace, 32, Trace::None);

/// The bring-up currently owned by a server.
#[derive(Copy, Clone, Debug)]
struct Active {
    devices: DeviceSet,
    family: ChipFamily,
    mode: DisplayMode,
}

pub type Notifier<'a> = Box<dyn FnMut(LinkNotification) + 'a>;

/// Context for one link instance: its bus, configuration, scheduler,
/// current lock poller and notification sink. There is no global state, so
/// any number of servers can run side by side, including on one bus.
pub struct LinkServer<'a, B, C: Clock> {
    bus: &'a SharedBus<B>,
    config: LinkConfig,
    deferred: Deferred<PollerKind, C>,
    poller: Option<LockPoller<'static>>,
    active: Option<Active>,
    generation: u32,
    state: LinkState,
    /// Strap rate from the last FPD-Link mode detection
    strap: StrapRate,
    notify: Option<Notifier<'a>>,
}

impl<'a, B: I2cBus, C: Clock + Sleep> LinkServer<'a, B, C> {
    pub fn new(bus: &'a SharedBus<B>, config: LinkConfig, clock: C) -> Self {
        Self {
            bus,
            config,
            deferred: Deferred::new(clock),
            poller: None,
            active: None,
            generation: 0,
            state: LinkState::Down,
            strap: StrapRate::default(),
            notify: None,
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Generation of the most recent bring-up or tear-down.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn clock(&self) -> &C {
        self.deferred.clock()
    }

    /// When `handle_timer` next has work to do, on the server's clock.
    pub fn next_deadline(&self) -> Option<u64> {
        self.deferred.next_deadline()
    }

    /// Installs the sink for [`LinkNotification`]s, replacing any previous
    /// one.
    pub fn on_link_state_changed(
        &mut self,
        notify: impl FnMut(LinkNotification) + 'a,
    ) {
        self.notify = Some(Box::new(notify));
    }

    /// The chips configured for `family`, on this server's bus.
    pub fn configured_devices(
        &self,
        family: ChipFamily,
        mode: DisplayMode,
    ) -> DeviceSet {
        self.config.device_set(family, self.bus.id(), mode.split)
    }

    /// Looks up the display mode for an `h` x `v` image and brings the link
    /// up with it.
    pub fn bring_up_display(
        &mut self,
        devices: DeviceSet,
        family: ChipFamily,
        h: u16,
        v: u16,
    ) -> Result<(), BringUpError> {
        let mode = gmsl::select_display_mode(h, v).inspect_err(|&e| {
            ringbuf_entry!(Trace::Rejected(e.into()));
        })?;
        self.bring_up_link(devices, family, mode)
    }

    /// Runs the synchronous half of bring-up and arms the first lock
    /// poller. Any earlier bring-up of this server is superseded.
    ///
    /// An error here means nothing was armed and the link is `Failed`;
    /// lock results arrive later through the notifier.
    pub fn bring_up_link(
        &mut self,
        devices: DeviceSet,
        family: ChipFamily,
        mode: DisplayMode,
    ) -> Result<(), BringUpError> {
        self.supersede();
        ringbuf_entry!(Trace::BringUp {
            generation: self.generation,
            family,
            mode
        });

        let active = Active {
            devices,
            family,
            mode,
        };
        let result = self.check_devices(&active).and_then(|()| {
            self.set_state(LinkState::ConfiguringSerializer);
            match family {
                ChipFamily::FpdLink => self.start_fpd(&active),
                ChipFamily::Gmsl => self.start_gmsl(&active),
            }
        });

        match result {
            Ok(kind) => {
                self.active = Some(active);
                self.arm(kind);
                Ok(())
            }
            Err(e) => {
                ringbuf_entry!(Trace::Rejected(e));
                self.poller = None;
                self.set_state(LinkState::Failed);
                Err(e)
            }
        }
    }

    /// Abandons the current bring-up and disarms its timers.
    pub fn tear_down(&mut self) {
        self.supersede();
        ringbuf_entry!(Trace::TearDown {
            generation: self.generation
        });
        self.set_state(LinkState::Down);
    }

    /// Runs every poll whose deadline has passed.
    pub fn handle_timer(&mut self) {
        self.deferred.poll_now();
        let fired: heapless::Vec<(PollerKind, u32), 3> =
            self.deferred.iter_fired().collect();
        for (kind, token) in fired {
            self.fire(kind, token);
        }
    }

    /// Sleeps on the server's clock until each deadline in turn and handles
    /// it, returning once nothing is scheduled.
    pub fn run_until_idle(&mut self) {
        while let Some(deadline) = self.deferred.next_deadline() {
            let clock = self.deferred.clock();
            let wait_ms = deadline.saturating_sub(clock.now());
            if wait_ms != 0 {
                let us = wait_ms.saturating_mul(1000);
                clock.sleep_us(u32::try_from(us).unwrap_or(u32::MAX));
            }
            self.handle_timer();
        }
    }

    fn supersede(&mut self) {
        self.deferred.cancel_all();
        self.generation = self.generation.wrapping_add(1);
        self.poller = None;
        self.active = None;
    }

    fn set_state(&mut self, state: LinkState) {
        if self.state != state {
            ringbuf_entry!(Trace::State(state));
            self.state = state;
        }
    }

    fn emit(&mut self, event: LinkEvent) {
        let generation = self.generation;
        if let Some(notify) = &mut self.notify {
            notify(LinkNotification { generation, event });
        }
    }

    fn check_devices(&self, active: &Active) -> Result<(), BringUpError> {
        let devices = &active.devices;
        for role in [Role::Serializer, Role::Deserializer, Role::DeserializerB]
        {
            if let Some(h) = devices.get(role) {
                if h.bus != self.bus.id() {
                    return Err(BringUpError::WrongBus(role));
                }
            }
        }
        if devices.deserializer.is_none() {
            return Err(BringUpError::MissingDevice(Role::Deserializer));
        }
        if active.family == ChipFamily::Gmsl
            && active.mode.split
            && devices.deserializer_b.is_none()
        {
            return Err(BringUpError::MissingDevice(Role::DeserializerB));
        }
        Ok(())
    }

    fn start_fpd(&mut self, active: &Active) -> Result<PollerKind, BringUpError> {
        fpd::check_mode(active.mode)?;
        let deserializer = active
            .devices
            .deserializer
            .ok_or(BringUpError::MissingDevice(Role::Deserializer))?;
        let mut chips = chip_set(self.bus, &active.devices, &self.config);
        self.strap = fpd::bring_up_serializer(
            &mut chips,
            deserializer.address,
            self.strap,
            self.config.error_policy,
            self.deferred.clock(),
        )?;
        self.install(fpd::vp_lock_spec());
        Ok(PollerKind::VideoProcessorSync)
    }

    fn start_gmsl(&mut self, active: &Active) -> Result<PollerKind, BringUpError> {
        let mut chips = chip_set(self.bus, &active.devices, &self.config);
        gmsl::bring_up_serializer(&mut chips, active.mode, self.deferred.clock())?;
        self.install(gmsl::serializer_lock_spec());
        Ok(PollerKind::GmslSerializerLock)
    }

    fn install(&mut self, spec: LockSpec<'static>) {
        let timing = self.config.timing(spec.kind);
        self.poller = Some(LockPoller::new(spec, timing));
    }

    /// Schedules the first poll of the installed poller.
    fn arm(&mut self, kind: PollerKind) {
        let delay_ms = self.config.timing(kind).initial_delay_ms;
        ringbuf_entry!(Trace::Armed { kind, delay_ms });
        self.deferred.schedule(kind, delay_ms, self.generation);
        self.set_state(LinkState::Polling(kind));
    }

    fn fire(&mut self, kind: PollerKind, token: u32) {
        if token != self.generation {
            ringbuf_entry!(Trace::Stale { kind, token });
            return;
        }
        ringbuf_entry!(Trace::Fired { kind, token });

        let Some(active) = self.active else {
            return;
        };
        let Some(poller) = self.poller.as_mut().filter(|p| p.kind() == kind)
        else {
            ringbuf_entry!(Trace::Stale { kind, token });
            return;
        };

        let mut chips = chip_set(self.bus, &active.devices, &self.config);
        match poller.poll(&mut chips, self.deferred.clock()) {
            Ok(Some(Transition::Retrying { .. })) => {
                let interval = poller.timing().poll_interval_ms;
                self.deferred.schedule(kind, interval, self.generation);
            }
            Ok(Some(Transition::Locked)) => {
                self.poller = None;
                self.emit(LinkEvent::Locked(kind));
                if let Err(e) = self.advance(kind, &active, &mut chips) {
                    self.fail(e);
                }
            }
            Ok(Some(Transition::Exhausted(timeout))) => {
                self.poller = None;
                self.set_state(LinkState::Failed);
                self.emit(LinkEvent::Exhausted(timeout));
            }
            Ok(None) => (),
            Err(e) => {
                self.poller = None;
                self.fail(e);
            }
        }
    }

    /// Runs the phase that follows a lock of `kind`.
    fn advance<D: RegisterRw>(
        &mut self,
        kind: PollerKind,
        active: &Active,
        chips: &mut ChipSet<D>,
    ) -> Result<(), BringUpError> {
        match kind {
            PollerKind::VideoProcessorSync => {
                self.set_state(LinkState::ConfiguringDeserializer);
                fpd::finish(chips, self.deferred.clock())?;
                self.go_live();
            }
            PollerKind::GmslSerializerLock => {
                self.set_state(LinkState::ConfiguringDeserializer);
                gmsl::enable_deserializers(
                    chips,
                    active.mode,
                    self.deferred.clock(),
                )?;
                self.install(gmsl::deserializer_lock_spec(active.mode.split));
                self.arm(PollerKind::GmslDeserializerLock);
            }
            PollerKind::GmslDeserializerLock => self.go_live(),
        }
        Ok(())
    }

    fn go_live(&mut self) {
        self.set_state(LinkState::Live);
        self.emit(LinkEvent::Live);
    }

    fn fail(&mut self, e: BringUpError) {
        ringbuf_entry!(Trace::Failed(e));
        self.set_state(LinkState::Failed);
        self.emit(LinkEvent::Failed(e));
    }
}

/// Register access to every chip of `devices`, with the configured error
/// policy.
fn chip_set<'a, B: I2cBus>(
    bus: &'a SharedBus<B>,
    devices: &DeviceSet,
    config: &LinkConfig,
) -> ChipSet<I2cDevice<'a, B>> {
    let dev = |handle| {
        I2cDevice::new(bus, handle, config.error_policy)
            .verify_writes(config.verify_writes)
    };
    ChipSet {
        serializer: dev(devices.serializer),
        deserializer: devices.deserializer.map(dev),
        deserializer_b: devices.deserializer_b.map(dev),
    }
}

/// Wall-clock time for hosts, in milliseconds since construction.
#[derive(Copy, Clone, Debug)]
pub struct StdClock {
    start: Instant,
}

impl StdClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for StdClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for StdClock {
    fn now(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

impl Sleep for StdClock {
    fn sleep_us(&self, us: u32) {
        std::thread::sleep(Duration::from_micros(u64::from(us)));
    }
}
