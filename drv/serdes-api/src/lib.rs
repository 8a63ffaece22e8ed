// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! API types for bringing up video SerDes links.
//!
//! A link is one serializer feeding one or two deserializers over FPD-Link or
//! GMSL. The types here are shared between the device drivers, which know how
//! to program registers, and the link server, which owns a link instance and
//! reports on its progress.

#![no_std]

use enum_map::Enum;
use hubpack::SerializedSize;
use num_derive::FromPrimitive;
use serde::{Deserialize, Serialize};

/// The serial link protocol family of a chip set. This determines register
/// addressing width and which bring-up plan is used.
#[derive(
    Copy,
    Clone,
    Debug,
    FromPrimitive,
    Eq,
    PartialEq,
    Serialize,
    Deserialize,
    SerializedSize,
)]
#[repr(u8)]
pub enum ChipFamily {
    /// TI DS90Ux983 serializer with a DS90Ux984 deserializer
    FpdLink = 1,
    /// Maxim MAX96789 DSI serializer with MAX96772 eDP deserializers
    Gmsl = 2,
}

impl ChipFamily {
    pub const fn address_width(self) -> AddressWidth {
        match self {
            ChipFamily::FpdLink => AddressWidth::Byte,
            ChipFamily::Gmsl => AddressWidth::Word,
        }
    }
}

/// Width of a register address on the wire.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize, SerializedSize,
)]
pub enum AddressWidth {
    /// One address byte, registers `0x00..=0xff`
    Byte,
    /// Two address bytes, high byte first
    Word,
}

impl AddressWidth {
    pub const fn max_register(self) -> u16 {
        match self {
            AddressWidth::Byte => 0xff,
            AddressWidth::Word => 0xffff,
        }
    }

    pub const fn fits(self, reg: u16) -> bool {
        reg <= self.max_register()
    }
}

/// Identifies a physical I2C bus.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize, SerializedSize,
)]
pub struct BusId(pub u8);

/// One physical chip's register space.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize, SerializedSize,
)]
pub struct DeviceHandle {
    pub bus: BusId,
    /// 7-bit bus address
    pub address: u8,
    pub width: AddressWidth,
}

impl DeviceHandle {
    pub const fn new(bus: BusId, address: u8, family: ChipFamily) -> Self {
        Self {
            bus,
            address,
            width: family.address_width(),
        }
    }
}

/// The part a chip plays in a link.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Role {
    Serializer,
    /// The first (or only) deserializer
    Deserializer,
    /// The second deserializer, used when the image is split across two
    /// links
    DeserializerB,
}

/// The chips making up one link.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DeviceSet {
    pub serializer: DeviceHandle,
    pub deserializer: Option<DeviceHandle>,
    pub deserializer_b: Option<DeviceHandle>,
}

impl DeviceSet {
    pub fn get(&self, role: Role) -> Option<DeviceHandle> {
        match role {
            Role::Serializer => Some(self.serializer),
            Role::Deserializer => self.deserializer,
            Role::DeserializerB => self.deserializer_b,
        }
    }
}

/// Named display timings understood by the eDP deserializer.
#[derive(
    Copy,
    Clone,
    Debug,
    FromPrimitive,
    Eq,
    PartialEq,
    Serialize,
    Deserialize,
    SerializedSize,
)]
#[repr(u8)]
pub enum TimingProfile {
    Dsi480 = 0,
    Dsi768 = 1,
    Dsi720p = 2,
    Dsi1080p = 3,
}

/// A timing profile plus whether the image is split across two physical
/// links.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DisplayMode {
    pub timing: TimingProfile,
    pub split: bool,
}

/// Link rate selected by the serializer's mode straps.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum StrapRate {
    /// FPD-Link III, or strap default
    #[default]
    FpdIii,
    Fpd4Gbps10_8,
    Fpd4Gbps13_5,
    Fpd4Gbps6_75,
    Fpd4Gbps3_375,
}

impl StrapRate {
    pub fn is_fpd4(self) -> bool {
        self != StrapRate::FpdIii
    }
}

/// The three kinds of lock poller a link can run.
#[derive(
    Copy,
    Clone,
    Debug,
    Enum,
    Eq,
    PartialEq,
    Serialize,
    Deserialize,
    SerializedSize,
)]
pub enum PollerKind {
    /// FPD-Link serializer video processors synchronized to the DP input
    VideoProcessorSync,
    /// GMSL serializer pixel clock, error and sync status
    GmslSerializerLock,
    /// GMSL deserializer subsystem and video lock
    GmslDeserializerLock,
}

/// Scheduling parameters for one lock poller.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PollTiming {
    /// Delay from the end of the preceding phase to the first poll
    pub initial_delay_ms: u64,
    /// Settle time at the start of each poll, before sampling
    pub settle_ms: u32,
    /// Delay between a failed poll and the next one
    pub poll_interval_ms: u64,
    pub max_attempts: u8,
}

impl PollTiming {
    pub const VP_SYNC: Self = Self {
        initial_delay_ms: 100,
        settle_ms: 20,
        poll_interval_ms: 100,
        max_attempts: 10,
    };

    pub const GMSL_SERIALIZER: Self = Self {
        initial_delay_ms: 500,
        settle_ms: 0,
        poll_interval_ms: 500,
        max_attempts: 10,
    };

    pub const GMSL_DESERIALIZER: Self = Self {
        initial_delay_ms: 100,
        settle_ms: 0,
        poll_interval_ms: 100,
        max_attempts: 10,
    };

    pub const fn default_for(kind: PollerKind) -> Self {
        match kind {
            PollerKind::VideoProcessorSync => Self::VP_SYNC,
            PollerKind::GmslSerializerLock => Self::GMSL_SERIALIZER,
            PollerKind::GmslDeserializerLock => Self::GMSL_DESERIALIZER,
        }
    }
}

/// Where a link instance is in its bring-up.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize, SerializedSize,
)]
pub enum LinkState {
    Down,
    ConfiguringSerializer,
    Polling(PollerKind),
    ConfiguringDeserializer,
    Live,
    Failed,
}

/// What a register access does when the bus transfer fails.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorPolicy {
    /// Abort the current stage and surface the failure.
    #[default]
    Propagate,
    /// Trace the failure and carry on as if the access succeeded; a failed
    /// read yields `0x00`. This matches the behavior of older drivers and
    /// exists for regression comparison against them.
    IgnoreLegacy,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TransportError {
    /// The addressed device did not acknowledge
    NoAck,
    /// The transfer completed fewer messages than requested
    IoFailure,
    /// The register address does not fit the device's address width
    BadRegister(u16),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StageError {
    /// Operation `index` of `stage` failed; no later operation was issued.
    OperationFailed {
        stage: &'static str,
        index: usize,
        cause: TransportError,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ModeDetectionError {
    /// The low nibble of the mode strap status matched no known rate
    UnrecognizedStrap(u8),
    /// No timing profile exists for this resolution
    UnrecognizedTiming { h: u16, v: u16 },
    /// The chip family has no plan for this timing profile
    UnsupportedProfile(TimingProfile),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BringUpError {
    Stage(StageError),
    ModeDetection(ModeDetectionError),
    /// The device set lacks a chip the plan needs
    MissingDevice(Role),
    /// A device sits on a bus the link server was not given
    WrongBus(Role),
}

impl From<StageError> for BringUpError {
    fn from(e: StageError) -> Self {
        Self::Stage(e)
    }
}

impl From<ModeDetectionError> for BringUpError {
    fn from(e: ModeDetectionError) -> Self {
        Self::ModeDetection(e)
    }
}

/// A lock poller ran out of attempts.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LockTimeout {
    pub poller: PollerKind,
    pub attempts: u8,
}

/// Something a link instance reports asynchronously.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LinkEvent {
    /// A poller saw every supervised channel locked.
    Locked(PollerKind),
    /// Every phase is complete and video is flowing.
    Live,
    /// A poller gave up; the link stays down.
    Exhausted(LockTimeout),
    /// A phase after a successful lock failed to program.
    Failed(BringUpError),
}

/// A [`LinkEvent`] tagged with the generation of the bring-up that caused it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LinkNotification {
    pub generation: u32,
    pub event: LinkEvent,
}
