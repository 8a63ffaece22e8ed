// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Link configuration, read from TOML
//!
//! Every field is optional. An empty document gives the defaults that the
//! drivers were tuned with:
//!
//! ```toml
//! error_policy = "propagate"
//! verify_writes = false
//!
//! [vp_sync]
//! initial_delay_ms = 100
//! settle_ms = 20
//! poll_interval_ms = 100
//! max_attempts = 10
//!
//! [fpd]
//! serializer = 0x14
//! deserializer = 0x30
//!
//! [gmsl]
//! serializer = 0x40
//! deserializer_a = 0x4a
//! deserializer_b = 0x48
//! ```
//!
//! `[gmsl_serializer]` and `[gmsl_deserializer]` tune the GMSL pollers the
//! same way `[vp_sync]` tunes the FPD-Link one.

use drv_serdes_api::{
    BusId, ChipFamily, DeviceHandle, DeviceSet, ErrorPolicy, PollTiming,
    PollerKind,
};
use serde::Deserialize;
use std::fmt;

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinkConfig {
    pub error_policy: ErrorPolicy,
    /// Read every register back after writing it, tracing mismatches
    pub verify_writes: bool,
    pub vp_sync: TimingOverride,
    pub gmsl_serializer: TimingOverride,
    pub gmsl_deserializer: TimingOverride,
    pub fpd: FpdAddresses,
    pub gmsl: GmslAddresses,
}

/// Poller tuning. Fields left out keep the poller's default.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimingOverride {
    pub initial_delay_ms: Option<u64>,
    pub settle_ms: Option<u32>,
    pub poll_interval_ms: Option<u64>,
    pub max_attempts: Option<u8>,
}

impl TimingOverride {
    pub fn apply(&self, base: PollTiming) -> PollTiming {
        PollTiming {
            initial_delay_ms: self
                .initial_delay_ms
                .unwrap_or(base.initial_delay_ms),
            settle_ms: self.settle_ms.unwrap_or(base.settle_ms),
            poll_interval_ms: self
                .poll_interval_ms
                .unwrap_or(base.poll_interval_ms),
            max_attempts: self.max_attempts.unwrap_or(base.max_attempts),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FpdAddresses {
    pub serializer: u8,
    pub deserializer: u8,
}

impl Default for FpdAddresses {
    fn default() -> Self {
        Self {
            serializer: 0x14,
            deserializer: 0x30,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GmslAddresses {
    pub serializer: u8,
    pub deserializer_a: u8,
    pub deserializer_b: u8,
}

impl Default for GmslAddresses {
    fn default() -> Self {
        Self {
            serializer: 0x40,
            deserializer_a: 0x4a,
            deserializer_b: 0x48,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Parse(toml::de::Error),
    /// A device address doesn't fit in seven bits
    BadAddress { field: &'static str, address: u8 },
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        Self::Parse(e)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Parse(e) => write!(f, "bad link config: {e}"),
            ConfigError::BadAddress { field, address } => {
                write!(f, "{field}: {address:#04x} is not a 7-bit address")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl LinkConfig {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let addresses = [
            ("fpd.serializer", self.fpd.serializer),
            ("fpd.deserializer", self.fpd.deserializer),
            ("gmsl.serializer", self.gmsl.serializer),
            ("gmsl.deserializer_a", self.gmsl.deserializer_a),
            ("gmsl.deserializer_b", self.gmsl.deserializer_b),
        ];
        for (field, address) in addresses {
            if address > 0x7f {
                return Err(ConfigError::BadAddress { field, address });
            }
        }
        Ok(())
    }

    /// Timing for `kind`, with any overrides applied.
    pub fn timing(&self, kind: PollerKind) -> PollTiming {
        let o = match kind {
            PollerKind::VideoProcessorSync => &self.vp_sync,
            PollerKind::GmslSerializerLock => &self.gmsl_serializer,
            PollerKind::GmslDeserializerLock => &self.gmsl_deserializer,
        };
        o.apply(PollTiming::default_for(kind))
    }

    /// The configured chips of `family` on `bus`. The second GMSL
    /// deserializer is included only when `split`.
    pub fn device_set(
        &self,
        family: ChipFamily,
        bus: BusId,
        split: bool,
    ) -> DeviceSet {
        let dev = |address| DeviceHandle::new(bus, address, family);
        match family {
            ChipFamily::FpdLink => DeviceSet {
                serializer: dev(self.fpd.serializer),
                deserializer: Some(dev(self.fpd.deserializer)),
                deserializer_b: None,
            },
            ChipFamily::Gmsl => DeviceSet {
                serializer: dev(self.gmsl.serializer),
                deserializer: Some(dev(self.gmsl.deserializer_a)),
                deserializer_b: split.then(|| dev(self.gmsl.deserializer_b)),
            },
        }
    }
}
