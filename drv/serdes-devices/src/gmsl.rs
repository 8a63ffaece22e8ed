// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! GMSL bring-up: MAX96789 DSI serializer and MAX96772 eDP deserializers
//!
//! The serializer takes a four-lane DSI input and, in split mode, divides
//! each line across two GMSL links, one per deserializer. Bring-up runs in
//! three phases, each gated on a lock:
//!
//! 1. [`bring_up_serializer`], then poll [`serializer_lock_spec`];
//! 2. [`enable_deserializers`], then poll [`deserializer_lock_spec`];
//! 3. live.

use crate::lock::{LockChannel, LockSpec, StatusCheck, StatusReg};
use crate::plan::{bounded, plan_of, run_plan, ChipSet, Plan};
use crate::regmap::{max96772 as des, max96789 as ser};
use crate::stage::{w, OpList, RegOp, Stage};
use crate::{RegisterRw, Sleep};
use drv_serdes_api::{
    BringUpError, DisplayMode, ModeDetectionError, PollerKind, Role,
    TimingProfile,
};
use ringbuf::*;

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Mode { h: u16, v: u16, mode: DisplayMode },
    UnknownMode { h: u16, v: u16 },
}

ringbuf!(Trace, 8, Trace::None);

/// Resolutions we know how to drive. Split modes are two side-by-side
/// copies of the single-link timing.
#[rustfmt::skip]
const MODES: [((u16, u16), TimingProfile, bool); 6] = [
    ((640, 480),   TimingProfile::Dsi480,   false),
    ((1280, 480),  TimingProfile::Dsi480,   true),
    ((1280, 720),  TimingProfile::Dsi720p,  false),
    ((2560, 720),  TimingProfile::Dsi720p,  true),
    ((1920, 1080), TimingProfile::Dsi1080p, false),
    ((3840, 1080), TimingProfile::Dsi1080p, true),
];

/// Picks the timing profile and split mode for a DSI resolution.
pub fn select_display_mode(
    h: u16,
    v: u16,
) -> Result<DisplayMode, ModeDetectionError> {
    match MODES.iter().find(|(res, _, _)| *res == (h, v)) {
        Some(&(_, timing, split)) => {
            let mode = DisplayMode { timing, split };
            ringbuf_entry!(Trace::Mode { h, v, mode });
            Ok(mode)
        }
        None => {
            ringbuf_entry!(Trace::UnknownMode { h, v });
            Err(ModeDetectionError::UnrecognizedTiming { h, v })
        }
    }
}

#[rustfmt::skip]
const SETUP: [RegOp; 15] = [
    // TX enable Y
    w(ser::REG2, 0x73),
    // Stream ID 0 on PHY A, 1 on PHY B
    w(ser::TX3_A, 0x10),
    w(ser::TX3_B, 0x21),
    w(ser::LANE_MAP_A, 0x4e),
    w(ser::LANE_MAP_B, 0xe4),
    w(ser::MIPI_CLK_SEL, 0x5c),
    w(ser::MIPI_PORT_START, 0x03),
    // Four lanes
    w(ser::MIPI_LANE_COUNT, 0x03),
    w(ser::MIPI_PHY_CFG, 0x06),
    w(ser::SOFT_DTX_EN, 0x98),
    w(ser::SOFT_DTX, 0x24),
    w(ser::SOFT_DTY_EN, 0x98),
    w(ser::SOFT_DTY, 0x24),
    w(ser::DUAL_VIEW_A, 0x07),
    // Video pipe enable
    w(ser::REG2, 0x73),
];

static SETUP_SPLIT: [RegOp; 16] = OpList::new()
    .ops(&SETUP)
    .op(w(ser::CTRL0, ser::CTRL0_SPLIT))
    .build();

static SETUP_SINGLE: [RegOp; 16] = OpList::new()
    .ops(&SETUP)
    .op(w(ser::CTRL0, ser::CTRL0_SINGLE))
    .build();

pub fn serializer_plan(mode: DisplayMode) -> Plan<'static> {
    let ops: &'static [RegOp] = if mode.split {
        &SETUP_SPLIT
    } else {
        &SETUP_SINGLE
    };
    plan_of([Stage::new("setup", Role::Serializer, ops)])
}

/// Programs the serializer. Poll [`serializer_lock_spec`] afterwards.
pub fn bring_up_serializer<D: RegisterRw, S: Sleep + ?Sized>(
    chips: &mut ChipSet<D>,
    mode: DisplayMode,
    sleep: &S,
) -> Result<(), BringUpError> {
    run_plan(chips, &serializer_plan(mode), sleep)
}

static SERIALIZER_LOCKED: [StatusCheck; 3] = [
    StatusCheck::new(
        StatusReg::Direct(ser::PCLK_STATUS),
        ser::PCLK_LOCK_MASK,
        0x8a,
    ),
    StatusCheck::new(StatusReg::Direct(ser::ERR_STATUS), ser::ERR_MASK, 0x00),
    StatusCheck::new(
        StatusReg::Direct(ser::HS_VS_STATUS),
        ser::HS_VS_LOCK_MASK,
        0x73,
    ),
];

/// Pixel clock locked, no errors, HS/VS detected.
pub fn serializer_lock_spec() -> LockSpec<'static> {
    let channels = bounded([Some(LockChannel {
        name: "serializer",
        target: Role::Serializer,
        checks: &SERIALIZER_LOCKED,
        bypass: None,
    })]);
    LockSpec {
        kind: PollerKind::GmslSerializerLock,
        channels,
        corrective: None,
    }
}

/// eDP timing for the deserializer's video output, in the order the
/// timing block lays it out.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct EdpTiming {
    pub h_active: u16,
    pub h_front_porch: u16,
    pub h_sync: u16,
    pub h_back_porch: u16,
    pub v_active: u16,
    pub v_front_porch: u16,
    pub v_sync: u16,
    pub v_back_porch: u16,
    pub h_words: u16,
    pub mvid: u16,
    pub nvid: u16,
    pub tu_size: u16,
    pub sync_polarity: u16,
}

pub const EDP_480: EdpTiming = EdpTiming {
    h_active: 640,
    h_front_porch: 0x10,
    h_sync: 0x60,
    h_back_porch: 0x30,
    v_active: 480,
    v_front_porch: 0x0a,
    v_sync: 0x02,
    v_back_porch: 0x21,
    h_words: 0x3bc,
    mvid: 0x0bf2,
    nvid: 0x8000,
    tu_size: 0x40,
    sync_polarity: 0x0101,
};

pub const EDP_768: EdpTiming = EdpTiming {
    h_active: 1024,
    h_front_porch: 0x18,
    h_sync: 0x88,
    h_back_porch: 0xa0,
    v_active: 768,
    v_front_porch: 0x03,
    v_sync: 0x06,
    v_back_porch: 0x1d,
    h_words: 0x5fc,
    mvid: 0x1ed0,
    nvid: 0x8000,
    tu_size: 0x40,
    sync_polarity: 0x0000,
};

pub const EDP_720P: EdpTiming = EdpTiming {
    h_active: 1280,
    h_front_porch: 0x6e,
    h_sync: 0x1e,
    h_back_porch: 0xe6,
    v_active: 720,
    v_front_porch: 0x05,
    v_sync: 0x05,
    v_back_porch: 0x14,
    h_words: 0x77c,
    mvid: 0x2351,
    nvid: 0x8000,
    tu_size: 0x40,
    sync_polarity: 0x0000,
};

pub const EDP_1080P: EdpTiming = EdpTiming {
    h_active: 1920,
    h_front_porch: 0x58,
    h_sync: 0x2c,
    h_back_porch: 0x94,
    v_active: 1080,
    v_front_porch: 0x04,
    v_sync: 0x05,
    v_back_porch: 0x24,
    h_words: 0xb3c,
    mvid: 0x4666,
    nvid: 0x8000,
    tu_size: 0x40,
    sync_polarity: 0x0000,
};

/// Number of operations in one timing table.
pub const EDP_TABLE_LEN: usize = 49;

impl EdpTiming {
    /// Full deserializer programming for this timing, ending with the
    /// command that starts link training.
    pub const fn table(&self) -> [RegOp; EDP_TABLE_LEN] {
        let fields = [
            self.h_active,
            self.h_front_porch,
            self.h_sync,
            self.h_back_porch,
            self.v_active,
            self.v_front_porch,
            self.v_sync,
            self.v_back_porch,
            self.h_words,
            self.mvid,
            self.nvid,
            self.tu_size,
            self.sync_polarity,
        ];
        let base = des::EDP_TIMING_BASE;
        // 2.7 Gbps, four lanes
        let mut list = OpList::new()
            .op(w(base, 0x0a))
            .op(w(base + 1, 0x00))
            .op(w(base + 2, 0x04))
            .op(w(base + 3, 0x00));
        let mut i = 0;
        while i < fields.len() {
            let [lo, hi] = fields[i].to_le_bytes();
            let reg = base + 4 + 2 * i as u16;
            list = list.op(w(reg, lo)).op(w(reg + 1, hi));
            i += 1;
        }
        let c = des::CLK_REF_BASE;
        let a = des::EDP_AUX_BASE;
        let (cmd0, cmd1) = des::START_LINK_TRAINING;
        list
            // SSC enabled
            .op(w(des::SSC_ENABLE, 0x01))
            .op(w(des::SSC_ENABLE + 1, 0x00))
            .op(w(des::SPREAD_BIT_RATIO, 0x82))
            .op(w(c, 0x50))
            .op(w(c + 1, 0x00))
            .op(w(c + 2, 0x00))
            .op(w(c + 3, 0x40))
            .op(w(c + 4, 0x6c))
            .op(w(c + 5, 0x20))
            .op(w(c + 6, 0x07))
            .op(w(c + 7, 0x00))
            .op(w(a, 0x01))
            .op(w(a + 1, 0x00))
            .op(w(a + 2, 0x00))
            .op(w(a + 3, 0x00))
            .op(w(a + 4, 0x52))
            .op(w(a + 5, 0x00))
            .op(w(des::EDP_COMMAND0, cmd0))
            .op(w(des::EDP_COMMAND1, cmd1))
            .build()
    }
}

static TABLE_480: [RegOp; EDP_TABLE_LEN] = EDP_480.table();
static TABLE_768: [RegOp; EDP_TABLE_LEN] = EDP_768.table();
static TABLE_720P: [RegOp; EDP_TABLE_LEN] = EDP_720P.table();
static TABLE_1080P: [RegOp; EDP_TABLE_LEN] = EDP_1080P.table();

fn timing_table(profile: TimingProfile) -> &'static [RegOp] {
    match profile {
        TimingProfile::Dsi480 => &TABLE_480,
        TimingProfile::Dsi768 => &TABLE_768,
        TimingProfile::Dsi720p => &TABLE_720P,
        TimingProfile::Dsi1080p => &TABLE_1080P,
    }
}

static STREAM_ID_A: [RegOp; 1] = [w(des::STREAM_ID, 0x00)];
static STREAM_ID_B: [RegOp; 1] = [w(des::STREAM_ID, 0x01)];

/// Deserializer programming: stream ID, then the timing table, for A and
/// then (if `with_b`) B.
pub fn deserializer_plan(timing: TimingProfile, with_b: bool) -> Plan<'static> {
    let table = timing_table(timing);
    let b = |stage| Some(stage).filter(|_| with_b);
    bounded([
        Some(Stage::new("stream_id", Role::Deserializer, &STREAM_ID_A)),
        Some(Stage::new("edp_timing", Role::Deserializer, table)),
        b(Stage::new("stream_id", Role::DeserializerB, &STREAM_ID_B)),
        b(Stage::new("edp_timing", Role::DeserializerB, table)),
    ])
}

/// Programs the deserializers once the serializer has locked. B is
/// programmed whenever it is present, and is required in split mode.
/// Poll [`deserializer_lock_spec`] afterwards.
pub fn enable_deserializers<D: RegisterRw, S: Sleep + ?Sized>(
    chips: &mut ChipSet<D>,
    mode: DisplayMode,
    sleep: &S,
) -> Result<(), BringUpError> {
    let with_b = mode.split || chips.deserializer_b.is_some();
    run_plan(chips, &deserializer_plan(mode.timing, with_b), sleep)
}

static DESERIALIZER_LOCKED: [StatusCheck; 3] = [
    StatusCheck::new(
        StatusReg::Direct(des::SS_STATUS0),
        des::SS_LOCK_MASK,
        0x01,
    ),
    StatusCheck::new(StatusReg::Direct(des::SS_STATUS1), des::SS_ERR_MASK, 0x00),
    StatusCheck::new(
        StatusReg::Direct(des::VIDEO_STATUS),
        des::VIDEO_LOCK_MASK,
        0x01,
    ),
];

/// Subsystem locked with no errors and video present, on A and, in split
/// mode, on B.
pub fn deserializer_lock_spec(split: bool) -> LockSpec<'static> {
    let a = LockChannel {
        name: "deserializer_a",
        target: Role::Deserializer,
        checks: &DESERIALIZER_LOCKED,
        bypass: None,
    };
    let b = LockChannel {
        name: "deserializer_b",
        target: Role::DeserializerB,
        ..a
    };
    let channels = bounded([Some(a), Some(b).filter(|_| split)]);
    LockSpec {
        kind: PollerKind::GmslDeserializerLock,
        channels,
        corrective: None,
    }
}
