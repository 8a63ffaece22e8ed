// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! FPD-Link bring-up: DS90Ux983 serializer and DS90Ux984 deserializer
//!
//! Bring-up happens in two halves. [`bring_up_serializer`] programs the
//! serializer for two 1920x1080 video processors fed from one DP input, and
//! must be followed by polling [`vp_lock_spec`] until both processors are
//! synchronized. Once they are, [`post_lock_plan`] maps the streams onto the
//! FPD ports and programs the deserializer behind them.
//!
//! The PLL values are for an FPD-Link III link at 5.1975 Gbps on both
//! ports. If the straps report an FPD-Link IV rate, the back channel is
//! reconfigured as well.

use crate::lock::{LockChannel, LockSpec, StatusCheck, StatusReg};
use crate::paged::{data, seek, select};
use crate::plan::{bounded, plan_of, run_plan, run_plan_with, ChipSet, Plan};
use crate::regmap::ds90ux983::{self as ser, dp, pll, vp};
use crate::regmap::ds90ux984 as des;
use crate::regmap::{apb, GeneralCfg, GeneralCtl, VpStatus};
use crate::stage::{delay_ms, r, rmw, w, OpList, RegOp, Stage};
use crate::{RegisterRw, Sleep};
use drv_serdes_api::{
    BringUpError, DisplayMode, ErrorPolicy, ModeDetectionError, PollerKind,
    Role, StageError, StrapRate, TimingProfile,
};
use ringbuf::*;

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Strap { tx_mode: u8, general_cfg: u8 },
    NoSerializer,
    ForcedFpd3,
    Rate(StrapRate),
    UnrecognizedStrap(u8),
    DeserializerId(u8),
    NoDeserializer,
}

ringbuf!(Trace, 16, Trace::None);

/// The only display mode the FPD-Link plan is built for.
pub const SUPPORTED_MODE: DisplayMode = DisplayMode {
    timing: TimingProfile::Dsi1080p,
    split: false,
};

/// Video timing as programmed into a serializer video processor.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct VideoTiming {
    pub h_active: u16,
    pub h_back_porch: u16,
    pub h_sync: u16,
    pub h_total: u16,
    pub v_active: u16,
    pub v_back_porch: u16,
    pub v_sync: u16,
    pub v_front_porch: u16,
}

pub const TIMING_1080P: VideoTiming = VideoTiming {
    h_active: 1920,
    h_back_porch: 148,
    h_sync: 44,
    h_total: 2200,
    v_active: 1080,
    v_back_porch: 36,
    v_sync: 5,
    v_front_porch: 4,
};

/// Checks that a display mode can be driven by this plan.
pub fn check_mode(mode: DisplayMode) -> Result<(), ModeDetectionError> {
    if mode == SUPPORTED_MODE {
        Ok(())
    } else {
        Err(ModeDetectionError::UnsupportedProfile(mode.timing))
    }
}

/// Classifies the low nibble of `TX_MODE_STS`.
pub fn decode_strap(tx_mode_sts: u8) -> Option<StrapRate> {
    match tx_mode_sts & 0x0f {
        0x0f => Some(StrapRate::FpdIii),
        0x08 | 0x09 => Some(StrapRate::Fpd4Gbps10_8),
        0x0a | 0x0b => Some(StrapRate::Fpd4Gbps13_5),
        0x0c | 0x0d => Some(StrapRate::Fpd4Gbps6_75),
        0x0e => Some(StrapRate::Fpd4Gbps3_375),
        _ => None,
    }
}

/// Reads the mode straps and works out the link rate.
///
/// A `TX_MODE_STS` of zero usually means the serializer hasn't finished
/// booting; that is traced and `previous` is kept. A strap pattern that
/// matches no rate is an error under [`ErrorPolicy::Propagate`], and keeps
/// `previous` otherwise.
pub fn detect_mode<D: RegisterRw + ?Sized>(
    dev: &mut D,
    previous: StrapRate,
    policy: ErrorPolicy,
) -> Result<StrapRate, BringUpError> {
    let failed = |index, cause| StageError::OperationFailed {
        stage: "detect_mode",
        index,
        cause,
    };
    let tx_mode = dev.read_reg(ser::TX_MODE_STS).map_err(|e| failed(0, e))?;
    let general_cfg = dev.read_reg(ser::GENERAL_CFG).map_err(|e| failed(1, e))?;
    ringbuf_entry!(Trace::Strap {
        tx_mode,
        general_cfg
    });

    if GeneralCfg::from_bits_retain(general_cfg).contains(GeneralCfg::FPD3_MODE)
    {
        ringbuf_entry!(Trace::ForcedFpd3);
        return Ok(StrapRate::FpdIii);
    }
    if tx_mode == 0 {
        ringbuf_entry!(Trace::NoSerializer);
        return Ok(previous);
    }

    match decode_strap(tx_mode) {
        Some(rate) => {
            ringbuf_entry!(Trace::Rate(rate));
            Ok(rate)
        }
        None => {
            let nibble = tx_mode & 0x0f;
            ringbuf_entry!(Trace::UnrecognizedStrap(nibble));
            match policy {
                ErrorPolicy::Propagate => {
                    Err(ModeDetectionError::UnrecognizedStrap(nibble).into())
                }
                ErrorPolicy::IgnoreLegacy => Ok(previous),
            }
        }
    }
}

/// One APB write: address, then four data bytes. The APB interface must
/// already be enabled.
pub const fn apb_write(addr: (u8, u8), value: [u8; 4]) -> [RegOp; 6] {
    let (hi, lo) = addr;
    [
        w(apb::ADDR0, lo),
        w(apb::ADDR1, hi),
        w(apb::DATA0, value[0]),
        w(apb::DATA1, value[1]),
        w(apb::DATA2, value[2]),
        w(apb::DATA3, value[3]),
    ]
}

/// Enables the APB interface, then performs one write.
const fn apb_enable_write(addr: (u8, u8), value: [u8; 4]) -> [RegOp; 7] {
    OpList::new()
        .op(w(apb::CTL, apb::CTL_ENABLE))
        .ops(&apb_write(addr, value))
        .build()
}

/// Points the deserializer alias at the remote chip.
pub const fn prepare_ops(deserializer: u8) -> [RegOp; 3] {
    [
        w(ser::TARGET_ID_0, deserializer),
        w(ser::TARGET_ALIAS_0, deserializer),
        w(ser::TARGET_DEST_0, 0),
    ]
}

#[rustfmt::skip]
static CONFIG: [RegOp; 37] = OpList::new()
    .op(w(apb::CTL, apb::CTL_ENABLE))
    // Hold HPD low while the DP receiver is configured.
    .ops(&apb_write(dp::HPD, [0, 0, 0, 0]))
    // 2.7 Gbps
    .ops(&apb_write(dp::MAX_LINK_RATE, [0x0a, 0, 0, 0]))
    .ops(&apb_write(dp::MAX_LANE_COUNT, [0x04, 0, 0, 0]))
    .ops(&apb_write(dp::MAX_VOD, [0x02, 0, 0, 0]))
    // SST, eDP
    .ops(&apb_write(dp::SST_MODE, [0x14, 0, 0, 0]))
    // HPD high starts link training.
    .ops(&apb_write(dp::HPD, [0x01, 0, 0, 0]))
    .build();

#[rustfmt::skip]
static PORT_CONFIG: [RegOp; 3] = [
    rmw(ser::GENERAL_CFG, GeneralCfg::FPD3_MODE.bits(), GeneralCfg::FPD3_MODE.bits()),
    rmw(ser::FPD4_CFG, ser::FPD4_CFG_TX_MODE, 0),
    // FPD-Link III, independent ports
    w(ser::FPD3_TX_MODE, 0x05),
];

/// 5.1975 Gbps on one port: Ndiv 96, denominator 16777204, numerator
/// 4194301.
const fn pll_port(port: u8) -> [RegOp; 17] {
    let o = port * pll::PORT_STRIDE;
    OpList::new()
        .ops(&select(ser::page::PLL, o + pll::MASH_ORDER))
        .op(data(0x09))
        .op(seek(o + pll::VCO))
        .op(data(0xd0))
        .ops(&select(ser::page::PLL_DIVIDERS, o + pll::NDIV))
        .op(data(0x60))
        .op(data(0x00))
        .op(seek(o + pll::DENOMINATOR))
        .op(data(0xf4))
        .op(data(0xff))
        .op(data(0xff))
        .op(seek(o + pll::NUMERATOR))
        .op(data(0xfd))
        .op(data(0xff))
        .op(data(0x3f))
        .build()
}

#[rustfmt::skip]
static PROGRAM_PLLS: [RegOp; 37] = OpList::new()
    // Half-rate mode: override, set, release override
    .op(w(ser::GENERAL_CTL, 0x11))
    .op(w(ser::GENERAL_CTL, 0xd1))
    .op(w(ser::GENERAL_CTL, 0xd0))
    .ops(&pll_port(0))
    .ops(&pll_port(1))
    .build();

#[rustfmt::skip]
static BACK_CHANNEL: [RegOp; 13] = OpList::new()
    .ops(&select(ser::page::BACK_CHANNEL, 0x06))
    .op(data(0xff))
    .op(seek(0x0d)).op(data(0x70))
    .op(seek(0x0e)).op(data(0x70))
    .op(seek(0x26)).op(data(0xff))
    .op(seek(0x2d)).op(data(0x70))
    .op(seek(0x2e)).op(data(0x70))
    .build();

static RESET_PLLS: [RegOp; 2] = [w(ser::RESET_CTL, ser::RESET_PLLS), delay_ms(20)];

#[rustfmt::skip]
static I2C_PASSTHROUGH: [RegOp; 1] = [
    rmw(ser::GENERAL_CFG, GeneralCfg::I2C_PASSTHROUGH.bits(), GeneralCfg::I2C_PASSTHROUGH.bits()),
];

const fn le(v: u16) -> [RegOp; 2] {
    let [lo, hi] = v.to_le_bytes();
    [data(lo), data(hi)]
}

/// Configures one video processor for `t`, taking its input from DP
/// stream 0.
const fn vp_config(index: u8, t: &VideoTiming) -> [RegOp; 25] {
    let o = index * vp::STRIDE;
    OpList::new()
        .ops(&select(ser::page::VP_CONFIG, o + vp::SRC_SELECT))
        .op(data(0xa8))
        .op(seek(o + vp::H_ACTIVE))
        .ops(&le(t.h_active))
        .op(seek(o + vp::TIMING))
        .ops(&le(t.h_active))
        .ops(&le(t.h_back_porch))
        .ops(&le(t.h_sync))
        .ops(&le(t.h_total))
        .ops(&le(t.v_active))
        .ops(&le(t.v_back_porch))
        .ops(&le(t.v_sync))
        .ops(&le(t.v_front_porch))
        // Positive sync polarity
        .op(seek(o + vp::SYNC_POLARITY))
        .op(data(0x00))
        .build()
}

static VP_CONFIG: [RegOp; 50] = OpList::new()
    .ops(&vp_config(0, &TIMING_1080P))
    .ops(&vp_config(1, &TIMING_1080P))
    .build();

static ENABLE_VPS: [RegOp; 2] = [w(ser::VP_COUNT, 0x01), w(ser::VP_ENABLE, 0x03)];

/// Serializer stages after `prepare` and mode detection.
pub fn serializer_plan(rate: StrapRate) -> Plan<'static> {
    let stage = |name: &'static str, ops: &'static [RegOp]| {
        Some(Stage::new(name, Role::Serializer, ops))
    };
    bounded([
        stage("config", &CONFIG),
        stage("port_config", &PORT_CONFIG),
        stage("program_plls", &PROGRAM_PLLS),
        stage("back_channel", &BACK_CHANNEL).filter(|_| rate.is_fpd4()),
        stage("reset_plls", &RESET_PLLS),
        stage("i2c_passthrough", &I2C_PASSTHROUGH),
        stage("vp_config", &VP_CONFIG),
        stage("enable_vps", &ENABLE_VPS),
    ])
}

/// Programs the serializer up to the point where the video processors can
/// be polled for sync. Returns the detected strap rate.
///
/// `deserializer` is the bus address the remote deserializer answers to.
pub fn bring_up_serializer<D: RegisterRw, S: Sleep + ?Sized>(
    chips: &mut ChipSet<D>,
    deserializer: u8,
    previous: StrapRate,
    policy: ErrorPolicy,
    sleep: &S,
) -> Result<StrapRate, BringUpError> {
    let prepare = prepare_ops(deserializer);
    run_plan(
        chips,
        &[Stage::new("prepare", Role::Serializer, &prepare)],
        sleep,
    )?;
    let rate = detect_mode(chips.get_mut(Role::Serializer)?, previous, policy)?;
    run_plan(chips, &serializer_plan(rate), sleep)?;
    Ok(rate)
}

const VP_PATGEN: u8 = VpStatus::SYNCED.bits();

static VP0_SYNCED: [StatusCheck; 1] = [StatusCheck::new(
    StatusReg::Paged {
        page: ser::page::VP_STATUS,
        offset: vp::STATUS,
    },
    VpStatus::SYNCED.bits(),
    VpStatus::SYNCED.bits(),
)];

static VP1_SYNCED: [StatusCheck; 1] = [StatusCheck::new(
    StatusReg::Paged {
        page: ser::page::VP_STATUS,
        offset: vp::STRIDE + vp::STATUS,
    },
    VpStatus::SYNCED.bits(),
    VpStatus::SYNCED.bits(),
)];

/// A VP running its own pattern generator needs no DP input.
const fn patgen(index: u8) -> StatusCheck {
    StatusCheck::new(
        StatusReg::Paged {
            page: ser::page::VP_STATUS,
            offset: index * vp::STRIDE + vp::PATGEN,
        },
        VP_PATGEN,
        VP_PATGEN,
    )
}

static VIDEO_INPUT_RESET: [RegOp; 6] =
    apb_write(dp::VIDEO_INPUT_RESET, [0x01, 0, 0, 0]);

/// Both video processors synchronized to the DP input.
pub fn vp_lock_spec() -> LockSpec<'static> {
    let channels = bounded([
        Some(LockChannel {
            name: "vp0",
            target: Role::Serializer,
            checks: &VP0_SYNCED,
            bypass: Some(patgen(0)),
        }),
        Some(LockChannel {
            name: "vp1",
            target: Role::Serializer,
            checks: &VP1_SYNCED,
            bypass: Some(patgen(1)),
        }),
    ]);
    LockSpec {
        kind: PollerKind::VideoProcessorSync,
        channels,
        corrective: Some(Stage::new(
            "video_input_reset",
            Role::Serializer,
            &VIDEO_INPUT_RESET,
        )),
    }
}

#[rustfmt::skip]
static STREAM_MAPPING: [RegOp; 5] = [
    // Port 0 takes VP1, port 1 takes VP0.
    w(ser::TX_PORT_SEL, 0x01),
    w(ser::STREAM_SRC, 0x01),
    w(ser::TX_PORT_SEL, 0x12),
    w(ser::STREAM_SRC, 0x00),
    // Enable the FPD-Link III FIFO.
    w(ser::FPD3_FIFO_CFG, 0x2b),
];

#[rustfmt::skip]
static CLEAR_CRC: [RegOp; 4] = [
    rmw(ser::GENERAL_CTL, GeneralCtl::CRC_ERROR_RESET.bits(), GeneralCtl::CRC_ERROR_RESET.bits()),
    rmw(ser::GENERAL_CTL, GeneralCtl::CRC_ERROR_RESET.bits(), 0),
    w(ser::TX_PORT_SEL, 0x01),
    delay_ms(20),
];

static REMOTE_PASSTHROUGH: [RegOp; 1] = [w(ser::REMOTE_I2C_CFG, 0x9a)];

#[rustfmt::skip]
static OVERRIDE_EFUSE: [RegOp; 5] = [
    r(des::DEVICE_ID),
    w(apb::ADDR0, des::EFUSE_OVERRIDE.1),
    w(apb::ADDR1, des::EFUSE_OVERRIDE.0),
    w(apb::CTL, des::EFUSE_COMMIT),
    delay_ms(20),
];

// DTG control for output ports 0 and 1
const DTG_PORT0: u8 = 0x32;
const DTG_PORT1: u8 = 0x62;

#[rustfmt::skip]
static HOLD_DTG_RESET: [RegOp; 5] = OpList::new()
    .ops(&select(des::page::DTG, DTG_PORT0)).op(data(0x06))
    .op(seek(DTG_PORT1)).op(data(0x06))
    .build();

#[rustfmt::skip]
static DISABLE_STREAM_MAPPING: [RegOp; 3] = [
    // Both output ports
    w(des::PORT_SEL, 0x03),
    w(des::FPD4_VIDEO_FWD, 0x00),
    w(des::FPD3_VIDEO_MAP, 0x00),
];

#[rustfmt::skip]
static FORCE_RATE: [RegOp; 12] = OpList::new()
    // 2.7 Gbps, forced, calibration off
    .ops(&select(des::page::DP, 0x81)).op(data(0x60))
    .op(seek(0x82)).op(data(0x03))
    // Four lanes
    .ops(&select(des::page::DP, 0x91)).op(data(0x0c))
    // DP SSCG off
    .ops(&select(des::page::SSCG, 0x0f)).op(data(0x01))
    .op(w(des::RESET_CTL, des::RESET_DPTX_PLL))
    .build();

#[rustfmt::skip]
static SETUP_PORTS: [RegOp; 4] = [
    w(des::PORT_SEL, 0x12),
    w(des::DP_PORT1_CTL, 0x00),
    w(des::PORT_SEL, 0x01),
    w(des::RESET_CTL, des::RESET_DPTX_PLL),
];

#[rustfmt::skip]
static MAP_OUTPUT: [RegOp; 6] = [
    w(des::PORT_SEL, 0x03),
    w(des::FPD4_VIDEO_FWD, 0x00),
    w(des::DC_STREAM_FWD0, 0x00),
    w(des::DC_STREAM_FWD1, 0x00),
    w(des::FPD3_VIDEO_MAP, 0x0c),
    w(des::PORT_SEL, 0x01),
];

#[rustfmt::skip]
static PROGRAM_PCLK: [RegOp; 9] = [
    w(des::PORT_SEL, 0x01),
    w(des::PCLK_DIV_CTL, 0x01),
    w(des::PCLK_M0, 0x14),
    w(des::PCLK_M1, 0x44),
    w(des::PCLK_M2, 0x02),
    w(des::PCLK_N0, 0xc0),
    w(des::PCLK_N1, 0x7a),
    w(des::PCLK_N2, 0x10),
    w(des::PORT_SEL, 0x01),
];

#[rustfmt::skip]
static SETUP_DTG: [RegOp; 11] = OpList::new()
    // BPP, sync polarities and measurement type
    .ops(&select(des::page::DTG, 0x20)).op(data(0x93))
    // Hstart
    .op(seek(0x29)).op(data(0x80))
    .op(seek(0x2a)).op(data(0xc0))
    // HSW
    .op(seek(0x2f)).op(data(0x40))
    .op(seek(0x30)).op(data(0x2c))
    .build();

#[rustfmt::skip]
static SETUP_DPTX: [RegOp; 71] = OpList::new()
    .op(w(apb::CTL, apb::CTL_ENABLE))
    .ops(&apb_enable_write(des::dptx::BITS_PER_COLOR, [0x20, 0, 0, 0]))
    .ops(&apb_enable_write(des::dptx::PIXEL_WIDTH, [0x04, 0, 0, 0]))
    .ops(&apb_enable_write(des::dptx::MVID, [0x66, 0x46, 0, 0]))
    .ops(&apb_enable_write(des::dptx::NVID, [0x00, 0x80, 0, 0]))
    .ops(&apb_enable_write(des::dptx::TU_MODE, [0, 0, 0, 0]))
    .ops(&apb_enable_write(des::dptx::TU_SIZE, [0x40, 0x00, 0x1a, 0x08]))
    .ops(&apb_enable_write(des::dptx::FIFO_SIZE, [0x06, 0x40, 0, 0]))
    .ops(&apb_enable_write(des::dptx::DATA_COUNT, [0xa0, 0x05, 0, 0]))
    .ops(&apb_enable_write(des::dptx::INTERLACED, [0, 0, 0, 0]))
    .ops(&apb_enable_write(des::dptx::SYNC_POLARITY, [0x0c, 0, 0, 0]))
    .build();

#[rustfmt::skip]
static RELEASE_DTG_RESET: [RegOp; 12] = OpList::new()
    .ops(&select(des::page::DTG, DTG_PORT0)).op(data(0x04))
    .op(seek(DTG_PORT1)).op(data(0x04))
    .ops(&apb_enable_write(des::dptx::HTOTAL, [0x98, 0x08, 0, 0]))
    .build();

static ENABLE_OUTPUT: [RegOp; 7] =
    apb_enable_write(des::dptx::OUTPUT_ENABLE, [0x01, 0, 0, 0]);

/// Everything after the video processors lock: stream mapping on the
/// serializer, then the deserializer behind it.
pub fn post_lock_plan() -> Plan<'static> {
    use Role::{Deserializer as Des, Serializer as Ser};
    plan_of([
        Stage::new("stream_mapping", Ser, &STREAM_MAPPING),
        Stage::new("clear_crc", Ser, &CLEAR_CRC),
        Stage::new("remote_passthrough", Ser, &REMOTE_PASSTHROUGH),
        Stage::new("override_efuse", Des, &OVERRIDE_EFUSE),
        Stage::new("hold_dtg_reset", Des, &HOLD_DTG_RESET),
        Stage::new("disable_stream_mapping", Des, &DISABLE_STREAM_MAPPING),
        Stage::new("force_rate", Des, &FORCE_RATE),
        Stage::new("setup_ports", Des, &SETUP_PORTS),
        Stage::new("map_output", Des, &MAP_OUTPUT),
        Stage::new("program_pclk", Des, &PROGRAM_PCLK),
        Stage::new("setup_dtg", Des, &SETUP_DTG),
        Stage::new("setup_dptx", Des, &SETUP_DPTX),
        Stage::new("release_dtg_reset", Des, &RELEASE_DTG_RESET),
        Stage::new("enable_output", Des, &ENABLE_OUTPUT),
    ])
}

/// Runs [`post_lock_plan`], tracing whether the deserializer identified
/// itself. A device ID of zero is suspicious but not fatal.
pub fn finish<D: RegisterRw, S: Sleep + ?Sized>(
    chips: &mut ChipSet<D>,
    sleep: &S,
) -> Result<(), BringUpError> {
    run_plan_with(chips, &post_lock_plan(), sleep, |stage, reg, value| {
        if stage == "override_efuse" && reg == des::DEVICE_ID {
            if value == 0 {
                ringbuf_entry!(Trace::NoDeserializer);
            } else {
                ringbuf_entry!(Trace::DeserializerId(value));
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::{sample_all, LockPoller, Transition};
    use crate::mock::{FakeClock, Location, ModelBus, Transaction};
    use crate::regmap::indirect::{OFFSET, PAGE};
    use crate::{I2cDevice, SharedBus};
    use drv_serdes_api::{
        AddressWidth, BusId, ChipFamily, DeviceHandle, PollTiming,
        TransportError,
    };

    const SER: u8 = 0x14;
    const DES: u8 = 0x30;

    fn bus(tx_mode: u8, general_cfg: u8) -> SharedBus<ModelBus> {
        let mut model = ModelBus::new();
        model.add_device(SER, AddressWidth::Byte);
        model.add_device(DES, AddressWidth::Byte);
        let ser = model.device_mut(SER).unwrap();
        ser.enable_paging();
        ser.set(0x27, tx_mode);
        ser.set(0x07, general_cfg);
        model.device_mut(DES).unwrap().enable_paging();
        SharedBus::new(BusId(0), model)
    }

    fn chips(
        bus: &SharedBus<ModelBus>,
        policy: ErrorPolicy,
    ) -> ChipSet<I2cDevice<'_, ModelBus>> {
        let h = |a| DeviceHandle::new(BusId(0), a, ChipFamily::FpdLink);
        ChipSet {
            serializer: I2cDevice::new(bus, h(SER), policy),
            deserializer: Some(I2cDevice::new(bus, h(DES), policy)),
            deserializer_b: None,
        }
    }

    #[test]
    fn strap_decoding() {
        assert_eq!(decode_strap(0x08), Some(StrapRate::Fpd4Gbps10_8));
        assert_eq!(decode_strap(0x09), Some(StrapRate::Fpd4Gbps10_8));
        assert_eq!(decode_strap(0x0a), Some(StrapRate::Fpd4Gbps13_5));
        assert_eq!(decode_strap(0x0b), Some(StrapRate::Fpd4Gbps13_5));
        assert_eq!(decode_strap(0x0c), Some(StrapRate::Fpd4Gbps6_75));
        assert_eq!(decode_strap(0x0d), Some(StrapRate::Fpd4Gbps6_75));
        assert_eq!(decode_strap(0x0e), Some(StrapRate::Fpd4Gbps3_375));
        assert_eq!(decode_strap(0x0f), Some(StrapRate::FpdIii));
        // Only the low nibble counts.
        assert_eq!(decode_strap(0xf8), Some(StrapRate::Fpd4Gbps10_8));
        for n in 0..8 {
            assert_eq!(decode_strap(n), None);
        }
    }

    #[test]
    fn unlisted_strap_leaves_rate_unchanged_in_legacy_mode() {
        let bus = bus(0x03, 0x00);
        let mut c = chips(&bus, ErrorPolicy::IgnoreLegacy);
        assert_eq!(
            detect_mode(
                &mut c.serializer,
                StrapRate::Fpd4Gbps13_5,
                ErrorPolicy::IgnoreLegacy
            ),
            Ok(StrapRate::Fpd4Gbps13_5)
        );
    }

    #[test]
    fn unlisted_strap_is_an_error() {
        let bus = bus(0x03, 0x00);
        let mut c = chips(&bus, ErrorPolicy::Propagate);
        assert_eq!(
            detect_mode(&mut c.serializer, StrapRate::FpdIii, ErrorPolicy::Propagate),
            Err(BringUpError::ModeDetection(
                ModeDetectionError::UnrecognizedStrap(0x03)
            ))
        );
    }

    #[test]
    fn zero_strap_is_tolerated() {
        let bus = bus(0x00, 0x00);
        let mut c = chips(&bus, ErrorPolicy::Propagate);
        assert_eq!(
            detect_mode(
                &mut c.serializer,
                StrapRate::Fpd4Gbps6_75,
                ErrorPolicy::Propagate
            ),
            Ok(StrapRate::Fpd4Gbps6_75)
        );
    }

    #[test]
    fn fpd3_strap_overrides_tx_mode() {
        let bus = bus(0x08, 0x01);
        let mut c = chips(&bus, ErrorPolicy::Propagate);
        assert_eq!(
            detect_mode(
                &mut c.serializer,
                StrapRate::Fpd4Gbps10_8,
                ErrorPolicy::Propagate
            ),
            Ok(StrapRate::FpdIii)
        );
    }

    #[test]
    fn only_1080p_is_supported() {
        assert_eq!(check_mode(SUPPORTED_MODE), Ok(()));
        assert_eq!(
            check_mode(DisplayMode {
                timing: TimingProfile::Dsi720p,
                split: false
            }),
            Err(ModeDetectionError::UnsupportedProfile(TimingProfile::Dsi720p))
        );
        assert_eq!(
            check_mode(DisplayMode {
                timing: TimingProfile::Dsi1080p,
                split: true
            }),
            Err(ModeDetectionError::UnsupportedProfile(
                TimingProfile::Dsi1080p
            ))
        );
    }

    #[test]
    fn back_channel_stage_only_at_fpd4_rates() {
        let names = |rate| -> Vec<_> {
            serializer_plan(rate).iter().map(|s| s.name).collect()
        };
        let fpd3 = [
            "config",
            "port_config",
            "program_plls",
            "reset_plls",
            "i2c_passthrough",
            "vp_config",
            "enable_vps",
        ];
        assert_eq!(names(StrapRate::FpdIii), fpd3);
        let fpd4 = names(StrapRate::Fpd4Gbps10_8);
        assert_eq!(fpd4.len(), fpd3.len() + 1);
        assert_eq!(fpd4[3], "back_channel");
        assert_eq!(post_lock_plan().len(), 14);
    }

    /// Writes as `(register, value)`, with register reads elided.
    fn writes(bus: &SharedBus<ModelBus>, addr: u8) -> Vec<(u16, u8)> {
        bus.with(|m| m.writes_to(addr))
    }

    fn block(regs: &[u16], vals: &[u8]) -> Vec<(u16, u8)> {
        regs.iter().copied().zip(vals.iter().copied()).collect()
    }

    fn apb(addr: (u8, u8), d: [u8; 4]) -> Vec<(u16, u8)> {
        block(
            &[0x49, 0x4a, 0x4b, 0x4c, 0x4d, 0x4e],
            &[addr.1, addr.0, d[0], d[1], d[2], d[3]],
        )
    }

    fn pll_golden(o: u8) -> Vec<(u16, u8)> {
        vec![
            (0x40, 0x08), (0x41, o + 0x04), (0x42, 0x09),
            (0x41, o + 0x13), (0x42, 0xd0),
            (0x40, 0x0a), (0x41, o + 0x05), (0x42, 0x60), (0x42, 0x00),
            (0x41, o + 0x18), (0x42, 0xf4), (0x42, 0xff), (0x42, 0xff),
            (0x41, o + 0x1e), (0x42, 0xfd), (0x42, 0xff), (0x42, 0x3f),
        ]
    }

    fn vp_golden(o: u8) -> Vec<(u16, u8)> {
        let mut v = vec![
            (0x40, 0x32), (0x41, o + 0x01), (0x42, 0xa8),
            (0x41, o + 0x02), (0x42, 0x80), (0x42, 0x07),
            (0x41, o + 0x10),
        ];
        for b in [
            0x80, 0x07, 0x94, 0x00, 0x2c, 0x00, 0x98, 0x08,
            0x38, 0x04, 0x24, 0x00, 0x05, 0x00, 0x04, 0x00,
        ] {
            v.push((0x42, b));
        }
        v.extend([(0x41, o + 0x27), (0x42, 0x00)]);
        v
    }

    fn serializer_golden(general_cfg: u8, fpd4: bool) -> Vec<(u16, u8)> {
        let mut g = vec![(0x70, DES), (0x78, DES), (0x88, 0x00), (0x48, 0x01)];
        g.extend(apb((0x00, 0x00), [0x00, 0, 0, 0]));
        g.extend(apb((0x00, 0x74), [0x0a, 0, 0, 0]));
        g.extend(apb((0x00, 0x70), [0x04, 0, 0, 0]));
        g.extend(apb((0x02, 0x14), [0x02, 0, 0, 0]));
        g.extend(apb((0x00, 0x18), [0x14, 0, 0, 0]));
        g.extend(apb((0x00, 0x00), [0x01, 0, 0, 0]));
        // Port config: read-modify-writes of 0x07 and 0x05.
        let cfg = general_cfg | 0x01;
        g.extend([(0x07, cfg), (0x05, 0x00), (0x59, 0x05)]);
        g.extend([(0x02, 0x11), (0x02, 0xd1), (0x02, 0xd0)]);
        g.extend(pll_golden(0x00));
        g.extend(pll_golden(0x40));
        if fpd4 {
            g.extend([
                (0x40, 0x04), (0x41, 0x06), (0x42, 0xff),
                (0x41, 0x0d), (0x42, 0x70), (0x41, 0x0e), (0x42, 0x70),
                (0x41, 0x26), (0x42, 0xff),
                (0x41, 0x2d), (0x42, 0x70), (0x41, 0x2e), (0x42, 0x70),
            ]);
        }
        g.push((0x01, 0x30));
        g.push((0x07, cfg | 0x08));
        g.extend(vp_golden(0x00));
        g.extend(vp_golden(0x40));
        g.extend([(0x43, 0x01), (0x44, 0x03)]);
        g
    }

    #[test]
    fn serializer_golden_fpd3() {
        let bus = bus(0x0f, 0x00);
        let clock = FakeClock::new();
        let mut c = chips(&bus, ErrorPolicy::Propagate);
        let rate = bring_up_serializer(
            &mut c,
            DES,
            StrapRate::FpdIii,
            ErrorPolicy::Propagate,
            &clock,
        )
        .unwrap();
        assert_eq!(rate, StrapRate::FpdIii);
        assert_eq!(writes(&bus, SER), serializer_golden(0x00, false));
        // The PLL reset settle.
        assert_eq!(clock.now_ms(), 20);
        // Mode detection reads TX_MODE_STS before GENERAL_CFG.
        bus.with(|m| {
            let reads: Vec<u16> = m
                .log()
                .iter()
                .filter_map(|t| match *t {
                    Transaction::Read { reg, .. } => Some(reg),
                    _ => None,
                })
                .collect();
            assert_eq!(&reads[..2], [0x27, 0x07]);
        });
    }

    #[test]
    fn serializer_golden_fpd4_adds_back_channel() {
        let bus = bus(0x09, 0x00);
        let clock = FakeClock::new();
        let mut c = chips(&bus, ErrorPolicy::Propagate);
        let rate = bring_up_serializer(
            &mut c,
            DES,
            StrapRate::FpdIii,
            ErrorPolicy::Propagate,
            &clock,
        )
        .unwrap();
        assert_eq!(rate, StrapRate::Fpd4Gbps10_8);
        assert_eq!(writes(&bus, SER), serializer_golden(0x00, true));
    }

    #[test]
    fn pll_values_land_in_paged_space() {
        let bus = bus(0x0f, 0x00);
        let mut c = chips(&bus, ErrorPolicy::Propagate);
        bring_up_serializer(
            &mut c,
            DES,
            StrapRate::FpdIii,
            ErrorPolicy::Propagate,
            &FakeClock::new(),
        )
        .unwrap();
        bus.with(|m| {
            let d = m.device(SER).unwrap();
            for o in [0x00, 0x40] {
                // Denominator 16777204, little-endian
                assert_eq!(d.paged(0x0a, o + 0x18), 0xf4);
                assert_eq!(d.paged(0x0a, o + 0x19), 0xff);
                assert_eq!(d.paged(0x0a, o + 0x1a), 0xff);
                // Ndiv 96
                assert_eq!(d.paged(0x0a, o + 0x05), 0x60);
            }
            // VP1 vertical front porch
            assert_eq!(d.paged(0x32, 0x40 + 0x1e), 0x04);
        });
    }

    #[test]
    fn post_lock_golden() {
        let bus = bus(0x0f, 0x00);
        bus.with(|m| {
            let ser = m.device_mut(SER).unwrap();
            ser.set(0x02, 0xd0);
            m.device_mut(DES).unwrap().set(0x00, 0x84);
        });
        let clock = FakeClock::new();
        let mut c = chips(&bus, ErrorPolicy::Propagate);
        finish(&mut c, &clock).unwrap();

        assert_eq!(
            writes(&bus, SER),
            [
                (0x2d, 0x01), (0x57, 0x01), (0x2d, 0x12), (0x57, 0x00),
                (0x5b, 0x2b),
                (0x02, 0xf0), (0x02, 0xd0), (0x2d, 0x01),
                (0x03, 0x9a),
            ]
        );

        let mut g = vec![
            (0x49, 0x0c), (0x4a, 0x00), (0x48, 0x1b),
            (0x40, 0x50), (0x41, 0x32), (0x42, 0x06), (0x41, 0x62), (0x42, 0x06),
            (0x0e, 0x03), (0xd0, 0x00), (0xd7, 0x00),
            (0x40, 0x2c), (0x41, 0x81), (0x42, 0x60), (0x41, 0x82), (0x42, 0x03),
            (0x40, 0x2c), (0x41, 0x91), (0x42, 0x0c),
            (0x40, 0x30), (0x41, 0x0f), (0x42, 0x01), (0x01, 0x40),
            (0x0e, 0x12), (0x46, 0x00), (0x0e, 0x01), (0x01, 0x40),
            (0x0e, 0x03), (0xd0, 0x00), (0xd1, 0x00), (0xd6, 0x00),
            (0xd7, 0x0c), (0x0e, 0x01),
            (0x0e, 0x01), (0xb1, 0x01), (0xb2, 0x14), (0xb3, 0x44),
            (0xb4, 0x02), (0xb5, 0xc0), (0xb6, 0x7a), (0xb7, 0x10),
            (0x0e, 0x01),
            (0x40, 0x50), (0x41, 0x20), (0x42, 0x93), (0x41, 0x29),
            (0x42, 0x80), (0x41, 0x2a), (0x42, 0xc0), (0x41, 0x2f),
            (0x42, 0x40), (0x41, 0x30), (0x42, 0x2c),
            (0x48, 0x01),
        ];
        for (addr, d) in [
            ((0x01, 0xa4), [0x20, 0, 0, 0]),
            ((0x01, 0xb8), [0x04, 0, 0, 0]),
            ((0x01, 0xac), [0x66, 0x46, 0, 0]),
            ((0x01, 0xb4), [0x00, 0x80, 0, 0]),
            ((0x01, 0xc8), [0, 0, 0, 0]),
            ((0x01, 0xb0), [0x40, 0x00, 0x1a, 0x08]),
            ((0x00, 0xc8), [0x06, 0x40, 0, 0]),
            ((0x01, 0xbc), [0xa0, 0x05, 0, 0]),
            ((0x01, 0xc0), [0, 0, 0, 0]),
            ((0x01, 0xc4), [0x0c, 0, 0, 0]),
        ] {
            g.push((0x48, 0x01));
            g.extend(apb(addr, d));
        }
        g.extend([
            (0x40, 0x50), (0x41, 0x32), (0x42, 0x04), (0x41, 0x62), (0x42, 0x04),
            (0x48, 0x01),
        ]);
        g.extend(apb((0x01, 0x80), [0x98, 0x08, 0, 0]));
        g.push((0x48, 0x01));
        g.extend(apb((0x00, 0x84), [0x01, 0, 0, 0]));
        assert_eq!(writes(&bus, DES), g);

        // Two 20 ms settles: CRC clear and eFuse override.
        assert_eq!(clock.now_ms(), 40);
    }

    #[test]
    fn absent_deserializer_fails_post_lock() {
        // Nothing answers at the deserializer address.
        let mut model = ModelBus::new();
        model.add_device(SER, AddressWidth::Byte);
        let bus = SharedBus::new(BusId(0), model);
        let mut c = chips(&bus, ErrorPolicy::Propagate);
        assert_eq!(
            finish(&mut c, &FakeClock::new()),
            Err(BringUpError::Stage(StageError::OperationFailed {
                stage: "override_efuse",
                index: 0,
                cause: TransportError::NoAck,
            }))
        );
    }

    #[test]
    fn vp_lock_is_sampled_from_the_status_page() {
        let bus = bus(0x0f, 0x00);
        let mut c = chips(&bus, ErrorPolicy::Propagate);
        let spec = vp_lock_spec();
        assert!(!sample_all(&mut c, &spec).unwrap());

        bus.with(|m| {
            let d = m.device_mut(SER).unwrap();
            d.set_paged(0x31, 0x30, 0x01);
            d.set_paged(0x31, 0x70, 0x01);
        });
        assert!(sample_all(&mut c, &spec).unwrap());
    }

    #[test]
    fn patgen_bypasses_vp_sync() {
        let bus = bus(0x0f, 0x00);
        bus.with(|m| {
            let d = m.device_mut(SER).unwrap();
            // VP0 runs its pattern generator and never syncs; VP1 syncs.
            d.set_paged(0x31, 0x28, 0x01);
            d.set_paged(0x31, 0x70, 0x01);
        });
        let mut c = chips(&bus, ErrorPolicy::Propagate);
        assert!(sample_all(&mut c, &vp_lock_spec()).unwrap());
    }

    #[test]
    fn retry_issues_video_input_reset() {
        let bus = bus(0x0f, 0x00);
        bus.with(|m| {
            let d = m.device_mut(SER).unwrap();
            d.script(Location::Paged { page: 0x31, offset: 0x30 }, &[0, 1]);
            d.set_paged(0x31, 0x70, 0x01);
        });
        let clock = FakeClock::new();
        let mut c = chips(&bus, ErrorPolicy::Propagate);
        let mut poller = LockPoller::new(vp_lock_spec(), PollTiming::VP_SYNC);

        assert_eq!(
            poller.poll(&mut c, &clock).unwrap(),
            Some(Transition::Retrying { attempt: 1 })
        );
        let reset = writes(&bus, SER)
            .into_iter()
            .filter(|(reg, _)| (0x49..=0x4e).contains(reg))
            .collect::<Vec<_>>();
        assert_eq!(reset, apb((0x00, 0x54), [0x01, 0, 0, 0]));

        bus.with(|m| m.clear_log());
        assert_eq!(
            poller.poll(&mut c, &clock).unwrap(),
            Some(Transition::Locked)
        );
        // No corrective writes once locked; only the window is touched.
        assert!(writes(&bus, SER)
            .iter()
            .all(|(reg, _)| [PAGE, OFFSET].contains(reg)));
        // Two polls, each with a 20 ms settle.
        assert_eq!(clock.now_ms(), 40);
    }
}
