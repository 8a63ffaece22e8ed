// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Register maps
//!
//! Only the registers that bring-up touches are named here. FPD-Link parts
//! use single-byte register addresses; GMSL parts use two-byte addresses.

use bitflags::bitflags;
use drv_serdes_api::AddressWidth;
use static_assertions::const_assert;

/// Indirect register window shared by the DS90Ux983 and DS90Ux984.
///
/// Write a page to `PAGE` and an offset to `OFFSET`, then access `DATA`.
/// Each access to `DATA` advances the offset by one.
pub mod indirect {
    pub const PAGE: u16 = 0x40;
    pub const OFFSET: u16 = 0x41;
    pub const DATA: u16 = 0x42;
}

/// APB bus bridge shared by the DS90Ux983 and DS90Ux984. A transaction is
/// a two-byte APB address in `ADDR0`/`ADDR1` and four data bytes.
pub mod apb {
    pub const CTL: u16 = 0x48;
    pub const ADDR0: u16 = 0x49;
    pub const ADDR1: u16 = 0x4a;
    pub const DATA0: u16 = 0x4b;
    pub const DATA1: u16 = 0x4c;
    pub const DATA2: u16 = 0x4d;
    pub const DATA3: u16 = 0x4e;

    /// Enables the APB interface
    pub const CTL_ENABLE: u8 = 0x01;
}

/// DS90Ux983 DP to FPD-Link serializer
pub mod ds90ux983 {
    pub const RESET_CTL: u16 = 0x01;
    pub const GENERAL_CTL: u16 = 0x02;
    pub const REMOTE_I2C_CFG: u16 = 0x03;
    pub const FPD4_CFG: u16 = 0x05;
    pub const GENERAL_CFG: u16 = 0x07;
    pub const TX_MODE_STS: u16 = 0x27;
    pub const TX_PORT_SEL: u16 = 0x2d;
    pub const VP_COUNT: u16 = 0x43;
    pub const VP_ENABLE: u16 = 0x44;
    pub const STREAM_SRC: u16 = 0x57;
    pub const FPD3_TX_MODE: u16 = 0x59;
    pub const FPD3_FIFO_CFG: u16 = 0x5b;
    pub const TARGET_ID_0: u16 = 0x70;
    pub const TARGET_ALIAS_0: u16 = 0x78;
    pub const TARGET_DEST_0: u16 = 0x88;

    /// TX mode bits of `FPD4_CFG`
    pub const FPD4_CFG_TX_MODE: u8 = 0x3c;

    /// Resets both FPD PLLs
    pub const RESET_PLLS: u8 = 0x30;

    /// Pages behind the indirect window
    pub mod page {
        pub const BACK_CHANNEL: u8 = 0x04;
        pub const PLL: u8 = 0x08;
        pub const PLL_DIVIDERS: u8 = 0x0a;
        pub const VP_STATUS: u8 = 0x31;
        pub const VP_CONFIG: u8 = 0x32;
    }

    /// Per-port offsets in the PLL pages. Port 1 sits 0x40 above port 0.
    pub mod pll {
        pub const PORT_STRIDE: u8 = 0x40;
        pub const MASH_ORDER: u8 = 0x04;
        pub const VCO: u8 = 0x13;
        pub const NDIV: u8 = 0x05;
        pub const DENOMINATOR: u8 = 0x18;
        pub const NUMERATOR: u8 = 0x1e;
    }

    /// Per-processor offsets in the VP pages. VP1 sits 0x40 above VP0.
    pub mod vp {
        pub const STRIDE: u8 = 0x40;
        pub const SRC_SELECT: u8 = 0x01;
        pub const H_ACTIVE: u8 = 0x02;
        pub const TIMING: u8 = 0x10;
        pub const SYNC_POLARITY: u8 = 0x27;
        pub const PATGEN: u8 = 0x28;
        pub const STATUS: u8 = 0x30;
    }

    /// APB addresses of the DP receiver, as (high, low)
    pub mod dp {
        pub const HPD: (u8, u8) = (0x00, 0x00);
        pub const MAX_VOD: (u8, u8) = (0x02, 0x14);
        pub const SST_MODE: (u8, u8) = (0x00, 0x18);
        pub const VIDEO_INPUT_RESET: (u8, u8) = (0x00, 0x54);
        pub const MAX_LANE_COUNT: (u8, u8) = (0x00, 0x70);
        pub const MAX_LINK_RATE: (u8, u8) = (0x00, 0x74);
    }
}

/// DS90Ux984 FPD-Link to DP deserializer
pub mod ds90ux984 {
    pub const DEVICE_ID: u16 = 0x00;
    pub const RESET_CTL: u16 = 0x01;
    pub const PORT_SEL: u16 = 0x0e;
    pub const DP_PORT1_CTL: u16 = 0x46;
    pub const PCLK_DIV_CTL: u16 = 0xb1;
    pub const PCLK_M0: u16 = 0xb2;
    pub const PCLK_M1: u16 = 0xb3;
    pub const PCLK_M2: u16 = 0xb4;
    pub const PCLK_N0: u16 = 0xb5;
    pub const PCLK_N1: u16 = 0xb6;
    pub const PCLK_N2: u16 = 0xb7;
    pub const FPD4_VIDEO_FWD: u16 = 0xd0;
    pub const DC_STREAM_FWD0: u16 = 0xd1;
    pub const DC_STREAM_FWD1: u16 = 0xd6;
    pub const FPD3_VIDEO_MAP: u16 = 0xd7;

    /// Resets the DP TX PLL
    pub const RESET_DPTX_PLL: u8 = 0x40;

    pub mod page {
        pub const DP: u8 = 0x2c;
        pub const SSCG: u8 = 0x30;
        pub const DTG: u8 = 0x50;
    }

    /// APB addresses for the DP transmitter, as (high, low)
    pub mod dptx {
        pub const HTOTAL: (u8, u8) = (0x01, 0x80);
        pub const OUTPUT_ENABLE: (u8, u8) = (0x00, 0x84);
        pub const BITS_PER_COLOR: (u8, u8) = (0x01, 0xa4);
        pub const MVID: (u8, u8) = (0x01, 0xac);
        pub const TU_SIZE: (u8, u8) = (0x01, 0xb0);
        pub const NVID: (u8, u8) = (0x01, 0xb4);
        pub const PIXEL_WIDTH: (u8, u8) = (0x01, 0xb8);
        pub const DATA_COUNT: (u8, u8) = (0x01, 0xbc);
        pub const INTERLACED: (u8, u8) = (0x01, 0xc0);
        pub const SYNC_POLARITY: (u8, u8) = (0x01, 0xc4);
        pub const FIFO_SIZE: (u8, u8) = (0x00, 0xc8);
        pub const TU_MODE: (u8, u8) = (0x01, 0xc8);
    }

    /// APB address of the eFuse override
    pub const EFUSE_OVERRIDE: (u8, u8) = (0x00, 0x0c);
    /// `apb::CTL` value that commits an eFuse override
    pub const EFUSE_COMMIT: u8 = 0x1b;
}

/// MAX96789 DSI to GMSL serializer
pub mod max96789 {
    pub const REG2: u16 = 0x0002;
    pub const CTRL0: u16 = 0x0010;
    pub const TX3_A: u16 = 0x0053;
    pub const TX3_B: u16 = 0x0057;
    pub const PCLK_STATUS: u16 = 0x0102;
    pub const MIPI_CLK_SEL: u16 = 0x0308;
    pub const MIPI_PORT_START: u16 = 0x0311;
    pub const SOFT_DTX_EN: u16 = 0x031c;
    pub const SOFT_DTY_EN: u16 = 0x031d;
    pub const SOFT_DTX: u16 = 0x0321;
    pub const SOFT_DTY: u16 = 0x0322;
    pub const DUAL_VIEW_A: u16 = 0x032a;
    pub const MIPI_PHY_CFG: u16 = 0x0330;
    pub const MIPI_LANE_COUNT: u16 = 0x0331;
    pub const LANE_MAP_A: u16 = 0x0332;
    pub const LANE_MAP_B: u16 = 0x0333;
    pub const ERR_STATUS: u16 = 0x03a0;
    pub const HS_VS_STATUS: u16 = 0x055d;

    /// `CTRL0` with the splitter enabled and a one-shot reset
    pub const CTRL0_SPLIT: u8 = 0x23;
    /// `CTRL0` for a single link, with a one-shot reset
    pub const CTRL0_SINGLE: u8 = 0x21;

    pub const PCLK_LOCK_MASK: u8 = 0x8a;
    pub const ERR_MASK: u8 = 0xff;
    pub const HS_VS_LOCK_MASK: u8 = 0x73;
}

/// MAX96772 GMSL to eDP deserializer
pub mod max96772 {
    pub const STREAM_ID: u16 = 0x0050;
    pub const VIDEO_STATUS: u16 = 0x01dc;
    pub const SS_STATUS0: u16 = 0x07f0;
    pub const SS_STATUS1: u16 = 0x07f1;
    pub const SPREAD_BIT_RATIO: u16 = 0x6003;
    pub const EDP_COMMAND0: u16 = 0xe776;
    pub const EDP_COMMAND1: u16 = 0xe777;
    /// First register of the eDP timing block, which runs through 0xe7bf
    pub const EDP_TIMING_BASE: u16 = 0xe790;
    pub const EDP_TIMING_END: u16 = 0xe7bf;
    pub const SSC_ENABLE: u16 = 0xe7b0;
    pub const CLK_REF_BASE: u16 = 0xe7b2;
    pub const EDP_AUX_BASE: u16 = 0xe7ba;

    pub const VIDEO_LOCK_MASK: u8 = 0x01;
    pub const SS_LOCK_MASK: u8 = 0x01;
    pub const SS_ERR_MASK: u8 = 0xff;

    /// `EDP_COMMAND0`/`EDP_COMMAND1`: start link training
    pub const START_LINK_TRAINING: (u8, u8) = (0x02, 0x80);
}

bitflags! {
    /// DS90Ux983 `GENERAL_CFG`
    #[derive(PartialEq, Eq, Copy, Clone, Debug)]
    pub struct GeneralCfg: u8 {
        /// Strapped (or forced) to FPD-Link III
        const FPD3_MODE = 1 << 0;
        const I2C_PASSTHROUGH = 1 << 3;
        const _ = !0;
    }
}

bitflags! {
    /// DS90Ux983 `GENERAL_CTL`
    #[derive(PartialEq, Eq, Copy, Clone, Debug)]
    pub struct GeneralCtl: u8 {
        const CRC_ERROR_RESET = 1 << 5;
        const _ = !0;
    }
}

bitflags! {
    /// VP status and pattern generator registers on the `VP_STATUS` page
    #[derive(PartialEq, Eq, Copy, Clone, Debug)]
    pub struct VpStatus: u8 {
        /// `STATUS`: synchronized to the DP input. `PATGEN`: generator on.
        const SYNCED = 1 << 0;
        const _ = !0;
    }
}

const FPD: AddressWidth = AddressWidth::Byte;
const GMSL: AddressWidth = AddressWidth::Word;

const_assert!(FPD.fits(ds90ux983::TARGET_DEST_0));
const_assert!(FPD.fits(ds90ux984::FPD3_VIDEO_MAP));
const_assert!(FPD.fits(apb::DATA3));
const_assert!(GMSL.fits(max96772::EDP_TIMING_END));

// The timing block is written as consecutive 16-bit little-endian fields.
const_assert!(max96772::EDP_TIMING_BASE < max96772::SSC_ENABLE);
const_assert!(max96772::CLK_REF_BASE + 8 == max96772::EDP_AUX_BASE);
const_assert!(max96772::EDP_AUX_BASE + 5 == max96772::EDP_TIMING_END);

// Status masks must select something, and the expected values must lie
// within them, or a lock check could never pass.
const_assert!(max96789::PCLK_LOCK_MASK != 0);
const_assert!(max96789::HS_VS_LOCK_MASK != 0);
const_assert!(max96772::VIDEO_LOCK_MASK != 0);
const_assert!(max96772::SS_LOCK_MASK != 0);
const_assert!(VpStatus::SYNCED.bits() != 0);

// Per-port and per-VP blocks must not wrap the 8-bit offset space.
const_assert!(
    ds90ux983::pll::NUMERATOR as u16 + ds90ux983::pll::PORT_STRIDE as u16 + 2
        <= 0xff
);
const_assert!(
    ds90ux983::vp::STATUS as u16 + ds90ux983::vp::STRIDE as u16 <= 0xff
);
