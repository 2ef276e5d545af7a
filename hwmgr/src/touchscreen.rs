//! Touchscreen controllers found on Q8 boards.

use log::{info, warn};
use num_enum::TryFromPrimitive;

use crate::bus::{BusError, I2cClient};
use crate::probe::{Candidate, ChipModel, DeviceClass, ProbeEnv};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchscreenModel {
    Gsl1680A082,
    Gsl1680B482,
    Ektf2127,
    Zet6251,
}

impl TouchscreenModel {
    pub fn is_gsl1680(&self) -> bool {
        matches!(self, TouchscreenModel::Gsl1680A082 | TouchscreenModel::Gsl1680B482)
    }
}

impl ChipModel for TouchscreenModel {
    fn compatible(&self) -> &'static str {
        match self {
            TouchscreenModel::Gsl1680A082 | TouchscreenModel::Gsl1680B482 => "silead,gsl1680",
            TouchscreenModel::Ektf2127 => "elan,ektf2127",
            TouchscreenModel::Zet6251 => "zeitec,zet6251",
        }
    }
}

const SILEAD_REG_ID: u8 = 0xfc;

/// Chip ids reported by Silead GSL1680 revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
enum SileadChipId {
    A082 = 0xa082_0000,
    B482 = 0xb482_0000,
}

const EKTF2127_REQUEST: u8 = 0x53;
const EKTF2127_RESPONSE: u8 = 0x52;
const EKTF2127_WIDTH: u8 = 0x63;

fn probe_silead(
    client: &mut I2cClient<'_>,
    _: &mut ProbeEnv<'_>,
) -> Result<Option<TouchscreenModel>, BusError> {
    let mut id = [0u8; 4];
    if client.read_i2c_block_data(SILEAD_REG_ID, &mut id)? != id.len() {
        return Ok(None);
    }
    let id = u32::from_le_bytes(id);
    match SileadChipId::try_from(id) {
        Ok(chip) => {
            info!("Silead touchscreen ID: 0x{:08x}", id);
            Ok(Some(match chip {
                SileadChipId::A082 => TouchscreenModel::Gsl1680A082,
                SileadChipId::B482 => TouchscreenModel::Gsl1680B482,
            }))
        }
        Err(_) => {
            warn!("Silead? touchscreen with unknown ID: 0x{:08x}", id);
            Ok(None)
        }
    }
}

fn probe_ektf2127(
    client: &mut I2cClient<'_>,
    env: &mut ProbeEnv<'_>,
) -> Result<Option<TouchscreenModel>, BusError> {
    let mut buf = [0u8; 4];
    // the hello packet depends on the power state, only its size matters
    if client.master_recv(&mut buf)? != buf.len() {
        return Ok(None);
    }
    let request = [EKTF2127_REQUEST, EKTF2127_WIDTH, 0x00, 0x00];
    if client.master_send(&request)? != request.len() {
        return Ok(None);
    }
    env.delay.delay_ms(20);
    if client.master_recv(&mut buf)? != buf.len() {
        return Ok(None);
    }
    Ok((buf[0] == EKTF2127_RESPONSE && buf[1] == EKTF2127_WIDTH)
        .then_some(TouchscreenModel::Ektf2127))
}

fn probe_zet6251(
    client: &mut I2cClient<'_>,
    _: &mut ProbeEnv<'_>,
) -> Result<Option<TouchscreenModel>, BusError> {
    // Without firmware loaded the packet is all 0xff, so only check that a
    // full finger data packet arrives.
    let mut buf = [0u8; 24];
    let len = client.master_recv(&mut buf)?;
    Ok((len == buf.len()).then_some(TouchscreenModel::Zet6251))
}

static CANDIDATES: [Candidate<TouchscreenModel>; 3] = [
    Candidate { addr: 0x40, probe: probe_silead },
    Candidate { addr: 0x15, probe: probe_ektf2127 },
    Candidate { addr: 0x76, probe: probe_zet6251 },
];

pub struct Touchscreen;

impl DeviceClass for Touchscreen {
    type Model = TouchscreenModel;
    const NODE_NAME: &'static str = "touchscreen";
    const POWER_ON_DELAY_MS: u32 = 20;

    fn candidates() -> &'static [Candidate<TouchscreenModel>] {
        &CANDIDATES
    }
}
