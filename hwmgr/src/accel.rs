//! Accelerometers found on Q8 boards.
//!
//! The accelerometer bus is shared with the FM core of the RDA599x
//! wifi/bt/fm combo chip some boards carry. It is looked for first since its
//! presence changes how the touchscreen is mounted.

use num_enum::TryFromPrimitive;

use crate::bus::{BusError, I2cClient};
use crate::probe::{Candidate, ChipModel, DeviceClass, ProbeEnv};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccelModel {
    Da226,
    Da280,
    Da311,
    Dmard05,
    Dmard06,
    Dmard07,
    Dmard09,
    Dmard10,
    Mc3210,
    Mc3230,
    Mma7660,
    Mxc6225,
}

impl ChipModel for AccelModel {
    fn compatible(&self) -> &'static str {
        match self {
            AccelModel::Da226 => "miramems,da226",
            AccelModel::Da280 => "miramems,da280",
            AccelModel::Da311 => "miramems,da311",
            AccelModel::Dmard05 => "domintech,dmard05",
            AccelModel::Dmard06 => "domintech,dmard06",
            AccelModel::Dmard07 => "domintech,dmard07",
            AccelModel::Dmard09 => "domintech,dmard09",
            AccelModel::Dmard10 => "domintech,dmard10",
            AccelModel::Mc3210 => "mcube,mc3210",
            AccelModel::Mc3230 => "mcube,mc3230",
            AccelModel::Mma7660 => "fsl,mma7660",
            AccelModel::Mxc6225 => "memsic,mxc6225",
        }
    }
}

const RDA_REG_FM_ID: u8 = 0x0c;

/// FM core ids of the RDA599x family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u16)]
enum RdaFmId {
    Rda5802 = 0x5802,
    Rda5803 = 0x5803,
    Rda5805 = 0x5805,
    Rda5820 = 0x5820,
}

const MXC6225_REG_CHIP_ID: u8 = 0x08;
const MXC6225_CHIP_ID: u8 = 0x05;

const MC3230_REG_CHIP_ID: u8 = 0x18;
const MC3230_CHIP_ID: u8 = 0x01;
// factory reserved on the MMA7660
const MMA7660_CHIP_ID: u8 = 0x00;
const MC3230_REG_PRODUCT_CODE: u8 = 0x3b;

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
enum Mc32xxProduct {
    Mma7660 = 0x00,
    Mc3210 = 0x90,
    Mc3230 = 0x19,
}

const DMARD06_REG_CHIP_ID: u8 = 0x0f;

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
enum DmardChipId {
    Dmard05 = 0x05,
    Dmard06 = 0x06,
    Dmard07 = 0x07,
}

const DMARD09_REG_CHIP_ID: u8 = 0x18;
const DMARD09_CHIP_ID: u8 = 0x95;

// both registers have distinctive power-on reset values
const DMARD10_REG_STADR: u8 = 0x12;
const DMARD10_REG_STAINT: u8 = 0x1c;
const DMARD10_VALUE_STADR: u8 = 0x55;
const DMARD10_VALUE_STAINT: u8 = 0xaa;

const DA280_REG_CHIP_ID: u8 = 0x01;
const DA280_REG_ACC_Z_LSB: u8 = 0x06;
const DA280_REG_MODE_BW: u8 = 0x11;
const DA280_CHIP_ID: u8 = 0x13;
const DA280_MODE_ENABLE: u8 = 0x1e;
const DA280_MODE_DISABLE: u8 = 0x9e;
/// Z reading of a 2-axis DA226: max positive 14-bit value.
const DA226_Z_READING: u16 = 32764;

const DA311_REG_CHIP_ID: u8 = 0x0f;
const DA311_CHIP_ID: u8 = 0x13;

/// Never identifies an accelerometer, only notes the RDA599x.
///
/// The FM id is read rather than the wifi id behind address 0x14 because the
/// latter needs a bank select write.
fn probe_rda599x(
    client: &mut I2cClient<'_>,
    env: &mut ProbeEnv<'_>,
) -> Result<Option<AccelModel>, BusError> {
    let id = client.read_word_swapped(RDA_REG_FM_ID)?;
    if let Ok(core) = RdaFmId::try_from(id) {
        debug_ex!("RDA599x FM core {:?} present", core);
        env.aux.has_rda599x = true;
    }
    Ok(None)
}

fn probe_mxc6225(
    client: &mut I2cClient<'_>,
    _: &mut ProbeEnv<'_>,
) -> Result<Option<AccelModel>, BusError> {
    // bits 7-5 are undefined
    let id = client.read_byte_data(MXC6225_REG_CHIP_ID)? & 0x1f;
    Ok((id == MXC6225_CHIP_ID).then_some(AccelModel::Mxc6225))
}

fn probe_mc3230(
    client: &mut I2cClient<'_>,
    _: &mut ProbeEnv<'_>,
) -> Result<Option<AccelModel>, BusError> {
    let id = client.read_byte_data(MC3230_REG_CHIP_ID)?;
    if id != MC3230_CHIP_ID && id != MMA7660_CHIP_ID {
        return Ok(None);
    }
    let product = client.read_byte_data(MC3230_REG_PRODUCT_CODE)?;
    Ok(Mc32xxProduct::try_from(product).ok().map(|product| match product {
        Mc32xxProduct::Mma7660 => AccelModel::Mma7660,
        Mc32xxProduct::Mc3210 => AccelModel::Mc3210,
        Mc32xxProduct::Mc3230 => AccelModel::Mc3230,
    }))
}

fn probe_dmard06(
    client: &mut I2cClient<'_>,
    _: &mut ProbeEnv<'_>,
) -> Result<Option<AccelModel>, BusError> {
    let id = client.read_byte_data(DMARD06_REG_CHIP_ID)?;
    Ok(DmardChipId::try_from(id).ok().map(|chip| match chip {
        DmardChipId::Dmard05 => AccelModel::Dmard05,
        DmardChipId::Dmard06 => AccelModel::Dmard06,
        DmardChipId::Dmard07 => AccelModel::Dmard07,
    }))
}

fn probe_dmard09(
    client: &mut I2cClient<'_>,
    _: &mut ProbeEnv<'_>,
) -> Result<Option<AccelModel>, BusError> {
    let id = client.read_byte_data(DMARD09_REG_CHIP_ID)?;
    Ok((id == DMARD09_CHIP_ID).then_some(AccelModel::Dmard09))
}

fn probe_dmard10(
    client: &mut I2cClient<'_>,
    _: &mut ProbeEnv<'_>,
) -> Result<Option<AccelModel>, BusError> {
    if client.read_byte_data(DMARD10_REG_STADR)? != DMARD10_VALUE_STADR {
        return Ok(None);
    }
    let staint = client.read_byte_data(DMARD10_REG_STAINT)?;
    Ok((staint == DMARD10_VALUE_STAINT).then_some(AccelModel::Dmard10))
}

/// Tells the 2-axis DA226 from the DA280 by taking one measurement.
fn probe_da280(
    client: &mut I2cClient<'_>,
    env: &mut ProbeEnv<'_>,
) -> Result<Option<AccelModel>, BusError> {
    if client.read_byte_data(DA280_REG_CHIP_ID)? != DA280_CHIP_ID {
        return Ok(None);
    }
    client.write_byte_data(DA280_REG_MODE_BW, DA280_MODE_ENABLE)?;
    env.delay.delay_ms(10);
    let model = match client.read_word_data(DA280_REG_ACC_Z_LSB)? {
        DA226_Z_READING => AccelModel::Da226,
        _ => AccelModel::Da280,
    };
    client.write_byte_data(DA280_REG_MODE_BW, DA280_MODE_DISABLE)?;
    Ok(Some(model))
}

fn probe_da311(
    client: &mut I2cClient<'_>,
    _: &mut ProbeEnv<'_>,
) -> Result<Option<AccelModel>, BusError> {
    let id = client.read_byte_data(DA311_REG_CHIP_ID)?;
    Ok((id == DA311_CHIP_ID).then_some(AccelModel::Da311))
}

static CANDIDATES: [Candidate<AccelModel>; 9] = [
    Candidate { addr: 0x11, probe: probe_rda599x },
    Candidate { addr: 0x15, probe: probe_mxc6225 },
    Candidate { addr: 0x4c, probe: probe_mc3230 },
    Candidate { addr: 0x1c, probe: probe_dmard06 },
    Candidate { addr: 0x1d, probe: probe_dmard09 },
    Candidate { addr: 0x18, probe: probe_dmard10 },
    Candidate { addr: 0x26, probe: probe_da280 },
    Candidate { addr: 0x27, probe: probe_da280 },
    Candidate { addr: 0x27, probe: probe_da311 },
];

pub struct Accelerometer;

impl DeviceClass for Accelerometer {
    type Model = AccelModel;
    const NODE_NAME: &'static str = "accelerometer";

    fn candidates() -> &'static [Candidate<AccelModel>] {
        &CANDIDATES
    }
}
