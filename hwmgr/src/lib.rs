//! Hardware manager for Allwinner Q8 form-factor tablets.
//!
//! Q8 boards share one device tree per SoC but are populated with whatever
//! touchscreen and accelerometer chips were cheapest that week. This crate
//! probes the I2C buses for the known candidates, picks board settings from
//! what it finds and patches the device tree so the real drivers can bind.
#![cfg_attr(not(test), no_std)]
extern crate alloc;

#[macro_use]
pub mod logging;

pub mod accel;
pub mod bus;
pub mod config;
pub mod error;
pub mod manager;
pub mod probe;
pub mod resolver;
pub mod resource;
pub mod touchscreen;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Configuration;
pub use error::{HwMgrError, ProbeError};
pub use manager::{HardwareManager, Report, Soc};
