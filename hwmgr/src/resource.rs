//! Platform resources a probe needs before it can talk to a chip.
//!
//! Every handle is given back through its `release` method, which consumes it.
//! Consumers are named by the full path of their template node.

use alloc::boxed::Box;
use thiserror::Error;

use crate::bus::I2cAdapter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ResourceError {
    /// The provider of the resource has not come up yet, try again later.
    #[error("resource not ready yet")]
    Deferred,
    /// The resource is not described for this consumer.
    #[error("resource unavailable")]
    Unavailable,
    #[error("resource I/O error")]
    Io,
}

/// Pin multiplexing state of a consumer.
pub trait Pinctrl {
    /// Switch the pins to the consumer's default state.
    fn select_default(&mut self) -> Result<(), ResourceError>;
    fn release(self: Box<Self>);
}

/// A switchable supply rail.
pub trait Regulator {
    fn enable(&mut self) -> Result<(), ResourceError>;
    fn disable(&mut self) -> Result<(), ResourceError>;
    fn release(self: Box<Self>);
}

/// Output line used to power a chip up.
pub trait PowerGpio {
    fn set_level(&mut self, high: bool) -> Result<(), ResourceError>;
    fn release(self: Box<Self>);
}

/// Control over a regulator's constraints, used to fix up board rails.
pub trait RegulatorControl {
    /// Current (min, max) voltage constraint in microvolts, if any.
    fn voltage(&self) -> Option<(u32, u32)>;
    fn set_voltage(&mut self, min_uv: u32, max_uv: u32) -> Result<(), ResourceError>;
    fn name(&self) -> Option<&str>;
    fn set_name(&mut self, name: &str) -> Result<(), ResourceError>;
    /// Whether consumers may change the voltage and switch the rail.
    fn changes_allowed(&self) -> bool;
    fn allow_changes(&mut self) -> Result<(), ResourceError>;
    fn release(self: Box<Self>);
}

/// Source of every platform resource used by the manager.
pub trait ResourceProvider {
    fn pinctrl(&mut self, consumer: &str) -> Result<Box<dyn Pinctrl>, ResourceError>;
    /// Adapter for the bus node at `bus`.
    fn i2c_adapter(&mut self, bus: &str) -> Result<Box<dyn I2cAdapter>, ResourceError>;
    /// Supply `supply` of `consumer`, as in `<supply>-supply` properties.
    fn regulator(&mut self, consumer: &str, supply: &str)
    -> Result<Box<dyn Regulator>, ResourceError>;
    /// GPIO `con_id` of `consumer`, as in `<con_id>-gpios` properties.
    fn power_gpio(&mut self, consumer: &str, con_id: &str)
    -> Result<Box<dyn PowerGpio>, ResourceError>;
    /// Regulator described by the node named `name`.
    fn regulator_control(&mut self, name: &str)
    -> Result<Box<dyn RegulatorControl>, ResourceError>;
}
